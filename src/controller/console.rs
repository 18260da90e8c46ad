//! Line-oriented operator console
//!
//! One request per line, e.g. `led on`, `interval 500`, `session start 5 30`.

use std::net::IpAddr;
use std::path::PathBuf;

use crate::controller::events::ControlRequest;
use crate::protocol::StreamMode;

pub const HELP: &str = "\
commands:
  led on|off            uv on|off             buzzer on|off
  led-bright <1-20>     uv-bright <1-20>
  stream                toggle data stream    pause    toggle pause
  mode continuous|fixed count <n>             reset    reset stream count
  interval <ms>         status                reboot
  rec start|stop|clear  rec save [path]       clear-cache
  measure               cancel
  session start <interval-min> <duration-min> session stop
  ip <addr>             stats                 raw <json>
  help                  quit";

fn on_off(arg: Option<&str>) -> Result<bool, String> {
    match arg {
        Some("on") | Some("1") | Some("true") => Ok(true),
        Some("off") | Some("0") | Some("false") => Ok(false),
        _ => Err("expected on|off".into()),
    }
}

fn number<T: std::str::FromStr>(arg: Option<&str>, what: &str) -> Result<T, String> {
    arg.and_then(|a| a.parse().ok())
        .ok_or_else(|| format!("expected {}", what))
}

/// Parse one console line; `Ok(None)` for blank lines and `help`
pub fn parse_line(line: &str) -> Result<Option<ControlRequest>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if let Some(json) = line.strip_prefix("raw ") {
        return Ok(Some(ControlRequest::SendRaw(json.trim().to_string())));
    }

    let mut words = line.split_whitespace();
    let cmd = words.next().unwrap_or_default();
    let arg = words.next();

    let request = match cmd {
        "help" | "?" => return Ok(None),
        "led" => ControlRequest::SetLed(on_off(arg)?),
        "uv" => ControlRequest::SetUv(on_off(arg)?),
        "buzzer" => ControlRequest::SetBuzzer(on_off(arg)?),
        "led-bright" => ControlRequest::SetLedBrightness(number(arg, "brightness 1-20")?),
        "uv-bright" => ControlRequest::SetUvBrightness(number(arg, "brightness 1-20")?),
        "stream" => ControlRequest::ToggleDataStream,
        "pause" => ControlRequest::TogglePause,
        "reset" => ControlRequest::ResetStreamCount,
        "mode" => match arg {
            Some("continuous") => ControlRequest::SetStreamMode(StreamMode::Continuous),
            Some("fixed") => ControlRequest::SetStreamMode(StreamMode::Fixed),
            _ => return Err("expected continuous|fixed".into()),
        },
        "count" => ControlRequest::SetStreamCount(number(arg, "packet count")?),
        "interval" => ControlRequest::SetStreamInterval(number(arg, "interval in ms")?),
        "status" => ControlRequest::GetDeviceStatus,
        "reboot" => ControlRequest::Reboot,
        "rec" => match arg {
            Some("start") => ControlRequest::StartRecording,
            Some("stop") => ControlRequest::StopRecording,
            Some("clear") => ControlRequest::ClearRecording,
            Some("save") => ControlRequest::SaveRecording(words.next().map(PathBuf::from)),
            _ => return Err("expected rec start|stop|save|clear".into()),
        },
        "clear-cache" => ControlRequest::ClearCache,
        "measure" => ControlRequest::StartInstantMeasurement,
        "cancel" => ControlRequest::CancelMeasurement,
        "session" => match arg {
            Some("start") => ControlRequest::StartRecurringSession {
                interval_min: number(words.next(), "interval in minutes")?,
                duration_min: number(words.next(), "duration in minutes")?,
            },
            Some("stop") => ControlRequest::StopRecurringSession,
            _ => return Err("expected session start|stop".into()),
        },
        "ip" => ControlRequest::SetLocalAddress(number::<IpAddr>(arg, "an IP address")?),
        "stats" => ControlRequest::Stats,
        "quit" | "exit" => ControlRequest::Shutdown,
        other => return Err(format!("unknown command `{}`; try `help`", other)),
    };
    Ok(Some(request))
}
