//! Spectro Link console application
//!
//! Listens for the sensor on the local interface, connects back to its
//! command port once it announces itself, and takes operator requests on
//! stdin.

use anyhow::{Context, Result};
use std::net::IpAddr;
use std::thread;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spectro_link::{
    config::AppConfig,
    controller::{console, AppEvent, ControlRequest, Controller, ControllerHandle},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Spectro Link");

    let mut config = AppConfig::load_or_default();

    // Optional local address override
    if let Some(arg) = std::env::args().nth(1) {
        let ip: IpAddr = arg
            .parse()
            .with_context(|| format!("Invalid local address: {}", arg))?;
        config.network.bind_address = ip;
    }
    config.validate()?;

    tracing::info!(
        "Status port {}, telemetry port {}, device command port {}",
        config.network.status_port,
        config.network.telemetry_port,
        config.network.command_port
    );

    let (mut controller, handle) = Controller::new(config);
    if let Err(e) = controller.start() {
        // Listeners can be rebound later with `ip <addr>`
        tracing::error!("Network services failed to start: {}", e);
    }

    let controller_thread = thread::Builder::new()
        .name("controller".into())
        .spawn(move || controller.run())
        .context("Failed to spawn controller thread")?;

    let ControllerHandle { requests, events } = handle;

    let printer = thread::Builder::new()
        .name("event-printer".into())
        .spawn(move || {
            for event in events.iter() {
                print_event(&event);
            }
        })
        .context("Failed to spawn event printer")?;

    println!("{}", console::HELP);

    let console_requests = requests.clone();
    let console_task = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match console::parse_line(&line) {
                Ok(Some(request)) => {
                    let quit = request == ControlRequest::Shutdown;
                    if console_requests.try_send(request).is_err() {
                        tracing::warn!("Controller is not accepting requests");
                    }
                    if quit {
                        break;
                    }
                }
                Ok(None) => println!("{}", console::HELP),
                Err(msg) => println!("{}", msg),
            }
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, shutting down");
        }
        _ = console_task => {}
    }

    let _ = requests.try_send(ControlRequest::Shutdown);
    drop(requests);

    if controller_thread.join().is_err() {
        tracing::error!("Controller thread panicked");
    }
    let _ = printer.join();

    tracing::info!("Goodbye");
    // The stdin reader can still be parked in a blocking read
    std::process::exit(0)
}

fn print_event(event: &AppEvent) {
    match event {
        AppEvent::TelemetrySample(sample) => {
            tracing::trace!(
                "sample #{} sc={} {:?}",
                sample.packet_count,
                sample.stream_count,
                sample.channels
            );
        }
        AppEvent::ServiceStatus { channel, ok, message } => {
            println!("[{}] {} {}", channel, if *ok { "ok" } else { "FAILED" }, message);
        }
        AppEvent::DeviceDiscovered { ip, device, firmware } => {
            println!("device {} at {} (firmware {})", device, ip, firmware);
        }
        AppEvent::StatusSnapshot(device) => match serde_json::to_string(device) {
            Ok(json) => println!("status {}", json),
            Err(_) => println!("status {:?}", device),
        },
        AppEvent::StreamLiveness(alive) => {
            println!("telemetry stream {}", if *alive { "up" } else { "down" });
        }
        AppEvent::StreamComplete(done) => {
            println!(
                "stream complete: {}/{} packets ({} total)",
                done.actual_count, done.target_count, done.total_packets
            );
        }
        AppEvent::Connectivity { connected, device } => {
            println!(
                "command channel {} {}",
                device,
                if *connected { "connected" } else { "disconnected" }
            );
        }
        AppEvent::CommandResponse(line) => println!("< {}", line),
        AppEvent::CommandSendError(msg) => println!("send failed: {}", msg),
        AppEvent::ParseError { channel, message } => println!("[{}] bad payload: {}", channel, message),
        AppEvent::RequestRejected { request, reason } => println!("{}: {}", request, reason),
        AppEvent::RecordingStopped { samples, reason } => {
            println!("recording stopped ({:?}): {} samples", reason, samples);
        }
        AppEvent::RecordingSaved(path) => println!("saved {}", path.display()),
        AppEvent::MeasurementStarted { generation } => println!("measurement run {} started", generation),
        AppEvent::MeasurementCompleted {
            run_index,
            partial,
            phases,
            ..
        } => {
            println!(
                "measurement {} complete{}",
                run_index,
                if *partial { " (partial)" } else { "" }
            );
            for phase in phases {
                match &phase.means {
                    Some(means) => println!(
                        "  {:<8} n={} means={:?}",
                        phase.phase.label(),
                        phase.samples,
                        means.map(|m| (m * 10.0).round() / 10.0)
                    ),
                    None => println!("  {:<8} no samples", phase.phase.label()),
                }
            }
        }
        AppEvent::MeasurementFailed { phase, error, .. } => {
            println!("measurement failed in {}: {}", phase, error);
        }
        AppEvent::SessionStarted { recurring } => {
            println!("{} session started", if *recurring { "recurring" } else { "one-shot" });
        }
        AppEvent::SessionClosed { runs, file } => match file {
            Some(path) => println!("session closed: {} runs, {}", runs, path.display()),
            None => println!("session closed: {} runs", runs),
        },
        AppEvent::Stats(stats) => match serde_json::to_string_pretty(stats) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{:?}", stats),
        },
    }
}
