use std::time::Duration;

use clap::Parser;

use scribe_client::SynthesisClient;
use scribe_core::config::ClientConfig;
use scribe_core::progress::SessionEvent;
use scribe_telemetry::TelemetryConfig;

#[derive(Parser, Debug)]
#[command(name = "scribe", about = "Real-time synthesis progress client")]
struct Args {
    /// Topic to synthesize a chapter for
    #[arg(long)]
    topic: String,

    /// Specialty context for the synthesis
    #[arg(long, default_value = "general")]
    specialty: String,

    /// Maximum number of sources to consult
    #[arg(long, default_value_t = 15)]
    max_sources: u32,

    /// How long to wait for the live transport before falling back (seconds)
    #[arg(long, default_value_t = 3)]
    connect_wait: u64,

    /// Emit newline-delimited JSON logs
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    scribe_telemetry::init_telemetry(TelemetryConfig {
        json: args.json_logs,
        ..Default::default()
    });

    let config = ClientConfig::from_env();
    tracing::info!(ws_url = %config.ws_url, fallback_url = %config.fallback_url, "starting scribe client");

    let client = SynthesisClient::new(config)?;
    let mut events = client.events();
    client.connect();

    // Give the transport a moment to come up; start() falls back to the
    // blocking request if it never does.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(args.connect_wait);
    while !client.is_connected() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    client
        .start(&args.topic, &args.specialty, args.max_sources)
        .await?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(SessionEvent::Progress(p)) => {
                    println!("[{:>3}%] {}: {}", p.progress, p.status.as_str(), p.message);
                }
                Ok(SessionEvent::Completed(result)) => {
                    println!("chapter {} ready: {}", result.chapter_id, result.title);
                    break;
                }
                Ok(SessionEvent::Failed(record)) => {
                    client.shutdown();
                    anyhow::bail!("synthesis failed ({}): {}", record.kind, record.message);
                }
                Err(_) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, shutting down");
                break;
            }
        }
    }

    client.shutdown();
    Ok(())
}
