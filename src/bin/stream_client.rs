use std::pin::pin;
use std::time::Duration;

use clap::Parser;
use daemon_common::{LogLevel, init_tracing, shutdown_signal};
use stream_lab::{ClientConfig, Outcome, Session, StreamClient, StreamRequest};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Send a text to a stream-lab server and print the response as it arrives.
///
/// Reads the text from stdin when `--text` is absent. Ctrl+C stops the
/// exchange.
#[derive(Parser, Debug)]
#[command(name = "stream-client")]
struct Cli {
    /// Stream endpoint of the server
    #[arg(long, default_value = "http://localhost:3001/stream")]
    url: String,

    /// Text to stream back
    #[arg(long)]
    text: Option<String>,

    /// Tokens per event
    #[arg(long, default_value_t = 1)]
    chunk_size: usize,

    /// Mean pause between events in milliseconds
    #[arg(long, default_value_t = 30.0)]
    avg_delay_ms: f64,

    /// Standard deviation of the pause jitter in milliseconds
    #[arg(long, default_value_t = 0.0)]
    delay_jitter_ms: f64,

    /// Give up after this many milliseconds without data
    #[arg(long)]
    idle_timeout_ms: Option<u64>,

    /// Print the received event log when the exchange ends
    #[arg(long)]
    debug: bool,

    /// Logging verbosity level
    #[arg(long, default_value = "warn")]
    log_level: LogLevel,
}

impl Cli {
    fn client_config(&self) -> ClientConfig {
        ClientConfig {
            url: self.url.clone(),
            idle_timeout: self.idle_timeout_ms.map(Duration::from_millis),
        }
    }

    fn request(&self, text: String) -> StreamRequest {
        StreamRequest::new(text)
            .with_chunk_size(self.chunk_size.max(1))
            .with_pacing(self.avg_delay_ms.max(0.0), self.delay_jitter_ms.max(0.0))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level)?;

    let text = match &cli.text {
        Some(text) => text.clone(),
        None => {
            let mut buf = String::new();
            tokio::io::stdin().read_to_string(&mut buf).await?;
            buf
        }
    };

    let session = Session::new(StreamClient::new(cli.client_config()));
    let mut rx = session.subscribe();
    let exchange = session.start_exchange(cli.request(text))?;

    let mut out = tokio::io::stdout();
    let mut printed = 0;
    let mut interrupt = pin!(shutdown_signal());
    let mut interrupted = false;
    loop {
        tokio::select! {
            _ = &mut interrupt, if !interrupted => {
                interrupted = true;
                exchange.cancel();
            }
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = rx.borrow_and_update().clone();
                if let Some(fresh) = state.accumulated_text.get(printed..) {
                    out.write_all(fresh.as_bytes()).await?;
                    out.flush().await?;
                }
                printed = state.accumulated_text.len();
                if state.phase.is_terminal() {
                    break;
                }
            }
        }
    }

    let outcome = exchange.finished().await;
    let state = session.snapshot();
    out.write_all(b"\n").await?;
    out.flush().await?;

    if cli.debug {
        for entry in &state.log {
            eprintln!(
                "{:04} {:>6}ms {}",
                entry.seq,
                entry.elapsed.as_millis(),
                entry.raw
            );
        }
    }

    match outcome {
        Outcome::Completed { .. } => eprintln!("done, {} words", state.word_count()),
        Outcome::Cancelled => eprintln!("stopped after {} words", state.word_count()),
        Outcome::Failed(reason) => anyhow::bail!(reason),
    }
    Ok(())
}
