use clap::Parser;
use daemon_common::{LogLevel, init_tracing, maybe_daemonize, shutdown_signal};
use stream_lab::{ServerConfig, StreamDefaults};

#[derive(Parser, Debug)]
#[command(name = "stream-lab", about = "Token streaming playground server")]
struct Cli {
    /// Host interface to bind
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 3001)]
    port: u16,

    /// Tokens per event when the request does not say
    #[arg(long, env = "CHUNK_SIZE", default_value_t = 1)]
    chunk_size: usize,

    /// Mean pause between events in milliseconds when the request does not say
    #[arg(long, env = "TOKEN_DELAY_MS", default_value_t = 30.0)]
    token_delay_ms: f64,

    /// Standard deviation of the pause jitter when the request does not say
    #[arg(long, env = "DELAY_JITTER_MS", default_value_t = 0.0)]
    delay_jitter_ms: f64,

    /// Logging verbosity level
    #[arg(long, default_value = "info")]
    log_level: LogLevel,

    /// Run as a background daemon
    #[arg(short = 'd', long)]
    daemon: bool,
}

impl Cli {
    fn config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            defaults: StreamDefaults {
                chunk_size: self.chunk_size.max(1),
                avg_delay_ms: self.token_delay_ms.max(0.0),
                delay_jitter_ms: self.delay_jitter_ms.max(0.0),
            },
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    maybe_daemonize(cli.daemon)?;
    init_tracing(cli.log_level)?;
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(stream_lab::serve(cli.config(), shutdown_signal()))
}
