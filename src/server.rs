use std::future::Future;
use std::net::SocketAddr;

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    routing::post,
};
use bytes::Bytes;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};
use tracing::{Instrument, debug, info, info_span};

use crate::producer::{Emitted, emit};
use crate::protocol::{RequestBody, StreamDefaults};

/// Address and per-request defaults of the producer server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub defaults: StreamDefaults,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3001,
            defaults: StreamDefaults::default(),
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

/// Build the [`axum::Router`] exposing `POST /stream`.
///
/// Fields missing from the JSON body are taken from `defaults`.
pub fn router(defaults: StreamDefaults) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    Router::new()
        .route("/stream", post(stream_tokens))
        .layer(cors)
        .with_state(defaults)
}

async fn stream_tokens(
    State(defaults): State<StreamDefaults>,
    Json(body): Json<RequestBody>,
) -> Response {
    let request = defaults.resolve(body);
    let (tx, rx) = mpsc::channel(1);
    let span = info_span!("stream", chars = request.text.len(), chunk_size = request.chunk_size);
    tokio::spawn(
        async move {
            let mut rng = StdRng::from_entropy();
            match emit(&request, &mut rng, &tx).await {
                Emitted::Completed { data_events } => debug!(data_events, "response finished"),
                Emitted::Disconnected { data_events } => {
                    info!(data_events, "client went away, stream stopped")
                }
            }
        }
        .instrument(span),
    );

    let frames = ReceiverStream::new(rx).map(|event| Ok::<Bytes, std::io::Error>(event.to_frame()));
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Body::from_stream(frames),
    )
        .into_response()
}

/// Serve the router on an already bound listener until `shutdown` resolves.
pub async fn serve_on<F>(listener: TcpListener, defaults: StreamDefaults, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(defaults))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Bind the configured address and serve until `shutdown` resolves.
pub async fn serve<F>(config: ServerConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = config.addr()?;
    let listener = TcpListener::bind(addr).await?;
    info!(
        addr = %listener.local_addr()?,
        chunk_size = config.defaults.chunk_size,
        token_delay_ms = config.defaults.avg_delay_ms,
        delay_jitter_ms = config.defaults.delay_jitter_ms,
        "stream-lab server listening"
    );
    serve_on(listener, config.defaults, shutdown).await
}
