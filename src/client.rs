use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::consumer::{ConsumerState, Outcome, Phase, enter_streaming, read_exchange};
use crate::error::{ExchangeError, StartError};
use crate::protocol::StreamRequest;

/// Where to reach the producer and how patient to be with it.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Full URL of the producer's stream endpoint.
    pub url: String,
    /// Fail an exchange after this long without any bytes. `None` waits
    /// forever.
    pub idle_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:3001/stream".into(),
            idle_timeout: None,
        }
    }
}

/// HTTP transport for exchanges.
#[derive(Debug, Clone)]
pub struct StreamClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl StreamClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Send `request` and return the response body as a byte stream.
    pub async fn open(
        &self,
        request: &StreamRequest,
    ) -> Result<BoxStream<'static, reqwest::Result<Bytes>>, ExchangeError> {
        let resp = self.http.post(&self.config.url).json(request).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ExchangeError::Status(status.as_u16()));
        }
        Ok(resp.bytes_stream().boxed())
    }

    async fn open_within(
        &self,
        request: &StreamRequest,
    ) -> Result<BoxStream<'static, reqwest::Result<Bytes>>, ExchangeError> {
        match self.config.idle_timeout {
            Some(limit) => tokio::time::timeout(limit, self.open(request))
                .await
                .unwrap_or(Err(ExchangeError::IdleTimeout(limit))),
            None => self.open(request).await,
        }
    }

    /// Run one exchange from request to settled phase.
    ///
    /// Cancellation is honoured while the request is still in flight as
    /// well as while the body is being read.
    pub async fn run(
        &self,
        request: StreamRequest,
        cancel: &CancellationToken,
        state: &watch::Sender<ConsumerState>,
    ) -> Outcome {
        enter_streaming(state);
        debug!(url = %self.config.url, chars = request.text.len(), "opening exchange");
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Outcome::Cancelled),
            opened = self.open_within(&request) => opened.map_err(|e| {
                warn!(error = %e, "exchange failed");
                Outcome::Failed(e.to_string())
            }),
        };
        match opened {
            Ok(bytes) => read_exchange(bytes, cancel, state, self.config.idle_timeout).await,
            Err(outcome) => {
                state.send_modify(|s| s.phase = outcome.phase());
                outcome
            }
        }
    }
}

/// A consumer session: at most one exchange streaming at a time, with its
/// state observable through [`Session::subscribe`].
#[derive(Debug, Clone)]
pub struct Session {
    client: StreamClient,
    state: Arc<watch::Sender<ConsumerState>>,
}

impl Session {
    pub fn new(client: StreamClient) -> Self {
        let (state, _) = watch::channel(ConsumerState::default());
        Self {
            client,
            state: Arc::new(state),
        }
    }

    /// Receive a snapshot every time the text, phase or log changes.
    pub fn subscribe(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> ConsumerState {
        self.state.borrow().clone()
    }

    /// Start a new exchange.
    ///
    /// Rejected while another exchange is streaming. Otherwise the previous
    /// text and log are cleared and the exchange runs on its own task.
    pub fn start_exchange(&self, request: StreamRequest) -> Result<Exchange, StartError> {
        if !enter_streaming(&self.state) {
            debug!("exchange already streaming, start ignored");
            return Err(StartError::AlreadyStreaming);
        }
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let client = self.client.clone();
        let state = self.state.clone();
        let task = tokio::spawn(async move {
            let guard = SettleOnDrop::new(&state);
            let outcome = client.run(request, &token, &state).await;
            guard.disarm();
            outcome
        });
        Ok(Exchange { cancel, task })
    }
}

const ABORTED: &str = "exchange aborted";

/// Fails a still-streaming state when the exchange task unwinds before
/// settling it.
struct SettleOnDrop<'a> {
    state: &'a watch::Sender<ConsumerState>,
    armed: bool,
}

impl<'a> SettleOnDrop<'a> {
    fn new(state: &'a watch::Sender<ConsumerState>) -> Self {
        Self { state, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for SettleOnDrop<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.state.send_if_modified(|s| {
            if !s.phase.is_streaming() {
                return false;
            }
            s.phase = Phase::Failed(ABORTED.into());
            true
        });
    }
}

/// Handle to a running exchange.
#[derive(Debug)]
pub struct Exchange {
    cancel: CancellationToken,
    task: JoinHandle<Outcome>,
}

impl Exchange {
    /// Ask the exchange to stop. Safe to call at any time, any number of
    /// times.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the exchange to settle.
    pub async fn finished(self) -> Outcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "exchange task ended without settling");
                Outcome::Failed(ABORTED.into())
            }
        }
    }
}
