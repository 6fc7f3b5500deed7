//! Consumer side of the protocol: decoding a byte stream into events and
//! folding those events into [`ConsumerState`].

use std::fmt;
use std::pin::pin;
use std::time::{Duration, Instant};

use async_stream::stream;
use futures::{Stream, StreamExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::ExchangeError;
use crate::line_buffer::LineBuffer;
use crate::protocol::{DONE, Line, StreamEvent, parse_line};

/// Lifecycle of one exchange as seen by the user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    Streaming,
    Completed,
    Cancelled,
    Failed(String),
}

impl Phase {
    pub fn is_streaming(&self) -> bool {
        matches!(self, Phase::Streaming)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Phase::Completed | Phase::Cancelled | Phase::Failed(_)
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Idle => f.write_str("idle"),
            Phase::Streaming => f.write_str("streaming"),
            Phase::Completed => f.write_str("completed"),
            Phase::Cancelled => f.write_str("cancelled"),
            Phase::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Diagnostic record of one received data event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Position in the exchange, starting at 1.
    pub seq: u64,
    /// Time since the exchange started reading.
    pub elapsed: Duration,
    /// Payload exactly as received, without the `data:` marker.
    pub raw: String,
}

/// Everything the consumer knows about the current exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerState {
    pub accumulated_text: String,
    pub phase: Phase,
    pub log: Vec<LogEntry>,
}

impl ConsumerState {
    /// Clear the previous exchange and enter [`Phase::Streaming`].
    pub fn begin(&mut self) {
        self.accumulated_text.clear();
        self.log.clear();
        self.phase = Phase::Streaming;
    }

    fn append(&mut self, token: &str, raw: String, elapsed: Duration) {
        self.accumulated_text.push_str(token);
        let seq = self.log.len() as u64 + 1;
        self.log.push(LogEntry { seq, elapsed, raw });
    }

    /// Number of whitespace separated words received so far.
    pub fn word_count(&self) -> usize {
        self.accumulated_text.split_whitespace().count()
    }
}

/// One decoded event together with its raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub event: StreamEvent,
    pub raw: String,
}

/// Decode a transport byte stream into protocol events.
///
/// Chunks may split lines, JSON payloads and even UTF-8 characters anywhere.
/// Malformed data lines are dropped. The stream ends after
/// [`StreamEvent::Done`], after the first transport error, or when the
/// transport ends.
pub fn decode_events<S, B, E>(bytes: S) -> impl Stream<Item = Result<Received, E>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    stream! {
        let mut bytes = pin!(bytes);
        let mut buffer = LineBuffer::new();
        'read: while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(e);
                    break 'read;
                }
            };
            for line in buffer.push(chunk.as_ref()) {
                match parse_line(&line) {
                    Line::Ignored => {}
                    Line::Done => {
                        yield Ok(Received { event: StreamEvent::Done, raw: DONE.to_string() });
                        break 'read;
                    }
                    Line::Data { raw, token } => {
                        yield Ok(Received { event: StreamEvent::Data(token), raw });
                    }
                    Line::Malformed { raw, reason } => {
                        trace!(%raw, %reason, "dropping malformed data line");
                    }
                }
            }
        }
    }
}

/// How an exchange ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Normal end. `terminated` is false when the transport closed without
    /// ever sending `[DONE]`.
    Completed { terminated: bool },
    Cancelled,
    Failed(String),
}

impl Outcome {
    pub fn phase(&self) -> Phase {
        match self {
            Outcome::Completed { .. } => Phase::Completed,
            Outcome::Cancelled => Phase::Cancelled,
            Outcome::Failed(reason) => Phase::Failed(reason.clone()),
        }
    }
}

/// Read `bytes` to the end of the exchange, publishing every change to
/// `state`.
///
/// `cancel` is observed at every suspension point; cancelling yields
/// [`Outcome::Cancelled`] and never a failure. With `idle_timeout` set, a
/// gap between two received chunks longer than the limit fails the
/// exchange. The phase is settled
/// exactly once, when this returns.
pub async fn read_exchange<S, B, E>(
    bytes: S,
    cancel: &CancellationToken,
    state: &watch::Sender<ConsumerState>,
    idle_timeout: Option<Duration>,
) -> Outcome
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: fmt::Display,
{
    let started = Instant::now();
    enter_streaming(state);
    let mut events = pin!(decode_events(idle_limited(bytes, idle_timeout)));

    let outcome = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break Outcome::Cancelled,
            next = events.next() => next,
        };
        match next {
            None => {
                debug!("stream closed without [DONE]");
                break Outcome::Completed { terminated: false };
            }
            Some(Err(e)) => break Outcome::Failed(e.to_string()),
            Some(Ok(Received { event: StreamEvent::Done, .. })) => {
                break Outcome::Completed { terminated: true };
            }
            Some(Ok(Received { event: StreamEvent::Data(token), raw })) => {
                trace!(%raw, "received");
                let elapsed = started.elapsed();
                state.send_modify(|s| s.append(&token, raw, elapsed));
            }
        }
    };

    debug!(?outcome, "exchange finished");
    state.send_modify(|s| s.phase = outcome.phase());
    outcome
}

/// Move `state` into [`Phase::Streaming`] unless it already is.
///
/// Returns false when an exchange was already streaming.
pub(crate) fn enter_streaming(state: &watch::Sender<ConsumerState>) -> bool {
    state.send_if_modified(|s| {
        if s.phase.is_streaming() {
            return false;
        }
        s.begin();
        true
    })
}

/// Why reading the byte stream stopped short.
#[derive(Debug)]
enum Interrupted<E> {
    Transport(E),
    Idle(Duration),
}

impl<E: fmt::Display> fmt::Display for Interrupted<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interrupted::Transport(e) => fmt::Display::fmt(e, f),
            Interrupted::Idle(limit) => fmt::Display::fmt(&ExchangeError::IdleTimeout(*limit), f),
        }
    }
}

/// Pass `bytes` through, ending with [`Interrupted::Idle`] when no chunk
/// arrives within `limit`. Every chunk restarts the timer.
fn idle_limited<S, B, E>(bytes: S, limit: Option<Duration>) -> impl Stream<Item = Result<B, Interrupted<E>>>
where
    S: Stream<Item = Result<B, E>>,
{
    stream! {
        let mut bytes = pin!(bytes);
        loop {
            let next = match limit {
                Some(limit) => match tokio::time::timeout(limit, bytes.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        yield Err(Interrupted::Idle(limit));
                        break;
                    }
                },
                None => bytes.next().await,
            };
            match next {
                Some(chunk) => yield chunk.map_err(Interrupted::Transport),
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::convert::Infallible;
    use tracing_test::traced_test;

    const WIRE: &str = "data: {\"token\":\"the quick \"}\n\ndata: {\"token\":\"fox\"}\n\ndata: [DONE]\n\n";

    fn chunks(parts: Vec<&'static [u8]>) -> impl Stream<Item = Result<&'static [u8], Infallible>> {
        stream::iter(parts.into_iter().map(Ok))
    }

    fn wire(parts: &[&'static str]) -> Vec<&'static [u8]> {
        parts.iter().map(|p| p.as_bytes()).collect()
    }

    async fn read(parts: Vec<&'static [u8]>) -> (Outcome, ConsumerState) {
        let (tx, _rx) = watch::channel(ConsumerState::default());
        let outcome = read_exchange(chunks(parts), &CancellationToken::new(), &tx, None).await;
        (outcome, tx.borrow().clone())
    }

    #[tokio::test]
    async fn completes_on_done() {
        let (outcome, state) = read(vec![WIRE.as_bytes()]).await;
        assert_eq!(outcome, Outcome::Completed { terminated: true });
        assert_eq!(state.phase, Phase::Completed);
        assert_eq!(state.accumulated_text, "the quick fox");
        assert_eq!(state.word_count(), 3);
        let seqs: Vec<u64> = state.log.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
        assert_eq!(state.log[1].raw, "{\"token\":\"fox\"}");
    }

    #[tokio::test]
    async fn split_inside_json_matches_unsplit() {
        let bytes = WIRE.as_bytes();
        let (_, whole) = read(vec![bytes]).await;
        for i in 0..bytes.len() {
            for j in i..bytes.len() {
                let (outcome, state) = read(vec![&bytes[..i], &bytes[i..j], &bytes[j..]]).await;
                assert_eq!(outcome, Outcome::Completed { terminated: true });
                assert_eq!(state.accumulated_text, whole.accumulated_text, "split {i}/{j}");
            }
        }
    }

    #[tokio::test]
    async fn done_stops_reading_remaining_bytes() {
        let (outcome, state) = read(wire(&[
            "data: {\"token\":\"a\"}\n\ndata: [DONE]\n\ndata: {\"token\":\"late\"}\n\n",
            "data: {\"token\":\"later\"}\n\n",
        ]))
        .await;
        assert_eq!(outcome, Outcome::Completed { terminated: true });
        assert_eq!(state.accumulated_text, "a");
    }

    #[tokio::test]
    async fn malformed_line_is_dropped() {
        let (outcome, state) = read(wire(&[
            "data: {\"token\":\"one \"}\n\n",
            "data: {\"token\": oops}\n\n",
            "data: {\"token\":\"two\"}\n\ndata: [DONE]\n\n",
        ]))
        .await;
        assert_eq!(outcome, Outcome::Completed { terminated: true });
        assert_eq!(state.accumulated_text, "one two");
        assert_eq!(state.log.len(), 2);
    }

    #[tokio::test]
    #[traced_test]
    async fn early_close_is_soft_success() {
        let (outcome, state) = read(wire(&["data: {\"token\":\"partial\"}\n\ndata: {\"tok"])).await;
        assert_eq!(outcome, Outcome::Completed { terminated: false });
        assert_eq!(state.phase, Phase::Completed);
        assert_eq!(state.accumulated_text, "partial");
        assert!(logs_contain("stream closed without [DONE]"));
    }

    #[tokio::test]
    async fn cancelled_before_any_bytes() {
        let (tx, _rx) = watch::channel(ConsumerState::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = read_exchange(
            stream::pending::<Result<&[u8], Infallible>>(),
            &cancel,
            &tx,
            None,
        )
        .await;
        assert_eq!(outcome, Outcome::Cancelled);
        let state = tx.borrow().clone();
        assert_eq!(state.phase, Phase::Cancelled);
        assert_eq!(state.accumulated_text, "");
    }

    #[tokio::test]
    async fn transport_error_fails_with_reason() {
        let parts: Vec<Result<&[u8], String>> = vec![
            Ok("data: {\"token\":\"x\"}\n\n".as_bytes()),
            Err("connection reset".to_string()),
        ];
        let (tx, _rx) = watch::channel(ConsumerState::default());
        let outcome = read_exchange(stream::iter(parts), &CancellationToken::new(), &tx, None).await;
        assert_eq!(outcome, Outcome::Failed("connection reset".into()));
        assert_eq!(tx.borrow().phase, Phase::Failed("connection reset".into()));
        assert_eq!(tx.borrow().accumulated_text, "x");
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_fails_silent_stream() {
        let (tx, _rx) = watch::channel(ConsumerState::default());
        let outcome = read_exchange(
            stream::pending::<Result<&[u8], Infallible>>(),
            &CancellationToken::new(),
            &tx,
            Some(Duration::from_millis(250)),
        )
        .await;
        assert_eq!(outcome, Outcome::Failed("idle timeout after 250 ms".into()));
    }

    fn spaced(gap: Duration, parts: Vec<&'static str>) -> impl Stream<Item = Result<&'static [u8], Infallible>> {
        stream! {
            for part in parts {
                tokio::time::sleep(gap).await;
                yield Ok(part.as_bytes());
            }
        }
    }

    async fn read_limited(gap: Duration, parts: Vec<&'static str>) -> (Outcome, ConsumerState) {
        let (tx, _rx) = watch::channel(ConsumerState::default());
        let outcome = read_exchange(
            spaced(gap, parts),
            &CancellationToken::new(),
            &tx,
            Some(Duration::from_millis(100)),
        )
        .await;
        (outcome, tx.borrow().clone())
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timer_restarts_on_every_chunk() {
        let (outcome, state) = read_limited(
            Duration::from_millis(60),
            vec!["data: {\"tok", "en\":\"slow\"}", "\n\ndata: [DONE]\n\n"],
        )
        .await;
        assert_eq!(outcome, Outcome::Completed { terminated: true });
        assert_eq!(state.accumulated_text, "slow");
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_comments_hold_off_idle_timeout() {
        let (outcome, state) = read_limited(
            Duration::from_millis(50),
            vec![": ping\n\n", ": ping\n\n", ": ping\n\n", ": ping\n\n", ": ping\n\n", "data: [DONE]\n\n"],
        )
        .await;
        assert_eq!(outcome, Outcome::Completed { terminated: true });
        assert_eq!(state.phase, Phase::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_after_last_chunk() {
        let (outcome, state) = read_limited(
            Duration::from_millis(60),
            vec!["data: {\"token\":\"a\"}\n\n"],
        )
        .await;
        assert_eq!(outcome, Outcome::Completed { terminated: false });
        assert_eq!(state.accumulated_text, "a");

        let (tx, _rx) = watch::channel(ConsumerState::default());
        let stalled = spaced(Duration::from_millis(60), vec!["data: {\"token\":\"a\"}\n\n"])
            .chain(stream::pending());
        let outcome = read_exchange(stalled, &CancellationToken::new(), &tx, Some(Duration::from_millis(100))).await;
        assert_eq!(outcome, Outcome::Failed("idle timeout after 100 ms".into()));
        assert_eq!(tx.borrow().accumulated_text, "a");
    }

    #[tokio::test]
    async fn decode_events_is_lazy_and_ordered() {
        let events: Vec<_> = decode_events(chunks(vec![WIRE.as_bytes()]))
            .map(|r| r.unwrap().event)
            .collect()
            .await;
        assert_eq!(
            events,
            vec![
                StreamEvent::Data("the quick ".into()),
                StreamEvent::Data("fox".into()),
                StreamEvent::Done,
            ]
        );
    }

    #[test]
    fn begin_resets_previous_exchange() {
        let mut state = ConsumerState {
            accumulated_text: "old".into(),
            phase: Phase::Failed("boom".into()),
            log: vec![LogEntry {
                seq: 1,
                elapsed: Duration::ZERO,
                raw: "{}".into(),
            }],
        };
        state.begin();
        assert_eq!(state.phase, Phase::Streaming);
        assert!(state.accumulated_text.is_empty());
        assert!(state.log.is_empty());
        state.append("new", "{\"token\":\"new\"}".into(), Duration::ZERO);
        assert_eq!(state.log[0].seq, 1);
    }
}
