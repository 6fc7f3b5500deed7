use rand::Rng;
use tokio::sync::mpsc::Sender;
use tracing::{debug, trace};

use crate::protocol::{StreamEvent, StreamRequest};
use crate::token::{group, tokenize};

/// How a call to [`emit`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emitted {
    /// Every data event and the terminal event were handed to the peer.
    Completed { data_events: usize },
    /// The peer went away; nothing further was sent.
    Disconnected { data_events: usize },
}

/// Stream `request` into `tx` as paced events.
///
/// Tokens are grouped `chunk_size` at a time. A pause drawn from the request's
/// pacing precedes every event except the first, and the stream finishes with
/// [`StreamEvent::Done`]. The peer counts as gone once the receiving side of
/// `tx` is dropped; that is checked before every event and raced against
/// every pause, so emission stops within one pacing interval.
///
/// `request.chunk_size` must be at least one.
pub async fn emit<R: Rng>(request: &StreamRequest, rng: &mut R, tx: &Sender<StreamEvent>) -> Emitted {
    let tokens = tokenize(&request.text);
    let pacing = request.pacing();
    let events = group(&tokens, request.chunk_size)
        .map(StreamEvent::Data)
        .chain(std::iter::once(StreamEvent::Done));
    debug!(
        tokens = tokens.len(),
        chunk_size = request.chunk_size,
        avg_delay_ms = request.avg_delay_ms,
        delay_jitter_ms = request.delay_jitter_ms,
        "stream started"
    );

    let mut data_events = 0;
    for (idx, event) in events.enumerate() {
        if tx.is_closed() {
            debug!(data_events, "peer disconnected");
            return Emitted::Disconnected { data_events };
        }
        if idx > 0 {
            let delay = pacing.next_delay(rng);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = tx.closed() => {
                    debug!(data_events, "peer disconnected during pause");
                    return Emitted::Disconnected { data_events };
                }
            }
        }
        let is_data = matches!(event, StreamEvent::Data(_));
        trace!(?event, "emit");
        if tx.send(event).await.is_err() {
            debug!(data_events, "peer disconnected on send");
            return Emitted::Disconnected { data_events };
        }
        if is_data {
            data_events += 1;
        }
    }
    debug!(data_events, "stream completed");
    Emitted::Completed { data_events }
}
