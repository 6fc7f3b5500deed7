//! Simulated token streaming over `text/event-stream`.
//!
//! The producer ([`producer`], served by [`server`]) splits a text into
//! tokens and emits them with randomized pacing. The consumer ([`consumer`],
//! driven over HTTP by [`client`]) reassembles the byte stream into events
//! and folds them into a [`ConsumerState`].

pub mod client;
pub mod consumer;
pub mod error;
pub mod line_buffer;
pub mod pacing;
pub mod producer;
pub mod protocol;
pub mod server;
pub mod token;

pub use client::{ClientConfig, Exchange, Session, StreamClient};
pub use consumer::{ConsumerState, LogEntry, Outcome, Phase, decode_events, read_exchange};
pub use error::{ExchangeError, StartError};
pub use line_buffer::LineBuffer;
pub use pacing::Pacing;
pub use producer::{Emitted, emit};
pub use protocol::{RequestBody, StreamDefaults, StreamEvent, StreamRequest};
pub use server::{ServerConfig, router, serve, serve_on};
