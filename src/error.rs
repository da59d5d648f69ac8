use std::io;

use bytes::Bytes;

use crate::h1::H1Error;

/// Errors produced by the pool and its workers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid pool configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The selected worker has no live connection (still connecting, or
    /// waiting out its reconnect backoff), or the connection dropped while
    /// the request was in flight.
    #[error("not connected")]
    Disconnected,

    /// The endpoint answered with a non-200 status. Carries whatever body
    /// bytes had accumulated when the status was seen.
    #[error("bad status: {code}")]
    BadStatus { code: u16, body: Bytes },

    /// Connect or I/O failure.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// The response could not be decoded or correlated.
    #[error("protocol error: {0}")]
    Handling(#[from] H1Error),

    /// No workers are registered in the pool.
    #[error("no workers registered")]
    NoWorkers,

    /// The worker task terminated while the request was in flight.
    #[error("worker terminated")]
    WorkerGone,
}
