//! Connection worker: one task owning one transport connection.
//!
//! The worker pipelines concurrent requests over its connection and
//! correlates response events back to the waiting callers through an
//! in-flight table keyed by request reference. On connection loss it fails
//! the pending callers, then reconnects with a fixed backoff, forever.
//! Requests that arrive while there is no live connection fail fast instead
//! of queuing.

use std::collections::HashMap;
use std::io;
use std::ops::ControlFlow;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};

use crate::config::PoolConfig;
use crate::conn::{self, Stream};
use crate::error::Error;
use crate::h1::{H1Connection, H1Event, ReqId};
use crate::request::{Body, Method};
use crate::response::Response;

pub(crate) type ReplyTx = oneshot::Sender<Result<Response, Error>>;

/// Inbound messages a worker accepts.
pub(crate) enum Command {
    Issue {
        method: Method,
        path: String,
        body: Body,
        content_type: Option<String>,
        reply: ReplyTx,
    },
}

/// A request submitted on the current connection, awaiting its response.
struct Pending {
    reply: ReplyTx,
    status: Option<u16>,
    body: BytesMut,
}

pub(crate) struct Worker {
    slot: usize,
    config: Arc<PoolConfig>,
    rx: mpsc::Receiver<Command>,
    in_flight: HashMap<ReqId, Pending>,
}

impl Worker {
    pub(crate) fn new(slot: usize, config: Arc<PoolConfig>, rx: mpsc::Receiver<Command>) -> Self {
        Self {
            slot,
            config,
            rx,
            in_flight: HashMap::new(),
        }
    }

    /// Run until the command channel closes. Connect failures back off and
    /// retry indefinitely; they are never fatal to the worker.
    pub(crate) async fn run(mut self) {
        loop {
            let attempt = conn::connect(Arc::clone(&self.config));
            tokio::pin!(attempt);
            let outcome = loop {
                tokio::select! {
                    res = &mut attempt => break res,
                    cmd = self.rx.recv() => match cmd {
                        Some(cmd) => reject(cmd),
                        None => return,
                    },
                }
            };
            match outcome {
                Ok(stream) => {
                    tracing::debug!(slot = self.slot, "connected");
                    if self.connected(stream).await.is_break() {
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!(slot = self.slot, error = %e, "connect failed");
                    if self.backoff().await.is_break() {
                        return;
                    }
                }
            }
        }
    }

    /// Wait out the reconnect backoff, failing any requests that land here.
    async fn backoff(&mut self) -> ControlFlow<()> {
        let wait = tokio::time::sleep(self.config.reconnect_backoff);
        tokio::pin!(wait);
        loop {
            tokio::select! {
                _ = &mut wait => return ControlFlow::Continue(()),
                cmd = self.rx.recv() => match cmd {
                    Some(cmd) => reject(cmd),
                    None => return ControlFlow::Break(()),
                },
            }
        }
    }

    /// Serve requests over an established connection until it drops.
    async fn connected(&mut self, stream: Stream) -> ControlFlow<()> {
        self.in_flight.clear();
        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut codec = H1Connection::new();
        let mut read_buf = BytesMut::with_capacity(16 * 1024);

        loop {
            tokio::select! {
                cmd = self.rx.recv() => match cmd {
                    Some(Command::Issue { method, path, body, content_type, reply }) => {
                        self.issue(&mut codec, &mut writer, method, &path, &body, content_type.as_deref(), reply)
                            .await;
                    }
                    None => return ControlFlow::Break(()),
                },
                res = reader.read_buf(&mut read_buf) => match res {
                    Ok(0) => {
                        tracing::debug!(slot = self.slot, "connection closed by peer");
                        codec.handle_eof();
                        self.drain_events(&mut codec);
                        self.disconnect();
                        return ControlFlow::Continue(());
                    }
                    Ok(_) => {
                        let decoded = codec.recv(&read_buf);
                        read_buf.clear();
                        self.drain_events(&mut codec);
                        if let Err(e) = decoded {
                            tracing::warn!(slot = self.slot, error = %e, "undecodable response data");
                            if let Some(victim) = codec.current()
                                && let Some(pending) = self.in_flight.remove(&victim)
                            {
                                let _ = pending.reply.send(Err(Error::Handling(e)));
                            }
                            self.disconnect();
                            return ControlFlow::Continue(());
                        }
                    }
                    Err(e) => {
                        tracing::debug!(slot = self.slot, error = %e, "read failed");
                        self.disconnect();
                        return ControlFlow::Continue(());
                    }
                },
            }
        }
    }

    /// Submit one request on the current connection. On submission failure
    /// the caller is answered immediately and the connection stays in use;
    /// otherwise the caller waits in the in-flight table.
    #[allow(clippy::too_many_arguments)]
    async fn issue<W>(
        &mut self,
        codec: &mut H1Connection,
        writer: &mut W,
        method: Method,
        path: &str,
        body: &Body,
        content_type: Option<&str>,
        reply: ReplyTx,
    ) where
        W: AsyncWrite + Unpin,
    {
        let mut extra: Vec<(&str, &str)> = Vec::new();
        if let Some(ct) = content_type {
            extra.push(("content-type", ct));
        }
        let body_bytes = if body.is_empty() {
            None
        } else {
            Some(body.as_bytes())
        };

        let id = match codec.request(method.as_str(), path, &self.config.host, &extra, body_bytes) {
            Ok(id) => id,
            Err(e) => {
                let _ = reply.send(Err(Error::Transport(io::Error::new(
                    io::ErrorKind::NotConnected,
                    e,
                ))));
                return;
            }
        };

        let frame = codec.take_pending_send();
        let written = match writer.write_all(&frame).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            codec.cancel(id);
            let _ = reply.send(Err(Error::Transport(e)));
            return;
        }

        self.in_flight.insert(
            id,
            Pending {
                reply,
                status: None,
                body: BytesMut::new(),
            },
        );
    }

    fn drain_events(&mut self, codec: &mut H1Connection) {
        while let Some(event) = codec.poll_event() {
            self.on_event(event);
        }
    }

    /// Fold one transport event into the in-flight table. Events for a
    /// retired or unknown reference are dropped. A resolve may find the
    /// caller gone (its own timeout fired); that send failure is a no-op.
    fn on_event(&mut self, event: H1Event) {
        match event {
            H1Event::Status { id, code } => {
                if code == 200 {
                    if let Some(pending) = self.in_flight.get_mut(&id) {
                        pending.status = Some(code);
                    }
                } else if let Some(pending) = self.in_flight.remove(&id) {
                    let _ = pending.reply.send(Err(Error::BadStatus {
                        code,
                        body: pending.body.freeze(),
                    }));
                }
            }
            H1Event::Headers { .. } => {}
            H1Event::Data { id, chunk } => {
                if let Some(pending) = self.in_flight.get_mut(&id) {
                    pending.body.extend_from_slice(&chunk);
                }
            }
            H1Event::Done { id } => {
                if let Some(pending) = self.in_flight.remove(&id) {
                    let status = pending.status.unwrap_or(0);
                    let _ = pending
                        .reply
                        .send(Ok(Response::new(status, pending.body.freeze())));
                }
            }
        }
    }

    /// The connection is gone: fail every pending caller. References never
    /// survive a reconnect.
    fn disconnect(&mut self) {
        for (_, pending) in self.in_flight.drain() {
            let _ = pending.reply.send(Err(Error::Disconnected));
        }
    }
}

/// Answer a request that landed on a worker with no live connection.
fn reject(cmd: Command) {
    let Command::Issue { reply, .. } = cmd;
    let _ = reply.send(Err(Error::Disconnected));
}
