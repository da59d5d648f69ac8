//! Fixed-size connection pool with random dispatch and per-slot supervision.
//!
//! The pool creates one worker per slot at startup and registers its
//! command channel in a slot-indexed registry. Dispatch picks a worker
//! uniformly at random over the registry's current live entries; a worker
//! that is still connecting or waiting out a backoff answers immediately
//! with a disconnected error rather than queuing. A supervisor task per slot
//! restarts a panicked worker under the same slot index.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::PoolConfig;
use crate::error::Error;
use crate::request::{Body, Method, RequestBuilder};
use crate::response::Response;
use crate::worker::{Command, Worker};

/// Depth of each worker's command queue.
const COMMAND_QUEUE_DEPTH: usize = 64;

/// Slot-indexed lookup table of live worker channels.
///
/// Written once per slot on create/restart, read concurrently by dispatch.
struct Registry {
    slots: RwLock<BTreeMap<usize, mpsc::Sender<Command>>>,
}

impl Registry {
    fn new() -> Self {
        Self {
            slots: RwLock::new(BTreeMap::new()),
        }
    }

    fn register(&self, slot: usize, tx: mpsc::Sender<Command>) {
        self.slots
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(slot, tx);
    }

    /// Uniform-random choice over the currently registered workers.
    fn pick(&self) -> Option<mpsc::Sender<Command>> {
        let slots = self.slots.read().unwrap_or_else(|e| e.into_inner());
        if slots.is_empty() {
            return None;
        }
        let nth = rand::thread_rng().gen_range(0..slots.len());
        slots.values().nth(nth).cloned()
    }

    fn len(&self) -> usize {
        self.slots.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn clear(&self) {
        self.slots.write().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

/// A fixed-size pool of independently-reconnecting worker connections.
///
/// Size is fixed at construction; there is no runtime resize.
pub struct Pool {
    registry: Arc<Registry>,
    supervisors: Vec<JoinHandle<()>>,
}

impl Pool {
    /// Validate the configuration and start `pool_size` workers, each under
    /// a stable slot index. Must be called within a tokio runtime. Workers
    /// dial out independently; dispatching before a worker has connected
    /// fails fast with [`Error::Disconnected`].
    pub fn new(config: PoolConfig) -> Result<Self, Error> {
        config.validate()?;
        let config = Arc::new(config);
        let registry = Arc::new(Registry::new());
        let mut supervisors = Vec::with_capacity(config.pool_size);
        for slot in 1..=config.pool_size {
            let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
            registry.register(slot, tx);
            supervisors.push(tokio::spawn(supervise(
                slot,
                rx,
                Arc::clone(&config),
                Arc::clone(&registry),
            )));
        }
        Ok(Pool {
            registry,
            supervisors,
        })
    }

    /// Build a GET request.
    pub fn get(&self, path: &str) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::Get, path)
    }

    /// Build a POST request.
    pub fn post(&self, path: &str) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::Post, path)
    }

    /// Build a PUT request.
    pub fn put(&self, path: &str) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::Put, path)
    }

    /// Build a PATCH request.
    pub fn patch(&self, path: &str) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::Patch, path)
    }

    /// Build a DELETE request.
    pub fn delete(&self, path: &str) -> RequestBuilder<'_> {
        RequestBuilder::new(self, Method::Delete, path)
    }

    /// Forward a request to a randomly selected worker and wait for its
    /// reply. The wait is unbounded; callers wanting a timeout wrap the
    /// returned future themselves.
    pub async fn dispatch(
        &self,
        method: Method,
        path: &str,
        body: impl Into<Body>,
        content_type: Option<&str>,
    ) -> Result<Response, Error> {
        let tx = self.registry.pick().ok_or(Error::NoWorkers)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        let cmd = Command::Issue {
            method,
            path: path.to_string(),
            body: body.into(),
            content_type: content_type.map(str::to_string),
            reply: reply_tx,
        };
        tx.send(cmd).await.map_err(|_| Error::WorkerGone)?;
        reply_rx.await.map_err(|_| Error::WorkerGone)?
    }

    /// Number of workers currently registered.
    pub fn size(&self) -> usize {
        self.registry.len()
    }

    /// Stop supervising and deregister all workers. Workers wind down once
    /// their command channels close; in-flight callers observe failures.
    pub fn close(&mut self) {
        for handle in self.supervisors.drain(..) {
            handle.abort();
        }
        self.registry.clear();
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.close();
    }
}

/// Keep one slot staffed: run the worker, and if its task panics, recreate
/// it under the same slot with a fresh channel. In-flight callers of a
/// crashed worker observe abrupt failure, not a retried reply.
async fn supervise(
    slot: usize,
    rx: mpsc::Receiver<Command>,
    config: Arc<PoolConfig>,
    registry: Arc<Registry>,
) {
    let mut rx = Some(rx);
    loop {
        let receiver = match rx.take() {
            Some(receiver) => receiver,
            None => {
                let (tx, receiver) = mpsc::channel(COMMAND_QUEUE_DEPTH);
                registry.register(slot, tx);
                receiver
            }
        };
        let worker = Worker::new(slot, Arc::clone(&config), receiver);
        match tokio::spawn(worker.run()).await {
            Ok(()) => return,
            Err(e) if e.is_panic() => {
                tracing::error!(slot, "worker task panicked; restarting under the same slot");
            }
            Err(_) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender() -> mpsc::Sender<Command> {
        mpsc::channel(1).0
    }

    #[test]
    fn empty_registry_picks_nothing() {
        let registry = Registry::new();
        assert!(registry.pick().is_none());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn registration_replaces_the_same_slot() {
        let registry = Registry::new();
        registry.register(1, sender());
        registry.register(2, sender());
        registry.register(1, sender());
        assert_eq!(registry.len(), 2);
        assert!(registry.pick().is_some());
    }

    #[test]
    fn clear_empties_the_registry() {
        let registry = Registry::new();
        registry.register(1, sender());
        registry.clear();
        assert!(registry.pick().is_none());
    }
}
