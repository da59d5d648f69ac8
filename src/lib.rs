//! opaline — pooled, pipelining HTTP/1.1 client for remote decision services.
//!
//! A [`Pool`] holds a small fixed set of long-lived connections, each owned
//! by an independent worker task that pipelines several in-flight requests
//! and reconnects with a fixed backoff when its connection drops. Dispatch
//! picks a worker uniformly at random and blocks the caller until that
//! worker resolves the reply.
//!
//! # Architecture
//!
//! The [`h1`] module is a sans-IO HTTP/1.1 connection state machine: feed
//! bytes in, drain reference-tagged events out. Each worker bridges that
//! state machine to a socket and correlates events back to waiting callers
//! through an in-flight table. The pool keeps a slot-indexed registry of
//! worker channels and a supervisor per slot that restarts a crashed worker
//! under the same slot.
//!
//! # Example
//!
//! ```rust,ignore
//! use opaline::{Pool, PoolConfig};
//!
//! async fn example() -> Result<(), opaline::Error> {
//!     let pool = Pool::new(PoolConfig {
//!         host: "opa.internal".to_string(),
//!         port: 8181,
//!         pool_size: 4,
//!         ..PoolConfig::default()
//!     })?;
//!
//!     let resp = pool
//!         .post("/v1/data/authz/allow")
//!         .content_type("application/json")
//!         .body("{\"input\":{\"user\":\"alice\"}}")
//!         .send()
//!         .await?;
//!
//!     assert_eq!(resp.status(), 200);
//!     Ok(())
//! }
//! ```
//!
//! The pool imposes no request timeout of its own; a caller that needs one
//! wraps the dispatch future. Non-200 statuses are surfaced as
//! [`Error::BadStatus`] so the caller decides what they mean.

pub mod config;
pub(crate) mod conn;
pub mod error;
pub mod h1;
pub mod pool;
pub mod request;
pub mod response;
pub(crate) mod worker;

pub use config::{PoolConfig, Scheme};
pub use error::Error;
pub use h1::{H1Connection, H1Error, H1Event, ReqId};
pub use pool::Pool;
pub use request::{Body, Method, RequestBuilder};
pub use response::Response;
