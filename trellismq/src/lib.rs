#![deny(unsafe_code)]

//! TrellisMQ broker core.
//!
//! Everything a listener needs to turn an accepted TCP connection into a
//! live messaging session lives here: the per-connection protocol stage
//! machine, the subscription router (radix trie plus resolved-line cache),
//! the session registry with fan-out and queue distribution, QoS 1
//! message storage with packet id bookkeeping, and the pluggable
//! authentication layer. The wire format itself is in `trellismq-codec`,
//! the TCP plumbing in `trellismq-net`, and file configuration in
//! `trellismq-conf`.
//!
//! The usual entry point is [`context::ServerContext`] plus
//! [`server::TmqServer`]:
//!
//! ```ignore
//! let scx = ServerContext::new(settings, logger);
//! TmqServer::new(scx)
//!     .listener(Builder::new().laddr(([0, 0, 0, 0], 3883).into()))
//!     .build()
//!     .run()
//!     .await;
//! ```

// Access control
pub mod acl;
// Routing: trie, cache, router facade
pub mod cache;
pub mod router;
pub mod topic;
pub mod trie;
// Session plumbing
pub mod fitter;
pub mod session;
pub mod shared;
pub mod stage;
// Message persistence
pub mod storage;
// Broker context and pluggable internals
pub mod context;
pub mod extend;
// Front end
pub mod logger;
pub mod server;

pub mod types;

pub use trellismq_codec as codec;
pub use trellismq_conf as conf;
pub use trellismq_net as net;
pub use trellismq_utils as utils;

pub type Error = anyhow::Error;
pub type Result<T, E = Error> = anyhow::Result<T, E>;
