//! # fmd Server
//!
//! Device-facing core of the fmd device location service.
//!
//! This crate provides:
//! - Device registration with per-registration shared secrets
//! - The signed poll cycle (reports in, next pending command out)
//! - Live duplex connections with one current connection per device
//! - Operator command queueing with sanitizing and push wake-ups
//!
//! # Architecture
//!
//! The server is transport-agnostic. Persistence, push delivery, operator
//! sessions and identity verification are collaborators behind traits
//! ([`Store`], [`Notifier`], [`SessionStore`], [`IdentityVerifier`]); an
//! HTTP/WebSocket front end calls [`FmdServer`] and writes its [`Reply`]s.
//!
//! # Authentication
//!
//! Device requests and server replies are signed with the device secret
//! (see `fmd_protocol::hawk`). Unknown devices and bad signatures are
//! indistinguishable from outside.
//!
//! ```rust,ignore
//! let reply = server.poll(&PollRequest { target, authorization, body });
//! response.header("Authorization", reply.authorization.unwrap_or_default());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod dispatch;
mod error;
mod handler;
mod notify;
mod queue;
mod registry;
mod server;
mod session;
mod stats;
mod store;

pub use config::ServerConfig;
pub use dispatch::{DispatchLoop, FrameSource, LiveExit, LiveSession, PollRequest, PollResponse};
pub use error::{ServerError, ServerResult};
pub use handler::{
    Collaborators, HandlerContext, OperatorCredentials, QueueRequest, RegisterRequest,
    RegisterResponse, RequestHandler,
};
pub use notify::{MemoryNotifier, NotifyError, NotifyResult, Notifier};
pub use queue::CommandQueueService;
pub use registry::{DeviceRegistry, LiveConnection};
pub use server::{FmdServer, Reply};
pub use session::{
    Identity, IdentityVerifier, InsecureAssertionVerifier, MemorySessionStore, OperatorSession,
    SessionStore,
};
pub use stats::{ServerStats, StatsSnapshot};
pub use store::{
    DeviceRecord, DeviceSecret, DeviceView, MemoryStore, Store, StoreError, StoreResult,
    SECRET_LEN,
};
