//! # GCL Server
//!
//! Log server with quorum replication.
//!
//! This crate provides:
//! - TCP service speaking the GCL wire protocol, and a client for it
//! - Lazily opened, identity-keyed log registry
//! - Replication of creates and publishes to a per-log replica set
//! - Admin-parameter configuration
//! - Owner lookup for routing layers
//!
//! # Architecture
//!
//! A publish is appended to the local log first, then forwarded to every
//! other member of the log's replica set. The writer's acknowledgment is
//! held until `quorum` replicas have confirmed. Replicas introduce
//! themselves with HELLO; what they forward is applied locally and never
//! forwarded again.
//!
//! ```rust,ignore
//! use gcl_server::{GclServer, MapParams, ServerConfig};
//!
//! let params = MapParams::load("gcl.toml")?;
//! let server = GclServer::new(ServerConfig::from_params(&params)?)?;
//! server.run().await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code must not panic; errors become NAK replies.
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod client;
mod config;
mod error;
mod handler;
mod registry;
mod replica;
mod replication;
mod routing;
mod server;
mod transport;

pub use client::{GclClient, RecordStream, DEFAULT_CLIENT_TIMEOUT};
pub use config::{parse_replicas, MapParams, ParamSource, ReplicationConfig, ServerConfig};
pub use error::{ServerError, ServerResult};
pub use handler::{error_reply, stream_packet, HandlerContext, HandlerReply, RequestHandler, Session};
pub use registry::{LogHandle, LogRegistry};
pub use replica::{ReplicaEndpoint, ReplicaSet};
pub use replication::{PendingReply, ReplicationCoordinator, ReplicationState, ReplicationStats};
pub use routing::{OwnerLookup, StaticOwners};
pub use server::GclServer;
pub use transport::{
    EventSender, MockTransport, ReplicaEvent, ReplicaOutcome, ReplicaTransport, RequestKey,
    TcpReplicaTransport,
};
