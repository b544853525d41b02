//! # InfiniteTCP
//!
//! Bidirectional, newline-delimited object messaging over TCP.
//!
//! A [`Server`] accepts any number of clients; a [`Client`] holds one
//! connection. Both sides exchange values of a single type `T`, one record
//! per line, encoded by a pluggable [`Codec`]. Inbound records are fanned out
//! to registered listeners in registration order.
//!
//! ## Features
//!
//! - **Per-connection receive loop**: records are delivered in arrival order
//! - **Ordered sends**: records from one connection are written whole and in order
//! - **Fault isolation**: a malformed line is skipped, a broken socket ends only its own connection
//! - **Exactly-once disconnect**: every connection reports its end to listeners once
//! - **Pluggable codecs**: [`JsonCodec`] and [`TextCodec`] out of the box
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use infinitetcp::{Client, Connection, Server, ServerListener, TextCodec};
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl ServerListener<String> for Echo {
//!     async fn on_receive(&self, connection: &Arc<Connection<String>>, line: &String) {
//!         let _ = connection.send(line).await;
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> infinitetcp::TcpResult<()> {
//!     let server = Server::bound_to(TextCodec::new(), 7000)?;
//!     server.add_listener(Arc::new(Echo));
//!     tokio::spawn({
//!         let server = server.clone();
//!         async move { server.start().await }
//!     });
//!
//!     let client = Client::bound_to(TextCodec::new(), "localhost", 7000).await?;
//!     client.start().await?;
//!     client.send(&"hello".to_string()).await?;
//!
//!     client.stop().await;
//!     server.stop()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Logging
//!
//! The crate logs through [`tracing`] and never installs a subscriber.
//! Connection events carry `conn` and `peer` fields.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::must_use_candidate
)]

mod address;
mod client;
mod config;
mod connection;
mod error;
mod framing;
mod listener;
mod metrics;
mod registry;
mod server;
mod state;

pub use address::validate_port;
pub use client::Client;
pub use config::{ConnectionConfig, ConnectionConfigBuilder, DEFAULT_MAX_LINE_LENGTH};
pub use connection::{Connection, UNASSIGNED_ID};
pub use error::{TcpError, TcpResult};
pub use listener::{Listener, ListenerSet, ServerListener};
pub use metrics::ConnectionStats;
pub use server::Server;
pub use state::LifecycleState;

// Re-export the codec layer for convenience
pub use infinitetcp_wire::{Codec, CodecError, JsonCodec, TextCodec};
