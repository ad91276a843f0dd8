//! JSON-RPC 2.0 over Content-Length framed byte streams.
//!
//! This library lets a process converse with a peer, typically a subprocess
//! or a socket, over an already-connected bidirectional stream using the
//! same framing as the Language Server Protocol:
//!
//! - `stream` - framing plus the ordered [`OutputStream`] and the [`InputStream`]
//! - `message` - envelope builders and inbound classification
//! - `client` - request/response correlation, notifications, fault handling
//! - `server` - accepts many connections and serves them from one set of handlers
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐      Content-Length frames      ┌─────────────────┐
//! │     Client      │  ◄────────────────────────────► │      Peer       │
//! │ (correlation)   │       JSON-RPC 2.0 bodies       │ (subprocess...) │
//! └─────────────────┘                                 └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use jsonrpc_conduit::Client;
//! use serde_json::json;
//!
//! let client = Client::new(socket);
//! let result = client.call("system.ping", json!({})).await?;
//! client.close()?;
//! ```
//!
//! Setting `JSONRPC_DEBUG=1` echoes every payload under the
//! `jsonrpc_conduit::wire` tracing target.

pub mod client;
pub mod config;
pub mod error;
pub mod message;
pub mod server;
pub mod stream;

pub use client::Client;
pub use config::Config;
pub use error::{Error, Result};
pub use message::{Incoming, RpcError};
pub use server::Server;
pub use stream::{InputStream, OutputStream};
