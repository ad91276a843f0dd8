//! Accepts connected streams and serves them from one set of handlers.
//!
//! Each accepted stream becomes a [`Client`]. Calls and notifications the
//! peers send are re-emitted on the [`Server`] together with the client they
//! arrived on, so a handler can answer on the right connection:
//!
//! ```ignore
//! use jsonrpc_conduit::Server;
//! use serde_json::json;
//!
//! let server = Server::new();
//! server.connect_handle_call(|client, method, id, _params| {
//!     if method != "system.ping" {
//!         return false;
//!     }
//!     let reply = client.reply(id.clone(), json!({"pong": true}));
//!     tokio::spawn(reply);
//!     true
//! });
//!
//! let (stream, _addr) = listener.accept().await?;
//! server.accept(stream);
//! ```
//!
//! A client leaves the live set as soon as it closes or fails.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

use crate::client::{Client, Handlers};
use crate::config::Config;

struct ServerInner {
    clients: Mutex<Vec<Client>>,
    handlers: Handlers,
    config: Config,
}

impl ServerInner {
    fn clients(&self) -> MutexGuard<'_, Vec<Client>> {
        self.clients.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn remove(&self, client: &Client) {
        let remaining = {
            let mut clients = self.clients();
            clients.retain(|live| !Client::ptr_eq(live, client));
            clients.len()
        };
        info!("Client disconnected ({} live)", remaining);
    }
}

/// Fan-in point for many JSON-RPC connections.
///
/// Cloning is cheap and every clone refers to the same server.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    /// Create a server whose clients read their configuration from the environment.
    pub fn new() -> Self {
        Self::with_config(Config::from_env())
    }

    /// Create a server passing `config` to every accepted client.
    pub fn with_config(config: Config) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                clients: Mutex::new(Vec::new()),
                handlers: Handlers::default(),
                config,
            }),
        }
    }

    /// Register an observer for calls arriving on any connection.
    ///
    /// Observers are offered the call in registration order until one returns
    /// `true`; unclaimed calls are answered with "method not found".
    pub fn connect_handle_call<F>(&self, handler: F)
    where
        F: Fn(&Client, &str, &Value, &Value) -> bool + Send + Sync + 'static,
    {
        self.inner.handlers.add_call(Arc::new(handler));
    }

    /// Register an observer for notifications arriving on any connection.
    pub fn connect_notification<F>(&self, handler: F)
    where
        F: Fn(&Client, &str, &Value) + Send + Sync + 'static,
    {
        self.inner.handlers.add_notification(Arc::new(handler));
    }

    /// Serve a connected bidirectional stream.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime context.
    pub fn accept<S>(&self, stream: S) -> Client
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        self.accept_parts(reader, writer)
    }

    /// Serve a connection given as separate read and write halves.
    ///
    /// The returned client is already listening.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime context.
    pub fn accept_parts<R, W>(&self, reader: R, writer: W) -> Client
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let client = Client::with_config(reader, writer, self.inner.config.clone());

        // Clients must not keep the server alive
        let server = Arc::downgrade(&self.inner);
        client.connect_handle_call(forward_call(server.clone()));
        client.connect_notification(forward_notification(server.clone()));
        client.connect_closed(move |client| {
            if let Some(server) = server.upgrade() {
                server.remove(client);
            }
        });

        let live = {
            let mut clients = self.inner.clients();
            clients.push(client.clone());
            clients.len()
        };
        info!("Accepted client ({} live)", live);

        client.start_listening();
        client
    }

    /// Snapshot of the live clients.
    pub fn clients(&self) -> Vec<Client> {
        self.inner.clients().clone()
    }

    /// Number of live clients.
    pub fn len(&self) -> usize {
        self.inner.clients().len()
    }

    /// Returns true when no client is live.
    pub fn is_empty(&self) -> bool {
        self.inner.clients().is_empty()
    }

    /// Close every live client.
    pub fn close(&self) {
        // Closing re-enters `remove`, so work from a snapshot
        for client in self.clients() {
            if let Err(err) = client.close() {
                debug!("Client already closed: {}", err);
            }
        }
    }
}

fn forward_call(
    server: Weak<ServerInner>,
) -> impl Fn(&Client, &str, &Value, &Value) -> bool + Send + Sync + 'static {
    move |client, method, id, params| match server.upgrade() {
        Some(server) => server.handlers.emit_call(client, method, id, params),
        None => false,
    }
}

fn forward_notification(
    server: Weak<ServerInner>,
) -> impl Fn(&Client, &str, &Value) + Send + Sync + 'static {
    move |client, method, params| {
        if let Some(server) = server.upgrade() {
            server.handlers.emit_notification(client, method, params);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_accept_registers_and_close_prunes() {
        let server = Server::with_config(Config::default());
        assert!(server.is_empty());

        let (a, _peer_a) = tokio::io::duplex(1024);
        let (b, _peer_b) = tokio::io::duplex(1024);
        let first = server.accept(a);
        let second = server.accept(b);
        assert_eq!(server.len(), 2);

        first.close().unwrap();
        assert_eq!(server.len(), 1);
        assert!(Client::ptr_eq(&server.clients()[0], &second));

        server.close();
        assert!(server.is_empty());
        assert!(second.is_closed());
    }

    #[tokio::test]
    async fn test_dropped_server_does_not_break_clients() {
        let server = Server::with_config(Config::default());
        let (stream, _peer) = tokio::io::duplex(1024);
        let client = server.accept(stream);

        drop(server);
        client.close().unwrap();
        assert!(client.is_closed());
    }
}
