//! JSON-RPC 2.0 client over a connected byte stream.
//!
//! A [`Client`] owns both directions of one connection. Outgoing calls get a
//! per-client id starting at 1 and an entry in the correlation table; a read
//! loop routes each inbound frame to the matching call, to the notification
//! observers, or to the call observers.
//!
//! # Lifecycle
//!
//! The read loop starts with the first [`call`](Client::call) (or an explicit
//! [`start_listening`](Client::start_listening)) and holds its own handle to
//! the client, keeping it alive until [`close`](Client::close) is called or
//! the transport fails. Consumers must close clients they no longer need.
//!
//! Any transport fault, or a reply the client cannot correlate, fails every
//! outstanding call with the same error and leaves the client permanently
//! unusable; later operations fail with `Error::NotConnected`.
//!
//! # Usage
//!
//! ```ignore
//! use jsonrpc_conduit::Client;
//! use serde_json::json;
//!
//! let client = Client::from_parts(child_stdout, child_stdin);
//! client.connect_notification(|_client, method, params| {
//!     tracing::info!("{}: {}", method, params);
//! });
//!
//! let result = client.call("initialize", json!({"processId": null})).await?;
//! client.send_notification("initialized", json!({})).await?;
//! client.close()?;
//! ```

mod handlers;
mod invocations;

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::error::{Error, Result, METHOD_NOT_FOUND};
use crate::message::{
    classify, make_error_reply, make_notification, make_reply, make_request, Incoming, RpcError,
};
use crate::stream::{InputStream, OutputStream, WriteCompletion};

pub(crate) use handlers::Handlers;
pub use handlers::{CallHandler, ClosedHandler, NotificationHandler};
use invocations::InvocationTable;

/// Message sent back when no observer claims an inbound call.
const METHOD_NOT_FOUND_MESSAGE: &str = "The method does not exist or is not available";

type BoxedReader = Box<dyn AsyncRead + Unpin + Send>;

/// Where the read side currently lives.
enum InputSlot {
    /// Attached but not yet read from.
    Idle(InputStream<BoxedReader>),
    /// Owned by the running read loop.
    Listening,
    /// Released after close or failure.
    Detached,
}

struct State {
    /// Last request id handed out.
    sequence: i64,
    invocations: InvocationTable,
    output: Option<OutputStream>,
    input: InputSlot,
    read_loop: Option<JoinHandle<()>>,
    in_shutdown: bool,
    failed: bool,
    closed_notified: bool,
}

struct Inner {
    state: Mutex<State>,
    handlers: Handlers,
    read_loop_cancel: CancellationToken,
    runtime: Handle,
}

/// Handle to one JSON-RPC connection.
///
/// Cloning is cheap and every clone refers to the same connection.
///
/// The blocking methods (`*_blocking`) drive the runtime the client was
/// created on from the calling thread. They must be called from outside any
/// async context, the runtime must be multi-threaded, and they must not be
/// mixed with the async methods on the same client.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("Client")
            .field("sequence", &state.sequence)
            .field("pending_calls", &state.invocations.len())
            .field("in_shutdown", &state.in_shutdown)
            .field("failed", &state.failed)
            .finish()
    }
}

impl Client {
    /// Attach to a bidirectional stream such as a socket.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime context.
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::from_parts(reader, writer)
    }

    /// Attach to separate read and write halves, e.g. a child's stdout and stdin.
    ///
    /// Configuration is taken from the environment (see [`Config::from_env`]).
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime context.
    pub fn from_parts<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::with_config(reader, writer, Config::from_env())
    }

    /// Attach to separate read and write halves with an explicit configuration.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime context.
    pub fn with_config<R, W>(reader: R, writer: W, config: Config) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let runtime = Handle::current();
        let output = OutputStream::with_runtime(runtime.clone(), writer, &config);
        let input = InputStream::new(Box::new(reader) as BoxedReader, config);

        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    sequence: 0,
                    invocations: InvocationTable::default(),
                    output: Some(output),
                    input: InputSlot::Idle(input),
                    read_loop: None,
                    in_shutdown: false,
                    failed: false,
                    closed_notified: false,
                }),
                handlers: Handlers::default(),
                read_loop_cancel: CancellationToken::new(),
                runtime,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns true if both handles refer to the same connection.
    pub fn ptr_eq(a: &Client, b: &Client) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Returns true once the client has hit an unrecoverable fault.
    pub fn is_failed(&self) -> bool {
        self.state().failed
    }

    /// Returns true once the client is shutting down, by request or by failure.
    pub fn is_closed(&self) -> bool {
        self.state().in_shutdown
    }

    /// Number of calls still waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.state().invocations.len()
    }

    /// Register an observer for inbound notifications.
    pub fn connect_notification<F>(&self, handler: F)
    where
        F: Fn(&Client, &str, &Value) + Send + Sync + 'static,
    {
        self.inner.handlers.add_notification(Arc::new(handler));
    }

    /// Register an observer for inbound calls.
    ///
    /// Observers are offered the call in registration order until one returns
    /// `true`. If none does, the client answers with a "method not found" error.
    pub fn connect_handle_call<F>(&self, handler: F)
    where
        F: Fn(&Client, &str, &Value, &Value) -> bool + Send + Sync + 'static,
    {
        self.inner.handlers.add_call(Arc::new(handler));
    }

    /// Register an observer run once when the client closes or fails.
    pub fn connect_closed<F>(&self, handler: F)
    where
        F: Fn(&Client) + Send + Sync + 'static,
    {
        self.inner.handlers.add_closed(Arc::new(handler));
    }

    /// Call `method` on the peer and wait for its result.
    ///
    /// The request id is assigned and the request queued when this method is
    /// called, not when the returned future is first polled, so ids follow
    /// call order. Pass `Value::Null` when there are no parameters.
    ///
    /// # Errors
    ///
    /// - `Error::NotConnected` if the client is closed or failed
    /// - `Error::Remote` if the peer answered with an error object
    /// - `Error::Closed` if the client was closed before the reply arrived
    /// - the transport error if the connection failed meanwhile
    pub fn call(
        &self,
        method: &str,
        params: Value,
    ) -> impl Future<Output = Result<Value>> + Send + 'static {
        let submitted = self.submit_call(method, params);
        let client = self.clone();

        async move {
            let (id, written, reply) = submitted?;

            if let Err(err) = written.await {
                return Err(client.abandon_call(id, err));
            }

            match reply.await {
                Ok(result) => result,
                // The invocation was dropped without an answer
                Err(_) => Err(Error::Closed),
            }
        }
    }

    /// Blocking variant of [`call`](Client::call).
    pub fn call_blocking(&self, method: &str, params: Value) -> Result<Value> {
        self.inner.runtime.block_on(self.call(method, params))
    }

    fn submit_call(
        &self,
        method: &str,
        params: Value,
    ) -> Result<(i64, WriteCompletion, tokio::sync::oneshot::Receiver<Result<Value>>)> {
        let mut state = self.state();
        check_ready(&state)?;

        state.sequence += 1;
        let id = state.sequence;
        let request = make_request(id, method, params);
        let reply = state.invocations.register(id);

        let queued = match state.output.as_ref() {
            Some(output) => output.enqueue(&request),
            None => Err(Error::NotConnected),
        };

        match queued {
            Ok(written) => {
                debug!("Calling {} (id={})", method, id);
                drop(state);
                self.start_listening();
                Ok((id, written, reply))
            }
            Err(err) => {
                state.invocations.remove(id);
                drop(state);
                self.panic(err.clone());
                Err(err)
            }
        }
    }

    /// The request for `id` could not be written. Returns the error the call
    /// resolves with.
    ///
    /// A write that fails after a deliberate close is part of the shutdown,
    /// not a transport fault: the call sees `Error::Closed` and the client
    /// does not latch as failed.
    fn abandon_call(&self, id: i64, error: Error) -> Error {
        let closing = {
            let mut state = self.state();
            if state.invocations.remove(id).is_some() {
                debug!("Dropping call {} after write failure", id);
            }
            state.in_shutdown && !state.failed
        };

        if closing {
            debug!("Write for call {} failed during close: {}", id, error);
            return Error::Closed;
        }

        self.panic(error.clone());
        error
    }

    /// Send a notification to the peer.
    ///
    /// Resolves once the message has been written to the transport, which
    /// says nothing about whether the peer has read it.
    pub fn send_notification(
        &self,
        method: &str,
        params: Value,
    ) -> impl Future<Output = Result<()>> + Send + 'static {
        let written = self.enqueue(&make_notification(method, params));
        async move { written?.await }
    }

    /// Blocking variant of [`send_notification`](Client::send_notification).
    pub fn send_notification_blocking(&self, method: &str, params: Value) -> Result<()> {
        self.inner
            .runtime
            .block_on(self.send_notification(method, params))
    }

    /// Answer a call received through [`connect_handle_call`](Client::connect_handle_call).
    ///
    /// `id` must be the id the peer sent, unchanged.
    pub fn reply(
        &self,
        id: Value,
        result: Value,
    ) -> impl Future<Output = Result<()>> + Send + 'static {
        let written = self.enqueue(&make_reply(id, result));
        async move { written?.await }
    }

    /// Blocking variant of [`reply`](Client::reply).
    pub fn reply_blocking(&self, id: Value, result: Value) -> Result<()> {
        self.inner.runtime.block_on(self.reply(id, result))
    }

    /// Answer a call received through [`connect_handle_call`](Client::connect_handle_call)
    /// with an error object.
    pub fn reply_error(
        &self,
        id: Value,
        code: i64,
        message: &str,
    ) -> impl Future<Output = Result<()>> + Send + 'static {
        let written = self.enqueue(&make_error_reply(id, &RpcError::new(code, message)));
        async move { written?.await }
    }

    /// Queue a message after checking the client can still deliver it.
    fn enqueue(&self, message: &Value) -> Result<WriteCompletion> {
        let state = self.state();
        check_ready(&state)?;
        match state.output.as_ref() {
            Some(output) => output.enqueue(message),
            None => Err(Error::NotConnected),
        }
    }

    /// Close the connection.
    ///
    /// Cancels the read loop, closes both streams and fails every outstanding
    /// call with `Error::Closed`.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotConnected` if the client was already closed or failed.
    pub fn close(&self) -> Result<()> {
        let invocations = {
            let mut state = self.state();
            check_ready(&state)?;

            state.in_shutdown = true;
            self.shutdown_streams(&mut state);
            state.invocations.take_all()
        };

        let failed = invocations.fail_all(&Error::Closed);
        debug!("Client closed ({} outstanding calls failed)", failed);

        self.notify_closed();
        Ok(())
    }

    /// Close the connection and wait for the read loop to finish.
    pub async fn close_async(&self) -> Result<()> {
        self.close()?;

        let read_loop = self.state().read_loop.take();
        if let Some(read_loop) = read_loop {
            if let Err(err) = read_loop.await {
                debug!("Read loop ended abnormally: {}", err);
            }
        }
        Ok(())
    }

    /// Stop reading and writing. Called with the state lock held.
    fn shutdown_streams(&self, state: &mut State) {
        self.inner.read_loop_cancel.cancel();

        if let Some(output) = state.output.take() {
            output.close();
        }

        // A running read loop releases its stream when it sees the cancellation
        if let InputSlot::Idle(_) = state.input {
            state.input = InputSlot::Detached;
        }
    }

    /// Unrecoverable fault: fail every outstanding call with `error`.
    ///
    /// The table is swapped for an empty one before any invocation is failed,
    /// so a completion that re-enters the client finds nothing half-drained.
    fn panic(&self, error: Error) {
        let invocations = {
            let mut state = self.state();
            if state.failed {
                debug!("Ignoring further fault on failed client: {}", error);
                return;
            }

            state.failed = true;
            state.in_shutdown = true;
            self.shutdown_streams(&mut state);
            state.input = InputSlot::Detached;
            state.invocations.take_all()
        };

        error!(
            "JSON-RPC connection failed, {} outstanding calls dropped: {}",
            invocations.len(),
            error
        );
        invocations.fail_all(&error);

        self.notify_closed();
    }

    fn notify_closed(&self) {
        let first = {
            let mut state = self.state();
            !std::mem::replace(&mut state.closed_notified, true)
        };
        if first {
            self.inner.handlers.emit_closed(self);
        }
    }

    /// Start the read loop if it is not already running.
    ///
    /// Calls start it automatically; use this to receive notifications or
    /// calls from the peer before making a call of our own.
    pub fn start_listening(&self) {
        let mut state = self.state();
        if state.failed || state.in_shutdown {
            return;
        }

        let input = match std::mem::replace(&mut state.input, InputSlot::Listening) {
            InputSlot::Idle(input) => input,
            other => {
                state.input = other;
                return;
            }
        };

        debug!("Starting read loop");
        let client = self.clone();
        let cancel = self.inner.read_loop_cancel.clone();
        let read_loop = self
            .inner
            .runtime
            .spawn(async move { client.read_loop(input, cancel).await });
        state.read_loop = Some(read_loop);
    }

    /// Read and route inbound messages until shutdown or failure.
    ///
    /// The task owns a handle to the client, keeping it alive while reading.
    async fn read_loop(self, mut input: InputStream<BoxedReader>, cancel: CancellationToken) {
        loop {
            let message = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Error::Cancelled),
                message = input.read_message() => message,
            };

            let message = match message {
                Ok(message) => message,
                Err(err) if err.is_cancelled() && self.is_closed() => {
                    debug!("Read loop cancelled");
                    break;
                }
                Err(err) => {
                    // Without a readable frame there is no way to tell which
                    // call failed, so every call fails
                    self.panic(err);
                    break;
                }
            };

            if !self.dispatch(message) || self.is_closed() {
                break;
            }
        }

        debug!("Read loop stopped");
    }

    /// Route one inbound message. Returns false if the client panicked.
    fn dispatch(&self, message: Value) -> bool {
        let incoming = match classify(message) {
            Ok(incoming) => incoming,
            Err(err) => {
                self.panic(err);
                return false;
            }
        };

        match incoming {
            Incoming::Notification { method, params } => {
                debug!("Notification: {}", method);
                self.inner
                    .handlers
                    .emit_notification(self, &method, &params);
            }

            Incoming::Reply { id, result } => {
                let invocation = self.state().invocations.remove(id);
                match invocation {
                    Some(invocation) => {
                        debug!("Reply for call {}", invocation.id());
                        invocation.complete(result);
                    }
                    None => {
                        self.panic(Error::InvalidData(format!(
                            "Reply to missing or invalid task {}",
                            id
                        )));
                        return false;
                    }
                }
            }

            Incoming::Call { method, id, params } => {
                debug!("Call from peer: {} (id={})", method, id);
                let handled = self
                    .inner
                    .handlers
                    .emit_call(self, &method, &id, &params);

                if !handled {
                    warn!("No handler for {}, replying method-not-found", method);
                    let reply =
                        make_error_reply(id, &RpcError::new(METHOD_NOT_FOUND, METHOD_NOT_FOUND_MESSAGE));
                    if let Err(err) = self.enqueue(&reply) {
                        debug!("Could not queue method-not-found reply: {}", err);
                    }
                }
            }

            Incoming::Error { id, error } => {
                let invocation = id.and_then(|id| self.state().invocations.remove(id));
                match invocation {
                    Some(invocation) => {
                        debug!("Error reply for call {}: {}", invocation.id(), error.message);
                        invocation.fail(error.into());
                    }
                    None => {
                        self.panic(error.into());
                        return false;
                    }
                }
            }

            Incoming::Unhandled(message) => {
                warn!("Unhandled RPC from peer: {}", message);
            }
        }

        true
    }
}

/// Local precondition for any new outbound message; never a round trip.
fn check_ready(state: &State) -> Result<()> {
    if state.failed
        || state.in_shutdown
        || state.output.is_none()
        || matches!(state.input, InputSlot::Detached)
    {
        return Err(Error::NotConnected);
    }
    Ok(())
}
