//! Framed JSON message streams.
//!
//! Both directions of a connection use HTTP-style Content-Length framing
//! (same as LSP):
//!
//! ```text
//! Content-Length: 54\r\n
//! \r\n
//! {"jsonrpc":"2.0","id":1,"method":"ping","params":null}
//! ```
//!
//! [`OutputStream`] queues outgoing documents so only one write is ever in
//! flight; [`InputStream`] reads them back one frame at a time.

mod framing;
mod input;
mod output;

pub use framing::{encode_frame, read_frame, CONTENT_LENGTH};
pub use input::InputStream;
pub use output::{OutputStream, WriteCompletion};

/// Tracing target used for the optional payload echo.
pub(crate) const WIRE_TARGET: &str = "jsonrpc_conduit::wire";
