//! Stream multiplexer carrying many logical TCP-like streams over one
//! carrier connection (usually the link-layer-encrypted TCP carrier from
//! `tunnel-crypto`).
//!
//! See [`Mux`] for the entry point: construct one with a role (whichever
//! side opens streams versus accepts them), then call [`Mux::open`] or
//! [`Mux::accept`] to get [`MuxStream`] handles that behave like any other
//! `AsyncRead + AsyncWrite`.

mod error;
mod flow_control;
mod frame;
mod mux;
mod stream;

pub use error::{MuxError, Result};
pub use flow_control::DEFAULT_WINDOW;
pub use frame::{Frame, MAX_DATA_LEN};
pub use mux::{Mux, Role};
pub use stream::{MuxStream, StreamState};
