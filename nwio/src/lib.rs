#![cfg_attr(docsrs, feature(doc_cfg))]

//! # nwio - sockets over a callback-driven native transport
//!
//! nwio adapts a networking substrate that works with reference-counted
//! opaque objects and completion callbacks (connection parameters,
//! connections, endpoints, data blobs) onto a socket service with both
//! blocking calls and posted-continuation async calls.
//!
//! ## Pieces
//!
//! - [`native::Transport`]: what a substrate has to provide. The
//!   [`native::loopback::Loopback`] transport runs in-process and is what the
//!   tests and examples use.
//! - [`handle::NwPtr`]: owning handle for one reference of a native object.
//! - [`service::SocketService`]: the socket lifecycle, connect, send,
//!   receive and shutdown, plus a shutdown that waits for every operation in
//!   flight.
//! - [`executor::Executor`]: where completion handlers are posted. Handlers
//!   never run on the caller's stack or on a transport thread.
//! - [`ip`], [`endpoint`], [`option`]: typed protocols, endpoints and socket
//!   options.
//!
//! ## Completions
//!
//! Every async operation finishes exactly once, through one of: its native
//! completion, [`cancel`](service::SocketService::cancel),
//! [`close`](service::SocketService::close), or the service shutting down.
//! Operations that hand buffers to the transport get them back in a
//! [`BufResult`].
//!
//! ## Error Handling
//!
//! Everything fallible returns [`Result`] with the crate's [`Error`]. Native
//! failures keep their domain and code in [`error::NativeError`] and convert
//! to [`std::io::Error`] when needed.

pub mod buffer;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod executor;
pub mod handle;
pub mod ip;
pub mod native;
mod op;
pub mod option;
pub mod scope;
pub mod service;
pub mod store;
mod sync;

pub use error::{BufResult, Error, NativeError, Result};
pub use op::{Continuation, Handler};
pub use service::{NativeHandle, RawNativeHandle, SocketImpl, SocketService};
