//! Portable error codes.
//!
//! Every fallible entry point returns [`Result`], and every asynchronous
//! completion delivers one. Errors fall in four groups:
//!
//! - precondition violations ([`Error::AlreadyOpen`], [`Error::AlreadyConnected`],
//!   [`Error::BadDescriptor`], [`Error::NotConnected`]), rejected without any
//!   state change;
//! - [`Error::OperationNotSupported`], a permanent answer for primitives the
//!   native transport has no equivalent for;
//! - [`Error::Native`], failures reported by the transport and passed through
//!   untouched;
//! - [`Error::OperationAborted`], the cancellation outcome. It is not a failure
//!   of the operation itself, see [`Error::is_cancelled`].
//!
//! [`Error`] converts into [`std::io::Error`] with the matching raw OS error,
//! so callers that live on `io::Result` can use `?` directly.

use std::{fmt, io};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Result type for operations that hand a buffer back to the caller.
///
/// The buffer is returned whatever the outcome, including cancellation.
pub type BufResult<T, B> = (Result<T>, B);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
  #[error("socket is already open")]
  AlreadyOpen,
  #[error("socket is already connected")]
  AlreadyConnected,
  #[error("bad socket descriptor")]
  BadDescriptor,
  #[error("socket is not connected")]
  NotConnected,
  #[error("operation not supported")]
  OperationNotSupported,
  #[error("operation aborted")]
  OperationAborted,
  #[error("end of file")]
  Eof,
  #[error("socket service has been shut down")]
  ServiceShutdown,
  #[error("{0}")]
  Native(NativeError),
}

impl Error {
  /// Returns true for the cancellation outcome.
  pub fn is_cancelled(&self) -> bool {
    matches!(self, Error::OperationAborted)
  }
}

impl From<NativeError> for Error {
  /// `ECANCELED` from the transport means the connection or operation was
  /// cancelled, which callers see as [`Error::OperationAborted`].
  fn from(err: NativeError) -> Self {
    if err.domain == ErrorDomain::Posix && err.code == libc::ECANCELED {
      Error::OperationAborted
    } else {
      Error::Native(err)
    }
  }
}

impl From<Error> for io::Error {
  fn from(err: Error) -> io::Error {
    let code = match err {
      Error::AlreadyOpen => libc::EALREADY,
      Error::AlreadyConnected => libc::EISCONN,
      Error::BadDescriptor => libc::EBADF,
      Error::NotConnected => libc::ENOTCONN,
      Error::OperationNotSupported => libc::EOPNOTSUPP,
      Error::OperationAborted => libc::ECANCELED,
      Error::ServiceShutdown => libc::ESHUTDOWN,
      Error::Eof => return io::Error::from(io::ErrorKind::UnexpectedEof),
      Error::Native(native) => return native.into(),
    };
    io::Error::from_raw_os_error(code)
  }
}

/// Which error space a [`NativeError`] code belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorDomain {
  /// `errno` values.
  Posix,
  /// Resolver (`EAI_*`) values.
  Dns,
  /// TLS/security framework status codes.
  Tls,
}

/// An error reported by the native transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeError {
  pub domain: ErrorDomain,
  pub code: i32,
}

impl NativeError {
  pub const fn posix(code: i32) -> Self {
    Self { domain: ErrorDomain::Posix, code }
  }

  pub const fn dns(code: i32) -> Self {
    Self { domain: ErrorDomain::Dns, code }
  }

  pub const fn tls(code: i32) -> Self {
    Self { domain: ErrorDomain::Tls, code }
  }
}

impl fmt::Display for NativeError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.domain {
      ErrorDomain::Posix => {
        write!(f, "{}", io::Error::from_raw_os_error(self.code))
      }
      ErrorDomain::Dns => write!(f, "resolver error {}", self.code),
      ErrorDomain::Tls => write!(f, "tls error {}", self.code),
    }
  }
}

impl std::error::Error for NativeError {}

impl From<NativeError> for io::Error {
  fn from(err: NativeError) -> io::Error {
    match err.domain {
      ErrorDomain::Posix => io::Error::from_raw_os_error(err.code),
      _ => io::Error::other(err),
    }
  }
}
