use core::fmt;
use std::io;

/// The context that an error occurred in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum When {
  /// Starting the endpoint
  Starting,
  /// Serializing or sending a message
  Sending,
  /// Submitting work to the endpoint
  Submitting,
}

/// Errors surfaced by the endpoint's lifecycle & send surface.
///
/// Protocol anomalies (malformed input, unmatched or stale
/// correlation, interceptor cancellation) are absorbed by the
/// endpoint and never show up here.
#[derive(Debug)]
pub enum Error {
  /// The endpoint was started before an [`Executor`](crate::executor::Executor)
  /// was attached
  NoExecutor,
  /// The endpoint has been destroyed and can no longer be used
  Destroyed,
  /// The transport connector failed
  Connector(When, io::Error),
  /// A message could not be serialized
  Serialize(String),
  /// The clock failed to provide timing.
  ///
  /// See [`embedded_time::clock::Error`]
  Clock(embedded_time::clock::Error),
}

impl fmt::Display for Error {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      | Error::NoExecutor => write!(f, "no executor attached to endpoint"),
      | Error::Destroyed => write!(f, "endpoint was destroyed"),
      | Error::Connector(when, e) => write!(f, "connector failed while {:?}: {}", when, e),
      | Error::Serialize(e) => write!(f, "failed to serialize message: {}", e),
      | Error::Clock(e) => write!(f, "clock error: {:?}", e),
    }
  }
}

impl std::error::Error for Error {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      | Error::Connector(_, e) => Some(e),
      | _ => None,
    }
  }
}

impl From<embedded_time::clock::Error> for Error {
  fn from(e: embedded_time::clock::Error) -> Self {
    Error::Clock(e)
  }
}
