use std::fmt::{self, Display, Formatter};

/// Errors surfaced by the profiling controller and its sampling backends.
#[derive(Debug)]
pub enum ProfilerError {
  /// The host environment lacks the requested sampling facility. Fatal to the
  /// current start attempt; the remediation names what the operator must
  /// change before retrying the process.
  AdapterUnavailable {
    detail: String,
    remediation: &'static str,
  },
  /// A session is already active; starting is an error, never a reset.
  AlreadyRunning,
  /// A native sampler command failed after the session was established.
  Backend(String),
  /// A mandatory configuration field was not provided at construction.
  MissingRequiredConfig(&'static str),
  /// The operation requires an active session.
  NotRunning,
}

impl Display for ProfilerError {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    match self {
      Self::AdapterUnavailable {
        detail,
        remediation,
      } => {
        write!(f, "sampling facility unavailable: {detail} ({remediation})")
      }
      Self::AlreadyRunning => {
        write!(f, "a continuous profiling session is already running")
      }
      Self::Backend(detail) => {
        write!(f, "native sampler command failed: {detail}")
      }
      Self::MissingRequiredConfig(field) => {
        write!(f, "missing required configuration field `{field}`")
      }
      Self::NotRunning => {
        write!(f, "no continuous profiling session is running")
      }
    }
  }
}

impl std::error::Error for ProfilerError {}
