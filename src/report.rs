/// Capability interface for everything the profiler reports.
///
/// Sinks are advisory: a sink that drops messages on the floor is valid, and
/// no sink failure is ever propagated back into the profiling session.
pub trait ReportSink: Send + Sync {
  fn debug(&self, message: &str);
  fn error(&self, message: &str);
  fn log(&self, message: &str);
  fn warn(&self, message: &str);
}

/// Console-equivalent sink: insights to stdout, diagnostics to stderr.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl ReportSink for ConsoleSink {
  fn debug(&self, message: &str) {
    eprintln!("tickprof debug: {message}");
  }

  fn error(&self, message: &str) {
    eprintln!("tickprof error: {message}");
  }

  fn log(&self, message: &str) {
    println!("{message}");
  }

  fn warn(&self, message: &str) {
    eprintln!("tickprof warning: {message}");
  }
}

/// Sink that discards every message.
#[derive(Debug, Default)]
pub struct NoopSink;

impl ReportSink for NoopSink {
  fn debug(&self, _message: &str) {}

  fn error(&self, _message: &str) {}

  fn log(&self, _message: &str) {}

  fn warn(&self, _message: &str) {}
}

/// Structured-log sink forwarding to the `tracing` macros at matching levels.
#[derive(Debug, Default)]
pub struct TracingSink;

impl ReportSink for TracingSink {
  fn debug(&self, message: &str) {
    tracing::debug!("{message}");
  }

  fn error(&self, message: &str) {
    tracing::error!("{message}");
  }

  fn log(&self, message: &str) {
    tracing::info!("{message}");
  }

  fn warn(&self, message: &str) {
    tracing::warn!("{message}");
  }
}
