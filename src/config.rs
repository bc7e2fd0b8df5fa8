use std::time::Duration;

/// Controls how the continuous profiler samples and reports.
///
/// `max_memory_budget_mb` is deliberately the only constructor argument: it
/// has no safe default and must be chosen by the operator. Everything else
/// carries the documented defaults.
#[derive(Debug, Clone)]
pub struct ProfilerConfig {
  /// Whether CPU self-time sampling is enabled.
  pub cpu_profiling: bool,
  /// How long each sampling interval runs before it is flushed into insights.
  pub interval: Duration,
  /// Hard ceiling, in megabytes, on estimated retained profiling data.
  pub max_memory_budget_mb: u32,
  /// Whether sampling heap allocation profiling is enabled.
  pub sampling_heap_profiler: bool,
  /// Reserved: passed through to insight consumers, changes no behavior here.
  pub streaming_mode: bool,
  /// Silences delivery of budget warnings; the validation still runs.
  pub suppress_warnings: bool,
}

impl ProfilerConfig {
  pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60 * 60);

  /// Length of the flush interval in minutes.
  #[must_use]
  pub fn interval_minutes(&self) -> f64 {
    self.interval.as_secs_f64() / 60.0
  }

  #[must_use]
  pub fn new(max_memory_budget_mb: u32) -> Self {
    Self {
      cpu_profiling: true,
      interval: Self::DEFAULT_INTERVAL,
      max_memory_budget_mb,
      sampling_heap_profiler: true,
      streaming_mode: true,
      suppress_warnings: false,
    }
  }

  /// Builder-style helper to adjust the flush interval.
  #[must_use]
  pub fn with_interval(mut self, interval: Duration) -> Self {
    self.interval = interval;
    self
  }

  /// Builder-style helper to toggle the sampled profile sources.
  #[must_use]
  pub fn with_sources(mut self, cpu: bool, heap: bool) -> Self {
    self.cpu_profiling = cpu;
    self.sampling_heap_profiler = heap;
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_documented_values() {
    let config = ProfilerConfig::new(100);

    assert!(config.cpu_profiling);
    assert!(config.sampling_heap_profiler);
    assert!(config.streaming_mode);
    assert!(!config.suppress_warnings);
    assert_eq!(config.interval, Duration::from_secs(3600));
    assert_eq!(config.max_memory_budget_mb, 100);
  }

  #[test]
  fn interval_minutes_reflects_duration() {
    let config =
      ProfilerConfig::new(100).with_interval(Duration::from_secs(90));

    assert!((config.interval_minutes() - 1.5).abs() < f64::EPSILON);
  }
}
