use std::fmt::Write as _;
use std::time::{Duration, Instant};

/// Time a single call and hand back its result alongside the elapsed wall
/// time.
pub fn time_call<T, F: FnOnce() -> T>(f: F) -> (T, Duration) {
  let started = Instant::now();
  let value = f();
  (value, started.elapsed())
}

/// Multi-mark checkpoint aggregation over one workflow.
///
/// Each mark records elapsed time since construction; the summary renders
/// per-step deltas and the total as a human-readable block.
#[derive(Debug)]
pub struct Checkpoints {
  marks: Vec<(String, Duration)>,
  started: Instant,
}

impl Default for Checkpoints {
  fn default() -> Self {
    Self::new()
  }
}

impl Checkpoints {
  /// Record a named mark at the current elapsed time.
  pub fn mark(&mut self, name: impl Into<String>) {
    self.marks.push((name.into(), self.started.elapsed()));
  }

  #[must_use]
  pub fn marks(&self) -> &[(String, Duration)] {
    &self.marks
  }

  #[must_use]
  pub fn new() -> Self {
    Self {
      marks: Vec::new(),
      started: Instant::now(),
    }
  }

  /// Render every mark with its delta to the previous one.
  #[must_use]
  pub fn summary(&self) -> String {
    let mut rendered = String::from("checkpoints:\n");
    let mut previous = Duration::ZERO;

    for (name, elapsed) in &self.marks {
      let delta = elapsed.saturating_sub(previous);
      let _ = writeln!(
        rendered,
        "  {name}: {:.2}ms (+{:.2}ms)",
        elapsed.as_secs_f64() * 1000.0,
        delta.as_secs_f64() * 1000.0,
      );
      previous = *elapsed;
    }

    let _ = write!(
      rendered,
      "  total: {:.2}ms",
      self.total().as_secs_f64() * 1000.0
    );

    rendered
  }

  #[must_use]
  pub fn total(&self) -> Duration {
    self.started.elapsed()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn time_call_returns_the_value() {
    let (value, elapsed) = time_call(|| 41 + 1);
    assert_eq!(value, 42);
    assert!(elapsed < Duration::from_secs(1));
  }

  #[test]
  fn marks_accumulate_in_order() {
    let mut checkpoints = Checkpoints::new();
    checkpoints.mark("load");
    checkpoints.mark("transform");

    let marks = checkpoints.marks();
    assert_eq!(marks.len(), 2);
    assert_eq!(marks[0].0, "load");
    assert!(marks[1].1 >= marks[0].1);
  }

  #[test]
  fn summary_lists_every_mark_and_the_total() {
    let mut checkpoints = Checkpoints::new();
    checkpoints.mark("parse");
    checkpoints.mark("write");

    let summary = checkpoints.summary();
    assert!(summary.contains("parse:"));
    assert!(summary.contains("write:"));
    assert!(summary.contains("total:"));
  }
}
