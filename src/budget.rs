use std::fmt::{self, Display, Formatter};

/// Estimated raw-data accumulation for CPU sampling, per minute of interval.
pub const CPU_PROFILE_MB_PER_MINUTE: f64 = 1.0;
/// Estimated raw-data accumulation for heap sampling, per minute of interval.
pub const HEAP_PROFILE_MB_PER_MINUTE: f64 = 0.5;

const HIGH_RISK_FRACTION: f64 = 0.8;
const LONG_INTERVAL_MINUTES: f64 = 240.0;
const LOW_BUDGET_MB: u32 = 50;

/// Projected memory consumption of retained profiling data. Derived from the
/// configuration, never measured, and never stored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetEstimate {
  pub mb_per_minute: f64,
  pub projected_usage_mb: f64,
}

/// Advisory findings produced by pre-flight budget validation. Warnings never
/// block construction or operation.
#[derive(Debug, Clone, PartialEq)]
pub enum BudgetWarning {
  /// Projected per-interval data exceeds 80% of the configured ceiling. The
  /// two suggestions are derived from the same per-feature constants.
  HighMemoryRisk {
    budget_mb: u32,
    projected_mb: f64,
    suggested_budget_mb: u32,
    suggested_interval_minutes: u32,
  },
  LowMemoryBudget {
    budget_mb: u32,
  },
  VeryLongInterval {
    interval_minutes: f64,
  },
}

impl Display for BudgetWarning {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    match self {
      Self::HighMemoryRisk {
        budget_mb,
        projected_mb,
        suggested_budget_mb,
        suggested_interval_minutes,
      } => write!(
        f,
        "high memory risk: projected profiling data (~{projected_mb:.0} MB \
         per interval) exceeds 80% of the {budget_mb} MB budget; shorten the \
         interval to at most {suggested_interval_minutes} minutes or raise \
         the budget to at least {suggested_budget_mb} MB"
      ),
      Self::LowMemoryBudget { budget_mb } => write!(
        f,
        "low memory budget: {budget_mb} MB leaves little headroom for \
         profiling data"
      ),
      Self::VeryLongInterval { interval_minutes } => write!(
        f,
        "very long interval: {interval_minutes:.0} minutes between flushes \
         lets raw profiling data accumulate for a long time"
      ),
    }
  }
}

/// Per-minute accumulation rate for the enabled profile sources. A fixed
/// per-feature heuristic, summed over enabled features.
#[must_use]
pub fn estimate_mb_per_minute(
  cpu_profiling: bool,
  sampling_heap_profiler: bool,
) -> f64 {
  let mut rate = 0.0;

  if cpu_profiling {
    rate += CPU_PROFILE_MB_PER_MINUTE;
  }

  if sampling_heap_profiler {
    rate += HEAP_PROFILE_MB_PER_MINUTE;
  }

  rate
}

/// Project one interval's worth of raw-data accumulation.
#[must_use]
pub fn project(
  cpu_profiling: bool,
  sampling_heap_profiler: bool,
  interval_minutes: f64,
) -> BudgetEstimate {
  let mb_per_minute =
    estimate_mb_per_minute(cpu_profiling, sampling_heap_profiler);

  BudgetEstimate {
    mb_per_minute,
    projected_usage_mb: mb_per_minute * interval_minutes,
  }
}

/// Pre-flight validation of the configured budget against the configured
/// interval. Every matching rule fires; the result may hold several warnings.
#[must_use]
pub fn validate(
  max_memory_budget_mb: u32,
  interval_minutes: f64,
  cpu_profiling: bool,
  sampling_heap_profiler: bool,
) -> Vec<BudgetWarning> {
  let mut warnings = Vec::new();

  let estimate =
    project(cpu_profiling, sampling_heap_profiler, interval_minutes);
  let threshold_mb = f64::from(max_memory_budget_mb) * HIGH_RISK_FRACTION;

  if estimate.mb_per_minute > 0.0
    && estimate.projected_usage_mb > threshold_mb
  {
    let suggested_interval_minutes =
      ((threshold_mb / estimate.mb_per_minute).floor() as u32).max(1);
    let suggested_budget_mb =
      (estimate.projected_usage_mb / HIGH_RISK_FRACTION).ceil() as u32;

    warnings.push(BudgetWarning::HighMemoryRisk {
      budget_mb: max_memory_budget_mb,
      projected_mb: estimate.projected_usage_mb,
      suggested_budget_mb,
      suggested_interval_minutes,
    });
  }

  if interval_minutes > LONG_INTERVAL_MINUTES {
    warnings.push(BudgetWarning::VeryLongInterval { interval_minutes });
  }

  if max_memory_budget_mb < LOW_BUDGET_MB {
    warnings.push(BudgetWarning::LowMemoryBudget {
      budget_mb: max_memory_budget_mb,
    });
  }

  warnings
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rate_sums_enabled_features() {
    assert!((estimate_mb_per_minute(true, true) - 1.5).abs() < f64::EPSILON);
    assert!((estimate_mb_per_minute(true, false) - 1.0).abs() < f64::EPSILON);
    assert!((estimate_mb_per_minute(false, true) - 0.5).abs() < f64::EPSILON);
    assert_eq!(estimate_mb_per_minute(false, false), 0.0);
  }

  #[test]
  fn long_interval_and_high_risk_fire_together() {
    // 1.5 MB/min over 300 minutes projects 450 MB against a 50 MB budget.
    let warnings = validate(50, 300.0, true, true);

    let high_risk = warnings.iter().find_map(|warning| match warning {
      BudgetWarning::HighMemoryRisk { projected_mb, .. } => {
        Some(*projected_mb)
      }
      _ => None,
    });
    assert_eq!(high_risk, Some(450.0));

    assert!(warnings.iter().any(|warning| matches!(
      warning,
      BudgetWarning::VeryLongInterval { .. }
    )));
  }

  #[test]
  fn suggestions_derive_from_the_same_constants() {
    let warnings = validate(50, 300.0, true, true);

    match warnings.first() {
      Some(BudgetWarning::HighMemoryRisk {
        suggested_budget_mb,
        suggested_interval_minutes,
        ..
      }) => {
        // 80% of 50 MB at 1.5 MB/min supports at most 26 minutes.
        assert_eq!(*suggested_interval_minutes, 26);
        // 450 MB projected needs a ceiling of ceil(450 / 0.8) MB.
        assert_eq!(*suggested_budget_mb, 563);
      }
      other => panic!("expected high memory risk first, got {other:?}"),
    }
  }

  #[test]
  fn low_budget_fires_independently() {
    let warnings = validate(49, 1.0, false, false);
    assert_eq!(
      warnings,
      vec![BudgetWarning::LowMemoryBudget { budget_mb: 49 }]
    );
  }

  #[test]
  fn comfortable_configuration_is_clean() {
    assert!(validate(200, 60.0, true, true).is_empty());
  }
}
