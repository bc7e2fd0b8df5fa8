use std::io::Write;

use serde::Serialize;

use crate::export::ExportError;
use crate::memory::{MemoryUsage, format_bytes};

/// One ranked entry of CPU self-time attribution.
///
/// Entries merge by function name: distinct call sites sharing a name
/// collapse into one entry, and with top-frame attribution total time equals
/// self time. Both are deliberate simplifications of this design.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionInsight {
  pub function_name: String,
  /// Share of the flushed interval spent directly in this function.
  pub percentage: f64,
  pub self_time_ms: f64,
  pub total_time_ms: f64,
}

/// One ranked allocation site, keyed by the top stack frame only.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct AllocationHotspot {
  pub count: u64,
  pub site_label: String,
  pub size_bytes: u64,
}

/// Collector-pause impact over the flushed interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct GcImpact {
  pub avg_gc_duration_ms: f64,
  pub gc_count: u64,
  pub gc_time_ms: f64,
}

/// The durable, memory-light output of one flush.
///
/// Both rankings are capped at a fixed small length regardless of input
/// size, so insight output stays bounded independent of workload. Immutable
/// once produced; retention is the caller's concern.
#[derive(Debug, Clone, Serialize)]
pub struct Insights {
  pub duration_ms: u64,
  pub gc_impact: GcImpact,
  pub memory_hotspots: Vec<AllocationHotspot>,
  pub memory_usage: MemoryUsage,
  pub top_functions: Vec<FunctionInsight>,
}

impl Insights {
  /// Serialize the insights to JSON using the provided writer.
  ///
  /// # Errors
  ///
  /// Returns an error if serialization to JSON fails.
  pub fn export_json<W: Write>(&self, writer: W) -> Result<(), ExportError> {
    serde_json::to_writer(writer, self)?;
    Ok(())
  }

  /// One-line summary suitable for a report sink.
  #[must_use]
  pub fn summary(&self) -> String {
    let top = self.top_functions.first().map_or_else(
      || "no cpu samples".to_string(),
      |function| {
        format!(
          "top {} {:.1}ms ({:.1}%)",
          function.function_name,
          function.self_time_ms,
          function.percentage
        )
      },
    );

    let hottest = self.memory_hotspots.first().map_or_else(
      || "no allocation samples".to_string(),
      |hotspot| {
        format!("hottest {} {}", hotspot.site_label, format_bytes(hotspot.size_bytes))
      },
    );

    format!(
      "interval {}ms: {top}; {hottest}; {}",
      self.duration_ms, self.memory_usage
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample_insights() -> Insights {
    Insights {
      duration_ms: 1000,
      gc_impact: GcImpact::default(),
      memory_hotspots: vec![AllocationHotspot {
        count: 4,
        site_label: "grow (buffer.rs:12)".to_string(),
        size_bytes: 2048,
      }],
      memory_usage: MemoryUsage::default(),
      top_functions: vec![FunctionInsight {
        function_name: "hash_block".to_string(),
        percentage: 2.0,
        self_time_ms: 20.0,
        total_time_ms: 20.0,
      }],
    }
  }

  #[test]
  fn summary_names_the_leaders() {
    let summary = sample_insights().summary();
    assert!(summary.contains("hash_block"));
    assert!(summary.contains("grow (buffer.rs:12)"));
    assert!(summary.contains("2.0 KB"));
  }

  #[test]
  fn export_json_round_trips_the_rankings() {
    let mut encoded = Vec::new();
    sample_insights()
      .export_json(&mut encoded)
      .expect("export insights");

    let decoded: serde_json::Value =
      serde_json::from_slice(&encoded).expect("parse exported insights");
    assert_eq!(decoded["top_functions"][0]["function_name"], "hash_block");
    assert_eq!(decoded["memory_hotspots"][0]["size_bytes"], 2048);
  }

  #[test]
  fn empty_rankings_still_summarize() {
    let mut insights = sample_insights();
    insights.top_functions.clear();
    insights.memory_hotspots.clear();

    let summary = insights.summary();
    assert!(summary.contains("no cpu samples"));
    assert!(summary.contains("no allocation samples"));
  }
}
