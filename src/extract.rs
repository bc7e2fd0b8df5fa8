use std::collections::HashMap;
use std::time::Duration;

use crate::insights::{AllocationHotspot, FunctionInsight, GcImpact};
use crate::sampler::{CpuProfile, GcStats, HeapProfile};

/// Fixed cap on every ranked insight list. The cap, not the workload, bounds
/// output size.
pub const INSIGHT_CAP: usize = 10;

/// Fold raw CPU nodes into ranked self-time entries.
///
/// Self-time per function is hit count times the sampling interval,
/// accumulated by function-name identity; an absent profile yields an empty
/// ranking.
#[must_use]
pub fn top_functions(
  profile: Option<&CpuProfile>,
  wall_duration: Duration,
) -> Vec<FunctionInsight> {
  let Some(profile) = profile else {
    return Vec::new();
  };

  let mut self_time_by_name: HashMap<String, f64> = HashMap::new();

  for node in &profile.nodes {
    let self_time_ms = node.hit_count as f64
      * profile.sample_interval.as_secs_f64()
      * 1000.0;

    *self_time_by_name
      .entry(node.frame.function.to_string())
      .or_insert(0.0) += self_time_ms;
  }

  let wall_ms = wall_duration.as_secs_f64() * 1000.0;

  let mut ranked: Vec<FunctionInsight> = self_time_by_name
    .into_iter()
    .map(|(function_name, self_time_ms)| FunctionInsight {
      function_name,
      percentage: if wall_ms > 0.0 {
        self_time_ms / wall_ms * 100.0
      } else {
        0.0
      },
      self_time_ms,
      total_time_ms: self_time_ms,
    })
    .collect();

  ranked.sort_by(|a, b| {
    b.self_time_ms
      .partial_cmp(&a.self_time_ms)
      .unwrap_or(std::cmp::Ordering::Equal)
  });
  ranked.truncate(INSIGHT_CAP);

  ranked
}

/// Fold raw heap samples into ranked allocation sites.
///
/// The site key is the function, file, and line of the top stack frame only;
/// deeper frames are ignored. An absent profile yields an empty ranking.
#[must_use]
pub fn memory_hotspots(
  profile: Option<&HeapProfile>,
) -> Vec<AllocationHotspot> {
  let Some(profile) = profile else {
    return Vec::new();
  };

  let mut by_site: HashMap<String, (u64, u64)> = HashMap::new();

  for sample in &profile.samples {
    let label = sample
      .stack
      .first()
      .map_or_else(|| "<unknown>".to_string(), |frame| frame.site_label());

    let entry = by_site.entry(label).or_insert((0, 0));
    entry.0 += sample.size_bytes;
    entry.1 += 1;
  }

  let mut ranked: Vec<AllocationHotspot> = by_site
    .into_iter()
    .map(|(site_label, (size_bytes, count))| AllocationHotspot {
      count,
      site_label,
      size_bytes,
    })
    .collect();

  ranked.sort_by(|a, b| b.size_bytes.cmp(&a.size_bytes));
  ranked.truncate(INSIGHT_CAP);

  ranked
}

/// Collector-pause counters accrued over one interval, as insight fields.
#[must_use]
pub fn gc_impact(delta: GcStats) -> GcImpact {
  let gc_time_ms = delta.total_pause.as_secs_f64() * 1000.0;

  GcImpact {
    avg_gc_duration_ms: if delta.pause_count > 0 {
      gc_time_ms / delta.pause_count as f64
    } else {
      0.0
    },
    gc_count: delta.pause_count,
    gc_time_ms,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sampler::{CpuNode, HeapSample};
  use crate::stack::FrameMetadata;

  fn cpu_profile(nodes: Vec<(&str, u64)>, interval: Duration) -> CpuProfile {
    CpuProfile {
      dropped_samples: 0,
      nodes: nodes
        .into_iter()
        .map(|(name, hit_count)| CpuNode {
          frame: FrameMetadata::new("lib.rs", name, 1),
          hit_count,
        })
        .collect(),
      sample_interval: interval,
    }
  }

  fn heap_profile(samples: Vec<(&str, u32, u64)>) -> HeapProfile {
    HeapProfile {
      dropped_samples: 0,
      samples: samples
        .into_iter()
        .map(|(function, lineno, size_bytes)| HeapSample {
          size_bytes,
          stack: vec![
            FrameMetadata::new("alloc.rs", function, lineno),
            FrameMetadata::new("caller.rs", "outer", 99),
          ],
        })
        .collect(),
    }
  }

  #[test]
  fn ranks_functions_by_self_time() {
    // 20 hits at 1000us each over a 1000ms interval.
    let profile = cpu_profile(
      vec![("slow_fn", 20), ("fast_fn", 5)],
      Duration::from_micros(1000),
    );

    let ranked = top_functions(Some(&profile), Duration::from_millis(1000));

    assert_eq!(ranked.len(), 2);
    assert_eq!(ranked[0].function_name, "slow_fn");
    assert!((ranked[0].self_time_ms - 20.0).abs() < 1e-9);
    assert!((ranked[0].percentage - 2.0).abs() < 1e-9);
    assert_eq!(ranked[1].function_name, "fast_fn");
  }

  #[test]
  fn caps_the_function_ranking_at_ten() {
    let nodes: Vec<(String, u64)> = (0..25)
      .map(|index| (format!("fn_{index}"), index + 1))
      .collect();
    let profile = CpuProfile {
      dropped_samples: 0,
      nodes: nodes
        .iter()
        .map(|(name, hit_count)| CpuNode {
          frame: FrameMetadata::new("lib.rs", name.as_str(), 1),
          hit_count: *hit_count,
        })
        .collect(),
      sample_interval: Duration::from_micros(1000),
    };

    let ranked = top_functions(Some(&profile), Duration::from_secs(1));

    assert_eq!(ranked.len(), INSIGHT_CAP);
    for pair in ranked.windows(2) {
      assert!(pair[0].self_time_ms >= pair[1].self_time_ms);
    }
  }

  #[test]
  fn merges_nodes_sharing_a_function_name() {
    let profile = cpu_profile(
      vec![("shared", 3), ("shared", 7)],
      Duration::from_micros(1000),
    );

    let ranked = top_functions(Some(&profile), Duration::from_secs(1));

    assert_eq!(ranked.len(), 1);
    assert!((ranked[0].self_time_ms - 10.0).abs() < 1e-9);
  }

  #[test]
  fn absent_cpu_profile_yields_empty_ranking() {
    assert!(top_functions(None, Duration::from_secs(1)).is_empty());
  }

  #[test]
  fn ranks_sites_by_total_size() {
    let profile = heap_profile(vec![
      ("grow", 12, 2048),
      ("push_log", 40, 64),
    ]);

    let ranked = memory_hotspots(Some(&profile));

    assert_eq!(ranked.len(), 2);
    assert_eq!(ranked[0].site_label, "grow (alloc.rs:12)");
    assert_eq!(ranked[0].size_bytes, 2048);
    assert_eq!(ranked[1].site_label, "push_log (alloc.rs:40)");
  }

  #[test]
  fn aggregates_by_top_frame_only() {
    // Same top frame, different callers: one site.
    let profile = HeapProfile {
      dropped_samples: 0,
      samples: vec![
        HeapSample {
          size_bytes: 100,
          stack: vec![
            FrameMetadata::new("alloc.rs", "grow", 12),
            FrameMetadata::new("a.rs", "caller_a", 1),
          ],
        },
        HeapSample {
          size_bytes: 200,
          stack: vec![
            FrameMetadata::new("alloc.rs", "grow", 12),
            FrameMetadata::new("b.rs", "caller_b", 2),
          ],
        },
      ],
    };

    let ranked = memory_hotspots(Some(&profile));

    assert_eq!(ranked.len(), 1);
    assert_eq!(ranked[0].size_bytes, 300);
    assert_eq!(ranked[0].count, 2);
  }

  #[test]
  fn caps_the_hotspot_ranking_at_ten() {
    let samples: Vec<(String, u64)> = (0..30)
      .map(|index| (format!("site_{index}"), (index + 1) * 16))
      .collect();
    let profile = HeapProfile {
      dropped_samples: 0,
      samples: samples
        .iter()
        .map(|(function, size)| HeapSample {
          size_bytes: *size,
          stack: vec![FrameMetadata::new("alloc.rs", function.as_str(), 1)],
        })
        .collect(),
    };

    let ranked = memory_hotspots(Some(&profile));

    assert_eq!(ranked.len(), INSIGHT_CAP);
    for pair in ranked.windows(2) {
      assert!(pair[0].size_bytes >= pair[1].size_bytes);
    }
  }

  #[test]
  fn sample_without_frames_buckets_as_unknown() {
    let profile = HeapProfile {
      dropped_samples: 0,
      samples: vec![HeapSample {
        size_bytes: 32,
        stack: Vec::new(),
      }],
    };

    let ranked = memory_hotspots(Some(&profile));
    assert_eq!(ranked[0].site_label, "<unknown>");
  }

  #[test]
  fn absent_heap_profile_yields_empty_ranking() {
    assert!(memory_hotspots(None).is_empty());
  }

  #[test]
  fn gc_impact_averages_pauses() {
    let impact = gc_impact(GcStats {
      pause_count: 4,
      total_pause: Duration::from_millis(20),
    });

    assert_eq!(impact.gc_count, 4);
    assert!((impact.gc_time_ms - 20.0).abs() < 1e-9);
    assert!((impact.avg_gc_duration_ms - 5.0).abs() < 1e-9);
  }

  #[test]
  fn gc_impact_with_no_pauses_is_zero() {
    let impact = gc_impact(GcStats::default());
    assert_eq!(impact, GcImpact::default());
  }
}
