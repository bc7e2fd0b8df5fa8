use std::time::Duration;

use crate::error::ProfilerError;
use crate::stack::FrameMetadata;

/// One CPU profile node: a call-frame identity and how many samples landed
/// directly in it.
#[derive(Debug, Clone)]
pub struct CpuNode {
  pub frame: FrameMetadata,
  pub hit_count: u64,
}

/// Raw CPU self-time samples accumulated over one interval.
#[derive(Debug, Clone)]
pub struct CpuProfile {
  /// Samples lost to back pressure in the collection path.
  pub dropped_samples: u64,
  pub nodes: Vec<CpuNode>,
  /// Time represented by a single hit.
  pub sample_interval: Duration,
}

/// One sampled allocation: the bytes it stands for and the captured stack,
/// outermost frame first.
#[derive(Debug, Clone)]
pub struct HeapSample {
  pub size_bytes: u64,
  pub stack: Vec<FrameMetadata>,
}

/// Raw heap allocation samples accumulated over one interval.
#[derive(Debug, Clone, Default)]
pub struct HeapProfile {
  /// Samples lost to back pressure in the collection path.
  pub dropped_samples: u64,
  pub samples: Vec<HeapSample>,
}

/// Cumulative collector-pause counters reported by the host runtime.
///
/// The native in-process backend reports zeros; backends wrapping an embedded
/// garbage-collected runtime fill these in so `gc_impact` is always present
/// in the produced insights.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct GcStats {
  pub pause_count: u64,
  pub total_pause: Duration,
}

impl GcStats {
  /// Pauses accrued since `baseline` was read.
  #[must_use]
  pub fn since(&self, baseline: &Self) -> Self {
    Self {
      pause_count: self.pause_count.saturating_sub(baseline.pause_count),
      total_pause: self.total_pause.saturating_sub(baseline.total_pause),
    }
  }
}

/// Ephemeral raw data returned by one stop-and-restart cycle.
///
/// Exclusively owned by the flush that requested it; dropping it after
/// extraction is what keeps retained profiling memory bounded.
#[derive(Debug, Clone, Default)]
pub struct RawProfileBundle {
  pub cpu: Option<CpuProfile>,
  pub heap: Option<HeapProfile>,
}

impl RawProfileBundle {
  #[must_use]
  pub fn empty() -> Self {
    Self::default()
  }

  /// Approximate serialized footprint of the bundle, used as the
  /// controller's advisory retained-memory estimate.
  #[must_use]
  pub fn estimated_size_bytes(&self) -> u64 {
    let cpu_bytes = self.cpu.as_ref().map_or(0, |profile| {
      profile
        .nodes
        .iter()
        .map(|node| frame_footprint(&node.frame) + 16)
        .sum()
    });

    let heap_bytes = self.heap.as_ref().map_or(0, |profile| {
      profile
        .samples
        .iter()
        .map(|sample| {
          let stack_bytes: u64 =
            sample.stack.iter().map(frame_footprint).sum();
          stack_bytes + 16
        })
        .sum()
    });

    cpu_bytes + heap_bytes
  }
}

fn frame_footprint(frame: &FrameMetadata) -> u64 {
  frame.filename.len() as u64 + frame.function.len() as u64 + 24
}

/// Connection to a native sampling facility.
///
/// The backend issues start/stop commands and hands back raw data; it holds
/// no buffered data itself and never restarts sampling on its own. The
/// controller owns the gapless stop-collect-restart sequence.
pub trait SamplingBackend: Send {
  /// Establish the connection. Fails fast with
  /// [`ProfilerError::AdapterUnavailable`] when the host environment lacks
  /// the sampling facility; that failure is non-recoverable for this process
  /// invocation.
  fn open(&mut self) -> Result<(), ProfilerError>;

  /// Begin accumulating data for the enabled profile sources.
  fn start_sampling(
    &mut self,
    cpu: bool,
    heap: bool,
  ) -> Result<(), ProfilerError>;

  /// Stop the enabled sources and hand back everything accumulated since
  /// sampling started. Callers must immediately restart sampling to avoid a
  /// gap.
  fn stop_and_collect(
    &mut self,
    cpu: bool,
    heap: bool,
  ) -> Result<RawProfileBundle, ProfilerError>;

  /// Disable and disconnect. Idempotent.
  fn close(&mut self);

  /// Cumulative collector-pause counters, when the host runtime has any.
  fn gc_stats(&self) -> GcStats {
    GcStats::default()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_bundle_estimates_zero() {
    assert_eq!(RawProfileBundle::empty().estimated_size_bytes(), 0);
  }

  #[test]
  fn estimate_grows_with_contents() {
    let frame = FrameMetadata::new("a.rs", "work", 1);
    let bundle = RawProfileBundle {
      cpu: Some(CpuProfile {
        dropped_samples: 0,
        nodes: vec![CpuNode {
          frame: frame.clone(),
          hit_count: 3,
        }],
        sample_interval: Duration::from_millis(10),
      }),
      heap: Some(HeapProfile {
        dropped_samples: 0,
        samples: vec![HeapSample {
          size_bytes: 1024,
          stack: vec![frame],
        }],
      }),
    };

    assert!(bundle.estimated_size_bytes() > 0);
  }

  #[test]
  fn gc_stats_since_saturates() {
    let newer = GcStats {
      pause_count: 3,
      total_pause: Duration::from_millis(30),
    };
    let older = GcStats {
      pause_count: 5,
      total_pause: Duration::from_millis(10),
    };

    let delta = newer.since(&older);
    assert_eq!(delta.pause_count, 0);
    assert_eq!(delta.total_pause, Duration::from_millis(20));
  }
}
