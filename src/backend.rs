use std::time::Duration;

use crate::{
  cpu_sampler::{CpuSampler, DEFAULT_SAMPLE_INTERVAL},
  error::ProfilerError,
  heap_sampler::{self, DEFAULT_SAMPLING_INTERVAL_BYTES, HeapSampler},
  sampler::{RawProfileBundle, SamplingBackend},
};

/// Sampling backend over this process's own facilities: `SIGPROF` interval
/// timers for CPU self-time and the sampling allocator hook for heap
/// allocations.
#[derive(Debug)]
pub struct InProcessBackend {
  cpu: Option<CpuSampler>,
  cpu_sample_interval: Duration,
  heap: Option<HeapSampler>,
  heap_sampling_interval_bytes: u64,
  opened: bool,
}

impl Default for InProcessBackend {
  fn default() -> Self {
    Self::new()
  }
}

impl InProcessBackend {
  #[must_use]
  pub fn new() -> Self {
    Self {
      cpu: None,
      cpu_sample_interval: DEFAULT_SAMPLE_INTERVAL,
      heap: None,
      heap_sampling_interval_bytes: DEFAULT_SAMPLING_INTERVAL_BYTES,
      opened: false,
    }
  }

  /// Builder-style helper to adjust the CPU sampling interval.
  #[must_use]
  pub fn with_cpu_sample_interval(mut self, interval: Duration) -> Self {
    self.cpu_sample_interval = interval;
    self
  }

  /// Builder-style helper to adjust the heap sampling byte distance.
  #[must_use]
  pub fn with_heap_sampling_interval_bytes(mut self, bytes: u64) -> Self {
    self.heap_sampling_interval_bytes = bytes;
    self
  }

  fn stop_live_samplers(&mut self) -> RawProfileBundle {
    RawProfileBundle {
      cpu: self.cpu.take().map(CpuSampler::stop_and_collect),
      heap: self.heap.take().map(HeapSampler::stop_and_collect),
    }
  }
}

impl SamplingBackend for InProcessBackend {
  fn open(&mut self) -> Result<(), ProfilerError> {
    if !CpuSampler::is_supported() && !heap_sampler::allocator_installed() {
      return Err(ProfilerError::AdapterUnavailable {
        detail: "this process exposes no sampling facility".to_string(),
        remediation: "run on a unix host for CPU sampling, or install the \
          sampling allocator for heap sampling",
      });
    }

    self.opened = true;
    Ok(())
  }

  fn start_sampling(
    &mut self,
    cpu: bool,
    heap: bool,
  ) -> Result<(), ProfilerError> {
    if !self.opened {
      return Err(ProfilerError::Backend(
        "the sampling session is not open".to_string(),
      ));
    }

    if cpu && self.cpu.is_none() {
      self.cpu = Some(CpuSampler::start(self.cpu_sample_interval)?);
    }

    if heap && self.heap.is_none() {
      match HeapSampler::start(self.heap_sampling_interval_bytes) {
        Ok(sampler) => self.heap = Some(sampler),
        Err(error) => {
          // Leave no half-started session behind.
          let _ = self.stop_live_samplers();
          return Err(error);
        }
      }
    }

    Ok(())
  }

  fn stop_and_collect(
    &mut self,
    _cpu: bool,
    _heap: bool,
  ) -> Result<RawProfileBundle, ProfilerError> {
    Ok(self.stop_live_samplers())
  }

  fn close(&mut self) {
    let _ = self.stop_live_samplers();
    self.opened = false;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn open_succeeds_where_any_facility_exists() {
    let mut backend = InProcessBackend::new();

    if CpuSampler::is_supported() || heap_sampler::allocator_installed() {
      assert!(backend.open().is_ok());
    } else {
      assert!(matches!(
        backend.open(),
        Err(ProfilerError::AdapterUnavailable { .. })
      ));
    }
  }

  #[test]
  fn heap_sampling_without_the_allocator_is_unavailable() {
    if heap_sampler::allocator_installed() {
      return;
    }

    let mut backend = InProcessBackend::new();
    backend.open().expect("open in-process backend");

    let result = backend.start_sampling(false, true);
    assert!(matches!(
      result,
      Err(ProfilerError::AdapterUnavailable { .. })
    ));

    // The failed start left nothing running.
    assert!(backend.cpu.is_none());
    assert!(backend.heap.is_none());
    backend.close();
  }

  #[test]
  fn close_is_idempotent() {
    let mut backend = InProcessBackend::new();
    backend.close();
    backend.close();
  }
}
