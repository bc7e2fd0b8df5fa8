use std::{
  alloc::{GlobalAlloc, Layout, System},
  cell::Cell,
  sync::{
    OnceLock,
    atomic::{AtomicBool, AtomicU64, Ordering},
  },
};

use crossbeam_queue::ArrayQueue;

use crate::{
  error::ProfilerError,
  sampler::{HeapProfile, HeapSample},
  stack::{self, StackId, StackTable},
};

/// Default byte distance between two recorded allocation samples.
pub const DEFAULT_SAMPLING_INTERVAL_BYTES: u64 = 512 * 1024;

const CAPTURE_SKIP_FRAMES: usize = 4;
const EVENT_QUEUE_CAPACITY: usize = 8192;
const MAX_STACK_DEPTH: usize = 16;

const INSTALL_HINT: &str = "add `#[global_allocator] static ALLOC: \
  tickprof::SamplingAllocator = tickprof::SamplingAllocator::system();` to \
  the profiled binary";

static DROPPED: AtomicU64 = AtomicU64::new(0);
static INSTALLED: AtomicBool = AtomicBool::new(false);
static LIVE_BYTES: AtomicU64 = AtomicU64::new(0);
static PEAK_BYTES: AtomicU64 = AtomicU64::new(0);
static PENDING_BYTES: AtomicU64 = AtomicU64::new(0);
static SAMPLING: AtomicBool = AtomicBool::new(false);
static SAMPLING_INTERVAL_BYTES: AtomicU64 =
  AtomicU64::new(DEFAULT_SAMPLING_INTERVAL_BYTES);
static SESSION_CLAIMED: AtomicBool = AtomicBool::new(false);

thread_local! {
  static IN_SAMPLER: Cell<bool> = const { Cell::new(false) };
}

struct HeapEvent {
  size_bytes: u64,
  stack_id: StackId,
}

fn events() -> &'static ArrayQueue<HeapEvent> {
  static EVENTS: OnceLock<ArrayQueue<HeapEvent>> = OnceLock::new();
  EVENTS.get_or_init(|| ArrayQueue::new(EVENT_QUEUE_CAPACITY))
}

fn stack_table() -> &'static StackTable {
  static TABLE: OnceLock<StackTable> = OnceLock::new();
  TABLE.get_or_init(StackTable::new)
}

/// Allocator wrapper that feeds the sampling heap profiler.
///
/// Installed as the `#[global_allocator]` of the profiled binary. Off the
/// sampling path it only maintains the live/peak byte counters; while a
/// session is sampling it additionally records one stack-tagged sample
/// roughly every `sampling_interval_bytes` allocated bytes.
#[derive(Debug, Default)]
pub struct SamplingAllocator<A = System> {
  inner: A,
}

impl SamplingAllocator<System> {
  /// Wrap the system allocator.
  #[must_use]
  pub const fn system() -> Self {
    Self {
      inner: System,
    }
  }
}

impl<A> SamplingAllocator<A> {
  #[must_use]
  pub const fn new(inner: A) -> Self {
    Self {
      inner,
    }
  }
}

// SAFETY: all allocation calls are forwarded verbatim to the inner
// allocator; the bookkeeping never touches the returned memory.
unsafe impl<A: GlobalAlloc> GlobalAlloc for SamplingAllocator<A> {
  unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
    let ptr = unsafe { self.inner.alloc(layout) };

    if !ptr.is_null() {
      on_alloc(layout.size() as u64);
    }

    ptr
  }

  unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
    let ptr = unsafe { self.inner.alloc_zeroed(layout) };

    if !ptr.is_null() {
      on_alloc(layout.size() as u64);
    }

    ptr
  }

  unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
    unsafe { self.inner.dealloc(ptr, layout) };
    on_dealloc(layout.size() as u64);
  }

  unsafe fn realloc(
    &self,
    ptr: *mut u8,
    layout: Layout,
    new_size: usize,
  ) -> *mut u8 {
    let new_ptr = unsafe { self.inner.realloc(ptr, layout, new_size) };

    if !new_ptr.is_null() {
      on_dealloc(layout.size() as u64);
      on_alloc(new_size as u64);
    }

    new_ptr
  }
}

fn on_alloc(size: u64) {
  if !INSTALLED.load(Ordering::Relaxed) {
    INSTALLED.store(true, Ordering::Relaxed);
  }

  let live = LIVE_BYTES.fetch_add(size, Ordering::Relaxed) + size;
  PEAK_BYTES.fetch_max(live, Ordering::Relaxed);

  if !SAMPLING.load(Ordering::Relaxed) {
    return;
  }

  let interval = SAMPLING_INTERVAL_BYTES.load(Ordering::Relaxed).max(1);
  let pending = PENDING_BYTES.fetch_add(size, Ordering::Relaxed) + size;

  if pending < interval {
    return;
  }

  // Claim everything accumulated since the last sample and attribute it to
  // the triggering call site.
  let attributed = PENDING_BYTES.swap(0, Ordering::Relaxed);

  if attributed > 0 {
    record_sample(attributed);
  }
}

fn on_dealloc(size: u64) {
  let _ = LIVE_BYTES.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |live| {
    Some(live.saturating_sub(size))
  });
}

fn record_sample(size_bytes: u64) {
  // Capturing a stack allocates; the guard keeps those nested allocations
  // from recursing back into the sampler.
  let entered = IN_SAMPLER
    .try_with(|flag| {
      if flag.get() {
        return false;
      }
      flag.set(true);
      true
    })
    .unwrap_or(false);

  if !entered {
    return;
  }

  let frames = stack::capture_frames(MAX_STACK_DEPTH, CAPTURE_SKIP_FRAMES);
  let stack_id = stack_table().intern(frames);

  if events()
    .push(HeapEvent {
      size_bytes,
      stack_id,
    })
    .is_err()
  {
    DROPPED.fetch_add(1, Ordering::Relaxed);
  }

  let _ = IN_SAMPLER.try_with(|flag| flag.set(false));
}

/// Whether the sampling allocator is serving this process.
#[must_use]
pub fn allocator_installed() -> bool {
  INSTALLED.load(Ordering::Relaxed)
}

#[must_use]
pub(crate) fn live_bytes() -> u64 {
  LIVE_BYTES.load(Ordering::Relaxed)
}

#[must_use]
pub(crate) fn peak_bytes() -> u64 {
  PEAK_BYTES.load(Ordering::Relaxed)
}

/// One live heap sampling session over the process-wide allocator hook.
#[derive(Debug)]
pub(crate) struct HeapSampler {
  collected: bool,
}

impl HeapSampler {
  /// Begin recording allocation samples.
  pub(crate) fn start(
    sampling_interval_bytes: u64,
  ) -> Result<Self, ProfilerError> {
    if !allocator_installed() {
      return Err(ProfilerError::AdapterUnavailable {
        detail: "the sampling allocator is not installed in this process"
          .to_string(),
        remediation: INSTALL_HINT,
      });
    }

    if SESSION_CLAIMED.swap(true, Ordering::SeqCst) {
      return Err(ProfilerError::Backend(
        "heap sampling is already active".to_string(),
      ));
    }

    SAMPLING_INTERVAL_BYTES
      .store(sampling_interval_bytes.max(1), Ordering::SeqCst);
    PENDING_BYTES.store(0, Ordering::SeqCst);
    DROPPED.store(0, Ordering::SeqCst);

    // Discard anything left over from a previous session.
    while events().pop().is_some() {}

    SAMPLING.store(true, Ordering::SeqCst);

    Ok(Self {
      collected: false,
    })
  }

  /// Stop recording and drain every accumulated sample.
  #[must_use]
  pub(crate) fn stop_and_collect(mut self) -> HeapProfile {
    SAMPLING.store(false, Ordering::SeqCst);

    let table = stack_table();
    let mut samples = Vec::new();

    while let Some(event) = events().pop() {
      let stack = table
        .resolve(event.stack_id)
        .map_or_else(Vec::new, |metadata| metadata.frames().to_vec());

      samples.push(HeapSample {
        size_bytes: event.size_bytes,
        stack,
      });
    }

    let dropped_samples = DROPPED.swap(0, Ordering::SeqCst);

    self.collected = true;
    SESSION_CLAIMED.store(false, Ordering::SeqCst);

    HeapProfile {
      dropped_samples,
      samples,
    }
  }
}

impl Drop for HeapSampler {
  fn drop(&mut self) {
    if !self.collected {
      SAMPLING.store(false, Ordering::SeqCst);
      SESSION_CLAIMED.store(false, Ordering::SeqCst);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn start_requires_the_installed_allocator() {
    // The test binary runs on the default allocator.
    if allocator_installed() {
      return;
    }

    match HeapSampler::start(DEFAULT_SAMPLING_INTERVAL_BYTES) {
      Err(ProfilerError::AdapterUnavailable { remediation, .. }) => {
        assert!(remediation.contains("global_allocator"));
      }
      other => panic!("expected AdapterUnavailable, got {other:?}"),
    }
  }

  #[test]
  fn sampling_disabled_records_nothing() {
    let before = events().len();

    // Sampling is off, so even interval-sized allocations are ignored.
    on_alloc(DEFAULT_SAMPLING_INTERVAL_BYTES * 2);

    assert_eq!(events().len(), before);
  }

  #[test]
  fn dealloc_never_underflows_the_live_counter() {
    on_dealloc(u64::MAX);
    assert!(live_bytes() < u64::MAX / 2);
  }
}
