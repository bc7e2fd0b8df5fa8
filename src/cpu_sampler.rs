use std::time::Duration;

use crate::error::ProfilerError;
use crate::sampler::CpuProfile;

/// Default wall-clock distance between two CPU samples.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(10);

const UNSUPPORTED_HINT: &str =
  "CPU self-time sampling needs a unix host with SIGPROF interval timers";

/// One live CPU sampling session.
///
/// Sampling rides on `ITIMER_PROF`: the kernel delivers `SIGPROF` as the
/// process consumes CPU time, and the handler records raw instruction
/// pointers into a lock-free queue. Symbolization is deferred to
/// [`CpuSampler::stop_and_collect`], off the signal path.
#[derive(Debug)]
pub(crate) struct CpuSampler {
  sample_interval: Duration,
}

#[cfg(unix)]
mod imp {
  use std::{
    mem,
    ptr,
    sync::{
      OnceLock,
      atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
  };

  use crossbeam_queue::ArrayQueue;

  use super::{CpuSampler, UNSUPPORTED_HINT};
  use crate::error::ProfilerError;
  use crate::sampler::{CpuNode, CpuProfile};
  use crate::stack;

  const MAX_FRAMES: usize = 32;
  const SAMPLE_QUEUE_CAPACITY: usize = 16384;
  // The handler and the signal trampoline sit on top of every capture.
  const SIGNAL_SKIP_FRAMES: usize = 3;

  static ACTIVE: AtomicBool = AtomicBool::new(false);
  static DROPPED: AtomicU64 = AtomicU64::new(0);

  #[derive(Clone, Copy)]
  struct RawSample {
    depth: usize,
    ips: [usize; MAX_FRAMES],
  }

  fn samples() -> &'static ArrayQueue<RawSample> {
    static SAMPLES: OnceLock<ArrayQueue<RawSample>> = OnceLock::new();
    SAMPLES.get_or_init(|| ArrayQueue::new(SAMPLE_QUEUE_CAPACITY))
  }

  extern "C" fn on_sigprof(_signal: libc::c_int) {
    if !ACTIVE.load(Ordering::Relaxed) {
      return;
    }

    let mut sample = RawSample {
      depth: 0,
      ips: [0; MAX_FRAMES],
    };

    // SAFETY: called from a signal handler; `trace_unsynchronized` walks
    // frames without taking the symbolization locks, and nothing here
    // allocates.
    unsafe {
      backtrace::trace_unsynchronized(|frame| {
        if sample.depth >= MAX_FRAMES {
          return false;
        }

        sample.ips[sample.depth] = frame.ip() as usize;
        sample.depth += 1;
        true
      });
    }

    if samples().push(sample).is_err() {
      DROPPED.fetch_add(1, Ordering::Relaxed);
    }
  }

  fn install_handler() -> Result<(), ProfilerError> {
    // SAFETY: standard sigaction installation; the zeroed struct is the
    // documented baseline and every field we rely on is set explicitly.
    unsafe {
      let mut action: libc::sigaction = mem::zeroed();
      action.sa_sigaction = on_sigprof as usize;
      action.sa_flags = libc::SA_RESTART;
      libc::sigemptyset(&mut action.sa_mask);

      if libc::sigaction(libc::SIGPROF, &action, ptr::null_mut()) != 0 {
        return Err(ProfilerError::AdapterUnavailable {
          detail: "failed to install the SIGPROF handler".to_string(),
          remediation: UNSUPPORTED_HINT,
        });
      }
    }

    Ok(())
  }

  fn set_timer(interval: Duration) -> Result<(), ProfilerError> {
    let tv = libc::timeval {
      tv_sec: interval.as_secs() as libc::time_t,
      tv_usec: interval.subsec_micros() as libc::suseconds_t,
    };
    let timer = libc::itimerval {
      it_interval: tv,
      it_value: tv,
    };

    // SAFETY: plain syscall with a stack-owned argument.
    let rc = unsafe { libc::setitimer(libc::ITIMER_PROF, &timer, ptr::null_mut()) };

    if rc != 0 {
      return Err(ProfilerError::AdapterUnavailable {
        detail: "failed to arm the profiling interval timer".to_string(),
        remediation: UNSUPPORTED_HINT,
      });
    }

    Ok(())
  }

  fn clear_timer() {
    let zero = libc::timeval {
      tv_sec: 0,
      tv_usec: 0,
    };
    let timer = libc::itimerval {
      it_interval: zero,
      it_value: zero,
    };

    // SAFETY: disarming the timer cannot fail in a way we can act on.
    unsafe {
      libc::setitimer(libc::ITIMER_PROF, &timer, ptr::null_mut());
    }
  }

  pub(super) fn start(
    sample_interval: Duration,
  ) -> Result<CpuSampler, ProfilerError> {
    if ACTIVE.swap(true, Ordering::SeqCst) {
      return Err(ProfilerError::Backend(
        "CPU sampling is already active".to_string(),
      ));
    }

    // Discard anything left over from a previous session.
    while samples().pop().is_some() {}
    DROPPED.store(0, Ordering::SeqCst);

    if let Err(error) = install_handler() {
      ACTIVE.store(false, Ordering::SeqCst);
      return Err(error);
    }

    if let Err(error) = set_timer(sample_interval) {
      ACTIVE.store(false, Ordering::SeqCst);
      return Err(error);
    }

    Ok(CpuSampler {
      sample_interval,
    })
  }

  pub(super) fn stop_and_collect(sampler: CpuSampler) -> CpuProfile {
    clear_timer();
    ACTIVE.store(false, Ordering::SeqCst);

    let mut raw = Vec::new();
    while let Some(sample) = samples().pop() {
      raw.push(sample);
    }

    let hits = aggregate_hits(
      raw
        .iter()
        .map(|sample| &sample.ips[..sample.depth.min(MAX_FRAMES)]),
    );

    let nodes = hits
      .into_iter()
      .map(|(ip, hit_count)| CpuNode {
        frame: stack::resolve_ip(ip as *mut std::ffi::c_void),
        hit_count,
      })
      .collect();

    CpuProfile {
      dropped_samples: DROPPED.swap(0, Ordering::SeqCst),
      nodes,
      sample_interval: sampler.sample_interval,
    }
  }

  /// Count samples per executing frame: the first instruction pointer after
  /// the signal-delivery frames is the code that was running.
  fn aggregate_hits<'a, I>(
    stacks: I,
  ) -> std::collections::HashMap<
    usize,
    u64,
    nohash_hasher::BuildNoHashHasher<usize>,
  >
  where
    I: Iterator<Item = &'a [usize]>,
  {
    let mut hits = std::collections::HashMap::default();

    for ips in stacks {
      let Some(ip) = ips.get(SIGNAL_SKIP_FRAMES).or_else(|| ips.last())
      else {
        continue;
      };

      *hits.entry(*ip).or_insert(0) += 1;
    }

    hits
  }

}

#[cfg(not(unix))]
mod imp {
  use std::time::Duration;

  use super::{CpuSampler, UNSUPPORTED_HINT};
  use crate::error::ProfilerError;
  use crate::sampler::CpuProfile;

  pub(super) fn start(
    _sample_interval: Duration,
  ) -> Result<CpuSampler, ProfilerError> {
    Err(ProfilerError::AdapterUnavailable {
      detail: "SIGPROF interval timers are not available on this platform"
        .to_string(),
      remediation: UNSUPPORTED_HINT,
    })
  }

  pub(super) fn stop_and_collect(sampler: CpuSampler) -> CpuProfile {
    CpuProfile {
      dropped_samples: 0,
      nodes: Vec::new(),
      sample_interval: sampler.sample_interval,
    }
  }
}

impl CpuSampler {
  /// Whether this platform can deliver CPU samples at all.
  #[must_use]
  pub(crate) fn is_supported() -> bool {
    cfg!(unix)
  }

  /// Arm the profiling timer and begin collecting samples.
  pub(crate) fn start(
    sample_interval: Duration,
  ) -> Result<Self, ProfilerError> {
    imp::start(sample_interval)
  }

  /// Disarm the timer and fold the raw samples into per-frame hit counts.
  #[must_use]
  pub(crate) fn stop_and_collect(self) -> CpuProfile {
    imp::stop_and_collect(self)
  }
}
