use std::{
  sync::{Arc, Condvar, Mutex, MutexGuard},
  thread,
  time::{Duration, Instant},
};

/// Recurring flush trigger for an active profiling session.
///
/// One live scheduler exists per session. The callback runs on the scheduler
/// thread, so fires can never stack: the next period only begins counting
/// once the previous `on_fire` has returned.
#[derive(Debug)]
pub(crate) struct IntervalScheduler {
  handle: Option<thread::JoinHandle<()>>,
  signal: Arc<(Mutex<bool>, Condvar)>,
}

impl IntervalScheduler {
  /// Start a repeating trigger that invokes `on_fire` once per period.
  pub(crate) fn arm<F>(period: Duration, mut on_fire: F) -> Self
  where
    F: FnMut() + Send + 'static,
  {
    let signal = Arc::new((Mutex::new(false), Condvar::new()));
    let thread_signal = Arc::clone(&signal);

    let handle = thread::Builder::new()
      .name("tickprof-interval".to_string())
      .spawn(move || {
        let (lock, condvar) = &*thread_signal;

        loop {
          let deadline = Instant::now() + period;
          let mut disarmed = lock_flag(lock);

          while !*disarmed {
            let now = Instant::now();
            if now >= deadline {
              break;
            }

            disarmed = match condvar.wait_timeout(disarmed, deadline - now) {
              Ok((guard, _)) => guard,
              Err(poisoned) => poisoned.into_inner().0,
            };
          }

          if *disarmed {
            return;
          }

          drop(disarmed);
          on_fire();
        }
      })
      .ok();

    Self {
      handle,
      signal,
    }
  }

  /// Cancel all pending fires. Waits for an in-flight fire to complete,
  /// except when called from the scheduler thread itself, where the thread is
  /// detached instead. Idempotent.
  pub(crate) fn disarm(mut self) {
    self.disarm_inner();
  }

  fn disarm_inner(&mut self) {
    {
      let (lock, condvar) = &*self.signal;
      let mut disarmed = lock_flag(lock);
      *disarmed = true;
      condvar.notify_all();
    }

    let Some(handle) = self.handle.take() else {
      return;
    };

    if handle.thread().id() == thread::current().id() {
      // Joining ourselves would deadlock; the disarm flag is already set, so
      // the thread exits on its own.
      return;
    }

    let _ = handle.join();
  }
}

impl Drop for IntervalScheduler {
  fn drop(&mut self) {
    self.disarm_inner();
  }
}

fn lock_flag(lock: &Mutex<bool>) -> MutexGuard<'_, bool> {
  match lock.lock() {
    Ok(guard) => guard,
    Err(poisoned) => poisoned.into_inner(),
  }
}
