use std::{
  sync::{
    Arc, Mutex, MutexGuard,
    atomic::{AtomicU64, Ordering},
  },
  time::{Duration, Instant},
};

use crate::{
  backend::InProcessBackend,
  budget::{self, BudgetWarning},
  config::ProfilerConfig,
  error::ProfilerError,
  extract,
  insights::Insights,
  memory::MemoryReader,
  report::{ConsoleSink, ReportSink},
  sampler::{GcStats, RawProfileBundle, SamplingBackend},
  scheduler::IntervalScheduler,
};

/// Configures a [`ContinuousProfiler`] before any session exists.
///
/// `max_memory_budget_mb` is the one mandatory field; building without it
/// fails. Warnings from pre-flight budget validation are delivered to the
/// report sink at build time unless suppressed; suppression skips only the
/// delivery, never the validation itself.
pub struct ProfilerBuilder {
  backend: Box<dyn SamplingBackend>,
  cpu_profiling: bool,
  interval: Duration,
  max_memory_budget_mb: Option<u32>,
  sampling_heap_profiler: bool,
  sink: Box<dyn ReportSink>,
  streaming_mode: bool,
  suppress_warnings: bool,
}

impl Default for ProfilerBuilder {
  fn default() -> Self {
    Self::new()
  }
}

impl ProfilerBuilder {
  /// Replace the injected sampling backend. Defaults to the in-process
  /// backend.
  #[must_use]
  pub fn backend(mut self, backend: impl SamplingBackend + 'static) -> Self {
    self.backend = Box::new(backend);
    self
  }

  /// Validate the configuration and construct the profiler.
  ///
  /// # Errors
  ///
  /// Returns [`ProfilerError::MissingRequiredConfig`] when no memory budget
  /// was provided.
  pub fn build(self) -> Result<ContinuousProfiler, ProfilerError> {
    let max_memory_budget_mb = self
      .max_memory_budget_mb
      .ok_or(ProfilerError::MissingRequiredConfig("max_memory_budget_mb"))?;

    let mut config = ProfilerConfig::new(max_memory_budget_mb);
    config.cpu_profiling = self.cpu_profiling;
    config.interval = self.interval;
    config.sampling_heap_profiler = self.sampling_heap_profiler;
    config.streaming_mode = self.streaming_mode;
    config.suppress_warnings = self.suppress_warnings;

    let warnings = budget::validate(
      max_memory_budget_mb,
      config.interval_minutes(),
      config.cpu_profiling,
      config.sampling_heap_profiler,
    );

    if !config.suppress_warnings {
      for warning in &warnings {
        self.sink.warn(&warning.to_string());
      }
    }

    Ok(ContinuousProfiler {
      inner: Arc::new(ProfilerInner {
        config,
        memory: MemoryReader::new(),
        retained_estimate_bytes: AtomicU64::new(0),
        scheduler: Mutex::new(None),
        session: Mutex::new(SessionSlot {
          active: None,
          backend: self.backend,
        }),
        sink: self.sink,
        warnings,
      }),
    })
  }

  #[must_use]
  pub fn cpu_profiling(mut self, enabled: bool) -> Self {
    self.cpu_profiling = enabled;
    self
  }

  #[must_use]
  pub fn interval(mut self, interval: Duration) -> Self {
    self.interval = interval;
    self
  }

  #[must_use]
  pub fn interval_minutes(mut self, minutes: u32) -> Self {
    self.interval = Duration::from_secs(u64::from(minutes) * 60);
    self
  }

  /// The hard ceiling on estimated retained profiling data. Mandatory.
  #[must_use]
  pub fn max_memory_budget_mb(mut self, budget_mb: u32) -> Self {
    self.max_memory_budget_mb = Some(budget_mb);
    self
  }

  #[must_use]
  pub fn new() -> Self {
    Self {
      backend: Box::new(InProcessBackend::new()),
      cpu_profiling: true,
      interval: ProfilerConfig::DEFAULT_INTERVAL,
      max_memory_budget_mb: None,
      sampling_heap_profiler: true,
      sink: Box::new(ConsoleSink),
      streaming_mode: true,
      suppress_warnings: false,
    }
  }

  /// Replace the report sink. Defaults to the console-equivalent sink.
  #[must_use]
  pub fn report_sink(mut self, sink: impl ReportSink + 'static) -> Self {
    self.sink = Box::new(sink);
    self
  }

  #[must_use]
  pub fn sampling_heap_profiler(mut self, enabled: bool) -> Self {
    self.sampling_heap_profiler = enabled;
    self
  }

  #[must_use]
  pub fn streaming_mode(mut self, enabled: bool) -> Self {
    self.streaming_mode = enabled;
    self
  }

  #[must_use]
  pub fn suppress_warnings(mut self, suppress: bool) -> Self {
    self.suppress_warnings = suppress;
    self
  }
}

#[derive(Debug)]
struct ActiveSession {
  cpu: bool,
  gc_baseline: GcStats,
  heap: bool,
  last_flush: Instant,
  started_at: Instant,
}

struct SessionSlot {
  active: Option<ActiveSession>,
  backend: Box<dyn SamplingBackend>,
}

struct ProfilerInner {
  config: ProfilerConfig,
  memory: MemoryReader,
  /// Estimated serialized size of raw data currently held by a flush.
  /// Effectively zero whenever no flush is mid-extraction, because raw
  /// bundles are discarded as soon as insights exist.
  retained_estimate_bytes: AtomicU64,
  scheduler: Mutex<Option<IntervalScheduler>>,
  session: Mutex<SessionSlot>,
  sink: Box<dyn ReportSink>,
  warnings: Vec<BudgetWarning>,
}

impl ProfilerInner {
  fn budget_exceeded(&self) -> bool {
    self.memory_usage_mb() > f64::from(self.config.max_memory_budget_mb)
  }

  /// One flush cycle under the session lock: stop, collect, restart
  /// (when `restart` is set), extract, discard the raw bundle.
  fn flush_locked(
    &self,
    slot: &mut SessionSlot,
    restart: bool,
  ) -> Result<Insights, ProfilerError> {
    let Some(active) = slot.active.as_mut() else {
      return Err(ProfilerError::NotRunning);
    };

    let (cpu, heap) = (active.cpu, active.heap);

    let bundle = match slot.backend.stop_and_collect(cpu, heap) {
      Ok(bundle) => bundle,
      Err(error) => {
        // One bad sample set must not kill a long-running session.
        self
          .sink
          .debug(&format!("profile collection degraded: {error}"));
        RawProfileBundle::empty()
      }
    };

    if restart {
      slot.backend.start_sampling(cpu, heap)?;
    }

    self
      .retained_estimate_bytes
      .store(bundle.estimated_size_bytes(), Ordering::SeqCst);

    if !self.config.suppress_warnings && self.budget_exceeded() {
      self.sink.warn(&format!(
        "collected profiling data (~{:.1} MB) exceeds the {} MB budget",
        self.memory_usage_mb(),
        self.config.max_memory_budget_mb
      ));
    }

    let now = Instant::now();
    let duration = now.duration_since(active.last_flush);
    active.last_flush = now;

    let gc_now = slot.backend.gc_stats();
    let gc_delta = gc_now.since(&active.gc_baseline);
    active.gc_baseline = gc_now;

    let insights = Insights {
      duration_ms: duration.as_millis() as u64,
      gc_impact: extract::gc_impact(gc_delta),
      memory_hotspots: extract::memory_hotspots(bundle.heap.as_ref()),
      memory_usage: self.memory.read(),
      top_functions: extract::top_functions(bundle.cpu.as_ref(), duration),
    };

    // The raw bundle dies here; only the capped insights survive.
    drop(bundle);
    self.retained_estimate_bytes.store(0, Ordering::SeqCst);

    Ok(insights)
  }

  fn lock_scheduler(&self) -> MutexGuard<'_, Option<IntervalScheduler>> {
    match self.scheduler.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    }
  }

  fn lock_session(&self) -> MutexGuard<'_, SessionSlot> {
    match self.session.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    }
  }

  fn memory_usage_mb(&self) -> f64 {
    self.retained_estimate_bytes.load(Ordering::SeqCst) as f64
      / (1024.0 * 1024.0)
  }

  fn timer_flush(&self) {
    let mut slot = self.lock_session();

    match self.flush_locked(&mut slot, true) {
      Ok(insights) => self.sink.log(&insights.summary()),
      // A failed fire is reported but never disarms the interval.
      Err(error) => {
        self.sink.warn(&format!("interval flush failed: {error}"));
      }
    }
  }
}

impl Drop for ProfilerInner {
  fn drop(&mut self) {
    let slot = match self.session.get_mut() {
      Ok(slot) => slot,
      Err(poisoned) => poisoned.into_inner(),
    };

    if slot.active.take().is_some() {
      slot.backend.close();
    }
  }
}

/// Entry point for continuous, interval-bounded profiling.
///
/// At most one session is active per profiler. All session-mutating
/// operations serialize through one lock, because the native facility has no
/// concept of concurrent stop/start. Cloning shares the same session.
#[derive(Clone)]
pub struct ContinuousProfiler {
  inner: Arc<ProfilerInner>,
}

impl ContinuousProfiler {
  /// Warnings computed by pre-flight budget validation, whether or not they
  /// were delivered.
  #[must_use]
  pub fn budget_warnings(&self) -> &[BudgetWarning] {
    &self.inner.warnings
  }

  #[must_use]
  pub fn builder() -> ProfilerBuilder {
    ProfilerBuilder::new()
  }

  #[must_use]
  pub fn config(&self) -> &ProfilerConfig {
    &self.inner.config
  }

  /// The controller's advisory estimate of retained raw profiling data, in
  /// megabytes. Valid in any state.
  #[must_use]
  pub fn current_memory_usage_mb(&self) -> f64 {
    self.inner.memory_usage_mb()
  }

  /// Stop sampling, extract insights, and restart sampling without a gap.
  ///
  /// # Errors
  ///
  /// Returns [`ProfilerError::NotRunning`] outside a session, or a backend
  /// error if sampling could not be restarted.
  pub fn flush_current_interval(&self) -> Result<Insights, ProfilerError> {
    let mut slot = self.inner.lock_session();
    self.inner.flush_locked(&mut slot, true)
  }

  /// Whether the advisory estimate currently exceeds the configured budget.
  /// Valid in any state; never triggers enforcement.
  #[must_use]
  pub fn is_memory_budget_exceeded(&self) -> bool {
    self.inner.budget_exceeded()
  }

  #[must_use]
  pub fn is_running(&self) -> bool {
    self.inner.lock_session().active.is_some()
  }

  /// Open the sampling session and arm the interval scheduler.
  ///
  /// # Errors
  ///
  /// Returns [`ProfilerError::AlreadyRunning`] when a session exists, or
  /// [`ProfilerError::AdapterUnavailable`] when the host lacks the sampling
  /// facility. The latter is fatal for this process invocation and is not
  /// retried internally.
  pub fn start_continuous_profiling(&self) -> Result<(), ProfilerError> {
    let inner = &self.inner;

    {
      let mut slot = inner.lock_session();

      if slot.active.is_some() {
        return Err(ProfilerError::AlreadyRunning);
      }

      slot.backend.open()?;

      let cpu = inner.config.cpu_profiling;
      let heap = inner.config.sampling_heap_profiler;

      if let Err(error) = slot.backend.start_sampling(cpu, heap) {
        slot.backend.close();
        return Err(error);
      }

      let now = Instant::now();
      slot.active = Some(ActiveSession {
        cpu,
        gc_baseline: slot.backend.gc_stats(),
        heap,
        last_flush: now,
        started_at: now,
      });
    }

    let weak = Arc::downgrade(&self.inner);
    let scheduler = IntervalScheduler::arm(inner.config.interval, move || {
      if let Some(inner) = weak.upgrade() {
        inner.timer_flush();
      }
    });
    *inner.lock_scheduler() = Some(scheduler);

    inner.sink.log(&format!(
      "continuous profiling started (interval {:.0} min, budget {} MB)",
      inner.config.interval_minutes(),
      inner.config.max_memory_budget_mb
    ));

    Ok(())
  }

  /// Disarm the scheduler, run one terminal flush, and close the session.
  ///
  /// The scheduler is disarmed before the session lock is taken, so an
  /// in-flight timer flush completes first and no final data is lost.
  ///
  /// # Errors
  ///
  /// Returns [`ProfilerError::NotRunning`] outside a session.
  pub fn stop_continuous_profiling(&self) -> Result<Insights, ProfilerError> {
    let scheduler = self.inner.lock_scheduler().take();
    if let Some(scheduler) = scheduler {
      scheduler.disarm();
    }

    let mut slot = self.inner.lock_session();
    let insights = self.inner.flush_locked(&mut slot, false)?;

    slot.backend.close();

    if let Some(active) = slot.active.take() {
      self.inner.sink.log(&format!(
        "continuous profiling stopped after {:.0}s",
        active.started_at.elapsed().as_secs_f64()
      ));
    }

    Ok(insights)
  }
}
