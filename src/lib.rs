//! Core library entry point for the tickprof continuous profiler.
//!
//! The goal of this crate is to provide a low-overhead, interval-bounded
//! profiling loop for long-running processes: a sampling session is flushed
//! on a timer into compact, capped insight reports, and sampling restarts
//! without gaps so retained raw data never grows unbounded.

mod backend;
mod budget;
mod config;
mod cpu_sampler;
mod error;
mod export;
mod extract;
mod heap_sampler;
mod insights;
mod memory;
mod profiler;
mod report;
mod sampler;
mod scheduler;
mod stack;
mod timing;

pub use {
  backend::InProcessBackend,
  budget::{
    BudgetEstimate, BudgetWarning, CPU_PROFILE_MB_PER_MINUTE,
    HEAP_PROFILE_MB_PER_MINUTE, estimate_mb_per_minute, project, validate,
  },
  config::ProfilerConfig,
  cpu_sampler::DEFAULT_SAMPLE_INTERVAL,
  error::ProfilerError,
  export::{
    ExportError, InsightStreamWriter, JsonLinesWriter, MmapJsonStreamWriter,
  },
  extract::{INSIGHT_CAP, gc_impact, memory_hotspots, top_functions},
  heap_sampler::{
    DEFAULT_SAMPLING_INTERVAL_BYTES, SamplingAllocator, allocator_installed,
  },
  insights::{AllocationHotspot, FunctionInsight, GcImpact, Insights},
  memory::{MemoryDelta, MemoryReader, MemoryUsage, format_bytes},
  profiler::{ContinuousProfiler, ProfilerBuilder},
  report::{ConsoleSink, NoopSink, ReportSink, TracingSink},
  sampler::{
    CpuNode, CpuProfile, GcStats, HeapProfile, HeapSample, RawProfileBundle,
    SamplingBackend,
  },
  stack::{FrameMetadata, StackId, StackMetadata, StackTable},
  timing::{Checkpoints, time_call},
};
