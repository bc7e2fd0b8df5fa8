use std::time::{Duration, SystemTime};

use tickprof::{
  Checkpoints, ContinuousProfiler, InProcessBackend, InsightStreamWriter,
  JsonLinesWriter, SamplingAllocator,
};

#[global_allocator]
static ALLOC: SamplingAllocator = SamplingAllocator::system();

fn main() -> Result<(), Box<dyn std::error::Error>> {
  let profiler = ContinuousProfiler::builder()
    .backend(
      InProcessBackend::new().with_heap_sampling_interval_bytes(64 * 1024),
    )
    .cpu_profiling(cfg!(unix))
    .interval(Duration::from_secs(5))
    .max_memory_budget_mb(100)
    .build()?;

  profiler.start_continuous_profiling()?;

  let mut checkpoints = Checkpoints::new();
  let mut scratch = Vec::new();

  for round in 0..3u32 {
    for index in 0..100_000u64 {
      scratch.push(index.to_string());
    }
    scratch.clear();

    checkpoints.mark(format!("round {round}"));
    std::thread::sleep(Duration::from_millis(100));
  }

  let insights = profiler.flush_current_interval()?;

  let mut writer = JsonLinesWriter::new(std::io::stdout());
  writer.write_insights(&insights, Some(SystemTime::now()))?;

  println!("{}", checkpoints.summary());

  profiler.stop_continuous_profiling()?;

  Ok(())
}
