use std::{
  fmt::{self, Display, Formatter},
  sync::{Mutex, MutexGuard},
};

use serde::{Serialize, Serializer, ser::SerializeStruct};
use sysinfo::{Pid, ProcessesToUpdate, System};

use crate::heap_sampler;

/// Render a byte magnitude as a short human-readable string.
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
  const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

  if bytes < 1024 {
    return format!("{bytes} B");
  }

  let mut value = bytes as f64;
  let mut unit = 0;

  while value >= 1024.0 && unit < UNITS.len() - 1 {
    value /= 1024.0;
    unit += 1;
  }

  format!("{value:.1} {}", UNITS[unit])
}

fn format_signed_bytes(delta: i64) -> String {
  let magnitude = format_bytes(delta.unsigned_abs());

  if delta < 0 {
    format!("-{magnitude}")
  } else {
    format!("+{magnitude}")
  }
}

/// Point-in-time process memory counters, in bytes.
///
/// `heap_used`/`heap_total` come from the sampling allocator's live and peak
/// counters when it is installed, and read zero otherwise; `external` is
/// resident memory not attributed to the tracked heap.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct MemoryUsage {
  pub external_bytes: u64,
  pub heap_total_bytes: u64,
  pub heap_used_bytes: u64,
  pub rss_bytes: u64,
}

impl MemoryUsage {
  /// Difference between this reading and an earlier baseline.
  #[must_use]
  pub fn delta(&self, baseline: &Self) -> MemoryDelta {
    MemoryDelta {
      external_delta: signed_delta(self.external_bytes, baseline.external_bytes),
      heap_used_delta: signed_delta(self.heap_used_bytes, baseline.heap_used_bytes),
      rss_delta: signed_delta(self.rss_bytes, baseline.rss_bytes),
    }
  }
}

impl Display for MemoryUsage {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "heap {} / {}, rss {}, external {}",
      format_bytes(self.heap_used_bytes),
      format_bytes(self.heap_total_bytes),
      format_bytes(self.rss_bytes),
      format_bytes(self.external_bytes),
    )
  }
}

impl Serialize for MemoryUsage {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    let mut state = serializer.serialize_struct("MemoryUsage", 4)?;
    state.serialize_field("heap", &format_bytes(self.heap_used_bytes))?;
    state.serialize_field("heap_total", &format_bytes(self.heap_total_bytes))?;
    state.serialize_field("rss", &format_bytes(self.rss_bytes))?;
    state.serialize_field("external", &format_bytes(self.external_bytes))?;
    state.end()
  }
}

/// Signed change between two memory readings.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct MemoryDelta {
  pub external_delta: i64,
  pub heap_used_delta: i64,
  pub rss_delta: i64,
}

impl Display for MemoryDelta {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "heap {}, rss {}, external {}",
      format_signed_bytes(self.heap_used_delta),
      format_signed_bytes(self.rss_delta),
      format_signed_bytes(self.external_delta),
    )
  }
}

fn signed_delta(newer: u64, older: u64) -> i64 {
  i64::try_from(newer)
    .unwrap_or(i64::MAX)
    .saturating_sub(i64::try_from(older).unwrap_or(i64::MAX))
}

/// Reads current process memory counters. Reads never fail; counters the
/// host cannot provide are reported as zero.
#[derive(Debug)]
pub struct MemoryReader {
  pid: Pid,
  system: Mutex<System>,
}

impl Default for MemoryReader {
  fn default() -> Self {
    Self::new()
  }
}

impl MemoryReader {
  #[must_use]
  pub fn new() -> Self {
    Self {
      pid: Pid::from_u32(std::process::id()),
      system: Mutex::new(System::new()),
    }
  }

  /// Take a point-in-time reading.
  #[must_use]
  pub fn read(&self) -> MemoryUsage {
    let rss_bytes = {
      let mut system = lock_system(&self.system);
      system.refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);
      system.process(self.pid).map_or(0, |process| process.memory())
    };

    let heap_used_bytes = heap_sampler::live_bytes();
    let heap_total_bytes = heap_sampler::peak_bytes();

    MemoryUsage {
      external_bytes: rss_bytes.saturating_sub(heap_used_bytes),
      heap_total_bytes,
      heap_used_bytes,
      rss_bytes,
    }
  }
}

fn lock_system(lock: &Mutex<System>) -> MutexGuard<'_, System> {
  match lock.lock() {
    Ok(guard) => guard,
    Err(poisoned) => poisoned.into_inner(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn formats_magnitudes() {
    assert_eq!(format_bytes(0), "0 B");
    assert_eq!(format_bytes(512), "512 B");
    assert_eq!(format_bytes(2048), "2.0 KB");
    assert_eq!(format_bytes(1536 * 1024), "1.5 MB");
    assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.0 GB");
  }

  #[test]
  fn delta_is_signed() {
    let earlier = MemoryUsage {
      external_bytes: 100,
      heap_total_bytes: 4096,
      heap_used_bytes: 2048,
      rss_bytes: 8192,
    };
    let later = MemoryUsage {
      external_bytes: 50,
      heap_total_bytes: 4096,
      heap_used_bytes: 4096,
      rss_bytes: 4096,
    };

    let delta = later.delta(&earlier);
    assert_eq!(delta.heap_used_delta, 2048);
    assert_eq!(delta.rss_delta, -4096);
    assert_eq!(delta.external_delta, -50);
    assert_eq!(delta.to_string(), "heap +2.0 KB, rss -4.0 KB, external -50 B");
  }

  #[test]
  fn reader_reports_current_process() {
    let reader = MemoryReader::new();
    let usage = reader.read();

    // The test binary is certainly resident.
    assert!(usage.rss_bytes > 0);
    assert!(usage.external_bytes <= usage.rss_bytes);
  }

  #[test]
  fn usage_serializes_formatted_fields() {
    let usage = MemoryUsage {
      external_bytes: 1024,
      heap_total_bytes: 2048,
      heap_used_bytes: 1024,
      rss_bytes: 2048,
    };

    let encoded = serde_json::to_string(&usage).expect("serialize usage");
    assert!(encoded.contains("\"heap\":\"1.0 KB\""));
    assert!(encoded.contains("\"rss\":\"2.0 KB\""));
  }
}
