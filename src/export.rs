use std::{
  fmt::{self, Display, Formatter},
  fs::OpenOptions,
  io::{self, Write},
  path::Path,
  time::SystemTime,
};

use memmap2::MmapMut;
use serde::Serialize;

use crate::insights::Insights;

/// Errors that can occur when exporting or streaming insights.
#[derive(Debug)]
pub enum ExportError {
  Io(io::Error),
  Json(serde_json::Error),
}

impl Display for ExportError {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    match self {
      Self::Io(err) => write!(f, "i/o error during export: {err}"),
      Self::Json(err) => write!(f, "failed to encode insights as json: {err}"),
    }
  }
}

impl std::error::Error for ExportError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      Self::Io(err) => Some(err),
      Self::Json(err) => Some(err),
    }
  }
}

impl From<io::Error> for ExportError {
  fn from(value: io::Error) -> Self {
    Self::Io(value)
  }
}

impl From<serde_json::Error> for ExportError {
  fn from(value: serde_json::Error) -> Self {
    Self::Json(value)
  }
}

/// Streaming interface for insight consumers.
pub trait InsightStreamWriter {
  /// # Errors
  ///
  /// Returns an `ExportError` if the insights cannot be serialized or if
  /// the underlying writer fails to persist the data.
  fn write_insights(
    &mut self,
    insights: &Insights,
    timestamp: Option<SystemTime>,
  ) -> Result<(), ExportError>;
}

/// JSON lines exporter that writes one JSON object per flush.
pub struct JsonLinesWriter<W: Write> {
  writer: W,
}

impl<W: Write> InsightStreamWriter for JsonLinesWriter<W> {
  fn write_insights(
    &mut self,
    insights: &Insights,
    timestamp: Option<SystemTime>,
  ) -> Result<(), ExportError> {
    let chunk = StreamChunk::new(insights, timestamp);
    serde_json::to_writer(&mut self.writer, &chunk)?;
    self.writer.write_all(b"\n")?;
    Ok(())
  }
}

impl<W: Write> JsonLinesWriter<W> {
  pub fn into_inner(self) -> W {
    self.writer
  }

  pub fn new(writer: W) -> Self {
    Self { writer }
  }
}

/// Streaming writer backed by an mmap'd file of fixed capacity.
pub struct MmapJsonStreamWriter {
  mmap: MmapMut,
  position: usize,
}

impl InsightStreamWriter for MmapJsonStreamWriter {
  fn write_insights(
    &mut self,
    insights: &Insights,
    timestamp: Option<SystemTime>,
  ) -> Result<(), ExportError> {
    let chunk = StreamChunk::new(insights, timestamp);
    let mut encoded = serde_json::to_vec(&chunk)?;
    encoded.push(b'\n');
    self.write_bytes(&encoded)?;
    Ok(())
  }
}

impl MmapJsonStreamWriter {
  /// # Errors
  ///
  /// Returns an error if the backing file cannot be created, resized, or
  /// mapped into memory.
  pub fn create(path: impl AsRef<Path>, capacity: usize) -> io::Result<Self> {
    let capacity = capacity.max(1);

    let file = OpenOptions::new()
      .create(true)
      .write(true)
      .read(true)
      .truncate(true)
      .open(path)?;

    let capacity_u64 = u64::try_from(capacity)
      .map_err(|_| io::Error::other("capacity exceeds u64"))?;

    file.set_len(capacity_u64)?;

    // SAFETY: the file handle remains open for the lifetime of the mapping.
    let mmap = unsafe { MmapMut::map_mut(&file)? };

    Ok(Self { mmap, position: 0 })
  }

  /// # Errors
  ///
  /// Returns an error if flushing the memory-mapped region fails.
  pub fn flush(&self) -> io::Result<()> {
    self.mmap.flush_async()?;
    Ok(())
  }

  /// # Errors
  ///
  /// Returns an error if the write would exceed the reserved capacity.
  fn write_bytes(&mut self, data: &[u8]) -> io::Result<()> {
    let Some(end) = self.position.checked_add(data.len()) else {
      return Err(io::Error::other("mmap position overflow"));
    };

    if end > self.mmap.len() {
      return Err(io::Error::new(
        io::ErrorKind::WriteZero,
        "mmap capacity exceeded",
      ));
    }

    self.mmap[self.position..end].copy_from_slice(data);

    self.position = end;

    Ok(())
  }
}

#[derive(Serialize)]
struct StreamChunk<'a> {
  insights: &'a Insights,
  #[serde(skip_serializing_if = "Option::is_none")]
  timestamp_ns: Option<u128>,
}

impl<'a> StreamChunk<'a> {
  fn new(insights: &'a Insights, timestamp: Option<SystemTime>) -> Self {
    Self {
      insights,
      timestamp_ns: timestamp.and_then(system_time_to_nanos),
    }
  }
}

fn system_time_to_nanos(ts: SystemTime) -> Option<u128> {
  ts.duration_since(SystemTime::UNIX_EPOCH)
    .ok()
    .map(|duration| duration.as_nanos())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::insights::GcImpact;
  use crate::memory::MemoryUsage;

  fn sample_insights() -> Insights {
    Insights {
      duration_ms: 500,
      gc_impact: GcImpact::default(),
      memory_hotspots: Vec::new(),
      memory_usage: MemoryUsage::default(),
      top_functions: Vec::new(),
    }
  }

  #[test]
  fn json_lines_writer_emits_one_line_per_flush() {
    let mut writer = JsonLinesWriter::new(Vec::new());

    writer
      .write_insights(&sample_insights(), None)
      .expect("write first flush");
    writer
      .write_insights(&sample_insights(), Some(SystemTime::now()))
      .expect("write second flush");

    let output = String::from_utf8(writer.into_inner()).expect("utf8 output");
    let lines: Vec<&str> = output.lines().collect();

    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("\"duration_ms\":500"));
    assert!(!lines[0].contains("timestamp_ns"));
    assert!(lines[1].contains("timestamp_ns"));
  }

  #[test]
  fn mmap_writer_respects_its_capacity() {
    let path = std::env::temp_dir().join(format!(
      "tickprof-export-test-{}.jsonl",
      std::process::id()
    ));

    {
      let mut writer =
        MmapJsonStreamWriter::create(&path, 16).expect("create mmap writer");

      let result = writer.write_insights(&sample_insights(), None);
      assert!(result.is_err(), "16 bytes cannot hold an insight chunk");
    }

    {
      let mut writer = MmapJsonStreamWriter::create(&path, 64 * 1024)
        .expect("create mmap writer");

      writer
        .write_insights(&sample_insights(), None)
        .expect("write within capacity");
      writer.flush().expect("flush mapping");
    }

    let _ = std::fs::remove_file(&path);
  }
}
