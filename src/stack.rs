use std::{
  ffi::OsStr,
  sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
  },
};

use backtrace::{Frame, SymbolName};
use dashmap::DashMap;
use nohash_hasher::BuildNoHashHasher;

/// Unique identifier for an interned stack trace.
pub type StackId = u64;

/// Metadata describing a single frame in a stack trace.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct FrameMetadata {
  pub filename: Arc<str>,
  pub function: Arc<str>,
  pub lineno: u32,
}

impl FrameMetadata {
  #[must_use]
  pub fn new(
    filename: impl Into<String>,
    function: impl Into<String>,
    lineno: u32,
  ) -> Self {
    Self {
      filename: Arc::<str>::from(filename.into()),
      function: Arc::<str>::from(function.into()),
      lineno,
    }
  }

  /// Human-readable allocation-site label: `function (file:line)`.
  #[must_use]
  pub fn site_label(&self) -> String {
    format!("{} ({}:{})", self.function, self.filename, self.lineno)
  }
}

/// Resolved metadata for an interned stack trace.
#[derive(Debug, Clone)]
pub struct StackMetadata {
  frames: Arc<[FrameMetadata]>,
  id: StackId,
}

impl StackMetadata {
  #[must_use]
  pub fn frames(&self) -> &[FrameMetadata] {
    &self.frames
  }

  #[must_use]
  pub fn id(&self) -> StackId {
    self.id
  }

  #[must_use]
  pub fn top_frame(&self) -> Option<&FrameMetadata> {
    self.frames.first()
  }
}

/// Interns stack traces and provides their resolved metadata.
///
/// Both samplers intern through the same table, so lookups must not serialize
/// behind one lock; the maps are sharded and identifiers are handed out from
/// an atomic counter.
#[derive(Debug, Default)]
pub struct StackTable {
  by_frames: DashMap<Vec<FrameMetadata>, StackId>,
  by_id: DashMap<StackId, Arc<StackMetadata>, BuildNoHashHasher<StackId>>,
  next_id: AtomicU64,
}

impl StackTable {
  /// Intern the provided stack frames and return their stable identifier.
  pub fn intern<I>(&self, frames: I) -> StackId
  where
    I: Into<Vec<FrameMetadata>>,
  {
    let frames: Vec<FrameMetadata> = frames.into();

    if let Some(existing) = self.by_frames.get(&frames) {
      return *existing;
    }

    let stack_id = *self
      .by_frames
      .entry(frames.clone())
      .or_insert_with(|| self.next_id.fetch_add(1, Ordering::Relaxed) + 1);

    self.by_id.entry(stack_id).or_insert_with(|| {
      Arc::new(StackMetadata {
        frames: Arc::from(frames.into_boxed_slice()),
        id: stack_id,
      })
    });

    stack_id
  }

  #[must_use]
  pub fn new() -> Self {
    Self::default()
  }

  /// Resolve a stack identifier back into its metadata, if known.
  #[must_use]
  pub fn resolve(&self, stack_id: StackId) -> Option<Arc<StackMetadata>> {
    self.by_id.get(&stack_id).map(|entry| Arc::clone(&entry))
  }
}

/// Capture the current native call stack, skipping the capture machinery
/// itself, and resolve it into frame metadata.
#[must_use]
pub(crate) fn capture_frames(
  max_depth: usize,
  skip_frames: usize,
) -> Vec<FrameMetadata> {
  let mut frames = Vec::with_capacity(max_depth);
  let mut remaining_skip = skip_frames;

  backtrace::trace(|frame| {
    if remaining_skip > 0 {
      remaining_skip -= 1;
      return true;
    }

    if frames.len() >= max_depth {
      return false;
    }

    frames.push(extract_metadata(frame));
    true
  });

  frames
}

fn extract_metadata(frame: &Frame) -> FrameMetadata {
  let mut filename = None;
  let mut function = None;
  let mut lineno = None;

  backtrace::resolve_frame(frame, |symbol| {
    if filename.is_none() {
      filename = symbol
        .filename()
        .and_then(|path| path_to_string(path))
        .map(str::to_string);
    }

    if function.is_none() {
      function = symbol.name().map(|name| symbol_name_to_string(&name));
    }

    if lineno.is_none() {
      lineno = symbol.lineno();
    }
  });

  FrameMetadata::new(
    filename.unwrap_or_else(|| "<native>".to_string()),
    function.unwrap_or_else(|| "<unknown>".to_string()),
    lineno.unwrap_or(0),
  )
}

/// Resolve a raw instruction pointer captured off the symbolization path.
#[must_use]
pub(crate) fn resolve_ip(ip: *mut std::ffi::c_void) -> FrameMetadata {
  let mut filename = None;
  let mut function = None;
  let mut lineno = None;

  backtrace::resolve(ip, |symbol| {
    if filename.is_none() {
      filename = symbol
        .filename()
        .and_then(|path| path_to_string(path))
        .map(str::to_string);
    }

    if function.is_none() {
      function = symbol.name().map(|name| symbol_name_to_string(&name));
    }

    if lineno.is_none() {
      lineno = symbol.lineno();
    }
  });

  FrameMetadata::new(
    filename.unwrap_or_else(|| "<native>".to_string()),
    function.unwrap_or_else(|| "<unknown>".to_string()),
    lineno.unwrap_or(0),
  )
}

fn path_to_string(path: &std::path::Path) -> Option<&str> {
  path
    .to_str()
    .or_else(|| path.file_name().and_then(OsStr::to_str))
}

fn symbol_name_to_string(name: &SymbolName<'_>) -> String {
  format!("{name}")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn interns_and_reuses_stack_ids() {
    let table = StackTable::new();
    let frames = vec![
      FrameMetadata::new("file.rs", "func", 10),
      FrameMetadata::new("other.rs", "helper", 3),
    ];
    let first = table.intern(frames.clone());
    let second = table.intern(frames);
    assert_eq!(first, second);
  }

  #[test]
  fn resolves_metadata_for_known_stack() {
    let table = StackTable::new();
    let frames = vec![FrameMetadata::new("file.rs", "func", 10)];
    let stack_id = table.intern(frames.clone());

    let resolved = table.resolve(stack_id).expect("expected stack metadata");
    assert_eq!(resolved.id(), stack_id);
    assert_eq!(resolved.frames(), frames.as_slice());
    assert_eq!(resolved.top_frame(), frames.first());
  }

  #[test]
  fn distinct_stacks_receive_distinct_ids() {
    let table = StackTable::new();
    let first = table.intern(vec![FrameMetadata::new("a.rs", "a", 1)]);
    let second = table.intern(vec![FrameMetadata::new("b.rs", "b", 2)]);
    assert_ne!(first, second);
  }

  #[test]
  fn site_label_includes_location() {
    let frame = FrameMetadata::new("worker.rs", "run", 42);
    assert_eq!(frame.site_label(), "run (worker.rs:42)");
  }

  #[test]
  fn capture_frames_resolves_something() {
    let frames = capture_frames(4, 0);
    assert!(!frames.is_empty());
    assert!(frames.len() <= 4);
  }
}
