//! Persisting caller-supplied input layers into a job's input directory.

use crate::Result;
use std::collections::HashSet;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Default copy buffer: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Reduce a caller-supplied file name to a safe basename.
///
/// Directory components are discarded, surrounding whitespace trimmed, and
/// `..`, `/` and `\` replaced with `_`. An empty result becomes
/// `file_<8 hex>.tif`.
pub fn sanitize_filename(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    let cleaned = base.replace("..", "_").replace(['/', '\\'], "_");
    if cleaned.is_empty() || cleaned == "." {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(8);
        format!("file_{id}.tif")
    } else {
        cleaned
    }
}

/// A named byte stream to be saved as a job input.
pub struct NamedInput {
    /// Name as supplied by the caller; sanitized before use.
    pub name: String,
    reader: Box<dyn Read + Send>,
}

impl NamedInput {
    /// Wrap an arbitrary reader.
    pub fn new(name: impl Into<String>, reader: impl Read + Send + 'static) -> Self {
        Self {
            name: name.into(),
            reader: Box::new(reader),
        }
    }

    /// Open a local file; the name is its file name.
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::new(name, file))
    }

    /// In-memory input.
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::new(name, Cursor::new(bytes))
    }
}

impl fmt::Debug for NamedInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedInput").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Streams inputs to disk in fixed-size chunks.
#[derive(Debug, Clone)]
pub struct UploadStore {
    chunk_size: usize,
}

impl Default for UploadStore {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl UploadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different copy buffer size (at least one byte).
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Save every input under `dir`, returning the written paths in input
    /// order.
    ///
    /// Names that collide within one batch get an index prefix so no input
    /// overwrites another. A file left over from an earlier call with the
    /// same name is replaced.
    pub fn save_inputs(&self, dir: &Path, inputs: Vec<NamedInput>) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(dir)?;
        let mut seen = HashSet::new();
        let mut paths = Vec::with_capacity(inputs.len());

        for (index, mut input) in inputs.into_iter().enumerate() {
            let mut name = sanitize_filename(&input.name);
            if !seen.insert(name.clone()) {
                name = format!("{index}_{name}");
                seen.insert(name.clone());
            }
            let path = dir.join(&name);
            let bytes = self.copy(&mut input.reader, &path)?;
            debug!(path = %path.display(), bytes, "Saved input");
            paths.push(path);
        }
        Ok(paths)
    }

    fn copy(&self, reader: &mut dyn Read, path: &Path) -> Result<u64> {
        let mut writer = BufWriter::new(File::create(path)?);
        let mut buf = vec![0u8; self.chunk_size];
        let mut total = 0u64;
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    drop(writer);
                    let _ = fs::remove_file(path);
                    return Err(e.into());
                }
            };
            writer.write_all(&buf[..n])?;
            total += n as u64;
        }
        writer.flush()?;
        Ok(total)
    }
}
