//! Per-process segment files in the shared metrics directory.
//!
//! # Protocol
//! ```text
//! <dir>/segment_<id>.jsonl          one file per process, id = pid
//! <dir>/segment_<id>.jsonl.compact  temp file during compaction
//! ```
//! Each line is a JSON object holding the full latest state of one series.
//! Writers only append to their own file. Readers keep the last parseable
//! line per series, so a torn trailing line just means a slightly older
//! value. Compaction rewrites the file with one line per series through the
//! temp file and an atomic rename.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::series::{SeriesKey, SeriesValue};

const SEGMENT_PREFIX: &str = "segment_";
const SEGMENT_SUFFIX: &str = ".jsonl";
const COMPACT_SUFFIX: &str = ".compact";

/// Lines allowed beyond the live series count before compaction.
const COMPACT_SLACK_LINES: usize = 1024;

#[derive(Serialize, Deserialize)]
struct SegmentLine {
    #[serde(flatten)]
    key: SeriesKey,
    value: SeriesValue,
}

/// Path of the segment owned by `id`.
pub fn segment_path(dir: &Path, id: u32) -> PathBuf {
    dir.join(format!("{}{}{}", SEGMENT_PREFIX, id, SEGMENT_SUFFIX))
}

/// Parse the owner id out of a segment file name.
fn segment_id(file_name: &str) -> Option<u32> {
    file_name
        .strip_prefix(SEGMENT_PREFIX)?
        .strip_suffix(SEGMENT_SUFFIX)?
        .parse()
        .ok()
}

/// Parse the owner id out of a leftover compaction file name.
fn compact_owner(file_name: &str) -> Option<u32> {
    segment_id(file_name.strip_suffix(COMPACT_SUFFIX)?)
}

/// Append-only writer for this process's segment.
pub struct SegmentWriter {
    path: PathBuf,
    file: File,
    lines: usize,
}

impl SegmentWriter {
    /// Create (or truncate) the segment for `id` under `dir`.
    pub fn create(dir: &Path, id: u32) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = segment_path(dir, id);
        fs::write(&path, b"")?;
        let file = OpenOptions::new().append(true).open(&path)?;
        Ok(Self {
            path,
            file,
            lines: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append the latest state of one series.
    pub fn append(&mut self, key: &SeriesKey, value: &SeriesValue) -> io::Result<()> {
        let line = encode_line(key, value)?;
        self.file.write_all(&line)?;
        self.lines += 1;
        Ok(())
    }

    /// Whether the file has grown past its budget for `live_series` series.
    pub fn needs_compaction(&self, live_series: usize) -> bool {
        self.lines > live_series.saturating_mul(8) + COMPACT_SLACK_LINES
    }

    /// Rewrite the segment with exactly one line per series.
    pub fn compact<'a, I>(&mut self, series: I) -> io::Result<()>
    where
        I: IntoIterator<Item = (&'a SeriesKey, &'a SeriesValue)>,
    {
        let mut tmp_name = self.path.clone().into_os_string();
        tmp_name.push(COMPACT_SUFFIX);
        let tmp_path = PathBuf::from(tmp_name);

        let mut lines = 0;
        {
            let mut tmp = File::create(&tmp_path)?;
            for (key, value) in series {
                tmp.write_all(&encode_line(key, value)?)?;
                lines += 1;
            }
            tmp.sync_data()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        self.file = OpenOptions::new().append(true).open(&self.path)?;
        self.lines = lines;
        tracing::debug!(path = ?self.path, lines, "Metrics segment compacted");
        Ok(())
    }

    /// Push written data to disk.
    pub fn sync(&self) -> io::Result<()> {
        self.file.sync_data()
    }
}

fn encode_line(key: &SeriesKey, value: &SeriesValue) -> io::Result<Vec<u8>> {
    let mut line = serde_json::to_vec(&SegmentLine {
        key: key.clone(),
        value: value.clone(),
    })?;
    line.push(b'\n');
    Ok(line)
}

/// Read one segment, keeping the latest parseable line per series.
pub fn read_segment(path: &Path) -> io::Result<HashMap<SeriesKey, SeriesValue>> {
    let bytes = fs::read(path)?;
    let content = String::from_utf8_lossy(&bytes);

    let mut latest = HashMap::new();
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        match serde_json::from_str::<SegmentLine>(line) {
            Ok(entry) => {
                latest.insert(entry.key, entry.value);
            }
            Err(e) => {
                tracing::trace!(path = ?path, error = %e, "Skipping unreadable segment line");
            }
        }
    }
    Ok(latest)
}

/// List `(id, path)` for every segment in `dir`.
pub fn list_segments(dir: &Path) -> io::Result<Vec<(u32, PathBuf)>> {
    let mut segments = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if let Some(id) = name.to_str().and_then(segment_id) {
            segments.push((id, entry.path()));
        }
    }
    segments.sort();
    Ok(segments)
}

/// Remove segments (and leftover compaction files) of processes that are
/// no longer alive. `own_id` is never treated as stale.
pub fn purge_stale_segments<F>(dir: &Path, own_id: u32, is_alive: F) -> io::Result<usize>
where
    F: Fn(u32) -> bool,
{
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };

        let stale = if let Some(id) = segment_id(name) {
            id != own_id && !is_alive(id)
        } else if let Some(id) = compact_owner(name) {
            id == own_id || !is_alive(id)
        } else {
            false
        };

        if stale {
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
    }
    Ok(removed)
}

/// Liveness of a process by id.
///
/// Without procfs every owner is assumed alive, so nothing is purged.
pub fn process_alive(pid: u32) -> bool {
    if cfg!(target_os = "linux") {
        Path::new("/proc").join(pid.to_string()).exists()
    } else {
        true
    }
}
