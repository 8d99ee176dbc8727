use crate::config::types::FingerprintLines;
use crate::source::reader::ReaderError;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{info, warn};

/// Extensions of rotated files that have been archived or compressed.
pub const ARCHIVE_EXTENSIONS: &[&str] = &["tar", "gz", "zip", "bz2", "rar"];

fn is_archive(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ARCHIVE_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

/// The most recently modified regular file matching `pattern`, skipping
/// archives. `None` when nothing matches.
pub fn resolve_source_file(pattern: &str) -> Result<Option<PathBuf>, ReaderError> {
    let mut files: Vec<(SystemTime, PathBuf)> = glob::glob(pattern)?
        .filter_map(Result::ok)
        .filter_map(|path| {
            let metadata = std::fs::metadata(&path).ok()?;
            if !metadata.is_file() {
                return None;
            }
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            Some((modified, path))
        })
        .collect();

    if files.is_empty() {
        warn!(path = %pattern, "No file is found with given path");
        return Ok(None);
    }
    files.sort_by(|a, b| b.0.cmp(&a.0));

    for (_, path) in files {
        if is_archive(&path) {
            info!(path = %path.display(), "Ignoring archived/compressed file");
            continue;
        }
        return Ok(Some(path));
    }
    Ok(None)
}

/// Hash of `stream_key` followed by the configured lines of the file.
///
/// Returns `None` while the file does not have all of the lines yet. The
/// stream key is part of the hash so one file can feed several streams.
pub fn file_fingerprint(
    path: &Path,
    stream_key: &str,
    lines: FingerprintLines,
) -> std::io::Result<Option<String>> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut selected: Vec<u8> = Vec::new();
    let mut line = Vec::new();

    for line_num in 1..=lines.end {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            return Ok(None);
        }
        if line_num >= lines.start {
            selected.extend_from_slice(&line);
        }
    }

    if lines.end < lines.start {
        return Ok(None);
    }

    let mut hasher = Sha256::new();
    hasher.update(stream_key.as_bytes());
    hasher.update(&selected);
    Ok(Some(format!("{:x}", hasher.finalize())))
}
