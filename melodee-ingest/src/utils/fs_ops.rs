//! Filesystem helpers for staging, quarantine and promotion moves

use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Make a string safe as a single path segment
///
/// Path separators and characters rejected by common filesystems become `_`,
/// trailing dots and spaces are trimmed, and an empty result becomes `fallback`.
pub fn sanitize_segment(name: &str, fallback: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();

    let trimmed = cleaned.trim().trim_end_matches(['.', ' ']);
    if trimmed.is_empty() || trimmed == ".." {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Move a file, falling back to copy + remove when rename cannot cross devices
pub fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if from == to {
        return Ok(());
    }
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }

    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Err(e),
        Err(rename_err) => {
            tracing::debug!(
                from = %from.display(),
                to = %to.display(),
                error = %rename_err,
                "Rename failed, copying instead"
            );
            fs::copy(from, to)?;
            if let Err(e) = fs::remove_file(from) {
                // Leave exactly one copy behind
                let _ = fs::remove_file(to);
                return Err(e);
            }
            Ok(())
        }
    }
}

/// `path` itself if free, else `stem (n).ext` with the first free `n`
pub fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let extension = path.extension().map(|e| e.to_string_lossy().to_string());

    (1u32..)
        .map(|n| {
            let name = match &extension {
                Some(ext) => format!("{} ({}).{}", stem, n, ext),
                None => format!("{} ({})", stem, n),
            };
            parent.join(name)
        })
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| path.to_path_buf())
}

/// Recursively copy `from` into `to`, then check every copied file's size
///
/// `to` must not exist yet. Returns the number of files copied.
pub fn copy_dir_verified(from: &Path, to: &Path) -> io::Result<usize> {
    if to.exists() {
        return Err(io::Error::new(
            ErrorKind::AlreadyExists,
            format!("{} already exists", to.display()),
        ));
    }
    fs::create_dir_all(to)?;

    let mut copied = 0;
    for entry in WalkDir::new(from).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(io::Error::other)?;
        let target = to.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target)?;
            let expected = entry.metadata().map_err(io::Error::other)?.len();
            let actual = fs::metadata(&target)?.len();
            if expected != actual {
                return Err(io::Error::new(
                    ErrorKind::InvalidData,
                    format!(
                        "size mismatch copying {}: expected {} bytes, wrote {}",
                        entry.path().display(),
                        expected,
                        actual
                    ),
                ));
            }
            copied += 1;
        }
    }

    Ok(copied)
}
