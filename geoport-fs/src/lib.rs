//! Capability-based filesystem helpers for cache and report directories.
//!
//! Paths arrive as UTF-8 [`camino`] paths from configuration. Each helper
//! splits the path into an ambient anchor (the filesystem root or the current
//! directory) and a relative remainder, then operates through a `cap-std`
//! directory handle.
#![forbid(unsafe_code)]

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8};
use std::{fs::File, io, path::Component};

/// Create `path` and any missing ancestors.
pub fn ensure_dir(path: &Utf8Path) -> io::Result<()> {
    let (anchor, relative) = split_anchor(path)?;
    if relative.as_str().is_empty() {
        return Ok(());
    }
    anchor.create_dir_all(&relative)
}

/// Create the parent directory of a file path.
pub fn ensure_parent_dir(path: &Utf8Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_str().is_empty() => ensure_dir(parent),
        _ => Ok(()),
    }
}

/// Whether `path` names an existing directory.
pub fn dir_exists(path: &Utf8Path) -> io::Result<bool> {
    let (anchor, relative) = split_anchor(path)?;
    if relative.as_str().is_empty() {
        return Ok(true);
    }
    match anchor.metadata(&relative) {
        Ok(meta) => Ok(meta.is_dir()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Whether `path` names an existing regular file.
pub fn file_exists(path: &Utf8Path) -> io::Result<bool> {
    let (anchor, relative) = split_anchor(path)?;
    match anchor.metadata(&relative) {
        Ok(meta) => Ok(meta.is_file()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Recursively delete `path`. A missing directory is not an error.
pub fn remove_dir_all(path: &Utf8Path) -> io::Result<()> {
    let (anchor, relative) = split_anchor(path)?;
    if relative.as_str().is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "refusing to remove a filesystem anchor",
        ));
    }
    match anchor.remove_dir_all(&relative) {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Open a directory handle for `path`.
pub fn open_dir(path: &Utf8Path) -> io::Result<fs_utf8::Dir> {
    fs_utf8::Dir::open_ambient_dir(path, ambient_authority())
}

/// Open `name` inside `dir` for reading and writing, creating it when absent.
pub fn open_read_write(dir: &fs_utf8::Dir, name: &str) -> io::Result<File> {
    let mut options = fs_utf8::OpenOptions::new();
    options.read(true).write(true).create(true);
    dir.open_with(name, &options).map(fs_utf8::File::into_std)
}

/// Open `name` inside `dir` read-only.
pub fn open_read(dir: &fs_utf8::Dir, name: &str) -> io::Result<File> {
    dir.open(name).map(fs_utf8::File::into_std)
}

/// Read the UTF-8 file at `path`.
pub fn read_to_string(path: &Utf8Path) -> io::Result<String> {
    let (anchor, relative) = split_anchor(path)?;
    anchor.read_to_string(&relative)
}

/// Create or truncate the file at `path`, creating parent directories.
pub fn create_file(path: &Utf8Path) -> io::Result<File> {
    ensure_parent_dir(path)?;
    let (anchor, relative) = split_anchor(path)?;
    anchor.create(&relative).map(fs_utf8::File::into_std)
}

/// Split a path into an ambient anchor directory and the path relative to it.
///
/// Absolute paths anchor at their root (including a Windows drive or UNC
/// prefix); relative paths anchor at the current directory.
pub fn split_anchor(path: &Utf8Path) -> io::Result<(fs_utf8::Dir, Utf8PathBuf)> {
    let std_path = path.as_std_path();
    let anchor = match std_path.components().next() {
        Some(Component::Prefix(prefix)) => {
            let prefix = prefix
                .as_os_str()
                .to_str()
                .ok_or_else(|| io::Error::other("non-UTF-8 path prefix"))?;
            Utf8PathBuf::from(format!("{prefix}{}", std::path::MAIN_SEPARATOR))
        }
        Some(Component::RootDir) => Utf8PathBuf::from(std::path::MAIN_SEPARATOR.to_string()),
        _ => Utf8PathBuf::from("."),
    };
    let relative = if path.is_absolute() {
        path.strip_prefix(&anchor)
            .map_err(|_| io::Error::other(format!("cannot strip {anchor} from {path}")))?
            .to_path_buf()
    } else {
        path.to_path_buf()
    };
    let dir = fs_utf8::Dir::open_ambient_dir(&anchor, ambient_authority())?;
    Ok((dir, relative))
}
