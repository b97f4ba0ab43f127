use std::path::{Path, PathBuf};

use common::{relpath_from, AudioFormat};
use metadata::mtime_secs;
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Clone, Debug)]
pub struct FileEntry {
    pub path: PathBuf,
    pub relpath: String,
    pub size: u64,
    pub mtime: u64,
    pub format: AudioFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WalkFailureKind {
    /// The walk could not list or enter a directory; nothing below it was seen.
    Directory,
    /// One audio file could not be stat'ed.
    File,
}

/// A directory or entry the walk could not descend into.
#[derive(Clone, Debug)]
pub struct WalkFailure {
    pub relpath: String,
    pub kind: WalkFailureKind,
    pub message: String,
}

/// Depth-first traversal of the library root in file-name order.
///
/// `files()` starts a fresh walk each time it is called, so a cancelled or
/// failed run can simply begin again.
#[derive(Clone, Debug)]
pub struct Walker {
    root: PathBuf,
}

impl Walker {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn files(&self) -> impl Iterator<Item = Result<FileEntry, WalkFailure>> + '_ {
        WalkDir::new(&self.root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(move |entry| {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(err) => return self.failure(&err),
                };

                if !entry.file_type().is_file() {
                    return None;
                }
                let format = AudioFormat::from_path(entry.path())?;
                let relpath = relpath_from(&self.root, entry.path())?;
                match entry.metadata() {
                    Ok(meta) => Some(Ok(FileEntry {
                        path: entry.path().to_path_buf(),
                        relpath,
                        size: meta.len(),
                        mtime: mtime_secs(&meta),
                        format,
                    })),
                    Err(err) => {
                        warn!("Skipping {:?}: {}", relpath, err);
                        Some(Err(WalkFailure {
                            relpath,
                            kind: WalkFailureKind::File,
                            message: err.to_string(),
                        }))
                    }
                }
            })
    }

    fn failure(&self, err: &walkdir::Error) -> Option<Result<FileEntry, WalkFailure>> {
        let path = err.path();
        let relpath = path
            .and_then(|path| relpath_from(&self.root, path))
            .unwrap_or_default();
        let is_dir = err.loop_ancestor().is_some() || path.map_or(true, Path::is_dir);
        let kind = if is_dir {
            WalkFailureKind::Directory
        } else if path.and_then(AudioFormat::from_path).is_some() {
            WalkFailureKind::File
        } else {
            debug!("Ignoring unreadable non-audio entry {:?}: {}", relpath, err);
            return None;
        };
        warn!("Skipping unreadable path {:?}: {}", relpath, err);
        Some(Err(WalkFailure {
            relpath,
            kind,
            message: err.to_string(),
        }))
    }
}
