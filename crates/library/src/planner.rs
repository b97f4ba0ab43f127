//! The reconciliation run: walk the library, decide per file whether it is
//! new, unchanged, edited or moved, apply that to the catalog, sweep rows
//! whose files are gone, then regroup and attach art for what changed.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use common::{artist_id_for, join_relpath, normalize, parent_relpath, split_prefix, AlbumKey, Track};
use metadata::{fingerprint, Fingerprint, MetadataError, TagInfo};
use parking_lot::Mutex;
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::art::{resolve_album_art, ArtOutcome};
use crate::catalog::TrackRecord;
use crate::collate::{album_key_for, collate_directory};
use crate::walker::{FileEntry, WalkFailure, WalkFailureKind, Walker};
use crate::{Library, LibraryError};

const BATCH_SIZE: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Skips files whose path, size and mtime match the catalog and only
    /// looks for art on albums that have none.
    Add,
    /// Re-checksums every file and re-checks every album's art against
    /// its source file.
    Full,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    PartialSuccess,
    Cancelled,
    Failed(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Unreadable,
    CorruptTags,
    UnsupportedFormat,
    Checksum,
    MissingArtist,
    MissingTitle,
    ReservedArtist,
    UnreadableDirectory,
    Art,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedFile {
    pub relpath: String,
    pub reason: SkipReason,
    pub detail: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunReport {
    pub mode: RunMode,
    pub status: RunStatus,
    pub created: usize,
    pub updated: usize,
    pub relocated: usize,
    pub unchanged: usize,
    pub touched: usize,
    pub deleted: usize,
    pub recollated: usize,
    pub art_changes: usize,
    pub skipped: Vec<SkippedFile>,
}

impl RunReport {
    fn new(mode: RunMode) -> Self {
        Self {
            mode,
            status: RunStatus::Success,
            created: 0,
            updated: 0,
            relocated: 0,
            unchanged: 0,
            touched: 0,
            deleted: 0,
            recollated: 0,
            art_changes: 0,
            skipped: Vec::new(),
        }
    }

    /// Number of catalog writes the run performed.
    pub fn mutations(&self) -> usize {
        self.created
            + self.updated
            + self.relocated
            + self.touched
            + self.deleted
            + self.recollated
            + self.art_changes
    }

    fn skip(&mut self, relpath: &str, reason: SkipReason, detail: impl Into<String>) {
        let detail = detail.into();
        warn!("Skipping {:?} ({:?}): {}", relpath, reason, detail);
        self.skipped.push(SkippedFile {
            relpath: relpath.to_string(),
            reason,
            detail,
        });
    }
}

#[derive(Debug)]
pub enum RunError {
    Busy(RunMode),
    RootUnreadable(PathBuf, std::io::Error),
    Catalog(LibraryError),
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunError::Busy(mode) => write!(f, "a {:?} run is already in progress", mode),
            RunError::RootUnreadable(path, err) => {
                write!(f, "library root {:?} is not readable: {}", path, err)
            }
            RunError::Catalog(err) => write!(f, "catalog error: {}", err),
        }
    }
}

impl std::error::Error for RunError {}

impl From<LibraryError> for RunError {
    fn from(err: LibraryError) -> Self {
        RunError::Catalog(err)
    }
}

/// Cooperative stop signal, checked between files.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Holds the library's run lock; released on drop.
pub struct RunGuard<'a> {
    slot: &'a Mutex<Option<RunMode>>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        *self.slot.lock() = None;
    }
}

struct Job {
    entry: FileEntry,
    result: Result<Fingerprint, MetadataError>,
}

/// Mutable state of one run.
struct Pass<'a> {
    library: &'a Library,
    mode: RunMode,
    report: RunReport,
    observed: HashSet<String>,
    claimed: HashSet<String>,
    affected_dirs: BTreeSet<String>,
    unreadable_dirs: Vec<String>,
}

impl Library {
    /// Takes the run lock, failing fast if another run holds it.
    pub fn try_begin_run(&self, mode: RunMode) -> Result<RunGuard<'_>, RunError> {
        let slot = self.run_lock();
        let mut current = slot.lock();
        if let Some(active) = *current {
            return Err(RunError::Busy(active));
        }
        *current = Some(mode);
        Ok(RunGuard { slot })
    }

    /// Runs one reconciliation pass over the library root.
    ///
    /// Lock contention and an unreadable root fail before anything is
    /// written. A catalog error part-way through stops the run and is
    /// reported as `RunStatus::Failed`; every file applied before it stays
    /// committed.
    pub fn reconcile(&self, mode: RunMode, cancel: &CancelToken) -> Result<RunReport, RunError> {
        let _guard = self.try_begin_run(mode)?;

        if let Err(err) = fs::read_dir(self.root()) {
            return Err(RunError::RootUnreadable(self.root().to_path_buf(), err));
        }
        self.catalog().ensure_various_artist()?;

        info!("Starting {:?} run over {:?}", mode, self.root());
        let mut pass = Pass {
            library: self,
            mode,
            report: RunReport::new(mode),
            observed: HashSet::new(),
            claimed: HashSet::new(),
            affected_dirs: BTreeSet::new(),
            unreadable_dirs: Vec::new(),
        };

        if let Err(err) = pass.run(cancel) {
            warn!("Run aborted: {}", err);
            pass.report.status = RunStatus::Failed(err.to_string());
            return Ok(pass.report);
        }

        pass.report.status = if cancel.is_cancelled() {
            RunStatus::Cancelled
        } else if pass.report.skipped.is_empty() {
            RunStatus::Success
        } else {
            RunStatus::PartialSuccess
        };
        let report = pass.report;
        info!(
            "Run finished ({:?}): {} created, {} updated, {} relocated, {} deleted, {} skipped",
            report.status,
            report.created,
            report.updated,
            report.relocated,
            report.deleted,
            report.skipped.len()
        );
        Ok(report)
    }
}

impl Pass<'_> {
    fn run(&mut self, cancel: &CancelToken) -> Result<(), LibraryError> {
        let pool = build_pool(self.library.options().workers);
        let walker = Walker::new(self.library.root());
        let mut files = walker.files();

        loop {
            if cancel.is_cancelled() {
                break;
            }
            let batch = self.next_batch(&mut files)?;
            if batch.is_empty() {
                break;
            }
            for job in self.fingerprint_batch(pool.as_ref(), batch) {
                if cancel.is_cancelled() {
                    break;
                }
                self.apply(job)?;
            }
        }

        if !cancel.is_cancelled() {
            self.sweep()?;
        }
        self.collate()?;
        if !cancel.is_cancelled() {
            self.resolve_art()?;
        }
        Ok(())
    }

    /// Pulls entries until a batch of files needing a fingerprint is full.
    /// Files the incremental mode can trust are settled here.
    fn next_batch(
        &mut self,
        files: &mut impl Iterator<Item = Result<FileEntry, WalkFailure>>,
    ) -> Result<Vec<FileEntry>, LibraryError> {
        let mut batch = Vec::new();
        while batch.len() < BATCH_SIZE {
            let entry = match files.next() {
                Some(Ok(entry)) => entry,
                Some(Err(failure)) => {
                    self.walk_failure(failure)?;
                    continue;
                }
                None => break,
            };

            if self.mode == RunMode::Add {
                if let Some(existing) = self.library.catalog().find_track_by_path(&entry.relpath)? {
                    if existing.file_size == entry.size && existing.file_mtime == entry.mtime {
                        self.observed.insert(entry.relpath);
                        self.report.unchanged += 1;
                        continue;
                    }
                }
            }
            batch.push(entry);
        }
        Ok(batch)
    }

    fn walk_failure(&mut self, failure: WalkFailure) -> Result<(), LibraryError> {
        match failure.kind {
            WalkFailureKind::Directory => {
                self.report
                    .skip(&failure.relpath, SkipReason::UnreadableDirectory, failure.message);
                self.unreadable_dirs.push(failure.relpath);
            }
            WalkFailureKind::File => {
                self.report
                    .skip(&failure.relpath, SkipReason::Unreadable, failure.message);
                if self
                    .library
                    .catalog()
                    .find_track_by_path(&failure.relpath)?
                    .is_some()
                {
                    self.observed.insert(failure.relpath);
                }
            }
        }
        Ok(())
    }

    fn fingerprint_batch(&self, pool: Option<&ThreadPool>, batch: Vec<FileEntry>) -> Vec<Job> {
        let readers = self.library.readers();
        let work = |entry: FileEntry| {
            let result = fingerprint(&entry.path, readers);
            Job { entry, result }
        };
        match pool {
            Some(pool) => pool.install(|| batch.into_par_iter().map(work).collect()),
            None => batch.into_iter().map(work).collect(),
        }
    }

    fn apply(&mut self, job: Job) -> Result<(), LibraryError> {
        let Job { entry, result } = job;
        let catalog = self.library.catalog();
        let existing = catalog.find_track_by_path(&entry.relpath)?;

        let print = match result {
            Ok(print) => print,
            Err(err) => {
                let reason = match &err {
                    MetadataError::Io(_) => SkipReason::Unreadable,
                    MetadataError::Lofty(_) => SkipReason::CorruptTags,
                    MetadataError::Unsupported(_) => SkipReason::UnsupportedFormat,
                    MetadataError::Checksum(_) => SkipReason::Checksum,
                };
                self.report.skip(&entry.relpath, reason, err.to_string());
                // A transient read failure must not cost the existing row.
                if existing.is_some() {
                    self.observed.insert(entry.relpath);
                }
                return Ok(());
            }
        };

        let (artist, title) = match validate(&print.tags) {
            Ok(fields) => fields,
            Err(reason) => {
                self.report
                    .skip(&entry.relpath, reason, describe_rejection(reason, &print.tags));
                return Ok(());
            }
        };

        match existing {
            Some(track) if track.checksum == print.checksum => {
                if track.file_size != print.size || track.file_mtime != print.mtime {
                    catalog.touch_track(&track.id, print.size, print.mtime)?;
                    self.report.touched += 1;
                } else {
                    self.report.unchanged += 1;
                }
            }
            Some(track) => {
                let record =
                    self.record_for(&entry, &print, artist, title, Some(&track), track.added)?;
                catalog.upsert_track(&record)?;
                debug!("Updated {:?}", entry.relpath);
                self.report.updated += 1;
                self.affected_dirs.insert(track.directory().to_string());
            }
            None => match self.relocation_source(&entry, &print.checksum)? {
                Some(source) => {
                    let record =
                        self.record_for(&entry, &print, artist, title, Some(&source), source.added)?;
                    catalog.upsert_track(&record)?;
                    debug!("Relocated {:?} -> {:?}", source.file_relpath, entry.relpath);
                    self.claimed.insert(source.id.clone());
                    self.report.relocated += 1;
                    self.affected_dirs.insert(source.directory().to_string());
                }
                None => {
                    let added = (self.library.options().clock)();
                    let record = self.record_for(&entry, &print, artist, title, None, added)?;
                    catalog.upsert_track(&record)?;
                    debug!("Created {:?}", entry.relpath);
                    self.report.created += 1;
                }
            },
        }

        self.affected_dirs
            .insert(parent_relpath(&entry.relpath).to_string());
        self.observed.insert(entry.relpath);
        Ok(())
    }

    /// A catalogued track with the same content whose file is gone from
    /// disk and has not already been claimed by another move this run.
    fn relocation_source(
        &self,
        entry: &FileEntry,
        checksum: &str,
    ) -> Result<Option<Track>, LibraryError> {
        let root = self.library.root();
        let candidates = self.library.catalog().find_track_by_checksum(checksum)?;
        Ok(candidates.into_iter().find(|track| {
            track.file_relpath != entry.relpath
                && !self.claimed.contains(&track.id)
                && !join_relpath(root, &track.file_relpath).exists()
        }))
    }

    fn record_for(
        &self,
        entry: &FileEntry,
        print: &Fingerprint,
        artist: &str,
        title: &str,
        replacing: Option<&Track>,
        added: u64,
    ) -> Result<TrackRecord, LibraryError> {
        let tags = &print.tags;
        let artist_id = artist_id_for(&normalize(&split_prefix(artist).1));
        let dir = parent_relpath(&entry.relpath);

        let (album_key, album_title) = match &tags.album {
            Some(album) => {
                let key = album_key_for(
                    self.library.catalog(),
                    dir,
                    &normalize(album),
                    &artist_id,
                    replacing.map(|track| track.id.as_str()),
                )?;
                (key, album.clone())
            }
            None => (AlbumKey::NonAlbum { artist_id }, String::new()),
        };

        Ok(TrackRecord {
            id: replacing.map(|track| track.id.clone()),
            relpath: entry.relpath.clone(),
            checksum: print.checksum.clone(),
            format: print.format,
            size: print.size,
            mtime: print.mtime,
            added,
            title: title.to_string(),
            track_no: tags.track_no,
            disc_no: tags.disc_no,
            year: tags.year,
            duration_ms: tags.duration_ms.unwrap_or(0),
            artist: artist.to_string(),
            ensemble: tags.ensemble.clone(),
            conductor: tags.conductor.clone(),
            composer: tags.composer.clone(),
            album_key,
            album_title,
        })
    }

    /// Deletes every track whose file was not seen this run.
    fn sweep(&mut self) -> Result<(), LibraryError> {
        let catalog = self.library.catalog();
        for (relpath, track_id) in catalog.all_known_paths()? {
            if self.observed.contains(&relpath) || self.under_unreadable_dir(&relpath) {
                continue;
            }
            if let Some(track) = catalog.delete_track(&track_id)? {
                debug!("Removed {:?}", relpath);
                self.report.deleted += 1;
                self.affected_dirs.insert(track.directory().to_string());
            }
        }
        Ok(())
    }

    fn under_unreadable_dir(&self, relpath: &str) -> bool {
        self.unreadable_dirs.iter().any(|dir| {
            dir.is_empty()
                || relpath == dir
                || (relpath.starts_with(dir.as_str()) && relpath[dir.len()..].starts_with('/'))
        })
    }

    fn collate(&mut self) -> Result<(), LibraryError> {
        let dirs: Vec<String> = self.affected_dirs.iter().cloned().collect();
        for dir in dirs {
            self.report.recollated += collate_directory(self.library.catalog(), &dir)?;
        }
        Ok(())
    }

    fn resolve_art(&mut self) -> Result<(), LibraryError> {
        let catalog = self.library.catalog();
        let albums = match self.mode {
            RunMode::Add => catalog.albums_missing_art()?,
            RunMode::Full => catalog.all_albums()?,
        };
        let sizes = self.library.options().thumbnail_sizes();
        for album in albums {
            match resolve_album_art(catalog, self.library.root(), &album, sizes)? {
                ArtOutcome::Unchanged => {}
                ArtOutcome::Attached(_) | ArtOutcome::Removed => self.report.art_changes += 1,
                ArtOutcome::Failed { relpath, error } => {
                    self.report.skip(&relpath, SkipReason::Art, error.to_string())
                }
            }
        }
        Ok(())
    }
}

fn build_pool(workers: usize) -> Option<ThreadPool> {
    if workers <= 1 {
        return None;
    }
    match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
        Ok(pool) => Some(pool),
        Err(err) => {
            warn!("Falling back to sequential fingerprinting: {}", err);
            None
        }
    }
}

/// Checks the required fields and the reserved artist name, returning the
/// artist and title to import.
fn validate(tags: &TagInfo) -> Result<(&str, &str), SkipReason> {
    let artist = tags.artist.as_deref().ok_or(SkipReason::MissingArtist)?;
    let title = tags.title.as_deref().ok_or(SkipReason::MissingTitle)?;
    let reserved = normalize(common::VARIOUS_NAME);
    let credited = [
        Some(artist),
        tags.ensemble.as_deref(),
        tags.conductor.as_deref(),
        tags.composer.as_deref(),
    ];
    for name in credited.into_iter().flatten() {
        if normalize(&split_prefix(name).1) == reserved {
            return Err(SkipReason::ReservedArtist);
        }
    }
    Ok((artist, title))
}

fn describe_rejection(reason: SkipReason, tags: &TagInfo) -> String {
    match reason {
        SkipReason::MissingArtist => "no artist tag".to_string(),
        SkipReason::MissingTitle => "no title tag".to_string(),
        SkipReason::ReservedArtist => format!(
            "Artist name {:?} is reserved",
            tags.artist.as_deref().unwrap_or(common::VARIOUS_NAME)
        ),
        other => format!("{:?}", other),
    }
}
