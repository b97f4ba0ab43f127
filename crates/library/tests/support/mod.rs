#![allow(dead_code)]

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use common::{Album, Track};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use library::{CancelToken, Catalog, Library, LibraryOptions, RunMode, RunReport};
use metadata::{clean_text, MetadataError, TagInfo, TagReader, TagReaders};
use tempfile::TempDir;

/// Reads `key=value` lines in place of real audio tags, so tag edits
/// change the file bytes and therefore the checksum, as they would on disk.
pub struct TextTagReader;

impl TagReader for TextTagReader {
    fn read(&self, path: &Path) -> Result<TagInfo, MetadataError> {
        let text = fs::read_to_string(path)?;
        let mut info = TagInfo::default();
        for line in text.lines() {
            if line.trim() == "unreadable" {
                return Err(MetadataError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "simulated read failure",
                )));
            }
            let (key, value) = match line.split_once('=') {
                Some(pair) => pair,
                None => continue,
            };
            let value = clean_text(value);
            match key.trim() {
                "artist" => info.artist = value,
                "album" => info.album = value,
                "title" => info.title = value,
                "ensemble" => info.ensemble = value,
                "conductor" => info.conductor = value,
                "composer" => info.composer = value,
                "track" => info.track_no = value.and_then(|v| v.parse().ok()),
                "disc" => info.disc_no = value.and_then(|v| v.parse().ok()),
                "year" => info.year = value.and_then(|v| v.parse().ok()),
                _ => {}
            }
        }
        Ok(info)
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub root: PathBuf,
    pub db_path: PathBuf,
    pub clock: Arc<AtomicU64>,
    mtime: AtomicU64,
    library: Option<Library>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_options(|_| {})
    }

    pub fn with_options(configure: impl FnOnce(&mut LibraryOptions)) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("music");
        fs::create_dir_all(&root).expect("music root");
        let db_path = dir.path().join("catalog.redb");
        let mut harness = Self {
            dir,
            root,
            db_path,
            clock: Arc::new(AtomicU64::new(1_000)),
            mtime: AtomicU64::new(1_500_000_000),
            library: None,
        };
        harness.reopen(configure);
        harness
    }

    /// Drops the current library and opens the catalog again.
    pub fn reopen(&mut self, configure: impl FnOnce(&mut LibraryOptions)) {
        self.library = None;
        let clock = self.clock.clone();
        let mut options = LibraryOptions {
            clock: Arc::new(move || clock.load(Ordering::SeqCst)),
            ..LibraryOptions::default()
        };
        configure(&mut options);
        let catalog = Catalog::open(&self.db_path).expect("catalog");
        let readers = TagReaders::uniform(Arc::new(TextTagReader));
        self.library = Some(Library::with_parts(
            self.root.clone(),
            catalog,
            readers,
            options,
        ));
    }

    pub fn library(&self) -> &Library {
        self.library.as_ref().expect("library open")
    }

    pub fn catalog(&self) -> &Catalog {
        self.library().catalog()
    }

    pub fn set_clock(&self, now: u64) {
        self.clock.store(now, Ordering::SeqCst);
    }

    pub fn path(&self, relpath: &str) -> PathBuf {
        self.root.join(relpath)
    }

    /// Writes a fake track; every write gets a fresh, later mtime.
    pub fn write_track(&self, relpath: &str, fields: &[(&str, &str)]) {
        let mut body = String::new();
        for (key, value) in fields {
            body.push_str(key);
            body.push('=');
            body.push_str(value);
            body.push('\n');
        }
        self.write_raw(relpath, body.as_bytes());
    }

    pub fn write_raw(&self, relpath: &str, bytes: &[u8]) {
        let path = self.path(relpath);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("mkdir");
        }
        fs::write(&path, bytes).expect("write");
        let next = self.mtime.fetch_add(10, Ordering::SeqCst) + 10;
        self.set_mtime(relpath, next);
    }

    pub fn set_mtime(&self, relpath: &str, secs: u64) {
        let file = fs::File::options()
            .write(true)
            .open(self.path(relpath))
            .expect("open for mtime");
        file.set_modified(UNIX_EPOCH + Duration::from_secs(secs))
            .expect("set mtime");
    }

    pub fn mtime_of(&self, relpath: &str) -> u64 {
        let meta = fs::metadata(self.path(relpath)).expect("stat");
        metadata::mtime_secs(&meta)
    }

    pub fn write_image(&self, relpath: &str, width: u32, height: u32, format: ImageFormat) {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([200, 40, 10])));
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), format)
            .expect("encode image");
        self.write_raw(relpath, &bytes);
    }

    pub fn remove(&self, relpath: &str) {
        fs::remove_file(self.path(relpath)).expect("remove");
    }

    pub fn rename(&self, from: &str, to: &str) {
        let target = self.path(to);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).expect("mkdir");
        }
        fs::rename(self.path(from), target).expect("rename");
    }

    pub fn run(&self, mode: RunMode) -> RunReport {
        self.library()
            .reconcile(mode, &CancelToken::new())
            .expect("reconcile")
    }

    pub fn track_at(&self, relpath: &str) -> Option<Track> {
        self.catalog().find_track_by_path(relpath).expect("lookup")
    }

    pub fn album_of(&self, relpath: &str) -> Album {
        let track = self.track_at(relpath).expect("track present");
        self.catalog()
            .get_album(&track.album_id)
            .expect("lookup")
            .expect("album present")
    }
}
