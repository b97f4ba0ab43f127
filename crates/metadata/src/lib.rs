use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use common::AudioFormat;
use lofty::error::LoftyError;
use lofty::file::FileType;
use lofty::prelude::{AudioFile, ItemKey, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::Tag;

const CHECKSUM_CHUNK: usize = 64 * 1024;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TagInfo {
    pub artist: Option<String>,
    pub album: Option<String>,
    pub title: Option<String>,
    pub ensemble: Option<String>,
    pub conductor: Option<String>,
    pub composer: Option<String>,
    pub track_no: Option<u16>,
    pub disc_no: Option<u16>,
    pub year: Option<i32>,
    pub duration_ms: Option<u32>,
}

/// Everything the reconciler needs to know about one file on disk.
#[derive(Debug, Clone)]
pub struct Fingerprint {
    pub checksum: String,
    pub format: AudioFormat,
    pub tags: TagInfo,
    pub size: u64,
    pub mtime: u64,
}

#[derive(Debug)]
pub enum MetadataError {
    Io(std::io::Error),
    Lofty(LoftyError),
    Unsupported(String),
    Checksum(std::io::Error),
}

impl std::fmt::Display for MetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataError::Io(err) => write!(f, "io error: {}", err),
            MetadataError::Lofty(err) => write!(f, "tag error: {}", err),
            MetadataError::Unsupported(value) => write!(f, "unsupported format: {}", value),
            MetadataError::Checksum(err) => write!(f, "checksum error: {}", err),
        }
    }
}

impl std::error::Error for MetadataError {}

impl From<std::io::Error> for MetadataError {
    fn from(err: std::io::Error) -> Self {
        MetadataError::Io(err)
    }
}

impl From<LoftyError> for MetadataError {
    fn from(err: LoftyError) -> Self {
        MetadataError::Lofty(err)
    }
}

/// Reads the tag fields of one family of audio files.
pub trait TagReader: Send + Sync {
    fn read(&self, path: &Path) -> Result<TagInfo, MetadataError>;
}

/// MP3 files with ID3v2 frames. TPE2 carries the ensemble, TPE3 the conductor.
pub struct Id3Reader;

/// Ogg Vorbis and Opus files with Vorbis comments.
pub struct VorbisReader;

/// MP4 audio with an ilst atom.
pub struct Mp4Reader;

impl TagReader for Id3Reader {
    fn read(&self, path: &Path) -> Result<TagInfo, MetadataError> {
        read_with_lofty(path, &[FileType::Mpeg], ItemKey::AlbumArtist)
    }
}

impl TagReader for VorbisReader {
    fn read(&self, path: &Path) -> Result<TagInfo, MetadataError> {
        read_with_lofty(
            path,
            &[FileType::Vorbis, FileType::Opus],
            ItemKey::Unknown("ENSEMBLE".to_string()),
        )
    }
}

impl TagReader for Mp4Reader {
    fn read(&self, path: &Path) -> Result<TagInfo, MetadataError> {
        read_with_lofty(path, &[FileType::Mp4], ItemKey::AlbumArtist)
    }
}

/// Extension-selected set of tag readers.
#[derive(Clone)]
pub struct TagReaders {
    readers: HashMap<AudioFormat, Arc<dyn TagReader>>,
}

impl TagReaders {
    pub fn standard() -> Self {
        let id3: Arc<dyn TagReader> = Arc::new(Id3Reader);
        let vorbis: Arc<dyn TagReader> = Arc::new(VorbisReader);
        let mp4: Arc<dyn TagReader> = Arc::new(Mp4Reader);
        let mut readers = HashMap::new();
        readers.insert(AudioFormat::Mp3, id3);
        readers.insert(AudioFormat::Ogg, vorbis.clone());
        readers.insert(AudioFormat::Opus, vorbis);
        readers.insert(AudioFormat::M4a, mp4);
        Self { readers }
    }

    /// Routes every format to the same reader.
    pub fn uniform(reader: Arc<dyn TagReader>) -> Self {
        let mut readers = HashMap::new();
        for format in [
            AudioFormat::Mp3,
            AudioFormat::Ogg,
            AudioFormat::Opus,
            AudioFormat::M4a,
        ] {
            readers.insert(format, reader.clone());
        }
        Self { readers }
    }

    pub fn with_reader(mut self, format: AudioFormat, reader: Arc<dyn TagReader>) -> Self {
        self.readers.insert(format, reader);
        self
    }

    pub fn reader_for(&self, format: AudioFormat) -> Option<&dyn TagReader> {
        self.readers.get(&format).map(|reader| reader.as_ref())
    }
}

impl Default for TagReaders {
    fn default() -> Self {
        Self::standard()
    }
}

/// Stats, tags and checksums one file.
pub fn fingerprint(path: &Path, readers: &TagReaders) -> Result<Fingerprint, MetadataError> {
    let format = AudioFormat::from_path(path)
        .ok_or_else(|| MetadataError::Unsupported(path.display().to_string()))?;
    let reader = readers
        .reader_for(format)
        .ok_or_else(|| MetadataError::Unsupported(format!("{:?}", format)))?;

    // Opening up front keeps permission problems out of the tag parser's errors.
    let file = File::open(path)?;
    let meta = file.metadata()?;
    let tags = reader.read(path)?;
    let checksum = hash_reader(file)?;

    Ok(Fingerprint {
        checksum,
        format,
        tags,
        size: meta.len(),
        mtime: mtime_secs(&meta),
    })
}

/// Hex BLAKE3 digest of the full file contents.
pub fn checksum(path: &Path) -> Result<String, MetadataError> {
    let file = File::open(path).map_err(MetadataError::Checksum)?;
    hash_reader(file)
}

fn hash_reader(mut reader: impl Read) -> Result<String, MetadataError> {
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; CHECKSUM_CHUNK];
    loop {
        let read = reader.read(&mut buf).map_err(MetadataError::Checksum)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

pub fn mtime_secs(meta: &fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|value| value.as_secs())
        .unwrap_or(0)
}

fn read_with_lofty(
    path: &Path,
    accepted: &[FileType],
    ensemble_key: ItemKey,
) -> Result<TagInfo, MetadataError> {
    let tagged_file = Probe::open(path)?.guess_file_type()?.read()?;
    let file_type = tagged_file.file_type();
    if !accepted.contains(&file_type) {
        return Err(MetadataError::Unsupported(format!("{:?}", file_type)));
    }

    let mut info = TagInfo::default();

    let duration_ms = tagged_file.properties().duration().as_millis();
    if duration_ms > 0 {
        let clamped = duration_ms.min(u128::from(u32::MAX)) as u32;
        info.duration_ms = Some(clamped);
    }

    if let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
        info.artist = tag_text(tag, &ItemKey::TrackArtist);
        info.album = tag_text(tag, &ItemKey::AlbumTitle);
        info.title = tag_text(tag, &ItemKey::TrackTitle);
        info.ensemble = tag_text(tag, &ensemble_key);
        info.conductor = tag_text(tag, &ItemKey::Conductor);
        info.composer = tag_text(tag, &ItemKey::Composer);
        info.track_no = tag
            .get_string(&ItemKey::TrackNumber)
            .and_then(parse_u16);
        info.disc_no = tag
            .get_string(&ItemKey::DiscNumber)
            .and_then(parse_u16);
        info.year = tag
            .get_string(&ItemKey::Year)
            .or_else(|| tag.get_string(&ItemKey::RecordingDate))
            .and_then(parse_year);
    }

    Ok(info)
}

fn tag_text(tag: &Tag, key: &ItemKey) -> Option<String> {
    tag.get_string(key).and_then(clean_text)
}

/// Trims and drops NUL padding; empty values count as absent.
pub fn clean_text(text: &str) -> Option<String> {
    let cleaned: String = text.chars().filter(|c| *c != '\0').collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_u16(text: &str) -> Option<u16> {
    let head = text.split('/').next().unwrap_or(text).trim();
    head.parse().ok()
}

fn parse_year(text: &str) -> Option<i32> {
    let mut digits = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            if digits.len() == 4 {
                break;
            }
        } else if !digits.is_empty() {
            break;
        }
    }
    if digits.len() != 4 {
        None
    } else {
        digits.parse().ok()
    }
}
