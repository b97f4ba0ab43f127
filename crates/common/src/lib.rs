use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod normalize;

pub use normalize::{normalize, split_prefix};

pub const VARIOUS_NAME: &str = "Various";
pub const NON_ALBUM_TITLE: &str = "Non-Album Tracks";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Artist {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub prefix: Option<String>,
    pub normname: String,
    #[serde(default)]
    pub various: bool,
}

impl Artist {
    pub fn display_name(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{} {}", prefix, self.name),
            None => self.name.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Album {
    pub id: String,
    pub artist_id: String,
    pub title: String,
    pub normtitle: String,
    pub kind: AlbumKind,
    /// Containing directory, set for Various albums only.
    pub directory: Option<String>,
    pub live: bool,
    pub year: Option<i32>,
    pub added: u64,
    pub art: Option<AlbumArt>,
    #[serde(default)]
    pub roles: RolePresence,
}

impl Album {
    pub fn key(&self) -> AlbumKey {
        match self.kind {
            AlbumKind::Regular => AlbumKey::Artist {
                artist_id: self.artist_id.clone(),
                normtitle: self.normtitle.clone(),
            },
            AlbumKind::Various => AlbumKey::Various {
                directory: self.directory.clone().unwrap_or_default(),
                normtitle: self.normtitle.clone(),
            },
            AlbumKind::NonAlbum => AlbumKey::NonAlbum {
                artist_id: self.artist_id.clone(),
            },
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub album_id: String,
    pub artist_id: String,
    /// Primary artist exactly as tagged.
    pub artist_name: String,
    #[serde(default)]
    pub credits: Vec<Credit>,
    /// Album title exactly as tagged; empty for Non-Album tracks.
    pub album_name: String,
    pub title: String,
    pub normtitle: String,
    pub track_no: Option<u16>,
    pub disc_no: Option<u16>,
    pub year: Option<i32>,
    pub duration_ms: u32,
    pub format: AudioFormat,
    pub file_relpath: String,
    pub checksum: String,
    pub file_size: u64,
    pub file_mtime: u64,
    pub added: u64,
}

impl Track {
    pub fn credit(&self, role: ArtistRole) -> Option<&str> {
        if role == ArtistRole::Artist {
            return Some(self.artist_id.as_str());
        }
        self.credits
            .iter()
            .find(|credit| credit.role == role)
            .map(|credit| credit.artist_id.as_str())
    }

    /// Every artist this track points at, primary artist first.
    pub fn artist_ids(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.artist_id.as_str())
            .chain(self.credits.iter().map(|credit| credit.artist_id.as_str()))
    }

    /// Tagged spellings this track uses for one artist, across all roles.
    pub fn names_for<'a>(&'a self, artist_id: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        let primary = (self.artist_id == artist_id).then_some(self.artist_name.as_str());
        primary.into_iter().chain(
            self.credits
                .iter()
                .filter(move |credit| credit.artist_id == artist_id)
                .map(|credit| credit.name.as_str()),
        )
    }

    pub fn directory(&self) -> &str {
        parent_relpath(&self.file_relpath)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtistRole {
    Artist,
    Ensemble,
    Conductor,
    Composer,
}

impl ArtistRole {
    pub const CLASSICAL: [ArtistRole; 3] =
        [ArtistRole::Ensemble, ArtistRole::Conductor, ArtistRole::Composer];
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credit {
    pub role: ArtistRole,
    pub artist_id: String,
    pub name: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePresence {
    pub ensemble: bool,
    pub conductor: bool,
    pub composer: bool,
}

impl RolePresence {
    pub fn mark(&mut self, role: ArtistRole) {
        match role {
            ArtistRole::Artist => {}
            ArtistRole::Ensemble => self.ensemble = true,
            ArtistRole::Conductor => self.conductor = true,
            ArtistRole::Composer => self.composer = true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    Ogg,
    Opus,
    M4a,
}

impl AudioFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_string_lossy().to_ascii_lowercase();
        match ext.as_str() {
            "mp3" => Some(AudioFormat::Mp3),
            "ogg" => Some(AudioFormat::Ogg),
            "opus" => Some(AudioFormat::Opus),
            "m4a" => Some(AudioFormat::M4a),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlbumKind {
    Regular,
    Various,
    NonAlbum,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumArt {
    pub source_relpath: String,
    pub mime: String,
    pub source_mtime: u64,
    /// Thumbnail edge lengths the stored blobs were rendered at (list, album).
    pub sizes: (u32, u32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThumbnailSize {
    List,
    Album,
}

/// Identity of an album row.
///
/// Regular albums are keyed by artist and title, Various albums by the
/// directory holding their tracks, and the per-artist Non-Album bucket by
/// artist alone so it can span directories.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AlbumKey {
    Artist { artist_id: String, normtitle: String },
    Various { directory: String, normtitle: String },
    NonAlbum { artist_id: String },
}

impl AlbumKey {
    pub fn kind(&self) -> AlbumKind {
        match self {
            AlbumKey::Artist { .. } => AlbumKind::Regular,
            AlbumKey::Various { .. } => AlbumKind::Various,
            AlbumKey::NonAlbum { .. } => AlbumKind::NonAlbum,
        }
    }

    pub fn index_key(&self) -> String {
        match self {
            AlbumKey::Artist {
                artist_id,
                normtitle,
            } => format!("a\x1f{}\x1f{}", artist_id, normtitle),
            AlbumKey::Various {
                directory,
                normtitle,
            } => format!("v\x1f{}\x1f{}", directory, normtitle),
            AlbumKey::NonAlbum { artist_id } => format!("n\x1f{}", artist_id),
        }
    }

    pub fn album_id(&self) -> String {
        stable_id(&self.index_key())
    }
}

pub fn non_album_title(artist_display: &str) -> String {
    format!("{}: {}", NON_ALBUM_TITLE, artist_display)
}

pub fn stable_id(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex().to_string()
}

pub fn artist_id_for(normname: &str) -> String {
    stable_id(&format!("artist\x1f{}", normname))
}

pub fn relpath_from(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    Some(path_to_slash_string(rel))
}

pub fn join_relpath(root: &Path, relpath: &str) -> PathBuf {
    let mut out = PathBuf::from(root);
    for part in relpath.split('/') {
        if part.is_empty() {
            continue;
        }
        out.push(part);
    }
    out
}

/// Directory part of a slash-separated relpath; empty for files at the root.
pub fn parent_relpath(relpath: &str) -> &str {
    match relpath.rfind('/') {
        Some(idx) => &relpath[..idx],
        None => "",
    }
}

fn path_to_slash_string(path: &Path) -> String {
    let parts: Vec<String> = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    parts.join("/")
}
