use std::cmp::Ordering;
use std::fs;
use std::io::Cursor;
use std::path::Path;

use common::{join_relpath, parent_relpath, Album, AlbumArt, AlbumKind};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::catalog::Catalog;
use crate::planner::{RunError, RunMode};
use crate::{Library, LibraryError};

/// Stored image data for one album: the source file and its thumbnails.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtBlobs {
    pub original: Vec<u8>,
    pub list: Vec<u8>,
    pub album: Vec<u8>,
}

#[derive(Debug)]
pub enum ArtError {
    Io(std::io::Error),
    Image(image::ImageError),
}

impl std::fmt::Display for ArtError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtError::Io(err) => write!(f, "io error: {}", err),
            ArtError::Image(err) => write!(f, "image error: {}", err),
        }
    }
}

impl std::error::Error for ArtError {}

impl From<std::io::Error> for ArtError {
    fn from(err: std::io::Error) -> Self {
        ArtError::Io(err)
    }
}

impl From<image::ImageError> for ArtError {
    fn from(err: image::ImageError) -> Self {
        ArtError::Image(err)
    }
}

/// What happened to one album during art resolution.
#[derive(Debug)]
pub enum ArtOutcome {
    Unchanged,
    Attached(String),
    Removed,
    Failed { relpath: String, error: ArtError },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum CoverFormat {
    Png,
    Jpeg,
    Gif,
}

fn cover_format(name: &str) -> Option<CoverFormat> {
    let mime = mime_guess::from_path(name).first()?;
    if mime.type_() != mime_guess::mime::IMAGE {
        return None;
    }
    match mime.subtype().as_str() {
        "png" => Some(CoverFormat::Png),
        "jpeg" => Some(CoverFormat::Jpeg),
        "gif" => Some(CoverFormat::Gif),
        _ => None,
    }
}

fn name_tier(name: &str) -> u8 {
    let lower = name.to_lowercase();
    let stem = match lower.rfind('.') {
        Some(idx) => &lower[..idx],
        None => lower.as_str(),
    };
    if stem == "cover" {
        0
    } else if stem.starts_with("cover") {
        1
    } else {
        2
    }
}

/// Filters file names down to cover candidates, best first: an exact
/// "cover" name, then other "cover*" names, then anything else; PNG before
/// JPEG before GIF within each group.
pub fn cover_candidates<S: AsRef<str>>(names: &[S]) -> Vec<String> {
    let mut ranked: Vec<(u8, CoverFormat, &str)> = names
        .iter()
        .map(|name| name.as_ref())
        .filter_map(|name| cover_format(name).map(|format| (name_tier(name), format, name)))
        .collect();
    ranked.sort_by(|a, b| match (a.0, a.1).cmp(&(b.0, b.1)) {
        Ordering::Equal => a.2.to_lowercase().cmp(&b.2.to_lowercase()).then(a.2.cmp(b.2)),
        other => other,
    });
    ranked.into_iter().map(|(_, _, name)| name.to_string()).collect()
}

fn best_in_dir(root: &Path, dir: &str) -> Option<String> {
    let entries = fs::read_dir(join_relpath(root, dir)).ok()?;
    let mut names = Vec::new();
    for entry in entries.flatten() {
        if entry.path().is_file() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    let best = cover_candidates(&names).into_iter().next()?;
    if dir.is_empty() {
        Some(best)
    } else {
        Some(format!("{}/{}", dir, best))
    }
}

/// Best cover image for an album whose tracks live in `dir`, looking one
/// level up when the directory itself has none. Returns a root-relative path.
pub fn find_album_art(root: &Path, dir: &str) -> Option<String> {
    if let Some(found) = best_in_dir(root, dir) {
        return Some(found);
    }
    if dir.is_empty() {
        return None;
    }
    best_in_dir(root, parent_relpath(dir))
}

/// Decodes an image once and renders square JPEG thumbnails at both sizes.
/// Returns the detected mime type, which follows the content rather than the
/// file extension.
pub fn load_art(path: &Path, sizes: (u32, u32)) -> Result<(String, ArtBlobs), ArtError> {
    let original = fs::read(path)?;
    let format = image::guess_format(&original)?;
    let decoded = image::load_from_memory_with_format(&original, format)?;
    let list = thumbnail(&decoded, sizes.0)?;
    let album = thumbnail(&decoded, sizes.1)?;
    Ok((
        format.to_mime_type().to_string(),
        ArtBlobs {
            original,
            list,
            album,
        },
    ))
}

fn thumbnail(image: &DynamicImage, edge: u32) -> Result<Vec<u8>, ArtError> {
    let resized = image.resize_to_fill(edge, edge, FilterType::Lanczos3);
    let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());
    let mut out = Vec::new();
    rgb.write_to(&mut Cursor::new(&mut out), ImageFormat::Jpeg)?;
    Ok(out)
}

/// Directory of the album's lexically first track.
fn album_dir(catalog: &Catalog, album: &Album) -> Result<Option<String>, LibraryError> {
    let tracks = catalog.album_tracks(&album.id)?;
    Ok(tracks
        .iter()
        .map(|track| track.file_relpath.as_str())
        .min()
        .map(|relpath| parent_relpath(relpath).to_string()))
}

/// Brings one album's art in line with what is on disk.
///
/// Existing art is only re-checked against its own source file: reloaded
/// when the file or the thumbnail sizes changed, searched for again only
/// once the file is gone. A better-named file appearing later is ignored
/// here; `redetect_album_art` picks it up.
pub fn resolve_album_art(
    catalog: &Catalog,
    root: &Path,
    album: &Album,
    sizes: (u32, u32),
) -> Result<ArtOutcome, LibraryError> {
    if album.kind == AlbumKind::NonAlbum {
        return drop_art(catalog, album);
    }

    if let Some(current) = &album.art {
        let path = join_relpath(root, &current.source_relpath);
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => {
                let source_mtime = metadata::mtime_secs(&meta);
                if current.source_mtime == source_mtime && current.sizes == sizes {
                    return Ok(ArtOutcome::Unchanged);
                }
                return attach(catalog, album, current.source_relpath.clone(), source_mtime, sizes, root);
            }
            _ => debug!("Art source {:?} for {:?} is gone", current.source_relpath, album.title),
        }
    }

    redetect_album_art(catalog, root, album, sizes)
}

/// Ranks the candidates next to the album's tracks afresh, replacing
/// whatever art the album carries when a better file is found.
pub fn redetect_album_art(
    catalog: &Catalog,
    root: &Path,
    album: &Album,
    sizes: (u32, u32),
) -> Result<ArtOutcome, LibraryError> {
    if album.kind == AlbumKind::NonAlbum {
        return drop_art(catalog, album);
    }

    let dir = match album_dir(catalog, album)? {
        Some(dir) => dir,
        None => return Ok(ArtOutcome::Unchanged),
    };

    let relpath = match find_album_art(root, &dir) {
        Some(relpath) => relpath,
        None => {
            let outcome = drop_art(catalog, album)?;
            if let ArtOutcome::Removed = outcome {
                debug!("Art for {:?} vanished", album.title);
            }
            return Ok(outcome);
        }
    };

    let source_mtime = match fs::metadata(join_relpath(root, &relpath)) {
        Ok(meta) => metadata::mtime_secs(&meta),
        Err(err) => {
            return Ok(ArtOutcome::Failed {
                relpath,
                error: err.into(),
            })
        }
    };

    if let Some(current) = &album.art {
        if current.source_relpath == relpath
            && current.source_mtime == source_mtime
            && current.sizes == sizes
        {
            return Ok(ArtOutcome::Unchanged);
        }
    }

    attach(catalog, album, relpath, source_mtime, sizes, root)
}

fn drop_art(catalog: &Catalog, album: &Album) -> Result<ArtOutcome, LibraryError> {
    if album.art.is_some() && catalog.clear_album_art(&album.id)? {
        return Ok(ArtOutcome::Removed);
    }
    Ok(ArtOutcome::Unchanged)
}

fn attach(
    catalog: &Catalog,
    album: &Album,
    relpath: String,
    source_mtime: u64,
    sizes: (u32, u32),
    root: &Path,
) -> Result<ArtOutcome, LibraryError> {
    match load_art(&join_relpath(root, &relpath), sizes) {
        Ok((mime, blobs)) => {
            let art = AlbumArt {
                source_relpath: relpath.clone(),
                mime,
                source_mtime,
                sizes,
            };
            catalog.set_album_art(&album.id, art, &blobs)?;
            debug!("Attached {:?} to {:?}", relpath, album.title);
            Ok(ArtOutcome::Attached(relpath))
        }
        Err(error) => {
            warn!("Could not load art {:?}: {}", relpath, error);
            Ok(ArtOutcome::Failed { relpath, error })
        }
    }
}

impl Library {
    /// Re-runs candidate selection for one album outside a reconciliation
    /// run, so a better cover added next to existing art gets picked up.
    /// Holds the run lock while it works. `None` when the album is unknown.
    pub fn refresh_album_art(&self, album_id: &str) -> Result<Option<ArtOutcome>, RunError> {
        let _guard = self.try_begin_run(RunMode::Full)?;
        let album = match self.catalog().get_album(album_id)? {
            Some(album) => album,
            None => return Ok(None),
        };
        let sizes = self.options().thumbnail_sizes();
        let outcome = redetect_album_art(self.catalog(), self.root(), &album, sizes)?;
        Ok(Some(outcome))
    }
}
