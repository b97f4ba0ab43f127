use std::collections::{BTreeMap, BTreeSet, HashMap};

use common::{Album, AlbumKey, AlbumKind, Track};
use tracing::info;

use crate::catalog::Catalog;
use crate::LibraryError;

/// Key a track with this album title and primary artist should live under,
/// given the other tracks already catalogued in its directory.
///
/// `exclude` names the row being rewritten so it does not vote against itself.
pub fn album_key_for(
    catalog: &Catalog,
    dir: &str,
    normtitle: &str,
    artist_id: &str,
    exclude: Option<&str>,
) -> Result<AlbumKey, LibraryError> {
    let mut albums: HashMap<String, Option<Album>> = HashMap::new();
    for track in catalog.tracks_in_dir(dir)? {
        if Some(track.id.as_str()) == exclude || track.artist_id == artist_id {
            continue;
        }
        let album = cached_album(catalog, &mut albums, &track.album_id)?;
        let shares_title = album
            .map(|album| album.kind != AlbumKind::NonAlbum && album.normtitle == normtitle)
            .unwrap_or(false);
        if shares_title {
            return Ok(AlbumKey::Various {
                directory: dir.to_string(),
                normtitle: normtitle.to_string(),
            });
        }
    }
    Ok(AlbumKey::Artist {
        artist_id: artist_id.to_string(),
        normtitle: normtitle.to_string(),
    })
}

/// Regroups one directory's tracks: a title shared by several primary
/// artists becomes a single Various album for the directory, and a title
/// back down to one artist returns to that artist's album.
/// Returns the number of tracks moved.
pub fn collate_directory(catalog: &Catalog, dir: &str) -> Result<usize, LibraryError> {
    let tracks = catalog.tracks_in_dir(dir)?;
    let mut albums: HashMap<String, Option<Album>> = HashMap::new();
    let mut groups: BTreeMap<String, Vec<(Track, Album)>> = BTreeMap::new();

    for track in tracks {
        let album = match cached_album(catalog, &mut albums, &track.album_id)? {
            Some(album) if album.kind != AlbumKind::NonAlbum => album.clone(),
            _ => continue,
        };
        groups
            .entry(album.normtitle.clone())
            .or_default()
            .push((track, album));
    }

    let mut moved = 0usize;
    for (normtitle, members) in groups {
        let artists: BTreeSet<&str> = members
            .iter()
            .map(|(track, _)| track.artist_id.as_str())
            .collect();

        let mut group_moved = 0usize;
        for (track, album) in &members {
            let target = if artists.len() > 1 {
                AlbumKey::Various {
                    directory: dir.to_string(),
                    normtitle: normtitle.clone(),
                }
            } else {
                AlbumKey::Artist {
                    artist_id: track.artist_id.clone(),
                    normtitle: normtitle.clone(),
                }
            };
            if album.key() == target {
                continue;
            }
            if catalog.move_track_to_album(&track.id, &target, &album.title)? {
                group_moved += 1;
            }
        }

        moved += group_moved;
        if group_moved > 0 && artists.len() > 1 {
            info!("Collated {:?} in {:?} as Various", normtitle, dir);
        }
    }

    Ok(moved)
}

fn cached_album<'a>(
    catalog: &Catalog,
    cache: &'a mut HashMap<String, Option<Album>>,
    album_id: &str,
) -> Result<Option<&'a Album>, LibraryError> {
    if !cache.contains_key(album_id) {
        let album = catalog.get_album(album_id)?;
        cache.insert(album_id.to_string(), album);
    }
    Ok(cache.get(album_id).and_then(|album| album.as_ref()))
}
