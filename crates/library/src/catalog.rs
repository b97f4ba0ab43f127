//! Persistent artist/album/track store on top of redb.
//!
//! Entities are bincode blobs keyed by id. Secondary indexes are tables of
//! `head \x1f id` string keys with empty values, scanned by prefix. Every
//! public mutation runs in its own write transaction.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use common::{
    artist_id_for, normalize, non_album_title, split_prefix, Album, AlbumArt, AlbumKey,
    AlbumKind, Artist, ArtistRole, AudioFormat, Credit, RolePresence, ThumbnailSize, Track,
    VARIOUS_NAME,
};
use redb::{
    Database, ReadableTable, TableDefinition, TableError, TableHandle, WriteTransaction,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::art::ArtBlobs;
use crate::live::is_live_title;
use crate::{
    decode_value, encode_value, join_key, prefix_end, prefix_key, split_key_last, LibraryError,
};

const CATALOG_VERSION: u32 = 1;

const META_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");
const ARTISTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("artists");
const ARTISTS_BY_NAME_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("artists_by_name");
const ALBUMS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("albums");
const ALBUMS_BY_NAME_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("albums_by_name");
const ARTIST_ALBUMS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("artist_albums");
const TRACKS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("tracks");
const TRACKS_BY_PATH_TABLE: TableDefinition<&str, &str> = TableDefinition::new("tracks_by_path");
const TRACKS_BY_CHECKSUM_TABLE: TableDefinition<&str, &[u8]> =
    TableDefinition::new("tracks_by_checksum");
const TRACKS_BY_DIR_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("tracks_by_dir");
const ALBUM_TRACKS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("album_tracks");
const ARTIST_TRACKS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("artist_tracks");
const ALBUM_ART_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("album_art");

const BLOB_TABLES: [TableDefinition<&str, &[u8]>; 12] = [
    META_TABLE,
    ARTISTS_TABLE,
    ARTISTS_BY_NAME_TABLE,
    ALBUMS_TABLE,
    ALBUMS_BY_NAME_TABLE,
    ARTIST_ALBUMS_TABLE,
    TRACKS_TABLE,
    TRACKS_BY_CHECKSUM_TABLE,
    TRACKS_BY_DIR_TABLE,
    ALBUM_TRACKS_TABLE,
    ARTIST_TRACKS_TABLE,
    ALBUM_ART_TABLE,
];

const META_VERSION_KEY: &str = "version";
const META_NEXT_TRACK_KEY: &str = "next_track";

const EMPTY: &[u8] = &[];

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryStats {
    pub artists: usize,
    pub albums: usize,
    pub tracks: usize,
}

/// Everything needed to write one track row, with artists still as raw tag
/// names. Artists and the album are resolved inside the same transaction.
#[derive(Clone, Debug)]
pub struct TrackRecord {
    /// Row to overwrite; `None` allocates a new id.
    pub id: Option<String>,
    pub relpath: String,
    pub checksum: String,
    pub format: AudioFormat,
    pub size: u64,
    pub mtime: u64,
    pub added: u64,
    pub title: String,
    pub track_no: Option<u16>,
    pub disc_no: Option<u16>,
    pub year: Option<i32>,
    pub duration_ms: u32,
    pub artist: String,
    pub ensemble: Option<String>,
    pub conductor: Option<String>,
    pub composer: Option<String>,
    pub album_key: AlbumKey,
    pub album_title: String,
}

impl TrackRecord {
    fn classical_names(&self) -> Vec<(ArtistRole, &str)> {
        let mut out = Vec::new();
        for (role, name) in [
            (ArtistRole::Ensemble, &self.ensemble),
            (ArtistRole::Conductor, &self.conductor),
            (ArtistRole::Composer, &self.composer),
        ] {
            if let Some(name) = name {
                out.push((role, name.as_str()));
            }
        }
        out
    }
}

#[derive(Clone)]
pub struct Catalog {
    db: Arc<Database>,
}

impl Catalog {
    pub fn open(path: &Path) -> Result<Self, LibraryError> {
        let db = open_or_create_db(path)?;
        let catalog = Self::from_db(Arc::new(db))?;
        info!("Opened catalog at {:?}", path);
        Ok(catalog)
    }

    pub fn from_db(db: Arc<Database>) -> Result<Self, LibraryError> {
        init_tables(&db)?;
        Ok(Self { db })
    }

    pub fn ensure_various_artist(&self) -> Result<Artist, LibraryError> {
        let txn = self.db.begin_write()?;
        let artist = various_in(&txn)?;
        txn.commit()?;
        Ok(artist)
    }

    pub fn find_or_create_artist(&self, name: &str) -> Result<Artist, LibraryError> {
        let txn = self.db.begin_write()?;
        let artist = artist_in(&txn, name)?;
        txn.commit()?;
        Ok(artist)
    }

    pub fn find_or_create_album(
        &self,
        key: &AlbumKey,
        title: &str,
        added: u64,
    ) -> Result<Album, LibraryError> {
        let txn = self.db.begin_write()?;
        let album = album_in(&txn, key, title, None, added)?;
        txn.commit()?;
        Ok(album)
    }

    /// Creates or overwrites one track together with the artists and album it
    /// points at, then drops whatever the previous version left orphaned.
    pub fn upsert_track(&self, record: &TrackRecord) -> Result<Track, LibraryError> {
        let txn = self.db.begin_write()?;
        let track = {
            let previous: Option<Track> = match &record.id {
                Some(id) => txn_get(&txn, TRACKS_TABLE, id)?,
                None => None,
            };
            if let Some(previous) = &previous {
                unindex_track(&txn, previous)?;
            }

            let artist = artist_in(&txn, &record.artist)?;
            let mut credits = Vec::new();
            for (role, name) in record.classical_names() {
                let credited = artist_in(&txn, name)?;
                credits.push(Credit {
                    role,
                    artist_id: credited.id,
                    name: name.to_string(),
                });
            }

            let album_title = match record.album_key {
                AlbumKey::NonAlbum { .. } => non_album_title(&artist.display_name()),
                _ => record.album_title.clone(),
            };
            let album = album_in(&txn, &record.album_key, &album_title, record.year, record.added)?;

            let id = match &previous {
                Some(previous) => previous.id.clone(),
                None => next_track_id(&txn)?,
            };
            let track = Track {
                id,
                album_id: album.id.clone(),
                artist_id: artist.id,
                artist_name: record.artist.clone(),
                credits,
                album_name: record.album_title.clone(),
                title: record.title.clone(),
                normtitle: normalize(&record.title),
                track_no: record.track_no,
                disc_no: record.disc_no,
                year: record.year,
                duration_ms: record.duration_ms,
                format: record.format,
                file_relpath: record.relpath.clone(),
                checksum: record.checksum.clone(),
                file_size: record.size,
                file_mtime: record.mtime,
                added: record.added,
            };
            txn_put(&txn, TRACKS_TABLE, &track.id, &track)?;
            index_track(&txn, &track)?;
            respell_artist(&txn, &track.artist_id, &track.artist_name)?;
            for credit in &track.credits {
                respell_artist(&txn, &credit.artist_id, &credit.name)?;
            }
            respell_album(&txn, &album.id, &track.album_name)?;
            refresh_album_in(&txn, &album.id)?;

            if let Some(previous) = &previous {
                if previous.album_id != track.album_id {
                    retire_album(&txn, &previous.album_id, &track.album_id)?;
                }
                for artist_id in previous.artist_ids() {
                    prune_artist(&txn, artist_id)?;
                }
            }
            track
        };
        txn.commit()?;
        Ok(track)
    }

    /// Removes a track and any album or artist it was the last reference to.
    pub fn delete_track(&self, track_id: &str) -> Result<Option<Track>, LibraryError> {
        let txn = self.db.begin_write()?;
        let track = {
            let track: Option<Track> = txn_get(&txn, TRACKS_TABLE, track_id)?;
            if let Some(track) = &track {
                unindex_track(&txn, track)?;
                txn_remove(&txn, TRACKS_TABLE, &track.id)?;
                if !prune_album(&txn, &track.album_id)? {
                    refresh_album_in(&txn, &track.album_id)?;
                }
                for artist_id in track.artist_ids() {
                    prune_artist(&txn, artist_id)?;
                }
            }
            track
        };
        txn.commit()?;
        Ok(track)
    }

    /// Re-keys a track into another album, creating it if needed.
    /// Returns false when the track is missing or already there.
    pub fn move_track_to_album(
        &self,
        track_id: &str,
        key: &AlbumKey,
        title: &str,
    ) -> Result<bool, LibraryError> {
        let txn = self.db.begin_write()?;
        let moved = {
            let track: Option<Track> = txn_get(&txn, TRACKS_TABLE, track_id)?;
            match track {
                Some(mut track) if track.album_id != key.album_id() => {
                    let album = album_in(&txn, key, title, track.year, track.added)?;
                    let old_album_id = track.album_id.clone();
                    txn_remove(&txn, ALBUM_TRACKS_TABLE, &join_key(&old_album_id, &track.id))?;
                    track.album_id = album.id.clone();
                    txn_put(&txn, TRACKS_TABLE, &track.id, &track)?;
                    txn_mark(&txn, ALBUM_TRACKS_TABLE, &join_key(&album.id, &track.id))?;
                    refresh_album_in(&txn, &album.id)?;
                    retire_album(&txn, &old_album_id, &album.id)?;
                    true
                }
                _ => false,
            }
        };
        txn.commit()?;
        Ok(moved)
    }

    /// Records a new size/mtime for a file whose content did not change.
    pub fn touch_track(&self, track_id: &str, size: u64, mtime: u64) -> Result<(), LibraryError> {
        let txn = self.db.begin_write()?;
        {
            let track: Option<Track> = txn_get(&txn, TRACKS_TABLE, track_id)?;
            if let Some(mut track) = track {
                track.file_size = size;
                track.file_mtime = mtime;
                txn_put(&txn, TRACKS_TABLE, &track.id, &track)?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Recomputes the live flag, year, addition time and role summary.
    pub fn refresh_album(&self, album_id: &str) -> Result<Option<Album>, LibraryError> {
        let txn = self.db.begin_write()?;
        let album = refresh_album_in(&txn, album_id)?;
        txn.commit()?;
        Ok(album)
    }

    pub fn set_album_art(
        &self,
        album_id: &str,
        art: AlbumArt,
        blobs: &ArtBlobs,
    ) -> Result<bool, LibraryError> {
        let txn = self.db.begin_write()?;
        let updated = {
            let album: Option<Album> = txn_get(&txn, ALBUMS_TABLE, album_id)?;
            match album {
                Some(mut album) => {
                    album.art = Some(art);
                    txn_put(&txn, ALBUMS_TABLE, album_id, &album)?;
                    txn_put(&txn, ALBUM_ART_TABLE, album_id, blobs)?;
                    true
                }
                None => false,
            }
        };
        txn.commit()?;
        Ok(updated)
    }

    pub fn clear_album_art(&self, album_id: &str) -> Result<bool, LibraryError> {
        let txn = self.db.begin_write()?;
        let cleared = {
            let album: Option<Album> = txn_get(&txn, ALBUMS_TABLE, album_id)?;
            match album {
                Some(mut album) if album.art.is_some() => {
                    album.art = None;
                    txn_put(&txn, ALBUMS_TABLE, album_id, &album)?;
                    txn_remove(&txn, ALBUM_ART_TABLE, album_id)?;
                    true
                }
                _ => false,
            }
        };
        txn.commit()?;
        Ok(cleared)
    }

    pub fn find_track_by_path(&self, relpath: &str) -> Result<Option<Track>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let path_table = read_txn.open_table(TRACKS_BY_PATH_TABLE)?;
        let track_table = read_txn.open_table(TRACKS_TABLE)?;
        let track_id = match path_table.get(relpath)? {
            Some(value) => value.value().to_string(),
            None => return Ok(None),
        };
        get_decoded(&track_table, &track_id)
    }

    pub fn find_track_by_checksum(&self, checksum: &str) -> Result<Vec<Track>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(TRACKS_BY_CHECKSUM_TABLE)?;
        let track_table = read_txn.open_table(TRACKS_TABLE)?;
        let mut tracks = Vec::new();
        for track_id in tails_with_prefix(&index, checksum)? {
            if let Some(track) = get_decoded(&track_table, &track_id)? {
                tracks.push(track);
            }
        }
        Ok(tracks)
    }

    /// Tracks whose file sits directly in `dir` (a root-relative path).
    pub fn tracks_in_dir(&self, dir: &str) -> Result<Vec<Track>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(TRACKS_BY_DIR_TABLE)?;
        let track_table = read_txn.open_table(TRACKS_TABLE)?;
        let mut tracks: Vec<Track> = Vec::new();
        for track_id in tails_with_prefix(&index, dir)? {
            if let Some(track) = get_decoded(&track_table, &track_id)? {
                tracks.push(track);
            }
        }
        tracks.sort_by(|a, b| a.file_relpath.cmp(&b.file_relpath));
        Ok(tracks)
    }

    /// `(relpath, track id)` for every track, in path order.
    pub fn all_known_paths(&self) -> Result<Vec<(String, String)>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(TRACKS_BY_PATH_TABLE)?;
        let mut out = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            out.push((entry.0.value().to_string(), entry.1.value().to_string()));
        }
        Ok(out)
    }

    /// Albums that could carry art but have none yet.
    pub fn albums_missing_art(&self) -> Result<Vec<Album>, LibraryError> {
        Ok(self
            .all_albums()?
            .into_iter()
            .filter(|album| album.art.is_none() && album.kind != AlbumKind::NonAlbum)
            .collect())
    }

    pub fn all_albums(&self) -> Result<Vec<Album>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ALBUMS_TABLE)?;
        let mut albums = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            albums.push(decode_value(entry.1.value())?);
        }
        Ok(albums)
    }

    pub fn list_artists(
        &self,
        search: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<Artist>, usize), LibraryError> {
        let read_txn = self.db.begin_read()?;
        let name_table = read_txn.open_table(ARTISTS_BY_NAME_TABLE)?;
        let artist_table = read_txn.open_table(ARTISTS_TABLE)?;
        search_by_name(&name_table, &artist_table, search, limit, offset)
    }

    pub fn list_albums(
        &self,
        search: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<Album>, usize), LibraryError> {
        let read_txn = self.db.begin_read()?;
        let name_table = read_txn.open_table(ALBUMS_BY_NAME_TABLE)?;
        let album_table = read_txn.open_table(ALBUMS_TABLE)?;
        search_by_name(&name_table, &album_table, search, limit, offset)
    }

    pub fn get_artist(&self, artist_id: &str) -> Result<Option<Artist>, LibraryError> {
        self.get_one(ARTISTS_TABLE, artist_id)
    }

    pub fn get_album(&self, album_id: &str) -> Result<Option<Album>, LibraryError> {
        self.get_one(ALBUMS_TABLE, album_id)
    }

    pub fn get_track(&self, track_id: &str) -> Result<Option<Track>, LibraryError> {
        self.get_one(TRACKS_TABLE, track_id)
    }

    /// Tracks of an album in disc, track number, title order.
    pub fn album_tracks(&self, album_id: &str) -> Result<Vec<Track>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(ALBUM_TRACKS_TABLE)?;
        let track_table = read_txn.open_table(TRACKS_TABLE)?;
        let mut tracks: Vec<Track> = Vec::new();
        for track_id in tails_with_prefix(&index, album_id)? {
            if let Some(track) = get_decoded(&track_table, &track_id)? {
                tracks.push(track);
            }
        }
        tracks.sort_by(|a, b| {
            (
                a.disc_no.unwrap_or(u16::MAX),
                a.track_no.unwrap_or(u16::MAX),
                &a.normtitle,
                &a.file_relpath,
            )
                .cmp(&(
                    b.disc_no.unwrap_or(u16::MAX),
                    b.track_no.unwrap_or(u16::MAX),
                    &b.normtitle,
                    &b.file_relpath,
                ))
        });
        Ok(tracks)
    }

    pub fn artist_albums(&self, artist_id: &str) -> Result<Vec<Album>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(ARTIST_ALBUMS_TABLE)?;
        let album_table = read_txn.open_table(ALBUMS_TABLE)?;
        let mut albums: Vec<Album> = Vec::new();
        for album_id in tails_with_prefix(&index, artist_id)? {
            if let Some(album) = get_decoded(&album_table, &album_id)? {
                albums.push(album);
            }
        }
        albums.sort_by(|a, b| (a.year, &a.normtitle).cmp(&(b.year, &b.normtitle)));
        Ok(albums)
    }

    /// Full-size art as `(mime, bytes)`.
    pub fn album_art(&self, album_id: &str) -> Result<Option<(String, Vec<u8>)>, LibraryError> {
        let album = match self.get_album(album_id)? {
            Some(album) => album,
            None => return Ok(None),
        };
        let art = match album.art {
            Some(art) => art,
            None => return Ok(None),
        };
        let blobs: Option<ArtBlobs> = self.get_one(ALBUM_ART_TABLE, album_id)?;
        Ok(blobs.map(|blobs| (art.mime, blobs.original)))
    }

    /// Square JPEG thumbnail of the album art.
    pub fn album_thumbnail(
        &self,
        album_id: &str,
        size: ThumbnailSize,
    ) -> Result<Option<Vec<u8>>, LibraryError> {
        let blobs: Option<ArtBlobs> = self.get_one(ALBUM_ART_TABLE, album_id)?;
        Ok(blobs.map(|blobs| match size {
            ThumbnailSize::List => blobs.list,
            ThumbnailSize::Album => blobs.album,
        }))
    }

    pub fn stats(&self) -> Result<LibraryStats, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let artists = read_txn.open_table(ARTISTS_TABLE)?.len()?;
        let albums = read_txn.open_table(ALBUMS_TABLE)?.len()?;
        let tracks = read_txn.open_table(TRACKS_TABLE)?.len()?;
        Ok(LibraryStats {
            artists: artists as usize,
            albums: albums as usize,
            tracks: tracks as usize,
        })
    }

    fn get_one<V: for<'de> Deserialize<'de>>(
        &self,
        definition: TableDefinition<&str, &[u8]>,
        key: &str,
    ) -> Result<Option<V>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(definition)?;
        get_decoded(&table, key)
    }
}

fn open_or_create_db(path: &Path) -> Result<Database, LibraryError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    if path.exists() {
        Ok(Database::open(path)?)
    } else {
        Ok(Database::create(path)?)
    }
}

fn read_version(db: &Database) -> Result<Option<u32>, LibraryError> {
    let read_txn = db.begin_read()?;
    let table = match read_txn.open_table(META_TABLE) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    get_decoded(&table, META_VERSION_KEY)
}

fn init_tables(db: &Database) -> Result<(), LibraryError> {
    let version = read_version(db)?;
    let txn = db.begin_write()?;
    match version {
        Some(version) if version == CATALOG_VERSION => {}
        Some(version) => {
            warn!("Catalog version mismatch ({}); rebuilding", version);
            for definition in BLOB_TABLES {
                clear_table(&txn, definition)?;
            }
            clear_table(&txn, TRACKS_BY_PATH_TABLE)?;
        }
        None => info!("Creating empty catalog"),
    }
    for definition in BLOB_TABLES {
        txn.open_table(definition)?;
    }
    txn.open_table(TRACKS_BY_PATH_TABLE)?;
    txn_put(&txn, META_TABLE, META_VERSION_KEY, &CATALOG_VERSION)?;
    txn.commit()?;
    Ok(())
}

fn clear_table(txn: &WriteTransaction, table: impl TableHandle) -> Result<(), LibraryError> {
    match txn.delete_table(table) {
        Ok(_) => Ok(()),
        Err(TableError::TableDoesNotExist(_)) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn get_decoded<T, V>(table: &T, key: &str) -> Result<Option<V>, LibraryError>
where
    T: ReadableTable<&'static str, &'static [u8]>,
    V: for<'de> Deserialize<'de>,
{
    let value = match table.get(key)? {
        Some(value) => Some(decode_value(value.value())?),
        None => None,
    };
    Ok(value)
}

/// Id parts of every `head \x1f id` key under `head`.
fn tails_with_prefix<T>(table: &T, head: &str) -> Result<Vec<String>, LibraryError>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    let prefix = prefix_key(head);
    let end = prefix_end(&prefix);
    let mut out = Vec::new();
    for entry in table.range(prefix.as_str()..end.as_str())? {
        let entry = entry?;
        let (_, tail) = split_key_last(entry.0.value())?;
        out.push(tail.to_string());
    }
    Ok(out)
}

fn search_by_name<N, T, V>(
    name_table: &N,
    row_table: &T,
    search: Option<&str>,
    limit: usize,
    offset: usize,
) -> Result<(Vec<V>, usize), LibraryError>
where
    N: ReadableTable<&'static str, &'static [u8]>,
    T: ReadableTable<&'static str, &'static [u8]>,
    V: for<'de> Deserialize<'de>,
{
    let search = search
        .map(normalize)
        .filter(|value| !value.is_empty());

    let mut total = 0usize;
    let mut items = Vec::new();

    for entry in name_table.iter()? {
        let entry = entry?;
        let key = entry.0.value();
        let (normname, row_id) = split_key_last(key)?;
        if let Some(search) = &search {
            if !normname.contains(search.as_str()) {
                continue;
            }
        }

        total += 1;
        if total <= offset {
            continue;
        }
        if items.len() >= limit {
            continue;
        }

        if let Some(row) = get_decoded(row_table, row_id)? {
            items.push(row);
        }
    }

    Ok((items, total))
}

fn txn_get<V: for<'de> Deserialize<'de>>(
    txn: &WriteTransaction,
    definition: TableDefinition<&str, &[u8]>,
    key: &str,
) -> Result<Option<V>, LibraryError> {
    let table = txn.open_table(definition)?;
    get_decoded(&table, key)
}

fn txn_put<V: Serialize>(
    txn: &WriteTransaction,
    definition: TableDefinition<&str, &[u8]>,
    key: &str,
    value: &V,
) -> Result<(), LibraryError> {
    let bytes = encode_value(value)?;
    let mut table = txn.open_table(definition)?;
    table.insert(key, bytes.as_slice())?;
    Ok(())
}

fn txn_mark(
    txn: &WriteTransaction,
    definition: TableDefinition<&str, &[u8]>,
    key: &str,
) -> Result<(), LibraryError> {
    let mut table = txn.open_table(definition)?;
    table.insert(key, EMPTY)?;
    Ok(())
}

fn txn_remove(
    txn: &WriteTransaction,
    definition: TableDefinition<&str, &[u8]>,
    key: &str,
) -> Result<(), LibraryError> {
    let mut table = txn.open_table(definition)?;
    table.remove(key)?;
    Ok(())
}

fn txn_has_prefix(
    txn: &WriteTransaction,
    definition: TableDefinition<&str, &[u8]>,
    head: &str,
) -> Result<bool, LibraryError> {
    let table = txn.open_table(definition)?;
    let prefix = prefix_key(head);
    let end = prefix_end(&prefix);
    let mut range = table.range(prefix.as_str()..end.as_str())?;
    let found = range.next().transpose()?.is_some();
    Ok(found)
}

fn txn_tails(
    txn: &WriteTransaction,
    definition: TableDefinition<&str, &[u8]>,
    head: &str,
) -> Result<Vec<String>, LibraryError> {
    let table = txn.open_table(definition)?;
    tails_with_prefix(&table, head)
}

fn next_track_id(txn: &WriteTransaction) -> Result<String, LibraryError> {
    let next: u64 = txn_get(txn, META_TABLE, META_NEXT_TRACK_KEY)?.unwrap_or(1);
    txn_put(txn, META_TABLE, META_NEXT_TRACK_KEY, &(next + 1))?;
    Ok(format!("{:016x}", next))
}

fn various_in(txn: &WriteTransaction) -> Result<Artist, LibraryError> {
    let normname = normalize(VARIOUS_NAME);
    let id = artist_id_for(&normname);
    if let Some(artist) = txn_get::<Artist>(txn, ARTISTS_TABLE, &id)? {
        return Ok(artist);
    }
    let artist = Artist {
        id: id.clone(),
        name: VARIOUS_NAME.to_string(),
        prefix: None,
        normname: normname.clone(),
        various: true,
    };
    txn_put(txn, ARTISTS_TABLE, &id, &artist)?;
    txn_mark(txn, ARTISTS_BY_NAME_TABLE, &join_key(&normname, &id))?;
    info!("Created reserved {:?} artist", VARIOUS_NAME);
    Ok(artist)
}

fn artist_in(txn: &WriteTransaction, raw_name: &str) -> Result<Artist, LibraryError> {
    let (prefix, name) = split_prefix(raw_name);
    let normname = normalize(&name);
    let id = artist_id_for(&normname);
    if let Some(mut artist) = txn_get::<Artist>(txn, ARTISTS_TABLE, &id)? {
        if artist.prefix.is_none() && prefix.is_some() {
            artist.prefix = prefix;
            txn_put(txn, ARTISTS_TABLE, &id, &artist)?;
        }
        return Ok(artist);
    }
    let artist = Artist {
        id: id.clone(),
        name,
        prefix,
        normname: normname.clone(),
        various: false,
    };
    txn_put(txn, ARTISTS_TABLE, &id, &artist)?;
    txn_mark(txn, ARTISTS_BY_NAME_TABLE, &join_key(&normname, &id))?;
    debug!("Created artist {:?}", artist.display_name());
    Ok(artist)
}

fn album_in(
    txn: &WriteTransaction,
    key: &AlbumKey,
    title: &str,
    year: Option<i32>,
    added: u64,
) -> Result<Album, LibraryError> {
    let id = key.album_id();
    if let Some(album) = txn_get::<Album>(txn, ALBUMS_TABLE, &id)? {
        return Ok(album);
    }
    let (artist_id, normtitle, directory) = match key {
        AlbumKey::Artist {
            artist_id,
            normtitle,
        } => (artist_id.clone(), normtitle.clone(), None),
        AlbumKey::Various {
            directory,
            normtitle,
        } => (various_in(txn)?.id, normtitle.clone(), Some(directory.clone())),
        AlbumKey::NonAlbum { artist_id } => (artist_id.clone(), normalize(title), None),
    };
    let kind = key.kind();
    let album = Album {
        id: id.clone(),
        artist_id: artist_id.clone(),
        title: title.to_string(),
        live: kind != AlbumKind::NonAlbum && is_live_title(&normtitle),
        normtitle: normtitle.clone(),
        kind,
        directory,
        year,
        added,
        art: None,
        roles: RolePresence::default(),
    };
    txn_put(txn, ALBUMS_TABLE, &id, &album)?;
    txn_mark(txn, ALBUMS_BY_NAME_TABLE, &join_key(&normtitle, &id))?;
    txn_mark(txn, ARTIST_ALBUMS_TABLE, &join_key(&artist_id, &id))?;
    debug!("Created {:?} album {:?}", kind, album.title);
    Ok(album)
}

fn index_track(txn: &WriteTransaction, track: &Track) -> Result<(), LibraryError> {
    {
        let mut paths = txn.open_table(TRACKS_BY_PATH_TABLE)?;
        paths.insert(track.file_relpath.as_str(), track.id.as_str())?;
    }
    txn_mark(txn, TRACKS_BY_CHECKSUM_TABLE, &join_key(&track.checksum, &track.id))?;
    txn_mark(txn, TRACKS_BY_DIR_TABLE, &join_key(track.directory(), &track.id))?;
    txn_mark(txn, ALBUM_TRACKS_TABLE, &join_key(&track.album_id, &track.id))?;
    let artist_ids: BTreeSet<&str> = track.artist_ids().collect();
    for artist_id in artist_ids {
        txn_mark(txn, ARTIST_TRACKS_TABLE, &join_key(artist_id, &track.id))?;
    }
    Ok(())
}

fn unindex_track(txn: &WriteTransaction, track: &Track) -> Result<(), LibraryError> {
    {
        let mut paths = txn.open_table(TRACKS_BY_PATH_TABLE)?;
        let owner = match paths.get(track.file_relpath.as_str())? {
            Some(value) => Some(value.value().to_string()),
            None => None,
        };
        if owner.as_deref() == Some(track.id.as_str()) {
            paths.remove(track.file_relpath.as_str())?;
        }
    }
    txn_remove(txn, TRACKS_BY_CHECKSUM_TABLE, &join_key(&track.checksum, &track.id))?;
    txn_remove(txn, TRACKS_BY_DIR_TABLE, &join_key(track.directory(), &track.id))?;
    txn_remove(txn, ALBUM_TRACKS_TABLE, &join_key(&track.album_id, &track.id))?;
    for artist_id in track.artist_ids() {
        txn_remove(txn, ARTIST_TRACKS_TABLE, &join_key(artist_id, &track.id))?;
    }
    Ok(())
}

fn refresh_album_in(txn: &WriteTransaction, album_id: &str) -> Result<Option<Album>, LibraryError> {
    let mut album: Album = match txn_get(txn, ALBUMS_TABLE, album_id)? {
        Some(album) => album,
        None => return Ok(None),
    };
    let track_ids = txn_tails(txn, ALBUM_TRACKS_TABLE, album_id)?;
    if track_ids.is_empty() {
        return Ok(Some(album));
    }

    let mut roles = RolePresence::default();
    let mut year: Option<i32> = None;
    let mut added = u64::MAX;
    for track_id in &track_ids {
        let track: Track = match txn_get(txn, TRACKS_TABLE, track_id)? {
            Some(track) => track,
            None => continue,
        };
        for credit in &track.credits {
            roles.mark(credit.role);
        }
        year = match (year, track.year) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        added = added.min(track.added);
    }
    let live = album.kind != AlbumKind::NonAlbum && is_live_title(&album.normtitle);

    let changed = album.roles != roles
        || album.year != year
        || album.live != live
        || (added != u64::MAX && album.added != added);
    if changed {
        album.roles = roles;
        album.year = year;
        album.live = live;
        if added != u64::MAX {
            album.added = added;
        }
        txn_put(txn, ALBUMS_TABLE, album_id, &album)?;
    }
    Ok(Some(album))
}

/// Settles the album a track just left for `successor`. An album left empty
/// hands its art over to a successor without art, then is pruned.
fn retire_album(txn: &WriteTransaction, album_id: &str, successor: &str) -> Result<(), LibraryError> {
    if txn_has_prefix(txn, ALBUM_TRACKS_TABLE, album_id)? {
        refresh_album_in(txn, album_id)?;
        return Ok(());
    }
    carry_art(txn, album_id, successor)?;
    prune_album(txn, album_id)?;
    Ok(())
}

fn carry_art(txn: &WriteTransaction, from_id: &str, to_id: &str) -> Result<(), LibraryError> {
    let art = match txn_get::<Album>(txn, ALBUMS_TABLE, from_id)? {
        Some(Album { art: Some(art), .. }) => art,
        _ => return Ok(()),
    };
    let mut target: Album = match txn_get::<Album>(txn, ALBUMS_TABLE, to_id)? {
        Some(album) if album.art.is_none() && album.kind != AlbumKind::NonAlbum => album,
        _ => return Ok(()),
    };
    let blobs: ArtBlobs = match txn_get(txn, ALBUM_ART_TABLE, from_id)? {
        Some(blobs) => blobs,
        None => return Ok(()),
    };
    target.art = Some(art);
    txn_put(txn, ALBUMS_TABLE, to_id, &target)?;
    txn_put(txn, ALBUM_ART_TABLE, to_id, &blobs)?;
    debug!("Carried art over to {:?}", target.title);
    Ok(())
}

/// Adopts `spelling` as the artist's name once every track pointing at the
/// artist is tagged that way.
fn respell_artist(txn: &WriteTransaction, artist_id: &str, spelling: &str) -> Result<(), LibraryError> {
    let spelled = split_prefix(spelling);
    let mut artist: Artist = match txn_get::<Artist>(txn, ARTISTS_TABLE, artist_id)? {
        Some(artist)
            if !artist.various
                && (artist.prefix.as_ref(), &artist.name) != (spelled.0.as_ref(), &spelled.1) =>
        {
            artist
        }
        _ => return Ok(()),
    };
    for track_id in txn_tails(txn, ARTIST_TRACKS_TABLE, artist_id)? {
        let track: Track = match txn_get(txn, TRACKS_TABLE, &track_id)? {
            Some(track) => track,
            None => continue,
        };
        if track.names_for(artist_id).any(|used| split_prefix(used) != spelled) {
            return Ok(());
        }
    }

    debug!("Renaming artist {:?} to {:?}", artist.display_name(), spelling);
    (artist.prefix, artist.name) = spelled;
    txn_put(txn, ARTISTS_TABLE, artist_id, &artist)?;

    let bucket_id = AlbumKey::NonAlbum {
        artist_id: artist_id.to_string(),
    }
    .album_id();
    if let Some(mut bucket) = txn_get::<Album>(txn, ALBUMS_TABLE, &bucket_id)? {
        bucket.title = non_album_title(&artist.display_name());
        txn_put(txn, ALBUMS_TABLE, &bucket_id, &bucket)?;
    }
    Ok(())
}

/// Adopts `title` as the album's title once every track on it is tagged that way.
fn respell_album(txn: &WriteTransaction, album_id: &str, title: &str) -> Result<(), LibraryError> {
    let mut album: Album = match txn_get::<Album>(txn, ALBUMS_TABLE, album_id)? {
        Some(album) if album.kind != AlbumKind::NonAlbum && album.title != title => album,
        _ => return Ok(()),
    };
    for track_id in txn_tails(txn, ALBUM_TRACKS_TABLE, album_id)? {
        let track: Track = match txn_get(txn, TRACKS_TABLE, &track_id)? {
            Some(track) => track,
            None => continue,
        };
        if track.album_name != title {
            return Ok(());
        }
    }
    debug!("Renaming album {:?} to {:?}", album.title, title);
    album.title = title.to_string();
    txn_put(txn, ALBUMS_TABLE, album_id, &album)?;
    Ok(())
}

/// Deletes an album with no tracks left. Returns true if it was removed.
fn prune_album(txn: &WriteTransaction, album_id: &str) -> Result<bool, LibraryError> {
    if txn_has_prefix(txn, ALBUM_TRACKS_TABLE, album_id)? {
        return Ok(false);
    }
    let album: Album = match txn_get(txn, ALBUMS_TABLE, album_id)? {
        Some(album) => album,
        None => return Ok(false),
    };
    txn_remove(txn, ALBUMS_TABLE, album_id)?;
    txn_remove(txn, ALBUMS_BY_NAME_TABLE, &join_key(&album.normtitle, album_id))?;
    txn_remove(txn, ARTIST_ALBUMS_TABLE, &join_key(&album.artist_id, album_id))?;
    txn_remove(txn, ALBUM_ART_TABLE, album_id)?;
    debug!("Removed empty album {:?}", album.title);
    prune_artist(txn, &album.artist_id)?;
    Ok(true)
}

/// Deletes an artist nothing refers to anymore. Never removes Various.
fn prune_artist(txn: &WriteTransaction, artist_id: &str) -> Result<bool, LibraryError> {
    let artist: Artist = match txn_get(txn, ARTISTS_TABLE, artist_id)? {
        Some(artist) => artist,
        None => return Ok(false),
    };
    if artist.various
        || txn_has_prefix(txn, ARTIST_TRACKS_TABLE, artist_id)?
        || txn_has_prefix(txn, ARTIST_ALBUMS_TABLE, artist_id)?
    {
        return Ok(false);
    }
    txn_remove(txn, ARTISTS_TABLE, artist_id)?;
    txn_remove(txn, ARTISTS_BY_NAME_TABLE, &join_key(&artist.normname, artist_id))?;
    debug!("Removed orphaned artist {:?}", artist.display_name());
    Ok(true)
}
