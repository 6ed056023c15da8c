//! # Catalog maintenance
//!
//! Ingestion and upkeep of the Artist/Album/Song tables:
//!
//! - [`add_song`] get-or-creates the artist and album, then inserts the song
//! - [`refresh_totals`] keeps `count_songs`, `count_albums` and `total_length` current
//! - [`set_genre`] assigns a genre and pushes it down the hierarchy
//! - [`validate_songs`] finds (and optionally removes) songs whose audio file is gone
//! - [`search`] looks up artists, albums and songs by name
//!
//! Tag extraction is out of scope; songs arrive as already-parsed [`NewSong`]
//! records, typically from a JSON import file.

use crate::db;
use crate::error::{CoreError, Result};
use crate::models::{is_known_genre, Album, Artist, EntityKind, EntityRef, Song};
use crate::stats;
use log::{debug, info, warn};
use rayon::prelude::*;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Tag data for one song, as produced by an external scanner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSong {
    pub artist: String,
    pub album: String,
    pub name: String,
    /// Path relative to the music directory.
    pub rel_path: String,
    #[serde(default)]
    pub year: i32,
    #[serde(default = "default_one")]
    pub disc_number: u32,
    #[serde(default = "default_one")]
    pub total_discs: u32,
    #[serde(default)]
    pub track_number: u32,
    #[serde(default)]
    pub total_tracks: u32,
    /// Seconds.
    #[serde(default)]
    pub track_length: f64,
}

const fn default_one() -> u32 {
    1
}

impl NewSong {
    /// Minimal record with a conventional `artist/album/name.mp3` path.
    #[must_use]
    pub fn new(artist: &str, album: &str, name: &str) -> Self {
        Self {
            artist: artist.to_string(),
            album: album.to_string(),
            name: name.to_string(),
            rel_path: format!("{artist}/{album}/{name}.mp3"),
            year: 0,
            disc_number: 1,
            total_discs: 1,
            track_number: 0,
            total_tracks: 0,
            track_length: 0.0,
        }
    }

    #[must_use]
    pub fn with_track(mut self, track_number: u32, track_length: f64) -> Self {
        self.track_number = track_number;
        self.track_length = track_length;
        self
    }
}

/// URL-safe slug: lowercase alphanumerics separated by single dashes.
///
/// # Examples
///
/// ```
/// use speler::catalog::slugify;
///
/// assert_eq!(slugify("AC/DC - Back In Black"), "ac-dc-back-in-black");
/// assert_eq!(slugify("  Ärzte!  "), "ärzte");
/// ```
#[must_use]
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut dash = false;
    for c in text.chars() {
        if c.is_alphanumeric() {
            if dash && !slug.is_empty() {
                slug.push('-');
            }
            dash = false;
            slug.extend(c.to_lowercase());
        } else {
            dash = true;
        }
    }
    slug
}

/// `base`, or `base-2`, `base-3`... whichever is still free in `table`.
fn unique_slug(conn: &Connection, table: &str, base: &str) -> Result<String> {
    let base = if base.is_empty() { "untitled" } else { base };
    let sql = format!("SELECT 1 FROM {table} WHERE slug = ?1");
    let mut candidate = base.to_string();
    let mut n = 1;
    while conn.query_row(&sql, [&candidate], |_| Ok(())).optional()?.is_some() {
        n += 1;
        candidate = format!("{base}-{n}");
    }
    Ok(candidate)
}

fn get_or_create_artist(conn: &Connection, name: &str) -> Result<(i64, Option<String>)> {
    let existing = conn
        .query_row("SELECT id, genre FROM artist WHERE name = ?1", [name], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .optional()?;
    if let Some(found) = existing {
        return Ok(found);
    }

    let slug = unique_slug(conn, "artist", &slugify(name))?;
    conn.execute("INSERT INTO artist (name, slug) VALUES (?1, ?2)", params![name, slug])?;
    debug!("Created artist `{name}'");
    Ok((conn.last_insert_rowid(), None))
}

fn get_or_create_album(conn: &Connection, artist_id: i64, artist: &str, new: &NewSong) -> Result<i64> {
    let existing = conn
        .query_row(
            "SELECT id FROM album WHERE artist_id = ?1 AND name = ?2",
            params![artist_id, new.album],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }

    let slug = unique_slug(conn, "album", &slugify(&format!("{artist} {}", new.album)))?;
    conn.execute(
        "INSERT INTO album (artist_id, name, slug, year, total_discs, total_tracks)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![artist_id, new.album, slug, new.year, new.total_discs, new.total_tracks],
    )?;
    debug!("Created album `{}' by `{artist}'", new.album);
    Ok(conn.last_insert_rowid())
}

/// Add a song to the catalog, creating its artist and album when needed.
///
/// The song inherits the artist's genre. A song whose `rel_path` is already
/// cataloged is returned unchanged.
///
/// # Errors
///
/// Returns [`CoreError::Storage`] if any insert fails; the whole addition is
/// rolled back.
pub fn add_song(conn: &mut Connection, new: &NewSong) -> Result<Song> {
    if let Some(existing) = db::find_song_by_path(conn, &new.rel_path)? {
        debug!("{existing} already cataloged at {}", new.rel_path);
        return Ok(existing);
    }

    let tx = conn.transaction()?;
    let (artist_id, genre) = get_or_create_artist(&tx, &new.artist)?;
    let album_id = get_or_create_album(&tx, artist_id, &new.artist, new)?;
    let slug = unique_slug(&tx, "song", &slugify(&new.rel_path))?;

    tx.execute(
        "INSERT INTO song (album_id, artist_id, rel_path, slug, name, disc_number,
                           track_number, track_length, genre)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            album_id,
            artist_id,
            new.rel_path,
            slug,
            new.name,
            new.disc_number,
            new.track_number,
            new.track_length,
            genre
        ],
    )?;
    let song_id = tx.last_insert_rowid();
    refresh_totals(&tx, album_id)?;
    tx.commit()?;

    let song = db::get_song(conn, song_id)?;
    info!("Added {song} ({})", song.rel_path);
    Ok(song)
}

/// Recompute catalog totals for an album and its artist.
///
/// Album: `count_songs`, `total_length`. Artist: `count_albums`,
/// `count_songs`, `total_length` summed over its albums.
pub fn refresh_totals(conn: &Connection, album_id: i64) -> Result<()> {
    let artist_id: i64 = conn
        .query_row("SELECT artist_id FROM album WHERE id = ?1", [album_id], |row| row.get(0))
        .optional()?
        .ok_or_else(|| CoreError::not_found(EntityKind::Album, album_id))?;

    conn.execute(
        "UPDATE album SET
            count_songs  = (SELECT COUNT(*) FROM song WHERE album_id = ?1),
            total_length = (SELECT COALESCE(SUM(track_length), 0) FROM song WHERE album_id = ?1)
         WHERE id = ?1",
        [album_id],
    )?;
    conn.execute(
        "UPDATE artist SET
            count_albums = (SELECT COUNT(*) FROM album WHERE artist_id = ?1),
            count_songs  = (SELECT COALESCE(SUM(count_songs), 0) FROM album WHERE artist_id = ?1),
            total_length = (SELECT COALESCE(SUM(total_length), 0) FROM album WHERE artist_id = ?1)
         WHERE id = ?1",
        [artist_id],
    )?;
    Ok(())
}

/// Assign `genre` to an entity and everything beneath it.
///
/// Returns the number of songs whose genre was set.
///
/// # Errors
///
/// - [`CoreError::InvalidFilter`] for a genre outside [`crate::models::GENRES`]
/// - [`CoreError::NotFound`] if the entity does not exist
pub fn set_genre(conn: &mut Connection, entity: EntityRef, genre: &str) -> Result<usize> {
    if !is_known_genre(genre) {
        return Err(CoreError::InvalidFilter(format!("unknown genre `{genre}'")));
    }
    if !db::exists(conn, entity)? {
        return Err(CoreError::not_found(entity.kind, entity.id));
    }

    let tx = conn.transaction()?;
    let songs = match entity.kind {
        EntityKind::Artist => {
            tx.execute("UPDATE artist SET genre = ?2 WHERE id = ?1", params![entity.id, genre])?;
            tx.execute("UPDATE album SET genre = ?2 WHERE artist_id = ?1", params![entity.id, genre])?;
            tx.execute("UPDATE song SET genre = ?2 WHERE artist_id = ?1", params![entity.id, genre])?
        }
        EntityKind::Album => {
            tx.execute("UPDATE album SET genre = ?2 WHERE id = ?1", params![entity.id, genre])?;
            tx.execute("UPDATE song SET genre = ?2 WHERE album_id = ?1", params![entity.id, genre])?
        }
        EntityKind::Song => {
            tx.execute("UPDATE song SET genre = ?2 WHERE id = ?1", params![entity.id, genre])?
        }
    };
    tx.commit()?;

    info!("Set genre of {entity} to `{genre}' ({songs} songs)");
    Ok(songs)
}

/// Songs whose audio file no longer exists under `music_dir`.
///
/// With `delete`, those songs are removed, albums and artists left empty are
/// removed with them, and every aggregate is recomputed, all in one
/// transaction. The missing songs are returned either way.
pub fn validate_songs(conn: &mut Connection, music_dir: &Path, delete: bool) -> Result<Vec<Song>> {
    let songs = db::all_songs(conn)?;
    let missing: Vec<Song> = songs
        .into_par_iter()
        .filter(|song| !music_dir.join(&song.rel_path).exists())
        .collect();

    for song in &missing {
        warn!("{song} is missing its audio file {}", song.rel_path);
    }
    if !delete || missing.is_empty() {
        return Ok(missing);
    }

    let tx = conn.transaction()?;
    for song in &missing {
        tx.execute("DELETE FROM song WHERE id = ?1", [song.id])?;
    }
    let albums = tx.execute("DELETE FROM album WHERE id NOT IN (SELECT album_id FROM song)", [])?;
    let artists = tx.execute("DELETE FROM artist WHERE id NOT IN (SELECT artist_id FROM album)", [])?;

    let touched: BTreeSet<i64> = missing.iter().map(|s| s.album_id).collect();
    for album_id in touched {
        if db::exists(&tx, EntityRef::album(album_id))? {
            refresh_totals(&tx, album_id)?;
        }
    }
    // Removed songs take their ratings with them, which shifts other songs' scores.
    stats::recompute_all_in(&tx)?;
    tx.commit()?;

    info!(
        "Removed {} songs, {albums} empty albums and {artists} empty artists",
        missing.len()
    );
    Ok(missing)
}

/// Matches of a [`search`], each list ordered by relevance.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct SearchResults {
    pub artists: Vec<Artist>,
    pub albums: Vec<Album>,
    pub songs: Vec<Song>,
}

impl SearchResults {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.artists.is_empty() && self.albums.is_empty() && self.songs.is_empty()
    }
}

/// Search the catalog for `query`, restricted to one kind when given.
///
/// A blank query matches nothing.
pub fn search(conn: &Connection, query: &str, kind: Option<EntityKind>) -> Result<SearchResults> {
    let query = query.trim();
    let mut results = SearchResults::default();
    if query.is_empty() {
        return Ok(results);
    }

    let wants = |k: EntityKind| kind.map_or(true, |only| only == k);
    if wants(EntityKind::Artist) {
        results.artists = db::search_artists(conn, query)?;
    }
    if wants(EntityKind::Album) {
        results.albums = db::search_albums(conn, query)?;
    }
    if wants(EntityKind::Song) {
        results.songs = db::search_songs(conn, query)?;
    }
    debug!(
        "Search `{query}': {} artists, {} albums, {} songs",
        results.artists.len(),
        results.albums.len(),
        results.songs.len()
    );
    Ok(results)
}

/// Absolute path of the song's audio file.
///
/// # Errors
///
/// [`CoreError::Inconsistent`] if the file is gone. Callers should
/// revalidate the catalog and select again.
pub fn ensure_playable(music_dir: &Path, song: &Song) -> Result<PathBuf> {
    let path = music_dir.join(&song.rel_path);
    if path.exists() {
        Ok(path)
    } else {
        Err(CoreError::Inconsistent {
            song_id: song.id,
            path: path.display().to_string(),
        })
    }
}
