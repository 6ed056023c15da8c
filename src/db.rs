//! SQLite catalog store.
//!
//! Holds the five catalog tables (artist, album, song, history, rating) and
//! the row mappers and point lookups the rest of the crate builds on.
//! Timestamps are stored as INTEGER unix seconds so that `MAX`/`AVG`
//! aggregates work directly in SQL.

use crate::error::{CoreError, Result};
use crate::models::{Album, Artist, EntityKind, EntityRef, History, Rating, Song};
use chrono::{DateTime, Utc};
use log::{debug, trace};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS artist (
    id            INTEGER PRIMARY KEY,
    name          TEXT    NOT NULL UNIQUE,
    slug          TEXT    NOT NULL UNIQUE,
    count_albums  INTEGER NOT NULL DEFAULT 0,
    count_songs   INTEGER NOT NULL DEFAULT 0,
    total_length  REAL    NOT NULL DEFAULT 0,
    count_played  INTEGER NOT NULL DEFAULT 0,
    played_at     INTEGER,
    avg_played_at INTEGER,
    count_rated   INTEGER NOT NULL DEFAULT 0,
    rated_at      INTEGER,
    rating        REAL    NOT NULL DEFAULT 0,
    genre         TEXT
);

CREATE TABLE IF NOT EXISTS album (
    id            INTEGER PRIMARY KEY,
    artist_id     INTEGER NOT NULL REFERENCES artist(id) ON DELETE CASCADE,
    name          TEXT    NOT NULL,
    slug          TEXT    NOT NULL UNIQUE,
    year          INTEGER NOT NULL DEFAULT 0,
    total_discs   INTEGER NOT NULL DEFAULT 1,
    total_tracks  INTEGER NOT NULL DEFAULT 0,
    count_songs   INTEGER NOT NULL DEFAULT 0,
    total_length  REAL    NOT NULL DEFAULT 0,
    count_played  INTEGER NOT NULL DEFAULT 0,
    played_at     INTEGER,
    avg_played_at INTEGER,
    count_rated   INTEGER NOT NULL DEFAULT 0,
    rated_at      INTEGER,
    rating        REAL    NOT NULL DEFAULT 0,
    genre         TEXT
);

CREATE TABLE IF NOT EXISTS song (
    id            INTEGER PRIMARY KEY,
    album_id      INTEGER NOT NULL REFERENCES album(id) ON DELETE CASCADE,
    artist_id     INTEGER NOT NULL REFERENCES artist(id) ON DELETE CASCADE,
    rel_path      TEXT    NOT NULL UNIQUE,
    slug          TEXT    NOT NULL UNIQUE,
    name          TEXT    NOT NULL,
    disc_number   INTEGER NOT NULL DEFAULT 1,
    track_number  INTEGER NOT NULL DEFAULT 0,
    track_length  REAL    NOT NULL DEFAULT 0,
    count_played  INTEGER NOT NULL DEFAULT 0,
    played_at     INTEGER,
    count_rated   INTEGER NOT NULL DEFAULT 0,
    rated_at      INTEGER,
    rating        REAL    NOT NULL DEFAULT 0,
    genre         TEXT
);

CREATE TABLE IF NOT EXISTS history (
    id        INTEGER PRIMARY KEY,
    song_id   INTEGER NOT NULL REFERENCES song(id) ON DELETE CASCADE,
    played_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS rating (
    id        INTEGER PRIMARY KEY,
    winner_id INTEGER NOT NULL REFERENCES song(id) ON DELETE CASCADE,
    loser_id  INTEGER NOT NULL REFERENCES song(id) ON DELETE CASCADE,
    rated_at  INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_song_artist ON song(artist_id);
CREATE INDEX IF NOT EXISTS idx_song_album ON song(album_id);
CREATE INDEX IF NOT EXISTS idx_song_count_played ON song(count_played);
CREATE INDEX IF NOT EXISTS idx_album_artist ON album(artist_id);
CREATE INDEX IF NOT EXISTS idx_history_played_at ON history(played_at);
CREATE INDEX IF NOT EXISTS idx_history_song ON history(song_id);
CREATE INDEX IF NOT EXISTS idx_rating_winner ON rating(winner_id);
CREATE INDEX IF NOT EXISTS idx_rating_loser ON rating(loser_id);
";

/// Column list matching [`song_from_row`].
pub const SONG_COLUMNS: &str = "id, album_id, artist_id, rel_path, slug, name, disc_number, \
     track_number, track_length, count_played, played_at, count_rated, rated_at, rating, genre";

const ALBUM_COLUMNS: &str = "id, artist_id, name, slug, year, total_discs, total_tracks, \
     count_songs, total_length, count_played, played_at, avg_played_at, count_rated, rated_at, \
     rating, genre";

const ARTIST_COLUMNS: &str = "id, name, slug, count_albums, count_songs, total_length, \
     count_played, played_at, avg_played_at, count_rated, rated_at, rating, genre";

/// Open (or create) the catalog database at `path` and make sure the schema exists.
pub fn open(path: &Path) -> Result<Connection> {
    debug!("Opening catalog database at {}", path.display());
    let conn = Connection::open(path)?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Open a private in-memory catalog. Used by tests and benchmarks.
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Enable foreign keys and create all tables and indexes if missing.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// Unix seconds for storage.
#[must_use]
pub fn to_timestamp(at: DateTime<Utc>) -> i64 {
    at.timestamp()
}

/// Inverse of [`to_timestamp`]. Out-of-range values read as missing.
#[must_use]
pub fn from_timestamp(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(secs, 0)
}

/// Same as [`from_timestamp`], but for averaged (fractional) timestamps.
#[must_use]
pub fn from_avg_timestamp(secs: f64) -> Option<DateTime<Utc>> {
    #[allow(clippy::cast_possible_truncation)]
    from_timestamp(secs.round() as i64)
}

fn opt_time(row: &Row, column: &str) -> rusqlite::Result<Option<DateTime<Utc>>> {
    Ok(row.get::<_, Option<i64>>(column)?.and_then(from_timestamp))
}

fn time(row: &Row, column: &str) -> rusqlite::Result<DateTime<Utc>> {
    let secs: i64 = row.get(column)?;
    Ok(from_timestamp(secs).unwrap_or_default())
}

/// Map a row selected with [`SONG_COLUMNS`].
pub fn song_from_row(row: &Row) -> rusqlite::Result<Song> {
    Ok(Song {
        id: row.get("id")?,
        album_id: row.get("album_id")?,
        artist_id: row.get("artist_id")?,
        rel_path: row.get("rel_path")?,
        slug: row.get("slug")?,
        name: row.get("name")?,
        disc_number: row.get("disc_number")?,
        track_number: row.get("track_number")?,
        track_length: row.get("track_length")?,
        count_played: row.get("count_played")?,
        played_at: opt_time(row, "played_at")?,
        count_rated: row.get("count_rated")?,
        rated_at: opt_time(row, "rated_at")?,
        rating: row.get("rating")?,
        genre: row.get("genre")?,
    })
}

fn album_from_row(row: &Row) -> rusqlite::Result<Album> {
    Ok(Album {
        id: row.get("id")?,
        artist_id: row.get("artist_id")?,
        name: row.get("name")?,
        slug: row.get("slug")?,
        year: row.get("year")?,
        total_discs: row.get("total_discs")?,
        total_tracks: row.get("total_tracks")?,
        count_songs: row.get("count_songs")?,
        total_length: row.get("total_length")?,
        count_played: row.get("count_played")?,
        played_at: opt_time(row, "played_at")?,
        avg_played_at: opt_time(row, "avg_played_at")?,
        count_rated: row.get("count_rated")?,
        rated_at: opt_time(row, "rated_at")?,
        rating: row.get("rating")?,
        genre: row.get("genre")?,
    })
}

fn artist_from_row(row: &Row) -> rusqlite::Result<Artist> {
    Ok(Artist {
        id: row.get("id")?,
        name: row.get("name")?,
        slug: row.get("slug")?,
        count_albums: row.get("count_albums")?,
        count_songs: row.get("count_songs")?,
        total_length: row.get("total_length")?,
        count_played: row.get("count_played")?,
        played_at: opt_time(row, "played_at")?,
        avg_played_at: opt_time(row, "avg_played_at")?,
        count_rated: row.get("count_rated")?,
        rated_at: opt_time(row, "rated_at")?,
        rating: row.get("rating")?,
        genre: row.get("genre")?,
    })
}

fn history_from_row(row: &Row) -> rusqlite::Result<History> {
    Ok(History {
        id: row.get("id")?,
        song_id: row.get("song_id")?,
        played_at: time(row, "played_at")?,
    })
}

fn rating_from_row(row: &Row) -> rusqlite::Result<Rating> {
    Ok(Rating {
        id: row.get("id")?,
        winner_id: row.get("winner_id")?,
        loser_id: row.get("loser_id")?,
        rated_at: time(row, "rated_at")?,
    })
}

/// Find a song by id.
pub fn get_song(conn: &Connection, id: i64) -> Result<Song> {
    trace!("Looking up song {id}");
    conn.query_row(
        &format!("SELECT {SONG_COLUMNS} FROM song WHERE id = ?1"),
        [id],
        song_from_row,
    )
    .optional()?
    .ok_or_else(|| CoreError::not_found(EntityKind::Song, id))
}

/// Find a song by its path relative to the music directory.
pub fn find_song_by_path(conn: &Connection, rel_path: &str) -> Result<Option<Song>> {
    Ok(conn
        .query_row(
            &format!("SELECT {SONG_COLUMNS} FROM song WHERE rel_path = ?1"),
            [rel_path],
            song_from_row,
        )
        .optional()?)
}

/// Find an album by id.
pub fn get_album(conn: &Connection, id: i64) -> Result<Album> {
    conn.query_row(
        &format!("SELECT {ALBUM_COLUMNS} FROM album WHERE id = ?1"),
        [id],
        album_from_row,
    )
    .optional()?
    .ok_or_else(|| CoreError::not_found(EntityKind::Album, id))
}

/// Find an artist by id.
pub fn get_artist(conn: &Connection, id: i64) -> Result<Artist> {
    conn.query_row(
        &format!("SELECT {ARTIST_COLUMNS} FROM artist WHERE id = ?1"),
        [id],
        artist_from_row,
    )
    .optional()?
    .ok_or_else(|| CoreError::not_found(EntityKind::Artist, id))
}

/// Whether the referenced entity exists.
pub fn exists(conn: &Connection, entity: EntityRef) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            &format!("SELECT id FROM {} WHERE id = ?1", entity.kind.table()),
            [entity.id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Current rating of the referenced entity.
pub fn rating_of(conn: &Connection, entity: EntityRef) -> Result<f64> {
    conn.query_row(
        &format!("SELECT rating FROM {} WHERE id = ?1", entity.kind.table()),
        [entity.id],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| CoreError::not_found(entity.kind, entity.id))
}

/// Run `SELECT <song columns> FROM song <tail>` and collect the rows.
///
/// `tail` holds the WHERE/ORDER/LIMIT clauses, bound with `params`.
pub fn query_songs<P: rusqlite::Params>(conn: &Connection, tail: &str, params: P) -> Result<Vec<Song>> {
    let mut stmt = conn.prepare(&format!("SELECT {SONG_COLUMNS} FROM song {tail}"))?;
    let songs = stmt
        .query_map(params, song_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(songs)
}

/// All songs, ordered for display: artist, album, disc, track.
pub fn all_songs(conn: &Connection) -> Result<Vec<Song>> {
    query_songs(
        conn,
        "ORDER BY artist_id, album_id, disc_number, track_number, id",
        [],
    )
}

/// All albums of an artist.
pub fn albums_of_artist(conn: &Connection, artist_id: i64) -> Result<Vec<Album>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ALBUM_COLUMNS} FROM album WHERE artist_id = ?1 ORDER BY year, id"
    ))?;
    let albums = stmt
        .query_map([artist_id], album_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(albums)
}

/// Songs whose name, album name or artist name contains `query`, ignoring
/// case. A name match ranks above an album match, which ranks above an
/// artist match; equal relevance keeps catalog order.
pub fn search_songs(conn: &Connection, query: &str) -> Result<Vec<Song>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SONG_COLUMNS} FROM (
             SELECT song.*,
                    CASE
                        WHEN instr(lower(song.name), ?1) > 0 THEN 3
                        WHEN instr(lower(album.name), ?1) > 0 THEN 2
                        WHEN instr(lower(artist.name), ?1) > 0 THEN 1
                        ELSE 0
                    END AS relevance
             FROM song
             JOIN album ON album.id = song.album_id
             JOIN artist ON artist.id = song.artist_id
         )
         WHERE relevance > 0
         ORDER BY relevance DESC, id"
    ))?;
    let songs = stmt
        .query_map([query.to_lowercase()], song_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    trace!("Song search `{query}' matched {} rows", songs.len());
    Ok(songs)
}

/// Albums whose name or artist name contains `query`, or whose year equals
/// it. Name beats artist, artist beats year.
pub fn search_albums(conn: &Connection, query: &str) -> Result<Vec<Album>> {
    let year: Option<i32> = query.trim().parse().ok();
    let mut stmt = conn.prepare(&format!(
        "SELECT {ALBUM_COLUMNS} FROM (
             SELECT album.*,
                    CASE
                        WHEN instr(lower(album.name), ?1) > 0 THEN 3
                        WHEN instr(lower(artist.name), ?1) > 0 THEN 2
                        WHEN album.year = ?2 THEN 1
                        ELSE 0
                    END AS relevance
             FROM album
             JOIN artist ON artist.id = album.artist_id
         )
         WHERE relevance > 0
         ORDER BY relevance DESC, id"
    ))?;
    let albums = stmt
        .query_map(params![query.to_lowercase(), year], album_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(albums)
}

/// Artists whose name contains `query`, ignoring case.
pub fn search_artists(conn: &Connection, query: &str) -> Result<Vec<Artist>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ARTIST_COLUMNS} FROM artist
         WHERE instr(lower(name), ?1) > 0
         ORDER BY name, id"
    ))?;
    let artists = stmt
        .query_map([query.to_lowercase()], artist_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(artists)
}

/// History of one song, newest first.
pub fn history_of_song(conn: &Connection, song_id: i64) -> Result<Vec<History>> {
    let mut stmt = conn.prepare(
        "SELECT id, song_id, played_at FROM history
         WHERE song_id = ?1
         ORDER BY played_at DESC, id DESC",
    )?;
    let rows = stmt
        .query_map([song_id], history_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Append a History row.
pub fn insert_history(conn: &Connection, song_id: i64, played_at: DateTime<Utc>) -> Result<History> {
    conn.execute(
        "INSERT INTO history (song_id, played_at) VALUES (?1, ?2)",
        params![song_id, to_timestamp(played_at)],
    )?;
    Ok(History {
        id: conn.last_insert_rowid(),
        song_id,
        played_at: from_timestamp(to_timestamp(played_at)).unwrap_or(played_at),
    })
}

/// Append a Rating row.
pub fn insert_rating(
    conn: &Connection,
    winner_id: i64,
    loser_id: i64,
    rated_at: DateTime<Utc>,
) -> Result<Rating> {
    conn.execute(
        "INSERT INTO rating (winner_id, loser_id, rated_at) VALUES (?1, ?2, ?3)",
        params![winner_id, loser_id, to_timestamp(rated_at)],
    )?;
    Ok(Rating {
        id: conn.last_insert_rowid(),
        winner_id,
        loser_id,
        rated_at: from_timestamp(to_timestamp(rated_at)).unwrap_or(rated_at),
    })
}

/// Every Rating in which one of `song_ids` took part, as winner or loser.
pub fn ratings_touching(conn: &Connection, song_ids: &[i64]) -> Result<Vec<Rating>> {
    if song_ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = vec!["?"; song_ids.len()].join(", ");
    let sql = format!(
        "SELECT id, winner_id, loser_id, rated_at FROM rating
         WHERE winner_id IN ({placeholders}) OR loser_id IN ({placeholders})"
    );
    let mut stmt = conn.prepare(&sql)?;
    let ids = song_ids.iter().chain(song_ids.iter());
    let rows = stmt
        .query_map(rusqlite::params_from_iter(ids), rating_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Number of rows in `table`.
pub fn count_rows(conn: &Connection, table: &str) -> Result<u64> {
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
    Ok(u64::try_from(count).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(conn: &Connection) -> i64 {
        conn.execute_batch(
            "INSERT INTO artist (id, name, slug) VALUES (1, 'Artist', 'artist');
             INSERT INTO album (id, artist_id, name, slug, year) VALUES (1, 1, 'Album', 'artist-album', 1999);
             INSERT INTO song (id, album_id, artist_id, rel_path, slug, name, track_number)
                 VALUES (1, 1, 1, 'artist/album/01.mp3', 'artist-album-01-mp3', 'One', 1);",
        )
        .unwrap();
        1
    }

    #[test]
    fn test_schema_is_idempotent() -> Result<()> {
        let conn = open_in_memory()?;
        init_schema(&conn)?;
        assert_eq!(count_rows(&conn, "song")?, 0);
        Ok(())
    }

    #[test]
    fn test_get_song_and_not_found() -> Result<()> {
        let conn = open_in_memory()?;
        let id = seed(&conn);

        let song = get_song(&conn, id)?;
        assert_eq!(song.name, "One");
        assert_eq!(song.count_played, 0);
        assert!(song.played_at.is_none());
        assert_eq!(song.rating, 0.0);

        let missing = get_song(&conn, 42);
        assert!(matches!(missing, Err(CoreError::NotFound { kind: EntityKind::Song, id: 42 })));
        Ok(())
    }

    fn seed_library(conn: &Connection) {
        conn.execute_batch(
            "INSERT INTO artist (id, name, slug) VALUES (1, 'Blue Train', 'blue-train'), (2, 'Other', 'other');
             INSERT INTO album (id, artist_id, name, slug, year) VALUES
                 (1, 1, 'Night Songs', 'blue-train-night-songs', 1987),
                 (2, 2, 'Blue Hour', 'other-blue-hour', 2001),
                 (3, 2, 'Plain', 'other-plain', 1987);
             INSERT INTO song (id, album_id, artist_id, rel_path, slug, name) VALUES
                 (1, 1, 1, 'a', 'a', 'Midnight'),
                 (2, 2, 2, 'b', 'b', 'Dawn'),
                 (3, 3, 2, 'c', 'c', 'Feeling Blue'),
                 (4, 3, 2, 'd', 'd', 'Nothing');",
        )
        .unwrap();
    }

    #[test]
    fn test_search_songs_orders_by_relevance() -> Result<()> {
        let conn = open_in_memory()?;
        seed_library(&conn);

        // Song name, then album name, then artist name.
        let ids: Vec<i64> = search_songs(&conn, "BLUE")?.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);

        assert!(search_songs(&conn, "polka")?.is_empty());
        Ok(())
    }

    #[test]
    fn test_search_albums_matches_year_last() -> Result<()> {
        let conn = open_in_memory()?;
        seed_library(&conn);

        let ids: Vec<i64> = search_albums(&conn, "blue")?.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![2, 1]);

        let ids: Vec<i64> = search_albums(&conn, "1987")?.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![1, 3]);
        Ok(())
    }

    #[test]
    fn test_search_artists_by_name() -> Result<()> {
        let conn = open_in_memory()?;
        seed_library(&conn);
        let names: Vec<String> = search_artists(&conn, "tra")?.into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["Blue Train".to_string()]);
        Ok(())
    }

    #[test]
    fn test_history_round_trip_is_newest_first() -> Result<()> {
        let conn = open_in_memory()?;
        let id = seed(&conn);
        let t0 = from_timestamp(1_700_000_000).unwrap();
        let t1 = from_timestamp(1_700_000_600).unwrap();

        insert_history(&conn, id, t0)?;
        insert_history(&conn, id, t1)?;

        let rows = history_of_song(&conn, id)?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].played_at, t1);
        assert_eq!(rows[1].played_at, t0);
        Ok(())
    }

    #[test]
    fn test_ratings_touching_matches_both_sides() -> Result<()> {
        let conn = open_in_memory()?;
        seed(&conn);
        conn.execute_batch(
            "INSERT INTO song (id, album_id, artist_id, rel_path, slug, name) VALUES (2, 1, 1, 'b', 'b', 'Two');
             INSERT INTO song (id, album_id, artist_id, rel_path, slug, name) VALUES (3, 1, 1, 'c', 'c', 'Three');",
        )?;
        let now = Utc::now();
        insert_rating(&conn, 1, 2, now)?;
        insert_rating(&conn, 3, 2, now)?;

        assert_eq!(ratings_touching(&conn, &[1])?.len(), 1);
        assert_eq!(ratings_touching(&conn, &[2])?.len(), 2);
        assert!(ratings_touching(&conn, &[])?.is_empty());
        Ok(())
    }

    #[test]
    fn test_cascade_delete_removes_songs() -> Result<()> {
        let conn = open_in_memory()?;
        let id = seed(&conn);
        insert_history(&conn, id, Utc::now())?;

        conn.execute("DELETE FROM artist WHERE id = 1", [])?;
        assert_eq!(count_rows(&conn, "album")?, 0);
        assert_eq!(count_rows(&conn, "song")?, 0);
        assert_eq!(count_rows(&conn, "history")?, 0);
        Ok(())
    }
}
