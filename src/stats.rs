//! # Stats Aggregator
//!
//! Owns every denormalized counter on Song, Album and Artist. Play and
//! judgment events are appended to the History/Rating logs, and the affected
//! aggregates are then recomputed from those logs, bottom-up:
//!
//! ```text
//! History/Rating rows -> Song -> Album -> Artist
//! ```
//!
//! Aggregates are never incremented in place. Recomputing from source rows
//! makes every `recompute_*` function idempotent, and lets concurrent
//! writers converge on the same values.
//!
//! ## Reductions
//!
//! | Field           | Song                     | Album (over songs) | Artist (over albums)   |
//! |-----------------|--------------------------|--------------------|------------------------|
//! | `count_played`  | History rows             | sum                | sum                    |
//! | `played_at`     | max History              | max                | max                    |
//! | `avg_played_at` |                          | mean `played_at`   | mean `avg_played_at`   |
//! | `count_rated`   | Rating rows (either side)| sum                | sum                    |
//! | `rated_at`      | max Rating               | max                | max                    |
//! | `rating`        | wins / `count_rated`     | mean               | mean                   |

use crate::db;
use crate::error::{CoreError, Result};
use crate::models::{EntityKind, History, Rating, Song};
use chrono::{DateTime, Utc};
use log::{debug, info};
use rusqlite::{params, Connection};
use std::collections::BTreeSet;

/// Record one play of `song_id` at `at`.
///
/// Appends a History row and recomputes the song, its album and its artist,
/// all in one transaction.
///
/// # Errors
///
/// [`CoreError::NotFound`] if the song does not exist; nothing is written.
pub fn record_play(conn: &mut Connection, song_id: i64, at: DateTime<Utc>) -> Result<History> {
    let tx = conn.transaction()?;
    let song = db::get_song(&tx, song_id)?;

    let history = db::insert_history(&tx, song.id, at)?;
    recompute_song(&tx, song.id)?;
    recompute_album(&tx, song.album_id)?;
    recompute_artist(&tx, song.artist_id)?;

    tx.commit()?;
    info!("Recorded play of {song} at {}", history.played_at);
    Ok(history)
}

/// Record that `winner_id` beat each of `loser_ids`.
///
/// Losers are deduplicated keeping first occurrence, and the winner is
/// skipped if it appears among them. One Rating row is created per remaining
/// loser, after which every touched song, album and artist is recomputed.
///
/// If the winner and every loser are already over their rating budget
/// (see [`Song::within_rating_budget`]) nothing is recorded and an empty
/// list is returned. The budget is checked for the judgment as a whole: one
/// participant within budget, winner or loser, is enough to record it.
///
/// # Errors
///
/// [`CoreError::NotFound`] if the winner or any loser does not exist;
/// nothing is written in that case.
pub fn record_judgment(
    conn: &mut Connection,
    winner_id: i64,
    loser_ids: &[i64],
    ratings_per_play: u32,
    at: DateTime<Utc>,
) -> Result<Vec<Rating>> {
    let tx = conn.transaction()?;
    let winner = db::get_song(&tx, winner_id)?;

    let mut seen = BTreeSet::from([winner.id]);
    let mut losers: Vec<Song> = Vec::with_capacity(loser_ids.len());
    for &loser_id in loser_ids {
        if seen.insert(loser_id) {
            losers.push(db::get_song(&tx, loser_id)?);
        }
    }

    if losers.is_empty() {
        debug!("Judgment for {winner} names no distinct losers, nothing to record");
        return Ok(Vec::new());
    }

    let budget_left = winner.within_rating_budget(ratings_per_play)
        || losers.iter().any(|s| s.within_rating_budget(ratings_per_play));
    if !budget_left {
        debug!("Judgment for {winner} skipped, every song is over its rating budget");
        return Ok(Vec::new());
    }

    let mut ratings = Vec::with_capacity(losers.len());
    for loser in &losers {
        ratings.push(db::insert_rating(&tx, winner.id, loser.id, at)?);
    }

    let touched: Vec<&Song> = std::iter::once(&winner).chain(losers.iter()).collect();
    let albums: BTreeSet<i64> = touched.iter().map(|s| s.album_id).collect();
    let artists: BTreeSet<i64> = touched.iter().map(|s| s.artist_id).collect();

    for song in &touched {
        recompute_song(&tx, song.id)?;
    }
    for &album_id in &albums {
        recompute_album(&tx, album_id)?;
    }
    for &artist_id in &artists {
        recompute_artist(&tx, artist_id)?;
    }

    tx.commit()?;
    info!(
        "Recorded {} rating(s): {winner} beat {}",
        ratings.len(),
        losers.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
    );
    Ok(ratings)
}

/// Recompute a song's play and rating counters from History and Rating.
pub fn recompute_song(conn: &Connection, song_id: i64) -> Result<()> {
    let (count_played, played_at): (u32, Option<i64>) = conn.query_row(
        "SELECT COUNT(*), MAX(played_at) FROM history WHERE song_id = ?1",
        [song_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    let (count_rated, wins, rated_at): (u32, u32, Option<i64>) = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(winner_id = ?1), 0), MAX(rated_at)
         FROM rating WHERE winner_id = ?1 OR loser_id = ?1",
        [song_id],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;

    let rating = if count_rated == 0 {
        0.0
    } else {
        f64::from(wins) / f64::from(count_rated)
    };

    let updated = conn.execute(
        "UPDATE song
         SET count_played = ?2, played_at = ?3, count_rated = ?4, rated_at = ?5, rating = ?6
         WHERE id = ?1",
        params![song_id, count_played, played_at, count_rated, rated_at, rating],
    )?;
    if updated == 0 {
        return Err(CoreError::not_found(EntityKind::Song, song_id));
    }
    Ok(())
}

/// Recompute an album's aggregates from its songs.
pub fn recompute_album(conn: &Connection, album_id: i64) -> Result<()> {
    let updated = conn.execute(
        "UPDATE album SET
            count_played  = (SELECT COALESCE(SUM(count_played), 0) FROM song WHERE album_id = ?1),
            played_at     = (SELECT MAX(played_at) FROM song WHERE album_id = ?1),
            avg_played_at = (SELECT CAST(ROUND(AVG(played_at)) AS INTEGER) FROM song WHERE album_id = ?1),
            count_rated   = (SELECT COALESCE(SUM(count_rated), 0) FROM song WHERE album_id = ?1),
            rated_at      = (SELECT MAX(rated_at) FROM song WHERE album_id = ?1),
            rating        = (SELECT COALESCE(AVG(rating), 0) FROM song WHERE album_id = ?1)
         WHERE id = ?1",
        [album_id],
    )?;
    if updated == 0 {
        return Err(CoreError::not_found(EntityKind::Album, album_id));
    }
    Ok(())
}

/// Recompute an artist's aggregates from its albums.
pub fn recompute_artist(conn: &Connection, artist_id: i64) -> Result<()> {
    let updated = conn.execute(
        "UPDATE artist SET
            count_played  = (SELECT COALESCE(SUM(count_played), 0) FROM album WHERE artist_id = ?1),
            played_at     = (SELECT MAX(played_at) FROM album WHERE artist_id = ?1),
            avg_played_at = (SELECT CAST(ROUND(AVG(avg_played_at)) AS INTEGER) FROM album WHERE artist_id = ?1),
            count_rated   = (SELECT COALESCE(SUM(count_rated), 0) FROM album WHERE artist_id = ?1),
            rated_at      = (SELECT MAX(rated_at) FROM album WHERE artist_id = ?1),
            rating        = (SELECT COALESCE(AVG(rating), 0) FROM album WHERE artist_id = ?1)
         WHERE id = ?1",
        [artist_id],
    )?;
    if updated == 0 {
        return Err(CoreError::not_found(EntityKind::Artist, artist_id));
    }
    Ok(())
}

/// Recompute every aggregate in the catalog inside the caller's transaction.
pub(crate) fn recompute_all_in(conn: &Connection) -> Result<usize> {
    let ids = |sql: &str| -> Result<Vec<i64>> {
        let mut stmt = conn.prepare(sql)?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    };

    let songs = ids("SELECT id FROM song")?;
    for &id in &songs {
        recompute_song(conn, id)?;
    }
    for id in ids("SELECT id FROM album")? {
        recompute_album(conn, id)?;
    }
    for id in ids("SELECT id FROM artist")? {
        recompute_artist(conn, id)?;
    }
    Ok(songs.len())
}

/// Rebuild every aggregate from History and Rating. Returns the number of
/// songs recomputed.
///
/// Used to repair a catalog after manual edits or deletions.
pub fn recompute_all(conn: &mut Connection) -> Result<usize> {
    let tx = conn.transaction()?;
    let count = recompute_all_in(&tx)?;
    tx.commit()?;
    info!("Recomputed aggregates for {count} songs");
    Ok(count)
}
