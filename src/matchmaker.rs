//! # Rating Matchmaker
//!
//! Proposes three songs for a pairwise judgment: the song currently playing
//! plus two recently played ones, such that none of the three pairs has been
//! compared before. Recording the outcome is the job of
//! [`crate::stats::record_judgment`].

use crate::config::EngineConfig;
use crate::db;
use crate::error::Result;
use crate::models::Song;
use chrono::{DateTime, Utc};
use log::{debug, info};
use rusqlite::Connection;
use std::collections::HashSet;

/// Distinct songs played after `since`, newest first, without `exclude`.
pub fn recent_songs(conn: &Connection, since: DateTime<Utc>, exclude: i64) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT song_id FROM history
         WHERE played_at > ?1
         ORDER BY played_at DESC, id DESC",
    )?;
    let rows = stmt
        .query_map([db::to_timestamp(since)], |row| row.get::<_, i64>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut seen = HashSet::from([exclude]);
    Ok(rows.into_iter().filter(|id| seen.insert(*id)).collect())
}

/// Every compared pair among Ratings touching `song_ids`, in both orientations.
pub fn rated_pairs(conn: &Connection, song_ids: &[i64]) -> Result<HashSet<(i64, i64)>> {
    let ratings = db::ratings_touching(conn, song_ids)?;
    let mut pairs = HashSet::with_capacity(ratings.len() * 2);
    for rating in ratings {
        pairs.insert((rating.winner_id, rating.loser_id));
        pairs.insert((rating.loser_id, rating.winner_id));
    }
    Ok(pairs)
}

/// First `(b, c)` such that `[current, b, c]` contains no compared pair.
///
/// `pool[0]` is the current song. The bag grows one song at a time in pool
/// order, and each new song `c` is paired with the earlier non-current
/// members `b` in order.
fn first_fresh_triple(pool: &[i64], compared: &HashSet<(i64, i64)>) -> Option<(i64, i64)> {
    let (&current, rest) = pool.split_first()?;
    let fresh = |x: i64, y: i64| !compared.contains(&(x, y));

    for (n, &c) in rest.iter().enumerate() {
        if !fresh(current, c) {
            continue;
        }
        for &b in &rest[..n] {
            if fresh(current, b) && fresh(b, c) {
                return Some((b, c));
            }
        }
    }
    None
}

/// Propose `[current, b, c]` for a judgment, or `None` when the current
/// song is over its rating budget or no uncompared triple exists among the
/// songs played within the anti-repeat window.
///
/// # Errors
///
/// [`crate::error::CoreError::NotFound`] if `song_id` does not exist.
pub fn propose_match(
    conn: &Connection,
    config: &EngineConfig,
    song_id: i64,
    now: DateTime<Utc>,
) -> Result<Option<[Song; 3]>> {
    let current = db::get_song(conn, song_id)?;
    if !current.within_rating_budget(config.ratings_per_play) {
        debug!(
            "{current} is over its rating budget ({} ratings, {} plays)",
            current.count_rated, current.count_played
        );
        return Ok(None);
    }

    let mut pool = vec![current.id];
    pool.extend(recent_songs(conn, now - config.anti_repeat_window(), current.id)?);
    let compared = rated_pairs(conn, &pool)?;

    let Some((b, c)) = first_fresh_triple(&pool, &compared) else {
        debug!("No uncompared triple for {current} among {} recent songs", pool.len() - 1);
        return Ok(None);
    };

    let b = db::get_song(conn, b)?;
    let c = db::get_song(conn, c)?;
    info!("Proposed match {current} vs {b} vs {c}");
    Ok(Some([current, b, c]))
}
