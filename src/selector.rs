//! # Priority Selector
//!
//! Picks the next song for continuous playback.
//!
//! ## Algorithm
//!
//! 1. **Cold start**: while any song has never been played, one of those is
//!    picked uniformly at random. Filters are ignored in this phase.
//! 2. **Global scalars** ([`PriorityValues`]), cached together:
//!    `max_played` (highest play count, at least 1) and `reference_spread`
//!    (days since the earliest recorded play, at least 1, times the damping
//!    factor).
//! 3. **Scoring** of every song passing the [`SelectionFilter`]:
//!
//!    ```text
//!    priority = rating - count_played / max_played + days_since_played / reference_spread
//!    ```
//!
//!    High rating, few plays and a long time since the last play all raise
//!    the priority.
//! 4. **Anti-repetition**: of the top K songs (one per minute of the
//!    anti-repeat window), the first whose artist was not played within the
//!    window wins. If every one of them is by a recent artist, a random one
//!    of the top K is returned instead.

use crate::cache::{self, Cache};
use crate::config::EngineConfig;
use crate::db;
use crate::error::{CoreError, Result};
use crate::models::{is_known_genre, EntityKind, EntityRef, Song, GENRES};
use chrono::{DateTime, Utc};
use log::{debug, info};
use rand::seq::SliceRandom;
use rand::Rng;
use rayon::prelude::*;
use rusqlite::types::Value;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// Cache key of the global [`PriorityValues`].
pub const PRIORITY_VALUES_KEY: &str = "next_song_priority_values";

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Restricts which songs [`next_song`] may return.
///
/// An empty filter admits every song. The facet narrows to one artist, album
/// or song; the genre set admits songs whose genre is any of its members.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionFilter {
    pub facet: Option<EntityRef>,
    pub genres: BTreeSet<String>,
}

impl SelectionFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_facet(mut self, facet: EntityRef) -> Self {
        self.facet = Some(facet);
        self
    }

    #[must_use]
    pub fn with_genre(mut self, genre: &str) -> Self {
        self.genres.insert(genre.to_string());
        self
    }

    /// Add `genre` if absent, remove it if present. Selecting every known
    /// genre is the same as selecting none, so the set is cleared then.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidFilter`] for an unknown genre.
    pub fn toggle_genre(&mut self, genre: &str) -> Result<()> {
        if !is_known_genre(genre) {
            return Err(CoreError::InvalidFilter(format!("unknown genre `{genre}'")));
        }
        if !self.genres.remove(genre) {
            self.genres.insert(genre.to_string());
        }
        if GENRES.iter().all(|g| self.genres.contains(*g)) {
            self.genres.clear();
        }
        Ok(())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.facet.is_none() && self.genres.is_empty()
    }

    /// Reject unknown genres and facets pointing at missing entities.
    pub fn validate(&self, conn: &Connection) -> Result<()> {
        if let Some(genre) = self.genres.iter().find(|g| !is_known_genre(g)) {
            return Err(CoreError::InvalidFilter(format!("unknown genre `{genre}'")));
        }
        if let Some(facet) = self.facet {
            if !db::exists(conn, facet)? {
                return Err(CoreError::InvalidFilter(format!("{facet} does not exist")));
            }
        }
        Ok(())
    }

    /// WHERE clause (possibly empty) and its bound values.
    fn where_clause(&self) -> (String, Vec<Value>) {
        let mut conditions = Vec::new();
        let mut values = Vec::new();

        if let Some(facet) = self.facet {
            let column = match facet.kind {
                EntityKind::Artist => "artist_id",
                EntityKind::Album => "album_id",
                EntityKind::Song => "id",
            };
            conditions.push(format!("{column} = ?"));
            values.push(Value::Integer(facet.id));
        }
        if !self.genres.is_empty() {
            let placeholders = vec!["?"; self.genres.len()].join(", ");
            conditions.push(format!("genre IN ({placeholders})"));
            values.extend(self.genres.iter().cloned().map(Value::Text));
        }

        if conditions.is_empty() {
            (String::new(), values)
        } else {
            (format!("WHERE {}", conditions.join(" AND ")), values)
        }
    }
}

/// Global scalars normalizing the priority terms.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriorityValues {
    /// Highest `count_played` of any song, at least 1.
    pub max_played: u32,
    /// Days since the earliest play of any song, at least 1.
    pub max_elapsed_days: f64,
    /// `max_elapsed_days` times the damping factor.
    pub reference_spread: f64,
}

fn days_between(earlier: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let secs = (now - earlier).num_seconds() as f64;
    secs / SECONDS_PER_DAY
}

/// Compute [`PriorityValues`] from the catalog, bypassing the cache.
pub fn compute_priority_values(conn: &Connection, now: DateTime<Utc>, damping: f64) -> Result<PriorityValues> {
    let (max_played, earliest): (Option<u32>, Option<i64>) = conn.query_row(
        "SELECT MAX(count_played), MIN(played_at) FROM song",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    let max_elapsed_days = earliest
        .and_then(db::from_timestamp)
        .map_or(1.0, |at| days_between(at, now))
        .max(1.0);

    Ok(PriorityValues {
        max_played: max_played.unwrap_or(0).max(1),
        max_elapsed_days,
        reference_spread: max_elapsed_days * damping,
    })
}

/// [`PriorityValues`] through the cache, under [`PRIORITY_VALUES_KEY`].
pub fn priority_values(
    conn: &Connection,
    cache: &dyn Cache,
    config: &EngineConfig,
    now: DateTime<Utc>,
) -> Result<PriorityValues> {
    cache::get_or_compute(cache, PRIORITY_VALUES_KEY, config.priority_values_ttl(), now, || {
        compute_priority_values(conn, now, config.spread_damping)
    })
}

/// Priority of one song. Higher plays sooner.
///
/// A song without any recorded play counts as unplayed for the maximal span.
#[must_use]
pub fn priority(song: &Song, values: &PriorityValues, now: DateTime<Utc>) -> f64 {
    let since_played = song
        .played_at
        .map_or(values.max_elapsed_days, |at| days_between(at, now));
    song.rating - f64::from(song.count_played) / f64::from(values.max_played)
        + since_played / values.reference_spread
}

/// Artists with at least one play at or after `since`.
pub fn recent_artists(conn: &Connection, since: DateTime<Utc>) -> Result<HashSet<i64>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT song.artist_id FROM history
         JOIN song ON song.id = history.song_id
         WHERE history.played_at >= ?1",
    )?;
    let artists = stmt
        .query_map([db::to_timestamp(since)], |row| row.get(0))?
        .collect::<rusqlite::Result<HashSet<i64>>>()?;
    Ok(artists)
}

fn cold_start<R: Rng + ?Sized>(conn: &Connection, rng: &mut R) -> Result<Option<Song>> {
    let mut stmt = conn.prepare("SELECT id FROM song WHERE count_played = 0")?;
    let unplayed = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<i64>>>()?;

    match unplayed.choose(rng) {
        Some(&id) => {
            debug!("Cold start: {} unplayed songs left", unplayed.len());
            db::get_song(conn, id).map(Some)
        }
        None => Ok(None),
    }
}

/// Songs passing `filter`, sorted by descending priority.
pub fn ranked_candidates(
    conn: &Connection,
    filter: &SelectionFilter,
    values: &PriorityValues,
    now: DateTime<Utc>,
) -> Result<Vec<(f64, Song)>> {
    let (clause, bound) = filter.where_clause();
    let songs = db::query_songs(conn, &clause, rusqlite::params_from_iter(bound))?;

    let mut scored: Vec<(f64, Song)> = songs
        .into_par_iter()
        .map(|song| (priority(&song, values, now), song))
        .collect();
    scored.sort_by(|(a, sa), (b, sb)| b.total_cmp(a).then(sa.id.cmp(&sb.id)));
    Ok(scored)
}

/// Choose the next song to play.
///
/// # Errors
///
/// - [`CoreError::InvalidFilter`] if the filter names an unknown genre or a
///   missing entity
/// - [`CoreError::NoCandidate`] if no song passes the filter
pub fn next_song<R: Rng + ?Sized>(
    conn: &Connection,
    cache: &dyn Cache,
    config: &EngineConfig,
    filter: &SelectionFilter,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Result<Song> {
    filter.validate(conn)?;

    if let Some(song) = cold_start(conn, rng)? {
        info!("Selected unplayed {song}");
        return Ok(song);
    }

    let values = priority_values(conn, cache, config, now)?;
    let scored = ranked_candidates(conn, filter, &values, now)?;
    if scored.is_empty() {
        return Err(CoreError::NoCandidate);
    }

    let recent = recent_artists(conn, now - config.anti_repeat_window())?;
    let top = &scored[..config.top_k().min(scored.len())];

    for (score, song) in top {
        if recent.contains(&song.artist_id) {
            debug!("Skipping {song}, artist {} played recently", song.artist_id);
            continue;
        }
        info!("Selected {song} with priority {score:.4}");
        return Ok(song.clone());
    }

    let (score, song) = top.choose(rng).ok_or(CoreError::NoCandidate)?;
    info!("All top {} artists played recently, picked {song} ({score:.4}) at random", top.len());
    Ok(song.clone())
}
