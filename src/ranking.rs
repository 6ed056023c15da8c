//! Ranking queries: an entity's position among its peers, and an artist's
//! best songs.

use crate::cache::{self, Cache};
use crate::config::EngineConfig;
use crate::db;
use crate::error::{CoreError, Result};
use crate::models::{EntityKind, EntityRef, Song};
use chrono::{DateTime, Utc};
use log::debug;
use rusqlite::Connection;

/// Cache key for the rank of `entity`, e.g. `Album_rank_12`.
#[must_use]
pub fn rank_key(entity: EntityRef) -> String {
    format!("{}_rank_{}", entity.kind.type_name(), entity.id)
}

/// Rank of `entity` among entities of the same kind: 1 plus the number
/// with a strictly greater rating, so ties share a rank.
///
/// Cached per entity for `config.rank_ttl_secs`, measured from `now`; a rank
/// may lag rating changes by up to that long.
///
/// # Errors
///
/// [`CoreError::NotFound`] if the entity does not exist.
pub fn rank(
    conn: &Connection,
    cache: &dyn Cache,
    config: &EngineConfig,
    entity: EntityRef,
    now: DateTime<Utc>,
) -> Result<u32> {
    cache::get_or_compute(cache, &rank_key(entity), config.rank_ttl(), now, || {
        let rating = db::rating_of(conn, entity)?;
        let above: u32 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE rating > ?1", entity.kind.table()),
            [rating],
            |row| row.get(0),
        )?;
        debug!("{entity} has rating {rating:.4}, {above} above it");
        Ok(above + 1)
    })
}

/// The artist's songs rated strictly above the `p` quantile (0 is the best
/// song, 1 the worst), best first.
///
/// `p = 0` returns nothing, `p = 1` everything rated above the worst song.
///
/// # Errors
///
/// - [`CoreError::InvalidFilter`] if `p` is outside `[0, 1]`
/// - [`CoreError::NotFound`] if the artist does not exist
pub fn top_percentile(conn: &Connection, artist_id: i64, p: f64) -> Result<Vec<Song>> {
    if !(0.0..=1.0).contains(&p) {
        return Err(CoreError::InvalidFilter(format!("percentile {p} is outside [0, 1]")));
    }
    if !db::exists(conn, EntityRef::artist(artist_id))? {
        return Err(CoreError::not_found(EntityKind::Artist, artist_id));
    }

    let songs = db::query_songs(conn, "WHERE artist_id = ?1 ORDER BY rating DESC, id", [artist_id])?;
    if songs.is_empty() {
        return Ok(songs);
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let index = ((p * songs.len() as f64).floor() as usize).min(songs.len() - 1);
    let threshold = songs[index].rating;
    Ok(songs.into_iter().filter(|s| s.rating > threshold).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::catalog::{add_song, NewSong};

    fn rated(conn: &mut Connection, ratings: &[f64]) -> Vec<Song> {
        let mut songs = Vec::new();
        for (i, &rating) in ratings.iter().enumerate() {
            let song = add_song(conn, &NewSong::new("Artist", "Album", &format!("s{i}"))).unwrap();
            conn.execute("UPDATE song SET rating = ?2 WHERE id = ?1", rusqlite::params![song.id, rating])
                .unwrap();
            songs.push(Song { rating, ..song });
        }
        songs
    }

    #[test]
    fn test_rank_counts_strictly_greater() -> Result<()> {
        let mut conn = db::open_in_memory()?;
        let songs = rated(&mut conn, &[0.9, 0.5, 0.5, 0.1]);
        let cache = MemoryCache::new();
        let config = EngineConfig::default();

        let ranks: Vec<u32> = songs
            .iter()
            .map(|s| rank(&conn, &cache, &config, EntityRef::song(s.id), Utc::now()))
            .collect::<Result<_>>()?;
        assert_eq!(ranks, vec![1, 2, 2, 4]);
        Ok(())
    }

    #[test]
    fn test_rank_is_cached() -> Result<()> {
        let mut conn = db::open_in_memory()?;
        let songs = rated(&mut conn, &[0.2, 0.8]);
        let cache = MemoryCache::new();
        let config = EngineConfig::default();
        let first = EntityRef::song(songs[0].id);

        let now = Utc::now();
        assert_eq!(rank(&conn, &cache, &config, first, now)?, 2);
        conn.execute("UPDATE song SET rating = 1.0 WHERE id = ?1", [songs[0].id])?;
        assert_eq!(rank(&conn, &cache, &config, first, now)?, 2);

        let later = now + chrono::Duration::seconds(3600);
        assert_eq!(rank(&conn, &cache, &config, first, later)?, 1);

        conn.execute("UPDATE song SET rating = 0.0 WHERE id = ?1", [songs[0].id])?;
        cache.delete(&rank_key(first))?;
        assert_eq!(rank(&conn, &cache, &config, first, later)?, 2);
        Ok(())
    }

    #[test]
    fn test_rank_unknown_entity() {
        let conn = db::open_in_memory().unwrap();
        let err = rank(&conn, &MemoryCache::new(), &EngineConfig::default(), EntityRef::album(5), Utc::now()).unwrap_err();
        assert!(matches!(err, CoreError::NotFound { kind: EntityKind::Album, id: 5 }));
    }

    #[test]
    fn test_rank_key() {
        assert_eq!(rank_key(EntityRef::album(12)), "Album_rank_12");
    }

    #[test]
    fn test_top_percentile() -> Result<()> {
        let mut conn = db::open_in_memory()?;
        let songs = rated(&mut conn, &[0.1, 0.9, 0.5, 0.7, 0.3]);
        let artist = songs[0].artist_id;

        // Sorted: 0.9 0.7 0.5 0.3 0.1; floor(0.4 * 5) = 2 -> threshold 0.5.
        let top: Vec<f64> = top_percentile(&conn, artist, 0.4)?.iter().map(|s| s.rating).collect();
        assert_eq!(top, vec![0.9, 0.7]);

        assert!(top_percentile(&conn, artist, 0.0)?.is_empty());
        assert_eq!(top_percentile(&conn, artist, 1.0)?.len(), 4);

        assert!(matches!(top_percentile(&conn, artist, 1.5), Err(CoreError::InvalidFilter(_))));
        assert!(matches!(top_percentile(&conn, artist, f64::NAN), Err(CoreError::InvalidFilter(_))));
        assert!(matches!(top_percentile(&conn, 999, 0.5), Err(CoreError::NotFound { .. })));
        Ok(())
    }
}
