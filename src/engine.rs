//! # Engine
//!
//! Facade bundling the catalog connection, a cache and the tuning
//! parameters. Each entry point has a plain form using the current time
//! (and thread-local randomness), plus an `_at` form taking both explicitly.
//! Cached values also expire by the `now` handed to an `_at` form.
//!
//! ```no_run
//! use speler::config::EngineConfig;
//! use speler::engine::Engine;
//! use speler::selector::SelectionFilter;
//!
//! let mut engine = Engine::open(std::path::Path::new("speler.db"), EngineConfig::default())?;
//! let song = engine.next_song(&SelectionFilter::new())?;
//! engine.record_play(song.id)?;
//! if let Some([current, b, c]) = engine.propose_match(song.id)? {
//!     engine.record_judgment(b.id, &[current.id, c.id])?;
//! }
//! # Ok::<(), speler::error::CoreError>(())
//! ```

use crate::cache::{Cache, MemoryCache, SqliteCache};
use crate::config::EngineConfig;
use crate::db;
use crate::error::Result;
use crate::matchmaker;
use crate::models::{EntityRef, History, Rating, Song};
use crate::ranking;
use crate::selector::{self, SelectionFilter};
use crate::stats;
use chrono::{DateTime, Utc};
use log::debug;
use rand::Rng;
use rusqlite::Connection;
use std::path::Path;

pub struct Engine {
    conn: Connection,
    cache: Box<dyn Cache>,
    config: EngineConfig,
}

impl Engine {
    #[must_use]
    pub fn new(conn: Connection, cache: Box<dyn Cache>, config: EngineConfig) -> Self {
        Self { conn, cache, config }
    }

    /// Open the catalog at `path`, with a persistent cache in the same file.
    pub fn open(path: &Path, config: EngineConfig) -> Result<Self> {
        let conn = db::open(path)?;
        let cache = SqliteCache::open(path)?;
        let purged = cache.purge_expired()?;
        if purged > 0 {
            debug!("Purged {purged} expired cache entries");
        }
        Ok(Self::new(conn, Box::new(cache), config))
    }

    /// Private in-memory catalog and cache.
    pub fn in_memory(config: EngineConfig) -> Result<Self> {
        Ok(Self::new(db::open_in_memory()?, Box::new(MemoryCache::new()), config))
    }

    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Mutable access for catalog maintenance.
    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    #[must_use]
    pub fn cache(&self) -> &dyn Cache {
        self.cache.as_ref()
    }

    pub fn next_song(&self, filter: &SelectionFilter) -> Result<Song> {
        self.next_song_at(filter, Utc::now(), &mut rand::thread_rng())
    }

    pub fn next_song_at<R: Rng + ?Sized>(
        &self,
        filter: &SelectionFilter,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<Song> {
        selector::next_song(&self.conn, self.cache.as_ref(), &self.config, filter, now, rng)
    }

    pub fn record_play(&mut self, song_id: i64) -> Result<History> {
        self.record_play_at(song_id, Utc::now())
    }

    pub fn record_play_at(&mut self, song_id: i64, at: DateTime<Utc>) -> Result<History> {
        stats::record_play(&mut self.conn, song_id, at)
    }

    pub fn propose_match(&self, song_id: i64) -> Result<Option<[Song; 3]>> {
        self.propose_match_at(song_id, Utc::now())
    }

    pub fn propose_match_at(&self, song_id: i64, now: DateTime<Utc>) -> Result<Option<[Song; 3]>> {
        matchmaker::propose_match(&self.conn, &self.config, song_id, now)
    }

    pub fn record_judgment(&mut self, winner_id: i64, loser_ids: &[i64]) -> Result<Vec<Rating>> {
        self.record_judgment_at(winner_id, loser_ids, Utc::now())
    }

    pub fn record_judgment_at(
        &mut self,
        winner_id: i64,
        loser_ids: &[i64],
        at: DateTime<Utc>,
    ) -> Result<Vec<Rating>> {
        stats::record_judgment(&mut self.conn, winner_id, loser_ids, self.config.ratings_per_play, at)
    }

    pub fn rank(&self, entity: EntityRef) -> Result<u32> {
        self.rank_at(entity, Utc::now())
    }

    pub fn rank_at(&self, entity: EntityRef, now: DateTime<Utc>) -> Result<u32> {
        ranking::rank(&self.conn, self.cache.as_ref(), &self.config, entity, now)
    }

    pub fn top_percentile(&self, artist_id: i64, p: f64) -> Result<Vec<Song>> {
        ranking::top_percentile(&self.conn, artist_id, p)
    }
}
