//! Next-song selection and pairwise rating engine for a local music library.
//!
//! Core modules:
//! - [`selector`] - Priority-based choice of the next song
//! - [`matchmaker`] - Triples of songs to compare
//! - [`stats`] - Play and rating aggregates, propagated Song → Album → Artist
//! - [`ranking`] - Rank and top-percentile queries
//! - [`engine`] - Facade tying the above to one catalog and cache
//!
//! ### Supporting Modules
//!
//! - [`db`] - SQLite catalog store
//! - [`catalog`] - Ingestion, genres and file validation
//! - [`cache`] - TTL cache for memoized aggregates
//! - [`config`] - Data directory and tuning parameters
//! - [`cli`] - Command-line interface definitions with clap integration
//! - [`completion`] - Shell completion generation
//!
//! ## Quick Start Example
//!
//! ```no_run
//! use speler::catalog::{add_song, NewSong};
//! use speler::config::EngineConfig;
//! use speler::engine::Engine;
//! use speler::selector::SelectionFilter;
//!
//! let mut engine = Engine::in_memory(EngineConfig::default())?;
//! add_song(engine.connection_mut(), &NewSong::new("Artist", "Album", "Song"))?;
//!
//! let next = engine.next_song(&SelectionFilter::new())?;
//! engine.record_play(next.id)?;
//! # Ok::<(), speler::error::CoreError>(())
//! ```
//!
//! ## Selection
//!
//! Unplayed songs are exhausted first, in random order. After that every
//! song gets a priority
//!
//! ```text
//! rating - count_played / max_played + days_since_played / reference_spread
//! ```
//!
//! and the highest-priority song by an artist not heard within the
//! anti-repeat window (40 minutes by default) plays next.
//!
//! ## Rating
//!
//! Songs are rated by pairwise judgments. The matchmaker offers the current
//! song together with two recently played songs that have not been compared
//! with it or with each other; the user names a winner. A song's rating is
//! its share of comparisons won, an album's the mean over its songs, an
//! artist's the mean over its albums. Each song may take part in at most
//! five comparisons per play.
//!
//! ## Error Handling
//!
//! Library functions return [`error::Result`], carrying a [`error::CoreError`].
//! The binary wraps these with `anyhow` context.

pub mod cache;
pub mod catalog;
pub mod cli;
pub mod completion;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod matchmaker;
pub mod models;
pub mod ranking;
pub mod selector;
pub mod stats;

pub use engine::Engine;
pub use error::{CoreError, Result};
pub use models::{Album, Artist, EntityKind, EntityRef, History, Rating, Song};
pub use selector::SelectionFilter;
