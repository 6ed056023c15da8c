//! # Speler
//!
//! Command-line front end of the selection and rating engine. Audio
//! playback is left to whatever player calls `speler next`; Speler only
//! decides what plays and keeps score.
//!
//! ## Usage
//!
//! ```bash
//! # Create the database and import tags
//! speler init-db
//! speler import library.json
//!
//! # Pick a song and record that it played
//! speler next --play
//!
//! # Compare it with two recent songs, then record the winner
//! speler match 12
//! speler judge 12 7 9
//! ```

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser};
use log::{debug, info};
use speler::catalog::{self, NewSong};
use speler::cli::{self, Command};
use speler::config::RuntimeConfig;
use speler::{completion, db, stats, CoreError, EntityRef, Engine, SelectionFilter, Song};
use std::fs;

fn load_config(args: &cli::Args) -> Result<RuntimeConfig> {
    let mut config = match &args.config {
        Some(path) => RuntimeConfig::load(path)?,
        None => RuntimeConfig::new()?,
    };
    if let Some(db_path) = &args.db {
        config.db_path.clone_from(db_path);
    }
    debug!("Using database {}", config.db_path.display());
    Ok(config)
}

fn open_engine(config: &RuntimeConfig) -> Result<Engine> {
    Engine::open(&config.db_path, config.engine)
        .with_context(|| format!("Failed to open database {}", config.db_path.display()))
}

fn describe(song: &Song) -> String {
    format!(
        "{:>6}  {}  (played {}, rated {}, rating {:.3})",
        song.id, song.rel_path, song.count_played, song.count_rated, song.rating
    )
}

/// Main entry point for Speler.
///
/// Initializes logging, parses command-line arguments, and routes commands
/// to the library. Logging is controlled via `RUST_LOG`, e.g.
/// `RUST_LOG=speler=debug speler next`.
fn main() -> Result<()> {
    env_logger::init();

    let args = cli::Args::parse();

    match &args.command {
        Command::Completion { shell } => {
            let mut cmd = cli::Args::command();
            completion::generate_completions(completion::shell_to_completion_shell(*shell), &mut cmd);
            return Ok(());
        }
        Command::CompleteSongs => {
            // Completion must never fail loudly; an unreadable catalog completes nothing.
            if let Ok(config) = load_config(&args) {
                if config.db_path.exists() {
                    if let Ok(conn) = db::open(&config.db_path) {
                        completion::print_song_completions(&conn).ok();
                    }
                }
            }
            return Ok(());
        }
        _ => {}
    }

    let config = load_config(&args)?;

    match args.command {
        Command::InitDb { force } => {
            if force && config.db_path.exists() {
                fs::remove_file(&config.db_path).with_context(|| {
                    format!("Failed to remove existing database {}", config.db_path.display())
                })?;
                info!("Removed existing database {}", config.db_path.display());
            }
            open_engine(&config)?;
            println!("Database ready at {}", config.db_path.display());
        }
        Command::Import { file } => {
            let text = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let songs: Vec<NewSong> = serde_json::from_str(&text)
                .with_context(|| format!("{} is not a JSON array of songs", file.display()))?;

            let mut engine = open_engine(&config)?;
            let before = db::count_rows(engine.connection(), "song")?;
            for new in &songs {
                catalog::add_song(engine.connection_mut(), new)
                    .with_context(|| format!("Failed to import {}", new.rel_path))?;
            }
            let added = db::count_rows(engine.connection(), "song")? - before;
            println!(
                "Imported {added} songs ({} already cataloged)",
                songs.len() as u64 - added
            );
        }
        Command::List => {
            let engine = open_engine(&config)?;
            for song in db::all_songs(engine.connection())? {
                println!("{}", describe(&song));
            }
        }
        Command::Next { facet, genres, play } => {
            let mut engine = open_engine(&config)?;
            let filter = SelectionFilter {
                facet: facet.entity(),
                genres: genres.into_iter().collect(),
            };

            let song = match engine.next_song(&filter) {
                Ok(song) => song,
                Err(CoreError::NoCandidate) => {
                    println!("Nothing to play: no song matches the current selection.");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            if let Some(music_dir) = &config.music_dir {
                match catalog::ensure_playable(music_dir, &song) {
                    Ok(path) => println!("{}", path.display()),
                    Err(e @ CoreError::Inconsistent { .. }) => {
                        bail!("{e}; run `speler validate --delete` and try again");
                    }
                    Err(e) => return Err(e.into()),
                }
            } else {
                println!("{}", describe(&song));
            }

            if play {
                engine.record_play(song.id)?;
            }
        }
        Command::Play { id } => {
            let mut engine = open_engine(&config)?;
            let history = engine.record_play(id)?;
            println!("Recorded play of song {id} at {}", history.played_at);
        }
        Command::Match { id } => {
            let engine = open_engine(&config)?;
            match engine.propose_match(id)? {
                Some(songs) => {
                    for song in &songs {
                        println!("{}", describe(song));
                    }
                }
                None => println!("No comparison available for song {id}."),
            }
        }
        Command::Judge { winner, losers } => {
            let mut engine = open_engine(&config)?;
            let ratings = engine.record_judgment(winner, &losers)?;
            if ratings.is_empty() {
                println!("Nothing recorded: these songs have used up their comparisons.");
            } else {
                println!("Recorded {} comparisons won by song {winner}", ratings.len());
            }
        }
        Command::Search { query, kind } => {
            let engine = open_engine(&config)?;
            let found = catalog::search(engine.connection(), &query, kind.map(Into::into))?;
            if found.is_empty() {
                println!("No matches for `{query}'");
            }
            for artist in &found.artists {
                println!("artist {:>6}  {}", artist.id, artist.name);
            }
            for album in &found.albums {
                println!("album  {:>6}  {} ({})", album.id, album.name, album.year);
            }
            for song in &found.songs {
                println!("song   {:>6}  {}", song.id, song.name);
            }
        }
        Command::Rank { kind, id } => {
            let engine = open_engine(&config)?;
            let entity = EntityRef { kind: kind.into(), id };
            println!("{entity} is ranked #{}", engine.rank(entity)?);
        }
        Command::Top { artist, percentile } => {
            let engine = open_engine(&config)?;
            for song in engine.top_percentile(artist, percentile)? {
                println!("{}", describe(&song));
            }
        }
        Command::Genre { kind, id, genre } => {
            let mut engine = open_engine(&config)?;
            let entity = EntityRef { kind: kind.into(), id };
            let songs = catalog::set_genre(engine.connection_mut(), entity, &genre)?;
            println!("Set genre of {entity} to {genre} ({songs} songs)");
        }
        Command::Validate { music_dir, delete } => {
            let config = match music_dir {
                Some(dir) => config.with_music_dir(&dir)?,
                None => config,
            };
            let Some(music_dir) = config.music_dir.clone() else {
                bail!("No music directory given and none configured in config.json");
            };
            let mut engine = open_engine(&config)?;
            let missing = catalog::validate_songs(engine.connection_mut(), &music_dir, delete)?;
            for song in &missing {
                println!("missing: {}", describe(song));
            }
            let verb = if delete { "Removed" } else { "Found" };
            println!("{verb} {} songs without audio file", missing.len());
        }
        Command::History { id } => {
            let engine = open_engine(&config)?;
            let song = db::get_song(engine.connection(), id)?;
            println!("{}", describe(&song));
            for entry in db::history_of_song(engine.connection(), id)? {
                println!("  {}", entry.played_at);
            }
        }
        Command::Recompute => {
            let mut engine = open_engine(&config)?;
            let count = stats::recompute_all(engine.connection_mut())?;
            println!("Recomputed aggregates for {count} songs");
        }
        Command::Completion { .. } | Command::CompleteSongs => {}
    }

    Ok(())
}
