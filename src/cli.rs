//! # Command-Line Interface Module
//!
//! Defines the `speler` command line using Clap derive macros.
//!
//! ## Commands
//!
//! - `init-db`: Create the catalog database
//! - `import`: Add songs from a JSON file of tag records
//! - `list`: Display all cataloged songs with statistics
//! - `next`: Pick the next song to play, optionally recording the play
//! - `play`: Record a play of a song
//! - `match`: Propose three songs to compare
//! - `judge`: Record the outcome of a comparison
//! - `rank` / `top`: Ranking queries
//! - `genre`: Assign a genre to an artist, album or song
//! - `validate`: Find songs whose audio file is gone
//!
//! ## Examples
//!
//! ```bash
//! speler import library.json
//! speler next --genre metal --play
//! speler match 42
//! speler judge 42 17 23
//! ```

use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use crate::models::{EntityKind, EntityRef};
use std::path::PathBuf;

/// Shell types supported for completion generation
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    /// Bash shell
    Bash,
    /// Zsh shell
    Zsh,
    /// Fish shell
    Fish,
    /// PowerShell
    PowerShell,
    /// Elvish shell
    Elvish,
}

/// Entity kinds as accepted on the command line.
#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum Kind {
    Artist,
    Album,
    Song,
}

impl From<Kind> for EntityKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Artist => Self::Artist,
            Kind::Album => Self::Album,
            Kind::Song => Self::Song,
        }
    }
}

/// Main application arguments structure.
#[derive(Parser)]
#[command(name = "speler")]
#[command(about = "Speler: picks what plays next and learns what you like")]
#[command(version)]
pub struct Args {
    /// Database file (defaults to the platform data directory)
    #[arg(long, global = true, env = "SPELER_DB")]
    pub db: Option<PathBuf>,

    /// Config file (defaults to config.json in the data directory)
    #[arg(long, global = true, env = "SPELER_CONFIG")]
    pub config: Option<PathBuf>,

    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Restriction of `next` to one artist, album or song.
#[derive(ClapArgs, Debug, Default)]
#[group(multiple = false)]
pub struct Facet {
    /// Only songs by this artist id
    #[arg(long)]
    pub artist: Option<i64>,
    /// Only songs on this album id
    #[arg(long)]
    pub album: Option<i64>,
    /// Only this song id
    #[arg(long)]
    pub song: Option<i64>,
}

impl Facet {
    #[must_use]
    pub fn entity(&self) -> Option<EntityRef> {
        self.artist
            .map(EntityRef::artist)
            .or_else(|| self.album.map(EntityRef::album))
            .or_else(|| self.song.map(EntityRef::song))
    }
}

/// Enumeration of all available subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Create the catalog database
    ///
    /// Creates the tables if they do not exist yet. Existing data is kept
    /// unless `--force` is given.
    InitDb {
        /// Delete and recreate the database
        #[arg(long)]
        force: bool,
    },

    /// Add songs from a JSON file
    ///
    /// The file holds an array of records with `artist`, `album`, `name`,
    /// `rel_path` and optionally `year`, `disc_number`, `total_discs`,
    /// `track_number`, `total_tracks` and `track_length` (seconds).
    /// Songs whose path is already cataloged are skipped.
    Import {
        /// Path to the JSON file
        #[arg(value_hint = clap::ValueHint::FilePath)]
        file: PathBuf,
    },

    /// List all songs in the catalog
    ///
    /// Shows play count, comparison count and rating for every song,
    /// ordered by artist, album, disc and track.
    List,

    /// Pick the next song to play
    ///
    /// Unplayed songs come first, in random order. After that the song with
    /// the highest priority wins, skipping artists heard within the
    /// anti-repeat window.
    Next {
        #[command(flatten)]
        facet: Facet,

        /// Only songs of this genre (repeatable)
        #[arg(long = "genre", value_name = "GENRE")]
        genres: Vec<String>,

        /// Record the selected song as played
        #[arg(long)]
        play: bool,
    },

    /// Record a play of a song
    Play {
        /// Song id
        id: i64,
    },

    /// Propose three songs to compare
    ///
    /// Pairs the given song with two songs played recently, none of which
    /// have been compared with each other yet.
    Match {
        /// Id of the song currently playing
        id: i64,
    },

    /// Record the outcome of a comparison
    ///
    /// The winner is recorded as beating each of the losers.
    Judge {
        /// Winning song id
        winner: i64,
        /// Losing song ids
        #[arg(required = true)]
        losers: Vec<i64>,
    },

    /// Find artists, albums and songs by name
    Search {
        /// Text to look for, case-insensitive
        query: String,
        /// Only search this kind
        #[arg(long, value_enum)]
        kind: Option<Kind>,
    },

    /// Show the rank of an artist, album or song by rating
    Rank {
        kind: Kind,
        id: i64,
    },

    /// Show an artist's best songs
    Top {
        /// Artist id
        artist: i64,
        /// Quantile cut-off, 0 (best) to 1 (worst)
        #[arg(long, default_value_t = 0.5)]
        percentile: f64,
    },

    /// Assign a genre to an artist, album or song and everything below it
    Genre {
        kind: Kind,
        id: i64,
        genre: String,
    },

    /// Find songs whose audio file is missing
    Validate {
        /// Music directory (defaults to `music_dir` from the config file)
        #[arg(value_hint = clap::ValueHint::DirPath)]
        music_dir: Option<PathBuf>,
        /// Remove missing songs, and albums and artists left empty
        #[arg(long)]
        delete: bool,
    },

    /// Show when a song was played, newest first
    History {
        /// Song id
        id: i64,
    },

    /// Recompute every play and rating aggregate from history
    Recompute,

    /// Generate shell completions
    ///
    /// Usage: speler completion bash > ~/.local/share/bash-completion/completions/speler
    Completion {
        /// Shell to generate completions for
        shell: Shell,
    },

    /// List song ids and names for completion (hidden command)
    #[command(hide = true)]
    CompleteSongs,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_next_flags() {
        let args = Args::try_parse_from(["speler", "next", "--album", "3", "--genre", "metal", "--genre", "christian", "--play"])
            .unwrap();
        match args.command {
            Command::Next { facet, genres, play } => {
                assert_eq!(facet.entity(), Some(EntityRef::album(3)));
                assert_eq!(genres, vec!["metal", "christian"]);
                assert!(play);
            }
            _ => panic!("expected next"),
        }
    }

    #[test]
    fn test_facets_are_exclusive() {
        assert!(Args::try_parse_from(["speler", "next", "--artist", "1", "--song", "2"]).is_err());
    }

    #[test]
    fn test_judge_requires_a_loser() {
        assert!(Args::try_parse_from(["speler", "judge", "1"]).is_err());
        assert!(Args::try_parse_from(["speler", "judge", "1", "2", "3"]).is_ok());
    }

    #[test]
    fn test_search_kind() {
        let args = Args::try_parse_from(["speler", "search", "blue", "--kind", "album"]).unwrap();
        match args.command {
            Command::Search { query, kind } => {
                assert_eq!(query, "blue");
                assert_eq!(kind, Some(Kind::Album));
            }
            _ => panic!("expected search"),
        }
        assert!(Args::try_parse_from(["speler", "search", "blue", "--kind", "genre"]).is_err());
    }
}
