//! Catalog entities: Artist, Album, Song, plus the append-only History and
//! Rating logs.
//!
//! Aggregate fields (`count_*`, `*_at`, `rating`, `total_length`) are
//! denormalized and only ever written by [`crate::stats`] and
//! [`crate::catalog`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Genres the catalog knows about. Filters naming anything else are rejected.
pub const GENRES: [&str; 5] = ["christian", "pop and dance", "soft rock", "hard rock", "metal"];

/// Returns true if `genre` is one of [`GENRES`].
#[must_use]
pub fn is_known_genre(genre: &str) -> bool {
    GENRES.contains(&genre)
}

/// The three rated entity types, also used as filter facets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Artist,
    Album,
    Song,
}

impl EntityKind {
    /// SQL table backing this kind.
    #[must_use]
    pub const fn table(self) -> &'static str {
        match self {
            Self::Artist => "artist",
            Self::Album => "album",
            Self::Song => "song",
        }
    }

    /// Capitalized name, used in cache keys.
    #[must_use]
    pub const fn type_name(self) -> &'static str {
        match self {
            Self::Artist => "Artist",
            Self::Album => "Album",
            Self::Song => "Song",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// Typed reference to one catalog entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: i64,
}

impl EntityRef {
    #[must_use]
    pub const fn artist(id: i64) -> Self {
        Self { kind: EntityKind::Artist, id }
    }

    #[must_use]
    pub const fn album(id: i64) -> Self {
        Self { kind: EntityKind::Album, id }
    }

    #[must_use]
    pub const fn song(id: i64) -> Self {
        Self { kind: EntityKind::Song, id }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artist {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub count_albums: u32,
    pub count_songs: u32,
    /// Seconds.
    pub total_length: f64,
    pub count_played: u32,
    pub played_at: Option<DateTime<Utc>>,
    pub avg_played_at: Option<DateTime<Utc>>,
    pub count_rated: u32,
    pub rated_at: Option<DateTime<Utc>>,
    pub rating: f64,
    pub genre: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Album {
    pub id: i64,
    pub artist_id: i64,
    pub name: String,
    pub slug: String,
    pub year: i32,
    pub total_discs: u32,
    pub total_tracks: u32,
    pub count_songs: u32,
    pub total_length: f64,
    pub count_played: u32,
    pub played_at: Option<DateTime<Utc>>,
    pub avg_played_at: Option<DateTime<Utc>>,
    pub count_rated: u32,
    pub rated_at: Option<DateTime<Utc>>,
    pub rating: f64,
    pub genre: Option<String>,
}

/// How a song, and its play/rating statistics, is stored in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub id: i64,
    pub album_id: i64,
    pub artist_id: i64,
    /// Path relative to the music directory. Filesystem identity of the song.
    pub rel_path: String,
    pub slug: String,
    pub name: String,
    pub disc_number: u32,
    pub track_number: u32,
    /// Seconds.
    pub track_length: f64,
    /// Number of History rows for this song.
    pub count_played: u32,
    pub played_at: Option<DateTime<Utc>>,
    /// Number of Rating rows this song appears in, as winner or loser.
    pub count_rated: u32,
    pub rated_at: Option<DateTime<Utc>>,
    /// Win ratio over all comparisons, 0 until the first judgment.
    pub rating: f64,
    pub genre: Option<String>,
}

impl Song {
    /// Whether this song may still be offered as the pivot of a comparison.
    ///
    /// A song's comparisons are bounded by how often it has actually been
    /// played: `count_rated < count_played * ratings_per_play`.
    #[must_use]
    pub fn within_rating_budget(&self, ratings_per_play: u32) -> bool {
        self.count_rated < self.count_played.saturating_mul(ratings_per_play)
    }
}

impl fmt::Display for Song {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Song-{} {}>", self.id, self.name)
    }
}

/// One play of a song. Never updated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct History {
    pub id: i64,
    pub song_id: i64,
    pub played_at: DateTime<Utc>,
}

/// One pairwise judgment. Never updated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rating {
    pub id: i64,
    pub winner_id: i64,
    pub loser_id: i64,
    pub rated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song(count_played: u32, count_rated: u32) -> Song {
        Song {
            id: 1,
            album_id: 1,
            artist_id: 1,
            rel_path: "a/b/c.mp3".to_string(),
            slug: "a-b-c-mp3".to_string(),
            name: "C".to_string(),
            disc_number: 1,
            track_number: 1,
            track_length: 200.0,
            count_played,
            played_at: None,
            count_rated,
            rated_at: None,
            rating: 0.0,
            genre: None,
        }
    }

    #[test]
    fn test_rating_budget() {
        assert!(song(1, 4).within_rating_budget(5));
        assert!(!song(1, 5).within_rating_budget(5));
        assert!(!song(0, 0).within_rating_budget(5));
        assert!(song(3, 14).within_rating_budget(5));
    }

    #[test]
    fn test_known_genres() {
        assert!(is_known_genre("metal"));
        assert!(is_known_genre("pop and dance"));
        assert!(!is_known_genre("polka"));
    }

    #[test]
    fn test_entity_ref_display() {
        assert_eq!(EntityRef::album(3).to_string(), "album:3");
        assert_eq!(EntityKind::Artist.type_name(), "Artist");
    }
}
