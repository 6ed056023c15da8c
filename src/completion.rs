//! # Shell Completion Module
//!
//! Completion scripts via `clap_complete`, plus a song listing that shell
//! scripts can call for dynamic completion of song ids.
//!
//! ## Usage
//!
//! ```bash
//! # Generate bash completions
//! speler completion bash > ~/.local/share/bash-completion/completions/speler
//!
//! # Generate zsh completions
//! speler completion zsh > ~/.config/zsh/completions/_speler
//! ```

use crate::cli::Shell;
use crate::error::Result;
use clap::Command;
use clap_complete::{generate, Generator, Shell as CompletionShell};
use rusqlite::Connection;
use std::io::{self, Write};

/// Generate shell completions for the given shell
pub fn generate_completions<G: Generator>(gen: G, cmd: &mut Command) {
    let name = cmd.get_name().to_string();
    generate(gen, cmd, name, &mut io::stdout());
}

/// Convert our Shell enum to clap_complete's Shell enum
#[must_use]
pub const fn shell_to_completion_shell(shell: Shell) -> CompletionShell {
    match shell {
        Shell::Bash => CompletionShell::Bash,
        Shell::Zsh => CompletionShell::Zsh,
        Shell::Fish => CompletionShell::Fish,
        Shell::PowerShell => CompletionShell::PowerShell,
        Shell::Elvish => CompletionShell::Elvish,
    }
}

/// One `id<TAB>artist - name` line per song, in catalog order.
///
/// The tab-separated description is the format fish and zsh understand.
pub fn song_completions(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT song.id, artist.name, song.name FROM song
         JOIN artist ON artist.id = song.artist_id
         ORDER BY artist.name, song.album_id, song.disc_number, song.track_number",
    )?;
    let lines = stmt
        .query_map([], |row| {
            let id: i64 = row.get(0)?;
            let artist: String = row.get(1)?;
            let name: String = row.get(2)?;
            Ok(format!("{id}\t{artist} - {name}"))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(lines)
}

/// Print [`song_completions`] to stdout. An empty catalog prints nothing.
pub fn print_song_completions(conn: &Connection) -> Result<()> {
    let mut out = io::stdout().lock();
    for line in song_completions(conn)? {
        if writeln!(out, "{line}").is_err() {
            // Closed pipe; the shell stopped reading.
            break;
        }
    }
    Ok(())
}
