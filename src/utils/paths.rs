use std::borrow::Cow;
use std::env;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

/// First bytes of every SQLite 3 database file
const SQLITE_HEADER: &[u8; 16] = b"SQLite format 3\0";

/// Expand a leading `~` to `$HOME`
///
/// # Examples
///
/// ```
/// use chat_playlist_explorer::utils::paths::expand_tilde;
///
/// let path = expand_tilde("/var/db/chat.db");
/// assert_eq!(path.to_str(), Some("/var/db/chat.db"));
/// ```
pub fn expand_tilde(path: &str) -> PathBuf {
    expand_tilde_internal(path, env::var("HOME").ok().as_deref())
}

pub(crate) fn expand_tilde_internal(path: &str, home: Option<&str>) -> PathBuf {
    match (path.strip_prefix('~'), home) {
        (Some(""), Some(home)) => PathBuf::from(home),
        (Some(rest), Some(home)) if rest.starts_with('/') => {
            PathBuf::from(home).join(rest.trim_start_matches('/'))
        }
        _ => PathBuf::from(path),
    }
}

/// Check that `path` is a readable SQLite database before opening it
pub fn validate_corpus_path(path: &Path) -> Result<()> {
    if path.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
        bail!("Corpus path contains '..': {}", path.display());
    }
    if !path.is_file() {
        bail!("Message corpus not found at {}", format_path_with_tilde(path));
    }

    let mut header = [0u8; 16];
    File::open(path)
        .and_then(|mut file| file.read_exact(&mut header))
        .with_context(|| format!("Failed to read message corpus {}", path.display()))?;
    if &header != SQLITE_HEADER {
        bail!("Not an SQLite database: {}", path.display());
    }
    Ok(())
}

/// Formats a path for display, replacing the home directory with ~
///
/// # Examples
///
/// ```no_run
/// use std::path::PathBuf;
/// use chat_playlist_explorer::format_path_with_tilde;
///
/// let path = PathBuf::from("/Users/alice/Library/Messages/chat.db");
/// // Returns "~/Library/Messages/chat.db" if HOME=/Users/alice
/// let formatted = format_path_with_tilde(&path);
/// ```
pub fn format_path_with_tilde(path: &Path) -> String {
    format_path_with_tilde_internal(path, None)
}

/// Internal helper for path formatting with optional home override (for testing)
pub(crate) fn format_path_with_tilde_internal(path: &Path, home_override: Option<&str>) -> String {
    let home_from_env = env::var("HOME").ok();
    let home = home_override.or(home_from_env.as_deref());

    let path_str = path.to_string_lossy();
    if let Some(home) = home
        && path.starts_with(home)
    {
        return path_str.replacen(home, "~", 1);
    }

    match path_str {
        Cow::Borrowed(s) => s.to_string(),
        Cow::Owned(s) => s,
    }
}
