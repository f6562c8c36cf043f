//! Public naming
//!
//! A name is reused when the catalog row holding it has the same content;
//! otherwise `stem-1.ext`, `stem-2.ext`, ... are tried until a free one turns up.

use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::db::{find_by_public_name, FileEntry, FileStatus};
use crate::error::Result;
use crate::upload::hasher::digests_match;

/// Outcome of resolving a public name
#[derive(Debug)]
pub enum PublicName {
    /// An active entry already publishes this content under the name
    Reuse(FileEntry),
    /// Nobody holds this name yet
    Fresh(String),
}

/// Reduce a client-supplied filename to a safe single path segment.
///
/// Spaces become underscores; letters (any script), digits, `_`, `-`, `.`
/// and `·` survive; everything else is dropped. Falls back to a random hex
/// name when nothing is left.
pub fn sanitize_filename(name: &str) -> String {
    let base = name
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or_default();

    let cleaned: String = base
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .filter(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '·'))
        .collect();

    // no hidden files, no `.` or `..`
    let cleaned = cleaned.trim_start_matches('.');

    if cleaned.is_empty() {
        Uuid::new_v4().simple().to_string()
    } else {
        cleaned.to_string()
    }
}

/// Split into stem and suffix; the suffix keeps its dot.
pub fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos > 0 && pos + 1 < name.len() => name.split_at(pos),
        _ => (name, ""),
    }
}

/// Find the public name for content `sha256` uploaded as `base`
pub async fn resolve_public_name(
    conn: &mut SqliteConnection,
    base: &str,
    sha256: &str,
) -> Result<PublicName> {
    let (stem, suffix) = split_name(base);
    let mut candidate = base.to_string();
    let mut counter = 1u32;

    loop {
        match find_by_public_name(&mut *conn, &candidate).await? {
            None => return Ok(PublicName::Fresh(candidate)),
            Some(entry)
                if entry.status == FileStatus::Active && digests_match(&entry.sha256, sha256) =>
            {
                return Ok(PublicName::Reuse(entry));
            }
            Some(_) => {
                candidate = format!("{}-{}{}", stem, counter, suffix);
                counter += 1;
            }
        }
    }
}
