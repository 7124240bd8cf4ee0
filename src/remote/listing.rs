//! Directory listing with a short-lived cache.
//!
//! Listings back interactive file browsing, so the same directory gets
//! requested in bursts. A per-(host, path) cache with a TTL of tens of
//! seconds absorbs those bursts; entries are evicted on expiry, not LRU,
//! since only write recency matters here.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::connection::Connection;
use crate::error::Result;
use crate::model::HostId;

use super::{exec_checked, paths, shell};

/// What a directory entry is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Regular file
    File,
    /// Directory
    Directory,
    /// Symbolic link
    Symlink,
    /// Sockets, fifos, devices
    Other,
}

/// One parsed entry of a long-format directory listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Entry name without any path
    pub name: String,
    /// File, directory, symlink
    pub kind: EntryKind,
    /// Permission string as listed, e.g. `-rw-r--r--`
    pub permissions: String,
    /// Size in bytes
    pub size: u64,
    /// Modification time, when the listing carried a parseable one
    pub modified: Option<NaiveDateTime>,
}

/// Renders the listing command for an already-validated absolute path.
pub fn render_listing(path: &str) -> String {
    format!("ls -la --time-style=long-iso {}", shell::quote(path))
}

/// Parses `ls -la --time-style=long-iso` output. The `total` header and
/// the `.`/`..` entries are dropped; lines that do not look like listing
/// rows are skipped rather than failing the whole listing.
pub fn parse_listing(stdout: &str) -> Vec<DirEntry> {
    stdout.lines().filter_map(parse_listing_line).collect()
}

fn parse_listing_line(line: &str) -> Option<DirEntry> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    // perms links owner group size date time name...
    if fields.len() < 8 {
        return None;
    }

    let permissions = fields[0];
    let kind = match permissions.chars().next()? {
        '-' => EntryKind::File,
        'd' => EntryKind::Directory,
        'l' => EntryKind::Symlink,
        'b' | 'c' | 'p' | 's' => EntryKind::Other,
        _ => return None,
    };

    let size: u64 = fields[4].parse().ok()?;
    let modified =
        NaiveDateTime::parse_from_str(&format!("{} {}", fields[5], fields[6]), "%Y-%m-%d %H:%M")
            .ok();

    let mut name = fields[7..].join(" ");
    if kind == EntryKind::Symlink {
        if let Some((target_name, _)) = name.split_once(" -> ") {
            name = target_name.to_string();
        }
    }
    if name == "." || name == ".." {
        return None;
    }

    Some(DirEntry {
        name,
        kind,
        permissions: permissions.to_string(),
        size,
        modified,
    })
}

// ============================================================================
// Cache
// ============================================================================

struct CachedListing {
    entries: Arc<Vec<DirEntry>>,
    expires_at: Instant,
}

/// TTL cache of directory listings keyed by (host, exact requested path).
pub struct ListingCache {
    ttl: Duration,
    entries: DashMap<(HostId, String), CachedListing>,
}

impl ListingCache {
    /// Creates a cache with the given entry lifetime.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    /// Returns the cached listing if present and not expired. Expired
    /// entries are evicted on the way.
    pub fn get(&self, host: HostId, path: &str) -> Option<Arc<Vec<DirEntry>>> {
        let key = (host, path.to_string());
        // The read guard must be gone before remove touches the shard.
        let expired = match self.entries.get(&key) {
            Some(cached) if cached.expires_at > Instant::now() => {
                return Some(Arc::clone(&cached.entries));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(&key);
        }
        None
    }

    /// Stores a listing.
    pub fn put(&self, host: HostId, path: &str, entries: Vec<DirEntry>) -> Arc<Vec<DirEntry>> {
        let entries = Arc::new(entries);
        self.entries.insert(
            (host, path.to_string()),
            CachedListing {
                entries: Arc::clone(&entries),
                expires_at: Instant::now() + self.ttl,
            },
        );
        entries
    }

    /// Drops the entry for one path, e.g. after a write under it.
    pub fn invalidate(&self, host: HostId, path: &str) {
        self.entries.remove(&(host, path.to_string()));
    }

    /// Drops every entry for a host (host removed, server deleted).
    pub fn invalidate_host(&self, host: HostId) {
        self.entries.retain(|(h, _), _| *h != host);
    }

    /// Number of live entries, counting expired-but-unevicted ones.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Lists a directory under the server root, going through the cache.
/// Containment is checked before the cache so a hostile path never even
/// produces a lookup key.
pub async fn list_directory(
    conn: &dyn Connection,
    cache: &ListingCache,
    host: HostId,
    root: &str,
    requested: &str,
    timeout: Duration,
) -> Result<Arc<Vec<DirEntry>>> {
    let resolved = paths::resolve_within_root(root, requested)?;

    if let Some(cached) = cache.get(host, requested) {
        trace!(host = %host, path = requested, "Listing served from cache");
        return Ok(cached);
    }

    let output = exec_checked(conn, &render_listing(&resolved), timeout).await?;
    Ok(cache.put(host, requested, parse_listing(&output.stdout)))
}
