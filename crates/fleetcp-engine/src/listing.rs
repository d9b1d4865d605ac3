//! Directory listings and their TTL cache
//!
//! Listings come from local filesystem enumeration or from remote `ls`/
//! `dir` output parsed per host OS, always sorted directories-first in
//! case-insensitive natural (numeric-aware) name order. The cache is keyed
//! by (host, normalized path, hidden flag) and invalidated precisely on
//! the directories a transfer or delete touches.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use fleetcp_config::CacheConfig;
use fleetcp_remote::shell_quote;
use fleetcp_types::{path as fpath, DirEntry, Error, OsKind, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// One `dir` output row: date, time, `<DIR>`/size, name
static DIR_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{2,4}[-/]\d{2}[-/]\d{2,4})\s+(\d{2}:\d{2})\s+(<DIR>|<JUNCTION>|\d[\d,]*)\s+(.+)$")
        .unwrap_or_else(|e| panic!("{e}"))
});

/// Build the POSIX listing command for a path
pub fn posix_listing_command(path: &str) -> String {
    format!(
        "ls -la --time-style=long-iso {} | tail -n +2",
        shell_quote(path)
    )
}

/// Build the Windows listing command for a path
pub fn windows_listing_command(path: &str, show_hidden: bool) -> String {
    let win = fpath::normalize_for_shell(path, OsKind::Windows);
    if show_hidden {
        format!("dir \"{}\" /a /-c", win)
    } else {
        format!("dir \"{}\" /-c", win)
    }
}

/// Natural-order chunk: digit runs compare numerically, text runs
/// case-insensitively
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum NaturalChunk {
    Number(u64),
    Text(String),
}

fn natural_key(name: &str) -> Vec<NaturalChunk> {
    let mut chunks = Vec::new();
    let mut buf = String::new();
    let mut digits = false;
    for c in name.chars() {
        if c.is_ascii_digit() != digits && !buf.is_empty() {
            chunks.push(flush_chunk(&mut buf, digits));
        }
        digits = c.is_ascii_digit();
        buf.push(c);
    }
    if !buf.is_empty() {
        chunks.push(flush_chunk(&mut buf, digits));
    }
    chunks
}

fn flush_chunk(buf: &mut String, digits: bool) -> NaturalChunk {
    let chunk = if digits {
        // Overlong digit runs fall back to text comparison
        buf.parse()
            .map(NaturalChunk::Number)
            .unwrap_or_else(|_| NaturalChunk::Text(buf.to_lowercase()))
    } else {
        NaturalChunk::Text(buf.to_lowercase())
    };
    buf.clear();
    chunk
}

/// Sort directories first, then by natural name order
pub fn sort_entries(entries: &mut [DirEntry]) {
    entries.sort_by(|a, b| match (a.is_dir, b.is_dir) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => natural_key(&a.name).cmp(&natural_key(&b.name)),
    });
}

/// Split `count` whitespace-delimited fields off the front of a line,
/// returning them together with the raw remainder. The remainder keeps
/// its internal whitespace untouched.
fn split_fixed_fields(line: &str, count: usize) -> Option<(Vec<&str>, &str)> {
    let mut fields = Vec::with_capacity(count);
    let mut rest = line.trim_start();
    for _ in 0..count {
        let end = rest.find(char::is_whitespace)?;
        fields.push(&rest[..end]);
        rest = rest[end..].trim_start();
    }
    if rest.is_empty() {
        return None;
    }
    Some((fields, rest))
}

/// Parse `ls -la --time-style=long-iso` output into entries
pub fn parse_posix_listing(output: &str, dir_path: &str, show_hidden: bool) -> Vec<DirEntry> {
    let mut entries = Vec::new();
    for line in output.lines() {
        let Some((fields, raw_name)) = split_fixed_fields(line, 7) else {
            continue;
        };
        let permissions = fields[0];
        let size: Option<u64> = fields[4].parse().ok();
        let name = raw_name.trim_end_matches('\r').to_string();
        if name == "." || name == ".." {
            continue;
        }
        if !show_hidden && name.starts_with('.') {
            continue;
        }
        let modified = NaiveDateTime::parse_from_str(
            &format!("{} {}", fields[5], fields[6]),
            "%Y-%m-%d %H:%M",
        )
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive));
        let is_dir = permissions.starts_with('d');
        entries.push(DirEntry {
            path: format!("{}/{}", dir_path.trim_end_matches('/'), name),
            name,
            is_dir,
            size: if is_dir { None } else { size },
            modified,
        });
    }
    sort_entries(&mut entries);
    entries
}

fn parse_dir_date(date: &str, time: &str) -> Option<DateTime<Utc>> {
    let combined = format!("{} {}", date, time);
    for format in ["%Y-%m-%d %H:%M", "%Y/%m/%d %H:%M", "%m/%d/%Y %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&combined, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    None
}

/// Parse `dir /-c` output into entries.
///
/// Header and summary lines are skipped by shape: only rows starting with
/// a date column are data.
pub fn parse_windows_listing(output: &str, dir_path: &str) -> Vec<DirEntry> {
    let base = fpath::normalize_windows_path(dir_path);
    let mut entries = Vec::new();
    for line in output.lines() {
        let Some(caps) = DIR_LINE_RE.captures(line.trim()) else {
            continue;
        };
        let name = caps[4].trim().to_string();
        if name == "." || name == ".." {
            continue;
        }
        let marker = &caps[3];
        let is_dir = marker == "<DIR>" || marker == "<JUNCTION>";
        let size = if is_dir {
            None
        } else {
            marker.replace(',', "").parse().ok()
        };
        entries.push(DirEntry {
            path: format!("{}/{}", base.trim_end_matches('/'), name),
            name,
            is_dir,
            size,
            modified: parse_dir_date(&caps[1], &caps[2]),
        });
    }
    sort_entries(&mut entries);
    entries
}

/// Enumerate a local directory
pub fn list_local(dir_path: &str, show_hidden: bool) -> Result<Vec<DirEntry>> {
    let mut entries = Vec::new();
    let read = std::fs::read_dir(dir_path)
        .map_err(|e| Error::validation(format!("cannot list {}: {}", dir_path, e)))?;
    for dirent in read {
        let Ok(dirent) = dirent else { continue };
        let name = dirent.file_name().to_string_lossy().into_owned();
        if !show_hidden && name.starts_with('.') {
            continue;
        }
        // Entries that disappear mid-listing are skipped, not fatal
        let Ok(metadata) = dirent.metadata() else {
            continue;
        };
        let is_dir = metadata.is_dir();
        entries.push(DirEntry {
            path: format!("{}/{}", dir_path.trim_end_matches('/'), name),
            name,
            is_dir,
            size: if is_dir { None } else { Some(metadata.len()) },
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        });
    }
    sort_entries(&mut entries);
    Ok(entries)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    host: String,
    path: String,
    hidden: bool,
}

impl CacheKey {
    fn new(host: &str, path: &str, hidden: bool) -> Self {
        Self {
            host: host.to_string(),
            path: fpath::normalize_windows_path(path),
            hidden,
        }
    }
}

#[derive(Debug)]
struct CacheSlot {
    entries: Vec<DirEntry>,
    stored: Instant,
    ttl: Duration,
}

impl CacheSlot {
    fn is_valid(&self) -> bool {
        self.stored.elapsed() < self.ttl
    }
}

/// TTL cache of directory listings
#[derive(Debug)]
pub struct ListingCache {
    slots: StdMutex<HashMap<CacheKey, CacheSlot>>,
    ttl: Duration,
    instant_ttl: Duration,
    instant_paths: Vec<String>,
}

impl ListingCache {
    /// Create a cache with the configured TTLs
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            slots: StdMutex::new(HashMap::new()),
            ttl: Duration::from_secs(config.ttl_secs),
            instant_ttl: Duration::from_secs(config.instant_ttl_secs),
            instant_paths: config.instant_paths.clone(),
        }
    }

    fn ttl_for(&self, path: &str) -> Duration {
        if self.instant_paths.iter().any(|p| p == path) {
            self.instant_ttl
        } else {
            self.ttl
        }
    }

    /// Snapshot for a key, if present and younger than its TTL
    pub fn get(&self, host: &str, path: &str, hidden: bool) -> Option<Vec<DirEntry>> {
        let key = CacheKey::new(host, path, hidden);
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        match slots.get(&key) {
            Some(slot) if slot.is_valid() => Some(slot.entries.clone()),
            Some(_) => {
                slots.remove(&key);
                None
            }
            None => None,
        }
    }

    /// Store a fresh snapshot, opportunistically dropping expired slots
    pub fn put(&self, host: &str, path: &str, hidden: bool, entries: Vec<DirEntry>) {
        let key = CacheKey::new(host, path, hidden);
        let ttl = self.ttl_for(&key.path);
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.retain(|_, slot| slot.is_valid());
        slots.insert(
            key,
            CacheSlot {
                entries,
                stored: Instant::now(),
                ttl,
            },
        );
    }

    /// Remove every entry whose path exactly equals `path` on `host`,
    /// across both hidden-flag variants. Idempotent.
    pub fn invalidate(&self, host: &str, path: &str) -> usize {
        let normalized = fpath::normalize_windows_path(path);
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let before = slots.len();
        slots.retain(|key, _| !(key.host == host && key.path == normalized));
        let removed = before - slots.len();
        if removed > 0 {
            debug!("Invalidated {} listing entries for {}:{}", removed, host, path);
        }
        removed
    }

    /// Remove every entry on `host` whose path starts with `prefix`
    pub fn invalidate_prefix(&self, host: &str, prefix: &str) -> usize {
        let normalized = fpath::normalize_windows_path(prefix);
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let before = slots.len();
        slots.retain(|key, _| !(key.host == host && key.path.starts_with(&normalized)));
        before - slots.len()
    }

    /// Drop everything
    pub fn clear(&self) -> usize {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let count = slots.len();
        slots.clear();
        count
    }

    /// Number of cached listings, valid or not yet evicted
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the cache holds no listings
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, is_dir: bool) -> DirEntry {
        DirEntry {
            name: name.to_string(),
            path: format!("/srv/{}", name),
            is_dir,
            size: if is_dir { None } else { Some(1) },
            modified: None,
        }
    }

    fn cache() -> ListingCache {
        ListingCache::new(&CacheConfig {
            ttl_secs: 120,
            instant_ttl_secs: 300,
            instant_paths: vec!["/srv/fast".to_string()],
        })
    }

    #[test]
    fn test_natural_sort_dirs_first() {
        let mut entries = vec![
            entry("file10.txt", false),
            entry("zeta", true),
            entry("file2.txt", false),
            entry("Alpha", true),
            entry("file1.txt", false),
        ];
        sort_entries(&mut entries);
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["Alpha", "zeta", "file1.txt", "file2.txt", "file10.txt"]);
    }

    #[test]
    fn test_parse_posix_listing() {
        let output = "\
total 16
drwxr-xr-x 2 ops ops 4096 2026-08-20 10:15 logs
-rw-r--r-- 1 ops ops 2048 2026-08-21 09:00 report v2.txt
-rw-r--r-- 1 ops ops  512 2026-08-21 09:05 .hidden
";
        let entries = parse_posix_listing(output, "/srv/data", false);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "logs");
        assert!(entries[0].is_dir);
        assert_eq!(entries[1].name, "report v2.txt");
        assert_eq!(entries[1].size, Some(2048));
        assert_eq!(entries[1].path, "/srv/data/report v2.txt");
        assert!(entries[1].modified.is_some());

        let with_hidden = parse_posix_listing(output, "/srv/data", true);
        assert_eq!(with_hidden.len(), 3);
    }

    #[test]
    fn test_parse_posix_keeps_space_runs_in_names() {
        let output = "-rw-r--r-- 1 ops ops 100 2026-08-21 09:00 my  report  final.txt\n";
        let entries = parse_posix_listing(output, "/srv/data", false);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "my  report  final.txt");
        assert_eq!(entries[0].path, "/srv/data/my  report  final.txt");
    }

    #[test]
    fn test_parse_windows_listing() {
        let output = "\
 Volume in drive C has no label.
 Directory of C:\\Users\\ops

2026-08-20  10:15    <DIR>          logs
2026-08-20  10:16        1,048,576 data.bin
               1 File(s)      1048576 bytes
               2 Dir(s)  99999999 bytes free
";
        let entries = parse_windows_listing(output, "/C:/Users/ops");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "logs");
        assert!(entries[0].is_dir);
        assert_eq!(entries[1].name, "data.bin");
        assert_eq!(entries[1].size, Some(1_048_576));
        assert_eq!(entries[1].path, "C:/Users/ops/data.bin");
    }

    #[test]
    fn test_cache_roundtrip_and_exact_invalidation() {
        let cache = cache();
        cache.put("10.20.0.5", "/srv/data", false, vec![entry("a", false)]);
        cache.put("10.20.0.5", "/srv/data", true, vec![entry("a", false)]);
        cache.put("10.20.0.5", "/srv/other", false, vec![entry("b", false)]);

        assert!(cache.get("10.20.0.5", "/srv/data", false).is_some());
        // Exact invalidation removes both hidden-flag variants, only them
        assert_eq!(cache.invalidate("10.20.0.5", "/srv/data"), 2);
        assert!(cache.get("10.20.0.5", "/srv/data", false).is_none());
        assert!(cache.get("10.20.0.5", "/srv/other", false).is_some());
        // Idempotent
        assert_eq!(cache.invalidate("10.20.0.5", "/srv/data"), 0);
    }

    #[test]
    fn test_prefix_invalidation_is_host_scoped() {
        let cache = cache();
        cache.put("10.20.0.5", "/srv/data", false, Vec::new());
        cache.put("10.20.0.5", "/srv/data/sub", false, Vec::new());
        cache.put("10.20.0.9", "/srv/data", false, Vec::new());

        assert_eq!(cache.invalidate_prefix("10.20.0.5", "/srv/data"), 2);
        assert!(cache.get("10.20.0.9", "/srv/data", false).is_some());
    }

    #[test]
    fn test_key_normalizes_windows_spellings() {
        let cache = cache();
        cache.put("10.20.0.7", "/C:/Users/ops", false, vec![entry("a", false)]);
        assert!(cache.get("10.20.0.7", "C:/Users/ops", false).is_some());
        assert_eq!(cache.invalidate("10.20.0.7", "C:\\Users\\ops"), 1);
    }

    #[test]
    fn test_list_local_skips_hidden() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("visible.txt"), b"x").unwrap();
        std::fs::write(dir.path().join(".dotfile"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let path = dir.path().to_string_lossy().into_owned();
        let entries = list_local(&path, false).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["sub", "visible.txt"]);

        let all = list_local(&path, true).unwrap();
        assert_eq!(all.len(), 3);
    }
}
