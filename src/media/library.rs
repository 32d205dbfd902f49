use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

use crate::error::{MediaError, Result};

pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mov", "mkv", "avi", "m4v"];
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp"];

const SECONDS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Image,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum KindFilter {
    Video,
    Image,
    All,
}

impl KindFilter {
    pub fn accepts(self, kind: MediaKind) -> bool {
        match self {
            KindFilter::Video => kind == MediaKind::Video,
            KindFilter::Image => kind == MediaKind::Image,
            KindFilter::All => true,
        }
    }
}

impl From<MediaKind> for KindFilter {
    fn from(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Video => KindFilter::Video,
            MediaKind::Image => KindFilter::Image,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RecencyKey {
    Modified,
    Created,
}

/// One media file as seen by a single scan.
#[derive(Debug, Clone, Serialize)]
pub struct MediaEntry {
    pub absolute_path: PathBuf,
    /// Root-relative, `/`-separated. Identity key for favorites and thumbnails.
    pub relative_path: String,
    pub size_bytes: u64,
    pub modified_time: SystemTime,
    /// Falls back to `modified_time` where the platform has no birth time.
    pub created_time: SystemTime,
    pub kind: MediaKind,
}

impl MediaEntry {
    /// Days since the last modification, never negative.
    pub fn age_days(&self, now: SystemTime) -> f64 {
        now.duration_since(self.modified_time)
            .map(|d| d.as_secs_f64() / SECONDS_PER_DAY)
            .unwrap_or(0.0)
    }
}

/// Classify a path by extension first, then by guessed MIME type.
pub fn classify(path: &Path) -> Option<MediaKind> {
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        let ext = ext.to_ascii_lowercase();
        if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            return Some(MediaKind::Video);
        }
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            return Some(MediaKind::Image);
        }
    }

    let mime = mime_guess::from_path(path).first_raw()?;
    if mime.starts_with("video/") {
        Some(MediaKind::Video)
    } else if mime.starts_with("image/") {
        Some(MediaKind::Image)
    } else {
        None
    }
}

/// Newest first.
pub fn sort_by_recency(entries: &mut [MediaEntry], key: RecencyKey) {
    match key {
        RecencyKey::Modified => entries.sort_by(|a, b| b.modified_time.cmp(&a.modified_time)),
        RecencyKey::Created => entries.sort_by(|a, b| b.created_time.cmp(&a.created_time)),
    }
}

/// Stateless view of a media root. Every call re-reads the filesystem.
#[derive(Debug, Clone)]
pub struct LibraryService {
    root: PathBuf,
}

impl LibraryService {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Fails with `RootUnavailable` unless the root is an existing directory.
    pub fn ensure_root(&self) -> Result<()> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(MediaError::RootUnavailable {
                path: self.root.to_string_lossy().to_string(),
            })
        }
    }

    /// Walk the root for media of the requested kind, in file-name order.
    /// Unreadable entries are skipped; an unreadable root yields an empty list.
    pub fn scan(&self, filter: KindFilter, recursive: bool) -> Vec<MediaEntry> {
        let base = self.canonical_root();
        let mut walker = WalkDir::new(&base).follow_links(false).sort_by_file_name();
        if !recursive {
            walker = walker.max_depth(1);
        }

        let mut entries = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::debug!("Skipping unreadable entry under {}: {}", base.display(), e);
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let Some(kind) = classify(path) else {
                continue;
            };
            if !filter.accepts(kind) {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    log::debug!("Cannot stat {}: {}", path.display(), e);
                    continue;
                }
            };
            let Some(relative_path) = relative_to(&base, path) else {
                continue;
            };

            let modified_time = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            entries.push(MediaEntry {
                absolute_path: path.to_path_buf(),
                relative_path,
                size_bytes: metadata.len(),
                modified_time,
                created_time: metadata.created().unwrap_or(modified_time),
                kind,
            });
        }

        entries
    }

    pub fn scan_videos(&self) -> Vec<MediaEntry> {
        self.scan(KindFilter::Video, true)
    }

    pub fn scan_images(&self) -> Vec<MediaEntry> {
        self.scan(KindFilter::Image, true)
    }

    /// Root-relative form of an absolute path under this root.
    pub fn relative_path(&self, path: &Path) -> Option<String> {
        relative_to(&self.canonical_root(), path).or_else(|| relative_to(&self.root, path))
    }

    /// Map a user-supplied relative path to an absolute one inside the root.
    ///
    /// Absolute inputs, `..` segments that climb above the root and symlinks
    /// resolving outside of it are all rejected with `InvalidPath`. The
    /// target does not need to exist.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let invalid = || MediaError::invalid_path(relative);

        if relative.trim().is_empty() || relative.contains('\0') {
            return Err(invalid());
        }

        let mut normalized = PathBuf::new();
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => normalized.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(invalid());
                    }
                }
                Component::RootDir | Component::Prefix(_) => return Err(invalid()),
            }
        }
        if normalized.as_os_str().is_empty() {
            return Err(invalid());
        }

        let root = self.canonical_root();
        let target = root.join(&normalized);

        // Symlinks are followed through the deepest component that exists
        let mut existing = target.as_path();
        let real = loop {
            match fs::canonicalize(existing) {
                Ok(real) => break real,
                Err(_) if existing == root.as_path() => return Ok(target),
                Err(_) => {
                    // A dangling link may still point anywhere
                    if existing.symlink_metadata().is_ok() {
                        return Err(invalid());
                    }
                    existing = existing.parent().ok_or_else(invalid)?;
                }
            }
        };

        if real.starts_with(&root) {
            Ok(target)
        } else {
            Err(invalid())
        }
    }

    fn canonical_root(&self) -> PathBuf {
        fs::canonicalize(&self.root).unwrap_or_else(|_| self.root.clone())
    }
}

fn relative_to(base: &Path, path: &Path) -> Option<String> {
    let stripped = path.strip_prefix(base).ok()?;
    let parts: Vec<String> = stripped
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
