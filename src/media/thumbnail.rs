use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::config::Settings;
use crate::error::{MediaError, Result};
use crate::media::extractor::{FrameExtractor, MediaExtractor};
use crate::media::library::{KindFilter, LibraryService, classify};
use crate::media::progress::{BatchHooks, BatchPhase};
use crate::media::store::JsonDocument;

pub const THUMBNAIL_MIME: &str = "image/jpeg";
pub const PLACEHOLDER_MIME: &str = "image/png";

/// 1x1 transparent PNG served whenever no real thumbnail can be produced.
pub const PLACEHOLDER_PNG: &[u8] = b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDR\x00\x00\x00\x01\x00\x00\x00\x01\x08\x06\x00\x00\x00\x1f\x15\xc4\x89\x00\x00\x00\x0cIDAT\x08\x99c\xf8\xff\xff?\x00\x05\xfe\x02\xfeA\x93\x8a\x1d\x00\x00\x00\x00IEND\xaeB`\x82";

const THUMBNAIL_EXTENSION: &str = "jpg";
const PENDING_PREFIX: &str = ".pending-";

/// Persisted per relative path in `thumbs.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThumbnailRecord {
    /// Offset pinned by an explicit set-thumbnail request, if any.
    pub ts: Option<f64>,
    pub updated_at: String,
}

pub type ThumbnailMap = BTreeMap<String, ThumbnailRecord>;

/// `sha1(relative_path).jpg`
pub fn cache_key(relative_path: &str) -> String {
    format!("{:x}.{}", Sha1::digest(relative_path.as_bytes()), THUMBNAIL_EXTENSION)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheState {
    Cached,
    Generated,
    SourceNotFound,
    GenerationFailed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ThumbnailData {
    File(PathBuf),
    Placeholder(&'static [u8]),
}

#[derive(Debug, Clone)]
pub struct Thumbnail {
    pub data: ThumbnailData,
    pub mime: &'static str,
    pub state: CacheState,
}

impl Thumbnail {
    fn file(path: PathBuf, state: CacheState) -> Self {
        Self {
            data: ThumbnailData::File(path),
            mime: THUMBNAIL_MIME,
            state,
        }
    }

    fn placeholder(state: CacheState) -> Self {
        Self {
            data: ThumbnailData::Placeholder(PLACEHOLDER_PNG),
            mime: PLACEHOLDER_MIME,
            state,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self.data, ThumbnailData::Placeholder(_))
    }

    pub fn read_bytes(&self) -> io::Result<Vec<u8>> {
        match &self.data {
            ThumbnailData::File(path) => fs::read(path),
            ThumbnailData::Placeholder(bytes) => Ok(bytes.to_vec()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GenerateReport {
    pub total: usize,
    pub generated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanReport {
    pub kept: usize,
    pub removed: usize,
    pub total: usize,
    /// Image files in the cache directory that no record or media file claims.
    pub orphans_removed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub videos: usize,
    pub mapped: usize,
    pub invalid: usize,
    pub missing: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClearReport {
    pub deleted_count: usize,
    pub freed_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub count: usize,
    pub bytes: u64,
}

enum GenerateOutcome {
    Generated(Option<f64>),
    Skipped,
    Failed,
    Cancelled,
}

/// Lazily populated thumbnail cache for one media root.
///
/// Images live in `<data_dir>/thumbnails/<cache_key>`, records in
/// `<data_dir>/thumbs.json`. Captures run on a bounded worker pool. The data
/// directory is assumed to serve a single media root.
pub struct ThumbnailService {
    library: LibraryService,
    thumb_dir: PathBuf,
    records: JsonDocument<ThumbnailMap>,
    extractor: Arc<dyn FrameExtractor>,
    fallback_offsets: Vec<f64>,
    pool: rayon::ThreadPool,
    pending_counter: AtomicU64,
}

impl ThumbnailService {
    pub fn new(
        library: LibraryService,
        settings: &Settings,
        extractor: Arc<dyn FrameExtractor>,
    ) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(settings.thumbnails.workers.max(1))
            .thread_name(|i| format!("tikrs-thumb-{i}"))
            .build()?;

        Ok(Self {
            library,
            thumb_dir: settings.thumbnails_dir(),
            records: JsonDocument::new(settings.thumbs_map_path()),
            extractor,
            fallback_offsets: settings.thumbnails.fallback_offsets.clone(),
            pool,
            pending_counter: AtomicU64::new(0),
        })
    }

    /// ffmpeg for videos, in-process resizing for stills.
    pub fn with_default_extractor(library: LibraryService, settings: &Settings) -> Result<Self> {
        let extractor = Arc::new(MediaExtractor::new(&settings.thumbnails));
        Self::new(library, settings, extractor)
    }

    pub fn thumbnails_dir(&self) -> &Path {
        &self.thumb_dir
    }

    pub fn thumbnail_path(&self, relative_path: &str) -> PathBuf {
        self.thumb_dir.join(cache_key(relative_path))
    }

    pub fn records(&self) -> ThumbnailMap {
        self.records.load()
    }

    pub fn record(&self, relative_path: &str) -> Option<ThumbnailRecord> {
        self.records.load().remove(relative_path)
    }

    /// Serve the cached thumbnail, generating it on a miss.
    ///
    /// Only a path escaping the media root is an error; a missing source, a
    /// file that is not media, or a failed capture yields the placeholder.
    pub fn get_or_create(&self, relative_path: &str) -> Result<Thumbnail> {
        let source = self.library.resolve(relative_path)?;
        let thumb_path = self.thumbnail_path(relative_path);

        if !is_media_file(&source) {
            // No media here (any more): drop whatever the cache still holds for it
            if let Err(e) = self.forget(relative_path) {
                log::warn!("Could not drop stale thumbnail for {}: {}", relative_path, e);
            }
            return Ok(Thumbnail::placeholder(CacheState::SourceNotFound));
        }

        if is_valid_thumbnail(&thumb_path) {
            return Ok(Thumbnail::file(thumb_path, CacheState::Cached));
        }

        let pinned = self.record(relative_path).and_then(|r| r.ts);
        match self.capture_into(relative_path, &source, &thumb_path, pinned) {
            Ok(_) => {
                let record = ThumbnailRecord {
                    ts: pinned,
                    updated_at: now_iso(),
                };
                if let Err(e) = self
                    .records
                    .update(|map| map.insert(relative_path.to_string(), record))
                {
                    log::warn!("Could not record thumbnail for {}: {}", relative_path, e);
                }
                Ok(Thumbnail::file(thumb_path, CacheState::Generated))
            }
            Err(e) => {
                log::warn!("{}", e);
                Ok(Thumbnail::placeholder(CacheState::GenerationFailed))
            }
        }
    }

    /// Re-render the thumbnail at exactly `timestamp` seconds and pin it.
    ///
    /// The previous image stays in place when the capture fails.
    pub fn set_thumbnail(&self, relative_path: &str, timestamp: f64) -> Result<ThumbnailRecord> {
        let source = self.library.resolve(relative_path)?;
        if !is_media_file(&source) {
            return Err(MediaError::source_not_found(relative_path));
        }

        let ts = if timestamp.is_finite() {
            timestamp.max(0.0)
        } else {
            0.0
        };
        let thumb_path = self.thumbnail_path(relative_path);
        self.capture_into(relative_path, &source, &thumb_path, Some(ts))?;

        let record = ThumbnailRecord {
            ts: Some(ts),
            updated_at: now_iso(),
        };
        self.records
            .update(|map| map.insert(relative_path.to_string(), record.clone()))?;
        log::info!("Pinned thumbnail for {} at {:.3}s", relative_path, ts);
        Ok(record)
    }

    /// Remove the image and record for `relative_path`. Returns whether
    /// anything was removed.
    pub fn forget(&self, relative_path: &str) -> Result<bool> {
        let removed_file = remove_if_exists(&self.thumbnail_path(relative_path))?;

        let removed_record = if self.records.load().contains_key(relative_path) {
            self.records
                .update(|map| map.remove(relative_path).is_some())?
        } else {
            false
        };

        Ok(removed_file || removed_record)
    }

    /// Bulk-generate thumbnails for every video under the root.
    ///
    /// `limit` caps how many videos are visited (0 means all); skipped videos
    /// count against it.
    pub fn generate_all(
        &self,
        overwrite: bool,
        limit: usize,
        hooks: &BatchHooks,
    ) -> Result<GenerateReport> {
        self.library.ensure_root()?;

        let videos = self.library.scan_videos();
        let total = videos.len();
        let visit = if limit > 0 { limit.min(total) } else { total };
        let selected = &videos[..visit];
        let records = self.records();
        let completed = AtomicUsize::new(0);

        let outcomes: Vec<(String, GenerateOutcome)> = self.pool.install(|| {
            selected
                .par_iter()
                .map(|entry| {
                    let rel = &entry.relative_path;
                    if hooks.is_cancelled() {
                        return (rel.clone(), GenerateOutcome::Cancelled);
                    }

                    let thumb_path = self.thumbnail_path(rel);
                    let outcome = if !overwrite && is_valid_thumbnail(&thumb_path) {
                        GenerateOutcome::Skipped
                    } else {
                        let pinned = records.get(rel).and_then(|r| r.ts);
                        match self.capture_into(rel, &entry.absolute_path, &thumb_path, pinned) {
                            Ok(_) => GenerateOutcome::Generated(pinned),
                            Err(e) => {
                                log::warn!("{}", e);
                                GenerateOutcome::Failed
                            }
                        }
                    };

                    let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                    hooks.report(BatchPhase::Generating, rel, done, visit);
                    (rel.clone(), outcome)
                })
                .collect()
        });

        let mut report = GenerateReport {
            total,
            ..GenerateReport::default()
        };
        let mut generated = Vec::new();
        for (rel, outcome) in outcomes {
            match outcome {
                GenerateOutcome::Generated(pinned) => {
                    report.generated += 1;
                    generated.push((rel, pinned));
                }
                GenerateOutcome::Skipped => report.skipped += 1,
                GenerateOutcome::Failed => report.failed += 1,
                GenerateOutcome::Cancelled => report.cancelled = true,
            }
        }

        if !generated.is_empty() {
            let updated_at = now_iso();
            self.records.update(|map| {
                for (rel, ts) in generated {
                    map.insert(
                        rel,
                        ThumbnailRecord {
                            ts,
                            updated_at: updated_at.clone(),
                        },
                    );
                }
            })?;
        }

        hooks.report(BatchPhase::Complete, "", visit, visit);
        log::info!(
            "Thumbnails: generated {}, skipped {}, failed {}, total {}",
            report.generated,
            report.skipped,
            report.failed,
            report.total
        );
        Ok(report)
    }

    /// Drop records whose source is gone or no longer media, and image files
    /// nothing refers to.
    pub fn clean(&self, hooks: &BatchHooks) -> Result<CleanReport> {
        let records = self.records();
        let total = records.len();
        let mut kept = 0;
        let mut stale = Vec::new();

        for (i, rel) in records.keys().enumerate() {
            if hooks.is_cancelled() {
                break;
            }

            if self.has_media_source(rel) {
                kept += 1;
            } else {
                if let Err(e) = remove_if_exists(&self.thumbnail_path(rel)) {
                    log::warn!("Could not remove thumbnail for {}: {}", rel, e);
                }
                stale.push(rel.clone());
            }
            hooks.report(BatchPhase::Cleaning, rel, i + 1, total);
        }

        if !stale.is_empty() {
            self.records.update(|map| {
                for rel in &stale {
                    map.remove(rel);
                }
            })?;
        }

        let orphans_removed = if hooks.is_cancelled() {
            0
        } else {
            self.remove_orphan_files()?
        };

        let report = CleanReport {
            kept,
            removed: stale.len(),
            total,
            orphans_removed,
        };
        log::info!(
            "Thumbnail clean: kept {}, removed {}, orphans {}",
            report.kept,
            report.removed,
            report.orphans_removed
        );
        Ok(report)
    }

    /// Coverage check. Read-only.
    ///
    /// A record is `mapped` when `clean` would keep it and its image exists;
    /// `videos` and `missing` describe the videos `generate_all` covers.
    pub fn verify(&self) -> VerifyReport {
        let videos: HashSet<String> = self
            .library
            .scan_videos()
            .into_iter()
            .map(|e| e.relative_path)
            .collect();

        let mut report = VerifyReport {
            videos: videos.len(),
            ..VerifyReport::default()
        };
        for rel in self.records().keys() {
            if self.has_media_source(rel) && self.thumbnail_path(rel).exists() {
                report.mapped += 1;
            } else {
                report.invalid += 1;
            }
        }
        report.missing = videos
            .iter()
            .filter(|rel| !self.thumbnail_path(rel).exists())
            .count();

        report
    }

    /// Delete every cached image along with the records describing them.
    pub fn clear_cache(&self) -> Result<ClearReport> {
        let mut report = ClearReport::default();
        for (path, size) in self.cached_files()? {
            match fs::remove_file(&path) {
                Ok(()) => {
                    report.deleted_count += 1;
                    report.freed_bytes += size;
                }
                Err(e) => log::warn!("Could not delete {}: {}", path.display(), e),
            }
        }
        self.records.save(&ThumbnailMap::new())?;
        Ok(report)
    }

    pub fn cache_stats(&self) -> Result<CacheStats> {
        let files = self.cached_files()?;
        Ok(CacheStats {
            count: files.len(),
            bytes: files.iter().map(|(_, size)| size).sum(),
        })
    }

    fn has_media_source(&self, relative_path: &str) -> bool {
        self.library
            .resolve(relative_path)
            .is_ok_and(|path| is_media_file(&path))
    }

    /// Try each candidate offset until one leaves a non-empty image at
    /// `output`. Returns the offset that worked.
    fn capture_into(
        &self,
        relative_path: &str,
        source: &Path,
        output: &Path,
        explicit: Option<f64>,
    ) -> Result<f64> {
        let failed = |reason: String| MediaError::GenerationFailed {
            path: relative_path.to_string(),
            reason,
        };

        fs::create_dir_all(&self.thumb_dir)?;
        let pending = self.pending_path(output);

        let result = self.pool.install(|| {
            let mut last_reason = "no capture offsets configured".to_string();
            for offset in self.candidate_offsets(source, explicit) {
                match self.extractor.capture(source, offset, &pending) {
                    Ok(()) if is_valid_thumbnail(&pending) => return Ok(offset),
                    Ok(()) => last_reason = format!("no frame produced at {offset:.3}s"),
                    Err(e) if e.is_fatal() => return Err(failed(e.to_string())),
                    Err(e) => last_reason = format!("{e} at {offset:.3}s"),
                }
            }
            Err(failed(last_reason))
        });

        match result {
            Ok(offset) => {
                fs::rename(&pending, output)?;
                log::debug!("Captured {} at {:.3}s", relative_path, offset);
                Ok(offset)
            }
            Err(e) => {
                let _ = remove_if_exists(&pending);
                Err(e)
            }
        }
    }

    fn candidate_offsets(&self, source: &Path, explicit: Option<f64>) -> Vec<f64> {
        if let Some(ts) = explicit {
            return vec![ts.max(0.0)];
        }

        let mut offsets = Vec::with_capacity(self.fallback_offsets.len() + 1);
        if let Some(duration) = self.extractor.probe_duration(source) {
            if duration > 1.0 {
                offsets.push((duration * 0.2).min(duration - 1.0).max(1.0));
            }
        }
        offsets.extend(self.fallback_offsets.iter().copied());
        offsets
    }

    /// Captures render next to the final image and are renamed into place.
    fn pending_path(&self, output: &Path) -> PathBuf {
        let n = self.pending_counter.fetch_add(1, Ordering::Relaxed);
        let name = output
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.thumb_dir.join(format!("{PENDING_PREFIX}{n}-{name}"))
    }

    fn cached_files(&self) -> Result<Vec<(PathBuf, u64)>> {
        let entries = match fs::read_dir(&self.thumb_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            // In-flight captures belong to whoever is rendering them
            let pending = entry.file_name().to_string_lossy().starts_with(PENDING_PREFIX);
            let is_thumbnail = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case(THUMBNAIL_EXTENSION));
            if pending || !is_thumbnail {
                continue;
            }
            if let Ok(metadata) = entry.metadata() {
                if metadata.is_file() {
                    files.push((path, metadata.len()));
                }
            }
        }
        Ok(files)
    }

    fn remove_orphan_files(&self) -> Result<usize> {
        let mut known: HashSet<String> = self.records().keys().map(|rel| cache_key(rel)).collect();
        known.extend(
            self.library
                .scan(KindFilter::All, true)
                .iter()
                .map(|e| cache_key(&e.relative_path)),
        );

        let mut removed = 0;
        for (path, _) in self.cached_files()? {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            if known.contains(&name) {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => log::warn!("Could not remove orphan {}: {}", path.display(), e),
            }
        }
        Ok(removed)
    }
}

impl std::fmt::Debug for ThumbnailService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThumbnailService")
            .field("root", &self.library.root())
            .field("thumb_dir", &self.thumb_dir)
            .field("workers", &self.pool.current_num_threads())
            .finish()
    }
}

fn is_valid_thumbnail(path: &Path) -> bool {
    fs::metadata(path).is_ok_and(|m| m.is_file() && m.len() > 0)
}

fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn is_media_file(path: &Path) -> bool {
    path.is_file() && classify(path).is_some()
}

fn now_iso() -> String {
    chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}
