use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{DedupeSettings, Settings};
use crate::error::MediaError;
use crate::media::duplicate::{
    DedupeRun, DeletionOptions, DeletionReport, DuplicateGroup, DuplicateScan, DuplicateService,
    RetentionPlan, RetentionPolicy,
};
use crate::media::extractor::FrameExtractor;
use crate::media::favorites::FavoriteService;
use crate::media::hash::HashAlgorithm;
use crate::media::library::{KindFilter, LibraryService, MediaEntry};
use crate::media::progress::BatchHooks;
use crate::media::recommend::{RecommendService, seed_from_str};
use crate::media::thumbnail::{Thumbnail, ThumbnailRecord, ThumbnailService};

/// Failure of a single-item command, with the HTTP-style status a front end
/// should answer with.
#[derive(Debug, Clone, Serialize, thiserror::Error)]
#[error("{error} ({status})")]
pub struct CommandError {
    pub status: u16,
    pub error: String,
}

impl From<MediaError> for CommandError {
    fn from(err: MediaError) -> Self {
        let status = match &err {
            MediaError::InvalidPath { .. } => 400,
            MediaError::SourceNotFound { .. } => 404,
            MediaError::RootUnavailable { .. } => 503,
            _ => 500,
        };
        Self {
            status,
            error: err.to_string(),
        }
    }
}

pub type CommandResult<T> = std::result::Result<T, CommandError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RandomPage {
    pub items: Vec<String>,
    pub page: usize,
    pub total: usize,
    pub has_more: bool,
    /// Pass back to get the next page of the same ordering.
    pub seed: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FavoriteState {
    pub path: String,
    pub favorite: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletedMedia {
    pub path: String,
    pub bytes_freed: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LibraryStats {
    pub videos: usize,
    pub images: usize,
    pub favorites: usize,
    pub cache_count: usize,
    pub cache_bytes: u64,
}

/// Command-style entry points over one media root.
///
/// Every method returns plain data; per-item errors come back as
/// [`CommandError`]. Deletions made through here also drop the thumbnail and
/// favorite entries of the removed files.
#[derive(Debug)]
pub struct Library {
    settings: Settings,
    library: LibraryService,
    favorites: FavoriteService,
    recommend: RecommendService,
    thumbnails: ThumbnailService,
}

impl Library {
    /// Open `root` with the ffmpeg/image-backed thumbnailer.
    pub fn open(root: impl Into<PathBuf>, settings: Settings) -> crate::Result<Self> {
        let library = LibraryService::new(root);
        let thumbnails = ThumbnailService::with_default_extractor(library.clone(), &settings)?;
        Ok(Self::assemble(library, settings, thumbnails))
    }

    pub fn with_extractor(
        root: impl Into<PathBuf>,
        settings: Settings,
        extractor: Arc<dyn FrameExtractor>,
    ) -> crate::Result<Self> {
        let library = LibraryService::new(root);
        let thumbnails = ThumbnailService::new(library.clone(), &settings, extractor)?;
        Ok(Self::assemble(library, settings, thumbnails))
    }

    fn assemble(library: LibraryService, settings: Settings, thumbnails: ThumbnailService) -> Self {
        Self {
            favorites: FavoriteService::new(library.root()),
            recommend: RecommendService::new(settings.selection.clone()),
            settings,
            library,
            thumbnails,
        }
    }

    pub fn root(&self) -> &Path {
        self.library.root()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn library(&self) -> &LibraryService {
        &self.library
    }

    pub fn favorites(&self) -> &FavoriteService {
        &self.favorites
    }

    pub fn thumbnails(&self) -> &ThumbnailService {
        &self.thumbnails
    }

    pub fn scan(&self, kind: KindFilter) -> CommandResult<Vec<MediaEntry>> {
        self.library.ensure_root()?;
        Ok(self.library.scan(kind, true))
    }

    /// Weighted pick of up to `limit` relative paths of `kind`.
    pub fn select(&self, kind: KindFilter, limit: usize, seed: Option<u64>) -> CommandResult<Vec<String>> {
        let candidates = self.scan(kind)?;
        let favorites = self.favorites.load();
        Ok(self.recommend.select(&candidates, &favorites, limit, seed))
    }

    /// One page (1-based) of a seeded ordering of the whole library.
    ///
    /// Without a seed a fresh one is drawn and echoed back in the result.
    pub fn random_page(
        &self,
        kind: KindFilter,
        page: usize,
        size: usize,
        seed: Option<&str>,
    ) -> CommandResult<RandomPage> {
        let seed = match seed.map(str::trim).filter(|s| !s.is_empty()) {
            Some(seed) => seed.to_string(),
            None => rand::random::<u32>().to_string(),
        };
        let page = page.max(1);

        let candidates = self.scan(kind)?;
        let favorites = self.favorites.load();
        let ordering = self.recommend.select(
            &candidates,
            &favorites,
            candidates.len(),
            Some(seed_from_str(&seed)),
        );

        let total = ordering.len();
        let start = (page - 1).saturating_mul(size).min(total);
        let end = start.saturating_add(size).min(total);
        Ok(RandomPage {
            items: ordering[start..end].to_vec(),
            page,
            total,
            has_more: end < total,
            seed,
        })
    }

    pub fn toggle_favorite(&self, path: &str) -> CommandResult<FavoriteState> {
        self.library.resolve(path)?;
        let favorite = self.favorites.toggle(path)?;
        Ok(FavoriteState {
            path: path.to_string(),
            favorite,
        })
    }

    pub fn is_favorite(&self, path: &str) -> bool {
        self.favorites.is_favorite(path)
    }

    pub fn get_or_create_thumbnail(&self, path: &str) -> CommandResult<Thumbnail> {
        Ok(self.thumbnails.get_or_create(path)?)
    }

    pub fn set_thumbnail(&self, path: &str, timestamp: f64) -> CommandResult<ThumbnailRecord> {
        Ok(self.thumbnails.set_thumbnail(path, timestamp)?)
    }

    pub fn find_duplicates(
        &self,
        kind: KindFilter,
        algorithm: HashAlgorithm,
        hooks: &BatchHooks,
    ) -> CommandResult<DuplicateScan> {
        Ok(self.dedupe(algorithm).find_duplicates(&self.library, kind, hooks)?)
    }

    pub fn select_retained(&self, groups: &[DuplicateGroup], policy: RetentionPolicy) -> RetentionPlan {
        DuplicateService::select_retained(groups, policy)
    }

    pub fn execute_deletion(
        &self,
        files: &[MediaEntry],
        options: DeletionOptions,
        confirm: impl FnOnce(usize, u64) -> bool,
        hooks: &BatchHooks,
    ) -> DeletionReport {
        let report = self
            .dedupe(self.settings.dedupe.algorithm)
            .execute_deletion(files, options, confirm, hooks);
        self.forget_all(&report.removed);
        report
    }

    pub fn run_dedupe(
        &self,
        kind: KindFilter,
        algorithm: HashAlgorithm,
        policy: RetentionPolicy,
        options: DeletionOptions,
        confirm: impl FnOnce(usize, u64) -> bool,
        hooks: &BatchHooks,
    ) -> CommandResult<DedupeRun> {
        let run = self
            .dedupe(algorithm)
            .run_dedupe(&self.library, kind, policy, options, confirm, hooks)?;
        self.forget_all(&run.report.removed);
        Ok(run)
    }

    /// Remove one media file together with its thumbnail and favorite entry.
    pub fn delete_media(&self, path: &str) -> CommandResult<DeletedMedia> {
        let absolute = self.library.resolve(path)?;
        let metadata = match fs::metadata(&absolute) {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => return Err(MediaError::source_not_found(path).into()),
        };

        fs::remove_file(&absolute).map_err(|source| MediaError::DeletionFailure {
            path: path.to_string(),
            source,
        })?;
        self.forget(path);
        log::info!("Deleted {}", path);

        Ok(DeletedMedia {
            path: path.to_string(),
            bytes_freed: metadata.len(),
        })
    }

    pub fn library_stats(&self) -> CommandResult<LibraryStats> {
        self.library.ensure_root()?;
        let cache = self.thumbnails.cache_stats()?;
        Ok(LibraryStats {
            videos: self.library.scan_videos().len(),
            images: self.library.scan_images().len(),
            favorites: self.favorites.load().len(),
            cache_count: cache.count,
            cache_bytes: cache.bytes,
        })
    }

    fn dedupe(&self, algorithm: HashAlgorithm) -> DuplicateService {
        DuplicateService::from_settings(&DedupeSettings {
            algorithm,
            ..self.settings.dedupe.clone()
        })
    }

    fn forget_all(&self, removed: &[MediaEntry]) {
        for entry in removed {
            self.forget(&entry.relative_path);
        }
    }

    fn forget(&self, path: &str) {
        if let Err(e) = self.thumbnails.forget(path) {
            log::warn!("Could not drop thumbnail of {}: {}", path, e);
        }
        if let Err(e) = self.favorites.remove(path) {
            log::warn!("Could not drop favorite {}: {}", path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::extractor::CaptureError;
    use crate::media::thumbnail::CacheState;
    use std::collections::HashSet;
    use tempfile::TempDir;

    struct StubExtractor;

    impl FrameExtractor for StubExtractor {
        fn capture(
            &self,
            _source: &Path,
            offset_seconds: f64,
            output: &Path,
        ) -> Result<(), CaptureError> {
            fs::write(output, format!("frame@{offset_seconds}"))
                .map_err(|e| CaptureError::Failed(e.to_string()))
        }
    }

    struct Fixture {
        media: TempDir,
        _data: TempDir,
        library: Library,
    }

    fn fixture() -> Fixture {
        let media = TempDir::new().unwrap();
        let data = TempDir::new().unwrap();
        let library = Library::with_extractor(
            media.path(),
            Settings::with_data_dir(data.path()),
            Arc::new(StubExtractor),
        )
        .unwrap();
        Fixture {
            media,
            _data: data,
            library,
        }
    }

    impl Fixture {
        fn add(&self, rel: &str, content: &[u8]) {
            let path = self.media.path().join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, content).unwrap();
        }
    }

    #[test]
    fn test_error_status_codes() {
        let status = |e: MediaError| CommandError::from(e).status;
        assert_eq!(status(MediaError::invalid_path("../x")), 400);
        assert_eq!(status(MediaError::source_not_found("x.mp4")), 404);
        assert_eq!(
            status(MediaError::RootUnavailable {
                path: "/gone".to_string()
            }),
            503
        );
        assert_eq!(
            status(MediaError::GenerationFailed {
                path: "x.mp4".to_string(),
                reason: "boom".to_string()
            }),
            500
        );
        assert_eq!(status(MediaError::Cancelled), 500);
    }

    #[test]
    fn test_scan_missing_root() {
        let data = TempDir::new().unwrap();
        let library = Library::with_extractor(
            data.path().join("nope"),
            Settings::with_data_dir(data.path()),
            Arc::new(StubExtractor),
        )
        .unwrap();

        assert_eq!(library.scan(KindFilter::All).unwrap_err().status, 503);
        assert_eq!(library.library_stats().unwrap_err().status, 503);
    }

    #[test]
    fn test_random_page_covers_library_once() {
        let fx = fixture();
        for i in 0..5 {
            fx.add(&format!("img_{i}.jpg"), b"x");
        }
        fx.add("clip.mp4", b"x");

        let mut seen = Vec::new();
        for page in 1..=3 {
            let result = fx
                .library
                .random_page(KindFilter::Image, page, 2, Some("1234"))
                .unwrap();
            assert_eq!(result.total, 5);
            assert_eq!(result.page, page);
            assert_eq!(result.seed, "1234");
            assert_eq!(result.has_more, page < 3);
            seen.extend(result.items);
        }
        assert_eq!(seen.len(), 5);
        assert_eq!(seen.iter().collect::<HashSet<_>>().len(), 5);

        let again = fx
            .library
            .random_page(KindFilter::Image, 1, 2, Some("1234"))
            .unwrap();
        assert_eq!(again.items, seen[..2].to_vec());

        let beyond = fx
            .library
            .random_page(KindFilter::Image, 9, 2, Some("1234"))
            .unwrap();
        assert!(beyond.items.is_empty());
        assert!(!beyond.has_more);
    }

    #[test]
    fn test_random_page_draws_seed() {
        let fx = fixture();
        fx.add("a.jpg", b"x");

        let result = fx.library.random_page(KindFilter::Image, 1, 10, None).unwrap();
        assert!(!result.seed.is_empty());
        assert_eq!(result.items, vec!["a.jpg"]);
    }

    #[test]
    fn test_select_limits() {
        let fx = fixture();
        for i in 0..4 {
            fx.add(&format!("v{i}.mp4"), b"x");
        }

        assert_eq!(fx.library.select(KindFilter::Video, 2, Some(1)).unwrap().len(), 2);
        assert_eq!(fx.library.select(KindFilter::Video, 10, None).unwrap().len(), 4);
        assert!(fx.library.select(KindFilter::Image, 10, None).unwrap().is_empty());
    }

    #[test]
    fn test_toggle_favorite_rejects_escape() {
        let fx = fixture();
        assert_eq!(fx.library.toggle_favorite("../up.mp4").unwrap_err().status, 400);

        let state = fx.library.toggle_favorite("clip.mp4").unwrap();
        assert!(state.favorite);
        assert!(fx.library.is_favorite("clip.mp4"));
    }

    #[test]
    fn test_thumbnail_commands() {
        let fx = fixture();
        fx.add("clip.mp4", b"x");

        assert_eq!(
            fx.library
                .get_or_create_thumbnail("../../etc/passwd")
                .unwrap_err()
                .status,
            400
        );
        assert_eq!(fx.library.set_thumbnail("ghost.mp4", 1.0).unwrap_err().status, 404);

        let thumb = fx.library.get_or_create_thumbnail("clip.mp4").unwrap();
        assert_eq!(thumb.state, CacheState::Generated);
        let record = fx.library.set_thumbnail("clip.mp4", 3.0).unwrap();
        assert_eq!(record.ts, Some(3.0));
    }

    #[test]
    fn test_delete_media_drops_cache_and_favorite() {
        let fx = fixture();
        fx.add("sub/clip.mp4", b"twelve bytes");
        fx.library.get_or_create_thumbnail("sub/clip.mp4").unwrap();
        fx.library.toggle_favorite("sub/clip.mp4").unwrap();
        let thumb_path = fx.library.thumbnails().thumbnail_path("sub/clip.mp4");
        assert!(thumb_path.exists());

        let deleted = fx.library.delete_media("sub/clip.mp4").unwrap();
        assert_eq!(deleted.bytes_freed, 12);
        assert!(!fx.media.path().join("sub/clip.mp4").exists());
        assert!(!thumb_path.exists());
        assert!(fx.library.thumbnails().record("sub/clip.mp4").is_none());
        assert!(!fx.library.is_favorite("sub/clip.mp4"));

        let thumb = fx.library.get_or_create_thumbnail("sub/clip.mp4").unwrap();
        assert_eq!(thumb.state, CacheState::SourceNotFound);
        assert_eq!(fx.library.delete_media("sub/clip.mp4").unwrap_err().status, 404);
        assert_eq!(fx.library.delete_media("../x.mp4").unwrap_err().status, 400);
    }

    #[test]
    fn test_dedupe_forgets_removed_files() {
        let fx = fixture();
        fx.add("a.mp4", b"same");
        fx.add("b.mp4", b"same");
        fx.library.get_or_create_thumbnail("a.mp4").unwrap();
        fx.library.get_or_create_thumbnail("b.mp4").unwrap();
        fx.library.toggle_favorite("b.mp4").unwrap();

        let run = fx
            .library
            .run_dedupe(
                KindFilter::Video,
                HashAlgorithm::Blake3,
                RetentionPolicy::ShortestPath,
                DeletionOptions {
                    dry_run: false,
                    auto_confirm: true,
                },
                |_, _| false,
                &BatchHooks::new(),
            )
            .unwrap();

        assert_eq!(run.report.deleted_count, 1);
        assert!(fx.media.path().join("a.mp4").exists());
        assert!(!fx.media.path().join("b.mp4").exists());
        assert!(fx.library.thumbnails().record("a.mp4").is_some());
        assert!(fx.library.thumbnails().record("b.mp4").is_none());
        assert!(!fx.library.thumbnails().thumbnail_path("b.mp4").exists());
        assert!(!fx.library.is_favorite("b.mp4"));
    }

    #[test]
    fn test_dry_run_keeps_everything() {
        let fx = fixture();
        fx.add("a.mp4", b"same");
        fx.add("b.mp4", b"same");
        fx.library.toggle_favorite("b.mp4").unwrap();

        let scan = fx
            .library
            .find_duplicates(KindFilter::All, HashAlgorithm::Sha256, &BatchHooks::new())
            .unwrap();
        let plan = fx.library.select_retained(&scan.groups, RetentionPolicy::Oldest);
        let report = fx.library.execute_deletion(
            &plan.delete,
            DeletionOptions::default(),
            |_, _| true,
            &BatchHooks::new(),
        );

        assert!(report.dry_run);
        assert!(report.removed.is_empty());
        assert!(fx.media.path().join("b.mp4").exists());
        assert!(fx.library.is_favorite("b.mp4"));
    }

    #[test]
    fn test_library_stats() {
        let fx = fixture();
        fx.add("a.mp4", b"x");
        fx.add("b.webm", b"x");
        fx.add("c.png", b"x");
        fx.add("readme.txt", b"x");
        fx.library.toggle_favorite("a.mp4").unwrap();
        fx.library.get_or_create_thumbnail("a.mp4").unwrap();

        let stats = fx.library.library_stats().unwrap();
        assert_eq!(
            stats,
            LibraryStats {
                videos: 2,
                images: 1,
                favorites: 1,
                cache_count: 1,
                cache_bytes: "frame@5".len() as u64,
            }
        );
    }
}
