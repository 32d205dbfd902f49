use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::DedupeSettings;
use crate::error::{MediaError, Result};
use crate::media::hash::{HashAlgorithm, HashService};
use crate::media::library::{KindFilter, LibraryService, MediaEntry};
use crate::media::progress::{BatchHooks, BatchPhase};

/// Which member of a duplicate group survives.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Smallest modification time
    #[default]
    Oldest,
    /// Largest modification time
    Newest,
    /// Shortest relative path
    #[value(name = "shortest_path")]
    ShortestPath,
}

/// Files sharing one full-content digest, in scan order.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateGroup {
    pub content_hash: String,
    pub entries: Vec<MediaEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HashFailure {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DuplicateScan {
    pub algorithm: HashAlgorithm,
    /// Only groups with at least two members.
    pub groups: Vec<DuplicateGroup>,
    pub scanned: usize,
    pub failures: Vec<HashFailure>,
    /// Files that could go without losing any content.
    pub duplicate_count: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RetentionPlan {
    pub keep: Vec<MediaEntry>,
    pub delete: Vec<MediaEntry>,
}

impl RetentionPlan {
    pub fn bytes_planned(&self) -> u64 {
        self.delete.iter().map(|e| e.size_bytes).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeletionOptions {
    pub dry_run: bool,
    pub auto_confirm: bool,
}

impl Default for DeletionOptions {
    fn default() -> Self {
        Self {
            dry_run: true,
            auto_confirm: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeletionFailureRecord {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeletionReport {
    pub deleted_count: usize,
    pub failed_count: usize,
    /// Files already gone before their removal was attempted.
    pub skipped_count: usize,
    pub total: usize,
    pub bytes_freed: u64,
    /// Size of everything that was asked to be deleted, measured up front.
    pub bytes_planned: u64,
    pub dry_run: bool,
    /// Confirmation was declined; nothing was touched.
    pub aborted: bool,
    pub cancelled: bool,
    /// Entries that no longer exist after the run, including ones that
    /// vanished on their own.
    pub removed: Vec<MediaEntry>,
    pub failures: Vec<DeletionFailureRecord>,
}

/// Aggregate numbers for a full dedupe pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DedupeSummary {
    pub groups: usize,
    pub duplicates: usize,
    pub deleted: usize,
    pub failed: usize,
    pub bytes_freed: u64,
    pub bytes_planned: u64,
    pub dry_run: bool,
    pub aborted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DedupeRun {
    pub scan: DuplicateScan,
    pub plan: RetentionPlan,
    pub report: DeletionReport,
}

impl DedupeRun {
    pub fn summary(&self) -> DedupeSummary {
        DedupeSummary {
            groups: self.scan.groups.len(),
            duplicates: self.scan.duplicate_count,
            deleted: self.report.deleted_count,
            failed: self.report.failed_count,
            bytes_freed: self.report.bytes_freed,
            bytes_planned: self.report.bytes_planned,
            dry_run: self.report.dry_run,
            aborted: self.report.aborted,
        }
    }
}

/// Exact-duplicate detection and guarded bulk deletion.
#[derive(Debug, Clone, Default)]
pub struct DuplicateService {
    hasher: HashService,
}

impl DuplicateService {
    pub fn new(hasher: HashService) -> Self {
        Self { hasher }
    }

    pub fn from_settings(settings: &DedupeSettings) -> Self {
        Self::new(HashService::new(settings.algorithm).with_chunk_size(settings.chunk_size))
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.hasher.algorithm()
    }

    /// Hash every media file under the root and group byte-identical ones.
    ///
    /// Files that cannot be read are logged, listed in `failures` and left
    /// out of grouping. Cancellation discards the partial result.
    pub fn find_duplicates(
        &self,
        library: &LibraryService,
        filter: KindFilter,
        hooks: &BatchHooks,
    ) -> Result<DuplicateScan> {
        library.ensure_root()?;

        let entries = library.scan(filter, true);
        let total = entries.len();
        let completed = AtomicUsize::new(0);

        let hashed: Vec<Option<Result<String>>> = entries
            .par_iter()
            .map(|entry| {
                if hooks.is_cancelled() {
                    return None;
                }
                let digest = self.hasher.compute_content_hash(&entry.absolute_path);
                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                hooks.report(BatchPhase::Hashing, &entry.relative_path, done, total);
                Some(digest)
            })
            .collect();

        if hooks.is_cancelled() || hashed.iter().any(Option::is_none) {
            return Err(MediaError::Cancelled);
        }

        let mut failures = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut buckets: Vec<DuplicateGroup> = Vec::new();

        for (entry, digest) in entries.into_iter().zip(hashed.into_iter().flatten()) {
            match digest {
                Ok(content_hash) => match index.get(&content_hash) {
                    Some(&slot) => buckets[slot].entries.push(entry),
                    None => {
                        index.insert(content_hash.clone(), buckets.len());
                        buckets.push(DuplicateGroup {
                            content_hash,
                            entries: vec![entry],
                        });
                    }
                },
                Err(e) => {
                    log::warn!("{}", e);
                    failures.push(HashFailure {
                        path: entry.relative_path,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let groups: Vec<DuplicateGroup> = buckets
            .into_iter()
            .filter(|group| group.entries.len() > 1)
            .collect();
        let duplicate_count = groups.iter().map(|g| g.entries.len() - 1).sum();

        hooks.report(BatchPhase::Complete, "", total, total);
        log::info!(
            "Hashed {} files with {}: {} duplicate group(s), {} unreadable",
            total,
            self.algorithm(),
            groups.len(),
            failures.len()
        );

        Ok(DuplicateScan {
            algorithm: self.algorithm(),
            groups,
            scanned: total,
            failures,
            duplicate_count,
        })
    }

    /// Keep the first member of each group under `policy`, delete the rest.
    /// Equal keys keep their scan order.
    pub fn select_retained(groups: &[DuplicateGroup], policy: RetentionPolicy) -> RetentionPlan {
        let mut plan = RetentionPlan::default();

        for group in groups {
            let mut members = group.entries.clone();
            match policy {
                RetentionPolicy::Oldest => members.sort_by_key(|e| e.modified_time),
                RetentionPolicy::Newest => {
                    members.sort_by(|a, b| b.modified_time.cmp(&a.modified_time))
                }
                RetentionPolicy::ShortestPath => members.sort_by_key(|e| e.relative_path.len()),
            }

            let mut members = members.into_iter();
            if let Some(keep) = members.next() {
                plan.keep.push(keep);
            }
            plan.delete.extend(members);
        }

        plan
    }

    /// Delete `files`, or only report what would go when `dry_run` is set.
    ///
    /// Without `auto_confirm`, `confirm(count, bytes)` must approve before
    /// anything is removed. Failures are counted per file and never stop the
    /// batch.
    pub fn execute_deletion(
        &self,
        files: &[MediaEntry],
        options: DeletionOptions,
        confirm: impl FnOnce(usize, u64) -> bool,
        hooks: &BatchHooks,
    ) -> DeletionReport {
        // Sizes are taken before anything is removed
        let sizes: Vec<Option<u64>> = files
            .iter()
            .map(|e| fs::metadata(&e.absolute_path).ok().map(|m| m.len()))
            .collect();

        let mut report = DeletionReport {
            total: files.len(),
            bytes_planned: sizes.iter().flatten().sum(),
            dry_run: options.dry_run,
            ..DeletionReport::default()
        };

        if options.dry_run {
            log::info!(
                "Dry run: {} file(s), {} bytes would be deleted",
                report.total,
                report.bytes_planned
            );
            return report;
        }

        if files.is_empty() {
            return report;
        }

        if !options.auto_confirm && !confirm(files.len(), report.bytes_planned) {
            log::info!("Deletion of {} file(s) declined", files.len());
            report.aborted = true;
            return report;
        }

        for (i, (entry, size)) in files.iter().zip(sizes).enumerate() {
            if hooks.is_cancelled() {
                report.cancelled = true;
                break;
            }

            match size {
                None => {
                    report.skipped_count += 1;
                    report.removed.push(entry.clone());
                }
                Some(size) => match fs::remove_file(&entry.absolute_path) {
                    Ok(()) => {
                        report.deleted_count += 1;
                        report.bytes_freed += size;
                        report.removed.push(entry.clone());
                    }
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        // Gone between measuring and removing
                        report.skipped_count += 1;
                        report.bytes_freed += size;
                        report.removed.push(entry.clone());
                    }
                    Err(e) => {
                        let error = MediaError::DeletionFailure {
                            path: entry.relative_path.clone(),
                            source: e,
                        };
                        log::warn!("{}", error);
                        report.failed_count += 1;
                        report.failures.push(DeletionFailureRecord {
                            path: entry.relative_path.clone(),
                            reason: error.to_string(),
                        });
                    }
                },
            }

            hooks.report(BatchPhase::Deleting, &entry.relative_path, i + 1, files.len());
        }

        hooks.report(BatchPhase::Complete, "", files.len(), files.len());
        log::info!(
            "Deleted {} of {} file(s), {} failed, {} bytes freed",
            report.deleted_count,
            report.total,
            report.failed_count,
            report.bytes_freed
        );
        report
    }

    /// Scan, plan and delete in one go.
    pub fn run_dedupe(
        &self,
        library: &LibraryService,
        filter: KindFilter,
        policy: RetentionPolicy,
        options: DeletionOptions,
        confirm: impl FnOnce(usize, u64) -> bool,
        hooks: &BatchHooks,
    ) -> Result<DedupeRun> {
        let scan = self.find_duplicates(library, filter, hooks)?;
        let plan = Self::select_retained(&scan.groups, policy);
        let report = self.execute_deletion(&plan.delete, options, confirm, hooks);
        Ok(DedupeRun { scan, plan, report })
    }
}
