use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dialoguer::Confirm;
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tikrs::media::duplicate::{DeletionOptions, RetentionPolicy};
use tikrs::media::hash::HashAlgorithm;
use tikrs::media::library::{RecencyKey, sort_by_recency};
use tikrs::media::progress::{BatchHooks, BatchProgress};
use tikrs::media::recommend::seed_from_str;
use tikrs::media::thumbnail::{CacheState, Thumbnail};
use tikrs::{KindFilter, Library, Settings};

#[derive(Parser, Debug)]
#[command(name = "tikrs", version, about = "Maintain a local short-video and image library")]
struct Cli {
    /// Media library root
    #[arg(short, long, value_name = "DIR", env = "MEDIA_ROOT")]
    root: PathBuf,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List media files under the root
    Scan {
        #[arg(long, value_enum, default_value_t = KindFilter::All)]
        kind: KindFilter,
        /// Newest first by the given timestamp
        #[arg(long, value_enum)]
        sort: Option<RecencyKey>,
    },

    /// Weighted random pick favouring recent files and favorites
    Shuffle {
        #[arg(long, value_enum, default_value_t = KindFilter::Video)]
        kind: KindFilter,
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
        /// Reproduce an earlier ordering
        #[arg(long)]
        seed: Option<String>,
        /// Return one page of the full ordering instead of `limit` items
        #[arg(long)]
        page: Option<usize>,
        #[arg(long, default_value_t = 30)]
        size: usize,
    },

    /// Manage favorites
    Favorite {
        #[command(subcommand)]
        command: FavoriteCmd,
    },

    /// Manage the thumbnail cache
    Thumbs {
        #[command(subcommand)]
        command: ThumbsCmd,
    },

    /// Find byte-identical files and delete all but one per group
    Dedupe {
        #[arg(long, value_enum, default_value_t = KindFilter::All)]
        kind: KindFilter,
        #[arg(long, value_enum)]
        algorithm: Option<HashAlgorithm>,
        /// Which copy to keep
        #[arg(long, value_enum)]
        keep: Option<RetentionPolicy>,
        /// Actually delete; without this only a report is printed
        #[arg(long)]
        execute: bool,
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Delete one media file with its thumbnail and favorite entry
    Delete {
        /// Path relative to the root
        path: String,
        #[arg(short, long)]
        yes: bool,
    },

    /// Library and cache counts
    Stats,
}

#[derive(Subcommand, Debug)]
enum FavoriteCmd {
    /// Flip the favorite flag of a file
    Toggle { path: String },
    /// List all favorites
    List,
    /// Show whether a file is a favorite
    Check { path: String },
}

#[derive(Subcommand, Debug)]
enum ThumbsCmd {
    /// Generate missing thumbnails for every video
    Generate {
        /// Re-render existing thumbnails too
        #[arg(long)]
        overwrite: bool,
        /// Visit at most this many videos (0 = all)
        #[arg(long, default_value_t = 0)]
        limit: usize,
    },
    /// Drop thumbnails whose source is gone
    Clean,
    /// Report thumbnail coverage
    Verify,
    /// Delete every cached thumbnail
    Clear {
        #[arg(short, long)]
        yes: bool,
    },
    /// Pin the thumbnail of a video to a timestamp
    Set {
        path: String,
        /// Seconds into the video
        timestamp: f64,
    },
    /// Produce (or fetch) the thumbnail of one file
    Get { path: String },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let settings = Settings::load().context("Failed to load settings")?;
    let library = Library::open(&cli.root, settings)
        .with_context(|| format!("Failed to open library at {}", cli.root.display()))?;
    let json = cli.json;

    match cli.command {
        Commands::Scan { kind, sort } => {
            let mut entries = library.scan(kind)?;
            if let Some(key) = sort {
                sort_by_recency(&mut entries, key);
            }
            if json {
                print_json(&entries)?;
            } else {
                for entry in &entries {
                    println!("{}", entry.relative_path);
                }
                println!("{} file(s)", entries.len());
            }
        }

        Commands::Shuffle {
            kind,
            limit,
            seed,
            page,
            size,
        } => match page {
            Some(page) => {
                let page = library.random_page(kind, page, size, seed.as_deref())?;
                if json {
                    print_json(&page)?;
                } else {
                    for item in &page.items {
                        println!("{item}");
                    }
                    println!(
                        "page {} ({} total, seed {}){}",
                        page.page,
                        page.total,
                        page.seed,
                        if page.has_more { ", more available" } else { "" }
                    );
                }
            }
            None => {
                let picked = library.select(kind, limit, seed.as_deref().map(seed_from_str))?;
                if json {
                    print_json(&picked)?;
                } else {
                    for item in &picked {
                        println!("{item}");
                    }
                }
            }
        },

        Commands::Favorite { command } => match command {
            FavoriteCmd::Toggle { path } => {
                let state = library.toggle_favorite(&path)?;
                if json {
                    print_json(&state)?;
                } else if state.favorite {
                    println!("★ {}", state.path);
                } else {
                    println!("☆ {}", state.path);
                }
            }
            FavoriteCmd::List => {
                let favorites = library.favorites().load();
                if json {
                    print_json(&favorites)?;
                } else {
                    for path in &favorites {
                        println!("{path}");
                    }
                }
            }
            FavoriteCmd::Check { path } => {
                let favorite = library.is_favorite(&path);
                if json {
                    print_json(&serde_json::json!({ "path": path, "favorite": favorite }))?;
                } else {
                    println!("{}: {}", path, if favorite { "favorite" } else { "not a favorite" });
                }
            }
        },

        Commands::Thumbs { command } => match command {
            ThumbsCmd::Generate { overwrite, limit } => {
                let bar = progress_bar("Generating thumbnails")?;
                let hooks = BatchHooks::new().with_progress(track(&bar));
                let report = benchmark("thumbnail generation", || {
                    library.thumbnails().generate_all(overwrite, limit, &hooks)
                })?;
                bar.finish_and_clear();
                if json {
                    print_json(&report)?;
                } else {
                    println!(
                        "✅ generated {}, skipped {}, failed {} of {} video(s)",
                        report.generated, report.skipped, report.failed, report.total
                    );
                }
            }
            ThumbsCmd::Clean => {
                let report = library.thumbnails().clean(&BatchHooks::new())?;
                if json {
                    print_json(&report)?;
                } else {
                    println!(
                        "🧹 kept {}, removed {} of {} record(s), {} orphaned file(s)",
                        report.kept, report.removed, report.total, report.orphans_removed
                    );
                }
            }
            ThumbsCmd::Verify => {
                let report = library.thumbnails().verify();
                if json {
                    print_json(&report)?;
                } else {
                    println!(
                        "videos {}, mapped {}, invalid {}, missing {}",
                        report.videos, report.mapped, report.invalid, report.missing
                    );
                }
            }
            ThumbsCmd::Clear { yes } => {
                let stats = library.thumbnails().cache_stats()?;
                let prompt = format!(
                    "Delete {} cached thumbnail(s) ({})?",
                    stats.count,
                    HumanBytes(stats.bytes)
                );
                if !yes && !confirm(&prompt)? {
                    println!("Aborted.");
                    return Ok(());
                }
                let report = library.thumbnails().clear_cache()?;
                if json {
                    print_json(&report)?;
                } else {
                    println!(
                        "🗑️  deleted {} thumbnail(s), freed {}",
                        report.deleted_count,
                        HumanBytes(report.freed_bytes)
                    );
                }
            }
            ThumbsCmd::Set { path, timestamp } => {
                let record = library.set_thumbnail(&path, timestamp)?;
                if json {
                    print_json(&record)?;
                } else {
                    println!("📌 {} pinned at {:.3}s", path, record.ts.unwrap_or(timestamp));
                }
            }
            ThumbsCmd::Get { path } => {
                let thumb = library.get_or_create_thumbnail(&path)?;
                let location = library.thumbnails().thumbnail_path(&path);
                if json {
                    print_json(&thumbnail_summary(&path, &thumb, &location))?;
                    return Ok(());
                }
                match thumb.state {
                    CacheState::Cached | CacheState::Generated => {
                        println!("{}", location.display())
                    }
                    CacheState::SourceNotFound => println!("⚠️  {path} does not exist"),
                    CacheState::GenerationFailed => {
                        println!("⚠️  could not render a thumbnail for {path}")
                    }
                }
            }
        },

        Commands::Dedupe {
            kind,
            algorithm,
            keep,
            execute,
            yes,
        } => {
            let algorithm = algorithm.unwrap_or(library.settings().dedupe.algorithm);
            let policy = keep.unwrap_or(library.settings().dedupe.keep);
            if !json {
                println!("▶ Hashing media in {} with {}", library.root().display(), algorithm);
            }

            let bar = progress_bar("Hashing")?;
            let hooks = BatchHooks::new().with_progress(track(&bar));
            let scan = benchmark("hashing all files", || {
                library.find_duplicates(kind, algorithm, &hooks)
            })?;
            bar.finish_and_clear();

            for failure in &scan.failures {
                eprintln!("⚠️  Skipped {}: {}", failure.path, failure.reason);
            }
            if scan.groups.is_empty() {
                if json {
                    print_json(&scan)?;
                } else {
                    println!("No duplicates found among {} file(s).", scan.scanned);
                }
                return Ok(());
            }

            let plan = library.select_retained(&scan.groups, policy);
            if !json {
                for (i, group) in scan.groups.iter().enumerate() {
                    println!("\n✨ Group {} ({}):", i + 1, &group.content_hash[..12]);
                    for entry in &group.entries {
                        let marker = if plan.keep.iter().any(|k| k.relative_path == entry.relative_path) {
                            "🏆 keep  "
                        } else {
                            "🗑️  delete"
                        };
                        println!("   {} {}", marker, entry.relative_path);
                    }
                }
            }

            let options = DeletionOptions {
                dry_run: !execute,
                auto_confirm: yes,
            };
            let report = library.execute_deletion(
                &plan.delete,
                options,
                |count, bytes| {
                    confirm(&deletion_prompt(count, bytes)).unwrap_or(false)
                },
                &BatchHooks::new(),
            );

            if json {
                print_json(&report)?;
            } else if report.dry_run {
                println!(
                    "\n⚠️  Dry-run only: {} file(s), {} would be freed. Re-run with --execute to delete.",
                    report.total,
                    HumanBytes(report.bytes_planned)
                );
            } else if report.aborted {
                println!("\nAborted; nothing was deleted.");
            } else {
                for failure in &report.failures {
                    eprintln!("⚠️  {}", failure.reason);
                }
                println!(
                    "\n✅ Deleted {} file(s), {} failed, freed {}",
                    report.deleted_count,
                    report.failed_count,
                    HumanBytes(report.bytes_freed)
                );
            }
        }

        Commands::Delete { path, yes } => {
            if !yes && !confirm(&format!("Permanently delete {path}?"))? {
                println!("Aborted.");
                return Ok(());
            }
            let deleted = library.delete_media(&path)?;
            if json {
                print_json(&deleted)?;
            } else {
                println!("🗑️  Deleted {} ({})", deleted.path, HumanBytes(deleted.bytes_freed));
            }
        }

        Commands::Stats => {
            let stats = library.library_stats()?;
            if json {
                print_json(&stats)?;
            } else {
                println!("videos:     {}", stats.videos);
                println!("images:     {}", stats.images);
                println!("favorites:  {}", stats.favorites);
                println!(
                    "thumbnails: {} ({})",
                    stats.cache_count,
                    HumanBytes(stats.cache_bytes)
                );
            }
        }
    }

    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    Ok(Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()?)
}

fn progress_bar(label: &str) -> Result<ProgressBar> {
    let bar = ProgressBar::new(0);
    bar.set_style(ProgressStyle::with_template(
        "{spinner:.green} {prefix} [{bar:30.cyan/blue}] {pos}/{len} {wide_msg}",
    )?);
    bar.set_prefix(label.to_string());
    bar.enable_steady_tick(Duration::from_millis(100));
    Ok(bar)
}

fn track(bar: &ProgressBar) -> Box<dyn Fn(BatchProgress) + Send + Sync> {
    let bar = bar.clone();
    Box::new(move |progress| {
        bar.set_length(progress.total_count as u64);
        bar.set_position(progress.completed_count as u64);
        bar.set_message(progress.current_file);
    })
}

/// Run `f()`, log how long it took (with `label`), and return its result.
fn benchmark<T, F: FnOnce() -> T>(label: &str, f: F) -> T {
    let start = Instant::now();
    let result = f();
    log::info!("⏱ {} took {:.2?}", label, start.elapsed());
    result
}

fn deletion_prompt(count: usize, bytes: u64) -> String {
    format!("Permanently delete {} file(s) ({})?", count, HumanBytes(bytes))
}

/// `file` is null whenever the placeholder was served.
fn thumbnail_summary(path: &str, thumb: &Thumbnail, location: &Path) -> serde_json::Value {
    let file = (!thumb.is_placeholder()).then(|| location.display().to_string());
    serde_json::json!({
        "path": path,
        "state": thumb.state,
        "mime": thumb.mime,
        "file": file,
    })
}
