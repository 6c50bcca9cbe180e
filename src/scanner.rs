use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::cmp::Ordering as CmpOrdering;
use std::fs::{self, Metadata};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::config::ScanConfig;
use crate::error::ScanError;
use crate::tree::ScanState;

/// Deep trees recurse once per level on the pool threads.
const WORKER_STACK_SIZE: usize = 16 * 1024 * 1024;

/// One scanned filesystem entry and, for directories, its scanned children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedNode {
    pub name: String,
    /// Slash-joined path from the scan root's parent path.
    pub full_path: String,
    /// Where to re-scan this entry from.
    pub location: PathBuf,
    pub size: u64,
    pub is_dir: bool,
    pub state: ScanState,
    /// Sorted by size, largest first.
    pub children: Vec<ScannedNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub total_files: u64,
    pub total_dirs: u64,
    /// Entries dropped because they could not be read.
    pub skipped_entries: u64,
    pub total_size: u64,
    pub duration_ms: u128,
}

#[derive(Debug, Clone)]
pub struct ScanOutput {
    pub root: ScannedNode,
    pub stats: ScanStats,
}

/// Shared cancellation switch for one scan.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Recursive directory scanner.
///
/// Every directory fans its entries out onto one work-stealing pool of
/// `max_concurrency` threads, so the number of in-flight filesystem calls
/// stays bounded however wide or deep the tree is. A directory's size is the
/// sum of its children and is only known once all of them have finished.
pub struct Scanner {
    pool: ThreadPool,
    config: ScanConfig,
}

impl Scanner {
    pub fn new(config: ScanConfig) -> Result<Self, ScanError> {
        config.validate()?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.max_concurrency)
            .stack_size(WORKER_STACK_SIZE)
            .thread_name(|i| format!("bigfiles-scan-{i}"))
            .build()
            .map_err(|e| ScanError::ThreadPool(e.to_string()))?;
        Ok(Self { pool, config })
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Scan `location`, naming the result relative to `parent_path`.
    ///
    /// Only a failure to resolve or list `location` itself is an error.
    pub fn scan(&self, location: &Path, parent_path: &str) -> Result<ScanOutput, ScanError> {
        self.scan_with_cancel(location, parent_path, &CancelFlag::new())
    }

    pub fn scan_with_cancel(
        &self,
        location: &Path,
        parent_path: &str,
        cancel: &CancelFlag,
    ) -> Result<ScanOutput, ScanError> {
        let start = Instant::now();
        info!(
            path = %location.display(),
            threads = self.config.max_concurrency,
            max_depth = ?self.config.max_depth,
            "starting scan"
        );

        let root_unavailable = |source: io::Error| ScanError::RootUnavailable {
            path: location.to_path_buf(),
            source,
        };

        // The root follows symlinks; everything below it is taken as-is.
        let metadata = fs::metadata(location).map_err(root_unavailable)?;

        let walk = Walk {
            config: &self.config,
            cancel,
            files: AtomicU64::new(0),
            dirs: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        };

        let result = self
            .pool
            .install(|| walk.scan_path(location, &metadata, parent_path, 0));

        if cancel.is_cancelled() {
            info!(path = %location.display(), "scan cancelled");
            return Err(ScanError::Cancelled);
        }
        let root = result.map_err(root_unavailable)?;

        let stats = ScanStats {
            total_files: walk.files.load(Ordering::Relaxed),
            total_dirs: walk.dirs.load(Ordering::Relaxed),
            skipped_entries: walk.skipped.load(Ordering::Relaxed),
            total_size: root.size,
            duration_ms: start.elapsed().as_millis(),
        };
        info!(
            path = %location.display(),
            files = stats.total_files,
            dirs = stats.total_dirs,
            skipped = stats.skipped_entries,
            size = stats.total_size,
            elapsed_ms = stats.duration_ms as u64,
            "scan finished"
        );

        Ok(ScanOutput { root, stats })
    }
}

/// Per-scan shared state; workers only touch the atomics.
struct Walk<'a> {
    config: &'a ScanConfig,
    cancel: &'a CancelFlag,
    files: AtomicU64,
    dirs: AtomicU64,
    skipped: AtomicU64,
}

impl Walk<'_> {
    fn scan_path(
        &self,
        path: &Path,
        metadata: &Metadata,
        parent_path: &str,
        depth: usize,
    ) -> io::Result<ScannedNode> {
        if self.cancel.is_cancelled() {
            return Err(io::Error::new(io::ErrorKind::Interrupted, "scan cancelled"));
        }

        let name = entry_name(path);
        let full_path = join_full_path(parent_path, &name);

        if !metadata.is_dir() {
            self.files.fetch_add(1, Ordering::Relaxed);
            return Ok(ScannedNode {
                name,
                full_path,
                location: path.to_path_buf(),
                size: metadata.len(),
                is_dir: false,
                state: ScanState::Scanned,
                children: Vec::new(),
            });
        }

        self.dirs.fetch_add(1, Ordering::Relaxed);

        let beyond_depth = self.config.max_depth.map_or(false, |max| depth > max);
        if beyond_depth {
            return Ok(ScannedNode {
                name,
                full_path,
                location: path.to_path_buf(),
                size: 0,
                is_dir: true,
                state: ScanState::Unscanned,
                children: Vec::new(),
            });
        }

        // Listing is drained before fanning out so no directory handle stays
        // open while children are scanned.
        let entries: Vec<PathBuf> = fs::read_dir(path)?
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry.path()),
                Err(err) => {
                    self.skipped.fetch_add(1, Ordering::Relaxed);
                    debug!(dir = %path.display(), error = %err, "skipping unreadable entry");
                    None
                }
            })
            .filter(|entry| !self.config.should_skip(entry))
            .collect();

        let mut children: Vec<ScannedNode> = entries
            .into_par_iter()
            .filter_map(|child| match self.scan_child(&child, &full_path, depth + 1) {
                Ok(node) => Some(node),
                Err(err) => {
                    self.skipped.fetch_add(1, Ordering::Relaxed);
                    debug!(path = %child.display(), error = %err, "skipping entry");
                    None
                }
            })
            .collect();

        sort_by_size(&mut children);
        let size = sum_sizes(&children);

        Ok(ScannedNode {
            name,
            full_path,
            location: path.to_path_buf(),
            size,
            is_dir: true,
            state: ScanState::Scanned,
            children,
        })
    }

    fn scan_child(&self, path: &Path, parent_path: &str, depth: usize) -> io::Result<ScannedNode> {
        let metadata = fs::symlink_metadata(path)?;
        self.scan_path(path, &metadata, parent_path, depth)
    }
}

/// Largest first; equal sizes fall back to name so the order is stable
/// across runs.
pub(crate) fn size_order(a_size: u64, a_name: &str, b_size: u64, b_name: &str) -> CmpOrdering {
    b_size.cmp(&a_size).then_with(|| a_name.cmp(b_name))
}

fn sort_by_size(nodes: &mut [ScannedNode]) {
    nodes.sort_by(|a, b| size_order(a.size, &a.name, b.size, &b.name));
}

/// Apparent sizes of sparse files can add up past `u64::MAX`.
fn sum_sizes(nodes: &[ScannedNode]) -> u64 {
    nodes.iter().fold(0u64, |acc, node| acc.saturating_add(node.size))
}

fn entry_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

pub(crate) fn join_full_path(parent_path: &str, name: &str) -> String {
    if parent_path.is_empty() {
        name.to_string()
    } else if parent_path.ends_with('/') {
        // A filesystem root such as `/` already ends in a separator.
        format!("{parent_path}{name}")
    } else {
        format!("{parent_path}/{name}")
    }
}
