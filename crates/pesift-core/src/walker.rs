//! Depth-first directory walker feeding the worker pool.
//!
//! One control thread recurses through the tree synchronously; only
//! leaf-file processing is parallelized. For every regular file the walker
//! builds a [`Task`] that runs the validation pipeline on a pool worker,
//! using the pool's blocking submit as backpressure so the walk never runs
//! ahead of processing capacity.
//!
//! Symlinks are skipped unconditionally (never followed, never submitted).
//! Enumeration errors go through the classifier in [`crate::error`]:
//! per-entry recoverable failures are logged and only abort that entry's
//! branch, while anything else aborts the whole subtree walk.

use crate::error::{classify_entry_error, classify_open_error, EnumerationClass, Error, Result};
use crate::pool::{Task, WorkerPool};
use crate::report::{ReportSink, Severity};
use crate::sniff::{sniff_file, HeaderProbe, ScanContext};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Recursion cap applied unless overridden; deep enough for real trees,
/// shallow enough to keep the control-thread stack bounded
pub const DEFAULT_MAX_DEPTH: usize = 128;

/// Counters accumulated by the control thread during a walk.
///
/// Task completion is asynchronous, so `files_submitted` counts admissions
/// into the pool, not finished validations.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WalkStats {
    /// Directories entered
    pub dirs_visited: usize,
    /// Tasks handed to the worker pool
    pub files_submitted: usize,
    /// Symlinks skipped (file and directory alike)
    pub symlinks_skipped: usize,
    /// Directories that contained no entries
    pub empty_dirs: usize,
    /// Entries skipped because of recoverable errors or the depth cap
    pub entries_skipped: usize,
}

/// Depth-first walker over a directory tree
pub struct Walker<'a> {
    pool: &'a WorkerPool,
    probe: Arc<dyn HeaderProbe>,
    sink: Arc<dyn ReportSink>,
    ctx: ScanContext,
    max_depth: usize,
}

impl<'a> Walker<'a> {
    /// Creates a walker that submits validation tasks to `pool`
    pub fn new(
        pool: &'a WorkerPool,
        probe: Arc<dyn HeaderProbe>,
        sink: Arc<dyn ReportSink>,
        ctx: ScanContext,
    ) -> Self {
        Self {
            pool,
            probe,
            sink,
            ctx,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Overrides the recursion depth cap
    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Walks the tree rooted at `root`.
    ///
    /// Returns statistics for the walk, or the first fatal enumeration
    /// error. Submitted tasks may still be running when this returns; join
    /// the pool to wait for them.
    pub fn walk(&self, root: &Path) -> Result<WalkStats> {
        let mut stats = WalkStats::default();
        self.walk_dir(root, 0, &mut stats)?;
        debug!(?stats, "walk complete");
        Ok(stats)
    }

    fn walk_dir(&self, dir: &Path, depth: usize, stats: &mut WalkStats) -> Result<()> {
        stats.dirs_visited += 1;
        self.sink.line(
            Severity::Info,
            &format!("entering dir: {}", dir.display()),
        );

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                return match classify_open_error(&e) {
                    EnumerationClass::RecoverableEmpty => {
                        self.sink.line(
                            Severity::Info,
                            &format!("directory is empty: {}", dir.display()),
                        );
                        stats.empty_dirs += 1;
                        Ok(())
                    }
                    EnumerationClass::RecoverableEntry => {
                        self.sink.line(
                            Severity::Info,
                            &format!("access denied to directory: {}", dir.display()),
                        );
                        stats.entries_skipped += 1;
                        Ok(())
                    }
                    EnumerationClass::Fatal => Err(Error::enumeration(dir, e)),
                };
            }
        };

        let mut seen = 0usize;
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => match classify_entry_error(&e) {
                    EnumerationClass::RecoverableEntry | EnumerationClass::RecoverableEmpty => {
                        self.sink.line(
                            Severity::Warn,
                            &format!("skipping entry in {}: {e}", dir.display()),
                        );
                        stats.entries_skipped += 1;
                        continue;
                    }
                    EnumerationClass::Fatal => return Err(Error::enumeration(dir, e)),
                },
            };
            seen += 1;

            let path = entry.path();
            trace!(path = %path.display(), "current path");

            // DirEntry::file_type does not follow symlinks.
            let file_type = match entry.file_type() {
                Ok(ft) => ft,
                Err(e) => match classify_entry_error(&e) {
                    EnumerationClass::RecoverableEntry | EnumerationClass::RecoverableEmpty => {
                        self.sink.line(
                            Severity::Warn,
                            &format!("skipping {}: {e}", path.display()),
                        );
                        stats.entries_skipped += 1;
                        continue;
                    }
                    EnumerationClass::Fatal => return Err(Error::enumeration(&path, e)),
                },
            };

            if file_type.is_symlink() {
                self.sink.line(
                    Severity::Info,
                    &format!("skipping symlink: {}", path.display()),
                );
                stats.symlinks_skipped += 1;
                continue;
            }

            if file_type.is_dir() {
                if depth + 1 > self.max_depth {
                    warn!(path = %path.display(), max_depth = self.max_depth, "depth cap reached");
                    self.sink.line(
                        Severity::Warn,
                        &format!("max depth reached, skipping: {}", path.display()),
                    );
                    stats.entries_skipped += 1;
                    continue;
                }
                self.walk_dir(&path, depth + 1, stats)?;
            } else {
                self.submit_file(path.clone(), stats)?;
            }
        }

        if seen == 0 {
            self.sink.line(
                Severity::Info,
                &format!("directory is empty: {}", dir.display()),
            );
            stats.empty_dirs += 1;
        }

        Ok(())
    }

    fn submit_file(&self, path: std::path::PathBuf, stats: &mut WalkStats) -> Result<()> {
        let probe = Arc::clone(&self.probe);
        let sink = Arc::clone(&self.sink);
        let ctx = self.ctx;
        let task_path = path.clone();

        let task = Task::new(path, move || {
            let outcome = sniff_file(&ctx, &task_path, probe.as_ref(), sink.as_ref());
            trace!(path = %task_path.display(), ?outcome, "task finished");
        });

        // Blocking hand-off: this is where backpressure happens.
        self.pool.submit(task)?;
        stats.files_submitted += 1;
        Ok(())
    }
}
