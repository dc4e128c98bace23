use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::file::fs::{FileInfo, FileSystem, OsFileSystem};
use crate::file::File;

/// Concurrently open directories during a scan. Limited by the OS; max
/// allowed open file handles.
const CONCURRENT_DIRS: usize = 10;

fn found_file(pwd: &Path, fi: FileInfo) -> File {
    File {
        root: pwd.to_string_lossy().into_owned(),
        name: fi.name,
        size: fi.size,
        mode: fi.mode,
        mtime: fi.mtime,
        uid: fi.uid,
        gid: fi.gid,
        sha1: None,
    }
}

/// Scan a single file path.
pub fn scan_file(fs: &dyn FileSystem, path: &Path) -> Result<File> {
    let abs = fs.abs_path(path)?;
    let fi = fs.lstat(&abs)?;
    let parent = abs.parent().unwrap_or(Path::new("/"));
    Ok(found_file(parent, fi))
}

/// Recursive scanner over a set of included paths, walking directories in
/// parallel with a bounded degree. Exclusion supersedes inclusion at any
/// depth; excluded directories are not descended into.
pub struct PathScanner {
    fs: Arc<dyn FileSystem>,
    include: Vec<PathBuf>,
    exclude: HashSet<PathBuf>,
}

impl PathScanner {
    /// Scanner over the real filesystem.
    pub fn new() -> Self {
        Self::with_fs(OsFileSystem::shared())
    }

    pub fn with_fs(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            fs,
            include: Vec::new(),
            exclude: HashSet::new(),
        }
    }

    pub fn fs(&self) -> Arc<dyn FileSystem> {
        Arc::clone(&self.fs)
    }

    /// Include a path to be scanned, resolved to an absolute path.
    pub fn include_path(mut self, path: &Path) -> Result<Self> {
        let abs = self.fs.abs_path(path)?;
        debug!(path = %abs.display(), "scan: including path");
        self.include.push(abs);
        Ok(self)
    }

    /// Exclude a path from scanning. Paths that cannot be resolved are
    /// skipped with a warning, since they cannot match anything on disk.
    pub fn exclude_path(mut self, path: &Path) -> Self {
        match self.fs.abs_path(path) {
            Ok(abs) => {
                debug!(path = %abs.display(), "scan: excluding path");
                self.exclude.insert(abs);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "scan: cannot resolve exclude"),
        }
        self
    }

    fn excluded(&self, f: &File) -> bool {
        self.exclude.contains(Path::new(&f.path()))
    }

    /// Walk the included paths, returning every file, directory and symlink
    /// found. Output order is unspecified.
    pub fn scan(&self) -> Result<Vec<File>> {
        let mut entries = Vec::new();
        let mut frontier: Vec<PathBuf> = Vec::new();

        for path in &self.include {
            let fi = self.fs.lstat(path)?;
            let parent = path.parent().unwrap_or(Path::new("/"));
            let f = found_file(parent, fi);
            if self.excluded(&f) {
                continue;
            }
            if f.is_dir() {
                frontier.push(path.clone());
            }
            entries.push(f);
        }

        // Breadth-first walk; each round lists the current frontier of
        // directories with up to CONCURRENT_DIRS workers.
        while !frontier.is_empty() {
            let next = AtomicUsize::new(0);
            let workers = CONCURRENT_DIRS.min(frontier.len());
            let mut round: Vec<(Vec<File>, Vec<PathBuf>)> = Vec::with_capacity(workers);

            let results: Vec<Result<(Vec<File>, Vec<PathBuf>)>> = std::thread::scope(|s| {
                let handles: Vec<_> = (0..workers)
                    .map(|_| {
                        s.spawn(|| -> Result<(Vec<File>, Vec<PathBuf>)> {
                            let mut files = Vec::new();
                            let mut dirs = Vec::new();
                            loop {
                                let i = next.fetch_add(1, Ordering::Relaxed);
                                let Some(dir) = frontier.get(i) else { break };
                                for fi in self.fs.read_dir(dir)? {
                                    let f = found_file(dir, fi);
                                    if self.excluded(&f) {
                                        continue;
                                    }
                                    if f.is_dir() {
                                        dirs.push(dir.join(&f.name));
                                    }
                                    files.push(f);
                                }
                            }
                            Ok((files, dirs))
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| h.join().expect("scan worker panicked"))
                    .collect()
            });

            for result in results {
                round.push(result?);
            }

            frontier = Vec::new();
            for (files, dirs) in round {
                entries.extend(files);
                frontier.extend(dirs);
            }
        }

        let dirs = entries.iter().filter(|f| f.is_dir()).count();
        let bytes: u64 = entries
            .iter()
            .filter(|f| f.is_regular() || f.is_symlink())
            .map(|f| f.size)
            .sum();
        info!(
            folders = dirs,
            files = entries.len() - dirs,
            bytes,
            "scan: done"
        );
        Ok(entries)
    }

    /// Scan, then rewrite roots to be relative to `root` (as a virtual `/`).
    /// Entries outside the new root are dropped.
    pub fn scan_relative_to(&self, root: &Path) -> Result<Vec<File>> {
        let entries = self.scan()?;
        let base = self.fs.abs_path(root)?;
        debug!(base = %base.display(), "scan: finding root paths relative to base");

        let mut updated = Vec::with_capacity(entries.len());
        for mut f in entries {
            match Path::new(&f.root).strip_prefix(&base) {
                Ok(rel) => {
                    f.root = Path::new("/").join(rel).to_string_lossy().into_owned();
                    updated.push(f);
                }
                Err(_) => {} // scanned entry outside the new root
            }
        }
        Ok(updated)
    }
}

impl Default for PathScanner {
    fn default() -> Self {
        Self::new()
    }
}
