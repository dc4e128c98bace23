use std::fs as stdfs;
use std::io::{self, Read, Write};
use std::os::unix::fs::{DirBuilderExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use filetime::FileTime;

/// Stat metadata for a single directory entry, as seen by `lstat`.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub mode: u32,
    pub mtime: DateTime<Utc>,
    pub uid: u32,
    pub gid: u32,
}

impl FileInfo {
    fn from_metadata(name: String, meta: &stdfs::Metadata) -> Self {
        Self {
            name,
            size: meta.size(),
            mode: meta.mode(),
            // Truncated to storage precision of whole seconds.
            mtime: Utc
                .timestamp_opt(meta.mtime(), 0)
                .single()
                .unwrap_or_default(),
            uid: meta.uid(),
            gid: meta.gid(),
        }
    }
}

/// Capability over the filesystem, so scanning and restore can be pointed at
/// a virtual tree (see [`SubdirFs`]) instead of conditionalizing call sites.
pub trait FileSystem: Send + Sync {
    /// Absolute representation of a path after evaluating symlinks.
    fn abs_path(&self, path: &Path) -> io::Result<PathBuf>;

    /// Stat without following symlinks.
    fn lstat(&self, path: &Path) -> io::Result<FileInfo>;

    /// List a directory, stat'ing each entry without following symlinks.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<FileInfo>>;

    /// Create a single directory with the given permission bits.
    fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()>;

    /// Create a directory path along with any necessary parents (0755).
    fn mkdir_all(&self, path: &Path) -> io::Result<()>;

    /// Remove a path and any children it contains. Missing paths are fine.
    fn remove_all(&self, path: &Path) -> io::Result<()>;

    fn open_read(&self, path: &Path) -> io::Result<Box<dyn Read + Send>>;

    /// Create (or truncate) a file for writing with the given permissions.
    fn open_write(&self, path: &Path, mode: u32) -> io::Result<Box<dyn Write + Send>>;

    fn read_link(&self, path: &Path) -> io::Result<String>;

    fn symlink(&self, target: &str, link: &Path) -> io::Result<()>;

    /// Change owner without following symlinks.
    fn lchown(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()>;

    /// Set access and modification times without following symlinks.
    fn set_times(&self, path: &Path, atime: DateTime<Utc>, mtime: DateTime<Utc>) -> io::Result<()>;

    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Write a whole file with default permissions (0644), truncating.
    fn write_file(&self, path: &Path, data: &[u8]) -> io::Result<()>;
}

// ---------------------------------------------------------------------------
// Real filesystem
// ---------------------------------------------------------------------------

/// The actual OS filesystem.
pub struct OsFileSystem;

impl OsFileSystem {
    pub fn shared() -> Arc<dyn FileSystem> {
        Arc::new(OsFileSystem)
    }
}

impl FileSystem for OsFileSystem {
    fn abs_path(&self, path: &Path) -> io::Result<PathBuf> {
        stdfs::canonicalize(path)
    }

    fn lstat(&self, path: &Path) -> io::Result<FileInfo> {
        let meta = stdfs::symlink_metadata(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Ok(FileInfo::from_metadata(name, &meta))
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<FileInfo>> {
        let mut infos = Vec::new();
        for entry in stdfs::read_dir(path)? {
            let entry = entry?;
            // DirEntry::metadata does not traverse symlinks.
            let meta = entry.metadata()?;
            let name = entry.file_name().to_string_lossy().into_owned();
            infos.push(FileInfo::from_metadata(name, &meta));
        }
        Ok(infos)
    }

    fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()> {
        stdfs::DirBuilder::new().mode(mode & 0o7777).create(path)?;
        // The umask may have stripped bits; restore the exact mode.
        stdfs::set_permissions(path, stdfs::Permissions::from_mode(mode & 0o7777))
    }

    fn mkdir_all(&self, path: &Path) -> io::Result<()> {
        stdfs::create_dir_all(path)
    }

    fn remove_all(&self, path: &Path) -> io::Result<()> {
        match stdfs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn open_read(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(stdfs::File::open(path)?))
    }

    fn open_write(&self, path: &Path, mode: u32) -> io::Result<Box<dyn Write + Send>> {
        let file = stdfs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode & 0o7777)
            .open(path)?;
        file.set_permissions(stdfs::Permissions::from_mode(mode & 0o7777))?;
        Ok(Box::new(file))
    }

    fn read_link(&self, path: &Path) -> io::Result<String> {
        Ok(stdfs::read_link(path)?.to_string_lossy().into_owned())
    }

    fn symlink(&self, target: &str, link: &Path) -> io::Result<()> {
        std::os::unix::fs::symlink(target, link)
    }

    fn lchown(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()> {
        std::os::unix::fs::lchown(path, Some(uid), Some(gid))
    }

    fn set_times(&self, path: &Path, atime: DateTime<Utc>, mtime: DateTime<Utc>) -> io::Result<()> {
        filetime::set_symlink_file_times(
            path,
            FileTime::from_unix_time(atime.timestamp(), 0),
            FileTime::from_unix_time(mtime.timestamp(), 0),
        )
    }

    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        stdfs::read(path)
    }

    fn write_file(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        stdfs::write(path, data)
    }
}

// ---------------------------------------------------------------------------
// Sub-tree rooted virtual filesystem
// ---------------------------------------------------------------------------

/// A virtual filesystem whose root is a subdirectory on the real filesystem.
/// Paths are transparently mapped to their on-disk locations, so a caller
/// can treat the subdirectory as `/`.
pub struct SubdirFs {
    root: PathBuf,
    inner: Arc<dyn FileSystem>,
}

impl SubdirFs {
    pub fn new(root: &Path) -> io::Result<Self> {
        let inner = OsFileSystem::shared();
        let root = inner.abs_path(root)?;
        Ok(Self { root, inner })
    }

    fn real_path(&self, path: &Path) -> PathBuf {
        let mut real = self.root.clone();
        for comp in path.components() {
            match comp {
                Component::RootDir | Component::CurDir => {}
                other => real.push(other),
            }
        }
        real
    }
}

impl FileSystem for SubdirFs {
    fn abs_path(&self, path: &Path) -> io::Result<PathBuf> {
        let real = self.inner.abs_path(&self.real_path(path))?;
        let rel = real
            .strip_prefix(&self.root)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path escapes subdir root"))?;
        Ok(Path::new("/").join(rel))
    }

    fn lstat(&self, path: &Path) -> io::Result<FileInfo> {
        self.inner.lstat(&self.real_path(path))
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<FileInfo>> {
        self.inner.read_dir(&self.real_path(path))
    }

    fn mkdir(&self, path: &Path, mode: u32) -> io::Result<()> {
        self.inner.mkdir(&self.real_path(path), mode)
    }

    fn mkdir_all(&self, path: &Path) -> io::Result<()> {
        self.inner.mkdir_all(&self.real_path(path))
    }

    fn remove_all(&self, path: &Path) -> io::Result<()> {
        self.inner.remove_all(&self.real_path(path))
    }

    fn open_read(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        self.inner.open_read(&self.real_path(path))
    }

    fn open_write(&self, path: &Path, mode: u32) -> io::Result<Box<dyn Write + Send>> {
        self.inner.open_write(&self.real_path(path), mode)
    }

    fn read_link(&self, path: &Path) -> io::Result<String> {
        self.inner.read_link(&self.real_path(path))
    }

    fn symlink(&self, target: &str, link: &Path) -> io::Result<()> {
        self.inner.symlink(target, &self.real_path(link))
    }

    fn lchown(&self, path: &Path, uid: u32, gid: u32) -> io::Result<()> {
        self.inner.lchown(&self.real_path(path), uid, gid)
    }

    fn set_times(&self, path: &Path, atime: DateTime<Utc>, mtime: DateTime<Utc>) -> io::Result<()> {
        self.inner.set_times(&self.real_path(path), atime, mtime)
    }

    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.inner.read_file(&self.real_path(path))
    }

    fn write_file(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        self.inner.write_file(&self.real_path(path), data)
    }
}
