use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use tracing::warn;

use crate::archive;
use crate::backup::{self, read_manifest_data, Manifest};
use crate::error::Result;
use crate::file::fs::{FileSystem, OsFileSystem, SubdirFs};
use crate::file::hash::checksum_files;
use crate::file::scan::PathScanner;
use crate::file::File;
use crate::store::Store;

/// Restore files from the store into `root`, limited to entries whose path
/// starts with one of the `include` prefixes.
///
/// The restore is incremental: the destination is scanned and checksummed
/// first, and files already identical on disk are skipped. Each needed
/// object is fetched and streamed exactly once.
pub fn restore_to_path(store: &Store, root: &Path, include: &[String]) -> Result<()> {
    let data = backup::get_latest_manifest(store)?;
    let m = read_manifest_data(&data)?;

    let os_fs = OsFileSystem::shared();
    os_fs.mkdir_all(root)?;

    let included = |path: &str| include.iter().any(|prefix| path.starts_with(prefix.as_str()));

    // Scan the destination as if it were rooted at `/`, checksumming
    // through a virtual filesystem so paths line up with the manifest.
    let scanner = PathScanner::new().include_path(root)?;
    let mut local_files = scanner.scan_relative_to(root)?;
    let sub_fs: Arc<dyn FileSystem> = Arc::new(SubdirFs::new(root)?);
    checksum_files(&*sub_fs, &mut [local_files.as_mut_slice()])?;
    let local = Manifest::new(&*sub_fs, &local_files)?;

    // Which objects to fetch, and the files wanted from each.
    let mut targets: BTreeMap<String, Vec<File>> = BTreeMap::new();

    for e in &m.entries {
        let path = e.path();
        if local.has_identical(&e.file) || !included(&path) {
            continue;
        }
        if e.file.is_dir() {
            // Restore directly from the manifest data. Failures to apply
            // directory attributes are reported but not fatal.
            let parent = Path::new(&e.file.root);
            let subdir = root.join(
                parent
                    .strip_prefix("/")
                    .unwrap_or(parent),
            );
            os_fs.mkdir_all(&subdir)?;
            if let Err(err) = archive::restore_dir(&*os_fs, &subdir, &e.file) {
                warn!(path = %path, error = %err, "restore: directory metadata not applied");
            }
        } else {
            let Some(part) = e.parts.first() else {
                warn!(path = %path, "restore: entry has no parts, skipping");
                continue;
            };
            let key = format!("blob/{}/{}", e.set, part.key);
            targets.entry(key).or_default().push(e.file.clone());
        }
    }

    // Fetch blobs and restore the selected files from each.
    for (key, list) in targets {
        let only: HashMap<String, File> = list.into_iter().map(|f| (f.path(), f)).collect();
        let tarball = store.get_reader(&key)?;
        archive::unpack(&*os_fs, root, tarball, Some(&only))?;
    }

    Ok(())
}
