pub mod bundle;
pub(crate) mod compat;
pub mod manifest;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::archive;
use crate::error::{CofferError, Result};
use crate::file::fs::FileSystem;
use crate::file::scan::PathScanner;
use crate::file::File;
use crate::store::Store;

pub use manifest::{read_manifest_data, Manifest, ManifestEntry, ManifestEntryPart};

/// Concurrent bundle uploads. Chosen arbitrarily.
const CONCURRENT_UPLOADS: usize = 20;

/// Reserved user-metadata key pointing at the current set.
const LATEST_POINTER: &str = "manifest/latest";

// ---------------------------------------------------------------------------
// Manifest fetch and save
// ---------------------------------------------------------------------------

fn cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|base| base.join("coffer"))
}

/// Fetch a store object through a small local disk cache keyed by
/// (store id, object key). Cache failures fall through to the store.
fn cache_get_store_object(store: &Store, key: &str) -> Result<Vec<u8>> {
    let Some(dir) = cache_dir() else {
        return store.get(key);
    };
    let cache_file = dir.join(format!("{}/{}", store.id(), key).replace('/', "_"));
    if cache_file.exists() {
        if let Ok(data) = std::fs::read(&cache_file) {
            debug!(key, cache = %cache_file.display(), "core: found cached object");
            return Ok(data);
        }
    }
    let data = store.get(key)?;
    let _ = std::fs::create_dir_all(&dir);
    let _ = std::fs::write(&cache_file, &data);
    Ok(data)
}

/// Get the latest manifest that was written to the store.
///
/// The current layout records the set under the `"manifest/latest"` user
/// metadata key; older stores kept a `manifest/latest` object instead.
pub fn get_latest_manifest(store: &Store) -> Result<Vec<u8>> {
    match store.get_metadata(LATEST_POINTER) {
        // No metadata; older or empty store. Check the legacy object.
        Err(CofferError::MissingMetadata) => cache_get_store_object(store, LATEST_POINTER),
        Ok(Value::String(set)) => cache_get_store_object(store, &format!("manifest/{set}")),
        Ok(_) => Err(CofferError::MalformedMetadata),
        Err(e) => Err(e),
    }
}

/// Write the manifest object, then move the latest pointer. The pointer
/// write happens last, so a crash in between leaves the previous state.
fn save_manifest(store: &Store, m: &Manifest) -> Result<()> {
    let data = m.to_json()?;
    store.put(&format!("manifest/{}", m.last_set), &data)?;
    store.put_metadata(LATEST_POINTER, Value::String(m.last_set.clone()))
}

/// Write a manifest file from a path scan, without contacting any store.
pub fn write_manifest(path: &Path, scanner: &PathScanner) -> Result<()> {
    let files = scanner.scan()?;
    let fs = scanner.fs();
    let m = Manifest::new(&*fs, &files)?;
    std::fs::write(path, m.to_json()?)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Orchestration
// ---------------------------------------------------------------------------

/// Scan for changes against the latest manifest and upload the diff.
pub fn scan_and_backup(store: &Store, scanner: &PathScanner) -> Result<()> {
    let scanned = scanner.scan()?;
    if scanned.is_empty() {
        return Ok(());
    }
    let fs = scanner.fs();

    match get_latest_manifest(store) {
        Ok(data) => {
            // Read the manifest and update it with new files for backup.
            let mut m = read_manifest_data(&data)?;
            let changed = m.compare(&*fs, &scanned)?;
            if changed.is_empty() {
                return Ok(());
            }
            m.update(&*fs, &changed)?;
            backup_latest(store, &fs, &mut m)
        }
        // Manifest not found; create a new one with all files for backup.
        Err(ref e) if e.is_not_exist() => {
            let mut m = Manifest::new(&*fs, &scanned)?;
            backup_latest(store, &fs, &mut m)
        }
        Err(e) => Err(e),
    }
}

/// Upload every bundle of the manifest's latest set, then persist the
/// manifest.
///
/// Bundle failures are recovered locally: the bundle's files are dropped
/// from the manifest so it stays consistent with what was actually
/// uploaded, and the remaining bundles proceed. A failure of the final
/// manifest or pointer write surfaces to the caller.
pub fn backup_latest(store: &Store, fs: &Arc<dyn FileSystem>, m: &mut Manifest) -> Result<()> {
    let latest = m.latest_entries();
    if latest.is_empty() {
        info!("backup: no new entries to store");
        return Ok(());
    }

    let jobs: Vec<(String, Vec<File>)> = latest
        .into_iter()
        .map(|(key, entries)| {
            let files = entries
                .into_iter()
                .filter(|e| !e.file.is_dir()) // dirs are carried by the manifest
                .map(|e| e.file)
                .collect();
            (key, files)
        })
        .collect();
    let total = jobs.len();

    let failed: Mutex<Vec<(String, Vec<File>)>> = Mutex::new(Vec::new());
    let done_puts = AtomicUsize::new(0);
    let done_bytes = AtomicU64::new(0);

    let (tx, rx) = crossbeam_channel::unbounded();
    for job in jobs {
        tx.send(job).expect("receiver alive");
    }
    drop(tx);

    std::thread::scope(|s| {
        for _ in 0..CONCURRENT_UPLOADS.min(total) {
            let rx = rx.clone();
            let failed = &failed;
            let done_puts = &done_puts;
            let done_bytes = &done_bytes;
            s.spawn(move || {
                while let Ok((key, files)) = rx.recv() {
                    match upload_bundle(store, fs, &key, &files) {
                        Ok(written) => {
                            let n = done_puts.fetch_add(1, Ordering::Relaxed) + 1;
                            done_bytes.fetch_add(written, Ordering::Relaxed);
                            info!(
                                key = %key,
                                files = files.len(),
                                bytes = written,
                                progress = %format!("{n}/{total}"),
                                "backup: stored bundle"
                            );
                        }
                        Err(e) => {
                            warn!(key = %key, error = %e, "backup: failed to put, removing files from manifest");
                            failed.lock().unwrap().push((key, files));
                        }
                    }
                }
            });
        }
    });

    // Rollback failed bundles, serialized against the final write: a bundle
    // is either fully present in both store and manifest, or in neither.
    for (_, files) in failed.into_inner().unwrap() {
        for f in files {
            let path = f.path();
            if m.remove(&f) {
                debug!(path = %path, "backup: removed from manifest");
            }
        }
    }

    info!(
        objects = done_puts.load(Ordering::Relaxed),
        bytes = done_bytes.load(Ordering::Relaxed),
        "backup: finished saving data"
    );
    save_manifest(store, m)
}

fn upload_bundle(
    store: &Store,
    fs: &Arc<dyn FileSystem>,
    key: &str,
    files: &[File],
) -> Result<u64> {
    let tarball = archive::pack_reader(Arc::clone(fs), files.to_vec());
    let mut packer = store.pack(&format!("blob/{key}"))?;
    let written = packer.put_reader(tarball)?;
    packer.close()?;
    Ok(written)
}
