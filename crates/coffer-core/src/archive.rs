use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{CofferError, Result};
use crate::file::fs::FileSystem;
use crate::file::File;
use crate::pipe::{pipe, PipeReader};

/// Join an archive entry name under a destination root. Entry names are
/// full paths; the leading slash is dropped so the join stays inside root.
fn join_under(root: &Path, name: &str) -> std::path::PathBuf {
    root.join(name.trim_start_matches('/'))
}

/// Stream a multi-file archive of `files`, produced on a background thread.
///
/// Entries are named by their full path. Contents are read through the given
/// filesystem, so packing can be pointed at a virtual tree.
pub fn pack_reader(fs: Arc<dyn FileSystem>, files: Vec<File>) -> PipeReader {
    let (mut writer, reader) = pipe();
    std::thread::spawn(move || match pack_into(&*fs, &files, &mut writer) {
        Ok(()) => writer.close(None),
        Err(e) => writer.close(Some(e.into_io())),
    });
    reader
}

fn pack_into(fs: &dyn FileSystem, files: &[File], w: &mut dyn Write) -> Result<()> {
    let mut builder = tar::Builder::new(w);
    for f in files {
        let path = f.path();
        let name = path.trim_start_matches('/').to_string();

        let mut header = tar::Header::new_gnu();
        header.set_mode(f.perm());
        header.set_uid(f.uid as u64);
        header.set_gid(f.gid as u64);
        header.set_mtime(f.mtime.timestamp().max(0) as u64);

        if f.is_symlink() {
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_size(0);
            let target = fs.read_link(Path::new(&path))?;
            builder.append_link(&mut header, &name, &target)?;
        } else if f.is_dir() {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
            builder.append_data(&mut header, &name, io::empty())?;
        } else {
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(f.size);
            let reader = fs.open_read(Path::new(&path))?;
            // Cap at the stat'd size in case the file grew mid-backup.
            builder.append_data(&mut header, &name, reader.take(f.size))?;
        }
    }
    builder.finish()?;
    Ok(())
}

/// Restore a directory from manifest metadata alone (directories occupy no
/// bytes in any archive).
pub fn restore_dir(fs: &dyn FileSystem, parent: &Path, entry: &File) -> Result<()> {
    if !entry.is_dir() {
        return Err(CofferError::Archive(
            "can only restore dirs from file header data".into(),
        ));
    }
    let path = parent.join(&entry.name);
    debug!(path = %path.display(), mode = entry.perm(), "restore: dir");
    fs.mkdir(&path, entry.perm())?;
    fs.lchown(&path, entry.uid, entry.gid)?;
    fs.set_times(&path, entry.mtime, entry.mtime)?;
    Ok(())
}

/// Unpack an archive stream into `root`.
///
/// When `only` is given, entries not in the filter set (keyed by full path)
/// are skipped. Archives written by old versions carry bare filenames; for
/// those, a common parent is inferred from the filter set, which is only
/// sound when every selected file shares one root.
pub fn unpack<R: Read>(
    fs: &dyn FileSystem,
    root: &Path,
    tarball: R,
    only: Option<&HashMap<String, File>>,
) -> Result<()> {
    let mut subdir: Option<String> = None;
    let mut archive = tar::Archive::new(tarball);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let raw_name = entry.path()?.to_string_lossy().into_owned();

        // Entry names with directory components are full paths; the pack
        // side dropped their leading slash.
        let mut name = if raw_name.contains('/') {
            format!("/{}", raw_name.trim_start_matches('/'))
        } else {
            raw_name
        };

        if let Some(only) = only {
            if !name.starts_with('/') {
                if subdir.is_none() {
                    debug!("unpack: old-style archive detected");
                    for f in only.values() {
                        match &subdir {
                            None => subdir = Some(f.root.clone()),
                            Some(prev) if *prev != f.root => {
                                return Err(CofferError::Archive(
                                    "archive shouldn't contain files from different roots".into(),
                                ));
                            }
                            Some(_) => {}
                        }
                    }
                }
                if let Some(dir) = &subdir {
                    name = Path::new(dir).join(&name).to_string_lossy().into_owned();
                }
            }

            if !only.contains_key(&name) {
                debug!(name = %name, "unpack: skipping file, not selected");
                continue;
            }
        }

        let header = entry.header();
        let mode = header.mode()? & 0o7777;
        let uid = header.uid()? as u32;
        let gid = header.gid()? as u32;
        let mtime = chrono::DateTime::from_timestamp(header.mtime()? as i64, 0)
            .unwrap_or_default();
        let entry_type = header.entry_type();

        let path = join_under(root, &name);
        if let Some(parent) = path.parent() {
            fs.mkdir_all(parent)?;
        }

        if fs.lstat(&path).is_ok() {
            debug!(path = %path.display(), "unpack: skipping, already exists");
            continue;
        }

        match entry_type {
            tar::EntryType::Directory => {
                debug!(path = %path.display(), mode, "unpack: dir");
                fs.mkdir(&path, mode)?;
            }
            tar::EntryType::Symlink => {
                let target = entry
                    .link_name()?
                    .ok_or_else(|| CofferError::Archive("symlink entry without target".into()))?
                    .to_string_lossy()
                    .into_owned();
                debug!(path = %path.display(), target = %target, "unpack: symlink");
                fs.symlink(&target, &path)?;
            }
            _ => {
                let mut writer = fs.open_write(&path, mode)?;
                let written = io::copy(&mut entry, &mut writer)?;
                debug!(path = %path.display(), mode, written, "unpack: file");
            }
        }

        if let Err(e) = fs.lchown(&path, uid, gid) {
            warn!(path = %path.display(), error = %e, "unpack: chown failed");
        }
        if let Err(e) = fs.set_times(&path, mtime, mtime) {
            warn!(path = %path.display(), error = %e, "unpack: chtimes failed");
        }
    }

    Ok(())
}
