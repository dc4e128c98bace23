use std::io::Read;
use std::path::Path;

use sha1::{Digest, Sha1};
use tracing::{debug, info};

use crate::error::Result;
use crate::file::fs::FileSystem;
use crate::file::{File, SHA1_SIZE};

/// SHA-1 of a regular file's contents. Returns the digest and bytes read.
pub fn checksum_file(fs: &dyn FileSystem, path: &Path) -> Result<([u8; SHA1_SIZE], u64)> {
    let mut reader = fs.open_read(path)?;
    let mut hasher = Sha1::new();
    let mut buf = [0u8; 64 * 1024];
    let mut length = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        length += n as u64;
    }
    Ok((hasher.finalize().into(), length))
}

/// SHA-1 of a symlink's raw target string.
pub fn checksum_symlink(fs: &dyn FileSystem, path: &Path) -> Result<([u8; SHA1_SIZE], u64)> {
    let target = fs.read_link(path)?;
    let digest = Sha1::digest(target.as_bytes());
    Ok((digest.into(), target.len() as u64))
}

/// Populate missing checksums across one or more groups of files.
///
/// Only regular files and symlinks are hashed; entries that already carry a
/// checksum are left alone. Groups are processed sequentially; each entry
/// has exactly one writer.
pub fn checksum_files(fs: &dyn FileSystem, groups: &mut [&mut [File]]) -> Result<()> {
    let total: usize = groups
        .iter()
        .flat_map(|g| g.iter())
        .filter(|f| (f.is_regular() || f.is_symlink()) && !f.has_checksum())
        .count();
    if total == 0 {
        return Ok(());
    }
    debug!(files = total, "check: calculating hashes");

    let mut done_files = 0usize;
    let mut done_bytes = 0u64;
    for group in groups.iter_mut() {
        for f in group.iter_mut() {
            if f.has_checksum() {
                continue;
            }
            let (hash, length) = if f.is_regular() {
                checksum_file(fs, Path::new(&f.path()))?
            } else if f.is_symlink() {
                checksum_symlink(fs, Path::new(&f.path()))?
            } else {
                continue;
            };
            f.sha1 = Some(hash);
            done_files += 1;
            done_bytes += length;
        }
    }

    info!(files = done_files, bytes = done_bytes, "check: done");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::fs::OsFileSystem;
    use crate::file::scan::scan_file;

    #[test]
    fn checksum_matches_known_sha1() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fox.txt");
        std::fs::write(&path, b"The quick brown fox jumps over the lazy dog").unwrap();

        let fs = OsFileSystem;
        let (digest, length) = checksum_file(&fs, &path).unwrap();
        assert_eq!(length, 43);
        assert_eq!(
            digest,
            [
                0x2f, 0xd4, 0xe1, 0xc6, 0x7a, 0x2d, 0x28, 0xfc, 0xed, 0x84, 0x9e, 0xe1, 0xbb,
                0x76, 0xe7, 0x39, 0x1b, 0x93, 0xeb, 0x12,
            ]
        );
    }

    #[test]
    fn checksum_pass_fills_only_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a"), b"aaa").unwrap();
        std::fs::write(dir.path().join("b"), b"bbb").unwrap();

        let fs = OsFileSystem;
        let mut a = scan_file(&fs, &dir.path().join("a")).unwrap();
        let mut b = scan_file(&fs, &dir.path().join("b")).unwrap();
        let sentinel = [0xEE; SHA1_SIZE];
        a.sha1 = Some(sentinel);

        let mut group = [a, b.clone()];
        checksum_files(&fs, &mut [group.as_mut_slice()]).unwrap();
        assert_eq!(group[0].sha1, Some(sentinel), "existing checksum kept");
        assert!(group[1].has_checksum(), "missing checksum filled");

        b.sha1 = group[1].sha1;
        assert_eq!(b.sha1, Some(Sha1::digest(b"bbb").into()));
    }

    #[test]
    fn checksum_of_symlink_hashes_target_string() {
        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink("some/target", dir.path().join("ln")).unwrap();

        let fs = OsFileSystem;
        let (digest, length) = checksum_symlink(&fs, &dir.path().join("ln")).unwrap();
        assert_eq!(length, 11);
        assert_eq!(digest, <[u8; 20]>::from(Sha1::digest(b"some/target")));
    }
}
