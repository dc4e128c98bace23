use chrono::{DateTime, Utc};

use crate::file::{sort_by_path, sort_by_size, File};

/// Don't bundle files larger than this with others.
pub(crate) const BUNDLE_LIMIT_SIZE: u64 = 1000 << 6; // 64 KB
/// Running-size cap for a bundle of small files.
pub(crate) const BUNDLE_MAX_SIZE: u64 = 1000 << 10; // 1 MB

/// Create the initial bundle.
fn make_bundle(files: Vec<File>) -> Vec<Vec<File>> {
    if files.is_empty() {
        Vec::new()
    } else {
        vec![files]
    }
}

/// Sort each bundle by file size.
fn sort_bundles_by_size(mut bundles: Vec<Vec<File>>) -> Vec<Vec<File>> {
    for bundle in &mut bundles {
        sort_by_size(bundle);
    }
    bundles
}

/// Sort each bundle by path.
fn sort_bundles_by_path(mut bundles: Vec<Vec<File>>) -> Vec<Vec<File>> {
    for bundle in &mut bundles {
        sort_by_path(bundle);
    }
    bundles
}

/// Split each bundle on the size limit into three parts: small files
/// (at most the cutoff), large files, and directories.
fn split_bundles_by_size_limit(bundles: Vec<Vec<File>>) -> Vec<Vec<File>> {
    let mut out = Vec::new();
    for bundle in bundles {
        let mut small = Vec::new();
        let mut big = Vec::new();
        let mut dirs = Vec::new();
        for f in bundle {
            if f.is_dir() {
                dirs.push(f);
            } else if f.size > BUNDLE_LIMIT_SIZE {
                big.push(f);
            } else {
                small.push(f);
            }
        }
        out.push(small);
        out.push(big);
        out.push(dirs);
    }
    out
}

/// Bundle files with the same root together (sort by path first).
fn bundle_by_path(bundles: Vec<Vec<File>>) -> Vec<Vec<File>> {
    let mut out: Vec<Vec<File>> = Vec::new();
    let mut curr_root = String::new();
    let mut curr: Vec<File> = Vec::new();

    for bundle in bundles {
        for f in bundle {
            if f.root != curr_root {
                if !curr.is_empty() {
                    out.push(std::mem::take(&mut curr));
                }
                curr_root = f.root.clone();
            }
            curr.push(f);
        }
        if !curr.is_empty() {
            out.push(std::mem::take(&mut curr));
        }
    }
    out
}

/// Bundle small files together under a running-size cap. Files above the
/// size limit force a bundle break; directories never occupy bytes in a
/// bundle and are deferred to a terminal bundle of their own.
fn bundle_small_files(bundles: Vec<Vec<File>>) -> Vec<Vec<File>> {
    let mut out: Vec<Vec<File>> = Vec::new();
    let mut curr: Vec<File> = Vec::new();
    let mut curr_bytes = 0u64;
    let mut dir_bundle: Vec<File> = Vec::new();

    for bundle in bundles {
        for f in bundle {
            if f.is_dir() {
                dir_bundle.push(f);
                continue;
            }
            if f.size > BUNDLE_LIMIT_SIZE && !curr.is_empty() {
                out.push(std::mem::take(&mut curr));
                curr_bytes = 0;
            }
            if curr_bytes > BUNDLE_MAX_SIZE {
                out.push(std::mem::take(&mut curr));
                curr_bytes = 0;
            }
            curr_bytes += f.size;
            curr.push(f);
        }
        if !curr.is_empty() {
            out.push(std::mem::take(&mut curr));
            curr_bytes = 0;
        }
    }

    if !dir_bundle.is_empty() {
        out.push(dir_bundle);
    }
    out
}

/// Traditional bundling: group files into similar paths, then bundle by
/// size within each path. Retained for experimentation.
pub fn bundle_by_path_and_size(files: Vec<File>) -> Vec<Vec<File>> {
    bundle_small_files(sort_bundles_by_size(bundle_by_path(sort_bundles_by_path(
        make_bundle(files),
    ))))
}

/// Current bundling: split on the size cutoff first, then sort by path and
/// bundle up small files across paths.
pub fn bundle_small_files_across_paths(files: Vec<File>) -> Vec<Vec<File>> {
    bundle_small_files(sort_bundles_by_path(split_bundles_by_size_limit(
        make_bundle(files),
    )))
}

// ---------------------------------------------------------------------------
// Object keys
// ---------------------------------------------------------------------------

/// How many hexadecimal places we need for a number of size n.
fn hex_log(n: u64) -> usize {
    if n < 16 {
        1
    } else {
        1 + hex_log(n >> 4)
    }
}

/// Manifest-set key: fixed-width lowercase hex of wall-clock nanoseconds,
/// so lexicographic order equals chronological order.
pub(crate) fn manifest_key(t: DateTime<Utc>) -> String {
    format!("{:016x}", t.timestamp_nanos_opt().unwrap_or_default())
}

/// Yields dense keys "0", "1", ... as lowercase hex, zero-padded to the
/// minimum width that can express `count` keys.
pub(crate) fn key_factory(count: usize) -> impl FnMut() -> String {
    let width = hex_log(count as u64);
    let mut k = 0usize;
    move || {
        let key = format!("{k:0width$x}");
        k += 1;
        key
    }
}
