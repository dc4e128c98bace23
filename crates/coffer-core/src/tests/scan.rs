use std::collections::HashSet;
use std::path::Path;

use crate::file::scan::{scan_file, PathScanner};
use crate::file::sort_by_path;
use crate::file::fs::OsFileSystem;

fn build_tree(root: &Path) {
    std::fs::create_dir_all(root.join("docs/archive")).unwrap();
    std::fs::create_dir_all(root.join("code")).unwrap();
    std::fs::write(root.join("docs/a.txt"), b"aaa").unwrap();
    std::fs::write(root.join("docs/archive/old.txt"), b"old").unwrap();
    std::fs::write(root.join("code/main.rs"), b"fn main() {}").unwrap();
    std::os::unix::fs::symlink("docs/a.txt", root.join("link")).unwrap();
}

fn names(files: &[crate::file::File]) -> HashSet<String> {
    files.iter().map(|f| f.name.clone()).collect()
}

#[test]
fn scan_walks_recursively() {
    let dir = tempfile::tempdir().unwrap();
    build_tree(dir.path());

    let scanner = PathScanner::new().include_path(dir.path()).unwrap();
    let files = scanner.scan().unwrap();

    // Root dir itself + 3 dirs + 3 files + 1 symlink.
    assert_eq!(files.len(), 8);
    let found = names(&files);
    for expected in ["docs", "archive", "code", "a.txt", "old.txt", "main.rs", "link"] {
        assert!(found.contains(expected), "missing {expected}");
    }
}

#[test]
fn scan_does_not_follow_symlinks() {
    let dir = tempfile::tempdir().unwrap();
    build_tree(dir.path());

    let scanner = PathScanner::new().include_path(dir.path()).unwrap();
    let files = scanner.scan().unwrap();

    let link = files.iter().find(|f| f.name == "link").unwrap();
    assert!(link.is_symlink());
    assert_eq!(link.size, "docs/a.txt".len() as u64);
}

#[test]
fn excluded_directories_are_not_descended() {
    let dir = tempfile::tempdir().unwrap();
    build_tree(dir.path());

    let scanner = PathScanner::new()
        .exclude_path(&dir.path().join("docs/archive"))
        .include_path(dir.path())
        .unwrap();
    let files = scanner.scan().unwrap();

    let found = names(&files);
    assert!(!found.contains("archive"), "excluded dir not emitted");
    assert!(!found.contains("old.txt"), "excluded contents not walked");
    assert!(found.contains("a.txt"));
}

#[test]
fn excluded_files_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    build_tree(dir.path());

    let scanner = PathScanner::new()
        .exclude_path(&dir.path().join("docs/a.txt"))
        .include_path(dir.path())
        .unwrap();
    let found = names(&scanner.scan().unwrap());
    assert!(!found.contains("a.txt"));
    assert!(found.contains("old.txt"));
}

#[test]
fn scan_relative_rewrites_roots() {
    let dir = tempfile::tempdir().unwrap();
    build_tree(dir.path());

    let scanner = PathScanner::new().include_path(dir.path()).unwrap();
    let mut files = scanner.scan_relative_to(dir.path()).unwrap();
    sort_by_path(&mut files);

    // The included root itself is outside the new root and dropped.
    assert_eq!(files.len(), 7);
    for f in &files {
        assert!(f.root.starts_with('/'), "virtual absolute root: {}", f.root);
        assert!(!f.root.contains("tmp"), "no real prefix leaks: {}", f.root);
    }
    let a = files.iter().find(|f| f.name == "a.txt").unwrap();
    assert_eq!(a.root, "/docs");
    assert_eq!(a.path(), "/docs/a.txt");
}

#[test]
fn scan_file_stats_a_single_path() {
    let dir = tempfile::tempdir().unwrap();
    build_tree(dir.path());

    let fs = OsFileSystem;
    let f = scan_file(&fs, &dir.path().join("docs/a.txt")).unwrap();
    assert_eq!(f.name, "a.txt");
    assert_eq!(f.size, 3);
    assert!(f.is_regular());
    assert!(!f.has_checksum());
}

#[test]
fn scan_emits_stat_metadata() {
    let dir = tempfile::tempdir().unwrap();
    build_tree(dir.path());

    let scanner = PathScanner::new().include_path(dir.path()).unwrap();
    let files = scanner.scan().unwrap();
    let main_rs = files.iter().find(|f| f.name == "main.rs").unwrap();

    assert_eq!(main_rs.size, 12);
    assert!(main_rs.is_regular());
    assert!(main_rs.mtime.timestamp() > 0);
    assert!(!main_rs.is_dir());
}
