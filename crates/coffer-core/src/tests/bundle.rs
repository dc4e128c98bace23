use crate::backup::bundle::{
    bundle_by_path_and_size, bundle_small_files_across_paths, key_factory, manifest_key,
    BUNDLE_LIMIT_SIZE, BUNDLE_MAX_SIZE,
};
use crate::file::File;
use crate::testutil::{self, mock_dir, mock_file_in, mock_file_sized};

fn bundle_bytes(bundle: &[File]) -> u64 {
    bundle.iter().map(|f| f.size).sum()
}

#[test]
fn small_files_pack_under_the_running_size_cap() {
    let mut rng = testutil::rng(31);
    let files: Vec<File> = (0..30)
        .map(|_| mock_file_sized(&mut rng, 50_000))
        .collect();

    let bundles = bundle_small_files_across_paths(files);
    assert_eq!(bundles.len(), 2);
    assert_eq!(bundles[0].len() + bundles[1].len(), 30);
    // The cap is checked before adding the next file, so a bundle may
    // exceed it by at most one file's worth.
    for bundle in &bundles {
        assert!(bundle_bytes(bundle) <= BUNDLE_MAX_SIZE + 50_000);
    }
}

#[test]
fn big_files_get_their_own_bundles() {
    let mut rng = testutil::rng(37);
    let files = vec![
        mock_file_sized(&mut rng, 10),
        mock_file_sized(&mut rng, BUNDLE_LIMIT_SIZE + 1),
        mock_file_sized(&mut rng, BUNDLE_LIMIT_SIZE * 4),
        mock_file_sized(&mut rng, 20),
    ];

    let bundles = bundle_small_files_across_paths(files);
    assert_eq!(bundles.len(), 3);
    assert_eq!(bundles[0].len(), 2, "small files share a bundle");
    assert_eq!(bundles[1].len(), 1);
    assert_eq!(bundles[2].len(), 1);
    assert!(bundles[1][0].size > BUNDLE_LIMIT_SIZE);
    assert!(bundles[2][0].size > BUNDLE_LIMIT_SIZE);
}

#[test]
fn a_file_at_the_limit_is_still_small() {
    let mut rng = testutil::rng(41);
    let files = vec![
        mock_file_sized(&mut rng, BUNDLE_LIMIT_SIZE),
        mock_file_sized(&mut rng, 10),
    ];
    let bundles = bundle_small_files_across_paths(files);
    assert_eq!(bundles.len(), 1);
    assert_eq!(bundles[0].len(), 2);
}

#[test]
fn directories_form_the_terminal_bundle() {
    let mut rng = testutil::rng(43);
    let files = vec![
        mock_dir(&mut rng),
        mock_file_sized(&mut rng, 100),
        mock_dir(&mut rng),
        mock_file_sized(&mut rng, BUNDLE_LIMIT_SIZE * 2),
    ];

    let bundles = bundle_small_files_across_paths(files);
    assert_eq!(bundles.len(), 3);
    let last = bundles.last().unwrap();
    assert_eq!(last.len(), 2);
    assert!(last.iter().all(File::is_dir));
}

#[test]
fn empty_input_produces_no_bundles() {
    assert!(bundle_small_files_across_paths(Vec::new()).is_empty());
    assert!(bundle_by_path_and_size(Vec::new()).is_empty());
}

#[test]
fn bundles_are_sorted_by_path() {
    let mut rng = testutil::rng(47);
    let files = vec![
        mock_file_in(&mut rng, "/b"),
        mock_file_in(&mut rng, "/a"),
        mock_file_in(&mut rng, "/c"),
        mock_file_in(&mut rng, "/a"),
    ];

    let bundles = bundle_small_files_across_paths(files);
    assert_eq!(bundles.len(), 1);
    let roots: Vec<&str> = bundles[0].iter().map(|f| f.root.as_str()).collect();
    let mut sorted = roots.clone();
    sorted.sort();
    assert_eq!(roots, sorted);
}

#[test]
fn legacy_strategy_cuts_on_distinct_roots() {
    let mut rng = testutil::rng(53);
    let files = vec![
        mock_file_in(&mut rng, "/b"),
        mock_file_in(&mut rng, "/a"),
        mock_file_in(&mut rng, "/a"),
    ];

    let bundles = bundle_by_path_and_size(files);
    assert_eq!(bundles.len(), 2);
    assert_eq!(bundles[0].len(), 2);
    assert!(bundles[0].iter().all(|f| f.root == "/a"));
    assert_eq!(bundles[1].len(), 1);
    assert_eq!(bundles[1][0].root, "/b");
}

// -- keys -------------------------------------------------------------------

#[test]
fn key_factory_yields_dense_zero_padded_hex() {
    let mut next = key_factory(5);
    assert_eq!(next(), "0");
    assert_eq!(next(), "1");

    let mut next = key_factory(16);
    assert_eq!(next(), "00");
    assert_eq!(next(), "01");

    let mut next = key_factory(300);
    let keys: Vec<String> = (0..300).map(|_| next()).collect();
    assert!(keys.iter().all(|k| k.len() == 3));
    assert_eq!(keys[255], "0ff");
    assert_eq!(keys[299], "12b");
}

#[test]
fn manifest_keys_sort_chronologically() {
    let t1 = chrono::DateTime::from_timestamp(1_700_000_000, 123).unwrap();
    let t2 = chrono::DateTime::from_timestamp(1_700_000_000, 124).unwrap();
    let t3 = chrono::DateTime::from_timestamp(1_900_000_001, 0).unwrap();

    let (k1, k2, k3) = (manifest_key(t1), manifest_key(t2), manifest_key(t3));
    assert_eq!(k1.len(), 16);
    assert!(k1 < k2 && k2 < k3, "hex-lex order equals time order");
}
