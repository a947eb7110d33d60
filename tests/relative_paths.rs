//! Relative path handling.
//!
//! This binary changes the process working directory, so it holds a single
//! test and nothing else runs concurrently with it.

mod common;

use std::env;
use std::fs;

use common::Fixture;
use pixseek::IngestSource;
use tempfile::tempdir;

#[test]
fn test_relative_paths_are_stored_absolute() {
    let original = env::current_dir().unwrap();
    let fx = Fixture::new();
    let searcher = fx.searcher();
    let cat = fx.image("cat.png");

    env::set_current_dir(fx.photos()).unwrap();
    let report = searcher.ingest("cat.png", IngestSource::Foreground).unwrap();
    assert_eq!(report.documents_added, 7);

    let stored: Vec<_> = searcher.store().all_paths().unwrap().into_iter().collect();
    assert_eq!(stored.len(), 1);
    assert!(stored[0].is_absolute(), "stored {}", stored[0].display());
    assert_eq!(
        fs::canonicalize(&stored[0]).unwrap(),
        fs::canonicalize(&cat).unwrap()
    );

    // Ingesting the same image by its absolute path replaces, not duplicates
    searcher.ingest(&stored[0], IngestSource::Foreground).unwrap();
    assert_eq!(searcher.store().len().unwrap(), 7);

    // Searching from elsewhere must not prune an image that still exists
    let elsewhere = tempdir().unwrap();
    env::set_current_dir(elsewhere.path()).unwrap();
    assert_eq!(searcher.search("cat photo").unwrap(), vec![stored[0].clone()]);
    assert_eq!(searcher.store().count_for_path(&stored[0]).unwrap(), 7);

    // Relative removal resolves the same way ingest did
    env::set_current_dir(fx.photos()).unwrap();
    assert_eq!(searcher.remove("cat.png").unwrap(), 7);
    assert!(searcher.store().is_empty().unwrap());

    env::set_current_dir(original).unwrap();
}
