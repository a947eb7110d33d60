//! Search integration tests: ranking, dedup, lazy pruning and removal.

mod common;

use std::collections::HashSet;
use std::fs;

use common::Fixture;
use pixseek::{CaptionBatch, DocumentMetadata, IndexEvent, IngestSource, SEARCH_K};

#[test]
fn test_search_on_fresh_index_is_empty() {
    let fx = Fixture::new();
    let searcher = fx.searcher();

    assert!(searcher.search("anything at all").unwrap().is_empty());
    assert!(!fx.index_path().exists(), "search must not create the index");
}

#[test]
fn test_search_never_repeats_a_path() {
    let fx = Fixture::new();
    let searcher = fx.searcher();
    for name in ["red_apple.png", "green_apple.png", "apple_tree.png", "car.png"] {
        fx.image(name);
    }
    searcher
        .ingest(fx.photos(), IngestSource::Foreground)
        .unwrap();

    let hits = searcher.search("apple photo").unwrap();
    let unique: HashSet<_> = hits.iter().collect();
    assert_eq!(unique.len(), hits.len());
    assert!(hits.len() <= 4);
    assert!(hits.contains(&fx.photos().join("red_apple.png")));
}

#[test]
fn test_search_ranks_best_match_first() {
    let fx = Fixture::new();
    let searcher = fx.searcher();
    fx.image("lighthouse_on_cliff.png");
    fx.image("city_traffic.png");
    searcher
        .ingest(fx.photos(), IngestSource::Foreground)
        .unwrap();

    let hits = searcher.search("lighthouse cliff").unwrap();
    assert_eq!(hits[0], fx.photos().join("lighthouse_on_cliff.png"));
}

#[test]
fn test_deleted_file_is_pruned_at_query_time() {
    let fx = Fixture::new();
    let searcher = fx.searcher();
    let events = searcher.subscribe();
    let kite = fx.image("kite.png");
    let keep = fx.image("kite_festival.png");
    searcher.ingest(&kite, IngestSource::Foreground).unwrap();
    searcher.ingest(&keep, IngestSource::Foreground).unwrap();

    fs::remove_file(&kite).unwrap();
    let hits = searcher.search("kite photo").unwrap();

    assert!(!hits.contains(&kite));
    assert!(hits.contains(&keep));
    assert!(searcher
        .store()
        .all_documents()
        .unwrap()
        .all(|d| d.path() != Some(kite.as_path())));
    assert_eq!(searcher.store().count_for_path(&keep).unwrap(), 7);

    assert!(events.drain().contains(&IndexEvent::Removed {
        path: kite,
        documents_removed: 7,
    }));
}

#[test]
fn test_documents_without_path_are_skipped() {
    let fx = Fixture::new();
    let searcher = fx.searcher();

    let mut orphans = CaptionBatch::new();
    orphans.captions.push("orphan caption about boats".into());
    orphans.metadata.push(DocumentMetadata::default());
    searcher.store().add(&orphans).unwrap();

    let boat = fx.image("boats.png");
    searcher.ingest(&boat, IngestSource::Foreground).unwrap();

    assert_eq!(searcher.search("boats").unwrap(), vec![boat]);
}

#[test]
fn test_result_count_is_bounded() {
    let fx = Fixture::new();
    let searcher = fx.searcher();
    for i in 0..25 {
        fx.image(&format!("sample_{i:02}.png"));
    }
    searcher
        .ingest(fx.photos(), IngestSource::Foreground)
        .unwrap();

    let hits = searcher.search("sample photo").unwrap();
    assert!(!hits.is_empty());
    assert!(hits.len() <= SEARCH_K);
}

// ============================================================================
// Removal
// ============================================================================

#[test]
fn test_remove_deletes_all_seven_and_nothing_else() {
    let fx = Fixture::new();
    let searcher = fx.searcher();
    let a = fx.image("alpha.png");
    let b = fx.image("beta.png");
    searcher.ingest(&a, IngestSource::Foreground).unwrap();
    searcher.ingest(&b, IngestSource::Foreground).unwrap();

    assert_eq!(searcher.remove(&a).unwrap(), 7);
    assert_eq!(searcher.store().count_for_path(&a).unwrap(), 0);
    assert_eq!(searcher.store().count_for_path(&b).unwrap(), 7);
    assert!(!searcher.search("alpha").unwrap().contains(&a));
}

#[test]
fn test_remove_twice_equals_once() {
    let fx = Fixture::new();
    let searcher = fx.searcher();
    let a = fx.image("alpha.png");
    searcher.ingest(&a, IngestSource::Foreground).unwrap();

    assert_eq!(searcher.remove(&a).unwrap(), 7);
    assert_eq!(searcher.remove(&a).unwrap(), 0);
    assert_eq!(searcher.store().len().unwrap(), 0);
}

#[test]
fn test_remove_on_fresh_index_is_noop() {
    let fx = Fixture::new();
    let searcher = fx.searcher();
    assert_eq!(searcher.remove(fx.photos().join("ghost.png")).unwrap(), 0);
}
