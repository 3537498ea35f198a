//! Gallery integration tests: directory listing, the filesystem watcher, and
//! the mtime-keyed metadata cache, against a real temporary directory.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use picmeta::error::Result;
use picmeta::gallery::Gallery;
use picmeta::store::Store;
use picmeta::types::{FileMetadata, MetadataService, MetadataValue};

/// Metadata source that reports the file name as the title and counts reads.
struct CountingReader {
    reads: AtomicUsize,
}

impl CountingReader {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            reads: AtomicUsize::new(0),
        })
    }

    fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl MetadataService for CountingReader {
    async fn read(&self, path: &Path) -> Result<FileMetadata> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let mut values = FileMetadata::new();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        values.insert("title".into(), MetadataValue::Single(name));
        Ok(values)
    }
}

fn populate(dir: &TempDir) {
    std::fs::create_dir(dir.path().join("sub")).unwrap();
    std::fs::write(dir.path().join("a.jpg"), b"a").unwrap();
    std::fs::write(dir.path().join("b.JPG"), b"b").unwrap();
    std::fs::write(dir.path().join("note.txt"), b"n").unwrap();
}

async fn wait_until(mut check: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    check()
}

#[tokio::test]
async fn test_listing_filters_and_orders() {
    let dir = TempDir::new().unwrap();
    populate(&dir);

    let store = Store::new();
    let gallery = Gallery::new(&store, CountingReader::new());
    gallery.set_directory(dir.path()).await.unwrap();

    let items = gallery.items();
    let names: Vec<&str> = items.iter().map(|item| item.name()).collect();
    // Directories first, then image files by name; non-images dropped
    assert_eq!(names, vec!["sub", "a.jpg", "b.JPG"]);
    assert!(items[0].is_directory());
    assert!(!store.get(&gallery.busy()));
}

#[tokio::test]
async fn test_watcher_relists_after_external_delete() {
    let dir = TempDir::new().unwrap();
    populate(&dir);

    let store = Store::new();
    let gallery = Gallery::new(&store, CountingReader::new());
    gallery.set_directory(dir.path()).await.unwrap();
    assert_eq!(gallery.items().len(), 3);

    std::fs::remove_file(dir.path().join("b.JPG")).unwrap();

    // The debounce holds re-listing for 500ms after the last event
    let updated = wait_until(
        || gallery.items().len() == 2,
        Duration::from_secs(5),
    )
    .await;
    assert!(updated, "gallery did not re-list after external delete");
    let names: Vec<String> = gallery
        .items()
        .iter()
        .map(|item| item.name().to_string())
        .collect();
    assert_eq!(names, vec!["sub", "a.jpg"]);
}

#[tokio::test]
async fn test_metadata_cache_reads_once_until_mtime_moves() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.jpg"), b"v1").unwrap();

    let store = Store::new();
    let reader = CountingReader::new();
    let gallery = Gallery::new(&store, reader.clone());
    gallery.set_directory(dir.path()).await.unwrap();

    let item = gallery.items().into_iter().next().unwrap();

    // First access: nothing cached yet, the accessor itself does not block
    assert_eq!(item.metadata(), None);
    let loaded = wait_until(|| item.metadata().is_some(), Duration::from_secs(5)).await;
    assert!(loaded, "background refresh never produced metadata");

    // Repeated accesses with an unchanged mtime serve the cache
    for _ in 0..5 {
        assert!(item.metadata().is_some());
        tokio::time::sleep(Duration::from_millis(30)).await;
    }
    assert_eq!(reader.read_count(), 1);

    // Move the mtime; the next access refreshes in the background
    tokio::time::sleep(Duration::from_millis(1100)).await;
    std::fs::write(dir.path().join("a.jpg"), b"v2 rewritten").unwrap();
    let refreshed = wait_until(
        || {
            item.metadata();
            reader.read_count() == 2
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(refreshed, "stale cache entry was not refreshed");
}

#[tokio::test]
async fn test_cache_survives_relist_of_same_directory() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.jpg"), b"a").unwrap();

    let store = Store::new();
    let reader = CountingReader::new();
    let gallery = Gallery::new(&store, reader.clone());
    gallery.set_directory(dir.path()).await.unwrap();

    let item = gallery.items().into_iter().next().unwrap();
    item.metadata();
    assert!(wait_until(|| item.metadata().is_some(), Duration::from_secs(5)).await);
    assert_eq!(reader.read_count(), 1);

    // Re-list the same directory: the new item is seeded from the cache
    gallery.set_directory(dir.path()).await.unwrap();
    let item = gallery.items().into_iter().next().unwrap();
    assert!(item.metadata().is_some());
}

#[tokio::test]
async fn test_missing_directory_fails_with_gallery_entity() {
    let dir = TempDir::new().unwrap();
    let store = Store::new();
    let gallery = Gallery::new(&store, CountingReader::new());

    let err = gallery
        .set_directory(dir.path().join("nope"))
        .await
        .unwrap_err();
    assert_eq!(err.entity(), Some(picmeta::error::Entity::Gallery));
    assert!(gallery.items().is_empty());
}
