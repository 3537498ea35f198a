//! Gallery entity: listing of the open image's directory
//!
//! The gallery lists one directory, non-recursively: subdirectories first, then
//! image files, both in name order. A `notify` watcher on the directory feeds a
//! debounced re-list, so external changes show up without blocking anything.
//! Each file item carries a lazily refreshed metadata snapshot backed by an
//! mtime-keyed cache; the cache lives for as long as the gallery stays on the
//! same directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, SystemTime};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::error::{Entity, Error, Result};
use crate::store::{Atom, Store};
use crate::tasks::TaskChain;
use crate::types::{FileMetadata, MetadataService};

/// Quiet period after the last filesystem event before re-listing.
const DEBOUNCE: Duration = Duration::from_millis(500);

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg"];

struct CacheEntry {
    mtime: SystemTime,
    metadata: FileMetadata,
}

/// Shared context handed to every gallery item.
#[derive(Clone)]
struct GalleryCtx {
    store: Store,
    cache: Arc<Mutex<HashMap<PathBuf, CacheEntry>>>,
    service: Arc<dyn MetadataService>,
}

impl GalleryCtx {
    fn cache(&self) -> MutexGuard<'_, HashMap<PathBuf, CacheEntry>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One gallery row: a subdirectory or an image file.
#[derive(Clone)]
pub struct GalleryItem {
    ctx: GalleryCtx,
    name: String,
    path: PathBuf,
    is_directory: bool,
    metadata: Atom<Option<FileMetadata>>,
    refreshing: Arc<AtomicBool>,
}

impl std::fmt::Debug for GalleryItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GalleryItem")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("is_directory", &self.is_directory)
            .finish_non_exhaustive()
    }
}

/// Listing identity; the metadata snapshot is incidental state.
impl PartialEq for GalleryItem {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.path == other.path
            && self.is_directory == other.is_directory
    }
}

impl GalleryItem {
    fn new(ctx: &GalleryCtx, name: String, path: PathBuf, is_directory: bool) -> Self {
        let seeded = ctx.cache().get(&path).map(|entry| entry.metadata.clone());
        Self {
            ctx: ctx.clone(),
            metadata: ctx.store.atom(seeded),
            refreshing: Arc::new(AtomicBool::new(false)),
            name,
            path,
            is_directory,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_directory(&self) -> bool {
        self.is_directory
    }

    pub fn metadata_atom(&self) -> Atom<Option<FileMetadata>> {
        self.metadata
    }

    /// Current metadata snapshot, possibly stale or absent.
    ///
    /// Accessing it kicks off a background freshness check: the file's mtime is
    /// compared against the cache and the metadata re-read when it moved. The
    /// accessor itself never blocks; observers see the refreshed value through
    /// the item's atom. At most one refresh per item is in flight.
    pub fn metadata(&self) -> Option<FileMetadata> {
        if !self.is_directory {
            self.spawn_refresh();
        }
        self.ctx.store.get(&self.metadata)
    }

    fn spawn_refresh(&self) {
        if self.refreshing.swap(true, Ordering::SeqCst) {
            return;
        }
        let item = self.clone();
        tokio::spawn(async move {
            if let Err(e) = item.refresh().await {
                tracing::warn!(
                    path = %item.path.display(),
                    error = %e,
                    "gallery metadata refresh failed"
                );
            }
            item.refreshing.store(false, Ordering::SeqCst);
        });
    }

    async fn refresh(&self) -> Result<()> {
        let stat = tokio::fs::metadata(&self.path).await?;
        let mtime = stat.modified()?;

        let cached = self
            .ctx
            .cache()
            .get(&self.path)
            .filter(|entry| entry.mtime == mtime)
            .map(|entry| entry.metadata.clone());

        let metadata = match cached {
            Some(metadata) => metadata,
            None => {
                let metadata = self.ctx.service.read(&self.path).await?;
                self.ctx.cache().insert(
                    self.path.clone(),
                    CacheEntry {
                        mtime,
                        metadata: metadata.clone(),
                    },
                );
                metadata
            }
        };

        self.ctx.store.set(&self.metadata, Some(metadata))?;
        Ok(())
    }
}

struct WatchSession {
    path: PathBuf,
    _watcher: RecommendedWatcher,
    debounce: tokio::task::JoinHandle<()>,
}

impl Drop for WatchSession {
    fn drop(&mut self) {
        self.debounce.abort();
    }
}

/// Directory listing entity. Construct via [`Gallery::new`] and hold in an
/// `Arc`; the watcher keeps only a weak reference back.
pub struct Gallery {
    ctx: GalleryCtx,
    chain: TaskChain,
    busy: Atom<bool>,
    directory: Atom<Option<PathBuf>>,
    items: Atom<Vec<GalleryItem>>,
    watch: Mutex<Option<WatchSession>>,
}

impl Gallery {
    pub fn new(store: &Store, service: Arc<dyn MetadataService>) -> Arc<Self> {
        let busy = store.atom(false);
        Arc::new(Self {
            ctx: GalleryCtx {
                store: store.clone(),
                cache: Arc::new(Mutex::new(HashMap::new())),
                service,
            },
            chain: TaskChain::new(store.clone(), busy, Entity::Gallery),
            busy,
            directory: store.atom(None),
            items: store.atom(Vec::new()),
            watch: Mutex::new(None),
        })
    }

    pub fn busy(&self) -> Atom<bool> {
        self.busy
    }

    pub fn items_atom(&self) -> Atom<Vec<GalleryItem>> {
        self.items
    }

    pub fn items(&self) -> Vec<GalleryItem> {
        self.ctx.store.get(&self.items)
    }

    pub fn current_directory(&self) -> Option<PathBuf> {
        self.ctx.store.get(&self.directory)
    }

    /// Point the gallery at `path`: list it, replace the items, and watch it.
    ///
    /// The listing runs under the gallery's chain, so rapid successive calls
    /// leave only the most recent directory's contents visible. The metadata
    /// cache survives re-lists of the same directory and is dropped when the
    /// directory changes.
    pub async fn set_directory(self: &Arc<Self>, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        let canonical = tokio::fs::canonicalize(&path)
            .await
            .map_err(|e| Error::from(e).for_entity(Entity::Gallery))?;
        tracing::debug!(directory = %canonical.display(), "listing gallery directory");

        let work = {
            let dir = canonical.clone();
            async move { list_directory(&dir).await }
        };

        let ctx = self.ctx.clone();
        let directory = self.directory;
        let items_atom = self.items;
        let dir = canonical.clone();
        self.chain
            .run(work, move |outcome| {
                let listing = outcome?;
                let changed = ctx.store.get(&directory) != Some(dir.clone());
                if changed {
                    ctx.cache().clear();
                }
                ctx.store.transaction(|| {
                    ctx.store.set(&directory, Some(dir))?;
                    let items: Vec<GalleryItem> = listing
                        .into_iter()
                        .map(|(name, path, is_directory)| {
                            GalleryItem::new(&ctx, name, path, is_directory)
                        })
                        .collect();
                    ctx.store.set(&items_atom, items)?;
                    Ok(())
                })
            })
            .await?;

        // A superseded call must not replace the newer call's watcher.
        if self.current_directory().as_deref() == Some(canonical.as_path()) {
            self.install_watch(canonical)?;
        }
        Ok(())
    }

    /// Watch the directory, re-listing after events go quiet for [`DEBOUNCE`].
    ///
    /// Only one watch session is active at a time. Re-listing the already
    /// watched directory keeps the existing session (the debounce task calls
    /// back into `set_directory` and must not tear itself down).
    fn install_watch(self: &Arc<Self>, path: PathBuf) -> Result<()> {
        let mut guard = self.watch.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.as_ref().map(|session| session.path.as_path()) == Some(path.as_path()) {
            return Ok(());
        }
        *guard = None;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher =
            notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
                if event.is_ok() {
                    let _ = tx.send(());
                }
            })?;
        watcher.watch(&path, RecursiveMode::NonRecursive)?;

        let weak: Weak<Gallery> = Arc::downgrade(self);
        let dir = path.clone();
        let debounce = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                // Swallow the burst: wait until no event arrives for DEBOUNCE
                loop {
                    match tokio::time::timeout(DEBOUNCE, rx.recv()).await {
                        Ok(Some(())) => continue,
                        Ok(None) => return,
                        Err(_) => break,
                    }
                }
                let Some(gallery) = weak.upgrade() else {
                    return;
                };
                tracing::debug!(directory = %dir.display(), "directory changed, re-listing");
                if let Err(e) = gallery.set_directory(dir.clone()).await {
                    tracing::warn!(
                        directory = %dir.display(),
                        error = %e,
                        "gallery re-list after change failed"
                    );
                }
            }
        });

        *guard = Some(WatchSession {
            path,
            _watcher: watcher,
            debounce,
        });
        Ok(())
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

/// List `dir`: subdirectories and image files only, directories first, each
/// group in name order.
async fn list_directory(dir: &Path) -> Result<Vec<(String, PathBuf, bool)>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut listing: Vec<(String, PathBuf, bool)> = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let file_type = entry.file_type().await?;
        let path = entry.path();
        let is_directory = file_type.is_dir();
        if !is_directory && !is_image(&path) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        listing.push((name, path, is_directory));
    }
    listing.sort_by(|a, b| {
        b.2.cmp(&a.2)
            .then_with(|| a.0.to_lowercase().cmp(&b.0.to_lowercase()))
    });
    Ok(listing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_extension_matching() {
        assert!(is_image(Path::new("a.jpg")));
        assert!(is_image(Path::new("a.JPG")));
        assert!(is_image(Path::new("a.Jpeg")));
        assert!(!is_image(Path::new("a.png")));
        assert!(!is_image(Path::new("jpg")));
    }

    #[test]
    fn test_item_equality_ignores_metadata_state() {
        let store = Store::new();
        let ctx = GalleryCtx {
            store: store.clone(),
            cache: Arc::new(Mutex::new(HashMap::new())),
            service: Arc::new(NoMetadata),
        };
        let a = GalleryItem::new(&ctx, "a.jpg".into(), "/g/a.jpg".into(), false);
        let b = GalleryItem::new(&ctx, "a.jpg".into(), "/g/a.jpg".into(), false);
        store
            .set(&a.metadata_atom(), Some(FileMetadata::new()))
            .unwrap();
        assert_eq!(a, b);
    }

    struct NoMetadata;

    #[async_trait::async_trait]
    impl MetadataService for NoMetadata {
        async fn read(&self, _path: &Path) -> Result<FileMetadata> {
            Ok(FileMetadata::new())
        }
    }
}
