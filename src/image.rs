//! Image entity: the single currently-open image
//!
//! The entity is just an observable path. Everything that happens when an image
//! is opened (persisting the last file, loading metadata, re-pointing the
//! gallery) hangs off subscriptions to this atom rather than living here.

use std::path::PathBuf;

use crate::error::Result;
use crate::store::{Atom, Store};

/// Currently selected image file.
#[derive(Clone)]
pub struct Image {
    store: Store,
    path: Atom<Option<PathBuf>>,
}

impl Image {
    pub fn new(store: &Store) -> Self {
        Self {
            store: store.clone(),
            path: store.atom(None),
        }
    }

    /// Observable path atom, for subscriptions.
    pub fn path(&self) -> Atom<Option<PathBuf>> {
        self.path
    }

    /// Current path snapshot.
    pub fn current_path(&self) -> Option<PathBuf> {
        self.store.get(&self.path)
    }

    /// Select `path` as the open image.
    pub fn load(&self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        tracing::info!(path = %path.display(), "opening image");
        self.store.set(&self.path, Some(path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_load_sets_path_and_notifies() {
        let store = Store::new();
        let image = Image::new(&store);
        assert_eq!(image.current_path(), None);

        let fired = Arc::new(AtomicU32::new(0));
        let observed = fired.clone();
        let _sub = store.subscribe(&image.path(), move || {
            observed.fetch_add(1, Ordering::SeqCst);
        });

        image.load("/photos/a.jpg").unwrap();
        assert_eq!(image.current_path(), Some(PathBuf::from("/photos/a.jpg")));
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Re-selecting the same path is a no-op
        image.load("/photos/a.jpg").unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
