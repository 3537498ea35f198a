//! picmeta: reactive core of a desktop IPTC keywording tool
//!
//! The crate is organized around a reactive [`store`] of observable atoms,
//! per-entity [`tasks::TaskChain`]s that keep async results arriving in issue
//! order, and a process-wide [`tasks::WorkQueue`] that bounds concurrent
//! external-tool invocations. The entities (`image`, `metadata`, `gallery`,
//! `keywording`, `search`) orchestrate the external collaborators in
//! `services` through trait seams defined in `types`.
//!
//! [`App`] wires everything together; the binary in `main.rs` is a thin
//! diagnostic shell over it.

pub mod config;
pub mod error;
pub mod gallery;
pub mod image;
pub mod keywording;
pub mod metadata;
pub mod search;
pub mod services;
pub mod store;
pub mod tasks;
pub mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::error;

use crate::config::{SettingsStore, SettingsUpdate};
use crate::error::Result;
use crate::gallery::Gallery;
use crate::image::Image;
use crate::keywording::Keywording;
use crate::metadata::Metadata;
use crate::search::Search;
use crate::services::exiftool::ExifTool;
use crate::services::{ImaggaClient, ShutterstockClient};
use crate::store::{Store, Subscription};
use crate::tasks::queue::{BACKGROUND, FOREGROUND};
use crate::tasks::WorkQueue;
use crate::types::{ExifToolService, FileMetadata, MetadataService, ShapeEntry};

/// Foreground external-tool access: each call builds the tool from the
/// current settings and runs through the shared queue at [`FOREGROUND`].
struct QueuedExifTool {
    queue: WorkQueue,
    settings: SettingsStore,
}

impl QueuedExifTool {
    fn tool(&self) -> ExifTool {
        ExifTool::new(self.settings.get().exiftool)
    }
}

#[async_trait::async_trait]
impl ExifToolService for QueuedExifTool {
    async fn read(&self, path: &Path, shape: &'static [ShapeEntry]) -> Result<FileMetadata> {
        let tool = self.tool();
        let path = path.to_path_buf();
        Ok(self
            .queue
            .submit(FOREGROUND, async move { tool.read(&path, shape).await })
            .await??)
    }

    async fn write(
        &self,
        path: &Path,
        shape: &'static [ShapeEntry],
        values: &FileMetadata,
    ) -> Result<()> {
        let tool = self.tool();
        let path = path.to_path_buf();
        let values = values.clone();
        self.queue
            .submit(FOREGROUND, async move {
                tool.write(&path, shape, &values).await
            })
            .await??;
        Ok(())
    }
}

/// Background metadata reads for the gallery prefetch, at [`BACKGROUND`]
/// priority so they never starve a user-initiated read or write.
struct BackgroundMetadataReader {
    queue: WorkQueue,
    settings: SettingsStore,
}

#[async_trait::async_trait]
impl MetadataService for BackgroundMetadataReader {
    async fn read(&self, path: &Path) -> Result<FileMetadata> {
        let tool = ExifTool::new(self.settings.get().exiftool);
        let path = path.to_path_buf();
        Ok(self
            .queue
            .submit(BACKGROUND, async move {
                tool.read(&path, metadata::SHAPE).await
            })
            .await??)
    }
}

/// The wired-up application core.
///
/// Must be constructed inside a tokio runtime; construction spawns the
/// reactive-effects task and the best-effort category fetch.
pub struct App {
    pub store: Store,
    pub queue: WorkQueue,
    pub settings: SettingsStore,
    pub image: Image,
    pub metadata: Arc<Metadata>,
    pub gallery: Arc<Gallery>,
    pub keywording: Keywording,
    pub search: Search,
    _subscriptions: Vec<Subscription>,
}

impl App {
    pub fn new(settings_path: PathBuf) -> Result<App> {
        let store = Store::new();
        let queue = WorkQueue::with_cpu_limit();
        let settings = SettingsStore::load(&store, settings_path);

        let exiftool: Arc<dyn ExifToolService> = Arc::new(QueuedExifTool {
            queue: queue.clone(),
            settings: settings.clone(),
        });
        let background: Arc<dyn MetadataService> = Arc::new(BackgroundMetadataReader {
            queue: queue.clone(),
            settings: settings.clone(),
        });
        let imagga = Arc::new(ImaggaClient::new()?);
        let shutterstock = Arc::new(ShutterstockClient::new()?);

        let image = Image::new(&store);
        let metadata = Arc::new(Metadata::new(&store, image.clone(), exiftool));
        let gallery = Gallery::new(&store, background);
        let keywording = Keywording::new(
            &store,
            image.clone(),
            settings.clone(),
            imagga,
            shutterstock.clone(),
        );
        let search = Search::new(&store, settings.clone(), shutterstock);

        let subscriptions = vec![Self::spawn_image_effects(
            &store,
            &image,
            &settings,
            &metadata,
            &gallery,
        )];

        {
            let search = search.clone();
            tokio::spawn(async move { search.load_categories().await });
        }

        let app = App {
            store,
            queue,
            settings,
            image,
            metadata,
            gallery,
            keywording,
            search,
            _subscriptions: subscriptions,
        };
        app.restore_last_file();
        Ok(app)
    }

    /// Everything that follows from selecting an image: persist it as the last
    /// file, reload metadata, and re-point the gallery at its directory.
    ///
    /// The store listener only signals a channel; the actual work runs on a
    /// spawned task so listeners stay synchronous and cheap.
    fn spawn_image_effects(
        store: &Store,
        image: &Image,
        settings: &SettingsStore,
        metadata: &Arc<Metadata>,
        gallery: &Arc<Gallery>,
    ) -> Subscription {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = store.subscribe(&image.path(), move || {
            let _ = tx.send(());
        });

        let image = image.clone();
        let settings = settings.clone();
        let metadata = metadata.clone();
        let gallery = gallery.clone();
        tokio::spawn(async move {
            while rx.recv().await.is_some() {
                let Some(path) = image.current_path() else {
                    continue;
                };
                if let Err(e) = settings.set(SettingsUpdate {
                    last_file: Some(path.display().to_string()),
                    ..Default::default()
                }) {
                    error!(error = %e, "persisting last opened file failed");
                }
                if let Err(e) = metadata.load().await {
                    error!(error = %e, "metadata load failed");
                }
                if let Some(parent) = path.parent() {
                    if let Err(e) = gallery.set_directory(parent).await {
                        error!(error = %e, "gallery update failed");
                    }
                }
            }
        });
        subscription
    }

    /// Reopen the image from the previous session, if it still exists.
    fn restore_last_file(&self) {
        let last_file = self.settings.get().last_file;
        if last_file.is_empty() {
            return;
        }
        let path = PathBuf::from(&last_file);
        if !path.is_file() {
            tracing::debug!(path = %path.display(), "last opened file no longer exists");
            return;
        }
        if let Err(e) = self.image.load(path) {
            error!(error = %e, "restoring last opened file failed");
        }
    }
}
