//! Keywording entity: tag suggestions from the tagging services
//!
//! Both operations read the open image from disk, send it to a tagging
//! service, and publish the suggested tags. Imagga additionally reports the
//! remaining monthly quota. A request while one is already in flight is
//! ignored rather than queued; the chain still guards against a stale response
//! landing after a newer request.

use base64::{engine::general_purpose, Engine as _};
use std::sync::Arc;

use crate::config::SettingsStore;
use crate::error::{Entity, Result};
use crate::image::Image;
use crate::store::{Atom, Store};
use crate::tasks::TaskChain;
use crate::types::{ImaggaApi, ShutterstockApi};

/// Tag-suggestion entity.
#[derive(Clone)]
pub struct Keywording {
    store: Store,
    chain: TaskChain,
    busy: Atom<bool>,
    tags: Atom<Vec<String>>,
    limit: Atom<Option<u64>>,
    image: Image,
    settings: SettingsStore,
    imagga: Arc<dyn ImaggaApi>,
    shutterstock: Arc<dyn ShutterstockApi>,
}

impl Keywording {
    pub fn new(
        store: &Store,
        image: Image,
        settings: SettingsStore,
        imagga: Arc<dyn ImaggaApi>,
        shutterstock: Arc<dyn ShutterstockApi>,
    ) -> Self {
        let busy = store.atom(false);
        Self {
            store: store.clone(),
            chain: TaskChain::new(store.clone(), busy, Entity::Keywording),
            busy,
            tags: store.atom(Vec::new()),
            limit: store.atom(None),
            image,
            settings,
            imagga,
            shutterstock,
        }
    }

    pub fn busy(&self) -> Atom<bool> {
        self.busy
    }

    /// Suggested tags from the most recent completed request.
    pub fn tags(&self) -> Atom<Vec<String>> {
        self.tags
    }

    /// Remaining monthly quota of Service A, if it has been queried.
    pub fn limit(&self) -> Atom<Option<u64>> {
        self.limit
    }

    /// Fetch suggestions from Imagga, then its remaining quota.
    ///
    /// Tags and quota are published together so observers never see one
    /// without the other.
    pub async fn guess_keywords_imagga(&self) -> Result<()> {
        if self.store.get(&self.busy) {
            tracing::debug!("keyword request ignored, one already in flight");
            return Ok(());
        }
        let Some(path) = self.image.current_path() else {
            return Ok(());
        };
        let credentials = self.settings.get().imagga_key;
        tracing::info!(path = %path.display(), "requesting Imagga keyword suggestions");

        let api = self.imagga.clone();
        let work = async move {
            let image = tokio::fs::read(&path).await?;
            let tags = api.tags(&credentials, image).await?;
            let limit = api.remaining_quota(&credentials).await?;
            Ok((tags, limit))
        };

        let store = self.store.clone();
        let tags_atom = self.tags;
        let limit_atom = self.limit;
        self.chain
            .run(work, move |outcome| {
                let (tags, limit) = outcome?;
                store.transaction(|| {
                    store.set(&tags_atom, tags)?;
                    store.set(&limit_atom, Some(limit))?;
                    Ok(())
                })
            })
            .await
    }

    /// Fetch suggestions from Shutterstock: upload the image, then query
    /// keywords for the returned upload id. The quota atom is untouched.
    pub async fn guess_keywords_shutterstock(&self) -> Result<()> {
        if self.store.get(&self.busy) {
            tracing::debug!("keyword request ignored, one already in flight");
            return Ok(());
        }
        let Some(path) = self.image.current_path() else {
            return Ok(());
        };
        let credentials = self.settings.get().shutterstock_key;
        tracing::info!(path = %path.display(), "requesting Shutterstock keyword suggestions");

        let api = self.shutterstock.clone();
        let work = async move {
            let image = tokio::fs::read(&path).await?;
            let encoded = general_purpose::STANDARD.encode(&image);
            let upload_id = api.upload(&credentials, encoded).await?;
            api.keywords(&credentials, &upload_id).await
        };

        let store = self.store.clone();
        let tags_atom = self.tags;
        self.chain
            .run(work, move |outcome| {
                store.set(&tags_atom, outcome?)?;
                Ok(())
            })
            .await
    }
}
