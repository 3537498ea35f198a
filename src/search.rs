//! Search entity: Shutterstock image search
//!
//! A thin chain-guarded wrapper over the search endpoint: the latest request
//! wins, results land in `items`/`total_items`. Categories are fetched once,
//! best-effort; a failure just leaves the list empty.

use std::sync::Arc;

use crate::config::SettingsStore;
use crate::error::{Entity, Result};
use crate::services::shutterstock_client::{Category, ImageSummary, SearchRequest};
use crate::store::{Atom, Store};
use crate::tasks::TaskChain;
use crate::types::ShutterstockApi;

/// Image-search entity.
#[derive(Clone)]
pub struct Search {
    store: Store,
    chain: TaskChain,
    busy: Atom<bool>,
    items: Atom<Vec<ImageSummary>>,
    total_items: Atom<u64>,
    categories: Atom<Vec<Category>>,
    settings: SettingsStore,
    api: Arc<dyn ShutterstockApi>,
}

impl Search {
    pub fn new(store: &Store, settings: SettingsStore, api: Arc<dyn ShutterstockApi>) -> Self {
        let busy = store.atom(false);
        Self {
            store: store.clone(),
            chain: TaskChain::new(store.clone(), busy, Entity::Search),
            busy,
            items: store.atom(Vec::new()),
            total_items: store.atom(0),
            categories: store.atom(Vec::new()),
            settings,
            api,
        }
    }

    pub fn busy(&self) -> Atom<bool> {
        self.busy
    }

    pub fn items(&self) -> Atom<Vec<ImageSummary>> {
        self.items
    }

    pub fn total_items(&self) -> Atom<u64> {
        self.total_items
    }

    pub fn categories(&self) -> Atom<Vec<Category>> {
        self.categories
    }

    /// Run a search; the newest request's results replace the items.
    pub async fn search(&self, request: SearchRequest) -> Result<()> {
        let credentials = self.settings.get().shutterstock_key;
        let api = self.api.clone();
        let work = async move { api.search(&credentials, &request).await };

        let store = self.store.clone();
        let items_atom = self.items;
        let total_atom = self.total_items;
        self.chain
            .run(work, move |outcome| {
                let page = outcome?;
                store.transaction(|| {
                    store.set(&items_atom, page.items)?;
                    store.set(&total_atom, page.total_count)?;
                    Ok(())
                })
            })
            .await
    }

    /// Fetch the category list once, dropping all-caps placeholder entries.
    ///
    /// Failures are logged and leave the list empty; search works without it.
    pub async fn load_categories(&self) {
        let credentials = self.settings.get().shutterstock_key;
        match self.api.categories(&credentials).await {
            Ok(categories) => {
                let categories: Vec<Category> = categories
                    .into_iter()
                    .filter(|category| !is_placeholder(&category.name))
                    .collect();
                tracing::debug!(count = categories.len(), "search categories loaded");
                if let Err(e) = self.store.set(&self.categories, categories) {
                    tracing::warn!(error = %e, "storing search categories failed");
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "fetching search categories failed");
            }
        }
    }
}

/// Placeholder rows in the category feed are spelled in all caps.
fn is_placeholder(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_uppercase() || c == '-' || c == ' ')
}
