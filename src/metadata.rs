//! Metadata entity: the IPTC fields of the open image
//!
//! Each field is a [`MetadataItem`] holding two observable values: what the
//! file currently contains (`file_value`, owned by load/save) and what the user
//! is editing (`value`). A per-item computed `saved` atom compares the two with
//! set-equality for multi-valued fields, and the entity-level `is_saved` is the
//! conjunction over all items. Loads and saves run under the entity's task
//! chain, so a stale read of a previously open image can never overwrite the
//! fields of the one opened after it.

use std::sync::Arc;

use crate::error::{Entity, Error, Result};
use crate::image::Image;
use crate::store::{Atom, Store, StoreError};
use crate::tasks::TaskChain;
use crate::types::{values_equal, ExifToolService, FileMetadata, MetadataValue, ShapeEntry};

/// The IPTC fields this tool edits.
pub const SHAPE: &[ShapeEntry] = &[
    ShapeEntry {
        id: "title",
        name: "Title",
        request: "-iptc:objectName",
        response: "ObjectName",
        multi: false,
    },
    ShapeEntry {
        id: "description",
        name: "Description",
        request: "-iptc:caption-abstract",
        response: "Caption-Abstract",
        multi: false,
    },
    ShapeEntry {
        id: "keywords",
        name: "Keywords",
        request: "-iptc:keywords",
        response: "Keywords",
        multi: true,
    },
];

/// One metadata field: file value, edited value, and their agreement.
#[derive(Clone)]
pub struct MetadataItem {
    store: Store,
    entry: ShapeEntry,
    file_value: Atom<MetadataValue>,
    value: Atom<MetadataValue>,
    saved: Atom<bool>,
}

impl MetadataItem {
    fn new(store: &Store, entry: ShapeEntry) -> Self {
        let file_value = store.atom(MetadataValue::empty(entry.multi));
        let value = store.atom(MetadataValue::empty(entry.multi));
        let saved =
            store.computed(move |eval| values_equal(&eval.get(&file_value), &eval.get(&value)));
        Self {
            store: store.clone(),
            entry,
            file_value,
            value,
            saved,
        }
    }

    pub fn id(&self) -> &'static str {
        self.entry.id
    }

    pub fn display_name(&self) -> &'static str {
        self.entry.name
    }

    pub fn is_multi(&self) -> bool {
        self.entry.multi
    }

    pub fn value(&self) -> MetadataValue {
        self.store.get(&self.value)
    }

    pub fn file_value(&self) -> MetadataValue {
        self.store.get(&self.file_value)
    }

    pub fn is_saved(&self) -> bool {
        self.store.get(&self.saved)
    }

    pub fn value_atom(&self) -> Atom<MetadataValue> {
        self.value
    }

    pub fn saved_atom(&self) -> Atom<bool> {
        self.saved
    }

    /// Set the edited value. Multi-valued fields are de-duplicated, keeping the
    /// first occurrence of each item.
    pub fn set_value(&self, value: MetadataValue) -> Result<()> {
        let value = match value {
            MetadataValue::Multi(items) => MetadataValue::Multi(dedup(items)),
            single => single,
        };
        self.store.set(&self.value, value)?;
        Ok(())
    }

    /// Advance the file-side value. Only load/save may move this.
    fn set_file_value(&self, value: MetadataValue) -> std::result::Result<(), StoreError> {
        self.store.set(&self.file_value, value)
    }

    fn reset(&self) -> std::result::Result<(), StoreError> {
        self.set_file_value(MetadataValue::empty(self.entry.multi))?;
        self.store
            .set(&self.value, MetadataValue::empty(self.entry.multi))
    }
}

fn dedup(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

/// Metadata entity for the currently open image.
pub struct Metadata {
    store: Store,
    chain: TaskChain,
    busy: Atom<bool>,
    image: Image,
    items: Vec<MetadataItem>,
    is_saved: Atom<bool>,
    service: Arc<dyn ExifToolService>,
}

impl Metadata {
    pub fn new(store: &Store, image: Image, service: Arc<dyn ExifToolService>) -> Self {
        let busy = store.atom(false);
        let items: Vec<MetadataItem> = SHAPE
            .iter()
            .map(|entry| MetadataItem::new(store, *entry))
            .collect();
        let saved_atoms: Vec<Atom<bool>> = items.iter().map(|item| item.saved).collect();
        let is_saved = store.computed(move |eval| saved_atoms.iter().all(|atom| eval.get(atom)));
        Self {
            store: store.clone(),
            chain: TaskChain::new(store.clone(), busy, Entity::Metadata),
            busy,
            image,
            items,
            is_saved,
            service,
        }
    }

    pub fn items(&self) -> &[MetadataItem] {
        &self.items
    }

    pub fn item(&self, id: &str) -> Option<&MetadataItem> {
        self.items.iter().find(|item| item.id() == id)
    }

    pub fn busy(&self) -> Atom<bool> {
        self.busy
    }

    /// Whether every field matches the file.
    pub fn is_saved(&self) -> bool {
        self.store.get(&self.is_saved)
    }

    pub fn is_saved_atom(&self) -> Atom<bool> {
        self.is_saved
    }

    /// Read all fields from the open image and reset the edit state to them.
    ///
    /// On a failed read the fields reset to their empty defaults before the
    /// error is surfaced, so stale values from the previous image never remain
    /// visible against the new one.
    pub async fn load(&self) -> Result<()> {
        let Some(path) = self.image.current_path() else {
            return Ok(());
        };
        tracing::debug!(path = %path.display(), "loading metadata");

        let service = self.service.clone();
        let work = {
            let path = path.clone();
            async move { service.read(&path, SHAPE).await }
        };

        let store = self.store.clone();
        let items = self.items.clone();
        self.chain
            .run(work, move |outcome| match outcome {
                Ok(values) => store.transaction(|| {
                    for item in &items {
                        let value = values
                            .get(item.id())
                            .cloned()
                            .unwrap_or_else(|| MetadataValue::empty(item.is_multi()));
                        item.set_file_value(value.clone())?;
                        item.set_value(value)?;
                    }
                    Ok(())
                }),
                Err(e) => {
                    store.transaction(|| {
                        for item in &items {
                            item.reset()?;
                        }
                        Ok::<(), Error>(())
                    })?;
                    Err(e)
                }
            })
            .await
    }

    /// Write the edited values to the open image.
    ///
    /// File-side values advance to the written snapshot only when the tool
    /// reports success, so `is_saved` stays false across a failed save.
    pub async fn save(&self) -> Result<()> {
        let Some(path) = self.image.current_path() else {
            return Ok(());
        };

        let snapshot: FileMetadata = self
            .items
            .iter()
            .map(|item| (item.id().to_string(), item.value()))
            .collect();
        tracing::info!(path = %path.display(), fields = snapshot.len(), "saving metadata");

        let service = self.service.clone();
        let work = {
            let path = path.clone();
            let values = snapshot.clone();
            async move { service.write(&path, SHAPE, &values).await }
        };

        let store = self.store.clone();
        let items = self.items.clone();
        self.chain
            .run(work, move |outcome| {
                outcome?;
                store.transaction(|| {
                    for item in &items {
                        if let Some(value) = snapshot.get(item.id()) {
                            item.set_file_value(value.clone())?;
                        }
                    }
                    Ok(())
                })
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::exiftool::ExifToolError;
    use std::path::Path;
    use std::sync::Mutex;

    struct MockTool {
        reads: Mutex<Vec<Result<FileMetadata>>>,
        writes: Mutex<Vec<FileMetadata>>,
        fail_write: bool,
    }

    impl MockTool {
        fn with_reads(reads: Vec<Result<FileMetadata>>) -> Arc<Self> {
            Arc::new(Self {
                reads: Mutex::new(reads),
                writes: Mutex::new(Vec::new()),
                fail_write: false,
            })
        }

        fn failing_writes() -> Arc<Self> {
            Arc::new(Self {
                reads: Mutex::new(Vec::new()),
                writes: Mutex::new(Vec::new()),
                fail_write: true,
            })
        }
    }

    #[async_trait::async_trait]
    impl ExifToolService for MockTool {
        async fn read(
            &self,
            _path: &Path,
            _shape: &'static [ShapeEntry],
        ) -> Result<FileMetadata> {
            self.reads
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(FileMetadata::new()))
        }

        async fn write(
            &self,
            _path: &Path,
            _shape: &'static [ShapeEntry],
            values: &FileMetadata,
        ) -> Result<()> {
            if self.fail_write {
                return Err(Error::ExifTool(ExifToolError::EmptyOutput));
            }
            self.writes.lock().unwrap().push(values.clone());
            Ok(())
        }
    }

    fn sample_values() -> FileMetadata {
        let mut values = FileMetadata::new();
        values.insert("title".into(), MetadataValue::Single("Sunset".into()));
        values.insert(
            "keywords".into(),
            MetadataValue::Multi(vec!["sun".into(), "sea".into()]),
        );
        values
    }

    fn entity(tool: Arc<MockTool>) -> (Store, Metadata) {
        let store = Store::new();
        let image = Image::new(&store);
        image.load("/photos/a.jpg").unwrap();
        let metadata = Metadata::new(&store, image, tool);
        (store, metadata)
    }

    #[tokio::test]
    async fn test_load_populates_items_and_is_saved() {
        let tool = MockTool::with_reads(vec![Ok(sample_values())]);
        let (store, metadata) = entity(tool);

        metadata.load().await.unwrap();
        let title = metadata.item("title").unwrap();
        assert_eq!(title.value(), MetadataValue::Single("Sunset".into()));
        assert_eq!(title.file_value(), MetadataValue::Single("Sunset".into()));
        // Missing field defaults to empty
        assert_eq!(
            metadata.item("description").unwrap().value(),
            MetadataValue::Single(String::new())
        );
        assert!(metadata.is_saved());
        assert!(!store.get(&metadata.busy()));
    }

    #[tokio::test]
    async fn test_edit_breaks_is_saved_until_matching() {
        let tool = MockTool::with_reads(vec![Ok(sample_values())]);
        let (_store, metadata) = entity(tool);
        metadata.load().await.unwrap();

        let keywords = metadata.item("keywords").unwrap();
        keywords
            .set_value(MetadataValue::Multi(vec!["sun".into()]))
            .unwrap();
        assert!(!keywords.is_saved());
        assert!(!metadata.is_saved());

        // Same set in a different order counts as saved
        keywords
            .set_value(MetadataValue::Multi(vec!["sea".into(), "sun".into()]))
            .unwrap();
        assert!(keywords.is_saved());
        assert!(metadata.is_saved());
    }

    #[tokio::test]
    async fn test_set_value_dedups_multi() {
        let tool = MockTool::with_reads(vec![]);
        let (_store, metadata) = entity(tool);
        let keywords = metadata.item("keywords").unwrap();
        keywords
            .set_value(MetadataValue::Multi(vec![
                "sun".into(),
                "sea".into(),
                "sun".into(),
            ]))
            .unwrap();
        assert_eq!(
            keywords.value(),
            MetadataValue::Multi(vec!["sun".into(), "sea".into()])
        );
    }

    #[tokio::test]
    async fn test_save_advances_file_values() {
        let tool = MockTool::with_reads(vec![Ok(sample_values())]);
        let (_store, metadata) = entity(tool.clone());
        metadata.load().await.unwrap();

        let title = metadata.item("title").unwrap();
        title
            .set_value(MetadataValue::Single("Dawn".into()))
            .unwrap();
        assert!(!metadata.is_saved());

        metadata.save().await.unwrap();
        assert!(metadata.is_saved());
        assert_eq!(title.file_value(), MetadataValue::Single("Dawn".into()));

        let writes = tool.writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        assert_eq!(
            writes[0].get("title"),
            Some(&MetadataValue::Single("Dawn".into()))
        );
    }

    #[tokio::test]
    async fn test_failed_save_keeps_unsaved() {
        let tool = MockTool::failing_writes();
        let (store, metadata) = entity(tool);
        let title = metadata.item("title").unwrap();
        title
            .set_value(MetadataValue::Single("Dawn".into()))
            .unwrap();

        let err = metadata.save().await.unwrap_err();
        assert_eq!(err.entity(), Some(Entity::Metadata));
        assert!(!metadata.is_saved());
        assert_eq!(title.file_value(), MetadataValue::Single(String::new()));
        assert!(!store.get(&metadata.busy()));
    }

    #[tokio::test]
    async fn test_failed_load_resets_to_defaults() {
        let tool = MockTool::with_reads(vec![
            Err(Error::ExifTool(ExifToolError::EmptyOutput)),
            Ok(sample_values()),
        ]);
        let (_store, metadata) = entity(tool);

        // First load succeeds (reads pop from the back)
        metadata.load().await.unwrap();
        assert_eq!(
            metadata.item("title").unwrap().value(),
            MetadataValue::Single("Sunset".into())
        );

        // Second load fails; fields reset rather than keeping stale values
        let err = metadata.load().await.unwrap_err();
        assert_eq!(err.entity(), Some(Entity::Metadata));
        assert_eq!(
            metadata.item("title").unwrap().value(),
            MetadataValue::Single(String::new())
        );
        assert!(metadata.is_saved());
    }

    #[tokio::test]
    async fn test_load_without_image_is_noop() {
        let store = Store::new();
        let image = Image::new(&store);
        let metadata = Metadata::new(&store, image, MockTool::with_reads(vec![]));
        metadata.load().await.unwrap();
        assert!(!store.get(&metadata.busy()));
    }
}
