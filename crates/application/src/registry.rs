use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use domain::DomainError;
use domain::tag::{
    CategorizedTags, TagDefinition, TagStore, TagTable, categorize, merge_layers,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// What a delete request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    /// The name only exists in the read-only base layer
    BaseTagProtected,
    NotFound,
}

struct Layers {
    overlay: TagTable,
    metadata: BTreeMap<String, TagDefinition>,
}

/// Owns the tag definitions: the read-only base layer, the persisted overlay
/// and the per-tag ownership metadata.
///
/// Mutations are serialized through one async mutex and persisted before the
/// effective table is swapped, so readers always see a complete table.
pub struct TagRegistry {
    store: Arc<dyn TagStore>,
    base: TagTable,
    layers: Mutex<Layers>,
    effective: RwLock<Arc<TagTable>>,
}

impl TagRegistry {
    pub async fn load(store: Arc<dyn TagStore>) -> Result<Self, DomainError> {
        let base = store.load_base().await?;
        let overlay = store.load_overlay().await?;
        let metadata = store.load_metadata().await?;
        let effective = merge_layers(&base, &overlay);

        info!(
            base = base.len(),
            overlay = overlay.len(),
            effective = effective.len(),
            "Tag registry loaded"
        );

        Ok(Self {
            store,
            base,
            layers: Mutex::new(Layers { overlay, metadata }),
            effective: RwLock::new(Arc::new(effective)),
        })
    }

    /// Current effective table. Cheap; never waits on a mutation.
    pub fn effective(&self) -> Arc<TagTable> {
        self.effective
            .read()
            .map(|t| t.clone())
            .unwrap_or_default()
    }

    pub fn base(&self) -> &TagTable {
        &self.base
    }

    pub fn address_of(&self, name: &str) -> Option<String> {
        self.effective().get(name).cloned()
    }

    fn publish(&self, layers: &Layers) -> Arc<TagTable> {
        let table = Arc::new(merge_layers(&self.base, &layers.overlay));
        if let Ok(mut effective) = self.effective.write() {
            *effective = table.clone();
        }
        table
    }

    /// Adds or replaces a tag in the overlay and records its metadata.
    pub async fn add(&self, definition: TagDefinition) -> Result<Arc<TagTable>, DomainError> {
        let mut layers = self.layers.lock().await;

        let mut overlay = layers.overlay.clone();
        overlay.insert(definition.name.clone(), definition.address.clone());
        self.store.save_overlay(&overlay).await?;
        layers.overlay = overlay;

        let mut metadata = layers.metadata.clone();
        metadata.insert(definition.name.clone(), definition.clone());
        if let Err(e) = self.store.save_metadata(&metadata).await {
            // The overlay is already durable; the tag exists without an owner record.
            warn!(tag = %definition.name, "Failed to persist tag metadata: {}", e);
        } else {
            layers.metadata = metadata;
        }

        debug!(tag = %definition.name, address = %definition.address, "Tag added");
        Ok(self.publish(&layers))
    }

    pub async fn remove(&self, name: &str) -> Result<RemoveOutcome, DomainError> {
        let mut layers = self.layers.lock().await;

        if !layers.overlay.contains_key(name) {
            if self.base.contains_key(name) {
                warn!(tag = %name, "Refusing to delete a base tag");
                return Ok(RemoveOutcome::BaseTagProtected);
            }
            return Ok(RemoveOutcome::NotFound);
        }

        let mut overlay = layers.overlay.clone();
        overlay.remove(name);
        self.store.save_overlay(&overlay).await?;
        layers.overlay = overlay;

        if layers.metadata.contains_key(name) {
            let mut metadata = layers.metadata.clone();
            metadata.remove(name);
            match self.store.save_metadata(&metadata).await {
                Ok(()) => layers.metadata = metadata,
                Err(e) => warn!(tag = %name, "Failed to persist tag metadata: {}", e),
            }
        }

        debug!(tag = %name, "Tag removed");
        self.publish(&layers);
        Ok(RemoveOutcome::Removed)
    }

    /// Merges many definitions with a single overlay write.
    pub async fn import(
        &self,
        definitions: Vec<TagDefinition>,
    ) -> Result<Arc<TagTable>, DomainError> {
        let mut layers = self.layers.lock().await;
        if definitions.is_empty() {
            return Ok(self.effective());
        }

        let mut overlay = layers.overlay.clone();
        let mut metadata = layers.metadata.clone();
        for definition in definitions {
            overlay.insert(definition.name.clone(), definition.address.clone());
            metadata.insert(definition.name.clone(), definition);
        }

        self.store.save_overlay(&overlay).await?;
        layers.overlay = overlay;
        match self.store.save_metadata(&metadata).await {
            Ok(()) => layers.metadata = metadata,
            Err(e) => warn!("Failed to persist imported tag metadata: {}", e),
        }

        Ok(self.publish(&layers))
    }

    pub async fn metadata(&self) -> BTreeMap<String, TagDefinition> {
        self.layers.lock().await.metadata.clone()
    }

    pub async fn categorized(&self) -> CategorizedTags {
        let metadata = self.metadata().await;
        categorize(&self.effective(), &metadata)
    }
}
