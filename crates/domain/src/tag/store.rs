use std::collections::BTreeMap;

use async_trait::async_trait;

use super::{TagDefinition, TagTable};
use crate::DomainError;

/// Persistence port for tag definitions.
///
/// The base layer is read-only at runtime; the overlay and the metadata are
/// rewritten wholesale on every mutation. Implementations live in the
/// infrastructure layer.
#[cfg_attr(any(test, feature = "test-support"), mockall::automock)]
#[async_trait]
pub trait TagStore: Send + Sync {
    /// Base tags, defaulted when the backing file is absent or empty
    async fn load_base(&self) -> Result<TagTable, DomainError>;

    async fn load_overlay(&self) -> Result<TagTable, DomainError>;

    async fn save_overlay(&self, overlay: &TagTable) -> Result<(), DomainError>;

    async fn load_metadata(&self) -> Result<BTreeMap<String, TagDefinition>, DomainError>;

    async fn save_metadata(
        &self,
        metadata: &BTreeMap<String, TagDefinition>,
    ) -> Result<(), DomainError>;
}
