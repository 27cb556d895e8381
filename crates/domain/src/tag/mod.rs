mod cache;
mod category;
mod datatype;
mod definition;
mod quality;
mod sample;
mod store;
mod table;
mod tag_name;

pub use cache::{CachedValue, INVALID_FORMAT_SENTINEL, RawSnapshot, SampleCache, WAITING_SENTINEL};
pub use category::{CategorizedTags, categorize};
pub use datatype::TagDataType;
pub use definition::TagDefinition;
pub use quality::TagQuality;
pub use sample::Sample;
pub use store::TagStore;
#[cfg(any(test, feature = "test-support"))]
pub use store::MockTagStore;
pub use table::{Snapshot, TagTable, merge_layers};
pub use tag_name::TagName;
