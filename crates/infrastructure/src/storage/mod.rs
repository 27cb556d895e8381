mod audit_log;
mod history;
mod jsonl;
mod tag_store;

pub use audit_log::JsonlAuditLog;
pub use history::{HistoryRow, JsonlHistorySink};
pub use jsonl::JsonlWriter;
pub use tag_store::{JsonTagStore, default_base_tags};
