pub mod record;

pub use record::{KeyValue, SourceOffset, SourcePartition, SourceRecord};
