pub mod checkpoint_store;
pub mod response_normalizer;
pub mod result_sink;

pub use checkpoint_store::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
pub use response_normalizer::{extract_json_object, ResponseNormalizer};
pub use result_sink::{FileResultSink, MemoryResultSink, ResultSink};
