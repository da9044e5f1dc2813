//! Remote source access, retry/backoff and local file mirror utilities.

mod files;
mod retry;
mod source;

pub use files::{
    collision_filename, count_files, read_jsonl, sanitize_filename, sha256_hex, short_hash,
    walk_files, write_atomic, JsonlLine, JsonlWriter,
};
pub use retry::{retry_with_backoff, BackoffPolicy, RetryDisposition, RetryError, Retryable};
pub use source::{
    classify_reqwest_error, classify_status, parse_content_range_total, SourceBackend,
    SourceError, StorageObject, SupabaseSource,
};

pub const CRATE_NAME: &str = "folio-storage";
