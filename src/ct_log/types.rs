// src/ct_log/types.rs
use serde::{Deserialize, Serialize};

/// Response from CT log's `get-sth` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedTreeHead {
    pub tree_size: u64,
    pub timestamp: u64,
    pub sha256_root_hash: String,
}

/// One decoded entry from `get-entries`: `leaf_input`/`extra_data` already
/// base64-decoded into raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub leaf_input: Vec<u8>,
    pub extra_data: Vec<u8>,
}

/// Wire shape of a single `get-entries` element: base64-encoded fields.
#[derive(Debug, Deserialize)]
pub(crate) struct WireEntry {
    pub leaf_input: String,
    pub extra_data: String,
}

/// Wire shape of the `get-entries` response body.
#[derive(Debug, Deserialize)]
pub(crate) struct GetEntriesResponse {
    pub entries: Vec<WireEntry>,
}
