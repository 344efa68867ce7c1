//! Scenario tests for the ingestion pipeline and the gallery service,
//! run against the in-memory stores from `test_utils`.

mod cascade;
mod users;

use crate::config::IngestPolicy;

/// Default policy with a small edge limit so fixtures stay tiny
fn small_edge_policy(max_edge: u32) -> IngestPolicy {
    IngestPolicy {
        max_edge,
        ..IngestPolicy::default()
    }
}

/// Original bytes are stored as-is; nothing is decoded
fn verbatim_policy(max_file_bytes: u64) -> IngestPolicy {
    IngestPolicy {
        max_file_bytes,
        downscale: false,
        ..IngestPolicy::default()
    }
}
