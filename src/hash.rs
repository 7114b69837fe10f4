//! Default request hashing

use crate::handler::Request;
use serde_json::json;
use sha2::{Digest, Sha256};

/// Hex SHA-256 of the canonical JSON `{"URL": .., "body": ..}`
///
/// Object keys are serialized in sorted order, so semantically equal bodies
/// hash the same regardless of field order.
pub fn request_hash(request: &Request) -> String {
    let descriptor = json!({
        "URL": request.original_url,
        "body": request.body,
    });
    hex::encode(Sha256::digest(descriptor.to_string().as_bytes()))
}
