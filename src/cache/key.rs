//! Cache key generation using SHA-256 hashes

use sha2::{Digest, Sha256};

use crate::network::Request;

/// Generate a deterministic cache key from a request method and URL.
///
/// The key doubles as the blob file name, so it is always hex.
pub fn cache_key(method: &str, url: &str) -> String {
    let mut hasher = Sha256::new();

    hasher.update(method.to_ascii_uppercase().as_bytes());
    hasher.update(b"|");
    hasher.update(url.as_bytes());

    format!("{:x}", hasher.finalize())
}

/// Cache key for a request
pub fn request_key(request: &Request) -> String {
    cache_key(request.method.as_str(), request.url.as_str())
}
