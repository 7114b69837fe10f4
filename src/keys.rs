//! Key-space layout
//!
//! All keys for one request derive from its namespace
//! `{key_prefix}:{endpoint_prefix}:{request_hash}`:
//!
//! ```text
//! {namespace}:api-response                  cached generator output
//! :{namespace}:api-response:lock            generation lock resource
//! lock-type:create::channel:{namespace}     lock event channel
//! ```
//!
//! `%` and `:` inside the endpoint prefix and request hash are
//! percent-escaped, so distinct `(prefix, hash)` pairs can never produce the
//! same namespace. Prefixes and hex hashes without those characters are
//! left untouched.

const RESPONSE_SUFFIX: &str = "api-response";
const LOCK_SUFFIX: &str = "lock";
const CHANNEL_PREFIX: &str = "lock-type:create::channel:";

/// Every store key, lock resource and channel used for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestKeys {
    pub namespace: String,
    pub cache_key: String,
    pub lock_key: String,
    pub event_channel: String,
}

impl RequestKeys {
    pub fn new(key_prefix: &str, endpoint_prefix: &str, request_hash: &str) -> Self {
        let namespace = format!(
            "{}:{}:{}",
            key_prefix,
            escape_segment(endpoint_prefix),
            escape_segment(request_hash)
        );
        let cache_key = format!("{}:{}", namespace, RESPONSE_SUFFIX);
        let lock_key = format!(":{}:{}", cache_key, LOCK_SUFFIX);
        let event_channel = format!("{}{}", CHANNEL_PREFIX, namespace);

        Self {
            namespace,
            cache_key,
            lock_key,
            event_channel,
        }
    }
}

fn escape_segment(segment: &str) -> String {
    if !segment.contains(['%', ':']) {
        return segment.to_string();
    }
    segment.replace('%', "%25").replace(':', "%3A")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let keys = RequestKeys::new("tmc-apig-cache", "/users/1", "abc123");

        assert_eq!(keys.namespace, "tmc-apig-cache:/users/1:abc123");
        assert_eq!(keys.cache_key, "tmc-apig-cache:/users/1:abc123:api-response");
        assert_eq!(keys.lock_key, ":tmc-apig-cache:/users/1:abc123:api-response:lock");
        assert_eq!(
            keys.event_channel,
            "lock-type:create::channel:tmc-apig-cache:/users/1:abc123"
        );
    }

    #[test]
    fn test_colliding_segments_stay_distinct() {
        let first = RequestKeys::new("p", "a", "b:c");
        let second = RequestKeys::new("p", "a:b", "c");

        assert_ne!(first.cache_key, second.cache_key);
        assert_ne!(first.lock_key, second.lock_key);
        assert_ne!(first.event_channel, second.event_channel);
    }

    #[test]
    fn test_escaping_is_injective() {
        // "%3A" literally must not collide with an escaped ":"
        let literal = RequestKeys::new("p", "a%3Ab", "c");
        let escaped = RequestKeys::new("p", "a:b", "c");
        assert_ne!(literal.namespace, escaped.namespace);
    }
}
