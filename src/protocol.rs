//! Control messages sent from the cache client to the cache controller
//!
//! The channel is one-way: the controller never replies. Messages are JSON
//! objects tagged by `type`.

use serde::{Deserialize, Serialize};

/// A message on the client -> controller control channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Fetch each URL and keep it in the background-image store
    CacheBackgrounds { urls: Vec<String> },

    /// Leave the waiting state and take control now
    SkipWaiting,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_backgrounds_wire_format() {
        let msg = ControlMessage::CacheBackgrounds {
            urls: vec!["https://images.unsplash.com/a".to_string()],
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "CACHE_BACKGROUNDS",
                "urls": ["https://images.unsplash.com/a"]
            })
        );
    }

    #[test]
    fn test_skip_waiting_wire_format() {
        let parsed: ControlMessage = serde_json::from_str(r#"{"type":"SKIP_WAITING"}"#).unwrap();
        assert_eq!(parsed, ControlMessage::SkipWaiting);
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(serde_json::from_str::<ControlMessage>(r#"{"type":"NUKE"}"#).is_err());
    }
}
