//! Utility functions for the tournament service

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Generate a new unique custom room ID
pub fn generate_room_id() -> Uuid {
    Uuid::new_v4()
}

/// Generate a new correlation ID for outbound messages
pub fn generate_correlation_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a new tournament request ID
pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a new transport session ID
pub fn generate_session_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Parse a stored decimal identifier
pub fn parse_id(raw: &str) -> Option<u64> {
    raw.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_unique_ids() {
        assert_ne!(generate_room_id(), generate_room_id());
        assert_ne!(generate_correlation_id(), generate_correlation_id());
        assert_ne!(generate_session_id(), generate_session_id());
        assert_ne!(generate_request_id(), generate_request_id());
    }

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("42"), Some(42));
        assert_eq!(parse_id("-1"), None);
        assert_eq!(parse_id("abc"), None);
    }
}
