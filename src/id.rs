//! ID generation utilities
//!
//! Provides functions for generating identifiers for routing requests and adapters.

use rand::Rng;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Generate a routing request ID
///
/// Format: `req-{timestamp_ms}-{random_hex}`
/// Example: `req-1738300800123-a1b2c3d4`
pub fn generate_request_id() -> String {
    let random: u32 = rand::rng().random();
    format!("req-{}-{:08x}", now_ms(), random)
}

/// Generate a default adapter ID from the host name
///
/// Format: `adapter-{hostname}-{random_hex}`
pub fn generate_adapter_id() -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "local".to_string());
    let random: u16 = rand::rng().random();
    format!("adapter-{}-{:04x}", host, random)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms_returns_reasonable_timestamp() {
        // After 2024-01-01
        assert!(now_ms() > 1_704_067_200_000);
    }

    #[test]
    fn test_generate_request_id_format() {
        let id = generate_request_id();
        assert!(id.starts_with("req-"));
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2].len(), 8);
    }

    #[test]
    fn test_generate_request_id_unique() {
        let a = generate_request_id();
        let b = generate_request_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_generate_adapter_id_prefix() {
        assert!(generate_adapter_id().starts_with("adapter-"));
    }
}
