//! Session identifier generation
//!
//! 16 bytes from the OS CSPRNG, hex-encoded to 32 characters. If the entropy
//! source fails, the hex nanosecond timestamp is used instead.

use std::fmt::Display;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

/// Random bytes per identifier
pub const SESSION_ID_BYTES: usize = 16;

/// Generate a new session identifier
pub fn generate_session_id() -> String {
    session_id_with(getrandom::fill)
}

/// Generate an identifier using `fill` as the entropy source
pub fn session_id_with<E: Display>(fill: impl FnOnce(&mut [u8]) -> Result<(), E>) -> String {
    let mut bytes = [0u8; SESSION_ID_BYTES];
    match fill(&mut bytes) {
        Ok(()) => hex::encode(bytes),
        Err(e) => {
            let fallback = timestamp_id();
            warn!(error = %e, session_id = %fallback, "Entropy source failed, using timestamp session id");
            fallback
        }
    }
}

fn timestamp_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("{:x}", nanos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};
    use std::thread;

    fn is_session_id(s: &str) -> bool {
        s.len() == 32 && s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
    }

    #[test]
    fn test_generated_ids_are_32_hex() {
        let id = generate_session_id();
        assert!(is_session_id(&id), "bad id {}", id);
    }

    #[test]
    fn test_ten_thousand_ids_are_unique() {
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(generate_session_id()));
        }
    }

    #[test]
    fn test_concurrent_generation_does_not_collide() {
        let seen = Arc::new(Mutex::new(HashSet::new()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let seen = Arc::clone(&seen);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let id = generate_session_id();
                        assert!(seen.lock().unwrap().insert(id));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(seen.lock().unwrap().len(), 4_000);
    }

    #[test]
    fn test_entropy_failure_falls_back_to_timestamp() {
        let id = session_id_with(|_| Err("no entropy"));
        assert!(!id.is_empty());
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(u128::from_str_radix(&id, 16).unwrap() > 0);
    }
}
