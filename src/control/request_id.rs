//! Request id generation

use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::RequestId;

/// Produces `req_<counter>_<random>` ids
///
/// The counter keeps ids unique within a session; the random suffix keeps
/// them from colliding with ids from an earlier session of the same process.
#[derive(Debug, Default)]
pub struct RequestIdGenerator {
    counter: AtomicU64,
}

impl RequestIdGenerator {
    /// New generator starting at 1
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id
    pub fn next_id(&self) -> RequestId {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let suffix: u32 = rand::random();
        RequestId::new(format!("req_{n}_{suffix:08x}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_format() {
        let ids = RequestIdGenerator::new();
        let id = ids.next_id();
        let parts: Vec<&str> = id.as_str().split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "req");
        assert_eq!(parts[1], "1");
        assert_eq!(parts[2].len(), 8);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_counter_is_monotonic_and_unique() {
        let ids = RequestIdGenerator::new();
        let seen: HashSet<RequestId> = (0..1000).map(|_| ids.next_id()).collect();
        assert_eq!(seen.len(), 1000);
        assert!(ids.next_id().as_str().starts_with("req_1001_"));
    }
}
