//! Rotating browser User-Agent headers for outbound requests.

use std::sync::atomic::{AtomicUsize, Ordering};

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
];

/// Hands out User-Agent strings in a fixed cycle.
#[derive(Debug, Default)]
pub struct UserAgentRotation {
    cursor: AtomicUsize,
}

impl UserAgentRotation {
    pub fn next(&self) -> &'static str {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed);
        USER_AGENTS[i % USER_AGENTS.len()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_cycles_through_all_agents() {
        let rot = UserAgentRotation::default();
        let first: Vec<&str> = (0..USER_AGENTS.len()).map(|_| rot.next()).collect();
        assert_eq!(first, USER_AGENTS);
        assert_eq!(rot.next(), USER_AGENTS[0]);
    }
}
