//! Expansion of configured file patterns into concrete remote names.

use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::harvest::traits::{Session, TransportError};

/// Characters that send a pattern to the backend listing. `|` and space carry
/// no glob meaning of their own but are treated as triggers all the same.
pub const WILDCARD_TRIGGERS: &[char] = &['*', ' ', '|', '?'];

pub fn has_wildcard(pattern: &str) -> bool {
    pattern.contains(WILDCARD_TRIGGERS)
}

/// Resolves `patterns` against the live session, preserving input order.
///
/// Literal names pass through verbatim (existence is discovered at open
/// time). Wildcard patterns contribute whatever the backend lists, duplicates
/// included; a failed or timed-out listing contributes nothing and never
/// aborts the resolution.
pub async fn resolve_files<S>(
    session: &mut S,
    directory: &str,
    patterns: &[String],
    list_timeout: Duration,
) -> Vec<String>
where
    S: Session,
{
    let mut resolved = Vec::with_capacity(patterns.len());

    for pattern in patterns {
        if !has_wildcard(pattern) {
            resolved.push(pattern.clone());
            continue;
        }

        let listing = timeout(list_timeout, session.list(directory, pattern))
            .await
            .unwrap_or_else(|_| Err(TransportError::timeout("list", list_timeout)));

        match listing {
            Ok(names) => resolved.extend(names),
            Err(e) => warn!(pattern = %pattern, error = %e, "Wildcard expansion failed, skipping pattern"),
        }
    }

    info!("Files : {:?}", resolved);
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::testing::FakeRemote;
    use crate::harvest::traits::Transport;
    use crate::model::{Credentials, Endpoint};

    fn patterns(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    async fn session(remote: &FakeRemote) -> <FakeRemote as Transport>::Session {
        let endpoint = Endpoint {
            host: "fake".into(),
            port: 21,
        };
        let creds = Credentials {
            username: "u".into(),
            password: "p".into(),
        };
        remote.connect(&endpoint, &creds).await.unwrap()
    }

    #[test]
    fn test_wildcard_triggers() {
        assert!(has_wildcard("*.log"));
        assert!(has_wildcard("app-?.txt"));
        assert!(has_wildcard("a|b"));
        assert!(has_wildcard("my file.txt"));
        assert!(!has_wildcard("report.txt"));
        assert!(!has_wildcard("sub/dir/report.txt"));
    }

    #[tokio::test]
    async fn test_literals_pass_through_in_position() {
        let remote = FakeRemote::new().with_listing("*.log", &["x.log"]);
        let mut session = session(&remote).await;

        let resolved = resolve_files(
            &mut session,
            "~/",
            &patterns(&["a.txt", "*.log", "a.txt", "missing.txt"]),
            Duration::from_secs(1),
        )
        .await;

        assert_eq!(resolved, vec!["a.txt", "x.log", "a.txt", "missing.txt"]);
        // literals never hit the backend
        assert_eq!(remote.listed_patterns(), vec!["*.log"]);
    }

    #[tokio::test]
    async fn test_failed_listing_contributes_nothing() {
        let remote = FakeRemote::new().with_failing_listing("*.log");
        let mut session = session(&remote).await;

        let resolved = resolve_files(
            &mut session,
            "~/",
            &patterns(&["a.txt", "*.log"]),
            Duration::from_secs(1),
        )
        .await;

        assert_eq!(resolved, vec!["a.txt"]);
    }

    #[tokio::test]
    async fn test_failure_does_not_affect_later_patterns() {
        let remote = FakeRemote::new()
            .with_failing_listing("*.gz")
            .with_listing("*.log", &["b.log", "a.log"]);
        let mut session = session(&remote).await;

        let resolved = resolve_files(
            &mut session,
            "~/",
            &patterns(&["*.gz", "*.log", "c.txt"]),
            Duration::from_secs(1),
        )
        .await;

        // backend order is kept, not sorted
        assert_eq!(resolved, vec!["b.log", "a.log", "c.txt"]);
    }

    #[tokio::test]
    async fn test_overlapping_patterns_are_not_deduplicated() {
        let remote = FakeRemote::new()
            .with_listing("*.log", &["a.log", "b.log"])
            .with_listing("a.*", &["a.log"]);
        let mut session = session(&remote).await;

        let resolved = resolve_files(
            &mut session,
            "~/",
            &patterns(&["*.log", "a.*"]),
            Duration::from_secs(1),
        )
        .await;

        assert_eq!(resolved, vec!["a.log", "b.log", "a.log"]);
    }
}
