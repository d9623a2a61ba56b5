//! Workspace hostname classification and parsing.
//!
//! Workspace hosts look like `<user>--<repo>.<base-domain>`; everything else
//! belongs to the public site and falls through to the application router.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubdomainError {
    /// The host does not name a workspace subdomain.
    #[error("not a workspace subdomain")]
    NotWorkspace,

    /// The first label carries `--` but does not split into exactly
    /// `<user>--<repo>`.
    #[error("unparseable workspace subdomain")]
    Malformed,
}

/// Drop a trailing `:port` if present.
pub fn strip_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}

/// Whether a request for this host should be routed to the workspace
/// gateway at all. `www.<base>` stays on the public site even when the rest
/// of the host carries `--`.
pub fn is_workspace_host(host: &str) -> bool {
    let host = strip_port(host);
    host.contains("--") && first_label(host) != Some("www")
}

/// Extract `(user, repo)` from the first host label.
///
/// Multi-dash usernames or repos are not supported: the label must split on
/// `--` into exactly two non-empty parts of `[A-Za-z0-9-]`.
pub fn parse_subdomain(host: &str) -> Result<(String, String), SubdomainError> {
    let host = strip_port(host);
    let label = first_label(host).ok_or(SubdomainError::NotWorkspace)?;
    if label == "www" || !label.contains("--") {
        return Err(SubdomainError::NotWorkspace);
    }
    let parts: Vec<&str> = label.split("--").collect();
    match parts.as_slice() {
        [user, repo] if is_valid_part(user) && is_valid_part(repo) => {
            Ok((user.to_string(), repo.to_string()))
        }
        _ => Err(SubdomainError::Malformed),
    }
}

/// The host with its first dot-label stripped, keeping any port. Used to
/// send unauthenticated visitors back to the apex domain.
pub fn base_host(host: &str) -> Option<&str> {
    host.split_once('.').map(|(_, rest)| rest)
}

fn first_label(host: &str) -> Option<&str> {
    host.split('.').next().filter(|l| !l.is_empty())
}

fn is_valid_part(part: &str) -> bool {
    !part.is_empty()
        && part
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_workspace_hosts() {
        assert!(is_workspace_host("alice--demo.eureka.local"));
        assert!(is_workspace_host("alice--demo.eureka.local:4000"));
        assert!(!is_workspace_host("eureka.local"));
        assert!(!is_workspace_host("www.eureka.local"));
        // www stays on the public site even with a dashed host elsewhere.
        assert!(!is_workspace_host("www.a--b.eureka.local"));
    }

    #[test]
    fn parses_user_and_repo() {
        assert_eq!(
            parse_subdomain("alice--demo.eureka.local"),
            Ok(("alice".to_string(), "demo".to_string()))
        );
        assert_eq!(
            parse_subdomain("alice--demo.eureka.local:4000"),
            Ok(("alice".to_string(), "demo".to_string()))
        );
        assert_eq!(
            parse_subdomain("a-b--c-d.eureka.local"),
            Ok(("a-b".to_string(), "c-d".to_string()))
        );
    }

    /// parse(format(user, repo, base)) round-trips for single-dash names.
    #[test]
    fn parse_round_trips() {
        for (user, repo) in [("alice", "demo"), ("a1", "r2"), ("x-y", "z")] {
            let host = format!("{user}--{repo}.eureka.local");
            assert_eq!(
                parse_subdomain(&host),
                Ok((user.to_string(), repo.to_string()))
            );
        }
    }

    #[test]
    fn rejects_www_and_plain_hosts() {
        assert_eq!(
            parse_subdomain("www.eureka.local"),
            Err(SubdomainError::NotWorkspace)
        );
        assert_eq!(
            parse_subdomain("eureka.local"),
            Err(SubdomainError::NotWorkspace)
        );
        // The dashes live in a later label, not the subdomain.
        assert_eq!(
            parse_subdomain("x.alice--demo.eureka.local"),
            Err(SubdomainError::NotWorkspace)
        );
    }

    #[test]
    fn rejects_malformed_labels() {
        assert_eq!(
            parse_subdomain("alice--.eureka.local"),
            Err(SubdomainError::Malformed)
        );
        assert_eq!(
            parse_subdomain("--demo.eureka.local"),
            Err(SubdomainError::Malformed)
        );
        assert_eq!(
            parse_subdomain("a--b--c.eureka.local"),
            Err(SubdomainError::Malformed)
        );
        assert_eq!(
            parse_subdomain("al_ice--demo.eureka.local"),
            Err(SubdomainError::Malformed)
        );
    }

    #[test]
    fn strips_ports_only() {
        assert_eq!(strip_port("eureka.local:4000"), "eureka.local");
        assert_eq!(strip_port("eureka.local"), "eureka.local");
        assert_eq!(strip_port("bad:port:"), "bad:port:");
    }

    #[test]
    fn base_host_drops_first_label() {
        assert_eq!(
            base_host("alice--demo.eureka.local:4000"),
            Some("eureka.local:4000")
        );
        assert_eq!(base_host("eureka.local"), Some("local"));
        assert_eq!(base_host("localhost"), None);
    }
}
