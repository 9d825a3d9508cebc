//! Routing-key computation and inbound self-filtering.
//!
//! The command exchange is multi-tenant: one topic exchange, many listening
//! hosts. A process bound with the wildcard pattern receives every host's
//! commands and must ignore the ones not addressed to it; the bare prefix is
//! the broadcast marker accepted by every host.

/// Scope of a command subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandScope {
    /// Receive commands for every host
    Broadcast,
    /// Receive only commands addressed to the given host identity
    Host(String),
}

/// Routing key events are published at: `"{prefix}.{host}"`.
pub fn publish_key(prefix: &str, host: &str) -> String {
    format!("{}.{}", prefix, host)
}

/// Binding pattern for the command queue. The `#` wildcard also matches the
/// bare prefix, so a broadcast binding sees broadcast-marker messages too.
pub fn subscribe_key(prefix: &str, scope: &CommandScope) -> String {
    match scope {
        CommandScope::Broadcast => format!("{}.#", prefix),
        CommandScope::Host(host) => format!("{}.{}", prefix, host),
    }
}

/// Whether an inbound routing key targets this process: either the bare
/// prefix (broadcast) or the prefix followed by exactly our host identity.
pub fn is_addressed_to_us(routing_key: &str, prefix: &str, host: &str) -> bool {
    if routing_key == prefix {
        return true;
    }
    match routing_key
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('.'))
    {
        Some(suffix) => suffix == host,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_key() {
        assert_eq!(publish_key("ccs.pbx.event", "pbx-01"), "ccs.pbx.event.pbx-01");
    }

    #[test]
    fn test_subscribe_key_broadcast() {
        assert_eq!(
            subscribe_key("ccs.pbx.cmd", &CommandScope::Broadcast),
            "ccs.pbx.cmd.#"
        );
    }

    #[test]
    fn test_subscribe_key_host_scoped() {
        assert_eq!(
            subscribe_key("ccs.pbx.cmd", &CommandScope::Host("hostA".to_string())),
            "ccs.pbx.cmd.hostA"
        );
    }

    #[test]
    fn test_broadcast_marker_is_addressed_to_everyone() {
        assert!(is_addressed_to_us("ccs.pbx.cmd", "ccs.pbx.cmd", "hostA"));
        assert!(is_addressed_to_us("ccs.pbx.cmd", "ccs.pbx.cmd", "hostB"));
    }

    #[test]
    fn test_host_suffix_must_match() {
        assert!(is_addressed_to_us("ccs.pbx.cmd.hostA", "ccs.pbx.cmd", "hostA"));
        assert!(!is_addressed_to_us("ccs.pbx.cmd.hostB", "ccs.pbx.cmd", "hostA"));
    }

    #[test]
    fn test_prefix_must_match_exactly() {
        assert!(!is_addressed_to_us("ccs.pbx.cmdX.hostA", "ccs.pbx.cmd", "hostA"));
        assert!(!is_addressed_to_us("ccs.pbx", "ccs.pbx.cmd", "hostA"));
        assert!(!is_addressed_to_us("", "ccs.pbx.cmd", "hostA"));
    }

    #[test]
    fn test_deep_suffix_is_not_ours() {
        assert!(!is_addressed_to_us(
            "ccs.pbx.cmd.hostA.extra",
            "ccs.pbx.cmd",
            "hostA"
        ));
    }
}
