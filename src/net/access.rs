//! Connection access control.
//!
//! The server asks its predicate once per inbound connection, with the
//! peer's IP address rendered as a string, before sending the handshake. A
//! rejected peer sees the socket close without a single byte.

use crate::core::config::ServerConfig;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

/// Decides whether a source address may connect.
pub trait AccessControl: Send + Sync {
    fn allow(&self, source_address: &str) -> bool;
}

impl<F> AccessControl for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn allow(&self, source_address: &str) -> bool {
        self(source_address)
    }
}

/// Accepts everyone.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessControl for AllowAll {
    fn allow(&self, _source_address: &str) -> bool {
        true
    }
}

/// Accepts an explicit set of addresses.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    addresses: HashSet<String>,
}

impl AllowList {
    pub fn new<I, A>(addresses: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        Self {
            addresses: addresses.into_iter().map(Into::into).collect(),
        }
    }
}

impl AccessControl for AllowList {
    fn allow(&self, source_address: &str) -> bool {
        self.addresses.contains(source_address)
    }
}

/// Accepts loopback peers only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalhostOnly;

impl AccessControl for LocalhostOnly {
    fn allow(&self, source_address: &str) -> bool {
        match source_address.parse::<IpAddr>() {
            Ok(IpAddr::V4(ip)) => ip.is_loopback(),
            // ::ffff:127.0.0.1 from a dual-stack socket counts too.
            Ok(IpAddr::V6(ip)) => {
                ip.is_loopback() || ip.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback())
            }
            Err(_) => false,
        }
    }
}

/// Predicate described by the `[server]` section.
pub fn from_config(config: &ServerConfig) -> Arc<dyn AccessControl> {
    if config.localhost_only {
        Arc::new(LocalhostOnly)
    } else if !config.allow.is_empty() {
        Arc::new(AllowList::new(config.allow.iter().cloned()))
    } else {
        Arc::new(AllowAll)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_list() {
        let list = AllowList::new(["10.0.0.1", "10.0.0.2"]);
        assert!(list.allow("10.0.0.1"));
        assert!(!list.allow("10.0.0.3"));
    }

    #[test]
    fn test_localhost_only() {
        assert!(LocalhostOnly.allow("127.0.0.1"));
        assert!(LocalhostOnly.allow("::1"));
        assert!(LocalhostOnly.allow("::ffff:127.0.0.1"));
        assert!(!LocalhostOnly.allow("192.168.1.10"));
        assert!(!LocalhostOnly.allow("not-an-ip"));
    }

    #[test]
    fn test_closure_predicate() {
        let deny_all = |_: &str| false;
        assert!(!deny_all.allow("127.0.0.1"));
    }

    #[test]
    fn test_from_config() {
        let mut config = ServerConfig::default();
        assert!(from_config(&config).allow("8.8.8.8"));

        config.allow = vec!["10.1.1.1".to_string()];
        let access = from_config(&config);
        assert!(access.allow("10.1.1.1"));
        assert!(!access.allow("8.8.8.8"));

        config.allow.clear();
        config.localhost_only = true;
        assert!(!from_config(&config).allow("8.8.8.8"));
    }
}
