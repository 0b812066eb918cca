//! Per-zone access control: an ordered list of (match, action, verdict)
//! entries. The first entry whose match and action apply decides; an
//! empty list allows everything.

use std::net::{IpAddr, SocketAddr};

use serde::Deserialize;

use crate::name::Name;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AclAction {
    Query,
    Notify,
    ProvideXfr,
    RequestXfr,
}

impl AclAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AclAction::Query => "query",
            AclAction::Notify => "notify",
            AclAction::ProvideXfr => "provide-xfr",
            AclAction::RequestXfr => "request-xfr",
        }
    }
}

/// One ACL entry. `address` and `key` are both optional; an entry with
/// neither matches every client.
#[derive(Clone, Debug, Deserialize)]
pub struct AclEntry {
    pub action: AclAction,
    #[serde(default)]
    pub address: Option<IpAddr>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default = "default_allow")]
    pub allow: bool,
}

fn default_allow() -> bool {
    true
}

impl AclEntry {
    fn matches(&self, source: &SocketAddr, tsig_key: Option<&Name>) -> bool {
        if let Some(addr) = self.address {
            return addr == source.ip();
        }
        if let Some(key) = &self.key {
            return match (tsig_key, key.parse::<Name>()) {
                (Some(presented), Ok(wanted)) => *presented == wanted,
                _ => false,
            };
        }
        true
    }
}

/// First matching entry for `action` wins. No entries for the action
/// means allow; entries present but none matching means deny. Denials
/// are logged with the zone and client identity.
pub fn check_acl(
    acl: &[AclEntry],
    apex: &Name,
    action: AclAction,
    source: &SocketAddr,
    tsig_key: Option<&Name>,
) -> bool {
    let mut saw_action = false;
    let mut allow = true;
    for entry in acl.iter().filter(|e| e.action == action) {
        saw_action = true;
        if entry.matches(source, tsig_key) {
            allow = entry.allow;
            break;
        }
        allow = false;
    }
    if saw_action && !allow {
        log::info!(
            target: "query",
            "{} denied for zone '{}' for client {}",
            action.as_str(),
            apex,
            source
        );
    }
    allow
}

#[cfg(test)]
mod tests {
    use super::*;

    fn src(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn empty_acl_allows() {
        let apex = "example.".parse().unwrap();
        assert!(check_acl(&[], &apex, AclAction::Query, &src("192.0.2.1:1234"), None));
    }

    #[test]
    fn first_match_wins() {
        let apex = "example.".parse().unwrap();
        let acl = vec![
            AclEntry {
                action: AclAction::Query,
                address: Some("192.0.2.1".parse().unwrap()),
                key: None,
                allow: false,
            },
            AclEntry {
                action: AclAction::Query,
                address: None,
                key: None,
                allow: true,
            },
        ];
        assert!(!check_acl(&acl, &apex, AclAction::Query, &src("192.0.2.1:53"), None));
        assert!(check_acl(&acl, &apex, AclAction::Query, &src("192.0.2.2:53"), None));
        // Entries for other actions are skipped entirely.
        assert!(check_acl(&acl, &apex, AclAction::Notify, &src("192.0.2.1:53"), None));
    }

    #[test]
    fn key_match_compares_names() {
        let apex = "example.".parse().unwrap();
        let acl = vec![AclEntry {
            action: AclAction::ProvideXfr,
            address: None,
            key: Some("transfer-key.".into()),
            allow: true,
        }];
        let key: Name = "TRANSFER-KEY.".parse().unwrap();
        assert!(check_acl(
            &acl,
            &apex,
            AclAction::ProvideXfr,
            &src("192.0.2.9:53"),
            Some(&key)
        ));
        // A client presenting no key matches nothing, and an action with
        // entries but no match is denied.
        assert!(!check_acl(&acl, &apex, AclAction::ProvideXfr, &src("192.0.2.9:53"), None));
    }
}
