//! Sender parsing and domain-based routing of inbound mail to clients.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::warn;

use crate::store::Client;

static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").unwrap());

/// Pull the address out of a From header. Display-name forms like
/// `Jane Doe <jane@acme.com>` use the angle-bracketed part; otherwise the
/// first thing that looks like an address wins.
pub fn sender_address(from_header: &str) -> Option<String> {
    if let (Some(start), Some(end)) = (from_header.rfind('<'), from_header.rfind('>')) {
        if start < end {
            let candidate = from_header[start + 1..end].trim();
            if candidate.contains('@') {
                return Some(normalize_address(candidate));
            }
        }
    }
    EMAIL_PATTERN
        .find(from_header)
        .map(|found| normalize_address(found.as_str()))
}

pub fn sender_display_name(from_header: &str) -> Option<String> {
    let start = from_header.find('<')?;
    let name = from_header[..start].trim().trim_matches('"').trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Lowercased, trimmed form used for comparisons. Plus-tags are kept:
/// jane+billing@acme.com and jane@acme.com are distinct requesters.
pub fn normalize_address(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

pub fn normalize_domain(raw: &str) -> String {
    raw.trim()
        .trim_start_matches('@')
        .trim_end_matches('.')
        .to_ascii_lowercase()
}

pub fn address_domain(address: &str) -> Option<String> {
    let at = address.rfind('@')?;
    let domain = normalize_domain(&address[at + 1..]);
    if domain.is_empty() {
        None
    } else {
        Some(domain)
    }
}

/// Registered client domains of one tenant, resolved by exact match on the
/// sender's domain. When two clients claim the same domain the
/// earliest-created one keeps it and the loser is logged.
#[derive(Debug, Default)]
pub struct DomainRoutingTable {
    by_domain: HashMap<String, String>,
}

impl DomainRoutingTable {
    pub fn build(clients: &[Client]) -> Self {
        let mut ordered: Vec<&Client> = clients.iter().collect();
        ordered.sort_by_key(|client| client.created_at);

        let mut by_domain: HashMap<String, String> = HashMap::new();
        for client in ordered {
            for raw in &client.domains {
                let domain = normalize_domain(raw);
                if domain.is_empty() {
                    continue;
                }
                match by_domain.get(&domain) {
                    Some(existing) if existing != &client.id => {
                        warn!(
                            "domain {} claimed by client {} already routes to client {}",
                            domain, client.id, existing
                        );
                    }
                    Some(_) => {}
                    None => {
                        by_domain.insert(domain, client.id.clone());
                    }
                }
            }
        }
        Self { by_domain }
    }

    pub fn resolve(&self, sender: &str) -> Option<&str> {
        let domain = address_domain(sender)?;
        self.by_domain.get(&domain).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.by_domain.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_domain.len()
    }
}
