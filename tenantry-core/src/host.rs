//! Tenant extraction from request host names.

use crate::TenantId;

/// Minimum number of DNS labels a host needs to carry a tenant subdomain
/// (`tenant.example.com`).
const MIN_HOST_LABELS: usize = 3;

/// Extract the tenant identifier from a `Host` header value.
///
/// The port is stripped and the first label is taken when the host has at
/// least three labels. Hosts like `example.com` or `localhost:8000` carry no
/// tenant and yield `None`, as does a first label that is not a valid
/// identifier.
pub fn tenant_from_host(host: &str) -> Option<TenantId> {
    let host = strip_port(host.trim());
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < MIN_HOST_LABELS {
        return None;
    }
    TenantId::parse(labels[0]).ok()
}

fn strip_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subdomain_with_port() {
        let id = tenant_from_host("company1.example.com:8000").expect("tenant in host");
        assert_eq!(id.as_str(), "company1");
    }

    #[test]
    fn test_subdomain_is_lowercased() {
        let id = tenant_from_host("Acme.App.Example.com").expect("tenant in host");
        assert_eq!(id.as_str(), "acme");
    }

    #[test]
    fn test_too_few_labels() {
        assert_eq!(tenant_from_host("example.com"), None);
        assert_eq!(tenant_from_host("localhost:8000"), None);
        assert_eq!(tenant_from_host(""), None);
    }

    #[test]
    fn test_invalid_first_label() {
        assert_eq!(tenant_from_host("-bad.example.com"), None);
        assert_eq!(tenant_from_host(".example.com"), None);
    }
}
