//! Website domain normalization

/// Reduce a URL or host to its bare registrable host
///
/// Drops scheme, credentials, port, path, query and a leading `www.`, and
/// lowercases. Returns `None` when nothing that looks like a host remains.
///
/// ```
/// use tda_audit::services::domain::normalize_domain;
/// assert_eq!(normalize_domain("https://www.Lac-Annecy.com/fr/"), Some("lac-annecy.com".to_string()));
/// ```
pub fn normalize_domain(value: &str) -> Option<String> {
    let trimmed = value.trim();
    let without_scheme = match trimmed.find("://") {
        Some(idx) => &trimmed[idx + 3..],
        None => trimmed,
    };

    let host = without_scheme
        .split(|c| c == '/' || c == '?' || c == '#')
        .next()
        .unwrap_or_default();
    let host = host.rsplit('@').next().unwrap_or_default();
    let host = host.split(':').next().unwrap_or_default();
    let host = host.trim_end_matches('.').to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(host.as_str());

    let valid = host.contains('.')
        && !host.starts_with('.')
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');

    valid.then(|| host.to_string())
}

/// `www.` form of a bare domain, used as the fallback variant
pub fn www_variant(domain: &str) -> String {
    if domain.starts_with("www.") {
        domain.to_string()
    } else {
        format!("www.{}", domain)
    }
}
