//! # Validation
//!
//! Kubernetes name, namespace and label checks (RFC 1123), plus duration parsing
//! for interval settings.

use anyhow::Result;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

// RFC 1123 subdomain: [a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*
static NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("Failed to compile name regex - this should never happen")
});

// RFC 1123 label: [a-z0-9]([-a-z0-9]*[a-z0-9])?
static NAMESPACE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$")
        .expect("Failed to compile namespace regex - this should never happen")
});

// Label values may also be mixed case and contain underscores and dots
static LABEL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9]([-A-Za-z0-9_.]*[A-Za-z0-9])?$")
        .expect("Failed to compile label regex - this should never happen")
});

static DURATION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<number>\d+)(?P<unit>[smhd])$")
        .expect("Failed to compile duration regex - this should never happen")
});

/// Validate Kubernetes resource name (RFC 1123 subdomain)
/// Format: lowercase alphanumeric, hyphens, dots
/// Length: 1-253 characters
pub fn validate_kubernetes_name(name: &str, field_name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(anyhow::anyhow!("{field_name} cannot be empty"));
    }

    if name.len() > 253 {
        return Err(anyhow::anyhow!(
            "{} '{}' exceeds maximum length of 253 characters (got {})",
            field_name,
            name,
            name.len()
        ));
    }

    if !NAME_REGEX.is_match(name) {
        return Err(anyhow::anyhow!(
            "{field_name} '{name}' must be a valid Kubernetes name (lowercase alphanumeric, hyphens, dots; cannot start/end with hyphen or dot)"
        ));
    }

    Ok(())
}

/// Validate Kubernetes namespace (RFC 1123 label)
/// Format: lowercase alphanumeric, hyphens
/// Length: 1-63 characters
pub fn validate_kubernetes_namespace(namespace: &str, field_name: &str) -> Result<()> {
    if namespace.is_empty() {
        return Err(anyhow::anyhow!("{field_name} cannot be empty"));
    }

    if namespace.len() > 63 {
        return Err(anyhow::anyhow!(
            "{} '{}' exceeds maximum length of 63 characters (got {})",
            field_name,
            namespace,
            namespace.len()
        ));
    }

    if !NAMESPACE_REGEX.is_match(namespace) {
        return Err(anyhow::anyhow!(
            "{field_name} '{namespace}' must be a valid Kubernetes namespace (lowercase alphanumeric, hyphens; cannot start/end with hyphen)"
        ));
    }

    Ok(())
}

/// Validate Kubernetes label value
/// Length: 1-63 characters
pub fn validate_kubernetes_label(label: &str, field_name: &str) -> Result<()> {
    if label.is_empty() {
        return Err(anyhow::anyhow!("{field_name} cannot be empty"));
    }

    if label.len() > 63 {
        return Err(anyhow::anyhow!(
            "{} '{}' exceeds maximum length of 63 characters (got {})",
            field_name,
            label,
            label.len()
        ));
    }

    if !LABEL_REGEX.is_match(label) {
        return Err(anyhow::anyhow!(
            "{field_name} '{label}' must be a valid Kubernetes label value (alphanumeric, hyphens, dots, underscores; must start and end alphanumeric)"
        ));
    }

    Ok(())
}

/// Parse a Kubernetes-style duration string into [`Duration`]
/// Supports formats: "30s", "1m", "5m", "1h", "2h", "1d"
pub fn parse_duration(duration_str: &str) -> Result<Duration> {
    let trimmed = duration_str.trim();

    if trimmed.is_empty() {
        return Err(anyhow::anyhow!("Duration string cannot be empty"));
    }

    let lower = trimmed.to_lowercase();
    let captures = DURATION_REGEX.captures(&lower).ok_or_else(|| {
        anyhow::anyhow!(
            "Invalid duration format '{trimmed}'. Expected format: <number><unit> (e.g., '30s', '15m', '1h')"
        )
    })?;

    let number: u64 = captures["number"]
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid duration number in '{trimmed}': {e}"))?;

    if number == 0 {
        return Err(anyhow::anyhow!(
            "Duration number must be greater than 0, got '{trimmed}'"
        ));
    }

    let multiplier = match &captures["unit"] {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        unit => {
            return Err(anyhow::anyhow!(
                "Invalid unit '{unit}' in duration '{trimmed}'. Expected: s, m, h, or d"
            ));
        }
    };

    let seconds = number
        .checked_mul(multiplier)
        .ok_or_else(|| anyhow::anyhow!("Duration '{trimmed}' is too large"))?;

    Ok(Duration::from_secs(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("15m").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86400));
        assert_eq!(parse_duration(" 5M ").unwrap(), Duration::from_secs(300));
    }

    #[test]
    fn test_parse_duration_rejects_bad_input() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("1w").is_err());
        assert!(parse_duration("1m30s").is_err());
    }

    #[test]
    fn test_validate_kubernetes_name() {
        assert!(validate_kubernetes_name("db-creds", "secretName").is_ok());
        assert!(validate_kubernetes_name("app.db-creds", "secretName").is_ok());
        assert!(validate_kubernetes_name("", "secretName").is_err());
        assert!(validate_kubernetes_name("DB", "secretName").is_err());
        assert!(validate_kubernetes_name("-db", "secretName").is_err());
        assert!(validate_kubernetes_name(&"a".repeat(254), "secretName").is_err());
    }

    #[test]
    fn test_validate_kubernetes_namespace() {
        assert!(validate_kubernetes_namespace("ns1", "namespace").is_ok());
        assert!(validate_kubernetes_namespace("kube.system", "namespace").is_err());
        assert!(validate_kubernetes_namespace(&"a".repeat(64), "namespace").is_err());
    }

    #[test]
    fn test_validate_kubernetes_label() {
        assert!(validate_kubernetes_label("default", "label").is_ok());
        assert!(validate_kubernetes_label("Team_A.prod", "label").is_ok());
        assert!(validate_kubernetes_label(".bad", "label").is_err());
        assert!(validate_kubernetes_label("has space", "label").is_err());
    }
}
