//! SageMaker resource naming
//!
//! Generated names look like `medgemma-4b-it-2026-10-18-09-30-00-123`: the last
//! segment of the model id followed by a millisecond UTC timestamp.

use chrono::{DateTime, Utc};

/// SageMaker limit for model, endpoint and endpoint-config names
pub const MAX_NAME_LEN: usize = 63;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S-%3f";
const FALLBACK_BASE: &str = "medgemma";

/// Name base derived from a model id (`google/medgemma-4b-it` -> `medgemma-4b-it`)
pub fn base_name(model_id: &str) -> String {
    let last = model_id.rsplit('/').next().unwrap_or(model_id);

    let mut base = String::with_capacity(last.len());
    for c in last.chars() {
        let c = if c.is_ascii_alphanumeric() {
            c.to_ascii_lowercase()
        } else {
            '-'
        };
        if c == '-' && (base.is_empty() || base.ends_with('-')) {
            continue;
        }
        base.push(c);
    }

    let base = base.trim_end_matches('-');
    if base.is_empty() {
        FALLBACK_BASE.to_string()
    } else {
        base.to_string()
    }
}

/// Timestamped resource name for `model_id` at `now`
pub fn resource_name(model_id: &str, now: DateTime<Utc>) -> String {
    let stamp = now.format(TIMESTAMP_FORMAT).to_string();
    let budget = MAX_NAME_LEN - stamp.len() - 1;

    let base = base_name(model_id);
    let base = base[..base.len().min(budget)].trim_end_matches('-');

    format!("{}-{}", base, stamp)
}

/// Endpoint name: the configured one, else a generated name
pub fn endpoint_name(configured: Option<&str>, model_id: &str, now: DateTime<Utc>) -> String {
    match configured {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => resource_name(model_id, now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 9, 30, 0).unwrap() + chrono::Duration::milliseconds(123)
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("google/medgemma-4b-it"), "medgemma-4b-it");
        assert_eq!(base_name("Org/Med_Gemma..27B"), "med-gemma-27b");
        assert_eq!(base_name("///"), "medgemma");
    }

    #[test]
    fn test_resource_name_format() {
        let name = resource_name("google/medgemma-4b-it", fixed_time());
        assert_eq!(name, "medgemma-4b-it-2026-10-18-09-30-00-123");
    }

    #[test]
    fn test_resource_name_respects_limit() {
        let long = format!("org/{}", "x".repeat(120));
        let name = resource_name(&long, fixed_time());
        assert!(name.len() <= MAX_NAME_LEN);
        assert!(name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
    }

    #[test]
    fn test_endpoint_name_prefers_configured() {
        assert_eq!(
            endpoint_name(Some("my-endpoint"), "google/medgemma-4b-it", fixed_time()),
            "my-endpoint"
        );
        assert!(endpoint_name(None, "google/medgemma-4b-it", fixed_time())
            .starts_with("medgemma-4b-it-"));
    }
}
