//! Replica subscription naming.
//!
//! A replica name is `{base}-{instance}-{suffix}`. The random suffix is
//! always kept whole; the `{base}-{instance}` prefix is cut to fit the
//! broker's length limit.

use uuid::Uuid;

/// Generate a lowercase hex suffix of `len` characters (at most 32).
pub fn random_suffix(len: usize) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    hex[..len.min(hex.len())].to_string()
}

/// Build a replica subscription name that fits within `max_len`.
pub fn replica_subscription_name(base: &str, instance: &str, suffix: &str, max_len: usize) -> String {
    let suffix = sanitize(suffix);
    if suffix.len() + 1 >= max_len {
        return suffix[..suffix.len().min(max_len)].to_string();
    }

    let prefix = sanitize(&format!("{base}-{instance}"));
    let budget = max_len - suffix.len() - 1;
    let prefix = prefix[..prefix.len().min(budget)].trim_end_matches(['-', '.', '_']);

    if prefix.is_empty() {
        suffix
    } else {
        format!("{prefix}-{suffix}")
    }
}

/// Replace characters brokers reject in entity names with `-`.
fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}
