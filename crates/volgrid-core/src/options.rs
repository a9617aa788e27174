//! Volume option key validation.
//!
//! Option keys name a translator option as `<xlator>.<optname>`, or
//! `<prefix>.<xlator>.<optname>` when the option is set on a prefixed
//! instance of the translator. Validation is a pure function of the
//! options map; no cluster round-trip.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// The built-in translator option table.
///
/// Keys with an unknown translator or an option the translator does not
/// declare are rejected at request time.
const XLATOR_OPTIONS: &[(&str, &[&str])] = &[
    (
        "afr",
        &[
            "eager-lock",
            "self-heal-daemon",
            "data-self-heal",
            "metadata-self-heal",
            "entry-self-heal",
            "granular-entry-heal",
            "quorum-type",
            "quorum-count",
        ],
    ),
    ("dht", &["lookup-unhashed", "min-free-disk", "readdir-optimize", "rebalance-stats"]),
    ("ec", &["self-heal-daemon", "background-heals", "heal-wait-qlength"]),
    ("io-cache", &["cache-size", "cache-timeout", "max-file-size", "min-file-size"]),
    ("quick-read", &["cache-size", "cache-timeout", "max-file-size"]),
    ("write-behind", &["cache-size", "flush-behind", "trickling-writes"]),
    ("posix", &["update-link-count-parent", "health-check-interval"]),
];

fn xlator_declares(xlator: &str, optname: &str) -> bool {
    XLATOR_OPTIONS
        .iter()
        .find(|(name, _)| *name == xlator)
        .is_some_and(|(_, opts)| opts.contains(&optname))
}

/// Validates a single option key against the grammar.
pub fn validate_option_key(key: &str) -> Result<()> {
    let parts: Vec<&str> = key.split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(Error::invalid_argument(format!("option key {key:?} has empty components")));
    }
    let (xlator, optname) = match parts.as_slice() {
        [xlator, optname] => (*xlator, *optname),
        [_prefix, xlator, optname] => (*xlator, *optname),
        _ => {
            return Err(Error::invalid_argument(format!(
                "option key {key:?} must be <xlator>.<option> or <prefix>.<xlator>.<option>"
            )));
        }
    };
    if !xlator_declares(xlator, optname) {
        return Err(Error::invalid_argument(format!(
            "unknown option {optname:?} for translator {xlator:?}"
        )));
    }
    Ok(())
}

/// Validates every key of an options map.
pub fn validate_options(options: &HashMap<String, String>) -> Result<()> {
    for key in options.keys() {
        validate_option_key(key)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_plain_and_prefixed_keys() {
        validate_option_key("afr.eager-lock").unwrap();
        validate_option_key("gfproxy.afr.eager-lock").unwrap();
        validate_option_key("dht.lookup-unhashed").unwrap();
    }

    #[test]
    fn test_rejects_empty_components() {
        assert!(validate_option_key("..eager-lock").is_err());
        assert!(validate_option_key(".afr.eager-lock").is_err());
        assert!(validate_option_key("afr.").is_err());
    }

    #[test]
    fn test_rejects_wrong_arity() {
        assert!(validate_option_key("eager-lock").is_err());
        assert!(validate_option_key("a.b.afr.eager-lock").is_err());
    }

    #[test]
    fn test_rejects_unknown_names() {
        assert!(validate_option_key("afr.non-existent").is_err());
        assert!(validate_option_key("nosuch.eager-lock").is_err());
    }

    #[test]
    fn test_validate_options_map() {
        let mut options = HashMap::new();
        options.insert("afr.eager-lock".to_string(), "on".to_string());
        options.insert("io-cache.cache-size".to_string(), "64MB".to_string());
        validate_options(&options).unwrap();

        options.insert("bogus".to_string(), "on".to_string());
        assert!(validate_options(&options).is_err());
    }
}
