//! `TASKLET_*` environment overrides
//!
//! Every runtime tuning knob shares the `TASKLET_` prefix. Lookups go
//! through these helpers so a malformed value is logged and falls back
//! to the built-in default instead of silently vanishing, which is how
//! a typo like `TASKLET_WORKERS=fuor` would otherwise shrink a
//! production pool to its default.

use std::str::FromStr;

/// Prefix shared by every tasklet environment variable
pub const ENV_PREFIX: &str = "TASKLET_";

/// Read `TASKLET_<key>` parsed as `T`, or fall back to `default`
///
/// The key is given without the prefix: `override_from_env("WORKERS", 4)`
/// reads `TASKLET_WORKERS`.
pub fn override_from_env<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    let var = format!("{}{}", ENV_PREFIX, key);
    match std::env::var(&var) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                log::warn!("ignoring malformed {}={:?}", var, raw);
                default
            }
        },
        Err(_) => default,
    }
}

/// Read `TASKLET_<key>` as an on/off flag
///
/// "1", "true", "yes", "on" enable; "0", "false", "no", "off" disable
/// (case-insensitive). Anything else is logged and ignored.
pub fn override_flag(key: &str, default: bool) -> bool {
    let var = format!("{}{}", ENV_PREFIX, key);
    match std::env::var(&var) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => {
                log::warn!("ignoring malformed {}={:?}", var, raw);
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_returns_default() {
        let val: usize = override_from_env("TEST_UNSET_KNOB", 42);
        assert_eq!(val, 42);
        assert!(override_flag("TEST_UNSET_FLAG", true));
    }

    #[test]
    fn test_override_reads_prefixed_var() {
        std::env::set_var("TASKLET_TEST_NUM_KNOB", " 123 ");
        let val: usize = override_from_env("TEST_NUM_KNOB", 0);
        assert_eq!(val, 123);

        // The unprefixed name must not be consulted.
        std::env::set_var("TEST_NUM_KNOB", "999");
        let val: usize = override_from_env("TEST_NUM_KNOB", 0);
        assert_eq!(val, 123);

        std::env::remove_var("TASKLET_TEST_NUM_KNOB");
        std::env::remove_var("TEST_NUM_KNOB");
    }

    #[test]
    fn test_malformed_value_falls_back() {
        std::env::set_var("TASKLET_TEST_BAD_KNOB", "not_a_number");
        let val: usize = override_from_env("TEST_BAD_KNOB", 99);
        assert_eq!(val, 99);
        std::env::remove_var("TASKLET_TEST_BAD_KNOB");
    }

    #[test]
    fn test_flag_variants() {
        for (raw, expected) in [
            ("1", true),
            ("TRUE", true),
            ("yes", true),
            ("on", true),
            ("0", false),
            ("false", false),
            ("no", false),
            ("OFF", false),
        ] {
            std::env::set_var("TASKLET_TEST_FLAG", raw);
            assert_eq!(override_flag("TEST_FLAG", !expected), expected, "raw {:?}", raw);
        }

        // Garbage keeps the default rather than guessing.
        std::env::set_var("TASKLET_TEST_FLAG", "maybe");
        assert!(override_flag("TEST_FLAG", true));
        assert!(!override_flag("TEST_FLAG", false));

        std::env::remove_var("TASKLET_TEST_FLAG");
    }
}
