//! Typed environment lookups
//!
//! Every loader in the workspace reads its settings through [`EnvReader`], so
//! a malformed value surfaces as a [`ConfigError`] naming the variable instead
//! of being silently replaced by a default. Blank values count as unset.
//!
//! Tests build readers from fixed pairs instead of mutating the process
//! environment:
//!
//! ```
//! use loyalty_common::env::EnvReader;
//!
//! let env = EnvReader::from_pairs([("INGEST_UPLOAD_WORKERS", "4")]);
//! assert_eq!(env.parse_or("INGEST_UPLOAD_WORKERS", 2usize).unwrap(), 4);
//! assert_eq!(env.parse_or("INGEST_BATCH_SIZE", 100usize).unwrap(), 100);
//! ```

use crate::error::{ConfigError, ConfigResult};
use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;

type Lookup<'a> = Box<dyn Fn(&str) -> Option<String> + Send + Sync + 'a>;

/// Source of string settings keyed by variable name
pub struct EnvReader<'a> {
    lookup: Lookup<'a>,
}

impl EnvReader<'static> {
    /// Read from the process environment
    pub fn process() -> Self {
        Self {
            lookup: Box::new(|name| std::env::var(name).ok()),
        }
    }

    /// Read from a fixed set of pairs
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let map: HashMap<String, String> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            lookup: Box::new(move |name| map.get(name).cloned()),
        }
    }
}

impl<'a> EnvReader<'a> {
    /// Read through an arbitrary lookup function
    pub fn from_fn(lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'a) -> Self {
        Self {
            lookup: Box::new(lookup),
        }
    }

    /// Raw value, trimmed; blank values are treated as unset
    pub fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    pub fn required(&self, name: &str) -> ConfigResult<String> {
        self.get(name).ok_or_else(|| ConfigError::missing(name))
    }

    pub fn string_or(&self, name: &str, default: &str) -> String {
        self.get(name).unwrap_or_else(|| default.to_string())
    }

    /// Parse an optional value, failing if it is present but malformed
    pub fn parse_opt<T>(&self, name: &str) -> ConfigResult<Option<T>>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(name) {
            Some(raw) => raw
                .parse::<T>()
                .map(Some)
                .map_err(|e| ConfigError::invalid(name, &raw, e.to_string())),
            None => Ok(None),
        }
    }

    pub fn parse_or<T>(&self, name: &str, default: T) -> ConfigResult<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        Ok(self.parse_opt(name)?.unwrap_or(default))
    }

    /// Accepts true/false, 1/0, yes/no, on/off
    pub fn bool_or(&self, name: &str, default: bool) -> ConfigResult<bool> {
        let Some(raw) = self.get(name) else {
            return Ok(default);
        };
        match raw.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::invalid(name, raw, "expected a boolean")),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_values_are_unset() {
        let env = EnvReader::from_pairs([("A", "   "), ("B", " value ")]);
        assert_eq!(env.get("A"), None);
        assert_eq!(env.get("B").as_deref(), Some("value"));
        assert_eq!(env.required("A"), Err(ConfigError::missing("A")));
    }

    #[test]
    fn test_malformed_number_is_an_error() {
        let env = EnvReader::from_pairs([("INGEST_BATCH_SIZE", "lots")]);
        let err = env.parse_or("INGEST_BATCH_SIZE", 10usize).unwrap_err();
        assert_eq!(err.setting(), "INGEST_BATCH_SIZE");
    }

    #[test]
    fn test_float_and_bool_parsing() {
        let env = EnvReader::from_pairs([("RPS", "4.5"), ("FLAG", "Yes"), ("BAD", "maybe")]);
        assert_eq!(env.parse_or("RPS", 1.0f64).unwrap(), 4.5);
        assert!(env.bool_or("FLAG", false).unwrap());
        assert!(env.bool_or("MISSING", true).unwrap());
        assert!(env.bool_or("BAD", true).is_err());
    }

    #[test]
    fn test_from_fn() {
        let env = EnvReader::from_fn(|name| (name == "X").then(|| "1".to_string()));
        assert_eq!(env.parse_opt::<u32>("X").unwrap(), Some(1));
        assert_eq!(env.parse_opt::<u32>("Y").unwrap(), None);
    }
}
