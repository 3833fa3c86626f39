//! Configuration lookup
//!
//! Configuration files are read elsewhere. The simulator only sees the
//! narrow [`ConfigSource`] contract: a string value per
//! `(repetition, section, key)`. Applications parse what they need through
//! [`Params`], which turns absent or malformed values into [`ConfigError`].

use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;

use crate::error::ConfigError;

/// Separator for list-valued parameters
pub const LIST_SEPARATOR: char = ';';

/// Keyed configuration lookup
pub trait ConfigSource {
    /// Raw value of `key` in `section` as seen by `repetition`
    fn value(&self, repetition: usize, section: &str, key: &str) -> Option<String>;

    /// Raw value, or `default` when absent
    fn value_or(&self, repetition: usize, section: &str, key: &str, default: &str) -> String {
        self.value(repetition, section, key)
            .unwrap_or_else(|| default.to_string())
    }
}

/// In-memory configuration with optional per-repetition overrides
#[derive(Clone, Debug, Default)]
pub struct MapConfig {
    values: HashMap<(String, String), String>,
    overrides: HashMap<(usize, String, String), String>,
}

impl MapConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value for every repetition
    pub fn set(&mut self, section: &str, key: &str, value: impl Display) -> &mut Self {
        self.values
            .insert((section.to_string(), key.to_string()), value.to_string());
        self
    }

    /// Builder form of [`set`](Self::set)
    pub fn with(mut self, section: &str, key: &str, value: impl Display) -> Self {
        self.set(section, key, value);
        self
    }

    /// Set a value that only `repetition` sees
    pub fn set_for_repetition(
        &mut self,
        repetition: usize,
        section: &str,
        key: &str,
        value: impl Display,
    ) -> &mut Self {
        self.overrides.insert(
            (repetition, section.to_string(), key.to_string()),
            value.to_string(),
        );
        self
    }
}

impl ConfigSource for MapConfig {
    fn value(&self, repetition: usize, section: &str, key: &str) -> Option<String> {
        self.overrides
            .get(&(repetition, section.to_string(), key.to_string()))
            .or_else(|| self.values.get(&(section.to_string(), key.to_string())))
            .cloned()
    }
}

/// Typed view of one configuration section for one repetition
pub struct Params<'a> {
    source: &'a dyn ConfigSource,
    repetition: usize,
    section: &'a str,
}

impl<'a> Params<'a> {
    pub fn new(source: &'a dyn ConfigSource, repetition: usize, section: &'a str) -> Self {
        Params {
            source,
            repetition,
            section,
        }
    }

    pub fn section(&self) -> &str {
        self.section
    }

    pub fn repetition(&self) -> usize {
        self.repetition
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.source
            .value(self.repetition, self.section, key)
            .map(|v| v.trim().to_string())
    }

    fn parse<T>(&self, key: &str, raw: &str) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        raw.parse::<T>()
            .map_err(|e| ConfigError::malformed(self.section, key, raw, e))
    }

    /// Required parameter
    pub fn require<T>(&self, key: &str) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        let raw = self
            .raw(key)
            .ok_or_else(|| ConfigError::missing(self.section, key))?;
        self.parse(key, &raw)
    }

    /// Optional parameter with a default
    pub fn get_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.raw(key) {
            Some(raw) => self.parse(key, &raw),
            None => Ok(default),
        }
    }

    /// Optional parameter, `None` when absent
    pub fn optional<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.raw(key).map(|raw| self.parse(key, &raw)).transpose()
    }

    /// Boolean flag; accepts `true/false`, `yes/no`, `1/0`
    pub fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        let Some(raw) = self.raw(key) else {
            return Ok(default);
        };
        match raw.to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" | "on" => Ok(true),
            "false" | "no" | "0" | "off" => Ok(false),
            _ => Err(ConfigError::malformed(
                self.section,
                key,
                &raw,
                "expected a boolean",
            )),
        }
    }

    /// Semicolon-delimited list. Empty when absent.
    pub fn list<T>(&self, key: &str) -> Result<Vec<T>, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        let Some(raw) = self.raw(key) else {
            return Ok(Vec::new());
        };
        raw.split(LIST_SEPARATOR)
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(|item| self.parse(key, item))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> MapConfig {
        MapConfig::new()
            .with("drg", "pg", 0.5)
            .with("drg", "msgTimeout", 2)
            .with("drg", "enabled", "yes")
            .with("drg", "initValues", "10; 20;30")
            .with("drg", "broken", "abc")
    }

    #[test]
    fn test_require_and_default() {
        let cfg = source();
        let params = Params::new(&cfg, 0, "drg");
        assert_eq!(params.require::<f64>("pg").unwrap(), 0.5);
        assert_eq!(params.get_or::<u64>("msgTimeout", 1).unwrap(), 2);
        assert_eq!(params.get_or::<u64>("tickTimeout", 1).unwrap(), 1);
        assert_eq!(params.optional::<u64>("absent").unwrap(), None);
    }

    #[test]
    fn test_missing_and_malformed() {
        let cfg = source();
        let params = Params::new(&cfg, 0, "drg");
        assert!(matches!(
            params.require::<f64>("absent"),
            Err(ConfigError::Missing { .. })
        ));
        assert!(matches!(
            params.require::<f64>("broken"),
            Err(ConfigError::Malformed { .. })
        ));
        assert!(params.flag("broken", false).is_err());
    }

    #[test]
    fn test_list_and_flag() {
        let cfg = source();
        let params = Params::new(&cfg, 0, "drg");
        assert_eq!(params.list::<u32>("initValues").unwrap(), vec![10, 20, 30]);
        assert!(params.list::<u32>("absent").unwrap().is_empty());
        assert!(params.flag("enabled", false).unwrap());
        assert!(!params.flag("absent", false).unwrap());
    }

    #[test]
    fn test_repetition_override() {
        let mut cfg = source();
        cfg.set_for_repetition(2, "drg", "pg", 0.9);
        assert_eq!(cfg.value(0, "drg", "pg").as_deref(), Some("0.5"));
        assert_eq!(cfg.value(2, "drg", "pg").as_deref(), Some("0.9"));
        assert_eq!(cfg.value_or(1, "drg", "absent", "x"), "x");
    }
}
