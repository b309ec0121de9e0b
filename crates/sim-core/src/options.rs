//! Runtime options
//!
//! Options are `name` or `name=value` entries, taken from the `[options]`
//! table of the configuration file and from the command line.

use crate::error::ConfigError;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A single runtime option
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimOption {
    pub name: String,
    pub value: Option<String>,
}

impl SimOption {
    pub fn new(name: &str, value: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            value: value.map(str::to_string),
        }
    }
}

impl FromStr for SimOption {
    type Err = ConfigError;

    /// Parse `name` or `name=value`
    fn from_str(entry: &str) -> Result<Self, Self::Err> {
        let option = match entry.split_once('=') {
            Some((name, value)) => Self::new(name.trim(), Some(value)),
            None => Self::new(entry.trim(), None),
        };
        if option.name.is_empty() {
            return Err(ConfigError::Invalid(format!("malformed option '{}'", entry)));
        }
        Ok(option)
    }
}

impl fmt::Display for SimOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "--{}={}", self.name, value),
            None => write!(f, "--{}", self.name),
        }
    }
}

/// Ordered list of runtime options; later entries override earlier ones
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimOptions {
    options: Vec<SimOption>,
}

impl SimOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the `[options]` table of a configuration file
    pub fn from_map(map: &BTreeMap<String, String>) -> Self {
        Self {
            options: map
                .iter()
                .map(|(name, value)| SimOption::new(name, Some(value)))
                .collect(),
        }
    }

    /// Append an option
    pub fn push(&mut self, option: SimOption) {
        self.options.push(option);
    }

    /// Append every option of `other`, so they override ours
    pub fn extend(&mut self, other: SimOptions) {
        self.options.extend(other.options);
    }

    /// Most recent option with this name
    pub fn get(&self, name: &str) -> Option<&SimOption> {
        self.options.iter().rev().find(|o| o.name == name)
    }

    /// Value of the most recent option with this name
    pub fn value(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|o| o.value.as_deref())
    }

    /// Whether the option was given at all
    pub fn is_set(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SimOption> {
        self.options.iter()
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }
}

impl FromIterator<SimOption> for SimOptions {
    fn from_iter<I: IntoIterator<Item = SimOption>>(iter: I) -> Self {
        Self {
            options: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a SimOptions {
    type Item = &'a SimOption;
    type IntoIter = std::slice::Iter<'a, SimOption>;

    fn into_iter(self) -> Self::IntoIter {
        self.options.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(entries: &[&str]) -> Result<SimOptions, ConfigError> {
        entries.iter().map(|e| e.parse::<SimOption>()).collect()
    }

    #[test]
    fn test_parse_option_entries() {
        let options = parse(&["verbose", "engine=fast", "empty="]).unwrap();

        assert_eq!(options.len(), 3);
        assert!(options.is_set("verbose"));
        assert_eq!(options.value("verbose"), None);
        assert_eq!(options.value("engine"), Some("fast"));
        assert_eq!(options.value("empty"), Some(""));
        assert!(!options.is_set("missing"));
    }

    #[test]
    fn test_value_keeps_later_equals_signs() {
        let option: SimOption = "define=A=1".parse().unwrap();
        assert_eq!(option, SimOption::new("define", Some("A=1")));
        assert_eq!(option.to_string(), "--define=A=1");
    }

    #[test]
    fn test_later_option_wins() {
        let options = parse(&["mode=a", "mode=b"]).unwrap();
        assert_eq!(options.value("mode"), Some("b"));
        assert_eq!(options.get("mode").unwrap().value.as_deref(), Some("b"));
    }

    #[test]
    fn test_malformed_option() {
        assert!(matches!(parse(&["=x"]), Err(ConfigError::Invalid(_))));
        assert!("".parse::<SimOption>().is_err());
    }

    #[test]
    fn test_from_map_and_extend() {
        let mut map = BTreeMap::new();
        map.insert("engine".to_string(), "slow".to_string());
        let mut options = SimOptions::from_map(&map);

        options.extend(parse(&["engine=fast"]).unwrap());

        assert_eq!(options.value("engine"), Some("fast"));
        assert_eq!(
            options.iter().map(|o| o.to_string()).collect::<Vec<_>>(),
            vec!["--engine=slow", "--engine=fast"]
        );
    }
}
