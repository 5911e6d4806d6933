//! Feed catalogue loading and filtering.
//!
//! The catalogue is a YAML document listing every feed the pipeline pulls
//! from. It is configuration input: loaded once at startup, immutable
//! afterwards.
//!
//! ```yaml
//! feeds:
//!   - url: https://example.com/security.rss
//!     tag: example-security
//!     language: en
//!   - url: https://other.example/atom.xml
//!     tag: "country:Nigeria"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;

/// A single feed source definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSource {
    /// Feed URL (RSS, Atom, or JSON Feed).
    pub url: String,
    /// Short tag identifying the source; a `country:X` tag doubles as a
    /// location hint for every entry of the feed.
    pub tag: String,
    /// ISO language code of the feed content.
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    "en".to_string()
}

impl FeedSource {
    /// Creates a source with the default language.
    pub fn new(url: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            tag: tag.into(),
            language: default_language(),
        }
    }
}

/// The full set of feeds to pull each cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedCatalogue {
    /// All configured feed sources.
    pub feeds: Vec<FeedSource>,
}

impl FeedCatalogue {
    /// Parses a catalogue from YAML text.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let catalogue: FeedCatalogue = serde_yaml::from_str(yaml)
            .map_err(|e| ConfigError::InvalidCatalogue(e.to_string()))?;
        catalogue.validate()?;
        Ok(catalogue)
    }

    /// Loads a catalogue from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::InvalidCatalogue(format!("{}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&contents)
    }

    /// Restricts the catalogue to the given tags; an empty filter keeps
    /// everything.
    pub fn filtered(&self, tags: &[String]) -> Self {
        if tags.is_empty() {
            return self.clone();
        }
        let feeds = self
            .feeds
            .iter()
            .filter(|f| tags.iter().any(|t| t == &f.tag))
            .cloned()
            .collect();
        Self { feeds }
    }

    /// Number of configured feeds.
    pub fn len(&self) -> usize {
        self.feeds.len()
    }

    /// Whether the catalogue has no feeds.
    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for feed in &self.feeds {
            if feed.url.is_empty() {
                return Err(ConfigError::InvalidCatalogue(
                    "feed with empty url".to_string(),
                ));
            }
            if !feed.url.starts_with("http://") && !feed.url.starts_with("https://") {
                return Err(ConfigError::InvalidCatalogue(format!(
                    "feed url '{}' is not http(s)",
                    feed.url
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
feeds:
  - url: https://example.com/security.rss
    tag: example-security
    language: en
  - url: https://other.example/atom.xml
    tag: "country:Nigeria"
"#;

    #[test]
    fn test_parse_catalogue() {
        let cat = FeedCatalogue::from_yaml_str(SAMPLE).expect("should parse");
        assert_eq!(cat.len(), 2);
        assert_eq!(cat.feeds[0].tag, "example-security");
        // Missing language falls back to the default.
        assert_eq!(cat.feeds[1].language, "en");
    }

    #[test]
    fn test_filtered_by_tag() {
        let cat = FeedCatalogue::from_yaml_str(SAMPLE).expect("should parse");
        let only = cat.filtered(&["country:Nigeria".to_string()]);
        assert_eq!(only.len(), 1);
        assert_eq!(only.feeds[0].url, "https://other.example/atom.xml");

        let all = cat.filtered(&[]);
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_rejects_non_http_url() {
        let yaml = "feeds:\n  - url: ftp://bad.example/feed\n    tag: bad\n";
        assert!(FeedCatalogue::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_rejects_empty_url() {
        let yaml = "feeds:\n  - url: \"\"\n    tag: bad\n";
        assert!(FeedCatalogue::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("feeds.yaml");
        std::fs::write(&path, SAMPLE).expect("write");

        let cat = FeedCatalogue::from_yaml_file(&path).expect("should load");
        assert_eq!(cat.len(), 2);
    }
}
