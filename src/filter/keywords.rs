//! Threat keyword table: curated defaults plus YAML override.
//!
//! The table has two sections. `base` keywords match directly on word
//! boundaries. `cooccurrence` rules cover ambiguous terms ("attack",
//! "strike") that only count when a qualifier appears nearby in the text.
//!
//! The table is configuration input: loaded once at startup and immutable
//! afterwards. Insertion order is significant — the matcher resolves
//! multiple hits by list order.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;

/// An ambiguous term plus the qualifiers that disambiguate it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoocRule {
    /// The ambiguous term (single token).
    pub term: String,
    /// Qualifiers, any of which validates the term when within the window.
    pub qualifiers: Vec<String>,
}

impl CoocRule {
    fn new(term: &str, qualifiers: &[&str]) -> Self {
        Self {
            term: term.to_string(),
            qualifiers: qualifiers.iter().map(|q| q.to_string()).collect(),
        }
    }
}

/// The loaded keyword table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordTable {
    /// Direct-match keywords, in priority order.
    pub base: Vec<String>,
    /// Co-occurrence rules, in priority order.
    pub cooccurrence: Vec<CoocRule>,
}

impl KeywordTable {
    /// Parses a keyword table from YAML text.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let table: KeywordTable =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::InvalidKeywords(e.to_string()))?;
        table.validate()?;
        Ok(table)
    }

    /// Loads a keyword table from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::InvalidKeywords(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml_str(&contents)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.base.is_empty() && self.cooccurrence.is_empty() {
            return Err(ConfigError::InvalidKeywords("empty keyword table".to_string()));
        }
        for kw in &self.base {
            if kw.trim().is_empty() {
                return Err(ConfigError::InvalidKeywords("blank base keyword".to_string()));
            }
        }
        for rule in &self.cooccurrence {
            if rule.term.split_whitespace().count() != 1 {
                return Err(ConfigError::InvalidKeywords(format!(
                    "co-occurrence term '{}' must be a single token",
                    rule.term
                )));
            }
            if rule.qualifiers.is_empty() {
                return Err(ConfigError::InvalidKeywords(format!(
                    "co-occurrence term '{}' has no qualifiers",
                    rule.term
                )));
            }
        }
        Ok(())
    }
}

impl Default for KeywordTable {
    /// The curated built-in table.
    fn default() -> Self {
        let base = BASE_KEYWORDS.iter().map(|k| k.to_string()).collect();
        let cooccurrence = vec![
            CoocRule::new(
                "attack",
                &["killed", "dead", "casualties", "wounded", "injured", "armed", "militants"],
            ),
            CoocRule::new("strike", &["drone", "air", "missile", "military", "retaliatory"]),
            CoocRule::new(
                "shooting",
                &["dead", "killed", "wounded", "gunman", "police", "mass"],
            ),
            CoocRule::new("violence", &["erupted", "deadly", "armed", "sectarian", "escalating"]),
            CoocRule::new("protest", &["violent", "clashes", "police", "crackdown"]),
            CoocRule::new("unrest", &["violent", "deadly", "civil", "spreading"]),
            CoocRule::new("crash", &["plane", "train", "helicopter", "bus", "fatal"]),
            CoocRule::new("collapse", &["building", "bridge", "mine", "tunnel"]),
            CoocRule::new(
                "outbreak",
                &["cholera", "ebola", "virus", "disease", "measles", "confirmed"],
            ),
            CoocRule::new("threat", &["bomb", "security", "terror", "credible"]),
            CoocRule::new("alert", &["security", "terror", "bomb", "maximum"]),
            CoocRule::new("evacuation", &["ordered", "emergency", "mass"]),
            CoocRule::new("emergency", &["declared", "state", "national"]),
            CoocRule::new("clashes", &["police", "forces", "protesters", "border", "deadly"]),
            CoocRule::new("fire", &["opened", "exchanged", "came", "under"]),
        ];
        Self { base, cooccurrence }
    }
}

/// Curated direct-match keywords, highest priority first.
///
/// Grouped by theme; order within the list is the tie-break order the
/// matcher applies when several keywords hit the same entry.
static BASE_KEYWORDS: &[&str] = &[
    // Explosives and terrorism
    "bombing",
    "bomb blast",
    "car bomb",
    "suicide bomber",
    "suicide bombing",
    "roadside bomb",
    "ied",
    "improvised explosive",
    "explosion",
    "grenade attack",
    "landmine",
    "terror attack",
    "terrorist attack",
    "terrorist",
    "terrorism",
    "insurgent",
    "insurgency",
    "jihadist",
    "militant attack",
    "extremist attack",
    "hostage",
    "hostage-taking",
    "hijacking",
    "hijacked",
    "bomb threat",
    "bomb disposal",
    "detonated",
    "detonation",
    // Armed conflict
    "airstrike",
    "air strike",
    "drone strike",
    "missile strike",
    "rocket attack",
    "artillery fire",
    "shelling",
    "mortar attack",
    "armed clash",
    "armed clashes",
    "gun battle",
    "gunfight",
    "firefight",
    "gunfire",
    "crossfire",
    "ambush",
    "ambushed",
    "armed assault",
    "mass shooting",
    "sniper",
    "massacre",
    "ethnic cleansing",
    "war crime",
    "war crimes",
    "offensive launched",
    "invasion",
    "incursion",
    "ceasefire violation",
    "troops deployed",
    "mobilization",
    "paramilitary",
    "armed group",
    "armed men",
    "gunmen",
    "gunman",
    "shootout",
    "exchange of fire",
    // Kidnap and violent crime
    "kidnapping",
    "kidnapped",
    "abduction",
    "abducted",
    "ransom",
    "armed robbery",
    "carjacking",
    "cartel",
    "gang violence",
    "organized crime",
    "organised crime",
    "human trafficking",
    "trafficking ring",
    "smuggling ring",
    "piracy",
    "pirates",
    "extortion",
    "assassination",
    "assassinated",
    "murdered",
    "homicide",
    "lynching",
    "beheaded",
    "execution-style",
    "mass grave",
    "forced disappearance",
    // Civil unrest
    "riot",
    "rioting",
    "riots",
    "violent protest",
    "violent protests",
    "tear gas",
    "rubber bullets",
    "curfew",
    "state of emergency",
    "martial law",
    "coup",
    "coup attempt",
    "attempted coup",
    "uprising",
    "insurrection",
    "looting",
    "mob violence",
    "stampede",
    "crackdown",
    "demonstrators clashed",
    // Cyber
    "cyberattack",
    "cyber attack",
    "ransomware",
    "data breach",
    "malware",
    "phishing campaign",
    "ddos",
    "denial-of-service",
    "zero-day",
    "botnet",
    "credential theft",
    "hacked",
    "hacker group",
    "cyber espionage",
    "spyware",
    "data leak",
    "defacement",
    "intrusion detected",
    // Hazards and disasters
    "earthquake",
    "tsunami",
    "hurricane",
    "cyclone",
    "typhoon",
    "flooding",
    "flash flood",
    "wildfire",
    "volcanic eruption",
    "landslide",
    "mudslide",
    "avalanche",
    "pandemic",
    "epidemic",
    "chemical spill",
    "radiation leak",
    "toxic leak",
    "gas explosion",
    "gas leak",
    "building collapse",
    "bridge collapse",
    "derailment",
    "train derailment",
    "plane crash",
    "helicopter crash",
    "ferry sinking",
    "capsized",
    "oil spill",
    "contamination",
    // Security operations
    "checkpoint attack",
    "border clash",
    "police raid",
    "counterterrorism operation",
    "security operation",
    "weapons cache",
    "arms seizure",
    "arms smuggling",
    "explosives seized",
    "security forces killed",
    "suicide vest",
    "no-fly zone",
    "travel advisory",
    "embassy closure",
    "evacuation order",
    "shelter in place",
    "lockdown",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_is_nonempty_and_valid() {
        let table = KeywordTable::default();
        assert!(table.base.len() > 100);
        assert!(!table.cooccurrence.is_empty());
        table.validate().expect("default table should validate");
    }

    #[test]
    fn test_yaml_roundtrip() {
        let yaml = r#"
base:
  - bombing
  - kidnapping
cooccurrence:
  - term: attack
    qualifiers: [killed, wounded]
"#;
        let table = KeywordTable::from_yaml_str(yaml).expect("should parse");
        assert_eq!(table.base, vec!["bombing", "kidnapping"]);
        assert_eq!(table.cooccurrence[0].term, "attack");
        assert_eq!(table.cooccurrence[0].qualifiers, vec!["killed", "wounded"]);
    }

    #[test]
    fn test_rejects_empty_table() {
        let yaml = "base: []\ncooccurrence: []\n";
        assert!(KeywordTable::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_rejects_multi_token_cooc_term() {
        let yaml = r#"
base: [bombing]
cooccurrence:
  - term: "armed attack"
    qualifiers: [killed]
"#;
        assert!(KeywordTable::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_rejects_rule_without_qualifiers() {
        let yaml = r#"
base: [bombing]
cooccurrence:
  - term: attack
    qualifiers: []
"#;
        assert!(KeywordTable::from_yaml_str(yaml).is_err());
    }
}
