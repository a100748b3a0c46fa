// 🪪 Canonical Identity Resolver - Source-independent sku keys
// Normalizes set/number/name/printing/grading into one deterministic digest
//
// The key never depends on a source's own row identifier: two records that
// normalize to the same field tuple get the same key, whoever produced them.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::attributes::{format_grade, keyword_text, GradingDetector};
use crate::snapshot::RawItemRecord;

// ============================================================================
// PRINTING VARIANT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrintingVariant {
    Holo,
    ReverseHolo,
    FirstEdition,
    Shadowless,
    Promo,
    Unlimited,
}

impl PrintingVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrintingVariant::Holo => "HOLO",
            PrintingVariant::ReverseHolo => "REVERSE_HOLO",
            PrintingVariant::FirstEdition => "FIRST_EDITION",
            PrintingVariant::Shadowless => "SHADOWLESS",
            PrintingVariant::Promo => "PROMO",
            PrintingVariant::Unlimited => "UNLIMITED",
        }
    }

    /// Derive the variant from rarity/condition text
    ///
    /// Reverse-holo markers are checked before plain holo, otherwise every
    /// "Reverse Holo" would read as HOLO.
    pub fn from_text(text: &str) -> Self {
        let padded = keyword_text(text);

        if has_marker(&padded, &["reverse holo", "reverse holofoil", "reverse"]) {
            PrintingVariant::ReverseHolo
        } else if has_marker(&padded, &["holo", "holofoil", "foil"]) {
            PrintingVariant::Holo
        } else if has_marker(&padded, &["1st edition", "first edition", "1st ed"]) {
            PrintingVariant::FirstEdition
        } else if has_marker(&padded, &["shadowless"]) {
            PrintingVariant::Shadowless
        } else if has_marker(&padded, &["promo"]) {
            PrintingVariant::Promo
        } else {
            PrintingVariant::Unlimited
        }
    }
}

fn has_marker(padded_text: &str, markers: &[&str]) -> bool {
    markers.iter().any(|m| padded_text.contains(&keyword_text(m)))
}

// ============================================================================
// CANONICAL IDENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanonicalIdentity {
    /// Fixed-length hex prefix of the SHA-256 of the normalized tuple
    pub sku_key: String,

    pub set_code: String,
    pub card_number: String,
    pub name: String,
    pub language: String,
    pub printing: PrintingVariant,
    pub is_graded: bool,

    /// "NONE" when ungraded
    pub grading_company: String,

    /// "NA" when ungraded, otherwise "10" / "9.5"
    pub grade: String,
}

impl CanonicalIdentity {
    /// The delimited tuple that is hashed into `sku_key`
    pub fn key_material(&self) -> String {
        [
            self.set_code.as_str(),
            self.card_number.as_str(),
            self.name.as_str(),
            self.language.as_str(),
            self.printing.as_str(),
            if self.is_graded { "GRADED" } else { "RAW" },
            self.grading_company.as_str(),
            self.grade.as_str(),
        ]
        .join(KEY_DELIMITER)
    }
}

const KEY_DELIMITER: &str = "|";

// ============================================================================
// RESOLVER
// ============================================================================

pub struct IdentityResolver {
    /// Lower-case set name → set code
    pub set_aliases: BTreeMap<String, String>,

    pub default_language: String,
    pub default_card_number: String,

    /// Hex characters kept from the digest
    pub sku_key_length: usize,

    detector: GradingDetector,
}

impl IdentityResolver {
    pub fn new() -> Self {
        Self::with_detector(GradingDetector::default())
    }

    pub fn with_detector(detector: GradingDetector) -> Self {
        let set_aliases = [
            ("base set", "BASESET"),
            ("jungle", "JUNGLE"),
            ("fossil", "FOSSIL"),
            ("team rocket", "TEAMROCKET"),
            ("neo genesis", "NEOGENESIS"),
            ("neo discovery", "NEODISCOVERY"),
            ("neo destiny", "NEODESTINY"),
            ("gym heroes", "GYMHEROES"),
            ("gym challenge", "GYMCHALLENGE"),
        ]
        .iter()
        .map(|(name, code)| (name.to_string(), code.to_string()))
        .collect();

        IdentityResolver {
            set_aliases,
            default_language: "EN".to_string(),
            default_card_number: "1".to_string(),
            sku_key_length: 32,
            detector,
        }
    }

    /// Resolve a record into its canonical identity. Never fails.
    pub fn resolve(&self, record: &RawItemRecord) -> CanonicalIdentity {
        let grading = self.detector.detect(record);

        let printing_text = record
            .rarity
            .as_deref()
            .filter(|r| !r.trim().is_empty())
            .unwrap_or(&record.title);

        let name_text = record
            .name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&record.title);

        let language = record
            .language
            .as_deref()
            .map(|l| l.trim().to_uppercase())
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| self.default_language.clone());

        let mut identity = CanonicalIdentity {
            sku_key: String::new(),
            set_code: self.normalize_set(record.set_name.as_deref().unwrap_or("")),
            card_number: self.normalize_card_number(record.card_number.as_deref().unwrap_or("")),
            name: normalize_name(name_text),
            language,
            printing: PrintingVariant::from_text(printing_text),
            is_graded: grading.is_some(),
            grading_company: grading
                .as_ref()
                .map(|g| g.company.clone())
                .unwrap_or_else(|| "NONE".to_string()),
            grade: grading
                .as_ref()
                .map(|g| format_grade(g.grade))
                .unwrap_or_else(|| "NA".to_string()),
        };

        identity.sku_key = self.digest(&identity.key_material());
        identity
    }

    /// Known alias first, otherwise upper-cased alphanumerics only
    pub fn normalize_set(&self, set_name: &str) -> String {
        let trimmed = set_name.trim();
        if let Some(code) = self.set_aliases.get(&trimmed.to_lowercase()) {
            return code.clone();
        }

        trimmed
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect::<String>()
            .to_uppercase()
    }

    /// "004" → "4"; empty → default
    pub fn normalize_card_number(&self, number: &str) -> String {
        let stripped = number.trim().trim_start_matches('0');
        if stripped.is_empty() {
            self.default_card_number.clone()
        } else {
            stripped.to_uppercase()
        }
    }

    fn digest(&self, material: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(material.as_bytes());
        let hex = format!("{:x}", hasher.finalize());
        hex.chars().take(self.sku_key_length).collect()
    }
}

impl Default for IdentityResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Punctuation removed, whitespace collapsed, upper-cased
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

// ============================================================================
// TESTS
// ============================================================================
