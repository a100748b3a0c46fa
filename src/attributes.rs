// 🏷️ Attribute Classifier - Grading, premium, era and marquee flags
// Pure functions of the item record; computed once per item per run

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::snapshot::RawItemRecord;

// ============================================================================
// ATTRIBUTE TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EraCategory {
    Vintage,
    Modern,
    Standard,
}

impl EraCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EraCategory::Vintage => "vintage",
            EraCategory::Modern => "modern",
            EraCategory::Standard => "standard",
        }
    }
}

/// Grading certification detected on an item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradingInfo {
    /// Upper-case company code (PSA, BGS, ...)
    pub company: String,
    pub grade: f64,
}

/// ItemAttributes - Derived classification for one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemAttributes {
    pub is_graded: bool,
    pub grading_company: Option<String>,
    pub numeric_grade: Option<f64>,

    /// Premium applied to the reconciled value (always >= 1.0)
    pub grading_multiplier: f64,

    pub era_category: EraCategory,
    pub is_marquee_name: bool,
}

impl ItemAttributes {
    /// Raw, standard-era, non-marquee attributes
    pub fn ungraded() -> Self {
        ItemAttributes {
            is_graded: false,
            grading_company: None,
            numeric_grade: None,
            grading_multiplier: 1.0,
            era_category: EraCategory::Standard,
            is_marquee_name: false,
        }
    }

    pub fn is_vintage(&self) -> bool {
        self.era_category == EraCategory::Vintage
    }
}

// ============================================================================
// SETTINGS
// ============================================================================

/// One step of a company's premium table
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GradeTier {
    pub grade: f64,
    pub multiplier: f64,
}

impl GradeTier {
    pub const fn new(grade: f64, multiplier: f64) -> Self {
        GradeTier { grade, multiplier }
    }
}

/// Premiums for companies without a table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoarseBands {
    pub high_grade: f64,
    pub high_multiplier: f64,
    pub medium_grade: f64,
    pub medium_multiplier: f64,
    pub low_grade: f64,
    pub low_multiplier: f64,
}

impl Default for CoarseBands {
    fn default() -> Self {
        CoarseBands {
            high_grade: 9.0,
            high_multiplier: 2.0,
            medium_grade: 8.0,
            medium_multiplier: 1.3,
            low_grade: 7.0,
            low_multiplier: 1.1,
        }
    }
}

/// Tunables for the classifier, loaded from `[attributes]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributeSettings {
    /// Companies scanned for in titles, in match order
    pub grading_companies: Vec<String>,

    /// Per-company premium tables keyed by upper-case company code
    pub premium_tables: BTreeMap<String, Vec<GradeTier>>,

    pub coarse_bands: CoarseBands,

    /// Grades below this never receive a premium
    pub min_premium_grade: f64,

    pub vintage_keywords: Vec<String>,
    pub vintage_year_start: i32,
    pub vintage_year_end: i32,

    pub modern_keywords: Vec<String>,
    pub modern_year_start: i32,

    pub marquee_names: Vec<String>,
}

impl Default for AttributeSettings {
    fn default() -> Self {
        let mut premium_tables = BTreeMap::new();
        premium_tables.insert(
            "PSA".to_string(),
            vec![
                GradeTier::new(10.0, 4.0),
                GradeTier::new(9.0, 2.5),
                GradeTier::new(8.0, 1.6),
                GradeTier::new(7.0, 1.2),
                GradeTier::new(6.0, 1.1),
            ],
        );
        premium_tables.insert(
            "BGS".to_string(),
            vec![
                GradeTier::new(10.0, 4.5),
                GradeTier::new(9.5, 3.5),
                GradeTier::new(9.0, 2.8),
                GradeTier::new(8.5, 2.0),
                GradeTier::new(8.0, 1.5),
                GradeTier::new(7.5, 1.2),
                GradeTier::new(7.0, 1.1),
                GradeTier::new(6.5, 1.05),
                GradeTier::new(6.0, 1.0),
            ],
        );
        premium_tables.insert(
            "CGC".to_string(),
            vec![
                GradeTier::new(10.0, 3.8),
                GradeTier::new(9.5, 2.8),
                GradeTier::new(9.0, 2.2),
                GradeTier::new(8.5, 1.7),
                GradeTier::new(8.0, 1.4),
                GradeTier::new(7.5, 1.15),
                GradeTier::new(7.0, 1.1),
                GradeTier::new(6.5, 1.05),
                GradeTier::new(6.0, 1.0),
            ],
        );
        premium_tables.insert(
            "SGC".to_string(),
            vec![
                GradeTier::new(10.0, 3.5),
                GradeTier::new(9.0, 2.0),
                GradeTier::new(8.0, 1.3),
                GradeTier::new(7.0, 1.1),
                GradeTier::new(6.0, 1.0),
            ],
        );
        premium_tables.insert(
            "ARA".to_string(),
            vec![
                GradeTier::new(10.0, 3.2),
                GradeTier::new(9.0, 1.8),
                GradeTier::new(8.0, 1.2),
                GradeTier::new(7.0, 1.0),
            ],
        );
        premium_tables.insert(
            "ARS".to_string(),
            vec![
                GradeTier::new(10.0, 3.0),
                GradeTier::new(9.0, 1.7),
                GradeTier::new(8.0, 1.1),
                GradeTier::new(7.0, 1.0),
            ],
        );

        AttributeSettings {
            grading_companies: ["PSA", "BGS", "CGC", "SGC", "ARA", "ARS"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            premium_tables,
            coarse_bands: CoarseBands::default(),
            min_premium_grade: 6.0,
            vintage_keywords: [
                "base set",
                "1st edition",
                "first edition",
                "shadowless",
                "fossil",
                "jungle",
                "team rocket",
                "neo genesis",
                "gym heroes",
                "gym challenge",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            vintage_year_start: 1995,
            vintage_year_end: 2003,
            modern_keywords: ["scarlet", "violet", "paldea", "obsidian flames"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            modern_year_start: 2020,
            marquee_names: ["charizard", "pikachu", "mew", "mewtwo", "lugia", "gold star"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

// ============================================================================
// TEXT HELPERS
// ============================================================================

/// Lower-case, punctuation to spaces, whitespace collapsed, padded with one
/// space on each side so phrase lookups can match on word boundaries.
pub fn keyword_text(text: &str) -> String {
    let words: Vec<String> = text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_string())
        .collect();
    format!(" {} ", words.join(" "))
}

/// True when `phrase` appears as whole words inside padded `text`
fn contains_phrase(padded_text: &str, phrase: &str) -> bool {
    let needle = keyword_text(phrase);
    !needle.trim().is_empty() && padded_text.contains(&needle)
}

/// "10" for whole grades, "9.5" otherwise
pub fn format_grade(grade: f64) -> String {
    if grade.fract() == 0.0 {
        format!("{}", grade as i64)
    } else {
        format!("{}", grade)
    }
}

// ============================================================================
// GRADING DETECTOR
// ============================================================================

/// GradingDetector - Explicit grading fields first, title scan second
///
/// Shared by the identity resolver and the attribute classifier so both agree
/// on whether an item is graded.
#[derive(Debug, Clone)]
pub struct GradingDetector {
    company_patterns: Vec<(String, Regex)>,
}

impl GradingDetector {
    pub fn new(companies: &[String]) -> Self {
        let company_patterns = companies
            .iter()
            .filter_map(|company| {
                let code = company.trim().to_uppercase();
                let pattern = format!(r"(?i)\b{}\s*(\d+(?:\.\d+)?)\b", regex::escape(&code));
                Regex::new(&pattern).ok().map(|re| (code, re))
            })
            .collect();

        GradingDetector { company_patterns }
    }

    pub fn detect(&self, record: &RawItemRecord) -> Option<GradingInfo> {
        if let Some(info) = Self::from_explicit_fields(record) {
            return Some(info);
        }

        // First company whose pattern matches wins
        for (company, re) in &self.company_patterns {
            if let Some(caps) = re.captures(&record.title) {
                if let Some(grade) = caps.get(1).and_then(|m| parse_grade(m.as_str())) {
                    return Some(GradingInfo {
                        company: company.clone(),
                        grade,
                    });
                }
            }
        }

        None
    }

    fn from_explicit_fields(record: &RawItemRecord) -> Option<GradingInfo> {
        let company = record.grading_company.as_deref()?.trim().to_uppercase();
        if company.is_empty() || company == "NONE" || company == "RAW" {
            return None;
        }
        let grade = parse_grade(record.grade.as_deref()?)?;
        Some(GradingInfo { company, grade })
    }
}

impl Default for GradingDetector {
    fn default() -> Self {
        Self::new(&AttributeSettings::default().grading_companies)
    }
}

/// Grades live in (0, 10]; anything else is treated as no grade
fn parse_grade(text: &str) -> Option<f64> {
    let grade: f64 = text.trim().parse().ok()?;
    if grade.is_finite() && grade > 0.0 && grade <= 10.0 {
        Some(grade)
    } else {
        None
    }
}

// ============================================================================
// ATTRIBUTE CLASSIFIER
// ============================================================================

pub struct AttributeClassifier {
    pub settings: AttributeSettings,
    detector: GradingDetector,
    year_pattern: Option<Regex>,
    sv_pattern: Option<Regex>,
}

impl AttributeClassifier {
    pub fn new() -> Self {
        Self::with_settings(AttributeSettings::default())
    }

    pub fn with_settings(settings: AttributeSettings) -> Self {
        let detector = GradingDetector::new(&settings.grading_companies);

        AttributeClassifier {
            settings,
            detector,
            year_pattern: Regex::new(r"\b(19[0-9]{2}|20[0-9]{2})\b").ok(),
            sv_pattern: Regex::new(r"(?i)\bsv[0-9]*\b").ok(),
        }
    }

    pub fn detector(&self) -> &GradingDetector {
        &self.detector
    }

    /// Classify one item record
    pub fn classify(&self, record: &RawItemRecord) -> ItemAttributes {
        let grading = self.detector.detect(record);
        let text = record.descriptive_text();

        let grading_multiplier = grading
            .as_ref()
            .map(|g| self.grading_multiplier(&g.company, g.grade))
            .unwrap_or(1.0);

        ItemAttributes {
            is_graded: grading.is_some(),
            grading_company: grading.as_ref().map(|g| g.company.clone()),
            numeric_grade: grading.as_ref().map(|g| g.grade),
            grading_multiplier,
            era_category: self.era_category(&text),
            is_marquee_name: self.is_marquee_name(&text),
        }
    }

    /// Premium for a company/grade pair, never below 1.0
    pub fn grading_multiplier(&self, company: &str, grade: f64) -> f64 {
        if !grade.is_finite() || grade < self.settings.min_premium_grade {
            return 1.0;
        }

        let multiplier = match self.settings.premium_tables.get(&company.to_uppercase()) {
            Some(tiers) => tiers
                .iter()
                .filter(|tier| tier.grade <= grade)
                .max_by(|a, b| a.grade.total_cmp(&b.grade))
                .map(|tier| tier.multiplier)
                .unwrap_or(1.0),
            None => {
                let bands = &self.settings.coarse_bands;
                if grade >= bands.high_grade {
                    bands.high_multiplier
                } else if grade >= bands.medium_grade {
                    bands.medium_multiplier
                } else if grade >= bands.low_grade {
                    bands.low_multiplier
                } else {
                    1.0
                }
            }
        };

        multiplier.max(1.0)
    }

    pub fn era_category(&self, text: &str) -> EraCategory {
        let padded = keyword_text(text);
        let years: Vec<i32> = match &self.year_pattern {
            Some(re) => re
                .captures_iter(text)
                .filter_map(|caps| caps.get(1).and_then(|m| m.as_str().parse().ok()))
                .collect(),
            None => Vec::new(),
        };

        let vintage_keyword = self
            .settings
            .vintage_keywords
            .iter()
            .any(|kw| contains_phrase(&padded, kw));
        let vintage_year = years
            .iter()
            .any(|y| (self.settings.vintage_year_start..=self.settings.vintage_year_end).contains(y));

        if vintage_keyword || vintage_year {
            return EraCategory::Vintage;
        }

        let modern_keyword = self
            .settings
            .modern_keywords
            .iter()
            .any(|kw| contains_phrase(&padded, kw))
            || self.sv_pattern.as_ref().is_some_and(|re| re.is_match(text));
        let modern_year = years.iter().any(|y| *y >= self.settings.modern_year_start);

        if modern_keyword || modern_year {
            EraCategory::Modern
        } else {
            EraCategory::Standard
        }
    }

    pub fn is_marquee_name(&self, text: &str) -> bool {
        let padded = keyword_text(text);
        self.settings
            .marquee_names
            .iter()
            .any(|name| contains_phrase(&padded, name))
    }
}

impl Default for AttributeClassifier {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
