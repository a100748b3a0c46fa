// 🎯 Opportunity Classifier - Asking price vs market value
// Ratio bands chosen per item: tight for high-value slabs, loose for vintage

use serde::{Deserialize, Serialize};

use crate::attributes::ItemAttributes;
use crate::reconciliation::{MarketValuation, QualityFlag};

// ============================================================================
// OPPORTUNITY CATEGORY
// ============================================================================

/// Ordered from cheapest to most expensive; NO_DATA sorts last
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpportunityCategory {
    Underpriced,
    GoodDeal,
    FairMarket,
    Overpriced,
    HighlyOverpriced,
    NoData,
}

impl OpportunityCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpportunityCategory::Underpriced => "UNDERPRICED",
            OpportunityCategory::GoodDeal => "GOOD_DEAL",
            OpportunityCategory::FairMarket => "FAIR_MARKET",
            OpportunityCategory::Overpriced => "OVERPRICED",
            OpportunityCategory::HighlyOverpriced => "HIGHLY_OVERPRICED",
            OpportunityCategory::NoData => "NO_DATA",
        }
    }
}

/// Which band set was applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BandProfile {
    Default,
    GradedHighValue,
    Vintage,
}

// ============================================================================
// SETTINGS
// ============================================================================

/// Upper ratio bound (inclusive) of each category below HIGHLY_OVERPRICED
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatioBands {
    pub underpriced: f64,
    pub good_deal: f64,
    pub fair_market: f64,
    pub overpriced: f64,
}

impl RatioBands {
    pub const fn new(underpriced: f64, good_deal: f64, fair_market: f64, overpriced: f64) -> Self {
        RatioBands {
            underpriced,
            good_deal,
            fair_market,
            overpriced,
        }
    }

    pub fn category(&self, ratio: f64) -> OpportunityCategory {
        if ratio <= self.underpriced {
            OpportunityCategory::Underpriced
        } else if ratio <= self.good_deal {
            OpportunityCategory::GoodDeal
        } else if ratio <= self.fair_market {
            OpportunityCategory::FairMarket
        } else if ratio <= self.overpriced {
            OpportunityCategory::Overpriced
        } else {
            OpportunityCategory::HighlyOverpriced
        }
    }

    pub fn is_ascending(&self) -> bool {
        self.underpriced > 0.0
            && self.underpriced < self.good_deal
            && self.good_deal < self.fair_market
            && self.fair_market < self.overpriced
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryConfidence {
    pub underpriced: u8,
    pub good_deal: u8,
    pub fair_market: u8,
    pub overpriced: u8,
    pub highly_overpriced: u8,
}

impl CategoryConfidence {
    pub fn get(&self, category: OpportunityCategory) -> u8 {
        match category {
            OpportunityCategory::Underpriced => self.underpriced,
            OpportunityCategory::GoodDeal => self.good_deal,
            OpportunityCategory::FairMarket => self.fair_market,
            OpportunityCategory::Overpriced => self.overpriced,
            OpportunityCategory::HighlyOverpriced => self.highly_overpriced,
            OpportunityCategory::NoData => 0,
        }
    }
}

impl Default for CategoryConfidence {
    fn default() -> Self {
        CategoryConfidence {
            underpriced: 85,
            good_deal: 70,
            fair_market: 60,
            overpriced: 70,
            highly_overpriced: 85,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpportunitySettings {
    pub default_bands: RatioBands,
    pub graded_high_value_bands: RatioBands,
    pub vintage_bands: RatioBands,

    /// Graded items valued above this use the tight bands
    pub materiality_threshold: f64,

    pub confidence: CategoryConfidence,

    /// askingPrice / value above this raises EXTREME_RATIO
    pub extreme_ratio_limit: f64,
}

impl Default for OpportunitySettings {
    fn default() -> Self {
        OpportunitySettings {
            default_bands: RatioBands::new(0.70, 0.85, 1.15, 1.40),
            graded_high_value_bands: RatioBands::new(0.75, 0.90, 1.10, 1.30),
            vintage_bands: RatioBands::new(0.65, 0.80, 1.20, 1.50),
            materiality_threshold: 100.0,
            confidence: CategoryConfidence::default(),
            extreme_ratio_limit: 1000.0,
        }
    }
}

// ============================================================================
// CLASSIFICATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpportunityClassification {
    pub category: OpportunityCategory,

    /// askingPrice / value (0 when there is no value)
    pub ratio: f64,

    /// Confidence in the category, independent of the valuation's confidence
    pub confidence: u8,

    pub explanation: String,

    /// value - askingPrice
    pub potential_profit: f64,

    pub profile: BandProfile,

    pub flags: Vec<QualityFlag>,
}

impl OpportunityClassification {
    pub fn no_data(explanation: String, profile: BandProfile) -> Self {
        OpportunityClassification {
            category: OpportunityCategory::NoData,
            ratio: 0.0,
            confidence: 0,
            explanation,
            potential_profit: 0.0,
            profile,
            flags: Vec::new(),
        }
    }
}

pub struct OpportunityClassifier {
    pub settings: OpportunitySettings,
}

impl OpportunityClassifier {
    pub fn new() -> Self {
        Self::with_settings(OpportunitySettings::default())
    }

    pub fn with_settings(settings: OpportunitySettings) -> Self {
        OpportunityClassifier { settings }
    }

    pub fn profile(&self, valuation: &MarketValuation, attributes: &ItemAttributes) -> BandProfile {
        if attributes.is_graded && valuation.value > self.settings.materiality_threshold {
            BandProfile::GradedHighValue
        } else if attributes.is_vintage() {
            BandProfile::Vintage
        } else {
            BandProfile::Default
        }
    }

    pub fn bands(&self, profile: BandProfile) -> &RatioBands {
        match profile {
            BandProfile::Default => &self.settings.default_bands,
            BandProfile::GradedHighValue => &self.settings.graded_high_value_bands,
            BandProfile::Vintage => &self.settings.vintage_bands,
        }
    }

    pub fn classify(
        &self,
        asking_price: f64,
        valuation: &MarketValuation,
        attributes: &ItemAttributes,
    ) -> OpportunityClassification {
        let profile = self.profile(valuation, attributes);

        if !valuation.value.is_finite() || valuation.value <= 0.0 {
            return OpportunityClassification::no_data("No market value available".to_string(), profile);
        }

        if !asking_price.is_finite() || asking_price < 0.0 {
            return OpportunityClassification::no_data(
                format!("Asking price {} is not usable", asking_price),
                profile,
            );
        }

        let ratio = asking_price / valuation.value;
        let category = self.bands(profile).category(ratio);

        let mut flags = Vec::new();
        if ratio > self.settings.extreme_ratio_limit {
            flags.push(QualityFlag::ExtremeRatio);
        }

        OpportunityClassification {
            category,
            ratio,
            confidence: self.settings.confidence.get(category),
            explanation: explain(category, ratio),
            potential_profit: valuation.value - asking_price,
            profile,
            flags,
        }
    }
}

impl Default for OpportunityClassifier {
    fn default() -> Self {
        Self::new()
    }
}

fn explain(category: OpportunityCategory, ratio: f64) -> String {
    let deviation = (ratio - 1.0).abs() * 100.0;
    match category {
        OpportunityCategory::Underpriced => format!("{:.1}% below market - strong opportunity", deviation),
        OpportunityCategory::GoodDeal => format!("{:.1}% below market - good value", deviation),
        OpportunityCategory::FairMarket => format!("Within {:.1}% of market value", deviation),
        OpportunityCategory::Overpriced => format!("{:.1}% above market - avoid", deviation),
        OpportunityCategory::HighlyOverpriced => {
            format!("{:.1}% above market - significant overprice", deviation)
        }
        OpportunityCategory::NoData => "No market value available".to_string(),
    }
}

// ============================================================================
// TESTS
// ============================================================================
