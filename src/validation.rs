// ✅ Observation Validator - Per-source plausibility bounds
// Every (source, raw price) pair gets a result; nothing here ever fails
//
// Rules run in order and the first one that fires names itself in the
// result, so a drop in coverage can be traced back to a single rule.

use serde::{Deserialize, Serialize};

use crate::attributes::ItemAttributes;
use crate::snapshot::{PriceObservation, PriceSource};

// ============================================================================
// VALIDATION RESULT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationRule {
    Passed,
    NotANumber,
    NonFinite,
    NonPositive,
    BelowSourceFloor,
    AboveSourceCeiling,
    GradedFloor,
    VintageGradedFloor,
}

impl ValidationRule {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationRule::Passed => "PASSED",
            ValidationRule::NotANumber => "NOT_A_NUMBER",
            ValidationRule::NonFinite => "NON_FINITE",
            ValidationRule::NonPositive => "NON_POSITIVE",
            ValidationRule::BelowSourceFloor => "BELOW_SOURCE_FLOOR",
            ValidationRule::AboveSourceCeiling => "ABOVE_SOURCE_CEILING",
            ValidationRule::GradedFloor => "GRADED_FLOOR",
            ValidationRule::VintageGradedFloor => "VINTAGE_GRADED_FLOOR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub rule: ValidationRule,
    pub reason: String,
}

impl ValidationResult {
    pub fn pass(reason: String) -> Self {
        ValidationResult {
            valid: true,
            rule: ValidationRule::Passed,
            reason,
        }
    }

    pub fn fail(rule: ValidationRule, reason: String) -> Self {
        ValidationResult {
            valid: false,
            rule,
            reason,
        }
    }
}

// ============================================================================
// SETTINGS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBounds {
    pub min: f64,
    pub max: f64,
}

impl PriceBounds {
    pub const fn new(min: f64, max: f64) -> Self {
        PriceBounds { min, max }
    }
}

/// Floor/ceiling per source, loaded from `[validation.bounds]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceBounds {
    pub ebay_sold: PriceBounds,
    pub ebay_current: PriceBounds,
    pub tcgplayer: PriceBounds,
    pub pokemon_tcg_api: PriceBounds,
    pub fanatics_collect: PriceBounds,
    pub cardmarket: PriceBounds,
}

impl SourceBounds {
    pub fn get(&self, source: PriceSource) -> PriceBounds {
        match source {
            PriceSource::EbaySold => self.ebay_sold,
            PriceSource::EbayCurrent => self.ebay_current,
            PriceSource::Tcgplayer => self.tcgplayer,
            PriceSource::PokemonTcgApi => self.pokemon_tcg_api,
            PriceSource::FanaticsCollect => self.fanatics_collect,
            PriceSource::Cardmarket => self.cardmarket,
        }
    }
}

impl Default for SourceBounds {
    fn default() -> Self {
        SourceBounds {
            ebay_sold: PriceBounds::new(1.00, 100_000.0),
            ebay_current: PriceBounds::new(1.00, 150_000.0),
            tcgplayer: PriceBounds::new(0.50, 75_000.0),
            pokemon_tcg_api: PriceBounds::new(0.10, 50_000.0),
            fanatics_collect: PriceBounds::new(1.00, 250_000.0),
            cardmarket: PriceBounds::new(0.10, 50_000.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationSettings {
    pub bounds: SourceBounds,

    /// Minimum for any graded item
    pub graded_floor: f64,

    /// Minimum for graded vintage items
    pub vintage_graded_floor: f64,

    /// Sources the graded floors do not apply to
    pub graded_floor_exempt: Vec<PriceSource>,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        ValidationSettings {
            bounds: SourceBounds::default(),
            graded_floor: 1.00,
            vintage_graded_floor: 5.00,
            graded_floor_exempt: vec![PriceSource::PokemonTcgApi],
        }
    }
}

// ============================================================================
// OBSERVATION VALIDATOR
// ============================================================================

pub struct ObservationValidator {
    pub settings: ValidationSettings,
}

impl ObservationValidator {
    pub fn new() -> Self {
        Self::with_settings(ValidationSettings::default())
    }

    pub fn with_settings(settings: ValidationSettings) -> Self {
        ObservationValidator { settings }
    }

    pub fn validate(&self, observation: &PriceObservation, attributes: &ItemAttributes) -> ValidationResult {
        self.validate_price(observation.source, observation.raw_value, attributes)
    }

    pub fn validate_price(
        &self,
        source: PriceSource,
        value: f64,
        attributes: &ItemAttributes,
    ) -> ValidationResult {
        let code = source.code();

        if value.is_nan() {
            return ValidationResult::fail(
                ValidationRule::NotANumber,
                format!("Price is not a number for {}", code),
            );
        }

        if !value.is_finite() {
            return ValidationResult::fail(
                ValidationRule::NonFinite,
                format!("Price {} is not finite for {}", value, code),
            );
        }

        if value <= 0.0 {
            return ValidationResult::fail(
                ValidationRule::NonPositive,
                format!("Price ${:.2} is not positive for {}", value, code),
            );
        }

        let bounds = self.settings.bounds.get(source);

        if value < bounds.min {
            return ValidationResult::fail(
                ValidationRule::BelowSourceFloor,
                format!("Price ${:.2} below minimum ${:.2} for {}", value, bounds.min, code),
            );
        }

        if value > bounds.max {
            return ValidationResult::fail(
                ValidationRule::AboveSourceCeiling,
                format!("Price ${:.2} above maximum ${:.2} for {}", value, bounds.max, code),
            );
        }

        let exempt = self.settings.graded_floor_exempt.contains(&source);

        if attributes.is_graded && !exempt {
            if value < self.settings.graded_floor {
                return ValidationResult::fail(
                    ValidationRule::GradedFloor,
                    format!(
                        "Graded item price ${:.2} below graded minimum ${:.2} for {}",
                        value, self.settings.graded_floor, code
                    ),
                );
            }

            if attributes.is_vintage() && value < self.settings.vintage_graded_floor {
                return ValidationResult::fail(
                    ValidationRule::VintageGradedFloor,
                    format!(
                        "Vintage graded item price ${:.2} below minimum ${:.2} for {}",
                        value, self.settings.vintage_graded_floor, code
                    ),
                );
            }
        }

        ValidationResult::pass(format!("Price ${:.2} within bounds for {}", value, code))
    }
}

impl Default for ObservationValidator {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
