// ⚖️ Market Value Reconciler - One canonical price per item
// Validates observations, walks a source priority order, scores confidence
//
// Graded items trust completed sales first; raw items trust the card
// price guides first. When no priority source survives validation, the
// highest remaining validated price is used at a visibly lower confidence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::attributes::ItemAttributes;
use crate::snapshot::{PriceObservation, PriceSource};
use crate::validation::{ObservationValidator, ValidationRule};

// ============================================================================
// MARKET VALUATION
// ============================================================================

/// Label used for the winning source when nothing validated
pub const NO_DATA: &str = "NO_DATA";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityFlag {
    /// Highest validated price is more than 100x the lowest
    SourceVariance,
    /// Asking price is more than 1000x the market value
    ExtremeRatio,
}

impl QualityFlag {
    pub fn code(&self) -> &'static str {
        match self {
            QualityFlag::SourceVariance => "SOURCE_VARIANCE",
            QualityFlag::ExtremeRatio => "EXTREME_RATIO",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketValuation {
    /// Canonical price, 0 meaning no data
    pub value: f64,

    /// Winning source, None for NO_DATA
    pub source: Option<PriceSource>,

    /// 0-100
    pub confidence: u8,

    pub explanation: String,

    pub is_fallback: bool,

    /// Distinct sources with at least one validated observation
    pub validated_sources: usize,

    pub flags: Vec<QualityFlag>,
}

impl MarketValuation {
    pub fn no_data(explanation: String) -> Self {
        MarketValuation {
            value: 0.0,
            source: None,
            confidence: 0,
            explanation,
            is_fallback: false,
            validated_sources: 0,
            flags: Vec::new(),
        }
    }

    pub fn has_data(&self) -> bool {
        self.value > 0.0
    }

    /// Source code, or NO_DATA
    pub fn source_label(&self) -> &'static str {
        self.source.map(|s| s.code()).unwrap_or(NO_DATA)
    }
}

/// Outcome of validating one observation, kept for the audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationAudit {
    pub source: PriceSource,
    pub raw_value: f64,
    pub valid: bool,
    pub rule: ValidationRule,
    pub reason: String,
    pub observed_at: Option<DateTime<Utc>>,
}

// ============================================================================
// SETTINGS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceWeight {
    pub source: PriceSource,
    pub weight: f64,
}

impl SourceWeight {
    pub const fn new(source: PriceSource, weight: f64) -> Self {
        SourceWeight { source, weight }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseConfidence {
    pub ebay_sold: u8,
    pub ebay_current: u8,
    pub tcgplayer: u8,
    pub pokemon_tcg_api: u8,
    pub fanatics_collect: u8,
    pub cardmarket: u8,
}

impl BaseConfidence {
    pub fn get(&self, source: PriceSource) -> u8 {
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

impl Default for BaseConfidence {
    fn default() -> Self {
        BaseConfidence {
            ebay_sold: 95,
            tcgplayer: 90,
            ebay_current: 85,
            pokemon_tcg_api: 80,
            fanatics_collect: 75,
            cardmarket: 70,
        }
    }
}

/// Where the grading premium is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PremiumPolicy {
    /// Every winning price is multiplied
    Uniform,
    /// Only raw-card price proxies are multiplied; slab sales already carry the premium
    RawProxyOnly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconciliationSettings {
    pub graded_priority: Vec<SourceWeight>,
    pub raw_priority: Vec<SourceWeight>,
    pub base_confidence: BaseConfidence,

    /// Added per extra corroborating source
    pub corroboration_bonus: u8,
    pub max_confidence: u8,
    pub fallback_confidence: u8,

    pub premium_policy: PremiumPolicy,

    /// max/min validated price above this raises SOURCE_VARIANCE
    pub variance_ratio_limit: f64,
}

impl Default for ReconciliationSettings {
    fn default() -> Self {
        ReconciliationSettings {
            graded_priority: vec![
                SourceWeight::new(PriceSource::EbaySold, 1.0),
                SourceWeight::new(PriceSource::EbayCurrent, 0.85),
                SourceWeight::new(PriceSource::Tcgplayer, 1.0),
                SourceWeight::new(PriceSource::PokemonTcgApi, 1.0),
            ],
            raw_priority: vec![
                SourceWeight::new(PriceSource::Tcgplayer, 1.0),
                SourceWeight::new(PriceSource::PokemonTcgApi, 1.0),
                SourceWeight::new(PriceSource::EbaySold, 1.0),
                SourceWeight::new(PriceSource::EbayCurrent, 1.0),
            ],
            base_confidence: BaseConfidence::default(),
            corroboration_bonus: 2,
            max_confidence: 99,
            fallback_confidence: 40,
            premium_policy: PremiumPolicy::Uniform,
            variance_ratio_limit: 100.0,
        }
    }
}

// ============================================================================
// MARKET VALUE RECONCILER
// ============================================================================

pub struct MarketValueReconciler {
    pub settings: ReconciliationSettings,
    pub validator: ObservationValidator,
}

impl MarketValueReconciler {
    pub fn new() -> Self {
        Self::with_settings(ReconciliationSettings::default(), ObservationValidator::new())
    }

    pub fn with_settings(settings: ReconciliationSettings, validator: ObservationValidator) -> Self {
        MarketValueReconciler { settings, validator }
    }

    /// Reconcile observations into one valuation. Deterministic, never fails.
    ///
    /// ```
    /// use card_valuation::{ItemAttributes, MarketValueReconciler, PriceObservation, PriceSource};
    ///
    /// let reconciler = MarketValueReconciler::new();
    /// let observations = vec![PriceObservation::new(PriceSource::Tcgplayer, 12.0)];
    ///
    /// let valuation = reconciler.reconcile(&observations, &ItemAttributes::ungraded());
    /// assert_eq!(valuation.value, 12.0);
    /// assert_eq!(valuation.source, Some(PriceSource::Tcgplayer));
    /// ```
    pub fn reconcile(&self, observations: &[PriceObservation], attributes: &ItemAttributes) -> MarketValuation {
        self.reconcile_with_audit(observations, attributes).0
    }

    /// Same as `reconcile`, also returning the validation outcome of every observation
    pub fn reconcile_with_audit(
        &self,
        observations: &[PriceObservation],
        attributes: &ItemAttributes,
    ) -> (MarketValuation, Vec<ObservationAudit>) {
        let mut audit = Vec::with_capacity(observations.len());
        let mut best: BTreeMap<PriceSource, &PriceObservation> = BTreeMap::new();

        // Step 1: validate, keeping the freshest validated observation per source
        for observation in observations {
            let result = self.validator.validate(observation, attributes);

            if result.valid {
                best.entry(observation.source)
                    .and_modify(|current| {
                        if is_preferred(observation, *current) {
                            *current = observation;
                        }
                    })
                    .or_insert(observation);
            } else {
                tracing::debug!(
                    source = observation.source.code(),
                    rule = result.rule.code(),
                    reason = %result.reason,
                    "Observation rejected"
                );
            }

            audit.push(ObservationAudit {
                source: observation.source,
                raw_value: observation.raw_value,
                valid: result.valid,
                rule: result.rule,
                reason: result.reason,
                observed_at: observation.observed_at,
            });
        }

        if best.is_empty() {
            let explanation = if observations.is_empty() {
                "No price observations".to_string()
            } else {
                format!("No validated observations ({} rejected)", observations.len())
            };
            return (MarketValuation::no_data(explanation), audit);
        }

        let flags = self.quality_flags(&best);
        let validated_sources = best.len();

        // Steps 2-3: first source in priority order that validated
        let priority = if attributes.is_graded {
            &self.settings.graded_priority
        } else {
            &self.settings.raw_priority
        };

        for entry in priority {
            if let Some(observation) = best.get(&entry.source) {
                let multiplier = self.applied_multiplier(entry.source, attributes);
                let value = observation.raw_value * entry.weight * multiplier;

                let extra_sources = (validated_sources - 1).min(u8::MAX as usize) as u8;
                let confidence = self
                    .settings
                    .base_confidence
                    .get(entry.source)
                    .saturating_add(self.settings.corroboration_bonus.saturating_mul(extra_sources))
                    .min(self.settings.max_confidence);

                let explanation = format!(
                    "{} ${:.2}{}{}; {} source{} validated",
                    entry.source.name(),
                    observation.raw_value,
                    describe_weight(entry.weight),
                    describe_premium(multiplier, attributes),
                    validated_sources,
                    if validated_sources == 1 { "" } else { "s" },
                );

                let valuation = MarketValuation {
                    value,
                    source: Some(entry.source),
                    confidence,
                    explanation,
                    is_fallback: false,
                    validated_sources,
                    flags,
                };
                return (valuation, audit);
            }
        }

        // Step 4: fallback to the highest validated price from any other source
        let Some((source, observation)) = best
            .iter()
            .max_by(|a, b| a.1.raw_value.total_cmp(&b.1.raw_value).then_with(|| b.0.cmp(a.0)))
            .map(|(source, observation)| (*source, *observation))
        else {
            return (MarketValuation::no_data("No validated observations".to_string()), audit);
        };

        let multiplier = self.applied_multiplier(source, attributes);
        let valuation = MarketValuation {
            value: observation.raw_value * multiplier,
            source: Some(source),
            confidence: self.settings.fallback_confidence,
            explanation: format!(
                "Fallback to {} ${:.2}{}: no priority source validated",
                source.name(),
                observation.raw_value,
                describe_premium(multiplier, attributes),
            ),
            is_fallback: true,
            validated_sources,
            flags,
        };

        (valuation, audit)
    }

    fn applied_multiplier(&self, source: PriceSource, attributes: &ItemAttributes) -> f64 {
        match self.settings.premium_policy {
            PremiumPolicy::Uniform => attributes.grading_multiplier,
            PremiumPolicy::RawProxyOnly if source.prices_graded_slab() => 1.0,
            PremiumPolicy::RawProxyOnly => attributes.grading_multiplier,
        }
    }

    fn quality_flags(&self, best: &BTreeMap<PriceSource, &PriceObservation>) -> Vec<QualityFlag> {
        let prices = best.values().map(|o| o.raw_value);
        let max = prices.clone().fold(f64::MIN, f64::max);
        let min = prices.fold(f64::MAX, f64::min);

        if min > 0.0 && max / min > self.settings.variance_ratio_limit {
            vec![QualityFlag::SourceVariance]
        } else {
            Vec::new()
        }
    }
}

impl Default for MarketValueReconciler {
    fn default() -> Self {
        Self::new()
    }
}

/// Freshest observation wins; equal freshness goes to the higher price
fn is_preferred(candidate: &PriceObservation, current: &PriceObservation) -> bool {
    match candidate.observed_at.cmp(&current.observed_at) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => candidate.raw_value > current.raw_value,
    }
}

fn describe_weight(weight: f64) -> String {
    if (weight - 1.0).abs() < f64::EPSILON {
        String::new()
    } else {
        format!(" weighted {:.2}", weight)
    }
}

fn describe_premium(multiplier: f64, attributes: &ItemAttributes) -> String {
    if multiplier <= 1.0 {
        return String::new();
    }
    match (&attributes.grading_company, attributes.numeric_grade) {
        (Some(company), Some(grade)) => format!(" x {:.2} grading premium ({} {})", multiplier, company, grade),
        _ => format!(" x {:.2} grading premium", multiplier),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::EraCategory;
    use chrono::TimeZone;

    fn create_graded_attributes(multiplier: f64) -> ItemAttributes {
        ItemAttributes {
            is_graded: true,
            grading_company: Some("PSA".to_string()),
            numeric_grade: Some(9.0),
            grading_multiplier: multiplier,
            era_category: EraCategory::Modern,
            is_marquee_name: false,
        }
    }

    fn obs(source: PriceSource, value: f64) -> PriceObservation {
        PriceObservation::new(source, value).for_item("cc-1")
    }

    #[test]
    fn test_graded_prefers_ebay_sold() {
        let reconciler = MarketValueReconciler::new();
        let attrs = create_graded_attributes(2.5);
        let observations = vec![obs(PriceSource::Tcgplayer, 300.0), obs(PriceSource::EbaySold, 500.0)];

        let valuation = reconciler.reconcile(&observations, &attrs);

        assert_eq!(valuation.source, Some(PriceSource::EbaySold));
        assert_eq!(valuation.value, 500.0 * 2.5);
        assert_eq!(valuation.confidence, 97);
        assert!(!valuation.is_fallback);
        assert_eq!(valuation.validated_sources, 2);
    }

    #[test]
    fn test_raw_prefers_tcgplayer() {
        let reconciler = MarketValueReconciler::new();
        let observations = vec![obs(PriceSource::EbaySold, 40.0), obs(PriceSource::Tcgplayer, 30.0)];

        let valuation = reconciler.reconcile(&observations, &ItemAttributes::ungraded());

        assert_eq!(valuation.source, Some(PriceSource::Tcgplayer));
        assert_eq!(valuation.value, 30.0);
        assert_eq!(valuation.confidence, 92);
    }

    #[test]
    fn test_ebay_current_weight() {
        let reconciler = MarketValueReconciler::new();
        let attrs = create_graded_attributes(1.0);
        let observations = vec![obs(PriceSource::EbayCurrent, 200.0)];

        let valuation = reconciler.reconcile(&observations, &attrs);

        assert_eq!(valuation.source, Some(PriceSource::EbayCurrent));
        assert!((valuation.value - 170.0).abs() < 1e-9);
        assert_eq!(valuation.confidence, 85);
        assert!(valuation.explanation.contains("weighted 0.85"));
    }

    #[test]
    fn test_invalid_priority_source_is_skipped() {
        let reconciler = MarketValueReconciler::new();
        let attrs = create_graded_attributes(1.0);
        // ebay_sold below its floor, tcgplayer valid
        let observations = vec![obs(PriceSource::EbaySold, 0.5), obs(PriceSource::Tcgplayer, 20.0)];

        let (valuation, audit) = reconciler.reconcile_with_audit(&observations, &attrs);

        assert_eq!(valuation.source, Some(PriceSource::Tcgplayer));
        assert_eq!(audit.len(), 2);
        assert!(!audit[0].valid);
        assert_eq!(audit[0].rule, ValidationRule::BelowSourceFloor);
        assert!(audit[1].valid);
    }

    #[test]
    fn test_fallback_confidence() {
        let reconciler = MarketValueReconciler::new();
        let observations = vec![obs(PriceSource::Cardmarket, 14.0), obs(PriceSource::Cardmarket, 18.0)];

        let valuation = reconciler.reconcile(&observations, &ItemAttributes::ungraded());

        assert_eq!(valuation.source, Some(PriceSource::Cardmarket));
        assert_eq!(valuation.value, 18.0);
        assert_eq!(valuation.confidence, 40);
        assert!(valuation.is_fallback);
        assert!(valuation.explanation.contains("Fallback"));
    }

    #[test]
    fn test_fallback_picks_highest_across_sources() {
        let reconciler = MarketValueReconciler::new();
        let observations = vec![obs(PriceSource::Cardmarket, 14.0), obs(PriceSource::FanaticsCollect, 25.0)];

        let valuation = reconciler.reconcile(&observations, &ItemAttributes::ungraded());

        assert_eq!(valuation.source, Some(PriceSource::FanaticsCollect));
        assert_eq!(valuation.value, 25.0);
        assert_eq!(valuation.confidence, 40);
    }

    #[test]
    fn test_no_data() {
        let reconciler = MarketValueReconciler::new();

        let empty = reconciler.reconcile(&[], &ItemAttributes::ungraded());
        assert_eq!(empty.value, 0.0);
        assert_eq!(empty.source_label(), NO_DATA);
        assert_eq!(empty.confidence, 0);

        let rejected = reconciler.reconcile(
            &[obs(PriceSource::Tcgplayer, f64::NAN), obs(PriceSource::EbaySold, -1.0)],
            &ItemAttributes::ungraded(),
        );
        assert_eq!(rejected.value, 0.0);
        assert_eq!(rejected.source, None);
        assert!(rejected.explanation.contains("2 rejected"));
    }

    #[test]
    fn test_freshest_observation_wins_within_source() {
        let reconciler = MarketValueReconciler::new();
        let older = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let newer = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();

        let observations = vec![
            obs(PriceSource::Tcgplayer, 50.0).observed_at(older),
            obs(PriceSource::Tcgplayer, 35.0).observed_at(newer),
            obs(PriceSource::Tcgplayer, 99.0),
        ];

        let valuation = reconciler.reconcile(&observations, &ItemAttributes::ungraded());
        assert_eq!(valuation.value, 35.0);
    }

    #[test]
    fn test_equal_freshness_goes_to_higher_price() {
        let reconciler = MarketValueReconciler::new();
        let observations = vec![obs(PriceSource::Tcgplayer, 10.0), obs(PriceSource::Tcgplayer, 12.0)];

        let valuation = reconciler.reconcile(&observations, &ItemAttributes::ungraded());
        assert_eq!(valuation.value, 12.0);
        assert_eq!(valuation.validated_sources, 1);
        assert_eq!(valuation.confidence, 90);
    }

    #[test]
    fn test_confidence_is_capped() {
        let mut settings = ReconciliationSettings::default();
        settings.corroboration_bonus = 50;
        let reconciler = MarketValueReconciler::with_settings(settings, ObservationValidator::new());

        let observations = vec![obs(PriceSource::Tcgplayer, 10.0), obs(PriceSource::EbaySold, 11.0)];
        let valuation = reconciler.reconcile(&observations, &ItemAttributes::ungraded());

        assert_eq!(valuation.confidence, 99);
    }

    #[test]
    fn test_raw_proxy_only_policy() {
        let mut settings = ReconciliationSettings::default();
        settings.premium_policy = PremiumPolicy::RawProxyOnly;
        let reconciler = MarketValueReconciler::with_settings(settings, ObservationValidator::new());
        let attrs = create_graded_attributes(2.5);

        let slab = reconciler.reconcile(&[obs(PriceSource::EbaySold, 500.0)], &attrs);
        assert_eq!(slab.value, 500.0);

        let proxy = reconciler.reconcile(&[obs(PriceSource::Tcgplayer, 100.0)], &attrs);
        assert_eq!(proxy.value, 250.0);
    }

    #[test]
    fn test_source_variance_flag() {
        let reconciler = MarketValueReconciler::new();
        let observations = vec![obs(PriceSource::Tcgplayer, 1.0), obs(PriceSource::EbaySold, 150.0)];

        let valuation = reconciler.reconcile(&observations, &ItemAttributes::ungraded());
        assert_eq!(valuation.flags, vec![QualityFlag::SourceVariance]);

        let calm = reconciler.reconcile(&[obs(PriceSource::Tcgplayer, 10.0)], &ItemAttributes::ungraded());
        assert!(calm.flags.is_empty());
    }
}
