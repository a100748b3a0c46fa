// 🏭 Valuation Pipeline - Batch driver over a read-only snapshot
// Identity → attributes → reconcile → classify, per item, in parallel
//
// Items share nothing but the observation index, so running them on N
// workers gives the same output as running them in order. Output keeps the
// snapshot's item order and is handed back as one batch for a single write.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};

use crate::attributes::{AttributeClassifier, ItemAttributes};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::identity::{CanonicalIdentity, IdentityResolver};
use crate::matching::{MatchMode, ObservationIndex};
use crate::opportunity::{OpportunityClassification, OpportunityClassifier};
use crate::reconciliation::{MarketValuation, MarketValueReconciler, ObservationAudit};
use crate::snapshot::{PriceObservation, RawItemRecord, Snapshot};
use crate::validation::ObservationValidator;

// ============================================================================
// SETTINGS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Process at most this many items (None = all)
    pub batch_limit: Option<usize>,

    /// Worker threads (0 = available parallelism)
    pub workers: usize,

    pub match_mode: MatchMode,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        PipelineSettings {
            batch_limit: None,
            workers: 0,
            match_mode: MatchMode::FirstToken,
        }
    }
}

// ============================================================================
// OUTPUT TYPES
// ============================================================================

/// Everything derived for one item in one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemReport {
    pub item_id: String,
    pub title: String,
    pub asking_price: f64,
    pub identity: CanonicalIdentity,
    pub attributes: ItemAttributes,
    pub valuation: MarketValuation,
    pub opportunity: OpportunityClassification,

    /// Validation outcome of every observation considered
    pub audit: Vec<ObservationAudit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedItem {
    pub item_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_items: usize,
    pub processed: usize,
    pub skipped: usize,
    pub with_market_data: usize,
    pub no_data: usize,
    pub fallback_valuations: usize,
    pub observations_considered: usize,
    pub validations_passed: usize,
    pub validations_failed: usize,
    pub by_category: BTreeMap<String, usize>,
    pub by_source: BTreeMap<String, usize>,
    pub rejections_by_rule: BTreeMap<String, usize>,
    pub flagged_items: usize,
}

impl BatchSummary {
    pub fn from_outcome(total_items: usize, reports: &[ItemReport], skipped: &[SkippedItem]) -> Self {
        let mut summary = BatchSummary {
            total_items,
            processed: reports.len(),
            skipped: skipped.len(),
            ..Default::default()
        };

        for report in reports {
            if report.valuation.has_data() {
                summary.with_market_data += 1;
            } else {
                summary.no_data += 1;
            }
            if report.valuation.is_fallback {
                summary.fallback_valuations += 1;
            }
            if !report.valuation.flags.is_empty() || !report.opportunity.flags.is_empty() {
                summary.flagged_items += 1;
            }

            *summary
                .by_category
                .entry(report.opportunity.category.as_str().to_string())
                .or_insert(0) += 1;
            *summary
                .by_source
                .entry(report.valuation.source_label().to_string())
                .or_insert(0) += 1;

            for entry in &report.audit {
                summary.observations_considered += 1;
                if entry.valid {
                    summary.validations_passed += 1;
                } else {
                    summary.validations_failed += 1;
                    *summary
                        .rejections_by_rule
                        .entry(entry.rule.code().to_string())
                        .or_insert(0) += 1;
                }
            }
        }

        summary
    }

    /// Share of processed items that ended with a market value
    pub fn coverage(&self) -> f64 {
        if self.processed == 0 {
            0.0
        } else {
            self.with_market_data as f64 / self.processed as f64
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} items: {} valued ({:.1}% coverage), {} no data, {} fallback, {} skipped | observations {} passed / {} failed",
            self.total_items,
            self.with_market_data,
            self.coverage() * 100.0,
            self.no_data,
            self.fallback_valuations,
            self.skipped,
            self.validations_passed,
            self.validations_failed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub reports: Vec<ItemReport>,
    pub skipped: Vec<SkippedItem>,
    pub summary: BatchSummary,
}

// ============================================================================
// VALUATION PIPELINE
// ============================================================================

pub struct ValuationPipeline {
    pub settings: PipelineSettings,
    pub resolver: IdentityResolver,
    pub classifier: AttributeClassifier,
    pub reconciler: MarketValueReconciler,
    pub opportunity: OpportunityClassifier,
}

impl ValuationPipeline {
    pub fn new() -> Self {
        let classifier = AttributeClassifier::new();
        ValuationPipeline {
            settings: PipelineSettings::default(),
            resolver: IdentityResolver::with_detector(classifier.detector().clone()),
            classifier,
            reconciler: MarketValueReconciler::new(),
            opportunity: OpportunityClassifier::new(),
        }
    }

    /// Build every stage from a validated configuration
    pub fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;

        let classifier = AttributeClassifier::with_settings(config.attributes.clone());
        let validator = ObservationValidator::with_settings(config.validation.clone());

        Ok(ValuationPipeline {
            settings: config.pipeline.clone(),
            resolver: IdentityResolver::with_detector(classifier.detector().clone()),
            classifier,
            reconciler: MarketValueReconciler::with_settings(config.reconciliation.clone(), validator),
            opportunity: OpportunityClassifier::with_settings(config.opportunity.clone()),
        })
    }

    /// Evaluate one item against the observations already matched to it
    pub fn evaluate_item(&self, record: &RawItemRecord, observations: &[PriceObservation]) -> ItemReport {
        let identity = self.resolver.resolve(record);
        self.evaluate_resolved(record, identity, observations)
    }

    fn evaluate_resolved(
        &self,
        record: &RawItemRecord,
        identity: CanonicalIdentity,
        observations: &[PriceObservation],
    ) -> ItemReport {
        let attributes = self.classifier.classify(record);
        let (valuation, audit) = self.reconciler.reconcile_with_audit(observations, &attributes);
        let opportunity = self.opportunity.classify(record.asking_price, &valuation, &attributes);

        ItemReport {
            item_id: record.id.clone(),
            title: record.title.clone(),
            asking_price: record.asking_price,
            identity,
            attributes,
            valuation,
            opportunity,
            audit,
        }
    }

    /// Match, validate and value one item; panics are caught and reported
    pub fn process_item(&self, record: &RawItemRecord, index: &ObservationIndex<'_>) -> Result<ItemReport, EngineError> {
        record.check_mandatory()?;

        isolate_item(record, || {
            let identity = self.resolver.resolve(record);
            let observations = index.observations_for(record, &identity);
            self.evaluate_resolved(record, identity, &observations)
        })
    }

    /// Run the whole snapshot (or the first `batch_limit` items)
    pub fn run(&self, snapshot: &Snapshot) -> BatchOutcome {
        let limit = self.settings.batch_limit.unwrap_or(snapshot.items.len());
        let items = &snapshot.items[..limit.min(snapshot.items.len())];
        let index = ObservationIndex::build(&snapshot.observations, self.settings.match_mode);
        let workers = self.worker_count().min(items.len()).max(1);

        tracing::info!(
            items = items.len(),
            observations = index.len(),
            workers,
            "Starting valuation run"
        );

        let results = self.run_chunks(items, &index, workers);

        let mut reports = Vec::with_capacity(items.len());
        let mut skipped = Vec::new();

        for (record, result) in items.iter().zip(results) {
            match result {
                Ok(report) => reports.push(report),
                Err(err) => {
                    tracing::warn!(item_id = %record.id, error = %err, "Skipping item");
                    skipped.push(SkippedItem {
                        item_id: record.id.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        let summary = BatchSummary::from_outcome(items.len(), &reports, &skipped);
        tracing::info!(
            processed = summary.processed,
            skipped = summary.skipped,
            no_data = summary.no_data,
            "Valuation run finished"
        );

        BatchOutcome {
            reports,
            skipped,
            summary,
        }
    }

    fn worker_count(&self) -> usize {
        if self.settings.workers == 0 {
            std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(4)
        } else {
            self.settings.workers
        }
    }

    /// Contiguous chunks per worker, results re-assembled in item order
    fn run_chunks(
        &self,
        items: &[RawItemRecord],
        index: &ObservationIndex<'_>,
        workers: usize,
    ) -> Vec<Result<ItemReport, EngineError>> {
        if items.is_empty() {
            return Vec::new();
        }
        if workers <= 1 {
            return items.iter().map(|record| self.process_item(record, index)).collect();
        }

        let chunk_size = items.len().div_ceil(workers);

        std::thread::scope(|scope| {
            let handles: Vec<_> = items
                .chunks(chunk_size)
                .map(|chunk| {
                    let handle = scope.spawn(move || {
                        chunk
                            .iter()
                            .map(|record| self.process_item(record, index))
                            .collect::<Vec<_>>()
                    });
                    (chunk, handle)
                })
                .collect();

            let mut results = Vec::with_capacity(items.len());
            for (chunk, handle) in handles {
                match handle.join() {
                    Ok(chunk_results) => results.extend(chunk_results),
                    // Item panics are caught in process_item; this only fires if a worker dies outside one
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        results.extend(chunk.iter().map(|record| {
                            Err(EngineError::ItemPanicked {
                                item_id: record.id.clone(),
                                message: message.clone(),
                            })
                        }));
                    }
                }
            }
            results
        })
    }
}

impl Default for ValuationPipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Run one item's stages, turning a panic into `ItemPanicked` for that item
fn isolate_item<F>(record: &RawItemRecord, stages: F) -> Result<ItemReport, EngineError>
where
    F: FnOnce() -> ItemReport,
{
    panic::catch_unwind(AssertUnwindSafe(stages)).map_err(|payload| EngineError::ItemPanicked {
        item_id: record.id.clone(),
        message: panic_message(payload.as_ref()),
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opportunity::OpportunityCategory;
    use crate::snapshot::PriceSource;

    fn create_test_snapshot() -> Snapshot {
        let items = vec![
            RawItemRecord::new("cc-1", "Charizard Base Set PSA 10", 8000.0),
            RawItemRecord::new("cc-2", "", 10.0),
            RawItemRecord::new("cc-3", "Eevee Jungle", 5.0),
            RawItemRecord::new("cc-4", "Pikachu Promo", 2.0),
        ];
        let observations = vec![
            PriceObservation::new(PriceSource::EbaySold, 12000.0).for_item("cc-1"),
            PriceObservation::new(PriceSource::Tcgplayer, 450.0).for_item("cc-1"),
            PriceObservation::new(PriceSource::Tcgplayer, 10.0).for_item("cc-3"),
        ];
        Snapshot::new(items, observations)
    }

    #[test]
    fn test_run_skips_missing_title_and_keeps_order() {
        let pipeline = ValuationPipeline::new();
        let outcome = pipeline.run(&create_test_snapshot());

        let ids: Vec<&str> = outcome.reports.iter().map(|r| r.item_id.as_str()).collect();
        assert_eq!(ids, vec!["cc-1", "cc-3", "cc-4"]);

        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].item_id, "cc-2");
        assert!(outcome.skipped[0].reason.contains("title"));
    }

    #[test]
    fn test_item_without_observations_is_no_data() {
        let pipeline = ValuationPipeline::new();
        let outcome = pipeline.run(&create_test_snapshot());

        let pikachu = &outcome.reports[2];
        assert_eq!(pikachu.valuation.source_label(), "NO_DATA");
        assert_eq!(pikachu.opportunity.category, OpportunityCategory::NoData);
    }

    #[test]
    fn test_summary_counts() {
        let pipeline = ValuationPipeline::new();
        let summary = pipeline.run(&create_test_snapshot()).summary;

        assert_eq!(summary.total_items, 4);
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.with_market_data, 2);
        assert_eq!(summary.no_data, 1);
        assert_eq!(summary.validations_passed, 3);
        assert_eq!(summary.by_source.get("ebay_sold"), Some(&1));
        assert_eq!(summary.by_source.get("NO_DATA"), Some(&1));
        assert!(summary.summary().contains("4 items"));
    }

    #[test]
    fn test_batch_limit() {
        let mut pipeline = ValuationPipeline::new();
        pipeline.settings.batch_limit = Some(1);

        let outcome = pipeline.run(&create_test_snapshot());
        assert_eq!(outcome.reports.len(), 1);
        assert_eq!(outcome.summary.total_items, 1);
    }

    #[test]
    fn test_worker_count_does_not_change_output() {
        let snapshot = create_test_snapshot();

        let mut sequential = ValuationPipeline::new();
        sequential.settings.workers = 1;
        let mut parallel = ValuationPipeline::new();
        parallel.settings.workers = 3;

        assert_eq!(sequential.run(&snapshot), parallel.run(&snapshot));
    }

    #[test]
    fn test_from_config() {
        let mut config = EngineConfig::default();
        config.pipeline.workers = 2;
        let pipeline = ValuationPipeline::from_config(&config).unwrap();
        assert_eq!(pipeline.settings.workers, 2);

        config.opportunity.default_bands.fair_market = 0.1;
        assert!(ValuationPipeline::from_config(&config).is_err());
    }

    #[test]
    fn test_panicking_item_is_isolated() {
        let pipeline = ValuationPipeline::new();
        let record = RawItemRecord::new("cc-9", "Gengar Fossil", 30.0);

        let result = isolate_item(&record, || panic!("reconciler blew up on {}", "cc-9"));
        match result {
            Err(EngineError::ItemPanicked { item_id, message }) => {
                assert_eq!(item_id, "cc-9");
                assert_eq!(message, "reconciler blew up on cc-9");
            }
            other => panic!("expected ItemPanicked, got {:?}", other),
        }

        let report = isolate_item(&record, || pipeline.evaluate_item(&record, &[])).unwrap();
        assert_eq!(report.item_id, "cc-9");
    }

    #[test]
    fn test_panic_message_payloads() {
        let payload = panic::catch_unwind(|| panic!("static text")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "static text");

        let payload = panic::catch_unwind(|| std::panic::panic_any(7_u32)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }

    #[test]
    fn test_empty_snapshot() {
        let pipeline = ValuationPipeline::new();
        let outcome = pipeline.run(&Snapshot::default());

        assert!(outcome.reports.is_empty());
        assert_eq!(outcome.summary.coverage(), 0.0);
    }
}
