// Card Valuation Engine - Core Library
// Reconciles marketplace price observations into one market value per item

pub mod error;          // Error taxonomy
pub mod snapshot;       // Input records, price sources, CSV loaders
pub mod attributes;     // Attribute Classifier - grading, premium, era, marquee
pub mod identity;       // Canonical Identity Resolver - sku keys
pub mod validation;     // Observation Validator - per-source bounds
pub mod reconciliation; // Market Value Reconciler - priority, confidence, fallback
pub mod opportunity;    // Opportunity Classifier - ratio bands
pub mod matching;       // Observation-to-item join
pub mod pipeline;       // Batch driver
pub mod db;             // SQLite output store
pub mod config;         // TOML configuration + logging

// Re-export commonly used types
pub use error::EngineError;
pub use snapshot::{
    PriceObservation, PriceSource, RawItemRecord, Snapshot,
    load_items_csv, load_observations_csv, parse_price,
};
pub use attributes::{
    AttributeClassifier, AttributeSettings, EraCategory, GradingDetector, GradingInfo, ItemAttributes,
};
pub use identity::{CanonicalIdentity, IdentityResolver, PrintingVariant};
pub use validation::{ObservationValidator, ValidationResult, ValidationRule, ValidationSettings};
pub use reconciliation::{
    MarketValuation, MarketValueReconciler, ObservationAudit, PremiumPolicy, QualityFlag,
    ReconciliationSettings, NO_DATA,
};
pub use opportunity::{
    BandProfile, OpportunityCategory, OpportunityClassification, OpportunityClassifier,
    OpportunitySettings,
};
pub use matching::{MatchMode, ObservationIndex};
pub use pipeline::{
    BatchOutcome, BatchSummary, ItemReport, PipelineSettings, SkippedItem, ValuationPipeline,
};
pub use db::{
    ValuationRun, StoredValuation, StoredAudit,
    setup_output_schema, write_batch, get_valuation, get_audit_for_item,
    count_valuations, count_runs,
};
pub use config::{EngineConfig, LoggingConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
