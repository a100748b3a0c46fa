//! End-to-end properties of the valuation pipeline.

use std::io::Write;

use card_valuation::{
    count_valuations, get_valuation, setup_output_schema, write_batch, BandProfile, EraCategory,
    IdentityResolver, ItemAttributes, MarketValuation, ObservationValidator, OpportunityCategory,
    OpportunityClassifier, PriceObservation, PriceSource, RawItemRecord, Snapshot,
    ValuationPipeline, ValuationRun,
};
use chrono::Utc;
use rusqlite::Connection;

fn create_test_snapshot() -> Snapshot {
    let items = vec![
        RawItemRecord::new("cc-1", "Charizard Base Set PSA 10", 8000.0),
        RawItemRecord::new("cc-2", "Blastoise PSA 9", 900.0),
        RawItemRecord::new("cc-3", "Eevee V", 4.0),
        RawItemRecord::new("cc-4", "Mew Gold Star", 1200.0).with_rarity("Holo"),
        RawItemRecord::new("cc-5", "", 1.0),
        RawItemRecord::new("cc-6", "Gengar Fossil", 30.0),
    ];
    let observations = vec![
        PriceObservation::new(PriceSource::EbaySold, 12000.0).for_item("cc-1"),
        PriceObservation::new(PriceSource::Tcgplayer, 450.0).for_item("cc-1"),
        PriceObservation::new(PriceSource::EbaySold, 500.0).for_item("cc-2"),
        PriceObservation::new(PriceSource::Tcgplayer, 300.0).for_item("cc-2"),
        PriceObservation::new(PriceSource::Tcgplayer, 5.5).with_title("Eevee"),
        PriceObservation::new(PriceSource::Cardmarket, 1100.0).for_item("cc-4"),
        PriceObservation::new(PriceSource::PokemonTcgApi, f64::NAN).for_item("cc-6"),
    ];
    Snapshot::new(items, observations)
}

fn valuation_with(value: f64) -> MarketValuation {
    MarketValuation {
        value,
        source: Some(PriceSource::Tcgplayer),
        confidence: 90,
        explanation: String::new(),
        is_fallback: false,
        validated_sources: 1,
        flags: Vec::new(),
    }
}

#[test]
fn sku_key_is_deterministic_and_sensitive_to_printing_and_grade() {
    let resolver = IdentityResolver::new();
    let record = RawItemRecord::new("a", "Charizard", 100.0)
        .with_set("Base Set", "4")
        .with_rarity("Holo")
        .with_grading("PSA", "10");

    let first = resolver.resolve(&record);
    let second = resolver.resolve(&record.clone());
    assert_eq!(first.sku_key, second.sku_key);

    let other_printing = resolver.resolve(&record.clone().with_rarity("Shadowless"));
    assert_ne!(first.sku_key, other_printing.sku_key);

    let other_grade = resolver.resolve(&record.clone().with_grading("PSA", "9"));
    assert_ne!(first.sku_key, other_grade.sku_key);
}

#[test]
fn floor_boundary_holds_for_every_primary_source() {
    let validator = ObservationValidator::new();
    let raw = ItemAttributes::ungraded();

    for source in [
        PriceSource::EbaySold,
        PriceSource::EbayCurrent,
        PriceSource::Tcgplayer,
        PriceSource::PokemonTcgApi,
    ] {
        let floor = validator.settings.bounds.get(source).min;
        assert!(validator.validate_price(source, floor, &raw).valid);
        assert!(!validator.validate_price(source, floor - 0.01, &raw).valid);
    }
}

#[test]
fn graded_item_prefers_ebay_sold_with_premium() {
    let pipeline = ValuationPipeline::new();
    let snapshot = create_test_snapshot();
    let outcome = pipeline.run(&snapshot);

    let blastoise = outcome.reports.iter().find(|r| r.item_id == "cc-2").unwrap();
    assert!(blastoise.attributes.is_graded);
    assert_eq!(blastoise.valuation.source, Some(PriceSource::EbaySold));
    assert_eq!(blastoise.valuation.value, 500.0 * blastoise.attributes.grading_multiplier);
    assert_eq!(blastoise.attributes.grading_multiplier, 2.5);
}

#[test]
fn non_priority_source_falls_back_at_forty() {
    let pipeline = ValuationPipeline::new();
    let outcome = pipeline.run(&create_test_snapshot());

    let mew = outcome.reports.iter().find(|r| r.item_id == "cc-4").unwrap();
    assert_eq!(mew.valuation.source, Some(PriceSource::Cardmarket));
    assert_eq!(mew.valuation.confidence, 40);
    assert!(mew.valuation.is_fallback);
    assert!(mew.valuation.explanation.contains("Fallback"));
    assert!(mew.attributes.is_marquee_name);
}

#[test]
fn no_validated_observation_propagates_no_data() {
    let pipeline = ValuationPipeline::new();
    let outcome = pipeline.run(&create_test_snapshot());

    let gengar = outcome.reports.iter().find(|r| r.item_id == "cc-6").unwrap();
    assert_eq!(gengar.valuation.value, 0.0);
    assert_eq!(gengar.valuation.source_label(), "NO_DATA");
    assert_eq!(gengar.valuation.confidence, 0);
    assert_eq!(gengar.opportunity.category, OpportunityCategory::NoData);
    assert_eq!(gengar.audit.len(), 1);
    assert!(!gengar.audit[0].valid);
}

#[test]
fn missing_title_is_the_only_skip() {
    let pipeline = ValuationPipeline::new();
    let outcome = pipeline.run(&create_test_snapshot());

    assert_eq!(outcome.reports.len(), 5);
    assert_eq!(outcome.skipped.len(), 1);
    assert_eq!(outcome.skipped[0].item_id, "cc-5");
}

#[test]
fn first_token_heuristic_matches_unkeyed_observation() {
    let pipeline = ValuationPipeline::new();
    let outcome = pipeline.run(&create_test_snapshot());

    let eevee = outcome.reports.iter().find(|r| r.item_id == "cc-3").unwrap();
    assert_eq!(eevee.valuation.source, Some(PriceSource::Tcgplayer));
    assert_eq!(eevee.valuation.value, 5.5);
}

#[test]
fn classification_is_monotonic_in_asking_price() {
    let classifier = OpportunityClassifier::new();
    let valuation = valuation_with(400.0);

    let mut vintage = ItemAttributes::ungraded();
    vintage.era_category = EraCategory::Vintage;
    let mut graded = ItemAttributes::ungraded();
    graded.is_graded = true;

    for attributes in [ItemAttributes::ungraded(), vintage, graded] {
        let mut previous = OpportunityCategory::Underpriced;
        for step in 0..=1600 {
            let asking = step as f64 * 0.5;
            let category = classifier.classify(asking, &valuation, &attributes).category;
            assert!(category >= previous, "asking {} moved from {:?} to {:?}", asking, previous, category);
            previous = category;
        }
        assert_eq!(previous, OpportunityCategory::HighlyOverpriced);
    }
}

#[test]
fn rerun_produces_byte_identical_output() {
    let snapshot = create_test_snapshot();

    let mut sequential = ValuationPipeline::new();
    sequential.settings.workers = 1;
    let mut parallel = ValuationPipeline::new();
    parallel.settings.workers = 4;

    let first = serde_json::to_vec(&sequential.run(&snapshot)).unwrap();
    let second = serde_json::to_vec(&sequential.run(&snapshot)).unwrap();
    let third = serde_json::to_vec(&parallel.run(&snapshot)).unwrap();

    assert_eq!(first, second);
    assert_eq!(first, third);
}

#[test]
fn charizard_base_set_psa_10_scenario() {
    let pipeline = ValuationPipeline::new();
    let record = RawItemRecord::new("cc-1", "Charizard Base Set PSA 10", 8000.0);
    let observations = vec![
        PriceObservation::new(PriceSource::EbaySold, 12000.0),
        PriceObservation::new(PriceSource::Tcgplayer, 450.0),
    ];

    let report = pipeline.evaluate_item(&record, &observations);

    assert!(report.attributes.is_graded);
    assert_eq!(report.attributes.grading_company.as_deref(), Some("PSA"));
    assert_eq!(report.attributes.numeric_grade, Some(10.0));
    assert_eq!(report.attributes.era_category, EraCategory::Vintage);

    let multiplier = report.attributes.grading_multiplier;
    assert_eq!(report.valuation.source, Some(PriceSource::EbaySold));
    assert_eq!(report.valuation.value, 12000.0 * multiplier);

    assert_eq!(report.opportunity.profile, BandProfile::GradedHighValue);
    assert_eq!(report.opportunity.ratio, 8000.0 / report.valuation.value);
    assert!(report.opportunity.ratio <= 0.75);
    assert_eq!(report.opportunity.category, OpportunityCategory::Underpriced);
}

#[test]
fn csv_to_sqlite_round_trip() {
    let dir = tempfile::tempdir().unwrap();

    let items_path = dir.path().join("items.csv");
    let mut f = std::fs::File::create(&items_path).unwrap();
    writeln!(f, "id,title,asking_price,category,grading_company,grade,set_name,card_number,name,rarity,language").unwrap();
    writeln!(f, "cc-1,Charizard Holo,8000,Pokemon,PSA,10,Base Set,4,Charizard,Rare Holo,EN").unwrap();
    writeln!(f, "cc-2,Squirtle,1.50,Pokemon,,,Base Set,63,Squirtle,Common,").unwrap();
    drop(f);

    let obs_path = dir.path().join("observations.csv");
    let mut f = std::fs::File::create(&obs_path).unwrap();
    writeln!(f, "source,raw_value,item_id,sku_key,title,observed_at").unwrap();
    writeln!(f, "ebay_sold,\"$12,000.00\",cc-1,,,").unwrap();
    writeln!(f, "tcgplayer,$3.10,cc-2,,,").unwrap();
    drop(f);

    let snapshot = Snapshot::load(&items_path, &obs_path).unwrap();
    let outcome = ValuationPipeline::new().run(&snapshot);

    let mut conn = Connection::open(dir.path().join("valuations.db")).unwrap();
    setup_output_schema(&conn).unwrap();
    let run = ValuationRun::new(Utc::now(), outcome.summary.clone());
    assert_eq!(write_batch(&mut conn, &run, &outcome.reports).unwrap(), 2);

    assert_eq!(count_valuations(&conn).unwrap(), 2);
    let charizard = get_valuation(&conn, "cc-1").unwrap().unwrap();
    assert_eq!(charizard.value_source, "ebay_sold");
    assert_eq!(charizard.market_value, 48000.0);

    let squirtle = get_valuation(&conn, "cc-2").unwrap().unwrap();
    assert_eq!(squirtle.value_source, "tcgplayer");
    assert_eq!(squirtle.category, "UNDERPRICED");
}
