// 🗄️ Output Store - SQLite persistence for valuation runs
// One transaction per batch; re-runs overwrite per-item rows, never append

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::pipeline::{BatchSummary, ItemReport};

/// One batch execution, recorded alongside its outputs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuationRun {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub summary: BatchSummary,
}

impl ValuationRun {
    pub fn new(started_at: DateTime<Utc>, summary: BatchSummary) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at,
            finished_at: Utc::now(),
            summary,
        }
    }
}

/// Row read back from `item_valuations`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredValuation {
    pub item_id: String,
    pub run_id: String,
    pub sku_key: String,
    pub asking_price: Option<f64>,
    pub market_value: f64,
    pub value_source: String,
    pub valuation_confidence: i64,
    pub category: String,
    pub ratio: f64,
    pub opportunity_confidence: i64,
}

/// Row read back from `observation_audit`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAudit {
    pub source: String,
    pub raw_value: Option<f64>,
    pub valid: bool,
    pub rule: String,
    pub reason: String,
}

pub fn setup_output_schema(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Runs
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS valuation_runs (
            run_id TEXT PRIMARY KEY,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            total_items INTEGER NOT NULL,
            processed INTEGER NOT NULL,
            skipped INTEGER NOT NULL,
            no_data INTEGER NOT NULL,
            summary TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Per-item valuation + opportunity (one row per item, replaced on re-run)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS item_valuations (
            item_id TEXT PRIMARY KEY,
            run_id TEXT NOT NULL,
            sku_key TEXT NOT NULL,
            title TEXT NOT NULL,
            asking_price REAL,
            is_graded INTEGER NOT NULL,
            grading_company TEXT,
            numeric_grade REAL,
            grading_multiplier REAL NOT NULL,
            era_category TEXT NOT NULL,
            is_marquee_name INTEGER NOT NULL,
            market_value REAL NOT NULL,
            value_source TEXT NOT NULL,
            valuation_confidence INTEGER NOT NULL,
            valuation_explanation TEXT NOT NULL,
            is_fallback INTEGER NOT NULL,
            category TEXT NOT NULL,
            ratio REAL NOT NULL,
            opportunity_confidence INTEGER NOT NULL,
            opportunity_explanation TEXT NOT NULL,
            potential_profit REAL NOT NULL,
            flags TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Validation audit trail (replaced per item on re-run)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS observation_audit (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            item_id TEXT NOT NULL,
            run_id TEXT NOT NULL,
            source TEXT NOT NULL,
            raw_value REAL,
            valid INTEGER NOT NULL,
            rule TEXT NOT NULL,
            reason TEXT NOT NULL,
            observed_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_audit_item ON observation_audit(item_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_valuations_category ON item_valuations(category)",
        [],
    )?;

    Ok(())
}

/// Write a whole batch in a single transaction. Returns rows written.
pub fn write_batch(conn: &mut Connection, run: &ValuationRun, reports: &[ItemReport]) -> Result<usize> {
    let tx = conn.transaction().context("Failed to begin batch transaction")?;

    let summary_json = serde_json::to_string(&run.summary)?;
    tx.execute(
        "INSERT OR REPLACE INTO valuation_runs (
            run_id, started_at, finished_at, total_items, processed, skipped, no_data, summary
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            run.run_id,
            run.started_at.to_rfc3339(),
            run.finished_at.to_rfc3339(),
            run.summary.total_items as i64,
            run.summary.processed as i64,
            run.summary.skipped as i64,
            run.summary.no_data as i64,
            summary_json,
        ],
    )?;

    let updated_at = run.finished_at.to_rfc3339();
    let mut written = 0;

    {
        let mut upsert = tx.prepare(
            "INSERT OR REPLACE INTO item_valuations (
                item_id, run_id, sku_key, title, asking_price,
                is_graded, grading_company, numeric_grade, grading_multiplier, era_category, is_marquee_name,
                market_value, value_source, valuation_confidence, valuation_explanation, is_fallback,
                category, ratio, opportunity_confidence, opportunity_explanation, potential_profit,
                flags, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)",
        )?;
        let mut clear_audit = tx.prepare("DELETE FROM observation_audit WHERE item_id = ?1")?;
        let mut insert_audit = tx.prepare(
            "INSERT INTO observation_audit (
                item_id, run_id, source, raw_value, valid, rule, reason, observed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;

        for report in reports {
            let mut flags: Vec<&str> = report
                .valuation
                .flags
                .iter()
                .chain(report.opportunity.flags.iter())
                .map(|f| f.code())
                .collect();
            flags.sort_unstable();
            flags.dedup();
            let flags_json = serde_json::to_string(&flags)?;
            let asking_price = Some(report.asking_price).filter(|v| v.is_finite());

            upsert
                .execute(params![
                    report.item_id,
                    run.run_id,
                    report.identity.sku_key,
                    report.title,
                    asking_price,
                    report.attributes.is_graded,
                    report.attributes.grading_company,
                    report.attributes.numeric_grade,
                    report.attributes.grading_multiplier,
                    report.attributes.era_category.as_str(),
                    report.attributes.is_marquee_name,
                    report.valuation.value,
                    report.valuation.source_label(),
                    report.valuation.confidence as i64,
                    report.valuation.explanation,
                    report.valuation.is_fallback,
                    report.opportunity.category.as_str(),
                    report.opportunity.ratio,
                    report.opportunity.confidence as i64,
                    report.opportunity.explanation,
                    report.opportunity.potential_profit,
                    flags_json,
                    updated_at,
                ])
                .with_context(|| format!("Failed to write valuation for {}", report.item_id))?;

            clear_audit.execute(params![report.item_id])?;
            for entry in &report.audit {
                let raw_value = Some(entry.raw_value).filter(|v| v.is_finite());
                insert_audit.execute(params![
                    report.item_id,
                    run.run_id,
                    entry.source.code(),
                    raw_value,
                    entry.valid,
                    entry.rule.code(),
                    entry.reason,
                    entry.observed_at.map(|dt| dt.to_rfc3339()),
                ])?;
            }

            written += 1;
        }
    }

    tx.commit().context("Failed to commit batch transaction")?;
    tracing::info!(run_id = %run.run_id, rows = written, "Batch written");

    Ok(written)
}

pub fn get_valuation(conn: &Connection, item_id: &str) -> Result<Option<StoredValuation>> {
    let row = conn
        .query_row(
            "SELECT item_id, run_id, sku_key, asking_price, market_value, value_source,
                    valuation_confidence, category, ratio, opportunity_confidence
             FROM item_valuations
             WHERE item_id = ?1",
            params![item_id],
            |row| {
                Ok(StoredValuation {
                    item_id: row.get(0)?,
                    run_id: row.get(1)?,
                    sku_key: row.get(2)?,
                    asking_price: row.get(3)?,
                    market_value: row.get(4)?,
                    value_source: row.get(5)?,
                    valuation_confidence: row.get(6)?,
                    category: row.get(7)?,
                    ratio: row.get(8)?,
                    opportunity_confidence: row.get(9)?,
                })
            },
        )
        .optional()?;

    Ok(row)
}

pub fn get_audit_for_item(conn: &Connection, item_id: &str) -> Result<Vec<StoredAudit>> {
    let mut stmt = conn.prepare(
        "SELECT source, raw_value, valid, rule, reason
         FROM observation_audit
         WHERE item_id = ?1
         ORDER BY id",
    )?;

    let rows = stmt.query_map(params![item_id], |row| {
        Ok(StoredAudit {
            source: row.get(0)?,
            raw_value: row.get(1)?,
            valid: row.get(2)?,
            rule: row.get(3)?,
            reason: row.get(4)?,
        })
    })?;

    let mut audit = Vec::new();
    for row in rows {
        audit.push(row?);
    }

    Ok(audit)
}

pub fn count_valuations(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM item_valuations", [], |row| row.get(0))?;
    Ok(count)
}

pub fn count_runs(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM valuation_runs", [], |row| row.get(0))?;
    Ok(count)
}

// ============================================================================
// TESTS
// ============================================================================
