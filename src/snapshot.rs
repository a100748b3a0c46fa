// 📥 Snapshot - Read-only inputs handed over by the acquisition collaborators
// Item records + per-source price observations, loaded in full before a run

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::EngineError;

// ============================================================================
// PRICE SOURCE
// ============================================================================

/// PriceSource - Which marketplace produced an observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    /// Completed eBay sales
    EbaySold,
    /// Active eBay listings (asking prices)
    EbayCurrent,
    /// TCGplayer market price
    Tcgplayer,
    /// Pokemon TCG API embedded market price
    PokemonTcgApi,
    /// Fanatics Collect sold auctions (supplementary)
    FanaticsCollect,
    /// Cardmarket trend price (supplementary)
    Cardmarket,
}

impl PriceSource {
    pub const ALL: [PriceSource; 6] = [
        PriceSource::EbaySold,
        PriceSource::EbayCurrent,
        PriceSource::Tcgplayer,
        PriceSource::PokemonTcgApi,
        PriceSource::FanaticsCollect,
        PriceSource::Cardmarket,
    ];

    /// Short code used in reason strings, output rows and config
    pub fn code(&self) -> &'static str {
        match self {
            PriceSource::EbaySold => "ebay_sold",
            PriceSource::EbayCurrent => "ebay_current",
            PriceSource::Tcgplayer => "tcgplayer",
            PriceSource::PokemonTcgApi => "pokemon_tcg_api",
            PriceSource::FanaticsCollect => "fanatics_collect",
            PriceSource::Cardmarket => "cardmarket",
        }
    }

    /// Human-readable name for display
    pub fn name(&self) -> &'static str {
        match self {
            PriceSource::EbaySold => "eBay Sold",
            PriceSource::EbayCurrent => "eBay Current",
            PriceSource::Tcgplayer => "TCGPlayer",
            PriceSource::PokemonTcgApi => "Pokemon TCG API",
            PriceSource::FanaticsCollect => "Fanatics Collect",
            PriceSource::Cardmarket => "Cardmarket",
        }
    }

    /// True when the source prices the graded slab itself rather than a raw card
    pub fn prices_graded_slab(&self) -> bool {
        matches!(
            self,
            PriceSource::EbaySold | PriceSource::EbayCurrent | PriceSource::FanaticsCollect
        )
    }
}

impl fmt::Display for PriceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for PriceSource {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "ebay_sold" => Ok(PriceSource::EbaySold),
            "ebay_current" => Ok(PriceSource::EbayCurrent),
            "tcgplayer" => Ok(PriceSource::Tcgplayer),
            "pokemon_tcg_api" | "pokemon_tcg" => Ok(PriceSource::PokemonTcgApi),
            "fanatics_collect" | "fanatics" => Ok(PriceSource::FanaticsCollect),
            "cardmarket" => Ok(PriceSource::Cardmarket),
            _ => Err(EngineError::UnknownSource(s.to_string())),
        }
    }
}

// ============================================================================
// RAW ITEM RECORD
// ============================================================================

/// RawItemRecord - One catalogued item offered for sale
///
/// Immutable once read. `id` is the catalogue's own row identifier and is only
/// used to key outputs; cross-source matching never relies on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawItemRecord {
    pub id: String,

    /// Free-text listing title (mandatory - records without one are skipped)
    #[serde(default)]
    pub title: String,

    /// Read leniently from text; NaN when no price can be read
    #[serde(deserialize_with = "lenient_price")]
    pub asking_price: f64,

    #[serde(default)]
    pub category: String,

    #[serde(default)]
    pub grading_company: Option<String>,

    #[serde(default)]
    pub grade: Option<String>,

    #[serde(default)]
    pub set_name: Option<String>,

    #[serde(default)]
    pub card_number: Option<String>,

    /// Card name without grading/set noise; falls back to title when absent
    #[serde(default)]
    pub name: Option<String>,

    /// Rarity / printing text (e.g. "Rare Holo", "1st Edition")
    #[serde(default)]
    pub rarity: Option<String>,

    #[serde(default)]
    pub language: Option<String>,
}

impl RawItemRecord {
    /// Create a record with the mandatory fields only
    pub fn new(id: impl Into<String>, title: impl Into<String>, asking_price: f64) -> Self {
        RawItemRecord {
            id: id.into(),
            title: title.into(),
            asking_price,
            category: String::new(),
            grading_company: None,
            grade: None,
            set_name: None,
            card_number: None,
            name: None,
            rarity: None,
            language: None,
        }
    }

    /// Builder: explicit grading fields
    pub fn with_grading(mut self, company: impl Into<String>, grade: impl Into<String>) -> Self {
        self.grading_company = Some(company.into());
        self.grade = Some(grade.into());
        self
    }

    /// Builder: set name + card number
    pub fn with_set(mut self, set_name: impl Into<String>, card_number: impl Into<String>) -> Self {
        self.set_name = Some(set_name.into());
        self.card_number = Some(card_number.into());
        self
    }

    /// Builder: card name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Builder: rarity text
    pub fn with_rarity(mut self, rarity: impl Into<String>) -> Self {
        self.rarity = Some(rarity.into());
        self
    }

    /// Builder: category
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    /// Title and set name joined, the text every keyword scan runs against
    pub fn descriptive_text(&self) -> String {
        match self.set_name.as_deref().map(str::trim) {
            Some(set) if !set.is_empty() => format!("{} {}", self.title, set),
            _ => self.title.clone(),
        }
    }

    /// Mandatory-field check used by the batch driver
    pub fn check_mandatory(&self) -> Result<(), EngineError> {
        if self.title.trim().is_empty() {
            return Err(EngineError::MalformedRecord {
                item_id: self.id.clone(),
                reason: "title is empty".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// PRICE OBSERVATION
// ============================================================================

/// PriceObservation - One price fact reported by one source
///
/// Linkage to the catalogue is carried by whichever of `item_id` / `sku_key`
/// the collaborator could provide; `title` feeds the legacy name heuristic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub source: PriceSource,

    /// Price in the single fixed currency unit. NaN marks unparseable input.
    pub raw_value: f64,

    #[serde(default)]
    pub item_id: Option<String>,

    #[serde(default)]
    pub sku_key: Option<String>,

    #[serde(default)]
    pub title: Option<String>,

    /// Freshness signal from the source
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
}

impl PriceObservation {
    pub fn new(source: PriceSource, raw_value: f64) -> Self {
        PriceObservation {
            source,
            raw_value,
            item_id: None,
            sku_key: None,
            title: None,
            observed_at: None,
        }
    }

    /// Builder: link to a catalogue item id
    pub fn for_item(mut self, item_id: impl Into<String>) -> Self {
        self.item_id = Some(item_id.into());
        self
    }

    /// Builder: link by canonical sku key
    pub fn with_sku_key(mut self, sku_key: impl Into<String>) -> Self {
        self.sku_key = Some(sku_key.into());
        self
    }

    /// Builder: source-side title for name matching
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Builder: observation timestamp
    pub fn observed_at(mut self, at: DateTime<Utc>) -> Self {
        self.observed_at = Some(at);
        self
    }

    /// True when the observation carries no exact linkage at all
    pub fn is_unkeyed(&self) -> bool {
        self.item_id.is_none() && self.sku_key.is_none()
    }
}

// ============================================================================
// SNAPSHOT
// ============================================================================

/// Snapshot - Everything one run reads. Never mutated during a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub items: Vec<RawItemRecord>,
    pub observations: Vec<PriceObservation>,
}

impl Snapshot {
    pub fn new(items: Vec<RawItemRecord>, observations: Vec<PriceObservation>) -> Self {
        Snapshot { items, observations }
    }

    /// Load both CSV files in full
    pub fn load(items_path: &Path, observations_path: &Path) -> Result<Self> {
        let items = load_items_csv(items_path)?;
        let observations = load_observations_csv(observations_path)?;
        Ok(Snapshot { items, observations })
    }
}

/// CSV row shape for observations (price arrives as text)
#[derive(Debug, Deserialize)]
struct ObservationRow {
    source: String,
    raw_value: String,
    #[serde(default)]
    item_id: Option<String>,
    #[serde(default)]
    sku_key: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    observed_at: Option<String>,
}

/// Lenient price parsing: "$1,234.50" → 1234.50
///
/// Returns None when no number can be read from the text.
pub fn parse_price(text: &str) -> Option<f64> {
    let cleaned: String = text
        .trim()
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | ' '))
        .collect();

    if cleaned.is_empty() {
        return None;
    }

    cleaned.parse::<f64>().ok()
}

fn lenient_price<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    Ok(parse_price(&text).unwrap_or(f64::NAN))
}

fn snapshot_error(csv_path: &Path, message: String) -> EngineError {
    EngineError::Snapshot {
        path: csv_path.display().to_string(),
        message,
    }
}

pub fn load_items_csv(csv_path: &Path) -> Result<Vec<RawItemRecord>> {
    let mut rdr = csv::Reader::from_path(csv_path).map_err(|e| snapshot_error(csv_path, e.to_string()))?;

    let mut items = Vec::new();

    for (line, result) in rdr.deserialize().enumerate() {
        let item: RawItemRecord =
            result.map_err(|e| snapshot_error(csv_path, format!("item on line {}: {}", line + 2, e)))?;
        items.push(item);
    }

    tracing::debug!(path = %csv_path.display(), count = items.len(), "Loaded item records");
    Ok(items)
}

pub fn load_observations_csv(csv_path: &Path) -> Result<Vec<PriceObservation>> {
    let mut rdr = csv::Reader::from_path(csv_path).map_err(|e| snapshot_error(csv_path, e.to_string()))?;

    let mut observations = Vec::new();

    for (line, result) in rdr.deserialize().enumerate() {
        let row: ObservationRow = result
            .map_err(|e| snapshot_error(csv_path, format!("observation on line {}: {}", line + 2, e)))?;

        let source: PriceSource = row
            .source
            .parse()
            .with_context(|| format!("Line {} of {}", line + 2, csv_path.display()))?;

        // Unparseable prices stay in the snapshot so the validator can report them
        let raw_value = parse_price(&row.raw_value).unwrap_or(f64::NAN);

        let observed_at = row
            .observed_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        observations.push(PriceObservation {
            source,
            raw_value,
            item_id: row.item_id.filter(|s| !s.is_empty()),
            sku_key: row.sku_key.filter(|s| !s.is_empty()),
            title: row.title.filter(|s| !s.is_empty()),
            observed_at,
        });
    }

    tracing::debug!(
        path = %csv_path.display(),
        count = observations.len(),
        "Loaded price observations"
    );
    Ok(observations)
}

// ============================================================================
// TESTS
// ============================================================================
