// 🔗 Observation Matching - Join snapshot observations to catalogue items
// Exact joins on item id / sku key, plus the legacy first-token name heuristic

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::attributes::keyword_text;
use crate::identity::{normalize_name, CanonicalIdentity};
use crate::snapshot::{PriceObservation, PriceSource, RawItemRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Only observations carrying the item's id or sku key
    Exact,
    /// Exact joins first, then name overlap for sources still unmatched
    FirstToken,
}

/// ObservationIndex - Read-only lookup over the snapshot's observations
///
/// Built once per run and shared by every worker. Results always come back in
/// snapshot order so the same snapshot produces the same per-item inputs.
pub struct ObservationIndex<'a> {
    observations: &'a [PriceObservation],
    by_item_id: HashMap<&'a str, Vec<usize>>,
    by_sku_key: HashMap<&'a str, Vec<usize>>,

    /// Unkeyed observations with their normalized title, snapshot order
    unkeyed: Vec<(usize, String)>,

    pub mode: MatchMode,
}

impl<'a> ObservationIndex<'a> {
    pub fn build(observations: &'a [PriceObservation], mode: MatchMode) -> Self {
        let mut by_item_id: HashMap<&'a str, Vec<usize>> = HashMap::new();
        let mut by_sku_key: HashMap<&'a str, Vec<usize>> = HashMap::new();
        let mut unkeyed = Vec::new();

        for (idx, observation) in observations.iter().enumerate() {
            if let Some(item_id) = observation.item_id.as_deref() {
                by_item_id.entry(item_id).or_default().push(idx);
            }
            if let Some(sku_key) = observation.sku_key.as_deref() {
                by_sku_key.entry(sku_key).or_default().push(idx);
            }
            if observation.is_unkeyed() {
                if let Some(title) = observation.title.as_deref() {
                    unkeyed.push((idx, normalize_name(title)));
                }
            }
        }

        ObservationIndex {
            observations,
            by_item_id,
            by_sku_key,
            unkeyed,
            mode,
        }
    }

    /// All observations considered for one item
    pub fn observations_for(&self, record: &RawItemRecord, identity: &CanonicalIdentity) -> Vec<PriceObservation> {
        let mut matched: BTreeSet<usize> = BTreeSet::new();

        if let Some(indices) = self.by_item_id.get(record.id.as_str()) {
            matched.extend(indices.iter().copied());
        }
        if let Some(indices) = self.by_sku_key.get(identity.sku_key.as_str()) {
            matched.extend(indices.iter().copied());
        }

        if self.mode == MatchMode::FirstToken {
            let covered: BTreeSet<PriceSource> = matched.iter().map(|&i| self.observations[i].source).collect();
            let item_name = &identity.name;

            for source in PriceSource::ALL {
                if covered.contains(&source) {
                    continue;
                }

                let candidate = self
                    .unkeyed
                    .iter()
                    .find(|(idx, name)| self.observations[*idx].source == source && names_overlap(item_name, name));

                if let Some((idx, _)) = candidate {
                    matched.insert(*idx);
                }
            }
        }

        matched.into_iter().map(|i| self.observations[i].clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

/// Shorter first tokens ("M", "EX") match far too many names
const MIN_TOKEN_LEN: usize = 3;

/// Either name contains the other's first token as a whole word
pub fn names_overlap(a: &str, b: &str) -> bool {
    let padded_a = keyword_text(a);
    let padded_b = keyword_text(b);

    let token_in = |padded_name: &str, other: &str| match other.split_whitespace().next() {
        Some(token) if token.chars().count() >= MIN_TOKEN_LEN => padded_name.contains(&keyword_text(token)),
        _ => false,
    };

    token_in(&padded_a, &padded_b) || token_in(&padded_b, &padded_a)
}

// ============================================================================
// TESTS
// ============================================================================
