//! Card data flattening.

use indexmap::IndexMap;
use serde_json::{Number, Value};

use crate::error::DataError;

/// One game entity description. Only `id` is interpreted, every other field
/// is passed through unchanged.
pub type CardRecord = serde_json::Map<String, Value>;

/// Converts card sets into a single map from card id to card record.
///
/// Sets are visited in the input's own key order and records in sequence
/// order. When the same id shows up more than once, the record seen last
/// wins, while the key keeps the position of its first appearance.
pub fn flatten(
    card_sets: IndexMap<String, Vec<CardRecord>>,
) -> Result<IndexMap<String, Value>, DataError> {
    let mut cards = IndexMap::new();

    for (set, records) in card_sets {
        for (index, record) in records.into_iter().enumerate() {
            let id = match record.get("id") {
                Some(Value::String(id)) => id.clone(),
                Some(Value::Number(id)) => number_key(id),
                _ => return Err(DataError::MissingId { set, index }),
            };

            cards.insert(id, Value::Object(record));
        }
    }

    Ok(cards)
}

/// Numeric ids are keyed the way a JavaScript object key would print them,
/// so `1.0` becomes `"1"`.
fn number_key(id: &Number) -> String {
    // Above 2^53 floats stop being exact integers.
    const MAX_SAFE: f64 = 9_007_199_254_740_992.0;

    match id.as_f64() {
        Some(value) if id.is_f64() && value.fract() == 0.0 && value.abs() <= MAX_SAFE => {
            format!("{}", value as i64)
        }
        _ => id.to_string(),
    }
}

/// [`flatten`] over raw JSON, producing pretty-printed JSON.
pub(crate) fn flatten_json(bytes: &[u8]) -> Result<Vec<u8>, DataError> {
    let card_sets: IndexMap<String, Vec<CardRecord>> = serde_json::from_slice(bytes)?;
    let cards = flatten(card_sets)?;

    Ok(serde_json::to_vec_pretty(&cards)?)
}
