use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::EntryType;

/// Plain copy of a committed entry, safe to hand across threads.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntrySnapshot {
    pub id: Uuid,
    pub user: Option<String>, // owner's display name
    pub item_name: String,
    pub category_name: Option<String>,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub batch: Option<String>,
    pub mfg: Option<String>, // month/year label, free form
    pub exp: Option<String>,
    pub qty: f64,
    pub unit: String,
    pub warehouse_name: String,
    pub price: Option<f64>,
    pub line_value: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Payload for a new entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntryDraft {
    pub item_name: String,
    #[serde(default)]
    pub category_name: Option<String>,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub unit: String,
    pub qty: f64,
    pub warehouse_name: String,
    #[serde(default)]
    pub batch: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub mfg: Option<String>,
    #[serde(default)]
    pub exp: Option<String>,
    #[serde(default)]
    pub entry_date: Option<NaiveDate>,
}

/// Partial update; absent fields are left untouched. A blank `batch`, `mfg`
/// or `exp` clears the label. `price` can be changed but not removed.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryPatch {
    #[serde(default)]
    pub qty: Option<f64>,
    #[serde(default)]
    pub warehouse_name: Option<String>,
    #[serde(default)]
    pub batch: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub mfg: Option<String>,
    #[serde(default)]
    pub exp: Option<String>,
    #[serde(default)]
    pub entry_date: Option<NaiveDate>,
}

impl EntrySnapshot {
    pub fn from_draft(id: Uuid, user: Option<String>, draft: EntryDraft, now: DateTime<Utc>) -> Self {
        let created_at = combine_entry_date(draft.entry_date, now);
        let mut snapshot = Self {
            id,
            user,
            item_name: draft.item_name,
            category_name: draft.category_name,
            entry_type: draft.entry_type,
            batch: normalize_label(draft.batch),
            mfg: normalize_label(draft.mfg),
            exp: normalize_label(draft.exp),
            qty: draft.qty,
            unit: draft.unit,
            warehouse_name: draft.warehouse_name,
            price: draft.price,
            line_value: None,
            created_at,
        };
        snapshot.line_value = snapshot.compute_line_value();
        snapshot
    }

    pub fn apply(&mut self, patch: EntryPatch) {
        if let Some(qty) = patch.qty {
            self.qty = qty;
        }
        if let Some(warehouse) = patch.warehouse_name {
            self.warehouse_name = warehouse;
        }
        if patch.batch.is_some() {
            self.batch = normalize_label(patch.batch);
        }
        if let Some(price) = patch.price {
            self.price = Some(price);
        }
        if patch.mfg.is_some() {
            self.mfg = normalize_label(patch.mfg);
        }
        if patch.exp.is_some() {
            self.exp = normalize_label(patch.exp);
        }
        self.created_at = combine_entry_date(patch.entry_date, self.created_at);
        self.line_value = self.compute_line_value();
    }

    fn compute_line_value(&self) -> Option<f64> {
        self.price.map(|p| p * self.qty)
    }
}

/// Blank batch and month/year labels are stored as absent.
pub fn normalize_label(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Moves `existing` onto `date`, keeping its time of day.
pub fn combine_entry_date(date: Option<NaiveDate>, existing: DateTime<Utc>) -> DateTime<Utc> {
    match date {
        Some(d) => d.and_time(existing.time()).and_utc(),
        None => existing,
    }
}
