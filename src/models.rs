// Data structures for ranking pages and normalized ranking rows.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::month::MonthToken;

/// Field names the sales figure has appeared under, in lookup order.
pub const SALES_FIELDS: [&str; 3] = ["count", "sale", "sales"];

/// Restricts the ranking to one new-energy vehicle type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryFilter {
    BatteryElectric,
    PluginHybrid,
}

impl CategoryFilter {
    /// Value of the `new_energy_type` query parameter.
    pub fn query_value(&self) -> u8 {
        match self {
            CategoryFilter::BatteryElectric => 1,
            CategoryFilter::PluginHybrid => 2,
        }
    }

    pub fn file_tag(&self) -> &'static str {
        match self {
            CategoryFilter::BatteryElectric => "bev",
            CategoryFilter::PluginHybrid => "phev",
        }
    }
}

/// One decoded response of the ranking endpoint.
///
/// Items stay as raw JSON: the upstream schema drifts, so fields are pulled
/// out best-effort when a row is normalized.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankPage {
    pub items: Vec<Value>,
    pub total: Option<u64>,
    pub has_more: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    data: Option<EnvelopeData>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeData {
    #[serde(default)]
    list: Option<Vec<Value>>,
    #[serde(default)]
    total: Option<Value>,
    #[serde(default)]
    has_more: Option<Value>,
}

impl RankPage {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let envelope: Envelope = serde_json::from_slice(bytes)?;
        let Some(data) = envelope.data else {
            return Ok(Self::default());
        };
        Ok(Self {
            items: data.list.unwrap_or_default(),
            total: data.total.as_ref().and_then(value_as_u64),
            // Only a literal `false`/`true` counts; anything else is no hint.
            has_more: data.has_more.as_ref().and_then(Value::as_bool),
        })
    }
}

/// Key used to recognize the same series twice within one month.
///
/// `Composite` is a fallback for items without a series id and may collide
/// when both names are missing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentityKey {
    Series(String),
    Composite {
        series_name: Option<String>,
        brand_name: Option<String>,
    },
}

impl IdentityKey {
    pub fn from_item(item: &Value) -> Self {
        match text_field(item, "series_id").filter(|id| id != "0") {
            Some(id) => IdentityKey::Series(id),
            None => IdentityKey::Composite {
                series_name: text_field(item, "series_name"),
                brand_name: text_field(item, "brand_name"),
            },
        }
    }
}

/// One normalized row of the monthly ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankingRecord {
    #[serde(rename = "月份")]
    pub month: MonthToken,
    #[serde(rename = "排名")]
    pub rank: Option<u32>,
    #[serde(rename = "车型", default)]
    pub series_name: String,
    #[serde(rename = "车企", default)]
    pub brand_name: String,
    #[serde(rename = "价格")]
    pub price: Option<String>,
    #[serde(rename = "销量")]
    pub sales: Option<u64>,
}

impl RankingRecord {
    pub fn from_item(month: MonthToken, item: &Value) -> Self {
        let rank = item
            .get("rank")
            .and_then(value_as_u64)
            .and_then(|r| u32::try_from(r).ok());
        let brand_name = text_field(item, "brand_name")
            .or_else(|| text_field(item, "sub_brand_name"))
            .unwrap_or_default();
        let sales = SALES_FIELDS
            .iter()
            .find_map(|field| item.get(*field).and_then(value_as_u64));

        RankingRecord {
            month,
            rank,
            series_name: text_field(item, "series_name").unwrap_or_default(),
            brand_name,
            price: price_of(item),
            sales,
        }
    }
}

/// The reported price, or a "min-max万" range when only the bounds are given.
fn price_of(item: &Value) -> Option<String> {
    if let Some(price) = text_field(item, "price") {
        return Some(price);
    }
    let min = text_field(item, "min_price")?;
    match text_field(item, "max_price") {
        Some(max) => Some(format!("{min}-{max}万")),
        None => Some(format!("{min}万")),
    }
}

/// Non-empty string, or a number rendered as text.
fn text_field(item: &Value, key: &str) -> Option<String> {
    match item.get(key)? {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| *f >= 0.0 && f.fract() == 0.0)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
