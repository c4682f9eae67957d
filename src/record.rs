//! Export path: one flat record per listing element

use indexmap::IndexMap;
use serde::Serialize;

use crate::extractors::{parse_amount, parse_area, resolve_first, resolve_text, Locator};
use crate::page::{NodeId, Page};
use crate::pricing::{CachedCalculator, Calculator};
use crate::profiles::{LocatorMode, SiteProfile};

pub const FIELD_SITE: &str = "サイト";
pub const FIELD_NAME: &str = "物件名";
pub const FIELD_ADDRESS: &str = "所在地";
pub const FIELD_PRICE: &str = "価格(万円)";
pub const FIELD_AREA: &str = "面積(㎡)";
pub const FIELD_PER_TSUBO: &str = "坪単価(万円)";
pub const FIELD_PER_SQUARE_METER: &str = "㎡単価(万円)";
pub const FIELD_URL: &str = "URL";

/// Named fields in insertion order. The leading columns are fixed, detail
/// attributes follow in the order they were merged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PropertyRecord {
    fields: IndexMap<String, String>,
}

impl PropertyRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn detail_url(&self) -> Option<&str> {
        self.get(FIELD_URL).filter(|url| !url.is_empty())
    }

    /// Add detail attributes without overwriting the fixed columns
    pub fn merge_details(&mut self, details: &IndexMap<String, String>) {
        for (name, value) in details {
            self.fields.entry(name.clone()).or_insert_with(|| value.clone());
        }
    }
}

/// Build the export record for one element. Fields that cannot be read
/// stay empty; unit prices are filled only when computable.
pub fn build_record<C: Calculator>(
    page: &Page,
    element: NodeId,
    profile: &SiteProfile,
    mode: LocatorMode,
    calculator: &CachedCalculator<C>,
) -> PropertyRecord {
    let locators = profile.locators(mode);
    let text = |list: &[Locator]| resolve_text(page, element, list).unwrap_or_default();

    let price_text = text(locators.price);
    let area_text = text(locators.area);
    let amount = parse_amount(&price_text);
    let area = parse_area(&area_text);
    let prices = calculator.unit_prices(amount, area);

    let url = resolve_first(page, element, profile.record.link)
        .and_then(|id| page.attr(id, "href"))
        .and_then(|href| page.absolute_url(&href))
        .unwrap_or_default();

    let mut record = PropertyRecord::new();
    record.set(FIELD_SITE, profile.name);
    record.set(FIELD_NAME, collapse_whitespace(&text(profile.record.name)));
    record.set(FIELD_ADDRESS, collapse_whitespace(&text(profile.record.address)));
    record.set(FIELD_PRICE, amount.map(|a| a.value().to_string()).unwrap_or_default());
    record.set(FIELD_AREA, area.map(|a| a.value().to_string()).unwrap_or_default());
    record.set(
        FIELD_PER_TSUBO,
        prices.map(|p| p.per_tsubo.to_string()).unwrap_or_default(),
    );
    record.set(
        FIELD_PER_SQUARE_METER,
        prices.map(|p| p.per_square_meter.to_string()).unwrap_or_default(),
    );
    record.set(FIELD_URL, url);
    record
}

pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
