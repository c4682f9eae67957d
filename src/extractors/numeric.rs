//! Text to number extraction for prices and floor areas
//!
//! Listing sites write the same quantity many ways: `2億5990万円`,
//! `12,900万円`, `３,９８０万円`, `専有面積107.19m2`, `135.24㎡`. The rules
//! below are tried in priority order and the first one that applies wins:
//!
//! 1. area marker (`面積` label or a metric area suffix): the number right
//!    before the unit suffix, no conversion
//! 2. two-tier currency (`億` worth 10,000 `万`): `億 × 10000 + 万`
//! 3. fallback: first decimal number with thousands separators removed
//!
//! Nothing here fails loudly. No match is `None`.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Number of small units (万) in one large unit (億)
pub const LARGE_UNIT_FACTOR: f64 = 10_000.0;

const AREA_LABEL: &str = "面積";

static AREA_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*(?:m2|m²|㎡|平米|平方メートル)").unwrap());

/// Unit tokens alone; `m2` carries a digit the fallback must not read
static AREA_UNIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"m2|m²|㎡|平米|平方メートル").unwrap());

static LARGE_UNIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*億").unwrap());

static SMALL_UNIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d[\d,]*(?:\.\d+)?)\s*万").unwrap());

static PLAIN_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").unwrap());

/// Price in 万円
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct AmountQuantity(f64);

impl AmountQuantity {
    pub fn new(value: f64) -> Option<Self> {
        (value.is_finite() && value >= 0.0).then_some(Self(value))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

/// Floor area in square meters
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct AreaQuantity(f64);

impl AreaQuantity {
    pub fn new(value: f64) -> Option<Self> {
        (value.is_finite() && value >= 0.0).then_some(Self(value))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

/// Generic extraction: area rule, then currency rule, then plain number.
pub fn extract(text: Option<&str>) -> Option<f64> {
    let text = normalize(text?);

    if has_area_marker(&text) {
        return area_value(&text).or_else(|| first_number(&strip_area_units(&text)));
    }

    match two_tier_amount(&text) {
        Some(amount) => amount,
        None => first_number(&text),
    }
}

/// Read a price. The area rule is skipped so that a price cell mentioning
/// `㎡` is still read as money.
pub fn parse_amount(text: &str) -> Option<AmountQuantity> {
    let text = normalize(text);
    let value = match two_tier_amount(&text) {
        Some(amount) => amount,
        None => first_number(&text),
    }?;
    AmountQuantity::new(value)
}

/// Read a floor area in square meters.
pub fn parse_area(text: &str) -> Option<AreaQuantity> {
    let text = normalize(text);
    let value = area_value(&text).or_else(|| first_number(&strip_area_units(&text)))?;
    AreaQuantity::new(value)
}

/// Whether the text holds anything rule 3 could read
pub fn has_extractable_number(text: &str) -> bool {
    PLAIN_NUMBER.is_match(&strip_area_units(&normalize(text)))
}

/// Fold full-width digits and punctuation to ASCII and unify spaces.
pub fn normalize(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '０'..='９' => char::from(b'0' + (c as u32 - '０' as u32) as u8),
            '，' => ',',
            '．' => '.',
            'ｍ' | 'Ｍ' => 'm',
            '\u{00A0}' | '\u{3000}' => ' ',
            _ => c,
        })
        .collect()
}

fn has_area_marker(text: &str) -> bool {
    text.contains(AREA_LABEL) || AREA_SUFFIX.is_match(&strip_separators(text))
}

fn area_value(text: &str) -> Option<f64> {
    let stripped = strip_separators(text);
    let caps = AREA_SUFFIX.captures(&stripped)?;
    caps.get(1)?.as_str().parse().ok()
}

/// `None` when neither tag is present (rule does not apply).
/// `Some(None)` when tags are present but the total is zero.
fn two_tier_amount(text: &str) -> Option<Option<f64>> {
    let large = LARGE_UNIT
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok());
    let small = SMALL_UNIT
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| strip_separators(m.as_str()).parse::<f64>().ok());

    if large.is_none() && small.is_none() {
        return None;
    }

    let total = large.unwrap_or(0.0) * LARGE_UNIT_FACTOR + small.unwrap_or(0.0);
    Some((total > 0.0).then_some(total))
}

fn first_number(text: &str) -> Option<f64> {
    let stripped = strip_separators(text);
    PLAIN_NUMBER.find(&stripped)?.as_str().parse().ok()
}

fn strip_area_units(text: &str) -> String {
    AREA_UNIT.replace_all(text, " ").into_owned()
}

fn strip_separators(text: &str) -> String {
    text.replace(',', "")
}
