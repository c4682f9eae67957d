//! Unit price calculation and the per-page result cache

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::Serialize;

use crate::extractors::{AmountQuantity, AreaQuantity};

/// Square meters in one tsubo
pub const TSUBO_IN_SQUARE_METERS: f64 = 3.3058;

/// Price per tsubo and per square meter, in 万円, rounded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct UnitPricePair {
    pub per_tsubo: i64,
    pub per_square_meter: i64,
}

/// Callers check `area > 0` before calling.
pub trait Calculator {
    fn compute(&self, amount: f64, area: f64) -> UnitPricePair;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StandardCalculator;

impl Calculator for StandardCalculator {
    fn compute(&self, amount: f64, area: f64) -> UnitPricePair {
        UnitPricePair {
            per_tsubo: (amount / (area / TSUBO_IN_SQUARE_METERS)).round() as i64,
            per_square_meter: (amount / area).round() as i64,
        }
    }
}

/// Exact-key memo of calculator output for one page session.
///
/// Keys are the bit patterns of the two inputs, so there is no tolerance:
/// equal inputs collide, anything else does not. No eviction.
#[derive(Debug, Default)]
pub struct ResultCache {
    entries: RwLock<HashMap<(u64, u64), UnitPricePair>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, amount: f64, area: f64) -> Option<UnitPricePair> {
        let entries = self.entries.read().ok()?;
        entries.get(&key(amount, area)).copied()
    }

    pub fn put(&self, amount: f64, area: f64, pair: UnitPricePair) {
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(key(amount, area), pair);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }
}

fn key(amount: f64, area: f64) -> (u64, u64) {
    (amount.to_bits(), area.to_bits())
}

/// Fetch-or-compute front over a calculator
pub struct CachedCalculator<C = StandardCalculator> {
    inner: C,
    cache: Arc<ResultCache>,
}

impl CachedCalculator<StandardCalculator> {
    pub fn standard(cache: Arc<ResultCache>) -> Self {
        Self::new(StandardCalculator, cache)
    }
}

impl<C: Calculator> CachedCalculator<C> {
    pub fn new(inner: C, cache: Arc<ResultCache>) -> Self {
        Self { inner, cache }
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// Unit prices when both quantities are present and positive
    pub fn unit_prices(
        &self,
        amount: Option<AmountQuantity>,
        area: Option<AreaQuantity>,
    ) -> Option<UnitPricePair> {
        let amount = amount.map(AmountQuantity::value).filter(|&a| a > 0.0)?;
        let area = area.map(AreaQuantity::value).filter(|&a| a > 0.0)?;
        Some(self.get_or_compute(amount, area))
    }

    pub fn get_or_compute(&self, amount: f64, area: f64) -> UnitPricePair {
        if let Some(pair) = self.cache.get(amount, area) {
            return pair;
        }
        let pair = self.inner.compute(amount, area);
        self.cache.put(amount, area, pair);
        pair
    }
}

/// `1227` → `1,227`
pub fn format_thousands(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if value < 0 {
        out.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
