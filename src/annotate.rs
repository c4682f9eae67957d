//! Display path: annotate one listing element with its unit prices
//!
//! For each element the price and area are located through the active
//! profile, read as quantities, turned into unit prices (through the
//! session cache) and rendered as an annotation block next to the price.
//! A missing area still renders a "not computable" block; a missing price
//! renders nothing and leaves the element retryable.

use std::collections::HashSet;

use thiserror::Error;
use tracing::debug;

use crate::extractors::{parse_amount, parse_area, resolve_first};
use crate::page::{Fragment, NodeId, Page, ANNOTATION_CLASS, ANNOTATION_COMPACT_CLASS};
use crate::pricing::{format_thousands, CachedCalculator, Calculator, UnitPricePair};
use crate::profiles::{LocatorMode, SiteProfile};

const NOT_COMPUTABLE: &str = "計算不可";

/// Elements already carrying an annotation block.
///
/// Entries are only dropped by `clear` (navigation); elements that leave
/// the page keep theirs for the rest of the session.
#[derive(Debug, Default)]
pub struct ProcessedSet {
    ids: HashSet<NodeId>,
}

impl ProcessedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.ids.contains(&id)
    }

    pub fn insert(&mut self, id: NodeId) -> bool {
        self.ids.insert(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProcessError {
    #[error("element {0:?} is not part of the page")]
    Detached(NodeId),

    #[error("price element has no parent to anchor the annotation")]
    NoAnchor,

    #[error("annotation block could not be inserted")]
    InsertFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rendered {
    pub price_element: NodeId,
    pub block: NodeId,
    /// `None` for the "not computable" placeholder
    pub prices: Option<UnitPricePair>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    AlreadyProcessed,
    /// No price locator matched; the element stays unmarked
    PriceNotFound,
    Rendered(Rendered),
}

pub struct Annotator<'a, C: Calculator> {
    profile: &'a SiteProfile,
    calculator: &'a CachedCalculator<C>,
}

impl<'a, C: Calculator> Annotator<'a, C> {
    pub fn new(profile: &'a SiteProfile, calculator: &'a CachedCalculator<C>) -> Self {
        Self {
            profile,
            calculator,
        }
    }

    /// Annotate `element` once. Calling again for a processed element is a
    /// no-op.
    pub fn process(
        &self,
        page: &mut Page,
        element: NodeId,
        mode: LocatorMode,
        processed: &mut ProcessedSet,
    ) -> Result<ProcessOutcome, ProcessError> {
        if processed.contains(element) {
            return Ok(ProcessOutcome::AlreadyProcessed);
        }
        if !page.contains(element) {
            return Err(ProcessError::Detached(element));
        }

        let locators = self.profile.locators(mode);
        let Some(price_element) = resolve_first(page, element, locators.price) else {
            debug!(site = self.profile.id, ?element, "no price element");
            return Ok(ProcessOutcome::PriceNotFound);
        };
        let area_element = resolve_first(page, element, locators.area);

        let amount = page.text(price_element).and_then(|t| parse_amount(&t));
        let area = area_element
            .and_then(|id| page.text(id))
            .and_then(|t| parse_area(&t));
        let prices = self.calculator.unit_prices(amount, area);

        debug!(
            site = self.profile.id,
            amount = ?amount,
            area = ?area,
            prices = ?prices,
            "unit prices resolved"
        );

        let block = render(page, price_element, prices)?;
        processed.insert(element);

        Ok(ProcessOutcome::Rendered(Rendered {
            price_element,
            block,
            prices,
        }))
    }
}

/// Insert (or replace) the annotation for `price_element`.
///
/// Inside a table cell the block nests in the cell in its compact form,
/// anywhere else it becomes the price element's next sibling.
pub fn render(
    page: &mut Page,
    price_element: NodeId,
    prices: Option<UnitPricePair>,
) -> Result<NodeId, ProcessError> {
    if let Some(cell) = page.closest(price_element, "td") {
        return render_in_cell(page, cell, prices);
    }

    if page.parent_element(price_element).is_none() {
        return Err(ProcessError::NoAnchor);
    }

    while let Some(next) = page.next_element_sibling(price_element) {
        if !page.remove_annotation(next) {
            break;
        }
    }

    let fragment = Fragment::parse(&annotation_markup(prices, false));
    page.insert_after(price_element, &fragment)
        .ok_or(ProcessError::InsertFailed)
}

/// Replace any annotation nested in `cell` with a fresh compact one
pub fn render_in_cell(
    page: &mut Page,
    cell: NodeId,
    prices: Option<UnitPricePair>,
) -> Result<NodeId, ProcessError> {
    for existing in page.annotation_children(cell) {
        page.remove_annotation(existing);
    }

    let fragment = Fragment::parse(&annotation_markup(prices, true));
    page.append_child(cell, &fragment)
        .ok_or(ProcessError::InsertFailed)
}

/// Markup of one annotation block
pub fn annotation_markup(prices: Option<UnitPricePair>, compact: bool) -> String {
    let class = if compact {
        format!("{ANNOTATION_CLASS} {ANNOTATION_COMPACT_CLASS}")
    } else {
        ANNOTATION_CLASS.to_string()
    };

    let (state, tsubo, square_meter) = match prices {
        Some(pair) => (
            "computed",
            format!("{}万円", format_thousands(pair.per_tsubo)),
            format!("{}万円", format_thousands(pair.per_square_meter)),
        ),
        None => (
            "not-computable",
            NOT_COMPUTABLE.to_string(),
            NOT_COMPUTABLE.to_string(),
        ),
    };

    format!(
        r#"<div class="{class}" data-state="{state}"><span class="unit-price-tsubo">坪単価: {tsubo}</span><span class="unit-price-sqm">㎡単価: {square_meter}</span></div>"#
    )
}
