//! Locator resolution
//!
//! A locator finds one element inside a scope (a listing card or the whole
//! document). Three kinds exist:
//! - `Css`: a structural selector, first match wins
//! - `Label`: an element whose text contains a label, resolved to its
//!   adjacent partner (`<dt>価格</dt><dd>…</dd>`, `<th>価格</th><td>…</td>`)
//! - `TextScan`: the innermost element whose text contains a marker and
//!   carries a readable number
//!
//! Lists of locators are tried in order; the first hit wins.

use scraper::Selector;
use serde::Serialize;
use tracing::debug;

use crate::extractors::numeric::has_extractable_number;
use crate::page::{NodeId, Page};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Locator {
    Css(&'static str),
    Label {
        within: &'static str,
        text: &'static str,
    },
    TextScan {
        marker: &'static str,
    },
}

impl Locator {
    pub fn resolve(&self, page: &Page, scope: NodeId) -> Option<NodeId> {
        match *self {
            Locator::Css(selector) => {
                let selector = parse_selector(selector)?;
                page.select(scope, &selector)
                    .into_iter()
                    .find(|&id| !page.is_annotation(id))
            }
            Locator::Label { within, text } => resolve_label(page, scope, within, text),
            Locator::TextScan { marker } => resolve_text_scan(page, scope, marker),
        }
    }
}

/// First locator in `locators` that resolves inside `scope`
pub fn resolve_first(page: &Page, scope: NodeId, locators: &[Locator]) -> Option<NodeId> {
    locators.iter().find_map(|locator| {
        let hit = locator.resolve(page, scope);
        if hit.is_none() {
            debug!(?locator, "locator missed");
        }
        hit
    })
}

/// Text of the first resolving locator
pub fn resolve_text(page: &Page, scope: NodeId, locators: &[Locator]) -> Option<String> {
    resolve_first(page, scope, locators)
        .and_then(|id| page.text(id))
        .filter(|text| !text.is_empty())
}

/// Invalid selectors are treated as "no match"
pub(crate) fn parse_selector(selector: &str) -> Option<Selector> {
    match Selector::parse(selector) {
        Ok(s) => Some(s),
        Err(e) => {
            debug!(selector, error = ?e, "invalid selector");
            None
        }
    }
}

fn resolve_label(page: &Page, scope: NodeId, within: &str, label: &str) -> Option<NodeId> {
    let selector = parse_selector(within)?;

    page.select(scope, &selector)
        .into_iter()
        .filter(|&id| !page.is_annotation(id))
        .filter(|&id| page.text(id).is_some_and(|t| t.contains(label)))
        .find_map(|id| label_partner(page, id))
}

/// Next element sibling, or failing that the parent's next element sibling
fn label_partner(page: &Page, id: NodeId) -> Option<NodeId> {
    let sibling = page
        .next_element_sibling(id)
        .filter(|&s| !page.is_annotation(s));
    sibling.or_else(|| {
        let parent = page.parent_element(id)?;
        page.next_element_sibling(parent)
            .filter(|&s| !page.is_annotation(s))
    })
}

/// Innermost elements holding the marker are the candidates; the first one
/// that also holds a number wins. A candidate that is the bare marker
/// (`5,480<span>万円</span>`) is read through its parent when the number is
/// the parent's own text.
fn resolve_text_scan(page: &Page, scope: NodeId, marker: &str) -> Option<NodeId> {
    let all = parse_selector("*")?;
    let has_marker = |id: NodeId| {
        !page.is_annotation(id) && page.text(id).is_some_and(|t| t.contains(marker))
    };
    let has_number = |id: NodeId| page.text(id).is_some_and(|t| has_extractable_number(&t));

    page.select(scope, &all)
        .into_iter()
        .filter(|&id| has_marker(id))
        .filter(|&id| {
            !page
                .element_children(id)
                .into_iter()
                .any(|child| has_marker(child))
        })
        .find_map(|id| {
            if has_number(id) {
                return Some(id);
            }
            if page.text(id).is_some_and(|t| t.trim() != marker) {
                return None;
            }
            page.parent_element(id).filter(|&parent| {
                parent != scope
                    && page
                        .own_text(parent)
                        .is_some_and(|t| has_extractable_number(&t))
            })
        })
}
