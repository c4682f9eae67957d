//! Page-mode dispatch and the per-page session
//!
//! A listing page has cards and every card is annotated on its own; a page
//! without cards is a detail page and the whole document is treated as one
//! element. The session owns the state that lives as long as a page view:
//! the active profile, the processed set and the unit price cache.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::annotate::{render_in_cell, Annotator, ProcessOutcome, ProcessedSet, Rendered};
use crate::extractors::parse_selector;
use crate::page::{NodeId, Page, ANNOTATION_CLASS, EXPORT_CONTROL_CLASS};
use crate::pricing::{CachedCalculator, Calculator, ResultCache, StandardCalculator};
use crate::profiles::{self, LocatorMode, SiteProfile};
use crate::record::{build_record, PropertyRecord};

/// Header text of detail-table rows that receive a copy of the annotation
const PRICE_ROW_LABEL: &str = "価格";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageMode {
    Listing(Vec<NodeId>),
    Detail,
}

/// Cards on the page. Alternatives are tried in order and the first
/// non-empty one wins; the selectors of one alternative are unioned.
pub fn find_cards(page: &Page, profile: &SiteProfile) -> Vec<NodeId> {
    let root = page.root();
    for alternative in profile.cards {
        let mut seen = HashSet::new();
        let mut cards: Vec<NodeId> = alternative
            .iter()
            .filter_map(|s| parse_selector(s))
            .flat_map(|selector| page.select(root, &selector))
            .filter(|id| seen.insert(*id))
            .collect();

        if !cards.is_empty() {
            if alternative.len() > 1 {
                sort_document_order(page, &mut cards);
            }
            return cards;
        }
    }
    vec![]
}

/// A page is a detail page when it has no cards, or when one of the
/// profile's detail markers is present.
pub fn detect_mode(page: &Page, profile: &SiteProfile) -> PageMode {
    let root = page.root();
    let has_marker = profile
        .detail_markers
        .iter()
        .filter_map(|s| parse_selector(s))
        .any(|selector| page.select_first(root, &selector).is_some());

    if has_marker {
        return PageMode::Detail;
    }

    let cards = find_cards(page, profile);
    if cards.is_empty() {
        PageMode::Detail
    } else {
        PageMode::Listing(cards)
    }
}

fn sort_document_order(page: &Page, ids: &mut [NodeId]) {
    let order: Vec<NodeId> = match parse_selector("*") {
        Some(all) => page.select(page.root(), &all),
        None => return,
    };
    ids.sort_by_key(|id| order.iter().position(|o| o == id).unwrap_or(usize::MAX));
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub mode: Option<LocatorMode>,
    pub cards: usize,
    pub annotated: usize,
    pub placeholders: usize,
    pub already_processed: usize,
    pub price_not_found: usize,
    pub failed: usize,
    /// Extra detail-table rows that received a copy of the annotation
    pub injected_rows: usize,
}

impl PassReport {
    fn count(&mut self, outcome: &ProcessOutcome) {
        match outcome {
            ProcessOutcome::AlreadyProcessed => self.already_processed += 1,
            ProcessOutcome::PriceNotFound => self.price_not_found += 1,
            ProcessOutcome::Rendered(r) if r.prices.is_some() => self.annotated += 1,
            ProcessOutcome::Rendered(_) => self.placeholders += 1,
        }
    }
}

/// One node added by a DOM mutation, as reported by the host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddedNode {
    /// Tag name; `None` for text and comment nodes
    pub tag: Option<String>,
    pub classes: Vec<String>,
    /// Whether the node was added inside one of our own blocks
    pub inside_own: bool,
}

impl AddedNode {
    pub fn element(tag: &str, classes: &[&str]) -> Self {
        Self {
            tag: Some(tag.to_string()),
            classes: classes.iter().map(|c| c.to_string()).collect(),
            inside_own: false,
        }
    }

    pub fn text() -> Self {
        Self::default()
    }

    fn is_own(&self) -> bool {
        self.inside_own
            || self
                .classes
                .iter()
                .any(|c| c == ANNOTATION_CLASS || c == EXPORT_CONTROL_CLASS)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MutationRecord {
    pub added: Vec<AddedNode>,
}

/// Whether a batch of mutations warrants a new pass.
///
/// Only added elements count, and our own annotation blocks and export
/// control never do, so inserting them cannot re-trigger a pass.
pub fn should_reprocess(records: &[MutationRecord]) -> bool {
    records
        .iter()
        .flat_map(|r| r.added.iter())
        .any(|node| node.tag.is_some() && !node.is_own())
}

/// State for one page view. Dropped or `reset` on navigation.
pub struct PageSession<C: Calculator = StandardCalculator> {
    profile: &'static SiteProfile,
    processed: ProcessedSet,
    calculator: CachedCalculator<C>,
}

impl PageSession<StandardCalculator> {
    pub fn new(profile: &'static SiteProfile) -> Self {
        Self::with_calculator(
            profile,
            CachedCalculator::standard(Arc::new(ResultCache::new())),
        )
    }

    pub fn for_host(host: &str) -> Self {
        Self::new(profiles::resolve(host))
    }

    /// Profile chosen from the page URL, default profile without one
    pub fn for_page(page: &Page) -> Self {
        match page.host() {
            Some(host) => Self::for_host(host),
            None => Self::new(profiles::default_profile()),
        }
    }
}

impl<C: Calculator> PageSession<C> {
    pub fn with_calculator(profile: &'static SiteProfile, calculator: CachedCalculator<C>) -> Self {
        Self {
            profile,
            processed: ProcessedSet::new(),
            calculator,
        }
    }

    pub fn profile(&self) -> &'static SiteProfile {
        self.profile
    }

    pub fn processed(&self) -> &ProcessedSet {
        &self.processed
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        self.calculator.cache()
    }

    pub fn on_load(&mut self, page: &mut Page) -> PassReport {
        self.run_pass(page)
    }

    /// Run a pass if the mutations call for one
    pub fn on_mutations(
        &mut self,
        page: &mut Page,
        records: &[MutationRecord],
    ) -> Option<PassReport> {
        if !should_reprocess(records) {
            debug!(records = records.len(), "mutations ignored");
            return None;
        }
        Some(self.run_pass(page))
    }

    /// Navigation: forget everything, optionally switching site
    pub fn reset(&mut self, host: Option<&str>) {
        self.processed.clear();
        self.calculator.cache().clear();
        if let Some(host) = host {
            self.profile = profiles::resolve(host);
        }
        debug!(site = self.profile.id, "session reset");
    }

    /// Annotate everything on the page that is not annotated yet.
    ///
    /// Each element is isolated: a failure is logged and counted, and the
    /// remaining elements are still processed.
    pub fn run_pass(&mut self, page: &mut Page) -> PassReport {
        let report = match detect_mode(page, self.profile) {
            PageMode::Listing(cards) => {
                let report = self.annotate_cards(page, &cards);
                page.insert_export_control();
                report
            }
            PageMode::Detail => self.annotate_detail(page),
        };

        info!(
            site = self.profile.id,
            mode = ?report.mode,
            cards = report.cards,
            annotated = report.annotated,
            placeholders = report.placeholders,
            failed = report.failed,
            "annotation pass finished"
        );
        report
    }

    /// Annotate `cards` with the listing locators, one card at a time
    pub fn annotate_cards(&mut self, page: &mut Page, cards: &[NodeId]) -> PassReport {
        let annotator = Annotator::new(self.profile, &self.calculator);
        let mut report = PassReport {
            mode: Some(LocatorMode::Listing),
            cards: cards.len(),
            ..PassReport::default()
        };

        for &card in cards {
            match annotator.process(page, card, LocatorMode::Listing, &mut self.processed) {
                Ok(outcome) => report.count(&outcome),
                Err(e) => {
                    warn!(site = self.profile.id, error = %e, "card skipped");
                    report.failed += 1;
                }
            }
        }
        report
    }

    fn annotate_detail(&mut self, page: &mut Page) -> PassReport {
        let annotator = Annotator::new(self.profile, &self.calculator);
        let mut report = PassReport {
            mode: Some(LocatorMode::Detail),
            ..PassReport::default()
        };

        let root = page.root();
        match annotator.process(page, root, LocatorMode::Detail, &mut self.processed) {
            Ok(outcome) => {
                report.count(&outcome);
                if let ProcessOutcome::Rendered(rendered) = outcome {
                    report.injected_rows = inject_price_rows(page, &rendered);
                }
            }
            Err(e) => {
                warn!(site = self.profile.id, error = %e, "detail page skipped");
                report.failed += 1;
            }
        }
        report
    }

    /// Export records for the page: one per card, or one for a detail page
    pub fn collect_records(&self, page: &Page) -> Vec<PropertyRecord> {
        match detect_mode(page, self.profile) {
            PageMode::Listing(cards) => cards
                .into_iter()
                .map(|card| {
                    build_record(page, card, self.profile, LocatorMode::Listing, &self.calculator)
                })
                .collect(),
            PageMode::Detail => vec![build_record(
                page,
                page.root(),
                self.profile,
                LocatorMode::Detail,
                &self.calculator,
            )],
        }
    }
}

/// Copy the detail annotation into every table row headed `価格`.
/// Multi-unit detail pages list one price row per unit.
fn inject_price_rows(page: &mut Page, rendered: &Rendered) -> usize {
    let (Some(row_sel), Some(th_sel), Some(td_sel)) = (
        parse_selector("tr"),
        parse_selector("th"),
        parse_selector("td"),
    ) else {
        return 0;
    };

    let own_cell = page.closest(rendered.price_element, "td");
    let targets: Vec<NodeId> = page
        .select(page.root(), &row_sel)
        .into_iter()
        .filter(|&row| {
            page.select_first(row, &th_sel)
                .and_then(|th| page.text(th))
                .is_some_and(|label| label.contains(PRICE_ROW_LABEL))
        })
        .filter_map(|row| page.select_first(row, &td_sel))
        .filter(|&cell| Some(cell) != own_cell)
        .collect();

    let mut injected = 0;
    for cell in targets {
        match render_in_cell(page, cell, rendered.prices) {
            Ok(_) => injected += 1,
            Err(e) => warn!(error = %e, "price row skipped"),
        }
    }
    injected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiles::{HOMES, SUUMO};

    const LISTING: &str = r#"
    <html><body>
        <div class="property_unit">
            <dl><dt>販売価格</dt><dd>2億5990万円</dd></dl>
            <dl><dt>専有面積</dt><dd>70m2</dd></dl>
        </div>
        <div class="property_unit">
            <dl><dt>販売価格</dt><dd>3,980万円</dd></dl>
        </div>
        <div class="property_unit">
            <dl><dt>間取り</dt><dd>1K</dd></dl>
        </div>
    </body></html>
    "#;

    const DETAIL: &str = r#"
    <html><body>
        <h1>パークタワー</h1>
        <table>
            <tr><th>価格</th><td>5,480万円</td></tr>
            <tr><th>専有面積</th><td>65.5㎡</td></tr>
            <tr><th>間取り</th><td>2LDK</td></tr>
            <tr><th>価格（住戸B）</th><td>5,980万円</td></tr>
            <tr><th>価格（住戸C）</th><td>6,200万円</td></tr>
        </table>
    </body></html>
    "#;

    #[test]
    fn test_find_cards_first_alternative() {
        let page = Page::parse(LISTING);
        assert_eq!(find_cards(&page, &SUUMO).len(), 3);
    }

    #[test]
    fn test_find_cards_union_in_document_order() {
        let page = Page::parse(
            r#"<div class="mod-objectCollection--sale" id="x"></div>
               <div class="mod-mergeBuilding--sale" id="y"></div>
               <div class="mod-objectCollection--sale" id="z"></div>"#,
        );
        let cards = find_cards(&page, &HOMES);
        let ids: Vec<_> = cards.iter().map(|&c| page.attr(c, "id").unwrap()).collect();
        assert_eq!(ids, vec!["x", "y", "z"]);
    }

    #[test]
    fn test_detect_mode() {
        assert!(matches!(
            detect_mode(&Page::parse(LISTING), &SUUMO),
            PageMode::Listing(cards) if cards.len() == 3
        ));
        assert_eq!(detect_mode(&Page::parse(DETAIL), &SUUMO), PageMode::Detail);
    }

    #[test]
    fn test_detail_marker_overrides_cards() {
        let html = r#"<div id="js-bukkenDetail"></div>
            <div class="property_unit"><dl><dt>販売価格</dt><dd>1,000万円</dd></dl></div>"#;
        assert_eq!(detect_mode(&Page::parse(html), &SUUMO), PageMode::Detail);
    }

    #[test]
    fn test_listing_pass() {
        let mut page = Page::parse(LISTING);
        let mut session = PageSession::new(&SUUMO);

        let report = session.on_load(&mut page);

        assert_eq!(report.mode, Some(LocatorMode::Listing));
        assert_eq!(report.cards, 3);
        assert_eq!(report.annotated, 1);
        assert_eq!(report.placeholders, 1);
        assert_eq!(report.price_not_found, 1);
        assert_eq!(page.annotations().len(), 2);
        assert!(page.has_export_control());
        assert_eq!(session.processed().len(), 2);
        assert_eq!(session.cache().len(), 1);
    }

    #[test]
    fn test_second_pass_is_idempotent() {
        let mut page = Page::parse(LISTING);
        let mut session = PageSession::new(&SUUMO);

        session.on_load(&mut page);
        let report = session.run_pass(&mut page);

        assert_eq!(report.already_processed, 2);
        assert_eq!(report.price_not_found, 1);
        assert_eq!(page.annotations().len(), 2);
        assert_eq!(page.html().matches(EXPORT_CONTROL_CLASS).count(), 1);
    }

    #[test]
    fn test_detail_pass_injects_price_rows() {
        let mut page = Page::parse(DETAIL);
        let mut session = PageSession::new(&SUUMO);

        let report = session.on_load(&mut page);

        assert_eq!(report.mode, Some(LocatorMode::Detail));
        assert_eq!(report.annotated, 1);
        assert_eq!(report.injected_rows, 2);
        assert_eq!(page.annotations().len(), 3);
        assert!(!page.has_export_control());
        assert!(session.processed().contains(page.root()));
    }

    #[test]
    fn test_detail_pass_twice_keeps_row_count() {
        let mut page = Page::parse(DETAIL);
        let mut session = PageSession::new(&SUUMO);

        session.on_load(&mut page);
        session.reset(None);
        session.on_load(&mut page);

        assert_eq!(page.annotations().len(), 3);
    }

    #[test]
    fn test_should_reprocess_filters_own_nodes() {
        let own = MutationRecord {
            added: vec![
                AddedNode::element("div", &[ANNOTATION_CLASS]),
                AddedNode::text(),
            ],
        };
        let control = MutationRecord {
            added: vec![AddedNode::element("button", &[EXPORT_CONTROL_CLASS])],
        };
        let nested = MutationRecord {
            added: vec![AddedNode {
                inside_own: true,
                ..AddedNode::element("span", &[])
            }],
        };
        let foreign = MutationRecord {
            added: vec![AddedNode::element("div", &["property_unit"])],
        };

        assert!(!should_reprocess(&[]));
        assert!(!should_reprocess(&[own.clone(), control.clone(), nested]));
        assert!(!should_reprocess(&[MutationRecord::default()]));
        assert!(should_reprocess(&[own, foreign]));
    }

    #[test]
    fn test_on_mutations_runs_pass_for_new_cards_only() {
        let mut page = Page::parse(LISTING);
        let mut session = PageSession::new(&SUUMO);
        session.on_load(&mut page);

        let ignored = session.on_mutations(
            &mut page,
            &[MutationRecord {
                added: vec![AddedNode::element("div", &[ANNOTATION_CLASS])],
            }],
        );
        assert!(ignored.is_none());

        let report = session
            .on_mutations(
                &mut page,
                &[MutationRecord {
                    added: vec![AddedNode::element("div", &["property_unit"])],
                }],
            )
            .unwrap();
        assert_eq!(report.already_processed, 2);
    }

    #[test]
    fn test_reset_clears_state_and_switches_site() {
        let mut page = Page::parse(LISTING);
        let mut session = PageSession::new(&SUUMO);
        session.on_load(&mut page);

        session.reset(Some("www.homes.co.jp"));

        assert!(session.processed().is_empty());
        assert!(session.cache().is_empty());
        assert_eq!(session.profile().id, "homes");
    }

    #[test]
    fn test_collect_records() {
        let page = Page::parse(LISTING);
        let session = PageSession::new(&SUUMO);

        let records = session.collect_records(&page);

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].get(crate::record::FIELD_PER_TSUBO), Some("1227"));
        assert_eq!(records[1].get(crate::record::FIELD_PER_TSUBO), Some(""));
    }
}
