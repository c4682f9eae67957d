//! Unit price engine for Japanese real-estate listing pages
//!
//! Reads the listing price and floor area out of listing HTML from several
//! portals, derives price per 坪 and per ㎡, and either writes them back into
//! the page as annotation blocks or exports them as CSV records:
//! - Numeric extraction with 億/万 handling and area-unit detection
//! - Per-site profiles with ordered locator fallbacks
//! - Listing/detail page dispatch with mutation filtering
//! - Paced detail-page enrichment and BOM-prefixed CSV export
//! - FFI interface for native hosts

pub mod annotate;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod export;
pub mod extractors;
pub mod fetcher;
pub mod ffi;
pub mod logging;
pub mod page;
pub mod pricing;
pub mod profiles;
pub mod record;

pub use annotate::{Annotator, ProcessError, ProcessOutcome, ProcessedSet};
pub use config::Settings;
pub use dispatch::{should_reprocess, AddedNode, MutationRecord, PageMode, PageSession, PassReport};
pub use error::{Error, Result};
pub use export::{enrich_records, export_listing, write_csv, ExportFile, ExportReport};
pub use extractors::{extract, parse_amount, parse_area, AmountQuantity, AreaQuantity, Locator};
pub use fetcher::{DetailFetcher, HttpDetailFetcher};
pub use ffi::*;
pub use page::Page;
pub use pricing::{CachedCalculator, Calculator, ResultCache, StandardCalculator, UnitPricePair};
pub use profiles::{LocatorMode, SiteProfile};
pub use record::PropertyRecord;
