//! Text extraction
//!
//! `numeric` turns text fragments into quantities, `locator` finds the
//! fragments in a page.

mod locator;
mod numeric;

pub use locator::*;
pub use numeric::*;
