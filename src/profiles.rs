//! Per-site extraction profiles
//!
//! A profile is plain data: ordered locator lists for cards, prices and
//! areas (listing and detail layouts), detail-page discriminators and the
//! fields used for export records. Within every list the specific,
//! fragile selectors come before the generic, noisy ones; resolution
//! stops at the first hit, so that order is the precedence.
//!
//! Adding a site means adding an entry to `PROFILES`.

use serde::Serialize;

use crate::extractors::Locator;

/// Price and area locators for one page layout
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ModeLocators {
    pub price: &'static [Locator],
    pub area: &'static [Locator],
}

/// Locators for the export record fields
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RecordLocators {
    pub name: &'static [Locator],
    pub address: &'static [Locator],
    /// Element carrying the detail page `href`
    pub link: &'static [Locator],
}

#[derive(Debug, Serialize)]
pub struct SiteProfile {
    pub id: &'static str,
    pub name: &'static str,
    /// Hosts matched exactly or as a domain suffix
    pub hosts: &'static [&'static str],
    /// Card alternatives, tried in order. The selectors inside one
    /// alternative are unioned (sites mixing two card types on one page).
    pub cards: &'static [&'static [&'static str]],
    pub listing: ModeLocators,
    pub detail: ModeLocators,
    /// Present only on detail pages
    pub detail_markers: &'static [&'static str],
    pub record: RecordLocators,
    /// Attribute labels read from fetched detail pages
    pub detail_labels: &'static [&'static str],
}

impl SiteProfile {
    pub fn matches_host(&self, host: &str) -> bool {
        self.hosts.iter().any(|pattern| {
            host == *pattern
                || host
                    .strip_suffix(pattern)
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }

    pub fn locators(&self, mode: LocatorMode) -> &ModeLocators {
        match mode {
            LocatorMode::Listing => &self.listing,
            LocatorMode::Detail => &self.detail,
        }
    }
}

/// Which layout's locators to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LocatorMode {
    Listing,
    Detail,
}

const COMMON_DETAIL_LABELS: &[&str] = &[
    "間取り",
    "築年月",
    "所在階",
    "向き",
    "管理費",
    "修繕積立金",
    "交通",
];

pub static SUUMO: SiteProfile = SiteProfile {
    id: "suumo",
    name: "SUUMO",
    hosts: &["suumo.jp"],
    cards: &[&[".property_unit"], &[".cassette", ".cassetteitem"]],
    listing: ModeLocators {
        price: &[
            Locator::Css(".dottable-value.price"),
            Locator::Label { within: "dt", text: "販売価格" },
            Locator::Label { within: "dt", text: "価格" },
            Locator::TextScan { marker: "万円" },
        ],
        area: &[
            Locator::Label { within: "dt", text: "専有面積" },
            Locator::Label { within: "dt", text: "建物面積" },
            Locator::Label { within: "dt", text: "土地面積" },
            Locator::TextScan { marker: "m2" },
            Locator::TextScan { marker: "㎡" },
        ],
    },
    detail: ModeLocators {
        price: &[
            Locator::Css(".mainIndexR"),
            Locator::Label { within: "th", text: "価格" },
            Locator::TextScan { marker: "万円" },
        ],
        area: &[
            Locator::Label { within: "th", text: "専有面積" },
            Locator::Label { within: "th", text: "建物面積" },
            Locator::TextScan { marker: "m2" },
            Locator::TextScan { marker: "㎡" },
        ],
    },
    detail_markers: &["#js-bukkenDetail", ".section_h1-header-title"],
    record: RecordLocators {
        name: &[
            Locator::Css(".property_unit-title a"),
            Locator::Label { within: "dt", text: "物件名" },
            Locator::Css("h2"),
        ],
        address: &[
            Locator::Label { within: "dt", text: "所在地" },
            Locator::Label { within: "th", text: "所在地" },
        ],
        link: &[Locator::Css(".property_unit-title a"), Locator::Css("a[href]")],
    },
    detail_labels: COMMON_DETAIL_LABELS,
};

pub static ATHOME: SiteProfile = SiteProfile {
    id: "athome",
    name: "at home",
    hosts: &["athome.co.jp"],
    cards: &[&[".p-property"], &[".object"]],
    listing: ModeLocators {
        price: &[
            Locator::Css(".property-price"),
            Locator::Label { within: "dt", text: "価格" },
            Locator::TextScan { marker: "万円" },
        ],
        area: &[
            Locator::Css(".property-area"),
            Locator::Label { within: "dt", text: "専有面積" },
            Locator::Label { within: "dt", text: "建物面積" },
            Locator::TextScan { marker: "㎡" },
        ],
    },
    detail: ModeLocators {
        price: &[
            Locator::Css(".p-detail-price"),
            Locator::Label { within: "th", text: "価格" },
            Locator::TextScan { marker: "万円" },
        ],
        area: &[
            Locator::Label { within: "th", text: "専有面積" },
            Locator::Label { within: "th", text: "建物面積" },
            Locator::TextScan { marker: "㎡" },
        ],
    },
    detail_markers: &[".p-detail-header"],
    record: RecordLocators {
        name: &[Locator::Css(".property-title a"), Locator::Css("h2")],
        address: &[
            Locator::Label { within: "dt", text: "所在地" },
            Locator::Label { within: "th", text: "所在地" },
        ],
        link: &[Locator::Css(".property-title a"), Locator::Css("a[href]")],
    },
    detail_labels: COMMON_DETAIL_LABELS,
};

pub static HOMES: SiteProfile = SiteProfile {
    id: "homes",
    name: "LIFULL HOME'S",
    hosts: &["homes.co.jp"],
    cards: &[&[".mod-mergeBuilding--sale", ".mod-objectCollection--sale"]],
    listing: ModeLocators {
        price: &[
            Locator::Css(".priceLabel"),
            Locator::Label { within: "th", text: "価格" },
            Locator::TextScan { marker: "万円" },
        ],
        area: &[
            Locator::Css(".space"),
            Locator::Label { within: "th", text: "専有面積" },
            Locator::Label { within: "th", text: "建物面積" },
            Locator::TextScan { marker: "m²" },
            Locator::TextScan { marker: "㎡" },
        ],
    },
    detail: ModeLocators {
        price: &[
            Locator::Css("[data-component=price] .price"),
            Locator::Label { within: "th", text: "価格" },
            Locator::TextScan { marker: "万円" },
        ],
        area: &[
            Locator::Label { within: "th", text: "専有面積" },
            Locator::Label { within: "th", text: "建物面積" },
            Locator::TextScan { marker: "m²" },
        ],
    },
    detail_markers: &["[data-component=detailHeader]"],
    record: RecordLocators {
        name: &[Locator::Css(".bukkenName"), Locator::Css("h2")],
        address: &[Locator::Label { within: "th", text: "所在地" }],
        link: &[Locator::Css(".bukkenName a"), Locator::Css("a[href]")],
    },
    detail_labels: COMMON_DETAIL_LABELS,
};

pub static YAHOO: SiteProfile = SiteProfile {
    id: "yahoo",
    name: "Yahoo!不動産",
    hosts: &["realestate.yahoo.co.jp"],
    cards: &[&[".ListBukken__item"], &[".ListCassette"]],
    listing: ModeLocators {
        price: &[
            Locator::Css(".ListBukken__price"),
            Locator::Label { within: "dt", text: "価格" },
            Locator::TextScan { marker: "万円" },
        ],
        area: &[
            Locator::Css(".ListBukken__area"),
            Locator::TextScan { marker: "m²" },
            Locator::TextScan { marker: "㎡" },
        ],
    },
    detail: ModeLocators {
        price: &[
            Locator::Css(".DetailSummary__price"),
            Locator::Label { within: "th", text: "価格" },
            Locator::TextScan { marker: "万円" },
        ],
        area: &[
            Locator::Label { within: "th", text: "専有面積" },
            Locator::Label { within: "th", text: "建物面積" },
            Locator::TextScan { marker: "m²" },
        ],
    },
    detail_markers: &[".DetailSummary"],
    record: RecordLocators {
        name: &[Locator::Css(".ListBukken__title"), Locator::Css("h2")],
        address: &[
            Locator::Css(".ListBukken__address"),
            Locator::Label { within: "th", text: "所在地" },
        ],
        link: &[Locator::Css(".ListBukken__title a"), Locator::Css("a[href]")],
    },
    detail_labels: COMMON_DETAIL_LABELS,
};

pub static REHOUSE: SiteProfile = SiteProfile {
    id: "rehouse",
    name: "三井のリハウス",
    hosts: &["rehouse.co.jp"],
    cards: &[&[".property-index-card"]],
    listing: ModeLocators {
        price: &[
            Locator::Css(".price-text"),
            Locator::Label { within: "dt", text: "価格" },
            Locator::TextScan { marker: "万円" },
        ],
        area: &[
            Locator::Label { within: "dt", text: "専有面積" },
            Locator::Label { within: "dt", text: "建物面積" },
            Locator::TextScan { marker: "㎡" },
        ],
    },
    detail: ModeLocators {
        price: &[
            Locator::Label { within: "th", text: "価格" },
            Locator::TextScan { marker: "万円" },
        ],
        area: &[
            Locator::Label { within: "th", text: "専有面積" },
            Locator::Label { within: "th", text: "建物面積" },
            Locator::TextScan { marker: "㎡" },
        ],
    },
    detail_markers: &[".property-detail-header"],
    record: RecordLocators {
        name: &[Locator::Css(".property-title"), Locator::Css("h2")],
        address: &[
            Locator::Label { within: "dt", text: "所在地" },
            Locator::Label { within: "th", text: "所在地" },
        ],
        link: &[Locator::Css("a.property-index-card-link"), Locator::Css("a[href]")],
    },
    detail_labels: COMMON_DETAIL_LABELS,
};

/// All known profiles, in matching order
pub static PROFILES: &[&SiteProfile] = &[&SUUMO, &ATHOME, &HOMES, &YAHOO, &REHOUSE];

/// Profile used for unknown hosts
pub fn default_profile() -> &'static SiteProfile {
    &SUUMO
}

/// Pick the profile for a host name. Unknown hosts get the default.
pub fn resolve(hostname: &str) -> &'static SiteProfile {
    let host = normalize_host(hostname);
    PROFILES
        .iter()
        .copied()
        .find(|profile| profile.matches_host(&host))
        .unwrap_or_else(default_profile)
}

/// Same as `resolve`, starting from a full URL
pub fn resolve_url(url: &str) -> &'static SiteProfile {
    match url::Url::parse(url) {
        Ok(parsed) => resolve(parsed.host_str().unwrap_or_default()),
        Err(_) => default_profile(),
    }
}

/// Look a profile up by its id
pub fn by_id(id: &str) -> Option<&'static SiteProfile> {
    PROFILES.iter().copied().find(|p| p.id == id)
}

fn normalize_host(hostname: &str) -> String {
    let host = hostname.trim().to_lowercase();
    let host = host.split(':').next().unwrap_or_default();
    host.trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_hosts() {
        assert_eq!(resolve("suumo.jp").id, "suumo");
        assert_eq!(resolve("www.athome.co.jp").id, "athome");
        assert_eq!(resolve("WWW.HOMES.CO.JP:443").id, "homes");
        assert_eq!(resolve("realestate.yahoo.co.jp.").id, "yahoo");
        assert_eq!(resolve("www.rehouse.co.jp").id, "rehouse");
    }

    #[test]
    fn test_unknown_host_falls_back_to_default() {
        assert_eq!(resolve("example.com").id, default_profile().id);
        assert_eq!(resolve("").id, "suumo");
    }

    #[test]
    fn test_suffix_match_needs_label_boundary() {
        assert_eq!(resolve("notathome.co.jp").id, "suumo");
        assert!(ATHOME.matches_host("m.athome.co.jp"));
        assert!(!ATHOME.matches_host("athome.co.jp.evil.com"));
    }

    #[test]
    fn test_resolve_url() {
        assert_eq!(resolve_url("https://www.homes.co.jp/mansion/chuko/").id, "homes");
        assert_eq!(resolve_url("not a url").id, "suumo");
    }

    #[test]
    fn test_profiles_are_well_formed() {
        for profile in PROFILES {
            assert!(!profile.cards.is_empty(), "{} has no cards", profile.id);
            assert!(!profile.listing.price.is_empty());
            assert!(!profile.detail.price.is_empty());
            assert!(by_id(profile.id).is_some());
            for alternative in profile.cards {
                for selector in *alternative {
                    assert!(scraper::Selector::parse(selector).is_ok(), "{selector}");
                }
            }
        }
    }

    #[test]
    fn test_generic_locators_come_last() {
        for profile in PROFILES {
            for list in [profile.listing.price, profile.detail.price] {
                let scan = list
                    .iter()
                    .position(|l| matches!(l, Locator::TextScan { .. }))
                    .unwrap();
                assert_eq!(scan, list.len() - 1, "{}", profile.id);
            }
        }
    }
}
