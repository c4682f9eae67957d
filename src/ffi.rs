//! FFI interface for native hosts
//!
//! HTML goes in as a pointer/length pair, everything else as null-terminated
//! strings. Results come back as JSON owned by Rust and must be released
//! with `unit_price_free_result`.

use std::ffi::{c_char, CStr, CString};
use std::ptr;

use serde::Serialize;

use crate::dispatch::{PageSession, PassReport};
use crate::export::{export_filename_today, write_csv};
use crate::extractors::{extract, parse_amount, parse_area};
use crate::page::Page;

/// Result struct returned to the host.
/// Exactly one pointer is set; both are owned by Rust.
#[repr(C)]
pub struct UnitPriceResultFFI {
    /// JSON-serialized result (null-terminated)
    pub json_ptr: *mut c_char,
    /// Error message (null-terminated), or null on success
    pub error_ptr: *mut c_char,
}

#[derive(Serialize)]
struct AnnotateResponse {
    site: &'static str,
    html: String,
    report: PassReport,
}

#[derive(Serialize)]
struct CsvResponse {
    filename: String,
    csv: String,
}

/// Annotate every listing card (or the detail page) with unit prices.
///
/// # Arguments
/// * `html_ptr` - Pointer to HTML content (UTF-8, not necessarily null-terminated)
/// * `html_len` - Length of HTML content in bytes
/// * `url` - Page URL (null-terminated), or null when unknown
///
/// # Returns
/// JSON `{ "site", "html", "report" }` with the annotated document
///
/// # Safety
/// - `html_ptr` must point to valid memory of at least `html_len` bytes
/// - `url` must be null or a valid null-terminated C string
/// - Caller must free the result via `unit_price_free_result`
#[no_mangle]
pub unsafe extern "C" fn unit_price_annotate(
    html_ptr: *const c_char,
    html_len: usize,
    url: *const c_char,
) -> UnitPriceResultFFI {
    let mut page = match load_page(html_ptr, html_len, url) {
        Ok(page) => page,
        Err(msg) => return make_error_result(&msg),
    };

    let mut session = PageSession::for_page(&page);
    let report = session.on_load(&mut page);

    respond(&AnnotateResponse {
        site: session.profile().id,
        html: page.html(),
        report,
    })
}

/// Export records for the page as a JSON array. No detail pages are fetched.
///
/// # Safety
/// Same as `unit_price_annotate`
#[no_mangle]
pub unsafe extern "C" fn unit_price_records(
    html_ptr: *const c_char,
    html_len: usize,
    url: *const c_char,
) -> UnitPriceResultFFI {
    let page = match load_page(html_ptr, html_len, url) {
        Ok(page) => page,
        Err(msg) => return make_error_result(&msg),
    };

    let session = PageSession::for_page(&page);
    respond(&session.collect_records(&page))
}

/// Export records for the page as CSV, wrapped in
/// `{ "filename", "csv" }`. The CSV text starts with a UTF-8 BOM.
///
/// # Safety
/// Same as `unit_price_annotate`
#[no_mangle]
pub unsafe extern "C" fn unit_price_records_csv(
    html_ptr: *const c_char,
    html_len: usize,
    url: *const c_char,
) -> UnitPriceResultFFI {
    let page = match load_page(html_ptr, html_len, url) {
        Ok(page) => page,
        Err(msg) => return make_error_result(&msg),
    };

    let session = PageSession::for_page(&page);
    let records = session.collect_records(&page);
    let bytes = match write_csv(&records) {
        Ok(bytes) => bytes,
        Err(e) => return make_error_result(&e.to_string()),
    };
    let csv = match String::from_utf8(bytes) {
        Ok(csv) => csv,
        Err(_) => return make_error_result("CSV output is not valid UTF-8"),
    };

    respond(&CsvResponse {
        filename: export_filename_today(session.profile().id),
        csv,
    })
}

/// Read a number out of listing text.
///
/// `kind` is `"amount"` (万円), `"area"` (㎡) or `"raw"`. The result is a
/// JSON number, or `null` when no number could be read.
///
/// # Safety
/// - `text` and `kind` must be valid null-terminated C strings
/// - Caller must free the result via `unit_price_free_result`
#[no_mangle]
pub unsafe extern "C" fn unit_price_extract(
    text: *const c_char,
    kind: *const c_char,
) -> UnitPriceResultFFI {
    let text = match read_cstr(text, "text") {
        Ok(Some(s)) => s,
        Ok(None) => return make_error_result("text is null"),
        Err(msg) => return make_error_result(&msg),
    };
    let kind = match read_cstr(kind, "kind") {
        Ok(kind) => kind.unwrap_or("raw"),
        Err(msg) => return make_error_result(&msg),
    };

    let value = match kind {
        "amount" => parse_amount(text).map(|q| q.value()),
        "area" => parse_area(text).map(|q| q.value()),
        "raw" => extract(Some(text)),
        other => return make_error_result(&format!("Unknown extraction kind: {other}")),
    };
    respond(&value)
}

/// Install the log subscriber (`UNIT_PRICE_LOG` filter).
/// Returns false if a subscriber was already installed.
#[no_mangle]
pub extern "C" fn unit_price_init_logging() -> bool {
    crate::logging::init()
}

/// Free a result returned by any `unit_price_*` function
///
/// # Safety
/// - `result` must have been returned by this library
/// - Must only be called once per result
#[no_mangle]
pub unsafe extern "C" fn unit_price_free_result(result: UnitPriceResultFFI) {
    if !result.json_ptr.is_null() {
        drop(CString::from_raw(result.json_ptr));
    }
    if !result.error_ptr.is_null() {
        drop(CString::from_raw(result.error_ptr));
    }
}

unsafe fn load_page(
    html_ptr: *const c_char,
    html_len: usize,
    url: *const c_char,
) -> Result<Page, String> {
    let html = if html_ptr.is_null() || html_len == 0 {
        ""
    } else {
        let slice = std::slice::from_raw_parts(html_ptr as *const u8, html_len);
        std::str::from_utf8(slice).map_err(|_| "Invalid UTF-8 in HTML content".to_string())?
    };

    match read_cstr(url, "URL")? {
        Some(url) if !url.is_empty() => Page::parse_with_url(html, url).map_err(|e| e.to_string()),
        _ => Ok(Page::parse(html)),
    }
}

unsafe fn read_cstr<'a>(ptr: *const c_char, what: &str) -> Result<Option<&'a str>, String> {
    if ptr.is_null() {
        return Ok(None);
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map(Some)
        .map_err(|_| format!("Invalid UTF-8 in {what}"))
}

fn respond<T: Serialize>(value: &T) -> UnitPriceResultFFI {
    match serde_json::to_string(value) {
        Ok(json) => match CString::new(json) {
            Ok(cstr) => UnitPriceResultFFI {
                json_ptr: cstr.into_raw(),
                error_ptr: ptr::null_mut(),
            },
            Err(_) => make_error_result("Result JSON contains null bytes"),
        },
        Err(e) => make_error_result(&format!("Failed to serialize result: {}", e)),
    }
}

fn make_error_result(msg: &str) -> UnitPriceResultFFI {
    let error_cstr = CString::new(msg.replace('\0', " ")).unwrap_or_default();
    UnitPriceResultFFI {
        json_ptr: ptr::null_mut(),
        error_ptr: error_cstr.into_raw(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"<html><body>
        <div class="property_unit">
            <h2 class="property_unit-title"><a href="/ms/chuko/nc_1/">テストマンション</a></h2>
            <dl><dt>販売価格</dt><dd>2億5990万円</dd></dl>
            <dl><dt>専有面積</dt><dd>70m2</dd></dl>
        </div>
    </body></html>"#;

    /// Take ownership of the result and return (json, error)
    unsafe fn take(result: UnitPriceResultFFI) -> (Option<String>, Option<String>) {
        let read = |p: *mut c_char| {
            (!p.is_null()).then(|| CStr::from_ptr(p).to_string_lossy().into_owned())
        };
        let out = (read(result.json_ptr), read(result.error_ptr));
        unit_price_free_result(result);
        out
    }

    unsafe fn call(
        f: unsafe extern "C" fn(*const c_char, usize, *const c_char) -> UnitPriceResultFFI,
        html: &str,
        url: Option<&str>,
    ) -> (Option<String>, Option<String>) {
        let url = url.map(|u| CString::new(u).unwrap());
        let url_ptr = url.as_ref().map_or(ptr::null(), |u| u.as_ptr());
        take(f(html.as_ptr() as *const c_char, html.len(), url_ptr))
    }

    #[test]
    fn test_annotate() {
        let (json, error) =
            unsafe { call(unit_price_annotate, LISTING, Some("https://suumo.jp/ms/chuko/")) };
        assert!(error.is_none());

        let value: serde_json::Value = serde_json::from_str(&json.unwrap()).unwrap();
        assert_eq!(value["site"], "suumo");
        assert_eq!(value["report"]["annotated"], 1);
        assert_eq!(value["report"]["mode"], "listing");
        assert!(value["html"].as_str().unwrap().contains("坪単価: 1,227万円"));
    }

    #[test]
    fn test_records() {
        let (json, _) =
            unsafe { call(unit_price_records, LISTING, Some("https://suumo.jp/ms/chuko/")) };

        let value: serde_json::Value = serde_json::from_str(&json.unwrap()).unwrap();
        let record = &value[0];
        assert_eq!(record["物件名"], "テストマンション");
        assert_eq!(record["坪単価(万円)"], "1227");
        assert_eq!(record["URL"], "https://suumo.jp/ms/chuko/nc_1/");
    }

    #[test]
    fn test_records_csv() {
        let (json, _) = unsafe { call(unit_price_records_csv, LISTING, None) };

        let value: serde_json::Value = serde_json::from_str(&json.unwrap()).unwrap();
        assert!(value["filename"].as_str().unwrap().starts_with("unit-price_suumo_"));
        assert!(value["csv"].as_str().unwrap().starts_with('\u{feff}'));
    }

    #[test]
    fn test_invalid_utf8_and_bad_url() {
        let bytes = [0xff_u8, 0xfe];
        let result = unsafe { unit_price_annotate(bytes.as_ptr() as *const c_char, 2, ptr::null()) };
        let (json, error) = unsafe { take(result) };
        assert!(json.is_none());
        assert_eq!(error.as_deref(), Some("Invalid UTF-8 in HTML content"));

        let (_, error) = unsafe { call(unit_price_annotate, LISTING, Some("not a url")) };
        assert!(error.unwrap().contains("not a url"));
    }

    #[test]
    fn test_empty_html_is_a_detail_page() {
        let result = unsafe { unit_price_annotate(ptr::null(), 0, ptr::null()) };
        let (json, _) = unsafe { take(result) };
        let value: serde_json::Value = serde_json::from_str(&json.unwrap()).unwrap();
        assert_eq!(value["report"]["mode"], "detail");
        assert_eq!(value["report"]["price_not_found"], 1);
    }

    #[test]
    fn test_extract() {
        let run = |text: &str, kind: &str| {
            let text = CString::new(text).unwrap();
            let kind = CString::new(kind).unwrap();
            unsafe { take(unit_price_extract(text.as_ptr(), kind.as_ptr())) }
        };

        assert_eq!(run("2億5990万円", "amount").0.as_deref(), Some("25990.0"));
        assert_eq!(run("専有面積 70.5㎡", "area").0.as_deref(), Some("70.5"));
        assert_eq!(run("なし", "raw").0.as_deref(), Some("null"));
        assert!(run("1", "volume").1.unwrap().contains("volume"));
    }
}
