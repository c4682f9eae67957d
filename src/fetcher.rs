//! Detail page enrichment
//!
//! The export path visits each listing's detail page and reads a handful
//! of labelled attributes with the same label matching used on the live
//! page. A failed request only costs that record its extra fields.

use async_trait::async_trait;
use indexmap::IndexMap;
use reqwest::Client;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::Result;
use crate::extractors::{resolve_text, Locator};
use crate::page::Page;
use crate::profiles::SiteProfile;
use crate::record::collapse_whitespace;

/// Attribute label → value, in profile label order
pub type DetailFields = IndexMap<String, String>;

#[async_trait]
pub trait DetailFetcher: Send + Sync {
    /// Never fails: errors come back as an empty field set.
    async fn fetch_fields(&self, url: &str, profile: &SiteProfile) -> DetailFields;
}

pub struct HttpDetailFetcher {
    client: Client,
}

impl HttpDetailFetcher {
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = Client::builder()
            .user_agent(settings.user_agent.as_str())
            .timeout(settings.request_timeout())
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DetailFetcher for HttpDetailFetcher {
    async fn fetch_fields(&self, url: &str, profile: &SiteProfile) -> DetailFields {
        let response = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(url, error = %e, "detail request failed");
                return DetailFields::new();
            }
        };

        if !response.status().is_success() {
            warn!(url, status = %response.status(), "detail request returned non-success status");
            return DetailFields::new();
        }

        let body = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                warn!(url, error = %e, "failed to read detail body");
                return DetailFields::new();
            }
        };

        let fields = parse_detail_fields(&body, profile);
        debug!(url, fields = fields.len(), "detail fields parsed");
        fields
    }
}

/// Read the profile's detail labels from a detail page document
pub fn parse_detail_fields(html: &str, profile: &SiteProfile) -> DetailFields {
    let page = Page::parse(html);
    let root = page.root();

    profile
        .detail_labels
        .iter()
        .filter_map(|&label| {
            let locators = [
                Locator::Label { within: "th", text: label },
                Locator::Label { within: "dt", text: label },
            ];
            let value = resolve_text(&page, root, &locators)?;
            Some((label.to_string(), collapse_whitespace(&value)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiles::SUUMO;

    const DETAIL: &str = r#"
    <html><body>
        <table>
            <tr><th>間取り</th><td>3LDK</td><th>所在階</th><td>5階 / 12階建</td></tr>
            <tr><th>築年月</th><td>2008年3月</td></tr>
        </table>
        <dl><dt>交通</dt><dd>東京メトロ銀座線「表参道」
            徒歩4分</dd></dl>
    </body></html>
    "#;

    #[test]
    fn test_parse_detail_fields() {
        let fields = parse_detail_fields(DETAIL, &SUUMO);

        assert_eq!(fields.get("間取り").map(String::as_str), Some("3LDK"));
        assert_eq!(fields.get("所在階").map(String::as_str), Some("5階 / 12階建"));
        assert_eq!(fields.get("築年月").map(String::as_str), Some("2008年3月"));
        assert_eq!(
            fields.get("交通").map(String::as_str),
            Some("東京メトロ銀座線「表参道」 徒歩4分")
        );
        assert!(!fields.contains_key("管理費"));

        let order: Vec<_> = fields.keys().map(String::as_str).collect();
        assert_eq!(order, vec!["間取り", "築年月", "所在階", "交通"]);
    }

    #[test]
    fn test_parse_detail_fields_empty_document() {
        assert!(parse_detail_fields("", &SUUMO).is_empty());
    }

    fn local_fetcher() -> HttpDetailFetcher {
        HttpDetailFetcher::with_client(Client::builder().no_proxy().build().unwrap())
    }

    /// Answer exactly one request on a local port with a canned response
    async fn serve_once(status: &'static str, body: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });
        format!("http://{addr}/detail")
    }

    #[tokio::test]
    async fn test_http_fetcher_reads_detail_page() {
        let url = serve_once("200 OK", DETAIL).await;
        let fetcher = local_fetcher();

        let fields = fetcher.fetch_fields(&url, &SUUMO).await;

        assert_eq!(fields.get("間取り").map(String::as_str), Some("3LDK"));
        assert_eq!(fields.len(), 4);
    }

    #[tokio::test]
    async fn test_http_fetcher_degrades_on_error_status() {
        // The body would parse; the status alone must discard it
        let url = serve_once("404 Not Found", DETAIL).await;
        let fetcher = local_fetcher();

        let fields = fetcher.fetch_fields(&url, &SUUMO).await;

        assert!(fields.is_empty());
    }

    #[tokio::test]
    async fn test_http_fetcher_degrades_on_connection_error() {
        let fetcher = HttpDetailFetcher::new(&Settings {
            request_timeout_secs: 1,
            ..Settings::default()
        })
        .unwrap();

        // Port 9 on localhost has no HTTP server
        let fields = fetcher
            .fetch_fields("http://127.0.0.1:9/detail", &SUUMO)
            .await;
        assert!(fields.is_empty());
    }
}
