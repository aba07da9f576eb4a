//! Plain-HTTP fetch capability with CSS-selector extraction.
//!
//! Two-phase flow for every source:
//!
//! 1. **Entry**: GET the target URL and discover detail links from elements
//!    matching the source's `entry_pattern`. With `use_entry_content` the
//!    matched elements themselves become records and no detail pages are
//!    fetched.
//! 2. **Detail**: GET each discovered link and extract the fields named by
//!    `detail_pattern`. A failed detail page is logged and skipped without
//!    failing the batch.
//!
//! Sources configured for headless rendering or entry interactions get a
//! warning and a best-effort plain fetch; honoring those flags needs a
//! browser-backed capability.

use crate::errors::FetchError;
use crate::filter::parse_loose_timestamp;
use crate::models::{GlobalConfig, RawRecord, SourceConfig};
use crate::runner::RunContext;
use chrono::Utc;
use itertools::Itertools;
use rand::seq::IndexedRandom;
use scraper::{Html, Selector};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// HTTP client plus the shared User-Agent pool.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    user_agents: Vec<String>,
}

impl HttpFetcher {
    pub fn new(global: &GlobalConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            user_agents: global.user_agent_list.clone(),
        }
    }

    /// One fetch attempt: entry page, link discovery, detail extraction.
    #[instrument(level = "info", skip_all, fields(source = %source.source_name))]
    pub async fn fetch(
        &self,
        source: &SourceConfig,
        ctx: &RunContext,
    ) -> Result<Vec<RawRecord>, FetchError> {
        let base = Url::parse(&source.target_url)
            .map_err(|e| FetchError::Fatal(format!("invalid target_url: {e}")))?;
        if source.anti_scraping_strategies.use_headless_browser
            || !source.entry_interactions.is_empty()
        {
            warn!(
                "source requests browser rendering or entry interactions; plain HTTP capability fetches without them"
            );
        }

        let entry_html = self.get_text(base.as_str(), source).await?;
        let parsed = parse_entry_page(source, &entry_html, &base)?;

        let mut records = if source.use_entry_content {
            debug!(count = parsed.inline.len(), "extracted records from entry page");
            parsed.inline
        } else {
            let mut records = Vec::with_capacity(parsed.links.len());
            for link in &parsed.links {
                if ctx.cancel.is_cancelled() {
                    return Err(FetchError::Cancelled);
                }
                match self.get_text(link, source).await {
                    Ok(html) => match extract_detail(source, &html, link) {
                        Ok(record) => {
                            debug!(
                                url = %link,
                                title = %crate::utils::truncate_for_log(&record.title, 80),
                                "extracted detail record"
                            );
                            records.push(record);
                        }
                        Err(e @ FetchError::Fatal(_)) => return Err(e),
                        Err(e) => warn!(url = %link, error = %e, "detail extraction failed; skipping"),
                    },
                    Err(e @ FetchError::Fatal(_)) => return Err(e),
                    Err(e) => warn!(url = %link, error = %e, "detail fetch failed; skipping"),
                }
            }
            records
        };

        if !source.keywords_filter.is_empty() {
            let before = records.len();
            records.retain(|r| matches_keywords(r, &source.keywords_filter));
            debug!(
                kept = records.len(),
                dropped = before - records.len(),
                "applied keyword filter"
            );
        }

        info!(count = records.len(), "fetch attempt extracted records");
        Ok(records)
    }

    async fn get_text(&self, url: &str, source: &SourceConfig) -> Result<String, FetchError> {
        let mut request = self.client.get(url);
        if source.anti_scraping_strategies.user_agent_rotation {
            if let Some(ua) = self.user_agents.choose(&mut rand::rng()) {
                request = request.header(reqwest::header::USER_AGENT, ua.as_str());
            }
        }
        let response = request
            .send()
            .await
            .map_err(|e| FetchError::Transient(format!("GET {url}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Transient(format!("GET {url}: status {status}")));
        }
        response
            .text()
            .await
            .map_err(|e| FetchError::Transient(format!("read {url}: {e}")))
    }
}

#[derive(Debug)]
struct EntryParse {
    links: Vec<String>,
    inline: Vec<RawRecord>,
}

/// Discover detail links (and, for entry-content sources, inline records)
/// from the entry page. Synchronous: the parsed DOM never crosses an await.
fn parse_entry_page(
    source: &SourceConfig,
    html: &str,
    base: &Url,
) -> Result<EntryParse, FetchError> {
    let selector = Selector::parse(&source.entry_pattern).map_err(|e| {
        FetchError::Fatal(format!("entry_pattern is not a valid selector: {e}"))
    })?;
    let document = Html::parse_document(html);
    let fetched_at = Utc::now();

    let mut links = Vec::new();
    let mut inline = Vec::new();
    for element in document.select(&selector) {
        let href = element
            .value()
            .attr("href")
            .map(str::trim)
            .filter(|h| !h.is_empty() && !h.starts_with("javascript:") && !h.starts_with('#'));
        let Some(href) = href else { continue };
        let Ok(resolved) = base.join(href) else {
            debug!(%href, "unresolvable entry link");
            continue;
        };
        let resolved = resolved.to_string();
        if source.use_entry_content {
            let text = collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "));
            if text.is_empty() {
                continue;
            }
            inline.push(RawRecord {
                url: resolved.clone(),
                title: text.clone(),
                published_at: None,
                content: text,
                extra: BTreeMap::new(),
                fetched_at,
            });
        }
        links.push(resolved);
    }
    let links: Vec<String> = links.into_iter().unique().collect();
    debug!(count = links.len(), "discovered entry links");
    Ok(EntryParse { links, inline })
}

/// Extract one record from a detail page per the source's field selectors.
fn extract_detail(
    source: &SourceConfig,
    html: &str,
    url: &str,
) -> Result<RawRecord, FetchError> {
    let document = Html::parse_document(html);
    let mut title: Option<String> = None;
    let mut content: Option<String> = None;
    let mut published_raw: Option<String> = None;
    let mut extra = BTreeMap::new();

    for (field, selector_str) in &source.detail_pattern {
        let selector = Selector::parse(selector_str).map_err(|e| {
            FetchError::Fatal(format!(
                "detail_pattern `{field}` is not a valid selector: {e}"
            ))
        })?;
        let value = document
            .select(&selector)
            .next()
            .map(|el| collapse_whitespace(&el.text().collect::<Vec<_>>().join(" ")));
        let Some(value) = value else { continue };
        match field.as_str() {
            "title" => title = Some(value),
            "content" => content = Some(value),
            "published_at" => published_raw = Some(value),
            _ => {
                extra.insert(field.clone(), value);
            }
        }
    }

    let title = title.or_else(|| page_title(&document)).unwrap_or_default();
    if title.is_empty() {
        return Err(FetchError::Transient(format!("{url}: no title extracted")));
    }
    let published_at = published_raw.as_deref().and_then(parse_loose_timestamp);
    if published_at.is_none() {
        if let Some(raw) = published_raw {
            // Keep the unparsed form so downstream consumers still see it.
            extra.insert("published_at".to_string(), raw);
        }
    }

    Ok(RawRecord {
        url: url.to_string(),
        title,
        published_at,
        content: content.unwrap_or_default(),
        extra,
        fetched_at: Utc::now(),
    })
}

fn page_title(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").unwrap();
    document
        .select(&selector)
        .next()
        .map(|el| collapse_whitespace(&el.text().collect::<Vec<_>>().join(" ")))
        .filter(|t| !t.is_empty())
}

fn matches_keywords(record: &RawRecord, keywords: &[String]) -> bool {
    let haystack = format!("{} {}", record.title, record.content).to_lowercase();
    keywords
        .iter()
        .any(|k| haystack.contains(&k.to_lowercase()))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SiteType;

    fn source_with(detail: &[(&str, &str)], use_entry_content: bool) -> SourceConfig {
        SourceConfig {
            source_name: "test".to_string(),
            site_type: SiteType::News,
            target_url: "https://example.com/".to_string(),
            entry_pattern: "ul.list li a".to_string(),
            detail_pattern: detail
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            keywords_filter: Vec::new(),
            output_format: Default::default(),
            schedule: Default::default(),
            time_range: None,
            anti_scraping_strategies: Default::default(),
            enable_incremental: true,
            use_entry_content,
            entry_interactions: Default::default(),
        }
    }

    const ENTRY_HTML: &str = r##"
        <html><body><ul class="list">
          <li><a href="/news/1">First story</a></li>
          <li><a href="/news/2">Second story</a></li>
          <li><a href="/news/1">First story again</a></li>
          <li><a href="javascript:void(0)">noise</a></li>
          <li><a href="#top">anchor</a></li>
        </ul></body></html>
    "##;

    #[test]
    fn test_entry_links_resolved_deduped_and_filtered() {
        let source = source_with(&[], false);
        let base = Url::parse("https://example.com/").unwrap();
        let parsed = parse_entry_page(&source, ENTRY_HTML, &base).unwrap();
        assert_eq!(
            parsed.links,
            vec![
                "https://example.com/news/1".to_string(),
                "https://example.com/news/2".to_string(),
            ]
        );
        assert!(parsed.inline.is_empty());
    }

    #[test]
    fn test_entry_content_mode_yields_inline_records() {
        let source = source_with(&[], true);
        let base = Url::parse("https://example.com/").unwrap();
        let parsed = parse_entry_page(&source, ENTRY_HTML, &base).unwrap();
        assert_eq!(parsed.inline.len(), 3);
        assert_eq!(parsed.inline[0].title, "First story");
        assert_eq!(parsed.inline[0].url, "https://example.com/news/1");
    }

    #[test]
    fn test_invalid_entry_selector_is_fatal() {
        let mut source = source_with(&[], false);
        source.entry_pattern = ":::".to_string();
        let base = Url::parse("https://example.com/").unwrap();
        let err = parse_entry_page(&source, ENTRY_HTML, &base).unwrap_err();
        assert!(matches!(err, FetchError::Fatal(_)));
    }

    #[test]
    fn test_detail_extraction_maps_fields() {
        let source = source_with(
            &[
                ("title", "h1.headline"),
                ("content", "div.body"),
                ("published_at", "span.time"),
                ("author", "span.byline"),
            ],
            false,
        );
        let html = r#"
            <html><head><title>fallback</title></head><body>
              <h1 class="headline">Launch   Day</h1>
              <span class="time">2025-10-15 06:00:00</span>
              <span class="byline">A. Reporter</span>
              <div class="body">It finally shipped.</div>
            </body></html>
        "#;
        let record = extract_detail(&source, html, "https://example.com/news/1").unwrap();
        assert_eq!(record.title, "Launch Day");
        assert_eq!(record.content, "It finally shipped.");
        assert!(record.published_at.is_some());
        assert_eq!(record.extra.get("author").unwrap(), "A. Reporter");
    }

    #[test]
    fn test_detail_title_falls_back_to_page_title() {
        let source = source_with(&[("content", "div.body")], false);
        let html = r#"<html><head><title>Page Title</title></head>
            <body><div class="body">text</div></body></html>"#;
        let record = extract_detail(&source, html, "https://example.com/x").unwrap();
        assert_eq!(record.title, "Page Title");
    }

    #[test]
    fn test_unparseable_published_at_lands_in_extra() {
        let source = source_with(&[("published_at", "span.time")], false);
        let html = r#"<html><head><title>T</title></head>
            <body><span class="time">three days ago</span></body></html>"#;
        let record = extract_detail(&source, html, "https://example.com/x").unwrap();
        assert_eq!(record.published_at, None);
        assert_eq!(record.extra.get("published_at").unwrap(), "three days ago");
    }

    #[test]
    fn test_keyword_filter_is_case_insensitive() {
        let record = RawRecord {
            url: "u".to_string(),
            title: "Funding Round Announced".to_string(),
            published_at: None,
            content: "details".to_string(),
            extra: BTreeMap::new(),
            fetched_at: Utc::now(),
        };
        assert!(matches_keywords(&record, &["funding".to_string()]));
        assert!(!matches_keywords(&record, &["merger".to_string()]));
    }
}
