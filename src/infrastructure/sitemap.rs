//! XML site-map enumeration.
//!
//! Reads the standard `<urlset><url><loc>/<lastmod></url></urlset>` shape.
//! Candidates are sorted newest-first so recently changed product pages
//! surface before the long tail, then capped to the fetch limit.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::{debug, warn};

use crate::domain::SitemapSource;
use crate::infrastructure::http_client::PageFetcher;

/// Ephemeral (URL, last-modified) pair produced by site-map parsing.
/// Never persisted; duplicates across sources are kept since the
/// downstream create-or-update path is idempotent per derived id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateUrl {
    pub loc: String,
    pub last_modified: DateTime<Utc>,
}

pub struct SitemapReader<'a> {
    fetcher: &'a PageFetcher,
}

impl<'a> SitemapReader<'a> {
    pub fn new(fetcher: &'a PageFetcher) -> Self {
        Self { fetcher }
    }

    /// Enumerate candidate product URLs across all sources, newest first,
    /// capped at `limit`. A source that cannot be fetched contributes
    /// nothing; enumeration itself never fails.
    pub async fn enumerate(&self, sources: &[SitemapSource], limit: Option<usize>) -> Vec<String> {
        let mut candidates = Vec::new();

        for source in sources {
            match self.fetcher.fetch_simple(&source.url, false).await {
                Ok(xml) => {
                    let found =
                        parse_sitemap(&xml, source.lastmod_format.as_deref(), Utc::now());
                    debug!(
                        source = %source.url,
                        label = source.label.as_deref().unwrap_or("-"),
                        urls = found.len(),
                        "parsed site map"
                    );
                    candidates.extend(found);
                }
                Err(e) => warn!(source = %source.url, "skipping unreachable site map: {e}"),
            }
        }

        rank_and_cap(candidates, limit)
    }
}

/// Sort candidates newest-first and cap the combined list.
pub fn rank_and_cap(mut candidates: Vec<CandidateUrl>, limit: Option<usize>) -> Vec<String> {
    candidates.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));

    let mut links: Vec<String> = candidates.into_iter().map(|c| c.loc).collect();
    if let Some(limit) = limit {
        links.truncate(limit);
    }
    links
}

/// Pull every `<url>` entry out of a urlset document. Entries without a
/// `<loc>` are dropped; entries without a `<lastmod>` fall back to
/// `fetched_at` so they sort as fresh.
pub fn parse_sitemap(
    xml: &str,
    lastmod_format: Option<&str>,
    fetched_at: DateTime<Utc>,
) -> Vec<CandidateUrl> {
    let mut reader = Reader::from_reader(xml.as_bytes());
    let mut buf = Vec::new();

    let mut candidates = Vec::new();
    let mut in_url = false;
    let mut capture: Option<&'static str> = None;
    let mut loc: Option<String> = None;
    let mut lastmod: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"url" => {
                    in_url = true;
                    loc = None;
                    lastmod = None;
                }
                b"loc" if in_url => capture = Some("loc"),
                b"lastmod" if in_url => capture = Some("lastmod"),
                _ => {}
            },
            Ok(Event::Text(t)) => {
                if let Some(target) = capture {
                    let text = match t.unescape() {
                        Ok(text) => text.trim().to_string(),
                        Err(_) => continue,
                    };
                    if text.is_empty() {
                        continue;
                    }
                    match target {
                        "loc" => loc = Some(text),
                        _ => lastmod = Some(text),
                    }
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"loc" | b"lastmod" => capture = None,
                b"url" => {
                    in_url = false;
                    if let Some(loc) = loc.take() {
                        let last_modified = lastmod
                            .take()
                            .and_then(|raw| parse_lastmod(&raw, lastmod_format))
                            .unwrap_or(fetched_at);
                        candidates.push(CandidateUrl { loc, last_modified });
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                warn!("malformed site map XML, stopping early: {e}");
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    candidates
}

/// Parse a `<lastmod>` value with the source's declared format, falling
/// back to RFC 3339 and the bare W3C date.
fn parse_lastmod(raw: &str, format: Option<&str>) -> Option<DateTime<Utc>> {
    if let Some(format) = format {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&dt));
        }
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| Utc.from_utc_datetime(&dt))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SITEMAP: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>https://acme.example/p/old</loc><lastmod>2024-01-01</lastmod></url>
  <url><loc>https://acme.example/p/new</loc><lastmod>2024-06-01</lastmod></url>
  <url><lastmod>2024-03-01</lastmod></url>
</urlset>"#;

    #[test]
    fn parses_loc_lastmod_pairs_and_drops_locless_entries() {
        let fetched = Utc::now();
        let candidates = parse_sitemap(SITEMAP, Some("%Y-%m-%d"), fetched);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].loc, "https://acme.example/p/old");
        assert_eq!(
            candidates[0].last_modified,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn missing_lastmod_defaults_to_fetch_time() {
        let fetched = Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap();
        let xml = "<urlset><url><loc>https://acme.example/p/x</loc></url></urlset>";
        let candidates = parse_sitemap(xml, None, fetched);
        assert_eq!(candidates[0].last_modified, fetched);
    }

    #[test]
    fn custom_datetime_format_is_honored() {
        let xml = "<urlset><url><loc>https://a/p</loc>\
                   <lastmod>01/06/2024 13:30</lastmod></url></urlset>";
        let candidates = parse_sitemap(xml, Some("%d/%m/%Y %H:%M"), Utc::now());
        assert_eq!(
            candidates[0].last_modified,
            Utc.with_ymd_and_hms(2024, 6, 1, 13, 30, 0).unwrap()
        );
    }

    #[test]
    fn unparseable_lastmod_falls_back_to_fetch_time() {
        let fetched = Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap();
        let xml = "<urlset><url><loc>https://a/p</loc>\
                   <lastmod>not-a-date</lastmod></url></urlset>";
        let candidates = parse_sitemap(xml, Some("%Y-%m-%d"), fetched);
        assert_eq!(candidates[0].last_modified, fetched);
    }
}
