//! Performer page parsing
//!
//! A performer page yields one [`PunchupRecord`]: the name from the first
//! `h1` (falling back to `og:title`), the bio from the meta description, and
//! upcoming shows from schema.org `Event` items in JSON-LD blocks.

use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use scraper::{Html, Selector};
use serde_json::Value;

use crate::models::{PunchupEvent, PunchupRecord};
use crate::utils::normalize_whitespace;

// Helper macro to parse selectors safely at compile time
macro_rules! parse_selector {
    ($s:expr) => {
        Selector::parse($s).expect(concat!("Invalid CSS selector: ", $s))
    };
}

struct PageSelectors {
    heading: Selector,
    og_title: Selector,
    description: Selector,
    json_ld: Selector,
}

fn selectors() -> &'static PageSelectors {
    static SELECTORS: OnceLock<PageSelectors> = OnceLock::new();
    SELECTORS.get_or_init(|| PageSelectors {
        heading: parse_selector!("h1"),
        og_title: parse_selector!(r#"meta[property="og:title"]"#),
        description: parse_selector!(r#"meta[name="description"]"#),
        json_ld: parse_selector!(r#"script[type="application/ld+json"]"#),
    })
}

/// Parse a performer page; `None` when the page names no performer
pub fn parse_performer_page(html: &str) -> Option<PunchupRecord> {
    let document = Html::parse_document(html);
    let sel = selectors();

    let name = document
        .select(&sel.heading)
        .map(|h| normalize_whitespace(&h.text().collect::<String>()))
        .find(|text| !text.is_empty())
        .or_else(|| meta_content(&document, &sel.og_title))?;

    let bio = meta_content(&document, &sel.description);

    let events = document
        .select(&sel.json_ld)
        .filter_map(|script| serde_json::from_str::<Value>(&script.text().collect::<String>()).ok())
        .flat_map(|value| {
            let mut items = Vec::new();
            collect_event_items(&value, &mut items);
            items
        })
        .filter_map(|item| parse_event(&item))
        .collect();

    Some(PunchupRecord { name, bio, events })
}

fn meta_content(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .filter_map(|meta| meta.value().attr("content"))
        .map(normalize_whitespace)
        .find(|content| !content.is_empty())
}

/// Walk arrays and `@graph` containers for objects typed as events
fn collect_event_items(value: &Value, out: &mut Vec<Value>) {
    match value {
        Value::Array(items) => items.iter().for_each(|item| collect_event_items(item, out)),
        Value::Object(map) => {
            if is_event_type(map.get("@type")) {
                out.push(value.clone());
            }
            if let Some(graph) = map.get("@graph") {
                collect_event_items(graph, out);
            }
            if let Some(events) = map.get("event").or_else(|| map.get("events")) {
                collect_event_items(events, out);
            }
        }
        _ => {}
    }
}

fn is_event_type(value: Option<&Value>) -> bool {
    match value {
        Some(Value::String(t)) => t.ends_with("Event"),
        Some(Value::Array(types)) => types
            .iter()
            .any(|t| t.as_str().is_some_and(|t| t.ends_with("Event"))),
        _ => false,
    }
}

fn parse_event(item: &Value) -> Option<PunchupEvent> {
    let start_time = item.get("startDate").and_then(Value::as_str).and_then(parse_start)?;
    let location = item.get("location")?;

    let venue = match location {
        Value::String(name) => normalize_whitespace(name),
        other => other
            .get("name")
            .and_then(Value::as_str)
            .map(normalize_whitespace)?,
    };
    if venue.is_empty() {
        return None;
    }

    let address = location.get("address").map(format_address).unwrap_or_default();

    Some(PunchupEvent {
        start_time,
        location: address,
        venue,
        ticket_link: item.get("offers").and_then(offer_url),
    })
}

fn parse_start(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn format_address(address: &Value) -> String {
    match address {
        Value::String(s) => normalize_whitespace(s),
        Value::Object(map) => ["streetAddress", "addressLocality", "addressRegion", "addressCountry"]
            .iter()
            .filter_map(|key| map.get(*key).and_then(Value::as_str))
            .map(normalize_whitespace)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        _ => String::new(),
    }
}

fn offer_url(offers: &Value) -> Option<String> {
    match offers {
        Value::Array(items) => items.iter().find_map(offer_url),
        other => other
            .get("url")
            .and_then(Value::as_str)
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty()),
    }
}
