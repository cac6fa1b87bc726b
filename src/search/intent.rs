//! Free text to structured search intent.
//!
//! The oracle's reply is expected to be JSON but is not guaranteed to
//! be: malformed output is routine, not exceptional. Every path through
//! this module ends in a usable, schema-valid intent; at worst "show
//! everything, cheapest first".

use serde::Deserialize;
use serde_json::Value;

use crate::models::OwnerType;
use crate::oracle::{strip_code_fence, Oracle};
use crate::search::filters::{self, AREAS};
use crate::store::{Field, FilterOp, FilterValue, SortKey};

#[derive(Clone, Debug, PartialEq)]
pub struct SearchIntent {
    /// Subset of [`AREAS`]; the full list means "not restricted".
    pub areas: Vec<String>,
    pub price_lower: Option<i64>,
    pub price_upper: Option<i64>,
    pub bedrooms_min: Option<i64>,
    pub bathrooms_min: Option<i64>,
    pub guests_min: Option<i64>,
    pub has_pool: Option<bool>,
    pub owner_type: Option<OwnerType>,
    pub sort: SortKey,
    pub count_hint: Option<usize>,
    pub long_term: bool,
}

impl Default for SearchIntent {
    fn default() -> Self {
        Self {
            areas: AREAS.iter().map(|s| (*s).to_owned()).collect(),
            price_lower: None,
            price_upper: None,
            bedrooms_min: None,
            bathrooms_min: None,
            guests_min: None,
            has_pool: None,
            owner_type: None,
            sort: SortKey::PriceAsc,
            count_hint: None,
            long_term: false,
        }
    }
}

impl SearchIntent {
    pub fn area_restricted(&self) -> bool {
        !self.areas.is_empty() && self.areas.len() < AREAS.len()
    }
}

pub fn build_prompt(query: &str) -> String {
    let areas = AREAS.join(", ");
    format!(
        r#"You are a rental search assistant for North Goa, India. Translate the user's housing query into search filters.

Recognized areas, use EXACTLY these spellings: {areas}.

User query: "{query}"

Return ONLY a JSON object of this exact shape, no prose, no explanations:

{{
    "filters": {{
        "area": "Anjuna" | ["Anjuna", "Vagator"] | null,
        "price_day_inr__lte": 25000 | null,
        "price_day_inr__gte": 8000 | null,
        "bedrooms__gte": 1 | null,
        "bathrooms__gte": 1 | null,
        "guests__gte": 2 | null,
        "has_pool": true | false | null,
        "owner_type": "private" | "agent" | null
    }},
    "sort": "price_asc" | "price_desc" | "newest" | null,
    "limit": 5 | null,
    "long_term": true | false | null
}}

Rules:
- A budget ceiling ("under X", "up to X", "max X") sets ONLY price_day_inr__lte.
- Long-term wording ("long term", "monthly", "for a month") sets long_term: true; do not invent price numbers for it.
- Quantity wording ("show me 5", "a couple of") sets limit.
- "cheap", "cheapest" means sort "price_asc", not a price filter.
- Leave every field the query does not mention as null.
- Never ask for clarification; prefer a search with reasonable filters.
- Prices are INR per day."#
    )
}

#[derive(Debug, Default, Deserialize)]
struct RawIntent {
    #[serde(default)]
    filters: serde_json::Map<String, Value>,
    #[serde(default)]
    sort: Option<String>,
    #[serde(default)]
    limit: Option<u32>,
    #[serde(default)]
    long_term: Option<bool>,
}

/// Parse an oracle reply into an intent. Never fails: anything
/// unparseable degrades to the default intent.
pub fn parse_reply(reply: &str) -> SearchIntent {
    let raw: RawIntent = match serde_json::from_str(strip_code_fence(reply)) {
        Ok(raw) => raw,
        Err(e) => {
            log::warn!("unparseable oracle reply ({e}): {reply:?}");
            return SearchIntent::default();
        }
    };

    let mut intent = SearchIntent {
        sort: match raw.sort.as_deref() {
            Some("price_desc") => SortKey::PriceDesc,
            Some("newest") => SortKey::Newest,
            _ => SortKey::PriceAsc,
        },
        count_hint: raw.limit.filter(|n| *n > 0).map(|n| n as usize),
        long_term: raw.long_term.unwrap_or(false),
        ..SearchIntent::default()
    };

    for filter in filters::validate(&raw.filters) {
        let value = filter.value().clone();
        match (filter.field(), filter.op(), value) {
            (Field::Area, FilterOp::Eq, FilterValue::Str(s)) => {
                intent.areas = vec![s];
            }
            (Field::Area, FilterOp::In, FilterValue::StrList(xs)) => {
                intent.areas = xs;
            }
            (Field::PriceDayInr, FilterOp::Lte, FilterValue::Int(n)) => {
                intent.price_upper = Some(n);
            }
            (Field::PriceDayInr, FilterOp::Gte, FilterValue::Int(n)) => {
                intent.price_lower = Some(n);
            }
            (Field::Bedrooms, _, FilterValue::Int(n)) => {
                intent.bedrooms_min = Some(n);
            }
            (Field::Bathrooms, _, FilterValue::Int(n)) => {
                intent.bathrooms_min = Some(n);
            }
            (Field::Guests, _, FilterValue::Int(n)) => {
                intent.guests_min = Some(n);
            }
            (Field::HasPool, _, FilterValue::Bool(b)) => {
                intent.has_pool = Some(b);
            }
            (Field::OwnerType, _, FilterValue::Str(s)) => {
                intent.owner_type = s.parse().ok();
            }
            _ => (),
        }
    }

    // price bounds invariant: lower <= upper when both present
    if let (Some(lo), Some(hi)) = (intent.price_lower, intent.price_upper) {
        if lo > hi {
            intent.price_lower = Some(hi);
            intent.price_upper = Some(lo);
        }
    }

    intent
}

/// Run the full extraction: prompt, oracle call, parse. Oracle failure
/// degrades to the default intent; no error reaches the user.
pub async fn extract(oracle: &Oracle, query: &str) -> SearchIntent {
    match oracle.complete(&build_prompt(query)).await {
        Ok(reply) => parse_reply(&reply),
        Err(e) => {
            log::warn!("oracle unavailable, using default intent: {e:#}");
            SearchIntent::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prose_degrades_to_default() {
        let intent = parse_reply("Sure! Here are some options: ...");
        assert_eq!(intent, SearchIntent::default());
        assert_eq!(intent.sort, SortKey::PriceAsc);
        assert_eq!(intent.areas.len(), AREAS.len());
    }

    #[test]
    fn empty_reply_degrades_to_default() {
        assert_eq!(parse_reply(""), SearchIntent::default());
    }

    #[test]
    fn fenced_json_is_parsed() {
        let intent = parse_reply(
            "```json\n{\"filters\": {\"area\": \"Arambol\", \
             \"price_day_inr__lte\": 1000}, \"sort\": \"price_asc\"}\n```",
        );
        assert_eq!(intent.areas, vec!["Arambol".to_owned()]);
        assert_eq!(intent.price_upper, Some(1000));
        assert!(intent.area_restricted());
    }

    #[test]
    fn unknown_area_defaults_to_all() {
        let intent =
            parse_reply("{\"filters\": {\"area\": \"Atlantis\"}}");
        assert_eq!(intent.areas.len(), AREAS.len());
        assert!(!intent.area_restricted());
    }

    #[test]
    fn swapped_bounds_are_reordered() {
        let intent = parse_reply(
            "{\"filters\": {\"price_day_inr__gte\": 5000, \
             \"price_day_inr__lte\": 1000}}",
        );
        assert_eq!(intent.price_lower, Some(1000));
        assert_eq!(intent.price_upper, Some(5000));
    }

    #[test]
    fn sort_limit_and_long_term() {
        let intent = parse_reply(
            "{\"filters\": {}, \"sort\": \"newest\", \"limit\": 5, \
             \"long_term\": true}",
        );
        assert_eq!(intent.sort, SortKey::Newest);
        assert_eq!(intent.count_hint, Some(5));
        assert!(intent.long_term);
        assert_eq!(parse_reply("{\"limit\": 0}").count_hint, None);
    }

    #[test]
    fn prompt_carries_the_area_vocabulary() {
        let prompt = build_prompt("villa with pool");
        assert!(prompt.contains("Arambol"));
        assert!(prompt.contains("villa with pool"));
    }
}
