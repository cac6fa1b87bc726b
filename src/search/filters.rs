//! The closed filter vocabulary: which areas, fields and operators a
//! conversational query may translate into.

use serde_json::Value;

use crate::store::{Field, Filter, FilterOp, FilterValue};

/// Areas we serve. Anything outside this list is out of coverage.
pub const AREAS: &[&str] = &[
    "Arambol",
    "Arambol Beach",
    "Aswem",
    "Ashwem",
    "Mandrem",
    "Morjim",
    "Kerim",
    "Keri",
    "Korgaon",
    "Siolim",
    "Chapora",
    "Vagator",
    "Anjuna",
    "Assagao",
    "Arpora",
    "Baga",
    "Calangute",
    "Candolim",
    "Agarwado",
    "Pilerne",
    "Palolem",
    "Agonda",
];

/// Match free-form location text against the area list, case-insensitive
/// substring. "Anjuna beach road" resolves to "Anjuna".
pub fn normalize_area(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    AREAS.iter().find(|area| lower.contains(&area.to_lowercase())).copied()
}

fn as_int(v: &Value) -> Option<i64> {
    // tolerate the model emitting "15000" as a string
    v.as_i64().or_else(|| v.as_str()?.trim().parse().ok())
}

/// Turn the raw `filters` object from the language model into validated
/// store filters. Unknown keys, nulls and mistyped values are dropped
/// silently; a junk object degrades to an unfiltered search.
pub fn validate(raw: &serde_json::Map<String, Value>) -> Vec<Filter> {
    let mut out = Vec::new();
    for (key, value) in raw {
        if value.is_null() {
            continue;
        }
        let filter = match key.as_str() {
            "area" => match value {
                Value::String(s) => normalize_area(s).and_then(|area| {
                    Filter::new(
                        Field::Area,
                        FilterOp::Eq,
                        FilterValue::Str(area.to_owned()),
                    )
                }),
                Value::Array(xs) => {
                    let areas: Vec<String> = xs
                        .iter()
                        .filter_map(|x| x.as_str())
                        .filter_map(normalize_area)
                        .map(str::to_owned)
                        .collect();
                    if areas.is_empty() {
                        None
                    } else {
                        Filter::new(
                            Field::Area,
                            FilterOp::In,
                            FilterValue::StrList(areas),
                        )
                    }
                }
                _ => None,
            },
            "price_day_inr__lte" => as_int(value).and_then(|n| {
                Filter::new(Field::PriceDayInr, FilterOp::Lte, FilterValue::Int(n))
            }),
            "price_day_inr__gte" => as_int(value).and_then(|n| {
                Filter::new(Field::PriceDayInr, FilterOp::Gte, FilterValue::Int(n))
            }),
            "bedrooms__gte" => as_int(value).and_then(|n| {
                Filter::new(Field::Bedrooms, FilterOp::Gte, FilterValue::Int(n))
            }),
            "bathrooms__gte" => as_int(value).and_then(|n| {
                Filter::new(Field::Bathrooms, FilterOp::Gte, FilterValue::Int(n))
            }),
            "guests__gte" => as_int(value).and_then(|n| {
                Filter::new(Field::Guests, FilterOp::Gte, FilterValue::Int(n))
            }),
            "has_pool" => value.as_bool().and_then(|b| {
                Filter::new(Field::HasPool, FilterOp::Eq, FilterValue::Bool(b))
            }),
            "owner_type" => value.as_str().and_then(|s| {
                Filter::new(
                    Field::OwnerType,
                    FilterOp::Eq,
                    FilterValue::Str(s.to_owned()),
                )
            }),
            _ => {
                log::debug!("dropping unknown filter key {key:?}");
                None
            }
        };
        if let Some(f) = filter {
            out.push(f);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(v: Value) -> serde_json::Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn recognized_keys_survive() {
        let raw = map(json!({
            "area": "Anjuna",
            "price_day_inr__lte": 20000,
            "bedrooms__gte": 2,
            "has_pool": true,
            "owner_type": "private",
        }));
        let filters = validate(&raw);
        assert_eq!(filters.len(), 5);
    }

    #[test]
    fn junk_is_dropped_silently() {
        let raw = map(json!({
            "area": null,
            "price_day_inr__lte": "cheap",
            "wifi": true,
            "bedrooms__gte": 2,
        }));
        let filters = validate(&raw);
        assert_eq!(filters.len(), 1);
        assert_eq!(filters[0].field(), Field::Bedrooms);
    }

    #[test]
    fn stringly_typed_numbers_are_tolerated() {
        let raw = map(json!({"price_day_inr__lte": "15000"}));
        assert_eq!(validate(&raw).len(), 1);
    }

    #[test]
    fn area_list_is_normalized() {
        let raw = map(json!({"area": ["anjuna beach", "Atlantis", "Vagator"]}));
        let filters = validate(&raw);
        assert_eq!(filters.len(), 1);
        assert_eq!(
            filters[0].value(),
            &FilterValue::StrList(vec!["Anjuna".into(), "Vagator".into()])
        );
    }

    #[test]
    fn normalize_area_is_substring_match() {
        assert_eq!(normalize_area("near Siolim river"), Some("Siolim"));
        assert_eq!(normalize_area("Mumbai"), None);
        assert_eq!(normalize_area(""), None);
    }
}
