//! Tiered result assembly.
//!
//! The exact tier applies every filter at once. When it comes back thin,
//! partial tiers relax one dimension at a time (per-area, price-only)
//! with small caps so no relaxed dimension dominates. Tiers are
//! concatenated exact-first and deduplicated by listing id, which lets
//! the caller tell "matched everything you asked" from "what we had".

use std::collections::HashSet;

use crate::models::Listing;
use crate::search::intent::SearchIntent;
use crate::search::pagination::PAGE_SIZE;
use crate::search::price;
use crate::store::{
    Field, Filter, FilterOp, FilterValue, ListingQuery, ListingStore,
    SortKey, StoreError,
};

const EXACT_CAP: i64 = 50;
const BACKFILL_THRESHOLD: usize = 10;
const BACKFILL_CAP: i64 = 8;
const OVERALL_CAP: usize = 30;

pub struct SearchOutcome {
    pub listings: Vec<Listing>,
    /// True when the filters matched nothing and an unfiltered fallback
    /// was served instead. For user-facing messaging only.
    pub relaxed: bool,
}

fn push(filters: &mut Vec<Filter>, f: Option<Filter>) {
    if let Some(f) = f {
        filters.push(f);
    }
}

fn area_filter(intent: &SearchIntent) -> Option<Filter> {
    if !intent.area_restricted() {
        return None;
    }
    if let [area] = intent.areas.as_slice() {
        Filter::new(Field::Area, FilterOp::Eq, FilterValue::Str(area.clone()))
    } else {
        Filter::new(
            Field::Area,
            FilterOp::In,
            FilterValue::StrList(intent.areas.clone()),
        )
    }
}

fn price_filters(lower: Option<i64>, upper: Option<i64>) -> Vec<Filter> {
    let mut out = Vec::new();
    if let Some(lo) = lower {
        push(
            &mut out,
            Filter::new(Field::PriceDayInr, FilterOp::Gte, FilterValue::Int(lo)),
        );
    }
    if let Some(hi) = upper {
        push(
            &mut out,
            Filter::new(Field::PriceDayInr, FilterOp::Lte, FilterValue::Int(hi)),
        );
    }
    out
}

fn exact_filters(
    intent: &SearchIntent,
    lower: Option<i64>,
    upper: Option<i64>,
) -> Vec<Filter> {
    let mut filters = Vec::new();
    push(&mut filters, area_filter(intent));
    filters.extend(price_filters(lower, upper));
    if let Some(n) = intent.bedrooms_min {
        push(
            &mut filters,
            Filter::new(Field::Bedrooms, FilterOp::Gte, FilterValue::Int(n)),
        );
    }
    if let Some(n) = intent.bathrooms_min {
        push(
            &mut filters,
            Filter::new(Field::Bathrooms, FilterOp::Gte, FilterValue::Int(n)),
        );
    }
    if let Some(n) = intent.guests_min {
        push(
            &mut filters,
            Filter::new(Field::Guests, FilterOp::Gte, FilterValue::Int(n)),
        );
    }
    if let Some(b) = intent.has_pool {
        push(
            &mut filters,
            Filter::new(Field::HasPool, FilterOp::Eq, FilterValue::Bool(b)),
        );
    }
    if let Some(t) = intent.owner_type {
        push(
            &mut filters,
            Filter::new(
                Field::OwnerType,
                FilterOp::Eq,
                FilterValue::Str(t.as_str().to_owned()),
            ),
        );
    }
    filters
}

/// Run a query, downgrading to an unsorted shape when the store has no
/// index for the sorted compound query. The sort is then applied in
/// memory.
fn query_resilient(
    store: &mut dyn ListingStore,
    filters: Vec<Filter>,
    sort: SortKey,
    limit: i64,
) -> Result<Vec<Listing>, StoreError> {
    let q = ListingQuery { filters, sort: Some(sort), limit };
    match store.query(&q) {
        Ok(listings) => Ok(listings),
        Err(StoreError::MissingIndex) => {
            log::warn!("no index for sorted compound query, retrying unsorted");
            let mut listings =
                store.query(&ListingQuery { sort: None, ..q })?;
            sort.apply(&mut listings);
            Ok(listings)
        }
        Err(e) => Err(e),
    }
}

/// Run the tiered search for an intent. Only store-unreachable errors
/// propagate; thin or empty results degrade inside.
pub fn run(
    store: &mut dyn ListingStore,
    intent: &SearchIntent,
) -> Result<SearchOutcome, StoreError> {
    let (lower, upper) = price::derive_bounds(
        intent.price_upper,
        intent.price_lower,
        intent.long_term,
    );

    let mut assembled = query_resilient(
        store,
        exact_filters(intent, lower, upper),
        intent.sort,
        EXACT_CAP,
    )?;
    let mut seen: HashSet<String> =
        assembled.iter().map(|l| l.id.clone()).collect();

    if assembled.len() < BACKFILL_THRESHOLD {
        if intent.area_restricted() {
            for area in &intent.areas {
                let filters = Filter::new(
                    Field::Area,
                    FilterOp::Eq,
                    FilterValue::Str(area.clone()),
                )
                .into_iter()
                .collect();
                for l in
                    query_resilient(store, filters, intent.sort, BACKFILL_CAP)?
                {
                    if seen.insert(l.id.clone()) {
                        assembled.push(l);
                    }
                }
            }
        }
        if lower.is_some() || upper.is_some() {
            for l in query_resilient(
                store,
                price_filters(lower, upper),
                intent.sort,
                BACKFILL_CAP,
            )? {
                if seen.insert(l.id.clone()) {
                    assembled.push(l);
                }
            }
        }
    }

    assembled.truncate(OVERALL_CAP);
    if let Some(hint) = intent.count_hint {
        // soft cap: never below one page
        assembled.truncate(hint.max(PAGE_SIZE));
    }

    if assembled.is_empty() {
        let fallback = query_resilient(
            store,
            vec![],
            SortKey::PriceAsc,
            OVERALL_CAP as i64,
        )?;
        return Ok(SearchOutcome { listings: fallback, relaxed: true });
    }
    Ok(SearchOutcome { listings: assembled, relaxed: false })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::filters::AREAS;
    use crate::store::testing::{listing, MemoryStore};

    fn intent_for_areas(areas: &[&str]) -> SearchIntent {
        SearchIntent {
            areas: areas.iter().map(|s| (*s).to_owned()).collect(),
            ..SearchIntent::default()
        }
    }

    #[test]
    fn exact_results_come_first_without_duplicates() {
        let mut store = MemoryStore::default();
        // two exact matches (with pool), plus area-mates without one
        for (id, price, pool) in
            [("a", 1000, true), ("b", 2000, true), ("c", 1500, false)]
        {
            let mut l = listing(id, "Anjuna", price);
            l.has_pool = Some(pool);
            store.listings.push(l);
        }
        let mut intent = intent_for_areas(&["Anjuna"]);
        intent.has_pool = Some(true);

        let out = run(&mut store, &intent).unwrap();
        assert!(!out.relaxed);
        let ids: Vec<&str> = out.listings.iter().map(|l| l.id.as_str()).collect();
        // exact tier (a, b by price) keeps its positions, backfill adds c once
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn rich_exact_tier_skips_backfill() {
        let mut store = MemoryStore::default();
        for i in 0..BACKFILL_THRESHOLD {
            store.listings.push(listing(&format!("a{i}"), "Anjuna", 1000));
        }
        store.listings.push(listing("other", "Baga", 500));

        let out = run(&mut store, &intent_for_areas(&["Anjuna"])).unwrap();
        assert_eq!(out.listings.len(), BACKFILL_THRESHOLD);
        assert!(out.listings.iter().all(|l| l.area == "Anjuna"));
    }

    #[test]
    fn zero_results_fall_back_relaxed() {
        let mut store = MemoryStore::default();
        store.listings.push(listing("a", "Baga", 3000));
        store.listings.push(listing("b", "Baga", 1000));

        let out = run(&mut store, &intent_for_areas(&["Arambol"])).unwrap();
        assert!(out.relaxed);
        // unfiltered, cheapest first
        let ids: Vec<&str> = out.listings.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn empty_store_is_relaxed_and_empty() {
        let mut store = MemoryStore::default();
        let out = run(&mut store, &SearchIntent::default()).unwrap();
        assert!(out.relaxed);
        assert!(out.listings.is_empty());
    }

    #[test]
    fn missing_index_downgrades_to_unsorted_query() {
        let mut store = MemoryStore {
            fail_sorted_compound: true,
            ..MemoryStore::default()
        };
        for (id, price) in [("x", 3000), ("y", 1000), ("z", 2000)] {
            store.listings.push(listing(id, "Morjim", price));
        }

        let out = run(&mut store, &intent_for_areas(&["Morjim"])).unwrap();
        assert!(!out.relaxed);
        let prices: Vec<i64> =
            out.listings.iter().map(|l| l.price_day_inr).collect();
        assert_eq!(prices, vec![1000, 2000, 3000]);
    }

    #[test]
    fn overall_cap_holds() {
        let mut store = MemoryStore::default();
        for i in 0..40 {
            store.listings.push(listing(&format!("l{i}"), "Anjuna", 1000 + i));
        }
        let out = run(&mut store, &intent_for_areas(&["Anjuna"])).unwrap();
        assert_eq!(out.listings.len(), OVERALL_CAP);
    }

    #[test]
    fn count_hint_is_a_soft_cap_with_a_page_floor() {
        let mut store = MemoryStore::default();
        for i in 0..30 {
            store.listings.push(listing(&format!("l{i}"), "Anjuna", 1000 + i));
        }
        let mut intent = intent_for_areas(&["Anjuna"]);
        intent.count_hint = Some(12);
        assert_eq!(run(&mut store, &intent).unwrap().listings.len(), 12);
        intent.count_hint = Some(3);
        assert_eq!(run(&mut store, &intent).unwrap().listings.len(), PAGE_SIZE);
    }

    #[test]
    fn lone_ceiling_searches_around_the_budget() {
        let mut store = MemoryStore::default();
        for (id, price) in [("low", 500), ("fit", 900), ("above", 1100)] {
            store.listings.push(listing(id, "Arambol", price));
        }
        let mut intent = intent_for_areas(&["Arambol"]);
        intent.price_upper = Some(1000);

        let out = run(&mut store, &intent).unwrap();
        let ids: Vec<&str> = out.listings.iter().map(|l| l.id.as_str()).collect();
        // floor is 700; the over-budget listing stays, the fringe one
        // only returns through the per-area backfill
        assert_eq!(ids[..2], ["fit", "above"]);
        assert!(ids.contains(&"low"));
    }

    #[test]
    fn default_intent_queries_all_areas_unrestricted() {
        let intent = SearchIntent::default();
        assert_eq!(intent.areas.len(), AREAS.len());
        assert!(exact_filters(&intent, None, None).is_empty());
    }
}
