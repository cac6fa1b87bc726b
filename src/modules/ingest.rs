//! OLX scraper: periodically pulls the North Goa rental category and
//! feeds new ads into the listing base.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;
use scraper::{Html, Selector};
use tokio_util::sync::CancellationToken;

use crate::common::BotEnv;
use crate::models::{ListingSource, NewListing, OwnerType};
use crate::search::filters::normalize_area;
use crate::store::ListingStore;
use crate::utils::ResultExt;

const MAX_PAGES: u32 = 100;
/// Stop paging after this many pages in a row yield nothing usable.
const EMPTY_PAGE_LIMIT: u32 = 3;
const PAGE_DELAY: Duration = Duration::from_secs(1);

lazy_static! {
    static ref ITEM: Selector =
        Selector::parse(r#"li[data-aut-id="itemBox"]"#).unwrap();
    static ref TITLE: Selector =
        Selector::parse(r#"span[data-aut-id="itemTitle"]"#).unwrap();
    static ref PRICE: Selector =
        Selector::parse(r#"span[data-aut-id="itemPrice"]"#).unwrap();
    static ref LOCATION: Selector =
        Selector::parse(r#"span[data-aut-id="item-location"]"#).unwrap();
    static ref DETAILS: Selector =
        Selector::parse(r#"span[data-aut-id="itemDetails"]"#).unwrap();
    static ref LINK: Selector = Selector::parse("a[href]").unwrap();
    static ref RE_PRICE: Regex = Regex::new(r"₹\s*([\d,]+)").unwrap();
    static ref RE_BHK: Regex = Regex::new(r"(?i)(\d+)\s*BHK").unwrap();
    static ref RE_BATH: Regex =
        Regex::new(r"(?i)(\d+)\s*(?:Bathroom|baths?)").unwrap();
    static ref RE_SQFT: Regex =
        Regex::new(r"(?i)(\d+(?:,\d+)?)\s*(?:sqft|sq\.?\s*ft|square feet|sft)")
            .unwrap();
}

#[derive(Debug, PartialEq)]
pub struct ScrapedAd {
    pub olx_id: String,
    pub title: String,
    pub area: &'static str,
    pub price_day_inr: i64,
    pub bedrooms: Option<i32>,
    pub bathrooms: Option<i32>,
    pub sqft: Option<i32>,
    pub url: String,
}

/// Background task: scrape when the newest OLX listing is older than
/// the configured interval, then check again every hour.
pub async fn task(env: std::sync::Arc<BotEnv>, cancel: CancellationToken) {
    loop {
        if due(&env) {
            match run_once(&env).await {
                Ok(added) => log::info!("ingest: {added} new listings"),
                Err(e) => log::error!("ingest failed: {e:#}"),
            }
        }
        tokio::select! {
            () = tokio::time::sleep(Duration::from_secs(3600)) => {}
            () = cancel.cancelled() => return,
        }
    }
}

fn due(env: &BotEnv) -> bool {
    let interval = chrono::Duration::hours(
        i64::try_from(env.config.ingest.interval_hours).unwrap_or(i64::MAX),
    );
    let newest = ListingStore::newest_created_at(
        &mut *env.conn(),
        ListingSource::Olx,
    )
    .log_ok("newest olx listing")
    .flatten();
    match newest {
        Some(ts) => Utc::now().naive_utc() - ts >= interval,
        None => true,
    }
}

/// One full scrape pass. Returns the number of new listings stored.
pub async fn run_once(env: &BotEnv) -> Result<usize> {
    if env.config.ingest.disable {
        return Ok(0);
    }
    let base = &env.config.ingest.base_url;
    let mut added = 0;
    let mut empty_pages = 0;

    for page in 1..=MAX_PAGES {
        let url = format!("{base}?page={page}");
        let html = fetch_page(env, &url).await;
        crate::metrics::update_service("olx", html.is_ok());
        let ads = match html {
            Ok(html) => parse_page(&html),
            // a failed fetch counts as an empty page
            Err(e) => {
                log::warn!("{e:#}");
                Vec::new()
            }
        };

        if ads.is_empty() {
            empty_pages += 1;
            if empty_pages >= EMPTY_PAGE_LIMIT {
                break;
            }
        } else {
            empty_pages = 0;
            let mut conn = env.conn();
            for ad in ads {
                if store_ad(&mut conn, ad)? {
                    added += 1;
                }
            }
        }
        tokio::time::sleep(PAGE_DELAY).await;
    }
    Ok(added)
}

async fn fetch_page(env: &BotEnv, url: &str) -> Result<String> {
    let response = env
        .reqwest_client
        .get(url)
        .send()
        .await
        .with_context(|| format!("fetching {url}"))?
        .error_for_status()?;
    Ok(response.text().await?)
}

fn store_ad(
    conn: &mut diesel::SqliteConnection,
    ad: ScrapedAd,
) -> Result<bool> {
    let seen =
        ListingStore::find_by_source_id(conn, ListingSource::Olx, &ad.olx_id)?;
    if seen.is_some() {
        return Ok(false);
    }
    ListingStore::insert(conn, NewListing {
        title: ad.title,
        area: ad.area.to_owned(),
        price_day_inr: ad.price_day_inr,
        bedrooms: ad.bedrooms,
        bathrooms: ad.bathrooms,
        sqft: ad.sqft,
        owner_type: Some(OwnerType::Private),
        source: Some(ListingSource::Olx),
        source_id: Some(ad.olx_id),
        source_url: Some(ad.url),
        ..Default::default()
    })?;
    metrics::increment_counter!("nestbot_ingested_listings_total");
    Ok(true)
}

/// Pull every recognizable ad out of a category page. Ads outside the
/// known areas, or without a price or link, are skipped.
pub fn parse_page(html: &str) -> Vec<ScrapedAd> {
    let document = Html::parse_document(html);
    let mut ads = Vec::new();

    for item in document.select(&ITEM) {
        let Some(href) =
            item.select(&LINK).find_map(|a| a.value().attr("href"))
        else {
            continue;
        };
        let Some(olx_id) = extract_olx_id(href) else { continue };

        let text_of = |sel: &Selector| {
            item.select(sel)
                .next()
                .map(|el| el.text().collect::<String>().trim().to_owned())
        };
        let Some(title) = text_of(&TITLE).filter(|t| !t.is_empty()) else {
            continue;
        };
        let Some(price) = text_of(&PRICE).and_then(|p| parse_price(&p)) else {
            continue;
        };
        let Some(area) =
            text_of(&LOCATION).as_deref().and_then(normalize_area)
        else {
            continue;
        };

        let details = text_of(&DETAILS).unwrap_or_default();
        let haystack = format!("{title} {details}");

        ads.push(ScrapedAd {
            olx_id: olx_id.to_owned(),
            area,
            price_day_inr: price,
            bedrooms: capture_int(&RE_BHK, &haystack),
            bathrooms: capture_int(&RE_BATH, &haystack),
            sqft: capture_int(&RE_SQFT, &haystack),
            title,
            url: absolute_url(href),
        });
    }
    ads
}

/// The stable part of an OLX item href, used for deduplication.
fn extract_olx_id(href: &str) -> Option<&str> {
    let id = href.split("-i").last()?;
    let id = id.split(['?', '#']).next()?;
    if id.is_empty() { None } else { Some(id) }
}

fn parse_price(text: &str) -> Option<i64> {
    let digits = RE_PRICE.captures(text)?.get(1)?.as_str().replace(',', "");
    digits.parse().ok().filter(|p| *p > 0)
}

fn capture_int(re: &Regex, text: &str) -> Option<i32> {
    re.captures(text)?.get(1)?.as_str().replace(',', "").parse().ok()
}

fn absolute_url(href: &str) -> String {
    if href.starts_with("http") {
        href.to_owned()
    } else {
        format!("https://www.olx.in{href}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <ul>
          <li data-aut-id="itemBox">
            <a href="/item/2-bhk-flat-in-anjuna-iid-1790123456?utm_source=x">
              <span data-aut-id="itemPrice">₹ 3,500</span>
              <span data-aut-id="itemTitle">2 BHK flat near the beach</span>
              <span data-aut-id="itemDetails">2 BHK - 2 Bathrooms - 1,100 sqft</span>
              <span data-aut-id="item-location">Anjuna, Goa</span>
            </a>
          </li>
          <li data-aut-id="itemBox">
            <a href="/item/villa-iid-222">
              <span data-aut-id="itemPrice">₹ 90,000</span>
              <span data-aut-id="itemTitle">Villa with pool</span>
              <span data-aut-id="item-location">Panaji, Goa</span>
            </a>
          </li>
          <li data-aut-id="itemBox">
            <a href="/item/no-price-iid-333">
              <span data-aut-id="itemTitle">Untitled room</span>
              <span data-aut-id="item-location">Morjim</span>
            </a>
          </li>
        </ul>"#;

    #[test]
    fn parses_complete_ads_only() {
        let ads = parse_page(PAGE);
        // The Panaji ad is outside the known areas, the third has no
        // price. Only the Anjuna one survives.
        assert_eq!(ads.len(), 1);
        let ad = &ads[0];
        assert_eq!(ad.title, "2 BHK flat near the beach");
        assert_eq!(ad.area, "Anjuna");
        assert_eq!(ad.price_day_inr, 3500);
        assert_eq!(ad.bedrooms, Some(2));
        assert_eq!(ad.bathrooms, Some(2));
        assert_eq!(ad.sqft, Some(1100));
        assert!(ad.url.starts_with("https://www.olx.in/item/"));
    }

    #[test]
    fn olx_id_extraction() {
        assert_eq!(
            extract_olx_id("/item/flat-in-anjuna-iid-179?utm=x"),
            Some("id-179")
        );
        assert_eq!(extract_olx_id("/item/villa-iid-222#top"), Some("id-222"));
        assert_eq!(extract_olx_id("/item/plain"), Some("/item/plain"));
        assert_eq!(extract_olx_id(""), None);
    }

    #[test]
    fn price_and_detail_regexes() {
        assert_eq!(parse_price("₹ 12,500"), Some(12500));
        assert_eq!(parse_price("Contact for price"), None);
        assert_eq!(capture_int(&RE_BHK, "Cozy 3 bhk villa"), Some(3));
        assert_eq!(capture_int(&RE_BATH, "2 baths, garden"), Some(2));
        assert_eq!(capture_int(&RE_SQFT, "1,250 sq. ft plot"), Some(1250));
        assert_eq!(capture_int(&RE_SQFT, "no size"), None);
    }
}
