use diesel::{ExpressionMethods, QueryDsl, RunQueryDsl, SqliteConnection};

use crate::models::ListingStatus;

pub fn register_metrics() {
    // Descriptions of labeled metrics
    metrics::describe_gauge!(
        "nestbot_service_access_success",
        "1 if the last access to the service was successful, 0 otherwise."
    );
    metrics::describe_gauge!(
        "nestbot_service_last_access_timestamp_seconds",
        "UNIX timestamp of the last access to the service."
    );
    metrics::describe_counter!(
        crate::oracle::METRIC_NAME,
        "Total number of tokens used by the intent-extraction oracle."
    );
    metrics::describe_counter!(
        "nestbot_ingested_listings_total",
        "Number of listings added by the scraper."
    );

    // Constant metrics

    metrics::describe_gauge!(
        "nestbot_start_time_seconds",
        "Unix timestamp of the bot start time."
    );
    metrics::gauge!(
        "nestbot_start_time_seconds",
        std::time::UNIX_EPOCH.elapsed().unwrap_or_default().as_secs_f64(),
    );

    metrics::describe_gauge!(
        "nestbot_build_info",
        "A metric with a constant '1' value with the nestbot build information."
    );
    metrics::gauge!(
        "nestbot_build_info",
        1.0,
        "revision" => crate::version(),
    );
}

/// Refresh database-derived gauges. Called periodically from a
/// background task.
#[allow(clippy::cast_precision_loss)] // Rounding errors are fine here.
pub fn refresh(conn: &mut SqliteConnection, db_path: &str) {
    use crate::schema::{listings, users};

    let active_listings = listings::table
        .filter(listings::status.eq(ListingStatus::Active))
        .count()
        .get_result::<i64>(conn)
        .unwrap_or_default() as f64;
    metrics::describe_gauge!(
        "nestbot_active_listings",
        "Number of active listings."
    );
    metrics::gauge!("nestbot_active_listings", active_listings);

    let user_count = users::table
        .count()
        .get_result::<i64>(conn)
        .unwrap_or_default() as f64;
    metrics::describe_gauge!("nestbot_users", "Number of known users.");
    metrics::gauge!("nestbot_users", user_count);

    let db_size =
        std::fs::metadata(db_path).map(|m| m.len()).unwrap_or_default() as f64;
    metrics::describe_gauge!(
        "nestbot_db_size_bytes",
        "Size of the database file in bytes."
    );
    metrics::gauge!("nestbot_db_size_bytes", db_size);
}

pub fn update_service(name: &'static str, success: bool) {
    metrics::gauge!(
        "nestbot_service_access_success",
        if success { 1.0 } else { 0.0 },
        "service" => name,
    );
    metrics::gauge!(
        "nestbot_service_last_access_timestamp_seconds",
        std::time::UNIX_EPOCH.elapsed().unwrap_or_default().as_secs_f64(),
        "service" => name,
        "status" => if success { "success" } else { "failure" },
    );
}
