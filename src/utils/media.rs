//! On-disk cache for listing photos, keyed by the md5 of the source URL.
//!
//! Remote photo hosts expire images; a confirmed-dead URL is reported
//! separately so the caller can retire the listing instead of retrying
//! forever.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::StatusCode;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub enum MediaOutcome {
    /// Photo bytes are available at this path.
    Cached(PathBuf),
    /// The remote side says the file is gone for good.
    Dead,
    /// Transient failure; caller should degrade to a plain link.
    Unavailable,
}

pub async fn cached_photo(
    client: &reqwest::Client,
    cache_dir: &Path,
    url: &str,
) -> MediaOutcome {
    let name = format!("{:x}.jpg", md5::compute(url.as_bytes()));
    let path = cache_dir.join(name);
    if tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return MediaOutcome::Cached(path);
    }

    let resp = match client.get(url).timeout(FETCH_TIMEOUT).send().await {
        Ok(resp) => resp,
        Err(e) => {
            log::warn!("photo fetch failed for {url}: {e}");
            return MediaOutcome::Unavailable;
        }
    };

    match resp.status() {
        StatusCode::NOT_FOUND | StatusCode::GONE => return MediaOutcome::Dead,
        s if !s.is_success() => {
            log::warn!("photo fetch for {url} returned {s}");
            return MediaOutcome::Unavailable;
        }
        _ => (),
    }

    let bytes = match resp.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            log::warn!("photo body read failed for {url}: {e}");
            return MediaOutcome::Unavailable;
        }
    };

    if tokio::fs::create_dir_all(cache_dir).await.is_err()
        || tokio::fs::write(&path, &bytes).await.is_err()
    {
        log::warn!("photo cache write failed for {}", path.display());
        return MediaOutcome::Unavailable;
    }
    MediaOutcome::Cached(path)
}
