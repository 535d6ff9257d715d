//! AMap subway scrapers.
//!
//! Scraping follows a two-phase pattern:
//!
//! 1. **Indexing**: [`cities::fetch_cities`] reads the subway index page and
//!    lists every city that has a subway map
//! 2. **Fetching**: [`stations::fetch_stations`] downloads one city's
//!    line/station JSON and flattens it into
//!    [`StationRecord`](crate::models::StationRecord)s
//!
//! Both phases go through the [`PageFetch`](crate::api::PageFetch) seam; only
//! the per-city fetch is wrapped in retries.

pub mod cities;
pub mod stations;

use crate::models::CityRef;
use std::error::Error;
use url::Url;

/// Default AMap subway index page.
pub const DEFAULT_LISTING_URL: &str = "http://map.amap.com/subway/index.html?&1100";
/// Default AMap per-city subway data endpoint.
pub const DEFAULT_DATA_URL: &str = "http://map.amap.com/service/subway";

/// Validated endpoint pair used by a crawl.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub listing_url: Url,
    pub data_url: Url,
}

impl Endpoints {
    pub fn new(listing_url: &str, data_url: &str) -> Result<Self, Box<dyn Error>> {
        Ok(Self {
            listing_url: Url::parse(listing_url)?,
            data_url: Url::parse(data_url)?,
        })
    }

    /// The subway document URL for `city`.
    ///
    /// ```text
    /// {data_url}?_1555502190153&srhdata={id}_drw_{key}.json
    /// ```
    pub fn station_url(&self, city: &CityRef) -> String {
        let mut url = self.data_url.clone();
        url.set_query(Some(&format!(
            "_1555502190153&srhdata={}_drw_{}.json",
            city.id, city.key
        )));
        url.to_string()
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            listing_url: Url::parse(DEFAULT_LISTING_URL).expect("default listing URL is valid"),
            data_url: Url::parse(DEFAULT_DATA_URL).expect("default data URL is valid"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_station_url() {
        let city = CityRef {
            id: "1100".to_string(),
            key: "beijing".to_string(),
            display_name: "北京".to_string(),
        };
        assert_eq!(
            Endpoints::default().station_url(&city),
            "http://map.amap.com/service/subway?_1555502190153&srhdata=1100_drw_beijing.json"
        );
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        assert!(Endpoints::new("not a url", DEFAULT_DATA_URL).is_err());
    }
}
