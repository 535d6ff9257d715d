//! AMap city directory scraper.
//!
//! The subway index page lists every city with a subway map in two groups:
//! popular cities (`.city-list.fl`) and the remaining cities
//! (`.more-city-list`). Each city is an anchor of the form
//!
//! ```text
//! <a id="1100" cityname="beijing">北京</a>
//! ```

use crate::api::PageFetch;
use crate::models::CityRef;
use crate::utils::random_user_agent;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use std::error::Error;
use tracing::{debug, error, info, instrument, warn};

static POPULAR_GROUP: Lazy<Selector> = Lazy::new(|| Selector::parse(".city-list.fl").unwrap());
static OTHER_GROUP: Lazy<Selector> = Lazy::new(|| Selector::parse(".more-city-list").unwrap());
static CITY_ANCHOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a").unwrap());

/// Fetch the city directory.
///
/// Issues a single GET with a random user-agent. Any network or parse
/// failure is logged and yields two empty lists, which callers treat as
/// "nothing to crawl".
///
/// # Returns
///
/// `(popular, other)` city lists in page order.
#[instrument(level = "info", skip(fetcher))]
pub async fn fetch_cities<F: PageFetch>(fetcher: &F, listing_url: &str) -> (Vec<CityRef>, Vec<CityRef>) {
    let html = match fetcher.fetch(listing_url, random_user_agent()).await {
        Ok(html) => html,
        Err(e) => {
            error!(error = %e, "Error fetching city list");
            return (Vec::new(), Vec::new());
        }
    };

    match parse_city_directory(&html) {
        Ok((popular, other)) => {
            info!(
                popular = popular.len(),
                other = other.len(),
                "Indexed AMap cities"
            );
            (popular, other)
        }
        Err(e) => {
            error!(error = %e, "Error parsing city list");
            (Vec::new(), Vec::new())
        }
    }
}

/// Extract both city groups from the index page HTML.
///
/// Only the first element of each group is read. A page missing either
/// group is rejected as a whole.
pub fn parse_city_directory(html: &str) -> Result<(Vec<CityRef>, Vec<CityRef>), Box<dyn Error>> {
    let document = Html::parse_document(html);

    let popular = document
        .select(&POPULAR_GROUP)
        .next()
        .ok_or("popular city group (.city-list.fl) not found")?;
    let other = document
        .select(&OTHER_GROUP)
        .next()
        .ok_or("other city group (.more-city-list) not found")?;

    Ok((cities_in(popular), cities_in(other)))
}

fn cities_in(group: ElementRef<'_>) -> Vec<CityRef> {
    let mut cities = Vec::new();
    for anchor in group.select(&CITY_ANCHOR) {
        let attrs = anchor.value();
        let (Some(id), Some(key)) = (attrs.attr("id"), attrs.attr("cityname")) else {
            warn!(html = %anchor.html(), "City anchor without id/cityname; skipping");
            continue;
        };
        let display_name = anchor.text().collect::<String>().trim().to_string();
        debug!(%id, %key, %display_name, "Found city");
        cities.push(CityRef {
            id: id.to_string(),
            key: key.to_string(),
            display_name,
        });
    }
    cities
}
