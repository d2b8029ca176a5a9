//! Reverse geocoding: coordinates → place names.
//!
//! The network lookup itself sits behind the [`Geocoder`] trait; the
//! production implementation is [`NominatimGeocoder`]. [`GeoResolver`] wraps
//! a geocoder with the three behaviors the organizer relies on:
//!
//! - **Bucketed cache.** Coordinates are rounded to `precision` decimals
//!   (2 ≈ 1 km) and every lookup result, including "not found", is cached
//!   per bucket. A burst of photos from the same spot costs one request.
//! - **Coalescing.** Each bucket owns a `OnceLock`. When several workers miss
//!   the same bucket at once, exactly one runs the request and the rest block
//!   on the lock until its result lands.
//! - **Rate limiting.** Outbound requests are spaced at least `min_interval`
//!   apart, which is what Nominatim's usage policy asks for.
//!
//! Failures never abort a run: they become [`GeoLookup::Unavailable`] and
//! the location placeholders render empty.

use crate::config::GeolocationConfig;
use crate::types::GeoPlace;
use log::{debug, warn};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GeoError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Geocoder returned an unexpected response: {0}")]
    Response(String),
}

/// Reverse geocoding capability.
pub trait Geocoder: Send + Sync {
    /// Resolve coordinates to a place. `Ok(None)` means the service answered
    /// but knows no place there.
    fn reverse_geocode(&self, latitude: f64, longitude: f64) -> Result<Option<GeoPlace>, GeoError>;
}

/// Reverse geocoder backed by an OpenStreetMap Nominatim endpoint.
pub struct NominatimGeocoder {
    client: reqwest::blocking::Client,
    base_url: String,
    language: &'static str,
}

const USER_AGENT: &str = concat!("mediasort/", env!("CARGO_PKG_VERSION"));

impl NominatimGeocoder {
    pub fn new(config: &GeolocationConfig) -> Result<Self, GeoError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            language: if config.prefer_english_names { "en" } else { "" },
        })
    }
}

#[derive(Debug, Deserialize)]
struct NominatimResponse {
    #[serde(default)]
    address: Option<NominatimAddress>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct NominatimAddress {
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    state: Option<String>,
    country: Option<String>,
}

impl NominatimAddress {
    fn into_place(self) -> Option<GeoPlace> {
        let city = self.city.or(self.town).or(self.village);
        let location = city
            .clone()
            .or_else(|| self.state.clone())
            .or_else(|| self.country.clone());
        let place = GeoPlace {
            country: self.country,
            state: self.state,
            city,
            location,
        };
        (!place.is_empty()).then_some(place)
    }
}

impl Geocoder for NominatimGeocoder {
    fn reverse_geocode(&self, latitude: f64, longitude: f64) -> Result<Option<GeoPlace>, GeoError> {
        let url = format!("{}/reverse", self.base_url);
        let mut request = self.client.get(&url).query(&[
            ("format", "jsonv2".to_string()),
            ("lat", latitude.to_string()),
            ("lon", longitude.to_string()),
        ]);
        if !self.language.is_empty() {
            request = request.header("Accept-Language", self.language);
        }
        let response = request.send()?.error_for_status()?;
        let body: NominatimResponse = response.json()?;
        if let Some(message) = body.error {
            debug!("nominatim has no place at {latitude},{longitude}: {message}");
            return Ok(None);
        }
        match body.address {
            Some(address) => Ok(address.into_place()),
            None => Err(GeoError::Response("missing address".into())),
        }
    }
}

/// Rounded-coordinate cache bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeoKey {
    lat: i64,
    lon: i64,
    precision: u32,
}

impl GeoKey {
    pub fn new(latitude: f64, longitude: f64, precision: u32) -> Self {
        let scale = 10f64.powi(precision as i32);
        Self {
            lat: (latitude * scale).round() as i64,
            lon: (longitude * scale).round() as i64,
            precision,
        }
    }

    /// Bucket center, used when the request goes out.
    fn center(&self) -> (f64, f64) {
        let scale = 10f64.powi(self.precision as i32);
        (self.lat as f64 / scale, self.lon as f64 / scale)
    }

    /// Stable string form for persistence: `"48.86,2.35"`.
    pub fn to_key_string(&self) -> String {
        let (lat, lon) = self.center();
        let p = self.precision as usize;
        format!("{lat:.p$},{lon:.p$}")
    }

    pub fn parse(key: &str, precision: u32) -> Option<Self> {
        let (lat, lon) = key.split_once(',')?;
        Some(Self::new(lat.trim().parse().ok()?, lon.trim().parse().ok()?, precision))
    }
}

/// Outcome of a cached lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum GeoLookup {
    Found(GeoPlace),
    /// The service answered but has no place for the bucket.
    NotFound,
    /// The request failed; location fields fall back to empty.
    Unavailable,
}

/// Caching, coalescing, rate-limited front of a [`Geocoder`].
pub struct GeoResolver {
    geocoder: Arc<dyn Geocoder>,
    precision: u32,
    min_interval: Duration,
    cache: Mutex<HashMap<GeoKey, Arc<OnceLock<GeoLookup>>>>,
    next_slot: Mutex<Option<Instant>>,
    requests: AtomicUsize,
}

impl GeoResolver {
    pub fn new(geocoder: Arc<dyn Geocoder>, precision: u32, min_interval: Duration) -> Self {
        Self {
            geocoder,
            precision,
            min_interval,
            cache: Mutex::new(HashMap::new()),
            next_slot: Mutex::new(None),
            requests: AtomicUsize::new(0),
        }
    }

    pub fn from_config(geocoder: Arc<dyn Geocoder>, config: &GeolocationConfig) -> Self {
        Self::new(
            geocoder,
            config.precision,
            Duration::from_millis(config.min_interval_ms),
        )
    }

    pub fn key(&self, latitude: f64, longitude: f64) -> GeoKey {
        GeoKey::new(latitude, longitude, self.precision)
    }

    /// Resolve coordinates, going to the network at most once per bucket.
    pub fn lookup(&self, latitude: f64, longitude: f64) -> GeoLookup {
        let key = self.key(latitude, longitude);
        let cell = {
            let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(cache.entry(key).or_default())
        };
        // The cache lock is released here; only callers of this bucket wait.
        cell.get_or_init(|| self.request(key)).clone()
    }

    fn request(&self, key: GeoKey) -> GeoLookup {
        self.throttle();
        self.requests.fetch_add(1, Ordering::SeqCst);
        let (lat, lon) = key.center();
        match self.geocoder.reverse_geocode(lat, lon) {
            Ok(Some(place)) => GeoLookup::Found(place),
            Ok(None) => GeoLookup::NotFound,
            Err(e) => {
                warn!("geocoding {lat},{lon} unavailable: {e}");
                GeoLookup::Unavailable
            }
        }
    }

    fn throttle(&self) {
        if self.min_interval.is_zero() {
            return;
        }
        let wait = {
            let mut next = self.next_slot.lock().unwrap_or_else(PoisonError::into_inner);
            let now = Instant::now();
            let slot = next.map_or(now, |n| n.max(now));
            *next = Some(slot + self.min_interval);
            slot - now
        };
        if !wait.is_zero() {
            thread::sleep(wait);
        }
    }

    /// Pre-populate the cache from persisted places.
    pub fn seed<'a>(&self, places: impl IntoIterator<Item = (&'a String, &'a GeoPlace)>) {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        for (key, place) in places {
            let Some(key) = GeoKey::parse(key, self.precision) else {
                continue;
            };
            let cell = OnceLock::new();
            let _ = cell.set(GeoLookup::Found(place.clone()));
            cache.insert(key, Arc::new(cell));
        }
    }

    /// Every bucket that resolved to a place, for persistence.
    pub fn resolved_places(&self) -> Vec<(String, GeoPlace)> {
        let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        let mut places: Vec<_> = cache
            .iter()
            .filter_map(|(key, cell)| match cell.get() {
                Some(GeoLookup::Found(place)) => Some((key.to_key_string(), place.clone())),
                _ => None,
            })
            .collect();
        places.sort_by(|a, b| a.0.cmp(&b.0));
        places
    }

    /// Number of outbound geocoder requests made so far.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}
