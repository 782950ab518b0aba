use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;

use super::{GeoError, GeoService, RouteSummary};
use crate::models::Coordinates;

#[derive(Debug, Deserialize)]
struct GeocodingResponse {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    /// `[longitude, latitude]`
    center: [f64; 2],
}

#[derive(Debug, Deserialize)]
struct DirectionsResponse {
    #[serde(default)]
    routes: Vec<Route>,
}

#[derive(Debug, Deserialize)]
struct Route {
    distance: f64,
    duration: f64,
}

/// Mapbox geocoding and driving-directions client.
#[derive(Debug, Clone)]
pub struct MapboxClient {
    http: reqwest::Client,
    base_url: Url,
    token: String,
}

impl MapboxClient {
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self, GeoError> {
        let base_url = Url::parse(base_url).map_err(|e| GeoError::Url(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(GeoError::Url(format!("{} cannot be a base url", base_url)));
        }

        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            token: token.into(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, GeoError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| GeoError::Url(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        url.query_pairs_mut().append_pair("access_token", &self.token);
        Ok(url)
    }

    fn geocoding_url(&self, address: &str) -> Result<Url, GeoError> {
        let query = format!("{}.json", address);
        self.endpoint(&["geocoding", "v5", "mapbox.places", &query])
    }

    fn directions_url(&self, origin: Coordinates, destination: Coordinates) -> Result<Url, GeoError> {
        let waypoints = format!(
            "{},{};{},{}",
            origin.longitude, origin.latitude, destination.longitude, destination.latitude
        );
        self.endpoint(&["directions", "v5", "mapbox", "driving", &waypoints])
    }

    async fn get_json<T>(&self, url: Url) -> Result<T, GeoError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let response = self.http.get(url).send().await?.error_for_status()?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl GeoService for MapboxClient {
    async fn geocode(&self, address: &str) -> Result<Vec<Coordinates>, GeoError> {
        let body: GeocodingResponse = self.get_json(self.geocoding_url(address)?).await?;
        Ok(body
            .features
            .into_iter()
            .map(|feature| Coordinates::new(feature.center[1], feature.center[0]))
            .collect())
    }

    async fn route(
        &self,
        origin: Coordinates,
        destination: Coordinates,
    ) -> Result<Vec<RouteSummary>, GeoError> {
        let body: DirectionsResponse = self
            .get_json(self.directions_url(origin, destination)?)
            .await?;
        Ok(body
            .routes
            .into_iter()
            .map(|route| RouteSummary {
                distance_meters: route.distance,
                duration_seconds: route.duration,
            })
            .collect())
    }
}
