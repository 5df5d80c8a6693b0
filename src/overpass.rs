use async_trait::async_trait;
use geo::Point;
use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::config::GeometrySourceConfig;
use crate::error::{SurveyError, Upstream};
use crate::road_network::{GeometrySource, NewWay};

#[derive(Debug, Deserialize)]
struct OverpassResponse {
    #[serde(default)]
    elements: Vec<Element>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub(crate) enum Element {
    Node {
        id: i64,
        lat: f64,
        lon: f64,
    },
    Way {
        id: i64,
        #[serde(default)]
        nodes: Vec<i64>,
        #[serde(default)]
        tags: HashMap<String, String>,
    },
    #[serde(other)]
    Other,
}

/// Road geometry from an Overpass API instance
pub struct OverpassClient {
    client: Client,
    endpoint: String,
    search_radius_meters: f64,
    server_timeout: Duration,
}

impl OverpassClient {
    pub fn new(config: &GeometrySourceConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(config.request_timeout())
            .user_agent(concat!("pavemap/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.overpass_url.clone(),
            search_radius_meters: config.search_radius_meters,
            server_timeout: config.server_timeout,
        })
    }

    fn query(&self, external_id: i64) -> String {
        connected_ways_query(external_id, self.search_radius_meters, self.server_timeout)
    }
}

/// Seed way plus every highway around it, with the nodes of all of them
pub(crate) fn connected_ways_query(external_id: i64, radius_meters: f64, timeout: Duration) -> String {
    format!(
        "[out:json][timeout:{}];way({})->.seed;way(around.seed:{})[highway]->.near;(.seed;.near;);(._;>;);out body;",
        timeout.as_secs(),
        external_id,
        radius_meters.round() as i64
    )
}

/// Build ways from raw elements, keeping the seed and the ways sharing its name.
///
/// Ways with fewer than two resolvable nodes are dropped. Returns an empty
/// list when the seed itself is not among the elements.
pub(crate) fn ways_from_elements(seed: i64, elements: &[Element]) -> Vec<NewWay> {
    let nodes: HashMap<i64, Point<f64>> = elements
        .iter()
        .filter_map(|element| match element {
            Element::Node { id, lat, lon } => Some((*id, Point::new(*lon, *lat))),
            _ => None,
        })
        .collect();

    let seed_name = elements.iter().find_map(|element| match element {
        Element::Way { id, tags, .. } if *id == seed => {
            Some(tags.get("name").cloned().unwrap_or_default())
        }
        _ => None,
    });
    let Some(seed_name) = seed_name else {
        return Vec::new();
    };

    let mut ways = Vec::new();
    for element in elements {
        let Element::Way { id, nodes: node_ids, tags } = element else {
            continue;
        };

        let name = tags.get("name").cloned().unwrap_or_default();
        let same_road = *id == seed || (!seed_name.is_empty() && name == seed_name);
        if !same_road || ways.iter().any(|w: &NewWay| w.external_id == *id) {
            continue;
        }

        let geometry: Vec<Point<f64>> = node_ids
            .iter()
            .filter_map(|node| nodes.get(node).copied())
            .collect();
        if geometry.len() < 2 {
            debug!("Way {} has {} resolvable nodes, skipping", id, geometry.len());
            continue;
        }

        let (Some(&node_start), Some(&node_end)) = (node_ids.first(), node_ids.last()) else {
            continue;
        };
        ways.push(NewWay::new(*id, name, node_start, node_end, geometry));
    }

    ways
}

/// Elements of an Overpass reply, non-success statuses become upstream errors
pub(crate) fn parse_overpass_response(
    external_id: i64,
    status: StatusCode,
    body: &str,
) -> Result<Vec<Element>, SurveyError> {
    if !status.is_success() {
        warn!("Overpass returned {} for way {}", status, external_id);
        return Err(SurveyError::upstream(
            Upstream::RoadGeometry,
            external_id,
            format!("HTTP {}", status),
        ));
    }

    serde_json::from_str::<OverpassResponse>(body)
        .map(|data| data.elements)
        .map_err(|e| {
            SurveyError::upstream(
                Upstream::RoadGeometry,
                external_id,
                format!("unreadable response: {}", e),
            )
        })
}

fn transport_error(external_id: i64, err: reqwest::Error) -> SurveyError {
    if err.is_timeout() {
        SurveyError::UpstreamTimeout {
            service: Upstream::RoadGeometry,
            subject: external_id.to_string(),
        }
    } else {
        SurveyError::upstream(Upstream::RoadGeometry, external_id, err)
    }
}

#[async_trait]
impl GeometrySource for OverpassClient {
    async fn connected_ways(&self, external_id: i64) -> Result<Vec<NewWay>, SurveyError> {
        let query = self.query(external_id);
        debug!("Overpass query: {}", query);

        let response = self
            .client
            .post(&self.endpoint)
            .form(&[("data", query.as_str())])
            .send()
            .await
            .map_err(|e| transport_error(external_id, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(external_id, e))?;
        let elements = parse_overpass_response(external_id, status, &body)?;

        let ways = ways_from_elements(external_id, &elements);
        info!(
            "Overpass returned {} elements, {} ways on the road of way {}",
            elements.len(),
            ways.len(),
            external_id
        );
        Ok(ways)
    }
}
