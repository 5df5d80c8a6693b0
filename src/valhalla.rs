use async_trait::async_trait;
use geo::Point;
use log::{debug, warn};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

use crate::config::MatchingConfig;
use crate::error::{SurveyError, Upstream};

/// Attributes requested from `trace_attributes`, nothing else is returned
const TRACE_ATTRIBUTES: [&str; 9] = [
    "edge.way_id",
    "edge.length",
    "edge.begin_shape_index",
    "edge.end_shape_index",
    "matched.point",
    "matched.type",
    "matched.edge_index",
    "matched.distance_along_edge",
    "shape",
];

/// Raw `trace_attributes` response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TraceAttributes {
    /// Matched route, encoded polyline with precision 6
    #[serde(default)]
    pub shape: Option<String>,
    #[serde(default)]
    pub edges: Vec<TraceEdge>,
    #[serde(default)]
    pub matched_points: Vec<TraceMatchedPoint>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_code: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TraceEdge {
    pub way_id: Option<u64>,
    /// Kilometers
    pub length: Option<f64>,
    pub begin_shape_index: Option<usize>,
    pub end_shape_index: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TraceMatchedPoint {
    pub lat: f64,
    pub lon: f64,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub edge_index: Option<u64>,
    pub distance_along_edge: Option<f64>,
}

/// A service that snaps an ordered GPS trace onto the road graph
#[async_trait]
pub trait MatchingService: Send + Sync {
    /// `subject` identifies the trace in errors and logs
    async fn trace_attributes(
        &self,
        subject: &str,
        points: &[Point<f64>],
    ) -> Result<TraceAttributes, SurveyError>;
}

/// HTTP client for a Valhalla server
pub struct ValhallaClient {
    client: Client,
    endpoint: String,
    costing: String,
}

impl ValhallaClient {
    pub fn new(config: &MatchingConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/trace_attributes", config.valhalla_url.trim_end_matches('/')),
            costing: config.costing.clone(),
        })
    }

    fn request_body(&self, points: &[Point<f64>]) -> Value {
        trace_request_body(points, &self.costing)
    }
}

pub(crate) fn trace_request_body(points: &[Point<f64>], costing: &str) -> Value {
    let shape: Vec<Value> = points
        .iter()
        .map(|p| json!({ "lat": p.y(), "lon": p.x() }))
        .collect();

    json!({
        "shape": shape,
        "costing": costing,
        "shape_match": "map_snap",
        "filters": {
            "attributes": TRACE_ATTRIBUTES,
            "action": "include"
        }
    })
}

fn transport_error(subject: &str, err: reqwest::Error) -> SurveyError {
    if err.is_timeout() {
        SurveyError::UpstreamTimeout {
            service: Upstream::MapMatching,
            subject: subject.to_string(),
        }
    } else {
        SurveyError::upstream(Upstream::MapMatching, subject, err)
    }
}

#[async_trait]
impl MatchingService for ValhallaClient {
    async fn trace_attributes(
        &self,
        subject: &str,
        points: &[Point<f64>],
    ) -> Result<TraceAttributes, SurveyError> {
        debug!(
            "Requesting trace attributes for {} with {} points",
            subject,
            points.len()
        );

        let response = self
            .client
            .post(&self.endpoint)
            .json(&self.request_body(points))
            .send()
            .await
            .map_err(|e| transport_error(subject, e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(subject, e))?;
        parse_trace_response(subject, status, &body)
    }
}

/// Turn the status and body of a `trace_attributes` reply into a response
pub(crate) fn parse_trace_response(
    subject: &str,
    status: StatusCode,
    body: &str,
) -> Result<TraceAttributes, SurveyError> {
    if !status.is_success() {
        // Valhalla explains rejected traces in the body
        warn!("Map matching for {} returned {}: {}", subject, status, body);
        return Err(SurveyError::upstream(
            Upstream::MapMatching,
            subject,
            format!("HTTP {}: {}", status, body),
        ));
    }

    serde_json::from_str(body).map_err(|e| {
        SurveyError::upstream(
            Upstream::MapMatching,
            subject,
            format!("unreadable response: {}", e),
        )
    })
}
