use async_trait::async_trait;
use geo::Point;
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{SurveyError, Upstream};
use crate::geo_utils::path_length;
use crate::navigation::{Branch, NavigationTable, Road, group_roads};
use crate::store::WayStore;

/// A directed road segment as persisted in the way table
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Way {
    pub id: i32,
    pub external_id: i64,
    pub name: String,
    pub node_start: i64,
    pub node_end: i64,
    /// Length in meters, computed from the geometry when the way was created
    pub length: f64,
    pub geometry: Vec<Point<f64>>,
    /// Reserved, never set by the current sources
    pub is_one_way: bool,
}

/// A way fetched from the road-geometry source that has no internal id yet
#[derive(Clone, Debug, PartialEq)]
pub struct NewWay {
    pub external_id: i64,
    pub name: String,
    pub node_start: i64,
    pub node_end: i64,
    pub length: f64,
    pub geometry: Vec<Point<f64>>,
    pub is_one_way: bool,
}

impl NewWay {
    pub fn new(
        external_id: i64,
        name: String,
        node_start: i64,
        node_end: i64,
        geometry: Vec<Point<f64>>,
    ) -> Self {
        Self {
            external_id,
            name,
            node_start,
            node_end,
            length: path_length(&geometry),
            geometry,
            is_one_way: false,
        }
    }
}

/// Source of connected road geometry, keyed by external way id
#[async_trait]
pub trait GeometrySource: Send + Sync {
    /// Fetch every way of the road the seed way belongs to, seed included
    async fn connected_ways(&self, external_id: i64) -> Result<Vec<NewWay>, SurveyError>;
}

/// Resolves external way ids to persisted ways, fetching and storing
/// missing roads from the geometry source on demand
pub struct RoadNetworkBuilder {
    ways: Arc<dyn WayStore>,
    source: Arc<dyn GeometrySource>,
    fetch_timeout: Duration,
}

impl RoadNetworkBuilder {
    pub fn new(
        ways: Arc<dyn WayStore>,
        source: Arc<dyn GeometrySource>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            ways,
            source,
            fetch_timeout,
        }
    }

    /// Look a way up by external id, creating its whole road if it is unknown
    pub async fn get_or_create_way(&self, external_id: i64) -> Result<Way, SurveyError> {
        if let Some(way) = self.ways.find_by_external_id(external_id).await? {
            debug!("Way {} already stored as {}", external_id, way.id);
            return Ok(way);
        }

        info!("Way {} not stored yet, fetching connected road", external_id);
        let fetched =
            match tokio::time::timeout(self.fetch_timeout, self.source.connected_ways(external_id))
                .await
            {
                Ok(result) => result?,
                Err(_) => {
                    warn!(
                        "Road-geometry fetch for way {} exceeded {:?}",
                        external_id, self.fetch_timeout
                    );
                    return Err(SurveyError::UpstreamTimeout {
                        service: Upstream::RoadGeometry,
                        subject: external_id.to_string(),
                    });
                }
            };

        if fetched.is_empty() {
            return Err(SurveyError::NotFound { external_id });
        }

        let stored = self.ways.upsert_ways(&fetched).await?;
        info!(
            "Stored {} ways of the road connected to way {}",
            stored.len(),
            external_id
        );

        stored
            .into_iter()
            .find(|way| way.external_id == external_id)
            .ok_or(SurveyError::NotFound { external_id })
    }

    /// Resolve ids one after another, preserving order.
    ///
    /// Sequential on purpose: a later id is often part of the road an earlier
    /// id already brought in, so it is found in storage. The first failure
    /// aborts the batch.
    pub async fn get_or_create_ways(&self, external_ids: &[i64]) -> Result<Vec<Way>, SurveyError> {
        let mut ways = Vec::with_capacity(external_ids.len());
        for &external_id in external_ids {
            ways.push(self.get_or_create_way(external_id).await?);
        }
        Ok(ways)
    }

    /// All stored ways grouped into named roads
    pub async fn roads_grouped_by_name(&self) -> Result<Vec<Road>, SurveyError> {
        let ways = self.ways.all_ways().await?;
        debug!("Grouping {} ways into roads", ways.len());
        Ok(group_roads(ways))
    }

    /// Longest branch starting at a stored way, walking ways of the same name
    pub async fn longest_branch(&self, way_id: i32) -> Result<Branch, SurveyError> {
        let start = self
            .ways
            .find_by_id(way_id)
            .await?
            .ok_or_else(|| SurveyError::InvalidInput(format!("no way with id {}", way_id)))?;

        let road: Vec<Way> = self
            .ways
            .all_ways()
            .await?
            .into_iter()
            .filter(|way| way.name == start.name)
            .collect();

        Ok(NavigationTable::new(road).longest_branch(way_id))
    }
}
