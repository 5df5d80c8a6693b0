use log::{error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::distributor::distribute;
use crate::error::SurveyError;
use crate::map_matcher::{MapMatcher, MatchResult};
use crate::road_network::{RoadNetworkBuilder, Way};
use crate::store::SurveyStore;
use crate::survey::{Survey, SurveyBatch};

/// Everything produced while matching one survey
pub struct SurveyContext {
    pub survey: Survey,
    pub matched: MatchResult,
    /// Resolved ways keyed by external id
    pub ways: HashMap<i64, Way>,
    pub batch: SurveyBatch,
}

impl SurveyContext {
    pub fn is_matched(&self) -> bool {
        !self.matched.is_empty()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ImportSummary {
    pub matched: bool,
    pub ways: usize,
    pub measurements: usize,
    pub measurements_tagged: usize,
    pub images: usize,
    pub images_tagged: usize,
}

/// Matches surveys onto the road network and persists the tagged result
pub struct SurveyPipeline {
    matcher: MapMatcher,
    network: Arc<RoadNetworkBuilder>,
    store: Arc<dyn SurveyStore>,
}

impl SurveyPipeline {
    pub fn new(
        matcher: MapMatcher,
        network: Arc<RoadNetworkBuilder>,
        store: Arc<dyn SurveyStore>,
    ) -> Self {
        Self {
            matcher,
            network,
            store,
        }
    }

    /// Snap the survey trace, make sure every matched way exists and tag the
    /// data points. Matching failures are logged and leave the data untagged.
    pub async fn match_and_distribute(&self, survey: Survey, mut batch: SurveyBatch) -> SurveyContext {
        batch.sort_by_distance();
        let subject = survey.id.to_string();

        let matched = match self.matcher.match_trace(&subject, &survey.coordinates()).await {
            Ok(matched) => matched,
            Err(e) => {
                warn!("Survey {} ({}) left unmatched: {}", survey.title, subject, e);
                MatchResult::default()
            }
        };

        let ways = self.resolve_ways(&matched).await;

        let measurements = distribute(&survey.trace, &mut batch.measurements, &matched, &ways);
        let images = distribute(&survey.trace, &mut batch.images, &matched, &ways);
        info!(
            "Survey {}: tagged {}/{} measurements and {}/{} images on {} ways",
            survey.title,
            measurements,
            batch.measurements.len(),
            images,
            batch.images.len(),
            ways.len()
        );

        SurveyContext {
            survey,
            matched,
            ways,
            batch,
        }
    }

    async fn resolve_ways(&self, matched: &MatchResult) -> HashMap<i64, Way> {
        let ids = matched.way_external_ids();
        if ids.is_empty() {
            return HashMap::new();
        }

        match self.network.get_or_create_ways(&ids).await {
            Ok(ways) => ways.into_iter().map(|w| (w.external_id, w)).collect(),
            Err(e) => {
                // The batch is all or nothing, retry way by way to keep what resolves
                warn!("Resolving {} ways failed ({}), retrying one by one", ids.len(), e);
                let failed = e.failed_way();
                let mut ways = HashMap::new();
                for id in ids {
                    if Some(id) == failed {
                        continue;
                    }
                    match self.network.get_or_create_way(id).await {
                        Ok(way) => {
                            ways.insert(id, way);
                        }
                        Err(e) => warn!("Skipping way {}: {}", id, e),
                    }
                }
                ways
            }
        }
    }

    /// Match, distribute and persist one survey
    pub async fn import_survey(
        &self,
        survey: Survey,
        batch: SurveyBatch,
    ) -> Result<ImportSummary, SurveyError> {
        let start_time = Instant::now();
        let context = self.match_and_distribute(survey, batch).await;
        let survey_id = context.survey.id;
        let matched = context.is_matched();

        self.store.insert_survey(&context.survey, matched).await?;

        let (measurements, images) = tokio::try_join!(
            self.store
                .insert_measurements(survey_id, &context.batch.measurements),
            self.store.insert_images(survey_id, &context.batch.images),
        )
        .inspect_err(|e| error!("Persisting data of survey {} failed: {}", survey_id, e))?;

        let (measurements_tagged, images_tagged) = context.batch.tagged_counts();
        info!(
            "Imported survey {} in {:.2?}",
            context.survey.title,
            start_time.elapsed()
        );

        Ok(ImportSummary {
            matched,
            ways: context.ways.len(),
            measurements,
            measurements_tagged,
            images,
            images_tagged,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_utils::haversine_distance_meters;
    use crate::survey::{SurveyData, SurveyImage, TracePoint};
    use crate::testing::{
        InMemorySurveyStore, InMemoryWayStore, StubGeometrySource, StubMatchingService, new_way,
        trace_response,
    };
    use crate::valhalla::MatchingService;
    use chrono::DateTime;
    use geo::Point;
    use std::time::Duration;

    const COORDS: [(f64, f64); 3] = [(12.55, 55.70), (12.552, 55.701), (12.554, 55.702)];

    fn survey() -> Survey {
        let points: Vec<Point<f64>> = COORDS.iter().map(|&(x, y)| Point::new(x, y)).collect();
        let mut distance = 0.0;
        let trace = points
            .iter()
            .enumerate()
            .map(|(i, p)| {
                if i > 0 {
                    distance += haversine_distance_meters(points[i - 1], *p);
                }
                TracePoint {
                    distance_survey: distance,
                    coordinate: *p,
                }
            })
            .collect();

        Survey::new(
            "Harbour loop".to_string(),
            DateTime::parse_from_rfc3339("2024-05-01T08:00:00+02:00").unwrap(),
            trace,
        )
    }

    fn batch() -> SurveyBatch {
        SurveyBatch {
            // Out of order on purpose
            measurements: [20.0, 0.0, 10.0]
                .iter()
                .map(|d| SurveyData {
                    distance_survey: *d,
                    kind: "iri".to_string(),
                    value: 2.5,
                    tag: None,
                })
                .collect(),
            images: vec![SurveyImage {
                distance_survey: 5.0,
                file_name: "0001.jpg".to_string(),
                tag: None,
            }],
        }
    }

    struct Fixture {
        pipeline: SurveyPipeline,
        ways: Arc<InMemoryWayStore>,
        surveys: Arc<InMemorySurveyStore>,
        source: Arc<StubGeometrySource>,
    }

    fn fixture(service: Arc<dyn MatchingService>) -> Fixture {
        let ways = Arc::new(InMemoryWayStore::default());
        let surveys = Arc::new(InMemorySurveyStore::default());
        let source = Arc::new(StubGeometrySource::with_road(
            42,
            vec![new_way(42, "Harbour Road", 1, 2, &COORDS)],
        ));
        let network = Arc::new(RoadNetworkBuilder::new(
            ways.clone(),
            source.clone(),
            Duration::from_secs(5),
        ));
        let pipeline = SurveyPipeline::new(
            MapMatcher::new(service, Duration::from_secs(5)),
            network,
            surveys.clone(),
        );

        Fixture {
            pipeline,
            ways,
            surveys,
            source,
        }
    }

    fn matched_service() -> Arc<dyn MatchingService> {
        let points: Vec<Point<f64>> = COORDS.iter().map(|&(x, y)| Point::new(x, y)).collect();
        Arc::new(StubMatchingService::responding(trace_response(
            &points,
            42,
            0.05,
            &[0.0, 0.5, 1.0],
        )))
    }

    #[tokio::test]
    async fn three_point_trace_tags_everything_on_way_42() {
        let fixture = fixture(matched_service());

        let context = fixture.pipeline.match_and_distribute(survey(), batch()).await;
        assert!(context.is_matched());
        assert_eq!(context.matched.edges[0].way_external_id, 42);
        assert!((context.matched.edges[0].length_meters - 50.0).abs() < 1e-9);

        let way = &context.ways[&42];
        let distances: Vec<f64> = context
            .batch
            .measurements
            .iter()
            .map(|m| m.distance_survey)
            .collect();
        assert_eq!(distances, vec![0.0, 10.0, 20.0]);

        let mut previous = f64::MIN;
        for m in &context.batch.measurements {
            let tag = m.tag.expect("measurement tagged");
            assert_eq!(tag.way_id, way.id);
            assert!(tag.distance_way >= previous);
            previous = tag.distance_way;
        }
        assert_eq!(context.batch.images[0].tag.map(|t| t.way_id), Some(way.id));
        assert_eq!(fixture.source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn import_persists_tagged_rows() {
        let fixture = fixture(matched_service());

        let summary = fixture.pipeline.import_survey(survey(), batch()).await.unwrap();
        assert_eq!(
            summary,
            ImportSummary {
                matched: true,
                ways: 1,
                measurements: 3,
                measurements_tagged: 3,
                images: 1,
                images_tagged: 1,
            }
        );

        let surveys = fixture.surveys.surveys.lock().unwrap();
        assert_eq!(surveys.len(), 1);
        assert!(surveys[0].1);
        let survey_id = surveys[0].0.id;
        assert!(
            fixture
                .surveys
                .measurements
                .lock()
                .unwrap()
                .iter()
                .all(|(id, m)| *id == survey_id && m.tag.is_some())
        );
        assert_eq!(fixture.ways.len(), 1);
    }

    #[tokio::test]
    async fn second_import_reuses_stored_ways() {
        let fixture = fixture(matched_service());

        fixture.pipeline.import_survey(survey(), batch()).await.unwrap();
        fixture.pipeline.import_survey(survey(), batch()).await.unwrap();

        assert_eq!(fixture.source.fetch_count(), 1);
        assert_eq!(fixture.ways.len(), 1);
        assert_eq!(fixture.surveys.surveys.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failed_matching_is_persisted_untagged() {
        let fixture = fixture(Arc::new(StubMatchingService::failing()));

        let summary = fixture.pipeline.import_survey(survey(), batch()).await.unwrap();
        assert!(!summary.matched);
        assert_eq!(summary.measurements, 3);
        assert_eq!(summary.measurements_tagged, 0);
        assert_eq!(summary.images_tagged, 0);
        assert!(!fixture.surveys.surveys.lock().unwrap()[0].1);
        assert_eq!(fixture.source.fetch_count(), 0);
    }

    #[tokio::test]
    async fn unknown_way_only_untags_its_own_points() {
        let points: Vec<Point<f64>> = COORDS.iter().map(|&(x, y)| Point::new(x, y)).collect();
        let mut response = trace_response(&points, 42, 0.05, &[0.0, 0.5, 1.0]);
        let mut second = response.edges[0].clone();
        second.way_id = Some(999);
        response.edges.push(second);
        response.matched_points[2].edge_index = Some(1);

        let survey = survey();
        let mut batch = batch();
        batch.measurements[0].distance_survey = survey.distance_meters();

        let fixture = fixture(Arc::new(StubMatchingService::responding(response)));
        let context = fixture.pipeline.match_and_distribute(survey, batch).await;

        assert_eq!(context.ways.len(), 1);
        let tagged: Vec<bool> = context
            .batch
            .measurements
            .iter()
            .map(|m| m.tag.is_some())
            .collect();
        assert_eq!(tagged, vec![true, true, false]);
        // 42 and 999 fetched once each, the retry does not ask for 999 again
        assert_eq!(fixture.source.fetch_count(), 2);
    }
}
