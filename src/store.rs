use async_trait::async_trait;
use chrono::Utc;
use geo::Point;
use log::debug;
use sea_orm::ActiveValue::{NotSet, Set};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, TransactionTrait,
};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::entity::{survey_images, survey_measurements, surveys, ways};
use crate::error::SurveyError;
use crate::road_network::{NewWay, Way};
use crate::survey::{Survey, SurveyData, SurveyImage};

/// Rows per bulk insert statement
const INSERT_CHUNK_SIZE: usize = 1000;

/// Persistence of ways, keyed by the external id
#[async_trait]
pub trait WayStore: Send + Sync {
    async fn find_by_external_id(&self, external_id: i64) -> Result<Option<Way>, SurveyError>;

    async fn find_by_id(&self, id: i32) -> Result<Option<Way>, SurveyError>;

    /// Insert each way, updating in place when the external id already exists.
    /// Returns the stored rows in input order.
    async fn upsert_ways(&self, ways: &[NewWay]) -> Result<Vec<Way>, SurveyError>;

    async fn all_ways(&self) -> Result<Vec<Way>, SurveyError>;
}

/// Append-only persistence of surveys and their data points
#[async_trait]
pub trait SurveyStore: Send + Sync {
    async fn insert_survey(&self, survey: &Survey, matched: bool) -> Result<(), SurveyError>;

    async fn insert_measurements(
        &self,
        survey_id: Uuid,
        measurements: &[SurveyData],
    ) -> Result<usize, SurveyError>;

    async fn insert_images(
        &self,
        survey_id: Uuid,
        images: &[SurveyImage],
    ) -> Result<usize, SurveyError>;
}

/// PostgreSQL storage through sea-orm
#[derive(Clone, Debug)]
pub struct DatabaseStore {
    db: DatabaseConnection,
}

impl DatabaseStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

/// Geometry is stored as a JSON array of `[lon, lat]` pairs
pub(crate) fn coordinates_to_json(points: &[Point<f64>]) -> Value {
    Value::Array(points.iter().map(|p| json!([p.x(), p.y()])).collect())
}

pub(crate) fn coordinates_from_json(value: &Value) -> Result<Vec<Point<f64>>, SurveyError> {
    let pairs: Vec<[f64; 2]> = serde_json::from_value(value.clone())
        .map_err(|e| SurveyError::InvalidInput(format!("invalid stored geometry: {}", e)))?;
    Ok(pairs.into_iter().map(|[x, y]| Point::new(x, y)).collect())
}

impl TryFrom<ways::Model> for Way {
    type Error = SurveyError;

    fn try_from(model: ways::Model) -> Result<Self, Self::Error> {
        Ok(Way {
            geometry: coordinates_from_json(&model.coordinates)?,
            id: model.id,
            external_id: model.external_id,
            name: model.name,
            node_start: model.node_start,
            node_end: model.node_end,
            length: model.length,
            is_one_way: model.is_one_way,
        })
    }
}

fn way_active_model(way: &NewWay) -> ways::ActiveModel {
    ways::ActiveModel {
        id: NotSet,
        external_id: Set(way.external_id),
        name: Set(way.name.clone()),
        node_start: Set(way.node_start),
        node_end: Set(way.node_end),
        length: Set(way.length),
        coordinates: Set(coordinates_to_json(&way.geometry)),
        is_one_way: Set(way.is_one_way),
        last_modified: Set(Utc::now().into()),
    }
}

#[async_trait]
impl WayStore for DatabaseStore {
    async fn find_by_external_id(&self, external_id: i64) -> Result<Option<Way>, SurveyError> {
        ways::Entity::find()
            .filter(ways::Column::ExternalId.eq(external_id))
            .one(&self.db)
            .await?
            .map(Way::try_from)
            .transpose()
    }

    async fn find_by_id(&self, id: i32) -> Result<Option<Way>, SurveyError> {
        ways::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .map(Way::try_from)
            .transpose()
    }

    async fn upsert_ways(&self, new_ways: &[NewWay]) -> Result<Vec<Way>, SurveyError> {
        let txn = self.db.begin().await?;
        let mut stored = Vec::with_capacity(new_ways.len());

        for way in new_ways {
            let row = ways::Entity::insert(way_active_model(way))
                .on_conflict(
                    OnConflict::column(ways::Column::ExternalId)
                        .update_columns([
                            ways::Column::Name,
                            ways::Column::NodeStart,
                            ways::Column::NodeEnd,
                            ways::Column::Length,
                            ways::Column::Coordinates,
                            ways::Column::IsOneWay,
                            ways::Column::LastModified,
                        ])
                        .to_owned(),
                )
                .exec_with_returning(&txn)
                .await?;
            stored.push(Way::try_from(row)?);
        }

        txn.commit().await?;
        debug!("Upserted {} ways", stored.len());
        Ok(stored)
    }

    async fn all_ways(&self) -> Result<Vec<Way>, SurveyError> {
        ways::Entity::find()
            .order_by_asc(ways::Column::Id)
            .all(&self.db)
            .await?
            .into_iter()
            .map(Way::try_from)
            .collect()
    }
}

#[async_trait]
impl SurveyStore for DatabaseStore {
    async fn insert_survey(&self, survey: &Survey, matched: bool) -> Result<(), SurveyError> {
        let trace = Value::Array(
            survey
                .trace
                .iter()
                .map(|p| json!([p.coordinate.x(), p.coordinate.y(), p.distance_survey]))
                .collect(),
        );

        let model = surveys::ActiveModel {
            id: Set(survey.id),
            title: Set(survey.title.clone()),
            surveyed_at: Set(survey.surveyed_at),
            trace: Set(trace),
            distance_meters: Set(survey.distance_meters()),
            matched: Set(matched),
            last_modified: Set(Utc::now().into()),
        };

        surveys::Entity::insert(model).exec(&self.db).await?;
        Ok(())
    }

    async fn insert_measurements(
        &self,
        survey_id: Uuid,
        measurements: &[SurveyData],
    ) -> Result<usize, SurveyError> {
        for chunk in measurements.chunks(INSERT_CHUNK_SIZE) {
            let models = chunk.iter().map(|m| survey_measurements::ActiveModel {
                id: NotSet,
                survey_id: Set(survey_id),
                distance_survey: Set(m.distance_survey),
                kind: Set(m.kind.clone()),
                value: Set(m.value),
                way_id: Set(m.tag.map(|t| t.way_id)),
                distance_way: Set(m.tag.map(|t| t.distance_way)),
                latitude: Set(m.tag.map(|t| t.position.y())),
                longitude: Set(m.tag.map(|t| t.position.x())),
            });

            survey_measurements::Entity::insert_many(models)
                .exec(&self.db)
                .await?;
        }

        Ok(measurements.len())
    }

    async fn insert_images(
        &self,
        survey_id: Uuid,
        images: &[SurveyImage],
    ) -> Result<usize, SurveyError> {
        for chunk in images.chunks(INSERT_CHUNK_SIZE) {
            let models = chunk.iter().map(|i| survey_images::ActiveModel {
                id: NotSet,
                survey_id: Set(survey_id),
                distance_survey: Set(i.distance_survey),
                file_name: Set(i.file_name.clone()),
                way_id: Set(i.tag.map(|t| t.way_id)),
                distance_way: Set(i.tag.map(|t| t.distance_way)),
                latitude: Set(i.tag.map(|t| t.position.y())),
                longitude: Set(i.tag.map(|t| t.position.x())),
            });

            survey_images::Entity::insert_many(models)
                .exec(&self.db)
                .await?;
        }

        Ok(images.len())
    }
}
