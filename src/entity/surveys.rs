use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "surveys")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub title: String,
    pub surveyed_at: DateTimeWithTimeZone,
    #[sea_orm(column_type = "JsonBinary")]
    pub trace: Json,
    #[sea_orm(column_type = "Double")]
    pub distance_meters: f64,
    pub matched: bool,
    pub last_modified: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::survey_images::Entity")]
    SurveyImages,
    #[sea_orm(has_many = "super::survey_measurements::Entity")]
    SurveyMeasurements,
}

impl Related<super::survey_images::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SurveyImages.def()
    }
}

impl Related<super::survey_measurements::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SurveyMeasurements.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
