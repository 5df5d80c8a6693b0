use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "ways")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub external_id: i64,
    pub name: String,
    pub node_start: i64,
    pub node_end: i64,
    #[sea_orm(column_type = "Double")]
    pub length: f64,
    #[sea_orm(column_type = "JsonBinary")]
    pub coordinates: Json,
    pub is_one_way: bool,
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
