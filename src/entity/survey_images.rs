use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "survey_images")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub survey_id: Uuid,
    #[sea_orm(column_type = "Double")]
    pub distance_survey: f64,
    pub file_name: String,
    pub way_id: Option<i32>,
    #[sea_orm(column_type = "Double", nullable)]
    pub distance_way: Option<f64>,
    #[sea_orm(column_type = "Double", nullable)]
    pub latitude: Option<f64>,
    #[sea_orm(column_type = "Double", nullable)]
    pub longitude: Option<f64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::surveys::Entity",
        from = "Column::SurveyId",
        to = "super::surveys::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    Surveys,
    #[sea_orm(
        belongs_to = "super::ways::Entity",
        from = "Column::WayId",
        to = "super::ways::Column::Id",
        on_update = "Cascade",
        on_delete = "SetNull"
    )]
    Ways,
}

impl Related<super::surveys::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Surveys.def()
    }
}

impl Related<super::ways::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Ways.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
