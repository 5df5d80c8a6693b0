use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Ways::Table)
                    .if_not_exists()
                    .col(pk_auto(Ways::Id))
                    // Natural key, the upsert in the road network builder conflicts on it
                    .col(big_integer_uniq(Ways::ExternalId))
                    .col(string(Ways::Name))
                    .col(big_integer(Ways::NodeStart))
                    .col(big_integer(Ways::NodeEnd))
                    .col(double(Ways::Length))
                    .col(json_binary(Ways::Coordinates))
                    .col(boolean(Ways::IsOneWay))
                    .col(timestamp_with_time_zone(Ways::LastModified))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_ways_name")
                    .table(Ways::Table)
                    .col(Ways::Name)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Surveys::Table)
                    .if_not_exists()
                    .col(pk_uuid(Surveys::Id))
                    .col(string(Surveys::Title))
                    .col(timestamp_with_time_zone(Surveys::SurveyedAt))
                    .col(json_binary(Surveys::Trace))
                    .col(double(Surveys::DistanceMeters))
                    .col(boolean(Surveys::Matched))
                    .col(timestamp_with_time_zone(Surveys::LastModified))
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SurveyMeasurements::Table)
                    .if_not_exists()
                    .col(pk_auto(SurveyMeasurements::Id))
                    .col(uuid(SurveyMeasurements::SurveyId))
                    .col(double(SurveyMeasurements::DistanceSurvey))
                    .col(string(SurveyMeasurements::Kind))
                    .col(double(SurveyMeasurements::Value))
                    .col(integer_null(SurveyMeasurements::WayId))
                    .col(double_null(SurveyMeasurements::DistanceWay))
                    .col(double_null(SurveyMeasurements::Latitude))
                    .col(double_null(SurveyMeasurements::Longitude))
                    .foreign_key(
                        ForeignKey::create()
                            .from(SurveyMeasurements::Table, SurveyMeasurements::SurveyId)
                            .to(Surveys::Table, Surveys::Id)
                            .on_update(ForeignKeyAction::Cascade)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(SurveyMeasurements::Table, SurveyMeasurements::WayId)
                            .to(Ways::Table, Ways::Id)
                            .on_update(ForeignKeyAction::Cascade)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SurveyImages::Table)
                    .if_not_exists()
                    .col(pk_auto(SurveyImages::Id))
                    .col(uuid(SurveyImages::SurveyId))
                    .col(double(SurveyImages::DistanceSurvey))
                    .col(string(SurveyImages::FileName))
                    .col(integer_null(SurveyImages::WayId))
                    .col(double_null(SurveyImages::DistanceWay))
                    .col(double_null(SurveyImages::Latitude))
                    .col(double_null(SurveyImages::Longitude))
                    .foreign_key(
                        ForeignKey::create()
                            .from(SurveyImages::Table, SurveyImages::SurveyId)
                            .to(Surveys::Table, Surveys::Id)
                            .on_update(ForeignKeyAction::Cascade)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(SurveyImages::Table, SurveyImages::WayId)
                            .to(Ways::Table, Ways::Id)
                            .on_update(ForeignKeyAction::Cascade)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SurveyImages::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(SurveyMeasurements::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Surveys::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Ways::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Ways {
    Table,
    Id,
    ExternalId,
    Name,
    NodeStart,
    NodeEnd,
    Length,
    Coordinates,
    IsOneWay,
    LastModified,
}

#[derive(DeriveIden)]
enum Surveys {
    Table,
    Id,
    Title,
    SurveyedAt,
    Trace,
    DistanceMeters,
    Matched,
    LastModified,
}

#[derive(DeriveIden)]
enum SurveyMeasurements {
    Table,
    Id,
    SurveyId,
    DistanceSurvey,
    Kind,
    Value,
    WayId,
    DistanceWay,
    Latitude,
    Longitude,
}

#[derive(DeriveIden)]
enum SurveyImages {
    Table,
    Id,
    SurveyId,
    DistanceSurvey,
    FileName,
    WayId,
    DistanceWay,
    Latitude,
    Longitude,
}
