//! Operation log and system settings tables

use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(OperationLog::Table)
                    .if_not_exists()
                    .col(pk_auto(OperationLog::Id))
                    .col(string_len(OperationLog::Actor, 100))
                    .col(string_len(OperationLog::Action, 50))
                    .col(string_len(OperationLog::ResourceType, 50))
                    .col(integer_null(OperationLog::ResourceId))
                    .col(text(OperationLog::Description))
                    .col(string_len_null(OperationLog::OriginIp, 64))
                    .col(string_len_null(OperationLog::UserAgent, 255))
                    .col(
                        timestamp_with_time_zone(OperationLog::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_operation_logs_created_at")
                    .table(OperationLog::Table)
                    .col(OperationLog::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SystemSetting::Table)
                    .if_not_exists()
                    .col(string_len(SystemSetting::Key, 100).primary_key())
                    .col(text(SystemSetting::Value))
                    .col(
                        timestamp_with_time_zone(SystemSetting::UpdatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SystemSetting::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(OperationLog::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum OperationLog {
    #[sea_orm(iden = "operation_logs")]
    Table,
    Id,
    Actor,
    Action,
    ResourceType,
    ResourceId,
    Description,
    OriginIp,
    UserAgent,
    CreatedAt,
}

#[derive(DeriveIden)]
enum SystemSetting {
    #[sea_orm(iden = "system_settings")]
    Table,
    Key,
    Value,
    UpdatedAt,
}
