//! Initial error tracking schema
//!
//! The unique index on `error_groups (project_id, fingerprint_hash)` is what makes
//! concurrent find-or-create converge on a single group. The cache table is unique
//! per `(fingerprint_hash, analysis_type, provider, model)`.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Projects::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Projects::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Projects::Uuid).uuid().not_null().unique_key())
                    .col(
                        ColumnDef::new(Projects::PublicKey)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Projects::Name).string().not_null())
                    .col(
                        ColumnDef::new(Projects::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Projects::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ErrorGroups::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ErrorGroups::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ErrorGroups::ProjectId).integer().not_null())
                    .col(
                        ColumnDef::new(ErrorGroups::FingerprintHash)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(ColumnDef::new(ErrorGroups::Fingerprint).json_binary().not_null())
                    .col(ColumnDef::new(ErrorGroups::Title).string().not_null())
                    .col(ColumnDef::new(ErrorGroups::ErrorType).string().not_null())
                    .col(ColumnDef::new(ErrorGroups::Message).text().not_null())
                    .col(ColumnDef::new(ErrorGroups::Platform).string().not_null())
                    .col(
                        ColumnDef::new(ErrorGroups::FirstSeen)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ErrorGroups::LastSeen)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ErrorGroups::Status)
                            .string()
                            .not_null()
                            .default("unresolved"),
                    )
                    .col(
                        ColumnDef::new(ErrorGroups::EventCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ErrorGroups::UserCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(ErrorGroups::AiSummary).text().null())
                    .col(
                        ColumnDef::new(ErrorGroups::Metadata)
                            .json_binary()
                            .not_null()
                            .default(Expr::cust("'{}'::jsonb")),
                    )
                    .col(
                        ColumnDef::new(ErrorGroups::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ErrorGroups::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_error_groups_project")
                            .from(ErrorGroups::Table, ErrorGroups::ProjectId)
                            .to(Projects::Table, Projects::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_error_groups_project_fingerprint")
                    .table(ErrorGroups::Table)
                    .col(ErrorGroups::ProjectId)
                    .col(ErrorGroups::FingerprintHash)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_error_groups_project_last_seen")
                    .table(ErrorGroups::Table)
                    .col(ErrorGroups::ProjectId)
                    .col(ErrorGroups::LastSeen)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ErrorEvents::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ErrorEvents::Id)
                            .string_len(64)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ErrorEvents::ProjectId).integer().not_null())
                    .col(ColumnDef::new(ErrorEvents::GroupId).integer().null())
                    .col(
                        ColumnDef::new(ErrorEvents::HasBeenProcessed)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(ErrorEvents::Timestamp)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ErrorEvents::ReceivedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ErrorEvents::Level).string().not_null())
                    .col(ColumnDef::new(ErrorEvents::Message).text().not_null())
                    .col(ColumnDef::new(ErrorEvents::ErrorType).string().not_null())
                    .col(ColumnDef::new(ErrorEvents::ExceptionType).string().null())
                    .col(ColumnDef::new(ErrorEvents::ExceptionValue).text().null())
                    .col(ColumnDef::new(ErrorEvents::ExceptionModule).string().null())
                    .col(ColumnDef::new(ErrorEvents::Fingerprint).json_binary().not_null())
                    .col(ColumnDef::new(ErrorEvents::Platform).string().not_null())
                    .col(ColumnDef::new(ErrorEvents::Environment).string().not_null())
                    .col(ColumnDef::new(ErrorEvents::Release).string().null())
                    .col(ColumnDef::new(ErrorEvents::SdkName).string().null())
                    .col(ColumnDef::new(ErrorEvents::SdkVersion).string().null())
                    .col(ColumnDef::new(ErrorEvents::ServerName).string().null())
                    .col(ColumnDef::new(ErrorEvents::Transaction).string().null())
                    .col(
                        ColumnDef::new(ErrorEvents::Handled)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(ErrorEvents::SampleRate)
                            .double()
                            .not_null()
                            .default(1.0),
                    )
                    .col(ColumnDef::new(ErrorEvents::UserKey).string().null())
                    .col(ColumnDef::new(ErrorEvents::Data).json_binary().null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_error_events_project")
                            .from(ErrorEvents::Table, ErrorEvents::ProjectId)
                            .to(Projects::Table, Projects::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_error_events_group")
                            .from(ErrorEvents::Table, ErrorEvents::GroupId)
                            .to(ErrorGroups::Table, ErrorGroups::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_error_events_project_timestamp")
                    .table(ErrorEvents::Table)
                    .col(ErrorEvents::ProjectId)
                    .col(ErrorEvents::Timestamp)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_error_events_group_timestamp")
                    .table(ErrorEvents::Table)
                    .col(ErrorEvents::GroupId)
                    .col(ErrorEvents::Timestamp)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(AiAnalysisCache::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AiAnalysisCache::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(AiAnalysisCache::FingerprintHash)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(ColumnDef::new(AiAnalysisCache::AnalysisType).string().not_null())
                    .col(ColumnDef::new(AiAnalysisCache::Provider).string().not_null())
                    .col(ColumnDef::new(AiAnalysisCache::Model).string().not_null())
                    .col(
                        ColumnDef::new(AiAnalysisCache::OwnerProjectId)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(AiAnalysisCache::AnalysisResult)
                            .json_binary()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AiAnalysisCache::PromptHash)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AiAnalysisCache::ConfidenceScore)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(AiAnalysisCache::IsPublic)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(AiAnalysisCache::UsageCount)
                            .big_integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(AiAnalysisCache::LastUsedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(AiAnalysisCache::ProjectsUsed)
                            .json_binary()
                            .not_null()
                            .default(Expr::cust("'[]'::jsonb")),
                    )
                    .col(
                        ColumnDef::new(AiAnalysisCache::AvgFeedbackScore)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(AiAnalysisCache::FeedbackCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(AiAnalysisCache::PromptTokens)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(AiAnalysisCache::CompletionTokens)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(AiAnalysisCache::OriginalCostCents)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(AiAnalysisCache::TokensSaved)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(AiAnalysisCache::CostSavedCents)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(AiAnalysisCache::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(AiAnalysisCache::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_ai_analysis_cache_entry_unique")
                    .table(AiAnalysisCache::Table)
                    .col(AiAnalysisCache::FingerprintHash)
                    .col(AiAnalysisCache::AnalysisType)
                    .col(AiAnalysisCache::Provider)
                    .col(AiAnalysisCache::Model)
                    .col(AiAnalysisCache::OwnerProjectId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AiAnalysisCache::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ErrorEvents::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ErrorGroups::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Projects::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Projects {
    Table,
    Id,
    Uuid,
    PublicKey,
    Name,
    IsActive,
    CreatedAt,
}

#[derive(DeriveIden)]
enum ErrorGroups {
    Table,
    Id,
    ProjectId,
    FingerprintHash,
    Fingerprint,
    Title,
    ErrorType,
    Message,
    Platform,
    FirstSeen,
    LastSeen,
    Status,
    EventCount,
    UserCount,
    AiSummary,
    Metadata,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum ErrorEvents {
    Table,
    Id,
    ProjectId,
    GroupId,
    HasBeenProcessed,
    Timestamp,
    ReceivedAt,
    Level,
    Message,
    ErrorType,
    ExceptionType,
    ExceptionValue,
    ExceptionModule,
    Fingerprint,
    Platform,
    Environment,
    Release,
    SdkName,
    SdkVersion,
    ServerName,
    Transaction,
    Handled,
    SampleRate,
    UserKey,
    Data,
}

#[derive(DeriveIden)]
enum AiAnalysisCache {
    Table,
    Id,
    FingerprintHash,
    AnalysisType,
    Provider,
    Model,
    OwnerProjectId,
    AnalysisResult,
    PromptHash,
    ConfidenceScore,
    IsPublic,
    UsageCount,
    LastUsedAt,
    ProjectsUsed,
    AvgFeedbackScore,
    FeedbackCount,
    PromptTokens,
    CompletionTokens,
    OriginalCostCents,
    TokensSaved,
    CostSavedCents,
    CreatedAt,
    UpdatedAt,
}
