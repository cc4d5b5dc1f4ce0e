use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Workflows::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Workflows::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Workflows::Name).string().not_null())
                    .col(
                        ColumnDef::new(Workflows::Description)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(Workflows::TriggerKind).string().not_null())
                    .col(
                        ColumnDef::new(Workflows::TriggerFilter)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(Workflows::Active)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(ColumnDef::new(Workflows::CreatedAt).timestamp().not_null())
                    .col(ColumnDef::new(Workflows::UpdatedAt).timestamp().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_workflows_trigger_kind")
                    .table(Workflows::Table)
                    .col(Workflows::TriggerKind)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(WorkflowSteps::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WorkflowSteps::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(WorkflowSteps::WorkflowId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WorkflowSteps::StepOrder)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WorkflowSteps::ActionKind)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WorkflowSteps::DelaySeconds)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(WorkflowSteps::Payload)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(WorkflowSteps::Enabled)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(WorkflowSteps::CreatedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_workflow_steps_unique_order")
                    .table(WorkflowSteps::Table)
                    .col(WorkflowSteps::WorkflowId)
                    .col(WorkflowSteps::StepOrder)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(WorkflowRuns::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WorkflowRuns::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(WorkflowRuns::WorkflowId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WorkflowRuns::EntityId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(WorkflowRuns::Status).string().not_null())
                    .col(
                        ColumnDef::new(WorkflowRuns::StartedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .col(ColumnDef::new(WorkflowRuns::CompletedAt).timestamp().null())
                    .to_owned(),
            )
            .await?;

        // One run per (workflow, entity); this index is the idempotency guard
        // against duplicate trigger delivery.
        manager
            .create_index(
                Index::create()
                    .name("idx_workflow_runs_unique_target")
                    .table(WorkflowRuns::Table)
                    .col(WorkflowRuns::WorkflowId)
                    .col(WorkflowRuns::EntityId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(StepRuns::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(StepRuns::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(StepRuns::RunId).big_integer().not_null())
                    .col(ColumnDef::new(StepRuns::StepId).big_integer().not_null())
                    .col(ColumnDef::new(StepRuns::Status).string().not_null())
                    .col(
                        ColumnDef::new(StepRuns::ScheduledFor)
                            .timestamp()
                            .not_null(),
                    )
                    .col(ColumnDef::new(StepRuns::ExecutedAt).timestamp().null())
                    .col(ColumnDef::new(StepRuns::ErrorMessage).text().null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_step_runs_run_id")
                    .table(StepRuns::Table)
                    .col(StepRuns::RunId)
                    .to_owned(),
            )
            .await?;

        // Sweep query: pending step runs whose due time has passed
        manager
            .create_index(
                Index::create()
                    .name("idx_step_runs_due")
                    .table(StepRuns::Table)
                    .col(StepRuns::Status)
                    .col(StepRuns::ScheduledFor)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(StepRuns::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(WorkflowRuns::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(WorkflowSteps::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Workflows::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Workflows {
    Table,
    Id,
    Name,
    Description,
    TriggerKind,
    TriggerFilter,
    Active,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum WorkflowSteps {
    Table,
    Id,
    WorkflowId,
    StepOrder,
    ActionKind,
    DelaySeconds,
    Payload,
    Enabled,
    CreatedAt,
}

#[derive(DeriveIden)]
enum WorkflowRuns {
    Table,
    Id,
    WorkflowId,
    EntityId,
    Status,
    StartedAt,
    CompletedAt,
}

#[derive(DeriveIden)]
enum StepRuns {
    Table,
    Id,
    RunId,
    StepId,
    Status,
    ScheduledFor,
    ExecutedAt,
    ErrorMessage,
}
