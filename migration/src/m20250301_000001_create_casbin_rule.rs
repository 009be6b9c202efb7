use sea_orm_migration::prelude::*;

/// Uniqueness index over `(ptype, v0..v5)`. Duplicate inserts become no-ops
/// against it.
const RULE_UNIQUE_INDEX: &str = "idx_casbin_rule";

const FIELD_WIDTH: u32 = 100;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CasbinRule::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CasbinRule::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(rule_column(CasbinRule::Ptype))
                    .col(rule_column(CasbinRule::V0))
                    .col(rule_column(CasbinRule::V1))
                    .col(rule_column(CasbinRule::V2))
                    .col(rule_column(CasbinRule::V3))
                    .col(rule_column(CasbinRule::V4))
                    .col(rule_column(CasbinRule::V5))
                    .to_owned(),
            )
            .await?;

        // Unused slots hold '' rather than NULL so the index treats them as equal
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name(RULE_UNIQUE_INDEX)
                    .table(CasbinRule::Table)
                    .col(CasbinRule::Ptype)
                    .col(CasbinRule::V0)
                    .col(CasbinRule::V1)
                    .col(CasbinRule::V2)
                    .col(CasbinRule::V3)
                    .col(CasbinRule::V4)
                    .col(CasbinRule::V5)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CasbinRule::Table).to_owned())
            .await
    }
}

fn rule_column(column: CasbinRule) -> ColumnDef {
    ColumnDef::new(column)
        .string_len(FIELD_WIDTH)
        .not_null()
        .default("")
        .to_owned()
}

#[derive(DeriveIden)]
enum CasbinRule {
    Table,
    Id,
    Ptype,
    V0,
    V1,
    V2,
    V3,
    V4,
    V5,
}
