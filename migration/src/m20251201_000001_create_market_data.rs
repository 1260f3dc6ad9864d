use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

const UNIQUE_CANDLE: &str = "idx_market_data_candle";
const SYMBOL_TIME: &str = "idx_market_data_symbol_time";

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(MarketData::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MarketData::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(MarketData::Timestamp).timestamp_with_time_zone().not_null())
                    .col(ColumnDef::new(MarketData::Symbol).string_len(64).not_null())
                    .col(ColumnDef::new(MarketData::Exchange).string_len(64).not_null())
                    .col(ColumnDef::new(MarketData::Interval).string_len(16).not_null())
                    .col(ColumnDef::new(MarketData::Open).double().not_null())
                    .col(ColumnDef::new(MarketData::High).double().not_null())
                    .col(ColumnDef::new(MarketData::Low).double().not_null())
                    .col(ColumnDef::new(MarketData::Close).double().not_null())
                    .col(ColumnDef::new(MarketData::Volume).double().not_null().default(0.0))
                    .col(ColumnDef::new(MarketData::CreatedAt).timestamp_with_time_zone().not_null())
                    .col(ColumnDef::new(MarketData::UpdatedAt).timestamp_with_time_zone().not_null())
                    .to_owned(),
            )
            .await?;

        // One row per candle; the sync upsert relies on this key
        manager
            .create_index(
                Index::create()
                    .name(UNIQUE_CANDLE)
                    .table(MarketData::Table)
                    .col(MarketData::Timestamp)
                    .col(MarketData::Symbol)
                    .col(MarketData::Exchange)
                    .col(MarketData::Interval)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name(SYMBOL_TIME)
                    .table(MarketData::Table)
                    .col(MarketData::Symbol)
                    .col(MarketData::Timestamp)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(MarketData::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum MarketData {
    Table,
    Id,
    Timestamp,
    Symbol,
    Exchange,
    Interval,
    Open,
    High,
    Low,
    Close,
    Volume,
    CreatedAt,
    UpdatedAt,
}
