use std::future::Future;
use std::time::Duration;

use log::{debug, info};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, FromQueryResult,
};
use sea_query::{Alias, ColumnDef, Expr, IntoTableRef, OnConflict, Query, Table, TableRef as SqlTableRef};

use entity::audio_metadata::{self, Column};

use crate::config::TableRef;
use crate::error::PersistenceError;

pub type AudioMetadataRecord = audio_metadata::Model;

const VALUE_COLUMNS: [Column; 4] = [
    Column::FileName,
    Column::DurationMs,
    Column::Loudness,
    Column::Classification,
];

pub trait MetadataStore {
    /// Inserts the record, or overwrites every non-key field of the row with
    /// the same `gcp_url`.
    fn upsert(
        &self,
        record: &AudioMetadataRecord,
    ) -> impl Future<Output = Result<(), PersistenceError>> + Send;

    fn find_by_url(
        &self,
        gcp_url: &str,
    ) -> impl Future<Output = Result<Option<AudioMetadataRecord>, PersistenceError>> + Send;
}

pub fn validate(record: &AudioMetadataRecord) -> Result<(), PersistenceError> {
    let required = [
        ("gcp_url", &record.gcp_url),
        ("file_name", &record.file_name),
        ("classification", &record.classification),
    ];
    for (name, value) in required {
        if value.trim().is_empty() {
            return Err(PersistenceError::Malformed(format!("`{}` is empty", name)));
        }
    }
    if record.duration_ms < 0 {
        return Err(PersistenceError::Malformed(format!(
            "`duration_ms` is negative ({})",
            record.duration_ms
        )));
    }
    if !record.loudness.is_finite() {
        return Err(PersistenceError::Malformed(format!(
            "`loudness` is not finite ({})",
            record.loudness
        )));
    }
    Ok(())
}

pub fn connect_options(database_url: &str) -> ConnectOptions {
    let mut opt = ConnectOptions::new(database_url.to_string());
    opt.max_connections(10)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(8))
        .acquire_timeout(Duration::from_secs(8))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);
    opt
}

/// Metadata table in a SQL database.
pub struct SqlMetadataStore {
    db: DatabaseConnection,
    table: TableRef,
}

impl SqlMetadataStore {
    pub async fn connect(database_url: &str, table: TableRef) -> Result<Self, PersistenceError> {
        let db = Database::connect(connect_options(database_url)).await?;
        Self::open(db, table).await
    }

    /// Wraps an existing connection and creates the table if it is missing.
    pub async fn open(db: DatabaseConnection, table: TableRef) -> Result<Self, PersistenceError> {
        let store = Self { db, table };
        store.ensure_table().await?;
        Ok(store)
    }

    fn backend(&self) -> DbBackend {
        self.db.get_database_backend()
    }

    fn table_ref(&self) -> SqlTableRef {
        match (&self.table.dataset, self.backend()) {
            (Some(dataset), DbBackend::Postgres) => {
                (Alias::new(dataset), Alias::new(&self.table.table)).into_table_ref()
            }
            _ => Alias::new(&self.table.table).into_table_ref(),
        }
    }

    pub async fn ensure_table(&self) -> Result<(), PersistenceError> {
        if let (Some(dataset), DbBackend::Postgres) = (&self.table.dataset, self.backend()) {
            self.db
                .execute_unprepared(&format!(
                    "CREATE SCHEMA IF NOT EXISTS \"{}\"",
                    dataset.replace('"', "\"\"")
                ))
                .await?;
        }

        let stmt = Table::create()
            .table(self.table_ref())
            .if_not_exists()
            .col(ColumnDef::new(Column::GcpUrl).string().not_null().primary_key())
            .col(ColumnDef::new(Column::FileName).string().not_null())
            .col(ColumnDef::new(Column::DurationMs).big_integer().not_null())
            .col(ColumnDef::new(Column::Loudness).double().not_null())
            .col(ColumnDef::new(Column::Classification).string().not_null())
            .to_owned();
        self.db.execute(self.backend().build(&stmt)).await?;
        debug!("Ensured metadata table {}", self.table.table);
        Ok(())
    }

    pub async fn count(&self) -> Result<u64, PersistenceError> {
        let stmt = Query::select()
            .expr_as(Expr::cust("COUNT(*)"), Alias::new("count"))
            .from(self.table_ref())
            .to_owned();
        let row = self.db.query_one(self.backend().build(&stmt)).await?;
        let count = match row {
            Some(row) => row.try_get::<i64>("", "count")?,
            None => 0,
        };
        Ok(count.max(0) as u64)
    }
}

impl MetadataStore for SqlMetadataStore {
    async fn upsert(&self, record: &AudioMetadataRecord) -> Result<(), PersistenceError> {
        validate(record)?;

        // One statement, so concurrent writers of the same url cannot race.
        let on_conflict = OnConflict::column(Column::GcpUrl)
            .update_columns(VALUE_COLUMNS)
            .to_owned();
        let stmt = Query::insert()
            .into_table(self.table_ref())
            .columns([
                Column::GcpUrl,
                Column::FileName,
                Column::DurationMs,
                Column::Loudness,
                Column::Classification,
            ])
            .values([
                Expr::value(record.gcp_url.clone()),
                Expr::value(record.file_name.clone()),
                Expr::value(record.duration_ms),
                Expr::value(record.loudness),
                Expr::value(record.classification.clone()),
            ])
            .map_err(|e| PersistenceError::Malformed(e.to_string()))?
            .on_conflict(on_conflict)
            .to_owned();

        self.db.execute(self.backend().build(&stmt)).await?;
        info!("Upserted {} ({})", record.gcp_url, record.classification);
        Ok(())
    }

    async fn find_by_url(&self, gcp_url: &str) -> Result<Option<AudioMetadataRecord>, PersistenceError> {
        let stmt = Query::select()
            .columns([
                Column::GcpUrl,
                Column::FileName,
                Column::DurationMs,
                Column::Loudness,
                Column::Classification,
            ])
            .from(self.table_ref())
            .and_where(Expr::col(Column::GcpUrl).eq(gcp_url))
            .to_owned();
        let record = AudioMetadataRecord::find_by_statement(self.backend().build(&stmt))
            .one(&self.db)
            .await?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(url: &str) -> AudioMetadataRecord {
        AudioMetadataRecord {
            gcp_url: url.to_string(),
            file_name: "Anymore.mp3".to_string(),
            duration_ms: 215_000,
            loudness: -11.25,
            classification: "High Energy".to_string(),
        }
    }

    async fn memory_store(table: &str) -> SqlMetadataStore {
        let mut opt = ConnectOptions::new("sqlite::memory:".to_string());
        opt.max_connections(1).min_connections(1);
        let db = Database::connect(opt).await.unwrap();
        SqlMetadataStore::open(db, TableRef::parse(table).unwrap())
            .await
            .unwrap()
    }

    #[test]
    fn validate_rejects_missing_fields() {
        assert!(validate(&record("https://storage.googleapis.com/b/a.mp3")).is_ok());

        let mut r = record("");
        assert!(matches!(validate(&r), Err(PersistenceError::Malformed(_))));

        r = record("https://x/a.mp3");
        r.classification = " ".to_string();
        assert!(validate(&r).is_err());

        r = record("https://x/a.mp3");
        r.loudness = f64::NEG_INFINITY;
        assert!(validate(&r).is_err());

        r = record("https://x/a.mp3");
        r.duration_ms = -1;
        assert!(validate(&r).is_err());
    }

    #[tokio::test]
    async fn insert_then_read_back() {
        let store = memory_store("audio_metadata").await;
        let url = "https://storage.googleapis.com/bucket/Anymore.mp3";

        assert_eq!(store.find_by_url(url).await.unwrap(), None);
        store.upsert(&record(url)).await.unwrap();

        assert_eq!(store.find_by_url(url).await.unwrap(), Some(record(url)));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn upsert_updates_in_place() {
        let store = memory_store("audio_files.audio_metadata").await;
        let url = "https://storage.googleapis.com/bucket/Anymore.mp3";
        store.upsert(&record(url)).await.unwrap();

        let mut updated = record(url);
        updated.duration_ms = 60_500;
        updated.loudness = -22.0;
        updated.classification = "Low Energy".to_string();
        store.upsert(&updated).await.unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.find_by_url(url).await.unwrap(), Some(updated));
    }

    #[tokio::test]
    async fn distinct_urls_are_distinct_rows() {
        let store = memory_store("audio_metadata").await;
        store.upsert(&record("https://x/b/one.mp3")).await.unwrap();
        store.upsert(&record("https://x/b/two.mp3")).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn malformed_record_is_not_written() {
        let store = memory_store("audio_metadata").await;
        let mut bad = record("https://x/b/one.mp3");
        bad.file_name = String::new();
        assert!(matches!(store.upsert(&bad).await, Err(PersistenceError::Malformed(_))));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn ensure_table_is_idempotent() {
        let store = memory_store("audio_metadata").await;
        store.ensure_table().await.unwrap();
        store.ensure_table().await.unwrap();
    }
}
