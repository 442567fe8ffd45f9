use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::error::{LineageError, StoreError};
use crate::types::{
    Batch, BatchId, EdgeDirection, LineageLink, LineageSnapshot, LinkId, LinkPage, NewLink,
    PageRequest,
};

use super::schema;
use super::traits::{BatchRegistry, GraphSource, LinkWriter};

const BATCH_COLUMNS: &str = "id, batch_number, batch_type, status, product_name, quantity, \
     unit, production_date, expiry_date, lot_number, quality_status";

const LINK_COLUMNS: &str = "id, source_batch_id, target_batch_id, link_type, quantity_used, \
     process_step, process_date";

/// SQLite-backed batch registry and link store.
#[derive(Debug)]
pub struct SqliteLineageStore {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl SqliteLineageStore {
    /// Open (or create) a store at the given path.
    pub fn open(path: &Path) -> crate::error::Result<Self> {
        let conn = Connection::open(path).map_err(StoreError::Sqlite)?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: Some(path.to_path_buf()),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> crate::error::Result<Self> {
        let conn = Connection::open_in_memory().map_err(StoreError::Sqlite)?;
        let store = Self {
            conn: Mutex::new(conn),
            db_path: None,
        };
        store.initialize()?;
        Ok(store)
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn initialize(&self) -> crate::error::Result<()> {
        let conn = self.conn.lock().expect("lineage store mutex poisoned");

        conn.execute_batch(
            "PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(StoreError::Sqlite)?;

        // Try WAL mode — silently ignored for in-memory
        let _ = conn.execute_batch("PRAGMA journal_mode = WAL;");

        conn.execute_batch(schema::SCHEMA_SQL)
            .map_err(StoreError::Sqlite)?;

        conn.execute(
            "INSERT OR IGNORE INTO lineage_meta (key, value) VALUES ('schema_version', ?1)",
            params![schema::SCHEMA_VERSION],
        )
        .map_err(StoreError::Sqlite)?;

        let version: String = conn
            .query_row(
                "SELECT value FROM lineage_meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .map_err(StoreError::Sqlite)?;
        if version != schema::SCHEMA_VERSION {
            return Err(StoreError::Migration(format!(
                "database schema version {version} is not supported (expected {})",
                schema::SCHEMA_VERSION
            ))
            .into());
        }

        Ok(())
    }

    /// Insert a batch, or update the mutable fields of an existing one.
    pub fn upsert_batch(&self, batch: &Batch) -> crate::error::Result<()> {
        let conn = self.conn.lock().expect("lineage store mutex poisoned");
        Self::upsert_batch_on(&conn, batch).map_err(StoreError::Sqlite)?;
        Ok(())
    }

    fn upsert_batch_on(conn: &Connection, batch: &Batch) -> rusqlite::Result<()> {
        conn.execute(
            "INSERT INTO batches (id, batch_number, batch_type, status, product_name, quantity,
                                  unit, production_date, expiry_date, lot_number, quality_status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                quality_status = excluded.quality_status,
                quantity = excluded.quantity,
                expiry_date = excluded.expiry_date,
                lot_number = excluded.lot_number",
            params![
                batch.id.0,
                batch.batch_number,
                batch.batch_type.as_str(),
                batch.status.as_str(),
                batch.product_name,
                batch.quantity,
                batch.unit,
                batch.production_date,
                batch.expiry_date,
                batch.lot_number,
                batch.quality_status.as_str(),
            ],
        )?;
        Ok(())
    }

    fn insert_link_on(conn: &Connection, id: Option<LinkId>, link: &NewLink) -> rusqlite::Result<i64> {
        conn.execute(
            "INSERT INTO lineage_links (id, source_batch_id, target_batch_id, link_type,
                                        quantity_used, process_step, process_date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id.map(|i| i.0),
                link.source_batch_id.0,
                link.target_batch_id.0,
                link.link_type.as_str(),
                link.quantity_used,
                link.process_step,
                link.process_date,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Import a snapshot atomically, keeping link ids.
    pub fn import_snapshot(&self, snapshot: &LineageSnapshot) -> crate::error::Result<()> {
        let mut conn = self.conn.lock().expect("lineage store mutex poisoned");
        let tx = conn.transaction().map_err(StoreError::Sqlite)?;
        for batch in &snapshot.batches {
            Self::upsert_batch_on(&tx, batch).map_err(StoreError::Sqlite)?;
        }
        for link in &snapshot.links {
            let new = NewLink {
                source_batch_id: link.source_batch_id,
                target_batch_id: link.target_batch_id,
                link_type: link.link_type,
                quantity_used: link.quantity_used,
                process_step: link.process_step.clone(),
                process_date: link.process_date,
            };
            Self::insert_link_on(&tx, Some(link.id), &new).map_err(StoreError::Sqlite)?;
        }
        tx.commit().map_err(StoreError::Sqlite)?;
        Ok(())
    }

    pub fn batch_count(&self) -> crate::error::Result<u64> {
        self.count("SELECT COUNT(*) FROM batches")
    }

    pub fn link_count(&self) -> crate::error::Result<u64> {
        self.count("SELECT COUNT(*) FROM lineage_links")
    }

    fn count(&self, sql: &str) -> crate::error::Result<u64> {
        let conn = self.conn.lock().expect("lineage store mutex poisoned");
        let n: i64 = conn
            .query_row(sql, [], |row| row.get(0))
            .map_err(StoreError::Sqlite)?;
        Ok(u64::try_from(n).unwrap_or(0))
    }
}

/// Parse a TEXT column through the domain type's `FromStr`.
fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = LineageError>,
{
    let text: String = row.get(idx)?;
    text.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn batch_from_row(row: &Row<'_>) -> rusqlite::Result<Batch> {
    Ok(Batch {
        id: BatchId(row.get(0)?),
        batch_number: row.get(1)?,
        batch_type: parse_column(row, 2)?,
        status: parse_column(row, 3)?,
        product_name: row.get(4)?,
        quantity: row.get(5)?,
        unit: row.get(6)?,
        production_date: row.get(7)?,
        expiry_date: row.get(8)?,
        lot_number: row.get(9)?,
        quality_status: parse_column(row, 10)?,
    })
}

fn link_from_row(row: &Row<'_>) -> rusqlite::Result<LineageLink> {
    Ok(LineageLink {
        id: LinkId(row.get(0)?),
        source_batch_id: BatchId(row.get(1)?),
        target_batch_id: BatchId(row.get(2)?),
        link_type: parse_column(row, 3)?,
        quantity_used: row.get(4)?,
        process_step: row.get(5)?,
        process_date: row.get(6)?,
    })
}

/// Encode ids as a JSON array for `json_each`, so any number of ids binds as one parameter.
fn id_list(ids: &[BatchId]) -> String {
    serde_json::to_string(&ids.iter().map(|id| id.0).collect::<Vec<_>>())
        .unwrap_or_else(|_| "[]".to_string())
}

#[async_trait::async_trait]
impl BatchRegistry for SqliteLineageStore {
    async fn get_batch(&self, id: BatchId) -> crate::error::Result<Option<Batch>> {
        let conn = self.conn.lock().expect("lineage store mutex poisoned");
        let batch = conn
            .query_row(
                &format!("SELECT {BATCH_COLUMNS} FROM batches WHERE id = ?1"),
                params![id.0],
                batch_from_row,
            )
            .optional()
            .map_err(StoreError::Sqlite)?;
        Ok(batch)
    }

    async fn get_batch_by_number(&self, number: &str) -> crate::error::Result<Option<Batch>> {
        let conn = self.conn.lock().expect("lineage store mutex poisoned");
        let batch = conn
            .query_row(
                &format!("SELECT {BATCH_COLUMNS} FROM batches WHERE batch_number = ?1"),
                params![number],
                batch_from_row,
            )
            .optional()
            .map_err(StoreError::Sqlite)?;
        Ok(batch)
    }

    async fn get_batches(&self, ids: &[BatchId]) -> crate::error::Result<Vec<Batch>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock().expect("lineage store mutex poisoned");
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {BATCH_COLUMNS} FROM batches
                 WHERE id IN (SELECT value FROM json_each(?1))
                 ORDER BY id"
            ))
            .map_err(StoreError::Sqlite)?;
        let rows = stmt
            .query_map(params![id_list(ids)], batch_from_row)
            .map_err(StoreError::Sqlite)?;
        let batches = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::Sqlite)?;
        Ok(batches)
    }
}

#[async_trait::async_trait]
impl GraphSource for SqliteLineageStore {
    async fn edges_of(
        &self,
        batch_ids: &[BatchId],
        direction: EdgeDirection,
        page: PageRequest,
    ) -> crate::error::Result<LinkPage> {
        if batch_ids.is_empty() {
            return Ok(LinkPage::default());
        }
        let anchor_column = match direction {
            EdgeDirection::Outgoing => "source_batch_id",
            EdgeDirection::Incoming => "target_batch_id",
        };
        let conn = self.conn.lock().expect("lineage store mutex poisoned");
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {LINK_COLUMNS} FROM lineage_links
                 WHERE {anchor_column} IN (SELECT value FROM json_each(?1))
                 ORDER BY id
                 LIMIT ?2 OFFSET ?3"
            ))
            .map_err(StoreError::Sqlite)?;

        // One extra row tells us whether another page exists.
        let fetch = i64::from(page.limit) + 1;
        let offset = i64::try_from(page.offset).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![id_list(batch_ids), fetch, offset], link_from_row)
            .map_err(StoreError::Sqlite)?;
        let mut links = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(StoreError::Sqlite)?;

        let next_offset = if links.len() > page.limit as usize {
            links.truncate(page.limit as usize);
            Some(page.offset + u64::from(page.limit))
        } else {
            None
        };
        Ok(LinkPage { links, next_offset })
    }
}

#[async_trait::async_trait]
impl LinkWriter for SqliteLineageStore {
    async fn record_link(&self, link: &NewLink) -> crate::error::Result<LinkId> {
        let conn = self.conn.lock().expect("lineage store mutex poisoned");
        let id = Self::insert_link_on(&conn, None, link).map_err(StoreError::Sqlite)?;
        Ok(LinkId(id))
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::types::{BatchStatus, BatchType, LinkType, QualityStatus};

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 5, day).unwrap()
    }

    fn batch(id: i64, status: BatchStatus) -> Batch {
        Batch {
            id: BatchId(id),
            batch_number: format!("LOT-{id}"),
            batch_type: BatchType::FinalProduct,
            status,
            product_name: "Yoghurt".into(),
            quantity: 50.0,
            unit: "kg".into(),
            production_date: date(1),
            expiry_date: Some(date(28)),
            lot_number: Some("L1".into()),
            quality_status: QualityStatus::Pending,
        }
    }

    fn new_link(source: i64, target: i64) -> NewLink {
        NewLink {
            source_batch_id: BatchId(source),
            target_batch_id: BatchId(target),
            link_type: LinkType::Ingredient,
            quantity_used: 2.0,
            process_step: "fermentation".into(),
            process_date: date(3),
        }
    }

    fn seeded() -> SqliteLineageStore {
        let store = SqliteLineageStore::in_memory().unwrap();
        for id in 1..=4 {
            store.upsert_batch(&batch(id, BatchStatus::Completed)).unwrap();
        }
        store
    }

    #[tokio::test]
    async fn batches_round_trip() {
        let store = seeded();
        let b = store.get_batch(BatchId(2)).await.unwrap().unwrap();
        assert_eq!(b, batch(2, BatchStatus::Completed));
        assert_eq!(
            store.get_batch_by_number("LOT-3").await.unwrap().unwrap().id,
            BatchId(3)
        );
        assert!(store.get_batch(BatchId(99)).await.unwrap().is_none());

        let many = store
            .get_batches(&[BatchId(4), BatchId(1), BatchId(42)])
            .await
            .unwrap();
        assert_eq!(many.iter().map(|b| b.id.0).collect::<Vec<_>>(), [1, 4]);
    }

    #[tokio::test]
    async fn upsert_updates_status_only_fields() {
        let store = seeded();
        store.upsert_batch(&batch(1, BatchStatus::Recalled)).unwrap();
        let b = store.get_batch(BatchId(1)).await.unwrap().unwrap();
        assert_eq!(b.status, BatchStatus::Recalled);
        assert_eq!(store.batch_count().unwrap(), 4);
    }

    #[tokio::test]
    async fn batched_edge_lookup_pages() {
        let store = seeded();
        for target in 2..=4 {
            store.record_link(&new_link(1, target)).await.unwrap();
        }
        store.record_link(&new_link(2, 3)).await.unwrap();

        let first = store
            .edges_of(
                &[BatchId(1), BatchId(2)],
                EdgeDirection::Outgoing,
                PageRequest::first(3),
            )
            .await
            .unwrap();
        assert_eq!(first.links.len(), 3);
        assert_eq!(first.next_offset, Some(3));

        let second = store
            .edges_of(
                &[BatchId(1), BatchId(2)],
                EdgeDirection::Outgoing,
                PageRequest { offset: 3, limit: 3 },
            )
            .await
            .unwrap();
        assert_eq!(second.links.len(), 1);
        assert_eq!(second.links[0].source_batch_id, BatchId(2));
        assert_eq!(second.next_offset, None);

        let incoming = store
            .edges_of(&[BatchId(3)], EdgeDirection::Incoming, PageRequest::first(10))
            .await
            .unwrap();
        assert_eq!(incoming.links.len(), 2);
        assert_eq!(incoming.links[0].process_step, "fermentation");
    }

    #[tokio::test]
    async fn links_to_unknown_batches_are_rejected() {
        let store = seeded();
        let err = store.record_link(&new_link(1, 77)).await.unwrap_err();
        assert!(matches!(err, LineageError::DependencyUnavailable(StoreError::Sqlite(_))));
    }

    #[tokio::test]
    async fn snapshot_import_keeps_link_ids() {
        let store = SqliteLineageStore::in_memory().unwrap();
        let snapshot = LineageSnapshot {
            batches: vec![batch(1, BatchStatus::Released), batch(2, BatchStatus::Released)],
            links: vec![new_link(1, 2).with_id(LinkId(40))],
        };
        store.import_snapshot(&snapshot).unwrap();
        let page = store
            .edges_of(&[BatchId(1)], EdgeDirection::Outgoing, PageRequest::first(5))
            .await
            .unwrap();
        assert_eq!(page.links[0].id, LinkId(40));
        assert_eq!(store.link_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn reopening_file_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lineage.db");
        {
            let store = SqliteLineageStore::open(&path).unwrap();
            store.upsert_batch(&batch(1, BatchStatus::Completed)).unwrap();
        }
        let store = SqliteLineageStore::open(&path).unwrap();
        assert_eq!(store.db_path(), Some(path.as_path()));
        assert!(store.get_batch(BatchId(1)).await.unwrap().is_some());
    }
}
