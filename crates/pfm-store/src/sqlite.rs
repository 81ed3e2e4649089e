use std::path::Path;

use async_trait::async_trait;
use pfm_core::{
    Coordinates, HarmonicProperties, LogicOperation, MemoryRecord, PatternContent, now_millis,
};
use rusqlite::{Connection, Row, params};
use tokio::sync::Mutex;

use crate::backend::{
    CategoryIndexedStore, IndexStats, PersistentStore, QueryOptions, index_stats,
    select_by_category, select_by_pattern,
};
use crate::error::Result;
use crate::schema;

const SELECT_COLUMNS: &str = "SELECT id, category, x, y, z, strength, occurrences, confidence, \
     complexity, content, stored_at FROM patterns";

/// Durable category index backed by a single SQLite file.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

/// Columns as read, before the content JSON is parsed.
struct RawRow {
    id: String,
    category: String,
    coords: [f64; 3],
    strength: f64,
    occurrences: i64,
    confidence: f64,
    complexity: f64,
    content: String,
    stored_at: i64,
}

impl RawRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            category: row.get(1)?,
            coords: [row.get(2)?, row.get(3)?, row.get(4)?],
            strength: row.get(5)?,
            occurrences: row.get(6)?,
            confidence: row.get(7)?,
            complexity: row.get(8)?,
            content: row.get(9)?,
            stored_at: row.get(10)?,
        })
    }

    fn into_record(self) -> Result<MemoryRecord> {
        let content: PatternContent = serde_json::from_str(&self.content)?;
        Ok(MemoryRecord {
            id: self.id,
            coordinates: Coordinates::from_array(self.coords),
            content,
            harmonic: HarmonicProperties {
                category: self.category,
                strength: self.strength,
                occurrences: self.occurrences.max(1) as u64,
                confidence: self.confidence,
                complexity: self.complexity,
            },
            stored_at: self.stored_at.max(0) as u64,
        })
    }
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        schema::initialize(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // --- Metadata ---

    pub async fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT value FROM metadata WHERE key = ?1")?;
        Ok(stmt.query_row([key], |row| row.get(0)).ok())
    }

    pub async fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    /// Every stored record, for hydrating an engine at startup.
    pub async fn load_all(&self) -> Result<Vec<MemoryRecord>> {
        let conn = self.conn.lock().await;
        load_where(&conn, "", &[])
    }

    pub async fn count(&self) -> Result<usize> {
        let conn = self.conn.lock().await;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM patterns", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

fn load_where(
    conn: &Connection,
    clause: &str,
    args: &[&dyn rusqlite::ToSql],
) -> Result<Vec<MemoryRecord>> {
    let sql = format!("{SELECT_COLUMNS} {clause}");
    let mut stmt = conn.prepare(&sql)?;
    let raw: Vec<RawRow> = stmt
        .query_map(args, RawRow::read)?
        .collect::<std::result::Result<_, _>>()?;
    raw.into_iter().map(RawRow::into_record).collect()
}

fn insert_on(conn: &Connection, record: &MemoryRecord) -> Result<()> {
    let record = record.clone().normalized();
    let h = &record.harmonic;
    let stored_at = if record.stored_at > 0 { record.stored_at } else { now_millis() };
    conn.execute(
        "INSERT OR REPLACE INTO patterns
            (id, category, x, y, z, strength, occurrences, confidence, complexity,
             content, stored_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            record.id,
            h.category,
            record.coordinates.x,
            record.coordinates.y,
            record.coordinates.z,
            h.strength,
            h.occurrences as i64,
            h.confidence,
            h.complexity,
            serde_json::to_string(&record.content)?,
            stored_at as i64,
        ],
    )?;
    Ok(())
}

#[async_trait]
impl CategoryIndexedStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn store(&self, record: &MemoryRecord) -> Result<()> {
        let conn = self.conn.lock().await;
        insert_on(&conn, record)
    }

    async fn bulk_store(&self, records: &[MemoryRecord]) -> Result<usize> {
        let conn = self.conn.lock().await;
        let tx = conn.unchecked_transaction()?;
        for r in records {
            insert_on(&tx, r)?;
        }
        tx.commit()?;
        Ok(records.len())
    }

    async fn query(
        &self,
        pattern: &str,
        operations: &[LogicOperation],
        opts: &QueryOptions,
    ) -> Result<Vec<MemoryRecord>> {
        let conn = self.conn.lock().await;
        let all = load_where(&conn, "", &[])?;
        Ok(select_by_pattern(&all, pattern, operations, opts))
    }

    async fn query_by_category(
        &self,
        category: &str,
        opts: &QueryOptions,
    ) -> Result<Vec<MemoryRecord>> {
        let conn = self.conn.lock().await;
        let rows = load_where(&conn, "WHERE UPPER(category) = UPPER(?1)", &[&category])?;
        Ok(select_by_category(&rows, category, opts))
    }

    async fn get(&self, id: &str) -> Result<Option<MemoryRecord>> {
        let conn = self.conn.lock().await;
        Ok(load_where(&conn, "WHERE id = ?1", &[&id])?.into_iter().next())
    }

    async fn clear(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute_batch("DELETE FROM patterns;")?;
        Ok(())
    }

    async fn stats(&self) -> Result<IndexStats> {
        let conn = self.conn.lock().await;
        let all = load_where(&conn, "", &[])?;
        Ok(index_stats(&all))
    }
}

#[async_trait]
impl PersistentStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn fetch(&self, id: &str) -> Result<Option<MemoryRecord>> {
        CategoryIndexedStore::get(self, id).await
    }

    async fn put(&self, record: &MemoryRecord) -> Result<()> {
        CategoryIndexedStore::store(self, record).await
    }
}
