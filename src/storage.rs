use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Result};

/// One stored HTTP response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl CachedResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Versioned asset store. Each generation is a named set of url entries.
pub struct CacheStore {
    conn: Connection,
}

impl CacheStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
            CREATE TABLE IF NOT EXISTS cache_generations (
                name TEXT PRIMARY KEY
            );
            CREATE TABLE IF NOT EXISTS cache_entries (
                generation TEXT NOT NULL REFERENCES cache_generations(name) ON DELETE CASCADE,
                url TEXT NOT NULL,
                status INTEGER NOT NULL,
                content_type TEXT,
                body BLOB NOT NULL,
                stored_at TEXT NOT NULL,
                PRIMARY KEY (generation, url)
            );",
        )?;
        Ok(CacheStore { conn })
    }

    pub fn open_generation(&self, name: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO cache_generations (name) VALUES (?1)",
            [name],
        )?;
        Ok(())
    }

    pub fn put(&self, generation: &str, url: &str, response: &CachedResponse) -> Result<()> {
        self.open_generation(generation)?;
        insert_entry(&self.conn, generation, url, response)
    }

    /// Store every entry or none of them.
    pub fn put_all(&mut self, generation: &str, entries: &[(String, CachedResponse)]) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO cache_generations (name) VALUES (?1)",
            [generation],
        )?;
        for (url, response) in entries {
            insert_entry(&tx, generation, url, response)?;
        }
        tx.commit()
    }

    pub fn lookup(&self, generation: &str, url: &str) -> Result<Option<CachedResponse>> {
        self.conn
            .query_row(
                "SELECT status, content_type, body FROM cache_entries
                 WHERE generation = ?1 AND url = ?2",
                [generation, url],
                |row| {
                    Ok(CachedResponse {
                        status: row.get(0)?,
                        content_type: row.get(1)?,
                        body: row.get(2)?,
                    })
                },
            )
            .optional()
    }

    pub fn generations(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM cache_generations ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>>>()?;
        Ok(names)
    }

    pub fn delete_generation(&self, name: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM cache_entries WHERE generation = ?1", [name])?;
        self.conn
            .execute("DELETE FROM cache_generations WHERE name = ?1", [name])?;
        Ok(())
    }

    pub fn entry_count(&self, generation: &str) -> Result<usize> {
        self.conn.query_row(
            "SELECT COUNT(*) FROM cache_entries WHERE generation = ?1",
            [generation],
            |row| row.get(0),
        )
    }
}

fn insert_entry(conn: &Connection, generation: &str, url: &str, response: &CachedResponse) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO cache_entries (generation, url, status, content_type, body, stored_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            generation,
            url,
            response.status,
            response.content_type,
            response.body,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}
