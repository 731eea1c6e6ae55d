//! SQLite-backed [`ItemStore`].
//!
//! Sets (topics, tags) and the job queue are stored as JSON text,
//! embeddings as little-endian `f32` BLOBs, and timestamps as RFC 3339
//! text so they survive a round trip without losing precision.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use starshelf_core::index::IndexSnapshot;
use starshelf_core::models::{IndexJob, Item, ItemId, Setting};
use starshelf_core::store::{ItemStore, StoreContents, VECTOR_SNAPSHOT};
use starshelf_core::vector::{blob_to_vec, vec_to_blob};

const ITEM_COLUMNS: &str = "id, name, full_name, owner, description, html_url, language, \
     stargazers, topics_json, readme, ai_summary, ai_tags_json, embedding, starred_at, \
     updated_at, enriched_at";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("invalid timestamp in store: {}", s))?
        .with_timezone(&Utc))
}

fn row_to_item(row: &SqliteRow) -> Result<Item> {
    let topics_json: String = row.get("topics_json");
    let tags_json: String = row.get("ai_tags_json");
    let embedding: Option<Vec<u8>> = row.get("embedding");
    let stargazers: i64 = row.get("stargazers");
    let starred_at: String = row.get("starred_at");
    let updated_at: String = row.get("updated_at");
    let enriched_at: Option<String> = row.get("enriched_at");

    Ok(Item {
        id: row.get("id"),
        name: row.get("name"),
        full_name: row.get("full_name"),
        owner: row.get("owner"),
        description: row.get("description"),
        html_url: row.get("html_url"),
        language: row.get("language"),
        stargazers: stargazers.max(0) as u64,
        topics: serde_json::from_str(&topics_json).context("invalid topics_json")?,
        readme: row.get("readme"),
        ai_summary: row.get("ai_summary"),
        ai_tags: serde_json::from_str(&tags_json).context("invalid ai_tags_json")?,
        embedding: embedding.as_deref().map(blob_to_vec).unwrap_or_default(),
        starred_at: parse_ts(&starred_at)?,
        updated_at: parse_ts(&updated_at)?,
        enriched_at: enriched_at.as_deref().map(parse_ts).transpose()?,
    })
}

fn row_to_job(row: &SqliteRow) -> Result<IndexJob> {
    let queue_json: String = row.get("queue_json");
    let done: i64 = row.get("done");
    let total: i64 = row.get("total");
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");
    Ok(IndexJob {
        id: row.get("id"),
        queue: serde_json::from_str(&queue_json).context("invalid queue_json")?,
        done: done.max(0) as usize,
        total: total.max(0) as usize,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

async fn insert_item(conn: &mut SqliteConnection, item: &Item) -> Result<()> {
    let embedding = if item.embedding.is_empty() {
        None
    } else {
        Some(vec_to_blob(&item.embedding))
    };
    sqlx::query(
        r#"
        INSERT INTO items (id, name, full_name, owner, description, html_url, language,
                           stargazers, topics_json, readme, ai_summary, ai_tags_json,
                           embedding, starred_at, updated_at, enriched_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            full_name = excluded.full_name,
            owner = excluded.owner,
            description = excluded.description,
            html_url = excluded.html_url,
            language = excluded.language,
            stargazers = excluded.stargazers,
            topics_json = excluded.topics_json,
            readme = excluded.readme,
            ai_summary = excluded.ai_summary,
            ai_tags_json = excluded.ai_tags_json,
            embedding = excluded.embedding,
            starred_at = excluded.starred_at,
            updated_at = excluded.updated_at,
            enriched_at = excluded.enriched_at
        "#,
    )
    .bind(item.id)
    .bind(&item.name)
    .bind(&item.full_name)
    .bind(&item.owner)
    .bind(&item.description)
    .bind(&item.html_url)
    .bind(&item.language)
    .bind(item.stargazers as i64)
    .bind(serde_json::to_string(&item.topics)?)
    .bind(&item.readme)
    .bind(&item.ai_summary)
    .bind(serde_json::to_string(&item.ai_tags)?)
    .bind(embedding)
    .bind(format_ts(&item.starred_at))
    .bind(format_ts(&item.updated_at))
    .bind(item.enriched_at.as_ref().map(format_ts))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_job(conn: &mut SqliteConnection, job: &IndexJob) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO jobs (id, queue_json, done, total, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            queue_json = excluded.queue_json,
            done = excluded.done,
            total = excluded.total,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&job.id)
    .bind(serde_json::to_string(&job.queue)?)
    .bind(job.done as i64)
    .bind(job.total as i64)
    .bind(format_ts(&job.created_at))
    .bind(format_ts(&job.updated_at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_setting(conn: &mut SqliteConnection, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_snapshot(
    conn: &mut SqliteConnection,
    name: &str,
    snapshot: &IndexSnapshot,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO index_snapshots (name, version, data, updated_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(name) DO UPDATE SET
            version = excluded.version,
            data = excluded.data,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(name)
    .bind(&snapshot.version)
    .bind(&snapshot.data)
    .bind(format_ts(&Utc::now()))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[async_trait]
impl ItemStore for SqliteStore {
    async fn list_items(&self) -> Result<Vec<Item>> {
        let rows = sqlx::query(&format!("SELECT {} FROM items ORDER BY id ASC", ITEM_COLUMNS))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_item).collect()
    }

    async fn get_items(&self, ids: &[ItemId]) -> Result<Vec<Item>> {
        let mut items = Vec::with_capacity(ids.len());
        for id in ids {
            let row = sqlx::query(&format!("SELECT {} FROM items WHERE id = ?", ITEM_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
            if let Some(row) = row {
                items.push(row_to_item(&row)?);
            }
        }
        Ok(items)
    }

    async fn upsert_item(&self, item: &Item) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        insert_item(&mut conn, item).await
    }

    async fn remove_items(&self, ids: &[ItemId]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query("DELETE FROM items WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn load_job(&self) -> Result<Option<IndexJob>> {
        let row = sqlx::query(
            "SELECT id, queue_json, done, total, created_at, updated_at FROM jobs \
             ORDER BY created_at ASC, id ASC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_job).transpose()
    }

    async fn save_job(&self, job: &IndexJob) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        insert_job(&mut conn, job).await
    }

    async fn clear_job(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_jobs(&self) -> Result<Vec<IndexJob>> {
        let rows = sqlx::query(
            "SELECT id, queue_json, done, total, created_at, updated_at FROM jobs ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_job).collect()
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn put_setting(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        insert_setting(&mut conn, key, value).await
    }

    async fn list_settings(&self) -> Result<Vec<Setting>> {
        let rows = sqlx::query("SELECT key, value FROM settings ORDER BY key ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| Setting {
                key: row.get("key"),
                value: row.get("value"),
            })
            .collect())
    }

    async fn load_snapshot(&self, name: &str) -> Result<Option<IndexSnapshot>> {
        let row = sqlx::query("SELECT version, data FROM index_snapshots WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| IndexSnapshot {
            version: row.get("version"),
            data: row.get("data"),
        }))
    }

    async fn save_snapshot(&self, name: &str, snapshot: &IndexSnapshot) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        insert_snapshot(&mut conn, name, snapshot).await
    }

    async fn replace_all(&self, contents: StoreContents) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for table in ["items", "jobs", "settings", "index_snapshots"] {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&mut *tx)
                .await?;
        }
        for item in &contents.items {
            insert_item(&mut tx, item).await?;
        }
        for job in &contents.jobs {
            insert_job(&mut tx, job).await?;
        }
        for setting in &contents.settings {
            insert_setting(&mut tx, &setting.key, &setting.value).await?;
        }
        if let Some(snapshot) = &contents.snapshot {
            insert_snapshot(&mut tx, VECTOR_SNAPSHOT, snapshot).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};
    use tempfile::TempDir;

    async fn store() -> (TempDir, SqliteStore) {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("shelf.sqlite")).await.unwrap();
        migrate::apply(&pool).await.unwrap();
        (tmp, SqliteStore::new(pool))
    }

    fn enriched(id: ItemId) -> Item {
        let mut item = Item::new(id, "acme", &format!("repo-{}", id));
        item.description = Some("desc".into());
        item.topics = vec!["cli".into(), "rust".into()];
        item.ai_summary = Some("summary".into());
        item.ai_tags = vec!["tool".into()];
        item.embedding = vec![0.25, -0.5];
        item.enriched_at = Some(Utc::now());
        item.stargazers = 12;
        item
    }

    #[tokio::test]
    async fn item_fields_survive_storage() {
        let (_tmp, store) = store().await;
        let item = enriched(3);
        store.upsert_item(&item).await.unwrap();
        let loaded = store.get_items(&[3, 4]).await.unwrap();
        assert_eq!(loaded, vec![item]);
    }

    #[tokio::test]
    async fn upsert_overwrites() {
        let (_tmp, store) = store().await;
        let mut item = enriched(1);
        store.upsert_item(&item).await.unwrap();
        item.ai_summary = None;
        item.embedding.clear();
        store.upsert_item(&item).await.unwrap();
        let all = store.list_items().await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].needs_enrichment());
    }

    #[tokio::test]
    async fn job_and_settings() {
        let (_tmp, store) = store().await;
        let mut job = IndexJob::new("job-1", vec![5, 6, 7]);
        store.save_job(&job).await.unwrap();
        job.advance(1);
        store.save_job(&job).await.unwrap();
        assert_eq!(store.load_job().await.unwrap(), Some(job.clone()));
        store.clear_job(&job.id).await.unwrap();
        assert_eq!(store.load_job().await.unwrap(), None);

        store.put_setting("last_sync_at", "a").await.unwrap();
        store.put_setting("last_sync_at", "b").await.unwrap();
        assert_eq!(store.get_setting("last_sync_at").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn replace_all_is_complete() {
        let (_tmp, store) = store().await;
        store.upsert_item(&enriched(1)).await.unwrap();
        store.put_setting("old", "x").await.unwrap();

        let contents = StoreContents {
            items: vec![enriched(8), enriched(9)],
            jobs: vec![IndexJob::new("j", vec![9])],
            settings: vec![Setting {
                key: "new".into(),
                value: "y".into(),
            }],
            snapshot: Some(IndexSnapshot {
                version: "flat-l2-v1".into(),
                data: b"{}".to_vec(),
            }),
        };
        store.replace_all(contents.clone()).await.unwrap();
        assert_eq!(store.export_all().await.unwrap(), contents);
    }
}
