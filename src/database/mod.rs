use anyhow::{Context, Result};
use sqlx::{Row, Sqlite, SqlitePool, migrate::MigrateDatabase};
use tracing::info;

use crate::models::ReviewRow;
use crate::review::ReviewTable;

pub const DEFAULT_WORKSPACE: &str = "sqlite:gomag-workspace.db";

/// SQLite snapshot of the Review Table between CLI invocations
pub struct ReviewStore {
    pool: SqlitePool,
}

impl ReviewStore {
    pub async fn new(db_url: &str) -> Result<Self> {
        // Create database file if it doesn't exist
        if !Sqlite::database_exists(db_url).await.unwrap_or(false) {
            info!("Creating workspace database {}", db_url);
            Sqlite::create_database(db_url).await?;
        }

        let pool = SqlitePool::connect(db_url)
            .await
            .with_context(|| format!("opening workspace {db_url}"))?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Replace the stored table with `table`.
    pub async fn save_table(&self, table: &ReviewTable) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM review_rows").execute(&mut *tx).await?;
        for row in table.rows() {
            let payload = serde_json::to_string(row)?;
            sqlx::query(
                r"
                INSERT INTO review_rows (idx, payload, updated_at)
                VALUES (?, ?, ?)
                ",
            )
            .bind(row.index as i64)
            .bind(payload)
            .bind(row.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("DELETE FROM categories").execute(&mut *tx).await?;
        for (position, name) in table.categories().iter().enumerate() {
            sqlx::query("INSERT OR IGNORE INTO categories (position, name) VALUES (?, ?)")
                .bind(position as i64)
                .bind(name)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        info!(
            "Saved {} review rows and {} categories",
            table.len(),
            table.categories().len()
        );
        Ok(())
    }

    pub async fn load_table(&self) -> Result<ReviewTable> {
        let rows = sqlx::query("SELECT idx, payload FROM review_rows ORDER BY idx")
            .fetch_all(&self.pool)
            .await?;

        let rows = rows
            .into_iter()
            .map(|row| {
                let idx = row.get::<i64, _>("idx");
                serde_json::from_str::<ReviewRow>(&row.get::<String, _>("payload"))
                    .with_context(|| format!("corrupt review row {idx}"))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut table = ReviewTable::from_rows(rows);
        table.set_categories(self.load_categories().await?);
        Ok(table)
    }

    /// Store the admin categories without touching the rows.
    pub async fn save_categories(&self, categories: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM categories").execute(&mut *tx).await?;
        for (position, name) in categories.iter().enumerate() {
            sqlx::query("INSERT OR IGNORE INTO categories (position, name) VALUES (?, ?)")
                .bind(position as i64)
                .bind(name)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn load_categories(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT name FROM categories ORDER BY position")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| row.get::<String, _>("name"))
            .collect())
    }
}

impl Clone for ReviewStore {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
        }
    }
}
