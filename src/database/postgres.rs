// src/database/postgres.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};

use super::StateStore;
use crate::types::{Keyword, MatchQuery, MatchRecord, MatchedCertificate, MonitorProgress};

/// PostgreSQL-backed `StateStore`.
pub struct PostgresStateStore {
    pool: PgPool,
}

impl PostgresStateStore {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        info!("connecting to PostgreSQL");

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("failed to connect to PostgreSQL")?;

        info!("connected to PostgreSQL successfully");

        Ok(Self { pool })
    }

    /// Create the schema if absent and ensure the `monitor_progress`
    /// singleton row exists. Idempotent: safe to call on every startup.
    pub async fn migrate(&self) -> Result<()> {
        info!("running schema migrations");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS keywords (
                id BIGSERIAL PRIMARY KEY,
                value TEXT NOT NULL UNIQUE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create keywords table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS matched_certificates (
                id BIGSERIAL PRIMARY KEY,
                serial TEXT NOT NULL,
                common_name TEXT NOT NULL,
                sans TEXT[] NOT NULL,
                issuer TEXT NOT NULL,
                not_before BIGINT NOT NULL,
                not_after BIGINT NOT NULL,
                cert_timestamp BIGINT NOT NULL,
                keyword_id BIGINT NOT NULL REFERENCES keywords(id) ON DELETE CASCADE,
                matched_domain TEXT NOT NULL,
                ct_log_index BIGINT NOT NULL,
                discovered_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (serial, keyword_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create matched_certificates table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_matched_certificates_keyword_id \
             ON matched_certificates(keyword_id)",
        )
        .execute(&self.pool)
        .await
        .context("failed to create keyword_id index")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_matched_certificates_discovered_at \
             ON matched_certificates(discovered_at DESC)",
        )
        .execute(&self.pool)
        .await
        .context("failed to create discovered_at index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS monitor_progress (
                id SMALLINT PRIMARY KEY DEFAULT 1 CHECK (id = 1),
                last_processed_index BIGINT NOT NULL DEFAULT 0,
                last_tree_size BIGINT NOT NULL DEFAULT 0,
                last_run_at TIMESTAMPTZ,
                total_processed BIGINT NOT NULL DEFAULT 0,
                certs_in_last_cycle BIGINT NOT NULL DEFAULT 0,
                matches_in_last_cycle BIGINT NOT NULL DEFAULT 0,
                parse_errors_in_last_cycle BIGINT NOT NULL DEFAULT 0,
                is_running BOOLEAN NOT NULL DEFAULT FALSE,
                last_error TEXT NOT NULL DEFAULT '',
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create monitor_progress table")?;

        sqlx::query("INSERT INTO monitor_progress (id) VALUES (1) ON CONFLICT (id) DO NOTHING")
            .execute(&self.pool)
            .await
            .context("failed to seed monitor_progress singleton")?;

        info!("schema migrations complete");

        Ok(())
    }

    fn row_to_progress(row: &PgRow) -> MonitorProgress {
        MonitorProgress {
            last_processed_index: row.get::<i64, _>("last_processed_index") as u64,
            last_tree_size: row.get::<i64, _>("last_tree_size") as u64,
            last_run_at: row.get::<Option<DateTime<Utc>>, _>("last_run_at"),
            total_processed: row.get::<i64, _>("total_processed") as u64,
            certs_in_last_cycle: row.get::<i64, _>("certs_in_last_cycle") as u64,
            matches_in_last_cycle: row.get::<i64, _>("matches_in_last_cycle") as u64,
            parse_errors_in_last_cycle: row.get::<i64, _>("parse_errors_in_last_cycle") as u64,
            is_running: row.get("is_running"),
            last_error: row.get("last_error"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[async_trait]
impl StateStore for PostgresStateStore {
    async fn list_keywords(&self) -> Result<Vec<Keyword>> {
        let rows = sqlx::query("SELECT id, value, created_at FROM keywords ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("failed to list keywords")?;

        Ok(rows
            .into_iter()
            .map(|row| Keyword {
                id: row.get("id"),
                value: row.get("value"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn insert_match(&self, cert: &MatchedCertificate) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO matched_certificates (
                serial, common_name, sans, issuer, not_before, not_after,
                cert_timestamp, keyword_id, matched_domain, ct_log_index
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (serial, keyword_id) DO NOTHING
            "#,
        )
        .bind(&cert.serial)
        .bind(&cert.common_name)
        .bind(&cert.sans)
        .bind(&cert.issuer)
        .bind(cert.not_before)
        .bind(cert.not_after)
        .bind(cert.timestamp as i64)
        .bind(cert.keyword_id)
        .bind(&cert.matched_domain)
        .bind(cert.ct_log_index as i64)
        .execute(&self.pool)
        .await
        .context("failed to insert match")?;

        debug!(
            "insert_match: serial={} keyword_id={}",
            cert.serial, cert.keyword_id
        );

        Ok(())
    }

    async fn get_progress(&self) -> Result<MonitorProgress> {
        let row = sqlx::query("SELECT * FROM monitor_progress WHERE id = 1")
            .fetch_one(&self.pool)
            .await
            .context("failed to read monitor_progress")?;

        Ok(Self::row_to_progress(&row))
    }

    async fn update_progress(&self, progress: &MonitorProgress) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE monitor_progress SET
                last_processed_index = $1,
                last_tree_size = $2,
                total_processed = $3,
                certs_in_last_cycle = $4,
                matches_in_last_cycle = $5,
                parse_errors_in_last_cycle = $6,
                is_running = $7,
                last_run_at = NOW(),
                updated_at = NOW()
            WHERE id = 1
            "#,
        )
        .bind(progress.last_processed_index as i64)
        .bind(progress.last_tree_size as i64)
        .bind(progress.total_processed as i64)
        .bind(progress.certs_in_last_cycle as i64)
        .bind(progress.matches_in_last_cycle as i64)
        .bind(progress.parse_errors_in_last_cycle as i64)
        .bind(progress.is_running)
        .execute(&self.pool)
        .await
        .context("failed to update monitor_progress")?;

        Ok(())
    }

    async fn set_running(&self, running: bool) -> Result<()> {
        sqlx::query("UPDATE monitor_progress SET is_running = $1, updated_at = NOW() WHERE id = 1")
            .bind(running)
            .execute(&self.pool)
            .await
            .context("failed to set is_running")?;

        Ok(())
    }

    async fn set_last_error(&self, message: &str) -> Result<()> {
        sqlx::query("UPDATE monitor_progress SET last_error = $1, updated_at = NOW() WHERE id = 1")
            .bind(message)
            .execute(&self.pool)
            .await
            .context("failed to set last_error")?;

        Ok(())
    }

    async fn reset_running_flag(&self) -> Result<()> {
        sqlx::query(
            "UPDATE monitor_progress SET is_running = FALSE, updated_at = NOW() WHERE id = 1",
        )
        .execute(&self.pool)
        .await
        .context("failed to reset is_running at startup")?;

        Ok(())
    }

    async fn insert_keyword(&self, value: &str) -> Result<Keyword> {
        let row =
            sqlx::query("INSERT INTO keywords (value) VALUES ($1) RETURNING id, value, created_at")
                .bind(value)
                .fetch_one(&self.pool)
                .await
                .context("failed to insert keyword")?;

        Ok(Keyword {
            id: row.get("id"),
            value: row.get("value"),
            created_at: row.get("created_at"),
        })
    }

    async fn delete_keyword(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM keywords WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("failed to delete keyword")?;

        Ok(())
    }

    async fn list_matches(&self, query: &MatchQuery) -> Result<Vec<MatchRecord>> {
        let mut sql = String::from(
            "SELECT id, serial, common_name, sans, issuer, not_before, not_after, \
             cert_timestamp, keyword_id, matched_domain, ct_log_index, discovered_at \
             FROM matched_certificates WHERE 1 = 1",
        );

        let mut bind_count = 0;
        if query.keyword_id.is_some() {
            bind_count += 1;
            sql.push_str(&format!(" AND keyword_id = ${bind_count}"));
        }
        if query.domain_pattern.is_some() {
            bind_count += 1;
            sql.push_str(&format!(" AND matched_domain ILIKE ${bind_count}"));
        }
        sql.push_str(" ORDER BY discovered_at DESC");

        bind_count += 1;
        sql.push_str(&format!(" LIMIT ${bind_count}"));
        bind_count += 1;
        sql.push_str(&format!(" OFFSET ${bind_count}"));

        let mut q = sqlx::query(&sql);
        if let Some(kw_id) = query.keyword_id {
            q = q.bind(kw_id);
        }
        if let Some(ref pattern) = query.domain_pattern {
            q = q.bind(format!("%{pattern}%"));
        }
        q = q.bind(query.limit).bind(query.offset);

        let rows = q
            .fetch_all(&self.pool)
            .await
            .context("failed to list matches")?;

        Ok(rows
            .into_iter()
            .map(|row| MatchRecord {
                id: row.get("id"),
                cert: MatchedCertificate {
                    serial: row.get("serial"),
                    common_name: row.get("common_name"),
                    sans: row.get("sans"),
                    issuer: row.get("issuer"),
                    not_before: row.get("not_before"),
                    not_after: row.get("not_after"),
                    timestamp: row.get::<i64, _>("cert_timestamp") as u64,
                    keyword_id: row.get("keyword_id"),
                    matched_domain: row.get("matched_domain"),
                    ct_log_index: row.get::<i64, _>("ct_log_index") as u64,
                },
                discovered_at: row.get("discovered_at"),
            })
            .collect())
    }
}
