//! Postgres record store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};

use super::{ConditionalUpdate, LogFilter, RecordStore};
use crate::email::{EmailLog, EmailStatus, NewEmailLog, TrackingId};
use crate::error::{StoreError, StoreResult};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS email_logs (
    tracking_id       TEXT PRIMARY KEY,
    recipient_address TEXT NOT NULL,
    group_label       TEXT NOT NULL,
    status            TEXT NOT NULL CHECK (status IN ('Sent', 'Opened')),
    sender_origin_ip  TEXT,
    sent_at           TIMESTAMPTZ NOT NULL,
    opened_at         TIMESTAMPTZ,
    CHECK ((status = 'Opened') = (opened_at IS NOT NULL))
)
"#;

const SENT_AT_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS email_logs_sent_at_idx ON email_logs (sent_at DESC)";

const COLUMNS: &str =
    "tracking_id, recipient_address, group_label, status, sender_origin_ip, sent_at, opened_at";

/// Row shape of the `email_logs` table.
#[derive(Debug, sqlx::FromRow)]
struct EmailLogRow {
    tracking_id: String,
    recipient_address: String,
    group_label: String,
    status: String,
    sender_origin_ip: Option<String>,
    sent_at: DateTime<Utc>,
    opened_at: Option<DateTime<Utc>>,
}

impl TryFrom<EmailLogRow> for EmailLog {
    type Error = StoreError;

    fn try_from(row: EmailLogRow) -> Result<Self, Self::Error> {
        let tracking_id = TrackingId::parse(&row.tracking_id)
            .map_err(|e| StoreError::Corrupt(format!("{}: {}", row.tracking_id, e)))?;
        let status = row
            .status
            .parse::<EmailStatus>()
            .map_err(|e| StoreError::Corrupt(format!("{}: {}", row.tracking_id, e)))?;

        Ok(EmailLog {
            tracking_id,
            recipient_address: row.recipient_address,
            group_label: row.group_label,
            status,
            sender_origin_ip: row.sender_origin_ip,
            sent_at: row.sent_at,
            opened_at: row.opened_at,
        })
    }
}

/// Record store on a Postgres connection pool.
///
/// The open transition is a single `UPDATE ... WHERE status = 'Sent'`, so
/// Postgres row locking gives one winner among concurrent opens.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect and make sure the schema exists.
    pub async fn connect(url: &str, max_connections: u32) -> StoreResult<Self> {
        info!(max_connections = max_connections, "postgres_connecting");

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub async fn ensure_schema(&self) -> StoreResult<()> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        sqlx::query(SENT_AT_INDEX).execute(&self.pool).await?;
        info!(table = "email_logs", "postgres_schema_ready");
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PostgresStore {
    async fn create(&self, new_log: NewEmailLog, sent_at: DateTime<Utc>) -> StoreResult<EmailLog> {
        let sql = format!(
            "INSERT INTO email_logs ({COLUMNS}) \
             VALUES ($1, $2, $3, 'Sent', $4, $5, NULL) \
             ON CONFLICT (tracking_id) DO NOTHING \
             RETURNING {COLUMNS}"
        );

        let row: Option<EmailLogRow> = sqlx::query_as(&sql)
            .bind(new_log.tracking_id.as_str())
            .bind(&new_log.recipient_address)
            .bind(&new_log.group_label)
            .bind(new_log.sender_origin_ip.as_deref())
            .bind(sent_at)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row.try_into(),
            None => Err(StoreError::Duplicate(new_log.tracking_id.to_string())),
        }
    }

    async fn find(&self, tracking_id: &TrackingId) -> StoreResult<Option<EmailLog>> {
        let sql = format!("SELECT {COLUMNS} FROM email_logs WHERE tracking_id = $1");

        let row: Option<EmailLogRow> = sqlx::query_as(&sql)
            .bind(tracking_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(EmailLog::try_from).transpose()
    }

    async fn conditional_update(
        &self,
        tracking_id: &TrackingId,
        request_ip: Option<&str>,
        opened_at: DateTime<Utc>,
    ) -> StoreResult<ConditionalUpdate> {
        let request_ip = request_ip.map(str::trim).filter(|ip| !ip.is_empty());

        let sql = format!(
            "UPDATE email_logs SET status = 'Opened', opened_at = $3 \
             WHERE tracking_id = $1 \
               AND status = 'Sent' \
               AND ($2::text IS NULL \
                    OR sender_origin_ip IS NULL \
                    OR sender_origin_ip = '' \
                    OR sender_origin_ip <> $2) \
             RETURNING {COLUMNS}"
        );

        let updated: Option<EmailLogRow> = sqlx::query_as(&sql)
            .bind(tracking_id.as_str())
            .bind(request_ip)
            .bind(opened_at)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = updated {
            return Ok(ConditionalUpdate::Applied(row.try_into()?));
        }

        debug!(tracking_id = %tracking_id, "postgres_conditional_update_no_rows");

        // Nothing updated: tell a failed condition apart from an unknown id.
        Ok(match self.find(tracking_id).await? {
            Some(log) => ConditionalUpdate::Rejected(log),
            None => ConditionalUpdate::Missing,
        })
    }

    async fn list(&self, filter: &LogFilter) -> StoreResult<Vec<EmailLog>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM email_logs \
             WHERE ($1::text IS NULL OR group_label = $1) \
               AND ($2::timestamptz IS NULL OR sent_at >= $2) \
               AND ($3::text IS NULL OR status = $3) \
             ORDER BY sent_at DESC"
        );

        let rows: Vec<EmailLogRow> = sqlx::query_as(&sql)
            .bind(filter.group_label.as_deref())
            .bind(filter.sent_since)
            .bind(filter.status.map(|s| s.as_str()))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(EmailLog::try_from).collect()
    }
}
