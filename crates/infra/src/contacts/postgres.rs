//! Postgres-backed contact records.
//!
//! Reads the `"ConversationMedias"` table owned by the contact layer. A
//! media's kind and artifact location live in its `"storeTypeSpecificData"`
//! JSON document:
//!
//! ```json
//! { "type": "transcript", "location": { "bucket": "...", "key": "..." } }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::instrument;

use helpline_core::{
    AccountSid, ArtifactLocation, ContactId, ConversationMedia, ConversationMediaId, MediaKind,
};

use super::{ContactRecords, ContactRecordsError};

#[derive(Debug, Clone)]
pub struct PostgresContactRecords {
    pool: Arc<PgPool>,
}

impl PostgresContactRecords {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn from_shared(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContactRecords for PostgresContactRecords {
    #[instrument(skip(self), fields(account_sid = %account_sid, contact_id = %contact_id), err)]
    async fn conversation_media(
        &self,
        account_sid: &AccountSid,
        contact_id: ContactId,
    ) -> Result<Vec<ConversationMedia>, ContactRecordsError> {
        let rows = sqlx::query(
            r#"
            SELECT "id", "contactId", "accountSid", "storeTypeSpecificData"
            FROM "ConversationMedias"
            WHERE "accountSid" = $1 AND "contactId" = $2
            ORDER BY "id" ASC
            "#,
        )
        .bind(account_sid.as_str())
        .bind(contact_id.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("conversation_media", e))?;

        let mut media = Vec::with_capacity(rows.len());
        for row in rows {
            media.push(media_from_row(&row)?);
        }
        Ok(media)
    }

    #[instrument(
        skip(self, location),
        fields(
            account_sid = %account_sid,
            contact_id = %contact_id,
            media_id = %media_id,
            location = %location
        ),
        err
    )]
    async fn attach_artifact_location(
        &self,
        account_sid: &AccountSid,
        contact_id: ContactId,
        media_id: ConversationMediaId,
        location: &ArtifactLocation,
    ) -> Result<(), ContactRecordsError> {
        let location_json = serde_json::to_value(location)
            .map_err(|e| ContactRecordsError::Storage(e.to_string()))?;

        let result = sqlx::query(
            r#"
            UPDATE "ConversationMedias"
            SET "storeTypeSpecificData" = jsonb_set(
                    CASE jsonb_typeof("storeTypeSpecificData")
                        WHEN 'object' THEN "storeTypeSpecificData"
                        ELSE '{}'::jsonb
                    END,
                    '{location}', $4, true
                ),
                "updatedAt" = NOW()
            WHERE "accountSid" = $1 AND "contactId" = $2 AND "id" = $3
            "#,
        )
        .bind(account_sid.as_str())
        .bind(contact_id.get())
        .bind(media_id.get())
        .bind(location_json)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("attach_artifact_location", e))?;

        if result.rows_affected() == 0 {
            return Err(ContactRecordsError::MediaNotFound {
                contact_id,
                media_id,
            });
        }
        Ok(())
    }
}

fn media_from_row(row: &PgRow) -> Result<ConversationMedia, ContactRecordsError> {
    let decode = |e: sqlx::Error| ContactRecordsError::Storage(format!("failed to decode media row: {e}"));
    let account_sid: String = row.try_get("accountSid").map_err(decode)?;
    let data: Option<JsonValue> = row.try_get("storeTypeSpecificData").map_err(decode)?;
    let data = data.unwrap_or(JsonValue::Null);

    let kind = match data.get("type").and_then(JsonValue::as_str) {
        Some("transcript") => MediaKind::Transcript,
        _ => MediaKind::Recording,
    };
    let location = data
        .get("location")
        .filter(|v| !v.is_null())
        .map(|v| serde_json::from_value::<ArtifactLocation>(v.clone()))
        .transpose()
        .map_err(|e| ContactRecordsError::Storage(format!("invalid media location: {e}")))?;

    Ok(ConversationMedia {
        id: ConversationMediaId::new(row.try_get("id").map_err(decode)?),
        contact_id: ContactId::new(row.try_get("contactId").map_err(decode)?),
        account_sid: AccountSid::new(account_sid)
            .map_err(|e| ContactRecordsError::Storage(e.to_string()))?,
        kind,
        location,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> ContactRecordsError {
    match err {
        sqlx::Error::Database(db_err) => ContactRecordsError::Storage(format!(
            "database error in {}: {}",
            operation,
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            ContactRecordsError::Storage(format!("connection pool closed in {}", operation))
        }
        _ => ContactRecordsError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}
