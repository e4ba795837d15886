//! Destination persistence
//!
//! Destinations are resolved by normalized (name, country) and created on
//! first request. Attributes supplied by a later request replace stored ones;
//! omitted attributes keep their stored value.

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tda_common::{Error, Result};
use uuid::Uuid;

use super::{parse_timestamp, parse_uuid};
use crate::models::{BoundingBox, Destination, DestinationRequest};
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

const SELECT_COLUMNS: &str = "destination_id, name, country, region, website, social_handle, bbox, created_at";

/// Find the destination for `request`, creating it when unknown
pub async fn resolve_or_create(
    pool: &SqlitePool,
    request: &DestinationRequest,
) -> Result<Destination> {
    let name_key = request.name_key();
    let country_key = request.country_key();
    let bbox = request
        .bbox
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    retry_on_lock("resolve destination", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let existing: Option<String> = sqlx::query_scalar(
            "SELECT destination_id FROM destinations WHERE name_key = ? AND country_key = ?",
        )
        .bind(&name_key)
        .bind(&country_key)
        .fetch_optional(pool)
        .await?;

        match existing {
            Some(destination_id) => {
                sqlx::query(
                    r#"
                    UPDATE destinations SET
                        region = COALESCE(?, region),
                        website = COALESCE(?, website),
                        social_handle = COALESCE(?, social_handle),
                        bbox = COALESCE(?, bbox)
                    WHERE destination_id = ?
                    "#,
                )
                .bind(&request.region)
                .bind(&request.website)
                .bind(&request.social_handle)
                .bind(&bbox)
                .bind(&destination_id)
                .execute(pool)
                .await?;
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO destinations (
                        destination_id, name, name_key, country, country_key,
                        region, website, social_handle, bbox, created_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(Uuid::new_v4().to_string())
                .bind(request.name.trim())
                .bind(&name_key)
                .bind(request.country.trim())
                .bind(&country_key)
                .bind(&request.region)
                .bind(&request.website)
                .bind(&request.social_handle)
                .bind(&bbox)
                .bind(Utc::now().to_rfc3339())
                .execute(pool)
                .await?;
            }
        }
        Ok::<_, Error>(())
    })
    .await?;

    let row = sqlx::query(&format!(
        "SELECT {} FROM destinations WHERE name_key = ? AND country_key = ?",
        SELECT_COLUMNS
    ))
    .bind(&name_key)
    .bind(&country_key)
    .fetch_one(pool)
    .await?;

    destination_from_row(&row)
}

/// Load a destination by id
pub async fn load_destination(pool: &SqlitePool, destination_id: Uuid) -> Result<Option<Destination>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM destinations WHERE destination_id = ?",
        SELECT_COLUMNS
    ))
    .bind(destination_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(destination_from_row).transpose()
}

fn destination_from_row(row: &SqliteRow) -> Result<Destination> {
    let destination_id: String = row.get("destination_id");
    let bbox: Option<String> = row.get("bbox");
    let bbox = bbox
        .map(|raw| serde_json::from_str::<BoundingBox>(&raw))
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to deserialize bbox: {}", e)))?;
    let created_at: String = row.get("created_at");

    Ok(Destination {
        destination_id: parse_uuid(&destination_id, "destination_id")?,
        name: row.get("name"),
        country: row.get("country"),
        region: row.get("region"),
        website: row.get("website"),
        social_handle: row.get("social_handle"),
        bbox,
        created_at: parse_timestamp(&created_at, "created_at")?,
    })
}
