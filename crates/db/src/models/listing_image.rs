use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use ts_rs::TS;

/// One photo attached to a listing, served from the hosted image
/// service. `position` is the gallery order.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize, TS)]
pub struct ListingImage {
    pub id: i64,
    pub listing_id: i64,
    pub url: String,
    pub position: i32,
    pub created_at: DateTime<Utc>,
}

impl ListingImage {
    pub async fn find_by_listing_id(
        pool: &SqlitePool,
        listing_id: i64,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"SELECT id, listing_id, url, position, created_at
               FROM listing_images
               WHERE listing_id = $1
               ORDER BY position ASC, id ASC"#,
        )
        .bind(listing_id)
        .fetch_all(pool)
        .await
    }

    /// Inserts one row per URL, positions following the slice order.
    pub async fn create_many(
        pool: &SqlitePool,
        listing_id: i64,
        urls: &[String],
    ) -> Result<(), sqlx::Error> {
        for (position, url) in urls.iter().enumerate() {
            sqlx::query(
                "INSERT INTO listing_images (listing_id, url, position) VALUES ($1, $2, $3)",
            )
            .bind(listing_id)
            .bind(url)
            .bind(position as i32)
            .execute(pool)
            .await?;
        }
        Ok(())
    }

    pub async fn delete_by_listing_id(
        pool: &SqlitePool,
        listing_id: i64,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM listing_images WHERE listing_id = $1")
            .bind(listing_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
