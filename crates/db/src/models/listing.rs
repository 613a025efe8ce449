use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::{FromRow, SqlitePool, Type};
use strum_macros::{Display, EnumString};
use ts_rs::TS;

use super::listing_image::ListingImage;
use crate::aggregate::{AggregatedListing, JoinRow, ListingId, PartialListing, aggregate};

#[derive(Debug, Clone, Type, Serialize, Deserialize, PartialEq, TS, EnumString, Display)]
#[sqlx(type_name = "category", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Category {
    Sedan,
    Suv,
    Hatchback,
    Coupe,
    Convertible,
    Truck,
    Van,
    Wagon,
}

/// Visibility of a listing. Public surfaces show `Active` only; the
/// admin panel sees everything.
#[derive(
    Debug, Clone, Type, Serialize, Deserialize, PartialEq, TS, EnumString, Display, Default,
)]
#[sqlx(type_name = "listing_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ListingStatus {
    Active,
    #[default]
    Pending,
    Sold,
    Archived,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TS)]
pub struct Listing {
    pub id: i64,
    pub seller_id: String, // identity provider id, opaque to us
    pub title: String,
    pub make: String,
    pub model: String,
    pub year: i32,
    pub price: i64, // minor currency units
    pub mileage: i32,
    pub category: Category,
    pub status: ListingStatus,
    pub description: Option<String>,
    pub location: Option<String>,
    pub features: Option<String>, // JSON-serialized free-form map
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Listing {
    /// Parse the features JSON into a map
    pub fn parsed_features(&self) -> Option<Map<String, Value>> {
        self.features
            .as_ref()
            .and_then(|json| serde_json::from_str(json).ok())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
pub struct CreateListing {
    pub seller_id: String,
    pub title: String,
    pub make: String,
    pub model: String,
    pub year: i32,
    pub price: i64,
    pub mileage: i32,
    pub category: Category,
    pub status: Option<ListingStatus>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub features: Option<Value>,
    pub image_urls: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize, TS)]
pub struct UpdateListing {
    pub title: Option<String>,
    pub price: Option<i64>,
    pub mileage: Option<i32>,
    pub status: Option<ListingStatus>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub features: Option<Value>,
    pub image_urls: Option<Vec<String>>,
}

/// Optional filters applied by the search surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
pub struct ListingFilters {
    pub q: Option<String>,
    pub category: Option<Category>,
    pub make: Option<String>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
}

/// One row of the listings/images outer join, as selected by
/// `JOIN_SELECT`. Image columns are nullable: a listing with no photos
/// still produces one row.
#[derive(Debug, FromRow)]
struct ListingImageJoinRecord {
    id: i64,
    seller_id: String,
    title: String,
    make: String,
    model: String,
    year: i32,
    price: i64,
    mileage: i32,
    category: Category,
    status: ListingStatus,
    description: Option<String>,
    location: Option<String>,
    features: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    image_id: Option<i64>,
    image_listing_id: Option<i64>,
    image_url: Option<String>,
    image_position: Option<i32>,
    image_created_at: Option<DateTime<Utc>>,
}

impl ListingImageJoinRecord {
    fn into_join_row(self) -> JoinRow {
        let image = match (
            self.image_id,
            self.image_listing_id,
            self.image_url,
            self.image_position,
            self.image_created_at,
        ) {
            (Some(id), Some(listing_id), Some(url), Some(position), Some(created_at)) => {
                Some(ListingImage {
                    id,
                    listing_id,
                    url,
                    position,
                    created_at,
                })
            }
            _ => None,
        };

        JoinRow {
            listing: Some(PartialListing {
                id: Some(ListingId::Int(self.id)),
                seller_id: Some(self.seller_id),
                title: Some(self.title),
                make: Some(self.make),
                model: Some(self.model),
                year: Some(self.year),
                price: Some(self.price),
                mileage: Some(self.mileage),
                category: Some(self.category),
                status: Some(self.status),
                description: self.description,
                location: self.location,
                features: self.features,
                created_at: Some(self.created_at),
                updated_at: Some(self.updated_at),
            }),
            image,
        }
    }
}

const JOIN_SELECT: &str = r#"SELECT
  l.id, l.seller_id, l.title, l.make, l.model, l.year, l.price, l.mileage,
  l.category, l.status, l.description, l.location, l.features,
  l.created_at, l.updated_at,
  i.id          AS image_id,
  i.listing_id  AS image_listing_id,
  i.url         AS image_url,
  i.position    AS image_position,
  i.created_at  AS image_created_at
FROM listings l
LEFT JOIN listing_images i ON i.listing_id = l.id"#;

const LISTING_COLUMNS: &str = r#"id, seller_id, title, make, model, year, price, mileage,
category, status, description, location, features, created_at, updated_at"#;

impl Listing {
    /// Home feed: active listings, newest first, photos in gallery
    /// order. Row order decides which listing the feed shows first and
    /// which photo leads its gallery.
    pub async fn find_active_with_images(pool: &SqlitePool) -> Result<Vec<JoinRow>, sqlx::Error> {
        let sql = format!(
            r#"{JOIN_SELECT}
WHERE l.status = 'active'
ORDER BY l.created_at DESC, i.position ASC, i.id ASC"#
        );
        let records: Vec<ListingImageJoinRecord> = sqlx::query_as(&sql).fetch_all(pool).await?;
        Ok(records
            .into_iter()
            .map(ListingImageJoinRecord::into_join_row)
            .collect())
    }

    pub async fn search_with_images(
        pool: &SqlitePool,
        filters: &ListingFilters,
    ) -> Result<Vec<JoinRow>, sqlx::Error> {
        let sql = format!(
            r#"{JOIN_SELECT}
WHERE l.status = 'active'
  AND ($1 IS NULL OR l.category = $1)
  AND ($2 IS NULL OR l.make = $2 COLLATE NOCASE)
  AND ($3 IS NULL OR l.price >= $3)
  AND ($4 IS NULL OR l.price <= $4)
  AND ($5 IS NULL
       OR l.title LIKE '%' || $5 || '%'
       OR l.make  LIKE '%' || $5 || '%'
       OR l.model LIKE '%' || $5 || '%')
ORDER BY l.created_at DESC, i.position ASC, i.id ASC"#
        );
        let records: Vec<ListingImageJoinRecord> = sqlx::query_as(&sql)
            .bind(filters.category.clone())
            .bind(filters.make.clone())
            .bind(filters.min_price)
            .bind(filters.max_price)
            .bind(filters.q.clone())
            .fetch_all(pool)
            .await?;
        Ok(records
            .into_iter()
            .map(ListingImageJoinRecord::into_join_row)
            .collect())
    }

    pub async fn find_by_category_with_images(
        pool: &SqlitePool,
        category: Category,
    ) -> Result<Vec<JoinRow>, sqlx::Error> {
        let sql = format!(
            r#"{JOIN_SELECT}
WHERE l.status = 'active' AND l.category = $1
ORDER BY l.created_at DESC, i.position ASC, i.id ASC"#
        );
        let records: Vec<ListingImageJoinRecord> = sqlx::query_as(&sql)
            .bind(category)
            .fetch_all(pool)
            .await?;
        Ok(records
            .into_iter()
            .map(ListingImageJoinRecord::into_join_row)
            .collect())
    }

    /// Profile page: everything a seller has posted, any status.
    pub async fn find_by_seller_with_images(
        pool: &SqlitePool,
        seller_id: &str,
    ) -> Result<Vec<JoinRow>, sqlx::Error> {
        let sql = format!(
            r#"{JOIN_SELECT}
WHERE l.seller_id = $1
ORDER BY l.created_at DESC, i.position ASC, i.id ASC"#
        );
        let records: Vec<ListingImageJoinRecord> = sqlx::query_as(&sql)
            .bind(seller_id)
            .fetch_all(pool)
            .await?;
        Ok(records
            .into_iter()
            .map(ListingImageJoinRecord::into_join_row)
            .collect())
    }

    /// Admin panel: all listings regardless of status.
    pub async fn find_all_with_images(pool: &SqlitePool) -> Result<Vec<JoinRow>, sqlx::Error> {
        let sql = format!(
            r#"{JOIN_SELECT}
ORDER BY l.created_at DESC, i.position ASC, i.id ASC"#
        );
        let records: Vec<ListingImageJoinRecord> = sqlx::query_as(&sql).fetch_all(pool).await?;
        Ok(records
            .into_iter()
            .map(ListingImageJoinRecord::into_join_row)
            .collect())
    }

    /// Listing detail: the aggregated record for one id, or `None`.
    pub async fn find_by_id_with_images(
        pool: &SqlitePool,
        id: i64,
    ) -> Result<Option<AggregatedListing>, sqlx::Error> {
        let sql = format!(
            r#"{JOIN_SELECT}
WHERE l.id = $1
ORDER BY i.position ASC, i.id ASC"#
        );
        let records: Vec<ListingImageJoinRecord> =
            sqlx::query_as(&sql).bind(id).fetch_all(pool).await?;
        let rows: Vec<JoinRow> = records
            .into_iter()
            .map(ListingImageJoinRecord::into_join_row)
            .collect();
        Ok(aggregate(rows).into_iter().next())
    }

    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Self>, sqlx::Error> {
        let sql = format!("SELECT {LISTING_COLUMNS} FROM listings WHERE id = $1");
        sqlx::query_as(&sql).bind(id).fetch_optional(pool).await
    }

    pub async fn create(pool: &SqlitePool, data: &CreateListing) -> Result<Self, sqlx::Error> {
        let status = data.status.clone().unwrap_or_default();
        let features = data
            .features
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| sqlx::Error::Protocol(e.to_string()))?;

        let sql = format!(
            r#"INSERT INTO listings (seller_id, title, make, model, year, price, mileage, category, status, description, location, features)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
RETURNING {LISTING_COLUMNS}"#
        );
        sqlx::query_as(&sql)
            .bind(&data.seller_id)
            .bind(&data.title)
            .bind(&data.make)
            .bind(&data.model)
            .bind(data.year)
            .bind(data.price)
            .bind(data.mileage)
            .bind(data.category.clone())
            .bind(status)
            .bind(&data.description)
            .bind(&data.location)
            .bind(features)
            .fetch_one(pool)
            .await
    }

    /// Partial update: absent fields keep their stored values.
    pub async fn update(
        pool: &SqlitePool,
        id: i64,
        data: &UpdateListing,
    ) -> Result<Option<Self>, sqlx::Error> {
        let features = data
            .features
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| sqlx::Error::Protocol(e.to_string()))?;

        let sql = format!(
            r#"UPDATE listings SET
  title       = COALESCE($2, title),
  price       = COALESCE($3, price),
  mileage     = COALESCE($4, mileage),
  status      = COALESCE($5, status),
  description = COALESCE($6, description),
  location    = COALESCE($7, location),
  features    = COALESCE($8, features),
  updated_at  = CURRENT_TIMESTAMP
WHERE id = $1
RETURNING {LISTING_COLUMNS}"#
        );
        sqlx::query_as(&sql)
            .bind(id)
            .bind(&data.title)
            .bind(data.price)
            .bind(data.mileage)
            .bind(data.status.clone())
            .bind(&data.description)
            .bind(&data.location)
            .bind(features)
            .fetch_optional(pool)
            .await
    }

    pub async fn update_status(
        pool: &SqlitePool,
        id: i64,
        status: ListingStatus,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE listings SET status = $2, updated_at = CURRENT_TIMESTAMP WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Removes the listing and its image rows.
    pub async fn delete(pool: &SqlitePool, id: i64) -> Result<u64, sqlx::Error> {
        ListingImage::delete_by_listing_id(pool, id).await?;
        let result = sqlx::query("DELETE FROM listings WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(image: bool) -> ListingImageJoinRecord {
        let now = Utc::now();
        ListingImageJoinRecord {
            id: 7,
            seller_id: "seller-1".to_string(),
            title: "2018 Corolla".to_string(),
            make: "Toyota".to_string(),
            model: "Corolla".to_string(),
            year: 2018,
            price: 1_450_000,
            mileage: 62_000,
            category: Category::Sedan,
            status: ListingStatus::Active,
            description: None,
            location: Some("Lisbon".to_string()),
            features: Some(r#"{"sunroof":true}"#.to_string()),
            created_at: now,
            updated_at: now,
            image_id: image.then_some(3),
            image_listing_id: image.then_some(7),
            image_url: image.then(|| "https://img.example/a.jpg".to_string()),
            image_position: image.then_some(0),
            image_created_at: image.then_some(now),
        }
    }

    #[test]
    fn join_record_splits_listing_and_image() {
        let row = record(true).into_join_row();

        let listing = row.listing.expect("listing payload");
        assert_eq!(listing.id, Some(ListingId::Int(7)));
        assert_eq!(listing.make.as_deref(), Some("Toyota"));

        let image = row.image.expect("image payload");
        assert_eq!(image.url, "https://img.example/a.jpg");
        assert_eq!(image.listing_id, 7);
    }

    #[test]
    fn join_record_without_image_columns_has_no_image() {
        let row = record(false).into_join_row();

        assert!(row.listing.is_some());
        assert!(row.image.is_none());
    }

    #[test]
    fn features_parse_into_a_map() {
        let now = Utc::now();
        let listing = Listing {
            id: 7,
            seller_id: "seller-1".to_string(),
            title: "2018 Corolla".to_string(),
            make: "Toyota".to_string(),
            model: "Corolla".to_string(),
            year: 2018,
            price: 1_450_000,
            mileage: 62_000,
            category: Category::Sedan,
            status: ListingStatus::Active,
            description: None,
            location: None,
            features: Some(r#"{"sunroof":true}"#.to_string()),
            created_at: now,
            updated_at: now,
        };

        let parsed = listing.parsed_features().unwrap();
        assert_eq!(parsed["sunroof"], Value::Bool(true));

        let bare = Listing {
            features: None,
            ..listing
        };
        assert!(bare.parsed_features().is_none());
    }
}
