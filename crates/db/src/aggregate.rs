use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::models::{
    listing::{Category, ListingStatus},
    listing_image::ListingImage,
};

/// Identity of a listing as carried on a join row. Integer ids come
/// from the relational store; string ids occur when rows are built from
/// external payloads. Equality is representation-sensitive: `Int(7)`
/// and `Text("7")` are different grouping keys, so callers that mix the
/// two must normalize upstream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(untagged)]
pub enum ListingId {
    Int(i64),
    Text(String),
}

impl ListingId {
    /// Zero and the empty string are placeholder ids and never group.
    pub fn is_valid(&self) -> bool {
        match self {
            Self::Int(n) => *n != 0,
            Self::Text(s) => !s.is_empty(),
        }
    }
}

impl std::fmt::Display for ListingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Listing payload carried by a single join row. Every field is
/// optional: an outer join can produce placeholder rows, and only `id`
/// decides whether the row contributes to the result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
pub struct PartialListing {
    pub id: Option<ListingId>,
    pub seller_id: Option<String>,
    pub title: Option<String>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<i32>,
    pub price: Option<i64>,
    pub mileage: Option<i32>,
    pub category: Option<Category>,
    pub status: Option<ListingStatus>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub features: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// One element of the flat sequence an outer join yields: zero-or-one
/// listing payload paired with zero-or-one of its images. A listing
/// with no images arrives as a single row with `image: None`; a listing
/// with N images arrives as N rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
pub struct JoinRow {
    pub listing: Option<PartialListing>,
    pub image: Option<ListingImage>,
}

/// A listing with its images folded in, one record per listing id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct AggregatedListing {
    #[serde(flatten)]
    #[ts(flatten)]
    pub listing: PartialListing,
    pub images: Vec<ListingImage>,
}

impl Deref for AggregatedListing {
    type Target = PartialListing;
    fn deref(&self) -> &Self::Target {
        &self.listing
    }
}

impl DerefMut for AggregatedListing {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.listing
    }
}

/// Folds an ordered sequence of join rows into one record per listing.
///
/// Rows without a usable listing id are dropped, including any image
/// they carry. The first row seen for an id supplies the listing
/// fields; later rows for the same id contribute only their image.
/// Images keep their row order, and listings keep the order their ids
/// first appeared. Malformed or placeholder rows are skipped rather
/// than surfaced as errors, so a partially broken query result still
/// renders.
pub fn aggregate<I>(rows: I) -> Vec<AggregatedListing>
where
    I: IntoIterator<Item = JoinRow>,
{
    let mut grouped: IndexMap<ListingId, AggregatedListing> = IndexMap::new();

    for row in rows {
        let Some(listing) = row.listing else {
            continue;
        };
        let Some(id) = listing.id.clone().filter(ListingId::is_valid) else {
            continue;
        };

        let entry = grouped.entry(id).or_insert_with(|| AggregatedListing {
            listing,
            images: Vec::new(),
        });

        if let Some(image) = row.image {
            entry.images.push(image);
        }
    }

    grouped.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(id: i64) -> PartialListing {
        PartialListing {
            id: Some(ListingId::Int(id)),
            ..Default::default()
        }
    }

    fn image(url: &str) -> ListingImage {
        ListingImage {
            id: 0,
            listing_id: 0,
            url: url.to_string(),
            position: 0,
            created_at: Utc::now(),
        }
    }

    fn row(listing: Option<PartialListing>, image: Option<ListingImage>) -> JoinRow {
        JoinRow { listing, image }
    }

    fn urls(entry: &AggregatedListing) -> Vec<&str> {
        entry.images.iter().map(|i| i.url.as_str()).collect()
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert_eq!(aggregate([]), vec![]);
    }

    #[test]
    fn listing_without_images_still_surfaces() {
        let mut payload = listing(1);
        payload.make = Some("Toyota".to_string());

        let result = aggregate([row(Some(payload.clone()), None)]);

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].listing, payload);
        assert!(result[0].images.is_empty());
    }

    #[test]
    fn single_image_attaches_to_its_listing() {
        let result = aggregate([row(Some(listing(1)), Some(image("a")))]);

        assert_eq!(result.len(), 1);
        assert_eq!(urls(&result[0]), vec!["a"]);
    }

    #[test]
    fn images_accumulate_in_row_order() {
        let result = aggregate([
            row(Some(listing(1)), Some(image("a"))),
            row(Some(listing(1)), Some(image("b"))),
        ]);

        assert_eq!(result.len(), 1);
        assert_eq!(urls(&result[0]), vec!["a", "b"]);
    }

    #[test]
    fn interleaved_listings_keep_first_seen_order() {
        let result = aggregate([
            row(Some(listing(1)), Some(image("a"))),
            row(Some(listing(2)), Some(image("b"))),
            row(Some(listing(1)), Some(image("c"))),
            row(Some(listing(3)), Some(image("d"))),
            row(Some(listing(3)), Some(image("e"))),
            row(Some(listing(3)), Some(image("f"))),
        ]);

        assert_eq!(result.len(), 3);
        assert_eq!(result[0].id, Some(ListingId::Int(1)));
        assert_eq!(result[1].id, Some(ListingId::Int(2)));
        assert_eq!(result[2].id, Some(ListingId::Int(3)));
        assert_eq!(urls(&result[0]), vec!["a", "c"]);
        assert_eq!(urls(&result[1]), vec!["b"]);
        assert_eq!(urls(&result[2]), vec!["d", "e", "f"]);
    }

    #[test]
    fn rows_without_listing_or_id_are_dropped() {
        let orphan_listing = PartialListing {
            make: Some("X".to_string()),
            ..Default::default()
        };

        let result = aggregate([
            row(None, Some(image("orphan"))),
            row(Some(orphan_listing), None),
            row(Some(listing(1)), Some(image("ok"))),
        ]);

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id, Some(ListingId::Int(1)));
        assert_eq!(result[0].make, None);
        assert_eq!(urls(&result[0]), vec!["ok"]);
    }

    #[test]
    fn zero_and_empty_ids_never_group() {
        let zero = PartialListing {
            id: Some(ListingId::Int(0)),
            ..Default::default()
        };
        let empty = PartialListing {
            id: Some(ListingId::Text(String::new())),
            ..Default::default()
        };

        let result = aggregate([
            row(Some(zero), Some(image("a"))),
            row(Some(empty), Some(image("b"))),
        ]);

        assert!(result.is_empty());
    }

    #[test]
    fn missing_images_do_not_drop_listings() {
        let result = aggregate([
            row(Some(listing(1)), Some(image("x"))),
            row(Some(listing(1)), None),
            row(Some(listing(1)), None),
            row(Some(listing(2)), None),
        ]);

        assert_eq!(result.len(), 2);
        assert_eq!(urls(&result[0]), vec!["x"]);
        assert!(result[1].images.is_empty());
    }

    #[test]
    fn first_row_fields_win() {
        let mut first = listing(1);
        first.make = Some("Toyota".to_string());
        let mut second = listing(1);
        second.make = Some("Honda".to_string());

        let result = aggregate([
            row(Some(first), Some(image("a"))),
            row(Some(second), Some(image("b"))),
        ]);

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].make.as_deref(), Some("Toyota"));
        assert_eq!(urls(&result[0]), vec!["a", "b"]);
    }

    #[test]
    fn int_and_text_ids_group_separately() {
        let text = PartialListing {
            id: Some(ListingId::Text("1".to_string())),
            ..Default::default()
        };

        let result = aggregate([
            row(Some(listing(1)), Some(image("a"))),
            row(Some(text), Some(image("b"))),
        ]);

        assert_eq!(result.len(), 2);
        assert_eq!(result[0].id, Some(ListingId::Int(1)));
        assert_eq!(result[1].id, Some(ListingId::Text("1".to_string())));
    }

    #[test]
    fn reaggregating_output_is_stable() {
        let first_pass = aggregate([
            row(Some(listing(1)), Some(image("a"))),
            row(Some(listing(2)), Some(image("b"))),
            row(Some(listing(2)), Some(image("c"))),
        ]);

        let second_pass = aggregate(
            first_pass
                .iter()
                .map(|entry| row(Some(entry.listing.clone()), None))
                .collect::<Vec<_>>(),
        );

        assert_eq!(second_pass.len(), first_pass.len());
        for (reaggregated, original) in second_pass.iter().zip(first_pass.iter()) {
            assert_eq!(reaggregated.id, original.id);
            assert!(reaggregated.images.is_empty());
        }
    }
}
