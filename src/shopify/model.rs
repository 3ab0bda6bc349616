//! Wire types for the Shopify Admin REST API, limited to the fields the
//! pipeline actually reads.

use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Product {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub vendor: Option<String>,
    /// Comma-delimited tag string, as Shopify returns it.
    #[serde(default)]
    pub tags: String,
    #[serde(default)]
    pub variants: Vec<Variant>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Variant {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub barcode: Option<String>,
    #[serde(default)]
    pub sku: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Order {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub customer: Option<Customer>,
    #[serde(default)]
    pub shipping_address: Option<ShippingAddress>,
    /// Present inline on order listings; empty means "fetch separately".
    #[serde(default)]
    pub fulfillments: Vec<Fulfillment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Customer {
    pub id: i64,
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShippingAddress {
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub province: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Fulfillment {
    pub id: i64,
    #[serde(default)]
    pub status: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub tracking_number: Option<String>,
    #[serde(default)]
    pub tracking_numbers: Vec<String>,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
}

impl Fulfillment {
    /// First non-empty tracking reference, if any. A fulfillment without
    /// one has not actually shipped and is skipped by the mapper.
    pub fn tracking_reference(&self) -> Option<&str> {
        self.tracking_number
            .as_deref()
            .into_iter()
            .chain(self.tracking_numbers.iter().map(String::as_str))
            .map(str::trim)
            .find(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LineItem {
    pub id: i64,
    #[serde(default)]
    pub variant_id: Option<i64>,
    #[serde(default)]
    pub product_id: Option<i64>,
    pub title: String,
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct ProductsResponse {
    #[serde(default)]
    pub products: Vec<Product>,
}

#[derive(Debug, Deserialize)]
pub struct OrdersResponse {
    #[serde(default)]
    pub orders: Vec<Order>,
}

#[derive(Debug, Deserialize)]
pub struct OrderResponse {
    pub order: Order,
}

#[derive(Debug, Deserialize)]
pub struct FulfillmentsResponse {
    #[serde(default)]
    pub fulfillments: Vec<Fulfillment>,
}
