//! Client for the Shopify Admin REST API: paginated catalog and order
//! listings with proportional backpressure against the shop's call quota.

use futures::stream::{self, Stream};
use reqwest::{Client, StatusCode, Url};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::shopify::model::{
    FulfillmentsResponse, Order, OrderResponse, OrdersResponse, Product, ProductsResponse,
};
use chrono::{DateTime, Utc};

pub mod model;

/// Usage fraction above which a short cooling-off pause is inserted
/// between page requests, and the longer threshold above it.
const QUOTA_SOFT_LIMIT: f64 = 0.80;
const QUOTA_HARD_LIMIT: f64 = 0.95;
const QUOTA_SOFT_PAUSE: Duration = Duration::from_secs(2);
const QUOTA_HARD_PAUSE: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ShopifyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid shop URL \"{shop_url}\": {reason}")]
    InvalidShopUrl { shop_url: String, reason: String },
}

#[derive(Clone)]
pub struct ShopifyClient {
    http: Client,
    base_url: Url,
    access_token: String,
    api_version: String,
    page_size: u32,
}

impl fmt::Debug for ShopifyClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShopifyClient")
            .field("base_url", &self.base_url)
            .field("api_version", &self.api_version)
            .finish_non_exhaustive()
    }
}

impl ShopifyClient {
    pub fn new(
        http: Client,
        shop_url: &str,
        access_token: String,
        api_version: String,
        page_size: u32,
    ) -> Result<Self, ShopifyError> {
        let base_url = Url::parse(shop_url).map_err(|e| ShopifyError::InvalidShopUrl {
            shop_url: shop_url.to_owned(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            http,
            base_url,
            access_token,
            api_version,
            page_size,
        })
    }

    fn endpoint(&self, resource: &str) -> Result<Url, ShopifyError> {
        let path = format!("admin/api/{}/{}", self.api_version, resource);
        self.base_url
            .join(&path)
            .map_err(|e| ShopifyError::InvalidShopUrl {
                shop_url: self.base_url.to_string(),
                reason: e.to_string(),
            })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: Url,
        context: &str,
    ) -> Result<(T, Option<String>, Option<Duration>), ShopifyError> {
        let res = self
            .http
            .get(url.clone())
            .header("X-Shopify-Access-Token", &self.access_token)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            return Err(ShopifyError::UnexpectedStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        // Both headers must be read before consuming the body.
        let link_header = res
            .headers()
            .get(reqwest::header::LINK)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let quota = res
            .headers()
            .get("X-Shopify-Shop-Api-Call-Limit")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_call_limit);

        let body = res.text().await?;
        let parsed = serde_json::from_str::<T>(&body).map_err(|e| ShopifyError::Deserialize {
            context: context.to_owned(),
            source: e,
        })?;

        let pause = quota.and_then(|(used, allowed)| quota_pause(used, allowed));
        Ok((parsed, link_header, pause))
    }

    /// Fetches one product page: the products, the cursor for the next page
    /// if the `Link` header advertises one, and the cooling-off pause owed
    /// before the next page request.
    pub async fn fetch_product_page(
        &self,
        cursor: Option<&str>,
    ) -> Result<Page<Product>, ShopifyError> {
        let mut url = self.endpoint("products.json")?;
        url.query_pairs_mut()
            .append_pair("limit", &self.page_size.to_string())
            .append_pair("status", "active");
        if let Some(cursor) = cursor {
            url.query_pairs_mut().append_pair("page_info", cursor);
        }

        let (parsed, link, pause) = self
            .get_json::<ProductsResponse>(url, "product page")
            .await?;
        debug!(count = parsed.products.len(), "fetched product page");
        Ok(Page {
            items: parsed.products,
            next_cursor: extract_next_cursor(link.as_deref()),
            pause,
        })
    }

    /// Lazy stream of product pages, advanced by the server-supplied cursor
    /// until no further page is signaled. A quota pause reported by one page
    /// is honored before the next page request goes out.
    pub fn product_pages(&self) -> impl Stream<Item = Result<Vec<Product>, ShopifyError>> + '_ {
        stream::try_unfold(
            (PageCursor::Start, None::<Duration>),
            move |(state, pause)| async move {
                let cursor = match state {
                    PageCursor::Start => None,
                    PageCursor::Next(c) => Some(c),
                    PageCursor::Done => return Ok(None),
                };
                cool_off(pause).await;
                let page = self.fetch_product_page(cursor.as_deref()).await?;
                let next_state = match page.next_cursor {
                    Some(c) => PageCursor::Next(c),
                    None => PageCursor::Done,
                };
                Ok(Some((page.items, (next_state, page.pause))))
            },
        )
    }

    /// Fetches one page of shipped orders updated since `updated_min`,
    /// using offset pagination.
    pub async fn fetch_order_page(
        &self,
        updated_min: DateTime<Utc>,
        limit: u32,
        page: u32,
    ) -> Result<Page<Order>, ShopifyError> {
        let mut url = self.endpoint("orders.json")?;
        url.query_pairs_mut()
            .append_pair("status", "any")
            .append_pair("fulfillment_status", "shipped")
            .append_pair("updated_at_min", &updated_min.to_rfc3339())
            .append_pair("limit", &limit.to_string())
            .append_pair("page", &page.to_string());

        let (parsed, _, pause) = self.get_json::<OrdersResponse>(url, "order page").await?;
        debug!(page, count = parsed.orders.len(), "fetched order page");
        Ok(Page {
            items: parsed.orders,
            next_cursor: None,
            pause,
        })
    }

    /// Lazy stream of order pages; ends when a page comes back short. As
    /// with product pages, quota pauses apply before the next page request.
    pub fn order_pages(
        &self,
        updated_min: DateTime<Utc>,
        limit: u32,
    ) -> impl Stream<Item = Result<Vec<Order>, ShopifyError>> + '_ {
        stream::try_unfold(
            (Some(1u32), None::<Duration>),
            move |(page_no, pause)| async move {
                let Some(page_no) = page_no else { return Ok(None) };
                cool_off(pause).await;
                let page = self.fetch_order_page(updated_min, limit, page_no).await?;
                let next = if (page.items.len() as u32) < limit {
                    None
                } else {
                    Some(page_no + 1)
                };
                Ok(Some((page.items, (next, page.pause))))
            },
        )
    }

    pub async fn fetch_order(&self, order_id: i64) -> Result<Order, ShopifyError> {
        let url = self.endpoint(&format!("orders/{order_id}.json"))?;
        let (parsed, _, _) = self
            .get_json::<OrderResponse>(url, &format!("order {order_id}"))
            .await?;
        Ok(parsed.order)
    }

    pub async fn fetch_fulfillments(
        &self,
        order_id: i64,
    ) -> Result<Vec<crate::shopify::model::Fulfillment>, ShopifyError> {
        let url = self.endpoint(&format!("orders/{order_id}/fulfillments.json"))?;
        let (parsed, _, _) = self
            .get_json::<FulfillmentsResponse>(url, &format!("fulfillments of order {order_id}"))
            .await?;
        Ok(parsed.fulfillments)
    }
}

/// One fetched listing page: the items, the next-page cursor when the
/// `Link` header advertises one, and the cooling-off pause owed before
/// the next page request.
#[derive(Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
    pub pause: Option<Duration>,
}

enum PageCursor {
    Start,
    Next(String),
    Done,
}

/// Honors the pause computed from the previous page's quota header.
async fn cool_off(pause: Option<Duration>) {
    if let Some(pause) = pause {
        warn!(
            pause_ms = pause.as_millis() as u64,
            "approaching shop call limit; cooling off before next page"
        );
        tokio::time::sleep(pause).await;
    }
}

/// Parses the `X-Shopify-Shop-Api-Call-Limit` header, e.g. `"32/40"`.
fn parse_call_limit(value: &str) -> Option<(u32, u32)> {
    let (used, allowed) = value.trim().split_once('/')?;
    let used = used.trim().parse().ok()?;
    let allowed: u32 = allowed.trim().parse().ok()?;
    if allowed == 0 {
        return None;
    }
    Some((used, allowed))
}

/// Proportional backpressure: a short pause past the soft limit, a longer
/// one past the hard limit. Not a token bucket.
fn quota_pause(used: u32, allowed: u32) -> Option<Duration> {
    let usage = f64::from(used) / f64::from(allowed);
    if usage > QUOTA_HARD_LIMIT {
        Some(QUOTA_HARD_PAUSE)
    } else if usage > QUOTA_SOFT_LIMIT {
        Some(QUOTA_SOFT_PAUSE)
    } else {
        None
    }
}

/// Pulls the `page_info` cursor for the next page out of a `Link` response
/// header. Returns `None` on the last page.
fn extract_next_cursor(link_header: Option<&str>) -> Option<String> {
    for directive in link_header?.split(',') {
        let directive = directive.trim();
        if !directive.contains(r#"rel="next""#) {
            continue;
        }
        let url = directive
            .split_once('<')
            .and_then(|(_, rest)| rest.split_once('>'))
            .map(|(url, _)| url)?;
        let query = url.split_once('?').map(|(_, q)| q)?;
        return query
            .split('&')
            .find_map(|pair| pair.strip_prefix("page_info="))
            .filter(|v| !v.is_empty())
            .map(str::to_owned);
    }
    None
}
