//! Per-item detail fetching
//!
//! Search results only carry a summary of each order. Before an order can be
//! stored the worker pulls the full order, the shipment when there is one and
//! the applied discounts, then derives the advertising flag and the fee
//! summary. Only the order itself is required.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, warn};

use super::accounts::SourceAccount;
use super::config::SourceApiConfig;
use super::pager::RawRecord;

/// Order ready to be persisted
#[derive(Debug, Clone, PartialEq)]
pub struct DetailedRecord {
    pub external_id: i64,
    pub data: Value,
}

impl DetailedRecord {
    pub fn new(external_id: i64, data: Value) -> Self {
        Self { external_id, data }
    }
}

/// Turns a raw search result into a persistable record
///
/// Failures are per item; the worker counts them and moves on.
#[async_trait]
pub trait ItemFetcher: Send + Sync {
    async fn fetch(&self, account: &SourceAccount, raw: &RawRecord) -> Result<DetailedRecord>;
}

/// Fetcher backed by the marketplace order and shipment endpoints
pub struct HttpItemFetcher {
    client: Client,
    config: SourceApiConfig,
}

impl HttpItemFetcher {
    pub fn new(client: Client, config: SourceApiConfig) -> Self {
        Self { client, config }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn send(
        &self,
        account: &SourceAccount,
        path: &str,
        timeout: Duration,
    ) -> Result<Response> {
        self.client
            .get(self.url(path))
            .bearer_auth(&account.access_token)
            .timeout(timeout)
            .send()
            .await
            .with_context(|| format!("GET /{path} failed"))
    }

    async fn get_json(&self, account: &SourceAccount, path: &str) -> Result<Value> {
        let response = self.send(account, path, self.config.detail_timeout).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("GET /{path} returned HTTP {status}"));
        }

        response
            .json()
            .await
            .with_context(|| format!("GET /{path} returned invalid JSON"))
    }

    /// Discounts applied to an order; most orders have none and answer 404
    async fn discounts(&self, account: &SourceAccount, order_id: i64) -> Result<Option<Value>> {
        let path = format!("orders/{order_id}/discounts");
        let timeout = self.config.detail_timeout.min(DISCOUNT_TIMEOUT);
        let response = self.send(account, &path, timeout).await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .json()
                .await
                .map(Some)
                .with_context(|| format!("GET /{path} returned invalid JSON")),
            status => Err(anyhow!("GET /{path} returned HTTP {status}")),
        }
    }
}

/// Upper bound for the discount lookup
const DISCOUNT_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
impl ItemFetcher for HttpItemFetcher {
    async fn fetch(&self, account: &SourceAccount, raw: &RawRecord) -> Result<DetailedRecord> {
        let order_id = raw
            .external_id()
            .ok_or_else(|| anyhow!("Search result has no order id"))?;

        let details = self
            .get_json(account, &format!("orders/{order_id}"))
            .await
            .with_context(|| format!("Failed to fetch order {order_id}"))?;

        let mut order = merge_objects(&raw.0, &details);
        let fees = order_fees(&order);

        let shipping_id = order
            .get("shipping")
            .and_then(|s| s.get("id"))
            .filter(|id| !id.is_null())
            .map(|id| match id {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            });

        if let Some(shipping_id) = shipping_id {
            match self.get_json(account, &format!("shipments/{shipping_id}")).await {
                Ok(shipment) => {
                    if let Value::Object(ref mut map) = order {
                        map.insert("shipping_details".to_string(), shipment);
                    }
                }
                Err(e) => {
                    warn!(order_id, shipping_id = %shipping_id, error = %e, "Shipment details unavailable");
                }
            }
        }

        match self.discounts(account, order_id).await {
            Ok(Some(discounts)) => {
                if let Value::Object(ref mut map) = order {
                    map.insert("discounts_applied".to_string(), discounts);
                }
            }
            Ok(None) => debug!(order_id, "No discounts applied"),
            Err(e) => warn!(order_id, error = %format!("{e:#}"), "Discounts unavailable"),
        }

        let advertising = advertising_info(&order);
        if let Value::Object(ref mut map) = order {
            map.extend(advertising);
            map.extend(fees);
        }

        Ok(DetailedRecord::new(order_id, order))
    }
}

/// Shallow merge of `overlay` on top of `base`
fn merge_objects(base: &Value, overlay: &Value) -> Value {
    let mut merged = match base {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };
    if let Value::Object(extra) = overlay {
        for (key, value) in extra {
            merged.insert(key.clone(), value.clone());
        }
    }
    Value::Object(merged)
}

/// Product Ads attribution
///
/// The marketplace exposes no campaign data on the order, so only the sale
/// flag is derived: cross-border (`cbt`) flows are attributed to ads.
fn advertising_info(order: &Value) -> Map<String, Value> {
    let is_advertising_sale = order
        .get("context")
        .and_then(|c| c.get("flows"))
        .and_then(Value::as_array)
        .is_some_and(|flows| flows.iter().any(|f| f.as_str() == Some("cbt")));

    let mut info = Map::new();
    info.insert("is_advertising_sale".to_string(), Value::Bool(is_advertising_sale));
    info.insert("advertising_campaign_id".to_string(), Value::Null);
    info.insert("advertising_cost".to_string(), json!(0));
    info.insert("advertising_metrics".to_string(), json!({}));
    info
}

/// Fee summary: item sale fees plus the shipping cost
fn order_fees(order: &Value) -> Map<String, Value> {
    let sale_fees: f64 = order
        .get("order_items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("sale_fee").and_then(Value::as_f64))
                .sum()
        })
        .unwrap_or(0.0);

    let shipping_fees = order
        .get("shipping")
        .and_then(|s| s.get("cost"))
        .and_then(Value::as_f64)
        .unwrap_or(0.0);

    let fees = json!({
        "sale_fees": sale_fees,
        "shipping_fees": shipping_fees,
        "total_fees": sale_fees + shipping_fees,
    });

    match fees {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_prefers_details() {
        let base = json!({"id": 1, "status": "paid", "buyer": {"id": 9}});
        let overlay = json!({"status": "cancelled", "total_amount": 150.0});
        let merged = merge_objects(&base, &overlay);

        assert_eq!(merged["id"], 1);
        assert_eq!(merged["status"], "cancelled");
        assert_eq!(merged["total_amount"], 150.0);
        assert_eq!(merged["buyer"]["id"], 9);
    }

    #[test]
    fn test_order_fees() {
        let order = json!({
            "order_items": [{"sale_fee": 12.5}, {"sale_fee": 7.5}, {"title": "no fee"}],
            "shipping": {"id": 77, "cost": 20.0}
        });
        let fees = order_fees(&order);
        assert_eq!(fees["sale_fees"], 20.0);
        assert_eq!(fees["shipping_fees"], 20.0);
        assert_eq!(fees["total_fees"], 40.0);
    }

    #[test]
    fn test_advertising_sale_from_cbt_flow() {
        let info = advertising_info(&json!({"context": {"flows": ["cbt", "other"]}}));
        assert_eq!(info["is_advertising_sale"], true);
        assert!(info["advertising_campaign_id"].is_null());

        let info = advertising_info(&json!({"context": {"channel": "marketplace"}}));
        assert_eq!(info["is_advertising_sale"], false);
        assert_eq!(info["advertising_cost"], 0);
    }

    #[test]
    fn test_order_fees_missing_fields() {
        let fees = order_fees(&json!({"id": 1}));
        assert_eq!(fees["total_fees"], 0.0);
    }
}
