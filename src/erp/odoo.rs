//! Odoo JSON-RPC gateway
//!
//! Every operation is a find-or-create keyed on a natural identifier, so
//! replaying a step never duplicates remote records:
//!
//! | step     | model              | key                             |
//! |----------|--------------------|---------------------------------|
//! | customer | `res.partner`      | `phone`                         |
//! | brand    | `product.category` | `name`                          |
//! | product  | `product.product`  | `default_code` (SKU)            |
//! | order    | `sale.order`       | `client_order_ref`              |
//! | purchase | `purchase.order`   | `origin` + supplier `partner_id` |

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::OnceCell;
use tracing::{debug, info};
use url::Url;

use crate::config::ErpConfig;
use crate::sync::{ErpGateway, OrderAggregate, OrderLine, RemoteRecord, Step, StepError};

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<RpcErrorData>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorData {
    #[serde(default)]
    message: String,
}

impl RpcError {
    fn describe(&self) -> String {
        match &self.data {
            Some(data) if !data.message.is_empty() => format!("{}: {}", self.message, data.message),
            _ => self.message.clone(),
        }
    }
}

/// [`ErpGateway`] over Odoo's `/jsonrpc` endpoint.
pub struct OdooGateway {
    client: Client,
    endpoint: Url,
    database: String,
    username: String,
    api_key: String,
    uid: OnceCell<i64>,
    next_id: AtomicU64,
}

impl OdooGateway {
    pub fn new(config: &ErpConfig) -> anyhow::Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| {
                anyhow::anyhow!("ORDER_SYNC_ERP_API_KEY is required for the Odoo gateway")
            })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;

        let mut endpoint = Url::parse(&config.base_url)?;
        let path = format!("{}/jsonrpc", endpoint.path().trim_end_matches('/'));
        endpoint.set_path(&path);

        Ok(Self {
            client,
            endpoint,
            database: config.database.clone(),
            username: config.username.clone(),
            api_key,
            uid: OnceCell::new(),
            next_id: AtomicU64::new(1),
        })
    }

    async fn rpc(
        &self,
        step: Step,
        service: &str,
        method: &str,
        args: Value,
    ) -> Result<Value, StepError> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": "call",
            "params": { "service": service, "method": method, "args": args },
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
        });

        let resp = self
            .client
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    StepError::timeout(step, format!("Odoo request timed out: {e}"))
                } else {
                    StepError::transient(step, format!("Odoo unreachable: {e}"))
                }
            })?;

        match resp.status() {
            status if status.is_success() => {}
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(StepError::transient(step, "Odoo rate limited the request (429)"));
            }
            status if status.is_server_error() => {
                return Err(StepError::transient(step, format!("Odoo returned {status}")));
            }
            status => {
                return Err(StepError::remote(step, format!("Odoo returned {status}")));
            }
        }

        let payload: RpcResponse = resp
            .json()
            .await
            .map_err(|e| StepError::transient(step, format!("invalid JSON-RPC response: {e}")))?;

        if let Some(error) = payload.error {
            return Err(StepError::remote(step, error.describe()));
        }
        Ok(payload.result.unwrap_or(Value::Null))
    }

    async fn uid(&self, step: Step) -> Result<i64, StepError> {
        self.uid
            .get_or_try_init(|| async {
                let result = self
                    .rpc(
                        step,
                        "common",
                        "authenticate",
                        json!([self.database, self.username, self.api_key, {}]),
                    )
                    .await?;
                let uid = result
                    .as_i64()
                    .ok_or_else(|| StepError::remote(step, "Odoo rejected the API credentials"))?;
                info!(uid, database = %self.database, "Authenticated with Odoo");
                Ok::<i64, StepError>(uid)
            })
            .await
            .copied()
    }

    async fn execute(
        &self,
        step: Step,
        model: &str,
        method: &str,
        args: Value,
        kwargs: Value,
    ) -> Result<Value, StepError> {
        let uid = self.uid(step).await?;
        self.rpc(
            step,
            "object",
            "execute_kw",
            json!([self.database, uid, self.api_key, model, method, args, kwargs]),
        )
        .await
    }

    async fn search_one(
        &self,
        step: Step,
        model: &str,
        domain: Value,
    ) -> Result<Option<i64>, StepError> {
        let ids = self
            .execute(step, model, "search", json!([domain]), json!({ "limit": 1 }))
            .await?;
        Ok(ids.as_array().and_then(|ids| ids.first()).and_then(Value::as_i64))
    }

    /// First record matching `domain`, with the requested `fields` and its id.
    async fn search_read_one(
        &self,
        step: Step,
        model: &str,
        domain: Value,
        fields: Value,
    ) -> Result<Option<(i64, Value)>, StepError> {
        let records = self
            .execute(
                step,
                model,
                "search_read",
                json!([domain]),
                json!({ "fields": fields, "limit": 1 }),
            )
            .await?;
        let Some(record) = records.as_array().and_then(|records| records.first()) else {
            return Ok(None);
        };
        let id = record
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| StepError::remote(step, format!("{model}.search_read returned no id")))?;
        Ok(Some((id, record.clone())))
    }

    async fn create(&self, step: Step, model: &str, values: Value) -> Result<i64, StepError> {
        let id = self
            .execute(step, model, "create", json!([values]), json!({}))
            .await?;
        id.as_i64()
            .ok_or_else(|| StepError::remote(step, format!("{model}.create returned no id")))
    }

    async fn find_or_create(
        &self,
        step: Step,
        model: &str,
        domain: Value,
        values: Value,
    ) -> Result<RemoteRecord, StepError> {
        if let Some(id) = self.search_one(step, model, domain).await? {
            debug!(model, id, "Found existing Odoo record");
            return Ok(RemoteRecord::found(id));
        }
        let id = self.create(step, model, values).await?;
        debug!(model, id, "Created Odoo record");
        Ok(RemoteRecord::created(id))
    }
}

fn product_id(step: Step, products: &HashMap<String, i64>, line: &OrderLine) -> Result<i64, StepError> {
    products
        .get(&line.sku)
        .copied()
        .ok_or_else(|| StepError::validation(step, format!("product {} is not resolved", line.sku)))
}

#[async_trait]
impl ErpGateway for OdooGateway {
    async fn ensure_customer(&self, order: &OrderAggregate) -> Result<RemoteRecord, StepError> {
        let step = Step::Customer;
        let phone = order
            .customer_phone
            .as_deref()
            .ok_or_else(|| StepError::validation(step, "order has no customer phone"))?;
        let name = order.customer_name.as_deref().unwrap_or(phone);

        self.find_or_create(
            step,
            "res.partner",
            json!([["phone", "=", phone]]),
            json!({ "name": name, "phone": phone, "customer_rank": 1 }),
        )
        .await
    }

    async fn ensure_brand(&self, brand: &str) -> Result<RemoteRecord, StepError> {
        self.find_or_create(
            Step::Brand,
            "product.category",
            json!([["name", "=", brand]]),
            json!({ "name": brand }),
        )
        .await
    }

    async fn ensure_product(&self, line: &OrderLine, brand_id: i64) -> Result<RemoteRecord, StepError> {
        self.find_or_create(
            Step::Product,
            "product.product",
            json!([["default_code", "=", line.sku]]),
            json!({
                "name": line.product_name,
                "default_code": line.sku,
                "categ_id": brand_id,
                "list_price": line.unit_price,
            }),
        )
        .await
    }

    async fn ensure_order(
        &self,
        order: &OrderAggregate,
        customer_id: i64,
        products: &HashMap<String, i64>,
    ) -> Result<RemoteRecord, StepError> {
        let step = Step::Order;
        let domain = json!([["client_order_ref", "=", order.order_number]]);
        if let Some((id, existing)) = self
            .search_read_one(step, "sale.order", domain, json!(["state"]))
            .await?
        {
            // A create whose confirmation failed leaves a quotation behind
            if matches!(
                existing.get("state").and_then(Value::as_str),
                Some("draft" | "sent")
            ) {
                self.execute(step, "sale.order", "action_confirm", json!([[id]]), json!({}))
                    .await?;
                info!(order_number = %order.order_number, sale_order_id = id, "Confirmed pending Odoo quotation");
            }
            return Ok(RemoteRecord::found(id));
        }

        let mut lines = Vec::with_capacity(order.lines.len());
        for line in &order.lines {
            lines.push(json!([0, 0, {
                "product_id": product_id(step, products, line)?,
                "product_uom_qty": line.quantity,
                "price_unit": line.unit_price,
            }]));
        }

        let id = self
            .create(
                step,
                "sale.order",
                json!({
                    "partner_id": customer_id,
                    "client_order_ref": order.order_number,
                    "date_order": format!("{} 00:00:00", order.order_date),
                    "order_line": lines,
                }),
            )
            .await?;
        self.execute(step, "sale.order", "action_confirm", json!([[id]]), json!({}))
            .await?;

        info!(order_number = %order.order_number, sale_order_id = id, "Created Odoo sale order");
        Ok(RemoteRecord::created(id))
    }

    async fn ensure_purchase(
        &self,
        order: &OrderAggregate,
        products: &HashMap<String, i64>,
    ) -> Result<RemoteRecord, StepError> {
        let step = Step::Purchase;

        // One purchase order per supplier
        let mut by_supplier: BTreeMap<&str, Vec<&OrderLine>> = BTreeMap::new();
        for line in order.non_stock_lines() {
            let supplier = line.supplier_name.as_deref().ok_or_else(|| {
                StepError::validation(step, format!("non-stock product {} has no supplier", line.sku))
            })?;
            by_supplier.entry(supplier).or_default().push(line);
        }

        let mut records = Vec::with_capacity(by_supplier.len());
        for (supplier, lines) in by_supplier {
            let partner = self
                .find_or_create(
                    step,
                    "res.partner",
                    json!([["name", "=", supplier], ["supplier_rank", ">", 0]]),
                    json!({ "name": supplier, "supplier_rank": 1 }),
                )
                .await?;

            let domain = json!([["origin", "=", order.order_number], ["partner_id", "=", partner.id]]);
            if let Some(id) = self.search_one(step, "purchase.order", domain).await? {
                records.push(RemoteRecord::found(id));
                continue;
            }

            let mut order_lines = Vec::with_capacity(lines.len());
            for line in lines {
                order_lines.push(json!([0, 0, {
                    "product_id": product_id(step, products, line)?,
                    "name": line.product_name,
                    "product_qty": line.quantity,
                    "price_unit": line.unit_price,
                }]));
            }

            let id = self
                .create(
                    step,
                    "purchase.order",
                    json!({
                        "partner_id": partner.id,
                        "origin": order.order_number,
                        "order_line": order_lines,
                    }),
                )
                .await?;
            info!(order_number = %order.order_number, purchase_order_id = id, %supplier, "Created Odoo purchase order");
            records.push(RemoteRecord::created(id));
        }

        let created = records.iter().any(|r| r.created);
        let id = records
            .first()
            .map(|r| r.id)
            .ok_or_else(|| StepError::validation(step, "order has no non-stock lines"))?;
        Ok(RemoteRecord { id, created })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_api_key() {
        let config = ErpConfig::default();
        assert!(OdooGateway::new(&config).is_err());
    }

    #[test]
    fn test_endpoint_appends_jsonrpc() {
        let config = ErpConfig {
            base_url: "https://erp.example.com/odoo/".to_string(),
            api_key: Some("key".to_string()),
            ..ErpConfig::default()
        };
        let gateway = OdooGateway::new(&config).unwrap();
        assert_eq!(gateway.endpoint.as_str(), "https://erp.example.com/odoo/jsonrpc");
    }

    #[test]
    fn test_rpc_error_description_includes_data() {
        let error: RpcError = serde_json::from_value(json!({
            "message": "Odoo Server Error",
            "data": { "message": "Invalid field 'foo'" }
        }))
        .unwrap();
        assert_eq!(error.describe(), "Odoo Server Error: Invalid field 'foo'");
    }
}
