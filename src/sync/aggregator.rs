//! Groups eligible transaction lines into orders.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use sea_orm::prelude::*;
use sea_orm::{ConnectionTrait, QueryOrder};
use tracing::debug;
use uuid::Uuid;

use super::window::SyncWindow;
use crate::config::EligibilityConfig;
use crate::models::{Product, SaleTransaction, product, sale_transaction};

/// One transaction line of an order, enriched with its catalogue data.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderLine {
    pub transaction_id: Uuid,
    pub sku: String,
    pub product_name: String,
    /// Catalogue brand, falling back to the brand recorded on the transaction
    pub brand_name: Option<String>,
    pub quantity: i32,
    pub unit_price: f64,
    pub is_non_stock: bool,
    pub supplier_name: Option<String>,
}

impl OrderLine {
    pub fn amount(&self) -> f64 {
        f64::from(self.quantity) * self.unit_price
    }
}

/// Transaction lines sharing an order number.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderAggregate {
    pub order_number: String,
    pub order_date: NaiveDate,
    pub customer_phone: Option<String>,
    pub customer_name: Option<String>,
    pub lines: Vec<OrderLine>,
    /// Any line is a non-stock item, so the purchase step applies
    pub has_non_stock_lines: bool,
}

impl OrderAggregate {
    pub fn total_amount(&self) -> f64 {
        self.lines.iter().map(OrderLine::amount).sum()
    }

    /// Distinct product names in line order, joined with ", ".
    pub fn product_names(&self) -> String {
        let mut seen = HashSet::new();
        self.lines
            .iter()
            .filter(|line| seen.insert(line.product_name.as_str()))
            .map(|line| line.product_name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Distinct brand names in line order.
    pub fn brand_names(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.lines
            .iter()
            .filter_map(|line| line.brand_name.as_deref())
            .filter(|brand| seen.insert(*brand))
            .collect()
    }

    /// First line of every distinct SKU.
    pub fn distinct_products(&self) -> Vec<&OrderLine> {
        let mut seen = HashSet::new();
        self.lines
            .iter()
            .filter(|line| seen.insert(line.sku.as_str()))
            .collect()
    }

    pub fn non_stock_lines(&self) -> impl Iterator<Item = &OrderLine> {
        self.lines.iter().filter(|line| line.is_non_stock)
    }

    /// An order without a customer phone cannot reach the customer step.
    pub fn is_syncable(&self) -> bool {
        self.customer_phone.is_some()
    }

    fn transaction_ids(&self) -> Vec<Uuid> {
        self.lines.iter().map(|line| line.transaction_id).collect()
    }
}

/// Orders of a window split into syncable orders and skipped order numbers.
#[derive(Debug, Clone, Default)]
pub struct AggregatedWindow {
    /// Sorted by order date descending, then order number ascending
    pub orders: Vec<OrderAggregate>,
    pub skipped: Vec<String>,
}

/// Reads eligible transaction lines and builds [`OrderAggregate`]s.
#[derive(Debug, Clone)]
pub struct OrderAggregator {
    excluded_payment_method: String,
}

impl OrderAggregator {
    pub fn new(eligibility: &EligibilityConfig) -> Self {
        Self {
            excluded_payment_method: eligibility.excluded_payment_method.clone(),
        }
    }

    /// Loads every eligible, unsent order inside `window`.
    pub async fn load_window<C: ConnectionTrait>(
        &self,
        db: &C,
        window: &SyncWindow,
    ) -> Result<AggregatedWindow, DbErr> {
        let rows = SaleTransaction::find()
            .filter(sale_transaction::Column::DateInt.between(window.from_int(), window.to_int()))
            .filter(sale_transaction::Column::PaymentMethod.ne(self.excluded_payment_method.as_str()))
            .filter(sale_transaction::Column::IsDeleted.eq(false))
            .filter(sale_transaction::Column::SentToErp.eq(false))
            .order_by_asc(sale_transaction::Column::OrderNumber)
            .order_by_asc(sale_transaction::Column::Id)
            .all(db)
            .await?;

        let catalogue = load_catalogue(db, &rows).await?;
        let orders = group_lines(rows, &catalogue);

        let (orders, skipped): (Vec<_>, Vec<_>) =
            orders.into_iter().partition(OrderAggregate::is_syncable);
        let skipped = skipped.into_iter().map(|o| o.order_number).collect::<Vec<_>>();

        debug!(
            window = %window,
            orders = orders.len(),
            skipped = skipped.len(),
            "Aggregated eligible transactions"
        );

        Ok(AggregatedWindow { orders, skipped })
    }

    /// Loads one order by number, including lines already marked as sent.
    ///
    /// Retries use this: after a successful order step the lines are flagged
    /// as sent, yet a later purchase retry still needs them.
    pub async fn load_order<C: ConnectionTrait>(
        &self,
        db: &C,
        order_number: &str,
    ) -> Result<Option<OrderAggregate>, DbErr> {
        let rows = SaleTransaction::find()
            .filter(sale_transaction::Column::OrderNumber.eq(order_number))
            .filter(sale_transaction::Column::PaymentMethod.ne(self.excluded_payment_method.as_str()))
            .filter(sale_transaction::Column::IsDeleted.eq(false))
            .order_by_asc(sale_transaction::Column::Id)
            .all(db)
            .await?;

        let catalogue = load_catalogue(db, &rows).await?;
        Ok(group_lines(rows, &catalogue).into_iter().next())
    }

    /// Flags the order's transaction lines as sent to the ERP.
    pub async fn mark_sent<C: ConnectionTrait>(
        &self,
        db: &C,
        order: &OrderAggregate,
    ) -> Result<u64, DbErr> {
        let result = SaleTransaction::update_many()
            .col_expr(sale_transaction::Column::SentToErp, Expr::value(true))
            .filter(sale_transaction::Column::Id.is_in(order.transaction_ids()))
            .exec(db)
            .await?;
        Ok(result.rows_affected)
    }
}

/// Catalogue rows for the SKUs referenced by `rows`, fetched in one query.
async fn load_catalogue<C: ConnectionTrait>(
    db: &C,
    rows: &[sale_transaction::Model],
) -> Result<HashMap<String, product::Model>, DbErr> {
    let skus: HashSet<&str> = rows.iter().map(|row| row.product_sku.as_str()).collect();
    if skus.is_empty() {
        return Ok(HashMap::new());
    }

    let products = Product::find()
        .filter(product::Column::Sku.is_in(skus))
        .all(db)
        .await?;

    Ok(products.into_iter().map(|p| (p.sku.clone(), p)).collect())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn group_lines(
    rows: Vec<sale_transaction::Model>,
    catalogue: &HashMap<String, product::Model>,
) -> Vec<OrderAggregate> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut orders: Vec<OrderAggregate> = Vec::new();

    for row in rows {
        let entry = catalogue.get(&row.product_sku);
        let line = OrderLine {
            transaction_id: row.id,
            sku: row.product_sku,
            product_name: row.product_name,
            brand_name: non_blank(entry.and_then(|p| p.brand_name.clone()))
                .or_else(|| non_blank(row.brand_name)),
            quantity: row.quantity,
            unit_price: row.unit_price,
            is_non_stock: entry.is_some_and(|p| p.is_non_stock),
            supplier_name: non_blank(entry.and_then(|p| p.supplier_name.clone())),
        };

        let position = *index.entry(row.order_number.clone()).or_insert_with(|| {
            orders.push(OrderAggregate {
                order_number: row.order_number.clone(),
                order_date: row.transaction_date,
                customer_phone: None,
                customer_name: None,
                lines: Vec::new(),
                has_non_stock_lines: false,
            });
            orders.len() - 1
        });

        let order = &mut orders[position];
        order.order_date = order.order_date.max(row.transaction_date);
        if order.customer_phone.is_none() {
            order.customer_phone = non_blank(row.customer_phone);
        }
        if order.customer_name.is_none() {
            order.customer_name = non_blank(row.customer_name);
        }
        order.has_non_stock_lines |= line.is_non_stock;
        order.lines.push(line);
    }

    // Stable across resumes: newest first, ties broken by order number
    orders.sort_by(|a, b| {
        b.order_date
            .cmp(&a.order_date)
            .then_with(|| a.order_number.cmp(&b.order_number))
    });
    orders
}
