// KPI Calculator
// Seven dashboard metrics derived from the sales export, salesperson ranking, and monthly tables

use crate::db::{CellValue, QueryResult};
use serde::Serialize;
use std::collections::BTreeMap;

/// Shown when the ranking table has no rows
pub const NO_SALESPERSON: &str = "N/A";

/// The exported KPI row; field names are the CSV header
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KpiRecord {
    pub total_revenue: f64,
    pub total_orders: i64,
    pub avg_order_value: f64,
    pub avg_revenue_per_product: f64,
    pub top_salesperson: String,
    pub top_salesperson_revenue: f64,
    #[serde(rename = "monthly_growth_%")]
    pub monthly_growth_pct: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum KpiError {
    #[error("Table '{table}' is missing required column '{column}'")]
    MissingColumn { table: String, column: &'static str },

    #[error("Invalid number {value:?} in column '{column}' of table '{table}' at row {row}")]
    InvalidNumber {
        table: String,
        column: &'static str,
        row: usize,
        value: String,
    },
}

/// The three inputs of [`compute_kpis`]
pub struct KpiInputs<'a> {
    /// `product`, `amount_usd`
    pub sales: &'a QueryResult,
    /// `sales_person`, `total_sales`, sorted by total sales descending
    pub ranking: &'a QueryResult,
    /// `year`, `month`, `total_sales`
    pub monthly: &'a QueryResult,
}

/// Compute the KPI record. An empty sales table yields `None`, whatever the
/// other tables hold.
pub fn compute_kpis(inputs: &KpiInputs<'_>) -> Result<Option<KpiRecord>, KpiError> {
    let sales = inputs.sales;
    if sales.is_empty() {
        return Ok(None);
    }

    let product_idx = require_column(sales, "product")?;
    let amount_idx = require_column(sales, "amount_usd")?;

    let mut total_revenue = 0.0;
    let mut per_product: BTreeMap<String, f64> = BTreeMap::new();
    for (row_idx, row) in sales.rows.iter().enumerate() {
        let amount = number_at(sales, row, row_idx, amount_idx, "amount_usd")?;
        total_revenue += amount.unwrap_or(0.0);

        // Rows without a product belong to no group
        if let Some(product) = cell(row, product_idx).as_text() {
            *per_product.entry(product).or_insert(0.0) += amount.unwrap_or(0.0);
        }
    }

    let total_orders = sales.rows.len();
    let avg_order_value = if total_orders > 0 {
        total_revenue / total_orders as f64
    } else {
        0.0
    };
    let avg_revenue_per_product = if per_product.is_empty() {
        0.0
    } else {
        per_product.values().sum::<f64>() / per_product.len() as f64
    };

    let (top_salesperson, top_salesperson_revenue) = top_salesperson(inputs.ranking)?;
    let monthly_growth_pct = monthly_growth(inputs.monthly)?;

    Ok(Some(KpiRecord {
        total_revenue: round2(total_revenue),
        total_orders: total_orders as i64,
        avg_order_value: round2(avg_order_value),
        avg_revenue_per_product: round2(avg_revenue_per_product),
        top_salesperson,
        top_salesperson_revenue: round2(top_salesperson_revenue),
        monthly_growth_pct: round2(monthly_growth_pct),
    }))
}

/// First row of the ranking; the source already orders it
fn top_salesperson(ranking: &QueryResult) -> Result<(String, f64), KpiError> {
    let Some(first) = ranking.rows.first() else {
        return Ok((NO_SALESPERSON.to_string(), 0.0));
    };

    let name_idx = require_column(ranking, "sales_person")?;
    let total_idx = require_column(ranking, "total_sales")?;

    let name = cell(first, name_idx)
        .as_text()
        .unwrap_or_else(|| NO_SALESPERSON.to_string());
    let revenue = number_at(ranking, first, 0, total_idx, "total_sales")?.unwrap_or(0.0);
    Ok((name, revenue))
}

/// Percent change of the latest month over the one before it
fn monthly_growth(monthly: &QueryResult) -> Result<f64, KpiError> {
    if monthly.is_empty() {
        return Ok(0.0);
    }

    let year_idx = require_column(monthly, "year")?;
    let month_idx = require_column(monthly, "month")?;
    let total_idx = require_column(monthly, "total_sales")?;

    let mut months = Vec::with_capacity(monthly.rows.len());
    for (row_idx, row) in monthly.rows.iter().enumerate() {
        let year = required_number(monthly, row, row_idx, year_idx, "year")?;
        let month = required_number(monthly, row, row_idx, month_idx, "month")?;
        let total = number_at(monthly, row, row_idx, total_idx, "total_sales")?.unwrap_or(0.0);
        months.push((year, month, total));
    }
    months.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));

    let current = months[months.len() - 1].2;
    let previous = if months.len() > 1 {
        months[months.len() - 2].2
    } else {
        current
    };

    if previous == 0.0 {
        return Ok(0.0);
    }
    Ok((current - previous) / previous * 100.0)
}

/// Two decimals, halves to even
fn round2(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}

fn cell(row: &[CellValue], idx: usize) -> &CellValue {
    row.get(idx).unwrap_or(&CellValue::Null)
}

fn require_column(table: &QueryResult, column: &'static str) -> Result<usize, KpiError> {
    table.column_index(column).ok_or_else(|| KpiError::MissingColumn {
        table: table.source.clone(),
        column,
    })
}

/// `Ok(None)` for NULL, an error for anything that is not a number
fn number_at(
    table: &QueryResult,
    row: &[CellValue],
    row_idx: usize,
    idx: usize,
    column: &'static str,
) -> Result<Option<f64>, KpiError> {
    let value = cell(row, idx);
    if value.is_null() {
        return Ok(None);
    }
    value.as_f64().map(Some).ok_or_else(|| KpiError::InvalidNumber {
        table: table.source.clone(),
        column,
        row: row_idx,
        value: value.as_text().unwrap_or_default(),
    })
}

fn required_number(
    table: &QueryResult,
    row: &[CellValue],
    row_idx: usize,
    idx: usize,
    column: &'static str,
) -> Result<f64, KpiError> {
    number_at(table, row, row_idx, idx, column)?.ok_or_else(|| KpiError::InvalidNumber {
        table: table.source.clone(),
        column,
        row: row_idx,
        value: "NULL".to_string(),
    })
}
