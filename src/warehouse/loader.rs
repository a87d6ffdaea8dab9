use anyhow::{Context, Result};
use polars::prelude::*;
use rusqlite::Connection;
use rusqlite::types::Value as SqlValue;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::OrphanPolicy;
use crate::models::LoadSummary;

use super::schema::{self, TableDef};

/// Truncate-and-reload loader for the SQLite warehouse. Each table is
/// replaced inside its own transaction, so a failed load leaves the previous
/// contents of that table intact.
pub struct WarehouseLoader {
    db_path: PathBuf,
    orphan_policy: OrphanPolicy,
}

impl WarehouseLoader {
    pub fn new(db_path: &Path, orphan_policy: OrphanPolicy) -> Self {
        Self {
            db_path: db_path.to_path_buf(),
            orphan_policy,
        }
    }

    /// Open the warehouse file, creating its parent directory. The
    /// connection closes when the returned handle drops, on every exit path.
    pub fn open(&self) -> Result<Connection> {
        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create warehouse directory {}", parent.display())
            })?;
        }
        let conn = Connection::open(&self.db_path)
            .with_context(|| format!("Failed to open warehouse {}", self.db_path.display()))?;
        // The bundled SQLite enables foreign_keys by default; the schema
        // declares FKs for documentation only (see schema.rs), so restore
        // the stock SQLite default of not enforcing them.
        conn.pragma_update(None, "foreign_keys", false)
            .context("Failed to disable foreign key enforcement")?;
        Ok(conn)
    }

    /// Load the three cleaned tables. Order matters: dimensions first, so
    /// the sale orphan check runs against the final dimension contents.
    pub fn load(
        &self,
        customers: &DataFrame,
        products: &DataFrame,
        sales: &DataFrame,
    ) -> Result<LoadSummary> {
        let mut conn = self.open()?;

        let customers_loaded = replace_table(&mut conn, &schema::CUSTOMER, customers)?;
        let products_loaded = replace_table(&mut conn, &schema::PRODUCT, products)?;

        let (sales_kept, orphans_dropped) = self.apply_orphan_policy(&conn, sales)?;
        let sales_loaded = replace_table(&mut conn, &schema::SALE, &sales_kept)?;

        let summary = LoadSummary {
            customers: customers_loaded,
            products: products_loaded,
            sales: sales_loaded,
            orphans_dropped,
        };
        info!(
            "Warehouse load complete: {} customers, {} products, {} sales ({} orphans dropped)",
            summary.customers, summary.products, summary.sales, summary.orphans_dropped
        );
        Ok(summary)
    }

    /// Referential integrity is an explicit policy: `Drop` filters sale rows
    /// whose customer or product id is absent (counted, never silent);
    /// `Keep` loads them as-is.
    fn apply_orphan_policy(
        &self,
        conn: &Connection,
        sales: &DataFrame,
    ) -> Result<(DataFrame, usize)> {
        if self.orphan_policy == OrphanPolicy::Keep || sales.height() == 0 {
            return Ok((sales.clone(), 0));
        }

        let customers = id_set(conn, "customer", "customer_id")?;
        let products = id_set(conn, "product", "product_id")?;

        let customer_col = sales.column("customer_id")?.cast(&DataType::Int64)?;
        let customer_ids = customer_col.i64()?;
        let product_col = sales.column("product_id")?.cast(&DataType::Int64)?;
        let product_ids = product_col.i64()?;

        let mut keep = Vec::with_capacity(sales.height());
        for i in 0..sales.height() {
            let known_customer = customer_ids
                .get(i)
                .is_some_and(|id| customers.contains(&id));
            let known_product = product_ids.get(i).is_some_and(|id| products.contains(&id));
            keep.push(known_customer && known_product);
        }

        let dropped = keep.iter().filter(|k| !**k).count();
        if dropped == 0 {
            return Ok((sales.clone(), 0));
        }
        warn!(
            "Dropping {} sale rows referencing unknown customers or products",
            dropped
        );
        let mask = BooleanChunked::from_slice("keep".into(), &keep);
        Ok((sales.filter(&mask)?, dropped))
    }
}

/// Atomically replace one table: DROP + CREATE + all inserts in a single
/// transaction. On any failure the transaction rolls back and the previous
/// table survives.
fn replace_table(conn: &mut Connection, table: &TableDef, df: &DataFrame) -> Result<usize> {
    let columns: Vec<&Column> = table
        .columns
        .iter()
        .map(|name| {
            df.column(name)
                .with_context(|| format!("Cleaned {} table lacks column '{}'", table.name, name))
        })
        .collect::<Result<_>>()?;

    let tx = conn.transaction()?;
    tx.execute_batch(&format!("DROP TABLE IF EXISTS {}", table.name))
        .with_context(|| format!("Failed to drop table {}", table.name))?;
    tx.execute_batch(table.create_sql)
        .with_context(|| format!("Failed to create table {}", table.name))?;

    {
        let mut stmt = tx.prepare(table.insert_sql)?;
        for i in 0..df.height() {
            let params: Vec<SqlValue> = columns
                .iter()
                .map(|column| Ok(to_sql_value(column.get(i)?)))
                .collect::<Result<_>>()?;
            stmt.execute(rusqlite::params_from_iter(params))
                .with_context(|| format!("Failed to insert row {} into {}", i, table.name))?;
        }
    }

    tx.commit()
        .with_context(|| format!("Failed to commit load of {}", table.name))?;
    info!("Replaced table '{}' with {} rows", table.name, df.height());
    Ok(df.height())
}

fn id_set(conn: &Connection, table: &str, column: &str) -> Result<HashSet<i64>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM {}", column, table))?;
    let ids = stmt
        .query_map([], |row| row.get::<_, i64>(0))?
        .collect::<rusqlite::Result<HashSet<i64>>>()?;
    Ok(ids)
}

fn to_sql_value(value: AnyValue) -> SqlValue {
    match value {
        AnyValue::Null => SqlValue::Null,
        AnyValue::Boolean(b) => SqlValue::Integer(b as i64),
        AnyValue::Int8(v) => SqlValue::Integer(v as i64),
        AnyValue::Int16(v) => SqlValue::Integer(v as i64),
        AnyValue::Int32(v) => SqlValue::Integer(v as i64),
        AnyValue::Int64(v) => SqlValue::Integer(v),
        AnyValue::UInt8(v) => SqlValue::Integer(v as i64),
        AnyValue::UInt16(v) => SqlValue::Integer(v as i64),
        AnyValue::UInt32(v) => SqlValue::Integer(v as i64),
        AnyValue::UInt64(v) => SqlValue::Integer(v as i64),
        AnyValue::Float32(v) => SqlValue::Real(v as f64),
        AnyValue::Float64(v) => SqlValue::Real(v),
        AnyValue::String(v) => SqlValue::Text(v.to_string()),
        AnyValue::StringOwned(v) => SqlValue::Text(v.to_string()),
        other => SqlValue::Text(other.to_string()),
    }
}
