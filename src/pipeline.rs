use anyhow::{Context, Result, bail};
use polars::prelude::*;
use rusqlite::Connection;
use std::path::Path;
use tracing::info;

use crate::cleaner::TableCleaner;
use crate::config::PipelineConfig;
use crate::cube::CubeAggregator;
use crate::models::LoadSummary;
use crate::report::Reporter;
use crate::warehouse::WarehouseLoader;

const ENTITIES: [&str; 3] = ["customer", "product", "sale"];

/// Run the four stages in order. Each stage is also callable on its own;
/// every stage treats its inputs as read-only and overwrites its outputs.
pub fn run_all(config: &PipelineConfig) -> Result<()> {
    run_clean(config)?;
    let summary = run_load(config)?;
    info!(
        "Loaded warehouse: {} customers, {} products, {} sales",
        summary.customers, summary.products, summary.sales
    );
    run_cube(config)?;
    run_report(config)?;
    Ok(())
}

/// Clean all raw entity files into the prepared directory.
pub fn run_clean(config: &PipelineConfig) -> Result<()> {
    for entity in ENTITIES {
        let rules = config.entity(entity)?;
        let cleaner = TableCleaner::new(rules);
        let raw = cleaner.read_raw(&config.paths.raw_dir)?;
        let (mut cleaned, report) = cleaner
            .clean(&raw)
            .with_context(|| format!("Cleaning failed for entity '{}'", entity))?;
        let path = cleaner.write_prepared(&mut cleaned, &config.paths.prepared_dir)?;
        info!(
            "Prepared {} -> {} ({} of {} rows kept, {} dropped)",
            entity,
            path.display(),
            report.rows_out,
            report.rows_in,
            report.total_dropped()
        );
    }
    Ok(())
}

/// Load the three prepared tables into the warehouse.
pub fn run_load(config: &PipelineConfig) -> Result<LoadSummary> {
    let customers = read_prepared(config, "customer")?;
    let products = read_prepared(config, "product")?;
    let sales = read_prepared(config, "sale")?;

    let loader = WarehouseLoader::new(&config.paths.warehouse_db, config.load.orphan_policy);
    loader.load(&customers, &products, &sales)
}

/// Aggregate the warehouse sale table into the cube CSV.
pub fn run_cube(config: &PipelineConfig) -> Result<()> {
    let db_path = &config.paths.warehouse_db;
    if !db_path.exists() {
        bail!(
            "Warehouse {} not found; run the load stage first",
            db_path.display()
        );
    }
    let conn = Connection::open(db_path)
        .with_context(|| format!("Failed to open warehouse {}", db_path.display()))?;

    let aggregator = CubeAggregator::new(&config.cube);
    let sales = aggregator.read_sales(&conn)?;
    let mut cube = aggregator.aggregate(&sales)?;
    aggregator.write_cube(&mut cube, &config.paths.cube_output)
}

/// Rank the cube and render the bar chart.
pub fn run_report(config: &PipelineConfig) -> Result<()> {
    let reporter = Reporter::new(&config.report);
    let rows = reporter.read_cube(&config.paths.cube_output)?;
    let ranked = reporter.rank(&rows)?;
    if let Some((top, bottom)) = reporter.extremes(&ranked) {
        info!(
            "Most used payment type: {} (total {:.2}); least used: {} (total {:.2})",
            top.payment_type, top.total_amount, bottom.payment_type, bottom.total_amount
        );
    }
    reporter.render(&ranked, &config.paths.chart_output)
}

fn read_prepared(config: &PipelineConfig, entity: &str) -> Result<DataFrame> {
    let rules = config.entity(entity)?;
    let path = config.paths.prepared_dir.join(&rules.prepared_file);
    if !path.exists() {
        bail!(
            "Prepared file {} not found; run the clean stage first",
            path.display()
        );
    }
    LazyCsvReader::new(PlPath::Local(path.clone().into()))
        .with_infer_schema_length(Some(10_000))
        .finish()
        .and_then(|lf| lf.collect())
        .with_context(|| format!("Failed to read prepared CSV {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        CubeConfig, EntityRules, LoadConfig, NumericFill, OrphanPolicy, OutlierBound, OutlierRule,
        PathsConfig, ReportConfig,
    };
    use std::collections::HashMap;
    use std::fmt::Write as _;

    fn test_config(root: &Path) -> PipelineConfig {
        let customer = EntityRules {
            raw_file: "customers_data.csv".to_string(),
            prepared_file: "customers_prepared.csv".to_string(),
            id_column: "customer_id".to_string(),
            required: vec![],
            rename: HashMap::from([
                ("CustomerID".to_string(), "customer_id".to_string()),
                ("Name".to_string(), "name".to_string()),
                ("Region".to_string(), "region".to_string()),
                ("JoinDate".to_string(), "join_date".to_string()),
                ("RewardsPoints".to_string(), "rewards_points".to_string()),
                ("MemberTier".to_string(), "member_tier".to_string()),
            ]),
            numeric_fill: HashMap::from([("rewards_points".to_string(), NumericFill::Zero)]),
            text_fill: HashMap::from([
                ("name".to_string(), "Unknown".to_string()),
                ("region".to_string(), "Unknown".to_string()),
                ("member_tier".to_string(), "Unknown".to_string()),
            ]),
            date_columns: vec!["join_date".to_string()],
            outliers: vec![],
        };
        let product = EntityRules {
            raw_file: "products_data.csv".to_string(),
            prepared_file: "products_prepared.csv".to_string(),
            id_column: "product_id".to_string(),
            required: vec![],
            rename: HashMap::from([
                ("ProductID".to_string(), "product_id".to_string()),
                ("ProductName".to_string(), "product_name".to_string()),
                ("Category".to_string(), "category".to_string()),
                ("UnitPrice".to_string(), "unit_price".to_string()),
                ("Condition".to_string(), "condition".to_string()),
            ]),
            numeric_fill: HashMap::from([("unit_price".to_string(), NumericFill::Mean)]),
            text_fill: HashMap::from([("condition".to_string(), "Unknown".to_string())]),
            date_columns: vec![],
            outliers: vec![],
        };
        let sale = EntityRules {
            raw_file: "sales_data.csv".to_string(),
            prepared_file: "sales_prepared.csv".to_string(),
            id_column: "sale_id".to_string(),
            required: vec!["customer_id".to_string(), "product_id".to_string()],
            rename: HashMap::from([
                ("TransactionID".to_string(), "sale_id".to_string()),
                ("CustomerID".to_string(), "customer_id".to_string()),
                ("ProductID".to_string(), "product_id".to_string()),
                ("SaleAmount".to_string(), "amount".to_string()),
                ("SaleDate".to_string(), "sale_date".to_string()),
                ("PaymentType".to_string(), "payment_type".to_string()),
            ]),
            numeric_fill: HashMap::from([("amount".to_string(), NumericFill::Drop)]),
            text_fill: HashMap::new(),
            date_columns: vec!["sale_date".to_string()],
            outliers: vec![OutlierRule {
                column: "amount".to_string(),
                bound: OutlierBound::Range {
                    min: 0.0,
                    max: 10_000.0,
                },
            }],
        };

        PipelineConfig {
            paths: PathsConfig {
                raw_dir: root.join("raw"),
                prepared_dir: root.join("prepared"),
                warehouse_db: root.join("dw").join("smart_sales.db"),
                cube_output: root.join("olap").join("sales_cube.csv"),
                chart_output: root.join("results").join("chart.png"),
            },
            cleaning: HashMap::from([
                ("customer".to_string(), customer),
                ("product".to_string(), product),
                ("sale".to_string(), sale),
            ]),
            load: LoadConfig {
                orphan_policy: OrphanPolicy::Drop,
            },
            cube: CubeConfig {
                dimension: "payment_type".to_string(),
                measure: "amount".to_string(),
                drop_null_dimension: false,
                null_label: "unknown".to_string(),
            },
            report: ReportConfig {
                measure: "total_amount".to_string(),
                title: "Total Sales by Payment Type".to_string(),
                width: 640,
                height: 480,
            },
        }
    }

    fn write_raw_files(raw_dir: &Path) {
        std::fs::create_dir_all(raw_dir).unwrap();

        let mut customers = String::from(
            "CustomerID,Name,Region,JoinDate,RewardsPoints,MemberTier\n",
        );
        for id in 1..=10 {
            writeln!(
                customers,
                "{},Customer {},East,2023-01-{:02},{},Basic",
                id,
                id,
                id,
                id * 10
            )
            .unwrap();
        }
        std::fs::write(raw_dir.join("customers_data.csv"), customers).unwrap();

        let mut products =
            String::from("ProductID,ProductName,Category,UnitPrice,Condition\n");
        for id in 1..=10 {
            writeln!(products, "{},Product {},Electronics,{}.50,New", id, id, id).unwrap();
        }
        std::fs::write(raw_dir.join("products_data.csv"), products).unwrap();

        // 100 rows: ids 1..=95 once each, ids 1..=5 repeated (duplicates),
        // and 3 of the unique rows (ids 93..=95) missing their amount.
        let payment_types = ["cash", "card", "transfer", "wallet"];
        let mut sales =
            String::from("TransactionID,CustomerID,ProductID,SaleAmount,SaleDate,PaymentType\n");
        for id in 1..=95 {
            let amount = if id >= 93 {
                String::new()
            } else {
                format!("{}.00", 10 + id)
            };
            writeln!(
                sales,
                "{},{},{},{},2024-02-01,{}",
                id,
                (id % 10) + 1,
                (id % 10) + 1,
                amount,
                payment_types[id % payment_types.len()]
            )
            .unwrap();
        }
        for id in 1..=5 {
            writeln!(
                sales,
                "{},{},{},999.00,2024-02-02,cash",
                id,
                (id % 10) + 1,
                (id % 10) + 1
            )
            .unwrap();
        }
        std::fs::write(raw_dir.join("sales_data.csv"), sales).unwrap();
    }

    #[test]
    fn test_end_to_end_counts_and_totals() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        write_raw_files(&config.paths.raw_dir);

        run_clean(&config).unwrap();

        // 100 raw rows, 5 duplicates and 3 missing amounts dropped.
        let prepared = read_prepared(&config, "sale").unwrap();
        assert_eq!(prepared.height(), 92);
        let cleaned_total: f64 = prepared
            .column("amount")
            .unwrap()
            .f64()
            .unwrap()
            .into_no_null_iter()
            .sum();

        let summary = run_load(&config).unwrap();
        assert_eq!(summary.sales, 92);
        assert_eq!(summary.orphans_dropped, 0);

        run_cube(&config).unwrap();
        run_report(&config).unwrap();

        // Cube totals must match the cleaned table exactly.
        let reporter = Reporter::new(&config.report);
        let cube_rows = reporter.read_cube(&config.paths.cube_output).unwrap();
        let cube_total: f64 = cube_rows.iter().map(|r| r.total_amount).sum();
        let cube_count: u32 = cube_rows.iter().map(|r| r.sale_count).sum();
        assert!((cube_total - cleaned_total).abs() < 1e-9);
        assert_eq!(cube_count, 92);

        assert!(config.paths.warehouse_db.exists());
        assert!(config.paths.chart_output.exists());
    }

    #[test]
    fn test_pipeline_is_idempotent_by_replacement() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        write_raw_files(&config.paths.raw_dir);

        run_clean(&config).unwrap();
        let first = run_load(&config).unwrap();
        let second = run_load(&config).unwrap();
        assert_eq!(first.sales, second.sales);

        let conn = Connection::open(&config.paths.warehouse_db).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM sale", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count as usize, second.sales);
    }

    #[test]
    fn test_empty_sales_produce_no_data_report() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        // A warehouse whose sale table exists but holds no rows.
        std::fs::create_dir_all(config.paths.warehouse_db.parent().unwrap()).unwrap();
        let conn = Connection::open(&config.paths.warehouse_db).unwrap();
        conn.execute_batch(
            "CREATE TABLE sale (
                sale_id INTEGER PRIMARY KEY,
                customer_id INTEGER,
                product_id INTEGER,
                amount REAL,
                sale_date TEXT,
                payment_type TEXT
            );",
        )
        .unwrap();
        drop(conn);

        run_cube(&config).unwrap();
        run_report(&config).unwrap();
        assert!(config.paths.cube_output.exists());
        assert!(config.paths.chart_output.exists());
    }

    #[test]
    fn test_cube_without_warehouse_fails_with_hint() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let err = run_cube(&config).unwrap_err();
        assert!(err.to_string().contains("run the load stage first"));
    }
}
