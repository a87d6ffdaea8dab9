use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Configuration for one pipeline run. Every stage receives the section it
/// needs from this struct; nothing reads global state.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub paths: PathsConfig,
    #[serde(default)]
    pub cleaning: HashMap<String, EntityRules>,
    pub load: LoadConfig,
    pub cube: CubeConfig,
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    pub raw_dir: PathBuf,
    pub prepared_dir: PathBuf,
    pub warehouse_db: PathBuf,
    pub cube_output: PathBuf,
    pub chart_output: PathBuf,
}

/// Per-entity cleaning rule set. Column names refer to the renamed schema,
/// i.e. the rename map is applied before any other rule.
#[derive(Debug, Clone, Deserialize)]
pub struct EntityRules {
    pub raw_file: String,
    pub prepared_file: String,
    pub id_column: String,
    /// Columns besides the id that must be present and non-null.
    #[serde(default)]
    pub required: Vec<String>,
    /// Raw CSV header -> warehouse column name.
    #[serde(default)]
    pub rename: HashMap<String, String>,
    #[serde(default)]
    pub numeric_fill: HashMap<String, NumericFill>,
    #[serde(default)]
    pub text_fill: HashMap<String, String>,
    #[serde(default)]
    pub date_columns: Vec<String>,
    #[serde(default)]
    pub outliers: Vec<OutlierRule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericFill {
    /// Drop the row when the value is missing.
    Drop,
    Zero,
    /// Fill with the column mean computed over the incoming rows.
    Mean,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutlierRule {
    pub column: String,
    #[serde(flatten)]
    pub bound: OutlierBound,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum OutlierBound {
    /// Fixed plausible range, inclusive on both ends.
    Range { min: f64, max: f64 },
    /// Keep values within k standard deviations of the column mean.
    StdDev { k: f64 },
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoadConfig {
    #[serde(default)]
    pub orphan_policy: OrphanPolicy,
}

/// What to do with sale rows whose customer or product id is absent from the
/// dimension tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanPolicy {
    #[default]
    Drop,
    Keep,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CubeConfig {
    #[serde(default = "default_dimension")]
    pub dimension: String,
    #[serde(default = "default_measure")]
    pub measure: String,
    /// When false (default), null dimension values form their own group
    /// under `null_label`.
    #[serde(default)]
    pub drop_null_dimension: bool,
    #[serde(default = "default_null_label")]
    pub null_label: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    /// Cube column to rank by: "total_amount" or "sale_count".
    #[serde(default = "default_report_measure")]
    pub measure: String,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
}

fn default_dimension() -> String {
    "payment_type".to_string()
}

fn default_measure() -> String {
    "amount".to_string()
}

fn default_null_label() -> String {
    "unknown".to_string()
}

fn default_report_measure() -> String {
    "total_amount".to_string()
}

fn default_title() -> String {
    "Total Sales by Payment Type".to_string()
}

fn default_width() -> u32 {
    1000
}

fn default_height() -> u32 {
    600
}

impl PipelineConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: PipelineConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Cleaning rules for one entity, failing with the section name when the
    /// config does not define it.
    pub fn entity(&self, name: &str) -> Result<&EntityRules> {
        self.cleaning
            .get(name)
            .with_context(|| format!("No [cleaning.{}] section in config", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
            [paths]
            raw_dir = "data/raw"
            prepared_dir = "data/prepared"
            warehouse_db = "data/dw/smart_sales.db"
            cube_output = "data/olap/sales_cube.csv"
            chart_output = "data/results/sales_by_payment_type.png"

            [cleaning.sale]
            raw_file = "sales_data.csv"
            prepared_file = "sales_prepared.csv"
            id_column = "sale_id"
            required = ["customer_id", "product_id"]
            date_columns = ["sale_date"]

            [cleaning.sale.rename]
            TransactionID = "sale_id"
            SaleAmount = "amount"

            [cleaning.sale.numeric_fill]
            amount = "drop"

            [[cleaning.sale.outliers]]
            column = "amount"
            method = "range"
            min = 0.0
            max = 10000.0

            [[cleaning.sale.outliers]]
            column = "amount"
            method = "std_dev"
            k = 3.0

            [load]
            orphan_policy = "keep"

            [cube]
            dimension = "payment_type"
            measure = "amount"

            [report]
            measure = "total_amount"
        "#;

        let config: PipelineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.paths.raw_dir, PathBuf::from("data/raw"));

        let sale = config.entity("sale").unwrap();
        assert_eq!(sale.id_column, "sale_id");
        assert_eq!(sale.rename.get("SaleAmount").unwrap(), "amount");
        assert_eq!(sale.numeric_fill.get("amount"), Some(&NumericFill::Drop));
        assert_eq!(sale.outliers.len(), 2);
        assert!(matches!(
            sale.outliers[0].bound,
            OutlierBound::Range { min, max } if min == 0.0 && max == 10000.0
        ));
        assert!(matches!(sale.outliers[1].bound, OutlierBound::StdDev { k } if k == 3.0));

        assert_eq!(config.load.orphan_policy, OrphanPolicy::Keep);
        assert_eq!(config.cube.null_label, "unknown");
        assert!(!config.cube.drop_null_dimension);
        assert_eq!(config.report.width, 1000);
    }

    #[test]
    fn test_missing_entity_section_errors() {
        let toml_str = r#"
            [paths]
            raw_dir = "a"
            prepared_dir = "b"
            warehouse_db = "c"
            cube_output = "d"
            chart_output = "e"

            [load]

            [cube]

            [report]
        "#;

        let config: PipelineConfig = toml::from_str(toml_str).unwrap();
        let err = config.entity("customer").unwrap_err();
        assert!(err.to_string().contains("cleaning.customer"));
    }
}
