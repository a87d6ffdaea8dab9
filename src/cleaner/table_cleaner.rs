use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use polars::prelude::*;
use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::{EntityRules, NumericFill, OutlierBound};
use crate::models::CleaningReport;

/// Date layouts seen in the raw exports; everything is rewritten to the
/// first one.
const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%m/%d/%Y", "%d-%m-%Y"];

/// Generic rule-driven table cleaner. One instance per entity; all
/// entity-specific behavior comes from the rule set.
pub struct TableCleaner<'a> {
    rules: &'a EntityRules,
}

impl<'a> TableCleaner<'a> {
    pub fn new(rules: &'a EntityRules) -> Self {
        Self { rules }
    }

    /// Read the raw CSV for this entity from `raw_dir`.
    pub fn read_raw(&self, raw_dir: &Path) -> Result<DataFrame> {
        let path = raw_dir.join(&self.rules.raw_file);
        if !path.exists() {
            bail!("Raw file not found: {}", path.display());
        }

        let df = LazyCsvReader::new(PlPath::Local(path.clone().into()))
            .with_infer_schema_length(Some(10_000))
            .finish()
            .and_then(|lf| lf.collect())
            .with_context(|| format!("Failed to read raw CSV {}", path.display()))?;

        info!(
            "Loaded {} with {} rows and {} columns",
            self.rules.raw_file,
            df.height(),
            df.width()
        );
        Ok(df)
    }

    /// Apply the full rule set: rename, required-field drops, fills, stable
    /// dedupe, outlier filtering, date standardization.
    pub fn clean(&self, raw: &DataFrame) -> Result<(DataFrame, CleaningReport)> {
        let mut report = CleaningReport {
            rows_in: raw.height(),
            ..Default::default()
        };

        let mut df = self.rename_columns(raw.clone())?;
        self.check_required_columns(&df)?;
        df = self.drop_missing_required(df, &mut report)?;
        df = self.fill_numeric(df, &mut report)?;
        df = self.fill_text(df, &mut report)?;
        df = self.drop_duplicate_ids(df, &mut report)?;
        df = self.drop_outliers(df, &mut report)?;
        df = self.standardize_dates(df)?;

        report.rows_out = df.height();
        info!(
            "Cleaned {}: {} rows in, {} rows out ({} missing, {} duplicate, {} outlier dropped; {} numeric, {} text filled)",
            self.rules.raw_file,
            report.rows_in,
            report.rows_out,
            report.dropped_missing,
            report.dropped_duplicate,
            report.dropped_outlier,
            report.filled_numeric,
            report.filled_text
        );
        Ok((df, report))
    }

    /// Write the cleaned table to `prepared_dir`, creating the directory.
    pub fn write_prepared(&self, df: &mut DataFrame, prepared_dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(prepared_dir).with_context(|| {
            format!(
                "Failed to create prepared directory {}",
                prepared_dir.display()
            )
        })?;
        let path = prepared_dir.join(&self.rules.prepared_file);
        let mut file = File::create(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        CsvWriter::new(&mut file)
            .include_header(true)
            .finish(df)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }

    fn required_columns(&self) -> Vec<&str> {
        let mut cols = vec![self.rules.id_column.as_str()];
        cols.extend(self.rules.required.iter().map(String::as_str));
        cols
    }

    fn rename_columns(&self, mut df: DataFrame) -> Result<DataFrame> {
        for (raw_name, new_name) in &self.rules.rename {
            if df.column(raw_name).is_ok() {
                df.rename(raw_name, new_name.as_str().into())?;
            }
        }
        Ok(df)
    }

    /// Fail fast when a required column is absent from the schema. This must
    /// never silently produce an empty table.
    fn check_required_columns(&self, df: &DataFrame) -> Result<()> {
        for name in self.required_columns() {
            if df.column(name).is_err() {
                bail!(
                    "Required column '{}' missing from {} (found: {:?})",
                    name,
                    self.rules.raw_file,
                    df.get_column_names()
                );
            }
        }
        Ok(())
    }

    fn drop_missing_required(
        &self,
        df: DataFrame,
        report: &mut CleaningReport,
    ) -> Result<DataFrame> {
        let mut keep = vec![true; df.height()];
        for name in self.required_columns() {
            let column = df.column(name)?;
            for (i, flag) in keep.iter_mut().enumerate() {
                if matches!(column.get(i)?, AnyValue::Null) {
                    *flag = false;
                }
            }
        }

        let dropped = keep.iter().filter(|k| !**k).count();
        if dropped == 0 {
            return Ok(df);
        }
        report.dropped_missing += dropped;
        warn!(
            "Dropping {} rows of {} with missing required fields",
            dropped, self.rules.raw_file
        );
        let mask = BooleanChunked::from_slice("keep".into(), &keep);
        Ok(df.filter(&mask)?)
    }

    fn fill_numeric(&self, mut df: DataFrame, report: &mut CleaningReport) -> Result<DataFrame> {
        let mut keep = vec![true; df.height()];
        for (name, policy) in &self.rules.numeric_fill {
            let Ok(column) = df.column(name) else {
                warn!("Numeric fill target '{}' not present, skipping", name);
                continue;
            };
            let casted = column
                .cast(&DataType::Float64)
                .with_context(|| format!("Column '{}' is not numeric", name))?;
            let values = casted.f64()?;
            let missing = values.null_count();
            if missing == 0 {
                continue;
            }

            match policy {
                NumericFill::Drop => {
                    for (i, v) in values.into_iter().enumerate() {
                        if v.is_none() {
                            keep[i] = false;
                        }
                    }
                }
                NumericFill::Zero | NumericFill::Mean => {
                    let fill = if *policy == NumericFill::Zero {
                        0.0
                    } else {
                        values.mean().unwrap_or(0.0)
                    };
                    let filled: Vec<f64> =
                        values.into_iter().map(|v| v.unwrap_or(fill)).collect();
                    report.filled_numeric += missing;
                    info!(
                        "Filled {} missing values in '{}' with {:.2}",
                        missing, name, fill
                    );
                    df.with_column(Series::new(name.as_str().into(), filled))?;
                }
            }
        }

        let dropped = keep.iter().filter(|k| !**k).count();
        if dropped == 0 {
            return Ok(df);
        }
        report.dropped_missing += dropped;
        warn!(
            "Dropping {} rows of {} with missing numeric values",
            dropped, self.rules.raw_file
        );
        let mask = BooleanChunked::from_slice("keep".into(), &keep);
        Ok(df.filter(&mask)?)
    }

    fn fill_text(&self, mut df: DataFrame, report: &mut CleaningReport) -> Result<DataFrame> {
        for (name, fill_value) in &self.rules.text_fill {
            let Ok(column) = df.column(name) else {
                warn!("Text fill target '{}' not present, skipping", name);
                continue;
            };
            let values = column
                .str()
                .with_context(|| format!("Text fill target '{}' is not a string column", name))?;
            let missing = values.null_count();
            if missing == 0 {
                continue;
            }

            let filled: Vec<String> = values
                .into_iter()
                .map(|v| v.unwrap_or(fill_value).to_string())
                .collect();
            report.filled_text += missing;
            info!(
                "Filled {} missing values in '{}' with '{}'",
                missing, name, fill_value
            );
            df.with_column(Series::new(name.as_str().into(), filled))?;
        }
        Ok(df)
    }

    /// Remove rows with a duplicate primary identifier, keeping the first
    /// occurrence in input order.
    fn drop_duplicate_ids(&self, df: DataFrame, report: &mut CleaningReport) -> Result<DataFrame> {
        let column = df.column(&self.rules.id_column)?;
        let mut seen = HashSet::with_capacity(df.height());
        let mut keep = Vec::with_capacity(df.height());
        for i in 0..df.height() {
            keep.push(seen.insert(column.get(i)?.to_string()));
        }

        let dropped = keep.iter().filter(|k| !**k).count();
        if dropped == 0 {
            return Ok(df);
        }
        report.dropped_duplicate += dropped;
        warn!(
            "Dropping {} duplicate '{}' rows from {}",
            dropped, self.rules.id_column, self.rules.raw_file
        );
        let mask = BooleanChunked::from_slice("keep".into(), &keep);
        Ok(df.filter(&mask)?)
    }

    fn drop_outliers(&self, mut df: DataFrame, report: &mut CleaningReport) -> Result<DataFrame> {
        for rule in &self.rules.outliers {
            let Ok(column) = df.column(&rule.column) else {
                warn!("Outlier target '{}' not present, skipping", rule.column);
                continue;
            };
            let casted = column
                .cast(&DataType::Float64)
                .with_context(|| format!("Outlier column '{}' is not numeric", rule.column))?;
            let values = casted.f64()?;

            let (lo, hi) = match rule.bound {
                OutlierBound::Range { min, max } => (min, max),
                OutlierBound::StdDev { k } => {
                    let mean = values.mean().unwrap_or(0.0);
                    let std = values.std(1).unwrap_or(0.0);
                    (mean - k * std, mean + k * std)
                }
            };

            // Nulls pass through here; the fill policies own missing values.
            let keep: Vec<bool> = values
                .into_iter()
                .map(|v| v.is_none_or(|x| x >= lo && x <= hi))
                .collect();
            let dropped = keep.iter().filter(|k| !**k).count();
            if dropped == 0 {
                continue;
            }
            report.dropped_outlier += dropped;
            warn!(
                "Dropping {} outlier rows on '{}' (bounds [{:.2}, {:.2}])",
                dropped, rule.column, lo, hi
            );
            let mask = BooleanChunked::from_slice("keep".into(), &keep);
            df = df.filter(&mask)?;
        }
        Ok(df)
    }

    fn standardize_dates(&self, mut df: DataFrame) -> Result<DataFrame> {
        for name in &self.rules.date_columns {
            let Ok(column) = df.column(name) else {
                warn!("Date column '{}' not present, skipping", name);
                continue;
            };
            let Ok(values) = column.str() else {
                continue;
            };
            let standardized: Vec<Option<String>> = values
                .into_iter()
                .map(|v| v.map(normalize_date))
                .collect();
            df.with_column(Series::new(name.as_str().into(), standardized))?;
        }
        Ok(df)
    }
}

/// Rewrite a date string to %Y-%m-%d when it matches a known layout;
/// unparseable values pass through unchanged.
fn normalize_date(raw: &str) -> String {
    let trimmed = raw.trim();
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return date.format("%Y-%m-%d").to_string();
        }
    }
    raw.to_string()
}
