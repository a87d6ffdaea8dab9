use anyhow::{Context, Result};
use polars::prelude::*;
use rusqlite::Connection;
use std::fs::File;
use std::path::Path;
use tracing::info;

use crate::config::CubeConfig;

/// Groups the sale table by one dimension and computes sum-of-amount and
/// row-count measures. The cube is recomputed wholesale on every run.
pub struct CubeAggregator<'a> {
    config: &'a CubeConfig,
}

impl<'a> CubeAggregator<'a> {
    pub fn new(config: &'a CubeConfig) -> Self {
        Self { config }
    }

    /// Read the whole sale table from the warehouse into a DataFrame.
    pub fn read_sales(&self, conn: &Connection) -> Result<DataFrame> {
        let query = format!(
            "SELECT {}, {} FROM sale",
            self.config.dimension, self.config.measure
        );
        let mut stmt = conn.prepare(&query).with_context(|| {
            format!(
                "Sale table missing or lacks columns '{}'/'{}'",
                self.config.dimension, self.config.measure
            )
        })?;

        let mut dimensions: Vec<Option<String>> = Vec::new();
        let mut measures: Vec<Option<f64>> = Vec::new();
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, Option<String>>(0)?,
                row.get::<_, Option<f64>>(1)?,
            ))
        })?;
        for row in rows {
            let (dimension, measure) = row?;
            dimensions.push(dimension);
            measures.push(measure);
        }

        info!("Loaded {} sale rows from warehouse", dimensions.len());
        let df = DataFrame::new(vec![
            Series::new(self.config.dimension.as_str().into(), dimensions).into(),
            Series::new(self.config.measure.as_str().into(), measures).into(),
        ])?;
        Ok(df)
    }

    /// Group by the dimension. Every input row lands in exactly one group;
    /// null dimension values get their own labeled group unless configured
    /// to be dropped. An empty input yields an empty cube, not an error.
    pub fn aggregate(&self, sales: &DataFrame) -> Result<DataFrame> {
        if sales.height() == 0 {
            return self.empty_cube();
        }

        let dimension = self.config.dimension.as_str();
        let mut lf = sales.clone().lazy();
        if self.config.drop_null_dimension {
            lf = lf.filter(col(dimension).is_not_null());
        } else {
            lf = lf.with_column(
                col(dimension)
                    .fill_null(lit(self.config.null_label.as_str()))
                    .alias(dimension),
            );
        }

        let cube = lf
            .group_by([col(dimension)])
            .agg([
                col(self.config.measure.as_str())
                    .sum()
                    .alias("total_amount"),
                len().alias("sale_count"),
            ])
            .collect()
            .context("Cube aggregation failed")?;

        info!(
            "Cube built: {} groups over dimension '{}'",
            cube.height(),
            dimension
        );
        Ok(cube)
    }

    /// Write the cube CSV, creating the output directory.
    pub fn write_cube(&self, cube: &mut DataFrame, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create cube output directory {}", parent.display())
            })?;
        }
        let mut file =
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
        CsvWriter::new(&mut file)
            .include_header(true)
            .finish(cube)
            .with_context(|| format!("Failed to write cube CSV {}", path.display()))?;
        info!("Cube written to {}", path.display());
        Ok(())
    }

    fn empty_cube(&self) -> Result<DataFrame> {
        let df = DataFrame::new(vec![
            Series::new(
                self.config.dimension.as_str().into(),
                Vec::<String>::new(),
            )
            .into(),
            Series::new("total_amount".into(), Vec::<f64>::new()).into(),
            Series::new("sale_count".into(), Vec::<u32>::new()).into(),
        ])?;
        Ok(df)
    }
}
