use anyhow::{Context, Result, anyhow, bail};
use plotters::prelude::*;
use polars::prelude::*;
use std::path::Path;
use tracing::{info, warn};

use crate::config::ReportConfig;
use crate::models::CubeRow;

const BAR_COLOR: RGBColor = RGBColor(135, 206, 235);

/// Ranks cube groups and renders the bar chart. Reads the cube CSV back from
/// disk so the stage can run on its own.
pub struct Reporter<'a> {
    config: &'a ReportConfig,
}

impl<'a> Reporter<'a> {
    pub fn new(config: &'a ReportConfig) -> Self {
        Self { config }
    }

    /// Load cube rows from the cube CSV. A header-only file is a valid
    /// empty cube.
    pub fn read_cube(&self, path: &Path) -> Result<Vec<CubeRow>> {
        if !path.exists() {
            bail!("Cube file not found: {}", path.display());
        }
        let df = LazyCsvReader::new(PlPath::Local(path.to_path_buf().into()))
            .with_infer_schema_length(Some(1_000))
            .finish()
            .and_then(|lf| lf.collect())
            .with_context(|| format!("Failed to read cube CSV {}", path.display()))?;
        if df.height() == 0 {
            return Ok(Vec::new());
        }

        let types = df
            .column("payment_type")
            .context("Cube CSV lacks 'payment_type' column")?
            .str()?;
        let totals_col = df
            .column("total_amount")
            .context("Cube CSV lacks 'total_amount' column")?
            .cast(&DataType::Float64)?;
        let totals = totals_col.f64()?;
        let counts_col = df
            .column("sale_count")
            .context("Cube CSV lacks 'sale_count' column")?
            .cast(&DataType::UInt32)?;
        let counts = counts_col.u32()?;

        let mut rows = Vec::with_capacity(df.height());
        for i in 0..df.height() {
            rows.push(CubeRow {
                payment_type: types.get(i).unwrap_or("unknown").to_string(),
                total_amount: totals.get(i).unwrap_or(0.0),
                sale_count: counts.get(i).unwrap_or(0),
            });
        }
        Ok(rows)
    }

    /// Sort descending by the configured measure, breaking ties by dimension
    /// value ascending so repeated runs render identically.
    pub fn rank(&self, rows: &[CubeRow]) -> Result<Vec<CubeRow>> {
        self.validate_measure()?;
        let mut ranked = rows.to_vec();
        ranked.sort_by(|a, b| {
            let (a_val, b_val) = (self.measure_of(a), self.measure_of(b));
            b_val
                .partial_cmp(&a_val)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.payment_type.cmp(&b.payment_type))
        });
        Ok(ranked)
    }

    /// Highest and lowest ranked groups, if any.
    pub fn extremes<'r>(&self, ranked: &'r [CubeRow]) -> Option<(&'r CubeRow, &'r CubeRow)> {
        match (ranked.first(), ranked.last()) {
            (Some(top), Some(bottom)) => Some((top, bottom)),
            _ => None,
        }
    }

    /// Render the ranked groups as a bar chart PNG, creating the output
    /// directory. An empty cube produces a "no data" placeholder image.
    pub fn render(&self, ranked: &[CubeRow], path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create chart directory {}", parent.display())
            })?;
        }

        let (width, height) = (self.config.width, self.config.height);
        let root = BitMapBackend::new(path, (width, height)).into_drawing_area();
        root.fill(&WHITE)
            .map_err(|e| anyhow!("Failed to clear chart canvas: {}", e))?;

        if ranked.is_empty() {
            warn!("Cube is empty; rendering 'no data' placeholder");
            let position = (width as i32 / 2 - 60, height as i32 / 2);
            root.draw(&Text::new(
                "no data available",
                position,
                ("sans-serif", 28),
            ))
            .map_err(|e| anyhow!("Failed to draw placeholder text: {}", e))?;
            root.present()
                .map_err(|e| anyhow!("Failed to write chart {}: {}", path.display(), e))?;
            info!("No-data report written to {}", path.display());
            return Ok(());
        }

        let y_max = ranked
            .iter()
            .map(|row| self.measure_of(row))
            .fold(f64::MIN, f64::max)
            .max(1.0)
            * 1.1;
        let labels: Vec<String> = ranked.iter().map(|r| r.payment_type.clone()).collect();

        let mut chart = ChartBuilder::on(&root)
            .caption(&self.config.title, ("sans-serif", 28))
            .margin(15)
            .x_label_area_size(45)
            .y_label_area_size(70)
            .build_cartesian_2d((0..ranked.len()).into_segmented(), 0f64..y_max)
            .map_err(|e| anyhow!("Failed to build chart axes: {}", e))?;

        chart
            .configure_mesh()
            .disable_x_mesh()
            .x_desc("Payment Type")
            .y_desc(self.measure_label())
            .x_labels(ranked.len())
            .x_label_formatter(&|value| match value {
                SegmentValue::CenterOf(i) | SegmentValue::Exact(i) if *i < labels.len() => {
                    labels[*i].clone()
                }
                _ => String::new(),
            })
            .draw()
            .map_err(|e| anyhow!("Failed to draw chart mesh: {}", e))?;

        chart
            .draw_series(ranked.iter().enumerate().map(|(i, row)| {
                Rectangle::new(
                    [
                        (SegmentValue::Exact(i), 0.0),
                        (SegmentValue::Exact(i + 1), self.measure_of(row)),
                    ],
                    BAR_COLOR.filled(),
                )
            }))
            .map_err(|e| anyhow!("Failed to draw bars: {}", e))?;

        root.present()
            .map_err(|e| anyhow!("Failed to write chart {}: {}", path.display(), e))?;
        info!("Chart written to {}", path.display());
        Ok(())
    }

    fn validate_measure(&self) -> Result<()> {
        match self.config.measure.as_str() {
            "total_amount" | "sale_count" => Ok(()),
            other => bail!(
                "Unknown report measure '{}' (expected 'total_amount' or 'sale_count')",
                other
            ),
        }
    }

    fn measure_of(&self, row: &CubeRow) -> f64 {
        if self.config.measure == "sale_count" {
            row.sale_count as f64
        } else {
            row.total_amount
        }
    }

    fn measure_label(&self) -> &str {
        if self.config.measure == "sale_count" {
            "Sale Count"
        } else {
            "Total Sales (USD)"
        }
    }
}
