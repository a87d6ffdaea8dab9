/// Per-table counts from one cleaning pass. Every dropped or substituted
/// value is counted here so no data-quality action is silent.
#[derive(Debug, Clone, Default)]
pub struct CleaningReport {
    pub rows_in: usize,
    pub rows_out: usize,
    pub dropped_missing: usize,
    pub dropped_duplicate: usize,
    pub dropped_outlier: usize,
    pub filled_numeric: usize,
    pub filled_text: usize,
}

impl CleaningReport {
    pub fn total_dropped(&self) -> usize {
        self.dropped_missing + self.dropped_duplicate + self.dropped_outlier
    }
}

/// Row counts from one warehouse load.
#[derive(Debug, Clone, Default)]
pub struct LoadSummary {
    pub customers: usize,
    pub products: usize,
    pub sales: usize,
    /// Sale rows dropped for referential-integrity violations.
    pub orphans_dropped: usize,
}

/// One aggregated cube group.
#[derive(Debug, Clone, PartialEq)]
pub struct CubeRow {
    pub payment_type: String,
    pub total_amount: f64,
    pub sale_count: u32,
}
