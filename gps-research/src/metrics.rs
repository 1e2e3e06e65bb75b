//! GPU price table and the per-entity metric arithmetic.

use serde::Deserialize;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

use gps_common::config::MetricsConfig;
use gps_common::Error;

use crate::record::{GpuModel, ResearchRecord};

// ============================================================================
// Price Table
// ============================================================================

/// Built-in unit prices in USD, used when no price file is present.
const DEFAULT_PRICES: &[(GpuModel, f64)] = &[
    (GpuModel::H100Sxm, 35_000.0),
    (GpuModel::H100Pcie, 30_000.0),
    (GpuModel::A100_80gb, 15_000.0),
    (GpuModel::A100_40gb, 10_000.0),
    (GpuModel::H200, 40_000.0),
    (GpuModel::B200, 45_000.0),
    (GpuModel::B100, 35_000.0),
    (GpuModel::A40, 4_500.0),
    (GpuModel::A6000, 5_000.0),
    (GpuModel::L40s, 8_000.0),
    (GpuModel::V100, 3_500.0),
    (GpuModel::P100, 1_500.0),
];

#[derive(Debug, Deserialize)]
struct PriceRow {
    #[serde(rename = "GPU")]
    gpu: String,
    #[serde(rename = "Price_USD")]
    price_usd: f64,
}

/// Unit price per GPU model. Models without a price are worth 0.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceTable {
    prices: HashMap<GpuModel, f64>,
}

impl Default for PriceTable {
    fn default() -> Self {
        Self {
            prices: DEFAULT_PRICES.iter().copied().collect(),
        }
    }
}

/// `"NVIDIA RTX A6000"` -> `"rtx_a6000"`.
fn normalize_gpu_name(name: &str) -> String {
    let lowered = name.trim().to_lowercase();
    let stripped = lowered.strip_prefix("nvidia ").unwrap_or(&lowered);
    stripped.split_whitespace().collect::<Vec<_>>().join("_")
}

impl PriceTable {
    pub fn empty() -> Self {
        Self {
            prices: HashMap::new(),
        }
    }

    /// Parse a `GPU,Price_USD` table. Rows naming an unknown model are skipped.
    pub fn from_reader<R: Read>(reader: R) -> gps_common::Result<Self> {
        let mut table = Self::empty();
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        for (line, row) in rdr.deserialize::<PriceRow>().enumerate() {
            let row = row.map_err(|e| Error::Parse(format!("price row {}: {e}", line + 1)))?;
            let key = normalize_gpu_name(&row.gpu);
            match GpuModel::from_key(&key) {
                Some(model) => {
                    table.insert(model, row.price_usd);
                }
                None => debug!(gpu = %row.gpu, "Skipping price for unknown GPU model"),
            }
        }
        Ok(table)
    }

    /// Load the price file, or the built-in defaults when it does not exist.
    pub fn load(path: &Path) -> gps_common::Result<Self> {
        match std::fs::File::open(path) {
            Ok(file) => Self::from_reader(file)
                .map_err(|e| e.with_context(format!("reading {}", path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "GPU price file not found, using default prices");
                Ok(Self::default())
            }
            Err(e) => Err(Error::from(e).with_context(format!("opening {}", path.display()))),
        }
    }

    pub fn insert(&mut self, model: GpuModel, price: f64) -> &mut Self {
        self.prices.insert(model, price.max(0.0));
        self
    }

    pub fn price(&self, model: GpuModel) -> f64 {
        self.prices.get(&model).copied().unwrap_or(0.0)
    }

    /// Price of the normalizing GPU; 0 when the key is unknown or unpriced.
    pub fn reference(&self, metrics: &MetricsConfig) -> f64 {
        GpuModel::from_key(&metrics.reference_gpu)
            .map(|m| self.price(m))
            .unwrap_or(0.0)
    }
}

// ============================================================================
// Metric Calculation
// ============================================================================

/// Derived figures for one record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricRow {
    pub weighted_students: f64,
    /// Dollar value of owned GPUs plus credits at parity
    pub gpu_value: f64,
    /// `gpu_value` in units of the reference GPU
    pub gpu_equivalent: f64,
    pub ratio: f64,
}

pub fn weighted_students(record: &ResearchRecord, metrics: &MetricsConfig) -> f64 {
    record.students.undergrad as f64 * metrics.undergrad_weight
        + record.students.masters as f64 * metrics.masters_weight
        + record.students.phd as f64 * metrics.phd_weight
}

pub fn gpu_value(record: &ResearchRecord, prices: &PriceTable, metrics: &MetricsConfig) -> f64 {
    let hardware: f64 = GpuModel::ALL
        .into_iter()
        .map(|m| record.gpus.count(m) as f64 * prices.price(m))
        .sum();
    let credits = record.compute_credits.total_annual_value_usd.max(0.0) * metrics.credit_parity;
    hardware + credits
}

pub fn compute(record: &ResearchRecord, prices: &PriceTable, metrics: &MetricsConfig) -> MetricRow {
    let weighted_students = weighted_students(record, metrics);
    let gpu_value = gpu_value(record, prices, metrics);

    let reference = prices.reference(metrics);
    let gpu_equivalent = if reference > 0.0 {
        gpu_value / reference
    } else {
        0.0
    };
    let ratio = if weighted_students > 0.0 {
        gpu_equivalent / weighted_students
    } else {
        0.0
    };

    MetricRow {
        weighted_students,
        gpu_value,
        gpu_equivalent,
        ratio,
    }
}
