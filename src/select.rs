//! Turning a finished snapshot into a chartable monthly series.

use clap::ValueEnum;
use serde::{ser::SerializeMap, Serialize, Serializer};

use crate::process::{Bucket, MonthKey, ResultSnapshot};

/// Selector value meaning "every supplier".
pub const ALL_SUPPLIERS: &str = "__ALL__";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    Supplier(String),
}

impl Selection {
    /// `__ALL__` or an empty value selects every supplier; anything else names one.
    pub fn from_param(value: &str) -> Self {
        match value {
            "" | ALL_SUPPLIERS => Selection::All,
            name => Selection::Supplier(name.to_string()),
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Selection::All => "All suppliers",
            Selection::Supplier(name) => name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub month: MonthKey,
    #[serde(flatten)]
    pub bucket: Bucket,
}

/// One point per snapshot month, in snapshot order. Months the selection has no data for are
/// zero, as is every month of an unknown supplier.
pub fn project(snapshot: &ResultSnapshot, selection: &Selection) -> Vec<SeriesPoint> {
    let lookup = match selection {
        Selection::All => Some(snapshot.totals()),
        Selection::Supplier(name) => snapshot.by_supplier().get(name),
    };
    snapshot
        .month_keys()
        .iter()
        .map(|&month| SeriesPoint {
            month,
            bucket: lookup
                .and_then(|m| m.get(&month))
                .copied()
                .unwrap_or(Bucket::ZERO),
        })
        .collect()
}

/// Sum of each measure over every month of a projected series.
pub fn selection_totals(series: &[SeriesPoint]) -> Bucket {
    series.iter().fold(Bucket::ZERO, |mut acc, p| {
        acc.add(p.bucket);
        acc
    })
}

/// One of the three aggregated measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum Measure {
    RetailSales,
    RetailTransfers,
    WarehouseSales,
}

impl Measure {
    pub const ALL: [Measure; 3] = [
        Measure::RetailSales,
        Measure::RetailTransfers,
        Measure::WarehouseSales,
    ];

    /// Field name used in JSON output.
    pub fn key(self) -> &'static str {
        match self {
            Measure::RetailSales => "retail_sales",
            Measure::RetailTransfers => "retail_transfers",
            Measure::WarehouseSales => "warehouse_sales",
        }
    }

    /// Column heading used in table output.
    pub fn label(self) -> &'static str {
        match self {
            Measure::RetailSales => "RETAIL SALES",
            Measure::RetailTransfers => "RETAIL TRANSFERS",
            Measure::WarehouseSales => "WAREHOUSE SALES",
        }
    }

    pub fn of(self, bucket: &Bucket) -> f64 {
        match self {
            Measure::RetailSales => bucket.retail_sales,
            Measure::RetailTransfers => bucket.retail_transfers,
            Measure::WarehouseSales => bucket.warehouse_sales,
        }
    }

    /// The requested measures in canonical order, each at most once.
    pub fn normalize(requested: &[Measure]) -> Vec<Measure> {
        Measure::ALL
            .into_iter()
            .filter(|m| requested.contains(m))
            .collect()
    }
}

/// A bucket restricted to some measures. Serializes as a flat map in measure order.
#[derive(Debug, Clone, Copy)]
pub struct Shown<'a> {
    pub bucket: Bucket,
    pub measures: &'a [Measure],
}

impl Serialize for Shown<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.measures.len()))?;
        for m in self.measures {
            map.serialize_entry(m.key(), &m.of(&self.bucket))?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ShownPoint<'a> {
    pub month: MonthKey,
    #[serde(flatten)]
    pub values: Shown<'a>,
}

/// `series` with only `measures` kept on every point.
pub fn show<'a>(series: &[SeriesPoint], measures: &'a [Measure]) -> Vec<ShownPoint<'a>> {
    series
        .iter()
        .map(|p| ShownPoint {
            month: p.month,
            values: Shown {
                bucket: p.bucket,
                measures,
            },
        })
        .collect()
}

/// Suppliers whose name contains `query`, ignoring case. A blank query keeps them all.
pub fn filter_suppliers<'a>(suppliers: &'a [String], query: &str) -> Vec<&'a str> {
    let q = query.trim().to_lowercase();
    suppliers
        .iter()
        .filter(|s| q.is_empty() || s.to_lowercase().contains(&q))
        .map(String::as_str)
        .collect()
}
