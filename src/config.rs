use std::time::Duration;

use clap::Parser;

use crate::{
    process::{IngestOptions, RetryPolicy},
    select::{Measure, ALL_SUPPLIERS},
};

/// Stream a warehouse/retail sales CSV and print monthly totals.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Config {
    /// CSV location: an http(s) URL or a file path.
    #[arg(env = "SALESDASH_SOURCE")]
    pub source: String,

    /// Supplier to chart, or `__ALL__` for every supplier.
    #[arg(short, long, env = "SALESDASH_SUPPLIER", default_value = ALL_SUPPLIERS)]
    pub supplier: String,

    /// List suppliers whose name contains this text.
    #[arg(long)]
    pub search: Option<String>,

    /// Rows between progress reports.
    #[arg(long, env = "SALESDASH_PROGRESS_EVERY", default_value_t = crate::process::PROGRESS_EVERY_ROWS)]
    pub progress_every: u64,

    /// Give up (cancel the run) after this many seconds.
    #[arg(long, env = "SALESDASH_TIMEOUT_SECS")]
    pub timeout_secs: Option<u64>,

    /// Fresh restarts after a source failure.
    #[arg(long, env = "SALESDASH_RETRIES", default_value_t = 0)]
    pub retries: u32,

    /// Measures to show, comma separated.
    #[arg(
        long,
        env = "SALESDASH_SERIES",
        value_enum,
        value_delimiter = ',',
        default_values_t = Measure::ALL
    )]
    pub series: Vec<Measure>,

    /// Print the series as JSON.
    #[arg(long)]
    pub json: bool,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    pub fn ingest_options(&self) -> IngestOptions {
        IngestOptions {
            progress_every: self.progress_every,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retries,
            timeout: self.timeout(),
        }
    }

    /// Chosen measures in display order.
    pub fn measures(&self) -> Vec<Measure> {
        Measure::normalize(&self.series)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = Config::try_parse_from(["salesdash", "sales.csv"]).unwrap();
        assert_eq!(cfg.source, "sales.csv");
        assert_eq!(cfg.supplier, ALL_SUPPLIERS);
        assert_eq!(cfg.ingest_options(), IngestOptions::default());
        assert_eq!(cfg.retries, 0);
        assert!(cfg.timeout().is_none());
        assert_eq!(cfg.retry_policy(), RetryPolicy::default());
        assert_eq!(cfg.measures(), Measure::ALL.to_vec());
        assert!(!cfg.json);
    }

    #[test]
    fn flags() {
        let cfg = Config::try_parse_from([
            "salesdash",
            "https://example.com/sales.csv",
            "--supplier",
            "REPUBLIC NATIONAL DISTRIBUTING CO",
            "--progress-every",
            "100",
            "--timeout-secs",
            "30",
            "--retries",
            "2",
            "--series",
            "warehouse-sales,retail-sales",
            "--json",
        ])
        .unwrap();
        assert_eq!(cfg.supplier, "REPUBLIC NATIONAL DISTRIBUTING CO");
        assert_eq!(cfg.ingest_options().progress_every, 100);
        assert_eq!(cfg.timeout(), Some(Duration::from_secs(30)));
        assert_eq!(
            cfg.retry_policy(),
            RetryPolicy {
                retries: 2,
                timeout: Some(Duration::from_secs(30)),
            }
        );
        assert_eq!(
            cfg.measures(),
            vec![Measure::RetailSales, Measure::WarehouseSales]
        );
        assert!(cfg.json);
    }

    #[test]
    fn unknown_measure_is_rejected() {
        assert!(Config::try_parse_from(["salesdash", "a.csv", "--series", "profit"]).is_err());
    }
}
