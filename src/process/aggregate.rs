//! Monthly aggregation of sales rows, overall and per supplier.
//!
//! One [`Aggregator`] belongs to one ingestion run. The first row it sees is the header; every
//! later row is folded into the month totals and the supplier/month totals. [`Aggregator::finalize`]
//! consumes it and hands back an immutable [`ResultSnapshot`].

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    fmt,
};

use feruca::Collator;
use serde::{Serialize, Serializer};
use tracing::debug;

use crate::error::{IngestError, IngestResult};

/// Supplier name used when the column is blank.
pub const UNKNOWN_SUPPLIER: &str = "Unknown";

/// A calendar month. Orders numerically by (year, month); displays as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonthKey {
    pub year: i64,
    pub month: i64,
}

impl MonthKey {
    pub fn new(year: i64, month: i64) -> Self {
        Self { year, month }
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

impl Serialize for MonthKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Running sums for one scope (a month, or a supplier within a month).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Bucket {
    pub retail_sales: f64,
    pub retail_transfers: f64,
    pub warehouse_sales: f64,
}

impl Bucket {
    pub const ZERO: Self = Bucket {
        retail_sales: 0.0,
        retail_transfers: 0.0,
        warehouse_sales: 0.0,
    };

    pub fn add(&mut self, other: Bucket) {
        self.retail_sales += other.retail_sales;
        self.retail_transfers += other.retail_transfers;
        self.warehouse_sales += other.warehouse_sales;
    }
}

/// Positions of the required columns, resolved once from the header row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnIndex {
    pub year: usize,
    pub month: usize,
    pub supplier: usize,
    pub retail_sales: usize,
    pub retail_transfers: usize,
    pub warehouse_sales: usize,
}

impl ColumnIndex {
    /// Header name and logical name of every required column.
    pub const REQUIRED: [(&'static str, &'static str); 6] = [
        ("YEAR", "year"),
        ("MONTH", "month"),
        ("SUPPLIER", "supplier"),
        ("RETAIL SALES", "retail_sales"),
        ("RETAIL TRANSFERS", "retail_transfers"),
        ("WAREHOUSE SALES", "warehouse_sales"),
    ];

    /// Resolve the required columns from a header row. Names are matched exactly after trimming;
    /// extra columns are ignored and order does not matter.
    pub fn from_header(header: &[String]) -> IngestResult<Self> {
        let by_name: HashMap<&str, usize> = header
            .iter()
            .enumerate()
            .map(|(i, name)| (name.trim(), i))
            .collect();

        let found: Vec<Option<usize>> = Self::REQUIRED
            .iter()
            .map(|(name, _)| by_name.get(name).copied())
            .collect();

        let missing: Vec<&'static str> = Self::REQUIRED
            .iter()
            .zip(&found)
            .filter(|(_, idx)| idx.is_none())
            .map(|((_, logical), _)| *logical)
            .collect();
        if !missing.is_empty() {
            return Err(IngestError::Schema { missing });
        }

        let at = |i: usize| found[i].unwrap_or_default();
        Ok(ColumnIndex {
            year: at(0),
            month: at(1),
            supplier: at(2),
            retail_sales: at(3),
            retail_transfers: at(4),
            warehouse_sales: at(5),
        })
    }
}

/// What [`Aggregator::ingest_row`] did with a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutcome {
    Header,
    Aggregated,
    Skipped,
}

/// Mutable aggregation state for a single run.
#[derive(Debug, Default)]
pub struct Aggregator {
    columns: Option<ColumnIndex>,
    totals: HashMap<MonthKey, Bucket>,
    by_supplier: HashMap<String, HashMap<MonthKey, Bucket>>,
    months: BTreeSet<MonthKey>,
    suppliers: HashSet<String>,
    rows_read: u64,
    rows_skipped: u64,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows folded into the aggregates so far.
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    pub fn columns(&self) -> Option<&ColumnIndex> {
        self.columns.as_ref()
    }

    /// Fold one tokenized row in. The first call establishes the header; a header missing
    /// required columns is the only error.
    pub fn ingest_row(&mut self, fields: &[String]) -> IngestResult<RowOutcome> {
        let Some(cols) = self.columns else {
            let cols = ColumnIndex::from_header(fields)?;
            debug!(?cols, "resolved header");
            self.columns = Some(cols);
            return Ok(RowOutcome::Header);
        };

        let field = |i: usize| fields.get(i).map(String::as_str).unwrap_or("");

        let (Some(year), Some(month)) = (parse_int(field(cols.year)), parse_int(field(cols.month)))
        else {
            self.rows_skipped += 1;
            return Ok(RowOutcome::Skipped);
        };

        let supplier = match field(cols.supplier).trim() {
            "" => UNKNOWN_SUPPLIER,
            s => s,
        };

        let amounts = Bucket {
            retail_sales: parse_amount(field(cols.retail_sales)),
            retail_transfers: parse_amount(field(cols.retail_transfers)),
            warehouse_sales: parse_amount(field(cols.warehouse_sales)),
        };

        let key = MonthKey::new(year, month);
        self.months.insert(key);
        if !self.suppliers.contains(supplier) {
            self.suppliers.insert(supplier.to_string());
        }

        self.totals.entry(key).or_default().add(amounts);
        match self.by_supplier.get_mut(supplier) {
            Some(months) => months.entry(key).or_default().add(amounts),
            None => {
                self.by_supplier
                    .insert(supplier.to_string(), HashMap::from([(key, amounts)]));
            }
        }

        self.rows_read += 1;
        Ok(RowOutcome::Aggregated)
    }

    /// Freeze the aggregates: months sorted chronologically, suppliers in locale order.
    pub fn finalize(self) -> ResultSnapshot {
        let mut suppliers: Vec<String> = self.suppliers.into_iter().collect();
        sort_suppliers(&mut suppliers);

        ResultSnapshot {
            month_keys: self.months.into_iter().collect(),
            suppliers,
            totals: self.totals,
            by_supplier: self.by_supplier,
            rows_read: self.rows_read,
            rows_skipped: self.rows_skipped,
        }
    }
}

/// Unicode collation with the root locale: accents and case only break ties.
fn sort_suppliers(names: &mut [String]) {
    let mut collator = Collator::default();
    names.sort_by(|a, b| collator.collate(a, b));
}

/// The finished result of one ingestion run.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSnapshot {
    month_keys: Vec<MonthKey>,
    suppliers: Vec<String>,
    totals: HashMap<MonthKey, Bucket>,
    by_supplier: HashMap<String, HashMap<MonthKey, Bucket>>,
    rows_read: u64,
    rows_skipped: u64,
}

impl ResultSnapshot {
    pub fn month_keys(&self) -> &[MonthKey] {
        &self.month_keys
    }

    pub fn suppliers(&self) -> &[String] {
        &self.suppliers
    }

    pub fn totals(&self) -> &HashMap<MonthKey, Bucket> {
        &self.totals
    }

    pub fn by_supplier(&self) -> &HashMap<String, HashMap<MonthKey, Bucket>> {
        &self.by_supplier
    }

    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Data rows dropped because year or month did not parse.
    pub fn rows_skipped(&self) -> u64 {
        self.rows_skipped
    }

    /// One-line description for status output.
    pub fn summary(&self) -> String {
        format!(
            "{} rows · {} suppliers · {} months",
            self.rows_read,
            self.suppliers.len(),
            self.month_keys.len()
        )
    }
}

/// Leading base-10 integer, ignoring leading whitespace and anything after the digits.
/// `None` when there are no digits. Values beyond the `i64` range saturate.
pub fn parse_int(raw: &str) -> Option<i64> {
    let s = raw.trim_start();
    let (negative, sign_len) = match s.as_bytes().first() {
        Some(b'-') => (true, 1),
        Some(b'+') => (false, 1),
        _ => (false, 0),
    };
    let end = s[sign_len..]
        .bytes()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(s.len() - sign_len);
    if end == 0 {
        return None;
    }
    // only overflow can fail here
    Some(
        s[..sign_len + end]
            .parse()
            .unwrap_or(if negative { i64::MIN } else { i64::MAX }),
    )
}

/// Leading decimal number, or `0.0` when there is none or it is not finite.
pub fn parse_amount(raw: &str) -> f64 {
    let s = raw.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end += 1;
    }
    let int_start = end;
    while bytes.get(end).is_some_and(u8::is_ascii_digit) {
        end += 1;
    }
    let mut digits = end - int_start;
    if bytes.get(end) == Some(&b'.') {
        let frac_start = end + 1;
        let mut frac_end = frac_start;
        while bytes.get(frac_end).is_some_and(u8::is_ascii_digit) {
            frac_end += 1;
        }
        digits += frac_end - frac_start;
        if digits > 0 {
            end = frac_end;
        }
    }
    if digits == 0 {
        return 0.0;
    }
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while bytes.get(exp_end).is_some_and(u8::is_ascii_digit) {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }
    s[..end]
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::tokenize::tokenize;

    const HEADER: &str = "YEAR,MONTH,SUPPLIER,RETAIL SALES,RETAIL TRANSFERS,WAREHOUSE SALES";

    fn feed(lines: &[&str]) -> IngestResult<ResultSnapshot> {
        let mut agg = Aggregator::new();
        for line in lines {
            agg.ingest_row(&tokenize(line))?;
        }
        Ok(agg.finalize())
    }

    #[test]
    fn worked_example() -> IngestResult<()> {
        let snap = feed(&[
            HEADER,
            "2020,1,Acme,10,2,5",
            "2020,1,Acme,3,1,0",
            "2020,2,Beta,7,0,2",
        ])?;
        assert_eq!(
            snap.month_keys(),
            &[MonthKey::new(2020, 1), MonthKey::new(2020, 2)]
        );
        assert_eq!(
            snap.month_keys().iter().map(|k| k.to_string()).collect::<Vec<_>>(),
            vec!["2020-01", "2020-02"]
        );
        assert_eq!(snap.suppliers(), &["Acme", "Beta"]);
        assert_eq!(
            snap.totals()[&MonthKey::new(2020, 1)],
            Bucket {
                retail_sales: 13.0,
                retail_transfers: 3.0,
                warehouse_sales: 5.0
            }
        );
        assert_eq!(snap.rows_read(), 3);
        assert_eq!(snap.summary(), "3 rows · 2 suppliers · 2 months");
        Ok(())
    }

    #[test]
    fn months_sort_numerically() -> IngestResult<()> {
        let snap = feed(&[
            HEADER,
            "2020,11,A,1,0,0",
            "2021,1,A,1,0,0",
            "2020,2,A,1,0,0",
            "2020,10,A,1,0,0",
        ])?;
        let keys: Vec<String> = snap.month_keys().iter().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["2020-02", "2020-10", "2020-11", "2021-01"]);
        Ok(())
    }

    #[test]
    fn missing_supplier_column_is_a_schema_error() {
        let mut agg = Aggregator::new();
        let err = agg
            .ingest_row(&tokenize("YEAR,MONTH,RETAIL SALES,RETAIL TRANSFERS,WAREHOUSE SALES"))
            .unwrap_err();
        match err {
            IngestError::Schema { missing } => assert_eq!(missing, vec!["supplier"]),
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(agg.rows_read(), 0);
        assert!(agg.columns().is_none());
    }

    #[test]
    fn header_accepts_any_order_extra_columns_and_padding() -> IngestResult<()> {
        let snap = feed(&[
            " WAREHOUSE SALES ,ITEM CODE,SUPPLIER,MONTH,YEAR,RETAIL TRANSFERS,RETAIL SALES",
            "4,100,Acme,3,2019,2,1",
        ])?;
        let b = snap.totals()[&MonthKey::new(2019, 3)];
        assert_eq!((b.retail_sales, b.retail_transfers, b.warehouse_sales), (1.0, 2.0, 4.0));
        Ok(())
    }

    #[test]
    fn blank_supplier_falls_back_to_unknown() -> IngestResult<()> {
        let snap = feed(&[HEADER, "2020,1,   ,1,0,0", "2020,1,,2,0,0", "2020,1"])?;
        assert_eq!(snap.suppliers(), &[UNKNOWN_SUPPLIER]);
        let unknown = &snap.by_supplier()[UNKNOWN_SUPPLIER];
        assert_eq!(unknown[&MonthKey::new(2020, 1)].retail_sales, 3.0);
        assert_eq!(snap.rows_read(), 3);
        Ok(())
    }

    #[test]
    fn bad_dates_skip_and_bad_amounts_count_as_zero() -> IngestResult<()> {
        let snap = feed(&[
            HEADER,
            "abc,1,Acme,10,0,0",
            "2020,,Acme,10,0,0",
            HEADER,
            "2020,1,Acme,n/a,,5kg",
        ])?;
        assert_eq!(snap.rows_read(), 1);
        assert_eq!(snap.rows_skipped(), 3);
        assert_eq!(
            snap.totals()[&MonthKey::new(2020, 1)],
            Bucket {
                retail_sales: 0.0,
                retail_transfers: 0.0,
                warehouse_sales: 5.0
            }
        );
        Ok(())
    }

    #[test]
    fn month_totals_equal_the_sum_over_suppliers() -> IngestResult<()> {
        let mut lines = vec![HEADER.to_string()];
        for i in 0..200 {
            lines.push(format!(
                "{},{},S{},{}.25,{},{}",
                2018 + i % 3,
                1 + i % 12,
                i % 7,
                i,
                i % 5,
                (i * 3) % 11
            ));
        }
        let refs: Vec<&str> = lines.iter().map(String::as_str).collect();
        let snap = feed(&refs)?;

        for key in snap.month_keys() {
            let mut sum = Bucket::ZERO;
            for months in snap.by_supplier().values() {
                if let Some(b) = months.get(key) {
                    sum.add(*b);
                }
            }
            let total = snap.totals()[key];
            assert!((total.retail_sales - sum.retail_sales).abs() < 1e-9);
            assert!((total.retail_transfers - sum.retail_transfers).abs() < 1e-9);
            assert!((total.warehouse_sales - sum.warehouse_sales).abs() < 1e-9);
        }
        Ok(())
    }

    #[test]
    fn suppliers_sort_case_insensitively() -> IngestResult<()> {
        let snap = feed(&[
            HEADER,
            "2020,1,beta,1,0,0",
            "2020,1,Alpha,1,0,0",
            "2020,1,alpha,1,0,0",
            "2020,1,Zed,1,0,0",
        ])?;
        assert_eq!(snap.suppliers(), &["alpha", "Alpha", "beta", "Zed"]);
        Ok(())
    }

    #[test]
    fn accented_suppliers_sort_with_their_base_letters() -> IngestResult<()> {
        let snap = feed(&[
            HEADER,
            "2020,1,Zed,1,0,0",
            "2020,1,Émile,1,0,0",
            "2020,1,Ångström,1,0,0",
            "2020,1,Beta,1,0,0",
        ])?;
        assert_eq!(snap.suppliers(), &["Ångström", "Beta", "Émile", "Zed"]);
        Ok(())
    }

    #[test]
    fn integer_parsing_takes_the_leading_digits() {
        assert_eq!(parse_int("2020"), Some(2020));
        assert_eq!(parse_int("  7.9"), Some(7));
        assert_eq!(parse_int("-3x"), Some(-3));
        assert_eq!(parse_int("+12"), Some(12));
        assert_eq!(parse_int(""), None);
        assert_eq!(parse_int("x1"), None);
        assert_eq!(parse_int("-"), None);
        assert_eq!(parse_int("-9223372036854775808"), Some(i64::MIN));
    }

    #[test]
    fn oversized_years_saturate_and_still_aggregate() -> IngestResult<()> {
        assert_eq!(parse_int("99999999999999999999"), Some(i64::MAX));
        assert_eq!(parse_int("-99999999999999999999x"), Some(i64::MIN));

        let snap = feed(&[HEADER, "99999999999999999999,1,Acme,4,0,0", "2020,1,Acme,1,0,0"])?;
        assert_eq!(snap.rows_read(), 2);
        assert_eq!(snap.rows_skipped(), 0);
        assert_eq!(
            snap.month_keys(),
            &[MonthKey::new(2020, 1), MonthKey::new(i64::MAX, 1)]
        );
        assert_eq!(snap.totals()[&MonthKey::new(i64::MAX, 1)].retail_sales, 4.0);
        Ok(())
    }

    #[test]
    fn amount_parsing_is_forgiving() {
        assert_eq!(parse_amount("12.5"), 12.5);
        assert_eq!(parse_amount(" -0.75 cases"), -0.75);
        assert_eq!(parse_amount(".5"), 0.5);
        assert_eq!(parse_amount("3."), 3.0);
        assert_eq!(parse_amount("1e3"), 1000.0);
        assert_eq!(parse_amount("2e"), 2.0);
        assert_eq!(parse_amount("1e999"), 0.0);
        assert_eq!(parse_amount("."), 0.0);
        assert_eq!(parse_amount(""), 0.0);
        assert_eq!(parse_amount("N/A"), 0.0);
    }

    #[test]
    fn month_key_serializes_as_text() {
        let json = serde_json::to_string(&MonthKey::new(2021, 3)).unwrap();
        assert_eq!(json, "\"2021-03\"");
    }
}
