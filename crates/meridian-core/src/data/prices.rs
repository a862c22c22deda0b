use crate::error::{BacktestError, Result};
use crate::types::{is_tradable_price, PricePoint};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataQualityReport {
    pub rows: usize,
    pub duplicates: usize,
    pub out_of_order: usize,
    pub invalid_price: usize,
    pub first_timestamp: Option<i64>,
    pub last_timestamp: Option<i64>,
    pub first_duplicate: Option<i64>,
    pub first_out_of_order: Option<i64>,
    pub first_invalid_price: Option<i64>,
}

impl DataQualityReport {
    pub fn is_clean(&self) -> bool {
        self.duplicates == 0 && self.out_of_order == 0 && self.invalid_price == 0
    }
}

/// Anything that can hand the engine a chronologically ordered price table.
pub trait PriceSource {
    fn load_prices(&self) -> Result<(Vec<PricePoint>, DataQualityReport)>;
}

pub struct VecPriceSource {
    prices: Vec<PricePoint>,
}

impl VecPriceSource {
    pub fn new(prices: Vec<PricePoint>) -> Self {
        Self { prices }
    }
}

impl PriceSource for VecPriceSource {
    fn load_prices(&self) -> Result<(Vec<PricePoint>, DataQualityReport)> {
        Ok((self.prices.clone(), data_quality_from_prices(&self.prices)))
    }
}

pub struct CsvPriceSource {
    path: PathBuf,
    price_column: Option<String>,
}

impl CsvPriceSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            price_column: None,
        }
    }

    pub fn with_price_column(mut self, column: impl Into<String>) -> Self {
        self.price_column = Some(column.into());
        self
    }
}

impl PriceSource for CsvPriceSource {
    fn load_prices(&self) -> Result<(Vec<PricePoint>, DataQualityReport)> {
        load_csv(&self.path, self.price_column.as_deref())
    }
}

pub fn data_quality_from_prices(prices: &[PricePoint]) -> DataQualityReport {
    let mut report = DataQualityReport {
        rows: prices.len(),
        ..DataQualityReport::default()
    };
    let mut last_ts: Option<i64> = None;

    for point in prices {
        let ts = point.timestamp;
        if report.first_timestamp.is_none() {
            report.first_timestamp = Some(ts);
        }
        if !is_tradable_price(point.price) {
            report.invalid_price += 1;
            report.first_invalid_price.get_or_insert(ts);
        }
        if let Some(prev) = last_ts {
            if ts == prev {
                report.duplicates += 1;
                report.first_duplicate.get_or_insert(ts);
            } else if ts < prev {
                report.out_of_order += 1;
                report.first_out_of_order.get_or_insert(ts);
            }
        }
        last_ts = Some(ts);
        report.last_timestamp = Some(ts);
    }

    report
}

/// Loads `(timestamp, price)` rows from a CSV file.
///
/// The timestamp column is `Date`, `date`, `timestamp`, `timestamp_utc`, or
/// the first column. The price column is `price_column` when given, else
/// `Close`, else the first header containing "close", else `price`.
/// Cells that do not parse as a number become NaN so the simulator can skip
/// them. Duplicate timestamps keep the last row; out-of-order rows are
/// counted and dropped.
pub fn load_csv(
    path: &Path,
    price_column: Option<&str>,
) -> Result<(Vec<PricePoint>, DataQualityReport)> {
    let file = File::open(path).map_err(|err| {
        BacktestError::Data(format!("failed to open price CSV {}: {}", path.display(), err))
    })?;
    let mut reader = csv::Reader::from_reader(file);
    let headers = reader.headers()?.clone();

    let ts_idx = find_timestamp_column(&headers);
    let price_idx = find_price_column(&headers, price_column).ok_or_else(|| {
        BacktestError::Data(format!(
            "no price column found in {} (headers: {})",
            path.display(),
            headers.iter().collect::<Vec<_>>().join(",")
        ))
    })?;
    debug!(
        path = %path.display(),
        timestamp_column = headers.get(ts_idx).unwrap_or(""),
        price_column = headers.get(price_idx).unwrap_or(""),
        "loading prices"
    );

    let mut prices: Vec<PricePoint> = Vec::new();
    let mut report = DataQualityReport::default();

    for (row, result) in reader.records().enumerate() {
        let record = result?;
        report.rows += 1;
        let raw_ts = record.get(ts_idx).unwrap_or("").trim();
        let parsed_price = record
            .get(price_idx)
            .and_then(|cell| cell.trim().parse::<f64>().ok());
        let timestamp = match parse_timestamp(raw_ts) {
            Ok(ts) => ts,
            // multi-level headers (e.g. "Ticker,SPY,..." then "Date,,,") carry no data
            Err(_) if raw_ts.is_empty() || parsed_price.is_none() => {
                debug!(row = row + 2, "skipping non-data row");
                report.rows -= 1;
                continue;
            }
            Err(err) => {
                return Err(BacktestError::Data(format!("row {}: {}", row + 2, err)));
            }
        };
        let price = parsed_price.unwrap_or(f64::NAN);

        if report.first_timestamp.is_none() {
            report.first_timestamp = Some(timestamp);
        }
        if !is_tradable_price(price) {
            report.invalid_price += 1;
            report.first_invalid_price.get_or_insert(timestamp);
        }

        match prices.last_mut() {
            Some(last) if last.timestamp == timestamp => {
                report.duplicates += 1;
                report.first_duplicate.get_or_insert(timestamp);
                last.price = price;
                continue;
            }
            Some(last) if timestamp < last.timestamp => {
                report.out_of_order += 1;
                report.first_out_of_order.get_or_insert(timestamp);
                continue;
            }
            _ => {}
        }

        report.last_timestamp = Some(timestamp);
        prices.push(PricePoint { timestamp, price });
    }

    if !report.is_clean() {
        warn!(
            path = %path.display(),
            duplicates = report.duplicates,
            out_of_order = report.out_of_order,
            invalid_price = report.invalid_price,
            "price data quality issues"
        );
    }

    Ok((prices, report))
}

fn find_timestamp_column(headers: &csv::StringRecord) -> usize {
    const NAMES: &[&str] = &["date", "datetime", "timestamp", "timestamp_utc", "time"];
    headers
        .iter()
        .position(|h| NAMES.contains(&h.trim().to_lowercase().as_str()))
        .unwrap_or(0)
}

fn find_price_column(headers: &csv::StringRecord, explicit: Option<&str>) -> Option<usize> {
    if let Some(name) = explicit {
        return headers.iter().position(|h| h.trim() == name);
    }
    headers
        .iter()
        .position(|h| h.trim() == "Close")
        .or_else(|| {
            headers
                .iter()
                .position(|h| h.to_lowercase().contains("close"))
        })
        .or_else(|| {
            headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case("price"))
        })
}

pub fn parse_timestamp(value: &str) -> std::result::Result<i64, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.timestamp());
    }
    if let Ok(dt) = DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%:z") {
        return Ok(dt.timestamp());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&naive).timestamp());
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&naive).timestamp());
        }
    }
    if let Ok(seconds) = value.parse::<i64>() {
        return Ok(seconds);
    }

    Err(format!("unsupported timestamp format: {}", value))
}

pub fn format_timestamp(timestamp: i64) -> String {
    match Utc.timestamp_opt(timestamp, 0) {
        chrono::LocalResult::Single(dt) => dt.to_rfc3339(),
        _ => timestamp.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{
        data_quality_from_prices, format_timestamp, load_csv, parse_timestamp, CsvPriceSource,
        PriceSource, VecPriceSource,
    };
    use crate::types::PricePoint;
    use std::fs;
    use std::path::Path;

    #[test]
    fn load_csv_reads_close_and_tracks_quality() {
        let tmp_path = Path::new("/tmp/meridian_prices_test.csv");
        let csv_data = "Date,Open,High,Low,Close,Volume\n\
2023-01-03,1,1,1,100.5,10\n\
2023-01-03,1,1,1,101.0,10\n\
2023-01-04,1,1,1,,10\n\
2023-01-02,1,1,1,99.0,10\n\
2023-01-05,1,1,1,102.0,10\n";
        fs::write(tmp_path, csv_data).expect("write csv");

        let (prices, report) = load_csv(tmp_path, None).expect("load csv");
        assert_eq!(prices.len(), 3);
        assert_eq!(prices[0].price, 101.0);
        assert!(prices[1].price.is_nan());
        assert_eq!(prices[2].price, 102.0);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.out_of_order, 1);
        assert_eq!(report.invalid_price, 1);
        assert!(!report.is_clean());
    }

    #[test]
    fn csv_source_honours_explicit_column() {
        let tmp_path = Path::new("/tmp/meridian_prices_adj.csv");
        fs::write(
            tmp_path,
            "timestamp_utc,Close,Adj Close\n\
             2024-01-01T00:00:00Z,10,9.5\n\
             2024-01-02T00:00:00Z,11,10.5\n",
        )
        .expect("write csv");

        let (prices, report) = CsvPriceSource::new(tmp_path)
            .with_price_column("Adj Close")
            .load_prices()
            .expect("load");
        assert_eq!(prices.len(), 2);
        assert_eq!(prices[1].price, 10.5);
        assert!(report.is_clean());
    }

    #[test]
    fn skips_multi_level_header_rows() {
        let tmp_path = Path::new("/tmp/meridian_prices_multilevel.csv");
        fs::write(
            tmp_path,
            "Price,Close,High\nTicker,SPY,SPY\nDate,,\n\
             2024-01-02,470.1,471\n2024-01-03,468.8,470\n",
        )
        .expect("write csv");

        let (prices, report) = load_csv(tmp_path, None).expect("load");
        assert_eq!(prices.len(), 2);
        assert_eq!(prices[0].price, 470.1);
        assert_eq!(report.rows, 2);
        assert!(report.is_clean());
    }

    #[test]
    fn parses_supported_timestamp_formats() {
        assert_eq!(parse_timestamp("1970-01-02").unwrap(), 86_400);
        assert_eq!(parse_timestamp("1970-01-01 00:01:00").unwrap(), 60);
        assert_eq!(parse_timestamp("1970-01-01T00:00:05Z").unwrap(), 5);
        assert_eq!(parse_timestamp("42").unwrap(), 42);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn vec_source_serves_prices_with_quality() {
        let source = VecPriceSource::new(vec![
            PricePoint::new(10, 1.0),
            PricePoint::new(20, f64::NAN),
            PricePoint::new(30, 3.0),
        ]);
        let (prices, report) = source.load_prices().expect("load");
        assert_eq!(prices.len(), 3);
        assert_eq!(report.invalid_price, 1);
        assert_eq!(report.first_invalid_price, Some(20));
        assert_eq!(report.first_timestamp, Some(10));
        assert_eq!(report.last_timestamp, Some(30));
    }

    #[test]
    fn formats_timestamps_as_rfc3339() {
        assert_eq!(format_timestamp(86_400), "1970-01-02T00:00:00+00:00");
    }

    #[test]
    fn quality_report_for_in_memory_prices() {
        let report = data_quality_from_prices(&[
            PricePoint::new(1, 1.0),
            PricePoint::new(1, 1.0),
            PricePoint::new(0, f64::NAN),
        ]);
        assert_eq!(report.rows, 3);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.out_of_order, 1);
        assert_eq!(report.invalid_price, 1);
    }
}
