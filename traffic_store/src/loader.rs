use std::{
    collections::HashMap,
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
    str::FromStr,
};

use csv::{ReaderBuilder, StringRecord, Trim};

use crate::{
    error::{Result, StoreError},
    schema::{
        observed_columns as oc, ObservedRecord, PredictedRecord, SegmentKey, OBSERVED_TABLE,
        PREDICTED_COLUMN_MAP, PREDICTED_TABLE,
    },
};

/// Options shared by both loaders.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    /// Field delimiter; sniffed from the header line when `None`.
    pub delimiter: Option<u8>,
}

/// Load the observed measurements file. Column names are kept as they are in
/// the file header.
pub fn load_observed(path: &Path, opts: &LoadOptions) -> Result<Vec<ObservedRecord>> {
    let mut reader = open_reader(path, opts)?;
    let cols = ColumnIndex::resolve(OBSERVED_TABLE, reader.headers()?, &oc::ALL)?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row = Row { table: OBSERVED_TABLE, record: &record, cols: &cols };
        rows.push(ObservedRecord {
            key: SegmentKey {
                year: row.int(oc::YEAR)?,
                month: row.int(oc::MONTH)?,
                day: row.int(oc::DAY)?,
                hour: row.int(oc::HOUR)?,
                via: row.text(oc::VIA).to_string(),
                pk: row.float(oc::PK)?,
            },
            direction: row.text(oc::DIRECTION).to_string(),
            speed_mean: row.opt_float(oc::SPEED_MEAN)?,
            intensity_total: row.opt_float(oc::INTENSITY_TOTAL)?,
            intensity_heavy: row.opt_float(oc::INTENSITY_HEAVY)?,
        });
    }

    tracing::info!("loaded {} rows into {} from {}", rows.len(), OBSERVED_TABLE, path.display());
    Ok(rows)
}

/// Load the forecast file, selecting and renaming the allowlisted columns.
pub fn load_predicted(path: &Path, opts: &LoadOptions) -> Result<Vec<PredictedRecord>> {
    let mut reader = open_reader(path, opts)?;
    let sources: Vec<&str> = PREDICTED_COLUMN_MAP.iter().map(|(src, _)| *src).collect();
    let headers = reader.headers()?.clone();
    let source_cols = ColumnIndex::resolve(PREDICTED_TABLE, &headers, &sources)?;
    let cols = source_cols.renamed(&PREDICTED_COLUMN_MAP);

    let dropped: Vec<&str> = headers
        .iter()
        .map(clean_header)
        .filter(|h| !sources.contains(h))
        .collect();
    if !dropped.is_empty() {
        tracing::debug!("dropping {} forecast columns: {:?}", dropped.len(), dropped);
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row = Row { table: PREDICTED_TABLE, record: &record, cols: &cols };
        rows.push(PredictedRecord {
            key: SegmentKey {
                year: row.int("year")?,
                month: row.int("month")?,
                day: row.int("day")?,
                hour: row.int("hour")?,
                via: row.text("via").to_string(),
                pk: row.float("pk")?,
            },
            predicted_speed_mean: row.float("predicted_speed_mean")?,
            predicted_speed_p10: row.float("predicted_speed_p10")?,
            predicted_intensity_total: row.float("predicted_intensity_total")?,
            predicted_intensity_heavy: row.float("predicted_intensity_heavy")?,
        });
    }

    tracing::info!("loaded {} rows into {} from {}", rows.len(), PREDICTED_TABLE, path.display());
    Ok(rows)
}

fn open_reader(path: &Path, opts: &LoadOptions) -> Result<csv::Reader<File>> {
    let delimiter = match opts.delimiter {
        Some(d) => d,
        None => sniff_delimiter(path)?,
    };
    let reader = ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delimiter)
        .trim(Trim::All)
        .from_path(path)?;
    Ok(reader)
}

/// Pick the delimiter that occurs most often in the header line.
fn sniff_delimiter(path: &Path) -> Result<u8> {
    let mut header = String::new();
    BufReader::new(File::open(path)?).read_line(&mut header)?;
    let best = [b',', b';', b'\t']
        .into_iter()
        .map(|d| (header.bytes().filter(|b| *b == d).count(), d))
        .max_by_key(|(count, _)| *count)
        .filter(|(count, _)| *count > 0)
        .map(|(_, d)| d);
    Ok(best.unwrap_or(b','))
}

fn clean_header(h: &str) -> &str {
    h.trim_start_matches('\u{feff}').trim()
}

/// Column name → field position for one file.
struct ColumnIndex {
    positions: HashMap<String, usize>,
}

impl ColumnIndex {
    fn resolve(table: &'static str, headers: &StringRecord, required: &[&str]) -> Result<Self> {
        let found: HashMap<&str, usize> = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (clean_header(h), i))
            .collect();

        let mut positions = HashMap::with_capacity(required.len());
        for column in required {
            let idx = found.get(column).ok_or_else(|| StoreError::SchemaMismatch {
                table,
                column: column.to_string(),
            })?;
            positions.insert(column.to_string(), *idx);
        }
        Ok(Self { positions })
    }

    fn renamed(self, map: &[(&str, &str)]) -> Self {
        let positions = map
            .iter()
            .filter_map(|(src, dst)| self.positions.get(*src).map(|idx| (dst.to_string(), *idx)))
            .collect();
        Self { positions }
    }
}

struct Row<'a> {
    table: &'static str,
    record: &'a StringRecord,
    cols: &'a ColumnIndex,
}

impl Row<'_> {
    fn text(&self, column: &str) -> &str {
        self.cols
            .positions
            .get(column)
            .and_then(|idx| self.record.get(*idx))
            .unwrap_or("")
    }

    fn invalid(&self, column: &str, value: &str) -> StoreError {
        StoreError::InvalidValue {
            table: self.table,
            line: self.record.position().map(|p| p.line()).unwrap_or(0),
            column: column.to_string(),
            value: value.to_string(),
        }
    }

    /// Integer cell; integral floats such as `2023.0` are accepted.
    fn int<T: FromStr + TryFrom<i64>>(&self, column: &str) -> Result<T> {
        let raw = self.text(column);
        if let Ok(v) = raw.parse::<T>() {
            return Ok(v);
        }
        raw.parse::<f64>()
            .ok()
            .filter(|f| f.fract() == 0.0)
            .and_then(|f| T::try_from(f as i64).ok())
            .ok_or_else(|| self.invalid(column, raw))
    }

    fn float(&self, column: &str) -> Result<f64> {
        self.opt_float(column)?
            .ok_or_else(|| self.invalid(column, self.text(column)))
    }

    /// Empty and NA-style cells are absent values.
    fn opt_float(&self, column: &str) -> Result<Option<f64>> {
        let raw = self.text(column);
        if raw.is_empty() || matches!(raw, "NA" | "NaN" | "nan" | "null" | "NULL") {
            return Ok(None);
        }
        match raw.parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(Some(v)),
            _ => Err(self.invalid(column, raw)),
        }
    }
}
