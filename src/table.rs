//! Raw CSV tables as written by CellProfiler's ExportToSpreadsheet, plus the
//! cell-level parsing helpers shared by the cell and foci loaders.

use crate::error::{EngineError, ErrorCode};
use csv::{ReaderBuilder, Trim, WriterBuilder};
use regex::Regex;
use std::io::{Read, Write};

#[derive(Debug, Clone, Default)]
pub struct RawTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn from_path(path: &str) -> Result<Self, EngineError> {
        let file = std::fs::File::open(path).map_err(|e| {
            EngineError::new(ErrorCode::Io, format!("Could not open table '{path}': {e}"))
        })?;
        Self::from_reader(file).map_err(|e| EngineError {
            code: e.code,
            message: format!("{path}: {}", e.message),
        })
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, EngineError> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .trim(Trim::All)
            .from_reader(reader);
        let headers = rdr.headers()?.iter().map(|s| s.to_string()).collect();
        let mut rows = vec![];
        for record in rdr.records() {
            rows.push(record?.iter().map(|s| s.to_string()).collect());
        }
        Ok(Self { headers, rows })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Exact header match first, then CellProfiler's `<name>_<digits>`
    /// suffixed form. Several suffixed candidates are refused.
    pub fn find_column(&self, name: &str) -> Result<Option<usize>, EngineError> {
        if let Some(idx) = self.headers.iter().position(|h| h == name) {
            return Ok(Some(idx));
        }
        let pattern = suffixed_pattern(name)?;
        let candidates: Vec<usize> = self
            .headers
            .iter()
            .enumerate()
            .filter(|(_, h)| pattern.is_match(h))
            .map(|(idx, _)| idx)
            .collect();
        match candidates.as_slice() {
            [] => Ok(None),
            [idx] => Ok(Some(*idx)),
            _ => Err(EngineError::invalid_input(format!(
                "Column '{name}' is ambiguous: {}",
                candidates
                    .iter()
                    .map(|idx| self.headers[*idx].as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    pub fn require_column(&self, name: &str) -> Result<usize, EngineError> {
        self.find_column(name)?.ok_or_else(|| {
            EngineError::new(
                ErrorCode::NotFound,
                format!("Required column '{name}' not found"),
            )
        })
    }
}

fn suffixed_pattern(name: &str) -> Result<Regex, EngineError> {
    Regex::new(&format!(r"^{}_\d+$", regex::escape(name)))
        .map_err(|e| EngineError::new(ErrorCode::Internal, e.to_string()))
}

/// True for `name` itself and for `<name>_<digits>`.
pub fn header_matches(header: &str, name: &str) -> Result<bool, EngineError> {
    Ok(header == name || suffixed_pattern(name)?.is_match(header))
}

fn is_missing(text: &str) -> bool {
    text.is_empty() || text.eq_ignore_ascii_case("nan")
}

/// Integer index cells; spreadsheet round trips sometimes write them as `3.0`.
pub fn parse_index(text: &str, column: &str, row: usize) -> Result<i64, EngineError> {
    parse_optional_index(text, column, row)?.ok_or_else(|| {
        EngineError::invalid_input(format!("Row {row}: column '{column}' is empty"))
    })
}

pub fn parse_optional_index(
    text: &str,
    column: &str,
    row: usize,
) -> Result<Option<i64>, EngineError> {
    if is_missing(text) {
        return Ok(None);
    }
    if let Ok(v) = text.parse::<i64>() {
        return Ok(Some(v));
    }
    match text.parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 => Ok(Some(v as i64)),
        _ => Err(EngineError::invalid_input(format!(
            "Row {row}: column '{column}' is not an integer: '{text}'"
        ))),
    }
}

/// Measurement cells; an empty or `nan` cell becomes NaN.
pub fn parse_measurement(text: &str, column: &str, row: usize) -> Result<f64, EngineError> {
    if is_missing(text) {
        return Ok(f64::NAN);
    }
    text.parse::<f64>().map_err(|_| {
        EngineError::invalid_input(format!(
            "Row {row}: column '{column}' is not numeric: '{text}'"
        ))
    })
}

pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else {
        format!("{value}")
    }
}

pub fn format_optional<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

pub fn write_csv<W: Write>(
    writer: W,
    headers: &[String],
    rows: impl Iterator<Item = Vec<String>>,
) -> Result<(), EngineError> {
    let mut wtr = WriterBuilder::new().has_headers(false).from_writer(writer);
    wtr.write_record(headers)?;
    for row in rows {
        wtr.write_record(&row)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(text: &str) -> RawTable {
        RawTable::from_reader(text.as_bytes()).unwrap()
    }

    #[test]
    fn test_from_reader() {
        let t = table("ImageNumber,ObjectNumber\n1,1\n1,2\n");
        assert_eq!(t.headers(), ["ImageNumber", "ObjectNumber"]);
        assert_eq!(t.len(), 2);
        assert_eq!(t.rows()[1], vec!["1", "2"]);
    }

    #[test]
    fn test_find_column_suffixed() {
        let t = table("ImageNumber,TrackObjects_Label_50,TrackObjects_LinkType_50\n1,1,0\n");
        assert_eq!(t.find_column("ImageNumber").unwrap(), Some(0));
        assert_eq!(t.find_column("TrackObjects_Label").unwrap(), Some(1));
        assert_eq!(t.find_column("Missing").unwrap(), None);
        assert_eq!(
            t.require_column("Missing").unwrap_err().code,
            ErrorCode::NotFound
        );
    }

    #[test]
    fn test_header_matches() {
        assert!(header_matches("TrackObjects_Label", "TrackObjects_Label").unwrap());
        assert!(header_matches("TrackObjects_Label_50", "TrackObjects_Label").unwrap());
        assert!(!header_matches("TrackObjects_Label_x", "TrackObjects_Label").unwrap());
        assert!(!header_matches("Track.Objects_Label_5", "Track+Objects_Label").unwrap());
    }

    #[test]
    fn test_find_column_ambiguous_suffix() {
        let t = table("TrackObjects_Label_50,TrackObjects_Label_20\n1,1\n");
        let err = t.find_column("TrackObjects_Label").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
        assert!(err.message.contains("ambiguous"));
    }

    #[test]
    fn test_parse_index() {
        assert_eq!(parse_index("3", "c", 0).unwrap(), 3);
        assert_eq!(parse_index("3.0", "c", 0).unwrap(), 3);
        assert!(parse_index("3.5", "c", 0).is_err());
        assert!(parse_index("", "c", 0).is_err());
        assert_eq!(parse_optional_index("nan", "c", 0).unwrap(), None);
    }

    #[test]
    fn test_parse_measurement() {
        assert_eq!(parse_measurement("1.25", "c", 0).unwrap(), 1.25);
        assert!(parse_measurement("", "c", 0).unwrap().is_nan());
        assert_eq!(
            parse_measurement("abc", "c", 4).unwrap_err().code,
            ErrorCode::InvalidInput
        );
    }

    #[test]
    fn test_write_csv_quotes_and_missing() {
        let mut out = vec![];
        write_csv(
            &mut out,
            &["a".to_string(), "Parent".to_string()],
            vec![vec!["x,y".to_string(), format_optional::<u32>(None)]].into_iter(),
        )
        .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "a,Parent\n\"x,y\",\n");
        assert_eq!(format_float(f64::NAN), "NaN");
        assert_eq!(format_float(0.25), "0.25");
    }
}
