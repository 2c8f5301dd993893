//! CSV → one GFM table page.

use super::{Document, ParseContext, Parser};
use crate::error::{ConvertError, ExtractionStage};
use crate::mode::Mode;
use async_trait::async_trait;
use tracing::debug;

/// Page emitted for a file with no rows.
pub const EMPTY_TABLE: &str = "*(empty table)*";

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

pub struct CsvParser;

#[async_trait]
impl Parser for CsvParser {
    fn mode(&self) -> Mode {
        Mode::Csv
    }

    async fn parse(&self, doc: &Document, _ctx: &ParseContext<'_>) -> Result<Vec<String>, ConvertError> {
        let rows = read_rows(&doc.bytes)?;
        debug!("CSV: {} rows", rows.len());
        Ok(vec![render_table(&rows)])
    }
}

/// Read every record, decoding each field lossily as UTF-8.
fn read_rows(bytes: &[u8]) -> Result<Vec<Vec<String>>, ConvertError> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let mut reader = ::csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut rows = Vec::new();
    for record in reader.byte_records() {
        let record = record.map_err(|e| {
            ConvertError::extraction(Mode::Csv, ExtractionStage::Parse, None, e.to_string())
        })?;
        let row: Vec<String> = record
            .iter()
            .map(|field| String::from_utf8_lossy(field).into_owned())
            .collect();
        if row.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Render rows as a GFM table; the first row is the header.
pub fn render_table(rows: &[Vec<String>]) -> String {
    let Some(width) = rows.iter().map(Vec::len).max().filter(|w| *w > 0) else {
        return EMPTY_TABLE.to_string();
    };

    let mut lines = Vec::with_capacity(rows.len() + 1);
    for (i, row) in rows.iter().enumerate() {
        let cells: Vec<String> = (0..width)
            .map(|c| row.get(c).map(|cell| escape_cell(cell)).unwrap_or_default())
            .collect();
        lines.push(format!("| {} |", cells.join(" | ")));
        if i == 0 {
            lines.push(format!("|{}", " --- |".repeat(width)));
        }
    }
    lines.join("\n")
}

fn escape_cell(cell: &str) -> String {
    cell.trim()
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace('|', "\\|")
        .replace('\n', "<br>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConversionConfig;

    fn parse(input: &[u8]) -> Result<Vec<String>, ConvertError> {
        let doc = Document::from_bytes("t.csv", Mode::Csv, input.to_vec());
        let config = ConversionConfig::default();
        let ctx = ParseContext::new(&config, None);
        tokio_test::block_on(CsvParser.parse(&doc, &ctx))
    }

    #[test]
    fn renders_header_and_rows() {
        let pages = parse(b"name,ip\nalpha,10.0.0.1\nbeta,10.0.0.2\n").unwrap();
        assert_eq!(
            pages,
            vec!["| name | ip |\n| --- | --- |\n| alpha | 10.0.0.1 |\n| beta | 10.0.0.2 |"]
        );
    }

    #[test]
    fn quoted_fields_stay_in_one_cell() {
        let pages = parse(b"a,b\n\"x, y\",\"line1\nline2\"\n").unwrap();
        assert!(pages[0].contains("| x, y | line1<br>line2 |"), "{}", pages[0]);
    }

    #[test]
    fn ragged_rows_are_padded() {
        let pages = parse(b"a,b,c\n1\n1,2\n").unwrap();
        let lines: Vec<&str> = pages[0].lines().collect();
        assert_eq!(lines[2], "| 1 |  |  |");
        assert_eq!(lines[3], "| 1 | 2 |  |");
    }

    #[test]
    fn pipes_are_escaped() {
        let pages = parse(b"cmd\na|b\n").unwrap();
        assert!(pages[0].contains("a\\|b"));
    }

    #[test]
    fn empty_file_is_one_page() {
        assert_eq!(parse(b"").unwrap(), vec![EMPTY_TABLE]);
        assert_eq!(parse(b"\n \n").unwrap(), vec![EMPTY_TABLE]);
    }

    #[test]
    fn bom_and_invalid_utf8_are_tolerated() {
        let pages = parse(b"\xEF\xBB\xBFh\nok\xFF\n").unwrap();
        assert!(pages[0].starts_with("| h |"));
        assert!(pages[0].contains("ok\u{FFFD}"));
    }
}
