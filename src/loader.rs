use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

// ============================================================================
// Table Model
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Number,
    Date,
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
}

/// An in-memory tabular dataset. Owned by a single analysis call, never cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    fn from_records(headers: Vec<String>, mut rows: Vec<Vec<String>>) -> Self {
        let width = headers.len();
        for row in &mut rows {
            row.resize(width, String::new());
        }

        let columns = headers
            .into_iter()
            .enumerate()
            .map(|(i, name)| Column {
                kind: infer_kind(rows.iter().map(|r| r[i].as_str())),
                name,
            })
            .collect();

        Self { columns, rows }
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Up to `n` leading rows, used when describing the table to the chart service.
    pub fn sample(&self, n: usize) -> &[Vec<String>] {
        &self.rows[..self.rows.len().min(n)]
    }
}

const KIND_SAMPLE_LIMIT: usize = 50;

fn infer_kind<'a>(values: impl Iterator<Item = &'a str>) -> ColumnKind {
    let mut seen = 0usize;
    let mut all_numbers = true;
    let mut all_dates = true;

    for value in values {
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        seen += 1;
        if !parses_as_number(value) {
            all_numbers = false;
        }
        if !parses_as_date(value) {
            all_dates = false;
        }
        if (!all_numbers && !all_dates) || seen >= KIND_SAMPLE_LIMIT {
            break;
        }
    }

    if seen == 0 {
        ColumnKind::Text
    } else if all_numbers {
        ColumnKind::Number
    } else if all_dates {
        ColumnKind::Date
    } else {
        ColumnKind::Text
    }
}

fn parses_as_number(value: &str) -> bool {
    let cleaned: String = value
        .chars()
        .filter(|c| !matches!(c, ',' | '$' | '%' | ' '))
        .collect();
    !cleaned.is_empty() && cleaned.parse::<f64>().is_ok()
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%d.%m.%Y", "%m/%d/%y"];

fn parses_as_date(value: &str) -> bool {
    DATE_FORMATS
        .iter()
        .any(|f| chrono::NaiveDate::parse_from_str(value, f).is_ok())
}

// ============================================================================
// Loading
// ============================================================================

/// Reads a tabular file into memory. Reloaded on every call, no caching.
pub fn load_table(path: &Path) -> Result<Table> {
    if !path.is_file() {
        return Err(AppError::data_load(format!(
            "input file not found: {}",
            path.display()
        )));
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "csv" => load_csv(path),
        "xlsx" => load_xlsx(path),
        other => Err(AppError::data_load(format!(
            "unsupported tabular format '.{}' for {}",
            other,
            path.display()
        ))),
    }
}

fn load_csv(path: &Path) -> Result<Table> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| AppError::data_load(format!("cannot read {}: {}", path.display(), e)))?;

    // Strip UTF-8 BOM if present
    let text = raw.trim_start_matches('\u{FEFF}');

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| AppError::data_load(format!("cannot read CSV headers: {}", e)))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    if headers.is_empty() {
        return Err(AppError::data_load(format!(
            "{} has no header row",
            path.display()
        )));
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record =
            record.map_err(|e| AppError::data_load(format!("malformed CSV record: {}", e)))?;
        rows.push(record.iter().map(|v| v.trim().to_string()).collect());
    }

    Ok(Table::from_records(headers, rows))
}

fn load_xlsx(path: &Path) -> Result<Table> {
    let file = File::open(path)
        .map_err(|e| AppError::data_load(format!("cannot open {}: {}", path.display(), e)))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| AppError::data_load(format!("{} is not a valid xlsx: {}", path.display(), e)))?;

    let shared = match read_zip_entry(&mut archive, "xl/sharedStrings.xml") {
        Some(xml) => parse_shared_strings(&xml),
        None => Vec::new(),
    };

    let sheet = read_zip_entry(&mut archive, "xl/worksheets/sheet1.xml").ok_or_else(|| {
        AppError::data_load(format!("{} contains no worksheet", path.display()))
    })?;

    let mut grid = parse_worksheet(&sheet, &shared);
    if grid.is_empty() {
        return Err(AppError::data_load(format!(
            "{} worksheet is empty",
            path.display()
        )));
    }

    let headers = grid.remove(0);
    if headers.iter().all(|h| h.is_empty()) {
        return Err(AppError::data_load(format!(
            "{} has no header row",
            path.display()
        )));
    }

    Ok(Table::from_records(headers, grid))
}

fn read_zip_entry(archive: &mut zip::ZipArchive<File>, name: &str) -> Option<String> {
    let mut entry = archive.by_name(name).ok()?;
    let mut content = String::new();
    entry.read_to_string(&mut content).ok()?;
    Some(content)
}

// ============================================================================
// Minimal OOXML parsing
// ============================================================================

fn decode_xml_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Shared strings, one entry per `<si>`. Rich-text runs are concatenated.
fn parse_shared_strings(xml: &str) -> Vec<String> {
    let mut strings = Vec::new();
    for item in split_elements(xml, "si") {
        let mut text = String::new();
        for run in split_elements(&item, "t") {
            text.push_str(&decode_xml_entities(&run));
        }
        strings.push(text);
    }
    strings
}

fn parse_worksheet(xml: &str, shared: &[String]) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    for row_xml in split_elements(xml, "row") {
        let mut row: Vec<String> = Vec::new();
        for (attrs, body) in split_elements_with_attrs(&row_xml, "c") {
            let col = attr_value(&attrs, "r")
                .and_then(|r| column_index(&r))
                .unwrap_or(row.len());
            if row.len() <= col {
                row.resize(col + 1, String::new());
            }

            let cell_type = attr_value(&attrs, "t").unwrap_or_default();
            let value = match cell_type.as_str() {
                // Shared-string reference
                "s" => inner_element(&body, "v")
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .and_then(|i| shared.get(i).cloned())
                    .unwrap_or_default(),
                // Inline string
                "inlineStr" => split_elements(&body, "t")
                    .into_iter()
                    .map(|t| decode_xml_entities(&t))
                    .collect(),
                _ => inner_element(&body, "v")
                    .map(|v| decode_xml_entities(v.trim()))
                    .unwrap_or_default(),
            };
            row[col] = value;
        }
        rows.push(row);
    }
    rows
}

/// The inner text of every `<tag ...>...</tag>` occurrence, in document order.
/// Self-closing occurrences contribute an empty string.
fn split_elements(xml: &str, tag: &str) -> Vec<String> {
    split_elements_with_attrs(xml, tag)
        .into_iter()
        .map(|(_, body)| body)
        .collect()
}

fn split_elements_with_attrs(xml: &str, tag: &str) -> Vec<(String, String)> {
    let open = format!("<{}", tag);
    let close = format!("</{}>", tag);
    let mut out = Vec::new();
    let mut rest = xml;

    while let Some(start) = rest.find(&open) {
        let after = &rest[start + open.len()..];
        // Must be a full tag name match, not a prefix of a longer tag
        if !after.starts_with(|c: char| c == ' ' || c == '>' || c == '/') {
            rest = &rest[start + open.len()..];
            continue;
        }
        let Some(tag_end) = after.find('>') else { break };
        let attrs = after[..tag_end].trim_end_matches('/').trim().to_string();

        if after[..tag_end].ends_with('/') {
            out.push((attrs, String::new()));
            rest = &after[tag_end + 1..];
            continue;
        }

        let body_start = &after[tag_end + 1..];
        let Some(end) = body_start.find(&close) else {
            break;
        };
        out.push((attrs, body_start[..end].to_string()));
        rest = &body_start[end + close.len()..];
    }
    out
}

fn inner_element(xml: &str, tag: &str) -> Option<String> {
    split_elements(xml, tag).into_iter().next()
}

fn attr_value(attrs: &str, name: &str) -> Option<String> {
    let needle = format!("{}=\"", name);
    let start = attrs.find(&needle)? + needle.len();
    let end = attrs[start..].find('"')?;
    Some(attrs[start..start + end].to_string())
}

/// Converts the letter part of a cell reference ("B7" -> 1) to a column index.
fn column_index(cell_ref: &str) -> Option<usize> {
    let letters: String = cell_ref.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
    if letters.is_empty() {
        return None;
    }
    let mut index = 0usize;
    for c in letters.chars() {
        index = index * 26 + (c.to_ascii_uppercase() as usize - 'A' as usize + 1);
    }
    Some(index - 1)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn temp_path(ext: &str) -> PathBuf {
        std::env::temp_dir().join(format!("insight_agent_{}.{}", uuid::Uuid::now_v7(), ext))
    }

    fn write_csv(content: &str) -> PathBuf {
        let path = temp_path("csv");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_csv() {
        let path = write_csv("Country,Product,Profit\nGermany,Carreterra,576.0\nFrance,Velo,120.5\n");
        let table = load_table(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(table.column_names(), vec!["Country", "Product", "Profit"]);
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.columns[2].kind, ColumnKind::Number);
        assert_eq!(table.columns[0].kind, ColumnKind::Text);
        assert_eq!(table.rows[0][1], "Carreterra");
    }

    #[test]
    fn test_load_csv_with_bom_and_ragged_rows() {
        let path = write_csv("\u{FEFF}A,B,C\n1,2\n4,5,6,7\n");
        let table = load_table(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(table.column_names(), vec!["A", "B", "C"]);
        assert_eq!(table.rows[0], vec!["1", "2", ""]);
    }

    #[test]
    fn test_date_column_inference() {
        let path = write_csv("When,What\n2024-01-01,x\n2024-02-15,y\n");
        let table = load_table(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(table.columns[0].kind, ColumnKind::Date);
    }

    #[test]
    fn test_missing_file() {
        let err = load_table(Path::new("/nonexistent/data.csv")).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::DataLoadError);
    }

    #[test]
    fn test_unsupported_format() {
        let path = temp_path("parquet");
        std::fs::write(&path, b"whatever").unwrap();
        let err = load_table(&path).unwrap_err();
        std::fs::remove_file(&path).ok();

        assert_eq!(err.code, crate::error::ErrorCode::DataLoadError);
        assert!(err.message.contains("unsupported"));
    }

    fn write_test_xlsx() -> PathBuf {
        let path = temp_path("xlsx");
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options: zip::write::SimpleFileOptions = Default::default();

        writer.start_file("xl/sharedStrings.xml", options).unwrap();
        writer
            .write_all(
                br#"<?xml version="1.0"?><sst><si><t>Country</t></si><si><t>Profit</t></si><si><t>Germany</t></si><si><t>France &amp; Co</t></si></sst>"#,
            )
            .unwrap();

        writer.start_file("xl/worksheets/sheet1.xml", options).unwrap();
        writer
            .write_all(
                br#"<?xml version="1.0"?><worksheet><sheetData><row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c></row><row r="2"><c r="A2" t="s"><v>2</v></c><c r="B2"><v>576</v></c></row><row r="3"><c r="A3" t="s"><v>3</v></c><c r="B3"><v>120.5</v></c></row></sheetData></worksheet>"#,
            )
            .unwrap();
        writer.finish().unwrap();
        path
    }

    #[test]
    fn test_load_xlsx() {
        let path = write_test_xlsx();
        let table = load_table(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(table.column_names(), vec!["Country", "Profit"]);
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.rows[0], vec!["Germany", "576"]);
        assert_eq!(table.rows[1][0], "France & Co");
        assert_eq!(table.columns[1].kind, ColumnKind::Number);
    }

    #[test]
    fn test_corrupt_xlsx() {
        let path = temp_path("xlsx");
        std::fs::write(&path, b"not a zip archive").unwrap();
        let err = load_table(&path).unwrap_err();
        std::fs::remove_file(&path).ok();

        assert_eq!(err.code, crate::error::ErrorCode::DataLoadError);
    }

    #[test]
    fn test_column_index() {
        assert_eq!(column_index("A1"), Some(0));
        assert_eq!(column_index("B7"), Some(1));
        assert_eq!(column_index("AA3"), Some(26));
        assert_eq!(column_index("12"), None);
    }
}
