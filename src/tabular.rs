//! Loading tabular source files into typed in-memory grids.
//!
//! CSV files are read with the `csv` crate and sniffed for a header row.
//! xlsx workbooks are read straight from their OOXML parts (`zip` +
//! `quick-xml`), one [`Grid`] per worksheet, with the first row as header.
//! Column types are inferred from the non-empty cells of each column.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use quick_xml::events::Event;

use crate::extract::{read_zip_entry_bounded, ExtractError, MAX_XML_ENTRY_BYTES};

/// Maximum worksheets read from one workbook.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells read per worksheet.
const XLSX_MAX_CELLS_PER_SHEET: usize = 2_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Boolean,
    BigInt,
    Double,
    Date,
    Varchar,
}

impl ColumnType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::BigInt => "BIGINT",
            ColumnType::Double => "DOUBLE",
            ColumnType::Date => "DATE",
            ColumnType::Varchar => "VARCHAR",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// A typed cell ready to be bound into an INSERT.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// Rectangular table of raw string cells with named columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Grid {
    pub columns: Vec<String>,
    /// Every row has exactly `columns.len()` cells; `None` is an empty cell.
    pub rows: Vec<Vec<Option<String>>>,
}

impl Grid {
    /// Build a grid, padding short rows and naming unnamed columns.
    pub fn new(header: Vec<String>, mut rows: Vec<Vec<Option<String>>>) -> Self {
        let width = rows
            .iter()
            .map(Vec::len)
            .chain(std::iter::once(header.len()))
            .max()
            .unwrap_or(0);

        let mut header = header;
        header.resize(width, String::new());
        let columns = dedupe_column_names(header);

        for row in &mut rows {
            row.resize(width, None);
        }

        Self { columns, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn infer_types(&self) -> Vec<ColumnType> {
        (0..self.columns.len())
            .map(|i| infer_column_type(self.rows.iter().filter_map(|r| r[i].as_deref())))
            .collect()
    }
}

fn dedupe_column_names(names: Vec<String>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    names
        .into_iter()
        .enumerate()
        .map(|(i, name)| {
            let base = match name.trim() {
                "" => format!("column{}", i),
                trimmed => trimmed.to_string(),
            };
            let count = seen.entry(base.to_lowercase()).or_insert(0);
            let out = if *count == 0 {
                base
            } else {
                format!("{}_{}", base, count)
            };
            *count += 1;
            out
        })
        .collect()
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

fn parse_float(s: &str) -> Option<f64> {
    // Rejects "inf"/"nan" spellings that f64::from_str would accept.
    if !s.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse::<f64>().ok()
}

fn looks_typed(s: &str) -> bool {
    let s = s.trim();
    parse_bool(s).is_some() || parse_float(s).is_some() || parse_date(s).is_some()
}

/// Narrowest type that accepts every value.
pub fn infer_column_type<'a>(values: impl Iterator<Item = &'a str>) -> ColumnType {
    let mut any = false;
    let (mut boolean, mut bigint, mut double, mut date) = (true, true, true, true);

    for raw in values {
        let v = raw.trim();
        if v.is_empty() {
            continue;
        }
        any = true;
        boolean &= parse_bool(v).is_some();
        bigint &= v.parse::<i64>().is_ok();
        double &= parse_float(v).is_some();
        date &= parse_date(v).is_some();
        if !(boolean || bigint || double || date) {
            return ColumnType::Varchar;
        }
    }

    match (any, boolean, bigint, double, date) {
        (false, ..) => ColumnType::Varchar,
        (true, true, ..) => ColumnType::Boolean,
        (true, _, true, ..) => ColumnType::BigInt,
        (true, _, _, true, _) => ColumnType::Double,
        (true, _, _, _, true) => ColumnType::Date,
        _ => ColumnType::Varchar,
    }
}

/// Convert a raw cell to the inferred column type. Values that do not parse
/// fall back to text rather than failing the load.
pub fn convert_cell(raw: Option<&str>, ty: ColumnType) -> Cell {
    let v = match raw.map(str::trim) {
        None | Some("") => return Cell::Null,
        Some(v) => v,
    };
    match ty {
        ColumnType::Boolean => parse_bool(v).map(Cell::Bool),
        ColumnType::BigInt => v.parse::<i64>().ok().map(Cell::Int),
        ColumnType::Double => parse_float(v).map(Cell::Float),
        ColumnType::Date | ColumnType::Varchar => None,
    }
    .unwrap_or_else(|| Cell::Text(v.to_string()))
}

// ============ CSV ============

pub fn read_csv(path: &Path) -> Result<Grid> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    parse_csv(&bytes).with_context(|| format!("Failed to parse CSV {}", path.display()))
}

/// Parse CSV bytes. The first record is a header unless it has an empty
/// field or any field that parses as a number, boolean, or date.
pub fn parse_csv(bytes: &[u8]) -> Result<Grid> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut records: Vec<Vec<String>> = Vec::new();
    for record in reader.records() {
        let record = record?;
        records.push(record.iter().map(|f| f.to_string()).collect());
    }
    // Trailing blank lines.
    records.retain(|r| !(r.len() == 1 && r[0].trim().is_empty()));

    if records.is_empty() {
        return Ok(Grid::default());
    }

    let first = &records[0];
    let has_header = first.iter().all(|f| !f.trim().is_empty() && !looks_typed(f));

    let (header, body) = if has_header {
        (records[0].clone(), &records[1..])
    } else {
        (Vec::new(), &records[..])
    };

    let rows = body
        .iter()
        .map(|r| {
            r.iter()
                .map(|f| {
                    if f.trim().is_empty() {
                        None
                    } else {
                        Some(f.clone())
                    }
                })
                .collect()
        })
        .collect();

    Ok(Grid::new(header, rows))
}

// ============ XLSX ============

/// One worksheet of a workbook, parsed independently.
#[derive(Debug)]
pub struct SheetData {
    pub name: String,
    pub grid: Result<Grid, ExtractError>,
}

pub fn read_xlsx(path: &Path) -> Result<Vec<SheetData>> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    parse_xlsx(&bytes).with_context(|| format!("Failed to open workbook {}", path.display()))
}

/// Parse every worksheet. Workbook-level damage is an error; a damaged
/// sheet only fails its own [`SheetData::grid`].
pub fn parse_xlsx(bytes: &[u8]) -> Result<Vec<SheetData>, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;

    let shared_strings = if archive.by_name("xl/sharedStrings.xml").is_ok() {
        let xml = read_zip_entry_bounded(&mut archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES)?;
        read_shared_strings(&xml)?
    } else {
        Vec::new()
    };

    let sheets = list_sheets(&mut archive)?;
    let mut out = Vec::new();
    for (name, part) in sheets.into_iter().take(XLSX_MAX_SHEETS) {
        let grid = read_zip_entry_bounded(&mut archive, &part, MAX_XML_ENTRY_BYTES)
            .and_then(|xml| read_sheet_grid(&xml, &shared_strings));
        out.push(SheetData { name, grid });
    }
    Ok(out)
}

/// Worksheet display names paired with their part paths, in workbook order.
fn list_sheets(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
) -> Result<Vec<(String, String)>, ExtractError> {
    let workbook = read_zip_entry_bounded(archive, "xl/workbook.xml", MAX_XML_ENTRY_BYTES)?;

    let mut declared: Vec<(String, Option<String>)> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(workbook.as_slice());
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"sheet" => {
                let mut name = None;
                let mut rel_id = None;
                for attr in e.attributes().flatten() {
                    let value = attr
                        .unescape_value()
                        .map(|v| v.into_owned())
                        .unwrap_or_default();
                    match attr.key.local_name().as_ref() {
                        b"name" => name = Some(value),
                        b"id" => rel_id = Some(value),
                        _ => {}
                    }
                }
                if let Some(name) = name {
                    declared.push((name, rel_id));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    let targets = if archive.by_name("xl/_rels/workbook.xml.rels").is_ok() {
        let rels =
            read_zip_entry_bounded(archive, "xl/_rels/workbook.xml.rels", MAX_XML_ENTRY_BYTES)?;
        read_relationship_targets(&rels)?
    } else {
        HashMap::new()
    };

    Ok(declared
        .into_iter()
        .enumerate()
        .map(|(i, (name, rel_id))| {
            let part = rel_id
                .and_then(|id| targets.get(&id).cloned())
                .unwrap_or_else(|| format!("xl/worksheets/sheet{}.xml", i + 1));
            (name, part)
        })
        .collect())
}

fn read_relationship_targets(xml: &[u8]) -> Result<HashMap<String, String>, ExtractError> {
    let mut targets = HashMap::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                let mut id = None;
                let mut target = None;
                for attr in e.attributes().flatten() {
                    let value = attr
                        .unescape_value()
                        .map(|v| v.into_owned())
                        .unwrap_or_default();
                    match attr.key.local_name().as_ref() {
                        b"Id" => id = Some(value),
                        b"Target" => target = Some(value),
                        _ => {}
                    }
                }
                if let (Some(id), Some(target)) = (id, target) {
                    let part = match target.strip_prefix('/') {
                        Some(abs) => abs.to_string(),
                        None => format!("xl/{}", target),
                    };
                    targets.insert(id, part);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(targets)
}

fn read_shared_strings(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = true,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"si" => {
                strings.push(String::new());
            }
            Ok(Event::Text(te)) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(te.unescape().unwrap_or_default().as_ref());
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"si" => strings.push(current.take().unwrap_or_default()),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Zero-based column index from an A1-style reference (`"C7"` → 2).
fn column_index(cell_ref: &str) -> Option<usize> {
    let letters: Vec<u8> = cell_ref
        .bytes()
        .take_while(|b| b.is_ascii_alphabetic())
        .collect();
    if letters.is_empty() {
        return None;
    }
    let mut idx = 0usize;
    for b in letters {
        idx = idx * 26 + (b.to_ascii_uppercase() - b'A' + 1) as usize;
    }
    Some(idx - 1)
}

fn read_sheet_grid(xml: &[u8], shared_strings: &[String]) -> Result<Grid, ExtractError> {
    let mut rows: Vec<Vec<Option<String>>> = Vec::new();
    let mut row: Vec<Option<String>> = Vec::new();
    let mut in_row = false;

    let mut col = 0usize;
    let mut cell_type = String::new();
    let mut value: Option<String> = None;
    let mut in_value = false;
    let mut cell_count = 0usize;

    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        if cell_count >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => {
                    in_row = true;
                    row.clear();
                }
                b"c" => {
                    cell_type.clear();
                    value = None;
                    col = row.len();
                    for attr in e.attributes().flatten() {
                        match attr.key.local_name().as_ref() {
                            b"r" => {
                                if let Some(i) = column_index(&String::from_utf8_lossy(&attr.value)) {
                                    col = i;
                                }
                            }
                            b"t" => cell_type = String::from_utf8_lossy(&attr.value).into_owned(),
                            _ => {}
                        }
                    }
                }
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"row" => {
                rows.push(Vec::new());
            }
            Ok(Event::Text(te)) if in_value => {
                let text = te.unescape().unwrap_or_default();
                value.get_or_insert_with(String::new).push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    let resolved = resolve_cell(&cell_type, value.take(), shared_strings);
                    if row.len() <= col {
                        row.resize(col + 1, None);
                    }
                    row[col] = resolved;
                    cell_count += 1;
                }
                b"row" if in_row => {
                    rows.push(std::mem::take(&mut row));
                    in_row = false;
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    // Leading and trailing fully-empty rows carry no data.
    let is_blank = |r: &Vec<Option<String>>| r.iter().all(Option::is_none);
    while rows.last().is_some_and(is_blank) {
        rows.pop();
    }
    let first = rows.iter().position(|r| !is_blank(r)).unwrap_or(rows.len());
    let mut rows = rows.split_off(first);

    if rows.is_empty() {
        return Err(ExtractError::Ooxml("worksheet has no data".to_string()));
    }

    let header = rows
        .remove(0)
        .into_iter()
        .map(Option::unwrap_or_default)
        .collect();
    Ok(Grid::new(header, rows))
}

fn resolve_cell(cell_type: &str, value: Option<String>, shared_strings: &[String]) -> Option<String> {
    let raw = value?;
    let resolved = match cell_type {
        "s" => raw
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|i| shared_strings.get(i).cloned())?,
        "b" => match raw.trim() {
            "1" => "true".to_string(),
            _ => "false".to_string(),
        },
        "e" => return None,
        _ => raw,
    };
    if resolved.trim().is_empty() {
        None
    } else {
        Some(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vals<'a>(v: &'a [&'a str]) -> impl Iterator<Item = &'a str> {
        v.iter().copied()
    }

    #[test]
    fn infers_narrowest_type() {
        assert_eq!(infer_column_type(vals(&["1", "2", "-3"])), ColumnType::BigInt);
        assert_eq!(infer_column_type(vals(&["1", "2.5"])), ColumnType::Double);
        assert_eq!(infer_column_type(vals(&["true", "FALSE"])), ColumnType::Boolean);
        assert_eq!(infer_column_type(vals(&["2024-01-31", ""])), ColumnType::Date);
        assert_eq!(infer_column_type(vals(&["1", "x"])), ColumnType::Varchar);
        assert_eq!(infer_column_type(vals(&["", " "])), ColumnType::Varchar);
        assert_eq!(infer_column_type(vals(&["nan", "inf"])), ColumnType::Varchar);
    }

    #[test]
    fn converts_cells_with_fallback() {
        assert_eq!(convert_cell(Some(" 42 "), ColumnType::BigInt), Cell::Int(42));
        assert_eq!(convert_cell(Some(""), ColumnType::BigInt), Cell::Null);
        assert_eq!(convert_cell(None, ColumnType::Varchar), Cell::Null);
        assert_eq!(convert_cell(Some("True"), ColumnType::Boolean), Cell::Bool(true));
        assert_eq!(
            convert_cell(Some("oops"), ColumnType::Double),
            Cell::Text("oops".to_string())
        );
    }

    #[test]
    fn csv_with_header() {
        let grid = parse_csv(b"a,b\n1,2\n3,4").unwrap();
        assert_eq!(grid.columns, vec!["a", "b"]);
        assert_eq!(grid.rows.len(), 2);
        assert_eq!(grid.infer_types(), vec![ColumnType::BigInt, ColumnType::BigInt]);
    }

    #[test]
    fn csv_without_header_gets_generated_names() {
        let grid = parse_csv(b"1,x\n2,y\n").unwrap();
        assert_eq!(grid.columns, vec!["column0", "column1"]);
        assert_eq!(grid.rows.len(), 2);
    }

    #[test]
    fn csv_ragged_rows_are_padded_and_names_deduped() {
        let grid = parse_csv(b"name,name,\nann,bob,carl,extra\nzed\n").unwrap();
        // Empty header field means the first row is data.
        assert_eq!(grid.columns.len(), 4);
        let grid = parse_csv(b"name,Name,city\nann,bob\n").unwrap();
        assert_eq!(grid.columns, vec!["name", "Name_1", "city"]);
        assert_eq!(grid.rows[0], vec![Some("ann".into()), Some("bob".into()), None]);
    }

    #[test]
    fn empty_csv_is_empty_grid() {
        assert!(parse_csv(b"").unwrap().is_empty());
    }

    #[test]
    fn column_refs() {
        assert_eq!(column_index("A1"), Some(0));
        assert_eq!(column_index("C7"), Some(2));
        assert_eq!(column_index("AA10"), Some(26));
        assert_eq!(column_index("12"), None);
    }

    #[test]
    fn sheet_grid_handles_sparse_and_typed_cells() {
        let xml = br#"<worksheet><sheetData>
            <row r="1"><c r="A1" t="s"><v>0</v></c><c r="C1" t="inlineStr"><is><t>flag</t></is></c></row>
            <row r="2"><c r="A2"><v>7</v></c><c r="C2" t="b"><v>1</v></c></row>
            <row r="3"><c r="B3" t="str"><v>calc</v></c><c r="C3" t="e"><v>#DIV/0!</v></c></row>
        </sheetData></worksheet>"#;
        let grid = read_sheet_grid(xml, &["qty".to_string()]).unwrap();
        assert_eq!(grid.columns, vec!["qty", "column1", "flag"]);
        assert_eq!(grid.rows[0], vec![Some("7".into()), None, Some("true".into())]);
        assert_eq!(grid.rows[1], vec![None, Some("calc".into()), None]);
    }

    #[test]
    fn empty_sheet_is_an_error() {
        let err = read_sheet_grid(b"<worksheet><sheetData/></worksheet>", &[]).unwrap_err();
        assert!(matches!(err, ExtractError::Ooxml(_)));
    }
}
