// 📗 Workbook - provider spreadsheets as an in-memory grid
//
// XLSX files are read straight from the OOXML package (zip + XML):
//   xl/workbook.xml + xl/_rels/workbook.xml.rels → sheet names and parts
//   xl/sharedStrings.xml                          → shared text
//   xl/styles.xml                                 → cell style → fill color
//   xl/worksheets/sheetN.xml                      → cells
// CSV files become a single sheet without fill colors.

use crate::error::{CatalogError, Result};
use crate::price::RawPrice;
use quick_xml::events::{BytesStart, Event};
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Maximum sheets read from one workbook
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells per sheet (avoids unbounded memory)
const XLSX_MAX_CELLS_PER_SHEET: usize = 500_000;
/// Excel's own grid limits (column XFD, row 1,048,576)
const XLSX_MAX_ROWS: usize = 1_048_576;
const XLSX_MAX_COLS: usize = 16_384;
/// Dense cell slots a sparse sheet may expand to
const XLSX_MAX_GRID_SLOTS: usize = 1_000_000;
/// Maximum decompressed bytes per ZIP entry (zip-bomb protection)
const MAX_XML_ENTRY_BYTES: u64 = 64 * 1024 * 1024;

// ============================================================================
// GRID MODEL
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Cell {
    pub value: CellValue,
    /// Fill color as 6-digit uppercase RGB ("FFFF00")
    pub fill: Option<String>,
}

impl Cell {
    pub fn text(value: &str) -> Self {
        Cell {
            value: CellValue::Text(value.to_string()),
            fill: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match &self.value {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Display text. Whole numbers print without a fraction so numeric
    /// product codes (70448801) survive as typed.
    pub fn as_text(&self) -> String {
        match &self.value {
            CellValue::Empty => String::new(),
            CellValue::Text(s) => s.trim().to_string(),
            CellValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            CellValue::Number(n) => n.to_string(),
            CellValue::Bool(b) => (if *b { "TRUE" } else { "FALSE" }).to_string(),
        }
    }

    pub fn raw_price(&self) -> RawPrice {
        match &self.value {
            CellValue::Empty => RawPrice::Empty,
            CellValue::Number(n) => RawPrice::Number(*n),
            CellValue::Text(s) if s.trim().is_empty() => RawPrice::Empty,
            CellValue::Text(s) => RawPrice::Text(s.clone()),
            CellValue::Bool(_) => RawPrice::Text(self.as_text()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Sheet {
    pub name: String,
    /// Dense rows, index = 0-based row number
    pub rows: Vec<Vec<Cell>>,
}

impl Sheet {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn row(&self, idx: usize) -> &[Cell] {
        self.rows.get(idx).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&Cell> {
        self.rows.get(row).and_then(|r| r.get(col))
    }

    pub fn row_text(&self, idx: usize) -> Vec<String> {
        self.row(idx).iter().map(Cell::as_text).collect()
    }

    /// Store a cell, growing the grid as needed. Returns the cell slots added.
    fn place(&mut self, row: usize, col: usize, cell: Cell) -> usize {
        let mut added = 0;
        while self.rows.len() <= row {
            self.rows.push(Vec::new());
        }
        let cells = &mut self.rows[row];
        while cells.len() <= col {
            cells.push(Cell::default());
            added += 1;
        }
        cells[col] = cell;
        added
    }
}

#[derive(Debug, Clone)]
pub struct Workbook {
    pub path: PathBuf,
    pub sheets: Vec<Sheet>,
}

impl Workbook {
    /// Open a spreadsheet file, dispatching on extension (.xlsx / .csv)
    pub fn open(path: &Path) -> Result<Workbook> {
        let bytes = std::fs::read(path).map_err(|source| CatalogError::FileAccess {
            path: path.to_path_buf(),
            source,
        })?;

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "xlsx" => Workbook::from_xlsx_bytes(path, &bytes),
            "csv" => Workbook::from_csv_bytes(path, &bytes),
            other => Err(CatalogError::workbook(
                path,
                format!("unsupported spreadsheet extension '{}'", other),
            )),
        }
    }

    pub fn from_xlsx_bytes(path: &Path, bytes: &[u8]) -> Result<Workbook> {
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
            .map_err(|e| CatalogError::workbook(path, e))?;

        // sharedStrings/styles are optional parts
        let shared_strings = match read_optional_entry(&mut archive, path, "xl/sharedStrings.xml")? {
            Some(xml) => parse_shared_strings(&xml).map_err(|e| CatalogError::workbook(path, e))?,
            None => Vec::new(),
        };
        let styles = match read_optional_entry(&mut archive, path, "xl/styles.xml")? {
            Some(xml) => parse_styles(&xml).map_err(|e| CatalogError::workbook(path, e))?,
            None => StyleTable::default(),
        };

        let parts = list_sheet_parts(&mut archive, path)?;
        let mut sheets = Vec::new();
        for (name, part) in parts.into_iter().take(XLSX_MAX_SHEETS) {
            let xml = read_zip_entry_bounded(&mut archive, path, &part)?;
            let sheet = parse_sheet(&name, &xml, &shared_strings, &styles)
                .map_err(|e| CatalogError::workbook(path, format!("{}: {}", part, e)))?;
            sheets.push(sheet);
        }

        Ok(Workbook {
            path: path.to_path_buf(),
            sheets,
        })
    }

    pub fn from_csv_bytes(path: &Path, bytes: &[u8]) -> Result<Workbook> {
        // Excel writes a UTF-8 BOM in front of CSV exports
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF".as_slice()).unwrap_or(bytes);
        let delimiter = sniff_delimiter(bytes);
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(delimiter)
            .from_reader(bytes);

        let mut sheet = Sheet {
            name: path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("csv")
                .to_string(),
            rows: Vec::new(),
        };

        for (line_num, result) in reader.byte_records().enumerate() {
            let record = result.map_err(|e| {
                CatalogError::workbook(path, format!("line {}: {}", line_num + 1, e))
            })?;
            let row = record
                .iter()
                .map(|field| Cell::text(&String::from_utf8_lossy(field)))
                .collect();
            sheet.rows.push(row);
        }

        Ok(Workbook {
            path: path.to_path_buf(),
            sheets: vec![sheet],
        })
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string()
    }
}

/// ';' is common in es-AR exports; pick whichever separator the first line uses more
fn sniff_delimiter(bytes: &[u8]) -> u8 {
    let first_line = bytes.split(|b| *b == b'\n').next().unwrap_or(&[]);
    let semicolons = first_line.iter().filter(|b| **b == b';').count();
    let commas = first_line.iter().filter(|b| **b == b',').count();
    if semicolons > commas {
        b';'
    } else {
        b','
    }
}

/// "FFFFFF00" (ARGB) or "#ffff00" → "FFFF00"
pub fn normalize_color(raw: &str) -> Option<String> {
    let hex = raw.trim().trim_start_matches('#').to_ascii_uppercase();
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    match hex.len() {
        8 => Some(hex[2..].to_string()),
        6 => Some(hex),
        _ => None,
    }
}

// ============================================================================
// OOXML PARTS
// ============================================================================

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn read_zip_entry_bounded(archive: &mut Archive<'_>, path: &Path, name: &str) -> Result<Vec<u8>> {
    let entry = archive
        .by_name(name)
        .map_err(|e| CatalogError::workbook(path, format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| CatalogError::workbook(path, e))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(CatalogError::workbook(
            path,
            format!("ZIP entry {} exceeds size limit ({} bytes)", name, MAX_XML_ENTRY_BYTES),
        ));
    }
    Ok(out)
}

fn read_optional_entry(archive: &mut Archive<'_>, path: &Path, name: &str) -> Result<Option<Vec<u8>>> {
    if archive.index_for_name(name).is_none() {
        return Ok(None);
    }
    read_zip_entry_bounded(archive, path, name).map(Some)
}

/// (sheet name, part path) in workbook order. Falls back to the sheetN.xml
/// parts in numeric order when workbook.xml cannot be resolved.
fn list_sheet_parts(archive: &mut Archive<'_>, path: &Path) -> Result<Vec<(String, String)>> {
    let declared = match (
        read_optional_entry(archive, path, "xl/workbook.xml")?,
        read_optional_entry(archive, path, "xl/_rels/workbook.xml.rels")?,
    ) {
        (Some(workbook), Some(rels)) => {
            let sheets = parse_workbook_sheets(&workbook).map_err(|e| CatalogError::workbook(path, e))?;
            let targets = parse_relationships(&rels).map_err(|e| CatalogError::workbook(path, e))?;
            sheets
                .into_iter()
                .filter_map(|(name, rid)| {
                    targets.get(&rid).map(|target| (name, resolve_part(target)))
                })
                .filter(|(_, part)| archive.index_for_name(part).is_some())
                .collect::<Vec<_>>()
        }
        _ => Vec::new(),
    };
    if !declared.is_empty() {
        return Ok(declared);
    }

    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches("xl/worksheets/sheet")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    if names.is_empty() {
        return Err(CatalogError::workbook(path, "no worksheets found"));
    }
    Ok(names
        .into_iter()
        .enumerate()
        .map(|(i, part)| (format!("Sheet{}", i + 1), part))
        .collect())
}

fn resolve_part(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{}", target),
    }
}

fn attr(e: &BytesStart<'_>, local: &[u8]) -> Option<String> {
    e.attributes().flatten().find_map(|a| {
        if a.key.local_name().as_ref() == local {
            a.unescape_value().ok().map(|v| v.into_owned())
        } else {
            None
        }
    })
}

fn parse_workbook_sheets(xml: &[u8]) -> std::result::Result<Vec<(String, String)>, quick_xml::Error> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut sheets = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                if let (Some(name), Some(rid)) = (attr(&e, b"name"), attr(&e, b"id")) {
                    sheets.push((name, rid));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(sheets)
}

fn parse_relationships(xml: &[u8]) -> std::result::Result<HashMap<String, String>, quick_xml::Error> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut targets = HashMap::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                if let (Some(id), Some(target)) = (attr(&e, b"Id"), attr(&e, b"Target")) {
                    targets.insert(id, target);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(targets)
}

/// Each <si> becomes one string; rich-text runs are concatenated and
/// phonetic hints (<rPh>) skipped.
fn parse_shared_strings(xml: &[u8]) -> std::result::Result<Vec<String>, quick_xml::Error> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut strings = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    let mut in_phonetic = false;
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"rPh" => in_phonetic = true,
                b"t" => in_t = true,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Event::Text(te) if in_t && !in_phonetic => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&te.unescape()?);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"si" => strings.push(current.take().unwrap_or_default()),
                b"rPh" => in_phonetic = false,
                b"t" => in_t = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

// ============================================================================
// STYLES
// ============================================================================

#[derive(Debug, Default)]
struct StyleTable {
    /// fills[fillId] → RGB of a non-empty pattern fill
    fills: Vec<Option<String>>,
    /// cell_xfs[s] → fillId
    cell_xfs: Vec<usize>,
}

impl StyleTable {
    fn fill_for_style(&self, style: usize) -> Option<String> {
        let fill_id = *self.cell_xfs.get(style)?;
        self.fills.get(fill_id).cloned().flatten()
    }
}

fn parse_styles(xml: &[u8]) -> std::result::Result<StyleTable, quick_xml::Error> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut table = StyleTable::default();
    let mut in_fills = false;
    let mut in_cell_xfs = false;
    let mut pattern_none = false;
    loop {
        let event = reader.read_event_into(&mut buf)?;
        let (start, is_empty) = match &event {
            Event::Start(e) => (Some(e.clone()), false),
            Event::Empty(e) => (Some(e.clone()), true),
            _ => (None, false),
        };

        if let Some(e) = start {
            match e.local_name().as_ref() {
                b"fills" if !is_empty => in_fills = true,
                b"cellXfs" if !is_empty => in_cell_xfs = true,
                b"fill" if in_fills => {
                    table.fills.push(None);
                    pattern_none = false;
                }
                b"patternFill" if in_fills => {
                    pattern_none = attr(&e, b"patternType").map_or(true, |p| p == "none");
                }
                b"fgColor" if in_fills && !pattern_none => {
                    if let (Some(slot), Some(rgb)) = (table.fills.last_mut(), attr(&e, b"rgb")) {
                        *slot = normalize_color(&rgb);
                    }
                }
                b"xf" if in_cell_xfs => {
                    let fill_id = attr(&e, b"fillId")
                        .and_then(|v| v.parse::<usize>().ok())
                        .unwrap_or(0);
                    table.cell_xfs.push(fill_id);
                }
                _ => {}
            }
        }

        match event {
            Event::End(e) => match e.local_name().as_ref() {
                b"fills" => in_fills = false,
                b"cellXfs" => in_cell_xfs = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(table)
}

// ============================================================================
// WORKSHEETS
// ============================================================================

#[derive(Debug, thiserror::Error)]
enum SheetError {
    #[error(transparent)]
    Xml(#[from] quick_xml::Error),

    #[error("cell reference '{0}' is outside the worksheet grid")]
    OutOfRange(String),

    #[error("sparse cell layout exceeds the grid slot limit")]
    GridTooLarge,
}

/// "AB12" → (row 11, col 27), both 0-based. `Ok(None)` for references that
/// are not letters-then-digits, which fall back to the cell's position.
fn parse_cell_ref(reference: &str) -> std::result::Result<Option<(usize, usize)>, SheetError> {
    let split = reference
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(reference.len());
    let (letters, digits) = reference.split_at(split);
    if letters.is_empty() {
        return Ok(None);
    }
    let Some(row) = parse_row_number(digits, reference)? else {
        return Ok(None);
    };
    let col = letters
        .bytes()
        .try_fold(0usize, |acc, b| {
            acc.checked_mul(26)?
                .checked_add(usize::from(b.to_ascii_uppercase() - b'A') + 1)
        })
        .filter(|col| *col <= XLSX_MAX_COLS)
        .ok_or_else(|| SheetError::OutOfRange(reference.to_string()))?;
    Ok(Some((row, col - 1)))
}

/// 1-based row number → 0-based index. Non-numeric or zero is `Ok(None)`.
fn parse_row_number(digits: &str, reference: &str) -> std::result::Result<Option<usize>, SheetError> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(None);
    }
    match digits.parse::<usize>() {
        Ok(0) => Ok(None),
        Ok(row) if row <= XLSX_MAX_ROWS => Ok(Some(row - 1)),
        _ => Err(SheetError::OutOfRange(reference.to_string())),
    }
}

struct PendingCell {
    row: usize,
    col: usize,
    kind: Option<String>,
    fill: Option<String>,
    text: String,
}

impl PendingCell {
    fn finish(self, shared_strings: &[String]) -> Cell {
        let raw = self.text;
        let value = match self.kind.as_deref() {
            _ if raw.is_empty() => CellValue::Empty,
            Some("s") => raw
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|i| shared_strings.get(i))
                .map(|s| CellValue::Text(s.clone()))
                .unwrap_or(CellValue::Empty),
            Some("b") => CellValue::Bool(raw.trim() == "1"),
            Some("inlineStr") | Some("str") | Some("e") => CellValue::Text(raw),
            _ => match raw.trim().parse::<f64>() {
                Ok(n) => CellValue::Number(n),
                Err(_) => CellValue::Text(raw),
            },
        };
        Cell {
            value,
            fill: self.fill,
        }
    }
}

fn parse_sheet(
    name: &str,
    xml: &[u8],
    shared_strings: &[String],
    styles: &StyleTable,
) -> std::result::Result<Sheet, SheetError> {
    let mut sheet = Sheet {
        name: name.to_string(),
        rows: Vec::new(),
    };
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();

    let mut row_idx = 0usize;
    let mut next_col = 0usize;
    let mut pending: Option<PendingCell> = None;
    let mut in_value = false;
    let mut cell_count = 0usize;
    let mut grid_slots = 0usize;

    loop {
        if cell_count >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"row" => {
                row_idx = match attr(&e, b"r") {
                    Some(r) => parse_row_number(r.trim(), &r)?.unwrap_or(sheet.rows.len()),
                    None => sheet.rows.len(),
                };
                next_col = 0;
            }
            Event::Start(e) if e.local_name().as_ref() == b"c" => {
                pending = Some(start_cell(&e, row_idx, next_col, styles)?);
            }
            Event::Empty(e) if e.local_name().as_ref() == b"c" => {
                let cell = start_cell(&e, row_idx, next_col, styles)?;
                next_col = cell.col + 1;
                let (row, col) = (cell.row, cell.col);
                grid_slots += sheet.place(row, col, cell.finish(shared_strings));
                cell_count += 1;
            }
            Event::Start(e) if matches!(e.local_name().as_ref(), b"v" | b"t") => {
                in_value = pending.is_some();
            }
            Event::Text(te) if in_value => {
                if let Some(cell) = pending.as_mut() {
                    cell.text.push_str(&te.unescape()?);
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    if let Some(cell) = pending.take() {
                        next_col = cell.col + 1;
                        let (row, col) = (cell.row, cell.col);
                        grid_slots += sheet.place(row, col, cell.finish(shared_strings));
                        cell_count += 1;
                    }
                }
                b"row" => {
                    // rows with no cells still occupy their index
                    while sheet.rows.len() <= row_idx {
                        sheet.rows.push(Vec::new());
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        if grid_slots > XLSX_MAX_GRID_SLOTS {
            return Err(SheetError::GridTooLarge);
        }
        buf.clear();
    }
    Ok(sheet)
}

fn start_cell(
    e: &BytesStart<'_>,
    row_idx: usize,
    next_col: usize,
    styles: &StyleTable,
) -> std::result::Result<PendingCell, SheetError> {
    let reference = match attr(e, b"r") {
        Some(r) => parse_cell_ref(&r)?,
        None => None,
    };
    let (row, col) = reference.unwrap_or((row_idx, next_col));
    let fill = attr(e, b"s")
        .and_then(|s| s.parse::<usize>().ok())
        .and_then(|s| styles.fill_for_style(s));
    Ok(PendingCell {
        row,
        col,
        kind: attr(e, b"t"),
        fill,
        text: String::new(),
    })
}

// ============================================================================
// TEST FIXTURES
// ============================================================================


// ============================================================================
// TESTS
// ============================================================================
