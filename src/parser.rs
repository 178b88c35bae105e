// 🏗️ Spreadsheet Catalog Reader - one provider's external price lists
//
// Every provider ships a different layout. The reader is driven entirely by
// that provider's SpreadsheetSourceConfig: header offset, column aliases,
// optional color-coded price rule. Nothing here is provider-specific code.
//
// Failure policy: a bad row, sheet or file is logged and skipped; the
// caller gets whatever rows succeeded.

use crate::columns::{looks_like_header, resolve, ColumnRoles};
use crate::config::SpreadsheetSourceConfig;
use crate::error::{CatalogError, Result};
use crate::model::{CatalogEntry, CatalogQuery, CatalogSource, SourceKind, SourceRef};
use crate::normalize::{normalize, ProviderKey};
use crate::workbook::{Sheet, Workbook};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// Extensions the file locator accepts
pub const SPREADSHEET_EXTENSIONS: &[&str] = &["xlsx", "csv"];

// ============================================================================
// SHEET LAYOUT
// ============================================================================

/// Where the data lives in one sheet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetLayout {
    pub header_row: usize,
    pub roles: ColumnRoles,
    /// Color-override mode: candidate price columns, in configured order
    pub color_candidates: Vec<usize>,
}

// ============================================================================
// READER
// ============================================================================

pub struct SpreadsheetCatalogReader<'a> {
    config: &'a SpreadsheetSourceConfig,
    header_scan_rows: usize,
    target_color: Option<String>,
}

impl<'a> SpreadsheetCatalogReader<'a> {
    pub fn new(config: &'a SpreadsheetSourceConfig, header_scan_rows: usize) -> Self {
        SpreadsheetCatalogReader {
            config,
            header_scan_rows,
            target_color: config.color_override.as_ref().and_then(|r| r.target_rgb()),
        }
    }

    /// Best-effort read: failures are logged, never returned
    pub fn read(&self, path: &Path, query: &CatalogQuery) -> Vec<CatalogEntry> {
        match self.try_read(path, query) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "spreadsheet skipped");
                Vec::new()
            }
        }
    }

    /// Read one file. Errors when the file cannot be opened or when no sheet
    /// has the required columns.
    pub fn try_read(&self, path: &Path, query: &CatalogQuery) -> Result<Vec<CatalogEntry>> {
        let workbook = Workbook::open(path)?;
        self.read_workbook(&workbook, query)
    }

    pub fn read_workbook(&self, workbook: &Workbook, query: &CatalogQuery) -> Result<Vec<CatalogEntry>> {
        let file = workbook.file_name();
        let mut entries = Vec::new();
        let mut first_error = None;
        let mut readable_sheets = 0;

        for sheet in &workbook.sheets {
            match self.read_sheet(&file, sheet, query) {
                Ok(rows) => {
                    readable_sheets += 1;
                    entries.extend(rows);
                }
                Err(e) => {
                    tracing::warn!(file = %file, sheet = %sheet.name, error = %e, "sheet skipped");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) if readable_sheets == 0 => Err(e),
            _ => {
                tracing::debug!(file = %file, matched = entries.len(), "spreadsheet read");
                Ok(entries)
            }
        }
    }

    fn read_sheet(&self, file: &str, sheet: &Sheet, query: &CatalogQuery) -> Result<Vec<CatalogEntry>> {
        let layout = self.locate_layout(file, sheet)?;
        let mut entries = Vec::new();

        for row in (layout.header_row + 1)..sheet.row_count() {
            match self.read_row(file, sheet, row, &layout, query) {
                RowOutcome::Entry(entry) => entries.push(*entry),
                RowOutcome::Skip => {}
                RowOutcome::NoColoredPrice => {
                    tracing::trace!(file = %file, sheet = %sheet.name, row = row + 1, "no colored price cell");
                }
            }
        }

        Ok(entries)
    }

    fn read_row(
        &self,
        file: &str,
        sheet: &Sheet,
        row: usize,
        layout: &SheetLayout,
        query: &CatalogQuery,
    ) -> RowOutcome {
        let text_at = |col: Option<usize>| {
            col.and_then(|c| sheet.cell(row, c))
                .map(|cell| cell.as_text())
                .unwrap_or_default()
        };

        let name = text_at(layout.roles.name);
        if name.is_empty() {
            return RowOutcome::Skip;
        }
        let code = Some(text_at(layout.roles.code)).filter(|c| !c.is_empty());

        if !query.text_matches(code.as_deref(), &[&name]) {
            return RowOutcome::Skip;
        }

        let price_cell = match &self.target_color {
            // Row-inclusion filter, not a fallback price source
            Some(target) => match layout
                .color_candidates
                .iter()
                .filter_map(|c| sheet.cell(row, *c))
                .find(|cell| cell.fill.as_deref() == Some(target.as_str()))
            {
                Some(cell) => Some(cell),
                None => return RowOutcome::NoColoredPrice,
            },
            None => layout.roles.price.and_then(|c| sheet.cell(row, c)),
        };
        let raw = price_cell.map(|c| c.raw_price()).unwrap_or_default();

        let entry = CatalogEntry::new(
            name,
            self.config.display_name(),
            self.config.owner,
            SourceRef::Spreadsheet {
                file: file.to_string(),
                sheet: sheet.name.clone(),
                row: row + 1,
            },
        )
        .with_code(code)
        .with_price(&raw);

        if entry.price_raw_text.is_some() {
            tracing::debug!(file = %file, sheet = %sheet.name, row = row + 1, "unparseable price");
        }
        RowOutcome::Entry(Box::new(entry))
    }

    /// Resolve columns at the configured header offset; when code/name don't
    /// resolve there, rescan the first rows for something that looks like a
    /// header and retry with that offset.
    pub fn locate_layout(&self, file: &str, sheet: &Sheet) -> Result<SheetLayout> {
        let cfg = self.config;
        let roles_at = |row: usize| {
            ColumnRoles::resolve(
                &sheet.row_text(row),
                &cfg.code_aliases,
                &cfg.name_aliases,
                &cfg.price_aliases,
            )
        };

        let mut header_row = cfg.header_row_offset;
        let mut roles = roles_at(header_row);

        if !roles.is_complete() {
            let hints: Vec<&String> = cfg
                .code_aliases
                .iter()
                .chain(&cfg.name_aliases)
                .collect();
            let scan = self.header_scan_rows.min(sheet.row_count());
            let candidates: Vec<(usize, ColumnRoles)> = (0..scan)
                .filter(|r| *r != header_row)
                .filter(|r| looks_like_header(&sheet.row_text(*r), &hints))
                .map(|r| (r, roles_at(r)))
                .filter(|(_, found)| found.name.is_some())
                .collect();

            let better = candidates
                .iter()
                .find(|(_, found)| found.is_complete())
                .or_else(|| candidates.first().filter(|_| roles.name.is_none()));
            if let Some((row, found)) = better {
                tracing::debug!(file = %file, sheet = %sheet.name, from = header_row, to = *row, "header row rescanned");
                header_row = *row;
                roles = found.clone();
            }
        }

        let missing = |role: &'static str| CatalogError::MissingRequiredColumn {
            file: file.to_string(),
            sheet: sheet.name.clone(),
            role,
        };

        if roles.name.is_none() {
            return Err(missing("name"));
        }

        let color_candidates = match &cfg.color_override {
            Some(rule) => {
                let headers = sheet.row_text(header_row);
                let mut cols: Vec<usize> = Vec::new();
                for alias in &rule.candidate_columns {
                    if let Some(col) = resolve(&headers, std::slice::from_ref(alias)) {
                        if !cols.contains(&col) {
                            cols.push(col);
                        }
                    }
                }
                if cols.is_empty() {
                    return Err(missing("price"));
                }
                cols
            }
            None => {
                if roles.price.is_none() {
                    return Err(missing("price"));
                }
                Vec::new()
            }
        };

        Ok(SheetLayout {
            header_row,
            roles,
            color_candidates,
        })
    }
}

enum RowOutcome {
    Entry(Box<CatalogEntry>),
    Skip,
    NoColoredPrice,
}

// ============================================================================
// FILE LOCATOR
// ============================================================================

/// Files in `folder` whose name starts with the provider key (normalized,
/// so case and accents don't matter), with a spreadsheet extension, that
/// are neither the reserved manual-products file nor Office lock files.
pub fn locate_provider_files(folder: &Path, key: &ProviderKey, reserved_name: &str) -> Result<Vec<PathBuf>> {
    let dir = std::fs::read_dir(folder).map_err(|source| CatalogError::FileAccess {
        path: folder.to_path_buf(),
        source,
    })?;
    let reserved = normalize(reserved_name);

    let mut files = Vec::new();
    for entry in dir {
        let entry = entry.map_err(|source| CatalogError::FileAccess {
            path: folder.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if file_name.starts_with("~$") || normalize(file_name) == reserved {
            continue;
        }
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        if !SPREADSHEET_EXTENSIONS.contains(&ext.as_str()) {
            continue;
        }
        if normalize(file_name).starts_with(key.as_str()) {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

/// Last modification time of a file, if the platform reports one
pub fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

// ============================================================================
// SPREADSHEET SOURCE (one provider, one owner folder)
// ============================================================================

pub struct SpreadsheetSource<'a> {
    config: &'a SpreadsheetSourceConfig,
    folder: &'a Path,
    reserved_name: &'a str,
    header_scan_rows: usize,
}

impl<'a> SpreadsheetSource<'a> {
    pub fn new(
        config: &'a SpreadsheetSourceConfig,
        folder: &'a Path,
        reserved_name: &'a str,
        header_scan_rows: usize,
    ) -> Self {
        SpreadsheetSource {
            config,
            folder,
            reserved_name,
            header_scan_rows,
        }
    }

    pub fn config(&self) -> &SpreadsheetSourceConfig {
        self.config
    }

    pub fn files(&self) -> Result<Vec<PathBuf>> {
        locate_provider_files(self.folder, &self.config.provider_key(), self.reserved_name)
    }

    /// Any file modified after `since` (any file at all when None)
    pub fn has_files_since(&self, since: Option<DateTime<Utc>>) -> bool {
        let Ok(files) = self.files() else {
            return false;
        };
        match since {
            None => !files.is_empty(),
            Some(since) => files
                .iter()
                .filter_map(|f| modified_at(f))
                .any(|modified| modified > since),
        }
    }
}

impl CatalogSource for SpreadsheetSource<'_> {
    fn label(&self) -> String {
        format!("spreadsheet:{}:{}", self.config.provider_key(), self.config.owner)
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Spreadsheet
    }

    /// Reads every matching file. Fails only when files exist and none of
    /// them could be read.
    fn query(&self, query: &CatalogQuery) -> Result<Vec<CatalogEntry>> {
        let files = self.files()?;
        let reader = SpreadsheetCatalogReader::new(self.config, self.header_scan_rows);

        let mut entries = Vec::new();
        let mut first_error = None;
        let mut read_ok = 0;
        for file in &files {
            match reader.try_read(file, query) {
                Ok(rows) => {
                    read_ok += 1;
                    entries.extend(rows);
                }
                Err(e) => {
                    tracing::warn!(file = %file.display(), error = %e, "spreadsheet skipped");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) if read_ok == 0 => Err(e),
            _ => Ok(entries),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
