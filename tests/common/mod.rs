// Shared fixtures for integration tests: a catalog folder layout on disk,
// a config file pointing at it, and a minimal XLSX writer.

#![allow(dead_code)]

use catalog_search::{setup_database, sync_providers, CatalogConfig};
use rusqlite::Connection;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const CONFIG: &str = r#"
[storage]
database = "catalog.db"

[storage.owner_folders]
ricky = "ricky"
ferreteria = "ferreteria"

[[providers]]
key = "chiesa"
display_name = "Chiesa"
owner = "ricky"
header_row_offset = 1
code_aliases = ["codigo", "cod. art"]
name_aliases = ["descripcion"]
price_aliases = ["precio"]

[[providers]]
key = "bahco"
display_name = "Bahco"
owner = "ferreteria"
code_aliases = ["codigo"]
name_aliases = ["articulo"]

[providers.color_override]
target_color = "FFFFFF00"
candidate_columns = ["contado", "lista"]
"#;

pub struct TestCatalog {
    pub dir: TempDir,
    pub config: CatalogConfig,
    pub conn: Connection,
}

impl TestCatalog {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("ricky")).unwrap();
        fs::create_dir_all(dir.path().join("ferreteria")).unwrap();

        let config_path = dir.path().join("catalog.toml");
        fs::write(&config_path, CONFIG).unwrap();
        let config = CatalogConfig::load(&config_path).unwrap();

        let conn = Connection::open(&config.storage.database).unwrap();
        setup_database(&conn).unwrap();
        sync_providers(&conn, &config).unwrap();

        TestCatalog { dir, config, conn }
    }

    pub fn folder(&self, owner: &str) -> PathBuf {
        self.dir.path().join(owner)
    }
}

/// (value, ARGB fill). Values starting with '=' are numeric cells.
pub type Cell<'a> = (&'a str, Option<&'a str>);

pub fn plain<'a>(values: &[&'a str]) -> Vec<Cell<'a>> {
    values.iter().map(|v| (*v, None)).collect()
}

/// Single-sheet XLSX with inline strings; fills get one style each
pub fn write_xlsx(path: &Path, rows: &[Vec<Cell<'_>>]) {
    let mut fills: Vec<&str> = Vec::new();
    let mut sheet = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?><worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
    );
    for (r, row) in rows.iter().enumerate() {
        sheet.push_str(&format!(r#"<row r="{}">"#, r + 1));
        for (c, (value, fill)) in row.iter().enumerate() {
            let reference = format!("{}{}", (b'A' + c as u8) as char, r + 1);
            let style = match fill {
                Some(argb) => {
                    let idx = fills.iter().position(|f| f == argb).unwrap_or_else(|| {
                        fills.push(*argb);
                        fills.len() - 1
                    });
                    format!(r#" s="{}""#, idx + 1)
                }
                None => String::new(),
            };
            if value.is_empty() {
                continue;
            }
            match value.strip_prefix('=') {
                Some(number) => sheet.push_str(&format!(r#"<c r="{}"{}><v>{}</v></c>"#, reference, style, number)),
                None => sheet.push_str(&format!(
                    r#"<c r="{}"{} t="inlineStr"><is><t>{}</t></is></c>"#,
                    reference, style, value
                )),
            }
        }
        sheet.push_str("</row>");
    }
    sheet.push_str("</sheetData></worksheet>");

    let mut styles = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?><styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><fills><fill><patternFill patternType="none"/></fill><fill><patternFill patternType="gray125"/></fill>"#,
    );
    for argb in &fills {
        styles.push_str(&format!(
            r#"<fill><patternFill patternType="solid"><fgColor rgb="{}"/></patternFill></fill>"#,
            argb
        ));
    }
    styles.push_str(r#"</fills><cellXfs><xf fillId="0"/>"#);
    for i in 0..fills.len() {
        styles.push_str(&format!(r#"<xf fillId="{}" applyFill="1"/>"#, i + 2));
    }
    styles.push_str("</cellXfs></styleSheet>");

    let file = fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    for (name, content) in [("xl/worksheets/sheet1.xml", sheet), ("xl/styles.xml", styles)] {
        zip.start_file(name, zip::write::SimpleFileOptions::default()).unwrap();
        zip.write_all(content.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
}
