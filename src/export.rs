//! Dataset encoders: CSV, JSON and SpreadsheetML 2003

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

use crate::error::ExportError;
use crate::extractors::{Row, ScalarValue};

const SPREADSHEET_NS: &str = "urn:schemas-microsoft-com:office:spreadsheet";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
    /// Excel 2003 XML; opens in Excel and LibreOffice
    Spreadsheet,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
            ExportFormat::Spreadsheet => "xls",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv",
            ExportFormat::Json => "application/json",
            ExportFormat::Spreadsheet => "application/vnd.ms-excel",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
            ExportFormat::Spreadsheet => "spreadsheet",
        })
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            "spreadsheet" | "xls" | "excel" | "xml" => Ok(ExportFormat::Spreadsheet),
            other => Err(format!("unknown export format '{}'", other)),
        }
    }
}

/// Every column appearing in `rows`, in first-seen order
pub fn columns_of(rows: &[Row]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for row in rows {
        for column in row.columns() {
            if !columns.iter().any(|c| c == column) {
                columns.push(column.to_string());
            }
        }
    }
    columns
}

/// Encode `rows` in `format`; `columns` fixes the column order for tabular formats
pub fn export(rows: &[Row], columns: &[String], format: ExportFormat) -> Result<String, ExportError> {
    match format {
        ExportFormat::Csv => to_csv(rows, columns),
        ExportFormat::Json => to_json(rows),
        ExportFormat::Spreadsheet => to_spreadsheet_xml(rows, columns),
    }
}

fn cell_text(row: &Row, column: &str) -> String {
    row.get(column).map(ScalarValue::to_string).unwrap_or_default()
}

/// Header row, then one record per row; missing cells are empty
pub fn to_csv(rows: &[Row], columns: &[String]) -> Result<String, ExportError> {
    if columns.is_empty() {
        return Ok(String::new());
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(columns)?;
    for row in rows {
        writer.write_record(columns.iter().map(|column| cell_text(row, column)))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| ExportError::Csv(e.into_error().into()))?;
    Ok(String::from_utf8(bytes)?)
}

/// Pretty-printed array of row objects
pub fn to_json(rows: &[Row]) -> Result<String, ExportError> {
    Ok(serde_json::to_string_pretty(rows)?)
}

fn emit(writer: &mut Writer<Cursor<Vec<u8>>>, event: Event<'_>) -> Result<(), ExportError> {
    writer
        .write_event(event)
        .map_err(|e| ExportError::Xml(e.to_string()))
}

/// A finite number after trimming
fn numeric(text: &str) -> bool {
    text.trim().parse::<f64>().is_ok_and(f64::is_finite)
}

fn write_cell(writer: &mut Writer<Cursor<Vec<u8>>>, text: &str) -> Result<(), ExportError> {
    let (kind, text) = if numeric(text) {
        ("Number", text.trim())
    } else {
        ("String", text)
    };

    emit(writer, Event::Start(BytesStart::new("Cell")))?;
    let mut data = BytesStart::new("Data");
    data.push_attribute(("ss:Type", kind));
    emit(writer, Event::Start(data))?;
    emit(writer, Event::Text(BytesText::new(text)))?;
    emit(writer, Event::End(BytesEnd::new("Data")))?;
    emit(writer, Event::End(BytesEnd::new("Cell")))
}

fn write_row<'a>(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    cells: impl IntoIterator<Item = &'a str>,
) -> Result<(), ExportError> {
    emit(writer, Event::Start(BytesStart::new("Row")))?;
    for cell in cells {
        write_cell(writer, cell)?;
    }
    emit(writer, Event::End(BytesEnd::new("Row")))
}

/// Single-worksheet SpreadsheetML 2003 workbook: header row, then data rows
pub fn to_spreadsheet_xml(rows: &[Row], columns: &[String]) -> Result<String, ExportError> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 1);

    emit(&mut writer, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut workbook = BytesStart::new("Workbook");
    workbook.push_attribute(("xmlns", SPREADSHEET_NS));
    workbook.push_attribute(("xmlns:ss", SPREADSHEET_NS));
    emit(&mut writer, Event::Start(workbook))?;

    let mut worksheet = BytesStart::new("Worksheet");
    worksheet.push_attribute(("ss:Name", "Data"));
    emit(&mut writer, Event::Start(worksheet))?;
    emit(&mut writer, Event::Start(BytesStart::new("Table")))?;

    write_row(&mut writer, columns.iter().map(String::as_str))?;
    for row in rows {
        let cells: Vec<String> = columns.iter().map(|column| cell_text(row, column)).collect();
        write_row(&mut writer, cells.iter().map(String::as_str))?;
    }

    emit(&mut writer, Event::End(BytesEnd::new("Table")))?;
    emit(&mut writer, Event::End(BytesEnd::new("Worksheet")))?;
    emit(&mut writer, Event::End(BytesEnd::new("Workbook")))?;

    Ok(String::from_utf8(writer.into_inner().into_inner())?)
}
