//! Table reader — yields rows of an uploaded table in fixed-size chunks so the
//! pipeline never has to materialise more than one window of `Row`s.

use std::io::Cursor;
use std::path::Path;

use bytes::Bytes;
use calamine::{open_workbook_auto_from_rs, Data, Range, Reader};
use csv::StringRecord;

use crate::table::{Cell, Row, TableError, TableFormat};

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0];

/// Picks the codec for an upload: extension first, then content sniffing.
/// Anything that is not recognisably a workbook is read as CSV.
pub fn detect_format(filename: Option<&str>, bytes: &[u8]) -> TableFormat {
    let extension = filename
        .and_then(|f| Path::new(f).extension())
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("csv") | Some("txt") => TableFormat::Csv,
        Some("xlsx") | Some("xlsm") | Some("xls") | Some("xlsb") | Some("ods") => {
            TableFormat::Workbook
        }
        _ if bytes.starts_with(ZIP_MAGIC) || bytes.starts_with(OLE_MAGIC) => TableFormat::Workbook,
        _ => TableFormat::Csv,
    }
}

/// Counts data rows, validating every record on the way.
pub fn count_rows(bytes: Bytes, format: TableFormat) -> Result<usize, TableError> {
    let mut reader = TableReader::open(bytes, format)?;
    let mut total = 0;
    while let Some(chunk) = reader.next_chunk(1024)? {
        total += chunk.len();
    }
    Ok(total)
}

pub struct TableReader {
    columns: Vec<String>,
    source: RowSource,
}

enum RowSource {
    Csv {
        reader: csv::Reader<Cursor<Bytes>>,
        record: StringRecord,
    },
    Workbook {
        range: Range<Data>,
        cursor: usize,
        /// One past the last row with content; trailing blank rows are dropped.
        end: usize,
    },
}

impl TableReader {
    /// Opens the table and reads its header row.
    pub fn open(bytes: Bytes, format: TableFormat) -> Result<Self, TableError> {
        let (columns, source) = match format {
            TableFormat::Csv => open_csv(bytes)?,
            TableFormat::Workbook => open_workbook(bytes)?,
        };

        if columns.is_empty() || columns.iter().all(|c| c.trim().is_empty()) {
            return Err(TableError::Parse(
                "The table has no header row".to_string(),
            ));
        }

        Ok(Self { columns, source })
    }

    /// Header names in table order, exactly as given in the file.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Reads up to `size` rows. Returns `None` once the table is exhausted.
    pub fn next_chunk(&mut self, size: usize) -> Result<Option<Vec<Row>>, TableError> {
        let size = size.max(1);
        let width = self.columns.len();
        let mut rows = Vec::with_capacity(size);

        match &mut self.source {
            RowSource::Csv { reader, record } => {
                while rows.len() < size {
                    if !reader.read_record(record).map_err(csv_error)? {
                        break;
                    }
                    if record.len() > width {
                        return Err(too_many_fields(record, width));
                    }
                    // Short rows are padded; exports often drop trailing empty fields.
                    let mut cells: Vec<Cell> = record
                        .iter()
                        .map(|field| {
                            if field.is_empty() {
                                Cell::Empty
                            } else {
                                Cell::Text(field.to_string())
                            }
                        })
                        .collect();
                    cells.resize(width, Cell::Empty);
                    rows.push(Row::new(cells));
                }
            }
            RowSource::Workbook { range, cursor, end } => {
                // Blank rows between data rows are kept so every row gets a record.
                while rows.len() < size && *cursor < *end {
                    let cells: Vec<Cell> = (0..width)
                        .map(|col| range.get((*cursor, col)).map_or(Cell::Empty, cell_from_data))
                        .collect();
                    *cursor += 1;
                    rows.push(Row::new(cells));
                }
            }
        }

        if rows.is_empty() {
            Ok(None)
        } else {
            Ok(Some(rows))
        }
    }
}

fn open_csv(bytes: Bytes) -> Result<(Vec<String>, RowSource), TableError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(Cursor::new(bytes));

    let columns = reader
        .headers()
        .map_err(csv_error)?
        .iter()
        .enumerate()
        .map(|(i, h)| {
            if i == 0 {
                h.trim_start_matches('\u{feff}').to_string()
            } else {
                h.to_string()
            }
        })
        .collect();

    Ok((
        columns,
        RowSource::Csv {
            reader,
            record: StringRecord::new(),
        },
    ))
}

fn open_workbook(bytes: Bytes) -> Result<(Vec<String>, RowSource), TableError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
        .map_err(|e| TableError::Parse(format!("Unable to open the workbook: {e}")))?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| TableError::Parse("The workbook does not contain any worksheets".to_string()))?;

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| TableError::Parse(format!("Unable to read worksheet '{sheet_name}': {e}")))?;

    // The header is the first row with any content; leading blank rows are skipped.
    let mut cursor = 0;
    while cursor < range.height() && row_is_blank(&range, cursor) {
        cursor += 1;
    }
    if cursor >= range.height() {
        return Err(TableError::Parse(format!(
            "Worksheet '{sheet_name}' is empty"
        )));
    }

    let columns = (0..range.width())
        .map(|col| match range.get((cursor, col)) {
            Some(Data::Empty) | None => String::new(),
            Some(data) => data.to_string(),
        })
        .collect();

    let mut end = range.height();
    while end > cursor + 1 && row_is_blank(&range, end - 1) {
        end -= 1;
    }

    Ok((
        columns,
        RowSource::Workbook {
            range,
            cursor: cursor + 1,
            end,
        },
    ))
}

fn row_is_blank(range: &Range<Data>, row: usize) -> bool {
    (0..range.width()).all(|col| matches!(range.get((row, col)), Some(Data::Empty) | None))
}

fn cell_from_data(data: &Data) -> Cell {
    match data {
        Data::Empty => Cell::Empty,
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Float(f) => Cell::Number(*f),
        Data::String(s) if s.is_empty() => Cell::Empty,
        Data::String(s) => Cell::Text(s.clone()),
        other => Cell::Text(other.to_string()),
    }
}

fn too_many_fields(record: &StringRecord, width: usize) -> TableError {
    let detail = format!(
        "row has {} fields but the header has {width}",
        record.len()
    );
    match record.position() {
        Some(position) => TableError::Parse(format!("CSV line {}: {detail}", position.line())),
        None => TableError::Parse(format!("CSV: {detail}")),
    }
}

fn csv_error(err: csv::Error) -> TableError {
    let line = err.position().map(|p| p.line());
    let detail = match err.kind() {
        csv::ErrorKind::UnequalLengths {
            expected_len, len, ..
        } => format!("row has {len} fields but the header has {expected_len}"),
        csv::ErrorKind::Utf8 { .. } => "file is not valid UTF-8".to_string(),
        _ => err.to_string(),
    };
    match line {
        Some(line) => TableError::Parse(format!("CSV line {line}: {detail}")),
        None => TableError::Parse(format!("CSV: {detail}")),
    }
}
