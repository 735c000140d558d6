//! Workbook writer — one sheet: the input columns in their original order plus
//! exactly one appended generated-text column.
//!
//! Rows are written as they arrive so callers can stream chunk by chunk; the
//! finished workbook is returned as an in-memory buffer, never written to disk.

use rust_xlsxwriter::{ColNum, Format, Workbook, Worksheet};

use crate::table::{Cell, Row, TableError};

const SHEET_NAME: &str = "Outreach";
const GENERATED_COLUMN_WIDTH: f64 = 80.0;

pub struct SheetWriter {
    worksheet: Worksheet,
    width: ColNum,
    next_row: u32,
}

impl SheetWriter {
    /// Creates the sheet and writes the header row. The generated column is
    /// named `output_column`, suffixed if the input already uses that name.
    pub fn new(columns: &[String], output_column: &str) -> Result<Self, TableError> {
        let width = ColNum::try_from(columns.len()).map_err(|_| {
            TableError::Serialization(format!(
                "{} columns exceed the worksheet column limit",
                columns.len()
            ))
        })?;

        let mut worksheet = Worksheet::new();
        worksheet.set_name(SHEET_NAME)?;

        let header = Format::new().set_bold();
        for (col, name) in columns.iter().enumerate() {
            worksheet.write_string_with_format(0, col as ColNum, name.as_str(), &header)?;
        }
        worksheet.write_string_with_format(
            0,
            width,
            output_header(columns, output_column),
            &header,
        )?;
        worksheet.set_column_width(width, GENERATED_COLUMN_WIDTH)?;
        worksheet.set_freeze_panes(1, 0)?;

        Ok(Self {
            worksheet,
            width,
            next_row: 1,
        })
    }

    /// Appends one row: the original cells followed by the generated text.
    pub fn write_row(&mut self, row: &Row, generated: &str) -> Result<(), TableError> {
        let row_num = self.next_row;

        for (col, cell) in row.cells.iter().take(self.width as usize).enumerate() {
            let col = col as ColNum;
            match cell {
                Cell::Text(s) => {
                    self.worksheet.write_string(row_num, col, s.as_str())?;
                }
                Cell::Number(n) if n.is_finite() => {
                    self.worksheet.write_number(row_num, col, *n)?;
                }
                Cell::Number(n) => {
                    self.worksheet.write_string(row_num, col, n.to_string())?;
                }
                Cell::Empty => {}
            }
        }
        self.worksheet.write_string(row_num, self.width, generated)?;

        self.next_row += 1;
        Ok(())
    }

    /// Number of data rows written so far.
    pub fn rows_written(&self) -> usize {
        (self.next_row - 1) as usize
    }

    pub fn finish(self) -> Result<Vec<u8>, TableError> {
        let mut workbook = Workbook::new();
        workbook.push_worksheet(self.worksheet);
        Ok(workbook.save_to_buffer()?)
    }
}

/// Header for the appended column, kept distinct from every input header.
pub fn output_header(columns: &[String], output_column: &str) -> String {
    let mut name = output_column.to_string();
    while columns.iter().any(|c| c == &name) {
        name.push_str(" (generated)");
    }
    name
}
