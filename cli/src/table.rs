use std::fmt::{self, Display, Write};

const GAP: usize = 3;

/// A column rendered from each row by `value`.
pub struct Column<T> {
    header: &'static str,
    value: Box<dyn Fn(&T) -> String>,
}

/// Left-aligned plain-text table, sized to its widest cell per column.
pub struct Table<'a, T> {
    pub cols: Vec<Column<T>>,
    pub data: &'a [T],
}

impl<T> Column<T> {
    pub fn new(header: &'static str, value: Box<dyn Fn(&T) -> String>) -> Column<T> {
        Column { header, value }
    }
}

impl<T> Display for Table<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cells = self
            .data
            .iter()
            .map(|row| self.cols.iter().map(|col| (col.value)(row)).collect())
            .collect::<Vec<Vec<String>>>();
        let widths = self
            .cols
            .iter()
            .enumerate()
            .map(|(i, col)| {
                cells
                    .iter()
                    .map(|row| row[i].len())
                    .fold(col.header.len(), usize::max)
            })
            .collect::<Vec<_>>();

        let headers = self.cols.iter().map(|col| col.header);
        write_row(f, headers, &widths)?;
        for row in &cells {
            write_row(f, row.iter().map(String::as_str), &widths)?;
        }
        Ok(())
    }
}

fn write_row<'a>(
    f: &mut fmt::Formatter<'_>,
    cells: impl Iterator<Item = &'a str>,
    widths: &[usize],
) -> fmt::Result {
    let mut line = String::new();
    for (cell, width) in cells.zip(widths) {
        write!(line, "{:width$}", cell, width = width + GAP)?;
    }
    writeln!(f, "{}", line.trim_end())
}
