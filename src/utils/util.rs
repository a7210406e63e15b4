use comfy_table::Cell;

use crate::remote::Row;

/// Render rows as a table. `header` names the columns; rows wider than the
/// header get positional names.
pub fn pretty_format_rows(header: &[&str], rows: &[Row]) -> comfy_table::Table {
    let mut table = comfy_table::Table::new();
    table.load_preset("||--+-++|    ++++++");

    if rows.is_empty() {
        return table;
    }

    let width = rows.iter().map(Row::len).max().unwrap_or(0);
    let mut cells = Vec::with_capacity(width);
    for idx in 0..width {
        let name = header
            .get(idx)
            .map(|name| name.to_string())
            .unwrap_or_else(|| format!("col{}", idx));
        cells.push(Cell::new(name));
    }
    table.set_header(cells);

    for row in rows {
        let mut cells = Vec::with_capacity(width);
        for value in row.values.iter() {
            cells.push(Cell::new(format!("{value}")));
        }
        table.add_row(cells);
    }

    table
}
