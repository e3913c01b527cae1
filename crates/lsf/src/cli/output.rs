//! Output formatting for list commands.

use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Color, ContentArrangement, Table};

/// Print a table with a cyan header row.
pub fn print_table(headers: &[&str], rows: Vec<Vec<String>>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let header_cells: Vec<Cell> = headers
        .iter()
        .map(|h| Cell::new(h).fg(Color::Cyan))
        .collect();
    table.set_header(header_cells);

    for row in rows {
        table.add_row(row);
    }

    println!("{}", table);
}

/// Print one digest per line, or a placeholder when there are none.
pub fn print_digests(kind: &str, digests: &[String]) {
    if digests.is_empty() {
        println!("No {}s configured.", kind);
        return;
    }
    for digest in digests {
        println!("{}", digest);
    }
}

/// Render `key=value` pairs on one line.
pub fn format_fields<'a>(fields: impl IntoIterator<Item = (&'a String, &'a String)>) -> String {
    fields
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(" ")
}
