use comfy_table::{presets::NOTHING, Attribute, Cell, ContentArrangement, Table};

/// Borderless, non-wrapping table used by every listing command.
pub fn styled_table() -> Table {
    let mut table = Table::new();
    table.load_preset(NOTHING);
    table.set_content_arrangement(ContentArrangement::Disabled);
    table
}

/// Cuts `text` to at most `max_chars` characters, marking the cut with `…`.
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{kept}…")
}

/// Apply padding to all columns (call after setting headers)
pub fn apply_column_padding(table: &mut Table, padding: (u16, u16)) {
    for i in 0..table.column_count() {
        if let Some(col) = table.column_mut(i) {
            col.set_padding(padding);
        }
    }
}

pub fn header(text: &str) -> Cell {
    Cell::new(text)
        .add_attribute(Attribute::Bold)
        .add_attribute(Attribute::Dim)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_counts_characters() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 4), "abc…");
        assert_eq!(truncate("ääääää", 3), "ää…");
    }

    #[test]
    fn styled_table_renders_without_borders() {
        let mut table = styled_table();
        table.set_header(vec![header("Name"), header("Id")]);
        table.add_row(vec!["web", "1"]);
        apply_column_padding(&mut table, (0, 2));
        let rendered = table.to_string();
        assert!(rendered.contains("web"));
        assert!(!rendered.contains('|'));
    }
}
