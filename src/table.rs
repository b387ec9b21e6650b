//! Column-aligned plain text tables

const GLUE: &str = "  ";

/// Lay out `rows` in left-aligned columns separated by two spaces. The last column is never
/// padded, so lines carry no trailing whitespace.
pub fn format_columns(rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = Vec::new();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            let width = cell.chars().count();
            match widths.get_mut(i) {
                Some(w) => *w = (*w).max(width),
                None => widths.push(width),
            }
        }
    }

    let mut out = String::new();
    for row in rows {
        let mut line = String::new();
        for (i, cell) in row.iter().enumerate() {
            line.push_str(cell);
            if i + 1 < row.len() {
                let pad = widths[i] - cell.chars().count();
                line.extend(std::iter::repeat(' ').take(pad));
                line.push_str(GLUE);
            }
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}
