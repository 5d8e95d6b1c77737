// src/csv.rs
//
// Just enough CSV for the per-location aggregate tables: RFC 4180 quoting on
// write, a quote/CRLF tolerant reader for checking what is already on disk.

use std::io::{self, Write};
use std::mem::take;

pub const SEP: char = ',';

/* ---------------- Writing ---------------- */

fn needs_quotes(field: &str) -> bool {
    field.contains(SEP) || field.contains('"') || field.contains('\n') || field.contains('\r')
}

/// Write one row to any writer.
pub fn write_row<W, S>(mut w: W, row: &[S]) -> io::Result<()>
where
    W: Write,
    S: AsRef<str>,
{
    for (i, cell) in row.iter().enumerate() {
        if i > 0 {
            write!(w, "{SEP}")?;
        }
        let cell = cell.as_ref();
        if needs_quotes(cell) {
            write!(w, "\"{}\"", cell.replace('"', "\"\""))?;
        } else {
            w.write_all(cell.as_bytes())?;
        }
    }
    writeln!(w)
}

/* ---------------- Reading ---------------- */

/// Parse CSV text into rows. Blank lines are dropped; an unterminated quote
/// swallows the rest of the input into the last field.
pub fn parse_rows(text: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut field = s!();
    let mut row = Vec::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes => {
                if matches!(chars.peek(), Some('"')) {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' if field.is_empty() => in_quotes = true,
            c if c == SEP && !in_quotes => row.push(take(&mut field)),
            '\n' | '\r' if !in_quotes => {
                if ch == '\r' && matches!(chars.peek(), Some('\n')) {
                    chars.next();
                }
                row.push(take(&mut field));
                if row.len() == 1 && row[0].is_empty() {
                    row.clear();
                } else {
                    rows.push(take(&mut row));
                }
            }
            _ => field.push(ch),
        }
    }

    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn written(row: &[&str]) -> String {
        let mut buf = Vec::new();
        write_row(&mut buf, row).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn plain_cells_are_not_quoted() {
        assert_eq!(written(&["W000001", "Main St", "12"]), "W000001,Main St,12\n");
    }

    #[test]
    fn separators_and_quotes_are_escaped() {
        assert_eq!(written(&["Laundry, Inc", "say \"hi\""]), "\"Laundry, Inc\",\"say \"\"hi\"\"\"\n");
    }

    #[test]
    fn reader_accepts_what_writer_emits() {
        let text = written(&["a,b", "c\"d", ""]) + &written(&["1", "2", "3"]);
        assert_eq!(
            parse_rows(&text),
            vec![vec![s!("a,b"), s!("c\"d"), s!()], vec![s!("1"), s!("2"), s!("3")]]
        );
    }

    #[test]
    fn reader_tolerates_crlf_and_blank_lines() {
        assert_eq!(parse_rows("a,b\r\n\r\nc,d"), vec![vec![s!("a"), s!("b")], vec![s!("c"), s!("d")]]);
    }
}
