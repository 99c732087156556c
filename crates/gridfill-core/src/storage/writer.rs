//! Writer for .grd workbook format

use crate::error::Result;
use gridfill_engine::engine::{CellValue, Sheet, Workbook};
use std::fs;
use std::path::Path;

/// Write a Workbook to a .grd file
pub fn write_grd(path: &Path, workbook: &Workbook) -> Result<()> {
    let content = write_grd_content(workbook);
    fs::write(path, content)?;
    Ok(())
}

/// Write a Workbook to a .grd format string
pub fn write_grd_content(workbook: &Workbook) -> String {
    let mut lines = vec!["# Gridfill Workbook".to_string()];
    for sheet in &workbook.sheets {
        lines.push(String::new());
        lines.push(format!("[{}]", sheet.name));
        write_sheet(sheet, &mut lines);
    }
    lines.join("\n") + "\n"
}

fn write_sheet(sheet: &Sheet, lines: &mut Vec<String>) {
    for (cell_ref, cell) in sheet.sorted_cells() {
        let value_str = match &cell.value {
            CellValue::Empty => None,
            CellValue::Number(n) => Some(n.to_string()),
            CellValue::Text(s) => Some(quote(s)),
            CellValue::Bool(true) => Some("TRUE".to_string()),
            CellValue::Bool(false) => Some("FALSE".to_string()),
            CellValue::Formula(f) => Some(format!("={}", f)),
            CellValue::Hyperlink { url, label } => {
                Some(format!("link({}, {})", quote(url), quote(label)))
            }
        };
        if let Some(value_str) = value_str {
            lines.push(format!("{}: {}", cell_ref, value_str));
        }
        if let Some(comment) = &cell.comment {
            lines.push(format!("{} note: {}", cell_ref, quote(comment)));
        }
        if let Some(style) = &cell.style {
            lines.push(format!("{} style: {}", cell_ref, quote(style)));
        }
    }

    for merge in &sheet.merges {
        lines.push(format!("merge: {}", merge));
    }
    for (row, height) in &sheet.row_heights {
        lines.push(format!("height {}: {}", row + 1, height));
    }
    for row in &sheet.auto_height_rows {
        lines.push(format!("autoheight: {}", row + 1));
    }
    for image in &sheet.images {
        lines.push(format!(
            "image {} {}: {}",
            image.region,
            image.kind.name(),
            hex::encode(&image.data)
        ));
    }
}

fn quote(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 2);
    out.push('"');
    for ch in input.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            _ => out.push(ch),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::parse_grd_content;
    use gridfill_engine::engine::{Cell, Image, ImageType, Region};

    fn sheet_lines(content: &str) -> Vec<&str> {
        content
            .lines()
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .collect()
    }

    #[test]
    fn test_write_values() {
        let wb = Workbook::new().with_sheet(
            Sheet::new("S")
                .with_cell("A1", Cell::new_number(42.0))
                .with_cell("B1", Cell::new_text("He said \"hi\""))
                .with_cell("C1", Cell::new_formula("SUM(A1:A3)"))
                .with_cell("D1", Cell::new_bool(false)),
        );
        let content = write_grd_content(&wb);
        assert_eq!(
            sheet_lines(&content),
            vec![
                "[S]",
                "A1: 42",
                r#"B1: "He said \"hi\"""#,
                "C1: =SUM(A1:A3)",
                "D1: FALSE",
            ]
        );
    }

    #[test]
    fn test_skip_empty_values_but_keep_attributes() {
        let wb = Workbook::new().with_sheet(
            Sheet::new("S")
                .with_cell("A1", Cell::new_empty())
                .with_cell("A2", Cell::new_empty().with_style("band")),
        );
        let content = write_grd_content(&wb);
        assert_eq!(sheet_lines(&content), vec!["[S]", "A2 style: \"band\""]);
    }

    #[test]
    fn test_sorted_output() {
        let wb = Workbook::new().with_sheet(
            Sheet::new("S")
                .with_cell("B2", Cell::new_number(3.0))
                .with_cell("A1", Cell::new_number(1.0))
                .with_cell("B1", Cell::new_number(2.0)),
        );
        let content = write_grd_content(&wb);
        let lines = sheet_lines(&content);
        assert!(lines[1].starts_with("A1"));
        assert!(lines[2].starts_with("B1"));
        assert!(lines[3].starts_with("B2"));
    }

    #[test]
    fn test_layout_survives_reparse() {
        let mut sheet = Sheet::new("Report")
            .with_cell(
                "A1",
                Cell::new_text("Title")
                    .with_comment("line one\nline two")
                    .with_style("h1"),
            )
            .with_cell(
                "A2",
                Cell::from_value(CellValue::Hyperlink {
                    url: "https://example.com".to_string(),
                    label: "site".to_string(),
                }),
            );
        sheet.merges.push(Region::parse("A1:C1").unwrap());
        sheet.row_heights.insert(0, 30.0);
        sheet.auto_height_rows.insert(1);
        sheet.images.push(Image {
            kind: ImageType::Gif,
            data: b"GIF89a".to_vec(),
            region: Region::parse("D1:E3").unwrap(),
        });
        let wb = Workbook::new()
            .with_sheet(sheet)
            .with_sheet(Sheet::new("Empty"));

        let reparsed = parse_grd_content(&write_grd_content(&wb)).unwrap();
        assert_eq!(reparsed.sheet_names(), vec!["Report", "Empty"]);
        let report = reparsed.sheet("Report").unwrap();
        let original = wb.sheet("Report").unwrap();
        assert_eq!(report.sorted_cells(), original.sorted_cells());
        assert_eq!(report.merges, original.merges);
        assert_eq!(report.row_heights, original.row_heights);
        assert_eq!(report.auto_height_rows, original.auto_height_rows);
        assert_eq!(report.images, original.images);
    }
}
