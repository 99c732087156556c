//! Parser for .grd workbook format

use crate::error::{GridfillError, Result};
use gridfill_engine::engine::{CellRef, CellValue, Image, ImageType, Region, Sheet, Workbook};
use std::fs;
use std::path::Path;

/// Name given to cells that appear before any `[Sheet]` header.
pub const DEFAULT_SHEET: &str = "Sheet1";

/// Parse a .grd file and return a Workbook
pub fn parse_grd(path: &Path) -> Result<Workbook> {
    let content = fs::read_to_string(path)?;
    parse_grd_content(&content)
}

/// Parse .grd content from a string
pub fn parse_grd_content(content: &str) -> Result<Workbook> {
    let mut workbook = Workbook::new();

    for (line_num, line) in content.lines().enumerate() {
        let line_num = line_num + 1;
        let line = line.trim();

        // Skip empty lines and comments
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let name = name.trim();
            if name.is_empty() || workbook.sheet(name).is_some() {
                return Err(parse_error(line_num, format!("Invalid sheet name: [{}]", name)));
            }
            workbook.sheets.push(Sheet::new(name));
            continue;
        }

        if workbook.sheets.is_empty() {
            workbook.sheets.push(Sheet::new(DEFAULT_SHEET));
        }
        let Some(sheet) = workbook.sheets.last_mut() else {
            continue;
        };

        if let Some(rest) = line.strip_prefix("image ") {
            sheet.images.push(parse_image(rest, line_num)?);
            continue;
        }

        // Parse "KEY: VALUE" format
        let Some((key, value)) = line.split_once(':') else {
            return Err(parse_error(line_num, "Expected 'KEY: VALUE' format".to_string()));
        };
        let key = key.trim();
        let value = value.trim();

        match key.split_once(' ') {
            None if key == "merge" => {
                let region = parse_region(value, line_num)?;
                if !sheet.merges.contains(&region) {
                    sheet.merges.push(region);
                }
            }
            None if key == "autoheight" => {
                sheet.auto_height_rows.insert(parse_row(value, line_num)?);
            }
            None => {
                let cell_ref = parse_cell_ref(key, line_num)?;
                let parsed = parse_cell_value(value, line_num)?;
                sheet.cells.entry(cell_ref).or_default().value = parsed;
            }
            Some(("height", row)) => {
                let row = parse_row(row, line_num)?;
                let height = value
                    .parse::<f32>()
                    .ok()
                    .filter(|h| h.is_finite() && *h >= 0.0)
                    .ok_or_else(|| parse_error(line_num, format!("Invalid row height: {}", value)))?;
                sheet.row_heights.insert(row, height);
            }
            Some((cell, attr)) => {
                let cell_ref = parse_cell_ref(cell, line_num)?;
                let text = parse_quoted_value(value, line_num)?;
                let mut entry = sheet.cells.entry(cell_ref).or_default();
                match attr.trim() {
                    "note" => entry.comment = Some(text),
                    "style" => entry.style = Some(text),
                    other => {
                        return Err(parse_error(
                            line_num,
                            format!("Unknown cell attribute: {}", other),
                        ));
                    }
                }
            }
        }
    }

    Ok(workbook)
}

fn parse_error(line: usize, message: String) -> GridfillError {
    GridfillError::Parse { line, message }
}

fn parse_cell_ref(text: &str, line_num: usize) -> Result<CellRef> {
    CellRef::from_str(text.trim())
        .ok_or_else(|| parse_error(line_num, format!("Invalid cell reference: {}", text)))
}

fn parse_region(text: &str, line_num: usize) -> Result<Region> {
    Region::parse(text.trim())
        .ok_or_else(|| parse_error(line_num, format!("Invalid region: {}", text)))
}

/// Rows are written 1-based, stored 0-based.
fn parse_row(text: &str, line_num: usize) -> Result<usize> {
    text.trim()
        .parse::<usize>()
        .ok()
        .and_then(|row| row.checked_sub(1))
        .ok_or_else(|| parse_error(line_num, format!("Invalid row number: {}", text)))
}

/// `A1:C4 PNG: 89504e47...`
fn parse_image(rest: &str, line_num: usize) -> Result<Image> {
    let Some((head, data)) = rest.rsplit_once(':') else {
        return Err(parse_error(line_num, "Expected 'image REGION TYPE: HEX'".to_string()));
    };
    let mut parts = head.split_whitespace();
    let (Some(region), Some(kind), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(parse_error(line_num, "Expected 'image REGION TYPE: HEX'".to_string()));
    };
    let region = parse_region(region, line_num)?;
    let kind = ImageType::parse(kind)
        .ok_or_else(|| parse_error(line_num, format!("Unknown image type: {}", kind)))?;
    let data = hex::decode(data.trim())
        .map_err(|e| parse_error(line_num, format!("Invalid image data: {}", e)))?;
    Ok(Image { kind, data, region })
}

/// Parse a cell value string into a CellValue
fn parse_cell_value(value: &str, line_num: usize) -> Result<CellValue> {
    if value.is_empty() {
        return Ok(CellValue::Empty);
    }

    // Formula: starts with '='
    if let Some(formula) = value.strip_prefix('=') {
        return Ok(CellValue::Formula(formula.trim().to_string()));
    }

    if value.starts_with('"') {
        return parse_quoted_value(value, line_num).map(CellValue::Text);
    }

    match value {
        "TRUE" => return Ok(CellValue::Bool(true)),
        "FALSE" => return Ok(CellValue::Bool(false)),
        _ => {}
    }

    if let Some(args) = value
        .strip_prefix("link(")
        .and_then(|v| v.strip_suffix(')'))
    {
        return parse_link(args)
            .ok_or_else(|| parse_error(line_num, format!("Invalid link: {}", value)));
    }

    // Try to parse as number
    if let Ok(n) = value.parse::<f64>() {
        return Ok(CellValue::Number(n));
    }

    Err(parse_error(
        line_num,
        format!("Invalid value: {}. Use quotes for text.", value),
    ))
}

/// `"url", "label"`
fn parse_link(args: &str) -> Option<CellValue> {
    let (url, rest) = split_quoted(args.trim())?;
    let rest = rest.trim_start().strip_prefix(',')?;
    let (label, rest) = split_quoted(rest.trim_start())?;
    if !rest.trim().is_empty() {
        return None;
    }
    Some(CellValue::Hyperlink { url, label })
}

/// A value that must be exactly one quoted string.
fn parse_quoted_value(value: &str, line_num: usize) -> Result<String> {
    match split_quoted(value) {
        Some((text, rest)) if rest.trim().is_empty() => Ok(text),
        _ => Err(parse_error(
            line_num,
            format!("Expected quoted text: {}", value),
        )),
    }
}

/// Read one leading quoted string, returning it unescaped plus the remainder.
fn split_quoted(input: &str) -> Option<(String, &str)> {
    let body = input.strip_prefix('"')?;
    let mut out = String::with_capacity(body.len());
    let mut chars = body.char_indices();
    while let Some((idx, ch)) = chars.next() {
        match ch {
            '"' => return Some((out, &body[idx + 1..])),
            '\\' => match chars.next() {
                Some((_, '\\')) => out.push('\\'),
                Some((_, '"')) => out.push('"'),
                Some((_, 'n')) => out.push('\n'),
                Some((_, other)) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            },
            _ => out.push(ch),
        }
    }
    None
}
