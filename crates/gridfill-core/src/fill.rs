//! Fill entry points.
//!
//! All three entry points share one semantics and differ only in how the
//! template is read and where the filled workbook goes.

use std::io::{Read, Write};
use std::path::Path;

use gridfill_engine::engine::{FillOptions, FillReport, Value, Workbook, fill};

use crate::error::Result;
use crate::storage::{parse_grd, parse_grd_content, write_grd, write_grd_content};

/// A filled workbook plus the diagnostics recorded while filling it.
#[derive(Debug)]
pub struct Filled {
    pub workbook: Workbook,
    pub report: FillReport,
}

/// Fill an in-memory template.
pub fn fill_workbook(template: &Workbook, data: &Value, options: &FillOptions) -> Result<Filled> {
    let mut workbook = Workbook::new();
    let report = fill(template, &mut workbook, data, options)?;
    Ok(Filled { workbook, report })
}

/// Fill the template at `template_path` and write the result to `output_path`.
pub fn fill_to_path(
    template_path: &Path,
    output_path: &Path,
    data: &Value,
    options: &FillOptions,
) -> Result<FillReport> {
    let template = parse_grd(template_path)?;
    let filled = fill_workbook(&template, data, options)?;
    write_grd(output_path, &filled.workbook)?;
    log::info!(
        "filled {} into {}",
        template_path.display(),
        output_path.display()
    );
    Ok(filled.report)
}

/// Fill the template at `template_path`, returning the serialized workbook.
pub fn fill_to_bytes(
    template_path: &Path,
    data: &Value,
    options: &FillOptions,
) -> Result<(Vec<u8>, FillReport)> {
    let template = parse_grd(template_path)?;
    let filled = fill_workbook(&template, data, options)?;
    Ok((write_grd_content(&filled.workbook).into_bytes(), filled.report))
}

/// Read a template from `input` and write the filled workbook to `output`.
pub fn fill_stream<R: Read, W: Write>(
    mut input: R,
    mut output: W,
    data: &Value,
    options: &FillOptions,
) -> Result<FillReport> {
    let mut content = String::new();
    input.read_to_string(&mut content)?;
    let template = parse_grd_content(&content)?;
    let filled = fill_workbook(&template, data, options)?;
    output.write_all(write_grd_content(&filled.workbook).as_bytes())?;
    output.flush()?;
    Ok(filled.report)
}

/// Read fill data from JSON.
pub fn read_data<R: Read>(reader: R) -> Result<Value> {
    let json: serde_json::Value = serde_json::from_reader(reader)?;
    Ok(Value::from(json))
}
