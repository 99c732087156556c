//! The seam between the engine and a concrete grid document format.
//!
//! The engine reads a template and writes an output exclusively through
//! [`GridAdapter`]. Container formats (binary workbooks, XML packages) plug in
//! by implementing it; [`Workbook`](super::Workbook) is the in-memory
//! implementation used by the `.grd` text format and the tests.

use super::{AdapterError, Cell, CellRef, Image, Region};

/// Read/write access to a sheet-based grid document.
///
/// Sheets are addressed by index in document order.
pub trait GridAdapter {
    fn sheet_count(&self) -> usize;

    fn sheet_name(&self, sheet: usize) -> Option<String>;

    fn sheet_index(&self, name: &str) -> Option<usize> {
        (0..self.sheet_count()).find(|&idx| self.sheet_name(idx).as_deref() == Some(name))
    }

    /// Value, formula, style reference and comment of one cell.
    fn cell(&self, sheet: usize, at: &CellRef) -> Option<Cell>;

    /// Populated cells in row-major order, optionally limited to a region.
    fn populated_cells(&self, sheet: usize, region: Option<&Region>) -> Vec<CellRef>;

    fn merges(&self, sheet: usize) -> Vec<Region>;

    fn images(&self, sheet: usize) -> Vec<Image>;

    fn row_height(&self, sheet: usize, row: usize) -> Option<f32>;

    /// All explicit row heights, ordered by row.
    fn row_heights(&self, sheet: usize) -> Vec<(usize, f32)>;

    fn set_cell(&mut self, sheet: usize, at: CellRef, cell: Cell) -> Result<(), AdapterError>;

    fn add_merge(&mut self, sheet: usize, region: Region) -> Result<(), AdapterError>;

    fn insert_image(&mut self, sheet: usize, image: Image) -> Result<(), AdapterError>;

    fn set_row_height(&mut self, sheet: usize, row: usize, height: f32) -> Result<(), AdapterError>;

    /// Ask the document to recompute a row's height from its content.
    fn mark_auto_row_height(&mut self, sheet: usize, row: usize) -> Result<(), AdapterError>;

    /// Append a new empty sheet, returning its index.
    fn create_sheet(&mut self, name: &str) -> Result<usize, AdapterError>;

    fn move_sheet(&mut self, sheet: usize, to: usize) -> Result<(), AdapterError>;

    fn delete_sheet(&mut self, sheet: usize) -> Result<(), AdapterError>;
}
