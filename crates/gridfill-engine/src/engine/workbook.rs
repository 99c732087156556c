//! In-memory grid document.

use std::collections::{BTreeMap, BTreeSet};

use super::{AdapterError, Cell, CellRef, GridAdapter, Grid, Image, Region};

/// One sheet of a [`Workbook`].
#[derive(Clone, Debug, Default)]
pub struct Sheet {
    pub name: String,
    /// Sparse cell storage (DashMap is internally sharded, reads are lock-free per shard)
    pub cells: Grid,
    pub merges: Vec<Region>,
    pub row_heights: BTreeMap<usize, f32>,
    /// Rows flagged for height recalculation by whoever renders the document.
    pub auto_height_rows: BTreeSet<usize>,
    pub images: Vec<Image>,
}

impl Sheet {
    pub fn new(name: &str) -> Sheet {
        Sheet {
            name: name.to_string(),
            ..Sheet::default()
        }
    }

    /// Set a cell, returning `self` for fixture building.
    pub fn with_cell(self, at: &str, cell: Cell) -> Sheet {
        if let Some(cell_ref) = CellRef::from_str(at) {
            self.cells.insert(cell_ref, cell);
        }
        self
    }

    pub fn get(&self, at: &str) -> Option<Cell> {
        let cell_ref = CellRef::from_str(at)?;
        self.cells.get(&cell_ref).map(|entry| entry.value().clone())
    }

    /// Cells sorted by position for deterministic output.
    pub fn sorted_cells(&self) -> Vec<(CellRef, Cell)> {
        let mut cells: Vec<_> = self
            .cells
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        cells.sort_by(|a, b| a.0.row.cmp(&b.0.row).then(a.0.col.cmp(&b.0.col)));
        cells
    }
}

/// An ordered collection of sheets.
#[derive(Clone, Debug, Default)]
pub struct Workbook {
    pub sheets: Vec<Sheet>,
}

impl Workbook {
    pub fn new() -> Workbook {
        Workbook::default()
    }

    pub fn with_sheet(mut self, sheet: Sheet) -> Workbook {
        self.sheets.push(sheet);
        self
    }

    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name == name)
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|s| s.name.clone()).collect()
    }

    fn sheet_mut(&mut self, sheet: usize) -> Result<&mut Sheet, AdapterError> {
        self.sheets
            .get_mut(sheet)
            .ok_or(AdapterError::SheetNotFound(sheet))
    }
}

impl GridAdapter for Workbook {
    fn sheet_count(&self) -> usize {
        self.sheets.len()
    }

    fn sheet_name(&self, sheet: usize) -> Option<String> {
        self.sheets.get(sheet).map(|s| s.name.clone())
    }

    fn cell(&self, sheet: usize, at: &CellRef) -> Option<Cell> {
        let sheet = self.sheets.get(sheet)?;
        sheet.cells.get(at).map(|entry| entry.value().clone())
    }

    fn populated_cells(&self, sheet: usize, region: Option<&Region>) -> Vec<CellRef> {
        let Some(sheet) = self.sheets.get(sheet) else {
            return Vec::new();
        };
        let mut refs: Vec<CellRef> = sheet
            .cells
            .iter()
            .filter(|entry| !entry.value().is_blank())
            .map(|entry| entry.key().clone())
            .filter(|at| region.is_none_or(|r| r.contains(at)))
            .collect();
        refs.sort_by(|a, b| a.row.cmp(&b.row).then(a.col.cmp(&b.col)));
        refs
    }

    fn merges(&self, sheet: usize) -> Vec<Region> {
        self.sheets
            .get(sheet)
            .map(|s| s.merges.clone())
            .unwrap_or_default()
    }

    fn images(&self, sheet: usize) -> Vec<Image> {
        self.sheets
            .get(sheet)
            .map(|s| s.images.clone())
            .unwrap_or_default()
    }

    fn row_height(&self, sheet: usize, row: usize) -> Option<f32> {
        self.sheets.get(sheet)?.row_heights.get(&row).copied()
    }

    fn row_heights(&self, sheet: usize) -> Vec<(usize, f32)> {
        self.sheets
            .get(sheet)
            .map(|s| s.row_heights.iter().map(|(r, h)| (*r, *h)).collect())
            .unwrap_or_default()
    }

    fn set_cell(&mut self, sheet: usize, at: CellRef, cell: Cell) -> Result<(), AdapterError> {
        self.sheet_mut(sheet)?.cells.insert(at, cell);
        Ok(())
    }

    fn add_merge(&mut self, sheet: usize, region: Region) -> Result<(), AdapterError> {
        let sheet = self.sheet_mut(sheet)?;
        if !sheet.merges.contains(&region) {
            sheet.merges.push(region);
        }
        Ok(())
    }

    fn insert_image(&mut self, sheet: usize, image: Image) -> Result<(), AdapterError> {
        self.sheet_mut(sheet)?.images.push(image);
        Ok(())
    }

    fn set_row_height(&mut self, sheet: usize, row: usize, height: f32) -> Result<(), AdapterError> {
        self.sheet_mut(sheet)?.row_heights.insert(row, height);
        Ok(())
    }

    fn mark_auto_row_height(&mut self, sheet: usize, row: usize) -> Result<(), AdapterError> {
        self.sheet_mut(sheet)?.auto_height_rows.insert(row);
        Ok(())
    }

    fn create_sheet(&mut self, name: &str) -> Result<usize, AdapterError> {
        if self.sheets.iter().any(|s| s.name == name) {
            return Err(AdapterError::DuplicateSheet(name.to_string()));
        }
        self.sheets.push(Sheet::new(name));
        Ok(self.sheets.len() - 1)
    }

    fn move_sheet(&mut self, sheet: usize, to: usize) -> Result<(), AdapterError> {
        if sheet >= self.sheets.len() {
            return Err(AdapterError::SheetNotFound(sheet));
        }
        let moved = self.sheets.remove(sheet);
        let to = to.min(self.sheets.len());
        self.sheets.insert(to, moved);
        Ok(())
    }

    fn delete_sheet(&mut self, sheet: usize) -> Result<(), AdapterError> {
        if sheet >= self.sheets.len() {
            return Err(AdapterError::SheetNotFound(sheet));
        }
        self.sheets.remove(sheet);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_populated_cells_sorted_and_filtered() {
        let wb = Workbook::new().with_sheet(
            Sheet::new("S")
                .with_cell("B2", Cell::new_number(1.0))
                .with_cell("A1", Cell::new_text("x"))
                .with_cell("C1", Cell::new_empty())
                .with_cell("A3", Cell::new_text("y")),
        );
        let all = wb.populated_cells(0, None);
        assert_eq!(
            all,
            vec![CellRef::new(0, 0), CellRef::new(1, 1), CellRef::new(0, 2)]
        );
        let region = Region::parse("A2:B3").unwrap();
        assert_eq!(
            wb.populated_cells(0, Some(&region)),
            vec![CellRef::new(1, 1), CellRef::new(0, 2)]
        );
    }

    #[test]
    fn test_sheet_lifecycle() {
        let mut wb = Workbook::new();
        let a = wb.create_sheet("A").unwrap();
        let b = wb.create_sheet("B").unwrap();
        assert_eq!((a, b), (0, 1));
        assert!(matches!(
            wb.create_sheet("A"),
            Err(AdapterError::DuplicateSheet(_))
        ));
        wb.move_sheet(1, 0).unwrap();
        assert_eq!(wb.sheet_names(), vec!["B", "A"]);
        assert_eq!(wb.sheet_index("A"), Some(1));
        wb.delete_sheet(0).unwrap();
        assert_eq!(wb.sheet_names(), vec!["A"]);
        assert!(matches!(
            wb.delete_sheet(4),
            Err(AdapterError::SheetNotFound(4))
        ));
    }
}
