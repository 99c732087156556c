//! The transform engine: one depth-first walk over the command tree.
//!
//! Every block (an area, one each iteration, a taken if) is rendered at an
//! output cursor and reports the extent it actually used. Siblings and static
//! cells that follow a block are displaced by the difference between that
//! extent and the block's template size. Each rendered template coordinate
//! records where it landed so copied formulas can be re-pointed afterwards.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::rc::Rc;

use super::collection::{self, Group};
use super::command::{
    Direction, EachCommand, GridCommand, IfCommand, ImageCommand, MergeCellsCommand,
    collect_commands, strip_commands,
};
use super::context::{Context, ScopeId};
use super::eval::{Evaluator, Resolver};
use super::formula::{RefSpan, RefTarget, rewrite_formula_references};
use super::notation::{Notation, Segment};
use super::tree::{CommandNode, build_tree};
use super::{
    Cell, CellRef, CellValue, CommandKind, ConfigError, Diagnostic, EvalError, FillError,
    FillFailure, GridAdapter, Image, Location, Region, Value,
};

/// Fill configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FillOptions {
    pub notation: Notation,
    /// Keep the template sheet a multisheet each was declared on.
    pub keep_template_sheet: bool,
    /// Abort on the first evaluation error instead of recording it.
    pub fail_fast: bool,
}

impl FillOptions {
    pub fn with_notation(mut self, notation: Notation) -> FillOptions {
        self.notation = notation;
        self
    }

    pub fn with_keep_template_sheet(mut self, keep: bool) -> FillOptions {
        self.keep_template_sheet = keep;
        self
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> FillOptions {
        self.fail_fast = fail_fast;
        self
    }
}

/// Outcome of a successful fill.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FillReport {
    /// Recoverable evaluation errors, in the order they occurred.
    pub diagnostics: Vec<Diagnostic>,
    pub cells_written: usize,
    pub sheets: usize,
}

/// Fill `template` with `data`, writing the result into `output`.
///
/// `output` is expected to be empty; one output sheet is created per
/// template sheet, plus one per multisheet iteration.
pub fn fill<T, O>(
    template: &T,
    output: &mut O,
    data: &Value,
    options: &FillOptions,
) -> Result<FillReport, FillFailure>
where
    T: GridAdapter + ?Sized,
    O: GridAdapter + ?Sized,
{
    let mut transformer = Transformer::new(template, output, options);
    match transformer.run(data) {
        Ok(()) => Ok(FillReport {
            diagnostics: transformer.diagnostics,
            cells_written: transformer.cells_written,
            sheets: transformer.output.sheet_count(),
        }),
        Err(error) => Err(FillFailure {
            error,
            diagnostics: transformer.diagnostics,
        }),
    }
}

/// Output position of a block's top-left cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Cursor {
    sheet: usize,
    row: usize,
    col: usize,
}

impl Cursor {
    fn offset(&self, rows: isize, cols: isize) -> Option<Cursor> {
        Some(Cursor {
            sheet: self.sheet,
            row: self.row.checked_add_signed(rows)?,
            col: self.col.checked_add_signed(cols)?,
        })
    }

    fn cell(&self) -> CellRef {
        CellRef::new(self.col, self.row)
    }
}

/// Rows and columns a rendered block occupies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Extent {
    rows: usize,
    cols: usize,
}

/// Loop iterations enclosing a rendered cell, outermost first.
type Path = Rc<[usize]>;

struct Placement {
    sheet: usize,
    cell: CellRef,
    path: Path,
}

struct PendingFormula {
    sheet: usize,
    at: CellRef,
    template_sheet: usize,
    formula: String,
    path: Path,
}

/// A rendered child: its template region and the size change it caused.
struct Rendered {
    region: Region,
    rows: isize,
    cols: isize,
}

struct Transformer<'a, T: ?Sized, O: ?Sized> {
    template: &'a T,
    output: &'a mut O,
    options: &'a FillOptions,
    sheet_names: Vec<String>,
    area_regions: Vec<Vec<Region>>,
    evaluator: Evaluator,
    context: Context,
    diagnostics: Vec<Diagnostic>,
    placements: HashMap<(usize, CellRef), Vec<Placement>>,
    formulas: Vec<PendingFormula>,
    iterations: usize,
    /// Replication axis of the innermost each being rendered.
    axis: Direction,
    /// Sheets created by multisheet iterations, with their template sheet.
    spawned: Vec<(usize, String)>,
    multisheet_templates: BTreeSet<usize>,
    cells_written: usize,
}

impl<'a, T, O> Transformer<'a, T, O>
where
    T: GridAdapter + ?Sized,
    O: GridAdapter + ?Sized,
{
    fn new(template: &'a T, output: &'a mut O, options: &'a FillOptions) -> Self {
        let sheet_names = (0..template.sheet_count())
            .map(|idx| template.sheet_name(idx).unwrap_or_default())
            .collect();
        Transformer {
            template,
            output,
            options,
            sheet_names,
            area_regions: Vec::new(),
            evaluator: Evaluator::new(),
            context: Context::new(std::iter::empty()),
            diagnostics: Vec::new(),
            placements: HashMap::new(),
            formulas: Vec::new(),
            iterations: 0,
            axis: Direction::Down,
            spawned: Vec::new(),
            multisheet_templates: BTreeSet::new(),
            cells_written: 0,
        }
    }

    fn run(&mut self, data: &Value) -> Result<(), FillError> {
        let commands = collect_commands(self.template)?;
        let tree = build_tree(commands, &self.sheet_names)?;
        self.context = Context::from_data(data)?;

        self.area_regions = (0..self.sheet_names.len())
            .map(|sheet| {
                tree.areas_on(sheet)
                    .map(|area| area.command.region.clone())
                    .collect()
            })
            .collect();

        let mut out_sheets = Vec::with_capacity(self.sheet_names.len());
        for name in &self.sheet_names {
            out_sheets.push(self.output.create_sheet(name)?);
        }

        let root_path: Path = Rc::from(Vec::new());
        let root = self.context.root();
        for (sheet, &out_sheet) in out_sheets.iter().enumerate() {
            self.seed_sheet(sheet, out_sheet)?;
            for area in tree.areas_on(sheet) {
                let region = &area.command.region;
                let cursor = Cursor {
                    sheet: out_sheet,
                    row: region.start.row,
                    col: region.start.col,
                };
                let extent =
                    self.render_block(sheet, region, &area.children, cursor, root, &root_path)?;
                log::debug!(
                    "area {}!{} rendered as {}x{}",
                    self.sheet_names[sheet],
                    region,
                    extent.rows,
                    extent.cols
                );
            }
        }

        self.rewrite_formulas()?;
        self.arrange_sheets()?;

        log::info!(
            "fill complete: {} cell(s) written, {} diagnostic(s)",
            self.cells_written,
            self.diagnostics.len()
        );
        Ok(())
    }

    fn location(&self, sheet: usize, at: &CellRef) -> Location {
        Location::new(
            self.sheet_names.get(sheet).cloned().unwrap_or_default(),
            at.clone(),
        )
    }

    /// Record a recoverable error, or turn it fatal under fail-fast.
    fn recover(&mut self, sheet: usize, at: &CellRef, error: EvalError) -> Result<(), FillError> {
        let location = self.location(sheet, at);
        if self.options.fail_fast {
            return Err(FillError::Eval {
                location,
                source: error,
            });
        }
        log::warn!("{}: {}", location, error);
        self.diagnostics.push(Diagnostic { location, error });
        Ok(())
    }

    /// Evaluate an expression; None when it failed and was recovered.
    fn eval(
        &mut self,
        sheet: usize,
        at: &CellRef,
        expr: &str,
        scope: ScopeId,
    ) -> Result<Option<Value>, FillError> {
        let view = self.context.view(scope);
        match self.evaluator.evaluate(expr, &view) {
            Ok(value) => Ok(Some(value)),
            Err(error) => {
                self.recover(sheet, at, error)?;
                Ok(None)
            }
        }
    }

    fn next_path(&mut self, path: &Path) -> Path {
        self.iterations += 1;
        path.iter()
            .copied()
            .chain(std::iter::once(self.iterations))
            .collect()
    }

    fn write(&mut self, sheet: usize, at: CellRef, cell: Cell) -> Result<(), FillError> {
        if cell.is_blank() {
            return Ok(());
        }
        self.output.set_cell(sheet, at, cell)?;
        self.cells_written += 1;
        Ok(())
    }

    fn record_placement(
        &mut self,
        sheet: usize,
        template: &CellRef,
        out_sheet: usize,
        out: CellRef,
        path: &Path,
    ) {
        self.placements
            .entry((sheet, template.clone()))
            .or_default()
            .push(Placement {
                sheet: out_sheet,
                cell: out,
                path: path.clone(),
            });
    }

    /// Copy everything outside the template sheet's areas verbatim.
    fn seed_sheet(&mut self, sheet: usize, out_sheet: usize) -> Result<(), FillError> {
        let areas = self.area_regions.get(sheet).cloned().unwrap_or_default();
        let root_path: Path = Rc::from(Vec::new());

        for at in self.template.populated_cells(sheet, None) {
            if areas.iter().any(|area| area.contains(&at)) {
                continue;
            }
            self.copy_cell(sheet, &at, out_sheet, at.clone(), None, &root_path)?;
        }
        for merge in self.template.merges(sheet) {
            if !areas.iter().any(|area| area.intersects(&merge)) {
                self.output.add_merge(out_sheet, merge)?;
            }
        }
        for (row, height) in self.template.row_heights(sheet) {
            if !areas.iter().any(|area| area.spans_row(row)) {
                self.output.set_row_height(out_sheet, row, height)?;
            }
        }
        for image in self.template.images(sheet) {
            if !areas.iter().any(|area| area.intersects(&image.region)) {
                self.output.insert_image(out_sheet, image)?;
            }
        }
        Ok(())
    }

    /// Copy one template cell. Placeholders are substituted when a scope is given.
    fn copy_cell(
        &mut self,
        sheet: usize,
        at: &CellRef,
        out_sheet: usize,
        out: CellRef,
        scope: Option<ScopeId>,
        path: &Path,
    ) -> Result<(), FillError> {
        let Some(cell) = self.template.cell(sheet, at) else {
            return Ok(());
        };
        let options = self.options;
        let value = match (cell.value, scope) {
            (CellValue::Text(text), Some(scope)) if options.notation.has_placeholder(&text) => {
                self.render_text(sheet, at, &text, scope)?
            }
            (CellValue::Formula(formula), _) => {
                self.formulas.push(PendingFormula {
                    sheet: out_sheet,
                    at: out.clone(),
                    template_sheet: sheet,
                    formula: formula.clone(),
                    path: path.clone(),
                });
                CellValue::Formula(formula)
            }
            (value, _) => value,
        };
        if let Some(height) = self.template.row_height(sheet, at.row) {
            self.output.set_row_height(out_sheet, out.row, height)?;
        }
        let cell = Cell {
            value,
            style: cell.style,
            comment: cell.comment.as_deref().and_then(strip_commands),
        };
        self.write(out_sheet, out, cell)
    }

    /// Substitute placeholders. A cell that is exactly one placeholder keeps
    /// the value's native type; mixed text concatenates display strings.
    fn render_text(
        &mut self,
        sheet: usize,
        at: &CellRef,
        text: &str,
        scope: ScopeId,
    ) -> Result<CellValue, FillError> {
        let options = self.options;
        let segments = options.notation.segments(text);
        if let [Segment::Expression(expr)] = segments.as_slice() {
            return Ok(match self.eval(sheet, at, expr, scope)? {
                Some(value) => to_cell_value(value),
                None => CellValue::Empty,
            });
        }

        let mut rendered = String::new();
        for segment in segments {
            match segment {
                Segment::Literal(literal) => rendered.push_str(literal),
                Segment::Expression(expr) => {
                    if let Some(value) = self.eval(sheet, at, expr, scope)? {
                        rendered.push_str(&value.to_display());
                    }
                }
            }
        }
        Ok(CellValue::Text(rendered))
    }

    /// Render a block: nested commands first, then the static cells around
    /// them, each displaced by the growth of the commands above and left of it.
    fn render_block(
        &mut self,
        sheet: usize,
        region: &Region,
        children: &[CommandNode],
        cursor: Cursor,
        scope: ScopeId,
        path: &Path,
    ) -> Result<Extent, FillError> {
        let mut done: Vec<Rendered> = Vec::with_capacity(children.len());

        for child in children {
            let child_region = &child.command.region;
            let row_shift = (child_region.start.col..=child_region.end.col)
                .map(|col| rows_above(&done, child_region.start.row, col))
                .max()
                .unwrap_or(0);
            let col_shift = (child_region.start.row..=child_region.end.row)
                .map(|row| cols_left(&done, child_region.start.col, row))
                .max()
                .unwrap_or(0);
            let rel_row = (child_region.start.row - region.start.row) as isize + row_shift;
            let rel_col = (child_region.start.col - region.start.col) as isize + col_shift;
            let Some(child_cursor) = cursor.offset(rel_row, rel_col) else {
                log::warn!("`{}` at {} was pushed off the sheet", child.command.name(), child_region);
                continue;
            };
            let extent = self.render_command(child, child_cursor, scope, path)?;
            done.push(Rendered {
                region: child_region.clone(),
                rows: extent.rows as isize - child_region.rows() as isize,
                cols: extent.cols as isize - child_region.cols() as isize,
            });
        }

        let populated: HashSet<CellRef> = self
            .template
            .populated_cells(sheet, Some(region))
            .into_iter()
            .collect();
        let mut occupied_rows: BTreeSet<usize> = BTreeSet::new();
        let mut occupied_cols: BTreeSet<usize> = BTreeSet::new();
        for child in children {
            let r = &child.command.region;
            occupied_rows.extend(r.start.row..=r.end.row);
            occupied_cols.extend(r.start.col..=r.end.col);
        }

        let mut positions: HashMap<CellRef, CellRef> = HashMap::new();
        for at in region.cells() {
            if children.iter().any(|child| child.command.region.contains(&at)) {
                continue;
            }
            let rel_row = (at.row - region.start.row) as isize + rows_above(&done, at.row, at.col);
            let rel_col = (at.col - region.start.col) as isize + cols_left(&done, at.col, at.row);
            let Some(out) = cursor.offset(rel_row, rel_col) else {
                continue;
            };
            let out = out.cell();
            self.record_placement(sheet, &at, cursor.sheet, out.clone(), path);
            if populated.contains(&at) {
                occupied_rows.insert(at.row);
                occupied_cols.insert(at.col);
                self.copy_cell(sheet, &at, cursor.sheet, out.clone(), Some(scope), path)?;
            }
            positions.insert(at, out);
        }

        for merge in self.template.merges(sheet) {
            if !region.contains_region(&merge) {
                continue;
            }
            let Some(start) = positions.get(&merge.start) else {
                continue;
            };
            if let Some(target) = Region::with_size(start, merge.rows(), merge.cols()) {
                self.output.add_merge(cursor.sheet, target)?;
            }
        }
        for image in self.template.images(sheet) {
            if !region.contains_region(&image.region) {
                continue;
            }
            let Some(start) = positions.get(&image.region.start) else {
                continue;
            };
            if let Some(target) = Region::with_size(start, image.region.rows(), image.region.cols()) {
                self.output.insert_image(
                    cursor.sheet,
                    Image {
                        region: target,
                        ..image
                    },
                )?;
            }
        }

        let cols: Vec<usize> = if occupied_cols.is_empty() {
            (region.start.col..=region.end.col).collect()
        } else {
            occupied_cols.into_iter().collect()
        };
        let rows: Vec<usize> = if occupied_rows.is_empty() {
            (region.start.row..=region.end.row).collect()
        } else {
            occupied_rows.into_iter().collect()
        };
        let grown_rows = cols
            .iter()
            .map(|&col| done.iter().filter(|d| d.region.spans_col(col)).map(|d| d.rows).sum::<isize>())
            .max()
            .unwrap_or(0);
        let grown_cols = rows
            .iter()
            .map(|&row| done.iter().filter(|d| d.region.spans_row(row)).map(|d| d.cols).sum::<isize>())
            .max()
            .unwrap_or(0);

        Ok(Extent {
            rows: (region.rows() as isize + grown_rows).max(0) as usize,
            cols: (region.cols() as isize + grown_cols).max(0) as usize,
        })
    }

    fn render_command(
        &mut self,
        node: &CommandNode,
        cursor: Cursor,
        scope: ScopeId,
        path: &Path,
    ) -> Result<Extent, FillError> {
        log::debug!(
            "rendering `{}` {} at sheet {} {}",
            node.command.name(),
            node.command.region,
            cursor.sheet,
            cursor.cell()
        );
        let command = &node.command;
        match &command.kind {
            CommandKind::Area => {
                self.render_block(command.sheet, &command.region, &node.children, cursor, scope, path)
            }
            CommandKind::Each(each) => self.render_each(node, each, cursor, scope, path),
            CommandKind::If(cond) => self.render_if(node, cond, cursor, scope, path),
            CommandKind::Grid(grid) => self.render_grid(node, grid, cursor, scope, path),
            CommandKind::Image(image) => self.render_image(node, image, cursor, scope, path),
            CommandKind::MergeCells(merge) => self.render_merge(node, merge, cursor, scope, path),
            CommandKind::AutoRowHeight => {
                let extent = self.render_block(
                    command.sheet,
                    &command.region,
                    &node.children,
                    cursor,
                    scope,
                    path,
                )?;
                for row in cursor.row..cursor.row + extent.rows {
                    self.output.mark_auto_row_height(cursor.sheet, row)?;
                }
                Ok(extent)
            }
        }
    }

    /// Resolve, filter, group and order the items of an each.
    fn each_items(
        &mut self,
        sheet: usize,
        anchor: &CellRef,
        each: &EachCommand,
        scope: ScopeId,
    ) -> Result<Vec<Value>, FillError> {
        let options = self.options;
        let items = match self.eval(sheet, anchor, options.notation.unwrap(&each.items), scope)? {
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(Value::Sequence(items)) => items,
            Some(other) => {
                self.recover(
                    sheet,
                    anchor,
                    EvalError::mismatch("sequence for `items`", other.kind()),
                )?;
                return Ok(Vec::new());
            }
        };

        let arranged = {
            let outer = self.context.view(scope);
            arrange_items(&mut self.evaluator, &options.notation, each, items, &outer)
        };
        match arranged {
            Ok(items) => Ok(items),
            Err(error) => {
                self.recover(sheet, anchor, error)?;
                Ok(Vec::new())
            }
        }
    }

    fn render_each(
        &mut self,
        node: &CommandNode,
        each: &EachCommand,
        cursor: Cursor,
        scope: ScopeId,
        path: &Path,
    ) -> Result<Extent, FillError> {
        let sheet = node.command.sheet;
        let region = &node.command.region;
        let items = self.each_items(sheet, &region.start, each, scope)?;

        if each.multisheet.is_some() {
            return self.render_multisheet(node, each, items, scope, path);
        }

        if items.is_empty() {
            return Ok(empty_extent(region, each.direction));
        }

        let mut extent = Extent::default();
        let mut at = cursor;
        for (idx, item) in items.into_iter().enumerate() {
            let child_scope = self.bind_iteration(scope, each, idx, item);
            let child_path = self.next_path(path);
            let outer_axis = std::mem::replace(&mut self.axis, each.direction);
            let rendered =
                self.render_block(sheet, region, &node.children, at, child_scope, &child_path);
            self.axis = outer_axis;
            self.context.release(child_scope);
            let rendered = rendered?;
            match each.direction {
                Direction::Down => {
                    at.row += rendered.rows;
                    extent.rows += rendered.rows;
                    extent.cols = extent.cols.max(rendered.cols);
                }
                Direction::Right => {
                    at.col += rendered.cols;
                    extent.cols += rendered.cols;
                    extent.rows = extent.rows.max(rendered.rows);
                }
            }
        }
        Ok(extent)
    }

    fn bind_iteration(
        &mut self,
        scope: ScopeId,
        each: &EachCommand,
        idx: usize,
        item: Value,
    ) -> ScopeId {
        let mut bindings = vec![(each.var.clone(), item)];
        if let Some(index) = &each.var_index {
            bindings.push((index.clone(), Value::Number(idx as f64)));
        }
        self.context.push(scope, bindings)
    }

    /// One new sheet per item, each seeded like the template sheet.
    fn render_multisheet(
        &mut self,
        node: &CommandNode,
        each: &EachCommand,
        items: Vec<Value>,
        scope: ScopeId,
        path: &Path,
    ) -> Result<Extent, FillError> {
        let sheet = node.command.sheet;
        let region = &node.command.region;
        let options = self.options;
        let names_expr = each.multisheet.as_deref().unwrap_or_default();
        let names = match self.eval(sheet, &region.start, options.notation.unwrap(names_expr), scope)? {
            Some(Value::Null) => Vec::new(),
            Some(Value::Sequence(names)) => names,
            // Already recorded; no sheets are spawned for this each.
            None => return Ok(empty_extent(region, each.direction)),
            Some(other) => {
                self.recover(
                    sheet,
                    &region.start,
                    EvalError::mismatch("sequence for `multisheet`", other.kind()),
                )?;
                return Ok(empty_extent(region, each.direction));
            }
        };
        if names.len() != items.len() {
            return Err(ConfigError::MultisheetMismatch {
                location: self.location(sheet, &region.start),
                names: names.len(),
                items: items.len(),
            }
            .into());
        }

        for (idx, (name, item)) in names.into_iter().zip(items).enumerate() {
            let name = name.to_display();
            if self.output.sheet_index(&name).is_some() {
                return Err(ConfigError::SheetNameConflict {
                    location: self.location(sheet, &region.start),
                    name,
                }
                .into());
            }
            let out_sheet = self.output.create_sheet(&name)?;
            self.seed_sheet(sheet, out_sheet)?;

            let cursor = Cursor {
                sheet: out_sheet,
                row: region.start.row,
                col: region.start.col,
            };
            let child_scope = self.bind_iteration(scope, each, idx, item);
            let child_path = self.next_path(path);
            let outer_axis = std::mem::replace(&mut self.axis, each.direction);
            let rendered =
                self.render_block(sheet, region, &node.children, cursor, child_scope, &child_path);
            self.axis = outer_axis;
            self.context.release(child_scope);
            rendered?;

            log::debug!("multisheet created sheet `{}`", name);
            self.spawned.push((sheet, name));
        }
        self.multisheet_templates.insert(sheet);
        Ok(empty_extent(region, each.direction))
    }

    fn render_if(
        &mut self,
        node: &CommandNode,
        cond: &IfCommand,
        cursor: Cursor,
        scope: ScopeId,
        path: &Path,
    ) -> Result<Extent, FillError> {
        let sheet = node.command.sheet;
        let region = &node.command.region;
        let options = self.options;
        let taken = {
            let view = self.context.view(scope);
            self.evaluator
                .evaluate_condition(options.notation.unwrap(&cond.condition), &view)
        };
        let taken = match taken {
            Ok(taken) => taken,
            Err(error) => {
                self.recover(sheet, &region.start, error)?;
                false
            }
        };
        if taken {
            self.render_block(sheet, region, &node.children, cursor, scope, path)
        } else {
            // Collapse along the axis the enclosing each advances on.
            Ok(empty_extent(region, self.axis))
        }
    }

    fn eval_sequence(
        &mut self,
        sheet: usize,
        at: &CellRef,
        expr: &str,
        scope: ScopeId,
    ) -> Result<Option<Vec<Value>>, FillError> {
        let options = self.options;
        match self.eval(sheet, at, options.notation.unwrap(expr), scope)? {
            None => Ok(None),
            Some(Value::Null) => Ok(Some(Vec::new())),
            Some(Value::Sequence(items)) => Ok(Some(items)),
            Some(other) => {
                self.recover(sheet, at, EvalError::mismatch("sequence", other.kind()))?;
                Ok(None)
            }
        }
    }

    /// Header row, then one row per data row, styled from the template's
    /// first and second rows.
    fn render_grid(
        &mut self,
        node: &CommandNode,
        grid: &GridCommand,
        cursor: Cursor,
        scope: ScopeId,
        path: &Path,
    ) -> Result<Extent, FillError> {
        let sheet = node.command.sheet;
        let region = &node.command.region;
        let headers = self.eval_sequence(sheet, &region.start, &grid.headers, scope)?;
        let data = self.eval_sequence(sheet, &region.start, &grid.data, scope)?;
        let (Some(headers), Some(data)) = (headers, data) else {
            return Ok(Extent {
                rows: 0,
                cols: region.cols(),
            });
        };

        let body_row = if region.rows() > 1 {
            region.start.row + 1
        } else {
            region.start.row
        };
        let style_at = |template: &T, row: usize, col: usize| {
            let col = region.start.col + col.min(region.cols() - 1);
            template
                .cell(sheet, &CellRef::new(col, row))
                .and_then(|cell| cell.style)
        };

        let mut width = headers.len();
        for (col, header) in headers.into_iter().enumerate() {
            let cell = Cell {
                value: to_cell_value(header),
                style: style_at(self.template, region.start.row, col),
                comment: None,
            };
            self.write(cursor.sheet, CellRef::new(cursor.col + col, cursor.row), cell)?;
        }
        let data_rows = data.len();
        for (row, values) in data.into_iter().enumerate() {
            let values = match values {
                Value::Sequence(values) => values,
                other => vec![other],
            };
            width = width.max(values.len());
            for (col, value) in values.into_iter().enumerate() {
                let cell = Cell {
                    value: to_cell_value(value),
                    style: style_at(self.template, body_row, col),
                    comment: None,
                };
                let at = CellRef::new(cursor.col + col, cursor.row + 1 + row);
                self.write(cursor.sheet, at, cell)?;
            }
        }

        for at in region.cells() {
            let col = cursor.col + (at.col - region.start.col);
            if at.row == region.start.row {
                self.record_placement(sheet, &at, cursor.sheet, CellRef::new(col, cursor.row), path);
            } else {
                for row in 0..data_rows {
                    let out = CellRef::new(col, cursor.row + 1 + row);
                    self.record_placement(sheet, &at, cursor.sheet, out, path);
                }
            }
        }

        Ok(Extent {
            rows: 1 + data_rows,
            cols: width.max(1),
        })
    }

    fn render_image(
        &mut self,
        node: &CommandNode,
        image: &ImageCommand,
        cursor: Cursor,
        scope: ScopeId,
        path: &Path,
    ) -> Result<Extent, FillError> {
        let command = &node.command;
        let anchor = &command.region.start;
        let extent =
            self.render_block(command.sheet, &command.region, &node.children, cursor, scope, path)?;

        let options = self.options;
        let Some(src) = self.eval(command.sheet, anchor, options.notation.unwrap(&image.src), scope)?
        else {
            return Ok(extent);
        };
        let Some(data) = image_bytes(&src) else {
            self.recover(
                command.sheet,
                anchor,
                EvalError::mismatch("binary image data for `src`", src.kind()),
            )?;
            return Ok(extent);
        };
        if !image.image_type.matches(&data) {
            self.recover(
                command.sheet,
                anchor,
                EvalError::mismatch(
                    format!("{} image data", image.image_type.name()),
                    "bytes of another format",
                ),
            )?;
            return Ok(extent);
        }
        if let Some(region) = Region::with_size(&cursor.cell(), extent.rows, extent.cols) {
            self.output.insert_image(
                cursor.sheet,
                Image {
                    kind: image.image_type,
                    data,
                    region,
                },
            )?;
        }
        Ok(extent)
    }

    fn render_merge(
        &mut self,
        node: &CommandNode,
        merge: &MergeCellsCommand,
        cursor: Cursor,
        scope: ScopeId,
        path: &Path,
    ) -> Result<Extent, FillError> {
        let command = &node.command;
        let extent =
            self.render_block(command.sheet, &command.region, &node.children, cursor, scope, path)?;
        let cols = self.eval_count(command.sheet, &command.region.start, &merge.cols, scope)?;
        let rows = self.eval_count(command.sheet, &command.region.start, &merge.rows, scope)?;
        let (Some(cols), Some(rows)) = (cols, rows) else {
            return Ok(extent);
        };
        let size = cols.checked_mul(rows);
        if size.is_some_and(|size| size <= 1) {
            return Ok(extent);
        }
        match size.and(Region::with_size(&cursor.cell(), rows, cols)) {
            Some(region) => self.output.add_merge(cursor.sheet, region)?,
            None => self.recover(
                command.sheet,
                &command.region.start,
                EvalError::mismatch(
                    "merge size within the sheet",
                    format!("{} row(s) by {} column(s)", rows, cols),
                ),
            )?,
        }
        Ok(extent)
    }

    /// A literal count or an expression yielding a non-negative whole number.
    fn eval_count(
        &mut self,
        sheet: usize,
        at: &CellRef,
        attr: &str,
        scope: ScopeId,
    ) -> Result<Option<usize>, FillError> {
        let options = self.options;
        let expr = options.notation.unwrap(attr);
        if let Ok(count) = expr.parse::<usize>() {
            return Ok(Some(count));
        }
        match self.eval(sheet, at, expr, scope)? {
            None => Ok(None),
            Some(Value::Number(n)) if n >= 0.0 && n.fract() == 0.0 => Ok(Some(n as usize)),
            Some(other) => {
                self.recover(sheet, at, EvalError::mismatch("whole number", other.kind()))?;
                Ok(None)
            }
        }
    }

    /// Re-point every copied formula at the output cells its references landed on.
    fn rewrite_formulas(&mut self) -> Result<(), FillError> {
        let formulas = std::mem::take(&mut self.formulas);
        for pending in &formulas {
            let rewritten = rewrite_formula_references(&pending.formula, |cell, span| {
                self.resolve_reference(pending, cell, span)
            });
            if rewritten == pending.formula {
                continue;
            }
            let mut cell = self
                .output
                .cell(pending.sheet, &pending.at)
                .unwrap_or_default();
            cell.value = CellValue::Formula(rewritten);
            self.output.set_cell(pending.sheet, pending.at.clone(), cell)?;
        }
        Ok(())
    }

    fn resolve_reference(
        &self,
        pending: &PendingFormula,
        cell: &CellRef,
        span: RefSpan,
    ) -> RefTarget {
        let candidates: Vec<&Placement> = self
            .placements
            .get(&(pending.template_sheet, cell.clone()))
            .map(|placed| placed.iter().filter(|p| p.sheet == pending.sheet).collect())
            .unwrap_or_default();

        if candidates.is_empty() {
            let in_area = self
                .area_regions
                .get(pending.template_sheet)
                .is_some_and(|areas| areas.iter().any(|area| area.contains(cell)));
            return if in_area {
                RefTarget::Invalid
            } else {
                RefTarget::Unchanged
            };
        }

        let shared = |p: &Placement| {
            p.path
                .iter()
                .zip(pending.path.iter())
                .take_while(|(a, b)| a == b)
                .count()
        };
        let best = candidates.iter().copied().map(&shared).max().unwrap_or(0);
        let cells = candidates
            .iter()
            .copied()
            .filter(|p| shared(*p) == best)
            .map(|p| &p.cell);

        let target = match span {
            RefSpan::Single => cells.max_by_key(|c| (c.row, c.col)).cloned(),
            RefSpan::RangeStart => cells.fold(None, |acc: Option<CellRef>, c| {
                Some(match acc {
                    None => c.clone(),
                    Some(a) => CellRef::new(a.col.min(c.col), a.row.min(c.row)),
                })
            }),
            RefSpan::RangeEnd => cells.fold(None, |acc: Option<CellRef>, c| {
                Some(match acc {
                    None => c.clone(),
                    Some(a) => CellRef::new(a.col.max(c.col), a.row.max(c.row)),
                })
            }),
        };
        target.map_or(RefTarget::Unchanged, RefTarget::Moved)
    }

    /// Place spawned sheets after their template sheet and drop the templates.
    fn arrange_sheets(&mut self) -> Result<(), FillError> {
        for (sheet, template_name) in self.sheet_names.iter().enumerate() {
            let Some(mut position) = self.output.sheet_index(template_name) else {
                continue;
            };
            for (_, name) in self.spawned.iter().filter(|(from, _)| *from == sheet) {
                let Some(idx) = self.output.sheet_index(name) else {
                    continue;
                };
                position += 1;
                if idx != position {
                    self.output.move_sheet(idx, position)?;
                }
            }
            if self.multisheet_templates.contains(&sheet) && !self.options.keep_template_sheet {
                if let Some(idx) = self.output.sheet_index(template_name) {
                    log::debug!("dropping template sheet `{}`", template_name);
                    self.output.delete_sheet(idx)?;
                }
            }
        }
        Ok(())
    }
}

/// Select, then group, then order, as configured on the each.
fn arrange_items(
    evaluator: &mut Evaluator,
    notation: &Notation,
    each: &EachCommand,
    items: Vec<Value>,
    outer: &dyn Resolver,
) -> Result<Vec<Value>, EvalError> {
    let var = each.var.as_str();
    let items = match &each.select {
        Some(condition) => {
            collection::select(evaluator, items, var, notation.unwrap(condition), outer)?
        }
        None => items,
    };
    let keys = each
        .order_by
        .as_deref()
        .map(|order| collection::parse_order_by(notation.unwrap(order)))
        .unwrap_or_default();

    let Some(group_by) = &each.group_by else {
        return collection::order_by(evaluator, items, var, &keys, outer);
    };
    let mut groups = collection::group_by(evaluator, items, var, notation.unwrap(group_by), outer)?;
    for group in &mut groups {
        let members = std::mem::take(&mut group.items);
        group.items = collection::order_by(evaluator, members, var, &keys, outer)?;
    }
    if let Some(order) = each.group_order {
        collection::sort_groups(&mut groups, order);
    }
    Ok(groups.into_iter().map(Group::into_value).collect())
}

fn empty_extent(region: &Region, direction: Direction) -> Extent {
    match direction {
        Direction::Down => Extent {
            rows: 0,
            cols: region.cols(),
        },
        Direction::Right => Extent {
            rows: region.rows(),
            cols: 0,
        },
    }
}

/// Sum of row growth from rendered commands that end above `row` and span `col`.
fn rows_above(done: &[Rendered], row: usize, col: usize) -> isize {
    done.iter()
        .filter(|d| d.region.end.row < row && d.region.spans_col(col))
        .map(|d| d.rows)
        .sum()
}

fn cols_left(done: &[Rendered], col: usize, row: usize) -> isize {
    done.iter()
        .filter(|d| d.region.end.col < col && d.region.spans_row(row))
        .map(|d| d.cols)
        .sum()
}

fn to_cell_value(value: Value) -> CellValue {
    match value {
        Value::Null => CellValue::Empty,
        Value::Bool(b) => CellValue::Bool(b),
        Value::Number(n) => CellValue::Number(n),
        Value::String(s) => CellValue::Text(s),
        Value::Hyperlink { url, label } => CellValue::Hyperlink { url, label },
        other => CellValue::Text(other.to_display()),
    }
}

/// Binary values, or sequences of byte-sized numbers as decoded from JSON.
fn image_bytes(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::Binary(bytes) => Some(bytes.clone()),
        Value::Sequence(items) => items
            .iter()
            .map(|item| match item {
                Value::Number(n) if (0.0..=255.0).contains(n) && n.fract() == 0.0 => Some(*n as u8),
                _ => None,
            })
            .collect(),
        _ => None,
    }
}
