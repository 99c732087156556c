//! Template engine API.
//!
//! This module turns an annotated template grid plus a data value into a
//! filled output grid:
//!
//! - [`CellRef`], [`Region`] - A1 coordinates and the rectangles commands govern
//! - [`Cell`], [`CellValue`], [`Grid`] - Data structures for cell storage
//! - [`GridAdapter`], [`Workbook`] - The document seam and its in-memory implementation
//! - [`Value`], [`Evaluator`] - Data values and the expression language over them
//! - [`Context`] - Chained variable scopes
//! - [`collect_commands`], [`build_tree`] - Command parsing and nesting
//! - [`fill`] - The transform engine
//! - [`rewrite_formula_references`] - Re-pointing copied formulas

mod adapter;
mod cell;
mod cell_ref;
mod collection;
mod command;
mod context;
mod error;
mod eval;
mod expr;
mod format;
mod formula;
mod notation;
mod transform;
mod tree;
mod value;
mod workbook;

pub use adapter::GridAdapter;
pub use cell::{Cell, CellValue, Grid, Image, ImageType};
pub use cell_ref::{CellRef, Region};
pub use collection::{Group, SortKey, parse_order_by};
pub use command::{
    COMMAND_PREFIX, Command, CommandKind, Direction, EachCommand, GridCommand, IfCommand,
    ImageCommand, MergeCellsCommand, SortOrder, collect_commands, parse_annotation,
    strip_commands,
};
pub use context::{Context, ScopeId, ScopeView};
pub use error::{
    AdapterError, ConfigError, Diagnostic, EvalError, FillError, FillFailure, Location,
    ParseError,
};
pub use eval::{Evaluator, Resolver, truthy};
pub use expr::{Expr, parse_expression};
pub use format::{format_number, format_value};
pub use formula::{INVALID_REF, RefSpan, RefTarget, rewrite_formula_references};
pub use notation::{Notation, Segment};
pub use transform::{FillOptions, FillReport, fill};
pub use tree::{CommandNode, CommandTree, build_tree};
pub use value::Value;
pub use workbook::{Sheet, Workbook};
