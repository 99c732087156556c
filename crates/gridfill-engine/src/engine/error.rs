//! Error types for template fills.
//!
//! Parse and configuration errors mean the template itself is structurally
//! invalid and always abort. Evaluation errors are recorded as
//! [`Diagnostic`]s and the fill continues, unless fail-fast is configured.
//! Adapter errors always abort.

use std::fmt;
use thiserror::Error;

use super::{CellRef, Region};

/// A template coordinate used to report where something went wrong.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Location {
    pub sheet: String,
    pub cell: CellRef,
}

impl Location {
    pub fn new(sheet: impl Into<String>, cell: CellRef) -> Location {
        Location {
            sheet: sheet.into(),
            cell,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!{}", self.sheet, self.cell)
    }
}

/// Errors raised while evaluating an expression.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("unresolved variable `{0}`")]
    UnresolvedVariable(String),

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("malformed expression `{expr}`: {message}")]
    Malformed { expr: String, message: String },

    #[error("division by zero")]
    DivisionByZero,

    #[error("unknown function `{0}`")]
    UnknownFunction(String),

    #[error("function `{name}` expects {expected} argument(s), got {got}")]
    ArgumentCount {
        name: String,
        expected: String,
        got: usize,
    },
}

impl EvalError {
    pub(crate) fn mismatch(expected: impl Into<String>, found: impl Into<String>) -> EvalError {
        EvalError::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }
}

/// Errors in the command annotations themselves.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("{location}: unknown command `{name}`")]
    UnknownCommand { location: Location, name: String },

    #[error("{location}: command `{command}` is missing required attribute `{attribute}`")]
    MissingAttribute {
        location: Location,
        command: String,
        attribute: String,
    },

    #[error("{location}: invalid value `{value}` for attribute `{attribute}` of `{command}`")]
    InvalidAttribute {
        location: Location,
        command: String,
        attribute: String,
        value: String,
    },

    #[error("{location}: malformed command `{text}`: {message}")]
    Malformed {
        location: Location,
        text: String,
        message: String,
    },
}

/// Structural problems with how commands are laid out, or with fill inputs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{location}: `{command}` region {region} is not contained in an enclosing area")]
    RegionOutOfBounds {
        location: Location,
        command: String,
        region: Region,
    },

    #[error("{location}: `{first}` overlaps sibling `{second}` at {other}")]
    OverlappingCommands {
        location: Location,
        first: String,
        second: String,
        other: CellRef,
    },

    #[error("{location}: each region {region} is empty")]
    EmptyEachRegion { location: Location, region: Region },

    #[error("{location}: multisheet lists {names} sheet name(s) for {items} item(s)")]
    MultisheetMismatch {
        location: Location,
        names: usize,
        items: usize,
    },

    #[error("{location}: a multisheet each must sit directly inside an area")]
    NestedMultisheet { location: Location },

    #[error("{location}: sheet `{name}` already exists")]
    SheetNameConflict { location: Location, name: String },

    #[error("invalid fill input: {0}")]
    InvalidData(String),
}

/// Failures reported by a grid document adapter.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("sheet index {0} does not exist")]
    SheetNotFound(usize),

    #[error("sheet `{0}` already exists")]
    DuplicateSheet(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// The first fatal error of a fill.
#[derive(Error, Debug)]
pub enum FillError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{location}: {source}")]
    Eval {
        location: Location,
        #[source]
        source: EvalError,
    },

    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

/// A recoverable evaluation error that was skipped over.
#[derive(Clone, Debug, PartialEq)]
pub struct Diagnostic {
    pub location: Location,
    pub error: EvalError,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.error)
    }
}

/// A failed fill: the fatal error plus everything recorded before it.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct FillFailure {
    #[source]
    pub error: FillError,
    pub diagnostics: Vec<Diagnostic>,
}
