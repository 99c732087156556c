//! gridfill-core - Workbook storage and fill entry points.

pub mod error;
pub mod fill;
pub mod storage;

pub use error::{GridfillError, Result};
pub use fill::{Filled, fill_stream, fill_to_bytes, fill_to_path, fill_workbook, read_data};

pub use gridfill_engine::engine::{FillOptions, FillReport, Notation, Value, Workbook};
