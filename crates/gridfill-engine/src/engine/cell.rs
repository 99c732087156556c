//! Cell data structures for template and output grids.
//!
//! - [`CellValue`] - What a cell holds (text, number, boolean, formula, hyperlink)
//! - [`Cell`] - A value plus its style reference and comment
//! - [`ImageType`], [`Image`] - Anchored pictures
//! - [`Grid`] - Thread-safe sparse storage for cells (backed by `DashMap`)

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::cell_ref::{CellRef, Region};

/// The content stored in a cell.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
    /// Formula text without the leading `=`. Never evaluated, only copied.
    Formula(String),
    Hyperlink { url: String, label: String },
}

/// A cell in a grid document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub value: CellValue,
    /// Opaque style reference owned by the document format.
    pub style: Option<String>,
    /// Cell comment; template commands live here.
    pub comment: Option<String>,
}

impl Cell {
    pub fn new_empty() -> Cell {
        Cell::default()
    }

    pub fn new_text(text: &str) -> Cell {
        Cell::from_value(CellValue::Text(text.to_string()))
    }

    pub fn new_number(n: f64) -> Cell {
        Cell::from_value(CellValue::Number(n))
    }

    pub fn new_bool(b: bool) -> Cell {
        Cell::from_value(CellValue::Bool(b))
    }

    pub fn new_formula(formula: &str) -> Cell {
        Cell::from_value(CellValue::Formula(formula.to_string()))
    }

    pub fn from_value(value: CellValue) -> Cell {
        Cell {
            value,
            style: None,
            comment: None,
        }
    }

    pub fn with_style(mut self, style: &str) -> Cell {
        self.style = Some(style.to_string());
        self
    }

    pub fn with_comment(mut self, comment: &str) -> Cell {
        self.comment = Some(comment.to_string());
        self
    }

    /// True when the cell carries nothing worth writing.
    pub fn is_blank(&self) -> bool {
        matches!(self.value, CellValue::Empty) && self.style.is_none() && self.comment.is_none()
    }
}

/// Supported picture encodings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageType {
    Png,
    Jpeg,
    Gif,
    Bmp,
}

impl ImageType {
    pub fn parse(name: &str) -> Option<ImageType> {
        match name.trim().to_ascii_uppercase().as_str() {
            "PNG" => Some(ImageType::Png),
            "JPEG" | "JPG" => Some(ImageType::Jpeg),
            "GIF" => Some(ImageType::Gif),
            "BMP" => Some(ImageType::Bmp),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ImageType::Png => "PNG",
            ImageType::Jpeg => "JPEG",
            ImageType::Gif => "GIF",
            ImageType::Bmp => "BMP",
        }
    }

    /// Check the leading magic bytes of an encoded picture.
    pub fn matches(&self, data: &[u8]) -> bool {
        match self {
            ImageType::Png => data.starts_with(&[0x89, b'P', b'N', b'G']),
            ImageType::Jpeg => data.starts_with(&[0xFF, 0xD8]),
            ImageType::Gif => data.starts_with(b"GIF8"),
            ImageType::Bmp => data.starts_with(b"BM"),
        }
    }
}

/// A picture anchored over a block of cells.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub kind: ImageType,
    pub data: Vec<u8>,
    pub region: Region,
}

/// Thread-safe sparse grid storage.
pub type Grid = DashMap<CellRef, Cell>;
