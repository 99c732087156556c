//! Formula reference rewriting.
//!
//! Formulas are copied, never evaluated. Their A1 references still point at
//! template coordinates after a fill, so every reference is handed to a
//! resolver that knows where that template cell ended up:
//!
//! - `A1`, `$A$1`, `A$1` are single references; `$` markers are kept
//! - `A1:B5` is a range; each corner is resolved separately
//! - text inside `"..."` or `'...'` is left alone
//! - function names (`LOG10(`) and sheet-qualified refs (`Data!A1`) are skipped

use regex::{Captures, Regex};
use std::sync::OnceLock;

use super::CellRef;

/// Which part of a reference is being resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefSpan {
    Single,
    RangeStart,
    RangeEnd,
}

/// Where a referenced template cell landed in the output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefTarget {
    /// Leave the reference text as written.
    Unchanged,
    Moved(CellRef),
    /// The referenced cells were not rendered; the reference becomes `#REF!`.
    Invalid,
}

pub const INVALID_REF: &str = "#REF!";

fn reference_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\$?)([A-Za-z]{1,3})(\$?)([0-9]+)(?::(\$?)([A-Za-z]{1,3})(\$?)([0-9]+))?")
            .expect("reference regex must compile")
    })
}

/// A parsed reference corner with its absolute markers.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Anchored {
    cell: CellRef,
    col_abs: bool,
    row_abs: bool,
}

impl Anchored {
    fn parse(col_abs: &str, letters: &str, row_abs: &str, digits: &str) -> Option<Anchored> {
        let cell = CellRef::from_str(&format!("{}{}", letters, digits))?;
        Some(Anchored {
            cell,
            col_abs: !col_abs.is_empty(),
            row_abs: !row_abs.is_empty(),
        })
    }

    fn render(&self, target: &CellRef) -> String {
        format!(
            "{}{}{}{}",
            if self.col_abs { "$" } else { "" },
            CellRef::col_to_letters(target.col),
            if self.row_abs { "$" } else { "" },
            target.row + 1
        )
    }
}

/// Rewrite every reference in `formula` through `resolve`.
pub fn rewrite_formula_references<F>(formula: &str, mut resolve: F) -> String
where
    F: FnMut(&CellRef, RefSpan) -> RefTarget,
{
    let mut out = String::with_capacity(formula.len());
    let mut quote: Option<char> = None;
    let mut seg_start = 0;

    for (idx, ch) in formula.char_indices() {
        match quote {
            Some(q) if ch == q => {
                out.push_str(&formula[seg_start..=idx]);
                quote = None;
                seg_start = idx + 1;
            }
            Some(_) => {}
            None if ch == '"' || ch == '\'' => {
                out.push_str(&rewrite_segment(&formula[seg_start..idx], &mut resolve));
                quote = Some(ch);
                seg_start = idx;
            }
            None => {}
        }
    }

    if seg_start < formula.len() {
        if quote.is_some() {
            out.push_str(&formula[seg_start..]);
        } else {
            out.push_str(&rewrite_segment(&formula[seg_start..], &mut resolve));
        }
    }
    out
}

fn rewrite_segment<F>(segment: &str, resolve: &mut F) -> String
where
    F: FnMut(&CellRef, RefSpan) -> RefTarget,
{
    reference_re()
        .replace_all(segment, |caps: &Captures| {
            let text = caps[0].to_string();
            let Some(whole) = caps.get(0) else {
                return text;
            };
            let before = segment[..whole.start()].chars().next_back();
            let after = segment[whole.end()..].chars().next();
            let glued_before = before
                .is_some_and(|c| c.is_alphanumeric() || matches!(c, '_' | '!' | '.'));
            let glued_after =
                after.is_some_and(|c| c.is_alphanumeric() || matches!(c, '_' | '(' | '!'));
            if glued_before || glued_after {
                return text;
            }

            let Some(first) = Anchored::parse(&caps[1], &caps[2], &caps[3], &caps[4]) else {
                return text;
            };

            if caps.get(6).is_none() {
                return match resolve(&first.cell, RefSpan::Single) {
                    RefTarget::Unchanged => text,
                    RefTarget::Moved(target) => first.render(&target),
                    RefTarget::Invalid => INVALID_REF.to_string(),
                };
            }

            let Some(second) = Anchored::parse(&caps[5], &caps[6], &caps[7], &caps[8]) else {
                return text;
            };
            let start = resolve(&first.cell, RefSpan::RangeStart);
            let end = resolve(&second.cell, RefSpan::RangeEnd);
            if start == RefTarget::Invalid || end == RefTarget::Invalid {
                return INVALID_REF.to_string();
            }
            let (head, tail) = text.split_once(':').unwrap_or((text.as_str(), ""));
            let start = match start {
                RefTarget::Moved(target) => first.render(&target),
                _ => head.to_string(),
            };
            let end = match end {
                RefTarget::Moved(target) => second.render(&target),
                _ => tail.to_string(),
            };
            format!("{}:{}", start, end)
        })
        .into_owned()
}
