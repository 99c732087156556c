//! Placeholder markers inside cell text.
//!
//! A placeholder is an expression wrapped in a start/end marker pair, `${`
//! and `}` unless configured otherwise. End markers inside quoted string
//! literals do not close the placeholder.

use super::ConfigError;

/// A piece of cell text: literal text or a placeholder's expression source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Segment<'a> {
    Literal(&'a str),
    Expression(&'a str),
}

/// The start/end marker pair delimiting placeholders.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notation {
    start: String,
    end: String,
}

impl Default for Notation {
    fn default() -> Self {
        Notation {
            start: "${".to_string(),
            end: "}".to_string(),
        }
    }
}

impl Notation {
    pub fn new(start: &str, end: &str) -> Result<Notation, ConfigError> {
        if start.is_empty() || end.is_empty() {
            return Err(ConfigError::InvalidData(
                "expression notation markers must not be empty".to_string(),
            ));
        }
        Ok(Notation {
            start: start.to_string(),
            end: end.to_string(),
        })
    }

    pub fn start(&self) -> &str {
        &self.start
    }

    pub fn end(&self) -> &str {
        &self.end
    }

    pub fn has_placeholder(&self, text: &str) -> bool {
        self.segments(text)
            .iter()
            .any(|segment| matches!(segment, Segment::Expression(_)))
    }

    /// Split text into literal and placeholder segments. An unterminated
    /// start marker and everything after it stay literal.
    pub fn segments<'a>(&self, text: &'a str) -> Vec<Segment<'a>> {
        let mut segments = Vec::new();
        let mut rest = text;

        while let Some(open) = rest.find(self.start.as_str()) {
            let body_start = open + self.start.len();
            let Some(close) = self.find_end(&rest[body_start..]) else {
                break;
            };
            if open > 0 {
                segments.push(Segment::Literal(&rest[..open]));
            }
            segments.push(Segment::Expression(&rest[body_start..body_start + close]));
            rest = &rest[body_start + close + self.end.len()..];
        }

        if !rest.is_empty() {
            segments.push(Segment::Literal(rest));
        }
        segments
    }

    /// The expression inside text that is exactly one placeholder, otherwise
    /// the trimmed text itself. Command attributes accept both spellings.
    pub fn unwrap<'a>(&self, text: &'a str) -> &'a str {
        let trimmed = text.trim();
        match self.segments(trimmed).as_slice() {
            [Segment::Expression(expr)] => *expr,
            _ => trimmed,
        }
    }

    fn find_end(&self, body: &str) -> Option<usize> {
        let mut quote: Option<char> = None;
        let mut escaped = false;
        for (idx, ch) in body.char_indices() {
            if let Some(q) = quote {
                if escaped {
                    escaped = false;
                } else if ch == '\\' {
                    escaped = true;
                } else if ch == q {
                    quote = None;
                }
                continue;
            }
            if body[idx..].starts_with(self.end.as_str()) {
                return Some(idx);
            }
            if ch == '"' || ch == '\'' {
                quote = Some(ch);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_placeholder() {
        let notation = Notation::default();
        assert_eq!(
            notation.segments("${e.name}"),
            vec![Segment::Expression("e.name")]
        );
    }

    #[test]
    fn test_mixed_text() {
        let notation = Notation::default();
        assert_eq!(
            notation.segments("Hi ${a}, total ${b + 1}!"),
            vec![
                Segment::Literal("Hi "),
                Segment::Expression("a"),
                Segment::Literal(", total "),
                Segment::Expression("b + 1"),
                Segment::Literal("!"),
            ]
        );
    }

    #[test]
    fn test_end_marker_inside_string_literal() {
        let notation = Notation::default();
        assert_eq!(
            notation.segments("${x == '}'} done"),
            vec![Segment::Expression("x == '}'"), Segment::Literal(" done")]
        );
    }

    #[test]
    fn test_unterminated_placeholder_is_literal() {
        let notation = Notation::default();
        assert_eq!(notation.segments("cost ${a"), vec![Segment::Literal("cost ${a")]);
        assert!(!notation.has_placeholder("cost ${a"));
    }

    #[test]
    fn test_custom_markers_leave_default_literal() {
        let notation = Notation::new("{{", "}}").unwrap();
        assert_eq!(
            notation.segments("{{name}} and ${name}"),
            vec![Segment::Expression("name"), Segment::Literal(" and ${name}")]
        );
        assert!(Notation::new("", "}").is_err());
    }

    #[test]
    fn test_unwrap_attribute() {
        let notation = Notation::default();
        assert_eq!(notation.unwrap(" ${employees} "), "employees");
        assert_eq!(notation.unwrap("employees"), "employees");
    }
}
