//! Command annotations attached to template cells.
//!
//! A cell comment may hold several declarations, one per line:
//!
//! ```text
//! jx:area(lastCell="D10")
//! jx:each(items="employees" var="e" lastCell="D2" orderBy="e.name DESC")
//! ```
//!
//! Lines that do not start with `jx:` are ordinary comment text and are kept
//! in the output.

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

use super::{CellRef, GridAdapter, ImageType, Location, ParseError, Region};

pub const COMMAND_PREFIX: &str = "jx:";

const COMMAND_NAMES: &[&str] = &[
    "area",
    "each",
    "if",
    "grid",
    "image",
    "mergeCells",
    "autoRowHeight",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Down,
    Right,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn parse(text: &str) -> Option<SortOrder> {
        match text.to_ascii_uppercase().as_str() {
            "ASC" => Some(SortOrder::Asc),
            "DESC" => Some(SortOrder::Desc),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EachCommand {
    pub items: String,
    pub var: String,
    pub var_index: Option<String>,
    pub direction: Direction,
    pub select: Option<String>,
    pub order_by: Option<String>,
    pub group_by: Option<String>,
    pub group_order: Option<SortOrder>,
    pub multisheet: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IfCommand {
    pub condition: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GridCommand {
    pub headers: String,
    pub data: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ImageCommand {
    pub src: String,
    pub image_type: ImageType,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MergeCellsCommand {
    pub cols: String,
    pub rows: String,
}

/// The closed set of template commands.
#[derive(Clone, Debug, PartialEq)]
pub enum CommandKind {
    Area,
    Each(EachCommand),
    If(IfCommand),
    Grid(GridCommand),
    Image(ImageCommand),
    MergeCells(MergeCellsCommand),
    AutoRowHeight,
}

impl CommandKind {
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::Area => "area",
            CommandKind::Each(_) => "each",
            CommandKind::If(_) => "if",
            CommandKind::Grid(_) => "grid",
            CommandKind::Image(_) => "image",
            CommandKind::MergeCells(_) => "mergeCells",
            CommandKind::AutoRowHeight => "autoRowHeight",
        }
    }

    /// Commands whose region can hold nested commands.
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            CommandKind::Area | CommandKind::Each(_) | CommandKind::If(_)
        )
    }
}

/// A parsed command anchored on a template sheet.
#[derive(Clone, Debug, PartialEq)]
pub struct Command {
    pub kind: CommandKind,
    /// Template sheet index.
    pub sheet: usize,
    pub region: Region,
    /// Declaration order across the whole template.
    pub order: usize,
}

impl Command {
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn anchor(&self) -> &CellRef {
        &self.region.start
    }
}

fn command_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^jx:([A-Za-z]+)\s*\((.*)\)\s*$").expect("command regex must compile")
    })
}

pub fn is_command_line(line: &str) -> bool {
    line.trim_start().starts_with(COMMAND_PREFIX)
}

/// Comment text with every command line removed, or None if nothing is left.
pub fn strip_commands(comment: &str) -> Option<String> {
    let kept: Vec<&str> = comment.lines().filter(|line| !is_command_line(line)).collect();
    let text = kept.join("\n");
    if text.trim().is_empty() { None } else { Some(text) }
}

/// Scan every comment of every template sheet for commands.
pub fn collect_commands<T: GridAdapter + ?Sized>(template: &T) -> Result<Vec<Command>, ParseError> {
    let mut commands = Vec::new();
    for sheet in 0..template.sheet_count() {
        let sheet_name = template.sheet_name(sheet).unwrap_or_default();
        for at in template.populated_cells(sheet, None) {
            let Some(comment) = template.cell(sheet, &at).and_then(|cell| cell.comment) else {
                continue;
            };
            for mut command in parse_annotation(&comment, sheet, &sheet_name, &at)? {
                command.order = commands.len();
                commands.push(command);
            }
        }
    }
    Ok(commands)
}

/// Parse every command declared in one cell comment.
pub fn parse_annotation(
    text: &str,
    sheet: usize,
    sheet_name: &str,
    anchor: &CellRef,
) -> Result<Vec<Command>, ParseError> {
    let location = Location::new(sheet_name, anchor.clone());
    text.lines()
        .map(str::trim)
        .filter(|line| is_command_line(line))
        .map(|line| parse_command(line, sheet, anchor, &location))
        .collect()
}

fn parse_command(
    line: &str,
    sheet: usize,
    anchor: &CellRef,
    location: &Location,
) -> Result<Command, ParseError> {
    let malformed = |message: &str| ParseError::Malformed {
        location: location.clone(),
        text: line.to_string(),
        message: message.to_string(),
    };

    let caps = command_re()
        .captures(line)
        .ok_or_else(|| malformed("expected jx:<name>(<key>=\"<value>\" ...)"))?;
    let name = caps[1].to_string();
    if !COMMAND_NAMES.contains(&name.as_str()) {
        return Err(ParseError::UnknownCommand {
            location: location.clone(),
            name,
        });
    }
    let attrs = parse_attributes(&caps[2]).map_err(|message| malformed(&message))?;
    let attrs = Attributes {
        command: &name,
        location,
        values: attrs,
    };

    let last_cell = attrs.required("lastCell")?;
    let end = parse_last_cell(last_cell).ok_or_else(|| attrs.invalid("lastCell", last_cell))?;

    let kind = match name.as_str() {
        "area" => CommandKind::Area,
        "each" => {
            let direction = match attrs.optional("direction") {
                None => Direction::Down,
                Some(d) => match d.to_ascii_uppercase().as_str() {
                    "DOWN" => Direction::Down,
                    "RIGHT" => Direction::Right,
                    _ => return Err(attrs.invalid("direction", d)),
                },
            };
            let group_order = match attrs.optional("groupOrder") {
                None => None,
                Some(o) => Some(SortOrder::parse(o).ok_or_else(|| attrs.invalid("groupOrder", o))?),
            };
            CommandKind::Each(EachCommand {
                items: attrs.required("items")?.to_string(),
                var: attrs.required("var")?.to_string(),
                var_index: attrs.optional_owned("varIndex"),
                direction,
                select: attrs.optional_owned("select"),
                order_by: attrs.optional_owned("orderBy"),
                group_by: attrs.optional_owned("groupBy"),
                group_order,
                multisheet: attrs.optional_owned("multisheet"),
            })
        }
        "if" => CommandKind::If(IfCommand {
            condition: attrs.required("condition")?.to_string(),
        }),
        "grid" => CommandKind::Grid(GridCommand {
            headers: attrs.required("headers")?.to_string(),
            data: attrs.required("data")?.to_string(),
        }),
        "image" => {
            let src = attrs.required("src")?.to_string();
            let image_type = attrs.required("imageType")?;
            let image_type =
                ImageType::parse(image_type).ok_or_else(|| attrs.invalid("imageType", image_type))?;
            CommandKind::Image(ImageCommand { src, image_type })
        }
        "mergeCells" => CommandKind::MergeCells(MergeCellsCommand {
            cols: attrs.required("cols")?.to_string(),
            rows: attrs.required("rows")?.to_string(),
        }),
        _ => CommandKind::AutoRowHeight,
    };

    attrs.warn_unknown(&kind);

    Ok(Command {
        kind,
        sheet,
        region: Region::new(anchor.clone(), end),
        order: 0,
    })
}

/// `lastCell` may be sheet-qualified (`Sheet1!C5`); the sheet part is ignored.
fn parse_last_cell(text: &str) -> Option<CellRef> {
    let cell = text.rsplit_once('!').map(|(_, cell)| cell).unwrap_or(text);
    CellRef::from_str(&cell.trim().replace('$', ""))
}

struct Attributes<'a> {
    command: &'a str,
    location: &'a Location,
    values: HashMap<String, String>,
}

impl Attributes<'_> {
    fn required(&self, name: &str) -> Result<&str, ParseError> {
        self.optional(name).ok_or_else(|| ParseError::MissingAttribute {
            location: self.location.clone(),
            command: self.command.to_string(),
            attribute: name.to_string(),
        })
    }

    fn optional(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    fn optional_owned(&self, name: &str) -> Option<String> {
        self.optional(name)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    fn invalid(&self, attribute: &str, value: &str) -> ParseError {
        ParseError::InvalidAttribute {
            location: self.location.clone(),
            command: self.command.to_string(),
            attribute: attribute.to_string(),
            value: value.to_string(),
        }
    }

    fn warn_unknown(&self, kind: &CommandKind) {
        let known: &[&str] = match kind {
            CommandKind::Each(_) => &[
                "items",
                "var",
                "varIndex",
                "direction",
                "select",
                "orderBy",
                "groupBy",
                "groupOrder",
                "multisheet",
            ],
            CommandKind::If(_) => &["condition"],
            CommandKind::Grid(_) => &["headers", "data"],
            CommandKind::Image(_) => &["src", "imageType"],
            CommandKind::MergeCells(_) => &["cols", "rows"],
            CommandKind::Area | CommandKind::AutoRowHeight => &[],
        };
        for key in self.values.keys() {
            if key != "lastCell" && !known.contains(&key.as_str()) {
                log::warn!(
                    "{}: ignoring unknown attribute `{}` on `{}`",
                    self.location,
                    key,
                    self.command
                );
            }
        }
    }
}

/// Parse `key="value" key2="value2"`; pairs may be separated by whitespace or commas.
fn parse_attributes(body: &str) -> Result<HashMap<String, String>, String> {
    let chars: Vec<char> = body.chars().collect();
    let mut attrs = HashMap::new();
    let mut i = 0usize;

    loop {
        while i < chars.len() && (chars[i].is_whitespace() || chars[i] == ',') {
            i += 1;
        }
        if i >= chars.len() {
            return Ok(attrs);
        }

        let key_start = i;
        while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
            i += 1;
        }
        if i == key_start {
            return Err(format!("expected attribute name at `{}`", chars[i]));
        }
        let key: String = chars[key_start..i].iter().collect();

        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }
        if chars.get(i) != Some(&'=') {
            return Err(format!("expected `=` after `{}`", key));
        }
        i += 1;
        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }
        if chars.get(i) != Some(&'"') {
            return Err(format!("value of `{}` must be double-quoted", key));
        }
        i += 1;

        let mut value = String::new();
        loop {
            let Some(&ch) = chars.get(i) else {
                return Err(format!("unterminated value for `{}`", key));
            };
            i += 1;
            match ch {
                '"' => break,
                '\\' if chars.get(i) == Some(&'"') => {
                    value.push('"');
                    i += 1;
                }
                _ => value.push(ch),
            }
        }

        if attrs.insert(key.clone(), value).is_some() {
            log::warn!("duplicate attribute `{}`; the last value wins", key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<Vec<Command>, ParseError> {
        parse_annotation(text, 0, "Sheet1", &CellRef::new(0, 1))
    }

    #[test]
    fn test_parse_each_with_all_attributes() {
        let commands = parse(
            r#"jx:each(items="employees" var="e" varIndex="i" direction="RIGHT" select="e.salary >= 6000" orderBy="e.name DESC" groupBy="e.dept" groupOrder="desc" lastCell="C2")"#,
        )
        .unwrap();
        assert_eq!(commands.len(), 1);
        let command = &commands[0];
        assert_eq!(command.region.to_string(), "A2:C2");
        let CommandKind::Each(each) = &command.kind else {
            panic!("expected each");
        };
        assert_eq!(each.items, "employees");
        assert_eq!(each.var, "e");
        assert_eq!(each.var_index.as_deref(), Some("i"));
        assert_eq!(each.direction, Direction::Right);
        assert_eq!(each.select.as_deref(), Some("e.salary >= 6000"));
        assert_eq!(each.order_by.as_deref(), Some("e.name DESC"));
        assert_eq!(each.group_by.as_deref(), Some("e.dept"));
        assert_eq!(each.group_order, Some(SortOrder::Desc));
        assert!(each.multisheet.is_none());
    }

    #[test]
    fn test_multiple_declarations_and_plain_lines() {
        let commands = parse(
            "Report template\njx:area(lastCell=\"D10\")\n  jx:if(condition=\"show\", lastCell=\"D1\")",
        )
        .unwrap();
        let names: Vec<_> = commands.iter().map(Command::name).collect();
        assert_eq!(names, vec!["area", "if"]);
        assert_eq!(commands[1].region.to_string(), "A2:D1");
    }

    #[test]
    fn test_every_kind_parses() {
        let text = [
            r#"jx:grid(headers="h" data="rows" lastCell="B3")"#,
            r#"jx:image(src="logo" imageType="jpg" lastCell="C4")"#,
            r#"jx:mergeCells(cols="2" rows="1" lastCell="B2")"#,
            r#"jx:autoRowHeight(lastCell="D2")"#,
        ]
        .join("\n");
        let commands = parse(&text).unwrap();
        assert!(matches!(commands[0].kind, CommandKind::Grid(_)));
        assert!(matches!(
            commands[1].kind,
            CommandKind::Image(ImageCommand {
                image_type: ImageType::Jpeg,
                ..
            })
        ));
        assert!(matches!(commands[2].kind, CommandKind::MergeCells(_)));
        assert_eq!(commands[3].kind, CommandKind::AutoRowHeight);
    }

    #[test]
    fn test_unknown_command() {
        let err = parse(r#"jx:loop(lastCell="B2")"#).unwrap_err();
        assert!(matches!(err, ParseError::UnknownCommand { ref name, .. } if name == "loop"));
    }

    #[test]
    fn test_missing_last_cell_and_required_attributes() {
        let err = parse(r#"jx:area()"#).unwrap_err();
        assert!(matches!(
            err,
            ParseError::MissingAttribute { ref attribute, .. } if attribute == "lastCell"
        ));
        let err = parse(r#"jx:each(items="xs" lastCell="B2")"#).unwrap_err();
        assert!(matches!(
            err,
            ParseError::MissingAttribute { ref attribute, .. } if attribute == "var"
        ));
        let err = parse(r#"jx:mergeCells(cols="2" lastCell="B2")"#).unwrap_err();
        assert!(matches!(
            err,
            ParseError::MissingAttribute { ref attribute, .. } if attribute == "rows"
        ));
    }

    #[test]
    fn test_invalid_attribute_values() {
        assert!(matches!(
            parse(r#"jx:area(lastCell="nowhere")"#),
            Err(ParseError::InvalidAttribute { .. })
        ));
        assert!(matches!(
            parse(r#"jx:each(items="a" var="x" direction="UP" lastCell="B2")"#),
            Err(ParseError::InvalidAttribute { .. })
        ));
        assert!(matches!(
            parse(r#"jx:image(src="a" imageType="tiff" lastCell="B2")"#),
            Err(ParseError::InvalidAttribute { .. })
        ));
        assert!(matches!(
            parse(r#"jx:area(lastCell="B2""#),
            Err(ParseError::Malformed { .. })
        ));
        assert!(matches!(
            parse(r#"jx:area(lastCell=B2)"#),
            Err(ParseError::Malformed { .. })
        ));
    }

    #[test]
    fn test_escaped_quotes_and_sheet_qualified_last_cell() {
        let commands =
            parse(r#"jx:if(condition="e.name == \"Bob\"" lastCell="Sheet1!$C$3")"#).unwrap();
        let CommandKind::If(cond) = &commands[0].kind else {
            panic!("expected if");
        };
        assert_eq!(cond.condition, r#"e.name == "Bob""#);
        assert_eq!(commands[0].region.end, CellRef::new(2, 2));
    }

    #[test]
    fn test_strip_commands() {
        assert_eq!(strip_commands("jx:area(lastCell=\"B2\")"), None);
        assert_eq!(
            strip_commands("note\njx:area(lastCell=\"B2\")"),
            Some("note".to_string())
        );
    }
}
