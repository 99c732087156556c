//! Nesting parsed commands by geometric containment.

use super::{Command, CommandKind, ConfigError, Location};

#[derive(Clone, Debug, PartialEq)]
pub struct CommandNode {
    pub command: Command,
    /// Ordered top-to-bottom, then left-to-right by anchor.
    pub children: Vec<CommandNode>,
}

impl CommandNode {
    fn new(command: Command) -> CommandNode {
        CommandNode {
            command,
            children: Vec::new(),
        }
    }

    /// Number of commands in this subtree, self included.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(CommandNode::size).sum::<usize>()
    }
}

/// The command forest of a template: one root per area.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CommandTree {
    pub roots: Vec<CommandNode>,
}

impl CommandTree {
    pub fn areas_on(&self, sheet: usize) -> impl Iterator<Item = &CommandNode> {
        self.roots
            .iter()
            .filter(move |node| node.command.sheet == sheet)
    }
}

fn rank(kind: &CommandKind) -> u8 {
    match kind {
        CommandKind::Area => 0,
        _ if kind.is_container() => 1,
        _ => 2,
    }
}

/// Build the command forest, rejecting structurally invalid layouts.
///
/// `sheet_names` maps template sheet indices to names for error locations.
pub fn build_tree(
    mut commands: Vec<Command>,
    sheet_names: &[String],
) -> Result<CommandTree, ConfigError> {
    let location = |command: &Command| {
        Location::new(
            sheet_names
                .get(command.sheet)
                .cloned()
                .unwrap_or_default(),
            command.anchor().clone(),
        )
    };

    for command in &commands {
        if !command.region.is_valid() {
            return Err(match command.kind {
                CommandKind::Each(_) => ConfigError::EmptyEachRegion {
                    location: location(command),
                    region: command.region.clone(),
                },
                _ => ConfigError::RegionOutOfBounds {
                    location: location(command),
                    command: command.name().to_string(),
                    region: command.region.clone(),
                },
            });
        }
    }

    // Larger regions first so every container precedes what it encloses.
    commands.sort_by(|a, b| {
        a.sheet
            .cmp(&b.sheet)
            .then(b.region.cell_count().cmp(&a.region.cell_count()))
            .then(rank(&a.kind).cmp(&rank(&b.kind)))
            .then(a.order.cmp(&b.order))
    });

    let mut parents: Vec<Option<usize>> = Vec::with_capacity(commands.len());
    for (idx, command) in commands.iter().enumerate() {
        if matches!(command.kind, CommandKind::Area) {
            if let Some(other) = commands[..idx].iter().find(|other| {
                matches!(other.kind, CommandKind::Area)
                    && other.sheet == command.sheet
                    && other.region.intersects(&command.region)
            }) {
                return Err(ConfigError::OverlappingCommands {
                    location: location(command),
                    first: command.name().to_string(),
                    second: other.name().to_string(),
                    other: other.anchor().clone(),
                });
            }
            parents.push(None);
            continue;
        }

        // The smallest enclosing container; the latest one on ties.
        let parent = commands[..idx]
            .iter()
            .enumerate()
            .filter(|(_, other)| {
                other.kind.is_container()
                    && other.sheet == command.sheet
                    && other.region.contains_region(&command.region)
            })
            .min_by(|(ia, a), (ib, b)| {
                a.region
                    .cell_count()
                    .cmp(&b.region.cell_count())
                    .then(ib.cmp(ia))
            })
            .map(|(i, _)| i);

        let Some(parent) = parent else {
            return Err(ConfigError::RegionOutOfBounds {
                location: location(command),
                command: command.name().to_string(),
                region: command.region.clone(),
            });
        };

        if let CommandKind::Each(each) = &command.kind {
            if each.multisheet.is_some() && !matches!(commands[parent].kind, CommandKind::Area) {
                return Err(ConfigError::NestedMultisheet {
                    location: location(command),
                });
            }
        }

        for (sibling, _) in parents.iter().enumerate().filter(|(_, p)| **p == Some(parent)) {
            let other = &commands[sibling];
            if other.region.intersects(&command.region) {
                return Err(ConfigError::OverlappingCommands {
                    location: location(command),
                    first: command.name().to_string(),
                    second: other.name().to_string(),
                    other: other.anchor().clone(),
                });
            }
        }

        parents.push(Some(parent));
    }

    let mut slots: Vec<Option<CommandNode>> = commands.into_iter().map(|c| Some(CommandNode::new(c))).collect();
    // Children always sort after their parent, so attaching in reverse
    // finishes every subtree before its parent is moved.
    for idx in (0..slots.len()).rev() {
        if let Some(parent) = parents[idx] {
            if let Some(node) = slots[idx].take() {
                if let Some(parent_node) = slots[parent].as_mut() {
                    parent_node.children.push(node);
                }
            }
        }
    }

    let mut roots: Vec<CommandNode> = slots.into_iter().flatten().collect();
    for root in &mut roots {
        sort_children(root);
    }
    roots.sort_by(|a, b| {
        (a.command.sheet, a.command.region.start.row, a.command.region.start.col).cmp(&(
            b.command.sheet,
            b.command.region.start.row,
            b.command.region.start.col,
        ))
    });

    log::debug!(
        "built command tree: {} area(s), {} command(s)",
        roots.len(),
        roots.iter().map(CommandNode::size).sum::<usize>()
    );
    Ok(CommandTree { roots })
}

fn sort_children(node: &mut CommandNode) {
    node.children.sort_by_key(|child| {
        (
            child.command.region.start.row,
            child.command.region.start.col,
            child.command.order,
        )
    });
    for child in &mut node.children {
        sort_children(child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{CellRef, EachCommand, Direction, IfCommand, Region};

    fn command(kind: CommandKind, region: &str, order: usize) -> Command {
        Command {
            kind,
            sheet: 0,
            region: Region::parse(region).unwrap(),
            order,
        }
    }

    fn each(region: &str, order: usize) -> Command {
        command(
            CommandKind::Each(EachCommand {
                items: "items".to_string(),
                var: "x".to_string(),
                var_index: None,
                direction: Direction::Down,
                select: None,
                order_by: None,
                group_by: None,
                group_order: None,
                multisheet: None,
            }),
            region,
            order,
        )
    }

    fn cond(region: &str, order: usize) -> Command {
        command(
            CommandKind::If(IfCommand {
                condition: "true".to_string(),
            }),
            region,
            order,
        )
    }

    fn names() -> Vec<String> {
        vec!["Sheet1".to_string()]
    }

    #[test]
    fn test_nested_each_attaches_to_smallest_container() {
        let tree = build_tree(
            vec![
                command(CommandKind::Area, "A1:D10", 0),
                each("A2:D3", 1),
                each("A3:D3", 2),
                command(CommandKind::AutoRowHeight, "A5:D5", 3),
            ],
            &names(),
        )
        .unwrap();
        assert_eq!(tree.roots.len(), 1);
        let area = &tree.roots[0];
        assert_eq!(area.children.len(), 2);
        assert_eq!(area.children[0].command.region.to_string(), "A2:D3");
        assert_eq!(area.children[0].children.len(), 1);
        assert_eq!(area.children[1].command.kind, CommandKind::AutoRowHeight);
        assert_eq!(area.size(), 4);
    }

    #[test]
    fn test_same_region_nests_by_declaration_order() {
        let tree = build_tree(
            vec![
                command(CommandKind::Area, "A1:C3", 0),
                each("A2:C2", 1),
                cond("A2:C2", 2),
            ],
            &names(),
        )
        .unwrap();
        let outer = &tree.roots[0].children[0];
        assert!(matches!(outer.command.kind, CommandKind::Each(_)));
        assert!(matches!(outer.children[0].command.kind, CommandKind::If(_)));
    }

    #[test]
    fn test_children_sorted_by_anchor() {
        let tree = build_tree(
            vec![
                command(CommandKind::Area, "A1:F9", 0),
                each("A5:B5", 1),
                each("D2:E2", 2),
                each("A2:B2", 3),
            ],
            &names(),
        )
        .unwrap();
        let anchors: Vec<_> = tree.roots[0]
            .children
            .iter()
            .map(|c| c.command.anchor().to_string())
            .collect();
        assert_eq!(anchors, vec!["A2", "D2", "A5"]);
    }

    #[test]
    fn test_command_outside_area_is_rejected() {
        let err = build_tree(
            vec![command(CommandKind::Area, "A1:B2", 0), each("A2:C2", 1)],
            &names(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::RegionOutOfBounds { .. }));
    }

    #[test]
    fn test_overlapping_siblings_are_rejected() {
        let err = build_tree(
            vec![
                command(CommandKind::Area, "A1:D9", 0),
                each("A2:C3", 1),
                each("B3:D4", 2),
            ],
            &names(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::OverlappingCommands { ref other, .. } if *other == CellRef::new(0, 1)
        ));
    }

    #[test]
    fn test_overlapping_areas_are_rejected() {
        let err = build_tree(
            vec![
                command(CommandKind::Area, "A1:B2", 0),
                command(CommandKind::Area, "B2:C3", 1),
            ],
            &names(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::OverlappingCommands { .. }));
    }

    #[test]
    fn test_inverted_each_region_is_empty() {
        let err = build_tree(
            vec![command(CommandKind::Area, "A1:D9", 0), each("B3:A2", 1)],
            &names(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyEachRegion { .. }));
    }

    #[test]
    fn test_multisheet_must_sit_in_area() {
        let mut sheets = each("A2:B2", 2);
        if let CommandKind::Each(each) = &mut sheets.kind {
            each.multisheet = Some("names".to_string());
        }
        let err = build_tree(
            vec![
                command(CommandKind::Area, "A1:D9", 0),
                cond("A2:D3", 1),
                sheets,
            ],
            &names(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::NestedMultisheet { .. }));
    }
}
