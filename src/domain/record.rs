//! Change descriptors and the immutable records delivered to observers.

use std::fmt;

use itertools::Itertools;

use crate::domain::arena::NodeId;

/// The three kinds of observable change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    ChildList,
    Attributes,
    CharacterData,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChangeKind::ChildList => "childList",
            ChangeKind::Attributes => "attributes",
            ChangeKind::CharacterData => "characterData",
        };
        f.write_str(name)
    }
}

/// Description of one mutation as produced by the tree mutator.
///
/// Old values are always captured here; whether an observer sees them is
/// decided per observer when the record is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    ChildList {
        added: Vec<NodeId>,
        removed: Vec<NodeId>,
        previous_sibling: Option<NodeId>,
        next_sibling: Option<NodeId>,
    },
    Attributes {
        name: String,
        namespace: Option<String>,
        old_value: Option<String>,
    },
    CharacterData {
        old_value: Option<String>,
    },
}

impl Change {
    pub fn kind(&self) -> ChangeKind {
        match self {
            Change::ChildList { .. } => ChangeKind::ChildList,
            Change::Attributes { .. } => ChangeKind::Attributes,
            Change::CharacterData { .. } => ChangeKind::CharacterData,
        }
    }

    fn old_value(&self) -> Option<&String> {
        match self {
            Change::ChildList { .. } => None,
            Change::Attributes { old_value, .. } | Change::CharacterData { old_value } => {
                old_value.as_ref()
            }
        }
    }
}

/// Immutable record of a single change, shared between observers that match it identically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub kind: ChangeKind,
    pub target: NodeId,
    pub added_nodes: Vec<NodeId>,
    pub removed_nodes: Vec<NodeId>,
    pub previous_sibling: Option<NodeId>,
    pub next_sibling: Option<NodeId>,
    pub attribute_name: Option<String>,
    pub attribute_namespace: Option<String>,
    pub old_value: Option<String>,
}

impl ChangeRecord {
    pub fn new(target: NodeId, change: &Change, include_old_value: bool) -> Self {
        let mut record = Self {
            kind: change.kind(),
            target,
            added_nodes: Vec::new(),
            removed_nodes: Vec::new(),
            previous_sibling: None,
            next_sibling: None,
            attribute_name: None,
            attribute_namespace: None,
            old_value: None,
        };
        match change {
            Change::ChildList {
                added,
                removed,
                previous_sibling,
                next_sibling,
            } => {
                record.added_nodes = added.clone();
                record.removed_nodes = removed.clone();
                record.previous_sibling = *previous_sibling;
                record.next_sibling = *next_sibling;
            }
            Change::Attributes {
                name, namespace, ..
            } => {
                record.attribute_name = Some(name.clone());
                record.attribute_namespace = namespace.clone();
            }
            Change::CharacterData { .. } => {}
        }
        if include_old_value {
            record.old_value = change.old_value().cloned();
        }
        record
    }
}

impl fmt::Display for ChangeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} target={}", self.kind, self.target)?;
        match self.kind {
            ChangeKind::ChildList => {
                write!(
                    f,
                    " added=[{}] removed=[{}]",
                    self.added_nodes.iter().join(", "),
                    self.removed_nodes.iter().join(", ")
                )?;
                if let Some(prev) = self.previous_sibling {
                    write!(f, " previous={}", prev)?;
                }
                if let Some(next) = self.next_sibling {
                    write!(f, " next={}", next)?;
                }
            }
            ChangeKind::Attributes => {
                if let Some(name) = &self.attribute_name {
                    write!(f, " name={}", name)?;
                }
                if let Some(ns) = &self.attribute_namespace {
                    write!(f, " namespace={}", ns)?;
                }
            }
            ChangeKind::CharacterData => {}
        }
        if let Some(old) = &self.old_value {
            write!(f, " old={:?}", old)?;
        }
        Ok(())
    }
}
