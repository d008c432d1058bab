//! Scripted runs: build a document from TOML, apply mutations, collect deliveries.
//!
//! ```toml
//! [[nodes]]
//! name = "list"
//! kind = "element"
//! tag = "ul"
//!
//! [[observers]]
//! name = "watcher"
//!
//! [[steps]]
//! op = "observe"
//! observer = "watcher"
//! target = "list"
//! options = { childList = true, subtree = true }
//!
//! [[steps]]
//! op = "append"
//! parent = "root"
//! node = "list"
//! ```
//!
//! The document node is predeclared as `root`. A final flush runs after the
//! last step.

use std::collections::HashMap;
use std::rc::Rc;

use itertools::Itertools;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::application::document::Document;
use crate::application::error::{ApplicationError, ApplicationResult};
use crate::application::services::{FlushReport, ObserverId};
use crate::config::Settings;
use crate::domain::{ChangeKind, ChangeRecord, NodeId, ObserverInit, TreeDisplay};

pub const ROOT_NAME: &str = "root";

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeDecl {
    Element { name: String, tag: String },
    Text { name: String, data: String },
    Comment { name: String, data: String },
    Fragment { name: String },
}

impl NodeDecl {
    fn name(&self) -> &str {
        match self {
            NodeDecl::Element { name, .. }
            | NodeDecl::Text { name, .. }
            | NodeDecl::Comment { name, .. }
            | NodeDecl::Fragment { name } => name,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ObserverDecl {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Observe {
        observer: String,
        target: String,
        #[serde(default)]
        options: ObserverInit,
    },
    Disconnect {
        observer: String,
    },
    Append {
        parent: String,
        node: String,
    },
    Insert {
        parent: String,
        node: String,
        before: Option<String>,
    },
    Remove {
        parent: String,
        node: String,
    },
    Replace {
        parent: String,
        node: String,
        old: String,
    },
    SetText {
        node: String,
        text: String,
    },
    SetData {
        node: String,
        data: String,
    },
    SetAttribute {
        node: String,
        name: String,
        namespace: Option<String>,
        value: String,
    },
    RemoveAttribute {
        node: String,
        name: String,
        namespace: Option<String>,
    },
    Normalize {
        node: String,
    },
    AttachShadow {
        host: String,
        name: String,
    },
    TakeRecords {
        observer: String,
    },
    Flush,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Scenario {
    pub nodes: Vec<NodeDecl>,
    pub observers: Vec<ObserverDecl>,
    pub steps: Vec<Step>,
}

/// Something observable that happened while running a scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScenarioEvent {
    /// A callback received a batch
    Delivered { observer: String, records: Vec<String> },
    /// `take_records` returned a batch
    Taken { observer: String, records: Vec<String> },
    /// A flush finished
    Flushed { passes: usize, failures: usize },
}

#[derive(Debug, Clone)]
pub struct ScenarioOutcome {
    pub events: Vec<ScenarioEvent>,
    /// Final logical tree, rendered with node names
    pub tree: String,
}

impl ScenarioOutcome {
    /// Delivered batches, flattened, in delivery order.
    pub fn delivered(&self) -> Vec<(&str, &str)> {
        self.events
            .iter()
            .filter_map(|e| match e {
                ScenarioEvent::Delivered { observer, records } => Some((observer, records)),
                _ => None,
            })
            .flat_map(|(observer, records)| {
                records.iter().map(move |r| (observer.as_str(), r.as_str()))
            })
            .collect()
    }
}

impl Scenario {
    pub fn parse(content: &str) -> ApplicationResult<Self> {
        toml::from_str(content).map_err(|e| ApplicationError::scenario(format!("parse: {e}")))
    }

    #[instrument(level = "debug", skip(self, settings))]
    pub fn run(&self, settings: Settings) -> ApplicationResult<ScenarioOutcome> {
        let mut runner = Runner::new(Document::new(settings));
        for decl in &self.nodes {
            runner.declare_node(decl)?;
        }
        for decl in &self.observers {
            runner.declare_observer(&decl.name)?;
        }
        for (i, step) in self.steps.iter().enumerate() {
            debug!("step {}: {:?}", i + 1, step);
            runner.apply(step)?;
        }
        if runner.doc.scheduler().has_pending() {
            runner.flush();
        }
        Ok(ScenarioOutcome {
            tree: runner.render_tree(),
            events: runner.events,
        })
    }
}

struct Runner {
    doc: Document,
    nodes: HashMap<String, NodeId>,
    observers: HashMap<String, ObserverId>,
    events: Vec<ScenarioEvent>,
}

impl Runner {
    fn new(doc: Document) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(ROOT_NAME.to_string(), doc.root());
        Self {
            doc,
            nodes,
            observers: HashMap::new(),
            events: Vec::new(),
        }
    }

    fn declare_node(&mut self, decl: &NodeDecl) -> ApplicationResult<()> {
        let name = decl.name();
        if self.nodes.contains_key(name) {
            return Err(ApplicationError::scenario(format!("duplicate node name: {name}")));
        }
        let id = match decl {
            NodeDecl::Element { tag, .. } => self.doc.create_element(tag.as_str()),
            NodeDecl::Text { data, .. } => self.doc.create_text(data.as_str()),
            NodeDecl::Comment { data, .. } => self.doc.create_comment(data.as_str()),
            NodeDecl::Fragment { .. } => self.doc.create_fragment(),
        };
        self.nodes.insert(name.to_string(), id);
        Ok(())
    }

    fn declare_observer(&mut self, name: &str) -> ApplicationResult<()> {
        if self.observers.contains_key(name) {
            return Err(ApplicationError::scenario(format!(
                "duplicate observer name: {name}"
            )));
        }
        let id = self.doc.create_observer(|_, _, _| Ok(()));
        self.observers.insert(name.to_string(), id);
        Ok(())
    }

    fn node(&self, name: &str) -> ApplicationResult<NodeId> {
        self.nodes
            .get(name)
            .copied()
            .ok_or_else(|| ApplicationError::scenario(format!("unknown node: {name}")))
    }

    fn observer(&self, name: &str) -> ApplicationResult<ObserverId> {
        self.observers
            .get(name)
            .copied()
            .ok_or_else(|| ApplicationError::scenario(format!("unknown observer: {name}")))
    }

    fn apply(&mut self, step: &Step) -> ApplicationResult<()> {
        match step {
            Step::Observe {
                observer,
                target,
                options,
            } => {
                let (observer, target) = (self.observer(observer)?, self.node(target)?);
                self.doc.observe(observer, target, options)?;
            }
            Step::Disconnect { observer } => {
                let observer = self.observer(observer)?;
                self.doc.disconnect(observer)?;
            }
            Step::Append { parent, node } => {
                let (parent, node) = (self.node(parent)?, self.node(node)?);
                self.doc.append_child(parent, node)?;
            }
            Step::Insert {
                parent,
                node,
                before,
            } => {
                let (parent, node) = (self.node(parent)?, self.node(node)?);
                let before = before.as_deref().map(|b| self.node(b)).transpose()?;
                self.doc.insert_before(parent, node, before)?;
            }
            Step::Remove { parent, node } => {
                let (parent, node) = (self.node(parent)?, self.node(node)?);
                self.doc.remove_child(parent, node)?;
            }
            Step::Replace { parent, node, old } => {
                let (parent, node, old) = (self.node(parent)?, self.node(node)?, self.node(old)?);
                self.doc.replace_child(parent, node, old)?;
            }
            Step::SetText { node, text } => {
                let node = self.node(node)?;
                self.doc.set_text_content(node, text)?;
            }
            Step::SetData { node, data } => {
                let node = self.node(node)?;
                self.doc.set_character_data(node, data)?;
            }
            Step::SetAttribute {
                node,
                name,
                namespace,
                value,
            } => {
                let node = self.node(node)?;
                self.doc
                    .set_attribute(node, name, namespace.as_deref(), value)?;
            }
            Step::RemoveAttribute {
                node,
                name,
                namespace,
            } => {
                let node = self.node(node)?;
                self.doc.remove_attribute(node, name, namespace.as_deref())?;
            }
            Step::Normalize { node } => {
                let node = self.node(node)?;
                self.doc.normalize(node)?;
            }
            Step::AttachShadow { host, name } => {
                if self.nodes.contains_key(name) {
                    return Err(ApplicationError::scenario(format!(
                        "duplicate node name: {name}"
                    )));
                }
                let host = self.node(host)?;
                let shadow = self.doc.attach_shadow(host)?;
                self.nodes.insert(name.clone(), shadow);
            }
            Step::TakeRecords { observer } => {
                let id = self.observer(observer)?;
                let taken = self.doc.take_records(id)?;
                let records = self.describe_all(&taken);
                self.events.push(ScenarioEvent::Taken {
                    observer: observer.clone(),
                    records,
                });
            }
            Step::Flush => self.flush(),
        }
        Ok(())
    }

    fn flush(&mut self) {
        let report: FlushReport = self.doc.flush();
        for delivery in &report.deliveries {
            let event = ScenarioEvent::Delivered {
                observer: self.observer_name(delivery.observer),
                records: self.describe_all(&delivery.records),
            };
            self.events.push(event);
        }
        self.events.push(ScenarioEvent::Flushed {
            passes: report.passes,
            failures: report.failures.len(),
        });
    }

    fn observer_name(&self, id: ObserverId) -> String {
        self.observers
            .iter()
            .find(|(_, o)| **o == id)
            .map(|(name, _)| name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    fn node_name(&self, id: NodeId) -> String {
        self.nodes
            .iter()
            .find(|(_, n)| **n == id)
            .map(|(name, _)| name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    fn describe_all(&self, records: &[Rc<ChangeRecord>]) -> Vec<String> {
        records.iter().map(|r| self.describe(r)).collect()
    }

    /// Like the record's `Display`, with node names instead of ids.
    fn describe(&self, record: &ChangeRecord) -> String {
        let mut text = format!("{} target={}", record.kind, self.node_name(record.target));
        match record.kind {
            ChangeKind::ChildList => {
                text.push_str(&format!(
                    " added=[{}] removed=[{}]",
                    record.added_nodes.iter().map(|n| self.node_name(*n)).join(", "),
                    record.removed_nodes.iter().map(|n| self.node_name(*n)).join(", ")
                ));
                if let Some(previous) = record.previous_sibling {
                    text.push_str(&format!(" previous={}", self.node_name(previous)));
                }
                if let Some(next) = record.next_sibling {
                    text.push_str(&format!(" next={}", self.node_name(next)));
                }
            }
            ChangeKind::Attributes => {
                if let Some(name) = &record.attribute_name {
                    text.push_str(&format!(" name={}", name));
                }
                if let Some(namespace) = &record.attribute_namespace {
                    text.push_str(&format!(" namespace={}", namespace));
                }
            }
            ChangeKind::CharacterData => {}
        }
        if let Some(old) = &record.old_value {
            text.push_str(&format!(" old={:?}", old));
        }
        text
    }

    fn render_tree(&self) -> String {
        let legend: HashMap<String, String> = self
            .nodes
            .iter()
            .map(|(name, id)| (id.to_string(), name.clone()))
            .collect();
        self.doc
            .tree()
            .to_tree_string(self.doc.root())
            .to_string()
            .lines()
            .map(|line| match line.rsplit_once(' ') {
                Some((head, id)) => match legend.get(id) {
                    Some(name) => format!("{} ({})", head, name),
                    None => line.to_string(),
                },
                None => line.to_string(),
            })
            .join("\n")
    }
}
