//! In-memory configuration tree with a buffered mutation log.
//!
//! The tree is built from the live configuration dump, mutated by feature
//! handlers, then either dropped or applied. Mutations are not sent to the
//! device one by one: [`ConfigTree::apply`] hands the whole log to a
//! [`TransactionApplier`] so that a request commits as a single unit.
//!
//! Nodes live in an arena owned by the tree. Each node holds exactly one
//! token; a compound key such as `next-hop 10.0.0.1` is the chain
//! `next-hop` -> `10.0.0.1`, which keeps multi-valued keys (several
//! `name-server` entries) as siblings under one key node.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::applier::{ApplyReport, TransactionApplier};
use crate::error::ConfigResult;
use crate::firewall::RuleNumbering;
use crate::parser;
use crate::path::{quote_token, ConfigPath};

type NodeId = usize;

const ROOT: NodeId = 0;

#[derive(Debug, Clone)]
struct NodeData {
    token: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    index: HashMap<String, NodeId>,
}

impl NodeData {
    fn new(token: String, parent: Option<NodeId>) -> Self {
        Self {
            token,
            parent,
            children: Vec::new(),
            index: HashMap::new(),
        }
    }
}

/// One pending change recorded against a [`ConfigTree`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "op", content = "path", rename_all = "snake_case")]
pub enum Mutation {
    /// Idempotent set: recorded only when the path was absent.
    Set(ConfigPath),
    /// Unconditional set, for repeated sibling values.
    SetNoCheck(ConfigPath),
    /// Delete the path and everything beneath it.
    Delete(ConfigPath),
}

impl Mutation {
    /// The path this mutation targets.
    pub fn path(&self) -> &ConfigPath {
        match self {
            Mutation::Set(p) | Mutation::SetNoCheck(p) | Mutation::Delete(p) => p,
        }
    }

    /// Renders the appliance command line, `set <path>` or `delete <path>`.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mutation::Set(p) | Mutation::SetNoCheck(p) => write!(f, "set {}", p),
            Mutation::Delete(p) => write!(f, "delete {}", p),
        }
    }
}

/// Hierarchical view of the appliance configuration.
#[derive(Debug, Clone)]
pub struct ConfigTree {
    nodes: Vec<NodeData>,
    mutations: Vec<Mutation>,
    numbering: RuleNumbering,
}

impl Default for ConfigTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigTree {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self {
            nodes: vec![NodeData::new(String::new(), None)],
            mutations: Vec::new(),
            numbering: RuleNumbering::default(),
        }
    }

    /// Parses a bracketed configuration dump or a list of `set` lines.
    pub fn parse(text: &str) -> ConfigResult<Self> {
        parser::parse(text)
    }

    /// Replaces the firewall rule numbering policy.
    pub fn with_rule_numbering(mut self, numbering: RuleNumbering) -> Self {
        self.numbering = numbering;
        self
    }

    /// The firewall rule numbering policy.
    pub fn rule_numbering(&self) -> &RuleNumbering {
        &self.numbering
    }

    /// Resolves `path`; absence is a normal outcome.
    pub fn get(&self, path: &ConfigPath) -> Option<ConfigNode<'_>> {
        self.lookup(ROOT, path.tokens()).map(|id| ConfigNode { tree: self, id })
    }

    /// Returns true if `path` resolves.
    pub fn has(&self, path: &ConfigPath) -> bool {
        self.lookup(ROOT, path.tokens()).is_some()
    }

    /// Top-level configuration keys, in order.
    pub fn top_level_keys(&self) -> Vec<&str> {
        self.nodes[ROOT]
            .children
            .iter()
            .map(|&c| self.nodes[c].token.as_str())
            .collect()
    }

    /// Sets `path` unless it already resolves.
    ///
    /// Returns true when a mutation was recorded.
    pub fn set(&mut self, path: ConfigPath) -> bool {
        if self.has(&path) {
            debug!(path = %path, "Path already present, skipping set");
            return false;
        }
        self.insert_under(ROOT, path.tokens());
        self.mutations.push(Mutation::Set(path));
        true
    }

    /// Sets `path` even if an identical path exists.
    ///
    /// Used for keys that repeat with different values, where the order of
    /// the values matters to the appliance.
    pub fn set_no_check(&mut self, path: ConfigPath) {
        self.insert_under(ROOT, path.tokens());
        self.mutations.push(Mutation::SetNoCheck(path));
    }

    /// Deletes `path` and its subtree.
    ///
    /// A path that does not resolve records nothing, so the commit never
    /// tries to delete something already absent. Ancestors left without
    /// children are pruned from the in-memory view.
    pub fn delete(&mut self, path: ConfigPath) -> bool {
        let Some(id) = self.lookup(ROOT, path.tokens()) else {
            debug!(path = %path, "Path not present, skipping delete");
            return false;
        };
        self.detach(id);
        self.mutations.push(Mutation::Delete(path));
        true
    }

    /// The pending mutations, in recording order.
    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    /// Returns true if there is anything to apply.
    pub fn has_changes(&self) -> bool {
        !self.mutations.is_empty()
    }

    /// The pending mutations rendered as appliance command lines.
    pub fn commit_lines(&self) -> Vec<String> {
        self.mutations.iter().map(Mutation::render).collect()
    }

    /// Applies the pending mutations as one transaction.
    ///
    /// On success the mutation log is cleared, except for a dry run which
    /// commits nothing. On failure the log is kept and the error returned.
    pub async fn apply(
        &mut self,
        applier: &dyn TransactionApplier,
        dry_run: bool,
    ) -> ConfigResult<ApplyReport> {
        if self.mutations.is_empty() {
            debug!("No configuration changes to apply");
            return Ok(ApplyReport::default());
        }
        let report = applier.apply(&self.mutations, dry_run).await?;
        if !dry_run {
            self.mutations.clear();
        }
        Ok(report)
    }

    /// Every leaf path of the tree, depth first in insertion order.
    pub fn leaf_paths(&self) -> Vec<ConfigPath> {
        let mut out = Vec::new();
        let mut prefix = Vec::new();
        for &child in &self.nodes[ROOT].children {
            self.collect_leaves(child, &mut prefix, &mut out);
        }
        out
    }

    /// The whole tree as `set` commands.
    pub fn to_commands(&self) -> Vec<String> {
        self.leaf_paths()
            .into_iter()
            .map(|p| format!("set {}", p))
            .collect()
    }

    /// Renders the tree in bracketed form, re-parseable by [`ConfigTree::parse`].
    pub fn render(&self) -> String {
        let mut out = String::new();
        for &child in &self.nodes[ROOT].children {
            self.render_node(child, 0, &mut out);
        }
        out
    }

    pub(crate) fn root_id() -> NodeId {
        ROOT
    }

    /// Creates any missing nodes of `tokens` below `parent`, without
    /// recording a mutation. Returns the last node.
    pub(crate) fn insert_under(&mut self, parent: NodeId, tokens: &[String]) -> NodeId {
        let mut current = parent;
        for token in tokens {
            current = match self.nodes[current].index.get(token) {
                Some(&existing) => existing,
                None => {
                    let id = self.nodes.len();
                    self.nodes.push(NodeData::new(token.clone(), Some(current)));
                    let node = &mut self.nodes[current];
                    node.children.push(id);
                    node.index.insert(token.clone(), id);
                    id
                }
            };
        }
        current
    }

    fn lookup(&self, from: NodeId, tokens: &[String]) -> Option<NodeId> {
        let mut current = from;
        for token in tokens {
            current = *self.nodes[current].index.get(token)?;
        }
        Some(current)
    }

    fn detach(&mut self, id: NodeId) {
        let mut id = id;
        while let Some(parent) = self.nodes[id].parent {
            let token = self.nodes[id].token.clone();
            let node = &mut self.nodes[parent];
            node.children.retain(|&c| c != id);
            node.index.remove(&token);
            if parent == ROOT || !self.nodes[parent].children.is_empty() {
                break;
            }
            id = parent;
        }
    }

    fn path_of(&self, id: NodeId) -> Vec<String> {
        let mut tokens = Vec::new();
        let mut current = id;
        while let Some(parent) = self.nodes[current].parent {
            tokens.push(self.nodes[current].token.clone());
            current = parent;
        }
        tokens.reverse();
        tokens
    }

    fn collect_leaves(&self, id: NodeId, prefix: &mut Vec<String>, out: &mut Vec<ConfigPath>) {
        prefix.push(self.nodes[id].token.clone());
        if self.nodes[id].children.is_empty() {
            out.push(ConfigPath::from_vec(prefix.clone()));
        } else {
            for &child in &self.nodes[id].children {
                self.collect_leaves(child, prefix, out);
            }
        }
        prefix.pop();
    }

    fn is_leaf(&self, id: NodeId) -> bool {
        self.nodes[id].children.is_empty()
    }

    fn render_node(&self, id: NodeId, depth: usize, out: &mut String) {
        let node = &self.nodes[id];
        let indent = "    ".repeat(depth);
        let name = quote_token(&node.token);

        if node.children.is_empty() {
            out.push_str(&format!("{}{}\n", indent, name));
        } else if node.children.iter().all(|&c| self.is_leaf(c)) {
            for &c in &node.children {
                out.push_str(&format!(
                    "{}{} {}\n",
                    indent,
                    name,
                    quote_token(&self.nodes[c].token)
                ));
            }
        } else {
            out.push_str(&format!("{}{} {{\n", indent, name));
            for &c in &node.children {
                self.render_node(c, depth + 1, out);
            }
            out.push_str(&format!("{}}}\n", indent));
        }
    }
}

/// A borrowed view of one node in a [`ConfigTree`].
#[derive(Clone, Copy)]
pub struct ConfigNode<'a> {
    tree: &'a ConfigTree,
    id: NodeId,
}

impl fmt::Debug for ConfigNode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigNode")
            .field("path", &self.tree.path_of(self.id).join(" "))
            .field("children", &self.child_keys())
            .finish()
    }
}

impl<'a> ConfigNode<'a> {
    /// This node's own token.
    pub fn token(&self) -> &'a str {
        &self.tree.nodes[self.id].token
    }

    /// Full path from the root to this node.
    pub fn path(&self) -> ConfigPath {
        ConfigPath::from_vec(self.tree.path_of(self.id))
    }

    /// The parent node, `None` for top-level nodes.
    pub fn parent(&self) -> Option<ConfigNode<'a>> {
        match self.tree.nodes[self.id].parent {
            Some(p) if p != ConfigTree::root_id() => Some(ConfigNode {
                tree: self.tree,
                id: p,
            }),
            _ => None,
        }
    }

    /// Child nodes in insertion order.
    pub fn children(&self) -> impl Iterator<Item = ConfigNode<'a>> + 'a {
        let tree = self.tree;
        tree.nodes[self.id]
            .children
            .iter()
            .map(move |&id| ConfigNode { tree, id })
    }

    /// The child keyed by `token`.
    pub fn child(&self, token: &str) -> Option<ConfigNode<'a>> {
        self.tree.nodes[self.id]
            .index
            .get(token)
            .map(|&id| ConfigNode {
                tree: self.tree,
                id,
            })
    }

    /// Tokens of the children, in order.
    pub fn child_keys(&self) -> Vec<&'a str> {
        self.children().map(|c| c.token()).collect()
    }

    /// Resolves a path relative to this node.
    pub fn get(&self, path: &ConfigPath) -> Option<ConfigNode<'a>> {
        self.tree
            .lookup(self.id, path.tokens())
            .map(|id| ConfigNode {
                tree: self.tree,
                id,
            })
    }

    /// Returns true if the node has no children.
    pub fn is_leaf(&self) -> bool {
        self.tree.is_leaf(self.id)
    }

    /// The single value of a key node (`distance 1` -> `1`).
    ///
    /// `None` if the node has zero or several children, or its child is
    /// not a leaf.
    pub fn value(&self) -> Option<&'a str> {
        let children = &self.tree.nodes[self.id].children;
        match children.as_slice() {
            [only] if self.tree.is_leaf(*only) => Some(&self.tree.nodes[*only].token),
            _ => None,
        }
    }

    /// All leaf children of a multi-valued key node.
    pub fn values(&self) -> Vec<&'a str> {
        self.children()
            .filter(|c| c.is_leaf())
            .map(|c| c.token())
            .collect()
    }

    /// Full leaf paths beneath this node.
    pub fn leaf_paths(&self) -> Vec<ConfigPath> {
        let mut out = Vec::new();
        let mut prefix = self.tree.path_of(self.id);
        prefix.pop();
        self.tree.collect_leaves(self.id, &mut prefix, &mut out);
        out
    }
}
