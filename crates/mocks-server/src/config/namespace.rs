//! Namespace tree holding declared options.
//!
//! Namespaces live in an arena and are addressed by [`NamespaceId`]. Each node
//! keeps its options and child namespaces in one ordered entry list so that
//! snapshots reproduce declaration order.

use super::error::ConfigError;
use super::option::{ConfigOption, OptionDef};
use serde_json::{Map, Value};

/// Identifier of a namespace inside a [`ConfigEngine`](super::ConfigEngine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NamespaceId(usize);

impl NamespaceId {
    /// The unnamed root namespace.
    pub const ROOT: NamespaceId = NamespaceId(0);
}

#[derive(Debug, Clone)]
enum Entry {
    Option(ConfigOption),
    Namespace(NamespaceId),
}

#[derive(Debug)]
struct NamespaceNode {
    name: String,
    parent: Option<NamespaceId>,
    entries: Vec<Entry>,
}

#[derive(Debug)]
pub(crate) struct NamespaceTree {
    nodes: Vec<NamespaceNode>,
}

/// Option lookup result for a key inside a namespace.
pub(crate) enum Member<'a> {
    Option(&'a ConfigOption),
    Namespace(NamespaceId),
}

impl NamespaceTree {
    pub(crate) fn new() -> Self {
        Self {
            nodes: vec![NamespaceNode {
                name: String::new(),
                parent: None,
                entries: Vec::new(),
            }],
        }
    }

    fn node(&self, id: NamespaceId) -> Result<&NamespaceNode, ConfigError> {
        self.nodes
            .get(id.0)
            .ok_or_else(|| ConfigError::Structure(format!("namespace #{} does not exist", id.0)))
    }

    pub(crate) fn member(&self, ns: NamespaceId, key: &str) -> Option<Member<'_>> {
        let node = self.nodes.get(ns.0)?;
        node.entries.iter().find_map(|entry| match entry {
            Entry::Option(option) if option.name() == key => Some(Member::Option(option)),
            Entry::Namespace(child) if self.nodes[child.0].name == key => {
                Some(Member::Namespace(*child))
            }
            _ => None,
        })
    }

    fn check_name(name: &str) -> Result<(), ConfigError> {
        if name.is_empty() || name.contains('.') {
            return Err(ConfigError::Structure(format!(
                "'{name}' is not a valid name; names must be non-empty and contain no dots"
            )));
        }
        Ok(())
    }

    /// Add a child namespace. Returns the existing one when the name is taken
    /// by a namespace.
    pub(crate) fn add_namespace(
        &mut self,
        parent: NamespaceId,
        name: &str,
    ) -> Result<NamespaceId, ConfigError> {
        Self::check_name(name)?;
        self.node(parent)?;
        match self.member(parent, name) {
            Some(Member::Namespace(existing)) => return Ok(existing),
            Some(Member::Option(_)) => {
                return Err(ConfigError::Structure(format!(
                    "'{}' is already declared as an option",
                    self.join(parent, name)
                )))
            }
            None => {}
        }

        let id = NamespaceId(self.nodes.len());
        self.nodes.push(NamespaceNode {
            name: name.to_string(),
            parent: Some(parent),
            entries: Vec::new(),
        });
        self.nodes[parent.0].entries.push(Entry::Namespace(id));
        Ok(id)
    }

    pub(crate) fn add_option(
        &mut self,
        ns: NamespaceId,
        def: OptionDef,
    ) -> Result<ConfigOption, ConfigError> {
        Self::check_name(&def.name)?;
        self.node(ns)?;
        let path = self.join(ns, &def.name);
        if self.member(ns, &def.name).is_some() {
            return Err(ConfigError::Structure(format!("'{path}' is already declared")));
        }

        let option = ConfigOption::new(path, def)?;
        self.nodes[ns.0].entries.push(Entry::Option(option.clone()));
        Ok(option)
    }

    /// Move `ns` (with its whole subtree) under `new_parent`.
    pub(crate) fn attach(&mut self, ns: NamespaceId, new_parent: NamespaceId) -> Result<(), ConfigError> {
        self.node(ns)?;
        self.node(new_parent)?;

        // Walk up from the new parent; meeting `ns` means it would become its own ancestor.
        // The walk is bounded by the arena size.
        let mut cursor = Some(new_parent);
        let mut steps = 0;
        while let Some(current) = cursor {
            if current == ns || steps > self.nodes.len() {
                return Err(ConfigError::NamespaceCycle {
                    namespace: self.path_of(ns),
                    parent: self.display_path(new_parent),
                });
            }
            cursor = self.nodes[current.0].parent;
            steps += 1;
        }

        let name = self.nodes[ns.0].name.clone();
        if self.member(new_parent, &name).is_some() {
            return Err(ConfigError::Structure(format!(
                "'{}' is already declared",
                self.join(new_parent, &name)
            )));
        }

        if let Some(old_parent) = self.nodes[ns.0].parent {
            self.nodes[old_parent.0]
                .entries
                .retain(|entry| !matches!(entry, Entry::Namespace(id) if *id == ns));
        }
        self.nodes[ns.0].parent = Some(new_parent);
        self.nodes[new_parent.0].entries.push(Entry::Namespace(ns));
        self.refresh_paths(ns);
        Ok(())
    }

    fn refresh_paths(&self, ns: NamespaceId) {
        let mut stack = vec![ns];
        while let Some(current) = stack.pop() {
            for entry in &self.nodes[current.0].entries {
                match entry {
                    Entry::Option(option) => option.set_path(self.join(current, option.name())),
                    Entry::Namespace(child) => stack.push(*child),
                }
            }
        }
    }

    /// Path segments from the root down to `ns` (the root has none).
    pub(crate) fn segments(&self, ns: NamespaceId) -> Vec<String> {
        let mut segments = Vec::new();
        let mut cursor = Some(ns);
        while let Some(current) = cursor {
            let node = &self.nodes[current.0];
            if node.parent.is_some() {
                segments.push(node.name.clone());
            }
            cursor = node.parent;
        }
        segments.reverse();
        segments
    }

    pub(crate) fn path_of(&self, ns: NamespaceId) -> String {
        self.segments(ns).join(".")
    }

    fn display_path(&self, ns: NamespaceId) -> String {
        if ns == NamespaceId::ROOT {
            "<root>".to_string()
        } else {
            self.path_of(ns)
        }
    }

    fn join(&self, ns: NamespaceId, name: &str) -> String {
        let mut segments = self.segments(ns);
        segments.push(name.to_string());
        segments.join(".")
    }

    /// Find an option by dotted path.
    pub(crate) fn find_option(&self, path: &str) -> Option<ConfigOption> {
        let mut ns = NamespaceId::ROOT;
        let mut parts = path.split('.').peekable();
        while let Some(part) = parts.next() {
            let last = parts.peek().is_none();
            match self.member(ns, part)? {
                Member::Namespace(child) => ns = child,
                Member::Option(option) if last => return Some(option.clone()),
                Member::Option(_) => return None,
            }
        }
        None
    }

    /// Every option paired with its path segments, depth-first in declaration order.
    pub(crate) fn options(&self) -> Vec<(Vec<String>, ConfigOption)> {
        let mut out = Vec::new();
        self.collect_options(NamespaceId::ROOT, &mut Vec::new(), &mut out);
        out
    }

    fn collect_options(
        &self,
        ns: NamespaceId,
        prefix: &mut Vec<String>,
        out: &mut Vec<(Vec<String>, ConfigOption)>,
    ) {
        for entry in &self.nodes[ns.0].entries {
            match entry {
                Entry::Option(option) => {
                    let mut segments = prefix.clone();
                    segments.push(option.name().to_string());
                    out.push((segments, option.clone()));
                }
                Entry::Namespace(child) => {
                    prefix.push(self.nodes[child.0].name.clone());
                    self.collect_options(*child, prefix, out);
                    prefix.pop();
                }
            }
        }
    }

    /// Current values mirroring the tree.
    pub(crate) fn snapshot(&self, ns: NamespaceId) -> Value {
        let mut map = Map::new();
        for entry in &self.nodes[ns.0].entries {
            match entry {
                Entry::Option(option) => {
                    map.insert(option.name().to_string(), option.value());
                }
                Entry::Namespace(child) => {
                    map.insert(self.nodes[child.0].name.clone(), self.snapshot(*child));
                }
            }
        }
        Value::Object(map)
    }

    /// Report the first key of `partial` that matches no declared option.
    /// Values of object-typed options are opaque and never descended into.
    pub(crate) fn check_unknown(&self, partial: &Value) -> Result<(), ConfigError> {
        let mut stack = vec![(NamespaceId::ROOT, partial)];
        while let Some((ns, value)) = stack.pop() {
            let Some(map) = value.as_object() else {
                if value.is_null() {
                    continue;
                }
                return Err(ConfigError::OptionType {
                    path: self.display_path(ns),
                    expected: "an object of options".to_string(),
                    received: super::error::describe_value(value),
                });
            };
            for (key, child_value) in map {
                match self.member(ns, key) {
                    Some(Member::Option(_)) => {}
                    Some(Member::Namespace(child)) => stack.push((child, child_value)),
                    None => return Err(ConfigError::UnknownOption(self.join(ns, key))),
                }
            }
        }
        Ok(())
    }
}
