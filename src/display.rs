// Display output of the decoder: the sink trait, a collecting tree and the
// host-side handle catalog

use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::ops::Range;

use crate::registry::{BitfieldHandles, DisplayHandle, Edition, FallbackCategory, Registry};
use crate::value::Value;

/// One entry of a packed bitfield as handed to the sink.
#[derive(Debug, Clone, Copy)]
pub struct BitDisplay<'a> {
    pub handle: Option<DisplayHandle>,
    pub name: &'a str,
    pub mask: u64,
    pub value: &'a Value,
}

/// Receiver for decoded fields. Ranges are byte offsets into the message.
pub trait DisplaySink {
    fn add_field(&mut self, handle: DisplayHandle, label: &str, range: Range<usize>, value: &Value);

    /// Starts a nested group. Every call is matched by [`Self::close_group`]
    /// unless decoding fails first.
    fn open_group(&mut self, label: &str, start: usize);

    fn close_group(&mut self, end: usize);

    fn add_bitmask(
        &mut self,
        handle: DisplayHandle,
        label: &str,
        range: Range<usize>,
        raw: u64,
        entries: &[BitDisplay<'_>],
    );

    fn length_mismatch(&mut self, expected: usize, actual: usize, range: Range<usize>);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisplayNode {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handle: Option<u32>,
    pub start: usize,
    pub end: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<DisplayNode>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub error: bool,
}

impl DisplayNode {
    fn leaf(label: &str, handle: Option<DisplayHandle>, range: Range<usize>, value: String) -> Self {
        Self {
            label: label.to_string(),
            handle: handle.map(DisplayHandle::id),
            start: range.start,
            end: range.end,
            value: Some(value),
            children: Vec::new(),
            error: false,
        }
    }
}

/// Collects sink calls into nested [`DisplayNode`]s.
#[derive(Debug, Default)]
pub struct DisplayTree {
    roots: Vec<DisplayNode>,
    open: Vec<DisplayNode>,
}

impl DisplayTree {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, node: DisplayNode) {
        match self.open.last_mut() {
            Some(group) => group.children.push(node),
            None => self.roots.push(node),
        }
    }

    /// Closes any group left open by a failed decode and returns the roots.
    pub fn finish(mut self) -> Vec<DisplayNode> {
        while let Some(mut group) = self.open.pop() {
            group.end = group
                .children
                .last()
                .map_or(group.start, |child| child.end.max(group.start));
            self.push(group);
        }
        self.roots
    }

    pub fn nodes(&self) -> &[DisplayNode] {
        &self.roots
    }
}

impl DisplaySink for DisplayTree {
    fn add_field(&mut self, handle: DisplayHandle, label: &str, range: Range<usize>, value: &Value) {
        self.push(DisplayNode::leaf(label, Some(handle), range, value.to_string()));
    }

    fn open_group(&mut self, label: &str, start: usize) {
        self.open.push(DisplayNode {
            label: label.to_string(),
            handle: None,
            start,
            end: start,
            value: None,
            children: Vec::new(),
            error: false,
        });
    }

    fn close_group(&mut self, end: usize) {
        if let Some(mut group) = self.open.pop() {
            group.end = end;
            self.push(group);
        }
    }

    fn add_bitmask(
        &mut self,
        handle: DisplayHandle,
        label: &str,
        range: Range<usize>,
        raw: u64,
        entries: &[BitDisplay<'_>],
    ) {
        let mut node = DisplayNode::leaf(label, Some(handle), range.clone(), format!("0x{:x}", raw));
        node.children = entries
            .iter()
            .map(|entry| {
                DisplayNode::leaf(
                    entry.name,
                    entry.handle,
                    range.clone(),
                    format!("{} (mask 0x{:x})", entry.value, entry.mask),
                )
            })
            .collect();
        self.push(node);
    }

    fn length_mismatch(&mut self, expected: usize, actual: usize, range: Range<usize>) {
        let mut node = DisplayNode::leaf(
            "length mismatch",
            None,
            range,
            format!("Packet length mismatch, expected {}, got {}", expected, actual),
        );
        node.error = true;
        self.push(node);
    }
}

/// Indented outline of display nodes, one field per line.
pub struct TreeOutline<'a> {
    nodes: &'a [DisplayNode],
    catalog: Option<&'a HandleCatalog>,
}

impl<'a> TreeOutline<'a> {
    pub fn new(nodes: &'a [DisplayNode], catalog: Option<&'a HandleCatalog>) -> Self {
        Self { nodes, catalog }
    }
}

impl fmt::Display for TreeOutline<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for node in self.nodes {
            write_node(f, node, self.catalog, 0)?;
        }
        Ok(())
    }
}

pub fn render_tree(nodes: &[DisplayNode], catalog: Option<&HandleCatalog>) -> String {
    TreeOutline::new(nodes, catalog).to_string()
}

fn write_node(
    f: &mut fmt::Formatter<'_>,
    node: &DisplayNode,
    catalog: Option<&HandleCatalog>,
    depth: usize,
) -> fmt::Result {
    let indent = "  ".repeat(depth);
    let title = node
        .handle
        .and_then(|id| catalog.and_then(|c| c.title(DisplayHandle::new(id))))
        .filter(|title| *title != node.label);
    let marker = if node.error { "!! " } else { "" };
    match (&node.value, title) {
        (Some(value), Some(title)) => writeln!(
            f,
            "{}{}{} ({}): {}  [{}..{}]",
            indent, marker, node.label, title, value, node.start, node.end
        )?,
        (Some(value), None) => writeln!(
            f,
            "{}{}{}: {}  [{}..{}]",
            indent, marker, node.label, value, node.start, node.end
        )?,
        (None, _) => writeln!(f, "{}{}  [{}..{}]", indent, node.label, node.start, node.end)?,
    }
    for child in &node.children {
        write_node(f, child, catalog, depth + 1)?;
    }
    Ok(())
}

/// Host-side handle allocator.
///
/// Hands out sequential handles with a title each and can populate a
/// [`Registry`] with every field name and bitfield layout found in a
/// schema document, which is what the bundled binaries use in place of a
/// hand-maintained handle list.
#[derive(Debug, Default)]
pub struct HandleCatalog {
    titles: Vec<String>,
    by_title: HashMap<String, DisplayHandle>,
}

impl HandleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handle for `title`, allocating one on first use.
    pub fn handle(&mut self, title: &str) -> DisplayHandle {
        if let Some(handle) = self.by_title.get(title) {
            return *handle;
        }
        self.titles.push(title.to_string());
        let handle = DisplayHandle::new(self.titles.len() as u32);
        self.by_title.insert(title.to_string(), handle);
        handle
    }

    pub fn title(&self, handle: DisplayHandle) -> Option<&str> {
        let index = (handle.id() as usize).checked_sub(1)?;
        self.titles.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.titles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.titles.is_empty()
    }

    /// Builds a registry for `edition` with fallback handles for every
    /// category and name/bitfield handles for everything in `document`.
    pub fn build_registry(&mut self, edition: Edition, document: &JsonValue) -> Registry {
        let mut registry = Registry::new(edition);
        for category in FallbackCategory::ALL {
            let handle = self.handle(category.label());
            registry.register_fallback(category, handle);
        }
        self.register_document(&mut registry, document);
        registry
    }

    pub fn register_document(&mut self, registry: &mut Registry, node: &JsonValue) {
        match node {
            JsonValue::Object(map) => {
                if let (Some(JsonValue::String(name)), Some(_)) = (map.get("name"), map.get("type")) {
                    let handle = self.handle(name);
                    registry.register_name(name, handle);
                }
                for child in map.values() {
                    self.register_document(registry, child);
                }
            }
            JsonValue::Array(items) => {
                if let [JsonValue::String(tag), params] = items.as_slice() {
                    if tag == "bitfield" {
                        self.register_bitfield(registry, params);
                    }
                }
                for child in items {
                    self.register_document(registry, child);
                }
            }
            _ => {}
        }
    }

    fn register_bitfield(&mut self, registry: &mut Registry, params: &JsonValue) {
        let Some(raw_entries) = params.as_array() else {
            return;
        };
        let mut signature = String::new();
        let mut names = Vec::with_capacity(raw_entries.len());
        for raw in raw_entries {
            let (Some(name), Some(size)) = (
                raw.get("name").and_then(JsonValue::as_str),
                raw.get("size").and_then(JsonValue::as_u64),
            ) else {
                return;
            };
            signature.push_str(&format!("[{}]{}", size, name));
            names.push(name);
        }
        let whole = self.handle(&signature);
        let entries = names
            .iter()
            .map(|name| self.handle(&format!("{}.{}", signature, name)))
            .collect();
        registry.register_bitfield(&signature, BitfieldHandles { whole, entries });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tree_nesting() {
        let mut tree = DisplayTree::new();
        tree.open_group("pos", 1);
        tree.add_field(DisplayHandle::new(1), "x", 1..2, &Value::Uint(5));
        tree.close_group(2);
        tree.add_field(DisplayHandle::new(2), "y", 2..3, &Value::Int(-1));
        let nodes = tree.finish();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].label, "pos");
        assert_eq!(nodes[0].children[0].value.as_deref(), Some("5"));
        assert_eq!(nodes[1].end, 3);
    }

    #[test]
    fn test_finish_closes_open_groups() {
        let mut tree = DisplayTree::new();
        tree.open_group("outer", 0);
        tree.add_field(DisplayHandle::new(1), "a", 0..4, &Value::Uint(1));
        let nodes = tree.finish();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].end, 4);
    }

    #[test]
    fn test_mismatch_node() {
        let mut tree = DisplayTree::new();
        tree.length_mismatch(5, 3, 1..6);
        let nodes = tree.finish();
        assert!(nodes[0].error);
        let text = render_tree(&nodes, None);
        assert!(text.contains("expected 5, got 3"));
    }

    #[test]
    fn test_outline_indents_children_and_titles() {
        let mut catalog = HandleCatalog::new();
        let x = catalog.handle("Block X");
        let mut tree = DisplayTree::new();
        tree.open_group("pos", 0);
        tree.add_field(x, "x", 0..2, &Value::Int(-3));
        tree.close_group(2);
        let nodes = tree.finish();
        let text = format!("{}", TreeOutline::new(&nodes, Some(&catalog)));
        assert_eq!(text, "pos  [0..2]\n  x (Block X): -3  [0..2]\n");
        assert_eq!(render_tree(&nodes, Some(&catalog)), text);
    }

    #[test]
    fn test_catalog_reuses_handles() {
        let mut catalog = HandleCatalog::new();
        let a = catalog.handle("entityId");
        let b = catalog.handle("entityId");
        assert_eq!(a, b);
        assert_eq!(catalog.title(a), Some("entityId"));
        assert_eq!(catalog.title(DisplayHandle::new(0)), None);
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_catalog_registers_document() {
        let doc = json!({
            "types": {
                "position": ["bitfield", [
                    { "name": "x", "size": 26, "signed": true },
                    { "name": "z", "size": 26, "signed": true },
                    { "name": "y", "size": 12, "signed": true }
                ]]
            },
            "packet_x": ["container", [{ "name": "entityId", "type": "varint" }]]
        });
        let mut catalog = HandleCatalog::new();
        let registry = catalog.build_registry(Edition::Java, &doc);
        assert!(registry.handle_for_name("entityId").is_some());
        let bitfield = registry.bitfield("[26]x[26]z[12]y").unwrap();
        assert_eq!(bitfield.entries.len(), 3);
        assert!(registry.fallback(FallbackCategory::Bytes).is_some());
    }
}
