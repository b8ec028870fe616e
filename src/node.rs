//! The mounted tree: text, element and component nodes with stable ids.
//!
//! Nodes own their children through id lists in the [`Tree`] arena.
//! Parent links are plain ids, so they never keep anything alive.

use crate::{
	component::{Instance, Subscriber},
	markup::{escape, is_void_element, Attributes},
	schema::Schema,
};
use core::fmt::{self, Debug, Display, Formatter, Write as _};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::rc::Rc;

/// Identifies one live node. Ids are never reused by the tree that assigned them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u64);

impl NodeId {
	#[must_use]
	pub fn get(self) -> u64 {
		self.0
	}
}

impl From<u64> for NodeId {
	fn from(id: u64) -> Self {
		Self(id)
	}
}

impl Display for NodeId {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

#[derive(Debug)]
pub struct Node {
	id: NodeId,
	pub(crate) parent: Option<NodeId>,
	pub(crate) kind: NodeKind,
}

impl Node {
	#[must_use]
	pub fn id(&self) -> NodeId {
		self.id
	}

	/// [`None`] only for top-level components.
	#[must_use]
	pub fn parent(&self) -> Option<NodeId> {
		self.parent
	}

	#[must_use]
	pub fn kind(&self) -> &NodeKind {
		&self.kind
	}

	#[must_use]
	pub fn as_text(&self) -> Option<&str> {
		match &self.kind {
			NodeKind::Text(text) => Some(text),
			_ => None,
		}
	}

	#[must_use]
	pub fn as_element(&self) -> Option<&Element> {
		match &self.kind {
			NodeKind::Element(element) => Some(element),
			_ => None,
		}
	}

	#[must_use]
	pub fn as_component(&self) -> Option<&ComponentNode> {
		match &self.kind {
			NodeKind::Component(component) => Some(component),
			_ => None,
		}
	}
}

#[derive(Debug)]
pub enum NodeKind {
	Text(String),
	Element(Element),
	Component(ComponentNode),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
	pub name: String,
	pub is_svg: bool,
	pub attributes: Attributes,
	pub children: Vec<NodeId>,
}

pub struct ComponentNode {
	pub(crate) name: String,
	pub(crate) instance: Instance,
	pub(crate) schema: Rc<Schema>,
	/// The attributes the component was last mapped from.
	pub(crate) attributes: Attributes,
	pub(crate) subscriber: Option<Subscriber>,
	pub(crate) root: Option<NodeId>,
	/// Set once `on_mount` ran.
	pub(crate) mounted: bool,
}

impl Debug for ComponentNode {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("ComponentNode")
			.field("name", &self.name)
			.field("schema", &self.schema.type_name())
			.field("attributes", &self.attributes)
			.field("subscriber", &self.subscriber)
			.field("root", &self.root)
			.field("mounted", &self.mounted)
			.finish_non_exhaustive()
	}
}

impl ComponentNode {
	#[must_use]
	pub fn name(&self) -> &str {
		&self.name
	}

	#[must_use]
	pub fn instance(&self) -> &Instance {
		&self.instance
	}

	#[must_use]
	pub fn attributes(&self) -> &Attributes {
		&self.attributes
	}

	#[must_use]
	pub fn root(&self) -> Option<NodeId> {
		self.root
	}

	#[must_use]
	pub fn is_mounted(&self) -> bool {
		self.mounted
	}
}

/// Arena of all live nodes of one engine.
#[derive(Debug, Default)]
pub struct Tree {
	nodes: HashMap<NodeId, Node>,
	next_id: u64,
}

impl Tree {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	pub(crate) fn insert(&mut self, parent: Option<NodeId>, kind: NodeKind) -> NodeId {
		self.next_id += 1;
		let id = NodeId(self.next_id);
		self.nodes.insert(id, Node { id, parent, kind });
		id
	}

	pub(crate) fn remove(&mut self, id: NodeId) -> Option<Node> {
		self.nodes.remove(&id)
	}

	#[must_use]
	pub fn get(&self, id: NodeId) -> Option<&Node> {
		self.nodes.get(&id)
	}

	pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
		self.nodes.get_mut(&id)
	}

	#[must_use]
	pub fn contains(&self, id: NodeId) -> bool {
		self.nodes.contains_key(&id)
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.nodes.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.nodes.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = &Node> + '_ {
		self.nodes.values()
	}

	/// Element children, or a component's root.
	#[must_use]
	pub fn children(&self, id: NodeId) -> Vec<NodeId> {
		match self.get(id).map(|node| &node.kind) {
			Some(NodeKind::Element(element)) => element.children.clone(),
			Some(NodeKind::Component(component)) => component.root.into_iter().collect(),
			Some(NodeKind::Text(_)) | None => Vec::new(),
		}
	}

	/// Ids from the top-level ancestor down to `id`, inclusive.
	#[must_use]
	pub fn path(&self, id: NodeId) -> Vec<NodeId> {
		let mut path = Vec::new();
		let mut current = self.get(id);
		while let Some(node) = current {
			path.push(node.id);
			current = node.parent.and_then(|parent| self.get(parent));
		}
		path.reverse();
		path
	}

	/// The nearest component at or above `id`.
	#[must_use]
	pub fn owner_component(&self, id: NodeId) -> Option<NodeId> {
		self.path(id).into_iter().rev().find(|id| self.get(*id).and_then(Node::as_component).is_some())
	}

	/// All components at or below `id`, parents first.
	#[must_use]
	pub fn components_under(&self, id: NodeId) -> Vec<NodeId> {
		let mut found = Vec::new();
		let mut pending = vec![id];
		while let Some(id) = pending.pop() {
			if self.get(id).and_then(Node::as_component).is_some() {
				found.push(id);
			}
			pending.extend(self.children(id).into_iter().rev());
		}
		found
	}

	/// Every id assigned after this call is greater than the returned value.
	pub(crate) fn watermark(&self) -> u64 {
		self.next_id
	}

	/// Live ids assigned after `watermark`, newest first.
	pub(crate) fn ids_since(&self, watermark: u64) -> Vec<NodeId> {
		let mut ids: Vec<_> = self.nodes.keys().copied().filter(|id| id.0 > watermark).collect();
		ids.sort_unstable_by(|a, b| b.cmp(a));
		ids
	}

	/// Checks that parent links and child lists agree.
	///
	/// # Errors
	///
	/// Describes the first inconsistency found.
	pub fn check(&self) -> Result<(), String> {
		for node in self.nodes.values() {
			for child in self.children(node.id) {
				match self.get(child) {
					Some(child_node) if child_node.parent == Some(node.id) => (),
					Some(child_node) => return Err(format!("{} lists {} as child, but its parent is {:?}", node.id, child, child_node.parent)),
					None => return Err(format!("{} lists dead child {}", node.id, child)),
				}
			}
			if let Some(parent) = node.parent {
				if !self.children(parent).contains(&node.id) {
					return Err(format!("{} names {} as parent, which doesn't list it", node.id, parent));
				}
			}
		}
		Ok(())
	}

	/// Serializes the subtree at `id` as HTML. Components are transparent.
	#[must_use]
	pub fn to_html(&self, id: NodeId) -> String {
		let mut html = String::new();
		self.write_html(&mut html, id);
		html
	}

	fn write_html(&self, html: &mut String, id: NodeId) {
		let Some(node) = self.get(id) else { return };
		match &node.kind {
			NodeKind::Text(text) => html.push_str(&escape(text)),
			NodeKind::Component(component) => {
				if let Some(root) = component.root {
					self.write_html(html, root);
				}
			}
			NodeKind::Element(element) => {
				write_open_tag(html, &element.name, &element.attributes);
				if !element.is_svg && is_void_element(&element.name) {
					return;
				}
				for child in &element.children {
					self.write_html(html, *child);
				}
				let _ = write!(html, "</{}>", element.name);
			}
		}
	}
}

/// Writes `<name a="1" b>` with attributes sorted by key.
pub(crate) fn write_open_tag(html: &mut String, name: &str, attributes: &Attributes) {
	let mut sorted: Vec<_> = attributes.iter().collect();
	sorted.sort_unstable();
	let _ = write!(html, "<{}", name);
	for (key, value) in sorted {
		if value.is_empty() {
			let _ = write!(html, " {}", key);
		} else {
			let _ = write!(html, " {}=\"{}\"", key, escape(value));
		}
	}
	html.push('>');
}
