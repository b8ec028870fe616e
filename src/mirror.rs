//! A simulated remote document that replays change logs.
//!
//! [`Mirror`] keeps its own copy of the tree, keyed by the ids in each [`Change`],
//! and rejects changes that don't make sense against what it has seen so far.
//! Comparing [`Mirror::to_html`] with [`Tree::to_html`](`crate::node::Tree::to_html`) checks that a change log is complete.

use crate::{
	change::{Change, ChangeSink},
	error::SinkError,
	markup::{escape, is_void_element, Attributes},
	node::{write_open_tag, NodeId},
};
use core::{cell::RefCell, fmt::Write as _};
use hashbrown::HashMap;
use std::rc::Rc;
use thiserror::Error;
use tracing::{instrument, trace, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MirrorError {
	#[error("unknown node {id}")]
	UnknownNode { id: NodeId },

	#[error("node {id} was created twice")]
	Duplicate { id: NodeId },

	#[error("node {id} can't have children")]
	NotAParent { id: NodeId },

	#[error("node {child} is not a child of {parent}")]
	NotAChild { parent: NodeId, child: NodeId },

	#[error("{change} applies only to {expected} nodes, but {id} isn't one")]
	WrongKind { id: NodeId, change: &'static str, expected: &'static str },
}

#[derive(Debug, Clone)]
enum Mirrored {
	Text(String),
	Element { name: String, svg: bool, attributes: Attributes, children: Vec<NodeId> },
	Container { name: Option<String>, child: Option<NodeId>, mounted: bool },
}

#[derive(Debug, Default)]
struct Document {
	nodes: HashMap<NodeId, Mirrored>,
	roots: Vec<NodeId>,
	applied: usize,
}

/// A [`ChangeSink`] that maintains a document from the changes it receives. Clones share the document.
#[derive(Debug, Clone, Default)]
pub struct Mirror(Rc<RefCell<Document>>);

impl Mirror {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Applies `changes` in order, stopping at the first that doesn't fit.
	///
	/// # Errors
	///
	/// Iff a change refers to a node that doesn't exist or has the wrong kind.
	#[instrument(skip(self, changes), fields(changes.len = changes.len()))]
	pub fn apply(&self, changes: &[Change]) -> Result<(), MirrorError> {
		let mut document = self.0.borrow_mut();
		for change in changes {
			document.apply(change)?;
			document.applied += 1;
		}
		trace!(nodes = document.nodes.len(), "Applied changes.");
		Ok(())
	}

	#[must_use]
	pub fn node_count(&self) -> usize {
		self.0.borrow().nodes.len()
	}

	/// The number of changes applied over this mirror's lifetime.
	#[must_use]
	pub fn applied(&self) -> usize {
		self.0.borrow().applied
	}

	#[must_use]
	pub fn roots(&self) -> Vec<NodeId> {
		self.0.borrow().roots.clone()
	}

	/// The registered name of a nested component's container.
	#[must_use]
	pub fn component_name(&self, id: NodeId) -> Option<String> {
		match self.0.borrow().nodes.get(&id) {
			Some(Mirrored::Container { name, .. }) => name.clone(),
			_ => None,
		}
	}

	/// Whether a component container saw its [`Change::Mount`] or [`Change::SetRoot`].
	#[must_use]
	pub fn is_mounted(&self, id: NodeId) -> bool {
		matches!(self.0.borrow().nodes.get(&id), Some(Mirrored::Container { mounted: true, .. }))
	}

	#[must_use]
	pub fn attribute(&self, id: NodeId, name: &str) -> Option<String> {
		match self.0.borrow().nodes.get(&id) {
			Some(Mirrored::Element { attributes, .. }) => attributes.get(name).cloned(),
			_ => None,
		}
	}

	/// Serializes everything below `id`. Containers are transparent.
	#[must_use]
	pub fn to_html(&self, id: NodeId) -> String {
		let mut html = String::new();
		self.0.borrow().write_html(&mut html, id);
		html
	}
}

impl ChangeSink for Mirror {
	fn flush(&mut self, changes: &[Change]) -> Result<(), SinkError> {
		self.apply(changes).map_err(Into::into)
	}
}

impl Document {
	fn create(&mut self, id: NodeId, node: Mirrored) -> Result<(), MirrorError> {
		if self.nodes.contains_key(&id) {
			return Err(MirrorError::Duplicate { id });
		}
		self.nodes.insert(id, node);
		Ok(())
	}

	fn get_mut(&mut self, id: NodeId) -> Result<&mut Mirrored, MirrorError> {
		self.nodes.get_mut(&id).ok_or(MirrorError::UnknownNode { id })
	}

	/// Top-level components have no creation record. They appear when first referenced.
	fn container(&mut self, id: NodeId) -> &mut Mirrored {
		self.nodes.entry(id).or_insert_with(|| {
			trace!(%id, "Creating implicit container.");
			Mirrored::Container {
				name: None,
				child: None,
				mounted: false,
			}
		})
	}

	fn apply(&mut self, change: &Change) -> Result<(), MirrorError> {
		match change {
			Change::CreateElement { id, tag, svg } => self.create(
				*id,
				Mirrored::Element {
					name: tag.clone(),
					svg: *svg,
					attributes: Attributes::new(),
					children: Vec::new(),
				},
			),
			Change::CreateText { id } => self.create(*id, Mirrored::Text(String::new())),
			Change::CreateComponent { id, name } => self.create(
				*id,
				Mirrored::Container {
					name: Some(name.clone()),
					child: None,
					mounted: false,
				},
			),
			Change::SetAttribute { id, name, value } => match self.get_mut(*id)? {
				Mirrored::Element { attributes, .. } => {
					attributes.insert(name.clone(), value.clone());
					Ok(())
				}
				_ => Err(wrong_kind(*id, "SetAttribute", "element")),
			},
			Change::DeleteAttribute { id, name } => match self.get_mut(*id)? {
				Mirrored::Element { attributes, .. } => {
					if attributes.remove(name).is_none() {
						warn!(%id, "Deleted attribute was not set.");
					}
					Ok(())
				}
				_ => Err(wrong_kind(*id, "DeleteAttribute", "element")),
			},
			Change::SetText { id, text } => match self.get_mut(*id)? {
				Mirrored::Text(current) => {
					current.clone_from(text);
					Ok(())
				}
				_ => Err(wrong_kind(*id, "SetText", "text")),
			},
			Change::AppendChild { parent, child } => {
				if !self.nodes.contains_key(child) {
					return Err(MirrorError::UnknownNode { id: *child });
				}
				let parent_node = if self.nodes.contains_key(parent) {
					self.get_mut(*parent)?
				} else {
					self.container(*parent)
				};
				match parent_node {
					Mirrored::Element { children, .. } => children.push(*child),
					Mirrored::Container { child: slot, .. } => *slot = Some(*child),
					Mirrored::Text(_) => return Err(MirrorError::NotAParent { id: *parent }),
				}
				Ok(())
			}
			Change::RemoveChild { parent, child } => match self.get_mut(*parent)? {
				Mirrored::Element { children, .. } => {
					let position = children.iter().position(|c| c == child).ok_or(MirrorError::NotAChild { parent: *parent, child: *child })?;
					children.remove(position);
					Ok(())
				}
				Mirrored::Container { child: slot, .. } if *slot == Some(*child) => {
					*slot = None;
					Ok(())
				}
				Mirrored::Container { .. } => Err(MirrorError::NotAChild { parent: *parent, child: *child }),
				Mirrored::Text(_) => Err(MirrorError::NotAParent { id: *parent }),
			},
			Change::ReplaceChild { parent, old, new } => {
				if !self.nodes.contains_key(new) {
					return Err(MirrorError::UnknownNode { id: *new });
				}
				let not_a_child = MirrorError::NotAChild { parent: *parent, child: *old };
				match self.get_mut(*parent)? {
					Mirrored::Element { children, .. } => {
						let slot = children.iter_mut().find(|c| **c == *old).ok_or(not_a_child)?;
						*slot = *new;
						Ok(())
					}
					Mirrored::Container { child, .. } if *child == Some(*old) => {
						*child = Some(*new);
						Ok(())
					}
					Mirrored::Container { .. } => Err(not_a_child),
					Mirrored::Text(_) => Err(MirrorError::NotAParent { id: *parent }),
				}
			}
			Change::Mount { id } => match self.get_mut(*id)? {
				Mirrored::Container { mounted, .. } => {
					*mounted = true;
					Ok(())
				}
				_ => Err(wrong_kind(*id, "Mount", "component")),
			},
			Change::DeleteNode { id } => {
				self.nodes.remove(id).ok_or(MirrorError::UnknownNode { id: *id })?;
				self.roots.retain(|root| root != id);
				Ok(())
			}
			Change::SetRoot { id } => {
				if let Mirrored::Container { mounted, .. } = self.container(*id) {
					*mounted = true;
				}
				if !self.roots.contains(id) {
					self.roots.push(*id);
				}
				Ok(())
			}
		}
	}

	fn write_html(&self, html: &mut String, id: NodeId) {
		match self.nodes.get(&id) {
			None => (),
			Some(Mirrored::Text(text)) => html.push_str(&escape(text)),
			Some(Mirrored::Container { child, .. }) => {
				if let Some(child) = child {
					self.write_html(html, *child);
				}
			}
			Some(Mirrored::Element { name, svg, attributes, children }) => {
				write_open_tag(html, name, attributes);
				if !*svg && is_void_element(name) {
					return;
				}
				for child in children {
					self.write_html(html, *child);
				}
				let _ = write!(html, "</{}>", name);
			}
		}
	}
}

fn wrong_kind(id: NodeId, change: &'static str, expected: &'static str) -> MirrorError {
	MirrorError::WrongKind { id, change, expected }
}
