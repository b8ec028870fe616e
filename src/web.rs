//! Applies change logs to a browser DOM.

use crate::{
	change::{Change, ChangeSink},
	error::SinkError,
	node::NodeId,
};
use hashbrown::HashMap;
use js_sys::Function;
use std::rc::Rc;
use thiserror::Error;
use tracing::{error, instrument, trace, trace_span, warn};
use wasm_bindgen::{closure::Closure, JsCast, JsValue};
use web_sys::{Document, Element, Event, Node};

const SVG_NAMESPACE: &str = "http://www.w3.org/2000/svg";

#[derive(Debug, Error)]
pub enum DomError {
	#[error("the mount point is not attached to a document")]
	Detached,

	#[error("unknown node {id}")]
	UnknownNode { id: NodeId },

	#[error("node {id} can't have children")]
	NotAParent { id: NodeId },

	#[error("DOM call failed: {0}")]
	Js(String),
}

impl From<JsValue> for DomError {
	fn from(value: JsValue) -> Self {
		Self::Js(format!("{:?}", value))
	}
}

type Listener = Closure<dyn FnMut(Event)>;

enum DomNode {
	Text(Node),
	Element { element: Element, listeners: HashMap<String, Listener> },
	/// A component. Its DOM presence is its root's.
	Container { child: Option<NodeId> },
}

/// Called with the element id, the `on…` attribute name and a JSON payload
/// (the event target's `value` if it is a string, otherwise `null`).
pub type EventCallback = Rc<dyn Fn(NodeId, &str, String)>;

/// A [`ChangeSink`] that keeps a real DOM subtree in sync.
///
/// `on<event>` attributes are bound as event listeners instead of being set on the DOM element.
/// Their callback should post [`Engine::dispatch_event`](`crate::Engine::dispatch_event`) through a
/// [`Dispatcher`](`crate::ui::Dispatcher`), since it runs while the browser dispatches the event.
pub struct DomSink {
	document: Document,
	mount_point: Element,
	nodes: HashMap<NodeId, DomNode>,
	on_event: EventCallback,
}

impl core::fmt::Debug for DomSink {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("DomSink")
			.field("mount_point", &self.mount_point)
			.field("nodes", &self.nodes.len())
			.finish_non_exhaustive()
	}
}

impl DomSink {
	/// # Errors
	///
	/// Iff `mount_point` has no owner document.
	pub fn new(mount_point: Element, on_event: impl Fn(NodeId, &str, String) + 'static) -> Result<Self, DomError> {
		let node: &Node = mount_point.as_ref();
		let document = node.owner_document().ok_or(DomError::Detached)?;
		Ok(Self {
			document,
			mount_point,
			nodes: HashMap::new(),
			on_event: Rc::new(on_event),
		})
	}

	/// The DOM node that represents `id`, looking through component containers.
	fn dom_node(&self, mut id: NodeId) -> Result<Node, DomError> {
		loop {
			match self.nodes.get(&id) {
				Some(DomNode::Text(node)) => return Ok(node.clone()),
				Some(DomNode::Element { element, .. }) => return Ok(element.clone().into()),
				Some(DomNode::Container { child: Some(child) }) => id = *child,
				Some(DomNode::Container { child: None }) | None => return Err(DomError::UnknownNode { id }),
			}
		}
	}

	fn element(&mut self, id: NodeId) -> Result<(&Element, &mut HashMap<String, Listener>), DomError> {
		match self.nodes.get_mut(&id) {
			Some(DomNode::Element { element, listeners }) => Ok((element, listeners)),
			_ => Err(DomError::UnknownNode { id }),
		}
	}

	fn listener(&self, id: NodeId, attribute: &str) -> Listener {
		let on_event = Rc::clone(&self.on_event);
		let attribute = attribute.to_owned();
		Closure::wrap(Box::new(move |event: Event| {
			let value = event
				.target()
				.and_then(|target| js_sys::Reflect::get(&target, &JsValue::from_str("value")).ok())
				.and_then(|value| value.as_string());
			let payload = serde_json::json!(value).to_string();
			let span = trace_span!("Forwarding DOM event", %id, attribute = %attribute);
			let _enter = span.enter();
			on_event(id, &attribute, payload);
		}) as Box<dyn FnMut(Event)>)
	}

	fn link(&mut self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
		let dom_child = self.dom_node(child)?;
		match self.nodes.entry(parent).or_insert(DomNode::Container { child: None }) {
			DomNode::Element { element, .. } => {
				let node: &Node = element.as_ref();
				node.append_child(&dom_child)?;
			}
			DomNode::Container { child: slot } => *slot = Some(child),
			DomNode::Text(_) => return Err(DomError::NotAParent { id: parent }),
		}
		Ok(())
	}

	fn apply(&mut self, change: &Change) -> Result<(), DomError> {
		match change {
			Change::CreateElement { id, tag, svg } => {
				let element = if *svg {
					self.document.create_element_ns(Some(SVG_NAMESPACE), tag)?
				} else {
					self.document.create_element(tag)?
				};
				self.nodes.insert(
					*id,
					DomNode::Element {
						element,
						listeners: HashMap::new(),
					},
				);
			}
			Change::CreateText { id } => {
				let text = self.document.create_text_node("");
				self.nodes.insert(*id, DomNode::Text(text.into()));
			}
			Change::CreateComponent { id, .. } => {
				self.nodes.insert(*id, DomNode::Container { child: None });
			}
			Change::SetAttribute { id, name, value } => {
				if let Some(event) = name.strip_prefix("on") {
					let listener = self.listener(*id, name);
					let (element, listeners) = self.element(*id)?;
					element.add_event_listener_with_callback(event, listener.as_ref().unchecked_ref::<Function>())?;
					if let Some(previous) = listeners.insert(name.clone(), listener) {
						element.remove_event_listener_with_callback(event, previous.as_ref().unchecked_ref::<Function>())?;
					}
				} else {
					self.element(*id)?.0.set_attribute(name, value)?;
				}
			}
			Change::DeleteAttribute { id, name } => {
				let (element, listeners) = self.element(*id)?;
				match (name.strip_prefix("on"), listeners.remove(name)) {
					(Some(event), Some(listener)) => element.remove_event_listener_with_callback(event, listener.as_ref().unchecked_ref::<Function>())?,
					_ => element.remove_attribute(name)?,
				}
			}
			Change::SetText { id, text } => match self.nodes.get(id) {
				Some(DomNode::Text(node)) => node.set_text_content(Some(text)),
				_ => return Err(DomError::UnknownNode { id: *id }),
			},
			Change::AppendChild { parent, child } => self.link(*parent, *child)?,
			Change::RemoveChild { parent, child } => {
				if let Some(DomNode::Container { child: slot }) = self.nodes.get_mut(parent) {
					*slot = None;
				}
				let dom_child = self.dom_node(*child)?;
				if let Some(dom_parent) = dom_child.parent_node() {
					dom_parent.remove_child(&dom_child)?;
				}
			}
			Change::ReplaceChild { parent, old, new } => {
				let dom_old = self.dom_node(*old)?;
				let dom_new = self.dom_node(*new)?;
				if let Some(DomNode::Container { child }) = self.nodes.get_mut(parent) {
					*child = Some(*new);
				}
				match dom_old.parent_node() {
					Some(dom_parent) => {
						dom_parent.replace_child(&dom_new, &dom_old)?;
					}
					None => warn!(%old, "Replaced node was not attached. Ignoring."),
				}
			}
			Change::Mount { id } => trace!(%id, "Component mounted."),
			Change::DeleteNode { id } => match self.nodes.remove(id) {
				Some(DomNode::Element { element, listeners }) => {
					for (name, listener) in listeners {
						let event = name.strip_prefix("on").unwrap_or(&name);
						element.remove_event_listener_with_callback(event, listener.as_ref().unchecked_ref::<Function>())?;
					}
					element.remove();
				}
				Some(DomNode::Text(node)) => {
					if let Some(parent) = node.parent_node() {
						parent.remove_child(&node)?;
					}
				}
				Some(DomNode::Container { .. }) => (),
				None => return Err(DomError::UnknownNode { id: *id }),
			},
			Change::SetRoot { id } => {
				self.nodes.entry(*id).or_insert(DomNode::Container { child: None });
				let root = self.dom_node(*id)?;
				let mount_point: &Node = self.mount_point.as_ref();
				mount_point.append_child(&root)?;
			}
		}
		Ok(())
	}
}

impl ChangeSink for DomSink {
	#[instrument(skip(self, changes), fields(changes.len = changes.len()))]
	fn flush(&mut self, changes: &[Change]) -> Result<(), SinkError> {
		for change in changes {
			if let Err(error) = self.apply(change) {
				error!(?change, %error, "Failed to apply change to the DOM.");
				return Err(error.into());
			}
		}
		Ok(())
	}
}
