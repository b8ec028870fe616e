//! The reconciler.
//!
//! An [`Engine`] owns the mounted [`Tree`], the [`Registry`] and a [`ChangeSink`].
//! Each public operation runs to completion on the calling thread, then flushes its change log once.

use crate::{
	change::{Change, ChangeLog, ChangeSink, NullSink},
	component::{Component, Instance},
	config::Config,
	error::{DecodeError, Error, Result},
	logging::{failed_at, Redacted},
	mapper,
	markup::{Attributes, Decoder, Tag, TagKind},
	node::{ComponentNode, Element, Node, NodeId, NodeKind, Tree},
	registry::Registry,
	schema::Schema,
	template,
};
use core::{
	cell::RefCell,
	fmt::{self, Debug, Formatter},
};
use hashbrown::HashMap;
use std::rc::Rc;
use tracing::{debug, error, instrument, trace, trace_span, warn};

/// Identifies a component instance by its allocation.
fn address<C: ?Sized>(instance: &Rc<RefCell<C>>) -> usize {
	Rc::as_ptr(instance).cast::<()>() as usize
}

fn element_mut(tree: &mut Tree, id: NodeId) -> Result<&mut Element> {
	match tree.get_mut(id).map(|node| &mut node.kind) {
		Some(NodeKind::Element(element)) => Ok(element),
		_ => Err(Error::NoSuchNode { id }),
	}
}

fn component_node(tree: &Tree, id: NodeId) -> Result<&ComponentNode> {
	tree.get(id).and_then(Node::as_component).ok_or(Error::NotMounted)
}

fn component_node_mut(tree: &mut Tree, id: NodeId) -> Result<&mut ComponentNode> {
	match tree.get_mut(id).map(|node| &mut node.kind) {
		Some(NodeKind::Component(component)) => Ok(component),
		_ => Err(Error::NotMounted),
	}
}

/// Deletions and sets turning `old` into `new`, each sorted by key.
fn diff_attributes(old: &Attributes, new: &Attributes) -> (Vec<String>, Vec<(String, String)>) {
	let mut deleted: Vec<_> = old.keys().filter(|key| !new.contains_key(*key)).cloned().collect();
	let mut set: Vec<_> = new
		.iter()
		.filter(|(key, value)| old.get(*key) != Some(*value))
		.map(|(key, value)| (key.clone(), value.clone()))
		.collect();
	deleted.sort_unstable();
	set.sort_unstable();
	(deleted, set)
}

enum Diff {
	Text,
	Element,
	Component,
	Replace,
}

pub struct Engine {
	config: Config,
	registry: Registry,
	tree: Tree,
	log: ChangeLog,
	sink: Box<dyn ChangeSink>,
	/// Component node of each live instance, by [`address`].
	instances: HashMap<usize, NodeId>,
}

impl Debug for Engine {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Engine")
			.field("config", &self.config)
			.field("registry", &self.registry)
			.field("tree", &self.tree)
			.field("pending", &self.log.len())
			.field("instances", &self.instances.len())
			.finish_non_exhaustive()
	}
}

impl Default for Engine {
	fn default() -> Self {
		Self::new(Config::default())
	}
}

impl Engine {
	/// Creates a headless engine that discards its changes.
	#[must_use]
	pub fn new(config: Config) -> Self {
		Self::with_sink(config, NullSink)
	}

	#[must_use]
	pub fn with_sink(config: Config, sink: impl ChangeSink + 'static) -> Self {
		Self {
			registry: Registry::new(config.entry_package.clone()),
			config,
			tree: Tree::new(),
			log: ChangeLog::new(),
			sink: Box::new(sink),
			instances: HashMap::new(),
		}
	}

	pub fn set_sink(&mut self, sink: impl ChangeSink + 'static) {
		self.sink = Box::new(sink);
	}

	#[must_use]
	pub fn config(&self) -> &Config {
		&self.config
	}

	#[must_use]
	pub fn registry(&self) -> &Registry {
		&self.registry
	}

	pub fn registry_mut(&mut self) -> &mut Registry {
		&mut self.registry
	}

	/// Shorthand for [`Registry::register`].
	///
	/// # Errors
	///
	/// Iff `C` is zero-sized.
	pub fn register<C: Component + Default>(&mut self) -> Result<String> {
		Ok(self.registry.register::<C>()?)
	}

	#[must_use]
	pub fn tree(&self) -> &Tree {
		&self.tree
	}

	#[must_use]
	pub fn node(&self, id: NodeId) -> Option<&Node> {
		self.tree.get(id)
	}

	/// Live nodes across all mounted trees, components included.
	#[must_use]
	pub fn node_count(&self) -> usize {
		self.tree.len()
	}

	#[must_use]
	pub fn is_mounted<C: Component>(&self, component: &Rc<RefCell<C>>) -> bool {
		self.component_id(component).is_ok()
	}

	/// # Errors
	///
	/// [`Error::NotMounted`] iff `component` isn't mounted.
	pub fn component_id<C: Component>(&self, component: &Rc<RefCell<C>>) -> Result<NodeId> {
		self.instances.get(&address(component)).copied().ok_or(Error::NotMounted)
	}

	/// # Errors
	///
	/// [`Error::NotMounted`] iff `id` is not a live component node.
	pub fn component(&self, id: NodeId) -> Result<Instance> {
		component_node(&self.tree, id).map(|component| Rc::clone(&component.instance))
	}

	/// Mounts `component` if it isn't mounted yet, otherwise updates it.
	///
	/// # Errors
	///
	/// Iff decoding, mapping or the change sink fails.
	/// A failed first mount leaves no nodes behind. A failed update may leave the tree partially updated.
	#[instrument(skip(self, component), fields(component = core::any::type_name::<C>()))]
	pub fn render<C: Component>(&mut self, component: &Rc<RefCell<C>>) -> Result<Vec<Change>> {
		match self.component_id(component) {
			Ok(id) => self.finish(|engine| engine.update_component(id, engine.depth_of(id))),
			Err(_) => self.mount_new(component),
		}
	}

	/// # Errors
	///
	/// [`Error::AlreadyMounted`] iff `component` is mounted, otherwise as for [`render`](`Engine::render`).
	#[instrument(skip(self, component), fields(component = core::any::type_name::<C>()))]
	pub fn mount<C: Component>(&mut self, component: &Rc<RefCell<C>>) -> Result<Vec<Change>> {
		if let Ok(id) = self.component_id(component) {
			return Err(Error::AlreadyMounted { id });
		}
		self.mount_new(component)
	}

	/// # Errors
	///
	/// [`Error::NotMounted`] iff `component` isn't mounted, otherwise as for [`render`](`Engine::render`).
	#[instrument(skip(self, component), fields(component = core::any::type_name::<C>()))]
	pub fn update<C: Component>(&mut self, component: &Rc<RefCell<C>>) -> Result<Vec<Change>> {
		let id = self.component_id(component)?;
		self.finish(|engine| engine.update_component(id, engine.depth_of(id)))
	}

	/// Tears down `component`'s whole tree.
	///
	/// # Errors
	///
	/// [`Error::NotMounted`] iff `component` isn't mounted, or iff the change sink fails.
	#[instrument(skip(self, component), fields(component = core::any::type_name::<C>()))]
	pub fn dismount<C: Component>(&mut self, component: &Rc<RefCell<C>>) -> Result<Vec<Change>> {
		let id = self.component_id(component)?;
		self.finish(|engine| {
			if let Some(parent) = engine.tree.get(id).and_then(Node::parent) {
				engine.unlink(parent, id)?;
			}
			engine.dismount_node(id);
			Ok(())
		})
	}

	/// Re-renders the mounted component `id`, which may be nested.
	///
	/// # Errors
	///
	/// [`Error::NotMounted`] iff `id` is not a component, otherwise as for [`render`](`Engine::render`).
	#[instrument(skip(self))]
	pub fn render_id(&mut self, id: NodeId) -> Result<Vec<Change>> {
		component_node(&self.tree, id)?;
		self.finish(|engine| engine.update_component(id, engine.depth_of(id)))
	}

	/// Calls the handler at `path` on component `id` with `json` as argument, then re-renders the component.
	///
	/// # Errors
	///
	/// Iff `id` is not a component, the handler can't be resolved, or re-rendering fails.
	#[instrument(skip(self, json), fields(json.len = json.len()))]
	pub fn dispatch(&mut self, id: NodeId, path: &str, json: &str) -> Result<Vec<Change>> {
		let (instance, schema) = self.handles(id)?;
		{
			let mut component = instance.borrow_mut();
			mapper::call_handler(self.registry.schemas(), &schema, (*component).as_any_mut(), path, json)?;
		}
		self.finish(|engine| engine.update_component(id, engine.depth_of(id)))
	}

	/// Dispatches the handler path stored in element `id`'s `attribute` (like `onclick`)
	/// to the nearest enclosing component.
	///
	/// # Errors
	///
	/// Iff `id` is not an element with that event attribute, otherwise as for [`dispatch`](`Engine::dispatch`).
	#[instrument(skip(self, json), fields(json.len = json.len()))]
	pub fn dispatch_event(&mut self, id: NodeId, attribute: &str, json: &str) -> Result<Vec<Change>> {
		let node = self.tree.get(id).ok_or(Error::NoSuchNode { id })?;
		let path = node
			.as_element()
			.filter(|_| attribute.starts_with("on"))
			.and_then(|element| element.attributes.get(attribute))
			.cloned()
			.ok_or_else(|| Error::NotAnEventTarget {
				id,
				attribute: attribute.to_owned(),
			})?;
		let owner = self.tree.owner_component(id).ok_or(Error::NotMounted)?;
		self.dispatch(owner, &path, json)
	}

	/// Notifies every component in `component`'s tree of `url`, parents first, then re-renders each that is still mounted.
	///
	/// # Errors
	///
	/// [`Error::NotMounted`] iff `component` isn't mounted, otherwise as for [`render`](`Engine::render`).
	#[instrument(skip(self, component), fields(component = core::any::type_name::<C>()))]
	pub fn navigate<C: Component>(&mut self, component: &Rc<RefCell<C>>, url: &str) -> Result<Vec<Change>> {
		let id = self.component_id(component)?;
		let components = self.tree.components_under(id);
		for &id in &components {
			let (instance, _) = self.handles(id)?;
			instance.borrow_mut().on_navigate(url);
		}
		self.finish(|engine| {
			for id in components {
				// Re-rendering a parent may have replaced it.
				if component_node(&engine.tree, id).is_ok() {
					engine.update_component(id, engine.depth_of(id))?;
				}
			}
			Ok(())
		})
	}

	/// Runs `f`, then flushes the change log. Changes made before a failure are flushed too.
	fn finish(&mut self, f: impl FnOnce(&mut Self) -> Result<()>) -> Result<Vec<Change>> {
		let result = f(self);
		let changes = self.log.take();
		match result {
			Ok(()) => {
				self.sink.flush(&changes).map_err(Error::Sink)?;
				trace!(changes = changes.len(), nodes = self.tree.len(), "Flushed changes.");
				Ok(changes)
			}
			Err(error) => {
				error!(%error, changes = changes.len(), "Engine call failed.");
				if !changes.is_empty() {
					if let Err(sink_error) = self.sink.flush(&changes) {
						error!(error = %sink_error, "Change sink failed while flushing a partial update.");
					}
				}
				Err(error)
			}
		}
	}

	/// Runs `f`. If it fails, every node it created is dropped along with its changes.
	fn atomically<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
		let watermark = self.tree.watermark();
		let checkpoint = self.log.checkpoint();
		let result = f(self);
		if result.is_err() {
			let ids = self.tree.ids_since(watermark);
			debug!(discarded = ids.len(), "Discarding partially mounted subtree.");
			for id in ids {
				if let Some(node) = self.tree.remove(id) {
					self.release(node);
				}
			}
			self.log.rollback(checkpoint);
		}
		result
	}

	fn depth_of(&self, id: NodeId) -> usize {
		self.tree.path(id).len().saturating_sub(1)
	}

	fn handles(&self, id: NodeId) -> Result<(Instance, Rc<Schema>)> {
		let component = component_node(&self.tree, id)?;
		Ok((Rc::clone(&component.instance), Rc::clone(&component.schema)))
	}

	/// Executes the component's template and decodes the result.
	fn decode(&self, instance: &Instance, schema: &Schema) -> Result<Tag> {
		let markup = {
			let component = instance.borrow();
			let target = (*component).as_any();
			template::execute(&component.render(), &|name| schema.value(target, name), &component.funcs())?
		};
		let tag = Decoder::new(self.registry.entry_package())
			.with_depth_limit(self.config.depth_limit)
			.decode(&markup)
			.map_err(|error| match error {
				DecodeError::TooDeep { limit } => Error::DepthLimit { limit },
				error => error.into(),
			})?;
		self.registry.validate(&tag)?;
		Ok(tag)
	}

	fn mount_new<C: Component>(&mut self, component: &Rc<RefCell<C>>) -> Result<Vec<Change>> {
		let instance: Instance = component.clone();
		let schema = self.registry.schema::<C>();
		let name = self.registry.name_of::<C>();
		self.finish(|engine| {
			engine.atomically(|engine| {
				let span = trace_span!("Mounting top-level component", %name);
				let _enter = span.enter();

				let id = engine.insert_component(None, name.clone(), instance, schema, Attributes::new());
				engine.mount_body(id, 0)?;
				engine.log.push(Change::SetRoot { id });
				Ok(())
			})
		})
	}

	fn insert_component(&mut self, parent: Option<NodeId>, name: String, instance: Instance, schema: Rc<Schema>, attributes: Attributes) -> NodeId {
		let key = address(&instance);
		let id = self.tree.insert(
			parent,
			NodeKind::Component(ComponentNode {
				name,
				instance,
				schema,
				attributes,
				subscriber: None,
				root: None,
				mounted: false,
			}),
		);
		self.instances.insert(key, id);
		id
	}

	/// Renders and mounts the root of component `id`, then runs its mount hooks.
	fn mount_body(&mut self, id: NodeId, depth: usize) -> Result<()> {
		let (instance, schema) = self.handles(id)?;
		let tag = self.decode(&instance, &schema)?;
		let root = self.mount_node(tag, id, depth + 1)?;

		let subscriber = {
			let mut component = instance.borrow_mut();
			let subscriber = component.subscribe();
			component.on_mount();
			subscriber
		};
		let component = component_node_mut(&mut self.tree, id)?;
		component.root = Some(root);
		component.subscriber = subscriber;
		component.mounted = true;
		self.log.push(Change::AppendChild { parent: id, child: root });
		Ok(())
	}

	fn mount_node(&mut self, tag: Tag, parent: NodeId, depth: usize) -> Result<NodeId> {
		if depth > self.config.depth_limit {
			error!(limit = self.config.depth_limit, "Depth limit reached while mounting.");
			return Err(Error::DepthLimit { limit: self.config.depth_limit });
		}

		match tag.kind {
			TagKind::Text => {
				let id = self.tree.insert(Some(parent), NodeKind::Text(tag.text.clone()));
				trace!(%id, text = %Redacted(&tag.text), "Created text node.");
				self.log.push(Change::CreateText { id });
				self.log.push(Change::SetText { id, text: tag.text });
				Ok(id)
			}
			TagKind::Element => {
				let Tag {
					name,
					is_svg,
					attributes,
					children,
					..
				} = tag;
				let id = self.tree.insert(
					Some(parent),
					NodeKind::Element(Element {
						name: name.clone(),
						is_svg,
						attributes: attributes.clone(),
						children: Vec::with_capacity(children.len()),
					}),
				);
				trace!(%id, tag = %name, "Created element.");
				self.log.push(Change::CreateElement { id, tag: name, svg: is_svg });

				let (_, set) = diff_attributes(&Attributes::new(), &attributes);
				for (name, value) in set {
					self.log.push(Change::SetAttribute { id, name, value });
				}

				for child in children {
					let child = self.mount_node(child, id, depth + 1)?;
					element_mut(&mut self.tree, id)?.children.push(child);
					self.log.push(Change::AppendChild { parent: id, child });
				}
				Ok(id)
			}
			TagKind::Component => self.mount_component(tag, parent, depth),
		}
	}

	fn mount_component(&mut self, tag: Tag, parent: NodeId, depth: usize) -> Result<NodeId> {
		let span = trace_span!("Mounting component", name = %tag.name);
		let _enter = span.enter();

		let (instance, schema) = self.registry.new_instance(&tag.name)?;
		{
			let mut component = instance.borrow_mut();
			mapper::map_fields(&schema, (*component).as_any_mut(), &tag.attributes).map_err(|source| Error::Map {
				component: tag.name.clone(),
				source,
			})?;
		}

		let id = self.insert_component(Some(parent), tag.name.clone(), instance, schema, tag.attributes);
		self.log.push(Change::CreateComponent { id, name: tag.name });
		self.mount_body(id, depth)?;
		self.log.push(Change::Mount { id });
		Ok(id)
	}

	fn update_component(&mut self, id: NodeId, depth: usize) -> Result<()> {
		let span = trace_span!("Updating component", %id);
		let _enter = span.enter();

		let (instance, schema) = self.handles(id)?;
		let root = component_node(&self.tree, id)?.root.ok_or(Error::NotMounted)?;
		let tag = self.decode(&instance, &schema).map_err(|error| {
			failed_at(&self.tree, id, &error);
			error
		})?;
		self.sync(root, tag, depth + 1)
	}

	/// Brings the subtree at `id` in line with `tag`.
	fn sync(&mut self, id: NodeId, tag: Tag, depth: usize) -> Result<()> {
		if depth > self.config.depth_limit {
			let error = Error::DepthLimit { limit: self.config.depth_limit };
			failed_at(&self.tree, id, &error);
			return Err(error);
		}

		let diff = match (self.tree.get(id).map(Node::kind), tag.kind) {
			(None, _) => return Err(Error::NoSuchNode { id }),
			(Some(NodeKind::Text(_)), TagKind::Text) => Diff::Text,
			(Some(NodeKind::Element(element)), TagKind::Element) if element.name == tag.name && element.is_svg == tag.is_svg => Diff::Element,
			(Some(NodeKind::Component(component)), TagKind::Component) if component.name == tag.name => Diff::Component,
			_ => Diff::Replace,
		};

		match diff {
			Diff::Text => {
				self.sync_text(id, tag.text);
				Ok(())
			}
			Diff::Element => self.sync_element(id, tag, depth),
			Diff::Component => self.sync_component(id, tag, depth),
			Diff::Replace => self.replace(id, tag, depth),
		}
	}

	fn sync_text(&mut self, id: NodeId, text: String) {
		if let Some(NodeKind::Text(current)) = self.tree.get_mut(id).map(|node| &mut node.kind) {
			if *current != text {
				trace!(%id, old = %Redacted(current), new = %Redacted(&text), "Updating text.");
				current.clone_from(&text);
				self.log.push(Change::SetText { id, text });
			}
		}
	}

	fn sync_element(&mut self, id: NodeId, tag: Tag, depth: usize) -> Result<()> {
		let span = trace_span!("Diffing element", %id, tag = %tag.name);
		let _enter = span.enter();

		let Tag { attributes, children, .. } = tag;
		let element = element_mut(&mut self.tree, id)?;
		let (deleted, set) = diff_attributes(&element.attributes, &attributes);
		element.attributes = attributes;
		let old_children = element.children.clone();

		for name in deleted {
			trace!(%name, "Deleting attribute.");
			self.log.push(Change::DeleteAttribute { id, name });
		}
		for (name, value) in set {
			trace!(%name, value = %Redacted(&value), "Setting attribute.");
			self.log.push(Change::SetAttribute { id, name, value });
		}

		// Positional: the n-th old child is diffed against the n-th new one.
		let mut children = children.into_iter();
		for old in old_children {
			match children.next() {
				Some(tag) => self.sync(old, tag, depth + 1)?,
				None => {
					self.unlink(id, old)?;
					self.dismount_node(old);
				}
			}
		}
		for tag in children {
			let child = self.atomically(|engine| engine.mount_node(tag, id, depth + 1))?;
			element_mut(&mut self.tree, id)?.children.push(child);
			self.log.push(Change::AppendChild { parent: id, child });
		}
		Ok(())
	}

	fn sync_component(&mut self, id: NodeId, tag: Tag, depth: usize) -> Result<()> {
		let component = component_node(&self.tree, id)?;
		if component.attributes == tag.attributes {
			trace!(%id, name = %tag.name, "Attributes unchanged. Skipping component.");
			return Ok(());
		}

		let span = trace_span!("Updating nested component", %id, name = %tag.name);
		let _enter = span.enter();

		let (instance, schema) = self.handles(id)?;
		let mapped = {
			let mut component = instance.borrow_mut();
			mapper::map_fields(&schema, (*component).as_any_mut(), &tag.attributes)
		};
		if let Err(source) = mapped {
			let error = Error::Map { component: tag.name, source };
			failed_at(&self.tree, id, &error);
			return Err(error);
		}
		component_node_mut(&mut self.tree, id)?.attributes = tag.attributes;
		self.update_component(id, depth)
	}

	// Mismatching nodes: Mount the new one, splice it in, then dismount the old one.
	fn replace(&mut self, old: NodeId, tag: Tag, depth: usize) -> Result<()> {
		let span = trace_span!("Replacing mismatching node", %old);
		let _enter = span.enter();

		let parent = self.tree.get(old).and_then(Node::parent).ok_or(Error::NoSuchNode { id: old })?;
		let new = self.atomically(|engine| engine.mount_node(tag, parent, depth)).map_err(|error| {
			failed_at(&self.tree, old, &error);
			error
		})?;

		match self.tree.get_mut(parent).map(|node| &mut node.kind) {
			Some(NodeKind::Element(element)) => {
				if let Some(slot) = element.children.iter_mut().find(|child| **child == old) {
					*slot = new;
				} else {
					warn!(%parent, %old, "Replaced node was missing from its parent. Appending.");
					element.children.push(new);
				}
			}
			Some(NodeKind::Component(component)) => component.root = Some(new),
			Some(NodeKind::Text(_)) | None => return Err(Error::NoSuchNode { id: parent }),
		}
		self.log.push(Change::ReplaceChild { parent, old, new });
		self.dismount_node(old);
		Ok(())
	}

	/// Removes `child` from `parent`'s child list and records that.
	fn unlink(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
		match self.tree.get_mut(parent).map(|node| &mut node.kind) {
			Some(NodeKind::Element(element)) => element.children.retain(|c| *c != child),
			Some(NodeKind::Component(component)) => component.root = None,
			Some(NodeKind::Text(_)) | None => return Err(Error::NoSuchNode { id: parent }),
		}
		self.log.push(Change::RemoveChild { parent, child });
		Ok(())
	}

	/// Deletes `id` and everything below it, children first.
	fn dismount_node(&mut self, id: NodeId) {
		for child in self.tree.children(id) {
			self.dismount_node(child);
		}
		match self.tree.remove(id) {
			Some(node) => {
				self.release(node);
				self.log.push(Change::DeleteNode { id });
			}
			None => warn!(%id, "Tried to dismount a node that doesn't exist. Ignoring."),
		}
	}

	/// Balances a removed component's hooks and forgets its instance.
	fn release(&mut self, node: Node) {
		let id = node.id();
		if let NodeKind::Component(mut component) = node.kind {
			if component.mounted {
				if let Some(mut subscriber) = component.subscriber.take() {
					subscriber.close();
				}
				component.instance.borrow_mut().on_dismount();
			}
			self.instances.remove(&address(&component.instance));
			trace!(%id, name = %component.name, "Released component.");
		}
	}
}
