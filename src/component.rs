use crate::{schema::Reflect, template::FuncMap};
use core::{
	any::Any,
	cell::RefCell,
	fmt::{self, Debug, Formatter},
};
use std::rc::Rc;

/// A shared, mutable component instance as held by the engine.
pub type Instance = Rc<RefCell<dyn Component>>;

/// Type-erased access to a component's concrete value.
pub trait AsAny: Any {
	fn as_any(&self) -> &dyn Any;
	fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
	fn as_any(&self) -> &dyn Any {
		self
	}

	fn as_any_mut(&mut self) -> &mut dyn Any {
		self
	}
}

/// A stateful unit of UI that renders markup.
///
/// [`render`](`Component::render`) returns a template that is executed against the component's exported fields
/// (see [`template`](`crate::template`)), then decoded into a single root node.
///
/// All hooks are optional.
pub trait Component: Reflect + AsAny {
	fn render(&self) -> String;

	/// Extra template functions. Reserved names are rejected when rendering.
	fn funcs(&self) -> FuncMap {
		FuncMap::new()
	}

	/// Called once, after the component's whole subtree is mounted.
	fn on_mount(&mut self) {}

	/// Called once, after the component's subtree was dismounted.
	fn on_dismount(&mut self) {}

	fn on_navigate(&mut self, _url: &str) {}

	/// Subscriptions returned here are closed when the component is dismounted.
	fn subscribe(&mut self) -> Option<Subscriber> {
		None
	}
}

/// Event subscriptions that are closed together.
#[derive(Default)]
pub struct Subscriber {
	closers: Vec<Box<dyn FnOnce()>>,
}

impl Debug for Subscriber {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Subscriber").field("open", &self.closers.len()).finish()
	}
}

impl Subscriber {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers `close` to run when this subscriber is closed or dropped.
	#[must_use]
	pub fn on_close(mut self, close: impl FnOnce() + 'static) -> Self {
		self.closers.push(Box::new(close));
		self
	}

	/// Runs all pending closers, in registration order.
	pub fn close(&mut self) {
		for close in self.closers.drain(..) {
			close();
		}
	}
}

impl Drop for Subscriber {
	fn drop(&mut self) {
		self.close();
	}
}
