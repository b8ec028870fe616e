use crate::{
	component::{Component, Instance},
	error::{DecodeError, RegistryError},
	markup::{normalize_name, Tag, TagKind},
	schema::{Reflect, Schema, SchemaCache},
};
use core::{any::type_name, cell::RefCell, mem::size_of};
use hashbrown::HashMap;
use std::rc::Rc;
use tracing::{debug, instrument, trace};

struct Factory {
	type_name: &'static str,
	new: fn() -> Instance,
	schema: fn(&SchemaCache) -> Rc<Schema>,
}

/// Maps normalized component names to constructors, and owns the schema cache.
///
/// One registry belongs to one [`Engine`](`crate::Engine`). Nothing here is global,
/// so independent trees never observe each other's registrations.
pub struct Registry {
	entry_package: String,
	factories: HashMap<String, Factory>,
	schemas: SchemaCache,
}

impl core::fmt::Debug for Registry {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("Registry")
			.field("entry_package", &self.entry_package)
			.field("components", &self.factories.iter().map(|(name, factory)| (name, factory.type_name)).collect::<Vec<_>>())
			.field("schemas", &self.schemas)
			.finish()
	}
}

fn construct<C: Component + Default>() -> Instance {
	Rc::new(RefCell::new(C::default()))
}

impl Registry {
	#[must_use]
	pub fn new(entry_package: impl Into<String>) -> Self {
		Self {
			entry_package: entry_package.into(),
			factories: HashMap::new(),
			schemas: SchemaCache::new(),
		}
	}

	#[must_use]
	pub fn entry_package(&self) -> &str {
		&self.entry_package
	}

	/// The normalized name `C` is addressed by in markup.
	#[must_use]
	pub fn name_of<C: ?Sized + 'static>(&self) -> String {
		normalize_name(type_name::<C>(), &self.entry_package)
	}

	/// Registers `C` under its normalized name and returns that name.
	/// Registering a name again replaces the previous constructor.
	///
	/// # Errors
	///
	/// Iff `C` is zero-sized.
	#[instrument(skip(self), fields(component = type_name::<C>()))]
	pub fn register<C: Component + Default>(&mut self) -> Result<String, RegistryError> {
		if size_of::<C>() == 0 {
			return Err(RegistryError::ZeroSized {
				name: type_name::<C>().to_owned(),
			});
		}

		let name = self.name_of::<C>();
		let replaced = self.factories.insert(
			name.clone(),
			Factory {
				type_name: type_name::<C>(),
				new: construct::<C>,
				schema: SchemaCache::of::<C>,
			},
		);
		if let Some(replaced) = replaced {
			debug!(%name, replaced = replaced.type_name, "Replaced component registration.");
		} else {
			trace!(%name, "Registered component.");
		}
		Ok(name)
	}

	#[must_use]
	pub fn is_registered(&self, name: &str) -> bool {
		self.factories.contains_key(name)
	}

	/// Creates a default instance of the component registered as `name`.
	///
	/// # Errors
	///
	/// Iff nothing is registered as `name`.
	pub fn new_instance(&self, name: &str) -> Result<(Instance, Rc<Schema>), RegistryError> {
		let factory = self.factories.get(name).ok_or_else(|| RegistryError::Unregistered { name: name.to_owned() })?;
		Ok(((factory.new)(), (factory.schema)(&self.schemas)))
	}

	#[must_use]
	pub fn schema<T: Reflect>(&self) -> Rc<Schema> {
		self.schemas.of::<T>()
	}

	#[must_use]
	pub fn schemas(&self) -> &SchemaCache {
		&self.schemas
	}

	/// Checks that every component reference in `tag` is registered.
	///
	/// # Errors
	///
	/// Names the first unregistered component in document order.
	pub fn validate(&self, tag: &Tag) -> Result<(), DecodeError> {
		let mut unknown = None;
		tag.walk(&mut |tag| {
			if unknown.is_none() && tag.kind == TagKind::Component && !self.is_registered(&tag.name) {
				unknown = Some(tag.name.clone());
			}
		});
		match unknown {
			Some(name) => Err(DecodeError::UnknownComponent { name }),
			None => Ok(()),
		}
	}
}
