//! Maps markup attributes onto component fields and resolves event handler paths.

use crate::{
	error::{HandlerError, MapError},
	markup::Attributes,
	schema::{Access, MemberKind, Schema, SchemaCache, Visibility},
};
use core::{
	any::Any,
	fmt::{self, Debug, Formatter},
};
use std::rc::Rc;
use tracing::{instrument, trace};

/// Sets every exported field of `target` from the attribute with its lower-cased name.
///
/// Absent attributes reset their field where the field type defines a reset (`bool` becomes `false`).
/// Unexported and embedded members are never touched.
///
/// # Errors
///
/// Iff an attribute value can't be converted to its field's type.
/// Fields before the failing one (in declaration order) stay assigned.
#[instrument(skip(schema, target, attributes), fields(schema = schema.type_name(), attributes.len = attributes.len()))]
pub fn map_fields(schema: &Schema, target: &mut dyn Any, attributes: &Attributes) -> Result<(), MapError> {
	for member in &schema.members {
		if member.visibility != Visibility::Exported {
			continue;
		}
		if let MemberKind::Field { set, .. } = &member.kind {
			let key = member.name.to_ascii_lowercase();
			set(target, attributes.get(&key).map(String::as_str))?;
		}
	}
	Ok(())
}

/// A resolved handler call with its argument already decoded.
///
/// The target is walked again when the handler is called, so a handler stays valid
/// for as long as its path still resolves on the value it is called with.
pub struct Handler {
	path: String,
	arg: Option<Box<dyn Any>>,
}

impl Debug for Handler {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Handler").field("path", &self.path).field("has_arg", &self.arg.is_some()).finish()
	}
}

impl Handler {
	#[must_use]
	pub fn path(&self) -> &str {
		&self.path
	}

	/// Invokes the handler on `target`, which must be of the type described by `schema`.
	///
	/// # Errors
	///
	/// Iff the path no longer resolves to a method of the expected shape.
	#[instrument(skip(cache, schema, target), fields(path = %self.path))]
	pub fn call(self, cache: &SchemaCache, schema: Rc<Schema>, target: &mut dyn Any) -> Result<(), HandlerError> {
		let stale = || HandlerError::Stale { path: self.path.clone() };
		let resolved = walk(cache, schema, target, &self.path).map_err(|_| stale())?;
		let MemberKind::Method(method) = &resolved.schema.members[resolved.index].kind else {
			return Err(stale());
		};
		if (method.invoke)(resolved.target, self.arg) {
			trace!("Called handler.");
			Ok(())
		} else {
			Err(HandlerError::Stale { path: self.path })
		}
	}
}

/// Resolves the dotted `path` to a handler on `target` and decodes `json` as its argument.
///
/// Segments may name nested values, map keys or indices. The last one must name an exported method.
/// `json` is ignored for handlers without an argument.
///
/// # Errors
///
/// Iff a segment doesn't resolve, names an unexported member, the last segment is not a method,
/// or `json` doesn't decode to the handler's argument type.
#[instrument(skip(cache, schema, target, json), fields(schema = schema.type_name(), json.len = json.len()))]
pub fn resolve_handler(cache: &SchemaCache, schema: Rc<Schema>, target: &mut dyn Any, path: &str, json: &str) -> Result<Handler, HandlerError> {
	let resolved = walk(cache, schema, target, path)?;
	let MemberKind::Method(method) = &resolved.schema.members[resolved.index].kind else {
		return Err(HandlerError::NotAMethod { segment: path.to_owned() });
	};
	let arg = match method.arity {
		0 => None,
		_ => (method.decode)(json).map_err(|source| HandlerError::BadArgument { path: path.to_owned(), source })?,
	};
	Ok(Handler { path: path.to_owned(), arg })
}

/// Resolves and immediately calls a handler.
///
/// # Errors
///
/// See [`resolve_handler`] and [`Handler::call`].
pub fn call_handler(cache: &SchemaCache, schema: &Rc<Schema>, target: &mut dyn Any, path: &str, json: &str) -> Result<(), HandlerError> {
	resolve_handler(cache, Rc::clone(schema), target, path, json)?.call(cache, Rc::clone(schema), target)
}

struct Resolved<'t> {
	target: &'t mut dyn Any,
	schema: Rc<Schema>,
	index: usize,
}

fn walk<'t>(cache: &SchemaCache, mut schema: Rc<Schema>, mut target: &'t mut dyn Any, path: &str) -> Result<Resolved<'t>, HandlerError> {
	if path.is_empty() {
		return Err(HandlerError::EmptyPath);
	}
	let mut segments = path.split('.').peekable();
	while let Some(segment) = segments.next() {
		let last = segments.peek().is_none();

		// Pointer-likes are transparent.
		while let Some(Access::Deref { project, schema: inner }) = &schema.access {
			let next_schema = inner(cache);
			target = project(target).ok_or_else(|| HandlerError::NotTraversable { segment: segment.to_owned() })?;
			schema = next_schema;
		}

		let (next_target, next_schema) = match schema.member_index(segment) {
			Some(index) => {
				let member = &schema.members[index];
				if member.visibility == Visibility::Unexported {
					return Err(HandlerError::Unexported { segment: segment.to_owned() });
				}
				match &member.kind {
					MemberKind::Method(_) if last => {
						return Ok(Resolved {
							target,
							schema: Rc::clone(&schema),
							index,
						})
					}
					MemberKind::Method(_) => return Err(HandlerError::NotTraversable { segment: segment.to_owned() }),
					MemberKind::Field { .. } if last => return Err(HandlerError::NotAMethod { segment: segment.to_owned() }),
					MemberKind::Field { .. } => return Err(HandlerError::NotTraversable { segment: segment.to_owned() }),
					MemberKind::Nested { .. } if last => return Err(HandlerError::NotAMethod { segment: segment.to_owned() }),
					MemberKind::Nested { project, schema: inner } => (
						project(target).ok_or_else(|| HandlerError::NotTraversable { segment: segment.to_owned() })?,
						inner(cache),
					),
				}
			}
			None => match &schema.access {
				Some(Access::Index { .. }) if last => return Err(HandlerError::NotAMethod { segment: segment.to_owned() }),
				Some(Access::Index { lookup, schema: inner }) => (
					lookup(target, segment).ok_or_else(|| HandlerError::NotFound { segment: segment.to_owned() })?,
					inner(cache),
				),
				_ => return Err(HandlerError::NotFound { segment: segment.to_owned() }),
			},
		};
		target = next_target;
		schema = next_schema;
	}
	// `split` always yields at least one segment.
	Err(HandlerError::EmptyPath)
}
