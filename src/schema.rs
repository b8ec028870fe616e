//! Per-type tables of settable fields and callable handlers.
//!
//! A type opts in by implementing [`Reflect`], which describes its members once through a [`SchemaBuilder`].
//! The resulting [`Schema`] is type-erased and cached per [`TypeId`] in a [`SchemaCache`],
//! so attribute mapping and handler resolution never have to rediscover a type's shape.

use crate::error::MapError;
use core::{
	any::{type_name, Any, TypeId},
	cell::RefCell,
	fmt::{self, Debug, Display, Formatter},
	marker::PhantomData,
	ops::{Deref, DerefMut},
};
use hashbrown::HashMap;
use num_traits::{Num, ToPrimitive};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::rc::Rc;
use tracing::error;

/// A type whose members can be addressed by name.
pub trait Reflect: Any {
	fn describe(schema: &mut SchemaBuilder<Self>)
	where
		Self: Sized;
}

/// A field value as seen by templates.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
	Null,
	Bool(bool),
	Int(i64),
	Uint(u64),
	Float(f64),
	Str(String),
	Json(serde_json::Value),
}

impl Value {
	#[must_use]
	pub fn is_truthy(&self) -> bool {
		match self {
			Value::Null => false,
			Value::Bool(b) => *b,
			Value::Int(i) => *i != 0,
			Value::Uint(u) => *u != 0,
			Value::Float(f) => *f != 0.0,
			Value::Str(s) => !s.is_empty(),
			Value::Json(json) => match json {
				serde_json::Value::Null => false,
				serde_json::Value::Bool(b) => *b,
				serde_json::Value::String(s) => !s.is_empty(),
				serde_json::Value::Array(a) => !a.is_empty(),
				serde_json::Value::Object(o) => !o.is_empty(),
				serde_json::Value::Number(n) => n.as_f64().map_or(true, |n| n != 0.0),
			},
		}
	}

	#[must_use]
	pub fn to_json(&self) -> serde_json::Value {
		match self {
			Value::Null => serde_json::Value::Null,
			Value::Bool(b) => (*b).into(),
			Value::Int(i) => (*i).into(),
			Value::Uint(u) => (*u).into(),
			Value::Float(f) => (*f).into(),
			Value::Str(s) => s.as_str().into(),
			Value::Json(json) => json.clone(),
		}
	}
}

impl Display for Value {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		match self {
			Value::Null => Ok(()),
			Value::Bool(b) => Display::fmt(b, f),
			Value::Int(i) => Display::fmt(i, f),
			Value::Uint(u) => Display::fmt(u, f),
			Value::Float(x) => Display::fmt(x, f),
			Value::Str(s) => f.write_str(s),
			Value::Json(serde_json::Value::String(s)) => f.write_str(s),
			Value::Json(json) => Display::fmt(json, f),
		}
	}
}

/// A value that can be set from a markup attribute.
pub trait FieldType: Sized + 'static {
	/// # Errors
	///
	/// Iff `raw` can't be converted.
	fn parse_attribute(field: &'static str, raw: &str) -> Result<Self, MapError>;

	/// Applied when the attribute is absent.
	fn reset(&mut self) {}

	fn value(&self) -> Value;
}

impl FieldType for bool {
	fn parse_attribute(field: &'static str, raw: &str) -> Result<Self, MapError> {
		match raw {
			// Present without a value.
			"" | "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
			"0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
			_ => Err(MapError::Parse {
				field,
				value: raw.to_owned(),
				reason: "not a boolean".to_owned(),
			}),
		}
	}

	/// An absent boolean attribute means `false`, so unchecking survives re-renders.
	fn reset(&mut self) {
		*self = false;
	}

	fn value(&self) -> Value {
		Value::Bool(*self)
	}
}

/// Parses decimal, `0x`, `0o` and `0b` integers with an optional sign and `_` separators.
fn parse_integer<T>(field: &'static str, raw: &str) -> Result<T, MapError>
where
	T: Num,
	T::FromStrRadixErr: Display,
{
	let (negative, unsigned) = match raw.strip_prefix('-') {
		Some(rest) => (true, rest),
		None => (false, raw.strip_prefix('+').unwrap_or(raw)),
	};
	let lower = unsigned.get(..2).map(str::to_ascii_lowercase);
	let (radix, digits) = match lower.as_deref() {
		Some("0x") => (16, &unsigned[2..]),
		Some("0o") => (8, &unsigned[2..]),
		Some("0b") => (2, &unsigned[2..]),
		_ => (10, unsigned),
	};
	let mut digits = digits.replace('_', "");
	if negative {
		digits.insert(0, '-');
	}
	T::from_str_radix(&digits, radix).map_err(|error| MapError::Parse {
		field,
		value: raw.to_owned(),
		reason: error.to_string(),
	})
}

macro_rules! signed_field {
	($($t:ty),*$(,)?) => {$(
		impl FieldType for $t {
			fn parse_attribute(field: &'static str, raw: &str) -> Result<Self, MapError> {
				parse_integer(field, raw)
			}

			fn value(&self) -> Value {
				self.to_i64().map_or(Value::Null, Value::Int)
			}
		}
	)*};
}
signed_field!(i8, i16, i32, i64, isize);

macro_rules! unsigned_field {
	($($t:ty),*$(,)?) => {$(
		impl FieldType for $t {
			fn parse_attribute(field: &'static str, raw: &str) -> Result<Self, MapError> {
				parse_integer(field, raw)
			}

			fn value(&self) -> Value {
				self.to_u64().map_or(Value::Null, Value::Uint)
			}
		}
	)*};
}
unsigned_field!(u8, u16, u32, u64, usize);

macro_rules! float_field {
	($($t:ty),*$(,)?) => {$(
		impl FieldType for $t {
			fn parse_attribute(field: &'static str, raw: &str) -> Result<Self, MapError> {
				raw.trim().parse().map_err(|error: core::num::ParseFloatError| MapError::Parse {
					field,
					value: raw.to_owned(),
					reason: error.to_string(),
				})
			}

			fn value(&self) -> Value {
				self.to_f64().map_or(Value::Null, Value::Float)
			}
		}
	)*};
}
float_field!(f32, f64);

impl FieldType for String {
	fn parse_attribute(_: &'static str, raw: &str) -> Result<Self, MapError> {
		Ok(raw.to_owned())
	}

	fn value(&self) -> Value {
		Value::Str(self.clone())
	}
}

impl FieldType for Option<String> {
	fn parse_attribute(_: &'static str, raw: &str) -> Result<Self, MapError> {
		Ok(Some(raw.to_owned()))
	}

	fn value(&self) -> Value {
		self.clone().map_or(Value::Null, Value::Str)
	}
}

/// Wraps any other serde type so that its attribute is decoded as JSON.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Json<T>(pub T);

impl<T> Deref for Json<T> {
	type Target = T;

	fn deref(&self) -> &T {
		&self.0
	}
}

impl<T> DerefMut for Json<T> {
	fn deref_mut(&mut self) -> &mut T {
		&mut self.0
	}
}

impl<T: Serialize + DeserializeOwned + 'static> FieldType for Json<T> {
	fn parse_attribute(field: &'static str, raw: &str) -> Result<Self, MapError> {
		serde_json::from_str(raw).map(Json).map_err(|source| MapError::Json { field, source })
	}

	fn value(&self) -> Value {
		serde_json::to_value(&self.0).map_or(Value::Null, Value::Json)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
	Exported,
	/// Present, but never targeted by attributes, templates or handler paths.
	Unexported,
	/// Navigable by handler paths but skipped by attribute mapping.
	Embedded,
}

type Getter = Box<dyn Fn(&dyn Any) -> Option<Value>>;
type Setter = Box<dyn Fn(&mut dyn Any, Option<&str>) -> Result<(), MapError>>;
type Project = Box<dyn Fn(&mut dyn Any) -> Option<&mut dyn Any>>;
type Lookup = Box<dyn for<'a, 'k> Fn(&'a mut dyn Any, &'k str) -> Option<&'a mut dyn Any>>;
type Decode = Box<dyn Fn(&str) -> Result<Option<Box<dyn Any>>, serde_json::Error>>;
type Invoke = Box<dyn Fn(&mut dyn Any, Option<Box<dyn Any>>) -> bool>;
pub(crate) type SchemaFn = fn(&SchemaCache) -> Rc<Schema>;

// Closures returning borrows need their signature fixed where they're written.
fn project(f: impl Fn(&mut dyn Any) -> Option<&mut dyn Any> + 'static) -> Project {
	Box::new(f)
}

fn lookup(f: impl for<'a, 'k> Fn(&'a mut dyn Any, &'k str) -> Option<&'a mut dyn Any> + 'static) -> Lookup {
	Box::new(f)
}

pub(crate) struct Member {
	pub(crate) name: &'static str,
	pub(crate) visibility: Visibility,
	pub(crate) kind: MemberKind,
}

pub(crate) enum MemberKind {
	Field { get: Getter, set: Setter },
	Nested { project: Project, schema: SchemaFn },
	Method(Method),
}

pub(crate) struct Method {
	pub(crate) arity: usize,
	pub(crate) decode: Decode,
	pub(crate) invoke: Invoke,
}

/// Dereferencing (`Box`, `Option`) or keyed/indexed access (`Vec`, maps).
pub(crate) enum Access {
	Deref { project: Project, schema: SchemaFn },
	Index { lookup: Lookup, schema: SchemaFn },
}

/// The type-erased member table of one [`Reflect`] type.
pub struct Schema {
	type_name: &'static str,
	pub(crate) members: Vec<Member>,
	pub(crate) access: Option<Access>,
}

impl Debug for Schema {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Schema")
			.field("type_name", &self.type_name)
			.field("members", &self.members.iter().map(|m| (m.name, m.visibility)).collect::<Vec<_>>())
			.finish_non_exhaustive()
	}
}

impl Schema {
	#[must_use]
	pub fn build<T: Reflect>() -> Self {
		let mut builder = SchemaBuilder {
			schema: Schema {
				type_name: type_name::<T>(),
				members: Vec::new(),
				access: None,
			},
			_type: PhantomData,
		};
		T::describe(&mut builder);
		builder.schema
	}

	#[must_use]
	pub fn type_name(&self) -> &'static str {
		self.type_name
	}

	/// Names of exported fields that attributes map onto.
	pub fn attribute_fields(&self) -> impl Iterator<Item = &'static str> + '_ {
		self.members
			.iter()
			.filter(|m| m.visibility == Visibility::Exported && matches!(m.kind, MemberKind::Field { .. }))
			.map(|m| m.name)
	}

	/// Reads an exported field for templating.
	#[must_use]
	pub fn value(&self, target: &dyn Any, name: &str) -> Option<Value> {
		self.members.iter().find_map(|m| match &m.kind {
			MemberKind::Field { get, .. } if m.name == name && m.visibility == Visibility::Exported => get(target),
			_ => None,
		})
	}

	/// Methods shadow fields of the same name.
	pub(crate) fn member_index(&self, name: &str) -> Option<usize> {
		self.members
			.iter()
			.position(|m| m.name == name && matches!(m.kind, MemberKind::Method(_)))
			.or_else(|| self.members.iter().position(|m| m.name == name))
	}
}

/// Describes the members of `C`.
pub struct SchemaBuilder<C> {
	schema: Schema,
	_type: PhantomData<fn(C)>,
}

impl<C: Any> SchemaBuilder<C> {
	fn push(&mut self, name: &'static str, visibility: Visibility, kind: MemberKind) -> &mut Self {
		self.schema.members.push(Member { name, visibility, kind });
		self
	}

	fn field_kind<T: FieldType>(name: &'static str, get: fn(&C) -> &T, get_mut: fn(&mut C) -> &mut T) -> MemberKind {
		MemberKind::Field {
			get: Box::new(move |target: &dyn Any| target.downcast_ref::<C>().map(|c| get(c).value())),
			set: Box::new(move |target: &mut dyn Any, raw: Option<&str>| {
				let Some(c) = target.downcast_mut::<C>() else {
					error!(field = name, expected = type_name::<C>(), "Schema applied to a value of another type. Ignoring.");
					return Ok(());
				};
				let field = get_mut(c);
				match raw {
					Some(raw) => *field = T::parse_attribute(name, raw)?,
					None => field.reset(),
				}
				Ok(())
			}),
		}
	}

	/// An exported field, set from the attribute with the lower-cased `name`.
	pub fn field<T: FieldType>(&mut self, name: &'static str, get: fn(&C) -> &T, get_mut: fn(&mut C) -> &mut T) -> &mut Self {
		let kind = Self::field_kind(name, get, get_mut);
		self.push(name, Visibility::Exported, kind)
	}

	pub fn private_field<T: FieldType>(&mut self, name: &'static str, get: fn(&C) -> &T, get_mut: fn(&mut C) -> &mut T) -> &mut Self {
		let kind = Self::field_kind(name, get, get_mut);
		self.push(name, Visibility::Unexported, kind)
	}

	/// A value whose own members handler paths can reach through `name`.
	pub fn nested<T: Reflect>(&mut self, name: &'static str, get_mut: fn(&mut C) -> &mut T) -> &mut Self {
		self.push(name, Visibility::Exported, Self::nested_kind(get_mut))
	}

	/// Like [`nested`](`SchemaBuilder::nested`), but never mapped from attributes.
	pub fn embedded<T: Reflect>(&mut self, name: &'static str, get_mut: fn(&mut C) -> &mut T) -> &mut Self {
		self.push(name, Visibility::Embedded, Self::nested_kind(get_mut))
	}

	fn nested_kind<T: Reflect>(get_mut: fn(&mut C) -> &mut T) -> MemberKind {
		MemberKind::Nested {
			project: project(move |target| target.downcast_mut::<C>().map(|c| get_mut(c) as &mut dyn Any)),
			schema: SchemaCache::of::<T>,
		}
	}

	pub fn handler(&mut self, name: &'static str, f: fn(&mut C)) -> &mut Self {
		self.push(name, Visibility::Exported, MemberKind::Method(Self::method0(f)))
	}

	pub fn private_handler(&mut self, name: &'static str, f: fn(&mut C)) -> &mut Self {
		self.push(name, Visibility::Unexported, MemberKind::Method(Self::method0(f)))
	}

	/// A handler taking one argument, decoded from JSON. Use a tuple for more than one value.
	pub fn handler_with<A: DeserializeOwned + 'static>(&mut self, name: &'static str, f: fn(&mut C, A)) -> &mut Self {
		let method = Method {
			arity: 1,
			decode: Box::new(|json: &str| serde_json::from_str::<A>(json).map(|arg| Some(Box::new(arg) as Box<dyn Any>))),
			invoke: Box::new(move |target: &mut dyn Any, arg: Option<Box<dyn Any>>| match (target.downcast_mut::<C>(), arg.and_then(|arg| arg.downcast::<A>().ok())) {
				(Some(c), Some(arg)) => {
					f(c, *arg);
					true
				}
				_ => false,
			}),
		};
		self.push(name, Visibility::Exported, MemberKind::Method(method))
	}

	fn method0(f: fn(&mut C)) -> Method {
		Method {
			arity: 0,
			decode: Box::new(|_: &str| Ok(None)),
			invoke: Box::new(move |target: &mut dyn Any, _: Option<Box<dyn Any>>| match target.downcast_mut::<C>() {
				Some(c) => {
					f(c);
					true
				}
				None => false,
			}),
		}
	}

	/// Forwards every lookup on `C` to the value `get_mut` projects to, if any.
	pub fn deref<T: Reflect>(&mut self, get_mut: fn(&mut C) -> Option<&mut T>) -> &mut Self {
		self.schema.access = Some(Access::Deref {
			project: project(move |target| target.downcast_mut::<C>().and_then(get_mut).map(|t| t as &mut dyn Any)),
			schema: SchemaCache::of::<T>,
		});
		self
	}

	/// Resolves path segments that name no member as a raw key or index.
	pub fn index<T: Reflect>(&mut self, get_mut: for<'a, 'k> fn(&'a mut C, &'k str) -> Option<&'a mut T>) -> &mut Self {
		self.schema.access = Some(Access::Index {
			lookup: lookup(move |target, key| target.downcast_mut::<C>().and_then(|c| get_mut(c, key)).map(|t| t as &mut dyn Any)),
			schema: SchemaCache::of::<T>,
		});
		self
	}
}

impl<T: Reflect> Reflect for Box<T> {
	fn describe(schema: &mut SchemaBuilder<Self>) {
		schema.deref(|b| Some(&mut **b));
	}
}

impl<T: Reflect> Reflect for Option<T> {
	fn describe(schema: &mut SchemaBuilder<Self>) {
		schema.deref(Option::as_mut);
	}
}

impl<T: Reflect> Reflect for Vec<T> {
	fn describe(schema: &mut SchemaBuilder<Self>) {
		schema.index(|v, key| key.parse::<usize>().ok().and_then(move |i| v.get_mut(i)));
	}
}

impl<T: Reflect> Reflect for std::collections::HashMap<String, T> {
	fn describe(schema: &mut SchemaBuilder<Self>) {
		schema.index(|map, key| map.get_mut(key));
	}
}

impl<T: Reflect> Reflect for HashMap<String, T> {
	fn describe(schema: &mut SchemaBuilder<Self>) {
		schema.index(|map, key| map.get_mut(key));
	}
}

/// Builds each [`Schema`] once.
#[derive(Default)]
pub struct SchemaCache(RefCell<HashMap<TypeId, Rc<Schema>>>);

impl Debug for SchemaCache {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_tuple("SchemaCache").field(&self.0.borrow().len()).finish()
	}
}

impl SchemaCache {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	pub fn of<T: Reflect>(&self) -> Rc<Schema> {
		let cached = self.0.borrow().get(&TypeId::of::<T>()).cloned();
		cached.unwrap_or_else(|| {
			// Built without holding the borrow; `describe` never touches the cache.
			let schema = Rc::new(Schema::build::<T>());
			self.0.borrow_mut().entry(TypeId::of::<T>()).or_insert(schema).clone()
		})
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.0.borrow().len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}
