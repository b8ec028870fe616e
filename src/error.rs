//! Error types for every layer of the crate.
//!
//! Registration, decode, mapping and handler errors are separate so that callers of the lower layers
//! can match on them directly. [`Error`] wraps all of them for the [`Engine`](`crate::Engine`) surface.

use crate::node::NodeId;
use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Boxed error returned by a [`ChangeSink`](`crate::change::ChangeSink`).
pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum RegistryError {
	/// Zero-sized component types can't be told apart by address.
	#[error("component type {name} is zero-sized; add a placeholder field")]
	ZeroSized { name: String },

	#[error("no component is registered as {name:?}")]
	Unregistered { name: String },
}

#[derive(Debug, Error)]
pub enum TemplateError {
	#[error("unclosed template action starting at byte {at}")]
	Unclosed { at: usize },

	#[error("template references unknown field {name:?}")]
	UnknownField { name: String },

	#[error("template calls unknown function {name:?}")]
	UnknownFunc { name: String },

	#[error("template function {name:?} is reserved and can't be redefined")]
	ReservedFunc { name: String },

	#[error("malformed template action {action:?}")]
	Malformed { action: String },

	#[error("unbalanced {{{{if}}}}/{{{{end}}}} in template")]
	Unbalanced,

	#[error("field {name:?} is not a representable Unix timestamp")]
	TimeOutOfRange { name: String },

	#[error("could not encode field {name:?} as JSON")]
	Json {
		name: String,
		#[source]
		source: serde_json::Error,
	},
}

#[derive(Debug, Error)]
pub enum DecodeError {
	#[error("no markup to decode")]
	Empty,

	#[error("self-closing <{tag}/> is only allowed for void elements or inside <svg>")]
	SelfClosing { tag: String },

	#[error("unexpected </{found}>, expected </{expected}>")]
	UnexpectedClose { expected: String, found: String },

	#[error("unexpected </{found}> without an open element")]
	StrayClose { found: String },

	#[error("<{tag}> is never closed")]
	UnclosedTag { tag: String },

	#[error("markup is nested deeper than {limit} elements")]
	TooDeep { limit: usize },

	#[error("markup contains more than one root node")]
	TrailingContent,

	#[error("malformed markup at byte {at}: {reason}")]
	Malformed { at: usize, reason: &'static str },

	#[error("could not execute render template")]
	Template(#[from] TemplateError),

	#[error("markup references unregistered component {name:?}")]
	UnknownComponent { name: String },
}

#[derive(Debug, Error)]
pub enum MapError {
	#[error("attribute value {value:?} can't be parsed for field {field}: {reason}")]
	Parse { field: &'static str, value: String, reason: String },

	#[error("attribute value for field {field} is not valid JSON for its type")]
	Json {
		field: &'static str,
		#[source]
		source: serde_json::Error,
	},
}

#[derive(Debug, Error)]
pub enum HandlerError {
	#[error("empty handler path")]
	EmptyPath,

	#[error("{segment:?} is neither a field nor a method")]
	NotFound { segment: String },

	#[error("{segment:?} is unexported")]
	Unexported { segment: String },

	#[error("{segment:?} is a field, not a method")]
	NotAMethod { segment: String },

	#[error("{segment:?} can't be traversed further")]
	NotTraversable { segment: String },

	#[error("argument for {path:?} is not valid JSON for its parameter type")]
	BadArgument {
		path: String,
		#[source]
		source: serde_json::Error,
	},

	#[error("handler {path:?} no longer resolves against its target")]
	Stale { path: String },
}

#[derive(Debug, Error)]
pub enum Error {
	#[error(transparent)]
	Registry(#[from] RegistryError),

	#[error(transparent)]
	Decode(#[from] DecodeError),

	#[error("could not map attributes onto component {component}")]
	Map {
		component: String,
		#[source]
		source: MapError,
	},

	#[error(transparent)]
	Handler(#[from] HandlerError),

	#[error("component is not mounted")]
	NotMounted,

	#[error("component is already mounted as {id}")]
	AlreadyMounted { id: NodeId },

	#[error("depth limit of {limit} reached")]
	DepthLimit { limit: usize },

	#[error("no live node {id}")]
	NoSuchNode { id: NodeId },

	#[error("node {id} has no {attribute:?} event attribute")]
	NotAnEventTarget { id: NodeId, attribute: String },

	#[error("change sink failed")]
	Sink(#[source] SinkError),
}

impl From<TemplateError> for Error {
	fn from(error: TemplateError) -> Self {
		Self::Decode(error.into())
	}
}
