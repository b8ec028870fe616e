//! Executes a component's render template against its own fields.
//!
//! Supported actions:
//!
//! - `{{.Field}}`: the escaped field value,
//! - `{{raw .Field}}`, `{{json .Field}}`, `{{time .Field}}` and `{{compo .Field}}` (reserved),
//! - `{{name .Field}}` for functions from the component's own [`FuncMap`],
//! - `{{if .Field}}`, `{{else}}` and `{{end}}`.

use crate::{error::TemplateError, markup::escape, schema::Value};
use chrono::{DateTime, SecondsFormat, Utc};
use hashbrown::HashMap;
use std::fmt::{self, Debug, Formatter, Write as _};

/// Function names that components can't redefine.
pub const RESERVED: [&str; 4] = ["raw", "json", "time", "compo"];

type Func = Box<dyn Fn(&Value) -> String>;

/// Template functions supplied by a component.
#[derive(Default)]
pub struct FuncMap(HashMap<String, Func>);

impl Debug for FuncMap {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_set().entries(self.0.keys()).finish()
	}
}

impl FuncMap {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds `f` as `name`. Output is escaped like field values.
	#[must_use]
	pub fn with(mut self, name: impl Into<String>, f: impl Fn(&Value) -> String + 'static) -> Self {
		self.0.insert(name.into(), Box::new(f));
		self
	}

	/// # Errors
	///
	/// Iff a reserved name is redefined.
	pub fn check(&self) -> Result<(), TemplateError> {
		match RESERVED.iter().find(|name| self.0.contains_key(**name)) {
			Some(name) => Err(TemplateError::ReservedFunc { name: (*name).to_owned() }),
			None => Ok(()),
		}
	}
}

struct Branch {
	active: bool,
	/// Whether the `if` side was taken.
	taken: bool,
	in_else: bool,
}

/// Expands `source`. `field` looks up exported field values by name.
///
/// # Errors
///
/// Iff the template is malformed, refers to an unknown field or function,
/// or `funcs` redefines a reserved function.
pub fn execute(source: &str, field: &dyn Fn(&str) -> Option<Value>, funcs: &FuncMap) -> Result<String, TemplateError> {
	funcs.check()?;

	let mut output = String::with_capacity(source.len());
	let mut conditions: Vec<Branch> = Vec::new();
	let enabled = |conditions: &[Branch]| conditions.iter().all(|branch| branch.active);

	let mut rest = source;
	let mut offset = 0;
	while let Some(start) = rest.find("{{") {
		if enabled(&conditions) {
			output.push_str(&rest[..start]);
		}
		let end = rest[start..].find("}}").ok_or(TemplateError::Unclosed { at: offset + start })?;
		let action = rest[start + 2..start + end].trim();
		offset += start + end + 2;
		rest = &rest[start + end + 2..];

		let mut words = action.split_whitespace();
		match (words.next(), words.next(), words.next()) {
			(Some("if"), Some(operand), None) => {
				let active = enabled(&conditions) && lookup(field, operand)?.is_truthy();
				conditions.push(Branch {
					active,
					taken: active,
					in_else: false,
				});
			}
			(Some("else"), None, None) => {
				let parent_enabled = enabled(&conditions[..conditions.len().saturating_sub(1)]);
				match conditions.last_mut() {
					Some(branch) if !branch.in_else => {
						branch.in_else = true;
						branch.active = parent_enabled && !branch.taken;
					}
					_ => return Err(TemplateError::Unbalanced),
				}
			}
			(Some("end"), None, None) => {
				conditions.pop().ok_or(TemplateError::Unbalanced)?;
			}
			_ if !enabled(&conditions) => (),
			(Some(operand), None, None) if operand.starts_with('.') => {
				output.push_str(&escape(&lookup(field, operand)?.to_string()));
			}
			(Some(func), Some(operand), None) => {
				let value = lookup(field, operand)?;
				apply(&mut output, func, operand, &value, funcs)?;
			}
			_ => return Err(TemplateError::Malformed { action: action.to_owned() }),
		}
	}

	if !conditions.is_empty() {
		return Err(TemplateError::Unbalanced);
	}
	output.push_str(rest);
	Ok(output)
}

fn lookup(field: &dyn Fn(&str) -> Option<Value>, operand: &str) -> Result<Value, TemplateError> {
	let name = operand.strip_prefix('.').ok_or_else(|| TemplateError::Malformed { action: operand.to_owned() })?;
	field(name).ok_or_else(|| TemplateError::UnknownField { name: name.to_owned() })
}

fn apply(output: &mut String, func: &str, operand: &str, value: &Value, funcs: &FuncMap) -> Result<(), TemplateError> {
	match func {
		"raw" => {
			// Writing into a `String` can't fail.
			let _ = write!(output, "{}", value);
		}
		"json" => {
			let json = serde_json::to_string(&value.to_json()).map_err(|source| TemplateError::Json {
				name: operand.trim_start_matches('.').to_owned(),
				source,
			})?;
			output.push_str(&escape(&json));
		}
		"time" => output.push_str(&rfc3339(operand, value)?),
		"compo" => {
			let name = value.to_string();
			let _ = write!(output, "<{0}></{0}>", escape(&name));
		}
		name => match funcs.0.get(name) {
			Some(f) => output.push_str(&escape(&f(value))),
			None => return Err(TemplateError::UnknownFunc { name: name.to_owned() }),
		},
	}
	Ok(())
}

/// Formats Unix seconds as an RFC 3339 UTC timestamp. Non-numeric values format as-is.
fn rfc3339(operand: &str, value: &Value) -> Result<String, TemplateError> {
	let seconds = match *value {
		Value::Int(i) => Some(i),
		Value::Uint(u) => i64::try_from(u).ok(),
		#[allow(clippy::cast_possible_truncation)]
		Value::Float(f) => f.is_finite().then(|| f.floor() as i64),
		_ => return Ok(escape(&value.to_string()).into_owned()),
	};
	seconds
		.and_then(|seconds| DateTime::<Utc>::from_timestamp(seconds, 0))
		.map(|time| time.to_rfc3339_opts(SecondsFormat::Secs, true))
		.ok_or_else(|| TemplateError::TimeOutOfRange {
			name: operand.trim_start_matches('.').to_owned(),
		})
}
