use serde::{Deserialize, Serialize};

/// Default for [`Config::depth_limit`] and [`Decoder`](crate::markup::Decoder).
pub const DEFAULT_DEPTH_LIMIT: usize = 256;

/// Engine settings. Missing fields deserialize to their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
	/// Components in this package are addressed without a package prefix in markup.
	pub entry_package: String,
	/// Maximum nesting of decoded, mounted or diffed nodes.
	pub depth_limit: usize,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			entry_package: "main".to_owned(),
			depth_limit: DEFAULT_DEPTH_LIMIT,
		}
	}
}

impl Config {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn with_entry_package(mut self, entry_package: impl Into<String>) -> Self {
		self.entry_package = entry_package.into();
		self
	}

	#[must_use]
	pub fn with_depth_limit(mut self, depth_limit: usize) -> Self {
		self.depth_limit = depth_limit;
		self
	}
}
