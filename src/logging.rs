//! Log field helpers.

use crate::{
	error::Error,
	node::{NodeId, Tree},
};
#[cfg(feature = "log-paths")]
use crate::node::NodeKind;
use core::fmt::{self, Display, Formatter};

/// Rendered text and attribute values. Logged verbatim only with the `dangerous-logging` feature.
pub(crate) struct Redacted<'a>(pub(crate) &'a str);

impl Display for Redacted<'_> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		if cfg!(feature = "dangerous-logging") {
			write!(f, "{:?}", self.0)
		} else {
			write!(f, "<{} bytes>", self.0.len())
		}
	}
}

/// The path from a top-level component down to a node, like `app#1 > div#2 > #3`.
#[cfg(feature = "log-paths")]
pub(crate) struct NodePath<'a> {
	pub(crate) tree: &'a Tree,
	pub(crate) id: NodeId,
}

#[cfg(feature = "log-paths")]
impl Display for NodePath<'_> {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		for (i, id) in self.tree.path(self.id).into_iter().enumerate() {
			if i > 0 {
				f.write_str(" > ")?;
			}
			match self.tree.get(id).map(|node| node.kind()) {
				Some(NodeKind::Element(element)) => write!(f, "{}{}", element.name, id)?,
				Some(NodeKind::Component(component)) => write!(f, "{}{}", component.name(), id)?,
				Some(NodeKind::Text(_)) | None => write!(f, "{}", id)?,
			}
		}
		Ok(())
	}
}

/// Logs where a failed diff happened, if paths are enabled.
#[allow(unused_variables)]
pub(crate) fn failed_at(tree: &Tree, id: NodeId, error: &Error) {
	#[cfg(feature = "log-paths")]
	tracing::error!(path = %NodePath { tree, id }, %error, "Diff failed.");
	#[cfg(not(feature = "log-paths"))]
	tracing::error!(%id, %error, "Diff failed.");
}
