//! Change records and the ordered log they are collected in.

use crate::{error::SinkError, node::NodeId};
use core::cell::RefCell;
use serde::{Deserialize, Serialize};
use std::rc::Rc;

/// One mutation of the remote tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Change {
	CreateElement { id: NodeId, tag: String, svg: bool },
	CreateText { id: NodeId },
	CreateComponent { id: NodeId, name: String },
	SetAttribute { id: NodeId, name: String, value: String },
	DeleteAttribute { id: NodeId, name: String },
	SetText { id: NodeId, text: String },
	AppendChild { parent: NodeId, child: NodeId },
	RemoveChild { parent: NodeId, child: NodeId },
	ReplaceChild { parent: NodeId, old: NodeId, new: NodeId },
	/// A nested component's subtree is complete and linked.
	Mount { id: NodeId },
	DeleteNode { id: NodeId },
	/// Announces a top-level component.
	SetRoot { id: NodeId },
}

impl Change {
	/// The node this change is about. For structural changes, that's the parent.
	#[must_use]
	pub fn target(&self) -> NodeId {
		match *self {
			Change::CreateElement { id, .. }
			| Change::CreateText { id }
			| Change::CreateComponent { id, .. }
			| Change::SetAttribute { id, .. }
			| Change::DeleteAttribute { id, .. }
			| Change::SetText { id, .. }
			| Change::Mount { id }
			| Change::DeleteNode { id }
			| Change::SetRoot { id } => id,
			Change::AppendChild { parent, .. } | Change::RemoveChild { parent, .. } | Change::ReplaceChild { parent, .. } => parent,
		}
	}

	fn phase(&self) -> usize {
		match self {
			Change::CreateElement { .. } | Change::CreateText { .. } | Change::CreateComponent { .. } => 0,
			Change::SetAttribute { .. } | Change::DeleteAttribute { .. } | Change::SetText { .. } => 1,
			Change::AppendChild { .. } | Change::RemoveChild { .. } | Change::ReplaceChild { .. } | Change::Mount { .. } | Change::SetRoot { .. } => 2,
			Change::DeleteNode { .. } => 3,
		}
	}
}

/// Accumulates changes so that they can be replayed in order against a mirrored tree:
/// creations, then attribute and text updates, then linking, then deletions.
#[derive(Debug, Default)]
pub struct ChangeLog {
	phases: [Vec<Change>; 4],
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Checkpoint([usize; 4]);

impl ChangeLog {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	pub fn push(&mut self, change: Change) {
		self.phases[change.phase()].push(change);
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.phases.iter().map(Vec::len).sum()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.phases.iter().all(Vec::is_empty)
	}

	pub(crate) fn checkpoint(&self) -> Checkpoint {
		Checkpoint([self.phases[0].len(), self.phases[1].len(), self.phases[2].len(), self.phases[3].len()])
	}

	/// Drops everything pushed since `checkpoint`.
	pub(crate) fn rollback(&mut self, checkpoint: Checkpoint) {
		for (phase, len) in self.phases.iter_mut().zip(checkpoint.0) {
			phase.truncate(len);
		}
	}

	/// Empties the log, returning its changes in replay order.
	pub fn take(&mut self) -> Vec<Change> {
		let mut changes = Vec::with_capacity(self.len());
		for phase in &mut self.phases {
			changes.append(phase);
		}
		changes
	}
}

/// Consumes the change log of each top-level engine call.
pub trait ChangeSink {
	/// # Errors
	///
	/// Iff the changes couldn't be applied. The engine reports this to its caller.
	fn flush(&mut self, changes: &[Change]) -> Result<(), SinkError>;
}

impl<F> ChangeSink for F
where
	F: FnMut(&[Change]) -> Result<(), SinkError>,
{
	fn flush(&mut self, changes: &[Change]) -> Result<(), SinkError> {
		self(changes)
	}
}

/// Discards all changes (headless mode).
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ChangeSink for NullSink {
	fn flush(&mut self, _: &[Change]) -> Result<(), SinkError> {
		Ok(())
	}
}

/// Keeps every flushed batch. Clones share their batches.
#[derive(Debug, Clone, Default)]
pub struct Recorder(Rc<RefCell<Vec<Vec<Change>>>>);

impl Recorder {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn batches(&self) -> Vec<Vec<Change>> {
		self.0.borrow().clone()
	}

	/// Removes and returns all batches recorded so far.
	pub fn take(&self) -> Vec<Vec<Change>> {
		self.0.take()
	}
}

impl ChangeSink for Recorder {
	fn flush(&mut self, changes: &[Change]) -> Result<(), SinkError> {
		self.0.borrow_mut().push(changes.to_vec());
		Ok(())
	}
}
