//! Marshals work from any thread onto the one thread that owns an [`Engine`].
//!
//! ```
//! use compo_dom::{ui::UiQueue, Config, Engine};
//!
//! let (queue, dispatcher) = UiQueue::new();
//! let worker = std::thread::spawn(move || {
//! 	dispatcher.dispatch(|engine| assert_eq!(engine.node_count(), 0)).unwrap();
//! });
//! worker.join().unwrap();
//!
//! let mut engine = Engine::new(Config::default());
//! assert_eq!(queue.run_until_closed(&mut engine), 1);
//! ```

use crate::{engine::Engine, node::NodeId};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use thiserror::Error;
use tracing::{error, instrument, trace};

/// A unit of work that runs with exclusive access to the engine.
pub type Job = Box<dyn FnOnce(&mut Engine) + Send>;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("the UI queue was dropped")]
pub struct Closed;

/// Posts [`Job`]s to a [`UiQueue`]. Cheap to clone and [`Send`].
#[derive(Debug, Clone)]
pub struct Dispatcher(Sender<Job>);

impl Dispatcher {
	/// # Errors
	///
	/// Iff the queue was dropped.
	pub fn dispatch(&self, job: impl FnOnce(&mut Engine) + Send + 'static) -> Result<(), Closed> {
		self.0.send(Box::new(job)).map_err(|_| Closed)
	}

	/// Posts [`Engine::dispatch_event`]. Failures are logged on the UI thread.
	///
	/// # Errors
	///
	/// Iff the queue was dropped.
	pub fn dispatch_event(&self, id: NodeId, attribute: impl Into<String>, json: impl Into<String>) -> Result<(), Closed> {
		let (attribute, json) = (attribute.into(), json.into());
		self.dispatch(move |engine| {
			if let Err(error) = engine.dispatch_event(id, &attribute, &json) {
				error!(%id, %attribute, %error, "Event dispatch failed.");
			}
		})
	}
}

/// Receives [`Job`]s and runs them one at a time, in posting order.
#[derive(Debug)]
pub struct UiQueue(Receiver<Job>);

impl UiQueue {
	#[must_use]
	pub fn new() -> (Self, Dispatcher) {
		let (sender, receiver) = mpsc::channel();
		(Self(receiver), Dispatcher(sender))
	}

	/// Runs every job that is already queued and returns how many ran.
	#[instrument(skip(self, engine))]
	pub fn drain(&self, engine: &mut Engine) -> usize {
		let mut count = 0;
		loop {
			match self.0.try_recv() {
				Ok(job) => {
					job(engine);
					count += 1;
				}
				Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
			}
		}
		trace!(count, "Drained UI queue.");
		count
	}

	/// Runs jobs as they arrive until every [`Dispatcher`] is dropped.
	#[instrument(skip(self, engine))]
	pub fn run_until_closed(&self, engine: &mut Engine) -> usize {
		let mut count = 0;
		for job in &self.0 {
			job(engine);
			count += 1;
		}
		trace!(count, "UI queue closed.");
		count
	}
}
