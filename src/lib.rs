#![doc(html_root_url = "https://docs.rs/compo-dom/0.0.3")]
#![warn(clippy::pedantic)]
//! Components render markup. The [`Engine`] decodes each render, diffs it against the mounted [`node::Tree`]
//! and hands the resulting ordered [`Change`] log to a [`ChangeSink`].

#[cfg(doctest)]
pub mod readme {
	doc_comment::doctest!("../README.md");
}

pub mod change;
pub mod component;
pub mod config;
pub mod engine;
pub mod error;
mod logging;
pub mod mapper;
pub mod markup;
pub mod mirror;
pub mod node;
pub mod registry;
pub mod schema;
pub mod template;
pub mod ui;
#[cfg(feature = "web")]
pub mod web;

pub use change::{Change, ChangeSink};
pub use component::{Component, Instance, Subscriber};
pub use config::Config;
pub use engine::Engine;
pub use error::{Error, Result};
pub use node::NodeId;
pub use schema::{Json, Reflect, SchemaBuilder};
