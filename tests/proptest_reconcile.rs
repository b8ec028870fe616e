#![cfg(not(target_arch = "wasm32"))]
//! Property tests for decoding and reconciliation.
//!
//! 1. Decoding and template execution never panic.
//! 2. A second render of unchanged state produces no changes.
//! 3. After any update, a mirror fed only the change log matches the engine's tree,
//!    and both match a fresh mount of the new markup.

use compo_dom::{
	change::Recorder,
	markup::decode,
	mirror::Mirror,
	schema::Value,
	template::{execute, FuncMap},
	Component, Config, Engine, NodeId, Reflect, SchemaBuilder,
};
use proptest::prelude::*;
use std::{cell::RefCell, rc::Rc};

/// Renders whatever markup it holds.
#[derive(Default)]
struct Dynamic {
	markup: String,
}

impl Reflect for Dynamic {
	fn describe(_: &mut SchemaBuilder<Self>) {}
}

impl Component for Dynamic {
	fn render(&self) -> String {
		self.markup.clone()
	}
}

fn body() -> impl Strategy<Value = String> {
	let leaf = prop_oneof!["[a-z]{1,6}", Just("<br>".to_owned()), Just("&amp;".to_owned())];
	leaf.prop_recursive(3, 32, 4, |inner| {
		(
			prop::sample::select(vec!["div", "p", "span", "b", "ul"]),
			prop::option::of(prop::sample::select(vec!["a", "b", "c"])),
			prop::option::of(prop::sample::select(vec!["x", "y"])),
			prop::collection::vec(inner, 0..4),
		)
			.prop_map(|(name, class, title, children)| {
				let class = class.map(|class| format!(r#" class="{}""#, class)).unwrap_or_default();
				let title = title.map(|title| format!(r#" title="{}""#, title)).unwrap_or_default();
				format!("<{0}{1}{2}>{3}</{0}>", name, class, title, children.concat())
			})
	})
}

/// Always a single element root.
fn markup() -> impl Strategy<Value = String> {
	(prop::sample::select(vec!["div", "section"]), body()).prop_map(|(root, body)| format!("<{0}>{1}</{0}>", root, body))
}

fn mount(markup: String) -> (Engine, Rc<RefCell<Dynamic>>) {
	let mut engine = Engine::new(Config::default());
	let dynamic = Rc::new(RefCell::new(Dynamic { markup }));
	engine.render(&dynamic).unwrap();
	(engine, dynamic)
}

proptest! {
	#[test]
	fn decoding_never_panics(raw in ".{0,64}") {
		let _ = decode(&raw);
	}

	#[test]
	fn decoding_markup_like_input_never_panics(raw in r#"[<>/!a-z ="'&;-]{0,64}"#) {
		let _ = decode(&raw);
	}

	#[test]
	fn templates_never_panic(source in r#"[{}. a-zA-Z]{0,48}"#) {
		let fields = |name: &str| (name == "A").then(|| Value::Str("a".to_owned()));
		let _ = execute(&source, &fields, &FuncMap::new());
	}

	#[test]
	fn rerendering_unchanged_state_is_empty(markup in markup()) {
		let recorder = Recorder::new();
		let mut engine = Engine::with_sink(Config::default(), recorder.clone());
		let dynamic = Rc::new(RefCell::new(Dynamic { markup }));
		engine.render(&dynamic).unwrap();
		let nodes = engine.node_count();

		prop_assert!(engine.render(&dynamic).unwrap().is_empty());
		prop_assert_eq!(engine.node_count(), nodes);
		prop_assert_eq!(recorder.batches().len(), 2);
	}

	#[test]
	fn updates_keep_mirror_in_sync(before in markup(), after in markup()) {
		let mirror = Mirror::new();
		let mut engine = Engine::with_sink(Config::default(), mirror.clone());
		let dynamic = Rc::new(RefCell::new(Dynamic { markup: before }));
		engine.render(&dynamic).unwrap();
		let root = engine.component_id(&dynamic).unwrap();

		dynamic.borrow_mut().markup = after.clone();
		engine.render(&dynamic).unwrap();

		prop_assert_eq!(engine.tree().check(), Ok(()));
		prop_assert_eq!(mirror.to_html(root), engine.tree().to_html(root));
		prop_assert_eq!(mirror.node_count(), engine.node_count());

		let (fresh, _) = mount(after);
		prop_assert_eq!(fresh.tree().to_html(NodeId::from(1)), engine.tree().to_html(root));
		prop_assert_eq!(fresh.node_count(), engine.node_count());

		prop_assert!(engine.render(&dynamic).unwrap().is_empty());
	}

	#[test]
	fn dismount_clears_everything(markup in markup()) {
		let mirror = Mirror::new();
		let mut engine = Engine::with_sink(Config::default(), mirror.clone());
		let dynamic = Rc::new(RefCell::new(Dynamic { markup }));
		engine.render(&dynamic).unwrap();
		engine.dismount(&dynamic).unwrap();

		prop_assert_eq!(engine.node_count(), 0);
		prop_assert_eq!(mirror.node_count(), 0);
		prop_assert!(mirror.roots().is_empty());
	}
}
