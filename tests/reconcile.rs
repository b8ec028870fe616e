#![cfg(not(target_arch = "wasm32"))]

use compo_dom::{
	change::Recorder,
	error::{DecodeError, MapError, TemplateError},
	mirror::Mirror,
	template::FuncMap,
	Change, Component, Config, Engine, Error, NodeId, Reflect, SchemaBuilder,
};
use pretty_assertions::assert_eq;
use std::{
	cell::{Cell, RefCell},
	rc::Rc,
};
use tracing_test::traced_test;

fn config() -> Config {
	Config::default().with_entry_package(env!("CARGO_CRATE_NAME"))
}

fn id(id: u64) -> NodeId {
	NodeId::from(id)
}

fn shared<C>(component: C) -> Rc<RefCell<C>> {
	Rc::new(RefCell::new(component))
}

#[derive(Default)]
struct Hello {
	value: String,
}

impl Reflect for Hello {
	fn describe(schema: &mut SchemaBuilder<Self>) {
		schema.field("Value", |hello| &hello.value, |hello| &mut hello.value);
	}
}

impl Component for Hello {
	fn render(&self) -> String {
		r#"<div class="test">{{.Value}}</div>"#.to_owned()
	}
}

#[test]
fn mount_then_clear_text() {
	let recorder = Recorder::new();
	let mut engine = Engine::with_sink(config(), recorder.clone());
	let hello = shared(Hello { value: "hello".to_owned() });

	let changes = engine.render(&hello).unwrap();
	assert_eq!(
		changes,
		vec![
			Change::CreateElement {
				id: id(2),
				tag: "div".to_owned(),
				svg: false,
			},
			Change::CreateText { id: id(3) },
			Change::SetAttribute {
				id: id(2),
				name: "class".to_owned(),
				value: "test".to_owned(),
			},
			Change::SetText {
				id: id(3),
				text: "hello".to_owned(),
			},
			Change::AppendChild { parent: id(2), child: id(3) },
			Change::AppendChild { parent: id(1), child: id(2) },
			Change::SetRoot { id: id(1) },
		]
	);
	assert_eq!(engine.node_count(), 3);

	hello.borrow_mut().value.clear();
	let changes = engine.render(&hello).unwrap();
	assert_eq!(changes, vec![Change::RemoveChild { parent: id(2), child: id(3) }, Change::DeleteNode { id: id(3) }]);
	assert_eq!(engine.node_count(), 2);

	assert_eq!(recorder.batches().len(), 2);
	engine.tree().check().unwrap();
}

#[test]
fn render_is_idempotent() {
	let recorder = Recorder::new();
	let mut engine = Engine::with_sink(config(), recorder.clone());
	let hello = shared(Hello { value: "hello".to_owned() });

	engine.render(&hello).unwrap();
	assert_eq!(engine.render(&hello).unwrap(), vec![]);
	assert_eq!(engine.render(&hello).unwrap(), vec![]);

	// The sink still sees one (empty) flush per call.
	let batches = recorder.take();
	assert_eq!(batches.len(), 3);
	assert!(batches[1].is_empty() && batches[2].is_empty());
}

#[test]
fn mirror_follows_updates() {
	let mirror = Mirror::new();
	let mut engine = Engine::with_sink(config(), mirror.clone());
	let hello = shared(Hello { value: "a & b".to_owned() });

	engine.render(&hello).unwrap();
	let root = engine.component_id(&hello).unwrap();
	assert_eq!(mirror.roots(), vec![root]);
	assert_eq!(mirror.to_html(root), r#"<div class="test">a &amp; b</div>"#);

	for value in ["", "x", "y", ""] {
		hello.borrow_mut().value = value.to_owned();
		engine.render(&hello).unwrap();
		assert_eq!(mirror.to_html(root), engine.tree().to_html(root));
		assert_eq!(mirror.node_count(), engine.node_count());
	}

	engine.dismount(&hello).unwrap();
	assert_eq!(mirror.node_count(), 0);
	assert_eq!(mirror.roots(), vec![]);
	assert_eq!(engine.node_count(), 0);
}

#[derive(Default)]
struct Attrs {
	flip: bool,
}

impl Reflect for Attrs {
	fn describe(schema: &mut SchemaBuilder<Self>) {
		schema.field("Flip", |attrs| &attrs.flip, |attrs| &mut attrs.flip);
	}
}

impl Component for Attrs {
	fn render(&self) -> String {
		r#"{{if .Flip}}<div a="1" c="3"></div>{{else}}<div a="1" b="2"></div>{{end}}"#.to_owned()
	}
}

#[test]
fn attribute_diff_is_symmetric() {
	let mut engine = Engine::new(config());
	let attrs = shared(Attrs::default());
	engine.render(&attrs).unwrap();

	attrs.borrow_mut().flip = true;
	assert_eq!(
		engine.render(&attrs).unwrap(),
		vec![
			Change::DeleteAttribute {
				id: id(2),
				name: "b".to_owned(),
			},
			Change::SetAttribute {
				id: id(2),
				name: "c".to_owned(),
				value: "3".to_owned(),
			},
		]
	);

	attrs.borrow_mut().flip = false;
	assert_eq!(
		engine.render(&attrs).unwrap(),
		vec![
			Change::DeleteAttribute {
				id: id(2),
				name: "c".to_owned(),
			},
			Change::SetAttribute {
				id: id(2),
				name: "b".to_owned(),
				value: "2".to_owned(),
			},
		]
	);
}

#[derive(Default)]
struct Heading {
	big: bool,
}

impl Reflect for Heading {
	fn describe(schema: &mut SchemaBuilder<Self>) {
		schema.field("Big", |heading| &heading.big, |heading| &mut heading.big);
	}
}

impl Component for Heading {
	fn render(&self) -> String {
		"{{if .Big}}<h1>world</h1>{{else}}<h2>world</h2>{{end}}".to_owned()
	}
}

#[test]
fn tag_change_replaces_subtree() {
	let mirror = Mirror::new();
	let mut engine = Engine::with_sink(config(), mirror.clone());
	let heading = shared(Heading { big: true });
	engine.render(&heading).unwrap();

	heading.borrow_mut().big = false;
	assert_eq!(
		engine.render(&heading).unwrap(),
		vec![
			Change::CreateElement {
				id: id(4),
				tag: "h2".to_owned(),
				svg: false,
			},
			Change::CreateText { id: id(5) },
			Change::SetText {
				id: id(5),
				text: "world".to_owned(),
			},
			Change::AppendChild { parent: id(4), child: id(5) },
			Change::ReplaceChild {
				parent: id(1),
				old: id(2),
				new: id(4),
			},
			Change::DeleteNode { id: id(3) },
			Change::DeleteNode { id: id(2) },
		]
	);
	assert_eq!(engine.node_count(), 3);
	assert!(engine.node(id(2)).is_none());
	assert_eq!(mirror.to_html(id(1)), "<h2>world</h2>");
}

#[derive(Default)]
struct Swap {
	swapped: bool,
}

impl Reflect for Swap {
	fn describe(schema: &mut SchemaBuilder<Self>) {
		schema.field("Swapped", |swap| &swap.swapped, |swap| &mut swap.swapped);
	}
}

impl Component for Swap {
	fn render(&self) -> String {
		"<ul>{{if .Swapped}}<b>x</b><li>a</li>{{else}}<li>a</li><b>x</b>{{end}}</ul>".to_owned()
	}
}

#[test]
fn reordering_children_replaces_by_position() {
	let mirror = Mirror::new();
	let mut engine = Engine::with_sink(config(), mirror.clone());
	let swap = shared(Swap::default());
	engine.render(&swap).unwrap();

	swap.borrow_mut().swapped = true;
	let changes = engine.render(&swap).unwrap();
	let replaced = changes.iter().filter(|change| matches!(change, Change::ReplaceChild { .. })).count();
	assert_eq!(replaced, 2);
	assert_eq!(mirror.to_html(id(1)), "<ul><b>x</b><li>a</li></ul>");
	engine.tree().check().unwrap();
}

thread_local! {
	static RENDERS: Cell<usize> = Cell::new(0);
}

#[derive(Default)]
struct Counted {
	label: String,
}

impl Reflect for Counted {
	fn describe(schema: &mut SchemaBuilder<Self>) {
		schema.field("Label", |counted| &counted.label, |counted| &mut counted.label);
	}
}

impl Component for Counted {
	fn render(&self) -> String {
		RENDERS.with(|renders| renders.set(renders.get() + 1));
		"<span>{{.Label}}</span>".to_owned()
	}
}

#[derive(Default)]
struct Page {
	label: String,
	other: String,
}

impl Reflect for Page {
	fn describe(schema: &mut SchemaBuilder<Self>) {
		schema
			.field("Label", |page| &page.label, |page| &mut page.label)
			.field("Other", |page| &page.other, |page| &mut page.other);
	}
}

impl Component for Page {
	fn render(&self) -> String {
		r#"<div><counted label="{{.Label}}"></counted><p>{{.Other}}</p></div>"#.to_owned()
	}
}

#[test]
fn unchanged_component_attributes_skip_render() {
	RENDERS.with(|renders| renders.set(0));
	let mirror = Mirror::new();
	let mut engine = Engine::with_sink(config(), mirror.clone());
	assert_eq!(engine.register::<Counted>().unwrap(), "counted");

	let page = shared(Page {
		label: "a".to_owned(),
		other: "x".to_owned(),
	});
	let changes = engine.render(&page).unwrap();
	assert_eq!(RENDERS.with(Cell::get), 1);
	assert!(changes.contains(&Change::CreateComponent {
		id: id(3),
		name: "counted".to_owned(),
	}));
	assert!(changes.contains(&Change::Mount { id: id(3) }));
	assert!(mirror.is_mounted(id(3)));
	assert_eq!(mirror.component_name(id(3)).as_deref(), Some("counted"));

	page.borrow_mut().other = "y".to_owned();
	let changes = engine.render(&page).unwrap();
	assert_eq!(RENDERS.with(Cell::get), 1);
	assert_eq!(changes.len(), 1);
	assert!(matches!(&changes[0], Change::SetText { text, .. } if text == "y"));

	page.borrow_mut().label = "b".to_owned();
	engine.render(&page).unwrap();
	assert_eq!(RENDERS.with(Cell::get), 2);
	assert_eq!(mirror.to_html(id(1)), "<div><span>b</span><p>y</p></div>");
}

#[derive(Default)]
struct Broken {
	unknown: bool,
}

impl Reflect for Broken {
	fn describe(schema: &mut SchemaBuilder<Self>) {
		schema.field("Unknown", |broken| &broken.unknown, |broken| &mut broken.unknown);
	}
}

impl Component for Broken {
	fn render(&self) -> String {
		"<div>{{if .Unknown}}<unknown></unknown>{{end}}</div>".to_owned()
	}
}

#[test]
fn unknown_component_fails_mount_without_nodes() {
	let recorder = Recorder::new();
	let mut engine = Engine::with_sink(config(), recorder.clone());
	let broken = shared(Broken { unknown: true });

	let error = engine.render(&broken).unwrap_err();
	assert!(matches!(error, Error::Decode(DecodeError::UnknownComponent { ref name }) if name == "unknown"));
	assert_eq!(engine.node_count(), 0);
	assert!(!engine.is_mounted(&broken));
	assert!(recorder.batches().is_empty());

	// A later successful mount starts from scratch.
	broken.borrow_mut().unknown = false;
	engine.render(&broken).unwrap();
	assert_eq!(engine.node_count(), 2);
}

#[test]
fn unknown_component_fails_update_and_keeps_tree() {
	let mut engine = Engine::new(config());
	let broken = shared(Broken::default());
	engine.render(&broken).unwrap();

	broken.borrow_mut().unknown = true;
	assert!(matches!(engine.render(&broken), Err(Error::Decode(DecodeError::UnknownComponent { .. }))));
	assert_eq!(engine.node_count(), 2);
	assert!(engine.is_mounted(&broken));
}

#[derive(Default)]
struct Number {
	value: i32,
}

impl Reflect for Number {
	fn describe(schema: &mut SchemaBuilder<Self>) {
		schema.field("Value", |number| &number.value, |number| &mut number.value);
	}
}

impl Component for Number {
	fn render(&self) -> String {
		"<i>{{.Value}}</i>".to_owned()
	}
}

#[derive(Default)]
struct Partial {
	text: String,
	broken: bool,
}

impl Reflect for Partial {
	fn describe(schema: &mut SchemaBuilder<Self>) {
		schema
			.field("Text", |partial| &partial.text, |partial| &mut partial.text)
			.field("Broken", |partial| &partial.broken, |partial| &mut partial.broken);
	}
}

impl Component for Partial {
	fn render(&self) -> String {
		r#"<div><p>{{.Text}}</p>{{if .Broken}}<number value="many"></number>{{else}}<span></span>{{end}}</div>"#.to_owned()
	}
}

#[test]
fn failed_update_keeps_earlier_changes() {
	let mirror = Mirror::new();
	let mut engine = Engine::with_sink(config(), mirror.clone());
	engine.register::<Number>().unwrap();
	let partial = shared(Partial {
		text: "old".to_owned(),
		broken: false,
	});
	engine.render(&partial).unwrap();
	let nodes = engine.node_count();

	{
		let mut partial = partial.borrow_mut();
		partial.text = "new".to_owned();
		partial.broken = true;
	}
	let error = engine.render(&partial).unwrap_err();
	assert!(matches!(error, Error::Map { ref component, source: MapError::Parse { field: "Value", .. } } if component == "number"));

	// The text update went through, the failed replacement left nothing behind.
	assert_eq!(engine.tree().to_html(id(1)), "<div><p>new</p><span></span></div>");
	assert_eq!(mirror.to_html(id(1)), "<div><p>new</p><span></span></div>");
	assert_eq!(engine.node_count(), nodes);
	engine.tree().check().unwrap();
}

#[derive(Default)]
struct Toggle {
	disabled: bool,
}

impl Reflect for Toggle {
	fn describe(schema: &mut SchemaBuilder<Self>) {
		schema.field("Disabled", |toggle| &toggle.disabled, |toggle| &mut toggle.disabled);
	}
}

impl Component for Toggle {
	fn render(&self) -> String {
		"<input>".to_owned()
	}
}

#[derive(Default)]
struct Panel {
	off: bool,
}

impl Reflect for Panel {
	fn describe(schema: &mut SchemaBuilder<Self>) {
		schema.field("Off", |panel| &panel.off, |panel| &mut panel.off);
	}
}

impl Component for Panel {
	fn render(&self) -> String {
		"{{if .Off}}<toggle disabled></toggle>{{else}}<toggle></toggle>{{end}}".to_owned()
	}
}

fn disabled(engine: &Engine, id: NodeId) -> bool {
	let instance = engine.component(id).unwrap();
	let component = instance.borrow();
	(*component).as_any().downcast_ref::<Toggle>().unwrap().disabled
}

#[test]
fn absent_boolean_attribute_resets_field() {
	let mut engine = Engine::new(config());
	engine.register::<Toggle>().unwrap();
	let panel = shared(Panel { off: true });
	engine.render(&panel).unwrap();

	let root = engine.component_id(&panel).unwrap();
	let toggle = engine.tree().components_under(root)[1];
	assert!(disabled(&engine, toggle));

	panel.borrow_mut().off = false;
	engine.render(&panel).unwrap();
	assert_eq!(engine.tree().components_under(root)[1], toggle);
	assert!(!disabled(&engine, toggle));
}

#[derive(Default)]
struct Counter {
	count: i32,
}

impl Reflect for Counter {
	fn describe(schema: &mut SchemaBuilder<Self>) {
		schema
			.field("Count", |counter| &counter.count, |counter| &mut counter.count)
			.handler("Increment", |counter| counter.count += 1)
			.handler_with("Add", |counter, n: i32| counter.count += n);
	}
}

impl Component for Counter {
	fn render(&self) -> String {
		r#"<button onclick="Increment">{{.Count}}</button>"#.to_owned()
	}
}

#[test]
fn events_call_handlers_and_rerender() {
	let mut engine = Engine::new(config());
	let counter = shared(Counter::default());
	engine.render(&counter).unwrap();
	let root = engine.component_id(&counter).unwrap();
	let button = engine.node(root).and_then(|node| node.as_component()).and_then(|component| component.root()).unwrap();

	let changes = engine.dispatch_event(button, "onclick", "null").unwrap();
	assert_eq!(counter.borrow().count, 1);
	assert_eq!(changes, vec![Change::SetText { id: id(3), text: "1".to_owned() }]);

	engine.dispatch(root, "Add", "5").unwrap();
	assert_eq!(counter.borrow().count, 6);
	assert_eq!(engine.tree().to_html(root), r#"<button onclick="Increment">6</button>"#);

	assert!(matches!(engine.dispatch(root, "Add", r#""five""#), Err(Error::Handler(_))));
	assert!(matches!(engine.dispatch(root, "Count", ""), Err(Error::Handler(_))));
	assert!(matches!(
		engine.dispatch_event(button, "onmouseover", "null"),
		Err(Error::NotAnEventTarget { ref attribute, .. }) if attribute == "onmouseover"
	));
	assert!(matches!(engine.dispatch_event(id(99), "onclick", "null"), Err(Error::NoSuchNode { .. })));
	assert_eq!(counter.borrow().count, 6);
}

#[derive(Default)]
struct Sneaky {
	value: String,
}

impl Reflect for Sneaky {
	fn describe(schema: &mut SchemaBuilder<Self>) {
		schema.field("Value", |sneaky| &sneaky.value, |sneaky| &mut sneaky.value);
	}
}

impl Component for Sneaky {
	fn render(&self) -> String {
		"<p>{{raw .Value}}</p>".to_owned()
	}

	fn funcs(&self) -> FuncMap {
		FuncMap::new().with("raw", |value| value.to_string())
	}
}

#[test]
fn reserved_template_functions_are_decode_errors() {
	let mut engine = Engine::new(config());
	let sneaky = shared(Sneaky::default());
	assert!(matches!(
		engine.render(&sneaky),
		Err(Error::Decode(DecodeError::Template(TemplateError::ReservedFunc { ref name }))) if name == "raw"
	));
	assert_eq!(engine.node_count(), 0);
}

#[derive(Default)]
struct Deep {
	_placeholder: u8,
}

impl Reflect for Deep {
	fn describe(_: &mut SchemaBuilder<Self>) {}
}

impl Component for Deep {
	fn render(&self) -> String {
		"<div><div><div><div></div></div></div></div>".to_owned()
	}
}

#[test]
fn depth_limit_is_an_error() {
	let mut engine = Engine::new(config().with_depth_limit(3));
	let deep = shared(Deep::default());
	assert!(matches!(engine.render(&deep), Err(Error::DepthLimit { limit: 3 })));
	assert_eq!(engine.node_count(), 0);

	let mut engine = Engine::new(config().with_depth_limit(4));
	engine.render(&deep).unwrap();
	assert_eq!(engine.node_count(), 5);
}

#[derive(Default)]
struct Nested {
	levels: usize,
}

impl Reflect for Nested {
	fn describe(_: &mut SchemaBuilder<Self>) {}
}

impl Component for Nested {
	fn render(&self) -> String {
		format!("{}{}", "<div>".repeat(self.levels), "</div>".repeat(self.levels))
	}
}

#[test]
fn deeply_nested_markup_is_an_error() {
	let mut engine = Engine::new(config().with_depth_limit(256));
	let nested = shared(Nested { levels: 50_000 });
	assert!(matches!(engine.render(&nested), Err(Error::DepthLimit { limit: 256 })));
	assert_eq!(engine.node_count(), 0);

	nested.borrow_mut().levels = 256;
	engine.render(&nested).unwrap();
	assert_eq!(engine.node_count(), 257);

	// Growing past the limit fails the update. The mounted tree stays as it was.
	nested.borrow_mut().levels = 257;
	assert!(matches!(engine.render(&nested), Err(Error::DepthLimit { limit: 256 })));
	assert_eq!(engine.node_count(), 257);
}

#[traced_test]
#[test]
fn skipped_components_are_logged() {
	let mut engine = Engine::new(config());
	engine.register::<Counted>().unwrap();
	let page = shared(Page::default());
	engine.render(&page).unwrap();
	page.borrow_mut().other = "changed".to_owned();
	engine.render(&page).unwrap();
	assert!(logs_contain("Attributes unchanged. Skipping component."));
}

#[test]
fn changes_and_config_serialize() {
	let change = Change::ReplaceChild {
		parent: id(1),
		old: id(2),
		new: id(4),
	};
	let json = serde_json::to_string(&change).unwrap();
	assert_eq!(json, r#"{"op":"replaceChild","parent":1,"old":2,"new":4}"#);
	assert_eq!(serde_json::from_str::<Change>(&json).unwrap(), change);
	assert_eq!(change.target(), id(1));

	let config: Config = serde_json::from_str(r#"{"depth_limit": 8}"#).unwrap();
	assert_eq!(config, Config::default().with_depth_limit(8));
	assert_eq!(config.entry_package, "main");
}
