//! Decodes rendered markup into a [`Tag`] tree.
//!
//! The accepted language is the subset of HTML5 that component templates produce:
//! elements, text, comments, a doctype (ignored), void elements, raw text in `<script>` and `<style>`,
//! and SVG subtrees, in which self-closing tags are legal.
//!
//! Any tag name that isn't a standard HTML5 element (outside of SVG) is a reference to a component.

use crate::{config::DEFAULT_DEPTH_LIMIT, error::DecodeError};
use hashbrown::HashMap;
use std::borrow::Cow;
use tracing::{error, instrument, trace};

/// Attribute name to raw value. Order is irrelevant.
pub type Attributes = HashMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagKind {
	Text,
	Element,
	Component,
}

/// One node of a single render's decoded markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
	/// Element tag name or normalized component name. Empty for text.
	pub name: String,
	pub kind: TagKind,
	/// Text content. Empty unless this is a text tag.
	pub text: String,
	pub is_svg: bool,
	pub attributes: Attributes,
	/// Always empty for text, components and void elements.
	pub children: Vec<Tag>,
}

impl Tag {
	#[must_use]
	pub fn text(text: impl Into<String>) -> Self {
		Self {
			name: String::new(),
			kind: TagKind::Text,
			text: text.into(),
			is_svg: false,
			attributes: Attributes::new(),
			children: Vec::new(),
		}
	}

	#[must_use]
	pub fn element(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			kind: TagKind::Element,
			text: String::new(),
			is_svg: false,
			attributes: Attributes::new(),
			children: Vec::new(),
		}
	}

	#[must_use]
	pub fn component(name: impl Into<String>) -> Self {
		Self {
			kind: TagKind::Component,
			..Self::element(name)
		}
	}

	#[must_use]
	pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.attributes.insert(name.into(), value.into());
		self
	}

	#[must_use]
	pub fn with_child(mut self, child: Tag) -> Self {
		self.children.push(child);
		self
	}

	/// Calls `f` for this tag and every descendant, parents first.
	pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Tag)) {
		f(self);
		for child in &self.children {
			child.walk(f);
		}
	}
}

/// Decodes markup with component names resolved against an entry package.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
	entry_package: &'a str,
	depth_limit: usize,
}

impl Default for Decoder<'_> {
	fn default() -> Self {
		Self::new("main")
	}
}

impl<'a> Decoder<'a> {
	#[must_use]
	pub fn new(entry_package: &'a str) -> Self {
		Self {
			entry_package,
			depth_limit: DEFAULT_DEPTH_LIMIT,
		}
	}

	/// Elements nested deeper than `depth_limit` (the root being at depth 1) fail with [`DecodeError::TooDeep`].
	#[must_use]
	pub fn with_depth_limit(mut self, depth_limit: usize) -> Self {
		self.depth_limit = depth_limit;
		self
	}

	/// Decodes exactly one root node.
	///
	/// # Errors
	///
	/// Iff the markup is empty, malformed, nested too deeply, has more than one root or contains an illegal self-closing tag.
	#[instrument(skip(raw), fields(raw.len = raw.len()))]
	pub fn decode(&self, raw: &str) -> Result<Tag, DecodeError> {
		let mut parser = Parser {
			src: raw,
			pos: 0,
			entry_package: self.entry_package,
			depth_limit: self.depth_limit,
		};

		let root = loop {
			parser.skip_ignorable();
			if parser.at_end() {
				return Err(DecodeError::Empty);
			}
			if parser.rest().starts_with("</") {
				let found = parser.close_tag()?;
				return Err(DecodeError::StrayClose { found });
			}
			if let Some(tag) = parser.node(false, 1)? {
				break tag;
			}
		};

		parser.skip_ignorable();
		while !parser.at_end() {
			// Trailing whitespace-only text is fine, anything else isn't.
			if parser.rest().starts_with('<') || !parser.text_run().trim().is_empty() {
				return Err(DecodeError::TrailingContent);
			}
			parser.skip_ignorable();
		}

		trace!(root.kind = ?root.kind, root.name = %root.name, "Decoded markup.");
		Ok(root)
	}
}

/// Decodes `raw` with the default entry package, `main`.
///
/// # Errors
///
/// See [`Decoder::decode`].
pub fn decode(raw: &str) -> Result<Tag, DecodeError> {
	Decoder::default().decode(raw)
}

/// Lower-cases a qualified type or tag name and drops the package if it is the entry package.
///
/// Both `::`-separated paths (`app::widgets::Button`) and dotted markup names (`widgets.button`) are accepted.
/// Only the last package segment is kept, so `app::widgets::Button` becomes `widgets.button`.
#[must_use]
pub fn normalize_name(qualified: &str, entry_package: &str) -> String {
	// Generic parameters aren't part of a component's name.
	let qualified = qualified.split('<').next().unwrap_or(qualified);
	let qualified = qualified.replace("::", ".").to_ascii_lowercase();
	let mut segments = qualified.rsplit('.');
	let name = segments.next().unwrap_or_default();
	match segments.next() {
		Some(package) if !package.is_empty() && !package.eq_ignore_ascii_case(entry_package) => format!("{}.{}", package, name),
		_ => name.to_owned(),
	}
}

struct Parser<'s> {
	src: &'s str,
	pos: usize,
	entry_package: &'s str,
	depth_limit: usize,
}

impl<'s> Parser<'s> {
	fn rest(&self) -> &'s str {
		&self.src[self.pos..]
	}

	fn at_end(&self) -> bool {
		self.pos >= self.src.len()
	}

	fn malformed(&self, reason: &'static str) -> DecodeError {
		DecodeError::Malformed { at: self.pos, reason }
	}

	fn skip_whitespace(&mut self) {
		let rest = self.rest();
		self.pos += rest.len() - rest.trim_start().len();
	}

	/// Skips whitespace, comments and doctypes.
	fn skip_ignorable(&mut self) {
		loop {
			self.skip_whitespace();
			let rest = self.rest();
			if rest.starts_with("<!--") {
				self.pos += rest.find("-->").map_or(rest.len(), |end| end + 3);
			} else if rest.starts_with("<!") || rest.starts_with("<?") {
				self.pos += rest.find('>').map_or(rest.len(), |end| end + 1);
			} else {
				break;
			}
		}
	}

	fn text_run(&mut self) -> &'s str {
		let rest = self.rest();
		let len = rest.find('<').unwrap_or(rest.len());
		self.pos += len;
		&rest[..len]
	}

	fn name(&mut self) -> &'s str {
		let rest = self.rest();
		let len = rest
			.find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')))
			.unwrap_or(rest.len());
		self.pos += len;
		&rest[..len]
	}

	/// Parses `</name>` and returns `name`.
	fn close_tag(&mut self) -> Result<String, DecodeError> {
		self.pos += 2;
		let name = self.name();
		if name.is_empty() {
			return Err(self.malformed("closing tag without a name"));
		}
		self.skip_whitespace();
		if !self.rest().starts_with('>') {
			return Err(self.malformed("expected `>` after closing tag name"));
		}
		self.pos += 1;
		Ok(name.to_owned())
	}

	/// Parses one node. Whitespace-only text and comments yield `None`.
	fn node(&mut self, in_svg: bool, depth: usize) -> Result<Option<Tag>, DecodeError> {
		let rest = self.rest();
		if rest.starts_with("<!") {
			self.skip_ignorable();
			return Ok(None);
		}
		if rest.starts_with('<') {
			return self.element(in_svg, depth).map(Some);
		}

		let text = self.text_run();
		if text.trim().is_empty() {
			return Ok(None);
		}
		Ok(Some(Tag::text(unescape(text))))
	}

	fn element(&mut self, in_svg: bool, depth: usize) -> Result<Tag, DecodeError> {
		if depth > self.depth_limit {
			error!(limit = self.depth_limit, at = self.pos, "Depth limit reached while decoding.");
			return Err(DecodeError::TooDeep { limit: self.depth_limit });
		}
		self.pos += 1;
		let raw_name = self.name();
		if raw_name.is_empty() {
			return Err(self.malformed("expected a tag name after `<`"));
		}

		let lower = raw_name.to_ascii_lowercase();
		let is_svg = in_svg || lower == "svg";
		let mut tag = if is_svg {
			Tag {
				is_svg: true,
				..Tag::element(if in_svg { raw_name.to_owned() } else { lower.clone() })
			}
		} else if is_html_element(&lower) {
			Tag::element(lower.clone())
		} else {
			Tag::component(normalize_name(&lower, self.entry_package))
		};

		let self_closing = self.attributes(&mut tag.attributes, is_svg)?;
		let void = !is_svg && is_void_element(&lower);

		if self_closing {
			if !void && !is_svg {
				return Err(DecodeError::SelfClosing { tag: raw_name.to_owned() });
			}
			return Ok(tag);
		}
		if void {
			return Ok(tag);
		}

		if !is_svg && matches!(lower.as_str(), "script" | "style") {
			let end = find_ignore_ascii_case(self.rest(), &format!("</{}", lower)).ok_or_else(|| DecodeError::UnclosedTag { tag: lower.clone() })?;
			let content = &self.rest()[..end];
			self.pos += end;
			if !content.trim().is_empty() {
				tag.children.push(Tag::text(content));
			}
			self.close_tag()?;
			return Ok(tag);
		}

		loop {
			if self.at_end() {
				return Err(DecodeError::UnclosedTag { tag: raw_name.to_owned() });
			}
			if self.rest().starts_with("</") {
				let found = self.close_tag()?;
				if !found.eq_ignore_ascii_case(raw_name) {
					return Err(DecodeError::UnexpectedClose {
						expected: raw_name.to_owned(),
						found,
					});
				}
				break;
			}
			if let Some(child) = self.node(is_svg, depth + 1)? {
				if tag.kind == TagKind::Component {
					// Component content is produced by the component itself.
					trace!(component = %tag.name, "Ignoring child markup of component reference.");
					continue;
				}
				tag.children.push(child);
			}
		}
		Ok(tag)
	}

	/// Collects attributes up to and including the end of the start tag.
	/// Returns whether the tag was self-closing.
	fn attributes(&mut self, attributes: &mut Attributes, is_svg: bool) -> Result<bool, DecodeError> {
		loop {
			self.skip_whitespace();
			let rest = self.rest();
			if rest.is_empty() {
				return Err(self.malformed("unterminated start tag"));
			}
			if rest.starts_with("/>") {
				self.pos += 2;
				return Ok(true);
			}
			if rest.starts_with('>') {
				self.pos += 1;
				return Ok(false);
			}

			let name_len = rest
				.find(|c: char| c.is_whitespace() || matches!(c, '=' | '>' | '/' | '"' | '\''))
				.unwrap_or(rest.len());
			if name_len == 0 {
				return Err(self.malformed("expected an attribute name"));
			}
			let name = &rest[..name_len];
			let name = if is_svg { name.to_owned() } else { name.to_ascii_lowercase() };
			self.pos += name_len;

			self.skip_whitespace();
			let value = if self.rest().starts_with('=') {
				self.pos += 1;
				self.skip_whitespace();
				self.attribute_value()?
			} else {
				// Present without a value.
				String::new()
			};
			attributes.insert(name, value);
		}
	}

	fn attribute_value(&mut self) -> Result<String, DecodeError> {
		let rest = self.rest();
		match rest.chars().next() {
			Some(quote @ ('"' | '\'')) => {
				let end = rest[1..].find(quote).ok_or_else(|| self.malformed("unterminated attribute value"))?;
				self.pos += end + 2;
				Ok(unescape(&rest[1..=end]).into_owned())
			}
			Some(_) => {
				let len = rest.find(|c: char| c.is_whitespace() || c == '>').unwrap_or(rest.len());
				let value = &rest[..len];
				// `<a href=x/>` ends the value before the slash.
				let value = value.strip_suffix('/').filter(|_| rest[len..].starts_with('>')).unwrap_or(value);
				self.pos += value.len();
				Ok(unescape(value).into_owned())
			}
			None => Err(self.malformed("expected an attribute value")),
		}
	}
}

fn find_ignore_ascii_case(haystack: &str, needle: &str) -> Option<usize> {
	haystack
		.as_bytes()
		.windows(needle.len())
		.position(|window| window.eq_ignore_ascii_case(needle.as_bytes()))
}

/// Replaces character references.
/// Unknown named references are kept verbatim.
#[must_use]
pub fn unescape(text: &str) -> Cow<'_, str> {
	if !text.contains('&') {
		return Cow::Borrowed(text);
	}

	let mut unescaped = String::with_capacity(text.len());
	let mut rest = text;
	while let Some(amp) = rest.find('&') {
		unescaped.push_str(&rest[..amp]);
		rest = &rest[amp..];
		let decoded = rest.find(';').filter(|&end| end <= 10).and_then(|end| {
			let entity = &rest[1..end];
			let c = match entity {
				"amp" => Some('&'),
				"lt" => Some('<'),
				"gt" => Some('>'),
				"quot" => Some('"'),
				"apos" => Some('\''),
				"nbsp" => Some('\u{a0}'),
				_ => entity
					.strip_prefix("#x")
					.or_else(|| entity.strip_prefix("#X"))
					.and_then(|hex| u32::from_str_radix(hex, 16).ok())
					.or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
					.and_then(char::from_u32),
			};
			c.map(|c| (c, end))
		});
		match decoded {
			Some((c, end)) => {
				unescaped.push(c);
				rest = &rest[end + 1..];
			}
			None => {
				unescaped.push('&');
				rest = &rest[1..];
			}
		}
	}
	unescaped.push_str(rest);
	Cow::Owned(unescaped)
}

/// Escapes text for use in markup, including inside quoted attribute values.
#[must_use]
pub fn escape(text: &str) -> Cow<'_, str> {
	if !text.contains(['&', '<', '>', '"', '\'']) {
		return Cow::Borrowed(text);
	}
	let mut escaped = String::with_capacity(text.len() + 8);
	for c in text.chars() {
		match c {
			'&' => escaped.push_str("&amp;"),
			'<' => escaped.push_str("&lt;"),
			'>' => escaped.push_str("&gt;"),
			'"' => escaped.push_str("&#34;"),
			'\'' => escaped.push_str("&#39;"),
			c => escaped.push(c),
		}
	}
	Cow::Owned(escaped)
}

#[must_use]
pub fn is_void_element(name: &str) -> bool {
	matches!(
		name,
		"area" | "base" | "br" | "col" | "embed" | "hr" | "img" | "input" | "link" | "meta" | "param" | "source" | "track" | "wbr"
	)
}

/// Whether `name` (lower case) is a standard HTML5 element.
#[must_use]
pub fn is_html_element(name: &str) -> bool {
	matches!(
		name,
		"a" | "abbr"
			| "address" | "area"
			| "article" | "aside"
			| "audio" | "b"
			| "base" | "bdi"
			| "bdo" | "blockquote"
			| "body" | "br"
			| "button" | "canvas"
			| "caption" | "cite"
			| "code" | "col"
			| "colgroup" | "data"
			| "datalist" | "dd"
			| "del" | "details"
			| "dfn" | "dialog"
			| "div" | "dl"
			| "dt" | "em"
			| "embed" | "fieldset"
			| "figcaption" | "figure"
			| "footer" | "form"
			| "h1" | "h2"
			| "h3" | "h4"
			| "h5" | "h6"
			| "head" | "header"
			| "hgroup" | "hr"
			| "html" | "i"
			| "iframe" | "img"
			| "input" | "ins"
			| "kbd" | "label"
			| "legend" | "li"
			| "link" | "main"
			| "map" | "mark"
			| "math" | "menu"
			| "meta" | "meter"
			| "nav" | "noscript"
			| "object" | "ol"
			| "optgroup" | "option"
			| "output" | "p"
			| "param" | "picture"
			| "pre" | "progress"
			| "q" | "rp"
			| "rt" | "ruby"
			| "s" | "samp"
			| "script" | "section"
			| "select" | "slot"
			| "small" | "source"
			| "span" | "strong"
			| "style" | "sub"
			| "summary" | "sup"
			| "svg" | "table"
			| "tbody" | "td"
			| "template" | "textarea"
			| "tfoot" | "th"
			| "thead" | "time"
			| "title" | "tr"
			| "track" | "u"
			| "ul" | "var"
			| "video" | "wbr"
	)
}
