//! Serializing host elements and text.
//!
//! The renderer never formats tags itself; it goes through a [`Markup`]
//! implementation. [`HtmlMarkup`] is the default and produces HTML5.

use alloc::borrow::Cow;

use cascade_core::{AttrValue, Attribute};

use crate::error::RenderError;

/// Elements that never have a closing tag.
pub const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "keygen", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Writes host elements and text into a segment buffer.
pub trait Markup {
    /// Writes `<tag attr...>`.
    ///
    /// # Errors
    ///
    /// Fails if the tag or any attribute name cannot be written safely.
    fn write_open_tag(
        &self,
        target: &mut Vec<u8>,
        tag: &str,
        attributes: &[Attribute],
    ) -> Result<(), RenderError>;

    /// Writes a single attribute, including its leading space.
    ///
    /// # Errors
    ///
    /// Fails if the attribute name cannot be written safely.
    fn write_attribute(&self, target: &mut Vec<u8>, attribute: &Attribute)
    -> Result<(), RenderError>;

    /// Writes escaped text.
    fn write_text(&self, target: &mut Vec<u8>, text: &str);

    /// Writes `</tag>`.
    fn write_close_tag(&self, target: &mut Vec<u8>, tag: &str);

    /// Whether `tag` is written without a closing tag.
    fn is_void(&self, tag: &str) -> bool {
        VOID_ELEMENTS.contains(&tag)
    }
}

/// Standard HTML serialization.
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlMarkup;

impl Markup for HtmlMarkup {
    fn write_open_tag(
        &self,
        target: &mut Vec<u8>,
        tag: &str,
        attributes: &[Attribute],
    ) -> Result<(), RenderError> {
        if !is_valid_tag(tag) {
            return Err(RenderError::InvalidTag(tag.into()));
        }
        target.push(b'<');
        target.extend_from_slice(tag.as_bytes());
        for attribute in attributes {
            self.write_attribute(target, attribute)?;
        }
        target.push(b'>');
        Ok(())
    }

    fn write_attribute(
        &self,
        target: &mut Vec<u8>,
        attribute: &Attribute,
    ) -> Result<(), RenderError> {
        let name = attribute.name.as_ref();
        if is_event_handler(name) {
            return Ok(());
        }
        if !is_valid_attribute_name(name) {
            return Err(RenderError::InvalidAttribute(name.into()));
        }
        match &attribute.value {
            AttrValue::Bool(false) => {}
            AttrValue::Bool(true) => {
                target.push(b' ');
                target.extend_from_slice(name.as_bytes());
                target.extend_from_slice(b"=\"\"");
            }
            AttrValue::Text(value) => {
                target.push(b' ');
                target.extend_from_slice(name.as_bytes());
                target.extend_from_slice(b"=\"");
                target.extend_from_slice(escape_html(value).as_bytes());
                target.push(b'"');
            }
        }
        Ok(())
    }

    fn write_text(&self, target: &mut Vec<u8>, text: &str) {
        target.extend_from_slice(escape_html(text).as_bytes());
    }

    fn write_close_tag(&self, target: &mut Vec<u8>, tag: &str) {
        target.extend_from_slice(b"</");
        target.extend_from_slice(tag.as_bytes());
        target.push(b'>');
    }
}

/// Escapes `"`, `&`, `'`, `<` and `>` for use in text and attribute values.
#[must_use]
pub fn escape_html(text: &str) -> Cow<'_, str> {
    let Some(first) = text.find(['"', '&', '\'', '<', '>']) else {
        return Cow::Borrowed(text);
    };
    let mut escaped = String::with_capacity(text.len() + 8);
    escaped.push_str(&text[..first]);
    for ch in text[first..].chars() {
        match ch {
            '"' => escaped.push_str("&quot;"),
            '&' => escaped.push_str("&amp;"),
            '\'' => escaped.push_str("&#x27;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            other => escaped.push(other),
        }
    }
    Cow::Owned(escaped)
}

/// Whether `tag` matches `[a-zA-Z][a-zA-Z:_.\-0-9]*`.
#[must_use]
pub fn is_valid_tag(tag: &str) -> bool {
    let mut chars = tag.chars();
    chars.next().is_some_and(|first| first.is_ascii_alphabetic())
        && chars.all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, ':' | '_' | '.' | '-'))
}

/// Whether `name` is a valid XML-style attribute name.
#[must_use]
pub fn is_valid_attribute_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(is_name_start_char) && chars.all(is_name_char)
}

fn is_name_start_char(ch: char) -> bool {
    matches!(ch,
        ':' | 'A'..='Z' | '_' | 'a'..='z'
        | '\u{C0}'..='\u{D6}' | '\u{D8}'..='\u{F6}' | '\u{F8}'..='\u{2FF}'
        | '\u{370}'..='\u{37D}' | '\u{37F}'..='\u{1FFF}' | '\u{200C}'..='\u{200D}'
        | '\u{2070}'..='\u{218F}' | '\u{2C00}'..='\u{2FEF}' | '\u{3001}'..='\u{D7FF}'
        | '\u{F900}'..='\u{FDCF}' | '\u{FDF0}'..='\u{FFFD}')
}

fn is_name_char(ch: char) -> bool {
    is_name_start_char(ch)
        || matches!(
            ch,
            '-' | '.' | '0'..='9' | '\u{B7}' | '\u{300}'..='\u{36F}' | '\u{203F}'..='\u{2040}'
        )
}

// Handlers only make sense on the client.
fn is_event_handler(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() > 2 && bytes[..2].eq_ignore_ascii_case(b"on")
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_core::element;

    fn open_tag(tag: &str, attributes: &[Attribute]) -> Result<String, RenderError> {
        let mut out = Vec::new();
        HtmlMarkup.write_open_tag(&mut out, tag, attributes)?;
        Ok(String::from_utf8(out).expect("markup is utf-8"))
    }

    #[test]
    fn escapes_the_fixed_table() {
        assert_eq!(
            escape_html(r#"<a href="x">'&'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&#x27;&amp;&#x27;&lt;/a&gt;"
        );
        assert!(matches!(escape_html("plain"), Cow::Borrowed("plain")));
    }

    #[test]
    fn attributes_are_written_in_order() {
        let el = element("input")
            .attr("id", "name")
            .attr("disabled", true)
            .attr("hidden", false)
            .attr("onclick", "steal()")
            .attr("value", "a\"b");
        let tag = open_tag(el.tag(), el.attributes()).expect("valid element");
        assert_eq!(tag, r#"<input id="name" disabled="" value="a&quot;b">"#);
    }

    #[test]
    fn rejects_unsafe_names() {
        assert!(matches!(open_tag("div onload", &[]), Err(RenderError::InvalidTag(_))));
        let el = element("div").attr("a b", "x");
        assert!(matches!(
            open_tag(el.tag(), el.attributes()),
            Err(RenderError::InvalidAttribute(_))
        ));
        assert!(is_valid_tag("my-widget.v2"));
        assert!(!is_valid_tag("1div"));
    }

    #[test]
    fn void_elements() {
        assert!(HtmlMarkup.is_void("br"));
        assert!(!HtmlMarkup.is_void("div"));
    }
}
