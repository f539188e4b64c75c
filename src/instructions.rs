//! The wire format: boundary markers, hidden segment containers and the
//! inline scripts that move late content into place.
//!
//! Three client functions exist. `$RS(segment, placeholder)` moves a hidden
//! segment into its placeholder, `$RC(boundary, segment)` swaps a boundary's
//! fallback for its content and `$RX(boundary, digest)` hands a boundary to the
//! client to render. The first instruction of each kind in a response carries
//! the function body; later ones only call it.

use core::fmt::Write as _;

use crate::destination::Destination;
use crate::error::RenderError;
use crate::format::FormatContext;
use crate::markup::escape_html;
use crate::options::{RenderOptions, ScriptSource};

const CLIENT_RENDER_BOUNDARY: &str = r#"$RX=function(b,c,d,e){var a=document.getElementById(b);a&&(b=a.previousSibling,b.data="$!",a=a.dataset,c&&(a.dgst=c),d&&(a.msg=d),e&&(a.stck=e),b._reactRetry&&b._reactRetry())};"#;
const COMPLETE_BOUNDARY: &str = r#"$RC=function(b,c,e){c=document.getElementById(c);c.parentNode.removeChild(c);var a=document.getElementById(b);if(a){b=a.previousSibling;if(e)b.data="$!",a.setAttribute("data-dgst",e);else{e=b.parentNode;a=b.nextSibling;var f=0;do{if(a&&8===a.nodeType){var d=a.data;if("/$"===d)if(0===f)break;else f--;else"$"!==d&&"$?"!==d&&"$!"!==d||f++}d=a.nextSibling;e.removeChild(a);a=d}while(a);for(;c.firstChild;)e.insertBefore(c.firstChild,a);b.data="$"}b._reactRetry&&b._reactRetry()}};"#;
const COMPLETE_SEGMENT: &str = r#"$RS=function(a,b){a=document.getElementById(a);b=document.getElementById(b);for(a.parentNode.removeChild(a);a.firstChild;)b.parentNode.insertBefore(a.firstChild,b);b.parentNode.removeChild(b)};"#;

/// Written between two adjacent text nodes so they stay separate in the DOM.
pub const TEXT_SEPARATOR: &[u8] = b"<!-- -->";
/// Written before a root `<html>` element.
pub const DOCTYPE: &[u8] = b"<!DOCTYPE html>";

const START_COMPLETED_BOUNDARY: &[u8] = b"<!--$-->";
const END_BOUNDARY: &[u8] = b"<!--/$-->";

/// Per-response writer state: id prefixes, which client functions were
/// already sent and the pre-rendered bootstrap scripts.
#[derive(Debug)]
pub struct ResponseState {
    start_inline_script: String,
    placeholder_prefix: String,
    segment_prefix: String,
    boundary_prefix: String,
    identifier_prefix: String,
    bootstrap: Vec<u8>,
    next_suspense_id: u32,
    sent_complete_segment_function: bool,
    sent_complete_boundary_function: bool,
    sent_client_render_function: bool,
}

impl ResponseState {
    /// Prepares the writer state for `options`.
    #[must_use]
    pub fn new(options: &RenderOptions) -> Self {
        let prefix = options.identifier_prefix.as_str();
        let start_inline_script = options.nonce.as_ref().map_or_else(
            || String::from("<script>"),
            |nonce| format!("<script nonce=\"{}\">", escape_html(nonce)),
        );

        let mut bootstrap = String::new();
        if let Some(content) = &options.bootstrap_script_content {
            bootstrap.push_str(&start_inline_script);
            bootstrap.push_str(&escape_bootstrap_script_content(content));
            bootstrap.push_str("</script>");
        }
        for script in &options.bootstrap_scripts {
            push_script_tag(&mut bootstrap, "<script src=\"", script);
        }
        for script in &options.bootstrap_modules {
            push_script_tag(&mut bootstrap, "<script type=\"module\" src=\"", script);
        }

        Self {
            start_inline_script,
            placeholder_prefix: format!("{prefix}P:"),
            segment_prefix: format!("{prefix}S:"),
            boundary_prefix: format!("{prefix}B:"),
            identifier_prefix: prefix.to_owned(),
            bootstrap: bootstrap.into_bytes(),
            next_suspense_id: 0,
            sent_complete_segment_function: false,
            sent_complete_boundary_function: false,
            sent_client_render_function: false,
        }
    }

    /// The user-supplied id prefix.
    #[must_use]
    pub fn identifier_prefix(&self) -> &str {
        &self.identifier_prefix
    }

    /// Allocates the next boundary id.
    pub fn assign_boundary_id(&mut self) -> String {
        let id = format!("{}{:x}", self.boundary_prefix, self.next_suspense_id);
        self.next_suspense_id += 1;
        id
    }

    /// `<template id="P:x"></template>`
    pub fn write_placeholder(&self, destination: &mut dyn Destination, id: u32) -> bool {
        let chunk = format!("<template id=\"{}{id:x}\"></template>", self.placeholder_prefix);
        destination.write(chunk.as_bytes())
    }

    /// Opens a boundary whose content is inlined.
    pub fn write_start_completed_boundary(&self, destination: &mut dyn Destination) -> bool {
        destination.write(START_COMPLETED_BOUNDARY)
    }

    /// Opens a boundary that still shows its fallback.
    pub fn write_start_pending_boundary(
        &self,
        destination: &mut dyn Destination,
        id: &str,
    ) -> bool {
        let chunk = format!("<!--$?--><template id=\"{id}\"></template>");
        destination.write(chunk.as_bytes())
    }

    /// Opens a boundary the client has to render itself.
    pub fn write_start_client_rendered_boundary(
        &self,
        destination: &mut dyn Destination,
        digest: Option<&str>,
    ) -> bool {
        let mut chunk = String::from("<!--$!--><template");
        if let Some(digest) = digest.filter(|digest| !digest.is_empty()) {
            let _ = write!(chunk, " data-dgst=\"{}\"", escape_html(digest));
        }
        chunk.push_str("></template>");
        destination.write(chunk.as_bytes())
    }

    /// Closes any kind of boundary.
    pub fn write_end_boundary(&self, destination: &mut dyn Destination) -> bool {
        destination.write(END_BOUNDARY)
    }

    /// Opens the hidden container that carries an out-of-order segment.
    pub fn write_start_segment(
        &self,
        destination: &mut dyn Destination,
        format: FormatContext,
        id: u32,
    ) -> bool {
        let open = match format {
            FormatContext::Root | FormatContext::Html => "<div hidden id=\"",
            FormatContext::Svg => "<svg aria-hidden=\"true\" style=\"display:none\" id=\"",
            FormatContext::MathMl => "<math aria-hidden=\"true\" style=\"display:none\" id=\"",
            FormatContext::Table => "<table hidden id=\"",
            FormatContext::TableBody => "<table hidden><tbody id=\"",
            FormatContext::TableRow => "<table hidden><tr id=\"",
            FormatContext::ColGroup => "<table hidden><colgroup id=\"",
        };
        let chunk = format!("{open}{}{id:x}\">", self.segment_prefix);
        destination.write(chunk.as_bytes())
    }

    /// Closes the container opened by [`write_start_segment`](Self::write_start_segment).
    pub fn write_end_segment(
        &self,
        destination: &mut dyn Destination,
        format: FormatContext,
    ) -> bool {
        let close: &[u8] = match format {
            FormatContext::Root | FormatContext::Html => b"</div>",
            FormatContext::Svg => b"</svg>",
            FormatContext::MathMl => b"</math>",
            FormatContext::Table => b"</table>",
            FormatContext::TableBody => b"</tbody></table>",
            FormatContext::TableRow => b"</tr></table>",
            FormatContext::ColGroup => b"</colgroup></table>",
        };
        destination.write(close)
    }

    /// `$RS("S:x","P:x")`
    pub fn write_completed_segment_instruction(
        &mut self,
        destination: &mut dyn Destination,
        id: u32,
    ) -> bool {
        let mut chunk = self.start_inline_script.clone();
        if !self.sent_complete_segment_function {
            self.sent_complete_segment_function = true;
            chunk.push_str(COMPLETE_SEGMENT);
            chunk.push(';');
        }
        let _ = write!(
            chunk,
            "$RS(\"{}{id:x}\",\"{}{id:x}\")</script>",
            self.segment_prefix, self.placeholder_prefix
        );
        destination.write(chunk.as_bytes())
    }

    /// `$RC("B:x","S:y")`
    pub fn write_completed_boundary_instruction(
        &mut self,
        destination: &mut dyn Destination,
        boundary_id: &str,
        segment_id: u32,
    ) -> bool {
        let mut chunk = self.start_inline_script.clone();
        if !self.sent_complete_boundary_function {
            self.sent_complete_boundary_function = true;
            chunk.push_str(COMPLETE_BOUNDARY);
            chunk.push(';');
        }
        let _ = write!(
            chunk,
            "$RC(\"{boundary_id}\",\"{}{segment_id:x}\")</script>",
            self.segment_prefix
        );
        destination.write(chunk.as_bytes())
    }

    /// `$RX("B:x"[,"digest"])`
    ///
    /// # Errors
    ///
    /// Fails only if the digest cannot be encoded as a script string.
    pub fn write_client_render_instruction(
        &mut self,
        destination: &mut dyn Destination,
        boundary_id: &str,
        digest: Option<&str>,
    ) -> Result<bool, RenderError> {
        let mut chunk = self.start_inline_script.clone();
        if !self.sent_client_render_function {
            self.sent_client_render_function = true;
            chunk.push_str(CLIENT_RENDER_BOUNDARY);
            chunk.push(';');
        }
        let _ = write!(chunk, "$RX(\"{boundary_id}\"");
        if let Some(digest) = digest.filter(|digest| !digest.is_empty()) {
            chunk.push(',');
            chunk.push_str(&escape_script_string(digest)?);
        }
        chunk.push_str(")</script>");
        Ok(destination.write(chunk.as_bytes()))
    }

    /// Writes the bootstrap scripts that follow the shell.
    pub fn write_bootstrap(&self, destination: &mut dyn Destination) -> bool {
        if self.bootstrap.is_empty() {
            return true;
        }
        destination.write(&self.bootstrap)
    }
}

fn push_script_tag(out: &mut String, open: &str, script: &ScriptSource) {
    out.push_str(open);
    out.push_str(&escape_html(script.src()));
    if let Some(integrity) = script.integrity() {
        out.push_str("\" integrity=\"");
        out.push_str(&escape_html(integrity));
    }
    out.push_str("\" async=\"\"></script>");
}

/// Encodes `input` as a JSON string literal that is safe inside `<script>`.
///
/// # Errors
///
/// Fails if JSON encoding fails.
pub fn escape_script_string(input: &str) -> Result<String, RenderError> {
    let json = serde_json::to_string(input)
        .map_err(|_| RenderError::Invariant("script string could not be encoded"))?;
    let mut escaped = String::with_capacity(json.len());
    for ch in json.chars() {
        match ch {
            '<' => escaped.push_str("\\u003c"),
            '\u{2028}' => escaped.push_str("\\u2028"),
            '\u{2029}' => escaped.push_str("\\u2029"),
            other => escaped.push(other),
        }
    }
    Ok(escaped)
}

/// Breaks up `<script` and `</script` so inline bootstrap code cannot close
/// its own tag.
#[must_use]
pub fn escape_bootstrap_script_content(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;
    while let Some(position) = rest.find('<') {
        out.push_str(&rest[..position]);
        out.push('<');
        rest = &rest[position + 1..];
        if let Some(stripped) = rest.strip_prefix('/') {
            out.push('/');
            rest = stripped;
        }
        let is_script = rest
            .get(..6)
            .is_some_and(|word| word.eq_ignore_ascii_case("script"));
        if is_script {
            out.push_str(if rest.starts_with('s') { "\\u0073" } else { "\\u0053" });
            rest = &rest[1..];
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::MemoryDestination;

    fn render(f: impl FnOnce(&mut ResponseState, &mut dyn Destination)) -> String {
        let mut state = ResponseState::new(&RenderOptions::default());
        let mut destination = MemoryDestination::new();
        f(&mut state, &mut destination);
        destination.text()
    }

    #[test]
    fn function_bodies_are_sent_once() {
        let out = render(|state, destination| {
            state.write_completed_segment_instruction(destination, 1);
            state.write_completed_segment_instruction(destination, 2);
        });
        assert_eq!(out.matches("$RS=function").count(), 1);
        assert!(out.ends_with("<script>$RS(\"S:2\",\"P:2\")</script>"));
    }

    #[test]
    fn boundary_ids_use_prefix_and_hex() {
        let mut state = ResponseState::new(&RenderOptions::default().identifier_prefix("x-"));
        for _ in 0..10 {
            state.assign_boundary_id();
        }
        assert_eq!(state.assign_boundary_id(), "x-B:a");
    }

    #[test]
    fn client_render_digest_is_escaped_for_scripts() {
        let out = render(|state, destination| {
            state
                .write_client_render_instruction(destination, "B:0", Some("</script>\u{2028}"))
                .expect("digest encodes");
        });
        assert!(out.ends_with(r#"$RX("B:0","\u003c/script>\u2028")</script>"#));
    }

    #[test]
    fn segment_containers_match_insertion_mode() {
        let out = render(|state, destination| {
            state.write_start_segment(destination, FormatContext::TableRow, 31);
            state.write_end_segment(destination, FormatContext::TableRow);
        });
        assert_eq!(out, r#"<table hidden><tr id="S:1f"></tr></table>"#);
    }

    #[test]
    fn nonce_and_bootstrap_scripts() {
        let options = RenderOptions::default()
            .nonce("r4nd\"")
            .bootstrap_script_content("load('</script>')")
            .bootstrap_module(ScriptSource::Detailed {
                src: "/app.mjs".into(),
                integrity: Some("sha384-x".into()),
            });
        let state = ResponseState::new(&options);
        let mut destination = MemoryDestination::new();
        state.write_bootstrap(&mut destination);
        assert_eq!(
            destination.text(),
            concat!(
                r#"<script nonce="r4nd&quot;">load('</\u0073cript>')</script>"#,
                r#"<script type="module" src="/app.mjs" integrity="sha384-x" async=""></script>"#
            )
        );
    }
}
