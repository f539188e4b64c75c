//! A small stand-in for the browser side of a streamed render.
//!
//! [`apply_instructions`] runs the `$RS`/`$RC`/`$RX` calls found in the
//! output against the markup, the way the inline scripts would patch the
//! DOM. [`visible`] then drops the boundary markers so two documents can be
//! compared by what a reader would see.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Once;

use cascade::{MemoryDestination, Request};
use tracing_subscriber::EnvFilter;

const SEGMENT_OPEN: &str = "<div hidden id=\"";
const BOUNDARY_OPEN: &str = "<!--$";
const BOUNDARY_CLOSE: &str = "<!--/$-->";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Instruction {
    Segment { segment: String, placeholder: String },
    Boundary { boundary: String, segment: String },
    ClientRender { boundary: String },
}

static TRACING: Once = Once::new();

/// Routes renderer logs through the test harness. Filtered by `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Pulls until the request stops writing, refilling the sink's budget
/// before every pull.
pub fn drain(request: &Request, output: &MemoryDestination) {
    loop {
        let before = output.write_count();
        output.refill();
        request.pull();
        if output.write_count() == before {
            break;
        }
    }
}

/// Applies every inline instruction in `html` and returns the patched
/// document. Segments that were never moved into place are dropped.
pub fn apply_instructions(html: &str) -> String {
    let (html, scripts) = take_scripts(html);
    let (mut document, mut segments) = take_segments(&html);

    for instruction in scripts.iter().flat_map(|script| parse_calls(script)) {
        match instruction {
            Instruction::Segment { segment, placeholder } => {
                let content = segments.remove(&segment).unwrap_or_default();
                let target = format!("<template id=\"{placeholder}\"></template>");
                replace_everywhere(&mut document, &mut segments, &target, &content);
            }
            Instruction::Boundary { boundary, segment } => {
                let content = segments.remove(&segment).unwrap_or_default();
                let start = format!("<!--$?--><template id=\"{boundary}\"></template>");
                if !complete_boundary(&mut document, &start, &content) {
                    for other in segments.values_mut() {
                        if complete_boundary(other, &start, &content) {
                            break;
                        }
                    }
                }
            }
            Instruction::ClientRender { boundary } => {
                let target = format!("<!--$?--><template id=\"{boundary}\"></template>");
                let client_rendered = "<!--$!--><template></template>";
                replace_everywhere(&mut document, &mut segments, &target, client_rendered);
            }
        }
    }
    document
}

/// Strips boundary markers, text separators and empty templates.
pub fn strip_markers(html: &str) -> String {
    let mut out = html.to_owned();
    let markers = [
        "<!--$?-->",
        "<!--$!-->",
        "<!--$-->",
        "<!--/$-->",
        "<!-- -->",
        "<template></template>",
    ];
    for marker in markers {
        out = out.replace(marker, "");
    }
    while let Some(start) = out.find("<template data-dgst=") {
        let Some(end) = out[start..].find("</template>") else {
            break;
        };
        out.replace_range(start..start + end + "</template>".len(), "");
    }
    out
}

/// What a client shows once every instruction in `html` ran.
pub fn visible(html: &str) -> String {
    strip_markers(&apply_instructions(html))
}

fn take_scripts(html: &str) -> (String, Vec<String>) {
    let mut rest = html;
    let mut markup = String::new();
    let mut scripts = Vec::new();
    while let Some(start) = rest.find("<script") {
        markup.push_str(&rest[..start]);
        let after = &rest[start..];
        let open_end = after.find('>').map_or(after.len(), |end| end + 1);
        let close = after.find("</script>").unwrap_or(after.len());
        scripts.push(after[open_end.min(close)..close].to_owned());
        rest = after.get(close + "</script>".len()..).unwrap_or("");
    }
    markup.push_str(rest);
    (markup, scripts)
}

fn take_segments(html: &str) -> (String, HashMap<String, String>) {
    let mut rest = html;
    let mut document = String::new();
    let mut segments = HashMap::new();
    while let Some(start) = rest.find(SEGMENT_OPEN) {
        document.push_str(&rest[..start]);
        let after = &rest[start + SEGMENT_OPEN.len()..];
        let id_end = after.find('"').expect("segment id should be quoted");
        let id = after[..id_end].to_owned();
        let body = &after[id_end + "\">".len()..];
        let end = matching_div_end(body);
        segments.insert(id, body[..end].to_owned());
        rest = &body[end + "</div>".len()..];
    }
    document.push_str(rest);
    (document, segments)
}

fn matching_div_end(body: &str) -> usize {
    let mut depth = 0usize;
    let mut cursor = 0;
    loop {
        let open = body[cursor..].find("<div").map(|at| at + cursor);
        let close = body[cursor..]
            .find("</div>")
            .map(|at| at + cursor)
            .expect("segment container should be closed");
        match open {
            Some(open) if open < close => {
                depth += 1;
                cursor = open + "<div".len();
            }
            _ if depth == 0 => return close,
            _ => {
                depth -= 1;
                cursor = close + "</div>".len();
            }
        }
    }
}

fn parse_calls(script: &str) -> Vec<Instruction> {
    let mut calls = Vec::new();
    let mut rest = script;
    while let Some(at) = rest.find("$R") {
        let call = &rest[at..];
        rest = &call[2..];
        let Some(kind) = call.chars().nth(2) else {
            break;
        };
        if call.chars().nth(3) != Some('(') {
            continue;
        }
        let arguments = string_arguments(&call[4..]);
        let instruction = match (kind, arguments.as_slice()) {
            ('S', [segment, placeholder, ..]) => Instruction::Segment {
                segment: segment.clone(),
                placeholder: placeholder.clone(),
            },
            ('C', [boundary, segment, ..]) => Instruction::Boundary {
                boundary: boundary.clone(),
                segment: segment.clone(),
            },
            ('X', [boundary, ..]) => Instruction::ClientRender {
                boundary: boundary.clone(),
            },
            _ => continue,
        };
        calls.push(instruction);
    }
    calls
}

/// Reads the leading string literals of an argument list up to `)`.
fn string_arguments(input: &str) -> Vec<String> {
    let mut arguments = Vec::new();
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                let mut value = String::new();
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                value.push(escaped);
                            }
                        }
                        '"' => break,
                        other => value.push(other),
                    }
                }
                arguments.push(value);
            }
            ')' => break,
            _ => {}
        }
    }
    arguments
}

fn replace_everywhere(
    document: &mut String,
    segments: &mut HashMap<String, String>,
    target: &str,
    content: &str,
) {
    if document.contains(target) {
        *document = document.replacen(target, content, 1);
        return;
    }
    for segment in segments.values_mut() {
        if segment.contains(target) {
            *segment = segment.replacen(target, content, 1);
            return;
        }
    }
}

/// Swaps the fallback between `start` and its matching end marker for
/// `content`.
fn complete_boundary(html: &mut String, start: &str, content: &str) -> bool {
    let Some(begin) = html.find(start) else {
        return false;
    };
    let mut cursor = begin + start.len();
    let mut depth = 0usize;
    let end = loop {
        let open = html[cursor..].find(BOUNDARY_OPEN).map(|at| at + cursor);
        let Some(close) = html[cursor..].find(BOUNDARY_CLOSE).map(|at| at + cursor) else {
            return false;
        };
        match open {
            Some(open) if open < close => {
                depth += 1;
                cursor = open + BOUNDARY_OPEN.len();
            }
            _ if depth == 0 => break close + BOUNDARY_CLOSE.len(),
            _ => {
                depth -= 1;
                cursor = close + BOUNDARY_CLOSE.len();
            }
        }
    };
    html.replace_range(begin..end, &format!("<!--$-->{content}<!--/$-->"));
    true
}
