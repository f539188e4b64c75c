//! Insertion modes: where in the document a segment's markup ends up.
//!
//! The mode decides which hidden container can legally hold a segment that is
//! streamed out of order. A `<div>` cannot live inside a `<tr>`, so segments
//! rendered inside table rows are wrapped in `<table hidden><tr>` instead.

use crate::options::Namespace;

/// The insertion mode of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FormatContext {
    /// Top of an HTML document, before any element.
    Root,
    /// Inside ordinary HTML content.
    Html,
    /// Inside `<svg>`.
    Svg,
    /// Inside `<math>`.
    MathMl,
    /// Directly inside `<table>`.
    Table,
    /// Inside `<thead>`, `<tbody>` or `<tfoot>`.
    TableBody,
    /// Inside `<tr>`.
    TableRow,
    /// Inside `<colgroup>`.
    ColGroup,
}

impl FormatContext {
    /// The mode of the root segment.
    #[must_use]
    pub const fn root(namespace: Namespace) -> Self {
        match namespace {
            Namespace::Html => Self::Root,
            Namespace::Svg => Self::Svg,
            Namespace::MathMl => Self::MathMl,
        }
    }

    /// The mode for the children of a `tag` element opened in this mode.
    #[must_use]
    pub fn child(self, tag: &str) -> Self {
        match tag {
            "svg" => Self::Svg,
            "math" => Self::MathMl,
            "foreignObject" => Self::Html,
            "table" => Self::Table,
            "thead" | "tbody" | "tfoot" => Self::TableBody,
            "colgroup" => Self::ColGroup,
            "tr" => Self::TableRow,
            _ if self >= Self::Table || self == Self::Root => Self::Html,
            _ => self,
        }
    }

    /// Whether this is the top of the document.
    #[must_use]
    pub const fn is_root(self) -> bool {
        matches!(self, Self::Root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_modes_follow_tags() {
        let root = FormatContext::root(Namespace::Html);
        let table = root.child("table");
        assert_eq!(table, FormatContext::Table);
        assert_eq!(table.child("tbody"), FormatContext::TableBody);
        assert_eq!(table.child("tbody").child("tr"), FormatContext::TableRow);
        assert_eq!(table.child("tr").child("td"), FormatContext::Html);
        assert_eq!(table.child("colgroup"), FormatContext::ColGroup);
    }

    #[test]
    fn foreign_content_keeps_its_mode() {
        let svg = FormatContext::root(Namespace::Html).child("svg");
        assert_eq!(svg.child("g"), FormatContext::Svg);
        assert_eq!(svg.child("foreignObject").child("p"), FormatContext::Html);
        assert_eq!(FormatContext::root(Namespace::MathMl), FormatContext::MathMl);
        assert_eq!(FormatContext::root(Namespace::Html).child("main"), FormatContext::Html);
    }
}
