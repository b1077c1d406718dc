//! Builds and removes the conversion annotations shown next to prices.

use crate::annotate::format::format_currency;
use crate::core::Currency;
use crate::dom::{Document, NodeId};
use anyhow::Result;
use tracing::debug;

/// Class carried by every annotation node.
pub const ANNOTATION_CLASS: &str = "yen-to-freedom-conversion";
/// Extra class on inline annotations.
pub const INLINE_CLASS: &str = "yen-to-freedom-inline";
/// Marker attribute set on an element once it has an annotation.
pub const PROCESSED_ATTR: &str = "data-yen-to-freedom-converted";

const APPROX: char = '\u{2248}';

const BLOCK_STYLE: &str = "margin-top: 4px; font-size: 0.85em; color: #2e7d32; line-height: 1.4;";
const INLINE_STYLE: &str = "margin-left: 4px; font-size: 0.9em; color: #2e7d32;";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// One line per currency, inserted right after the price element.
    Block,
    /// A single `(≈ $x / €y)` fragment appended inside the price element.
    Inline,
}

/// A source amount converted into one destination currency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Conversion {
    pub currency: Currency,
    pub amount: f64,
}

pub fn block_lines(conversions: &[Conversion]) -> Vec<String> {
    conversions
        .iter()
        .map(|c| {
            format!(
                "{APPROX} {} {}",
                format_currency(c.amount, c.currency.code()),
                c.currency
            )
        })
        .collect()
}

pub fn inline_text(conversions: &[Conversion]) -> String {
    let amounts: Vec<String> = conversions
        .iter()
        .map(|c| format_currency(c.amount, c.currency.code()))
        .collect();
    format!(" ({APPROX} {})", amounts.join(" / "))
}

pub fn is_marked(doc: &Document, id: NodeId) -> bool {
    doc.attr(id, PROCESSED_ATTR) == Some("true")
}

pub fn is_annotation(doc: &Document, id: NodeId) -> bool {
    doc.has_class(id, ANNOTATION_CLASS)
}

/// Inserts the annotation for `element` and marks it, returning the new node.
///
/// Nothing is changed when insertion fails.
pub fn render(
    doc: &mut Document,
    element: NodeId,
    mode: RenderMode,
    conversions: &[Conversion],
) -> Result<NodeId> {
    let annotation = match mode {
        RenderMode::Block => doc.create_element("div"),
        RenderMode::Inline => doc.create_element("span"),
    };
    let attached = build(doc, annotation, mode, conversions)
        .and_then(|()| match mode {
            RenderMode::Block => doc.insert_after(element, annotation),
            RenderMode::Inline => doc.append_child(element, annotation),
        })
        .and_then(|()| doc.set_attr(element, PROCESSED_ATTR, "true"));

    if let Err(e) = attached {
        doc.remove(annotation);
        return Err(e);
    }
    Ok(annotation)
}

fn build(
    doc: &mut Document,
    annotation: NodeId,
    mode: RenderMode,
    conversions: &[Conversion],
) -> Result<()> {
    match mode {
        RenderMode::Block => {
            doc.set_attr(annotation, "class", ANNOTATION_CLASS)?;
            doc.set_attr(annotation, "style", BLOCK_STYLE)?;
            for line in block_lines(conversions) {
                doc.append_element_with_text(annotation, "div", None, &line)?;
            }
        }
        RenderMode::Inline => {
            doc.set_attr(annotation, "class", &format!("{ANNOTATION_CLASS} {INLINE_CLASS}"))?;
            doc.set_attr(annotation, "style", INLINE_STYLE)?;
            let text = doc.create_text(&inline_text(conversions));
            doc.append_child(annotation, text)?;
        }
    }
    Ok(())
}

/// Removes every annotation, releasing its nodes, and clears every marker.
/// Returns how many annotations were removed.
pub fn remove_all(doc: &mut Document) -> usize {
    let root = doc.root();
    let nodes = doc.descendants(root);

    let annotations: Vec<NodeId> = nodes
        .iter()
        .copied()
        .filter(|&id| is_annotation(doc, id))
        .collect();
    // Nested annotations go away with their parent
    let outermost: Vec<NodeId> = annotations
        .into_iter()
        .filter(|&id| doc.ancestors(id).iter().all(|&a| !is_annotation(doc, a)))
        .collect();
    let removed = outermost.len();
    for id in outermost {
        doc.remove(id);
    }

    let mut cleared = 0;
    for id in nodes {
        if doc.remove_attr(id, PROCESSED_ATTR) {
            cleared += 1;
        }
    }

    debug!(removed, cleared, "Removed annotations");
    removed
}
