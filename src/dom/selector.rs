//! A small CSS selector subset: compound selectors (`tag`, `.class`, `#id`)
//! joined by the descendant combinator.

use super::{Document, NodeId};
use anyhow::{Result, anyhow, bail};
use std::fmt::Display;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
}

impl Compound {
    fn parse(token: &str) -> Result<Self> {
        let mut compound = Compound::default();
        let mut rest = token;

        let tag_end = rest.find(['.', '#']).unwrap_or(rest.len());
        let tag = &rest[..tag_end];
        if !tag.is_empty() && tag != "*" {
            if !tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
                bail!("Invalid tag name in selector: {}", tag);
            }
            compound.tag = Some(tag.to_ascii_lowercase());
        }
        rest = &rest[tag_end..];

        while let Some(marker) = rest.chars().next() {
            let body = &rest[1..];
            let end = body.find(['.', '#']).unwrap_or(body.len());
            let name = &body[..end];
            if name.is_empty() {
                bail!("Empty name after '{}' in selector: {}", marker, token);
            }
            match marker {
                '.' => compound.classes.push(name.to_string()),
                '#' => compound.id = Some(name.to_string()),
                _ => unreachable!("split on '.' and '#' only"),
            }
            rest = &body[end..];
        }

        Ok(compound)
    }

    fn matches(&self, doc: &Document, node: NodeId) -> bool {
        let Some(tag) = doc.tag(node) else {
            return false;
        };
        if self.tag.as_deref().is_some_and(|t| t != tag) {
            return false;
        }
        if self
            .id
            .as_deref()
            .is_some_and(|id| doc.attr(node, "id") != Some(id))
        {
            return false;
        }
        self.classes.iter().all(|class| doc.has_class(node, class))
    }
}

impl Display for Compound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(tag) = &self.tag {
            write!(f, "{tag}")?;
        } else if self.id.is_none() && self.classes.is_empty() {
            write!(f, "*")?;
        }
        if let Some(id) = &self.id {
            write!(f, "#{id}")?;
        }
        for class in &self.classes {
            write!(f, ".{class}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    // Outermost first
    parts: Vec<Compound>,
}

impl FromStr for Selector {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .split_ascii_whitespace()
            .map(Compound::parse)
            .collect::<Result<Vec<_>>>()?;
        if parts.is_empty() {
            return Err(anyhow!("Empty selector"));
        }
        Ok(Selector { parts })
    }
}

impl Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.parts.iter().map(|p| p.to_string()).collect();
        write!(f, "{}", parts.join(" "))
    }
}

impl Selector {
    pub fn matches(&self, doc: &Document, node: NodeId) -> bool {
        let Some((last, outer)) = self.parts.split_last() else {
            return false;
        };
        if !last.matches(doc, node) {
            return false;
        }

        // Greedy right-to-left walk is exact for descendant-only chains
        let mut remaining = outer.iter().rev().peekable();
        for ancestor in doc.ancestors(node) {
            match remaining.peek() {
                Some(part) if part.matches(doc, ancestor) => {
                    remaining.next();
                }
                Some(_) => {}
                None => break,
            }
        }
        remaining.peek().is_none()
    }

    /// Matching elements at or below `scope`, in document order.
    pub fn select_all(&self, doc: &Document, scope: NodeId) -> Vec<NodeId> {
        doc.descendants(scope)
            .into_iter()
            .filter(|&id| self.matches(doc, id))
            .collect()
    }

    /// Nearest element among `node` and its ancestors that matches.
    pub fn closest(&self, doc: &Document, node: NodeId) -> Option<NodeId> {
        std::iter::once(node)
            .chain(doc.ancestors(node))
            .find(|&id| self.matches(doc, id))
    }
}
