//! Finds price-bearing elements through a fixed vocabulary of page structures.

use crate::annotate::parser::StripPolicy;
use crate::annotate::render::{self, RenderMode};
use crate::dom::{Document, NodeId, Selector};
use std::collections::HashSet;
use std::fmt::Display;

/// What a matched element represents on the listing page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The current bid shown at the top of a listing.
    MainBid,
    /// A price shown in listing tables and search results.
    ListedPrice,
    /// A fee (shipping, warehouse...) inside an itemized breakdown.
    LineItemFee,
}

impl Role {
    pub fn render_mode(&self) -> RenderMode {
        match self {
            Role::MainBid | Role::ListedPrice => RenderMode::Block,
            Role::LineItemFee => RenderMode::Inline,
        }
    }

    pub fn strip_policy(&self) -> StripPolicy {
        match self {
            Role::MainBid | Role::ListedPrice => StripPolicy::Numeric,
            Role::LineItemFee => StripPolicy::DigitsOnly,
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Role::MainBid => "main-bid",
                Role::ListedPrice => "listed-price",
                Role::LineItemFee => "line-item-fee",
            }
        )
    }
}

/// Restricts a rule to elements inside a row that mentions one of `keywords`.
#[derive(Debug, Clone)]
pub struct RowFilter {
    pub row: Selector,
    /// Lowercase keywords, matched as substrings of the row text.
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LocatorRule {
    pub role: Role,
    pub selector: Selector,
    pub row: Option<RowFilter>,
}

/// A matched element for one pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceCandidate {
    pub element: NodeId,
    pub role: Role,
    pub text: String,
}

/// Part of the document a pass looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Document,
    /// Roots of changed subtrees.
    Subtrees(Vec<NodeId>),
}

impl Scope {
    /// Combines two requested scopes into one covering both.
    pub fn merge(self, other: Scope) -> Scope {
        match (self, other) {
            (Scope::Document, _) | (_, Scope::Document) => Scope::Document,
            (Scope::Subtrees(mut roots), Scope::Subtrees(more)) => {
                for root in more {
                    if !roots.contains(&root) {
                        roots.push(root);
                    }
                }
                Scope::Subtrees(roots)
            }
        }
    }
}

pub struct PriceLocator {
    rules: Vec<LocatorRule>,
}

impl Default for PriceLocator {
    fn default() -> Self {
        Self::new(&["shipping", "warehouse", "handling"])
    }
}

impl PriceLocator {
    /// The built-in rules, in priority order, with the given fee keywords.
    pub fn new<S: AsRef<str>>(fee_keywords: &[S]) -> Self {
        let selector = |s: &str| -> Selector { s.parse().expect("built-in selector is valid") };
        let keywords = fee_keywords
            .iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();

        Self::with_rules(vec![
            LocatorRule {
                role: Role::MainBid,
                selector: selector("div.display.current-bid.notranslate"),
                row: None,
            },
            LocatorRule {
                role: Role::ListedPrice,
                selector: selector("div.fr.notranslate"),
                row: None,
            },
            LocatorRule {
                role: Role::LineItemFee,
                selector: selector("span.notranslate"),
                row: Some(RowFilter {
                    row: selector("div.fee-breakdown li"),
                    keywords,
                }),
            },
        ])
    }

    pub fn with_rules(rules: Vec<LocatorRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[LocatorRule] {
        &self.rules
    }

    /// Candidates for `rule` within `scope`, in document order.
    ///
    /// For a subtree root, the root's ancestors are examined too, so a text
    /// change inside an existing price element brings that element back.
    pub fn locate(&self, doc: &Document, rule: &LocatorRule, scope: &Scope) -> Vec<PriceCandidate> {
        let elements: Vec<NodeId> = match scope {
            Scope::Document => doc.descendants(doc.root()),
            Scope::Subtrees(roots) => {
                let mut seen = HashSet::new();
                let mut out = Vec::new();
                for &root in roots {
                    let mut around = doc.ancestors(root);
                    around.reverse();
                    around.extend(doc.descendants(root));
                    out.extend(around.into_iter().filter(|id| seen.insert(*id)));
                }
                out
            }
        };

        elements
            .into_iter()
            .filter(|&id| rule.selector.matches(doc, id))
            .filter(|&id| !self.is_excluded(doc, id))
            .filter(|&id| rule.row.as_ref().is_none_or(|f| row_qualifies(doc, f, id)))
            .map(|id| PriceCandidate {
                element: id,
                role: rule.role,
                text: candidate_text(doc, id),
            })
            .collect()
    }

    /// True when `id` must not be annotated: it, an ancestor or a descendant is
    /// already marked, or it lies inside an annotation.
    pub fn is_excluded(&self, doc: &Document, id: NodeId) -> bool {
        if !doc.is_attached(id) {
            return true;
        }
        let above = std::iter::once(id).chain(doc.ancestors(id));
        for node in above {
            if render::is_marked(doc, node) || render::is_annotation(doc, node) {
                return true;
            }
        }
        doc.descendants(id)
            .into_iter()
            .any(|node| render::is_marked(doc, node))
    }
}

/// Text of `id` without any annotation text inside it.
pub fn candidate_text(doc: &Document, id: NodeId) -> String {
    doc.text_content_filtered(id, |node| render::is_annotation(doc, node))
}

fn row_qualifies(doc: &Document, filter: &RowFilter, id: NodeId) -> bool {
    let Some(row) = filter.row.closest(doc, id) else {
        return false;
    };
    let text = candidate_text(doc, row).to_lowercase();
    filter.keywords.iter().any(|k| text.contains(k.as_str()))
}
