// Owned element tree handed from the loader to the walker

use roxmltree::Edge;
use std::path::Path;

use crate::error::AnalysisError;

/// Deepest element nesting [`Document::parse`] accepts, the root being 0
pub const MAX_NESTING: usize = 1024;

/// Child of an element: a nested element, a run of text or a comment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
    Comment(String),
}

/// An element with local names only; processing instructions and
/// whitespace-only text are dropped. Comments are kept as children, so
/// text split by a comment is not a leaf value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(Node::Element(child));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.push_text(&text.into());
        self
    }

    fn push_text(&mut self, text: &str) {
        if let Some(Node::Text(last)) = self.children.last_mut() {
            last.push_str(text);
        } else {
            self.children.push(Node::Text(text.to_string()));
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|child| match child {
            Node::Element(element) => Some(element),
            Node::Text(_) | Node::Comment(_) => None,
        })
    }

    /// First direct child element with the given name
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.elements().find(|element| element.name == name)
    }

    /// The value of a leaf: exactly one child, and that child is text
    pub fn leaf_text(&self) -> Option<&str> {
        match self.children.as_slice() {
            [Node::Text(text)] => Some(text),
            _ => None,
        }
    }

    /// Concatenated text of the whole subtree
    pub fn inner_text(&self) -> String {
        let mut text = String::new();
        self.collect_text(&mut text);
        text
    }

    fn collect_text(&self, into: &mut String) {
        for child in &self.children {
            match child {
                Node::Text(text) => into.push_str(text),
                Node::Element(element) => element.collect_text(into),
                Node::Comment(_) => {}
            }
        }
    }
}

/// A parsed definition document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub root: Element,
}

impl Document {
    pub fn parse(text: &str) -> Result<Self, AnalysisError> {
        Self::parse_with_limit(text, MAX_NESTING)
    }

    /// Parse, rejecting elements nested deeper than `limit` below the root
    /// before any owned tree is built
    pub fn parse_with_limit(text: &str, limit: usize) -> Result<Self, AnalysisError> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);

        let mut options = roxmltree::ParsingOptions::default();
        options.allow_dtd = true;

        let document = roxmltree::Document::parse_with_options(text, options)?;
        let root = document.root_element();
        check_nesting(root, limit.min(MAX_NESTING))?;

        Ok(Self { root: convert(root) })
    }
}

fn check_nesting(root: roxmltree::Node<'_, '_>, limit: usize) -> Result<(), AnalysisError> {
    let mut depth = 0usize;
    for edge in root.traverse() {
        match edge {
            Edge::Open(node) if node.is_element() => {
                if depth > limit {
                    return Err(AnalysisError::DepthExceeded {
                        limit,
                        element: node.tag_name().name().to_string(),
                    });
                }
                depth += 1;
            }
            Edge::Close(node) if node.is_element() => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    Ok(())
}

fn convert(node: roxmltree::Node<'_, '_>) -> Element {
    let mut element = Element::new(node.tag_name().name());
    element.attributes = node
        .attributes()
        .map(|attribute| (attribute.name().to_string(), attribute.value().to_string()))
        .collect();

    for child in node.children() {
        if child.is_element() {
            element.children.push(Node::Element(convert(child)));
        } else if child.is_text() {
            match child.text() {
                Some(text) if !text.trim().is_empty() => element.push_text(text),
                _ => {}
            }
        } else if child.is_comment() {
            let text = child.text().unwrap_or_default();
            element.children.push(Node::Comment(text.to_string()));
        }
    }

    element
}

/// A document read from disk, with the hash of its raw contents
#[derive(Debug)]
pub struct LoadedDocument {
    pub document: Document,
    pub content_hash: String,
}

/// Read and parse a file; parsing runs on the blocking pool.
///
/// `limit` bounds element nesting below the root, see
/// [`Document::parse_with_limit`].
pub async fn load(path: &Path, limit: usize) -> Result<LoadedDocument, AnalysisError> {
    let text = tokio::fs::read_to_string(path).await?;
    let content_hash = blake3::hash(text.as_bytes()).to_string();

    let document = tokio::task::spawn_blocking(move || Document::parse_with_limit(&text, limit))
        .await
        .map_err(|e| AnalysisError::Parse { message: e.to_string() })??;

    Ok(LoadedDocument { document, content_hash })
}
