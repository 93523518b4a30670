use crate::document::{Document, Node};
use crate::error::{Error, Result};

#[derive(Debug)]
pub(crate) struct ElementData {
    full_name: String,
    attributes: Vec<(String, String)>, // q:attr="val" => ("q:attr", "val"), xmlns declarations included
    parent: Option<Element>,
    children: Vec<Node>,
}

/// Represents an Xml Element.
///
/// This struct only contains a unique usize id and implements trait `Copy`.
/// So you do not need to bother with having a reference.
///
/// Because the actual data of the element is stored in [`Document`],
/// most methods takes `&Document` or `&mut Document` as its first argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Element {
    id: usize,
}

impl Element {
    /// Create a new empty element with name.
    pub fn new<S: Into<String>>(document: &mut Document, name: S) -> Element {
        Self::with_attributes(document, name.into(), Vec::new())
    }

    pub(crate) fn with_attributes(
        document: &mut Document,
        full_name: String,
        attributes: Vec<(String, String)>,
    ) -> Element {
        let elem = Element {
            id: document.store.len(),
        };
        document.store.push(ElementData {
            full_name,
            attributes,
            parent: None,
            children: vec![],
        });
        elem
    }

    pub(crate) fn container() -> (Element, ElementData) {
        let elem_data = ElementData {
            full_name: String::new(),
            attributes: Vec::new(),
            parent: None,
            children: Vec::new(),
        };
        (Element { id: 0 }, elem_data)
    }

    /// The invisible element holding the top-level nodes of a document.
    pub fn is_container(&self) -> bool {
        self.id == 0
    }

    /// `"prefix:name"` -> `("prefix", "name")`, `"name"` -> `("", "name")`
    pub fn separate_prefix_name(full_name: &str) -> (&str, &str) {
        match full_name.split_once(':') {
            Some((prefix, name)) => (prefix, name),
            None => ("", full_name),
        }
    }
}

impl Element {
    fn data<'a>(&self, document: &'a Document) -> &'a ElementData {
        &document.store[self.id]
    }

    fn mut_data<'a>(&self, document: &'a mut Document) -> &'a mut ElementData {
        &mut document.store[self.id]
    }

    /// Get raw name of element, including its namespace prefix.
    pub fn full_name<'a>(&self, document: &'a Document) -> &'a str {
        &self.data(document).full_name
    }

    /// Get prefix and name of element.
    ///
    /// `<prefix:name` -> `("prefix", "name")`
    pub fn prefix_name<'a>(&self, document: &'a Document) -> (&'a str, &'a str) {
        Self::separate_prefix_name(self.full_name(document))
    }

    pub fn prefix<'a>(&self, document: &'a Document) -> &'a str {
        self.prefix_name(document).0
    }

    /// Name without namespace prefix. `<ns:Foo>` -> `"Foo"`.
    pub fn local_name<'a>(&self, document: &'a Document) -> &'a str {
        self.prefix_name(document).1
    }

    /// Attributes in document order, namespace declarations included.
    pub fn attributes<'a>(&self, document: &'a Document) -> &'a [(String, String)] {
        &self.data(document).attributes
    }

    pub fn attribute<'a>(&self, document: &'a Document, name: &str) -> Option<&'a str> {
        self.attributes(document)
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// `xmlns="uri"` -> `("", "uri")`, `xmlns:p="uri"` -> `("p", "uri")`.
    pub fn namespace_decls<'a>(
        &self,
        document: &'a Document,
    ) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.attributes(document).iter().filter_map(|(key, value)| {
            if key == "xmlns" {
                Some(("", value.as_str()))
            } else {
                key.strip_prefix("xmlns:")
                    .map(|prefix| (prefix, value.as_str()))
            }
        })
    }

    /// Gets the namespace of this element.
    ///
    /// Shorthand for `self.namespace_for_prefix(document, self.prefix(document))`.
    pub fn namespace<'a>(&self, document: &'a Document) -> Option<&'a str> {
        self.namespace_for_prefix(document, self.prefix(document))
    }

    /// Get namespace value given prefix, for this element.
    pub fn namespace_for_prefix<'a>(
        &self,
        document: &'a Document,
        prefix: &str,
    ) -> Option<&'a str> {
        let mut elem = *self;
        loop {
            let found = elem
                .namespace_decls(document)
                .find(|(decl_prefix, _)| *decl_prefix == prefix);
            if let Some((_, uri)) = found {
                return Some(uri);
            }
            elem = elem.parent(document)?;
        }
    }

    pub fn parent(&self, document: &Document) -> Option<Element> {
        self.data(document).parent
    }

    pub fn children<'a>(&self, document: &'a Document) -> &'a Vec<Node> {
        &self.data(document).children
    }

    pub fn has_children(&self, document: &Document) -> bool {
        !self.children(document).is_empty()
    }

    pub fn child_elements(&self, document: &Document) -> Vec<Element> {
        self.children(document)
            .iter()
            .filter_map(|node| node.as_element())
            .collect()
    }

    /// All descendant elements in document order, not including `self`.
    pub fn child_elements_recursive(&self, document: &Document) -> Vec<Element> {
        let mut elements = Vec::new();
        let mut stack: Vec<Element> = self.child_elements(document);
        stack.reverse();
        while let Some(elem) = stack.pop() {
            elements.push(elem);
            let mut children = elem.child_elements(document);
            children.reverse();
            stack.extend(children);
        }
        elements
    }

    /// Equivalent to `vec.push()`.
    ///
    /// # Errors
    ///
    /// - [`Error::HasAParent`]: If node is an element, it must not have a parent.
    /// - [`Error::ContainerCannotMove`]: The container can't be a child.
    pub fn push_child(&self, document: &mut Document, node: Node) -> Result<()> {
        if let Node::Element(elem) = node {
            if elem.is_container() {
                return Err(Error::ContainerCannotMove);
            }
            let data = elem.mut_data(document);
            if data.parent.is_some() {
                return Err(Error::HasAParent);
            }
            data.parent = Some(*self);
        }
        self.mut_data(document).children.push(node);
        Ok(())
    }

    /// Concatenated text of every descendant text and CDATA node.
    pub fn text_content(&self, document: &Document) -> String {
        let mut buf = String::new();
        self.build_text_content(document, &mut buf);
        buf
    }

    pub(crate) fn build_text_content(&self, document: &Document, buf: &mut String) {
        for node in self.children(document) {
            node.build_text_content(document, buf);
        }
    }

    /// Text before the first non-text child, like `.text` of ElementTree.
    /// `None` when the element starts with markup or has no children.
    pub fn text(&self, document: &Document) -> Option<String> {
        let run = self.leading_text_len(document);
        if run == 0 {
            return None;
        }
        let mut buf = String::new();
        for node in &self.children(document)[..run] {
            match node {
                Node::Text(text) | Node::CData(text) | Node::Unparsed(text) => buf.push_str(text),
                _ => {}
            }
        }
        Some(buf)
    }

    /// Replaces the direct text of this element.
    ///
    /// Child elements, attributes and the text following this element in its
    /// parent are left alone.
    pub fn set_text(&self, document: &mut Document, text: &str) {
        let run = self.leading_text_len(document);
        let children = &mut self.mut_data(document).children;
        children.drain(..run);
        if !text.is_empty() || children.is_empty() {
            children.insert(0, Node::Text(text.to_string()));
        }
    }

    fn leading_text_len(&self, document: &Document) -> usize {
        self.children(document)
            .iter()
            .take_while(|node| matches!(node, Node::Text(_) | Node::CData(_) | Node::Unparsed(_)))
            .count()
    }
}
