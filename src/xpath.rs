//! XPath 1.0 selection over a [`Document`].
//!
//! The tree is mirrored into an `sxd-document` package for evaluation and
//! every mirrored element remembers the [`Element`] it came from.

use crate::document::{Document, Node};
use crate::element::Element;
use crate::error::{Error, Result};
use std::collections::HashMap;
use sxd_document::dom;
use sxd_document::{Package, QName};
use sxd_xpath::nodeset::Node as XNode;
use sxd_xpath::{Context, Factory, Value};

const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// Evaluates `expr` with the root element as context node and returns the
/// matched elements in document order.
///
/// Results that are not a node-set, and nodes that are not elements, are
/// dropped without error.
///
/// # Errors
///
/// - [`Error::XPath`]: The expression doesn't compile or fails to evaluate.
pub fn select_elements(document: &Document, expr: &str) -> Result<Vec<Element>> {
    let xpath = Factory::new()
        .build(expr)
        .map_err(|err| Error::XPath(err.to_string()))?
        .ok_or_else(|| Error::XPath("empty XPath expression".to_string()))?;
    let root = document
        .root_element()
        .ok_or_else(|| Error::XPath("document has no root element".to_string()))?;

    let package = Package::new();
    let sxd = package.as_document();
    let mut mirror = Mirror {
        document,
        sxd: &sxd,
        links: HashMap::new(),
        prefixes: Vec::new(),
    };
    let sxd_root = mirror.element(root);
    sxd.root().append_child(sxd_root);

    let mut context = Context::new();
    for (prefix, uri) in &mirror.prefixes {
        context.set_namespace(prefix, uri);
    }

    let value = xpath
        .evaluate(&context, sxd_root)
        .map_err(|err| Error::XPath(err.to_string()))?;
    let elements = match value {
        Value::Nodeset(nodes) => nodes
            .document_order()
            .into_iter()
            .filter_map(|node| mirror.links.get(&node).copied())
            .collect(),
        other => {
            log::debug!("xpath '{}' returned a non node-set value {:?}", expr, other);
            Vec::new()
        }
    };
    Ok(elements)
}

struct Mirror<'a, 'd> {
    document: &'a Document,
    sxd: &'a dom::Document<'d>,
    links: HashMap<XNode<'d>, Element>,
    // first binding of each prefix, registered with the evaluation context
    prefixes: Vec<(String, String)>,
}

impl<'a, 'd> Mirror<'a, 'd> {
    fn element(&mut self, element: Element) -> dom::Element<'d> {
        let doc = self.document;
        let (prefix, local) = element.prefix_name(doc);
        let uri = self.resolve(element, prefix, true);
        let sxd_element = self
            .sxd
            .create_element(QName::with_namespace_uri(uri.as_deref(), local));

        for (key, value) in element.attributes(doc) {
            if key == "xmlns" || key.starts_with("xmlns:") {
                continue;
            }
            let (prefix, local) = Element::separate_prefix_name(key);
            if prefix.is_empty() {
                sxd_element.set_attribute_value(local, value);
            } else {
                let uri = self.resolve(element, prefix, false);
                sxd_element
                    .set_attribute_value(QName::with_namespace_uri(uri.as_deref(), local), value);
            }
        }

        for node in element.children(doc) {
            match node {
                Node::Element(child) => {
                    let child = self.element(*child);
                    sxd_element.append_child(child);
                }
                Node::Text(text) | Node::CData(text) | Node::Unparsed(text) => {
                    sxd_element.append_child(self.sxd.create_text(text));
                }
                Node::Comment(text) => {
                    sxd_element.append_child(self.sxd.create_comment(text));
                }
                Node::PI(content) => {
                    let (target, value) = match content.split_once(char::is_whitespace) {
                        Some((target, value)) => (target, Some(value.trim_start())),
                        None => (content.as_str(), None),
                    };
                    sxd_element
                        .append_child(self.sxd.create_processing_instruction(target, value));
                }
                Node::DocType(_) => {}
            }
        }

        self.links.insert(XNode::from(sxd_element), element);
        sxd_element
    }

    // Namespace URI for a prefix in scope of `element`. Unprefixed attributes
    // never take the default namespace; undeclared prefixes get a stand-in
    // URI so they can still be addressed as `prefix:name`.
    fn resolve(&mut self, element: Element, prefix: &str, is_element: bool) -> Option<String> {
        if prefix.is_empty() {
            if !is_element {
                return None;
            }
            return element
                .namespace_for_prefix(self.document, "")
                .filter(|uri| !uri.is_empty())
                .map(str::to_string);
        }
        let uri = match prefix {
            "xml" => XML_NAMESPACE.to_string(),
            _ => match element.namespace_for_prefix(self.document, prefix) {
                Some(uri) => uri.to_string(),
                None => format!("urn:unbound:{}", prefix),
            },
        };
        if !self.prefixes.iter().any(|(known, _)| known == prefix) {
            self.prefixes.push((prefix.to_string(), uri.clone()));
        }
        Some(uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(doc: &Document, elements: &[Element]) -> Vec<String> {
        elements
            .iter()
            .map(|e| e.full_name(doc).to_string())
            .collect()
    }

    #[test]
    fn test_select_absolute_and_relative() {
        let doc = Document::parse_str("<root><a><b>1</b></a><b>2</b></root>").unwrap();
        let found = select_elements(&doc, "//b").unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].text(&doc).as_deref(), Some("1"));

        let found = select_elements(&doc, "/root/b").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].text(&doc).as_deref(), Some("2"));

        let found = select_elements(&doc, "a/b").unwrap();
        assert_eq!(found[0].text(&doc).as_deref(), Some("1"));
    }

    #[test]
    fn test_predicates_and_attributes() {
        let doc =
            Document::parse_str(r#"<r><i id="1">a</i><i id="2">b</i><i id="3">c</i></r>"#).unwrap();
        let found = select_elements(&doc, "//i[@id='2' or text()='c']").unwrap();
        assert_eq!(
            found.iter().map(|e| e.text(&doc).unwrap()).collect::<Vec<_>>(),
            vec!["b", "c"]
        );
    }

    #[test]
    fn test_non_element_results_are_dropped() {
        let doc = Document::parse_str(r#"<r a="1"><i>x</i></r>"#).unwrap();
        assert!(select_elements(&doc, "//@a").unwrap().is_empty());
        assert!(select_elements(&doc, "//i/text()").unwrap().is_empty());
        assert!(select_elements(&doc, "count(//i)").unwrap().is_empty());
        assert!(select_elements(&doc, "string(//i)").unwrap().is_empty());
    }

    #[test]
    fn test_invalid_expression() {
        let doc = Document::parse_str("<r/>").unwrap();
        assert!(matches!(
            select_elements(&doc, "//i[").unwrap_err(),
            Error::XPath(_)
        ));
        assert!(select_elements(&doc, "").is_err());
        assert!(select_elements(&doc, "no-such-function()").is_err());
    }

    #[test]
    fn test_namespaces() {
        let xml = r#"<root xmlns:p="urn:p"><p:item>1</p:item><q:item>2</q:item><item>3</item></root>"#;
        let doc = Document::parse_str(xml).unwrap();

        let found = select_elements(&doc, "//p:item").unwrap();
        assert_eq!(names(&doc, &found), vec!["p:item"]);

        let found = select_elements(&doc, "//q:item").unwrap();
        assert_eq!(names(&doc, &found), vec!["q:item"]);

        let found = select_elements(&doc, "//*[local-name()='item']").unwrap();
        assert_eq!(names(&doc, &found), vec!["p:item", "q:item", "item"]);
    }

    #[test]
    fn test_default_namespace_needs_local_name() {
        let xml = r#"<root xmlns="urn:d"><item>1</item></root>"#;
        let doc = Document::parse_str(xml).unwrap();
        assert!(select_elements(&doc, "//item").unwrap().is_empty());
        assert_eq!(
            select_elements(&doc, "//*[local-name()='item']")
                .unwrap()
                .len(),
            1
        );
    }
}
