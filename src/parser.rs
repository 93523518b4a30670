use crate::document::{Document, Node};
use crate::element::Element;
use crate::encoding;
use crate::error::{Error, Result};
use quick_xml::events::{BytesDecl, BytesStart, BytesText, Event};
use quick_xml::Reader;

/// Options when parsing xml.
///
/// `recover`: tolerate mismatched or stray end tags, duplicate attributes,
/// unknown entities and undecodable bytes instead of failing.
///
/// `require_decl`: fail if the document doesn't start with an XML declaration.
///
/// `empty_text_node`: <tag></tag> will have a Node::Text("") as its children, while <tag /> won't.
///
/// `max_depth`: fail on elements nested deeper than this, even when recovering.
/// The root element is at depth 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOptions {
    pub recover: bool,
    pub require_decl: bool,
    pub empty_text_node: bool,
    pub max_depth: usize,
}

/// Same nesting limit as libxml2 without `XML_PARSE_HUGE`.
pub const DEFAULT_MAX_DEPTH: usize = 256;

impl Default for ReadOptions {
    fn default() -> ReadOptions {
        ReadOptions {
            recover: false,
            require_decl: false,
            empty_text_node: true,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

pub(crate) struct DocumentParser {
    document: Document,
    read_opts: ReadOptions,
    element_stack: Vec<Element>,
    root_seen: bool,
}

impl DocumentParser {
    fn new(opts: ReadOptions) -> DocumentParser {
        let document = Document::new();
        let container = document.container();
        DocumentParser {
            document,
            read_opts: opts,
            element_stack: vec![container],
            root_seen: false,
        }
    }

    pub(crate) fn parse_bytes(bytes: &[u8], opts: ReadOptions) -> Result<Document> {
        let (encoding, text) = encoding::decode(bytes, opts.recover)?;
        let mut document = Self::parse_text(&text, opts)?;
        document.source_encoding = encoding;
        Ok(document)
    }

    pub(crate) fn parse_text(text: &str, opts: ReadOptions) -> Result<Document> {
        let mut parser = DocumentParser::new(opts);
        parser.parse_content(text)?;
        parser.finish(text)?;
        Ok(parser.document)
    }

    fn parse_content(&mut self, text: &str) -> Result<()> {
        let mut reader = Reader::from_str(text);
        reader.trim_text(false);
        reader.check_end_names(!self.read_opts.recover);

        let mut buf = Vec::with_capacity(200); // reduce time increasing capacity at start.
        loop {
            let ev = reader.read_event(&mut buf)?;
            log::trace!("{:?}", ev);
            if self.handle_event(ev)? {
                return Ok(());
            }
            buf.clear();
        }
    }

    fn current(&self) -> Element {
        self.element_stack
            .last()
            .copied()
            .unwrap_or_else(|| self.document.container())
    }

    fn push_node(&mut self, node: Node) -> Result<()> {
        let parent = self.current();
        parent.push_child(&mut self.document, node)
    }

    // Returns if document parsing is finished.
    fn handle_event(&mut self, event: Event) -> Result<bool> {
        match event {
            Event::Start(ref ev) => {
                let element = self.handle_bytes_start(ev)?;
                self.element_stack.push(element);
            }
            Event::Empty(ref ev) => {
                self.handle_bytes_start(ev)?;
            }
            Event::End(ref ev) => {
                let name = String::from_utf8(ev.name().to_vec())?;
                self.handle_end(&name)?;
            }
            Event::Text(ref ev) => self.handle_text(ev)?,
            Event::DocType(ev) => {
                let content = String::from_utf8(ev.to_vec())?;
                self.push_node(Node::DocType(content))?;
            }
            // Comment, CData, and PI content is not escaped.
            Event::Comment(ev) => {
                let content = String::from_utf8(ev.to_vec())?;
                self.push_node(Node::Comment(content))?;
            }
            Event::CData(ev) => {
                let content = String::from_utf8(ev.to_vec())?;
                self.push_node(Node::CData(content))?;
            }
            Event::PI(ev) => {
                let content = String::from_utf8(ev.to_vec())?;
                self.push_node(Node::PI(content))?;
            }
            Event::Decl(ref ev) => self.handle_decl(ev)?,
            Event::Eof => return Ok(true),
        }
        Ok(false)
    }

    fn handle_decl(&mut self, ev: &BytesDecl) -> Result<()> {
        if self.document.has_decl() || !self.document.is_empty() {
            if self.read_opts.recover {
                log::warn!("ignoring misplaced XML declaration");
                return Ok(());
            }
            return Err(Error::MalformedXML(
                "XML declaration is only allowed at the start of the document".to_string(),
            ));
        }
        self.document.version = Some(String::from_utf8(ev.version()?.to_vec())?);
        self.document.encoding = match ev.encoding() {
            Some(res) => Some(String::from_utf8(res?.to_vec())?),
            None => None,
        };
        self.document.standalone = match ev.standalone() {
            Some(res) => {
                let val = String::from_utf8(res?.to_vec())?;
                let lowered = val.to_lowercase();
                if lowered != "yes" && lowered != "no" && !self.read_opts.recover {
                    return Err(Error::MalformedXML(
                        "Standalone Document Declaration has non boolean value".to_string(),
                    ));
                }
                Some(val)
            }
            None => None,
        };
        Ok(())
    }

    fn handle_bytes_start(&mut self, ev: &BytesStart) -> Result<Element> {
        let recover = self.read_opts.recover;
        let full_name = String::from_utf8(ev.name().to_vec())?;
        // the stack holds the container, so its length is the new element's depth
        if self.element_stack.len() > self.read_opts.max_depth {
            return Err(Error::MalformedXML(format!(
                "<{}> is nested deeper than {} elements",
                full_name, self.read_opts.max_depth
            )));
        }
        if self.element_stack.len() == 1 {
            if self.root_seen && !recover {
                return Err(Error::MalformedXML(format!(
                    "Only one root element is allowed, found <{}>",
                    full_name
                )));
            }
            self.root_seen = true;
        }

        let mut attributes: Vec<(String, String)> = Vec::new();
        let mut attrs = ev.attributes();
        attrs.with_checks(!recover);
        for attr in attrs {
            let attr = attr?;
            let key = String::from_utf8(attr.key.to_vec())?;
            let value = match attr.unescaped_value() {
                Ok(value) => String::from_utf8(value.to_vec())?,
                Err(_) if recover => String::from_utf8(attr.value.to_vec())?,
                Err(err) => return Err(err.into()),
            };
            if recover && attributes.iter().any(|(k, _)| *k == key) {
                continue;
            }
            attributes.push((key, value));
        }

        let element = Element::with_attributes(&mut self.document, full_name, attributes);
        self.push_node(Node::Element(element))?;
        Ok(element)
    }

    fn handle_end(&mut self, name: &str) -> Result<()> {
        if self.element_stack.len() == 1 {
            if self.read_opts.recover {
                log::warn!("ignoring stray closing tag </{}>", name);
                return Ok(());
            }
            return Err(Error::MalformedXML(format!(
                "Closing tag </{}> has no opening tag",
                name
            )));
        }
        if !self.read_opts.recover {
            // quick-xml checks if tag names match for us
            if let Some(elem) = self.element_stack.pop() {
                self.close_element(elem);
            }
            return Ok(());
        }

        let doc = &self.document;
        let matching = self.element_stack[1..]
            .iter()
            .rposition(|elem| elem.full_name(doc) == name);
        match matching {
            Some(pos) => {
                let depth = pos + 1;
                while self.element_stack.len() > depth + 1 {
                    if let Some(unclosed) = self.element_stack.pop() {
                        log::warn!(
                            "closing <{}> implicitly at </{}>",
                            unclosed.full_name(&self.document),
                            name
                        );
                    }
                }
                if let Some(elem) = self.element_stack.pop() {
                    self.close_element(elem);
                }
            }
            None => log::warn!("ignoring mismatched closing tag </{}>", name),
        }
        Ok(())
    }

    fn close_element(&mut self, elem: Element) {
        // distinguish <tag></tag> and <tag />
        if self.read_opts.empty_text_node && !elem.has_children(&self.document) {
            let _ = elem.push_child(&mut self.document, Node::Text(String::new()));
        }
    }

    fn handle_text(&mut self, ev: &BytesText) -> Result<()> {
        if ev.is_empty() {
            return Ok(());
        }
        let node = match ev.unescaped() {
            Ok(text) => Node::Text(String::from_utf8(text.to_vec())?),
            Err(_) if self.read_opts.recover => Node::Unparsed(String::from_utf8(ev.to_vec())?),
            Err(err) => return Err(err.into()),
        };
        if self.element_stack.len() == 1 && !self.read_opts.recover {
            if let Node::Text(text) = &node {
                if !text.trim().is_empty() {
                    return Err(Error::MalformedXML(
                        "Text is not allowed outside of the root element".to_string(),
                    ));
                }
            }
        }
        self.push_node(node)
    }

    fn finish(&mut self, text: &str) -> Result<()> {
        if self.element_stack.len() > 1 {
            let open = self.current().full_name(&self.document).to_string();
            // A document cut off inside markup is not recoverable.
            if self.read_opts.recover && text.trim_end().ends_with('>') {
                log::warn!(
                    "closing {} unclosed element(s) at end of document",
                    self.element_stack.len() - 1
                );
                self.element_stack.truncate(1);
            } else {
                return Err(Error::MalformedXML(format!(
                    "Unexpected end of document, <{}> is not closed",
                    open
                )));
            }
        }
        if self.document.root_element().is_none() {
            return Err(Error::MalformedXML(
                "Document has no root element".to_string(),
            ));
        }
        if self.read_opts.require_decl && !self.document.has_decl() {
            return Err(Error::MalformedXML(
                "Didn't find XML Declaration at the start of file".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recovering() -> ReadOptions {
        ReadOptions {
            recover: true,
            ..ReadOptions::default()
        }
    }

    #[test]
    fn test_empty_text_node() {
        let doc = Document::parse_str("<r><a></a><b/></r>").unwrap();
        let root = doc.root_element().unwrap();
        let elems = root.child_elements(&doc);
        assert_eq!(elems[0].children(&doc), &vec![Node::Text(String::new())]);
        assert!(elems[1].children(&doc).is_empty());

        let opts = ReadOptions {
            empty_text_node: false,
            ..ReadOptions::default()
        };
        let doc = Document::parse_str_with_opts("<r><a></a></r>", opts).unwrap();
        let a = doc.root_element().unwrap().child_elements(&doc)[0];
        assert!(a.children(&doc).is_empty());
    }

    #[test]
    fn test_strict_rejects_mismatch_and_recover_closes() {
        let xml = "<root><a><b>text</a></root>";
        assert!(matches!(
            Document::parse_str(xml).unwrap_err(),
            Error::MalformedXML(_)
        ));

        let doc = Document::parse_str_with_opts(xml, recovering()).unwrap();
        let root = doc.root_element().unwrap();
        let a = root.child_elements(&doc)[0];
        let b = a.child_elements(&doc)[0];
        assert_eq!(b.text(&doc).as_deref(), Some("text"));
        assert_eq!(root.child_elements(&doc).len(), 1);
    }

    #[test]
    fn test_recover_ignores_stray_end_tag() {
        let xml = "<root><a>x</a></zzz></root>";
        assert!(Document::parse_str(xml).is_err());
        let doc = Document::parse_str_with_opts(xml, recovering()).unwrap();
        assert_eq!(doc.write_str().unwrap(), "<root><a>x</a></root>");
    }

    #[test]
    fn test_unknown_entity() {
        let xml = "<root>a&nbsp;b</root>";
        assert!(Document::parse_str(xml).is_err());
        let doc = Document::parse_str_with_opts(xml, recovering()).unwrap();
        assert_eq!(doc.write_str().unwrap(), xml);
    }

    #[test]
    fn test_unclosed_at_end() {
        let xml = "<root><a>x</a>";
        assert!(Document::parse_str(xml).is_err());
        let doc = Document::parse_str_with_opts(xml, recovering()).unwrap();
        assert_eq!(doc.write_str().unwrap(), "<root><a>x</a></root>");

        // cut off inside markup
        assert!(Document::parse_str_with_opts("<root><", recovering()).is_err());
        assert!(Document::parse_str_with_opts("<root><a>tex", recovering()).is_err());
    }

    #[test]
    fn test_max_depth() {
        let opts = ReadOptions {
            max_depth: 3,
            ..ReadOptions::default()
        };
        let doc = Document::parse_str_with_opts("<a><b><c/></b></a>", opts.clone()).unwrap();
        assert_eq!(doc.write_str().unwrap(), "<a><b><c/></b></a>");
        let err = Document::parse_str_with_opts("<a><b><c><d/></c></b></a>", opts.clone());
        assert!(matches!(err, Err(Error::MalformedXML(_))));

        let opts = ReadOptions {
            recover: true,
            ..opts
        };
        assert!(Document::parse_str_with_opts("<a><b><c><d></d></c></b></a>", opts).is_err());
    }

    #[test]
    fn test_default_depth_limit() {
        let nested = |depth: usize| "<a>".repeat(depth) + &"</a>".repeat(depth);
        assert!(Document::parse_str(&nested(DEFAULT_MAX_DEPTH)).is_ok());
        assert!(Document::parse_str(&nested(DEFAULT_MAX_DEPTH + 1)).is_err());
        assert!(Document::parse_lenient(nested(100_000).as_bytes()).is_err());
    }

    #[test]
    fn test_multiple_roots() {
        let xml = "<a/><b/>";
        assert!(Document::parse_str(xml).is_err());
        let doc = Document::parse_str_with_opts(xml, recovering()).unwrap();
        assert_eq!(doc.container().child_elements(&doc).len(), 2);
    }

    #[test]
    fn test_no_root() {
        assert!(Document::parse_str("").is_err());
        assert!(Document::parse_str_with_opts("<!-- only -->", recovering()).is_err());
        assert!(Document::parse_str("just text").is_err());
    }

    #[test]
    fn test_require_decl() {
        let opts = ReadOptions {
            require_decl: true,
            ..ReadOptions::default()
        };
        assert!(Document::parse_str_with_opts("<a/>", opts.clone()).is_err());
        assert!(Document::parse_str_with_opts("<?xml version=\"1.0\"?><a/>", opts).is_ok());
    }

    #[test]
    fn test_misplaced_decl() {
        let xml = "<a/><?xml version=\"1.0\"?>";
        assert!(Document::parse_str(xml).is_err());
    }

    #[test]
    fn test_duplicate_attribute() {
        let xml = r#"<a x="1" x="2"/>"#;
        assert!(Document::parse_str(xml).is_err());
        let doc = Document::parse_str_with_opts(xml, recovering()).unwrap();
        let a = doc.root_element().unwrap();
        assert_eq!(a.attribute(&doc, "x"), Some("1"));
    }

    #[test]
    fn test_parse_bytes_legacy_encoding() {
        let mut bytes = b"<?xml version='1.0' encoding='windows-1251'?><a>".to_vec();
        bytes.extend_from_slice(&[0xcf, 0xf0, 0xe8, 0xe2, 0xe5, 0xf2]);
        bytes.extend_from_slice(b"</a>");
        let doc = Document::parse_bytes(&bytes, ReadOptions::default()).unwrap();
        let a = doc.root_element().unwrap();
        assert_eq!(a.text(&doc).as_deref(), Some("Привет"));
        assert_eq!(doc.encoding(), Some("windows-1251"));
    }
}
