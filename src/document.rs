use crate::element::{Element, ElementData};
use crate::encoding;
use crate::error::Result;
use crate::parser::{DocumentParser, ReadOptions};
use encoding_rs::{Encoding, UTF_8};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Write;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
    Comment(String),
    CData(String),
    PI(String),
    DocType(String),
    /// Text with entity references that could not be resolved.
    /// Only produced by a recovering parse, written back as is.
    Unparsed(String),
}

impl Node {
    pub fn as_element(&self) -> Option<Element> {
        match self {
            Self::Element(elem) => Some(*elem),
            _ => None,
        }
    }

    pub(crate) fn build_text_content(&self, document: &Document, buf: &mut String) {
        match self {
            Node::Element(elem) => elem.build_text_content(document, buf),
            Node::Text(text) | Node::CData(text) | Node::Unparsed(text) => buf.push_str(text),
            _ => {}
        }
    }

    /// Returns content if node is `Text` or `CData`.
    /// If node is `Element`, return [Element::text_content()]
    pub fn text_content(&self, document: &Document) -> String {
        let mut buf = String::new();
        self.build_text_content(document, &mut buf);
        buf
    }
}

/// Represents a XML document.
///
/// Use [`Document::parse_str()`], [`Document::parse_bytes()`] or
/// [`Document::parse_lenient()`] to parse xml.
///
/// # Examples
/// ```
/// use xml_batch_edit::Document;
///
/// let mut doc = Document::parse_str(r#"<?xml version="1.0" encoding="UTF-8"?>
/// <package>
///     <metadata>
///         <author>Lewis Carol</author>
///     </metadata>
/// </package>"#).unwrap();
/// let author = doc
///     .root_element()
///     .unwrap()
///     .child_elements_recursive(&doc)
///     .into_iter()
///     .find(|elem| elem.local_name(&doc) == "author")
///     .unwrap();
/// author.set_text(&mut doc, "Lewis Carroll");
/// let xml = doc.write_str().unwrap();
/// assert!(xml.contains("<author>Lewis Carroll</author>"));
/// ```
#[derive(Debug)]
pub struct Document {
    pub(crate) store: Vec<ElementData>,
    container: Element,

    pub(crate) version: Option<String>,
    pub(crate) encoding: Option<String>,
    pub(crate) standalone: Option<String>,
    pub(crate) source_encoding: &'static Encoding,
}

impl Document {
    /// Create a blank new xml document.
    pub fn new() -> Document {
        let (container, container_data) = Element::container();
        Document {
            store: vec![container_data],
            container,
            version: None,
            encoding: None,
            standalone: None,
            source_encoding: UTF_8,
        }
    }

    pub fn container(&self) -> Element {
        self.container
    }

    pub fn is_empty(&self) -> bool {
        self.store.len() == 1
    }

    /// Get first element of document.
    pub fn root_element(&self) -> Option<Element> {
        self.container.child_elements(self).first().copied()
    }

    /// Get root nodes of document.
    pub fn root_nodes(&self) -> &Vec<Node> {
        self.container.children(self)
    }

    /// Whether the source had an XML declaration.
    pub fn has_decl(&self) -> bool {
        self.version.is_some()
    }

    /// Encoding named in the XML declaration, if any.
    pub fn encoding(&self) -> Option<&str> {
        self.encoding.as_deref()
    }

    /// Encoding the source bytes were decoded with.
    pub fn source_encoding(&self) -> &'static Encoding {
        self.source_encoding
    }
}

impl Default for Document {
    fn default() -> Self {
        Document::new()
    }
}

// Read
impl Document {
    /// Parses xml string with default [`ReadOptions`].
    ///
    /// # Errors
    ///
    /// - [`Error::MalformedXML`](crate::Error::MalformedXML): Could not read XML.
    pub fn parse_str(str: &str) -> Result<Document> {
        DocumentParser::parse_text(str, ReadOptions::default())
    }

    pub fn parse_str_with_opts(str: &str, opts: ReadOptions) -> Result<Document> {
        DocumentParser::parse_text(str, opts)
    }

    /// Parses raw bytes, decoding them as the BOM or XML declaration says.
    ///
    /// # Errors
    ///
    /// - [`Error::CannotDecode`](crate::Error::CannotDecode): Could not decode XML.
    /// - [`Error::UnsupportedEncoding`](crate::Error::UnsupportedEncoding): Unknown encoding label.
    /// - [`Error::MalformedXML`](crate::Error::MalformedXML): Could not read XML.
    pub fn parse_bytes(bytes: &[u8], opts: ReadOptions) -> Result<Document> {
        DocumentParser::parse_bytes(bytes, opts)
    }

    /// Strict parse first, a recovering parse if that fails.
    ///
    /// When both fail, the error of the recovering parse is returned.
    pub fn parse_lenient(bytes: &[u8]) -> Result<Document> {
        let strict = ReadOptions::default();
        match DocumentParser::parse_bytes(bytes, strict.clone()) {
            Ok(doc) => Ok(doc),
            Err(err) => {
                log::debug!("strict parse failed ({}), retrying with recovery", err);
                let doc = DocumentParser::parse_bytes(bytes, ReadOptions { recover: true, ..strict })?;
                log::warn!("document recovered from: {}", err);
                Ok(doc)
            }
        }
    }
}

impl FromStr for Document {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Document> {
        Document::parse_str(s)
    }
}

// Write
impl Document {
    /// Writes document as xml string.
    ///
    /// The declaration is only written if the source had one.
    pub fn write_str(&self) -> Result<String> {
        let mut buf: Vec<u8> = Vec::with_capacity(200);
        self.write(&mut buf)?;
        Ok(String::from_utf8(buf)?)
    }

    /// Write document to writer, compact and in UTF-8.
    pub fn write(&self, writer: &mut impl Write) -> Result<()> {
        let mut writer = Writer::new(writer);
        if self.has_decl() {
            self.write_decl(&mut writer, self.encoding.as_deref())?;
        }
        self.write_nodes(&mut writer, self.container.children(self))
    }

    /// Serializes the document into `encoding`, with a declaration naming it.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedEncoding`](crate::Error::UnsupportedEncoding): Unknown encoding label.
    pub fn to_bytes(&self, encoding: &str) -> Result<Vec<u8>> {
        let mut buf: Vec<u8> = Vec::with_capacity(200);
        {
            let mut writer = Writer::new(&mut buf);
            self.write_decl(&mut writer, Some(encoding))?;
            self.write_nodes(&mut writer, self.container.children(self))?;
        }
        let text = String::from_utf8(buf)?;
        encoding::encode(&text, encoding, self.source_encoding)
    }

    fn write_decl(&self, writer: &mut Writer<impl Write>, encoding: Option<&str>) -> Result<()> {
        let version = self.version.as_deref().unwrap_or("1.0");
        writer.write_event(Event::Decl(BytesDecl::new(
            version.as_bytes(),
            encoding.map(str::as_bytes),
            self.standalone.as_deref().map(str::as_bytes),
        )))?;
        Ok(())
    }

    fn write_nodes(&self, writer: &mut Writer<impl Write>, nodes: &[Node]) -> Result<()> {
        for node in nodes {
            match node {
                Node::Element(eid) => self.write_element(writer, *eid)?,
                Node::Text(text) => {
                    writer.write_event(Event::Text(BytesText::from_plain_str(text)))?
                }
                Node::Unparsed(text) => {
                    writer.write_event(Event::Text(BytesText::from_escaped_str(text)))?
                }
                Node::DocType(text) => {
                    writer.write_event(Event::DocType(BytesText::from_escaped_str(text)))?
                }
                // Comment, CData, and PI content is not escaped.
                Node::Comment(text) => {
                    writer.write_event(Event::Comment(BytesText::from_escaped_str(text)))?
                }
                Node::CData(text) => {
                    writer.write_event(Event::CData(BytesText::from_escaped_str(text)))?
                }
                Node::PI(text) => {
                    writer.write_event(Event::PI(BytesText::from_escaped_str(text)))?
                }
            };
        }
        Ok(())
    }

    fn write_element(&self, writer: &mut Writer<impl Write>, element: Element) -> Result<()> {
        let name_bytes = element.full_name(self).as_bytes();
        let mut start = BytesStart::borrowed_name(name_bytes);
        for (key, val) in element.attributes(self) {
            start.push_attribute((key.as_bytes(), val.as_bytes()));
        }
        if element.has_children(self) {
            writer.write_event(Event::Start(start))?;
            self.write_nodes(writer, element.children(self))?;
            writer.write_event(Event::End(BytesEnd::borrowed(name_bytes)))?;
        } else {
            writer.write_event(Event::Empty(start))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_element() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
        <basic>
            Text
            <c />
        </basic>
        "#;
        let mut document = Document::from_str(xml).unwrap();
        let basic = document.root_element().unwrap();
        let p = Element::new(&mut document, "p");
        basic.push_child(&mut document, Node::Element(p)).unwrap();
        assert_eq!(p.parent(&document).unwrap(), basic);
        assert_eq!(
            p,
            basic
                .children(&document)
                .last()
                .unwrap()
                .as_element()
                .unwrap()
        )
    }

    #[test]
    fn test_compact_round_trip() {
        let xml = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<a x=\"1\" xmlns:p=\"u\"><p:b>t &amp; u</p:b><!-- c --><c/></a>";
        let doc = Document::parse_str(xml).unwrap();
        assert_eq!(doc.write_str().unwrap(), xml);
    }

    #[test]
    fn test_keeps_attribute_order() {
        let xml = r#"<a z="1" xmlns="urn:x" b="2" a="3"/>"#;
        let doc = Document::parse_str(xml).unwrap();
        assert_eq!(doc.write_str().unwrap(), xml);
    }

    #[test]
    fn test_to_bytes_writes_declaration() {
        let doc = Document::parse_str("<a>b</a>").unwrap();
        let bytes = doc.to_bytes("UTF-8").unwrap();
        assert_eq!(
            bytes,
            b"<?xml version=\"1.0\" encoding=\"UTF-8\"?><a>b</a>".to_vec()
        );
    }

    #[test]
    fn test_to_bytes_unknown_encoding() {
        let doc = Document::parse_str("<a>b</a>").unwrap();
        assert!(matches!(
            doc.to_bytes("no-such-charset"),
            Err(crate::Error::UnsupportedEncoding(_))
        ));
    }

    #[test]
    fn test_standalone_kept() {
        let xml = r#"<?xml version="1.0" standalone="yes"?><a/>"#;
        let doc = Document::parse_str(xml).unwrap();
        assert_eq!(doc.write_str().unwrap(), xml);
    }
}
