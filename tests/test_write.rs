use xml_batch_edit::{Document, Element, Node};

#[test]
fn test_escape() {
    let expected = r#"<root attr="&gt;&lt;&amp;&quot;&apos;attrval"><inner xmlns:ns="&gt;&lt;&amp;&quot;&apos;nsval">&gt;&lt;&amp;&quot;&apos;text</inner></root><!--<&amp;--><![CDATA[<&amp;]]><?<&amp;?>"#;
    let xml = r#"<root attr="&gt;&lt;&amp;&quot;&apos;attrval"><inner xmlns:ns="&gt;&lt;&amp;&quot;&apos;nsval">x</inner></root>"#;
    let mut doc = Document::parse_str(xml).unwrap();
    let inner = doc.root_element().unwrap().child_elements(&doc)[0];
    inner.set_text(&mut doc, "><&\"'text");

    let container = doc.container();
    for node in [
        Node::Comment("<&amp;".to_string()),
        Node::CData("<&amp;".to_string()),
        Node::PI("<&amp;".to_string()),
    ] {
        container.push_child(&mut doc, node).unwrap();
    }
    assert_eq!(doc.write_str().unwrap(), expected);
}

#[test]
fn test_set_text_keeps_structure() {
    let xml = "<a>\n  <b>old<c/>tail</b>after\n</a>";
    let mut doc = Document::parse_str(xml).unwrap();
    let b = doc.root_element().unwrap().child_elements(&doc)[0];
    b.set_text(&mut doc, "new");
    assert_eq!(
        doc.write_str().unwrap(),
        "<a>\n  <b>new<c/>tail</b>after\n</a>"
    );

    b.set_text(&mut doc, "");
    assert_eq!(doc.write_str().unwrap(), "<a>\n  <b><c/>tail</b>after\n</a>");
}

#[test]
fn test_set_text_on_new_element() {
    let mut doc = Document::parse_str("<a/>").unwrap();
    let root = doc.root_element().unwrap();
    let b = Element::new(&mut doc, "b");
    root.push_child(&mut doc, Node::Element(b)).unwrap();
    b.set_text(&mut doc, "1 < 2");
    assert_eq!(doc.write_str().unwrap(), "<a><b>1 &lt; 2</b></a>");
}

#[test]
fn test_to_bytes_encodings() {
    let doc = Document::parse_str("<a>Grüße</a>").unwrap();

    let latin = doc.to_bytes("ISO-8859-1").unwrap();
    assert_eq!(
        latin,
        b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><a>Gr\xfc\xdfe</a>".to_vec()
    );

    let utf16 = doc.to_bytes("UTF-16").unwrap();
    assert_eq!(&utf16[..4], b"\xff\xfe<\x00");
    let reparsed = Document::parse_lenient(&utf16).unwrap();
    assert_eq!(
        reparsed.root_element().unwrap().text(&reparsed).as_deref(),
        Some("Grüße")
    );
}
