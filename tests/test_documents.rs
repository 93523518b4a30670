use itertools::Itertools;
use std::fmt;
use std::fmt::Write;
use std::path::Path;
use xml_batch_edit::{Document, Element, Node, ReadOptions};

#[derive(Clone)]
struct TStr(pub String);

impl PartialEq<Self> for TStr {
    fn eq(&self, other: &Self) -> bool {
        self.0.trim() == other.0.trim()
    }
}

impl fmt::Debug for TStr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "\n{}\n", self.0.trim())
    }
}

fn to_yaml(doc: &Document) -> String {
    let mut buf = String::new();
    let mut depth: usize = 0;
    write_line("Root:", depth, &mut buf);
    depth += 1;
    let container = doc.container();
    render_nodes(doc, container.children(doc), depth, &mut buf);
    buf
}

fn render_nodes(doc: &Document, nodes: &[Node], depth: usize, buf: &mut String) {
    for node in nodes {
        let (kind, text) = match node {
            Node::Element(id) => {
                render_element(doc, *id, depth, buf);
                continue;
            }
            Node::Text(text) => ("Text", text.as_str()),
            Node::Comment(text) => ("Comment", text.as_str()),
            Node::CData(text) => ("CData", text.as_str()),
            Node::DocType(text) => ("DocType", text.trim()),
            Node::PI(text) => ("PI", text.as_str()),
            Node::Unparsed(text) => ("Unparsed", text.as_str()),
        };
        write_line(
            &format!(
                "- {}: \"{}\"",
                kind,
                text.replace('\n', r"\n").replace('\r', r"\r")
            ),
            depth,
            buf,
        );
    }
}

fn render_element(doc: &Document, elem: Element, mut depth: usize, buf: &mut String) {
    write_line("- Element:", depth, buf);
    depth += 2;

    let name = elem.full_name(doc);
    write_line(&format!("name: {}", name), depth, buf);

    // source order, namespace declarations included
    let attrs = elem.attributes(doc);
    if !attrs.is_empty() {
        write_line("attributes:", depth, buf);
        for (key, val) in attrs {
            write_line(&format!("{}: \"{}\"", key, val), depth + 1, buf);
        }
    }

    let children = elem.children(doc);
    if !children.is_empty() {
        write_line("children:", depth, buf);
        depth += 1;
        render_nodes(doc, children, depth, buf);
    }
}

fn write_line(text: &str, depth: usize, buf: &mut String) {
    let indent = " ".repeat(depth * 2);
    writeln!(buf, "{}{}", indent, text).unwrap();
}

// main test functions
//////////////////////

fn get_expected(file_name: &str) -> TStr {
    let yaml_file = Path::new("tests/documents").join(file_name);

    TStr(
        std::fs::read_to_string(yaml_file)
            .unwrap()
            .lines()
            .map(|line| line.trim_end())
            .collect::<Vec<&str>>()
            .join("\n"),
    )
}

// read(write(doc)) should be doc.
fn test_write(doc: &Document, opts: ReadOptions) -> TStr {
    let expected = TStr(to_yaml(doc));
    let written_xml = doc.write_str().unwrap();
    println!("{:?}", &written_xml);
    let new_doc = Document::parse_str_with_opts(&written_xml, opts).unwrap();
    let result = TStr(to_yaml(&new_doc));
    assert!(
        expected == result,
        "\n===expected==={:?}\n===result==={:?}\nWRITING\n",
        expected,
        result,
    );
    expected
}

fn test<F, S>(xml_file: &str, expected: F)
where
    F: Fn(&ReadOptions) -> S,
    S: Into<String>,
{
    let xml_file = Path::new("tests/documents").join(xml_file);
    let bytes = std::fs::read(&xml_file).unwrap();

    // Options
    let recover = [true, false];
    let empty_text_node = [true, false];
    let require_decl = [true, false];
    let opts = [recover, empty_text_node, require_decl];

    let mut parsed = None;
    for k in opts.iter().multi_cartesian_product() {
        let read_options = ReadOptions {
            recover: *k[0],
            empty_text_node: *k[1],
            require_decl: *k[2],
            ..ReadOptions::default()
        };
        let expected_name: String = expected(&read_options).into();
        let expected = get_expected(&expected_name);

        let result = match Document::parse_bytes(&bytes, read_options.clone()) {
            Ok(doc) => {
                let yaml = TStr(to_yaml(&doc));
                if read_options.empty_text_node && !read_options.require_decl {
                    parsed = Some((doc, read_options.clone()));
                }
                yaml
            }
            Err(error) => {
                println!("{:?}", error);
                let debug_str = format!("{:?}", error);
                let variant_name = debug_str.split('(').next().unwrap();
                TStr(format!("error: {}", variant_name))
            }
        };

        assert!(
            expected == result,
            "\noptions: {:?}\n===expected==={:?}===result==={:?}\nREADING\n",
            read_options,
            expected,
            result,
        );
    }

    // Test write
    let (doc, opts) = parsed.expect("no option combination parsed the document");
    test_write(&doc, opts);
}

#[test]
fn nodes() {
    test("nodes.xml", |opts| {
        if opts.empty_text_node {
            "nodes_etn.yaml"
        } else {
            "nodes.yaml"
        }
    })
}

#[test]
fn recover() {
    test("recover.xml", |opts| {
        if opts.recover && !opts.require_decl {
            "recover.yaml"
        } else {
            "error_malformed.yaml"
        }
    })
}

#[test]
fn encoding_windows_1251() {
    test("cp1251.xml", |_| "cyrillic.yaml")
}

#[test]
fn encoding_utf16() {
    test("utf16.xml", |_| "cyrillic.yaml")
}

#[test]
fn lenient_parse() {
    let bytes = std::fs::read("tests/documents/recover.xml").unwrap();
    let doc = Document::parse_lenient(&bytes).unwrap();
    assert_eq!(TStr(to_yaml(&doc)), get_expected("recover.yaml"));

    let bytes = std::fs::read("tests/documents/cp1251.xml").unwrap();
    let doc = Document::parse_lenient(&bytes).unwrap();
    assert_eq!(doc.encoding(), Some("windows-1251"));
    assert_eq!(doc.source_encoding(), encoding_rs::WINDOWS_1251);
}
