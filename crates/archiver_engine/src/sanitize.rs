use ego_tree::NodeRef;
use scraper::node::Node;
use scraper::Html;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

const DROPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "iframe", "template"];

/// Re-serializes a lenient hypertext fragment as well-formed XHTML.
///
/// The fragment goes through the HTML5 parser, so unclosed tags are closed where
/// the parser would close them; every void element is written self-closed and all
/// text and attribute values are entity-escaped. Comments and scripting elements
/// are dropped. Tags whose names are not plain XML names, including prefixed
/// ones such as `<o:p>`, are unwrapped so only their content remains.
pub fn sanitize_fragment(input: &str) -> String {
    let fragment = Html::parse_fragment(input);
    let mut out = String::with_capacity(input.len() + input.len() / 8);
    for child in fragment.root_element().children() {
        write_node(child, &mut out);
    }
    out
}

fn write_node(node: NodeRef<'_, Node>, out: &mut String) {
    match node.value() {
        Node::Text(text) => out.push_str(&escape_xml(text)),
        Node::Element(element) => {
            let name = element.name().to_ascii_lowercase();
            if DROPPED_ELEMENTS.contains(&name.as_str()) {
                return;
            }
            if !is_plain_name(&name) {
                for child in node.children() {
                    write_node(child, out);
                }
                return;
            }
            out.push('<');
            out.push_str(&name);
            for (attr, value) in element.attrs() {
                let attr = attr.to_ascii_lowercase();
                if !is_allowed_attribute(&attr) {
                    continue;
                }
                out.push(' ');
                out.push_str(&attr);
                out.push_str("=\"");
                out.push_str(&escape_attr(value));
                out.push('"');
            }
            if VOID_ELEMENTS.contains(&name.as_str()) {
                out.push_str(" />");
                return;
            }
            out.push('>');
            for child in node.children() {
                write_node(child, out);
            }
            out.push_str("</");
            out.push_str(&name);
            out.push('>');
        }
        Node::Comment(_) | Node::ProcessingInstruction(_) | Node::Doctype(_) => {}
        _ => {
            for child in node.children() {
                write_node(child, out);
            }
        }
    }
}

/// Escapes `&`, `<` and `>` and drops characters XML 1.0 forbids.
pub fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            c if is_xml_char(c) => escaped.push(c),
            _ => {}
        }
    }
    escaped
}

/// Like [`escape_xml`], for double-quoted attribute values.
pub fn escape_attr(value: &str) -> String {
    escape_xml(value).replace('"', "&quot;")
}

fn is_xml_char(c: char) -> bool {
    matches!(
        c,
        '\t' | '\n' | '\r' | '\u{20}'..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}' | '\u{10000}'..
    )
}

/// An XML name without a namespace prefix, restricted to ASCII.
fn is_plain_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

// `xmlns` would rebind the default namespace of the chapter document.
fn is_allowed_attribute(name: &str) -> bool {
    name == "xml:lang" || (is_plain_name(name) && name != "xmlns")
}
