// Minimal XML tree for stream descriptions
//
// Descriptions are small documents, so they are parsed into an owned tree
// that vendor fixes can rearrange before conversion to JSON.

use quick_xml::events::Event;
use quick_xml::Reader as XmlReader;
use serde_json::{Map, Value};

/// Deepest element nesting accepted by [`parse`]
pub const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct XmlElement {
    pub tag: String,
    pub text: String,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }

    /// Leaf element holding only text
    pub fn leaf(tag: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            text: text.into(),
            children: Vec::new(),
        }
    }

    pub fn child(&self, tag: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.tag == tag)
    }

    pub fn position(&self, tag: &str) -> Option<usize> {
        self.children.iter().position(|c| c.tag == tag)
    }

    /// JSON view of this element.
    ///
    /// Leaves become strings, elements whose children all share one tag (two
    /// or more of them) become arrays, anything else becomes an object keyed
    /// by child tag.
    pub fn to_json(&self) -> Value {
        if self.children.is_empty() {
            return Value::String(self.text.clone());
        }

        if self.is_list() {
            return Value::Array(self.children.iter().map(XmlElement::to_json).collect());
        }

        let mut map = Map::new();
        for child in &self.children {
            map.insert(child.tag.clone(), child.to_json());
        }
        Value::Object(map)
    }

    fn is_list(&self) -> bool {
        match self.children.first() {
            Some(first) => {
                self.children.len() > 1 && self.children.iter().all(|c| c.tag == first.tag)
            }
            None => false,
        }
    }
}

/// Parse a document into its root element
pub fn parse(raw: &str) -> Result<XmlElement, String> {
    let mut reader = XmlReader::from_str(raw);
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if stack.len() >= MAX_DEPTH {
                    return Err("Description nested too deeply".to_string());
                }
                stack.push(XmlElement::new(tag_name(e.name().as_ref())));
            }
            Ok(Event::Empty(e)) => {
                let element = XmlElement::new(tag_name(e.name().as_ref()));
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::End(_)) => {
                let mut element = stack.pop().ok_or("Unbalanced closing tag")?;
                element.text = element.text.trim().to_string();
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::Text(e)) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if let Some(current) = stack.last_mut() {
                    let entity = String::from_utf8_lossy(&e).into_owned();
                    current.text.push_str(&resolve_entity(&entity));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("XML parse error: {}", e)),
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(format!("Unclosed element <{}>", open.tag));
    }
    root.ok_or_else(|| "Empty XML document".to_string())
}

fn tag_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

fn attach(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> Result<(), String> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(element);
        Ok(())
    } else if root.is_none() {
        *root = Some(element);
        Ok(())
    } else {
        Err("Multiple root elements".to_string())
    }
}

fn resolve_entity(entity: &str) -> String {
    match entity {
        "amp" => "&".to_string(),
        "lt" => "<".to_string(),
        "gt" => ">".to_string(),
        "quot" => "\"".to_string(),
        "apos" => "'".to_string(),
        _ => {
            let code = entity
                .strip_prefix("#x")
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                .and_then(char::from_u32);
            match code {
                Some(c) => c.to_string(),
                None => format!("&{};", entity),
            }
        }
    }
}
