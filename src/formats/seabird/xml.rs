//! Embedded XML header blocks to nested [`Metadata`].
//!
//! Elements become map entries, attributes are stored as `@name`, leaf
//! elements become text and repeated elements become lists.

use crate::models::{MetaValue, Metadata};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

struct Node {
    name: String,
    children: Metadata,
    text: String,
}

impl Node {
    fn open(start: &BytesStart<'_>) -> Result<Self, String> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut children = Metadata::new();
        for attribute in start.attributes() {
            let attribute = attribute.map_err(|e| e.to_string())?;
            let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
            let value = attribute.unescape_value().map_err(|e| e.to_string())?;
            children.insert(format!("@{}", key), value.into_owned());
        }
        Ok(Self {
            name,
            children,
            text: String::new(),
        })
    }

    fn into_value(self) -> (String, MetaValue) {
        let text = self.text.trim().to_string();
        let value = if self.children.is_empty() {
            MetaValue::Text(text)
        } else {
            let mut children = self.children;
            if !text.is_empty() {
                children.insert("#text", text);
            }
            MetaValue::Map(children)
        };
        (self.name, value)
    }
}

fn close(stack: &mut Vec<Node>) -> Result<(), String> {
    let node = stack.pop().ok_or("unbalanced closing tag")?;
    let (name, value) = node.into_value();
    let parent = stack.last_mut().ok_or("closing tag outside the block")?;
    parent.children.push_value(name, value);
    Ok(())
}

/// Parse a header XML fragment (possibly several sibling elements)
pub fn parse_block(block: &str) -> Result<Metadata, String> {
    let wrapped = format!("<temp>{}</temp>", block);
    let mut reader = Reader::from_str(&wrapped);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Node> = Vec::new();
    let mut root = None;
    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(start) => stack.push(Node::open(&start)?),
            Event::Empty(start) => {
                stack.push(Node::open(&start)?);
                close(&mut stack)?;
            }
            Event::End(_) if stack.len() == 1 => root = stack.pop(),
            Event::End(_) => close(&mut stack)?,
            Event::Text(text) => {
                let text = text.unescape().map_err(|e| e.to_string())?;
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&text);
                }
            }
            Event::CData(data) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(format!("unclosed element <{}>", stack[stack.len() - 1].name));
    }
    root.map(|node| node.children)
        .ok_or_else(|| "empty XML block".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_elements_and_attributes() {
        let parsed = parse_block(
            r#"<Sensor Channel="1"><Type>temperature</Type><SerialNumber>4321</SerialNumber></Sensor>"#,
        )
        .unwrap();

        assert_eq!(
            parsed
                .get_path(&["Sensor", "@Channel"])
                .and_then(MetaValue::as_text),
            Some("1")
        );
        assert_eq!(
            parsed
                .get_path(&["Sensor", "SerialNumber"])
                .and_then(MetaValue::as_text),
            Some("4321")
        );
    }

    #[test]
    fn test_repeated_elements_become_lists() {
        let parsed = parse_block("<Item>a</Item>\n<Item>b</Item>").unwrap();
        assert_eq!(
            parsed.get("Item"),
            Some(&MetaValue::List(vec![
                MetaValue::Text("a".to_string()),
                MetaValue::Text("b".to_string())
            ]))
        );
    }

    #[test]
    fn test_mismatched_tags_fail() {
        assert!(parse_block("<a><b></a>").is_err());
    }
}
