use std::fs;
use std::path::Path;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::{Result, ToolError};
use crate::model::{Document, Record, Value};

/// File name suffix of partial documents stored next to the tables.
pub const PARTIAL_SUFFIX: &str = ".part.xml";

const XSI_NIL: &str = "xsi:nil";

/// Serialisation flavour of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XmlStyle {
    /// Source documents: empty elements are written as `<a></a>`.
    Full,
    /// Partial documents: empty elements may use `<a/>`.
    Partial,
}

/// Reads an XML document, deriving the document name from the file name
/// minus `suffix`.
pub fn read_document(path: &Path, suffix: &str) -> Result<Document> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| ToolError::InvalidDocument(format!("invalid path {}", path.display())))?;
    let name = file_name.strip_suffix(suffix).unwrap_or(file_name);
    let source = fs::read_to_string(path)?;
    parse_document(name, &source)
}

/// Writes a document to `path`.
pub fn write_document(path: &Path, document: &Document, style: XmlStyle) -> Result<()> {
    let serialised = document_to_string(document, style)?;
    fs::write(path, serialised)?;
    Ok(())
}

/// Parses XML text into a [`Document`].
///
/// Elements holding only text become [`Value::Text`], elements holding
/// children become [`Value::Record`], and empty or `xsi:nil` elements become
/// [`Value::Null`]. Repeated element names under one parent are gathered into
/// a [`Value::List`]. Attributes below the root are not retained.
pub fn parse_document(name: &str, source: &str) -> Result<Document> {
    let mut reader = Reader::from_str(source);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Frame> = Vec::new();
    let mut root: Option<Frame> = None;

    loop {
        match reader.read_event()? {
            Event::Start(start) => {
                if root.is_some() {
                    return Err(ToolError::InvalidDocument(format!(
                        "document '{name}' has more than one root element"
                    )));
                }
                if let Some(parent) = stack.last_mut() {
                    parent.has_children = true;
                }
                stack.push(Frame::open(&start)?);
            }
            Event::Empty(start) => {
                let frame = Frame::open(&start)?;
                match stack.last_mut() {
                    Some(parent) => {
                        parent.has_children = true;
                        parent.record.push(frame.name, Value::Null);
                    }
                    None => root = Some(frame),
                }
            }
            Event::Text(text) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&text.unescape()?);
                }
            }
            Event::CData(data) => {
                if let Some(frame) = stack.last_mut() {
                    frame.text.push_str(&String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Event::End(_) => {
                let frame = stack.pop().ok_or_else(|| {
                    ToolError::InvalidDocument(format!("unbalanced closing tag in '{name}'"))
                })?;
                match stack.last_mut() {
                    Some(parent) => {
                        let element = frame.name.clone();
                        parent.record.push(element, frame.into_value());
                    }
                    None => root = Some(frame),
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(ToolError::InvalidDocument(format!(
            "element '{}' of '{name}' is never closed",
            open.name
        )));
    }
    let root = root
        .ok_or_else(|| ToolError::InvalidDocument(format!("document '{name}' has no root")))?;

    Ok(Document {
        name: name.to_string(),
        root_tag: root.name,
        attributes: root.attributes,
        body: root.record,
    })
}

struct Frame {
    name: String,
    attributes: Vec<(String, String)>,
    record: Record,
    text: String,
    has_children: bool,
    nil: bool,
}

impl Frame {
    fn open(start: &BytesStart<'_>) -> Result<Self> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut attributes = Vec::new();
        let mut nil = false;
        for attribute in start.attributes() {
            let attribute = attribute?;
            let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
            let value = attribute.unescape_value()?.into_owned();
            if key == XSI_NIL && value == "true" {
                nil = true;
            }
            attributes.push((key, value));
        }
        Ok(Self {
            name,
            attributes,
            record: Record::new(),
            text: String::new(),
            has_children: false,
            nil,
        })
    }

    fn into_value(self) -> Value {
        if self.has_children {
            Value::Record(self.record)
        } else if self.nil || self.text.is_empty() {
            Value::Null
        } else {
            Value::Text(self.text)
        }
    }
}

/// Serialises a document with a declaration and four-space indentation.
pub fn document_to_string(document: &Document, style: XmlStyle) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 4);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut root = BytesStart::new(document.root_tag.as_str());
    for (key, value) in &document.attributes {
        root.push_attribute((key.as_str(), value.as_str()));
    }
    writer.write_event(Event::Start(root))?;
    for (name, value) in document.body.fields() {
        write_value(&mut writer, name, value, style)?;
    }
    writer.write_event(Event::End(BytesEnd::new(document.root_tag.as_str())))?;

    let mut bytes = writer.into_inner();
    bytes.push(b'\n');
    String::from_utf8(bytes).map_err(|err| ToolError::InvalidDocument(err.to_string()))
}

fn write_value(writer: &mut Writer<Vec<u8>>, name: &str, value: &Value, style: XmlStyle) -> Result<()> {
    match value {
        Value::Null => match style {
            XmlStyle::Partial => writer.write_event(Event::Empty(BytesStart::new(name)))?,
            XmlStyle::Full => {
                writer.write_event(Event::Start(BytesStart::new(name)))?;
                // An empty text event keeps the closing tag on the same line.
                writer.write_event(Event::Text(BytesText::new("")))?;
                writer.write_event(Event::End(BytesEnd::new(name)))?;
            }
        },
        Value::Text(text) => {
            writer.write_event(Event::Start(BytesStart::new(name)))?;
            writer.write_event(Event::Text(BytesText::new(text)))?;
            writer.write_event(Event::End(BytesEnd::new(name)))?;
        }
        Value::Record(record) => {
            writer.write_event(Event::Start(BytesStart::new(name)))?;
            for (field, field_value) in record.fields() {
                write_value(writer, field, field_value, style)?;
            }
            writer.write_event(Event::End(BytesEnd::new(name)))?;
        }
        Value::List(items) => {
            for item in items {
                write_value(writer, name, item, style)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Profile xmlns="http://soap.sforce.com/2006/04/metadata">
    <custom>false</custom>
    <fieldPermissions>
        <editable>true</editable>
        <field>Account.Name</field>
        <readable>true</readable>
    </fieldPermissions>
    <fieldPermissions>
        <editable>false</editable>
        <field>Account.Phone</field>
        <readable>true</readable>
    </fieldPermissions>
    <description></description>
    <userLicense>Salesforce &amp; Co</userLicense>
</Profile>
"#;

    #[test]
    fn parses_repeated_elements_into_lists() {
        let document = parse_document("Admin", PROFILE).expect("document parsed");

        assert_eq!(document.root_tag, "Profile");
        assert_eq!(
            document.attributes,
            vec![(
                "xmlns".to_string(),
                "http://soap.sforce.com/2006/04/metadata".to_string()
            )]
        );
        assert_eq!(document.section("fieldPermissions").map(Value::len), Some(2));
        assert_eq!(document.section("description"), Some(&Value::Null));
        assert_eq!(
            document.section("userLicense"),
            Some(&Value::text("Salesforce & Co"))
        );
    }

    #[test]
    fn full_documents_round_trip_textually() {
        let document = parse_document("Admin", PROFILE).expect("document parsed");
        let written = document_to_string(&document, XmlStyle::Full).expect("document written");
        assert_eq!(written, PROFILE);
    }

    #[test]
    fn partial_documents_use_empty_elements() {
        let mut document = parse_document("Admin", PROFILE).expect("document parsed");
        document.body.insert("fieldPermissions", Value::Null);

        let written = document_to_string(&document, XmlStyle::Partial).expect("partial written");
        assert!(written.contains("<fieldPermissions/>"));

        let reparsed = parse_document("Admin", &written).expect("partial parsed");
        assert_eq!(reparsed, document);
    }

    #[test]
    fn rejects_unclosed_elements() {
        assert!(parse_document("Broken", "<Profile><custom>true</custom>").is_err());
    }
}
