// Copyright 2025 Memophor Labs
// SPDX-License-Identifier: Apache-2.0

//! XML to JSON tree conversion for upstreams that answer in XML.
//!
//! Each element becomes a map from child tag to child value. Repeated tags
//! collapse into an array in document order, attributes are collected under
//! [`ATTRIBUTES_KEY`], and an element with neither children nor attributes
//! becomes its trimmed text.

use quick_xml::events::attributes::AttrError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};
use thiserror::Error;

pub const ATTRIBUTES_KEY: &str = "@attributes";
pub const TEXT_KEY: &str = "#text";

#[derive(Debug, Error)]
pub enum XmlTreeError {
    #[error(transparent)]
    Syntax(#[from] quick_xml::Error),
    #[error(transparent)]
    Attribute(#[from] AttrError),
    #[error("element name is not valid UTF-8")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("document has no root element")]
    NoRoot,
    #[error("content outside the root element")]
    OutsideRoot,
    #[error("closing tag without matching opening tag")]
    UnbalancedEnd,
    #[error("element <{0}> is never closed")]
    Unclosed(String),
}

struct Node {
    name: String,
    attributes: Map<String, Value>,
    children: Map<String, Value>,
    text: String,
}

impl Node {
    fn open(start: &BytesStart<'_>) -> Result<Self, XmlTreeError> {
        let name = std::str::from_utf8(start.name().as_ref())?.to_string();

        let mut attributes = Map::new();
        for attr in start.attributes() {
            let attr = attr?;
            let key = std::str::from_utf8(attr.key.as_ref())?.to_string();
            let value = attr.unescape_value()?.into_owned();
            attributes.insert(key, Value::String(value));
        }

        Ok(Self {
            name,
            attributes,
            children: Map::new(),
            text: String::new(),
        })
    }

    fn push_text(&mut self, text: &str) {
        if !self.text.is_empty() {
            self.text.push(' ');
        }
        self.text.push_str(text);
    }

    // Single child values are never arrays, so an existing array always
    // means the tag has already repeated.
    fn push_child(&mut self, name: String, value: Value) {
        match self.children.get_mut(&name) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                self.children.insert(name, value);
            }
        }
    }

    fn finish(self) -> (String, Value) {
        if self.attributes.is_empty() && self.children.is_empty() {
            return (self.name, Value::String(self.text));
        }

        let mut object = self.children;
        if !self.attributes.is_empty() {
            object.insert(ATTRIBUTES_KEY.to_string(), Value::Object(self.attributes));
        }
        if !self.text.is_empty() {
            object.insert(TEXT_KEY.to_string(), Value::String(self.text));
        }
        (self.name, Value::Object(object))
    }
}

/// Parse an XML document into a JSON tree of the form `{root: value}`.
pub fn parse_tree(input: &str) -> Result<Value, XmlTreeError> {
    let mut reader = Reader::from_str(input);
    let mut stack: Vec<Node> = Vec::new();
    let mut root: Option<Value> = None;

    loop {
        match reader.read_event()? {
            Event::Start(start) => {
                if root.is_some() {
                    return Err(XmlTreeError::OutsideRoot);
                }
                stack.push(Node::open(&start)?);
            }
            Event::Empty(start) => {
                if root.is_some() {
                    return Err(XmlTreeError::OutsideRoot);
                }
                let node = Node::open(&start)?;
                close(node, &mut stack, &mut root);
            }
            Event::End(_) => {
                let node = stack.pop().ok_or(XmlTreeError::UnbalancedEnd)?;
                close(node, &mut stack, &mut root);
            }
            Event::Text(text) => {
                let text = text.unescape()?;
                append_text(&mut stack, text.trim())?;
            }
            Event::CData(data) => {
                let data = data.into_inner();
                let text = String::from_utf8_lossy(&data);
                append_text(&mut stack, text.trim())?;
            }
            Event::Eof => break,
            // declarations, comments, processing instructions, doctype
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(XmlTreeError::Unclosed(open.name.clone()));
    }

    root.ok_or(XmlTreeError::NoRoot)
}

fn append_text(stack: &mut [Node], text: &str) -> Result<(), XmlTreeError> {
    if text.is_empty() {
        return Ok(());
    }

    match stack.last_mut() {
        Some(node) => {
            node.push_text(text);
            Ok(())
        }
        None => Err(XmlTreeError::OutsideRoot),
    }
}

fn close(node: Node, stack: &mut [Node], root: &mut Option<Value>) {
    let (name, value) = node.finish();
    match stack.last_mut() {
        Some(parent) => parent.push_child(name, value),
        None => {
            let mut wrapper = Map::new();
            wrapper.insert(name, value);
            *root = Some(Value::Object(wrapper));
        }
    }
}
