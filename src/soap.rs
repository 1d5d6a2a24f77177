//! SOAP 1.1 envelope encoding and response decoding for the Birst
//! command web service.
//!
//! Uses quick-xml, which does not expand external entities; responses that
//! declare a DOCTYPE or entities are rejected outright.

use crate::error::{BirstError, Result, SoapFault};
use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// SOAP 1.1 envelope namespace.
pub const SOAP_11_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
/// Namespace of the Birst command web service.
pub const BIRST_NS: &str = "http://www.birst.com/";

/// Status of a remote job as reported by `getJobStatus`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResult {
    /// Provider-defined status code, e.g. `Complete` or `failed`
    pub status_code: String,
    /// Human-readable status message
    pub message: String,
}

impl StatusResult {
    /// Status code the service uses for a failed job.
    pub const FAILED: &'static str = "failed";

    pub fn new(status_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status_code: status_code.into(),
            message: message.into(),
        }
    }

    /// Whether this is the terminal failure status. Case-sensitive.
    pub fn is_failed(&self) -> bool {
        self.status_code == Self::FAILED
    }

    fn from_node(node: &XmlNode) -> Self {
        Self {
            status_code: node.child_text("statusCode").unwrap_or_default().to_string(),
            message: node.child_text("message").unwrap_or_default().to_string(),
        }
    }
}

/// A cloud connector connection to extract. Passed through unmodified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudConnection {
    pub connection_type: String,
    pub connection_name: String,
}

/// An entry in a space's catalog directory tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNode {
    pub name: String,
    pub label: String,
    pub is_directory: bool,
    pub children: Vec<FileNode>,
}

impl FileNode {
    fn from_node(node: &XmlNode) -> Self {
        let children = node
            .child("children")
            .map(|list| list.children.iter().map(FileNode::from_node).collect())
            .unwrap_or_default();

        Self {
            name: node.child_text("name").unwrap_or_default().to_string(),
            label: node.child_text("label").unwrap_or_default().to_string(),
            is_directory: node.child_text("isDirectory").is_some_and(parse_bool),
            children,
        }
    }
}

/// A typed SOAP parameter value.
#[derive(Debug, Clone)]
pub enum SoapValue {
    Text(String),
    Bool(bool),
    Int(i64),
    DateTime(DateTime<Utc>),
    /// `ArrayOfString`
    Strings(Vec<String>),
    /// `ArrayOfCloudConnection`
    Connections(Vec<CloudConnection>),
}

impl From<&str> for SoapValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SoapValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for SoapValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for SoapValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<DateTime<Utc>> for SoapValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::DateTime(value)
    }
}

/// A single RPC call against the command web service.
#[derive(Debug, Clone)]
pub struct SoapRequest {
    operation: &'static str,
    params: Vec<(&'static str, SoapValue)>,
}

impl SoapRequest {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            params: Vec::new(),
        }
    }

    /// Append a parameter. Order matters to the service.
    pub fn param(mut self, name: &'static str, value: impl Into<SoapValue>) -> Self {
        self.params.push((name, value.into()));
        self
    }

    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Value for the `SOAPAction` HTTP header.
    pub fn soap_action(&self) -> String {
        format!("\"{}{}\"", BIRST_NS, self.operation)
    }

    /// Render the request as a SOAP 1.1 envelope.
    pub fn to_envelope(&self) -> String {
        let mut body = String::new();
        for (name, value) in &self.params {
            write_value(&mut body, name, value);
        }

        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<soap:Envelope xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xmlns:xsd="http://www.w3.org/2001/XMLSchema" xmlns:soap="{SOAP_11_NS}">
  <soap:Body>
    <{op} xmlns="{BIRST_NS}">{body}</{op}>
  </soap:Body>
</soap:Envelope>"#,
            op = self.operation,
        )
    }
}

fn write_value(out: &mut String, name: &str, value: &SoapValue) {
    // Writing into a String cannot fail.
    let _ = match value {
        SoapValue::Text(text) => write!(out, "<{name}>{}</{name}>", escape(text.as_str())),
        SoapValue::Bool(flag) => write!(out, "<{name}>{flag}</{name}>"),
        SoapValue::Int(number) => write!(out, "<{name}>{number}</{name}>"),
        SoapValue::DateTime(at) => write!(
            out,
            "<{name}>{}</{name}>",
            at.to_rfc3339_opts(SecondsFormat::Millis, true)
        ),
        SoapValue::Strings(items) => {
            let _ = write!(out, "<{name}>");
            for item in items {
                let _ = write!(out, "<string>{}</string>", escape(item.as_str()));
            }
            write!(out, "</{name}>")
        }
        SoapValue::Connections(connections) => {
            let _ = write!(out, "<{name}>");
            for connection in connections {
                let _ = write!(
                    out,
                    "<CloudConnection><connectionType>{}</connectionType><connectionName>{}</connectionName></CloudConnection>",
                    escape(connection.connection_type.as_str()),
                    escape(connection.connection_name.as_str()),
                );
            }
            write!(out, "</{name}>")
        }
    };
}

/// A decoded XML element: local name, text content and child elements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlNode {
    pub name: String,
    pub text: String,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    fn new(name: String) -> Self {
        Self {
            name,
            ..Default::default()
        }
    }

    /// First child with the given local name.
    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Text of the first child with the given local name.
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.as_str())
    }
}

/// The `<{op}Response>` element of a successful call.
#[derive(Debug, Clone)]
pub struct SoapResponse {
    element: XmlNode,
}

impl SoapResponse {
    /// The `<{op}Result>` element, absent for void operations.
    pub fn result(&self, operation: &str) -> Option<&XmlNode> {
        let name = format!("{operation}Result");
        self.element.child(&name)
    }

    /// Result as text; empty when the service returned nothing.
    pub fn text(&self, operation: &str) -> String {
        self.result(operation).map(|r| r.text.clone()).unwrap_or_default()
    }

    pub fn boolean(&self, operation: &str) -> Result<bool> {
        let text = self.text(operation);
        match text.trim() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            other => Err(BirstError::Xml(format!(
                "{operation} returned a non-boolean result: {other:?}"
            ))),
        }
    }

    pub fn strings(&self, operation: &str) -> Vec<String> {
        self.result(operation)
            .map(|r| r.children.iter().map(|c| c.text.clone()).collect())
            .unwrap_or_default()
    }

    pub fn status(&self, operation: &str) -> Result<StatusResult> {
        self.result(operation)
            .map(StatusResult::from_node)
            .ok_or_else(|| BirstError::Xml(format!("{operation} returned no status")))
    }

    pub fn file_node(&self, operation: &str) -> Result<FileNode> {
        self.result(operation)
            .map(FileNode::from_node)
            .ok_or_else(|| BirstError::Xml(format!("{operation} returned no directory node")))
    }
}

/// Decode a response envelope. A `soap:Fault` body becomes [`BirstError::Fault`].
pub fn parse_soap_response(data: &[u8]) -> Result<SoapResponse> {
    let xml_str = std::str::from_utf8(data)
        .map_err(|e| BirstError::Xml(format!("Invalid UTF-8: {e}")))?;

    check_entity_declarations(xml_str)?;

    let root = parse_tree(xml_str)?
        .ok_or_else(|| BirstError::Xml("Empty response document".to_string()))?;

    if root.name != "Envelope" {
        return Err(BirstError::Xml(format!(
            "Expected SOAP Envelope, found <{}>",
            root.name
        )));
    }

    let body = root
        .child("Body")
        .ok_or_else(|| BirstError::Xml("SOAP Envelope has no Body".to_string()))?;

    let element = body
        .children
        .first()
        .ok_or_else(|| BirstError::Xml("SOAP Body is empty".to_string()))?;

    if element.name == "Fault" {
        return Err(BirstError::Fault(SoapFault::new(
            element.child_text("faultcode").unwrap_or_default(),
            element.child_text("faultstring").unwrap_or_default(),
        )));
    }

    Ok(SoapResponse {
        element: element.clone(),
    })
}

fn parse_tree(xml: &str) -> Result<Option<XmlNode>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;

    loop {
        match reader.read_event()? {
            Event::Start(ref e) => stack.push(XmlNode::new(local_name_str(e))),
            Event::Empty(ref e) => attach(&mut stack, &mut root, XmlNode::new(local_name_str(e))),
            Event::End(_) => {
                if let Some(node) = stack.pop() {
                    attach(&mut stack, &mut root, node);
                }
            }
            Event::Text(ref e) => {
                if let Some(top) = stack.last_mut() {
                    let text = e.unescape().map_err(|err| BirstError::Xml(err.to_string()))?;
                    top.text.push_str(&text);
                }
            }
            Event::CData(ref e) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(e));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(root)
}

fn attach(stack: &mut [XmlNode], root: &mut Option<XmlNode>, node: XmlNode) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => {
            if root.is_none() {
                *root = Some(node);
            }
        }
    }
}

/// Reject DOCTYPE and entity declarations.
fn check_entity_declarations(xml: &str) -> Result<()> {
    if xml.contains("<!DOCTYPE") || xml.contains("<!doctype") {
        return Err(BirstError::Xml(
            "DOCTYPE declarations are not allowed".to_string(),
        ));
    }

    if xml.contains("<!ENTITY") || xml.contains("<!entity") {
        return Err(BirstError::Xml(
            "Entity declarations are not allowed".to_string(),
        ));
    }

    Ok(())
}

fn local_name_str(e: &BytesStart) -> String {
    let name = e.local_name();
    String::from_utf8_lossy(name.as_ref()).into_owned()
}

fn parse_bool(text: &str) -> bool {
    matches!(text.trim(), "true" | "1")
}
