//! XML-RPC wire codec.
//!
//! Covers the subset of XML-RPC the experiment server speaks: scalar values,
//! strings, nil, arrays, structs and faults. Both directions are provided so
//! the local simulator can reuse the same codec as the client. Tokenizing and
//! entity handling are left to `quick-xml`; this module maps its event stream
//! onto XML-RPC values.

use super::RemoteFault;
use quick_xml::Reader as XmlReader;
use quick_xml::escape::escape;
use quick_xml::events::Event;
use thiserror::Error;

/// A single XML-RPC value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Boolean(bool),
    Double(f64),
    String(String),
    Nil,
    Array(Vec<Value>),
    Struct(Vec<(String, Value)>),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Boolean(_) => "boolean",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Nil => "nil",
            Value::Array(_) => "array",
            Value::Struct(_) => "struct",
        }
    }

    /// Numeric value as `f64`; integers are widened.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            Value::Int(i) => Some(f64::from(*i)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Look up a struct member by name.
    pub fn member(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Struct(members) => members.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

/// A decoded `methodCall`.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    pub method: String,
    pub params: Vec<Value>,
}

/// A decoded `methodResponse`.
#[derive(Debug, Clone, PartialEq)]
pub enum MethodResponse {
    Success(Value),
    Fault(RemoteFault),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    #[error("malformed XML: {0}")]
    Syntax(String),
    #[error("expected {expected}, found {found}")]
    Unexpected { expected: String, found: String },
    #[error("invalid {kind} value '{text}'")]
    InvalidScalar { kind: &'static str, text: String },
    #[error("unsupported value type <{0}>")]
    UnsupportedType(String),
    #[error("malformed fault: {0}")]
    Fault(String),
}

impl From<CodecError> for RemoteFault {
    fn from(err: CodecError) -> Self {
        RemoteFault::parse(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Encoding

const PROLOG: &str = "<?xml version=\"1.0\"?>\n";

pub fn encode_call(method: &str, params: &[Value]) -> String {
    let mut out = String::from(PROLOG);
    out.push_str("<methodCall><methodName>");
    escape_into(&mut out, method);
    out.push_str("</methodName><params>");
    for param in params {
        out.push_str("<param>");
        write_value(&mut out, param);
        out.push_str("</param>");
    }
    out.push_str("</params></methodCall>\n");
    out
}

pub fn encode_response(value: &Value) -> String {
    let mut out = String::from(PROLOG);
    out.push_str("<methodResponse><params><param>");
    write_value(&mut out, value);
    out.push_str("</param></params></methodResponse>\n");
    out
}

pub fn encode_fault(fault: &RemoteFault) -> String {
    let body = Value::Struct(vec![
        ("faultCode".to_string(), Value::Int(fault.code)),
        ("faultString".to_string(), Value::String(fault.message.clone())),
    ]);
    let mut out = String::from(PROLOG);
    out.push_str("<methodResponse><fault>");
    write_value(&mut out, &body);
    out.push_str("</fault></methodResponse>\n");
    out
}

fn write_value(out: &mut String, value: &Value) {
    out.push_str("<value>");
    match value {
        Value::Int(i) => out.push_str(&format!("<int>{}</int>", i)),
        Value::Boolean(b) => out.push_str(if *b { "<boolean>1</boolean>" } else { "<boolean>0</boolean>" }),
        Value::Double(d) => out.push_str(&format!("<double>{}</double>", d)),
        Value::String(s) => {
            out.push_str("<string>");
            escape_into(out, s);
            out.push_str("</string>");
        }
        Value::Nil => out.push_str("<nil/>"),
        Value::Array(items) => {
            out.push_str("<array><data>");
            for item in items {
                write_value(out, item);
            }
            out.push_str("</data></array>");
        }
        Value::Struct(members) => {
            out.push_str("<struct>");
            for (name, member) in members {
                out.push_str("<member><name>");
                escape_into(out, name);
                out.push_str("</name>");
                write_value(out, member);
                out.push_str("</member>");
            }
            out.push_str("</struct>");
        }
    }
    out.push_str("</value>");
}

fn escape_into(out: &mut String, text: &str) {
    out.push_str(&escape(text));
}

// ---------------------------------------------------------------------------
// Decoding

/// Deepest array/struct nesting accepted inside a single value.
pub const MAX_VALUE_DEPTH: usize = 64;

pub fn decode_call(body: &str) -> Result<MethodCall, CodecError> {
    let mut reader = Reader::new(body);
    reader.expect_open("methodCall")?;
    reader.expect_open("methodName")?;
    let method = reader.read_text("methodName")?.trim().to_string();
    if method.is_empty() {
        return Err(CodecError::Syntax("empty methodName".to_string()));
    }

    let mut params = Vec::new();
    reader.skip_whitespace()?;
    match reader.next_token()? {
        Some(Token::Open(tag)) if tag == "params" => {
            loop {
                reader.skip_whitespace()?;
                match reader.next_token()? {
                    Some(Token::Close(tag)) if tag == "params" => break,
                    Some(Token::Open(tag)) if tag == "param" => {
                        params.push(reader.parse_value(0)?);
                        reader.expect_close("param")?;
                    }
                    other => return Err(unexpected("<param> or </params>", other)),
                }
            }
            reader.expect_close("methodCall")?;
        }
        Some(Token::Empty(tag)) if tag == "params" => reader.expect_close("methodCall")?,
        Some(Token::Close(tag)) if tag == "methodCall" => {}
        other => return Err(unexpected("<params>", other)),
    }
    reader.expect_end()?;
    Ok(MethodCall { method, params })
}

pub fn decode_response(body: &str) -> Result<MethodResponse, CodecError> {
    let mut reader = Reader::new(body);
    reader.expect_open("methodResponse")?;
    reader.skip_whitespace()?;
    let response = match reader.next_token()? {
        Some(Token::Open(tag)) if tag == "params" => {
            reader.expect_open("param")?;
            let value = reader.parse_value(0)?;
            reader.expect_close("param")?;
            reader.expect_close("params")?;
            MethodResponse::Success(value)
        }
        Some(Token::Open(tag)) if tag == "fault" => {
            let value = reader.parse_value(0)?;
            reader.expect_close("fault")?;
            MethodResponse::Fault(fault_from_value(&value)?)
        }
        other => return Err(unexpected("<params> or <fault>", other)),
    };
    reader.expect_close("methodResponse")?;
    reader.expect_end()?;
    Ok(response)
}

/// Decode a response body straight into the call outcome.
///
/// Codec failures surface as parse faults so callers only deal with
/// [`RemoteFault`].
pub fn decode_result(body: &str) -> Result<Value, RemoteFault> {
    match decode_response(body)? {
        MethodResponse::Success(value) => Ok(value),
        MethodResponse::Fault(fault) => Err(fault),
    }
}

fn fault_from_value(value: &Value) -> Result<RemoteFault, CodecError> {
    let code = match value.member("faultCode") {
        Some(Value::Int(code)) => *code,
        Some(other) => return Err(CodecError::Fault(format!("faultCode is {}", other.kind()))),
        None => return Err(CodecError::Fault("missing faultCode".to_string())),
    };
    let message = match value.member("faultString") {
        Some(Value::String(message)) => message.clone(),
        Some(other) => return Err(CodecError::Fault(format!("faultString is {}", other.kind()))),
        None => return Err(CodecError::Fault("missing faultString".to_string())),
    };
    Ok(RemoteFault { message, code })
}

/// Markup flattened to what the XML-RPC grammar cares about.
#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open(String),
    Close(String),
    Empty(String),
    Text(String),
}

fn describe(token: &Option<Token>) -> String {
    match token {
        Some(Token::Open(name)) => format!("<{}>", name),
        Some(Token::Close(name)) => format!("</{}>", name),
        Some(Token::Empty(name)) => format!("<{}/>", name),
        Some(Token::Text(text)) => format!("text '{}'", text.trim()),
        None => "end of document".to_string(),
    }
}

fn unexpected(expected: &str, found: Option<Token>) -> CodecError {
    CodecError::Unexpected {
        expected: expected.to_string(),
        found: describe(&found),
    }
}

fn xml_error(err: quick_xml::Error) -> CodecError {
    CodecError::Syntax(err.to_string())
}

fn utf8(bytes: &[u8]) -> Result<String, CodecError> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|e| CodecError::Syntax(e.to_string()))
}

/// quick-xml event stream with one token of lookahead.
struct Reader<'a> {
    xml: XmlReader<&'a [u8]>,
    peeked: Option<Token>,
}

impl<'a> Reader<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            xml: XmlReader::from_str(src),
            peeked: None,
        }
    }

    fn next_token(&mut self) -> Result<Option<Token>, CodecError> {
        if let Some(token) = self.peeked.take() {
            return Ok(Some(token));
        }
        self.read_token()
    }

    fn peek_token(&mut self) -> Result<Option<&Token>, CodecError> {
        if self.peeked.is_none() {
            self.peeked = self.read_token()?;
        }
        Ok(self.peeked.as_ref())
    }

    fn read_token(&mut self) -> Result<Option<Token>, CodecError> {
        loop {
            let token = match self.xml.read_event().map_err(xml_error)? {
                Event::Start(e) => Token::Open(utf8(e.name().as_ref())?),
                Event::End(e) => Token::Close(utf8(e.name().as_ref())?),
                Event::Empty(e) => Token::Empty(utf8(e.name().as_ref())?),
                Event::Text(e) => Token::Text(e.unescape().map_err(xml_error)?.into_owned()),
                Event::CData(e) => Token::Text(utf8(&e)?),
                Event::Eof => return Ok(None),
                // Declaration, comments, PIs and DOCTYPE carry nothing we need.
                _ => continue,
            };
            return Ok(Some(token));
        }
    }

    fn skip_whitespace(&mut self) -> Result<(), CodecError> {
        loop {
            let blank = matches!(self.peek_token()?, Some(Token::Text(text)) if text.trim().is_empty());
            if !blank {
                return Ok(());
            }
            self.peeked = None;
        }
    }

    fn expect_open(&mut self, name: &str) -> Result<(), CodecError> {
        self.skip_whitespace()?;
        match self.next_token()? {
            Some(Token::Open(found)) if found == name => Ok(()),
            other => Err(unexpected(&format!("<{}>", name), other)),
        }
    }

    fn expect_close(&mut self, name: &str) -> Result<(), CodecError> {
        self.skip_whitespace()?;
        match self.next_token()? {
            Some(Token::Close(found)) if found == name => Ok(()),
            other => Err(unexpected(&format!("</{}>", name), other)),
        }
    }

    fn expect_end(&mut self) -> Result<(), CodecError> {
        self.skip_whitespace()?;
        match self.next_token()? {
            None => Ok(()),
            other => Err(unexpected("end of document", other)),
        }
    }

    /// Concatenated character data up to the next tag.
    fn take_text(&mut self) -> Result<String, CodecError> {
        let mut text = String::new();
        while matches!(self.peek_token()?, Some(Token::Text(_))) {
            if let Some(Token::Text(chunk)) = self.peeked.take() {
                text.push_str(&chunk);
            }
        }
        Ok(text)
    }

    /// Text content of an element whose opening tag was already consumed.
    fn read_text(&mut self, name: &str) -> Result<String, CodecError> {
        let text = self.take_text()?;
        self.expect_close(name)?;
        Ok(text)
    }

    fn parse_value(&mut self, depth: usize) -> Result<Value, CodecError> {
        if depth > MAX_VALUE_DEPTH {
            return Err(CodecError::Syntax(format!(
                "values nested deeper than {} levels",
                MAX_VALUE_DEPTH
            )));
        }
        self.skip_whitespace()?;
        match self.next_token()? {
            Some(Token::Empty(tag)) if tag == "value" => return Ok(Value::String(String::new())),
            Some(Token::Open(tag)) if tag == "value" => {}
            other => return Err(unexpected("<value>", other)),
        }

        // A value without a type element is a string.
        let leading = self.take_text()?;
        let value = match self.next_token()? {
            Some(Token::Close(tag)) if tag == "value" => return Ok(Value::String(leading)),
            Some(Token::Open(kind)) if leading.trim().is_empty() => self.parse_typed(&kind, depth)?,
            Some(Token::Empty(kind)) if leading.trim().is_empty() => empty_typed(&kind)?,
            other => return Err(unexpected("a type element or </value>", other)),
        };
        self.expect_close("value")?;
        Ok(value)
    }

    fn parse_typed(&mut self, kind: &str, depth: usize) -> Result<Value, CodecError> {
        match kind {
            "i4" | "int" | "i8" => {
                let text = self.read_text(kind)?;
                text.trim()
                    .parse::<i32>()
                    .map(Value::Int)
                    .map_err(|_| CodecError::InvalidScalar { kind: "int", text })
            }
            "boolean" => {
                let text = self.read_text(kind)?;
                match text.trim() {
                    "0" => Ok(Value::Boolean(false)),
                    "1" => Ok(Value::Boolean(true)),
                    _ => Err(CodecError::InvalidScalar { kind: "boolean", text }),
                }
            }
            "double" => {
                let text = self.read_text(kind)?;
                text.trim()
                    .parse::<f64>()
                    .map(Value::Double)
                    .map_err(|_| CodecError::InvalidScalar { kind: "double", text })
            }
            "string" => Ok(Value::String(self.read_text(kind)?)),
            "nil" => {
                self.expect_close("nil")?;
                Ok(Value::Nil)
            }
            "array" => self.parse_array(depth),
            "struct" => self.parse_struct(depth),
            other => Err(CodecError::UnsupportedType(other.to_string())),
        }
    }

    fn parse_array(&mut self, depth: usize) -> Result<Value, CodecError> {
        let mut items = Vec::new();
        self.skip_whitespace()?;
        match self.next_token()? {
            Some(Token::Empty(tag)) if tag == "data" => {}
            Some(Token::Open(tag)) if tag == "data" => loop {
                self.skip_whitespace()?;
                if matches!(self.peek_token()?, Some(Token::Close(tag)) if tag == "data") {
                    self.peeked = None;
                    break;
                }
                items.push(self.parse_value(depth + 1)?);
            },
            other => return Err(unexpected("<data>", other)),
        }
        self.expect_close("array")?;
        Ok(Value::Array(items))
    }

    fn parse_struct(&mut self, depth: usize) -> Result<Value, CodecError> {
        let mut members = Vec::new();
        loop {
            self.skip_whitespace()?;
            match self.next_token()? {
                Some(Token::Close(tag)) if tag == "struct" => break,
                Some(Token::Open(tag)) if tag == "member" => {
                    self.expect_open("name")?;
                    let name = self.read_text("name")?;
                    let value = self.parse_value(depth + 1)?;
                    self.expect_close("member")?;
                    members.push((name, value));
                }
                other => return Err(unexpected("<member> or </struct>", other)),
            }
        }
        Ok(Value::Struct(members))
    }
}

fn empty_typed(kind: &str) -> Result<Value, CodecError> {
    match kind {
        "string" => Ok(Value::String(String::new())),
        "nil" => Ok(Value::Nil),
        "array" => Ok(Value::Array(Vec::new())),
        "struct" => Ok(Value::Struct(Vec::new())),
        "i4" | "int" | "i8" | "boolean" | "double" => Err(CodecError::InvalidScalar {
            kind: "empty",
            text: kind.to_string(),
        }),
        other => Err(CodecError::UnsupportedType(other.to_string())),
    }
}
