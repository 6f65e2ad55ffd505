//! Route metadata extraction from ext_proc request attributes.
//!
//! The proxy forwards `xds.route_name` and `xds.route_metadata` under the
//! `envoy.filters.http.ext_proc` attribute struct. The metadata arrives as a
//! protobuf text-format rendering of `config.core.v3.Metadata`, e.g.
//!
//! ```text
//! filter_metadata {
//!   key: "chainward.route"
//!   value {
//!     fields { key: "api_name" value { string_value: "pets" } }
//!   }
//! }
//! ```
//!
//! Only the namespace named in config is read. Structured
//! `metadata_context.filter_metadata` is used when the attributes are absent.

use std::collections::BTreeMap;

use prost_types::value::Kind;

use chainward_core::error::{ChainwardError, Result};
use chainward_core::RouteMetadata;

use crate::proto::ProcessingRequest;

pub const EXT_PROC_ATTRIBUTES: &str = "envoy.filters.http.ext_proc";
pub const ROUTE_NAME_ATTR: &str = "xds.route_name";
pub const ROUTE_METADATA_ATTR: &str = "xds.route_metadata";

/// Route key plus metadata for the first phase of a request.
/// `None` when the proxy did not name a route.
pub fn extract_route(req: &ProcessingRequest, namespace: &str) -> Option<RouteMetadata> {
    let attrs = req.attributes.get(EXT_PROC_ATTRIBUTES);

    let route_name = attrs
        .and_then(|s| s.fields.get(ROUTE_NAME_ATTR))
        .and_then(string_of);

    let fields = match attrs
        .and_then(|s| s.fields.get(ROUTE_METADATA_ATTR))
        .and_then(string_of)
    {
        Some(blob) if !blob.trim().is_empty() => match parse_route_metadata(&blob, namespace) {
            Ok(fields) => fields,
            Err(e) => {
                tracing::warn!(error = %e, "malformed route metadata; continuing with route name only");
                BTreeMap::new()
            }
        },
        _ => metadata_context_fields(req, namespace),
    };

    let route_name = route_name
        .filter(|n| !n.is_empty())
        .or_else(|| fields.get("route_name").cloned())?;

    Some(RouteMetadata::from_fields(route_name, fields))
}

fn metadata_context_fields(req: &ProcessingRequest, namespace: &str) -> BTreeMap<String, String> {
    req.metadata_context
        .as_ref()
        .and_then(|m| m.filter_metadata.get(namespace))
        .map(|s| {
            s.fields
                .iter()
                .filter_map(|(k, v)| scalar_of(v).map(|v| (k.clone(), v)))
                .collect()
        })
        .unwrap_or_default()
}

fn string_of(v: &prost_types::Value) -> Option<String> {
    match &v.kind {
        Some(Kind::StringValue(s)) => Some(s.clone()),
        _ => None,
    }
}

fn scalar_of(v: &prost_types::Value) -> Option<String> {
    match &v.kind {
        Some(Kind::StringValue(s)) => Some(s.clone()),
        Some(Kind::NumberValue(n)) => Some(format_number(*n)),
        Some(Kind::BoolValue(b)) => Some(b.to_string()),
        _ => None,
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Parse a text-format `Metadata` blob and return the scalar fields of `namespace`.
pub fn parse_route_metadata(blob: &str, namespace: &str) -> Result<BTreeMap<String, String>> {
    let root = TextParser::new(blob)?.parse_message(false)?;

    let mut out = BTreeMap::new();
    for entry in root.messages("filter_metadata") {
        if entry.scalar("key") != Some(namespace) {
            continue;
        }
        let Some(value) = entry.messages("value").next() else {
            continue;
        };
        for field in value.messages("fields") {
            let (Some(key), Some(v)) = (field.scalar("key"), field.messages("value").next()) else {
                continue;
            };
            let scalar = v
                .scalar("string_value")
                .or_else(|| v.scalar("number_value"))
                .or_else(|| v.scalar("bool_value"));
            if let Some(s) = scalar {
                out.insert(key.to_string(), s.to_string());
            }
        }
    }
    Ok(out)
}

// --------------------
// Text-format parsing
// --------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Colon,
    Open,
    Close,
}

#[derive(Debug, Default)]
struct TextMessage {
    entries: Vec<(String, TextValue)>,
}

#[derive(Debug)]
enum TextValue {
    Scalar(String),
    Message(TextMessage),
}

impl TextMessage {
    fn scalar(&self, name: &str) -> Option<&str> {
        self.entries.iter().find_map(|(k, v)| match v {
            TextValue::Scalar(s) if k == name => Some(s.as_str()),
            _ => None,
        })
    }

    fn messages<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a TextMessage> + 'a {
        self.entries.iter().filter_map(move |(k, v)| match v {
            TextValue::Message(m) if k == name => Some(m),
            _ => None,
        })
    }
}

struct TextParser {
    tokens: Vec<Token>,
    pos: usize,
}

const MAX_DEPTH: usize = 32;

impl TextParser {
    fn new(input: &str) -> Result<Self> {
        Ok(Self {
            tokens: tokenize(input)?,
            pos: 0,
        })
    }

    fn parse_message(&mut self, nested: bool) -> Result<TextMessage> {
        self.parse_message_at(nested, 0)
    }

    fn parse_message_at(&mut self, nested: bool, depth: usize) -> Result<TextMessage> {
        if depth > MAX_DEPTH {
            return Err(malformed("nesting too deep"));
        }
        let mut msg = TextMessage::default();
        loop {
            let Some(tok) = self.tokens.get(self.pos).cloned() else {
                if nested {
                    return Err(malformed("unterminated message"));
                }
                return Ok(msg);
            };
            self.pos += 1;
            let name = match tok {
                Token::Close if nested => return Ok(msg),
                Token::Ident(name) => name,
                other => return Err(malformed(&format!("unexpected token {other:?}"))),
            };

            if self.tokens.get(self.pos) == Some(&Token::Colon) {
                self.pos += 1;
            }
            match self.tokens.get(self.pos).cloned() {
                Some(Token::Open) => {
                    self.pos += 1;
                    let child = self.parse_message_at(true, depth + 1)?;
                    msg.entries.push((name, TextValue::Message(child)));
                }
                Some(Token::Str(s)) | Some(Token::Ident(s)) => {
                    self.pos += 1;
                    msg.entries.push((name, TextValue::Scalar(s)));
                }
                _ => return Err(malformed(&format!("missing value for field {name}"))),
            }
        }
    }
}

fn malformed(msg: &str) -> ChainwardError {
    ChainwardError::Config(format!("route metadata: {msg}"))
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '#' => {
                // comment to end of line
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            ':' => {
                chars.next();
                tokens.push(Token::Colon);
            }
            '{' | '<' => {
                chars.next();
                tokens.push(Token::Open);
            }
            '}' | '>' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '"' | '\'' => {
                chars.next();
                tokens.push(Token::Str(read_quoted(&mut chars, c)?));
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || matches!(c, ':' | '{' | '}' | '<' | '>' | '"' | '\'' | '#') {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                tokens.push(Token::Ident(word));
            }
        }
    }
    Ok(tokens)
}

fn read_quoted(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, quote: char) -> Result<String> {
    let mut out = String::new();
    loop {
        match chars.next() {
            None => return Err(malformed("unterminated string")),
            Some(c) if c == quote => return Ok(out),
            Some('\\') => match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some(c) => out.push(c),
                None => return Err(malformed("unterminated escape")),
            },
            Some(c) => out.push(c),
        }
    }
}
