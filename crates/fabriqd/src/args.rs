//! Argument evaluator - parses the argument text of a planned query as
//! pure data literals.
//!
//! A small recursive-descent parser over a JSON superset: single-quoted
//! strings, unquoted keys (including `$`-operators), trailing commas, and
//! the two shell constructors `ObjectId("hex")` and `ISODate("...")` /
//! `Date("...")` (with an optional leading `new`). Nothing else parses, so
//! functions, identifiers and host references are unrepresentable - there
//! is no evaluation context to escape from.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use fabriq_common::AskError;
use serde_json::{json, Map, Number, Value};

/// Parsed argument expression, before materialization.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgExpr {
    Literal(Value),
    Array(Vec<ArgExpr>),
    Object(Vec<(String, ArgExpr)>),
    /// `ObjectId("...")`
    IdRef(String),
    /// `ISODate("...")` / `Date("...")`
    DateRef(String),
}

/// Parse and materialize a comma-separated argument list.
pub fn evaluate(args_text: &str) -> Result<Vec<Value>, AskError> {
    parse_args(args_text)?
        .into_iter()
        .map(materialize)
        .collect()
}

/// Parse the argument text into expressions without materializing.
pub fn parse_args(args_text: &str) -> Result<Vec<ArgExpr>, AskError> {
    let mut p = Parser::new(args_text);
    let mut args = Vec::new();

    p.skip_ws();
    if p.at_end() {
        return Ok(args);
    }

    loop {
        args.push(p.parse_value()?);
        p.skip_ws();
        if p.eat(',') {
            p.skip_ws();
            if p.at_end() {
                break; // trailing comma
            }
            continue;
        }
        break;
    }

    p.skip_ws();
    if !p.at_end() {
        return Err(p.error("trailing characters after arguments"));
    }
    Ok(args)
}

/// Turn an expression into a plain JSON value. Ids and dates become
/// extended-JSON wrappers the executor and store understand.
pub fn materialize(expr: ArgExpr) -> Result<Value, AskError> {
    match expr {
        ArgExpr::Literal(v) => Ok(v),
        ArgExpr::Array(items) => Ok(Value::Array(
            items
                .into_iter()
                .map(materialize)
                .collect::<Result<_, _>>()?,
        )),
        ArgExpr::Object(members) => {
            let mut map = Map::new();
            for (k, v) in members {
                map.insert(k, materialize(v)?);
            }
            Ok(Value::Object(map))
        }
        ArgExpr::IdRef(hex) => {
            if hex.len() == 24 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
                Ok(json!({ "$oid": hex }))
            } else {
                Err(AskError::ArgumentSyntax(format!(
                    "invalid ObjectId {:?}: expected 24 hex characters",
                    hex
                )))
            }
        }
        ArgExpr::DateRef(text) => {
            let parsed = parse_date(&text).ok_or_else(|| {
                AskError::ArgumentSyntax(format!("unrecognized date literal {:?}", text))
            })?;
            Ok(json!({ "$date": parsed.to_rfc3339() }))
        }
    }
}

fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc());
    }
    if let Ok(d) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(d.and_hms_opt(0, 0, 0)?.and_utc());
    }
    None
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn new(text: &str) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), AskError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {:?}", expected)))
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn error(&self, message: &str) -> AskError {
        let found = self
            .peek()
            .map(|c| format!("{:?}", c))
            .unwrap_or_else(|| "end of input".to_string());
        AskError::ArgumentSyntax(format!(
            "{} at offset {} (found {})",
            message, self.pos, found
        ))
    }

    fn parse_value(&mut self) -> Result<ArgExpr, AskError> {
        self.skip_ws();
        match self.peek() {
            Some('{') => self.parse_object(),
            Some('[') => self.parse_array(),
            Some('"') | Some('\'') => Ok(ArgExpr::Literal(Value::String(self.parse_string()?))),
            Some(c) if c.is_ascii_digit() || c == '-' => self.parse_number(),
            Some(c) if c.is_alphabetic() || c == '_' || c == '$' => self.parse_word(),
            Some(_) => Err(self.error("unexpected character")),
            None => Err(self.error("unexpected end of arguments")),
        }
    }

    fn parse_object(&mut self) -> Result<ArgExpr, AskError> {
        self.expect('{')?;
        let mut members = Vec::new();
        self.skip_ws();
        if self.eat('}') {
            return Ok(ArgExpr::Object(members));
        }
        loop {
            self.skip_ws();
            let key = self.parse_key()?;
            self.skip_ws();
            self.expect(':')?;
            let value = self.parse_value()?;
            members.push((key, value));
            self.skip_ws();
            if self.eat(',') {
                self.skip_ws();
                if self.eat('}') {
                    return Ok(ArgExpr::Object(members)); // trailing comma
                }
                continue;
            }
            self.expect('}')?;
            return Ok(ArgExpr::Object(members));
        }
    }

    fn parse_key(&mut self) -> Result<String, AskError> {
        match self.peek() {
            Some('"') | Some('\'') => self.parse_string(),
            Some(c) if c.is_alphabetic() || c == '_' || c == '$' => Ok(self.parse_ident()),
            _ => Err(self.error("expected object key")),
        }
    }

    fn parse_array(&mut self) -> Result<ArgExpr, AskError> {
        self.expect('[')?;
        let mut items = Vec::new();
        self.skip_ws();
        if self.eat(']') {
            return Ok(ArgExpr::Array(items));
        }
        loop {
            items.push(self.parse_value()?);
            self.skip_ws();
            if self.eat(',') {
                self.skip_ws();
                if self.eat(']') {
                    return Ok(ArgExpr::Array(items)); // trailing comma
                }
                continue;
            }
            self.expect(']')?;
            return Ok(ArgExpr::Array(items));
        }
    }

    fn parse_string(&mut self) -> Result<String, AskError> {
        let quote = self.bump().expect("caller checked quote");
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('\\') => out.push('\\'),
                    Some('/') => out.push('/'),
                    Some('"') => out.push('"'),
                    Some('\'') => out.push('\''),
                    Some('u') => {
                        let mut code = 0u32;
                        for _ in 0..4 {
                            let d = self
                                .bump()
                                .and_then(|c| c.to_digit(16))
                                .ok_or_else(|| self.error("invalid \\u escape"))?;
                            code = code * 16 + d;
                        }
                        let c = char::from_u32(code)
                            .ok_or_else(|| self.error("invalid \\u escape"))?;
                        out.push(c);
                    }
                    _ => return Err(self.error("invalid escape sequence")),
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn parse_number(&mut self) -> Result<ArgExpr, AskError> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.pos += 1;
        }
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.eat('.') {
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            self.pos += 1;
            if matches!(self.peek(), Some('+') | Some('-')) {
                self.pos += 1;
            }
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.pos += 1;
            }
        }

        let text: String = self.chars[start..self.pos].iter().collect();
        if let Ok(i) = text.parse::<i64>() {
            return Ok(ArgExpr::Literal(Value::Number(i.into())));
        }
        let f: f64 = text
            .parse()
            .map_err(|_| AskError::ArgumentSyntax(format!("invalid number {:?}", text)))?;
        let n = Number::from_f64(f)
            .ok_or_else(|| AskError::ArgumentSyntax(format!("non-finite number {:?}", text)))?;
        Ok(ArgExpr::Literal(Value::Number(n)))
    }

    fn parse_ident(&mut self) -> String {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_' || c == '$') {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn parse_word(&mut self) -> Result<ArgExpr, AskError> {
        let word = self.parse_ident();
        match word.as_str() {
            "true" => Ok(ArgExpr::Literal(Value::Bool(true))),
            "false" => Ok(ArgExpr::Literal(Value::Bool(false))),
            "null" => Ok(ArgExpr::Literal(Value::Null)),
            "new" => {
                // "new Date(...)" / "new ObjectId(...)"
                self.skip_ws();
                self.parse_word()
            }
            "ObjectId" => Ok(ArgExpr::IdRef(self.parse_ctor_arg()?)),
            "ISODate" | "Date" => Ok(ArgExpr::DateRef(self.parse_ctor_arg()?)),
            other => Err(AskError::ArgumentSyntax(format!(
                "unknown identifier {:?}: only data literals, ObjectId() and \
                 ISODate()/Date() are allowed",
                other
            ))),
        }
    }

    fn parse_ctor_arg(&mut self) -> Result<String, AskError> {
        self.skip_ws();
        self.expect('(')?;
        self.skip_ws();
        let arg = match self.peek() {
            Some('"') | Some('\'') => self.parse_string()?,
            _ => return Err(self.error("constructor expects a string argument")),
        };
        self.skip_ws();
        self.expect(')')?;
        Ok(arg)
    }
}
