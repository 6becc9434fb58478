//! JSONPath evaluation over `serde_json::Value` trees.
//!
//! Supported syntax (Goessner style):
//!
//! | Expression            | Meaning                                  |
//! |-----------------------|------------------------------------------|
//! | `$`                   | the root value                           |
//! | `.name`, `['name']`   | object member                            |
//! | `[0]`, `[-1]`         | array element, negative counts from end  |
//! | `.*`, `[*]`           | every member or element                  |
//! | `..name`, `..*`       | recursive descent                        |
//! | `['a','b']`, `[0,2]`  | union                                    |
//! | `[1:5:2]`             | array slice                              |
//!
//! Two shorthand forms are accepted as well: a JSON pointer (`/a/0/b`) and a
//! bare dotted path without the leading `$` (`a.b`).
//!
//! A path made only of member names and indices is *definite* and resolves to
//! at most one value. Any other path resolves to an array of every match in
//! document order.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::error::PathError;

#[derive(Debug, Clone, PartialEq)]
enum Selector {
    Name(String),
    Index(i64),
    Wildcard,
    Slice {
        start: Option<i64>,
        end: Option<i64>,
        step: i64,
    },
    Union(Vec<Selector>),
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Child(Selector),
    Descendant(Selector),
}

/// A compiled JSONPath expression.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonPath {
    source: String,
    segments: Vec<Segment>,
}

impl JsonPath {
    /// Compiles a path expression.
    ///
    /// # Errors
    ///
    /// Returns `PathError` if the expression is empty or malformed.
    pub fn parse(expr: &str) -> Result<Self, PathError> {
        let source = expr.trim();
        if source.is_empty() {
            return Err(PathError::Empty);
        }

        let segments = if let Some(pointer) = source.strip_prefix('/') {
            parse_pointer(pointer)
        } else {
            let normalized = if source.starts_with('$') {
                source.to_string()
            } else if source.starts_with('.') || source.starts_with('[') {
                format!("${}", source)
            } else {
                format!("$.{}", source)
            };
            Parser::new(&normalized).parse()?
        };

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// The expression this path was compiled from.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Returns true if the path can match at most one node.
    pub fn is_definite(&self) -> bool {
        self.segments.iter().all(|segment| {
            matches!(
                segment,
                Segment::Child(Selector::Name(_)) | Segment::Child(Selector::Index(_))
            )
        })
    }

    /// Returns every node matched by the path, in document order.
    pub fn select<'a>(&self, root: &'a Value) -> Vec<&'a Value> {
        let mut current = vec![root];
        for segment in &self.segments {
            let mut next = Vec::new();
            for node in current {
                match segment {
                    Segment::Child(selector) => apply(selector, node, &mut next),
                    Segment::Descendant(selector) => {
                        let mut nodes = Vec::new();
                        descendants(node, &mut nodes);
                        for descendant in nodes {
                            apply(selector, descendant, &mut next);
                        }
                    }
                }
            }
            current = next;
        }
        current
    }

    /// Resolves the path against `root`.
    ///
    /// A definite path yields the matched value or `None`; an indefinite path
    /// always yields an array of the matches.
    pub fn resolve(&self, root: &Value) -> Option<Value> {
        let matches = self.select(root);
        if self.is_definite() {
            matches.first().map(|v| (*v).clone())
        } else {
            Some(Value::Array(matches.into_iter().cloned().collect()))
        }
    }
}

impl FromStr for JsonPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn apply<'a>(selector: &Selector, node: &'a Value, out: &mut Vec<&'a Value>) {
    match selector {
        Selector::Name(name) => match node {
            Value::Object(map) => out.extend(map.get(name)),
            // JSON pointer segments address array elements by their decimal index.
            Value::Array(items) => {
                if let Ok(index) = name.parse::<usize>() {
                    out.extend(items.get(index));
                }
            }
            _ => {}
        },
        Selector::Index(index) => {
            if let Value::Array(items) = node {
                let len = items.len() as i64;
                let index = if *index < 0 { len + index } else { *index };
                if (0..len).contains(&index) {
                    out.push(&items[index as usize]);
                }
            }
        }
        Selector::Wildcard => match node {
            Value::Object(map) => out.extend(map.values()),
            Value::Array(items) => out.extend(items.iter()),
            _ => {}
        },
        Selector::Slice { start, end, step } => {
            if let Value::Array(items) = node {
                for index in slice_indices(items.len() as i64, *start, *end, *step) {
                    out.push(&items[index]);
                }
            }
        }
        Selector::Union(selectors) => {
            for selector in selectors {
                apply(selector, node, out);
            }
        }
    }
}

/// Collects `node` and all of its descendants in pre-order.
fn descendants<'a>(node: &'a Value, out: &mut Vec<&'a Value>) {
    out.push(node);
    match node {
        Value::Object(map) => map.values().for_each(|child| descendants(child, out)),
        Value::Array(items) => items.iter().for_each(|child| descendants(child, out)),
        _ => {}
    }
}

fn slice_indices(len: i64, start: Option<i64>, end: Option<i64>, step: i64) -> Vec<usize> {
    let normalize = |i: i64| if i < 0 { i + len } else { i };
    let mut indices = Vec::new();

    if step > 0 {
        let mut i = start.map_or(0, normalize).clamp(0, len);
        let end = end.map_or(len, normalize).clamp(0, len);
        while i < end {
            indices.push(i as usize);
            match i.checked_add(step) {
                Some(next) => i = next,
                None => break,
            }
        }
    } else {
        let mut i = start.map_or(len - 1, normalize).clamp(-1, len - 1);
        let end = end.map_or(-1, normalize).clamp(-1, len - 1);
        while i > end {
            indices.push(i as usize);
            match i.checked_add(step) {
                Some(next) => i = next,
                None => break,
            }
        }
    }
    indices
}

fn parse_pointer(pointer: &str) -> Vec<Segment> {
    pointer
        .split('/')
        .map(|token| {
            let name = token.replace("~1", "/").replace("~0", "~");
            Segment::Child(Selector::Name(name))
        })
        .collect()
}

struct Parser<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    fn parse(mut self) -> Result<Vec<Segment>, PathError> {
        // Caller guarantees the leading '$'.
        self.pos = 1;
        let mut segments = Vec::new();

        while let Some(c) = self.peek() {
            match c {
                '.' if self.peek_at(1) == Some('.') => {
                    self.pos += 2;
                    let selector = match self.peek() {
                        Some('[') => self.bracket()?,
                        _ => self.dot_member()?,
                    };
                    segments.push(Segment::Descendant(selector));
                }
                '.' => {
                    self.pos += 1;
                    segments.push(Segment::Child(self.dot_member()?));
                }
                '[' => segments.push(Segment::Child(self.bracket()?)),
                c if c.is_whitespace() => self.pos += 1,
                c => return Err(self.unexpected(c)),
            }
        }

        Ok(segments)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).copied()
    }

    fn unexpected(&self, found: char) -> PathError {
        PathError::Unexpected {
            path: self.source.to_string(),
            pos: self.pos,
            found,
        }
    }

    fn end(&self) -> PathError {
        PathError::UnexpectedEnd(self.source.to_string())
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn dot_member(&mut self) -> Result<Selector, PathError> {
        if self.peek() == Some('*') {
            self.pos += 1;
            return Ok(Selector::Wildcard);
        }

        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == '.' || c == '[' || c.is_whitespace() {
                break;
            }
            self.pos += 1;
        }
        if start == self.pos {
            return match self.peek() {
                Some(c) => Err(self.unexpected(c)),
                None => Err(self.end()),
            };
        }
        Ok(Selector::Name(self.chars[start..self.pos].iter().collect()))
    }

    fn bracket(&mut self) -> Result<Selector, PathError> {
        // Consume '['.
        self.pos += 1;
        let mut items = Vec::new();

        loop {
            self.skip_whitespace();
            let item = match self.peek() {
                Some('\'') | Some('"') => Selector::Name(self.quoted()?),
                Some('*') => {
                    self.pos += 1;
                    Selector::Wildcard
                }
                Some(c) if c == '-' || c == ':' || c.is_ascii_digit() => self.index_or_slice()?,
                Some(c) => return Err(self.unexpected(c)),
                None => return Err(self.end()),
            };
            items.push(item);

            self.skip_whitespace();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some(']') => {
                    self.pos += 1;
                    break;
                }
                Some(c) => return Err(self.unexpected(c)),
                None => return Err(self.end()),
            }
        }

        if items.len() == 1 {
            Ok(items.remove(0))
        } else {
            Ok(Selector::Union(items))
        }
    }

    fn quoted(&mut self) -> Result<String, PathError> {
        let quote = self.peek().ok_or_else(|| self.end())?;
        self.pos += 1;
        let mut out = String::new();

        loop {
            match self.peek() {
                None => return Err(self.end()),
                Some('\\') => {
                    let escaped = self.peek_at(1).ok_or_else(|| self.end())?;
                    out.push(escaped);
                    self.pos += 2;
                }
                Some(c) if c == quote => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some(c) => {
                    out.push(c);
                    self.pos += 1;
                }
            }
        }
    }

    fn integer(&mut self) -> Result<Option<i64>, PathError> {
        self.skip_whitespace();
        let start = self.pos;
        if self.peek() == Some('-') {
            self.pos += 1;
        }
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        if start == self.pos {
            return Ok(None);
        }

        let number: String = self.chars[start..self.pos].iter().collect();
        number
            .parse::<i64>()
            .map(Some)
            .map_err(|_| PathError::InvalidNumber {
                path: self.source.to_string(),
                number,
            })
    }

    fn index_or_slice(&mut self) -> Result<Selector, PathError> {
        let start = self.integer()?;
        self.skip_whitespace();
        if self.peek() != Some(':') {
            return start.map(Selector::Index).ok_or_else(|| match self.peek() {
                Some(c) => self.unexpected(c),
                None => self.end(),
            });
        }

        self.pos += 1;
        let end = self.integer()?;
        self.skip_whitespace();
        let mut step = 1;
        if self.peek() == Some(':') {
            self.pos += 1;
            step = self.integer()?.unwrap_or(1);
            if step == 0 {
                return Err(PathError::ZeroStep(self.source.to_string()));
            }
        }

        Ok(Selector::Slice { start, end, step })
    }
}
