//! Lexing and parsing of template actions.
//!
//! A template is literal text with actions between `{{` and `}}`. Inside an
//! action:
//!
//! ```text
//! pipeline := command ( '|' command )*
//! command  := '.' | IDENT argument*
//! argument := STRING | '.' | '(' pipeline ')'
//! ```
//!
//! `{{-` trims whitespace before the action and `-}}` trims whitespace after
//! it. `{{/* ... */}}` is a comment.

use std::ops::RangeInclusive;

use crate::error::TemplateError;

/// Built-in template functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Func {
    /// JSON serialisation of the resolved value, `null` if unresolved.
    Ref,
    /// Raw string value, empty if unresolved.
    RefText,
    /// JSON-quoted string.
    RefQuote,
    /// Strip a cutset from both ends.
    Trim,
    /// Percent-encode for query strings and form bodies.
    UrlQuery,
}

impl Func {
    fn lookup(name: &str) -> Option<Self> {
        match name {
            "ref" | "refjs" => Some(Func::Ref),
            "reftext" => Some(Func::RefText),
            "refquote" => Some(Func::RefQuote),
            "trim" => Some(Func::Trim),
            "urlquery" => Some(Func::UrlQuery),
            _ => None,
        }
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            Func::Ref => "ref",
            Func::RefText => "reftext",
            Func::RefQuote => "refquote",
            Func::Trim => "trim",
            Func::UrlQuery => "urlquery",
        }
    }

    fn arity(self) -> RangeInclusive<usize> {
        match self {
            Func::Ref | Func::RefText | Func::RefQuote => 1..=2,
            Func::Trim => 2..=2,
            Func::UrlQuery => 1..=1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    Text(String),
    Action(Pipeline),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Pipeline {
    pub(crate) commands: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Command {
    Dot,
    Call { func: Func, args: Vec<Arg> },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Arg {
    Str(String),
    Dot,
    Sub(Pipeline),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Str(String),
    Dot,
    Ident(String),
    LParen,
    RParen,
    Pipe,
}

/// Parses template source into nodes.
pub(crate) fn parse(source: &str) -> Result<Vec<Node>, TemplateError> {
    let mut nodes = Vec::new();
    let mut pos = 0;

    while let Some(found) = source[pos..].find("{{") {
        let open = pos + found;
        let mut text = &source[pos..open];

        let mut inner_start = open + 2;
        if trim_marker_after(&source[inner_start..]) {
            text = text.trim_end();
            inner_start += 1;
        }
        if !text.is_empty() {
            nodes.push(Node::Text(text.to_string()));
        }

        let close = find_close(source, open, inner_start)?;
        let mut inner = &source[inner_start..close];
        let trim_right = trim_marker_before(inner);
        if trim_right {
            inner = &inner[..inner.len() - 1];
        }

        let trimmed = inner.trim();
        if !(trimmed.starts_with("/*") && trimmed.ends_with("*/")) {
            let tokens = lex(inner, inner_start)?;
            if tokens.is_empty() {
                return Err(TemplateError::EmptyAction(open));
            }
            let mut parser = TokenParser {
                tokens,
                pos: 0,
                offset: inner_start,
            };
            let pipeline = parser.pipeline()?;
            if let Some((token, _)) = parser.tokens.get(parser.pos) {
                return Err(TemplateError::UnexpectedToken {
                    token: format!("{:?}", token),
                    pos: inner_start,
                });
            }
            nodes.push(Node::Action(pipeline));
        }

        pos = close + 2;
        if trim_right {
            let rest = &source[pos..];
            pos += rest.len() - rest.trim_start().len();
        }
    }

    if pos < source.len() {
        nodes.push(Node::Text(source[pos..].to_string()));
    }
    Ok(nodes)
}

fn trim_marker_after(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next() == Some('-') && chars.next().is_some_and(char::is_whitespace)
}

fn trim_marker_before(s: &str) -> bool {
    let mut chars = s.chars().rev();
    chars.next() == Some('-') && chars.next().is_some_and(char::is_whitespace)
}

/// Finds the byte index of the `}}` closing the action opened at `open`,
/// skipping over string literals.
fn find_close(source: &str, open: usize, from: usize) -> Result<usize, TemplateError> {
    let bytes = source.as_bytes();
    let mut i = from;
    let mut quote: Option<(u8, usize)> = None;

    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some((q, _)) => {
                if q == b'"' && b == b'\\' {
                    i += 1;
                } else if b == q {
                    quote = None;
                }
            }
            None => {
                if b == b'"' || b == b'`' {
                    quote = Some((b, i));
                } else if b == b'}' && bytes.get(i + 1) == Some(&b'}') {
                    return Ok(i);
                }
            }
        }
        i += 1;
    }

    match quote {
        Some((_, start)) => Err(TemplateError::UnterminatedString(start)),
        None => Err(TemplateError::UnterminatedAction(open)),
    }
}

fn lex(inner: &str, offset: usize) -> Result<Vec<(Token, usize)>, TemplateError> {
    let mut tokens = Vec::new();
    let mut chars = inner.char_indices().peekable();

    while let Some(&(i, c)) = chars.peek() {
        let pos = offset + i;
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '.' => {
                chars.next();
                if chars.peek().is_some_and(|&(_, n)| is_ident_char(n)) {
                    return Err(TemplateError::UnexpectedToken {
                        token: ".field access".to_string(),
                        pos,
                    });
                }
                tokens.push((Token::Dot, pos));
            }
            '(' => {
                chars.next();
                tokens.push((Token::LParen, pos));
            }
            ')' => {
                chars.next();
                tokens.push((Token::RParen, pos));
            }
            '|' => {
                chars.next();
                tokens.push((Token::Pipe, pos));
            }
            '`' => {
                chars.next();
                let mut raw = String::new();
                loop {
                    match chars.next() {
                        Some((_, '`')) => break,
                        Some((_, c)) => raw.push(c),
                        None => return Err(TemplateError::UnterminatedString(pos)),
                    }
                }
                tokens.push((Token::Str(raw), pos));
            }
            '"' => {
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some((_, '"')) => break,
                        Some((j, '\\')) => {
                            let (_, escape) = chars
                                .next()
                                .ok_or(TemplateError::UnterminatedString(pos))?;
                            match escape {
                                '"' => value.push('"'),
                                '\\' => value.push('\\'),
                                '/' => value.push('/'),
                                'n' => value.push('\n'),
                                't' => value.push('\t'),
                                'r' => value.push('\r'),
                                'b' => value.push('\u{0008}'),
                                'f' => value.push('\u{000c}'),
                                'u' => {
                                    let hex: String = (0..4).filter_map(|_| chars.next()).map(|(_, h)| h).collect();
                                    let ch = u32::from_str_radix(&hex, 16)
                                        .ok()
                                        .filter(|_| hex.len() == 4)
                                        .and_then(char::from_u32)
                                        .ok_or(TemplateError::InvalidEscape {
                                            escape: 'u',
                                            pos: offset + j,
                                        })?;
                                    value.push(ch);
                                }
                                other => {
                                    return Err(TemplateError::InvalidEscape {
                                        escape: other,
                                        pos: offset + j,
                                    })
                                }
                            }
                        }
                        Some((_, c)) => value.push(c),
                        None => return Err(TemplateError::UnterminatedString(pos)),
                    }
                }
                tokens.push((Token::Str(value), pos));
            }
            c if is_ident_start(c) => {
                let mut ident = String::new();
                while let Some(&(_, n)) = chars.peek() {
                    if !is_ident_char(n) {
                        break;
                    }
                    ident.push(n);
                    chars.next();
                }
                tokens.push((Token::Ident(ident), pos));
            }
            other => {
                return Err(TemplateError::UnexpectedToken {
                    token: other.to_string(),
                    pos,
                })
            }
        }
    }

    Ok(tokens)
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

struct TokenParser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    offset: usize,
}

impl TokenParser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn position(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.offset, |(_, p)| *p)
    }

    fn unexpected(&self) -> TemplateError {
        TemplateError::UnexpectedToken {
            token: self
                .peek()
                .map_or_else(|| "end of action".to_string(), |t| format!("{:?}", t)),
            pos: self.position(),
        }
    }

    fn pipeline(&mut self) -> Result<Pipeline, TemplateError> {
        let mut commands = vec![self.command(false)?];
        while self.peek() == Some(&Token::Pipe) {
            self.pos += 1;
            commands.push(self.command(true)?);
        }
        Ok(Pipeline { commands })
    }

    fn command(&mut self, piped: bool) -> Result<Command, TemplateError> {
        match self.peek().cloned() {
            Some(Token::Dot) if !piped => {
                self.pos += 1;
                match self.peek() {
                    None | Some(Token::Pipe) | Some(Token::RParen) => Ok(Command::Dot),
                    Some(_) => Err(self.unexpected()),
                }
            }
            Some(Token::Ident(name)) => {
                self.pos += 1;
                let func =
                    Func::lookup(&name).ok_or_else(|| TemplateError::UnknownFunction(name))?;

                let mut args = Vec::new();
                while let Some(token) = self.peek() {
                    match token {
                        Token::Pipe | Token::RParen => break,
                        _ => args.push(self.argument()?),
                    }
                }

                let got = args.len() + usize::from(piped);
                let arity = func.arity();
                if !arity.contains(&got) {
                    return Err(TemplateError::Arity {
                        name: func.name().to_string(),
                        expected: if arity.start() == arity.end() {
                            arity.start().to_string()
                        } else {
                            format!("{} to {}", arity.start(), arity.end())
                        },
                        got,
                    });
                }
                Ok(Command::Call { func, args })
            }
            _ => Err(self.unexpected()),
        }
    }

    fn argument(&mut self) -> Result<Arg, TemplateError> {
        match self.peek().cloned() {
            Some(Token::Str(s)) => {
                self.pos += 1;
                Ok(Arg::Str(s))
            }
            Some(Token::Dot) => {
                self.pos += 1;
                Ok(Arg::Dot)
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let pipeline = self.pipeline()?;
                if self.peek() != Some(&Token::RParen) {
                    return Err(self.unexpected());
                }
                self.pos += 1;
                Ok(Arg::Sub(pipeline))
            }
            _ => Err(self.unexpected()),
        }
    }
}
