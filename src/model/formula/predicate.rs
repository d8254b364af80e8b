use std::{
    collections::BTreeSet,
    fmt::{Display, Formatter},
    iter::Peekable,
    str::CharIndices,
};

use thiserror::Error;

/// Boolean guard over option membership and probe lookups.
///
/// Written in formula files as a small expression language:
/// `with-x || probe:x11-installed`, `!enable-openmp`, `(a && b) || c`.
/// A bare name tests whether an option is active, `probe:name` reads a probe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Predicate {
    Literal(bool),
    Option(String),
    Probe(String),
    Not(Box<Predicate>),
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
}

/// Facts a predicate is evaluated against.
pub trait Facts {
    fn has_option(&self, name: &str) -> bool;
    fn probe(&self, name: &str) -> Option<bool>;
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("probe `{0}` is not present in the snapshot")]
pub struct UnprobedFact(pub String);

#[derive(Error, Debug, PartialEq, Eq)]
#[error("invalid predicate `{expression}` at column {column}: {message}")]
pub struct PredicateError {
    pub expression: String,
    pub column: usize,
    pub message: String,
}

impl Default for Predicate {
    fn default() -> Self {
        Predicate::Literal(true)
    }
}

impl Predicate {
    pub fn option(name: impl Into<String>) -> Self {
        Predicate::Option(name.into())
    }

    pub fn probe(name: impl Into<String>) -> Self {
        Predicate::Probe(name.into())
    }

    pub fn negate(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    pub fn parse(expression: &str) -> Result<Self, PredicateError> {
        let mut parser = Parser {
            expression,
            tokens: Lexer::new(expression).peekable(),
        };
        let predicate = parser.parse_or()?;
        match parser.next_token()? {
            None => Ok(predicate),
            Some((column, token)) => Err(parser.error(column, format!("unexpected {}", token))),
        }
    }

    pub fn is_always(&self) -> bool {
        self == &Predicate::Literal(true)
    }

    pub fn evaluate<F: Facts>(&self, facts: &F) -> Result<bool, UnprobedFact> {
        match self {
            Predicate::Literal(value) => Ok(*value),
            Predicate::Option(name) => Ok(facts.has_option(name)),
            Predicate::Probe(name) => facts
                .probe(name)
                .ok_or_else(|| UnprobedFact(name.clone())),
            Predicate::Not(inner) => inner.evaluate(facts).map(|value| !value),
            Predicate::All(terms) => {
                for term in terms {
                    if !term.evaluate(facts)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Predicate::Any(terms) => {
                for term in terms {
                    if term.evaluate(facts)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    /// Option names this predicate tests.
    pub fn options(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect(&mut out, &mut BTreeSet::new());
        out
    }

    /// Probe names this predicate reads.
    pub fn probes(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        self.collect(&mut BTreeSet::new(), &mut out);
        out
    }

    fn collect<'a>(&'a self, options: &mut BTreeSet<&'a str>, probes: &mut BTreeSet<&'a str>) {
        match self {
            Predicate::Literal(_) => {}
            Predicate::Option(name) => {
                options.insert(name);
            }
            Predicate::Probe(name) => {
                probes.insert(name);
            }
            Predicate::Not(inner) => inner.collect(options, probes),
            Predicate::All(terms) | Predicate::Any(terms) => {
                for term in terms {
                    term.collect(options, probes);
                }
            }
        }
    }

    fn is_atomic(&self) -> bool {
        matches!(
            self,
            Predicate::Literal(_) | Predicate::Option(_) | Predicate::Probe(_) | Predicate::Not(_)
        )
    }
}

impl Display for Predicate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        fn write_terms(
            f: &mut Formatter<'_>,
            terms: &[Predicate],
            separator: &str,
            wrap: impl Fn(&Predicate) -> bool,
        ) -> std::fmt::Result {
            for (i, term) in terms.iter().enumerate() {
                if i > 0 {
                    f.write_str(separator)?;
                }
                if wrap(term) {
                    write!(f, "({})", term)?;
                } else {
                    write!(f, "{}", term)?;
                }
            }
            Ok(())
        }

        match self {
            Predicate::Literal(value) => write!(f, "{}", value),
            Predicate::Option(name) => f.write_str(name),
            Predicate::Probe(name) => write!(f, "probe:{}", name),
            Predicate::Not(inner) if inner.is_atomic() => write!(f, "!{}", inner),
            Predicate::Not(inner) => write!(f, "!({})", inner),
            Predicate::All(terms) => write_terms(f, terms, " && ", |t| {
                matches!(t, Predicate::Any(_) | Predicate::All(_))
            }),
            Predicate::Any(terms) => {
                write_terms(f, terms, " || ", |t| matches!(t, Predicate::Any(_)))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Not,
    And,
    Or,
    Open,
    Close,
    Name(String),
    Probe(String),
}

impl Display for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Not => f.write_str("`!`"),
            Token::And => f.write_str("`&&`"),
            Token::Or => f.write_str("`||`"),
            Token::Open => f.write_str("`(`"),
            Token::Close => f.write_str("`)`"),
            Token::Name(name) => write!(f, "name `{}`", name),
            Token::Probe(name) => write!(f, "probe `{}`", name),
        }
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '+' | '-')
}

struct Lexer<'a> {
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(expression: &'a str) -> Self {
        Lexer {
            chars: expression.char_indices().peekable(),
        }
    }

    fn read_name(&mut self, first: char) -> String {
        let mut name = String::from(first);
        while let Some(&(_, c)) = self.chars.peek() {
            if !is_name_char(c) {
                break;
            }
            name.push(c);
            self.chars.next();
        }
        name
    }

    fn expect(&mut self, column: usize, wanted: char, token: Token) -> Result<Token, (usize, String)> {
        match self.chars.next() {
            Some((_, c)) if c == wanted => Ok(token),
            _ => Err((column, format!("expected `{}{}`", wanted, wanted))),
        }
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<(usize, Token), (usize, String)>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(&(_, c)) = self.chars.peek() {
            if !c.is_whitespace() {
                break;
            }
            self.chars.next();
        }
        let (column, c) = self.chars.next()?;
        let token = match c {
            '!' => Ok(Token::Not),
            '(' => Ok(Token::Open),
            ')' => Ok(Token::Close),
            '&' => self.expect(column, '&', Token::And),
            '|' => self.expect(column, '|', Token::Or),
            c if is_name_char(c) => {
                let name = self.read_name(c);
                if name == "probe" && matches!(self.chars.peek(), Some((_, ':'))) {
                    self.chars.next();
                    match self.chars.next() {
                        Some((_, c)) if is_name_char(c) => Ok(Token::Probe(self.read_name(c))),
                        _ => Err((column, "expected a probe name after `probe:`".to_string())),
                    }
                } else {
                    Ok(Token::Name(name))
                }
            }
            other => Err((column, format!("unexpected character `{}`", other))),
        };
        Some(token.map(|token| (column, token)))
    }
}

struct Parser<'a> {
    expression: &'a str,
    tokens: Peekable<Lexer<'a>>,
}

impl<'a> Parser<'a> {
    fn error(&self, column: usize, message: impl Into<String>) -> PredicateError {
        PredicateError {
            expression: self.expression.to_string(),
            column: column + 1,
            message: message.into(),
        }
    }

    fn next_token(&mut self) -> Result<Option<(usize, Token)>, PredicateError> {
        match self.tokens.next() {
            None => Ok(None),
            Some(Ok(token)) => Ok(Some(token)),
            Some(Err((column, message))) => Err(self.error(column, message)),
        }
    }

    fn peek_is(&mut self, wanted: &Token) -> bool {
        matches!(self.tokens.peek(), Some(Ok((_, token))) if token == wanted)
    }

    fn parse_or(&mut self) -> Result<Predicate, PredicateError> {
        let mut terms = vec![self.parse_and()?];
        while self.peek_is(&Token::Or) {
            self.tokens.next();
            terms.push(self.parse_and()?);
        }
        Ok(collapse(terms, Predicate::Any))
    }

    fn parse_and(&mut self) -> Result<Predicate, PredicateError> {
        let mut terms = vec![self.parse_unary()?];
        while self.peek_is(&Token::And) {
            self.tokens.next();
            terms.push(self.parse_unary()?);
        }
        Ok(collapse(terms, Predicate::All))
    }

    fn parse_unary(&mut self) -> Result<Predicate, PredicateError> {
        match self.next_token()? {
            None => Err(self.error(self.expression.len(), "unexpected end of expression")),
            Some((_, Token::Not)) => Ok(self.parse_unary()?.negate()),
            Some((column, Token::Open)) => {
                let inner = self.parse_or()?;
                match self.next_token()? {
                    Some((_, Token::Close)) => Ok(inner),
                    _ => Err(self.error(column, "unclosed `(`")),
                }
            }
            Some((_, Token::Name(name))) => Ok(match name.as_str() {
                "true" => Predicate::Literal(true),
                "false" => Predicate::Literal(false),
                _ => Predicate::option(name),
            }),
            Some((_, Token::Probe(name))) => Ok(Predicate::probe(name)),
            Some((column, token)) => Err(self.error(column, format!("unexpected {}", token))),
        }
    }
}

fn collapse(mut terms: Vec<Predicate>, wrap: fn(Vec<Predicate>) -> Predicate) -> Predicate {
    if terms.len() == 1 {
        terms.remove(0)
    } else {
        wrap(terms)
    }
}
