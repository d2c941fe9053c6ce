//! # Preset Conditions
//!
//! Conditions are small templates evaluated against the merged config once a
//! preset is baked. They can stop a scan before it starts or print a warning:
//!
//! ```text
//! {% if config.web.spider_distance > 0 and not config.web.allow_spider %}
//!   {{ abort("Spidering is enabled but not allowed") }}
//! {% elif config.modules.http.url == "" %}
//!   {{ warn("No http url configured") }}
//! {% endif %}
//! ```
//!
//! Supported: `if / elif / else / endif`, `and`, `or`, `not`, `in`,
//! comparisons, parentheses, string/number/bool/none literals and dotted
//! `config.*` lookups. Missing keys evaluate to none. Nothing can be assigned
//! and nothing outside the config is reachable.

use std::cmp::Ordering;
use std::sync::OnceLock;

use regex::Regex;
use serde_yaml::Value;
use thiserror::Error;

use spyglass_common::config;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionOutcome {
    Abort(String),
    Warn(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConditionError {
    #[error("unexpected {0:?}")]
    Unexpected(String),

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unterminated {0}")]
    Unterminated(&'static str),

    #[error("unknown function {0:?}, expected abort or warn")]
    UnknownFunction(String),

    #[error("unknown tag {0:?}")]
    UnknownTag(String),

    #[error("invalid pattern: {0}")]
    Pattern(String),
}

/// Renders `template` against `config` and returns every abort/warn it hit.
pub fn evaluate(template: &str, config: &Value) -> Result<Vec<ConditionOutcome>, ConditionError> {
    let segments = split_template(template)?;
    let mut pos = 0;
    let nodes = parse_block(&segments, &mut pos, &[])?;

    let mut outcomes = Vec::new();
    render(&nodes, config, &mut outcomes);
    Ok(outcomes)
}

// ------------------------------------------------------------------------
// Template structure
// ------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text,
    Tag(String),
    Output(String),
}

#[derive(Debug)]
enum Node {
    Output(Expr),
    If {
        branches: Vec<(Expr, Vec<Node>)>,
        otherwise: Vec<Node>,
    },
}

fn template_regex() -> Result<&'static Regex, ConditionError> {
    static RE: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\{%-?(.*?)-?%\}|\{\{-?(.*?)-?\}\}"))
        .as_ref()
        .map_err(|e| ConditionError::Pattern(e.to_string()))
}

fn split_template(template: &str) -> Result<Vec<Segment>, ConditionError> {
    let mut segments = Vec::new();
    let mut last = 0;
    for caps in template_regex()?.captures_iter(template) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        if whole.start() > last {
            segments.push(Segment::Text);
        }
        if let Some(tag) = caps.get(1) {
            segments.push(Segment::Tag(tag.as_str().trim().to_string()));
        } else if let Some(output) = caps.get(2) {
            segments.push(Segment::Output(output.as_str().trim().to_string()));
        }
        last = whole.end();
    }
    let rest = &template[last..];
    if rest.contains("{%") {
        return Err(ConditionError::Unterminated("tag"));
    }
    if rest.contains("{{") {
        return Err(ConditionError::Unterminated("expression"));
    }
    Ok(segments)
}

fn tag_keyword(tag: &str) -> (&str, &str) {
    let tag = tag.trim();
    match tag.split_once(char::is_whitespace) {
        Some((keyword, rest)) => (keyword, rest.trim()),
        None => (tag, ""),
    }
}

/// Parses nodes until one of `terminators` (left unconsumed) or the end.
fn parse_block(
    segments: &[Segment],
    pos: &mut usize,
    terminators: &[&str],
) -> Result<Vec<Node>, ConditionError> {
    let mut nodes = Vec::new();
    while *pos < segments.len() {
        match &segments[*pos] {
            Segment::Text => *pos += 1,
            Segment::Output(expr) => {
                nodes.push(Node::Output(parse_expr(expr)?));
                *pos += 1;
            }
            Segment::Tag(tag) => {
                let (keyword, rest) = tag_keyword(tag);
                if terminators.contains(&keyword) {
                    return Ok(nodes);
                }
                match keyword {
                    "if" => {
                        *pos += 1;
                        nodes.push(parse_if(segments, pos, rest)?);
                    }
                    "elif" | "else" | "endif" => {
                        return Err(ConditionError::Unexpected(tag.clone()));
                    }
                    other => return Err(ConditionError::UnknownTag(other.to_string())),
                }
            }
        }
    }
    if terminators.is_empty() {
        Ok(nodes)
    } else {
        Err(ConditionError::Unterminated("if block"))
    }
}

fn parse_if(segments: &[Segment], pos: &mut usize, condition: &str) -> Result<Node, ConditionError> {
    let mut branches = Vec::new();
    let mut otherwise = Vec::new();
    let mut condition = parse_expr(condition)?;

    loop {
        let body = parse_block(segments, pos, &["elif", "else", "endif"])?;
        let Some(Segment::Tag(tag)) = segments.get(*pos) else {
            return Err(ConditionError::Unterminated("if block"));
        };
        let (keyword, rest) = tag_keyword(tag);
        *pos += 1;
        branches.push((condition, body));
        match keyword {
            "elif" => condition = parse_expr(rest)?,
            "else" => {
                otherwise = parse_block(segments, pos, &["endif"])?;
                *pos += 1;
                break;
            }
            _ => break,
        }
    }

    Ok(Node::If { branches, otherwise })
}

fn render(nodes: &[Node], config: &Value, outcomes: &mut Vec<ConditionOutcome>) {
    let scope = Scope { config };
    for node in nodes {
        match node {
            Node::Output(Expr::Call(function, args)) => {
                let message = args
                    .first()
                    .map(|arg| display(&scope.eval(arg)))
                    .unwrap_or_default();
                match function {
                    Function::Abort => outcomes.push(ConditionOutcome::Abort(message)),
                    Function::Warn => outcomes.push(ConditionOutcome::Warn(message)),
                }
            }
            Node::Output(_) => {}
            Node::If { branches, otherwise } => {
                let taken = branches
                    .iter()
                    .find(|(condition, _)| truthy(&scope.eval(condition)))
                    .map(|(_, body)| body)
                    .unwrap_or(otherwise);
                render(taken, config, outcomes);
            }
        }
    }
}

// ------------------------------------------------------------------------
// Expressions
// ------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Function {
    Abort,
    Warn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

#[derive(Debug, Clone)]
enum Expr {
    Literal(Value),
    Path(Vec<String>),
    Not(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(Function, Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Op(&'static str),
}

fn token_regex() -> Result<&'static Regex, ConditionError> {
    static RE: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"^\s*(?:(?P<num>\d+(?:\.\d+)?)|(?P<str>"(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*')|(?P<op>==|!=|<=|>=|<|>|\(|\)|,)|(?P<ident>[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_-]+)*))"#,
        )
    })
    .as_ref()
    .map_err(|e| ConditionError::Pattern(e.to_string()))
}

fn tokenize(source: &str) -> Result<Vec<Token>, ConditionError> {
    const OPS: [&str; 9] = ["==", "!=", "<=", ">=", "<", ">", "(", ")", ","];

    let mut tokens = Vec::new();
    let mut rest = source;
    while !rest.trim().is_empty() {
        let Some(caps) = token_regex()?.captures(rest) else {
            return Err(ConditionError::Unexpected(rest.trim().to_string()));
        };
        if let Some(num) = caps.name("num") {
            let value = num
                .as_str()
                .parse::<f64>()
                .map_err(|_| ConditionError::Unexpected(num.as_str().to_string()))?;
            tokens.push(Token::Number(value));
        } else if let Some(s) = caps.name("str") {
            let raw = s.as_str();
            tokens.push(Token::Str(unescape(&raw[1..raw.len() - 1])));
        } else if let Some(op) = caps.name("op") {
            let op = OPS
                .iter()
                .find(|candidate| **candidate == op.as_str())
                .ok_or_else(|| ConditionError::Unexpected(op.as_str().to_string()))?;
            tokens.push(Token::Op(op));
        } else if let Some(ident) = caps.name("ident") {
            tokens.push(Token::Ident(ident.as_str().to_string()));
        }
        let consumed = caps.get(0).map(|m| m.end()).unwrap_or(rest.len());
        rest = &rest[consumed..];
    }
    Ok(tokens)
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn parse_expr(source: &str) -> Result<Expr, ConditionError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.or()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(ConditionError::Unexpected(format!("{token:?}"))),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat_ident(&mut self, word: &str) -> bool {
        if matches!(self.peek(), Some(Token::Ident(ident)) if ident == word) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Some(Token::Op(o)) if *o == op) {
            self.pos += 1;
            return true;
        }
        false
    }

    fn or(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.and()?;
        while self.eat_ident("or") {
            let right = self.and()?;
            left = Expr::Binary(BinOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.not()?;
        while self.eat_ident("and") {
            let right = self.not()?;
            left = Expr::Binary(BinOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not(&mut self) -> Result<Expr, ConditionError> {
        if self.eat_ident("not") {
            return Ok(Expr::Not(Box::new(self.not()?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ConditionError> {
        let left = self.primary()?;
        let op = match self.peek() {
            Some(Token::Op("==")) => BinOp::Eq,
            Some(Token::Op("!=")) => BinOp::Ne,
            Some(Token::Op("<")) => BinOp::Lt,
            Some(Token::Op("<=")) => BinOp::Le,
            Some(Token::Op(">")) => BinOp::Gt,
            Some(Token::Op(">=")) => BinOp::Ge,
            Some(Token::Ident(word)) if word == "in" => BinOp::In,
            Some(Token::Ident(word)) if word == "not" => {
                let is_not_in = matches!(self.tokens.get(self.pos + 1), Some(Token::Ident(w)) if w == "in");
                if !is_not_in {
                    return Ok(left);
                }
                self.pos += 1;
                BinOp::NotIn
            }
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.primary()?;
        Ok(Expr::Binary(op, Box::new(left), Box::new(right)))
    }

    fn primary(&mut self) -> Result<Expr, ConditionError> {
        match self.next() {
            None => Err(ConditionError::UnexpectedEnd),
            Some(Token::Number(n)) => Ok(Expr::Literal(number(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Op("(")) => {
                let inner = self.or()?;
                if !self.eat_op(")") {
                    return Err(ConditionError::Unterminated("parenthesis"));
                }
                Ok(inner)
            }
            Some(Token::Op(op)) => Err(ConditionError::Unexpected(op.to_string())),
            Some(Token::Ident(ident)) => match ident.as_str() {
                "true" | "True" => Ok(Expr::Literal(Value::Bool(true))),
                "false" | "False" => Ok(Expr::Literal(Value::Bool(false))),
                "none" | "None" | "null" => Ok(Expr::Literal(Value::Null)),
                "abort" | "warn" if matches!(self.peek(), Some(Token::Op("("))) => self.call(&ident),
                _ if matches!(self.peek(), Some(Token::Op("("))) => {
                    Err(ConditionError::UnknownFunction(ident.clone()))
                }
                _ => Ok(Expr::Path(ident.split('.').map(str::to_string).collect())),
            },
        }
    }

    fn call(&mut self, name: &str) -> Result<Expr, ConditionError> {
        let function = match name {
            "abort" => Function::Abort,
            _ => Function::Warn,
        };
        self.pos += 1; // "("
        let mut args = Vec::new();
        if !self.eat_op(")") {
            loop {
                args.push(self.or()?);
                if self.eat_op(")") {
                    break;
                }
                if !self.eat_op(",") {
                    return Err(ConditionError::Unterminated("call"));
                }
            }
        }
        Ok(Expr::Call(function, args))
    }
}

fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::Number((n as i64).into())
    } else {
        Value::Number(n.into())
    }
}

struct Scope<'a> {
    config: &'a Value,
}

impl Scope<'_> {
    fn eval(&self, expr: &Expr) -> Value {
        match expr {
            Expr::Literal(value) => value.clone(),
            Expr::Path(parts) => {
                let Some((root, rest)) = parts.split_first() else {
                    return Value::Null;
                };
                if root != "config" {
                    return Value::Null;
                }
                if rest.is_empty() {
                    return self.config.clone();
                }
                config::lookup(self.config, &rest.join("."))
                    .cloned()
                    .unwrap_or(Value::Null)
            }
            Expr::Not(inner) => Value::Bool(!truthy(&self.eval(inner))),
            Expr::Binary(BinOp::And, left, right) => {
                let left = self.eval(left);
                if !truthy(&left) {
                    return left;
                }
                self.eval(right)
            }
            Expr::Binary(BinOp::Or, left, right) => {
                let left = self.eval(left);
                if truthy(&left) {
                    return left;
                }
                self.eval(right)
            }
            Expr::Binary(op, left, right) => {
                let (left, right) = (self.eval(left), self.eval(right));
                Value::Bool(compare(*op, &left, &right))
            }
            // Calls only mean something at the top of an output block.
            Expr::Call(..) => Value::Null,
        }
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Sequence(seq) => !seq.is_empty(),
        Value::Mapping(map) => !map.is_empty(),
        Value::Tagged(tagged) => truthy(&tagged.value),
    }
}

fn ordering(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::String(s) => needle.as_str().is_some_and(|n| s.contains(n)),
        Value::Sequence(items) => items
            .iter()
            .any(|item| ordering(item, needle) == Some(Ordering::Equal)),
        Value::Mapping(map) => map.contains_key(needle),
        _ => false,
    }
}

fn compare(op: BinOp, left: &Value, right: &Value) -> bool {
    let ord = ordering(left, right);
    match op {
        BinOp::Eq => ord == Some(Ordering::Equal) || left == right,
        BinOp::Ne => !(ord == Some(Ordering::Equal) || left == right),
        BinOp::Lt => ord == Some(Ordering::Less),
        BinOp::Le => matches!(ord, Some(Ordering::Less | Ordering::Equal)),
        BinOp::Gt => ord == Some(Ordering::Greater),
        BinOp::Ge => matches!(ord, Some(Ordering::Greater | Ordering::Equal)),
        BinOp::In => contains(right, left),
        BinOp::NotIn => !contains(right, left),
        BinOp::And | BinOp::Or => false,
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
