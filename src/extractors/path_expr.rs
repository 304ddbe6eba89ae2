//! Path expressions: an XPath 1.0 subset over element nodes
//!
//! Supported: absolute and relative location paths, `//`, `.`, `..`, unions,
//! the child/descendant/parent/self/ancestor/sibling axes, name tests, `*`,
//! `node()`, and predicates built from positions, attributes, `text()`,
//! relative paths, literals, comparisons, `and`/`or` and a handful of core
//! functions. Expressions that would select text or attribute nodes are
//! rejected, since only elements have an extractable value.

use ego_tree::{NodeId, NodeRef, Tree};
use scraper::Node;
use std::collections::HashMap;
use std::fmt;

use super::SelectorKind;
use crate::error::SelectorError;

/// A parsed path expression
#[derive(Debug, Clone, PartialEq)]
pub struct PathExpr {
    source: String,
    branches: Vec<LocationPath>,
}

#[derive(Debug, Clone, PartialEq)]
struct LocationPath {
    absolute: bool,
    steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq)]
struct Step {
    axis: Axis,
    test: NodeTest,
    predicates: Vec<Expr>,
}

impl Step {
    fn new(axis: Axis, test: NodeTest) -> Self {
        Self {
            axis,
            test,
            predicates: vec![],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    Parent,
    SelfAxis,
    Ancestor,
    AncestorOrSelf,
    FollowingSibling,
    PrecedingSibling,
}

impl Axis {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "child" => Axis::Child,
            "descendant" => Axis::Descendant,
            "descendant-or-self" => Axis::DescendantOrSelf,
            "parent" => Axis::Parent,
            "self" => Axis::SelfAxis,
            "ancestor" => Axis::Ancestor,
            "ancestor-or-self" => Axis::AncestorOrSelf,
            "following-sibling" => Axis::FollowingSibling,
            "preceding-sibling" => Axis::PrecedingSibling,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum NodeTest {
    /// Lowercased element name
    Name(String),
    AnyElement,
    AnyNode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Function {
    Position,
    Last,
    Contains,
    StartsWith,
    NormalizeSpace,
    String,
    StringLength,
    Concat,
    Count,
    Not,
    True,
    False,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "position" => Function::Position,
            "last" => Function::Last,
            "contains" => Function::Contains,
            "starts-with" => Function::StartsWith,
            "normalize-space" => Function::NormalizeSpace,
            "string" => Function::String,
            "string-length" => Function::StringLength,
            "concat" => Function::Concat,
            "count" => Function::Count,
            "not" => Function::Not,
            "true" => Function::True,
            "false" => Function::False,
            _ => return None,
        })
    }

    /// Accepted argument counts (inclusive)
    fn arity(self) -> (usize, usize) {
        match self {
            Function::Position | Function::Last | Function::True | Function::False => (0, 0),
            Function::Contains | Function::StartsWith => (2, 2),
            Function::NormalizeSpace | Function::String | Function::StringLength => (0, 1),
            Function::Concat => (2, usize::MAX),
            Function::Count | Function::Not => (1, 1),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Compare(Box<Expr>, CmpOp, Box<Expr>),
    Number(f64),
    Literal(String),
    /// `@name`, or `@*` when `None`
    Attribute(Option<String>),
    /// `text()`: the direct text children of the context node
    Text,
    Path(LocationPath),
    Call(Function, Vec<Expr>),
}

// Tokenizer

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Slash,
    DoubleSlash,
    LBracket,
    RBracket,
    LParen,
    RParen,
    At,
    Comma,
    Pipe,
    Dot,
    DotDot,
    Star,
    AxisSep,
    Op(CmpOp),
    Name(String),
    Number(f64),
    Literal(String),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Slash => f.write_str("'/'"),
            Token::DoubleSlash => f.write_str("'//'"),
            Token::LBracket => f.write_str("'['"),
            Token::RBracket => f.write_str("']'"),
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
            Token::At => f.write_str("'@'"),
            Token::Comma => f.write_str("','"),
            Token::Pipe => f.write_str("'|'"),
            Token::Dot => f.write_str("'.'"),
            Token::DotDot => f.write_str("'..'"),
            Token::Star => f.write_str("'*'"),
            Token::AxisSep => f.write_str("'::'"),
            Token::Op(op) => write!(f, "operator {:?}", op),
            Token::Name(name) => write!(f, "name '{}'", name),
            Token::Number(n) => write!(f, "number {}", n),
            Token::Literal(s) => write!(f, "literal \"{}\"", s),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '/' if next == Some('/') => {
                tokens.push(Token::DoubleSlash);
                i += 2;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '.' if next == Some('.') => {
                tokens.push(Token::DotDot);
                i += 2;
            }
            '.' if next.is_some_and(|n| n.is_ascii_digit()) => {
                let (number, end) = read_number(&chars, i)?;
                tokens.push(Token::Number(number));
                i = end;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            ':' if next == Some(':') => {
                tokens.push(Token::AxisSep);
                i += 2;
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Op(CmpOp::Ne));
                i += 2;
            }
            '<' | '>' => {
                let or_equal = next == Some('=');
                let op = match (c, or_equal) {
                    ('<', true) => CmpOp::Le,
                    ('<', false) => CmpOp::Lt,
                    (_, true) => CmpOp::Ge,
                    (_, false) => CmpOp::Gt,
                };
                tokens.push(Token::Op(op));
                i += if or_equal { 2 } else { 1 };
            }
            '=' => {
                tokens.push(Token::Op(CmpOp::Eq));
                i += 1;
            }
            '[' | ']' | '(' | ')' | '@' | ',' | '|' | '*' => {
                tokens.push(match c {
                    '[' => Token::LBracket,
                    ']' => Token::RBracket,
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    '@' => Token::At,
                    ',' => Token::Comma,
                    '|' => Token::Pipe,
                    _ => Token::Star,
                });
                i += 1;
            }
            '"' | '\'' => {
                let close = chars[i + 1..]
                    .iter()
                    .position(|ch| *ch == c)
                    .ok_or_else(|| format!("unterminated string literal at offset {}", i))?;
                tokens.push(Token::Literal(chars[i + 1..i + 1 + close].iter().collect()));
                i += close + 2;
            }
            d if d.is_ascii_digit() => {
                let (number, end) = read_number(&chars, i)?;
                tokens.push(Token::Number(number));
                i = end;
            }
            n if n.is_alphabetic() || n == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '-' | '_' | '.'))
                {
                    i += 1;
                }
                tokens.push(Token::Name(chars[start..i].iter().collect()));
            }
            other => return Err(format!("unexpected character '{}' at offset {}", other, i)),
        }
    }

    Ok(tokens)
}

fn read_number(chars: &[char], start: usize) -> Result<(f64, usize), String> {
    let mut end = start;
    let mut seen_dot = false;
    while end < chars.len() && (chars[end].is_ascii_digit() || (chars[end] == '.' && !seen_dot)) {
        if chars[end] == '.' {
            // `1..` is not a number followed by a parent step
            if chars.get(end + 1) == Some(&'.') {
                break;
            }
            seen_dot = true;
        }
        end += 1;
    }
    let text: String = chars[start..end].iter().collect();
    text.parse::<f64>()
        .map(|n| (n, end))
        .map_err(|_| format!("invalid number '{}'", text))
}

// Parser

/// Nesting bound for parentheses, predicates, call arguments and operator chains
const MAX_DEPTH: usize = 128;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    fn enter(&mut self) -> Result<(), String> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err("expression nested too deeply".into());
        }
        Ok(())
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        match self.peek() {
            Some(Token::Name(name)) if name == keyword => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn expect(&mut self, token: Token) -> Result<(), String> {
        match self.advance() {
            Some(found) if found == token => Ok(()),
            Some(found) => Err(format!("expected {} but found {}", token, found)),
            None => Err(format!("expected {} but the expression ended", token)),
        }
    }

    fn starts_step(&self) -> bool {
        matches!(
            self.peek(),
            Some(Token::Name(_) | Token::Star | Token::Dot | Token::DotDot | Token::At)
        )
    }

    fn parse_union(&mut self) -> Result<Vec<LocationPath>, String> {
        let mut branches = vec![self.parse_location_path()?];
        while self.eat(&Token::Pipe) {
            branches.push(self.parse_location_path()?);
        }
        Ok(branches)
    }

    fn parse_location_path(&mut self) -> Result<LocationPath, String> {
        let mut steps = Vec::new();
        let absolute = match self.peek() {
            Some(Token::Slash) => {
                self.pos += 1;
                if !self.starts_step() {
                    // bare "/" selects the document node
                    return Ok(LocationPath {
                        absolute: true,
                        steps,
                    });
                }
                true
            }
            Some(Token::DoubleSlash) => {
                self.pos += 1;
                steps.push(Step::new(Axis::DescendantOrSelf, NodeTest::AnyNode));
                true
            }
            _ => false,
        };

        steps.push(self.parse_step()?);
        loop {
            if self.eat(&Token::Slash) {
                steps.push(self.parse_step()?);
            } else if self.eat(&Token::DoubleSlash) {
                steps.push(Step::new(Axis::DescendantOrSelf, NodeTest::AnyNode));
                steps.push(self.parse_step()?);
            } else {
                break;
            }
        }

        Ok(LocationPath { absolute, steps })
    }

    fn parse_step(&mut self) -> Result<Step, String> {
        let mut step = match self.advance() {
            Some(Token::Dot) => return Ok(Step::new(Axis::SelfAxis, NodeTest::AnyNode)),
            Some(Token::DotDot) => return Ok(Step::new(Axis::Parent, NodeTest::AnyNode)),
            Some(Token::At) => {
                return Err(
                    "attribute nodes cannot be selected; use a predicate such as [@name]".into(),
                )
            }
            Some(Token::Star) => Step::new(Axis::Child, NodeTest::AnyElement),
            Some(Token::Name(name)) => {
                if self.eat(&Token::AxisSep) {
                    let axis =
                        Axis::from_name(&name).ok_or_else(|| format!("unsupported axis '{}'", name))?;
                    Step::new(axis, self.parse_node_test()?)
                } else if self.peek() == Some(&Token::LParen) {
                    Step::new(Axis::Child, self.parse_node_type(&name)?)
                } else {
                    Step::new(Axis::Child, NodeTest::Name(name.to_ascii_lowercase()))
                }
            }
            Some(token) => return Err(format!("unexpected {}", token)),
            None => return Err("unexpected end of expression".into()),
        };

        while self.eat(&Token::LBracket) {
            let predicate = self.parse_or()?;
            self.expect(Token::RBracket)?;
            step.predicates.push(predicate);
        }
        Ok(step)
    }

    fn parse_node_test(&mut self) -> Result<NodeTest, String> {
        match self.advance() {
            Some(Token::Star) => Ok(NodeTest::AnyElement),
            Some(Token::Name(name)) if self.peek() == Some(&Token::LParen) => {
                self.parse_node_type(&name)
            }
            Some(Token::Name(name)) => Ok(NodeTest::Name(name.to_ascii_lowercase())),
            Some(token) => Err(format!("expected a node test but found {}", token)),
            None => Err("expected a node test but the expression ended".into()),
        }
    }

    fn parse_node_type(&mut self, name: &str) -> Result<NodeTest, String> {
        self.expect(Token::LParen)?;
        self.expect(Token::RParen)?;
        match name {
            "node" => Ok(NodeTest::AnyNode),
            "text" | "comment" | "processing-instruction" => Err(format!(
                "{}() nodes cannot be selected; only elements are supported",
                name
            )),
            _ => Err(format!("unknown node test '{}()'", name)),
        }
    }

    // Operator chains nest to the left, so every operator counts as a level
    fn parse_or(&mut self) -> Result<Expr, String> {
        let base = self.depth;
        self.enter()?;
        let mut left = self.parse_and()?;
        while self.eat_keyword("or") {
            self.enter()?;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        self.depth = base;
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let base = self.depth;
        let mut left = self.parse_equality()?;
        while self.eat_keyword("and") {
            self.enter()?;
            let right = self.parse_equality()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        self.depth = base;
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, String> {
        let base = self.depth;
        let mut left = self.parse_relational()?;
        while let Some(Token::Op(op @ (CmpOp::Eq | CmpOp::Ne))) = self.peek().cloned() {
            self.pos += 1;
            self.enter()?;
            let right = self.parse_relational()?;
            left = Expr::Compare(Box::new(left), op, Box::new(right));
        }
        self.depth = base;
        Ok(left)
    }

    fn parse_relational(&mut self) -> Result<Expr, String> {
        let base = self.depth;
        let mut left = self.parse_primary()?;
        while let Some(Token::Op(op @ (CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge))) =
            self.peek().cloned()
        {
            self.pos += 1;
            self.enter()?;
            let right = self.parse_primary()?;
            left = Expr::Compare(Box::new(left), op, Box::new(right));
        }
        self.depth = base;
        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.peek().cloned() {
            Some(Token::Number(n)) => {
                self.pos += 1;
                Ok(Expr::Number(n))
            }
            Some(Token::Literal(s)) => {
                self.pos += 1;
                Ok(Expr::Literal(s))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::At) => {
                self.pos += 1;
                match self.advance() {
                    Some(Token::Name(name)) => Ok(Expr::Attribute(Some(name.to_ascii_lowercase()))),
                    Some(Token::Star) => Ok(Expr::Attribute(None)),
                    Some(token) => Err(format!("expected an attribute name but found {}", token)),
                    None => Err("expected an attribute name but the expression ended".into()),
                }
            }
            Some(Token::Name(name)) if self.peek_at(1) == Some(&Token::LParen) => {
                if name == "text" {
                    self.pos += 1;
                    self.expect(Token::LParen)?;
                    self.expect(Token::RParen)?;
                    return Ok(Expr::Text);
                }
                if name == "node" {
                    return Ok(Expr::Path(self.parse_location_path()?));
                }
                self.parse_call(&name)
            }
            _ => Ok(Expr::Path(self.parse_location_path()?)),
        }
    }

    fn parse_call(&mut self, name: &str) -> Result<Expr, String> {
        let function =
            Function::from_name(name).ok_or_else(|| format!("unknown function '{}()'", name))?;
        self.pos += 1;
        self.expect(Token::LParen)?;

        let mut args = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                args.push(self.parse_or()?);
                if self.eat(&Token::Comma) {
                    continue;
                }
                self.expect(Token::RParen)?;
                break;
            }
        }

        let (min, max) = function.arity();
        if args.len() < min || args.len() > max {
            return Err(format!(
                "{}() takes {} argument(s), got {}",
                name,
                if min == max { min.to_string() } else { format!("at least {}", min) },
                args.len()
            ));
        }
        Ok(Expr::Call(function, args))
    }
}

// Evaluation

#[derive(Debug, Clone, PartialEq)]
enum Value {
    /// String values of the nodes in a node-set
    Nodes(Vec<String>),
    Str(String),
    Num(f64),
    Bool(bool),
}

impl Value {
    fn truthy(&self) -> bool {
        match self {
            Value::Nodes(nodes) => !nodes.is_empty(),
            Value::Str(s) => !s.is_empty(),
            Value::Num(n) => *n != 0.0 && !n.is_nan(),
            Value::Bool(b) => *b,
        }
    }

    fn string(&self) -> String {
        match self {
            Value::Nodes(nodes) => nodes.first().cloned().unwrap_or_default(),
            Value::Str(s) => s.clone(),
            Value::Num(n) => format_number(*n),
            Value::Bool(b) => b.to_string(),
        }
    }

    fn number(&self) -> f64 {
        match self {
            Value::Num(n) => *n,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            other => other.string().trim().parse().unwrap_or(f64::NAN),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn compare(left: &Value, op: CmpOp, right: &Value) -> bool {
    match (left, right) {
        (Value::Nodes(_), Value::Bool(_)) | (Value::Bool(_), Value::Nodes(_)) => {
            compare_atomic(&Value::Bool(left.truthy()), op, &Value::Bool(right.truthy()))
        }
        (Value::Nodes(l), Value::Nodes(r)) => l.iter().any(|a| {
            r.iter()
                .any(|b| compare_atomic(&Value::Str(a.clone()), op, &Value::Str(b.clone())))
        }),
        (Value::Nodes(l), other) => l
            .iter()
            .any(|a| compare_atomic(&Value::Str(a.clone()), op, other)),
        (other, Value::Nodes(r)) => r
            .iter()
            .any(|b| compare_atomic(other, op, &Value::Str(b.clone()))),
        _ => compare_atomic(left, op, right),
    }
}

fn compare_atomic(left: &Value, op: CmpOp, right: &Value) -> bool {
    match op {
        CmpOp::Eq | CmpOp::Ne => {
            let equal = if matches!(left, Value::Bool(_)) || matches!(right, Value::Bool(_)) {
                left.truthy() == right.truthy()
            } else if matches!(left, Value::Num(_)) || matches!(right, Value::Num(_)) {
                left.number() == right.number()
            } else {
                left.string() == right.string()
            };
            equal == (op == CmpOp::Eq)
        }
        CmpOp::Lt => left.number() < right.number(),
        CmpOp::Le => left.number() <= right.number(),
        CmpOp::Gt => left.number() > right.number(),
        CmpOp::Ge => left.number() >= right.number(),
    }
}

/// Context node plus its proximity position and the size of its node-set
struct Focus {
    node: NodeId,
    position: usize,
    size: usize,
}

struct Evaluator<'a> {
    tree: &'a Tree<Node>,
    order: HashMap<NodeId, usize>,
}

fn participates(node: &NodeRef<'_, Node>) -> bool {
    let value = node.value();
    value.is_element() || value.is_document() || value.is_fragment()
}

impl<'a> Evaluator<'a> {
    fn new(tree: &'a Tree<Node>) -> Self {
        let order = tree
            .root()
            .descendants()
            .enumerate()
            .map(|(i, node)| (node.id(), i))
            .collect();
        Self { tree, order }
    }

    fn sort_unique(&self, nodes: &mut Vec<NodeId>) {
        nodes.sort_by_key(|id| self.order.get(id).copied().unwrap_or(usize::MAX));
        nodes.dedup();
    }

    fn select(&self, path: &LocationPath, context: NodeId) -> Vec<NodeId> {
        let start = if path.absolute {
            self.tree.root().id()
        } else {
            context
        };
        let mut current = vec![start];
        for step in &path.steps {
            let mut next = Vec::new();
            for node in &current {
                next.extend(self.apply_step(step, *node));
            }
            self.sort_unique(&mut next);
            current = next;
        }
        current
    }

    fn apply_step(&self, step: &Step, node: NodeId) -> Vec<NodeId> {
        let Some(node) = self.tree.get(node) else {
            return vec![];
        };

        // axis order: reverse axes yield nearest node first, which is what
        // positional predicates count from
        let mut candidates: Vec<NodeId> = self
            .axis_nodes(step.axis, node)
            .into_iter()
            .filter(|n| matches_test(&step.test, n))
            .map(|n| n.id())
            .collect();

        for predicate in &step.predicates {
            let size = candidates.len();
            candidates = candidates
                .into_iter()
                .enumerate()
                .filter(|(i, id)| {
                    let focus = Focus {
                        node: *id,
                        position: i + 1,
                        size,
                    };
                    match self.eval(predicate, &focus) {
                        Value::Num(n) => n == focus.position as f64,
                        other => other.truthy(),
                    }
                })
                .map(|(_, id)| id)
                .collect();
        }
        candidates
    }

    fn axis_nodes(&self, axis: Axis, node: NodeRef<'a, Node>) -> Vec<NodeRef<'a, Node>> {
        let mut nodes: Vec<NodeRef<'a, Node>> = match axis {
            Axis::Child => node.children().collect(),
            Axis::Descendant => node.descendants().skip(1).collect(),
            Axis::DescendantOrSelf => node.descendants().collect(),
            Axis::Parent => node.parent().into_iter().collect(),
            Axis::SelfAxis => vec![node],
            Axis::Ancestor => node.ancestors().collect(),
            Axis::AncestorOrSelf => std::iter::once(node).chain(node.ancestors()).collect(),
            Axis::FollowingSibling => node.next_siblings().collect(),
            Axis::PrecedingSibling => node.prev_siblings().collect(),
        };
        nodes.retain(participates);
        nodes
    }

    fn eval(&self, expr: &Expr, focus: &Focus) -> Value {
        match expr {
            Expr::Or(l, r) => Value::Bool(self.eval(l, focus).truthy() || self.eval(r, focus).truthy()),
            Expr::And(l, r) => {
                Value::Bool(self.eval(l, focus).truthy() && self.eval(r, focus).truthy())
            }
            Expr::Compare(l, op, r) => {
                let left = self.eval(l, focus);
                let right = self.eval(r, focus);
                Value::Bool(compare(&left, *op, &right))
            }
            Expr::Number(n) => Value::Num(*n),
            Expr::Literal(s) => Value::Str(s.clone()),
            Expr::Attribute(name) => Value::Nodes(self.attributes(focus.node, name.as_deref())),
            Expr::Text => Value::Nodes(self.text_children(focus.node)),
            Expr::Path(path) => Value::Nodes(
                self.select(path, focus.node)
                    .into_iter()
                    .map(|id| self.string_value(id))
                    .collect(),
            ),
            Expr::Call(function, args) => self.call(*function, args, focus),
        }
    }

    fn call(&self, function: Function, args: &[Expr], focus: &Focus) -> Value {
        let arg = |i: usize| self.eval(&args[i], focus);
        let string_arg = |i: usize| match args.get(i) {
            Some(expr) => self.eval(expr, focus).string(),
            None => self.string_value(focus.node),
        };

        match function {
            Function::Position => Value::Num(focus.position as f64),
            Function::Last => Value::Num(focus.size as f64),
            Function::Contains => Value::Bool(arg(0).string().contains(&arg(1).string())),
            Function::StartsWith => Value::Bool(arg(0).string().starts_with(&arg(1).string())),
            Function::NormalizeSpace => Value::Str(
                string_arg(0).split_whitespace().collect::<Vec<_>>().join(" "),
            ),
            Function::String => Value::Str(string_arg(0)),
            Function::StringLength => Value::Num(string_arg(0).chars().count() as f64),
            Function::Concat => Value::Str(
                args.iter()
                    .map(|a| self.eval(a, focus).string())
                    .collect::<String>(),
            ),
            Function::Count => match arg(0) {
                Value::Nodes(nodes) => Value::Num(nodes.len() as f64),
                _ => Value::Num(f64::NAN),
            },
            Function::Not => Value::Bool(!arg(0).truthy()),
            Function::True => Value::Bool(true),
            Function::False => Value::Bool(false),
        }
    }

    fn attributes(&self, node: NodeId, name: Option<&str>) -> Vec<String> {
        let Some(element) = self.tree.get(node).and_then(|n| n.value().as_element()) else {
            return vec![];
        };
        match name {
            Some(name) => element.attr(name).map(String::from).into_iter().collect(),
            None => element.attrs().map(|(_, value)| value.to_string()).collect(),
        }
    }

    fn text_children(&self, node: NodeId) -> Vec<String> {
        let Some(node) = self.tree.get(node) else {
            return vec![];
        };
        node.children()
            .filter_map(|child| child.value().as_text().map(|t| t.to_string()))
            .collect()
    }

    fn string_value(&self, node: NodeId) -> String {
        let Some(node) = self.tree.get(node) else {
            return String::new();
        };
        node.descendants()
            .filter_map(|n| n.value().as_text().map(|t| t.to_string()))
            .collect()
    }
}

fn matches_test(test: &NodeTest, node: &NodeRef<'_, Node>) -> bool {
    match test {
        NodeTest::AnyNode => true,
        NodeTest::AnyElement => node.value().is_element(),
        NodeTest::Name(name) => node
            .value()
            .as_element()
            .is_some_and(|el| el.name().eq_ignore_ascii_case(name)),
    }
}

impl PathExpr {
    pub fn parse(source: &str) -> Result<Self, SelectorError> {
        let fail = |message: String| SelectorError::new(SelectorKind::Path, source, message);

        if source.trim().is_empty() {
            return Err(fail("empty expression".into()));
        }
        let tokens = tokenize(source).map_err(fail)?;
        let mut parser = Parser::new(tokens);
        let branches = parser.parse_union().map_err(fail)?;
        if let Some(token) = parser.peek() {
            return Err(fail(format!("unexpected {} after end of expression", token)));
        }

        Ok(Self {
            source: source.to_string(),
            branches,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Matching elements in document order. Top-level relative paths are
    /// evaluated from the document node.
    pub fn evaluate(&self, tree: &Tree<Node>) -> Vec<NodeId> {
        let evaluator = Evaluator::new(tree);
        let root = tree.root().id();

        let mut found = Vec::new();
        for branch in &self.branches {
            found.extend(evaluator.select(branch, root));
        }
        evaluator.sort_unique(&mut found);
        found.retain(|id| tree.get(*id).is_some_and(|n| n.value().is_element()));
        found
    }
}
