//! Parameter Expression Evaluation
//!
//! A small pure interpreter for the inline expressions that compute a
//! step's effective input value from other bound values: field access,
//! string concatenation and arithmetic over an immutable value map.
//! Templates embed expressions as `$(...)`; literal text passes through.
//!
//! Evaluation is deterministic and side-effect-free: no clock, no
//! environment, no filesystem. A reference to a missing field or an
//! out-of-range index is an [`ExprError`].

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use thiserror::Error;

use super::model::{FileValue, ParamValue};

/// Error raised by expression parsing or evaluation.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{0}")]
pub struct ExprError(pub String);

/// The immutable value map an expression evaluates against.
pub type Scope = BTreeMap<String, ParamValue>;

/// Properties available on file handles.
static FILE_PROPS: Lazy<BTreeMap<&'static str, fn(&FileValue) -> String>> = Lazy::new(|| {
    let mut props: BTreeMap<&'static str, fn(&FileValue) -> String> = BTreeMap::new();
    props.insert("path", |f| f.path.display().to_string());
    props.insert("basename", |f| f.basename());
    props.insert("nameroot", |f| f.nameroot());
    props.insert("nameext", |f| f.nameext());
    props.insert("dirname", |f| f.dirname());
    props
});

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Int(i64),
    Float(f64),
    Plus,
    Minus,
    Star,
    Slash,
    Dot,
    LParen,
    RParen,
    LBracket,
    RBracket,
}

fn tokenize(text: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(&ch) = chars.peek() {
        match ch {
            c if c.is_whitespace() => {
                chars.next();
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '.' => {
                chars.next();
                tokens.push(Token::Dot);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '[' => {
                chars.next();
                tokens.push(Token::LBracket);
            }
            ']' => {
                chars.next();
                tokens.push(Token::RBracket);
            }
            '\'' | '"' => {
                let quote = ch;
                chars.next();
                let mut literal = String::new();
                loop {
                    match chars.next() {
                        Some(c) if c == quote => break,
                        Some(c) => literal.push(c),
                        None => {
                            return Err(ExprError("unterminated string literal".to_string()))
                        }
                    }
                }
                tokens.push(Token::Str(literal));
            }
            c if c.is_ascii_digit() => {
                let mut number = String::new();
                let mut is_float = false;
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() {
                        number.push(c);
                        chars.next();
                    } else if c == '.' {
                        // A digit must follow for this to be a decimal
                        // point rather than a property access.
                        let mut ahead = chars.clone();
                        ahead.next();
                        match ahead.peek() {
                            Some(d) if d.is_ascii_digit() => {
                                is_float = true;
                                number.push(c);
                                chars.next();
                            }
                            _ => break,
                        }
                    } else {
                        break;
                    }
                }
                if is_float {
                    let value: f64 = number
                        .parse()
                        .map_err(|_| ExprError(format!("invalid number '{}'", number)))?;
                    tokens.push(Token::Float(value));
                } else {
                    let value: i64 = number
                        .parse()
                        .map_err(|_| ExprError(format!("invalid number '{}'", number)))?;
                    tokens.push(Token::Int(value));
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => return Err(ExprError(format!("unexpected character '{}'", other))),
        }
    }

    Ok(tokens)
}

#[derive(Debug, Clone)]
enum Ast {
    Lit(ParamValue),
    Var(String),
    Field(Box<Ast>, String),
    Index(Box<Ast>, Box<Ast>),
    Add(Box<Ast>, Box<Ast>),
    Sub(Box<Ast>, Box<Ast>),
    Mul(Box<Ast>, Box<Ast>),
    Div(Box<Ast>, Box<Ast>),
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
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, token: Token) -> Result<(), ExprError> {
        match self.next() {
            Some(t) if t == token => Ok(()),
            other => Err(ExprError(format!(
                "expected {:?}, found {:?}",
                token, other
            ))),
        }
    }

    fn expression(&mut self) -> Result<Ast, ExprError> {
        let mut left = self.term()?;
        while let Some(op) = self.peek().cloned() {
            match op {
                Token::Plus => {
                    self.next();
                    left = Ast::Add(Box::new(left), Box::new(self.term()?));
                }
                Token::Minus => {
                    self.next();
                    left = Ast::Sub(Box::new(left), Box::new(self.term()?));
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Ast, ExprError> {
        let mut left = self.postfix()?;
        while let Some(op) = self.peek().cloned() {
            match op {
                Token::Star => {
                    self.next();
                    left = Ast::Mul(Box::new(left), Box::new(self.postfix()?));
                }
                Token::Slash => {
                    self.next();
                    left = Ast::Div(Box::new(left), Box::new(self.postfix()?));
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn postfix(&mut self) -> Result<Ast, ExprError> {
        let mut base = self.primary()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.next();
                    match self.next() {
                        Some(Token::Ident(name)) => {
                            base = Ast::Field(Box::new(base), name);
                        }
                        other => {
                            return Err(ExprError(format!(
                                "expected field name after '.', found {:?}",
                                other
                            )))
                        }
                    }
                }
                Some(Token::LBracket) => {
                    self.next();
                    let index = self.expression()?;
                    self.expect(Token::RBracket)?;
                    base = Ast::Index(Box::new(base), Box::new(index));
                }
                _ => break,
            }
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Ast, ExprError> {
        match self.next() {
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Ok(Ast::Lit(ParamValue::Boolean(true))),
                "false" => Ok(Ast::Lit(ParamValue::Boolean(false))),
                _ => Ok(Ast::Var(name)),
            },
            Some(Token::Str(s)) => Ok(Ast::Lit(ParamValue::Str(s))),
            Some(Token::Int(i)) => Ok(Ast::Lit(ParamValue::Int(i))),
            Some(Token::Float(x)) => Ok(Ast::Lit(ParamValue::Float(x))),
            Some(Token::LParen) => {
                let inner = self.expression()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            other => Err(ExprError(format!("unexpected token {:?}", other))),
        }
    }
}

fn parse(text: &str) -> Result<Ast, ExprError> {
    let tokens = tokenize(text)?;
    if tokens.is_empty() {
        return Err(ExprError("empty expression".to_string()));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let ast = parser.expression()?;
    if parser.pos != parser.tokens.len() {
        return Err(ExprError(format!(
            "trailing tokens after expression in '{}'",
            text
        )));
    }
    Ok(ast)
}

fn eval_ast(ast: &Ast, scope: &Scope) -> Result<ParamValue, ExprError> {
    match ast {
        Ast::Lit(value) => Ok(value.clone()),
        Ast::Var(name) => scope
            .get(name)
            .cloned()
            .ok_or_else(|| ExprError(format!("unknown identifier '{}'", name))),
        Ast::Field(base, field) => {
            let value = eval_ast(base, scope)?;
            match value {
                ParamValue::Record(fields) => fields
                    .get(field)
                    .cloned()
                    .ok_or_else(|| ExprError(format!("record has no field '{}'", field))),
                ParamValue::File(file) => match FILE_PROPS.get(field.as_str()) {
                    Some(prop) => Ok(ParamValue::Str(prop(&file))),
                    None => Err(ExprError(format!(
                        "files have no property '{}'",
                        field
                    ))),
                },
                ParamValue::Array(items) if field == "length" => {
                    Ok(ParamValue::Int(items.len() as i64))
                }
                other => Err(ExprError(format!(
                    "cannot access field '{}' on {}",
                    field,
                    other.param_type()
                ))),
            }
        }
        Ast::Index(base, index) => {
            let value = eval_ast(base, scope)?;
            let idx = match eval_ast(index, scope)? {
                ParamValue::Int(i) => i,
                other => {
                    return Err(ExprError(format!(
                        "array index must be an int, found {}",
                        other.param_type()
                    )))
                }
            };
            match value {
                ParamValue::Array(items) => {
                    if idx < 0 || idx as usize >= items.len() {
                        Err(ExprError(format!(
                            "index {} out of range for array of length {}",
                            idx,
                            items.len()
                        )))
                    } else {
                        Ok(items[idx as usize].clone())
                    }
                }
                other => Err(ExprError(format!(
                    "cannot index into {}",
                    other.param_type()
                ))),
            }
        }
        Ast::Add(a, b) => {
            let left = eval_ast(a, scope)?;
            let right = eval_ast(b, scope)?;
            match (&left, &right) {
                (ParamValue::Str(_), _) | (_, ParamValue::Str(_)) => {
                    Ok(ParamValue::Str(format!("{}{}", left.render(), right.render())))
                }
                _ => numeric_op(&left, &right, "+", i64::checked_add, |a, b| a + b),
            }
        }
        Ast::Sub(a, b) => {
            let left = eval_ast(a, scope)?;
            let right = eval_ast(b, scope)?;
            numeric_op(&left, &right, "-", i64::checked_sub, |a, b| a - b)
        }
        Ast::Mul(a, b) => {
            let left = eval_ast(a, scope)?;
            let right = eval_ast(b, scope)?;
            numeric_op(&left, &right, "*", i64::checked_mul, |a, b| a * b)
        }
        Ast::Div(a, b) => {
            let left = eval_ast(a, scope)?;
            let right = eval_ast(b, scope)?;
            match (&left, &right) {
                (_, ParamValue::Int(0)) => Err(ExprError("division by zero".to_string())),
                _ => numeric_op(&left, &right, "/", i64::checked_div, |a, b| a / b),
            }
        }
    }
}

fn numeric_op(
    left: &ParamValue,
    right: &ParamValue,
    op: &str,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<ParamValue, ExprError> {
    match (left, right) {
        (ParamValue::Int(a), ParamValue::Int(b)) => int_op(*a, *b)
            .map(ParamValue::Int)
            .ok_or_else(|| ExprError(format!("integer overflow in '{} {} {}'", a, op, b))),
        (ParamValue::Int(a), ParamValue::Float(b)) => Ok(ParamValue::Float(float_op(*a as f64, *b))),
        (ParamValue::Float(a), ParamValue::Int(b)) => Ok(ParamValue::Float(float_op(*a, *b as f64))),
        (ParamValue::Float(a), ParamValue::Float(b)) => Ok(ParamValue::Float(float_op(*a, *b))),
        _ => Err(ExprError(format!(
            "operator '{}' needs numeric operands, found {} and {}",
            op,
            left.param_type(),
            right.param_type()
        ))),
    }
}

/// Evaluates a bare expression against a scope.
///
/// # Example
/// ```
/// use std::collections::BTreeMap;
/// use pipegraph::workflow::expr::evaluate;
/// use pipegraph::workflow::model::{FileValue, ParamValue};
///
/// let mut scope = BTreeMap::new();
/// scope.insert("bam".to_string(), ParamValue::File(FileValue::new("sample.bam")));
/// let value = evaluate("bam.nameroot + '.vcf'", &scope).unwrap();
/// assert_eq!(value, ParamValue::Str("sample.vcf".to_string()));
/// ```
pub fn evaluate(text: &str, scope: &Scope) -> Result<ParamValue, ExprError> {
    eval_ast(&parse(text)?, scope)
}

/// Finds the `$( ... )` segment whose open paren sits at `open`,
/// returning the index one past the matching close paren.
fn segment_end(text: &str, open: usize) -> Result<usize, ExprError> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut i = open;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'\'' | b'"' => quote = Some(b),
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(i + 1);
                    }
                }
                _ => {}
            },
        }
        i += 1;
    }
    Err(ExprError(format!(
        "unbalanced '$(' in template '{}'",
        text
    )))
}

/// Interpolates every `$( ... )` segment in a template, rendering each
/// result; literal text passes through unchanged.
pub fn interpolate(template: &str, scope: &Scope) -> Result<String, ExprError> {
    let mut output = String::new();
    let mut rest = template;
    while let Some(pos) = rest.find("$(") {
        output.push_str(&rest[..pos]);
        let end = segment_end(rest, pos + 1)?;
        let inner = &rest[pos + 2..end - 1];
        let value = evaluate(inner, scope)?;
        if matches!(value, ParamValue::Record(_)) {
            return Err(ExprError(format!(
                "expression '{}' yields a record, which cannot be rendered as text",
                inner
            )));
        }
        output.push_str(&value.render());
        rest = &rest[end..];
    }
    output.push_str(rest);
    Ok(output)
}

/// Evaluates a binding template. A template that is exactly one
/// `$( ... )` expression keeps the expression's type; anything else
/// interpolates to a string.
pub fn evaluate_template(template: &str, scope: &Scope) -> Result<ParamValue, ExprError> {
    let trimmed = template.trim();
    if trimmed.starts_with("$(") {
        let end = segment_end(trimmed, 1)?;
        if end == trimmed.len() {
            return evaluate(&trimmed[2..end - 1], scope);
        }
    }
    interpolate(trimmed, scope).map(ParamValue::Str)
}

/// Extracts the identifier paths a bare expression references
/// (`inputs.bam.nameroot` yields `["inputs", "bam", "nameroot"]`).
fn expression_references(text: &str) -> Vec<Vec<String>> {
    let tokens = match tokenize(text) {
        Ok(tokens) => tokens,
        Err(_) => return Vec::new(),
    };

    let mut paths = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        if let Token::Ident(root) = &tokens[i] {
            let mut path = vec![root.clone()];
            let mut j = i + 1;
            while j + 1 < tokens.len() {
                match (&tokens[j], &tokens[j + 1]) {
                    (Token::Dot, Token::Ident(field)) => {
                        path.push(field.clone());
                        j += 2;
                    }
                    _ => break,
                }
            }
            paths.push(path);
            i = j;
        } else {
            i += 1;
        }
    }
    paths
}

/// Extracts identifier paths referenced by every `$( ... )` segment in a
/// binding template. Used by the resolver to decide whether a template
/// can be evaluated eagerly.
pub fn template_references(template: &str) -> Vec<Vec<String>> {
    let mut paths = Vec::new();
    let mut rest = template;
    while let Some(pos) = rest.find("$(") {
        let end = match segment_end(rest, pos + 1) {
            Ok(end) => end,
            Err(_) => break,
        };
        paths.extend(expression_references(&rest[pos + 2..end - 1]));
        rest = &rest[end..];
    }
    paths
}
