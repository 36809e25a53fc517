//! Whitelisted expression language for weighted sorting.
//!
//! Grammar:
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/' | '%') unary)*
//! unary   := '-' unary | primary
//! primary := NUMBER | STRING | IDENT | IDENT '(' [expr (',' expr)*] ')' | '(' expr ')'
//! ```
//!
//! Identifiers must name an allowed record field and calls must name an
//! allowed pure function; both are checked when the formula is parsed.
//! Evaluation never does anything but arithmetic over a record's values.

use serde_json::{Map, Value};
use thiserror::Error;

const MAX_FORMULA_LEN: usize = 512;
const MAX_DEPTH: usize = 32;

/// Record fields a formula may read.
pub const ALLOWED_IDENTIFIERS: &[&str] = &[
    "rating",
    "page_count",
    "file_size",
    "created_at",
    "updated_at",
    "visited_at",
    "version",
    "total_reading_time",
    "review_count",
    "due_date",
    "last_accessed_at",
    "is_visible",
    "title",
    "author",
    "filename",
    "subject",
    "keywords",
    "notes",
    "tags",
];

/// Errors raised while parsing or evaluating a formula.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormulaError {
    #[error("syntax error at {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("identifier not allowed: {0}")]
    UnknownIdentifier(String),

    #[error("function not allowed: {0}")]
    UnknownFunction(String),

    #[error("{function} expects {expected} argument(s), got {actual}")]
    Arity {
        function: &'static str,
        expected: &'static str,
        actual: usize,
    },

    #[error("type error: {0}")]
    Type(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("formula too long or too deeply nested")]
    TooComplex,
}

impl FormulaError {
    /// True when the formula names an identifier or function outside the
    /// allow-list, as opposed to being malformed.
    pub fn is_not_allowed(&self) -> bool {
        matches!(self, FormulaError::UnknownIdentifier(_) | FormulaError::UnknownFunction(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Function {
    Abs,
    Round,
    Min,
    Max,
    IfNull,
    Clamp,
    Normalize,
    Length,
    TagsLength,
    TagsHas,
    TagsHasAny,
    TagsHasAll,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "abs" => Function::Abs,
            "round" => Function::Round,
            "min" => Function::Min,
            "max" => Function::Max,
            "ifnull" => Function::IfNull,
            "clamp" => Function::Clamp,
            "normalize" => Function::Normalize,
            "length" => Function::Length,
            "tags_length" => Function::TagsLength,
            "tags_has" => Function::TagsHas,
            "tags_has_any" => Function::TagsHasAny,
            "tags_has_all" => Function::TagsHasAll,
            _ => return None,
        })
    }

    fn name(self) -> &'static str {
        match self {
            Function::Abs => "abs",
            Function::Round => "round",
            Function::Min => "min",
            Function::Max => "max",
            Function::IfNull => "ifnull",
            Function::Clamp => "clamp",
            Function::Normalize => "normalize",
            Function::Length => "length",
            Function::TagsLength => "tags_length",
            Function::TagsHas => "tags_has",
            Function::TagsHasAny => "tags_has_any",
            Function::TagsHasAll => "tags_has_all",
        }
    }

    /// Inclusive (min, max) argument counts; `None` max means variadic.
    fn arity(self) -> (usize, Option<usize>, &'static str) {
        match self {
            Function::Abs | Function::Length | Function::TagsHas => (1, Some(1), "1"),
            Function::Round => (1, Some(2), "1 or 2"),
            Function::Min | Function::Max | Function::TagsHasAny | Function::TagsHasAll => {
                (1, None, "at least 1")
            }
            Function::IfNull => (2, Some(2), "2"),
            Function::Clamp | Function::Normalize => (3, Some(3), "3"),
            Function::TagsLength => (0, Some(0), "0"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Number(f64),
    Text(String),
    Field(String),
    Call(Function, Vec<Expr>),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Text(String),
    Ident(String),
    LParen,
    RParen,
    Comma,
    Op(char),
}

/// A runtime value inside the interpreter.
#[derive(Debug, Clone, PartialEq)]
enum Scalar {
    Number(f64),
    Text(String),
    List(Vec<String>),
    Null,
}

impl Scalar {
    fn from_json(value: Option<&Value>) -> Scalar {
        match value {
            None | Some(Value::Null) => Scalar::Null,
            Some(Value::Bool(b)) => Scalar::Number(if *b { 1.0 } else { 0.0 }),
            Some(Value::Number(n)) => n.as_f64().map_or(Scalar::Null, Scalar::Number),
            Some(Value::String(s)) => Scalar::Text(s.clone()),
            Some(Value::Array(items)) => Scalar::List(
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect(),
            ),
            Some(Value::Object(_)) => Scalar::Null,
        }
    }

    fn number(&self, context: &str) -> Result<f64, FormulaError> {
        match self {
            Scalar::Number(n) => Ok(*n),
            Scalar::Null => Err(FormulaError::Type(format!("{context}: value is null"))),
            other => Err(FormulaError::Type(format!(
                "{context}: expected a number, got {other:?}"
            ))),
        }
    }

    fn text(&self, context: &str) -> Result<&str, FormulaError> {
        match self {
            Scalar::Text(s) => Ok(s),
            other => Err(FormulaError::Type(format!(
                "{context}: expected a string, got {other:?}"
            ))),
        }
    }
}

/// A parsed, whitelisted formula ready to be evaluated per record.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    source: String,
    root: Expr,
}

impl Formula {
    /// Parses and checks `source` against the identifier and function
    /// allow-lists.
    ///
    /// # Examples
    ///
    /// ```
    /// use pdfstore::query::Formula;
    ///
    /// assert!(Formula::parse("normalize(rating, 0, 5) * 2 + tags_has('math')").is_ok());
    /// assert!(Formula::parse("system('rm -rf /')").is_err());
    /// assert!(Formula::parse("password").is_err());
    /// ```
    pub fn parse(source: &str) -> Result<Self, FormulaError> {
        if source.len() > MAX_FORMULA_LEN {
            return Err(FormulaError::TooComplex);
        }
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let root = parser.expr()?;
        if let Some(token) = parser.peek() {
            return Err(FormulaError::Syntax {
                position: parser.pos,
                message: format!("unexpected {token:?}"),
            });
        }
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates the formula against one record's fields.
    pub fn evaluate(&self, record: &Map<String, Value>) -> Result<f64, FormulaError> {
        let value = eval(&self.root, record)?.number("formula result")?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(FormulaError::Type("formula result is not finite".into()))
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, FormulaError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '+' | '-' | '*' | '/' | '%' => {
                tokens.push(Token::Op(c));
                i += 1;
            }
            '\'' | '"' => {
                let quote = c;
                let start = i;
                i += 1;
                let mut text = String::new();
                loop {
                    match chars.get(i) {
                        Some(&ch) if ch == quote => break,
                        Some(&ch) => text.push(ch),
                        None => {
                            return Err(FormulaError::Syntax {
                                position: start,
                                message: "unterminated string".into(),
                            });
                        }
                    }
                    i += 1;
                }
                i += 1;
                tokens.push(Token::Text(text));
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let number = literal.parse::<f64>().map_err(|_| FormulaError::Syntax {
                    position: start,
                    message: format!("invalid number {literal:?}"),
                })?;
                tokens.push(Token::Number(number));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(FormulaError::Syntax {
                    position: i,
                    message: format!("unexpected character {other:?}"),
                });
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
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

    fn syntax(&self, message: impl Into<String>) -> FormulaError {
        FormulaError::Syntax {
            position: self.pos,
            message: message.into(),
        }
    }

    fn expr(&mut self) -> Result<Expr, FormulaError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(FormulaError::TooComplex);
        }

        let mut left = self.term()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek().cloned() {
            self.pos += 1;
            let right = self.term()?;
            let op = if op == '+' { BinOp::Add } else { BinOp::Sub };
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }

        self.depth -= 1;
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr, FormulaError> {
        let mut left = self.unary()?;
        while let Some(Token::Op(op @ ('*' | '/' | '%'))) = self.peek().cloned() {
            self.pos += 1;
            let right = self.unary()?;
            let op = match op {
                '*' => BinOp::Mul,
                '/' => BinOp::Div,
                _ => BinOp::Rem,
            };
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, FormulaError> {
        if let Some(Token::Op('-')) = self.peek() {
            self.pos += 1;
            self.depth += 1;
            if self.depth > MAX_DEPTH {
                return Err(FormulaError::TooComplex);
            }
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, FormulaError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Text(s)) => Ok(Expr::Text(s)),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(self.syntax("expected ')'")),
                }
            }
            Some(Token::Ident(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.pos += 1;
                    self.call(name)
                } else if ALLOWED_IDENTIFIERS.contains(&name.as_str()) {
                    Ok(Expr::Field(name))
                } else {
                    Err(FormulaError::UnknownIdentifier(name))
                }
            }
            Some(other) => Err(self.syntax(format!("unexpected {other:?}"))),
            None => Err(self.syntax("unexpected end of formula")),
        }
    }

    fn call(&mut self, name: String) -> Result<Expr, FormulaError> {
        let function = Function::from_name(&name).ok_or(FormulaError::UnknownFunction(name))?;

        let mut args = Vec::new();
        if let Some(Token::RParen) = self.peek() {
            self.pos += 1;
        } else {
            loop {
                args.push(self.expr()?);
                match self.next() {
                    Some(Token::Comma) => continue,
                    Some(Token::RParen) => break,
                    _ => return Err(self.syntax("expected ',' or ')'")),
                }
            }
        }

        let (min, max, expected) = function.arity();
        if args.len() < min || max.is_some_and(|max| args.len() > max) {
            return Err(FormulaError::Arity {
                function: function.name(),
                expected,
                actual: args.len(),
            });
        }
        Ok(Expr::Call(function, args))
    }
}

fn eval(expr: &Expr, record: &Map<String, Value>) -> Result<Scalar, FormulaError> {
    match expr {
        Expr::Number(n) => Ok(Scalar::Number(*n)),
        Expr::Text(s) => Ok(Scalar::Text(s.clone())),
        Expr::Field(name) => Ok(Scalar::from_json(record.get(name))),
        Expr::Neg(inner) => Ok(Scalar::Number(-eval(inner, record)?.number("negation")?)),
        Expr::Binary(op, left, right) => {
            let l = eval(left, record)?.number("left operand")?;
            let r = eval(right, record)?.number("right operand")?;
            let value = match op {
                BinOp::Add => l + r,
                BinOp::Sub => l - r,
                BinOp::Mul => l * r,
                BinOp::Div | BinOp::Rem if r == 0.0 => return Err(FormulaError::DivisionByZero),
                BinOp::Div => l / r,
                BinOp::Rem => l % r,
            };
            Ok(Scalar::Number(value))
        }
        Expr::Call(function, args) => call(*function, args, record),
    }
}

fn call(function: Function, args: &[Expr], record: &Map<String, Value>) -> Result<Scalar, FormulaError> {
    let name = function.name();
    let number_arg = |idx: usize| -> Result<f64, FormulaError> { eval(&args[idx], record)?.number(name) };
    let bool_number = |b: bool| Scalar::Number(if b { 1.0 } else { 0.0 });

    let result = match function {
        Function::Abs => Scalar::Number(number_arg(0)?.abs()),
        Function::Round => {
            let x = number_arg(0)?;
            let digits = if args.len() > 1 { number_arg(1)? } else { 0.0 };
            let factor = 10f64.powi(digits.clamp(0.0, 12.0) as i32);
            Scalar::Number((x * factor).round() / factor)
        }
        Function::Min | Function::Max => {
            let mut acc = number_arg(0)?;
            for idx in 1..args.len() {
                let x = number_arg(idx)?;
                acc = if function == Function::Min { acc.min(x) } else { acc.max(x) };
            }
            Scalar::Number(acc)
        }
        Function::IfNull => match eval(&args[0], record)? {
            Scalar::Null => eval(&args[1], record)?,
            value => value,
        },
        Function::Clamp => {
            let (x, lo, hi) = (number_arg(0)?, number_arg(1)?, number_arg(2)?);
            if lo > hi {
                return Err(FormulaError::Type("clamp: lower bound exceeds upper bound".into()));
            }
            Scalar::Number(x.clamp(lo, hi))
        }
        Function::Normalize => {
            let (x, lo, hi) = (number_arg(0)?, number_arg(1)?, number_arg(2)?);
            if hi <= lo {
                return Err(FormulaError::Type("normalize: empty range".into()));
            }
            Scalar::Number(((x - lo) / (hi - lo)).clamp(0.0, 1.0))
        }
        Function::Length => match eval(&args[0], record)? {
            Scalar::Text(s) => Scalar::Number(s.chars().count() as f64),
            Scalar::List(items) => Scalar::Number(items.len() as f64),
            Scalar::Null => Scalar::Number(0.0),
            Scalar::Number(_) => {
                return Err(FormulaError::Type("length: expected a string or list".into()));
            }
        },
        Function::TagsLength => Scalar::Number(record_tags(record).len() as f64),
        Function::TagsHas | Function::TagsHasAny | Function::TagsHasAll => {
            let tags = record_tags(record);
            let mut wanted = Vec::with_capacity(args.len());
            for arg in args {
                wanted.push(eval(arg, record)?.text(name)?.to_string());
            }
            let has = |t: &String| tags.iter().any(|tag| tag == t);
            match function {
                Function::TagsHasAll => bool_number(wanted.iter().all(has)),
                _ => bool_number(wanted.iter().any(has)),
            }
        }
    };
    Ok(result)
}

fn record_tags(record: &Map<String, Value>) -> Vec<String> {
    match Scalar::from_json(record.get("tags")) {
        Scalar::List(items) => items,
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    fn eval_str(formula: &str, rec: &Value) -> Result<f64, FormulaError> {
        Formula::parse(formula)?.evaluate(&record(rec.clone()))
    }

    #[test]
    fn arithmetic_respects_precedence() {
        let rec = json!({});
        assert_eq!(eval_str("1 + 2 * 3", &rec).unwrap(), 7.0);
        assert_eq!(eval_str("(1 + 2) * 3", &rec).unwrap(), 9.0);
        assert_eq!(eval_str("-2 * -3", &rec).unwrap(), 6.0);
        assert_eq!(eval_str("10 % 4 - 1", &rec).unwrap(), 1.0);
    }

    #[test]
    fn fields_and_functions_read_the_record() {
        let rec = json!({"rating": 4, "tags": ["math", "ai"], "title": "Hello", "is_visible": true});

        assert_eq!(eval_str("normalize(rating, 0, 5)", &rec).unwrap(), 0.8);
        assert_eq!(eval_str("tags_length()", &rec).unwrap(), 2.0);
        assert_eq!(eval_str("tags_has('math')", &rec).unwrap(), 1.0);
        assert_eq!(eval_str("tags_has('physics')", &rec).unwrap(), 0.0);
        assert_eq!(eval_str("tags_has_any('x', 'ai')", &rec).unwrap(), 1.0);
        assert_eq!(eval_str("tags_has_all('ai', 'x')", &rec).unwrap(), 0.0);
        assert_eq!(eval_str("length(title) + is_visible", &rec).unwrap(), 6.0);
        assert_eq!(eval_str("clamp(rating * 10, 0, 25)", &rec).unwrap(), 25.0);
        assert_eq!(eval_str("max(1, rating, 3) - min(2, 0.5)", &rec).unwrap(), 3.5);
        assert_eq!(eval_str("round(2.345, 2)", &rec).unwrap(), 2.35);
        assert_eq!(eval_str("abs(0 - rating)", &rec).unwrap(), 4.0);
    }

    #[test]
    fn ifnull_substitutes_missing_values() {
        let rec = json!({"due_date": null});
        assert_eq!(eval_str("ifnull(due_date, 7)", &rec).unwrap(), 7.0);
        assert!(matches!(
            eval_str("due_date + 1", &rec),
            Err(FormulaError::Type(_))
        ));
    }

    #[test]
    fn unknown_identifiers_and_functions_are_rejected_at_parse_time() {
        assert!(matches!(
            Formula::parse("secret * 2"),
            Err(FormulaError::UnknownIdentifier(name)) if name == "secret"
        ));
        assert!(matches!(
            Formula::parse("eval('1')"),
            Err(FormulaError::UnknownFunction(name)) if name == "eval"
        ));
        assert!(matches!(
            Formula::parse("__import__('os')"),
            Err(FormulaError::UnknownFunction(_))
        ));
    }

    #[test]
    fn malformed_formulas_are_syntax_errors() {
        for source in ["1 +", "(1 + 2", "rating rating", "tags_has('x'", "1 ; 2", "'open"] {
            assert!(
                matches!(Formula::parse(source), Err(FormulaError::Syntax { .. })),
                "{source} should not parse"
            );
        }
    }

    #[test]
    fn arity_is_checked() {
        assert!(matches!(
            Formula::parse("clamp(1, 2)"),
            Err(FormulaError::Arity { function: "clamp", .. })
        ));
        assert!(matches!(
            Formula::parse("tags_length('x')"),
            Err(FormulaError::Arity { .. })
        ));
    }

    #[test]
    fn division_by_zero_fails_evaluation() {
        assert_eq!(
            eval_str("rating / 0", &json!({"rating": 1})),
            Err(FormulaError::DivisionByZero)
        );
    }

    #[test]
    fn deeply_nested_formula_is_rejected() {
        let source = format!("{}1{}", "(".repeat(40), ")".repeat(40));
        assert_eq!(Formula::parse(&source), Err(FormulaError::TooComplex));
    }
}
