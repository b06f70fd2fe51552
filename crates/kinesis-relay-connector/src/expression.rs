//! Key expressions.
//!
//! A key expression turns a record (or one field of it) into the string used
//! as a partition key or explicit hash key. Expressions are compiled once at
//! startup from a small pipeline language whose steps come from a fixed
//! registry, so configuration can never execute arbitrary code:
//!
//! ```text
//! get("user.id") | to_s | downcase | prefix(8)
//! get("tenant") | default("shared") | hash_key
//! ```
//!
//! Rust callers can skip the language entirely and inject a typed function
//! with [`Expression::from_fn`].

use std::fmt;
use std::sync::Arc;

use md5::{Digest, Md5};
use serde_json::Value;

use crate::error::{ConnectorError, Result};

/// A typed key transformation injected from Rust code.
pub type ExpressionFn =
    Arc<dyn Fn(&Value) -> std::result::Result<Value, String> + Send + Sync>;

/// Registered pipeline steps.
#[derive(Debug, Clone, PartialEq)]
enum Builtin {
    Get(Vec<String>),
    ToS,
    Upcase,
    Downcase,
    Trim,
    Prefix(usize),
    Suffix(usize),
    Slice(usize, usize),
    Replace(String, String),
    Prepend(String),
    Append(String),
    Default(String),
    Json,
    Len,
    Md5,
    HashKey,
}

#[derive(Clone)]
enum Step {
    Builtin(Builtin),
    Custom(ExpressionFn),
}

/// A compiled key expression.
#[derive(Clone)]
pub struct Expression {
    source: String,
    steps: Vec<Step>,
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expression")
            .field("source", &self.source)
            .field("steps", &self.steps.len())
            .finish()
    }
}

impl Expression {
    /// Compile an expression from its source text.
    ///
    /// Unknown step names, wrong argument counts or types, and syntax errors
    /// are reported as [`ConnectorError::ConfigError`].
    pub fn parse(source: &str) -> Result<Self> {
        let tokens = lex(source)?;
        let mut parser = Parser { tokens, pos: 0 };
        let steps = parser.pipeline()?;
        Ok(Self {
            source: source.trim().to_string(),
            steps: steps.into_iter().map(Step::Builtin).collect(),
        })
    }

    /// Wrap a Rust function as an expression. `name` is only used for display.
    pub fn from_fn<F>(name: &str, f: F) -> Self
    where
        F: Fn(&Value) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            source: name.to_string(),
            steps: vec![Step::Custom(Arc::new(f))],
        }
    }

    /// The source text (or function name) this expression was built from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Run the pipeline against `input`.
    pub fn evaluate(&self, input: &Value) -> std::result::Result<Value, String> {
        let mut current = input.clone();
        for step in &self.steps {
            current = match step {
                Step::Builtin(builtin) => apply(builtin, current)?,
                Step::Custom(f) => f(&current)?,
            };
        }
        Ok(current)
    }

    /// Run the pipeline and coerce the result to its string form.
    pub fn evaluate_to_string(&self, input: &Value) -> std::result::Result<String, String> {
        self.evaluate(input).map(|v| value_to_key_string(&v))
    }
}

/// Coerce a JSON value to the string used as a key.
///
/// Strings are returned unquoted, null becomes the empty string, and arrays or
/// objects are rendered as compact JSON.
pub fn value_to_key_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn apply(builtin: &Builtin, value: Value) -> std::result::Result<Value, String> {
    let out = match builtin {
        Builtin::Get(path) => return lookup_path(value, path),
        Builtin::ToS => Value::String(value_to_key_string(&value)),
        Builtin::Upcase => Value::String(value_to_key_string(&value).to_uppercase()),
        Builtin::Downcase => Value::String(value_to_key_string(&value).to_lowercase()),
        Builtin::Trim => Value::String(value_to_key_string(&value).trim().to_string()),
        Builtin::Prefix(n) => {
            Value::String(value_to_key_string(&value).chars().take(*n).collect())
        }
        Builtin::Suffix(n) => {
            let s = value_to_key_string(&value);
            let skip = s.chars().count().saturating_sub(*n);
            Value::String(s.chars().skip(skip).collect())
        }
        Builtin::Slice(start, len) => Value::String(
            value_to_key_string(&value)
                .chars()
                .skip(*start)
                .take(*len)
                .collect(),
        ),
        Builtin::Replace(from, to) => {
            Value::String(value_to_key_string(&value).replace(from.as_str(), to))
        }
        Builtin::Prepend(s) => Value::String(format!("{}{}", s, value_to_key_string(&value))),
        Builtin::Append(s) => Value::String(format!("{}{}", value_to_key_string(&value), s)),
        Builtin::Default(s) => match value {
            Value::Null => Value::String(s.clone()),
            Value::String(ref v) if v.is_empty() => Value::String(s.clone()),
            other => other,
        },
        Builtin::Json => Value::String(value.to_string()),
        Builtin::Len => {
            let len = match &value {
                Value::String(s) => s.chars().count(),
                Value::Array(a) => a.len(),
                Value::Object(o) => o.len(),
                other => value_to_key_string(other).chars().count(),
            };
            Value::from(len as u64)
        }
        Builtin::Md5 => {
            let digest = Md5::digest(value_to_key_string(&value).as_bytes());
            Value::String(digest.iter().map(|b| format!("{:02x}", b)).collect())
        }
        Builtin::HashKey => {
            let digest = Md5::digest(value_to_key_string(&value).as_bytes());
            let mut bytes = [0u8; 16];
            bytes.copy_from_slice(&digest);
            Value::String(u128::from_be_bytes(bytes).to_string())
        }
    };
    Ok(out)
}

fn lookup_path(value: Value, path: &[String]) -> std::result::Result<Value, String> {
    let mut current = value;
    for segment in path {
        current = match current {
            Value::Object(mut obj) => obj.remove(segment).unwrap_or(Value::Null),
            Value::Array(mut arr) => {
                let idx: usize = segment
                    .parse()
                    .map_err(|_| format!("cannot index an array with '{}'", segment))?;
                if idx < arr.len() {
                    arr.swap_remove(idx)
                } else {
                    Value::Null
                }
            }
            Value::Null => Value::Null,
            other => {
                return Err(format!(
                    "cannot get '{}' from {}",
                    segment,
                    type_name(&other)
                ))
            }
        };
    }
    Ok(current)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Int(usize),
    LParen,
    RParen,
    Comma,
    Pipe,
    Eof,
}

fn lex(source: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '(' => tokens.push(Token::LParen),
            ')' => tokens.push(Token::RParen),
            ',' => tokens.push(Token::Comma),
            '|' => tokens.push(Token::Pipe),
            '"' => {
                let mut s = String::new();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    match c {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => match chars.next() {
                            Some((_, escaped)) => s.push(escaped),
                            None => break,
                        },
                        other => s.push(other),
                    }
                }
                if !closed {
                    return Err(syntax_error(source, pos, "unterminated string"));
                }
                tokens.push(Token::Str(s));
            }
            c if c.is_ascii_digit() => {
                let mut digits = String::from(c);
                while let Some(&(_, d)) = chars.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    digits.push(d);
                    chars.next();
                }
                let n = digits
                    .parse()
                    .map_err(|_| syntax_error(source, pos, "integer out of range"))?;
                tokens.push(Token::Int(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::from(c);
                while let Some(&(_, d)) = chars.peek() {
                    if !(d.is_ascii_alphanumeric() || d == '_') {
                        break;
                    }
                    ident.push(d);
                    chars.next();
                }
                tokens.push(Token::Ident(ident));
            }
            other => {
                return Err(syntax_error(
                    source,
                    pos,
                    &format!("unexpected character '{}'", other),
                ))
            }
        }
    }

    tokens.push(Token::Eof);
    Ok(tokens)
}

fn syntax_error(source: &str, pos: usize, msg: &str) -> ConnectorError {
    ConnectorError::ConfigError(format!(
        "invalid key expression '{}' at offset {}: {}",
        source, pos, msg
    ))
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Arg {
    Str(String),
    Int(usize),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn bump(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn pipeline(&mut self) -> Result<Vec<Builtin>> {
        let mut steps = vec![self.step()?];
        loop {
            match self.bump() {
                Token::Pipe => steps.push(self.step()?),
                Token::Eof => return Ok(steps),
                other => return Err(expr_error(format!("expected '|', found {:?}", other))),
            }
        }
    }

    fn step(&mut self) -> Result<Builtin> {
        let name = match self.bump() {
            Token::Ident(name) => name,
            Token::Eof => return Err(expr_error("expected a step name".to_string())),
            other => return Err(expr_error(format!("expected a step name, found {:?}", other))),
        };

        let mut args = Vec::new();
        if *self.peek() == Token::LParen {
            self.bump();
            if *self.peek() != Token::RParen {
                loop {
                    match self.bump() {
                        Token::Str(s) => args.push(Arg::Str(s)),
                        Token::Int(n) => args.push(Arg::Int(n)),
                        other => {
                            return Err(expr_error(format!(
                                "expected an argument to '{}', found {:?}",
                                name, other
                            )))
                        }
                    }
                    match self.bump() {
                        Token::Comma => continue,
                        Token::RParen => break,
                        other => {
                            return Err(expr_error(format!(
                                "expected ',' or ')' in '{}', found {:?}",
                                name, other
                            )))
                        }
                    }
                }
            } else {
                self.bump();
            }
        }

        build_step(&name, args)
    }
}

fn expr_error(msg: String) -> ConnectorError {
    ConnectorError::ConfigError(format!("invalid key expression: {}", msg))
}

fn build_step(name: &str, args: Vec<Arg>) -> Result<Builtin> {
    let arity = |n: usize| -> Result<()> {
        if args.len() != n {
            return Err(expr_error(format!(
                "'{}' takes {} argument(s), got {}",
                name,
                n,
                args.len()
            )));
        }
        Ok(())
    };
    let str_arg = |i: usize| -> Result<String> {
        match args.get(i) {
            Some(Arg::Str(s)) => Ok(s.clone()),
            _ => Err(expr_error(format!("'{}' expects a string argument", name))),
        }
    };
    let int_arg = |i: usize| -> Result<usize> {
        match args.get(i) {
            Some(Arg::Int(n)) => Ok(*n),
            _ => Err(expr_error(format!("'{}' expects an integer argument", name))),
        }
    };

    let builtin = match name {
        "get" => {
            arity(1)?;
            let path = str_arg(0)?;
            if path.is_empty() {
                return Err(expr_error("'get' path must not be empty".to_string()));
            }
            Builtin::Get(path.split('.').map(|s| s.to_string()).collect())
        }
        "to_s" => {
            arity(0)?;
            Builtin::ToS
        }
        "upcase" => {
            arity(0)?;
            Builtin::Upcase
        }
        "downcase" => {
            arity(0)?;
            Builtin::Downcase
        }
        "trim" => {
            arity(0)?;
            Builtin::Trim
        }
        "prefix" => {
            arity(1)?;
            Builtin::Prefix(int_arg(0)?)
        }
        "suffix" => {
            arity(1)?;
            Builtin::Suffix(int_arg(0)?)
        }
        "slice" => {
            arity(2)?;
            Builtin::Slice(int_arg(0)?, int_arg(1)?)
        }
        "replace" => {
            arity(2)?;
            Builtin::Replace(str_arg(0)?, str_arg(1)?)
        }
        "prepend" => {
            arity(1)?;
            Builtin::Prepend(str_arg(0)?)
        }
        "append" => {
            arity(1)?;
            Builtin::Append(str_arg(0)?)
        }
        "default" => {
            arity(1)?;
            Builtin::Default(str_arg(0)?)
        }
        "json" => {
            arity(0)?;
            Builtin::Json
        }
        "len" => {
            arity(0)?;
            Builtin::Len
        }
        "md5" => {
            arity(0)?;
            Builtin::Md5
        }
        "hash_key" => {
            arity(0)?;
            Builtin::HashKey
        }
        other => return Err(expr_error(format!("unknown step '{}'", other))),
    };
    Ok(builtin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(source: &str, input: Value) -> String {
        Expression::parse(source)
            .unwrap()
            .evaluate_to_string(&input)
            .unwrap()
    }

    // ---------------------------------------------------------------
    // Parsing
    // ---------------------------------------------------------------

    #[test]
    fn test_parse_single_step() {
        let expr = Expression::parse("upcase").unwrap();
        assert_eq!(expr.source(), "upcase");
    }

    #[test]
    fn test_parse_pipeline_with_arguments() {
        let expr = Expression::parse(r#" get("user.id") | prefix(4) | append("-x") "#).unwrap();
        assert_eq!(expr.source(), r#"get("user.id") | prefix(4) | append("-x")"#);
    }

    #[test]
    fn test_parse_empty_parens() {
        assert!(Expression::parse("to_s()").is_ok());
    }

    #[test]
    fn test_parse_rejects_unknown_step() {
        let err = Expression::parse("system(\"rm -rf /\")").unwrap_err();
        assert!(matches!(err, ConnectorError::ConfigError(_)));
        assert!(format!("{}", err).contains("unknown step 'system'"));
    }

    #[test]
    fn test_parse_rejects_empty_source() {
        assert!(Expression::parse("").is_err());
        assert!(Expression::parse("   ").is_err());
    }

    #[test]
    fn test_parse_rejects_wrong_arity() {
        assert!(Expression::parse("prefix").is_err());
        assert!(Expression::parse("upcase(1)").is_err());
        assert!(Expression::parse("slice(1)").is_err());
    }

    #[test]
    fn test_parse_rejects_wrong_argument_type() {
        assert!(Expression::parse("prefix(\"3\")").is_err());
        assert!(Expression::parse("get(3)").is_err());
    }

    #[test]
    fn test_parse_rejects_trailing_pipe() {
        assert!(Expression::parse("upcase |").is_err());
    }

    #[test]
    fn test_parse_rejects_missing_pipe() {
        assert!(Expression::parse("upcase downcase").is_err());
    }

    #[test]
    fn test_parse_rejects_unterminated_string() {
        let err = Expression::parse("get(\"user").unwrap_err();
        assert!(format!("{}", err).contains("unterminated string"));
    }

    #[test]
    fn test_parse_rejects_ruby_style_code() {
        assert!(Expression::parse("record['user'].upcase").is_err());
    }

    // ---------------------------------------------------------------
    // Evaluation
    // ---------------------------------------------------------------

    #[test]
    fn test_get_nested_path() {
        let input = json!({"user": {"id": "u-7"}});
        assert_eq!(eval(r#"get("user.id")"#, input), "u-7");
    }

    #[test]
    fn test_get_array_index() {
        let input = json!({"tags": ["a", "b", "c"]});
        assert_eq!(eval(r#"get("tags.1")"#, input), "b");
    }

    #[test]
    fn test_get_missing_is_null() {
        let expr = Expression::parse(r#"get("nope")"#).unwrap();
        assert_eq!(expr.evaluate(&json!({"a": 1})).unwrap(), Value::Null);
    }

    #[test]
    fn test_get_from_scalar_fails() {
        let expr = Expression::parse(r#"get("a")"#).unwrap();
        let err = expr.evaluate(&json!(42)).unwrap_err();
        assert!(err.contains("a number"));
    }

    #[test]
    fn test_default_replaces_null() {
        let input = json!({"tenant": null});
        assert_eq!(eval(r#"get("tenant") | default("shared")"#, input), "shared");
    }

    #[test]
    fn test_case_and_trim() {
        assert_eq!(eval("trim | upcase", json!("  abc ")), "ABC");
        assert_eq!(eval("downcase", json!("MiXeD")), "mixed");
    }

    #[test]
    fn test_prefix_suffix_slice_are_char_based() {
        assert_eq!(eval("prefix(2)", json!("héllo")), "hé");
        assert_eq!(eval("suffix(3)", json!("héllo")), "llo");
        assert_eq!(eval("slice(1, 3)", json!("héllo")), "éll");
        assert_eq!(eval("suffix(10)", json!("ab")), "ab");
    }

    #[test]
    fn test_replace_prepend_append() {
        assert_eq!(
            eval(r#"replace(".", "-") | prepend("k:") | append("!")"#, json!("a.b")),
            "k:a-b!"
        );
    }

    #[test]
    fn test_numbers_are_coerced() {
        assert_eq!(eval("to_s", json!(42)), "42");
        assert_eq!(eval("append(\"x\")", json!(1.5)), "1.5x");
    }

    #[test]
    fn test_len() {
        assert_eq!(eval("len", json!([1, 2, 3])), "3");
        assert_eq!(eval("len", json!("héllo")), "5");
    }

    #[test]
    fn test_json_step() {
        assert_eq!(eval("json", json!({"a": 1})), r#"{"a":1}"#);
    }

    #[test]
    fn test_md5_hex() {
        assert_eq!(eval("md5", json!("")), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_hash_key_is_128_bit_decimal() {
        let key = eval("hash_key", json!(""));
        assert_eq!(key, u128::from_str_radix("d41d8cd98f00b204e9800998ecf8427e", 16).unwrap().to_string());
        assert!(key.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_hash_key_is_deterministic() {
        let a = eval(r#"get("user") | hash_key"#, json!({"user": "alice"}));
        let b = eval(r#"get("user") | hash_key"#, json!({"user": "alice"}));
        let c = eval(r#"get("user") | hash_key"#, json!({"user": "bob"}));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_from_fn() {
        let expr = Expression::from_fn("tenant_or_default", |v| {
            Ok(v.get("tenant").cloned().unwrap_or_else(|| json!("none")))
        });
        assert_eq!(expr.source(), "tenant_or_default");
        assert_eq!(expr.evaluate_to_string(&json!({})).unwrap(), "none");
        assert_eq!(expr.evaluate_to_string(&json!({"tenant": "t1"})).unwrap(), "t1");
    }

    #[test]
    fn test_from_fn_error_propagates() {
        let expr = Expression::from_fn("always_fails", |_| Err("nope".to_string()));
        assert_eq!(expr.evaluate(&Value::Null).unwrap_err(), "nope");
    }

    // ---------------------------------------------------------------
    // String coercion
    // ---------------------------------------------------------------

    #[test]
    fn test_value_to_key_string() {
        assert_eq!(value_to_key_string(&Value::Null), "");
        assert_eq!(value_to_key_string(&json!("s")), "s");
        assert_eq!(value_to_key_string(&json!(true)), "true");
        assert_eq!(value_to_key_string(&json!(7)), "7");
        assert_eq!(value_to_key_string(&json!([1, "a"])), r#"[1,"a"]"#);
    }

    #[test]
    fn test_debug_shows_source() {
        let expr = Expression::parse("upcase").unwrap();
        assert!(format!("{:?}", expr).contains("upcase"));
    }
}
