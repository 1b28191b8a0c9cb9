//! Query Engine: an XPath-like expression evaluated over the JSON shape of
//! documents.
//!
//! Grammar (informally):
//!
//! ```text
//! query      := root predicate?
//! root       := '/' '.' | '/' path | '//' ident
//! predicate  := '[' expr ']'
//! expr       := or_expr
//! or_expr    := and_expr ('or' and_expr)*
//! and_expr   := unary ('and' unary)*
//! unary      := 'not' unary | atom
//! atom       := '(' expr ')' | compare | contains_call
//! compare    := field op literal
//! contains_call := 'contains' '(' field ',' literal ')'
//! field      := '//'? path
//! path       := ident ('.' ident)*
//! op         := '=' | '!=' | '<=' | '<' | '>=' | '>'
//! literal    := string | number | 'true' | 'false'
//! ```
//!
//! The expression is pre-parsed into an AST once; evaluation is a pure,
//! side-effect-free recursive descent over a `serde_json::Value`. Malformed
//! expressions fail with `InvalidQuery` at parse time, before the store is
//! ever touched.

use serde_json::Value;

use crate::error::Result;
use crate::Error;

// ---------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum RootStep {
    /// `/.`  — the document itself.
    SelfDoc,
    /// `/a.b.c` — a direct (non-recursive) field path from the document root.
    Field(Vec<String>),
    /// `//name` — search the whole document tree for a field named `name`.
    Descendant(String),
}

#[derive(Debug, Clone, PartialEq)]
enum FieldRef {
    Direct(Vec<String>),
    Descendant(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Str(String),
    Num(f64),
    Bool(bool),
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Compare(FieldRef, CompareOp, Literal),
    Contains(FieldRef, Literal),
}

/// A parsed, ready-to-evaluate query.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    root: RootStep,
    predicate: Option<Expr>,
}

impl Query {
    /// Parse an XPath-like expression. Fails with `InvalidQuery` on any
    /// syntax error, before touching the store.
    pub fn parse(expr: &str) -> Result<Self> {
        let tokens = tokenize(expr)?;
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
        };
        let query = parser.parse_query()?;
        if parser.pos != parser.tokens.len() {
            return Err(Error::InvalidQuery(format!(
                "unexpected trailing input in query: {expr}"
            )));
        }
        Ok(query)
    }

    /// Evaluate the query against one document. Never mutates `doc`.
    pub fn matches(&self, doc: &Value) -> bool {
        let context = match &self.root {
            RootStep::SelfDoc => Some(doc),
            RootStep::Field(path) => direct_lookup(doc, path),
            RootStep::Descendant(name) => descendant_lookup(doc, name),
        };
        let Some(context) = context else {
            return false;
        };
        match &self.predicate {
            None => true,
            Some(expr) => eval_expr(expr, context),
        }
    }
}

fn eval_expr(expr: &Expr, doc: &Value) -> bool {
    match expr {
        Expr::And(a, b) => eval_expr(a, doc) && eval_expr(b, doc),
        Expr::Or(a, b) => eval_expr(a, doc) || eval_expr(b, doc),
        Expr::Not(inner) => !eval_expr(inner, doc),
        Expr::Compare(field, op, literal) => {
            let Some(value) = resolve_field(field, doc) else {
                return false;
            };
            compare(value, *op, literal)
        }
        Expr::Contains(field, literal) => {
            let Some(value) = resolve_field(field, doc) else {
                return false;
            };
            contains(value, literal)
        }
    }
}

fn resolve_field<'a>(field: &FieldRef, doc: &'a Value) -> Option<&'a Value> {
    match field {
        FieldRef::Direct(path) => direct_lookup(doc, path),
        FieldRef::Descendant(name) => descendant_lookup(doc, name),
    }
}

fn direct_lookup<'a>(doc: &'a Value, path: &[String]) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Depth-first search for the first object key matching `name`.
fn descendant_lookup<'a>(doc: &'a Value, name: &str) -> Option<&'a Value> {
    match doc {
        Value::Object(map) => {
            if let Some(v) = map.get(name) {
                return Some(v);
            }
            for v in map.values() {
                if let Some(found) = descendant_lookup(v, name) {
                    return Some(found);
                }
            }
            None
        }
        Value::Array(items) => items.iter().find_map(|v| descendant_lookup(v, name)),
        _ => None,
    }
}

fn compare(value: &Value, op: CompareOp, literal: &Literal) -> bool {
    match (value, literal) {
        (Value::String(s), Literal::Str(l)) => apply_ord(s.as_str().cmp(l.as_str()), op),
        (Value::Bool(b), Literal::Bool(l)) => match op {
            CompareOp::Eq => b == l,
            CompareOp::Ne => b != l,
            _ => false,
        },
        (Value::Number(n), Literal::Num(l)) => match n.as_f64() {
            Some(n) => apply_ord(n.partial_cmp(l).unwrap_or(std::cmp::Ordering::Less), op),
            None => false,
        },
        (Value::Null, _) => matches!(op, CompareOp::Ne),
        _ => matches!(op, CompareOp::Ne),
    }
}

fn apply_ord(ordering: std::cmp::Ordering, op: CompareOp) -> bool {
    use std::cmp::Ordering::*;
    match op {
        CompareOp::Eq => ordering == Equal,
        CompareOp::Ne => ordering != Equal,
        CompareOp::Lt => ordering == Less,
        CompareOp::Le => ordering != Greater,
        CompareOp::Gt => ordering == Greater,
        CompareOp::Ge => ordering != Less,
    }
}

fn contains(value: &Value, literal: &Literal) -> bool {
    match value {
        Value::String(s) => matches!(literal, Literal::Str(l) if s.contains(l.as_str())),
        Value::Array(items) => items.iter().any(|item| literal_eq(item, literal)),
        _ => false,
    }
}

fn literal_eq(value: &Value, literal: &Literal) -> bool {
    match (value, literal) {
        (Value::String(s), Literal::Str(l)) => s == l,
        (Value::Bool(b), Literal::Bool(l)) => b == l,
        (Value::Number(n), Literal::Num(l)) => n.as_f64() == Some(*l),
        _ => false,
    }
}

// ---------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Slash,
    SlashSlash,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    Op(CompareOp),
    And,
    Or,
    Not,
    Contains,
    True,
    False,
    Ident(String),
    Str(String),
    Num(f64),
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '/' => {
                if chars.get(i + 1) == Some(&'/') {
                    tokens.push(Token::SlashSlash);
                    i += 2;
                } else {
                    tokens.push(Token::Slash);
                    i += 1;
                }
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
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
            '=' => {
                tokens.push(Token::Op(CompareOp::Eq));
                i += 1;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op(CompareOp::Ne));
                i += 2;
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CompareOp::Le));
                    i += 2;
                } else {
                    tokens.push(Token::Op(CompareOp::Lt));
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CompareOp::Ge));
                    i += 2;
                } else {
                    tokens.push(Token::Op(CompareOp::Gt));
                    i += 1;
                }
            }
            '\'' | '"' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            s.push(ch);
                            i += 1;
                        }
                        None => {
                            return Err(Error::InvalidQuery(
                                "unterminated string literal".to_string(),
                            ))
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while chars
                    .get(i)
                    .is_some_and(|c| c.is_ascii_digit() || *c == '.')
                {
                    i += 1;
                }
                let s: String = chars[start..i].iter().collect();
                let n = s
                    .parse::<f64>()
                    .map_err(|_| Error::InvalidQuery(format!("invalid number literal: {s}")))?;
                tokens.push(Token::Num(n));
            }
            c if c.is_alphabetic() || c == '_' || c == '.' => {
                let start = i;
                while chars
                    .get(i)
                    .is_some_and(|c| c.is_alphanumeric() || *c == '_' || *c == '.')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "contains" => Token::Contains,
                    "true" => Token::True,
                    "false" => Token::False,
                    _ => Token::Ident(word),
                });
            }
            other => {
                return Err(Error::InvalidQuery(format!(
                    "unexpected character '{other}' in query"
                )))
            }
        }
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------
// Recursive-descent parser
// ---------------------------------------------------------------------

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Token> {
        let tok = self.tokens.get(self.pos);
        self.pos += 1;
        tok
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        match self.advance() {
            Some(tok) if tok == expected => Ok(()),
            Some(tok) => Err(Error::InvalidQuery(format!(
                "expected {expected:?}, found {tok:?}"
            ))),
            None => Err(Error::InvalidQuery(format!(
                "expected {expected:?}, found end of input"
            ))),
        }
    }

    fn parse_query(&mut self) -> Result<Query> {
        let root = self.parse_root()?;
        let predicate = if self.peek() == Some(&Token::LBracket) {
            self.advance();
            let expr = self.parse_or()?;
            self.expect(&Token::RBracket)?;
            Some(expr)
        } else {
            None
        };
        Ok(Query { root, predicate })
    }

    fn parse_root(&mut self) -> Result<RootStep> {
        match self.advance() {
            Some(Token::Slash) => match self.advance() {
                Some(Token::Ident(word)) if word == "." => Ok(RootStep::SelfDoc),
                Some(Token::Ident(path)) => {
                    Ok(RootStep::Field(path.split('.').map(str::to_string).collect()))
                }
                other => Err(Error::InvalidQuery(format!(
                    "expected a root step after '/', found {other:?}"
                ))),
            },
            Some(Token::SlashSlash) => match self.advance() {
                Some(Token::Ident(name)) => Ok(RootStep::Descendant(name.clone())),
                other => Err(Error::InvalidQuery(format!(
                    "expected a field name after '//', found {other:?}"
                ))),
            },
            other => Err(Error::InvalidQuery(format!(
                "query must start with '/' or '//', found {other:?}"
            ))),
        }
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.peek() == Some(&Token::Not) {
            self.advance();
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(Token::LParen) => {
                self.advance();
                let expr = self.parse_or()?;
                self.expect(&Token::RParen)?;
                Ok(expr)
            }
            Some(Token::Contains) => {
                self.advance();
                self.expect(&Token::LParen)?;
                let field = self.parse_field()?;
                self.expect(&Token::Comma)?;
                let literal = self.parse_literal()?;
                self.expect(&Token::RParen)?;
                Ok(Expr::Contains(field, literal))
            }
            _ => {
                let field = self.parse_field()?;
                let op = self.parse_op()?;
                let literal = self.parse_literal()?;
                Ok(Expr::Compare(field, op, literal))
            }
        }
    }

    fn parse_field(&mut self) -> Result<FieldRef> {
        if self.peek() == Some(&Token::SlashSlash) {
            self.advance();
            return match self.advance() {
                Some(Token::Ident(name)) => Ok(FieldRef::Descendant(name.clone())),
                other => Err(Error::InvalidQuery(format!(
                    "expected a field name after '//', found {other:?}"
                ))),
            };
        }
        match self.advance() {
            Some(Token::Ident(path)) => Ok(FieldRef::Direct(
                path.split('.').map(str::to_string).collect(),
            )),
            other => Err(Error::InvalidQuery(format!(
                "expected a field name, found {other:?}"
            ))),
        }
    }

    fn parse_op(&mut self) -> Result<CompareOp> {
        match self.advance() {
            Some(Token::Op(op)) => Ok(*op),
            other => Err(Error::InvalidQuery(format!(
                "expected a comparison operator, found {other:?}"
            ))),
        }
    }

    fn parse_literal(&mut self) -> Result<Literal> {
        match self.advance() {
            Some(Token::Str(s)) => Ok(Literal::Str(s.clone())),
            Some(Token::Num(n)) => Ok(Literal::Num(*n)),
            Some(Token::True) => Ok(Literal::Bool(true)),
            Some(Token::False) => Ok(Literal::Bool(false)),
            other => Err(Error::InvalidQuery(format!(
                "expected a literal, found {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn self_root_no_predicate_matches_everything() {
        let query = Query::parse("/.").unwrap();
        assert!(query.matches(&json!({"hostname": "a"})));
    }

    #[test]
    fn equality_predicate() {
        let query = Query::parse("/.[hostname='b']").unwrap();
        assert!(query.matches(&json!({"hostname": "b"})));
        assert!(!query.matches(&json!({"hostname": "a"})));
    }

    #[test]
    fn numeric_comparison() {
        let query = Query::parse("/.[age >= 30]").unwrap();
        assert!(query.matches(&json!({"age": 30})));
        assert!(query.matches(&json!({"age": 31})));
        assert!(!query.matches(&json!({"age": 29})));
    }

    #[test]
    fn boolean_and_or_not() {
        let query = Query::parse("/.[not (a = 1 and b = 2) or c = 3]").unwrap();
        assert!(query.matches(&json!({"a": 1, "b": 9, "c": 0})));
        assert!(!query.matches(&json!({"a": 1, "b": 2, "c": 0})));
        assert!(query.matches(&json!({"a": 1, "b": 2, "c": 3})));
    }

    #[test]
    fn contains_on_string() {
        let query = Query::parse("/.[contains(name, 'ali')]").unwrap();
        assert!(query.matches(&json!({"name": "natalia"})));
        assert!(!query.matches(&json!({"name": "bob"})));
    }

    #[test]
    fn contains_on_array() {
        let query = Query::parse("/.[contains(tags, 'prod')]").unwrap();
        assert!(query.matches(&json!({"tags": ["prod", "east"]})));
        assert!(!query.matches(&json!({"tags": ["dev"]})));
    }

    #[test]
    fn field_root_scopes_predicate() {
        let query = Query::parse("/meta[owner = 'alice']").unwrap();
        assert!(query.matches(&json!({"meta": {"owner": "alice"}})));
        assert!(!query.matches(&json!({"meta": {"owner": "bob"}})));
        assert!(!query.matches(&json!({"other": {}})));
    }

    #[test]
    fn descendant_field_search() {
        let query = Query::parse("//owner[name = 'alice']").unwrap();
        assert!(query.matches(&json!({"a": {"b": {"owner": {"name": "alice"}}}})));
    }

    #[test]
    fn descendant_predicate_field() {
        let query = Query::parse("/.[//owner = 'alice']").unwrap();
        assert!(query.matches(&json!({"meta": {"nested": {"owner": "alice"}}})));
        assert!(!query.matches(&json!({"meta": {"nested": {"owner": "bob"}}})));
    }

    #[test]
    fn malformed_expression_is_invalid_query() {
        assert!(matches!(Query::parse("hostname = 'b'"), Err(Error::InvalidQuery(_))));
        assert!(matches!(Query::parse("/.[hostname = ]"), Err(Error::InvalidQuery(_))));
        assert!(matches!(Query::parse("/.[hostname = 'b'"), Err(Error::InvalidQuery(_))));
    }

    #[test]
    fn evaluation_never_mutates() {
        let doc = json!({"hostname": "b"});
        let before = doc.clone();
        let query = Query::parse("/.[hostname = 'b']").unwrap();
        let _ = query.matches(&doc);
        assert_eq!(doc, before);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn equality_predicate_matches_iff_value_equal(
                needle in "[a-z]{1,12}",
                haystack in "[a-z]{1,12}",
            ) {
                let query = Query::parse(&format!("/.[hostname = '{needle}']")).unwrap();
                let doc = json!({"hostname": haystack});
                prop_assert_eq!(query.matches(&doc), needle == haystack);
            }

            #[test]
            fn not_not_is_identity(flag in any::<bool>()) {
                let query = Query::parse("/.[not (not (flag = true))]").unwrap();
                let doc = json!({"flag": flag});
                prop_assert_eq!(query.matches(&doc), flag);
            }

            #[test]
            fn evaluation_never_mutates_arbitrary_docs(value in "[a-z0-9]{0,20}") {
                let doc = json!({"hostname": value});
                let before = doc.clone();
                let query = Query::parse("/.[hostname = 'x']").unwrap();
                let _ = query.matches(&doc);
                prop_assert_eq!(doc, before);
            }
        }
    }
}
