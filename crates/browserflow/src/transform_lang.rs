// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! The restricted expression language `transform` evaluates, in place of
//! the arbitrary source-level function expressions the distilled spec
//! describes.
//!
//! Evaluating arbitrary workflow-author
//! JavaScript the single largest safety risk in the source system and asks
//! for either (a) a fixed library of named transforms, (b) a restricted
//! expression language, or (c) sandboxing. This module combines (a) and
//! (b): a small set of named operations (`filter`, `pluck`, `concat`,
//! `unique`, `sortBy`, `groupBy`, `flatten`, `merge`), one of which
//! (`filter`) takes a restricted boolean predicate over the current item's
//! fields, parsed and evaluated by a hand-rolled recursive-descent
//! interpreter — never `eval`, never a JS/Lua VM.

use serde_json::Value;

use crate::error::{Error, Result};

/// A parsed `transform.function` expression.
#[derive(Debug, Clone)]
pub enum TransformOp {
    /// `filter(<predicate>)` — keep array elements matching the predicate.
    Filter(Predicate),
    /// `pluck(<field>)` / `map(<field>)` — project each element to one field.
    Pluck(String),
    /// `concat` — flattens one level of nested arrays into a single array.
    Concat,
    /// `unique(<field>?)` — de-duplicates by whole-value equality, or by a
    /// field's value when a field is given.
    Unique(Option<String>),
    /// `sortBy(<field>)` — stable-sorts elements ascending by a field.
    SortBy(String),
    /// `groupBy(<field>)` — buckets elements into an object keyed by a
    /// field's stringified value.
    GroupBy(String),
    /// `flatten` — recursively flattens nested arrays into one array.
    Flatten,
    /// `merge` — shallow-merges an array of objects into one object, later
    /// elements winning on key conflicts.
    Merge,
}

/// Parses `text` (the `function` field) into a [`TransformOp`].
pub fn parse(text: &str) -> Result<TransformOp> {
    let text = text.trim();
    let (name, args) = split_call(text)?;
    match name {
        "filter" => Ok(TransformOp::Filter(parse_predicate(args)?)),
        "pluck" | "map" => Ok(TransformOp::Pluck(args.trim().to_string())),
        "concat" => Ok(TransformOp::Concat),
        "unique" => {
            let field = args.trim();
            Ok(TransformOp::Unique(if field.is_empty() {
                None
            } else {
                Some(field.to_string())
            }))
        }
        "sortBy" => Ok(TransformOp::SortBy(args.trim().to_string())),
        "groupBy" => Ok(TransformOp::GroupBy(args.trim().to_string())),
        "flatten" => Ok(TransformOp::Flatten),
        "merge" => Ok(TransformOp::Merge),
        other => Err(Error::TransformEvalError {
            message: format!("unknown transform `{other}`"),
            function: text.to_string(),
            input: Value::Null,
        }),
    }
}

/// Splits `name(args)` into `(name, args)`. A bare `name` with no
/// parentheses (e.g. `concat`) is accepted with empty args.
fn split_call(text: &str) -> Result<(&str, &str)> {
    if let Some(open) = text.find('(') {
        let close = text.rfind(')').ok_or_else(|| Error::TransformEvalError {
            message: "unterminated `(`".to_string(),
            function: text.to_string(),
            input: Value::Null,
        })?;
        Ok((text[..open].trim(), &text[open + 1..close]))
    } else {
        Ok((text, ""))
    }
}

/// Applies `op` to `input`, returning the transformed value.
pub fn apply(op: &TransformOp, input: &Value) -> Result<Value> {
    match op {
        TransformOp::Filter(pred) => {
            let items = as_array(input)?;
            let kept: Vec<Value> = items
                .iter()
                .filter(|item| pred.eval(item).unwrap_or(false))
                .cloned()
                .collect();
            Ok(Value::Array(kept))
        }
        TransformOp::Pluck(field) => {
            let items = as_array(input)?;
            let out: Vec<Value> = items
                .iter()
                .map(|item| get_field(item, field).unwrap_or(Value::Null))
                .collect();
            Ok(Value::Array(out))
        }
        TransformOp::Concat => {
            let items = as_array(input)?;
            let mut out = Vec::new();
            for item in items {
                match item {
                    Value::Array(inner) => out.extend(inner.iter().cloned()),
                    other => out.push(other.clone()),
                }
            }
            Ok(Value::Array(out))
        }
        TransformOp::Unique(field) => {
            let items = as_array(input)?;
            let mut seen = Vec::new();
            let mut out = Vec::new();
            for item in items {
                let key = match field {
                    Some(f) => get_field(item, f).unwrap_or(Value::Null),
                    None => item.clone(),
                };
                if !seen.contains(&key) {
                    seen.push(key);
                    out.push(item.clone());
                }
            }
            Ok(Value::Array(out))
        }
        TransformOp::SortBy(field) => {
            let mut items = as_array(input)?.clone();
            items.sort_by(|a, b| {
                let ka = get_field(a, field).unwrap_or(Value::Null);
                let kb = get_field(b, field).unwrap_or(Value::Null);
                compare_values(&ka, &kb)
            });
            Ok(Value::Array(items))
        }
        TransformOp::GroupBy(field) => {
            let items = as_array(input)?;
            let mut groups = serde_json::Map::new();
            for item in items {
                let key = get_field(item, field).unwrap_or(Value::Null);
                let key = match key {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                groups
                    .entry(key)
                    .or_insert_with(|| Value::Array(Vec::new()))
                    .as_array_mut()
                    .unwrap()
                    .push(item.clone());
            }
            Ok(Value::Object(groups))
        }
        TransformOp::Flatten => {
            let items = as_array(input)?;
            let mut out = Vec::new();
            flatten_into(items, &mut out);
            Ok(Value::Array(out))
        }
        TransformOp::Merge => {
            let items = as_array(input)?;
            let mut out = serde_json::Map::new();
            for item in items {
                if let Value::Object(map) = item {
                    for (k, v) in map {
                        out.insert(k.clone(), v.clone());
                    }
                }
            }
            Ok(Value::Object(out))
        }
    }
}

fn flatten_into(items: &[Value], out: &mut Vec<Value>) {
    for item in items {
        match item {
            Value::Array(inner) => flatten_into(inner, out),
            other => out.push(other.clone()),
        }
    }
}

fn as_array(input: &Value) -> Result<&Vec<Value>> {
    input.as_array().ok_or_else(|| Error::TransformEvalError {
        message: "transform input must be an array".to_string(),
        function: String::new(),
        input: input.clone(),
    })
}

fn get_field(item: &Value, field: &str) -> Option<Value> {
    if field.is_empty() {
        return Some(item.clone());
    }
    let mut cur = item;
    for seg in field.split('.') {
        cur = cur.as_object()?.get(seg)?;
    }
    Some(cur.clone())
}

fn compare_values(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

// ---------------------------------------------------------------------
// Restricted boolean predicate language for `filter`.
// ---------------------------------------------------------------------

/// A parsed predicate, evaluated against one item at a time.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// Field truthiness, e.g. `unread`.
    Field(String),
    /// `!expr`
    Not(Box<Predicate>),
    /// `a && b`
    And(Box<Predicate>, Box<Predicate>),
    /// `a || b`
    Or(Box<Predicate>, Box<Predicate>),
    /// A field compared against a literal.
    Compare(String, CmpOp, Literal),
}

/// A comparison operator recognized by the predicate language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `>`
    Gt,
    /// `<`
    Lt,
    /// `>=`
    Ge,
    /// `<=`
    Le,
}

/// A literal value in a predicate.
#[derive(Debug, Clone)]
pub enum Literal {
    /// Quoted string.
    Str(String),
    /// Numeric literal.
    Num(f64),
    /// `true`/`false`.
    Bool(bool),
    /// `null`.
    Null,
}

impl Literal {
    fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (Literal::Str(s), Value::String(v)) => s == v,
            (Literal::Num(n), Value::Number(v)) => v.as_f64().map(|f| f == *n).unwrap_or(false),
            (Literal::Bool(b), Value::Bool(v)) => b == v,
            (Literal::Null, Value::Null) => true,
            _ => false,
        }
    }

    fn compare(&self, op: CmpOp, value: &Value) -> bool {
        match op {
            CmpOp::Eq => self.matches(value),
            CmpOp::Ne => !self.matches(value),
            _ => {
                let (a, b) = match (self, value) {
                    (Literal::Num(n), Value::Number(v)) => (Some(*n), v.as_f64()),
                    _ => (None, None),
                };
                match (a, b) {
                    (Some(a), Some(b)) => match op {
                        CmpOp::Gt => b > a,
                        CmpOp::Lt => b < a,
                        CmpOp::Ge => b >= a,
                        CmpOp::Le => b <= a,
                        CmpOp::Eq | CmpOp::Ne => unreachable!(),
                    },
                    _ => false,
                }
            }
        }
    }
}

impl Predicate {
    /// Evaluates the predicate against one item.
    pub fn eval(&self, item: &Value) -> Result<bool> {
        Ok(match self {
            Predicate::Field(f) => is_truthy(&get_field(item, f).unwrap_or(Value::Null)),
            Predicate::Not(p) => !p.eval(item)?,
            Predicate::And(a, b) => a.eval(item)? && b.eval(item)?,
            Predicate::Or(a, b) => a.eval(item)? || b.eval(item)?,
            Predicate::Compare(field, op, lit) => {
                let v = get_field(item, field).unwrap_or(Value::Null);
                lit.compare(*op, &v)
            }
        })
    }
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

struct PredicateParser<'a> {
    chars: Vec<char>,
    pos: usize,
    source: &'a str,
}

fn parse_predicate(text: &str) -> Result<Predicate> {
    let mut parser = PredicateParser {
        chars: text.chars().collect(),
        pos: 0,
        source: text,
    };
    let expr = parser.parse_or()?;
    parser.skip_ws();
    if parser.pos < parser.chars.len() {
        return Err(parser.err("unexpected trailing input"));
    }
    Ok(expr)
}

impl<'a> PredicateParser<'a> {
    fn err(&self, message: &str) -> Error {
        Error::TransformEvalError {
            message: format!("predicate parse error: {message}"),
            function: self.source.to_string(),
            input: Value::Null,
        }
    }

    fn skip_ws(&mut self) {
        while self.pos < self.chars.len() && self.chars[self.pos].is_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_ws();
        self.chars.get(self.pos).copied()
    }

    fn starts_with(&mut self, s: &str) -> bool {
        self.skip_ws();
        let end = self.pos + s.chars().count();
        if end > self.chars.len() {
            return false;
        }
        self.chars[self.pos..end].iter().collect::<String>() == s
    }

    fn consume(&mut self, s: &str) {
        self.skip_ws();
        self.pos += s.chars().count();
    }

    fn parse_or(&mut self) -> Result<Predicate> {
        let mut left = self.parse_and()?;
        while self.starts_with("||") {
            self.consume("||");
            let right = self.parse_and()?;
            left = Predicate::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Predicate> {
        let mut left = self.parse_not()?;
        while self.starts_with("&&") {
            self.consume("&&");
            let right = self.parse_not()?;
            left = Predicate::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Predicate> {
        if self.peek() == Some('!') && !self.starts_with("!=") {
            self.consume("!");
            let inner = self.parse_not()?;
            return Ok(Predicate::Not(Box::new(inner)));
        }
        self.parse_cmp()
    }

    fn parse_cmp(&mut self) -> Result<Predicate> {
        if self.peek() == Some('(') {
            self.consume("(");
            let inner = self.parse_or()?;
            self.skip_ws();
            if self.peek() != Some(')') {
                return Err(self.err("expected `)`"));
            }
            self.consume(")");
            return Ok(inner);
        }
        let field = self.parse_ident()?;
        self.skip_ws();
        for (text, op) in [
            ("==", CmpOp::Eq),
            ("!=", CmpOp::Ne),
            (">=", CmpOp::Ge),
            ("<=", CmpOp::Le),
            (">", CmpOp::Gt),
            ("<", CmpOp::Lt),
        ] {
            if self.starts_with(text) {
                self.consume(text);
                let lit = self.parse_literal()?;
                return Ok(Predicate::Compare(field, op, lit));
            }
        }
        Ok(Predicate::Field(field))
    }

    fn parse_ident(&mut self) -> Result<String> {
        self.skip_ws();
        let start = self.pos;
        while self
            .chars
            .get(self.pos)
            .is_some_and(|c| c.is_alphanumeric() || *c == '_' || *c == '.')
        {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.err("expected a field name"));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn parse_literal(&mut self) -> Result<Literal> {
        self.skip_ws();
        match self.peek() {
            Some('"') | Some('\'') => {
                let quote = self.chars[self.pos];
                self.pos += 1;
                let start = self.pos;
                while self.chars.get(self.pos).is_some_and(|c| *c != quote) {
                    self.pos += 1;
                }
                let s: String = self.chars[start..self.pos].iter().collect();
                self.pos += 1;
                Ok(Literal::Str(s))
            }
            Some(c) if c.is_ascii_digit() || c == '-' => {
                let start = self.pos;
                self.pos += 1;
                while self
                    .chars
                    .get(self.pos)
                    .is_some_and(|c| c.is_ascii_digit() || *c == '.')
                {
                    self.pos += 1;
                }
                let s: String = self.chars[start..self.pos].iter().collect();
                s.parse::<f64>()
                    .map(Literal::Num)
                    .map_err(|_| self.err("invalid number literal"))
            }
            _ => {
                if self.starts_with("true") {
                    self.consume("true");
                    Ok(Literal::Bool(true))
                } else if self.starts_with("false") {
                    self.consume("false");
                    Ok(Literal::Bool(false))
                } else if self.starts_with("null") {
                    self.consume("null");
                    Ok(Literal::Null)
                } else {
                    Err(self.err("expected a literal"))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filter_keeps_matching_items() {
        let op = parse("filter(unread)").unwrap();
        let input = json!([{"unread": true}, {"unread": false}, {"unread": true}]);
        let out = apply(&op, &input).unwrap();
        assert_eq!(out.as_array().unwrap().len(), 2);
    }

    #[test]
    fn filter_supports_comparison_and_boolean_combinators() {
        let op = parse("filter(score > 5 && active == true)").unwrap();
        let input = json!([
            {"score": 10, "active": true},
            {"score": 1, "active": true},
            {"score": 10, "active": false}
        ]);
        let out = apply(&op, &input).unwrap();
        assert_eq!(out.as_array().unwrap().len(), 1);
    }

    #[test]
    fn pluck_projects_a_field() {
        let op = parse("pluck(name)").unwrap();
        let input = json!([{"name": "a"}, {"name": "b"}]);
        assert_eq!(apply(&op, &input).unwrap(), json!(["a", "b"]));
    }

    #[test]
    fn sort_by_is_stable_ascending() {
        let op = parse("sortBy(n)").unwrap();
        let input = json!([{"n": 3}, {"n": 1}, {"n": 2}]);
        let out = apply(&op, &input).unwrap();
        assert_eq!(out, json!([{"n": 1}, {"n": 2}, {"n": 3}]));
    }

    #[test]
    fn group_by_buckets_elements() {
        let op = parse("groupBy(kind)").unwrap();
        let input = json!([{"kind": "a", "v": 1}, {"kind": "b", "v": 2}, {"kind": "a", "v": 3}]);
        let out = apply(&op, &input).unwrap();
        assert_eq!(out["a"].as_array().unwrap().len(), 2);
        assert_eq!(out["b"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn flatten_recurses() {
        let op = parse("flatten").unwrap();
        let input = json!([1, [2, [3, 4]], 5]);
        assert_eq!(apply(&op, &input).unwrap(), json!([1, 2, 3, 4, 5]));
    }

    #[test]
    fn unique_by_field() {
        let op = parse("unique(id)").unwrap();
        let input = json!([{"id": 1}, {"id": 2}, {"id": 1}]);
        let out = apply(&op, &input).unwrap();
        assert_eq!(out.as_array().unwrap().len(), 2);
    }

    #[test]
    fn unknown_transform_errors() {
        assert!(parse("bogus(x)").is_err());
    }

    #[test]
    fn non_array_input_to_filter_errors() {
        let op = parse("filter(x)").unwrap();
        assert!(apply(&op, &json!({"not": "an array"})).is_err());
    }
}
