//! Simple condition expression parser
//!
//! Parses expressions like:
//! - `Steps.Decide_1.success == true`
//! - `Steps.Decide_1.retryCount >= 2`
//! - `a == 'x' and (b > 5 or not c == true)`

use super::ast::{CompareOp, Expression, Literal};
use crate::error::{ComposeError, Result};

/// Parse a condition expression string into an AST
pub fn parse(input: &str) -> Result<Expression> {
    let input = strip_parens(input.trim());

    if input.is_empty() {
        return Err(ComposeError::condition("empty condition"));
    }

    // Handle special cases
    if input == "true" {
        return Ok(Expression::True);
    }
    if input == "false" {
        return Ok(Expression::False);
    }

    // Try to parse as compound expression (and/or)
    if let Some(expr) = try_parse_compound(input)? {
        return Ok(expr);
    }

    if let Some(rest) = input.strip_prefix("not ") {
        return Ok(Expression::Not(Box::new(parse(rest)?)));
    }

    // Parse as simple comparison
    parse_comparison(input)
}

/// Remove parentheses that wrap the whole input
fn strip_parens(mut input: &str) -> &str {
    while input.starts_with('(') && input.ends_with(')') && closes_at_end(input) {
        input = input[1..input.len() - 1].trim();
    }
    input
}

/// Whether the opening parenthesis at 0 is closed by the last character
fn closes_at_end(input: &str) -> bool {
    let mut depth = 0;
    let mut in_string = false;
    for (i, c) in input.char_indices() {
        match c {
            '\'' | '"' => in_string = !in_string,
            '(' if !in_string => depth += 1,
            ')' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return i == input.len() - 1;
                }
            }
            _ => {}
        }
    }
    false
}

fn try_parse_compound(input: &str) -> Result<Option<Expression>> {
    // `or` binds loosest, so split on it before `and`
    if let Some(i) = find_top_level(input, " or ") {
        let left = parse(&input[..i])?;
        let right = parse(&input[i + 4..])?;
        return Ok(Some(Expression::Or(Box::new(left), Box::new(right))));
    }
    if let Some(i) = find_top_level(input, " and ") {
        let left = parse(&input[..i])?;
        let right = parse(&input[i + 5..])?;
        return Ok(Some(Expression::And(Box::new(left), Box::new(right))));
    }
    Ok(None)
}

/// First occurrence of `keyword` outside quotes and parentheses
fn find_top_level(input: &str, keyword: &str) -> Option<usize> {
    let mut depth = 0;
    let mut in_string = false;

    for (i, c) in input.char_indices() {
        match c {
            '\'' | '"' => in_string = !in_string,
            '(' if !in_string => depth += 1,
            ')' if !in_string => depth -= 1,
            _ if !in_string && depth == 0 && input[i..].starts_with(keyword) => return Some(i),
            _ => {}
        }
    }
    None
}

fn parse_comparison(input: &str) -> Result<Expression> {
    // Try operators in order of length (longest first)
    let operators = [
        ("!=", CompareOp::NotEq),
        (">=", CompareOp::Gte),
        ("<=", CompareOp::Lte),
        ("==", CompareOp::Eq),
        (">", CompareOp::Gt),
        ("<", CompareOp::Lt),
        (" contains ", CompareOp::Contains),
    ];

    for (op_str, op) in operators {
        if let Some(pos) = find_operator(input, op_str) {
            let left = input[..pos].trim().to_string();
            if left.is_empty() || left.contains(char::is_whitespace) {
                return Err(ComposeError::condition(format!(
                    "Invalid left operand in condition: {}",
                    input
                )));
            }
            let right_str = input[pos + op_str.len()..].trim();
            let right = parse_literal(right_str)?;
            return Ok(Expression::Compare { left, op, right });
        }
    }

    Err(ComposeError::condition(format!(
        "Could not parse condition: {}",
        input
    )))
}

fn find_operator(input: &str, op: &str) -> Option<usize> {
    let mut in_string = false;

    for (i, c) in input.char_indices() {
        if c == '\'' || c == '"' {
            in_string = !in_string;
        } else if !in_string && input[i..].starts_with(op) {
            return Some(i);
        }
    }
    None
}

fn parse_literal(input: &str) -> Result<Literal> {
    let input = input.trim();

    // Null
    if input == "null" {
        return Ok(Literal::Null);
    }

    // Boolean
    if input == "true" {
        return Ok(Literal::Boolean(true));
    }
    if input == "false" {
        return Ok(Literal::Boolean(false));
    }

    // String (single or double quotes)
    if input.len() >= 2
        && ((input.starts_with('\'') && input.ends_with('\''))
            || (input.starts_with('"') && input.ends_with('"')))
    {
        let s = &input[1..input.len() - 1];
        return Ok(Literal::String(s.to_string()));
    }

    // Number
    if let Ok(n) = input.parse::<f64>() {
        return Ok(Literal::Number(n));
    }

    Err(ComposeError::condition(format!(
        "Could not parse literal: {}",
        input
    )))
}
