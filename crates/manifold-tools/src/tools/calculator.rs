use async_trait::async_trait;

use crate::registry::{GatewayTool, ToolError, ToolParam};

/// Arithmetic evaluator over `+ - * /` and parentheses. Entirely local,
/// no secrets, no network.
pub struct Calculator;

#[async_trait]
impl GatewayTool for Calculator {
    fn name(&self) -> &str {
        "calculator"
    }

    fn summary(&self) -> &str {
        "Evaluate an arithmetic expression (+, -, *, /, parentheses)"
    }

    fn parameters(&self) -> Vec<ToolParam> {
        vec![ToolParam::required(
            "expression",
            "string",
            "The arithmetic expression to evaluate, e.g. \"(2 + 3) * 4\"",
        )]
    }

    async fn invoke(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let expr = args
            .get("expression")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::MissingArgument {
                name: "expression".to_string(),
            })?;

        let result = eval(expr).map_err(|detail| ToolError::InvalidArgument {
            name: "expression".to_string(),
            detail,
        })?;

        Ok(serde_json::json!({ "expression": expr, "result": result }))
    }
}

/// Recursive-descent evaluation: expr → term (('+'|'-') term)*,
/// term → factor (('*'|'/') factor)*, factor → number | '(' expr ')' | '-' factor.
fn eval(input: &str) -> Result<f64, String> {
    let tokens: Vec<char> = input.chars().filter(|c| !c.is_whitespace()).collect();
    let mut pos = 0usize;
    let value = parse_expr(&tokens, &mut pos)?;
    if pos != tokens.len() {
        return Err(format!("unexpected character at position {pos}"));
    }
    Ok(value)
}

fn parse_expr(tokens: &[char], pos: &mut usize) -> Result<f64, String> {
    let mut value = parse_term(tokens, pos)?;
    while let Some(&op) = tokens.get(*pos) {
        match op {
            '+' => {
                *pos += 1;
                value += parse_term(tokens, pos)?;
            }
            '-' => {
                *pos += 1;
                value -= parse_term(tokens, pos)?;
            }
            _ => break,
        }
    }
    Ok(value)
}

fn parse_term(tokens: &[char], pos: &mut usize) -> Result<f64, String> {
    let mut value = parse_factor(tokens, pos)?;
    while let Some(&op) = tokens.get(*pos) {
        match op {
            '*' => {
                *pos += 1;
                value *= parse_factor(tokens, pos)?;
            }
            '/' => {
                *pos += 1;
                let rhs = parse_factor(tokens, pos)?;
                if rhs == 0.0 {
                    return Err("division by zero".to_string());
                }
                value /= rhs;
            }
            _ => break,
        }
    }
    Ok(value)
}

fn parse_factor(tokens: &[char], pos: &mut usize) -> Result<f64, String> {
    match tokens.get(*pos) {
        Some('(') => {
            *pos += 1;
            let value = parse_expr(tokens, pos)?;
            if tokens.get(*pos) != Some(&')') {
                return Err("missing closing parenthesis".to_string());
            }
            *pos += 1;
            Ok(value)
        }
        Some('-') => {
            *pos += 1;
            Ok(-parse_factor(tokens, pos)?)
        }
        Some(c) if c.is_ascii_digit() || *c == '.' => {
            let start = *pos;
            while tokens
                .get(*pos)
                .map(|c| c.is_ascii_digit() || *c == '.')
                .unwrap_or(false)
            {
                *pos += 1;
            }
            let text: String = tokens[start..*pos].iter().collect();
            text.parse::<f64>().map_err(|e| e.to_string())
        }
        Some(c) => Err(format!("unexpected character '{c}'")),
        None => Err("unexpected end of expression".to_string()),
    }
}
