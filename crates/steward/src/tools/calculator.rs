use std::future::ready;
use std::iter::Peekable;
use std::str::CharIndices;

use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::Value;
use steward_core::tool::{Error as ToolError, Tool, ToolOutput};

const ALLOWED_CHARS: &str = "0123456789+-*/.() ";
const DEFAULT_PRECISION: usize = 10;
const MAX_EXPRESSION_LEN: usize = 256;

#[derive(Deserialize, JsonSchema)]
pub struct CalculatorParameters {
    #[schemars(
        description = "Arithmetic expression using numbers, + - * / and parentheses, e.g. `(1 + 2) * 3`."
    )]
    expression: String,
}

/// A tool that evaluates arithmetic expressions.
///
/// Results are rounded to a fixed number of decimal places, so the same
/// expression always yields the same text.
pub struct CalculatorTool {
    parameter_schema: Value,
    precision: usize,
}

impl CalculatorTool {
    /// Creates a new calculator tool.
    #[inline]
    pub fn new() -> Self {
        Self::with_precision(DEFAULT_PRECISION)
    }

    /// Creates a calculator that rounds to `precision` decimal places.
    #[inline]
    pub fn with_precision(precision: usize) -> Self {
        CalculatorTool {
            parameter_schema: schema_for!(CalculatorParameters).to_value(),
            precision,
        }
    }
}

impl Default for CalculatorTool {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for CalculatorTool {
    type Input = CalculatorParameters;

    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluates an arithmetic expression and returns the exact result."
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn validate(&self, input: &Self::Input) -> Result<(), ToolError> {
        let expression = input.expression.trim();
        if expression.is_empty() {
            return Err(
                ToolError::invalid_input().with_reason("`expression` is empty")
            );
        }
        if expression.len() > MAX_EXPRESSION_LEN {
            return Err(ToolError::invalid_input().with_reason(format!(
                "`expression` is longer than {MAX_EXPRESSION_LEN} characters"
            )));
        }
        if let Some(c) = expression.chars().find(|c| !ALLOWED_CHARS.contains(*c)) {
            return Err(ToolError::invalid_input()
                .with_reason(format!("`{c}` is not allowed in an expression")));
        }
        Ok(())
    }

    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = ToolOutput> + Send + 'static {
        let expression = input.expression.trim();
        let result = evaluate(expression)
            .map(|value| {
                format!("{expression} = {}", format_number(value, self.precision))
            })
            .map_err(|reason| ToolError::execution_error().with_reason(reason));
        ready(result)
    }
}

/// Evaluates `expression` with the usual precedence: parentheses, unary
/// minus, then `*` and `/`, then `+` and `-`, left to right.
pub(crate) fn evaluate(expression: &str) -> Result<f64, String> {
    let mut parser = Parser {
        chars: expression.char_indices().peekable(),
        source: expression,
        depth: 0,
    };
    let value = parser.expr()?;
    parser.skip_whitespace();
    if let Some((pos, c)) = parser.chars.next() {
        return Err(format!("unexpected `{c}` at position {pos}"));
    }
    if !value.is_finite() {
        return Err("the result is not a finite number".to_owned());
    }
    Ok(value)
}

const MAX_DEPTH: usize = 64;

struct Parser<'a> {
    chars: Peekable<CharIndices<'a>>,
    source: &'a str,
    depth: usize,
}

impl Parser<'_> {
    fn skip_whitespace(&mut self) {
        while self.chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_whitespace();
        self.chars.peek().map(|(_, c)| *c)
    }

    fn expr(&mut self) -> Result<f64, String> {
        let mut value = self.term()?;
        while let Some(op @ ('+' | '-')) = self.peek() {
            self.chars.next();
            let rhs = self.term()?;
            if op == '+' {
                value += rhs;
            } else {
                value -= rhs;
            }
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, String> {
        let mut value = self.factor()?;
        while let Some(op @ ('*' | '/')) = self.peek() {
            self.chars.next();
            let rhs = self.factor()?;
            if op == '*' {
                value *= rhs;
            } else if rhs == 0.0 {
                return Err("division by zero".to_owned());
            } else {
                value /= rhs;
            }
        }
        Ok(value)
    }

    fn factor(&mut self) -> Result<f64, String> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err("the expression is nested too deeply".to_owned());
        }
        let value = match self.peek() {
            Some('-') => {
                self.chars.next();
                self.factor().map(|value| -value)
            }
            Some('+') => {
                self.chars.next();
                self.factor()
            }
            Some('(') => {
                self.chars.next();
                let value = self.expr()?;
                match self.peek() {
                    Some(')') => {
                        self.chars.next();
                        Ok(value)
                    }
                    _ => Err("missing `)`".to_owned()),
                }
            }
            Some(c) if c.is_ascii_digit() || c == '.' => self.number(),
            Some(c) => Err(format!("unexpected `{c}`")),
            None => Err("unexpected end of expression".to_owned()),
        };
        self.depth -= 1;
        value
    }

    fn number(&mut self) -> Result<f64, String> {
        let Some(&(start, _)) = self.chars.peek() else {
            return Err("expected a number".to_owned());
        };
        let mut end = start;
        while let Some((pos, c)) =
            self.chars.next_if(|(_, c)| c.is_ascii_digit() || *c == '.')
        {
            end = pos + c.len_utf8();
        }
        let literal = &self.source[start..end];
        literal
            .parse()
            .map_err(|_| format!("`{literal}` is not a number"))
    }
}

/// Rounds to `precision` places and drops trailing zeros.
fn format_number(value: f64, precision: usize) -> String {
    let formatted = format!("{value:.precision$}");
    let trimmed = if formatted.contains('.') {
        formatted.trim_end_matches('0').trim_end_matches('.')
    } else {
        &formatted
    };
    // Avoid printing `-0`.
    if trimmed == "-0" {
        "0".to_owned()
    } else {
        trimmed.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(expression: &str) -> CalculatorParameters {
        CalculatorParameters {
            expression: expression.to_owned(),
        }
    }

    #[test]
    fn test_precedence() {
        assert_eq!(evaluate("123 + 456 * 789").unwrap(), 354567.0);
        assert_eq!(evaluate("(1 + 2) * 3").unwrap(), 9.0);
        assert_eq!(evaluate("10 - 4 - 3").unwrap(), 3.0);
        assert_eq!(evaluate("2 * -3").unwrap(), -6.0);
        assert_eq!(evaluate("-(2 + 3) / 2").unwrap(), -2.5);
        assert_eq!(evaluate(" .5 + 1.25 ").unwrap(), 1.75);
    }

    #[test]
    fn test_errors() {
        assert_eq!(evaluate("1 / 0").unwrap_err(), "division by zero");
        assert!(evaluate("(1 + 2").is_err());
        assert!(evaluate("1 +").is_err());
        assert!(evaluate("1 2").is_err());
        assert!(evaluate("1..2").is_err());
        assert!(evaluate(&"(".repeat(100)).is_err());
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(354567.0, 10), "354567");
        assert_eq!(format_number(0.1 + 0.2, 10), "0.3");
        assert_eq!(format_number(1.0 / 3.0, 4), "0.3333");
        assert_eq!(format_number(-0.0, 10), "0");
    }

    #[test]
    fn test_validate() {
        let tool = CalculatorTool::new();
        assert!(tool.validate(&input("1 + 1")).is_ok());
        assert!(tool.validate(&input("   ")).is_err());
        let err = tool.validate(&input("__import__('os')")).unwrap_err();
        assert_eq!(err.kind(), steward_core::tool::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_execute_is_deterministic() {
        let tool = CalculatorTool::new();
        let first = tool.execute(input("123 + 456 * 789")).await.unwrap();
        let second = tool.execute(input("123 + 456 * 789")).await.unwrap();
        assert_eq!(first, "123 + 456 * 789 = 354567");
        assert_eq!(first, second);

        let err = tool.execute(input("1 / (2 - 2)")).await.unwrap_err();
        assert_eq!(err.reason(), "division by zero");
    }
}
