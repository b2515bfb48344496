//! Built-in tools available to the executor agent.

use serde_json::{json, Value};

use crate::domain::models::ToolSpec;

/// Tools the executor can expose to a model, looked up by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinTool {
    Search,
    Calculator,
}

impl BuiltinTool {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Calculator => "calculator",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "search" => Some(Self::Search),
            "calculator" => Some(Self::Calculator),
            _ => None,
        }
    }

    /// Resolve configured names, dropping unknown ones and duplicates.
    pub fn resolve(names: &[String]) -> Vec<Self> {
        let mut tools = Vec::new();
        for name in names {
            match Self::from_str(name) {
                Some(tool) if !tools.contains(&tool) => tools.push(tool),
                Some(_) => {}
                None => tracing::debug!(tool = %name, "ignoring unknown tool"),
            }
        }
        tools
    }

    pub fn spec(&self) -> ToolSpec {
        let (description, argument, argument_description) = match self {
            Self::Search => (
                "Search for information",
                "query",
                "What to search for",
            ),
            Self::Calculator => (
                "Perform mathematical calculations",
                "expression",
                "Arithmetic expression, e.g. (2 + 3) * 4",
            ),
        };
        ToolSpec {
            name: self.as_str().to_string(),
            description: description.to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    argument: { "type": "string", "description": argument_description }
                },
                "required": [argument],
            }),
        }
    }

    /// Run the tool. Failures are reported as text for the model to read.
    pub fn invoke(&self, arguments: &Value) -> String {
        let key = match self {
            Self::Search => "query",
            Self::Calculator => "expression",
        };
        let input = match arguments {
            Value::String(s) => s.clone(),
            Value::Object(map) => map
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_default(),
            other => other.to_string(),
        };

        match self {
            Self::Search => format!("Search results for: {input}"),
            Self::Calculator => match evaluate(&input) {
                Ok(value) => format_number(value),
                Err(e) => format!("Error: {e}"),
            },
        }
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

/// Longest expression the calculator accepts, in characters.
pub const MAX_EXPRESSION_LEN: usize = 1024;

/// Deepest nesting of parentheses, signs and exponents the calculator accepts.
pub const MAX_NESTING_DEPTH: usize = 64;

/// Evaluate an arithmetic expression with `+ - * / % ^` and parentheses.
pub fn evaluate(expression: &str) -> Result<f64, String> {
    if expression.chars().count() > MAX_EXPRESSION_LEN {
        return Err(format!("expression too long (max {MAX_EXPRESSION_LEN} characters)"));
    }
    let mut parser = Parser {
        chars: expression.chars().filter(|c| !c.is_whitespace()).collect(),
        pos: 0,
        depth: 0,
    };
    if parser.chars.is_empty() {
        return Err("empty expression".to_string());
    }
    let value = parser.expression()?;
    if parser.pos != parser.chars.len() {
        return Err(format!("unexpected '{}'", parser.chars[parser.pos]));
    }
    if value.is_finite() {
        Ok(value)
    } else {
        Err("result is not a finite number".to_string())
    }
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn descend(&mut self) -> Result<(), String> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err("expression nested too deeply".to_string());
        }
        Ok(())
    }

    fn expression(&mut self) -> Result<f64, String> {
        let mut value = self.term()?;
        while let Some(op @ ('+' | '-')) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == '+' { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, String> {
        let mut value = self.power()?;
        while let Some(op @ ('*' | '/' | '%')) = self.peek() {
            self.pos += 1;
            let rhs = self.power()?;
            value = match op {
                '*' => value * rhs,
                _ if rhs == 0.0 => return Err("division by zero".to_string()),
                '/' => value / rhs,
                _ => value % rhs,
            };
        }
        Ok(value)
    }

    fn power(&mut self) -> Result<f64, String> {
        let base = self.unary()?;
        if self.peek() == Some('^') {
            self.pos += 1;
            self.descend()?;
            let exponent = self.power()?;
            self.depth -= 1;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn unary(&mut self) -> Result<f64, String> {
        match self.peek() {
            Some(sign @ ('-' | '+')) => {
                self.pos += 1;
                self.descend()?;
                let value = self.unary()?;
                self.depth -= 1;
                Ok(if sign == '-' { -value } else { value })
            }
            _ => self.atom(),
        }
    }

    fn atom(&mut self) -> Result<f64, String> {
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                self.descend()?;
                let value = self.expression()?;
                if self.peek() != Some(')') {
                    return Err("missing ')'".to_string());
                }
                self.pos += 1;
                self.depth -= 1;
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => {
                let start = self.pos;
                while self
                    .peek()
                    .is_some_and(|c| c.is_ascii_digit() || c == '.')
                {
                    self.pos += 1;
                }
                let literal: String = self.chars[start..self.pos].iter().collect();
                literal
                    .parse()
                    .map_err(|_| format!("invalid number '{literal}'"))
            }
            Some(c) => Err(format!("unexpected '{c}'")),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}
