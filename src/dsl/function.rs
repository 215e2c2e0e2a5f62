//! Function-call syntax shared by decorated words and `out` declarations.
//!
//! `name(arg, key=value, ...)`: arguments are split on top-level commas and
//! left unparsed until a feature consumes them.

use serde::Serialize;

/// One decorator or named parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Argument {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub value: String,
}

impl Argument {
    pub fn positional(value: impl Into<String>) -> Self {
        Self {
            name: None,
            value: value.into(),
        }
    }

    pub fn named(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            value: value.into(),
        }
    }

    /// Render back to source form (`value` or `name=value`).
    pub fn to_source(&self) -> String {
        match &self.name {
            Some(name) => format!("{name}={}", self.value),
            None => self.value.clone(),
        }
    }
}

/// A parsed `name(args...)` expression.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Function {
    pub name: String,
    pub args: Vec<Argument>,
}

impl Function {
    /// Parse `name(args)`. Spaces are insignificant; text without a
    /// parenthesized list is a bare name.
    pub fn parse(text: &str) -> Self {
        let text: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        let (Some(open), Some(close)) = (text.find('('), text.rfind(')')) else {
            return Self {
                name: text,
                args: Vec::new(),
            };
        };
        if open > close {
            return Self {
                name: text,
                args: Vec::new(),
            };
        }

        Self {
            name: text[..open].to_string(),
            args: split_args(&text[open + 1..close]),
        }
    }

    /// Find an argument by name, falling back to the positional slot `place`.
    pub fn get(&self, name: &str, place: usize) -> Option<&str> {
        self.get_named(name)
            .or_else(|| self.args.get(place).map(|a| a.value.as_str()))
    }

    pub fn get_named(&self, name: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|a| a.name.as_deref() == Some(name))
            .map(|a| a.value.as_str())
    }

    pub fn get_int(&self, name: &str, place: usize) -> Option<i64> {
        self.get(name, place)?.parse().ok()
    }

    pub fn get_float_named(&self, name: &str) -> Option<f64> {
        self.get_named(name)?.parse().ok()
    }
}

fn split_args(args: &str) -> Vec<Argument> {
    if args.is_empty() {
        return Vec::new();
    }

    let mut parsed = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    for ch in args.chars() {
        match ch {
            '(' => depth += 1,
            ')' => depth -= 1,
            _ => {}
        }
        if ch == ',' && depth == 0 {
            parsed.push(parse_arg(&current));
            current.clear();
        } else {
            current.push(ch);
        }
    }
    if !current.is_empty() {
        parsed.push(parse_arg(&current));
    }
    parsed
}

fn parse_arg(arg: &str) -> Argument {
    // `=` inside a nested list belongs to the value
    let paren = arg.find('(').unwrap_or(arg.len());
    match arg.find('=') {
        Some(eq) if eq < paren => Argument::named(&arg[..eq], &arg[eq + 1..]),
        _ => Argument::positional(arg),
    }
}

/// Parse a `(a,b,c)` list of floats, skipping entries that are not numbers.
pub fn split_floats(list: &str) -> Vec<f64> {
    list.trim_matches(|c| c == '(' || c == ')')
        .split(',')
        .filter_map(|part| part.trim().parse().ok())
        .collect()
}
