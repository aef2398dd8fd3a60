use std::fmt;

use crate::error::RulesError;

const MAX_LINE: usize = 80;

/// A single-game PGN document: tag pairs, SAN movetext and a result token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pgn {
    pub tags: Vec<(String, String)>,
    pub moves: Vec<String>,
    pub result: String,
}

impl Pgn {
    pub fn new(result: impl Into<String>) -> Self {
        Self {
            tags: Vec::new(),
            moves: Vec::new(),
            result: result.into(),
        }
    }

    pub fn with_tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((name.into(), value.into()));
        self
    }

    pub fn with_moves(mut self, moves: Vec<String>) -> Self {
        self.moves = moves;
        self
    }

    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Parse a PGN document, keeping only mainline SAN tokens.
    ///
    /// Comments, variations, NAGs and move numbers are skipped.
    pub fn parse(text: &str) -> Result<Self, RulesError> {
        let mut pgn = Pgn::new("*");
        let mut movetext = String::new();

        for line in text.lines() {
            let line = line.trim();
            if line.starts_with('%') {
                continue;
            }
            if line.starts_with('[') && movetext.trim().is_empty() {
                pgn.tags.push(parse_tag(line)?);
            } else {
                movetext.push_str(line);
                movetext.push('\n');
            }
        }

        let mut result = None;
        let mut depth = 0usize;
        let mut chars = movetext.chars();
        let mut token = String::new();

        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    flush(&mut token, &mut pgn, &mut result);
                    let mut closed = false;
                    for inner in chars.by_ref() {
                        if inner == '}' {
                            closed = true;
                            break;
                        }
                    }
                    if !closed {
                        return Err(RulesError::MalformedPgn("unterminated comment".into()));
                    }
                }
                ';' => {
                    flush(&mut token, &mut pgn, &mut result);
                    for inner in chars.by_ref() {
                        if inner == '\n' {
                            break;
                        }
                    }
                }
                '(' => {
                    flush(&mut token, &mut pgn, &mut result);
                    depth += 1;
                }
                ')' => {
                    if depth == 0 {
                        return Err(RulesError::MalformedPgn("unbalanced variation".into()));
                    }
                    token.clear();
                    depth -= 1;
                }
                c if c.is_whitespace() => {
                    if depth == 0 {
                        flush(&mut token, &mut pgn, &mut result);
                    } else {
                        token.clear();
                    }
                }
                c => {
                    if depth == 0 {
                        token.push(c);
                    }
                }
            }
        }
        if depth != 0 {
            return Err(RulesError::MalformedPgn("unterminated variation".into()));
        }
        flush(&mut token, &mut pgn, &mut result);

        pgn.result = result
            .or_else(|| pgn.tag("Result").map(str::to_string))
            .unwrap_or_else(|| "*".to_string());
        Ok(pgn)
    }
}

fn flush(token: &mut String, pgn: &mut Pgn, result: &mut Option<String>) {
    if token.is_empty() {
        return;
    }
    let t = std::mem::take(token);
    match t.as_str() {
        "1-0" | "0-1" | "1/2-1/2" | "*" => *result = Some(t),
        _ if t.starts_with('$') => {}
        _ => {
            let san = t.trim_start_matches(|c: char| c.is_ascii_digit() || c == '.');
            if !san.is_empty() {
                pgn.moves.push(san.to_string());
            }
        }
    }
}

fn parse_tag(line: &str) -> Result<(String, String), RulesError> {
    let inner = line
        .strip_prefix('[')
        .and_then(|l| l.strip_suffix(']'))
        .ok_or_else(|| RulesError::MalformedPgn(line.to_string()))?;
    let (name, rest) = inner
        .split_once(char::is_whitespace)
        .ok_or_else(|| RulesError::MalformedPgn(line.to_string()))?;
    let quoted = rest
        .trim()
        .strip_prefix('"')
        .and_then(|r| r.strip_suffix('"'))
        .ok_or_else(|| RulesError::MalformedPgn(line.to_string()))?;

    let mut value = String::with_capacity(quoted.len());
    let mut escaped = false;
    for c in quoted.chars() {
        if escaped {
            value.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else {
            value.push(c);
        }
    }
    Ok((name.to_string(), value))
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

impl fmt::Display for Pgn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.tags {
            writeln!(f, "[{name} \"{}\"]", escape(value))?;
        }
        writeln!(f)?;

        let mut tokens = Vec::with_capacity(self.moves.len() * 3 / 2 + 1);
        for (ply, san) in self.moves.iter().enumerate() {
            if ply % 2 == 0 {
                tokens.push(format!("{}.", ply / 2 + 1));
            }
            tokens.push(san.clone());
        }
        tokens.push(self.result.clone());

        let mut line_len = 0;
        for token in tokens {
            if line_len > 0 && line_len + 1 + token.len() > MAX_LINE {
                writeln!(f)?;
                line_len = 0;
            }
            if line_len > 0 {
                f.write_str(" ")?;
                line_len += 1;
            }
            f.write_str(&token)?;
            line_len += token.len();
        }
        writeln!(f)
    }
}
