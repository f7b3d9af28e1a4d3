//! Build-file parser.
//!
//! A deliberately small Dockerfile parser: enough to walk instructions
//! in order, follow stage aliases and read labels. It understands
//! comments, backslash continuations, `--flag` tokens, the JSON exec
//! form, quote-aware word splitting, `KEY=value` splitting for the
//! key/value instructions, and the `ONBUILD` sub-instruction form.

use crate::error::{AgentError, AgentResult};
use std::path::Path;

/// One parsed instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Directive {
    /// Instruction name, uppercased (`FROM`, `LABEL`, ...).
    pub name: String,

    /// Sub-instruction name; only set for `ONBUILD`.
    pub sub_name: Option<String>,

    /// `--flag` tokens between the instruction name and its body.
    pub flags: Vec<String>,

    /// Body tokens. For key/value instructions this is a flat
    /// `[key, value, key, value, ...]` sequence; tokens keep their
    /// surrounding quotes.
    pub values: Vec<String>,

    /// Whether the body was written in the JSON exec form.
    pub json: bool,

    pub start_line: usize,
    pub end_line: usize,
}

/// Instructions whose body is a flat key/value sequence.
const KEY_VALUE_INSTRUCTIONS: &[&str] = &["LABEL", "ENV", "ARG"];

pub fn parse_file(path: &Path) -> AgentResult<Vec<Directive>> {
    let source = std::fs::read_to_string(path).map_err(|e| {
        AgentError::Parse(format!("error opening build file \"{}\": {}", path.display(), e))
    })?;

    parse(&source).map_err(|e| match e {
        AgentError::Parse(reason) => {
            AgentError::Parse(format!("\"{}\": {}", path.display(), reason))
        }
        other => other,
    })
}

pub fn parse(source: &str) -> AgentResult<Vec<Directive>> {
    let mut directives = Vec::new();
    let mut lines = source.lines().enumerate().peekable();

    while let Some((index, raw)) = lines.next() {
        let line_number = index + 1;
        let trimmed = raw.trim();

        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        // Fold backslash continuations into one logical line. Comment
        // lines inside a continuation are skipped, as Docker does.
        let mut logical = String::from(trimmed.trim_end_matches('\\'));
        let mut end_line = line_number;
        let mut continued = trimmed.ends_with('\\');

        while continued {
            match lines.next() {
                Some((next_index, next_raw)) => {
                    end_line = next_index + 1;
                    let next_trimmed = next_raw.trim();

                    if next_trimmed.starts_with('#') {
                        continue;
                    }

                    continued = next_trimmed.ends_with('\\');
                    logical.push(' ');
                    logical.push_str(next_trimmed.trim_end_matches('\\'));
                }
                None => {
                    return Err(AgentError::Parse(format!(
                        "line {}: continuation with no following line",
                        end_line
                    )));
                }
            }
        }

        directives.push(parse_logical_line(&logical, line_number, end_line)?);
    }

    Ok(directives)
}

fn parse_logical_line(line: &str, start_line: usize, end_line: usize) -> AgentResult<Directive> {
    let (name, rest) = split_instruction_name(line, start_line)?;

    if name == "ONBUILD" {
        // The remainder is itself an instruction; record its name and
        // parse its body as this directive's body.
        let (sub_name, sub_rest) = split_instruction_name(rest.trim(), start_line)
            .map_err(|_| {
                AgentError::Parse(format!("line {}: ONBUILD requires an instruction", start_line))
            })?;

        let mut directive = parse_body(&sub_name, sub_rest, start_line, end_line)?;
        directive.name = "ONBUILD".to_string();
        directive.sub_name = Some(sub_name);
        return Ok(directive);
    }

    parse_body(&name, rest, start_line, end_line)
}

fn parse_body(
    name: &str,
    rest: &str,
    start_line: usize,
    end_line: usize,
) -> AgentResult<Directive> {
    let mut words = split_words(rest, start_line)?;

    let mut flags = Vec::new();
    while words.first().is_some_and(|w| w.starts_with("--")) {
        flags.push(words.remove(0));
    }

    let body = words.join(" ");
    let mut json = false;

    let values = if body.trim_start().starts_with('[') {
        match serde_json::from_str::<Vec<String>>(body.trim()) {
            Ok(elements) => {
                json = true;
                elements
            }
            // Not valid JSON; Docker falls back to the shell form.
            Err(_) => words,
        }
    } else if KEY_VALUE_INSTRUCTIONS.contains(&name) {
        split_key_values(&words, start_line)?
    } else {
        words
    };

    Ok(Directive {
        name: name.to_string(),
        sub_name: None,
        flags,
        values,
        json,
        start_line,
        end_line,
    })
}

fn split_instruction_name(line: &str, line_number: usize) -> AgentResult<(String, &str)> {
    let line = line.trim_start();
    let split_at = line.find(char::is_whitespace).unwrap_or(line.len());
    let (word, rest) = line.split_at(split_at);

    if word.is_empty() || !word.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(AgentError::Parse(format!(
            "line {}: invalid instruction \"{}\"",
            line_number, word
        )));
    }

    Ok((word.to_ascii_uppercase(), rest))
}

/// Quote-aware whitespace split. Quotes are kept in the output tokens;
/// callers that compare values strip them.
fn split_words(body: &str, line_number: usize) -> AgentResult<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = body.chars();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                current.push(c);
                if c == q {
                    quote = None;
                } else if c == '\\' && q == '"' {
                    if let Some(escaped) = chars.next() {
                        current.push(escaped);
                    }
                }
            }
            None => match c {
                '"' | '\'' => {
                    quote = Some(c);
                    current.push(c);
                }
                c if c.is_whitespace() => {
                    if !current.is_empty() {
                        words.push(std::mem::take(&mut current));
                    }
                }
                c => current.push(c),
            },
        }
    }

    if quote.is_some() {
        return Err(AgentError::Parse(format!(
            "line {}: unterminated quote",
            line_number
        )));
    }

    if !current.is_empty() {
        words.push(current);
    }

    Ok(words)
}

/// Split the words of a key/value instruction into a flat
/// `[key, value, ...]` sequence.
///
/// The `KEY=value` form allows any number of pairs per instruction;
/// the legacy space-separated form binds the first word as the key and
/// everything after it as one value.
fn split_key_values(words: &[String], line_number: usize) -> AgentResult<Vec<String>> {
    if words.is_empty() {
        return Ok(Vec::new());
    }

    if split_first_unquoted_eq(&words[0]).is_none() {
        let key = words[0].clone();
        let value = words[1..].join(" ");
        return Ok(vec![key, value]);
    }

    let mut values = Vec::with_capacity(words.len() * 2);
    for word in words {
        let (key, value) = split_first_unquoted_eq(word).ok_or_else(|| {
            AgentError::Parse(format!(
                "line {}: expected key=value, got \"{}\"",
                line_number, word
            ))
        })?;
        values.push(key.to_string());
        values.push(value.to_string());
    }

    Ok(values)
}

fn split_first_unquoted_eq(word: &str) -> Option<(&str, &str)> {
    let mut quote: Option<char> = None;

    for (i, c) in word.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '"' | '\'' => quote = Some(c),
                '=' => return Some((&word[..i], &word[i + 1..])),
                _ => {}
            },
        }
    }

    None
}
