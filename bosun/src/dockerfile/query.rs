//! Build-file queries: effective base image and metadata labels.

use super::parser::{parse_file, Directive};
use crate::error::{AgentError, AgentResult};
use bosun_shared::constants::labels;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

/// Resolve the effective base image of the final build stage.
pub fn lookup_base_image(path: &Path) -> AgentResult<String> {
    let directives = parse_file(path)?;
    resolve_base_image(&directives)
}

/// Resolve the last value bound to `key` across all LABEL directives.
pub fn lookup_label_value(path: &Path, key: &str) -> AgentResult<String> {
    let directives = parse_file(path)?;
    Ok(resolve_label_value(&directives, key))
}

/// Scan FROM directives in file order, collapsing stage aliases
/// transitively as they are bound: after `FROM base AS a` and
/// `FROM a AS b`, both `a` and `b` resolve to `base`.
///
/// The image of the last FROM directive is the result; if it names an
/// alias, the alias's real image is returned instead.
pub fn resolve_base_image(directives: &[Directive]) -> AgentResult<String> {
    let mut alias_to_image: HashMap<&str, &str> = HashMap::new();
    let mut last_from: Option<&Directive> = None;

    for directive in directives {
        if directive.name != "FROM" {
            continue;
        }

        last_from = Some(directive);

        // FROM <image> AS <alias>
        if directive.values.len() == 3 && directive.values[1].eq_ignore_ascii_case("as") {
            let image = directive.values[0].as_str();
            let alias = directive.values[2].as_str();

            // When the source is itself an alias, bind to its real image.
            let real_image = alias_to_image.get(image).copied().unwrap_or(image);
            alias_to_image.insert(alias, real_image);
        }
    }

    let last_from = last_from.ok_or(AgentError::NoBaseImage)?;
    let candidate = last_from
        .values
        .first()
        .ok_or_else(|| AgentError::Parse("FROM instruction names no image".to_string()))?;

    match alias_to_image.get(candidate.as_str()) {
        Some(real_image) => Ok((*real_image).to_string()),
        None => Ok(candidate.clone()),
    }
}

/// Walk LABEL directives for `key`. Keys sit at even indices of the
/// flat key/value token sequence; keys and values may be quoted.
///
/// The last matching value wins: a later declaration deliberately
/// overrides an earlier one. An absent key yields an empty value.
pub fn resolve_label_value(directives: &[Directive], key: &str) -> String {
    let mut last_match = String::new();

    for directive in directives {
        if directive.name != "LABEL" {
            continue;
        }

        for pair in directive.values.chunks_exact(2) {
            let label_key = unquote(&pair[0]);
            if label_key == key {
                last_match = unquote(&pair[1]).to_string();
            }
        }
    }

    last_match
}

/// Split a multi-value label into its parts.
///
/// An empty raw value yields an empty list, never `[""]`.
pub fn split_label_list(value: &str) -> Vec<String> {
    static SEPARATOR: OnceLock<Regex> = OnceLock::new();

    if value.is_empty() {
        return Vec::new();
    }

    SEPARATOR
        .get_or_init(|| Regex::new(labels::LIST_SEPARATOR_PATTERN).expect("separator pattern"))
        .split(value)
        .map(str::to_string)
        .collect()
}

fn unquote(token: &str) -> &str {
    token.trim_matches(|c| c == '"' || c == '\'')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dockerfile::parse;

    #[test]
    fn test_base_image_single_stage() {
        let directives = parse("FROM bosunhq/base-env:latest\nRUN true\n").unwrap();

        assert_eq!(
            resolve_base_image(&directives).unwrap(),
            "bosunhq/base-env:latest"
        );
    }

    #[test]
    fn test_base_image_last_from_wins() {
        let directives = parse("FROM alpine:latest AS build\nFROM ubuntu\n").unwrap();

        assert_eq!(resolve_base_image(&directives).unwrap(), "ubuntu");
    }

    #[test]
    fn test_base_image_alias_resolves() {
        let directives = parse("FROM alpine:latest AS build\nFROM build\n").unwrap();

        assert_eq!(resolve_base_image(&directives).unwrap(), "alpine:latest");
    }

    #[test]
    fn test_base_image_transitive_alias_collapse() {
        let source = "FROM ubuntu AS base\nFROM base AS tools\nFROM tools\n";
        let directives = parse(source).unwrap();

        assert_eq!(resolve_base_image(&directives).unwrap(), "ubuntu");
    }

    #[test]
    fn test_base_image_missing_from() {
        let directives = parse("LABEL a=1\n").unwrap();

        assert!(matches!(
            resolve_base_image(&directives),
            Err(AgentError::NoBaseImage)
        ));
    }

    #[test]
    fn test_label_value_simple() {
        let source = format!("FROM a\nLABEL {}=\"golang.go\"\n", labels::EDITOR_EXTENSIONS_KEY);
        let directives = parse(&source).unwrap();

        assert_eq!(
            resolve_label_value(&directives, labels::EDITOR_EXTENSIONS_KEY),
            "golang.go"
        );
    }

    #[test]
    fn test_repositories_label_splits_into_identifiers() {
        let source = format!(
            "FROM a\nLABEL {}=\"bosunhq/agent; bosunhq/docs\"\n",
            labels::REPOSITORIES_KEY
        );
        let directives = parse(&source).unwrap();

        let repositories = split_label_list(&resolve_label_value(&directives, labels::REPOSITORIES_KEY));

        assert_eq!(repositories, vec!["bosunhq/agent", "bosunhq/docs"]);
    }

    #[test]
    fn test_label_value_last_wins() {
        let source = "FROM a\nLABEL k=first\nLABEL other=x k=second\n";
        let directives = parse(source).unwrap();

        assert_eq!(resolve_label_value(&directives, "k"), "second");
    }

    #[test]
    fn test_label_value_quoted_keys() {
        let directives = parse("FROM a\nLABEL 'my.key'='my value'\n").unwrap();

        assert_eq!(resolve_label_value(&directives, "my.key"), "my value");
    }

    #[test]
    fn test_label_value_absent_is_empty() {
        let directives = parse("FROM a\n").unwrap();

        assert_eq!(resolve_label_value(&directives, "missing"), "");
    }

    #[test]
    fn test_split_label_list_empty_is_empty_list() {
        assert!(split_label_list("").is_empty());
    }

    #[test]
    fn test_split_label_list_separators() {
        assert_eq!(
            split_label_list("golang.go,dbaeumer.vscode-eslint; rust-lang.rust-analyzer"),
            vec![
                "golang.go",
                "dbaeumer.vscode-eslint",
                "rust-lang.rust-analyzer"
            ]
        );
    }

    #[test]
    fn test_split_label_list_single_value() {
        assert_eq!(split_label_list("golang.go"), vec!["golang.go"]);
    }
}
