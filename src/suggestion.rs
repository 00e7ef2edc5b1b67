//! Extraction of the `{route, reason, prompt}` fragment the chat model is
//! asked to append when a dedicated tool fits better than a chat answer.

use crate::constants::REDIRECT_MODULES;
use crate::types::RedirectSuggestion;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct RouteFragment {
    route: String,
    #[serde(default)]
    #[allow(dead_code)]
    reason: Option<String>,
    #[serde(default)]
    prompt: Option<String>,
}

const ROUTE_KEY: &str = "\"route\"";

/// Balanced JSON objects that contain a `"route"` key, ordered by where they
/// open. Single pass with a stack of open braces; string literals and escapes
/// are honored inside objects.
fn route_candidates(text: &str) -> Vec<(usize, &str)> {
    let routes: Vec<usize> = text.match_indices(ROUTE_KEY).map(|(i, _)| i).collect();
    let mut open: Vec<usize> = Vec::new();
    let mut found = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' if !open.is_empty() => in_string = true,
            '{' => open.push(i),
            '}' => {
                if let Some(start) = open.pop() {
                    let end = i + c.len_utf8();
                    let next_route = routes.partition_point(|&p| p < start);
                    if routes.get(next_route).is_some_and(|&p| p < end) {
                        found.push((start, &text[start..end]));
                    }
                }
            }
            _ => {}
        }
    }
    found.sort_by_key(|(start, _)| *start);
    found
}

fn normalize_route(route: &str) -> String {
    route
        .trim()
        .trim_matches('/')
        .to_lowercase()
        .replace(['-', ' '], "_")
}

fn module_for(route: &str) -> Option<(&'static str, &'static str)> {
    let normalized = normalize_route(route);
    REDIRECT_MODULES
        .iter()
        .find(|(r, module, _)| *r == normalized || *module == route.trim())
        .map(|(_, module, label)| (*module, *label))
}

/// First well-formed fragment naming a known route. Malformed, partial, or
/// unknown fragments are skipped.
pub fn extract_redirect(text: &str) -> Option<RedirectSuggestion> {
    for (_, candidate) in route_candidates(text) {
        let fragment: RouteFragment = match serde_json::from_str(candidate) {
            Ok(f) => f,
            Err(e) => {
                tracing::debug!("Ignoring malformed redirect fragment: {}", e);
                continue;
            }
        };
        match module_for(&fragment.route) {
            Some((module, label)) => {
                return Some(RedirectSuggestion {
                    module: module.to_string(),
                    label: label.to_string(),
                    prompt: fragment.prompt.unwrap_or_default(),
                })
            }
            None => {
                tracing::debug!("Ignoring redirect to unknown route '{}'", fragment.route);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_trailing_fragment() {
        let text = "Use a 10k pull-up.\n{\"route\": \"simulation\", \"reason\": \"verify timing\", \"prompt\": \"Simulate the RC {delay}\"}";
        let s = extract_redirect(text).unwrap_or_else(|| panic!("Expected a suggestion"));
        assert_eq!(s.module, "simulator");
        assert_eq!(s.label, "Open Simulator");
        assert_eq!(s.prompt, "Simulate the RC {delay}");
    }

    #[test]
    fn test_route_spelling_is_normalized() {
        let text = r#"{"route":"/Component-Selection","prompt":"LDO under 1A"}"#;
        let s = extract_redirect(text).unwrap_or_else(|| panic!("Expected a suggestion"));
        assert_eq!(s.module, "component-selector");
    }

    #[test]
    fn test_malformed_and_partial_fragments_are_ignored() {
        assert_eq!(extract_redirect(r#"{"route": "simulation", "prompt": }"#), None);
        assert_eq!(extract_redirect(r#"text {"route": "simulation", "prompt": "x""#), None);
        assert_eq!(extract_redirect(r#"{"route": "teleporter"}"#), None);
        assert_eq!(extract_redirect("no json at all"), None);
    }

    #[test]
    fn test_skips_unrelated_objects_before_fragment() {
        let text = r#"Config: {"baud": 9600}. Then {"route":"learning","reason":"r","prompt":"UART basics"}"#;
        let s = extract_redirect(text).unwrap_or_else(|| panic!("Expected a suggestion"));
        assert_eq!(s.module, "learning-hub");
        assert_eq!(s.prompt, "UART basics");
    }

    #[test]
    fn test_multibyte_text_around_fragment() {
        let text = "Ω résistance ✓ {\"route\":\"circuit_design\",\"prompt\":\"divider — 3.3V\"}";
        let s = extract_redirect(text).unwrap_or_else(|| panic!("Expected a suggestion"));
        assert_eq!(s.module, "circuit-designer");
        assert_eq!(s.prompt, "divider — 3.3V");
    }

    #[test]
    fn test_many_unbalanced_braces_before_fragment() {
        let text = format!(
            "{}{}",
            "{ ".repeat(50_000),
            r#"{"route":"simulation","prompt":"sweep the gain"}"#
        );
        let s = extract_redirect(&text).unwrap_or_else(|| panic!("Expected a suggestion"));
        assert_eq!(s.module, "simulator");
        assert_eq!(s.prompt, "sweep the gain");
    }

    #[test]
    fn test_outer_object_without_route_falls_back_to_inner() {
        let text = r#"{"meta": {"route":"learning","prompt":"op-amps"}}"#;
        let s = extract_redirect(text).unwrap_or_else(|| panic!("Expected a suggestion"));
        assert_eq!(s.module, "learning-hub");
    }
}
