//! Credential redaction applied to event payloads before they're written
//! (spec.md §4.1).

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const REDACTED: &str = "<redacted>";

/// Which object keys and embedded string shapes get redacted. Defaults
/// cover the common credential field names and a bearer token pattern;
/// an embedder can widen either list without touching this module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactionRules {
    /// Matched case-insensitively as an exact key or a `_`-suffix, same
    /// as the built-in `token`/`secret`/`api_key` handling.
    pub key_patterns: Vec<String>,
    /// Regexes run against string values; a match has just the matched
    /// span replaced, not the whole value.
    pub value_patterns: Vec<String>,
}

impl Default for RedactionRules {
    fn default() -> Self {
        Self {
            key_patterns: vec![
                "token".to_string(),
                "secret".to_string(),
                "api_key".to_string(),
                "apikey".to_string(),
            ],
            value_patterns: vec![r"(?i)bearer\s+[A-Za-z0-9\-_.=]+".to_string()],
        }
    }
}

impl RedactionRules {
    fn compiled_value_patterns(&self) -> Vec<Regex> {
        self.value_patterns
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
    }

    fn matches_key(&self, key: &str) -> bool {
        let lower = key.to_ascii_lowercase();
        self.key_patterns.iter().any(|pattern| {
            let pattern = pattern.to_ascii_lowercase();
            lower == pattern || lower.ends_with(&format!("_{pattern}"))
        })
    }

    /// Walks a payload in place, replacing credential-shaped values.
    /// Object fields whose key looks like a credential name are replaced
    /// wholesale; string values elsewhere matching a value pattern have
    /// just the matched portion redacted.
    pub fn apply(&self, value: &mut Value) {
        let value_res = self.compiled_value_patterns();
        apply_with(value, self, &value_res);
    }
}

fn apply_with(value: &mut Value, rules: &RedactionRules, value_res: &[Regex]) {
    match value {
        Value::Object(map) => {
            for (key, v) in map.iter_mut() {
                if rules.matches_key(key) {
                    *v = Value::String(REDACTED.to_string());
                } else {
                    apply_with(v, rules, value_res);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                apply_with(item, rules, value_res);
            }
        }
        Value::String(s) => {
            for re in value_res {
                if re.is_match(s) {
                    *s = re.replace_all(s, format!("Bearer {REDACTED}").as_str()).to_string();
                }
            }
        }
        _ => {}
    }
}

/// Convenience wrapper over the default rule set, used wherever a caller
/// doesn't need a custom `RedactionRules`.
pub fn redact_payload(value: &mut Value) {
    RedactionRules::default().apply(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_credential_keys() {
        let mut v = serde_json::json!({"api_key": "sk-live-123", "safe": "keep me"});
        redact_payload(&mut v);
        assert_eq!(v["api_key"], "<redacted>");
        assert_eq!(v["safe"], "keep me");
    }

    #[test]
    fn redacts_nested_and_array_credentials() {
        let mut v = serde_json::json!({
            "headers": [{"auth_token": "abc"}, {"fine": "ok"}]
        });
        redact_payload(&mut v);
        assert_eq!(v["headers"][0]["auth_token"], "<redacted>");
        assert_eq!(v["headers"][1]["fine"], "ok");
    }

    #[test]
    fn redacts_bearer_token_embedded_in_string() {
        let mut v = serde_json::json!({"header_line": "Authorization: Bearer abc.def-123"});
        redact_payload(&mut v);
        assert_eq!(v["header_line"], "Authorization: Bearer <redacted>");
    }

    #[test]
    fn custom_rules_widen_the_default_key_set() {
        let rules = RedactionRules {
            key_patterns: vec!["session_cookie".to_string()],
            value_patterns: vec![],
        };
        let mut v = serde_json::json!({"session_cookie": "abc123"});
        rules.apply(&mut v);
        assert_eq!(v["session_cookie"], "<redacted>");
    }
}
