use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::Write;

lazy_static! {
    static ref REDACTION_REGEX: Regex = match Regex::new(
        r"(?i)(sk-[A-Za-z0-9_\-]{20,}|Bearer\s+[^\s]+|x-api-key:\s*[^\s]+)"
    ) {
        Ok(re) => re,
        Err(e) => panic!("Invalid redaction regex: {}", e),
    };
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum RedactionLevel {
    Strict,  // Production - secrets + conversation text
    Normal,  // Development - secrets + attachment payloads
    Minimal, // Debug - secrets only
}

impl Default for RedactionLevel {
    fn default() -> Self {
        match std::env::var("REDACTION_LEVEL")
            .unwrap_or_else(|_| "normal".to_string())
            .to_lowercase()
            .as_str()
        {
            "strict" => RedactionLevel::Strict,
            "minimal" => RedactionLevel::Minimal,
            _ => RedactionLevel::Normal,
        }
    }
}

pub fn redact_str(input: &str) -> String {
    REDACTION_REGEX.replace_all(input, "[REDACTED]").into_owned()
}

pub fn redact_value(v: &mut Value, level: RedactionLevel) {
    match v {
        Value::Object(map) => {
            for (k, val) in map.iter_mut() {
                let k_lower = k.to_lowercase();

                if k_lower.contains("key")
                    || k_lower.contains("auth")
                    || k_lower.contains("token")
                    || k_lower.contains("secret")
                    || k_lower.contains("password")
                    || k_lower.contains("passphrase")
                    || k_lower == "cookie"
                {
                    *val = Value::String("[REDACTED]".to_string());
                    continue;
                }

                match level {
                    RedactionLevel::Strict => {
                        if k_lower == "content" || k_lower == "payload" || k_lower == "prompt" {
                            *val = Value::String("[REDACTED-STRICT]".to_string());
                        } else {
                            redact_value(val, level);
                        }
                    }
                    RedactionLevel::Normal => {
                        let long_string = val.as_str().map(|s| s.len() > 100).unwrap_or(false);
                        if (k_lower == "payload" || k_lower == "url" || k_lower == "b64_json")
                            && long_string
                        {
                            *val = Value::String("[REDACTED-DATA]".to_string());
                        } else {
                            redact_value(val, level);
                        }
                    }
                    RedactionLevel::Minimal => redact_value(val, level),
                }
            }
        }
        Value::Array(arr) => {
            for val in arr {
                redact_value(val, level);
            }
        }
        Value::String(s) => {
            if REDACTION_REGEX.is_match(s) {
                *s = redact_str(s);
            }
        }
        _ => {}
    }
}

/// Log sink wrapper masking bearer tokens and API keys in formatted output.
pub struct RedactingWriter<W: Write> {
    inner: W,
}

impl<W: Write> RedactingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let input = String::from_utf8_lossy(buf);
        let redacted = REDACTION_REGEX.replace_all(&input, "[REDACTED]");
        self.inner.write_all(redacted.as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_writer_masks_bearer_and_keys() {
        let mut out = Vec::new();
        {
            let mut w = RedactingWriter::new(&mut out);
            let _ = w.write_all(b"Authorization: Bearer abc.def sk-ABCDEFGHIJKLMNOPQRSTUV done");
        }
        let text = String::from_utf8_lossy(&out);
        assert!(!text.contains("abc.def"));
        assert!(!text.contains("sk-ABCDEF"));
        assert!(text.ends_with("done"));
    }

    #[test]
    fn test_value_redaction_levels() {
        let blob = "A".repeat(200);
        let mut v = json!({
            "subjectId": "alice",
            "apiKey": "secret",
            "turns": [{"role": "user", "content": "hello"}],
            "files": [{"name": "a.png", "payload": blob}]
        });
        redact_value(&mut v, RedactionLevel::Normal);
        assert_eq!(v["apiKey"], "[REDACTED]");
        assert_eq!(v["files"][0]["payload"], "[REDACTED-DATA]");
        assert_eq!(v["turns"][0]["content"], "hello");

        redact_value(&mut v, RedactionLevel::Strict);
        assert_eq!(v["turns"][0]["content"], "[REDACTED-STRICT]");
        assert_eq!(v["subjectId"], "alice");
    }
}
