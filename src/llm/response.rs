use std::sync::LazyLock;

use log::debug;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::error::EvalError;

/// Marker some models emit before their final answer. Only text after the
/// last occurrence is considered.
const OUTPUT_MARKER: &str = "[My Output]";

static RE_THINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>(.*?)</think>").expect("valid regex"));
static RE_JSON_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)```json").expect("valid regex"));
static RE_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{[^{}]*\}").expect("valid regex"));

/// A validated pick from a lettered option list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Uppercase option letter, guaranteed to index an existing option.
    pub choice: char,
    pub explanation: Option<String>,
}

/// The only fields ever read from model output.
#[derive(Debug, Deserialize)]
struct RawDecision {
    #[serde(default)]
    choice: Option<Value>,
    #[serde(default, alias = "explaination")]
    explanation: Option<Value>,
}

/// Extract a decision from raw model output for a list of `option_count`
/// options.
///
/// Model text is only ever handed to a JSON parser. Anything that does not
/// yield an in-range letter is rejected; there is no default choice.
pub fn parse_decision(raw: &str, option_count: usize) -> Result<Decision, EvalError> {
    for cap in RE_THINK.captures_iter(raw) {
        let thought = cap.get(1).map_or("", |m| m.as_str()).trim();
        if !thought.is_empty() {
            debug!("Model thinking:\n{thought}");
        }
    }
    let cleaned = RE_THINK.replace_all(raw, "");

    let mut region: &str = &cleaned;
    if let Some(pos) = region.rfind(OUTPUT_MARKER) {
        region = &region[pos + OUTPUT_MARKER.len()..];
    }
    if let Some(m) = RE_JSON_FENCE.find_iter(region).last() {
        region = &region[m.end()..];
    }
    let body = region.replace("```", "");
    let body = body.trim();

    let parsed = match serde_json::from_str::<RawDecision>(body) {
        Ok(parsed) => parsed,
        Err(strict_err) => embedded_decision(body).map_err(|e| match e {
            EvalError::MalformedResponse(msg) => {
                EvalError::malformed_response(format!("{msg} (strict parse: {strict_err})"))
            }
            other => other,
        })?,
    };

    let choice = match parsed.choice {
        Some(Value::String(s)) => letter(&s)
            .ok_or_else(|| EvalError::malformed_response(format!("choice '{s}' is not a letter")))?,
        Some(other) => {
            return Err(EvalError::malformed_response(format!(
                "choice must be a string, got {other}"
            )))
        }
        None => return Err(EvalError::malformed_response("missing 'choice' field")),
    };

    let index = (choice as u8 - b'A') as usize;
    if index >= option_count {
        return Err(EvalError::malformed_response(format!(
            "choice '{choice}' is out of range for {option_count} options"
        )));
    }

    let explanation = parsed.explanation.and_then(|v| match v {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    });

    Ok(Decision {
        choice,
        explanation,
    })
}

/// Pick the decision out of JSON objects embedded in prose.
///
/// Objects without a `choice` are ignored. Several objects that disagree on
/// the choice are rejected rather than guessed between; when they agree the
/// last one wins.
fn embedded_decision(body: &str) -> Result<RawDecision, EvalError> {
    let mut objects = 0;
    let mut found: Option<(RawDecision, Option<char>)> = None;

    for m in RE_OBJECT.find_iter(body) {
        objects += 1;
        let Ok(candidate) = serde_json::from_str::<RawDecision>(m.as_str()) else {
            continue;
        };
        let Some(choice) = &candidate.choice else {
            continue;
        };
        debug!("Extracted JSON: {}", m.as_str());

        let label = choice.as_str().and_then(letter);
        if let Some((previous, previous_label)) = &found {
            if *previous_label != label || label.is_none() {
                return Err(EvalError::malformed_response(format!(
                    "conflicting answers {} and {choice}",
                    previous.choice.as_ref().map_or(Value::Null, Value::clone)
                )));
            }
        }
        found = Some((candidate, label));
    }

    match found {
        Some((decision, _)) => Ok(decision),
        None if objects == 0 => Err(EvalError::malformed_response("no JSON object in output")),
        None => Err(EvalError::malformed_response(
            "no JSON object in output carries a 'choice'",
        )),
    }
}

/// Accepts "B", "b", " B " and "B. Apologize"; rejects "AB", "", "2".
fn letter(s: &str) -> Option<char> {
    let s = s.trim();
    let mut chars = s.chars();
    let first = chars.next().filter(char::is_ascii_alphabetic)?;
    match chars.next() {
        None => Some(first.to_ascii_uppercase()),
        Some(c) if !c.is_alphanumeric() => Some(first.to_ascii_uppercase()),
        Some(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fenced_json() {
        let d = parse_decision("```json\n{\"choice\": \"B\"}\n```", 3).unwrap();
        assert_eq!(d.choice, 'B');
        assert_eq!(d.explanation, None);
    }

    #[test]
    fn test_no_json_is_malformed() {
        let err = parse_decision("no json here", 3).unwrap_err();
        assert!(matches!(err, EvalError::MalformedResponse(_)));
    }

    #[test]
    fn test_out_of_range_letter_is_malformed() {
        let err = parse_decision(r#"{"choice": "Z"}"#, 3).unwrap_err();
        assert!(matches!(err, EvalError::MalformedResponse(_)));
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_missing_choice_is_malformed() {
        let err = parse_decision(r#"{"explanation": "I like it"}"#, 3).unwrap_err();
        assert!(matches!(err, EvalError::MalformedResponse(_)));
    }

    #[test]
    fn test_only_text_after_last_marker_counts() {
        let raw = r#"[My Output] {"choice": "A"} draft
[My Output]
```json
{"explaination": "keeps the peace", "choice": "c"}
```"#;
        let d = parse_decision(raw, 4).unwrap();
        assert_eq!(d.choice, 'C');
        assert_eq!(d.explanation.as_deref(), Some("keeps the peace"));
    }

    #[test]
    fn test_think_block_and_prefix_noise() {
        let raw = r#"<think>The host wants reassurance.</think>
Sure! Here is my answer: {"choice": "B", "explanation": "calms things down"} Hope it helps."#;
        let d = parse_decision(raw, 2).unwrap();
        assert_eq!(d.choice, 'B');
    }

    #[test]
    fn test_non_string_choice_is_malformed() {
        let err = parse_decision(r#"{"choice": 1}"#, 3).unwrap_err();
        assert!(matches!(err, EvalError::MalformedResponse(_)));
        let err = parse_decision(r#"{"choice": "AB"}"#, 3).unwrap_err();
        assert!(matches!(err, EvalError::MalformedResponse(_)));
    }

    #[test]
    fn test_code_like_output_is_not_evaluated() {
        let raw = r#"__import__('os').system('echo hi') or {'choice': 'A'}"#;
        assert!(parse_decision(raw, 2).is_err());
    }

    #[test]
    fn test_letter_with_trailing_text() {
        let d = parse_decision(r#"{"choice": "A. Apologize first"}"#, 2).unwrap();
        assert_eq!(d.choice, 'A');
    }

    #[test]
    fn test_revised_answer_in_prose_is_rejected() {
        let raw = "Draft: {\"choice\": \"A\"}\nOn reflection my final answer is {\"choice\": \"B\"}";
        let err = parse_decision(raw, 3).unwrap_err();
        assert!(matches!(err, EvalError::MalformedResponse(_)));
        assert!(err.to_string().contains("conflicting"));
    }

    #[test]
    fn test_repeated_answer_in_prose_takes_last() {
        let raw = r#"First {"choice": "b"} and again {"choice": "B", "explanation": "final"}"#;
        let d = parse_decision(raw, 3).unwrap();
        assert_eq!(d.choice, 'B');
        assert_eq!(d.explanation.as_deref(), Some("final"));
    }

    #[test]
    fn test_prose_objects_without_choice_are_skipped() {
        let raw = r#"Context {"mood": "tense"} then {"choice": "A"}"#;
        assert_eq!(parse_decision(raw, 2).unwrap().choice, 'A');
        let err = parse_decision(r#"Only {"mood": "tense"} here"#, 2).unwrap_err();
        assert!(err.to_string().contains("carries"));
    }
}
