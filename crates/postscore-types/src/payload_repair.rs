use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::lead::Post;

/// Which stage of the cascade produced a successful parse (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepairMethod {
    Clean,
    CleanPreprocessing,
    QuoteRepair,
    DirtyJson,
    DirtyJsonQuoteRepair,
    Corrupted,
}

impl RepairMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            RepairMethod::Clean => "CLEAN",
            RepairMethod::CleanPreprocessing => "CLEAN_PREPROCESSING",
            RepairMethod::QuoteRepair => "QUOTE_REPAIR",
            RepairMethod::DirtyJson => "DIRTY_JSON",
            RepairMethod::DirtyJsonQuoteRepair => "DIRTY_JSON_QUOTE_REPAIR",
            RepairMethod::Corrupted => "CORRUPTED",
        }
    }
}

/// Diagnostic-only classification of input health, not in the parse
/// critical path (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Clean,
    Dirty,
    Corrupted,
}

#[derive(Debug, Clone)]
pub struct RepairOutcome {
    pub success: bool,
    pub data: Option<Vec<Post>>,
    pub method: RepairMethod,
    pub error: Option<String>,
}

impl RepairOutcome {
    fn ok(data: Vec<Post>, method: RepairMethod) -> Self {
        Self {
            success: true,
            data: Some(data),
            method,
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            method: RepairMethod::Corrupted,
            error: Some(error.into()),
        }
    }
}

/// Parses a lead's raw payload into posts via the five-stage cascade,
/// first success wins. `input` may already be a parsed JSON array (a lead
/// whose store column is natively JSON) or a string needing repair.
pub fn repair(input: &Value) -> RepairOutcome {
    if let Value::Array(_) = input {
        return match parse_value_as_posts(input) {
            Some(posts) => RepairOutcome::ok(posts, RepairMethod::Clean),
            None => RepairOutcome::failed("array elements do not match the post shape"),
        };
    }

    let raw = match input {
        Value::String(s) => s.clone(),
        Value::Null => return RepairOutcome::failed("payload is empty"),
        other => other.to_string(),
    };

    repair_text(&raw)
}

/// Same cascade, entered directly from a raw string (the Model Client's
/// response text never arrives as a pre-parsed [`Value`]).
pub fn repair_text(raw: &str) -> RepairOutcome {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return RepairOutcome::failed("payload is empty");
    }

    // 1. strict parse of the trimmed string.
    if let Some(posts) = try_parse_array(trimmed) {
        return RepairOutcome::ok(posts, RepairMethod::Clean);
    }

    // 2. strip control characters, normalise line endings, retry strict parse.
    let cleaned = strip_control_chars(trimmed);
    if let Some(posts) = try_parse_array(&cleaned) {
        return RepairOutcome::ok(posts, RepairMethod::CleanPreprocessing);
    }

    // 3. escape unescaped quotes inside "postContent" values, retry strict parse.
    let quote_repaired = repair_post_content_quotes(&cleaned);
    if let Some(posts) = try_parse_array(&quote_repaired) {
        return RepairOutcome::ok(posts, RepairMethod::QuoteRepair);
    }

    // 4. lenient parse via a forgiving JSON library.
    if let Some(posts) = try_parse_array_lenient(&cleaned) {
        return RepairOutcome::ok(posts, RepairMethod::DirtyJson);
    }

    // 5. lenient parse on the quote-repaired string.
    if let Some(posts) = try_parse_array_lenient(&quote_repaired) {
        return RepairOutcome::ok(posts, RepairMethod::DirtyJsonQuoteRepair);
    }

    RepairOutcome::failed("unable to parse payload as an array of posts")
}

/// Diagnostic severity classification, independent of whether `repair`
/// would actually succeed.
pub fn analyze_severity(input: &str) -> Severity {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Severity::Corrupted;
    }

    let has_control_chars = trimmed.chars().any(is_stray_control_char);
    let quote_count = trimmed.chars().filter(|&c| c == '"').count();
    let odd_quotes = quote_count % 2 != 0;
    let balanced = is_bracket_balanced(trimmed);

    if !balanced || has_control_chars {
        Severity::Corrupted
    } else if odd_quotes {
        Severity::Dirty
    } else {
        Severity::Clean
    }
}

fn is_stray_control_char(c: char) -> bool {
    let code = c as u32;
    code == 0 || (code < 0x20 && c != '\n' && c != '\t' && c != '\r') || (0x80..=0x9f).contains(&code)
}

fn is_bracket_balanced(input: &str) -> bool {
    let mut stack = Vec::new();
    for c in input.chars() {
        match c {
            '{' | '[' => stack.push(c),
            '}' => {
                if stack.pop() != Some('{') {
                    return false;
                }
            }
            ']' => {
                if stack.pop() != Some('[') {
                    return false;
                }
            }
            _ => {}
        }
    }
    stack.is_empty()
}

fn parse_value_as_posts(value: &Value) -> Option<Vec<Post>> {
    match value {
        Value::Array(_) => serde_json::from_value(value.clone()).ok(),
        _ => None,
    }
}

fn try_parse_array(input: &str) -> Option<Vec<Post>> {
    let value: Value = serde_json::from_str(input).ok()?;
    parse_value_as_posts(&value)
}

fn try_parse_array_lenient(input: &str) -> Option<Vec<Post>> {
    let value: Value = json5::from_str(input).ok()?;
    parse_value_as_posts(&value)
}

fn strip_control_chars(input: &str) -> String {
    let normalized = input.replace("\r\n", "\n").replace('\r', "\n");
    normalized.chars().filter(|c| !is_stray_control_char(*c)).collect()
}

/// Escapes unescaped `"` inside `"postContent": "..."` values. Scans by
/// char so multi-byte content is never sliced mid-codepoint; a quote is
/// treated as the value terminator only when, skipping whitespace, it is
/// followed by `,`, `}`, `]`, or end of input.
fn repair_post_content_quotes(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let key: Vec<char> = "\"postContent\"".chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;

    while i < chars.len() {
        match find_char_subslice(&chars[i..], &key) {
            Some(rel) => {
                let key_start = i + rel;
                out.extend(chars[i..key_start].iter().copied());
                out.extend(key.iter().copied());
                let mut j = key_start + key.len();

                while j < chars.len() && chars[j] != ':' {
                    out.push(chars[j]);
                    j += 1;
                }
                if j < chars.len() {
                    out.push(chars[j]);
                    j += 1;
                }
                while j < chars.len() && chars[j].is_whitespace() {
                    out.push(chars[j]);
                    j += 1;
                }

                if j < chars.len() && chars[j] == '"' {
                    out.push('"');
                    j += 1;
                    let mut value_chars = Vec::new();
                    while j < chars.len() {
                        let c = chars[j];
                        if c == '\\' && j + 1 < chars.len() {
                            value_chars.push(c);
                            value_chars.push(chars[j + 1]);
                            j += 2;
                            continue;
                        }
                        if c == '"' {
                            let mut k = j + 1;
                            while k < chars.len() && chars[k].is_whitespace() {
                                k += 1;
                            }
                            let is_terminator =
                                k >= chars.len() || matches!(chars[k], ',' | '}' | ']');
                            if is_terminator {
                                j += 1;
                                break;
                            }
                            value_chars.push('\\');
                            value_chars.push('"');
                            j += 1;
                            continue;
                        }
                        value_chars.push(c);
                        j += 1;
                    }
                    out.extend(value_chars);
                    out.push('"');
                }

                i = j;
            }
            None => {
                out.extend(chars[i..].iter().copied());
                break;
            }
        }
    }

    out
}

fn find_char_subslice(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (0..=haystack.len() - needle.len()).find(|&start| haystack[start..start + needle.len()] == *needle)
}
