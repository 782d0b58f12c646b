use trellis_core::context::keys;
use trellis_core::types::ContextData;

/// Strip a markdown code fence wrapper, if present, including any
/// language tag on the fence line.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = match rest.split_once('\n') {
        Some((tag, body)) if !tag.trim().is_empty() && !tag.trim().contains(' ') => body,
        _ => rest,
    };
    rest.trim().trim_end_matches("```").trim()
}

/// Best-effort JSON extraction from an LLM reply: direct parse first,
/// then the first bracketed span.
pub fn parse_json_loose(text: &str) -> Option<serde_json::Value> {
    let cleaned = strip_code_fence(text);
    if let Ok(value) = serde_json::from_str(cleaned) {
        return Some(value);
    }
    for (open, close) in [('[', ']'), ('{', '}')] {
        if let (Some(start), Some(end)) = (cleaned.find(open), cleaned.rfind(close)) {
            if start < end {
                if let Ok(value) = serde_json::from_str(&cleaned[start..=end]) {
                    return Some(value);
                }
            }
        }
    }
    None
}

/// The most useful source text currently in context: uploaded content,
/// then the running answer, then the user message.
pub fn best_source_text<'a>(context: &'a ContextData, user_message: &'a str) -> &'a str {
    for key in [keys::UPLOADED_CONTENT, keys::FINAL_ANSWER] {
        if let Some(text) = context.get(key).and_then(|v| v.as_str()) {
            if !text.trim().is_empty() {
                return text;
            }
        }
    }
    user_message
}

/// Render semantic results as numbered snippets for prompt context.
pub fn format_semantic_results(context: &ContextData) -> Option<String> {
    let results = context.get(keys::SEMANTIC_RESULTS)?.as_array()?;
    if results.is_empty() {
        return None;
    }
    let mut out = String::new();
    for (i, hit) in results.iter().enumerate() {
        let title = hit.get("title").and_then(|v| v.as_str()).unwrap_or("untitled");
        let snippet = hit.get("snippet").and_then(|v| v.as_str()).unwrap_or("");
        out.push_str(&format!("[{}] {}\n{}\n\n", i + 1, title, snippet));
    }
    Some(out)
}
