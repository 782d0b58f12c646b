use trellis_core::context::{keys, ContextStore};
use trellis_core::event::Step;
use trellis_core::types::NodeType;

/// Select the final textual payload for a response output: the running
/// answer, then translated/transformed content, then the most recent
/// synthesis-family step, then the user message.
pub fn select_final_answer(context: &ContextStore, trace: &[Step]) -> String {
    for key in [
        keys::FINAL_ANSWER,
        keys::TRANSLATED_CONTENT,
        keys::TRANSFORMED_CONTENT,
    ] {
        if let Some(text) = context.get_str(key) {
            if !text.trim().is_empty() {
                return text.to_string();
            }
        }
    }

    for step in trace.iter().rev() {
        if matches!(step.action.as_str(), "synthesize" | "sample" | "transform")
            && !step.content.trim().is_empty()
        {
            return step.content.clone();
        }
    }

    context
        .get_str(keys::USER_MESSAGE)
        .unwrap_or_default()
        .to_string()
}

/// Spreadsheet outputs prefer CSV-validated transformed content, else a
/// CSV coercion of the final answer.
pub fn select_spreadsheet_payload(context: &ContextStore, trace: &[Step]) -> String {
    if let Some(transformed) = context.get_str(keys::TRANSFORMED_CONTENT) {
        if is_csv_shaped(transformed) {
            return transformed.to_string();
        }
    }
    coerce_csv(&select_final_answer(context, trace))
}

/// CSV shape: at least one newline, a comma on every non-empty line, and
/// a consistent column count throughout.
pub fn is_csv_shaped(text: &str) -> bool {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.len() < 2 {
        return false;
    }
    let columns = lines[0].split(',').count();
    if columns < 2 {
        return false;
    }
    lines.iter().all(|line| line.split(',').count() == columns)
}

/// Force arbitrary text into a one-column CSV with a header row.
fn coerce_csv(text: &str) -> String {
    let mut out = String::from("content\n");
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        out.push('"');
        out.push_str(&line.replace('"', "\"\""));
        out.push_str("\"\n");
    }
    if out == "content\n" {
        out.push_str("\"\"\n");
    }
    out
}

/// The `output_format` tag carried on the Done event.
pub fn output_format(output_type: Option<NodeType>, payload: &str) -> String {
    match output_type {
        Some(NodeType::Spreadsheet) => "spreadsheet".to_string(),
        _ => {
            if is_csv_shaped(payload) {
                "csv".to_string()
            } else {
                "text".to_string()
            }
        }
    }
}
