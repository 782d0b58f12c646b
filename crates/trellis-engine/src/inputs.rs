use base64::Engine as _;
use tracing::warn;

use trellis_core::context::{keys, ContextStore};
use trellis_core::event::Step;
use trellis_core::traits::{DocumentExtractor, FileFormat};
use trellis_core::types::{NodeType, UploadedFile};

use crate::planner::{ExecutionPlan, PlannedNode};

const PDF_PREFIX: &str = "__PDF_BASE64__";
const DOCX_PREFIX: &str = "__DOCX_BASE64__";

/// Copy a prompt node's text into `user_message` (last write wins).
pub fn handle_prompt_node(planned: &PlannedNode, context: &mut ContextStore) -> Step {
    let text = planned
        .node
        .data
        .prompt_text
        .as_deref()
        .unwrap_or_default();
    if !text.trim().is_empty() {
        context.set_str(keys::USER_MESSAGE, text);
    }
    let content = context
        .get_str(keys::USER_MESSAGE)
        .unwrap_or_default()
        .to_string();
    Step::new(&planned.node.id, "none", "input", content)
}

/// Decode an upload node's files, extract text per format and append it
/// to `uploaded_content`. Extraction failures are recoverable: the file
/// contributes nothing and the step carries a note.
pub fn handle_upload_node(
    planned: &PlannedNode,
    plan: &ExecutionPlan,
    context: &mut ContextStore,
    extractor: &dyn DocumentExtractor,
) -> Step {
    let files = planned
        .node
        .data
        .uploaded_files
        .clone()
        .unwrap_or_default();

    let mut extracted_parts = Vec::new();
    let mut notes = Vec::new();

    for file in &files {
        match extract_file(file, extractor) {
            Ok(text) if !text.trim().is_empty() => {
                extracted_parts.push(format!("--- {} ---\n{}", file.name, text));
            }
            Ok(_) => notes.push(format!("{}: extracted no text", file.name)),
            Err(message) => {
                warn!(file = %file.name, %message, "Upload extraction failed");
                notes.push(format!("{}: {message}", file.name));
            }
        }
    }

    if !extracted_parts.is_empty() {
        let mut combined = context
            .get_str(keys::UPLOADED_CONTENT)
            .unwrap_or_default()
            .to_string();
        for part in &extracted_parts {
            if !combined.is_empty() {
                combined.push_str("\n\n");
            }
            combined.push_str(part);
        }
        context.set_str(keys::UPLOADED_CONTENT, combined);
    } else if context.get(keys::UPLOADED_CONTENT).is_none() {
        context.set_str(keys::UPLOADED_CONTENT, "");
    }

    // Instruction precedence: explicit uploader instruction, then any
    // existing user message, then a default derived from the graph shape.
    let explicit = planned
        .node
        .data
        .upload_instruction
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    if let Some(instruction) = explicit {
        context.set_str(keys::USER_MESSAGE, instruction);
        context.set_str(keys::UPLOAD_INSTRUCTION, instruction);
    } else if context
        .get_str(keys::USER_MESSAGE)
        .map(|m| m.trim().is_empty())
        .unwrap_or(true)
    {
        let instruction = default_instruction(plan);
        context.set_str(keys::USER_MESSAGE, instruction);
        context.set_str(keys::UPLOAD_INSTRUCTION, instruction);
    }

    let content = format!(
        "Processed {} uploaded file(s), {} with extractable text.",
        files.len(),
        extracted_parts.len()
    );
    let mut step = Step::new(&planned.node.id, "none", "input", content);
    if !notes.is_empty() {
        step = step.with_metadata("extraction_notes", serde_json::json!(notes));
    }
    step
}

/// Extraction-oriented default when the graph will transform or tabulate
/// the content; summary-oriented otherwise.
fn default_instruction(plan: &ExecutionPlan) -> &'static str {
    let extraction_shaped = plan.nodes.values().any(|p| {
        matches!(p.node_type, NodeType::Transformer | NodeType::Spreadsheet)
    });
    if extraction_shaped {
        "Extract the structured data from the uploaded document."
    } else {
        "Summarize the key points of the uploaded document."
    }
}

fn extract_file(
    file: &UploadedFile,
    extractor: &dyn DocumentExtractor,
) -> std::result::Result<String, String> {
    let Some(content) = file.content.as_deref() else {
        return Err("no content".into());
    };

    let (format, bytes) = if let Some(encoded) = content.strip_prefix(PDF_PREFIX) {
        (FileFormat::Pdf, decode_base64(encoded)?)
    } else if let Some(encoded) = content.strip_prefix(DOCX_PREFIX) {
        (FileFormat::Docx, decode_base64(encoded)?)
    } else {
        let format = file
            .name
            .rsplit('.')
            .next()
            .and_then(FileFormat::from_extension)
            .unwrap_or(FileFormat::Text);
        (format, content.as_bytes().to_vec())
    };

    extractor
        .extract(format, &bytes)
        .map_err(|e| e.to_string())
}

fn decode_base64(encoded: &str) -> std::result::Result<Vec<u8>, String> {
    base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| format!("invalid base64 payload: {e}"))
}
