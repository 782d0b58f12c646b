use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures::stream::Stream;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use trellis_core::event::{event_channel, WorkflowEvent};
use trellis_core::types::ExecuteRequest;
use trellis_engine::plan;
use trellis_retrieval::load_corpus;

use crate::state::AppState;

/// POST /api/workflow/execute — validate, then stream progress events.
///
/// Validation failures return a non-streaming 400; engine failures after
/// the stream opens arrive as `error` events on the stream.
pub async fn execute_workflow(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExecuteRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, Json<serde_json::Value>)>
{
    if let Some(corpus) = request.knowledge_base.as_deref() {
        if !state.catalog.set_active(corpus) {
            warn!(corpus, "Requested unknown knowledge base, keeping current");
        }
    }

    let execution_plan = plan(&request.workflow_nodes, &request.workflow_edges).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"detail": e.to_string()})),
        )
    })?;

    let run_id = uuid::Uuid::new_v4();
    info!(
        %run_id,
        nodes = execution_plan.order.len(),
        message_chars = request.message.len(),
        "Workflow execution starting"
    );

    let (tx, mut rx) = event_channel();
    let cancel = CancellationToken::new();
    let engine = state.engine.clone();
    let timeout = Duration::from_secs(state.config.engine.request_timeout_secs);
    let run_cancel = cancel.clone();

    tokio::spawn(async move {
        let run = engine.run(request.message, execution_plan, tx, run_cancel.clone());
        match tokio::time::timeout(timeout, run).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "Run ended early"),
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "Run timed out, cancelling");
                run_cancel.cancel();
            }
        }
    });

    let stream = futures::stream::poll_fn(move |cx| {
        rx.poll_recv(cx).map(|maybe| {
            maybe.map(|event: WorkflowEvent| {
                Ok(Event::default()
                    .event(event.tag())
                    .data(event.payload().to_string()))
            })
        })
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// GET /api/health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let active = state.catalog.active();
    let count = state.retriever.count(&active).await.unwrap_or(0);
    Json(serde_json::json!({
        "status": "healthy",
        "document_count": count,
    }))
}

/// GET /api/provider
pub async fn provider_info(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "provider": state.config.provider.as_str(),
        "small_model": state.config.models.small,
        "large_model": state.config.models.large,
        "image_provider": state.config.image_provider.as_str(),
    }))
}

/// GET /api/knowledge-base
pub async fn knowledge_base_info(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let mut available = Vec::new();
    for corpus in state.catalog.corpora() {
        let count = state.retriever.count(&corpus).await.unwrap_or(0);
        available.push(serde_json::json!({
            "id": corpus,
            "name": title_case(&corpus),
            "document_count": count,
        }));
    }
    Json(serde_json::json!({
        "active": state.catalog.active(),
        "available": available,
    }))
}

#[derive(Deserialize)]
pub struct SwitchRequest {
    pub knowledge_base: String,
}

/// POST /api/knowledge-base/switch
pub async fn switch_knowledge_base(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SwitchRequest>,
) -> impl IntoResponse {
    if state.catalog.set_active(&request.knowledge_base) {
        (
            StatusCode::OK,
            Json(serde_json::json!({
                "active": request.knowledge_base,
                "message": format!("Switched to {} knowledge base", request.knowledge_base),
            })),
        )
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "detail": format!("Unknown knowledge base '{}'", request.knowledge_base),
            })),
        )
    }
}

#[derive(Deserialize)]
pub struct DocumentUploadRequest {
    pub title: String,
    pub content: String,
    #[serde(default = "default_corpus")]
    pub knowledge_base: String,
}

fn default_corpus() -> String {
    "legal".into()
}

/// POST /api/documents — write a markdown document into the corpus
/// directory and re-sync that corpus.
pub async fn upload_document(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DocumentUploadRequest>,
) -> impl IntoResponse {
    if !state.config.retrieval.corpora.contains(&request.knowledge_base) {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "detail": format!("Unknown knowledge base '{}'", request.knowledge_base),
            })),
        );
    }

    let dir = state.config.documents_dir(&request.knowledge_base);
    if let Err(e) = std::fs::create_dir_all(&dir) {
        return internal_error(format!("cannot create corpus directory: {e}"));
    }
    let filename = format!(
        "{}.md",
        request.title.replace(' ', "_").replace('/', "-")
    );
    let body = format!("# {}\n\n{}", request.title, request.content);
    if let Err(e) = std::fs::write(dir.join(&filename), body) {
        return internal_error(format!("cannot write document: {e}"));
    }

    // Re-index the corpus so the new document is searchable immediately
    let documents = match load_corpus(&dir, &request.knowledge_base, state.extractor.as_ref()) {
        Ok(docs) => docs,
        Err(e) => return internal_error(format!("corpus reload failed: {e}")),
    };
    if let Err(e) = state.store.sync(&request.knowledge_base, &documents).await {
        return internal_error(format!("embedding sync failed: {e}"));
    }
    state.catalog.replace(&request.knowledge_base, documents);

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "success": true,
            "document": filename,
            "message": "Document saved and indexed",
        })),
    )
}

/// GET /api/documents?knowledge_base=…
pub async fn list_documents(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    let corpus = query.knowledge_base.unwrap_or_else(default_corpus);
    let documents: Vec<serde_json::Value> = state
        .catalog
        .documents(&corpus)
        .into_iter()
        .map(|d| {
            serde_json::json!({
                "id": d.id,
                "title": d.title,
                "source": d.source,
                "content_length": d.content.len(),
            })
        })
        .collect();
    Json(serde_json::json!({
        "knowledge_base": corpus,
        "documents": documents,
    }))
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub knowledge_base: Option<String>,
}

fn internal_error(detail: String) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({"detail": detail})),
    )
}

fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("legal"), "Legal");
        assert_eq!(title_case(""), "");
    }
}
