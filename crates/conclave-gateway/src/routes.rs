//! HTTP handlers

use axum::Json;
use axum::extract::multipart::Field;
use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, Path, State};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use conclave_core::{ChatRequest, ChatResponse, Profile};

use crate::error::{ApiError, ApiResult};
use crate::protocol::{
    DocumentAdded, DocumentUpload, HistoryBody, KnowledgeSetCreate, KnowledgeSetUpdate,
    KnowledgeSetsList, ProfileBody, ProfileSummary, ProfileUpdated, ProfilesList, ServiceInfo,
    SessionsList, StatusBody,
};
use crate::server::GatewayState;
use conclave_knowledge::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, KnowledgeSet};

pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        name: "conclave".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: "online".to_string(),
    })
}

// ── Chat ──

pub async fn chat(
    State(state): State<GatewayState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> ApiResult<Json<ChatResponse>> {
    let Json(request) = payload?;
    let cancel = CancellationToken::new();
    // Dropped with the request future if the client disconnects
    let guard = cancel.clone().drop_guard();
    let response = state.chat.chat_with_cancel(request, cancel).await?;
    let _ = guard.disarm();
    debug!("Chat turn done on session {}", response.session_id);
    Ok(Json(response))
}

// ── Profiles ──

pub async fn list_profiles(State(state): State<GatewayState>) -> Json<ProfilesList> {
    let profiles = state
        .chat
        .registry()
        .list()
        .await
        .into_iter()
        .map(|p| ProfileSummary {
            name: p.name,
            description: p.description,
        })
        .collect();
    Json(ProfilesList { profiles })
}

pub async fn create_profile(
    State(state): State<GatewayState>,
    payload: Result<Json<Profile>, JsonRejection>,
) -> ApiResult<Json<ProfileBody>> {
    let Json(profile) = payload?;
    let profile = state.chat.registry().register(profile).await?;
    Ok(Json(profile.into()))
}

pub async fn get_profile(
    State(state): State<GatewayState>,
    Path(name): Path<String>,
) -> ApiResult<Json<ProfileBody>> {
    Ok(Json(state.chat.registry().get(&name).await?.into()))
}

pub async fn update_profile(
    State(state): State<GatewayState>,
    Path(name): Path<String>,
    payload: Result<Json<Profile>, JsonRejection>,
) -> ApiResult<Json<ProfileUpdated>> {
    let Json(profile) = payload?;
    let profile = state.chat.registry().update(&name, profile).await?;
    Ok(Json(ProfileUpdated {
        status: "success".to_string(),
        message: format!("Profile '{}' updated successfully", name),
        profile: profile.into(),
    }))
}

pub async fn delete_profile(
    State(state): State<GatewayState>,
    Path(name): Path<String>,
) -> ApiResult<Json<StatusBody>> {
    state.chat.registry().delete(&name).await?;
    Ok(Json(StatusBody::success(format!(
        "Profile '{}' deleted successfully",
        name
    ))))
}

// ── Sessions ──

pub async fn list_sessions(State(state): State<GatewayState>) -> ApiResult<Json<SessionsList>> {
    let sessions = state.chat.sessions().list().await?;
    Ok(Json(SessionsList { sessions }))
}

pub async fn session_history(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> ApiResult<Json<HistoryBody>> {
    let messages = state.chat.sessions().history(&id).await?;
    Ok(Json(HistoryBody {
        messages: messages.into_iter().map(Into::into).collect(),
    }))
}

pub async fn delete_session(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> ApiResult<Json<StatusBody>> {
    state.chat.sessions().delete(&id).await?;
    Ok(Json(StatusBody::success(format!("Session {} deleted", id))))
}

// ── Knowledge sets ──

pub async fn list_knowledge_sets(
    State(state): State<GatewayState>,
) -> ApiResult<Json<KnowledgeSetsList>> {
    let knowledge_sets = state.knowledge.list().await?;
    Ok(Json(KnowledgeSetsList { knowledge_sets }))
}

pub async fn create_knowledge_set(
    State(state): State<GatewayState>,
    payload: Result<Json<KnowledgeSetCreate>, JsonRejection>,
) -> ApiResult<Json<KnowledgeSet>> {
    let Json(body) = payload?;
    Ok(Json(state.knowledge.create(&body.name, &body.description).await?))
}

pub async fn get_knowledge_set(
    State(state): State<GatewayState>,
    Path(name): Path<String>,
) -> ApiResult<Json<KnowledgeSet>> {
    Ok(Json(state.knowledge.get(&name).await?))
}

pub async fn update_knowledge_set(
    State(state): State<GatewayState>,
    Path(name): Path<String>,
    payload: Result<Json<KnowledgeSetUpdate>, JsonRejection>,
) -> ApiResult<Json<KnowledgeSet>> {
    let Json(body) = payload?;
    if body.name.as_deref().is_some_and(|n| n != name) {
        return Err(ApiError::bad_request(
            "knowledge set name in URL must match the body",
        ));
    }
    Ok(Json(state.knowledge.update(&name, &body.description).await?))
}

pub async fn delete_knowledge_set(
    State(state): State<GatewayState>,
    Path(name): Path<String>,
) -> ApiResult<Json<StatusBody>> {
    state.knowledge.delete(&name).await?;
    Ok(Json(StatusBody::success(format!(
        "Knowledge set '{}' deleted successfully",
        name
    ))))
}

pub async fn add_document(
    State(state): State<GatewayState>,
    Path(name): Path<String>,
    payload: Result<Json<DocumentUpload>, JsonRejection>,
) -> ApiResult<Json<DocumentAdded>> {
    let Json(upload) = payload?;
    let added = state
        .knowledge
        .add_document(
            &name,
            &upload.title,
            &upload.text,
            upload.chunk_size,
            upload.chunk_overlap,
        )
        .await?;
    info!("Document upload into '{}': {} chunks", name, added);
    document_added(&state, &name, added).await
}

/// Multipart upload: a `file` part plus optional `chunk_size` and
/// `chunk_overlap` fields. The file extension picks the loader.
pub async fn upload_document(
    State(state): State<GatewayState>,
    Path(name): Path<String>,
    payload: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<DocumentAdded>> {
    let mut multipart = payload?;
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut chunk_size = DEFAULT_CHUNK_SIZE;
    let mut chunk_overlap = DEFAULT_CHUNK_OVERLAP;

    while let Some(field) = multipart.next_field().await? {
        let key = field.name().map(str::to_string);
        match key.as_deref() {
            Some("file") => {
                let file_name = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| ApiError::bad_request("file part has no file name"))?;
                let bytes = field.bytes().await?;
                file = Some((file_name, bytes.to_vec()));
            }
            Some("chunk_size") => chunk_size = form_number(field, "chunk_size").await?,
            Some("chunk_overlap") => chunk_overlap = form_number(field, "chunk_overlap").await?,
            other => debug!("Ignoring upload field {:?}", other),
        }
    }

    let (file_name, bytes) = file.ok_or_else(|| ApiError::bad_request("No file uploaded"))?;
    let added = state
        .knowledge
        .add_file(&name, &file_name, bytes, chunk_size, chunk_overlap)
        .await?;
    info!("File '{}' uploaded into '{}': {} chunks", file_name, name, added);
    document_added(&state, &name, added).await
}

async fn form_number(field: Field<'_>, key: &str) -> ApiResult<usize> {
    let text = field.text().await?;
    text.trim()
        .parse()
        .map_err(|_| ApiError::bad_request(format!("{} must be a non-negative integer", key)))
}

async fn document_added(
    state: &GatewayState,
    name: &str,
    added: usize,
) -> ApiResult<Json<DocumentAdded>> {
    let total = state.knowledge.get(name).await?.document_count;
    Ok(Json(DocumentAdded {
        status: "success".to_string(),
        message: format!(
            "Added {} document chunks to knowledge set '{}'",
            added, name
        ),
        total_documents: total,
    }))
}

#[cfg(test)]
mod tests {
    use crate::server::{GatewayState, router};
    use async_trait::async_trait;
    use axum::Router;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use conclave_core::providers::types::ChatResponse as ModelResponse;
    use conclave_core::providers::{ChatMessage, LlmProvider};
    use conclave_core::{
        AgentFactory, ChatService, MemorySessionBackend, ModelHub, OrchestratorConfig, Profile,
        ProfileRegistry, SessionStore,
    };
    use conclave_knowledge::{KnowledgeBase, KnowledgeDb, PassageIndex};
    use serde_json::{Value, json};
    use std::collections::HashMap;
    use std::sync::Arc;
    use tower::ServiceExt;

    /// Echoes the last message, plus any retrieved context
    struct Echo;

    #[async_trait]
    impl LlmProvider for Echo {
        fn provider_name(&self) -> &str {
            "mock"
        }
        fn model(&self) -> &str {
            "echo"
        }
        async fn chat(&self, messages: &[ChatMessage], system: &str) -> anyhow::Result<ModelResponse> {
            let last = messages.last().map(|m| m.content.as_str()).unwrap_or("");
            let context = if system.contains("# CONTEXT") { " [with context]" } else { "" };
            Ok(ModelResponse::text(format!("echo: {}{}", last, context)))
        }
    }

    fn profile(name: &str) -> Profile {
        let mut p = Profile::new(name, format!("The {} agent", name));
        p.model.provider = "mock".to_string();
        p.model.name = "echo".to_string();
        p
    }

    async fn app() -> Router {
        let registry = Arc::new(ProfileRegistry::in_memory());
        registry.register(profile("default")).await.unwrap();

        let knowledge = Arc::new(KnowledgeBase::new(
            Arc::new(KnowledgeDb::in_memory().unwrap()),
            Arc::new(PassageIndex::in_memory().unwrap()),
            registry.clone(),
        ));
        let hub = ModelHub::default().install("mock", "echo", Arc::new(Echo));
        let factory = Arc::new(AgentFactory::new(
            Arc::new(hub),
            registry.clone(),
            knowledge.clone(),
            OrchestratorConfig::default(),
        ));
        let sessions = Arc::new(SessionStore::new(
            Arc::new(MemorySessionBackend::new()),
            registry.clone(),
        ));
        let chat = Arc::new(ChatService::new(registry, sessions, factory));
        router(GatewayState { chat, knowledge })
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(v) => Body::from(v.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    const BOUNDARY: &str = "conclave-test-boundary";

    /// One file part plus plain form fields
    async fn upload(app: &Router, uri: &str, file_name: &str, content: &str, fields: &[(&str, &str)]) -> (StatusCode, Value) {
        let mut body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{f}\"\r\nContent-Type: application/octet-stream\r\n\r\n{c}\r\n",
            b = BOUNDARY,
            f = file_name,
            c = content
        );
        for (name, value) in fields {
            body.push_str(&format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            ));
        }
        body.push_str(&format!("--{}--\r\n", BOUNDARY));

        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn profile_json(name: &str, extra_agent: Value) -> Value {
        let mut agent = json!({"type": "conversation", "persona": "You help."});
        if let (Some(agent), Some(extra)) = (agent.as_object_mut(), extra_agent.as_object()) {
            for (k, v) in extra {
                agent.insert(k.clone(), v.clone());
            }
        }
        json!({
            "name": name,
            "description": format!("{} profile", name),
            "model": {"provider": "mock", "name": "echo"},
            "agent": agent,
        })
    }

    #[tokio::test]
    async fn test_root() {
        let app = app().await;
        let (status, body) = call(&app, Method::GET, "/", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "conclave");
        assert_eq!(body["status"], "online");
    }

    #[tokio::test]
    async fn test_chat_and_history() {
        let app = app().await;
        let (status, body) = call(
            &app,
            Method::POST,
            "/chat",
            Some(json!({"text": "hello", "profile_name": "default"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["response"], "echo: hello");
        let session_id = body["session_id"].as_str().unwrap().to_string();

        let (status, body) = call(&app, Method::GET, &format!("/sessions/{}/history", session_id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["messages"],
            json!([
                {"text": "hello", "isUser": true},
                {"text": "echo: hello", "isUser": false}
            ])
        );

        let (_, body) = call(&app, Method::GET, "/sessions", None).await;
        assert_eq!(body["sessions"][0]["profile_name"], "default");

        let (status, _) = call(&app, Method::DELETE, &format!("/sessions/{}", session_id), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = call(&app, Method::GET, &format!("/sessions/{}/history", session_id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["detail"].as_str().unwrap().contains(&session_id));
    }

    #[tokio::test]
    async fn test_chat_errors() {
        let app = app().await;
        let (status, body) = call(&app, Method::POST, "/chat", Some(json!({"text": "hi"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].is_string());

        let (status, _) = call(
            &app,
            Method::POST,
            "/chat",
            Some(json!({"text": "hi", "session_id": "missing"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = call(&app, Method::POST, "/chat", Some(json!({"nope": 1}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].is_string());
    }

    #[tokio::test]
    async fn test_profile_crud() {
        let app = app().await;

        let (status, body) = call(&app, Method::POST, "/profiles", Some(profile_json("writer", json!({})))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "writer");
        assert_eq!(body["config"]["agent"]["type"], "conversation");

        let (status, _) = call(&app, Method::POST, "/profiles", Some(profile_json("writer", json!({})))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let manager = profile_json(
            "manager",
            json!({"type": "manager", "available_agents": ["writer"], "fallback_agent": "default"}),
        );
        let (status, _) = call(&app, Method::POST, "/profiles", Some(manager)).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = call(&app, Method::GET, "/profiles", None).await;
        assert_eq!(body["profiles"].as_array().unwrap().len(), 3);

        // Referenced by the manager
        let (status, body) = call(&app, Method::DELETE, "/profiles/writer", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["detail"].as_str().unwrap().contains("manager"));

        let (status, _) = call(&app, Method::DELETE, "/profiles/default", None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = call(&app, Method::PUT, "/profiles/writer", Some(profile_json("other", json!({})))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let mut updated = profile_json("writer", json!({}));
        updated["description"] = json!("Writes better");
        let (status, body) = call(&app, Method::PUT, "/profiles/writer", Some(updated)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["profile"]["description"], "Writes better");

        let (status, _) = call(&app, Method::GET, "/profiles/ghost", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(&app, Method::DELETE, "/profiles/manager", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&app, Method::DELETE, "/profiles/writer", None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_invalid_profile_is_rejected() {
        let app = app().await;
        let bad = profile_json("lonely", json!({"type": "manager", "available_agents": ["ghost"]}));
        let (status, _) = call(&app, Method::POST, "/profiles", Some(bad)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_knowledge_sets_and_rag_chat() {
        let app = app().await;

        let (status, body) = call(
            &app,
            Method::POST,
            "/knowledge-sets",
            Some(json!({"name": "policies", "description": "HR"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["document_count"], 0);

        let (status, body) = call(
            &app,
            Method::POST,
            "/knowledge-sets/policies/documents",
            Some(json!({"title": "handbook", "text": "Vacation is twenty days."})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_documents"], 1);

        let mut rag = profile_json("rag", json!({"type": "rag"}));
        rag["knowledge_base"] = json!({"collections": [{"name": "policies"}]});
        let (status, _) = call(&app, Method::POST, "/profiles", Some(rag)).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = call(
            &app,
            Method::POST,
            "/chat",
            Some(json!({"text": "vacation", "profile_name": "rag"})),
        )
        .await;
        assert_eq!(body["response"], "echo: vacation [with context]");

        let (_, body) = call(&app, Method::GET, "/knowledge-sets/policies", None).await;
        assert_eq!(body["assigned_profiles"], json!(["rag"]));

        let (status, _) = call(&app, Method::DELETE, "/knowledge-sets/policies", None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = call(
            &app,
            Method::PUT,
            "/knowledge-sets/policies",
            Some(json!({"name": "renamed", "description": "x"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(
            &app,
            Method::PUT,
            "/knowledge-sets/policies",
            Some(json!({"description": "Company policies"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["description"], "Company policies");

        let (status, _) = call(&app, Method::DELETE, "/profiles/rag", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&app, Method::DELETE, "/knowledge-sets/policies", None).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = call(&app, Method::GET, "/knowledge-sets", None).await;
        assert_eq!(body["knowledge_sets"], json!([]));
    }

    #[tokio::test]
    async fn test_file_upload_by_extension() {
        let app = app().await;
        call(
            &app,
            Method::POST,
            "/knowledge-sets",
            Some(json!({"name": "policies", "description": "HR"})),
        )
        .await;

        let (status, body) = upload(
            &app,
            "/knowledge-sets/policies/upload",
            "leave.md",
            "# Leave\n\nVacation is twenty days.",
            &[("chunk_size", "500"), ("chunk_overlap", "50")],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["total_documents"], 1);

        // Same handler under the legacy path
        let (status, body) = upload(
            &app,
            "/upload-document/policies",
            "remote.html",
            "<p>Remote work two days a week.</p>",
            &[],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_documents"], 2);

        let (status, body) = upload(&app, "/knowledge-sets/policies/upload", "deck.pptx", "slides", &[]).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().contains("unsupported file format"));

        let (status, _) = upload(
            &app,
            "/knowledge-sets/policies/upload",
            "notes.txt",
            "text",
            &[("chunk_size", "lots")],
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = upload(&app, "/knowledge-sets/ghost/upload", "notes.txt", "text", &[]).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = call(&app, Method::GET, "/knowledge-sets/policies", None).await;
        assert_eq!(body["document_count"], 2);
    }
}
