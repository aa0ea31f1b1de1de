// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Conversation CRUD plus the two streaming endpoints that drive a run:
//! `POST .../messages` starts one and streams its events as they happen,
//! `GET .../events` attaches to whatever run is currently live
//! (replay-then-live, closing on the terminal event).

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{FromRequest, Multipart, Path, Request, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};

use poncho_core::RunEvent;
use poncho_model::Message;
use poncho_store::Conversation;

use crate::error::ApiError;
use crate::http::auth::Identity;
use crate::state::AppState;

/// Checks the conversation exists and belongs to the caller, folding "wrong
/// owner" into the same 404 a missing id gets so ownership isn't probeable.
async fn load_owned(state: &AppState, identity: &Identity, id: &str) -> Result<Conversation, ApiError> {
    let conversation = state.conversations.get(id).await?;
    if conversation.owner_id != identity.owner_id {
        return Err(ApiError::not_found(format!("no conversation {id}")));
    }
    Ok(conversation)
}

pub async fn list(Extension(identity): Extension<Identity>, State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let conversations = state.conversations.list(&identity.owner_id).await?;
    Ok(Json(json!({ "conversations": conversations })))
}

#[derive(Debug, Deserialize, Default)]
pub struct CreateConversationRequest {
    pub title: Option<String>,
}

pub async fn create(
    Extension(identity): Extension<Identity>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateConversationRequest>,
) -> Result<Json<Value>, ApiError> {
    let conversation = state.conversations.create(&identity.owner_id, body.title).await?;
    Ok(Json(json!({ "conversation": conversation })))
}

pub async fn get(
    Path(id): Path<String>,
    Extension(identity): Extension<Identity>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Conversation>, ApiError> {
    Ok(Json(load_owned(&state, &identity, &id).await?))
}

#[derive(Debug, Deserialize)]
pub struct UpdateConversationRequest {
    pub title: Option<String>,
}

pub async fn patch(
    Path(id): Path<String>,
    Extension(identity): Extension<Identity>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<UpdateConversationRequest>,
) -> Result<Json<Conversation>, ApiError> {
    let mut conversation = load_owned(&state, &identity, &id).await?;
    conversation.title = body.title;
    conversation.updated_at = chrono::Utc::now();
    state.conversations.update(conversation.clone()).await?;
    Ok(Json(conversation))
}

pub async fn delete(
    Path(id): Path<String>,
    Extension(identity): Extension<Identity>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    load_owned(&state, &identity, &id).await?;
    state.conversations.delete(&id).await?;
    Ok(Json(json!({ "ok": true })))
}

/// The body of `POST .../messages`, accepted as either JSON or
/// `multipart/form-data`: a `message` text part, an optional
/// `parameters` part holding a JSON object, and zero or more `files` binary
/// parts. File content itself is handed to an external upload-store
/// collaborator, not persisted by this route.
#[derive(Debug, Default, Deserialize)]
struct IncomingMessage {
    message: String,
    #[serde(default)]
    parameters: Option<Value>,
}

async fn parse_incoming(req: Request) -> Result<IncomingMessage, ApiError> {
    let is_multipart = req
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("multipart/form-data"))
        .unwrap_or(false);

    if !is_multipart {
        let Json(body): Json<IncomingMessage> =
            Json::from_request(req, &()).await.map_err(|e| ApiError::bad_request(e.to_string()))?;
        return Ok(body);
    }

    let mut multipart =
        Multipart::from_request(req, &()).await.map_err(|e| ApiError::bad_request(e.to_string()))?;
    let mut incoming = IncomingMessage::default();
    while let Some(field) = multipart.next_field().await.map_err(|e| ApiError::bad_request(e.to_string()))? {
        match field.name().unwrap_or_default() {
            "message" => incoming.message = field.text().await.unwrap_or_default(),
            "parameters" => {
                let text = field.text().await.unwrap_or_default();
                incoming.parameters = serde_json::from_str(&text).ok();
            }
            "files" => {
                // File bytes are an upload-store concern outside this
                // crate's scope; the part is drained so the stream stays
                // well-formed but the bytes themselves are discarded here.
                let _ = field.bytes().await;
            }
            _ => {}
        }
    }
    Ok(incoming)
}

pub async fn send_message(
    Path(id): Path<String>,
    Extension(identity): Extension<Identity>,
    State(state): State<Arc<AppState>>,
    req: Request,
) -> Response {
    let conversation = match load_owned(&state, &identity, &id).await {
        Ok(c) => c,
        Err(e) => return e.into_response(),
    };
    let incoming = match parse_incoming(req).await {
        Ok(i) => i,
        Err(e) => return e.into_response(),
    };
    if incoming.message.trim().is_empty() {
        return ApiError::bad_request("message must not be empty").into_response();
    }
    run_and_stream(state, conversation, incoming.message).await
}

/// Shared machinery behind `POST .../messages`: appends the user turn,
/// spawns the orchestrator's step loop against a fresh broker run, and
/// streams that run's events back as SSE while a second task persists the
/// resulting history once the run lands on a terminal event.
async fn run_and_stream(state: Arc<AppState>, mut conversation: Conversation, user_text: String) -> Response {
    conversation.messages.push(Message::user(user_text));
    if conversation.title.is_none() {
        conversation.title = conversation.messages.iter().find_map(infer_title);
    }

    let mut session = poncho_core::Session::new(state.run_config.context_window_tokens);
    session.replace_messages(conversation.messages.clone());

    // At most one live run per conversation; a second send while one is in
    // flight is rejected rather than queued.
    let Some((run, cancel_rx)) = state.broker.try_start_run(&conversation.id).await else {
        return ApiError::conflict("a run is already in progress for this conversation").into_response();
    };
    let (buffered, live) = run.subscribe().await;

    let (tx, mut rx) = mpsc::channel::<RunEvent>(256);
    let orchestrator = state.orchestrator.clone();
    let system_prompt = state.system_prompt.clone();
    let approvals = state.approvals.clone();
    let conversations = state.conversations.clone();
    let broker = state.broker.clone();
    let run_id = run.run_id.clone();
    let run_id_for_end = run.run_id.clone();
    let conversation_id = conversation.id.clone();
    let run_for_publish = run.clone();

    let run_task = tokio::spawn(async move {
        let mut forward_session = session;
        let outcome = orchestrator.run(run_id, &mut forward_session, &system_prompt, tx, approvals, cancel_rx).await;
        // History is all-or-nothing: a cancelled or errored run leaves the
        // stored conversation exactly as it was before the send, never with
        // a user message that got no reply.
        if matches!(outcome, poncho_core::RunOutcome::Completed { .. }) {
            conversation.messages = forward_session.messages;
            conversation.updated_at = chrono::Utc::now();
            let _ = conversations.update(conversation).await;
        }
    });

    tokio::spawn(async move {
        // The terminal event is held back until the run task has persisted
        // history, so a client that reacts to `run:completed` by issuing a
        // follow-up request always reads the post-run conversation.
        let mut terminal = None;
        while let Some(event) = rx.recv().await {
            if event.is_terminal() {
                terminal = Some(event);
                break;
            }
            run_for_publish.publish(event).await;
        }
        let _ = run_task.await;
        if let Some(event) = terminal {
            run_for_publish.publish(event).await;
        }
        broker.end_run(conversation_id, run_id_for_end);
    });

    let replay = stream::iter(buffered.into_iter().map(|e| sse_from_event(&e)));
    Sse::new(replay.chain(tail_stream(live))).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))).into_response()
}

/// Titles are inferred from the first user turn when none was given: the
/// first line, clipped to a listing-friendly length.
fn infer_title(message: &Message) -> Option<String> {
    if !matches!(message.role, poncho_model::Role::User) {
        return None;
    }
    let text = message.as_text()?;
    let first_line = text.lines().next().unwrap_or_default().trim();
    if first_line.is_empty() {
        return None;
    }
    Some(first_line.chars().take(80).collect())
}

/// Yields events as they're published and stops right after the terminal
/// one, so `GET .../events` closes the connection itself rather than
/// relying on the client to notice `run:completed` and disconnect.
fn tail_stream(live: broadcast::Receiver<RunEvent>) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(Some(live), |state| async move {
        let mut rx = state?;
        match rx.recv().await {
            Ok(event) => {
                let frame = sse_from_event(&event);
                let next = if event.is_terminal() { None } else { Some(rx) };
                Some((frame, next))
            }
            Err(_) => None,
        }
    })
}

fn sse_from_event(event: &RunEvent) -> Result<Event, Infallible> {
    Ok(Event::default().event(event.kind()).json_data(event.payload()).unwrap_or_else(|_| Event::default()))
}

pub async fn events(
    Path(id): Path<String>,
    Extension(identity): Extension<Identity>,
    State(state): State<Arc<AppState>>,
) -> Response {
    if load_owned(&state, &identity, &id).await.is_err() {
        return ApiError::not_found(format!("no conversation {id}")).into_response();
    }

    let Some(run) = state.broker.active_run(&id).await else {
        // No run is live for this conversation (never started, or its
        // replay grace period already elapsed): close immediately with a
        // synthetic end-of-stream marker rather than hanging open.
        let stream = stream::once(async { Ok::<_, Infallible>(Event::default().event("stream:end").data("{}")) });
        return Sse::new(stream).keep_alive(KeepAlive::default()).into_response();
    };

    let (buffered, live) = run.subscribe().await;
    // If the replay already ends in a terminal event there is nothing live
    // left to wait for; close right after the replay instead of holding the
    // connection open until the grace-period eviction drops the channel.
    let already_finished = buffered.last().is_some_and(|e| e.is_terminal());
    let replay = stream::iter(buffered.into_iter().map(|e| sse_from_event(&e)));
    if already_finished {
        return Sse::new(replay).keep_alive(KeepAlive::default()).into_response();
    }
    Sse::new(replay.chain(tail_stream(live))).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))).into_response()
}

#[derive(Debug, Default, Deserialize)]
pub struct StopRequest {
    #[serde(rename = "runId", default)]
    pub run_id: Option<String>,
}

pub async fn stop(
    Path(id): Path<String>,
    Extension(identity): Extension<Identity>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<StopRequest>,
) -> Result<Json<Value>, ApiError> {
    load_owned(&state, &identity, &id).await?;
    let requested_run_id = body.run_id;

    let Some(run) = state.broker.active_run(&id).await else {
        return Ok(Json(json!({ "ok": true, "stopped": false, "runId": requested_run_id })));
    };
    if let Some(requested) = &requested_run_id {
        if requested != &run.run_id {
            return Err(ApiError::bad_request("runId does not match the active run"));
        }
    }
    let stopped = run.cancel().await;
    Ok(Json(json!({ "ok": true, "stopped": stopped, "runId": run.run_id })))
}
