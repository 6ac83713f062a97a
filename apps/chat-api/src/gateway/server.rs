//! WebSocket upgrade handler and per-connection event loop.
//!
//! The only module touching the raw transport. Everything else sees sessions
//! through the registry and events through the broadcaster.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time;

use tradelink_common::id::{prefix, prefixed_ulid};

use crate::error::{AuthError, ChatError, ValidationError};
use crate::ids::SessionId;
use crate::AppState;

use super::auth::verify_token;
use super::events::{ClientEvent, EventName, ServerEvent};
use super::registry::{RemovedSession, SessionInfo};
use super::rooms;

/// Close codes (4000-range for application-level).
const CLOSE_UNKNOWN_ERROR: u16 = 4000;
const CLOSE_NOT_AUTHENTICATED: u16 = 4003;
const CLOSE_AUTH_FAILED: u16 = 4004;
const CLOSE_HANDSHAKE_TIMEOUT: u16 = 4009;

/// Timeout for receiving `authenticate` after connection (seconds).
const AUTH_TIMEOUT_SECS: u64 = 10;

pub fn router() -> Router<AppState> {
    Router::new().route("/gateway", get(ws_upgrade))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Greet immediately; the client has until the timeout to authenticate.
    if send_event(&mut ws_tx, &ServerEvent::connection_confirmed())
        .await
        .is_err()
    {
        return;
    }

    // Step 1: wait for `authenticate` within the handshake timeout.
    let auth_result = time::timeout(
        Duration::from_secs(AUTH_TIMEOUT_SECS),
        wait_for_authenticate(&state, &mut ws_rx),
    )
    .await;

    let identity = match auth_result {
        Ok(Ok(identity)) => identity,
        Ok(Err(Some(auth_error))) => {
            tracing::debug!(code = auth_error.code(), "authentication failed");
            let _ = send_event(&mut ws_tx, &ServerEvent::auth_error(&auth_error)).await;
            let _ = send_close(&mut ws_tx, CLOSE_AUTH_FAILED, auth_error.message()).await;
            return;
        }
        Ok(Err(None)) => return, // client went away mid-handshake
        Err(_timeout) => {
            let _ = send_close(&mut ws_tx, CLOSE_HANDSHAKE_TIMEOUT, "Handshake timeout").await;
            return;
        }
    };

    // Step 2: register the session and join its personal channels.
    let session_id = SessionId::new(prefixed_ulid(prefix::SESSION));
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let info = SessionInfo {
        id: session_id.clone(),
        user_id: identity.user_id,
        company_id: identity.company_id,
        user_name: identity.user_name,
        company_name: identity.company_name,
    };

    let first_session_of_user = !state.registry.is_user_online(&info.user_id);
    if !state.registry.add_session(info.clone(), out_tx) {
        let _ = send_close(&mut ws_tx, CLOSE_UNKNOWN_ERROR, "Registration failed").await;
        return;
    }
    state
        .registry
        .join_room(&session_id, &rooms::user_channel(&info.user_id));
    state
        .registry
        .join_room(&session_id, &rooms::company_channel(&info.company_id));

    let confirmed = ServerEvent::authenticated(
        &info.id,
        &info.user_id,
        &info.company_id,
        &info.user_name,
        &info.company_name,
    );
    if send_event(&mut ws_tx, &confirmed).await.is_err() {
        if let Some(removed) = state.registry.remove_session(&session_id) {
            announce_departure(&state, &removed);
        }
        return;
    }

    // Presence transition: only the user's first live session announces.
    if first_session_of_user {
        state.broadcaster.to_room_except(
            &rooms::company_channel(&info.company_id),
            &session_id,
            &ServerEvent::new(
                EventName::USER_ONLINE,
                serde_json::json!({
                    "userId": info.user_id,
                    "userName": info.user_name,
                    "timestamp": Utc::now(),
                }),
            ),
        );
    }

    tracing::info!(
        session_id = %info.id,
        user_id = %info.user_id,
        company_id = %info.company_id,
        "gateway session established"
    );

    run_session(&state, &info, ws_tx, ws_rx, out_rx).await;

    // Step 3: teardown. The sweep may have beaten us to it; removal is
    // idempotent and only the winner announces.
    if let Some(removed) = state.registry.remove_session(&info.id) {
        announce_departure(&state, &removed);
    }

    tracing::info!(
        session_id = %info.id,
        user_id = %info.user_id,
        "gateway session ended"
    );
}

/// Read frames until the client authenticates.
///
/// `Err(Some(e))` is a typed auth failure to report; `Err(None)` means the
/// client disappeared and there is no one left to tell.
async fn wait_for_authenticate(
    state: &AppState,
    ws_rx: &mut SplitStream<WebSocket>,
) -> Result<super::auth::AuthedIdentity, Option<AuthError>> {
    while let Some(msg) = ws_rx.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(?e, "ws read error during handshake");
                return Err(None);
            }
        };

        let text = match msg {
            Message::Text(t) => t,
            Message::Close(_) => return Err(None),
            Message::Ping(_) | Message::Pong(_) => continue,
            _ => continue,
        };

        let event: ClientEvent = match serde_json::from_str(&text) {
            Ok(ev) => ev,
            Err(_) => return Err(Some(AuthError::MissingToken)),
        };

        return match event {
            ClientEvent::Authenticate(payload) => verify_token(
                &state.config.jwt_secret,
                payload.token.as_deref(),
                payload.company_id.as_ref(),
            )
            .map_err(Some),
            // Anything else before authentication is rejected.
            _ => Err(Some(AuthError::MissingToken)),
        };
    }
    Err(None)
}

/// Main session loop: inbound client events and the outbound fan-out queue.
///
/// Each inbound event is handled to completion (including its awaited
/// persistence call) before the next one for this session is read; events
/// from other sessions interleave freely.
async fn run_session(
    state: &AppState,
    info: &SessionInfo,
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut ws_rx: SplitStream<WebSocket>,
    mut out_rx: mpsc::UnboundedReceiver<ServerEvent>,
) {
    loop {
        tokio::select! {
            // Client sends us a frame.
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        state.registry.touch(&info.id);
                        match serde_json::from_str::<ClientEvent>(&text) {
                            Ok(event) => handle_event(state, info, event).await,
                            Err(e) => {
                                tracing::debug!(?e, session_id = %info.id, "unparseable client event");
                                send_chat_error(
                                    state,
                                    info,
                                    ValidationError::new("bad_request", "Unrecognized event"),
                                );
                            }
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(?e, session_id = %info.id, "ws read error");
                        break;
                    }
                    _ => continue,
                }
            }

            // Event queued for this session by a broadcast or unicast.
            out = out_rx.recv() => {
                match out {
                    Some(event) => {
                        if send_event(&mut ws_tx, &event).await.is_err() {
                            break;
                        }
                    }
                    // Sender dropped: the idle sweep evicted this session.
                    None => {
                        let _ = send_close(&mut ws_tx, CLOSE_NOT_AUTHENTICATED, "Session expired").await;
                        break;
                    }
                }
            }
        }
    }
}

/// Dispatch one authenticated client event.
async fn handle_event(state: &AppState, info: &SessionInfo, event: ClientEvent) {
    match event {
        ClientEvent::Authenticate(_) => {
            state.broadcaster.to_session(
                &info.id,
                ServerEvent::new(
                    EventName::AUTH_ERROR,
                    serde_json::json!({
                        "code": "already_authenticated",
                        "error": "Session is already authenticated",
                    }),
                ),
            );
        }

        ClientEvent::JoinCompanyChat(payload) => {
            let target = match payload.target_company_id {
                Some(ref t) if !t.is_blank() => t.clone(),
                _ => {
                    send_chat_error(state, info, ValidationError::missing_company("targetCompanyId"));
                    return;
                }
            };
            if target == info.company_id {
                send_chat_error(state, info, ValidationError::same_company());
                return;
            }
            // The session's authenticated company is authoritative; a stale
            // myCompanyId from the client is ignored beyond this check.
            if let Some(my) = payload.my_company_id {
                if !my.is_blank() && my != info.company_id {
                    send_chat_error(
                        state,
                        info,
                        ValidationError::new(
                            "company_mismatch",
                            "myCompanyId does not match this session",
                        ),
                    );
                    return;
                }
            }

            let Some(room) = rooms::chat_room_id(&info.company_id, &target) else {
                send_chat_error(state, info, ValidationError::missing_company("companyId"));
                return;
            };
            state.registry.join_room(&info.id, &room);

            state.broadcaster.to_session(
                &info.id,
                ServerEvent::new(
                    EventName::COMPANY_CHAT_JOINED,
                    serde_json::json!({
                        "roomId": room,
                        "companyId": info.company_id,
                        "targetCompanyId": target,
                        "partyId": payload.party_id,
                        "partyName": payload.party_name,
                        "timestamp": Utc::now(),
                    }),
                ),
            );
            state.broadcaster.to_room_except(
                &room,
                &info.id,
                &ServerEvent::new(
                    EventName::USER_JOINED_CHAT,
                    serde_json::json!({
                        "roomId": room,
                        "userId": info.user_id,
                        "userName": info.user_name,
                        "companyId": info.company_id,
                        "timestamp": Utc::now(),
                    }),
                ),
            );
        }

        ClientEvent::LeaveCompanyChat(payload) => {
            let Some(target) = payload.target_company_id else {
                return;
            };
            let Some(room) = rooms::chat_room_id(&info.company_id, &target) else {
                return;
            };
            if state.registry.leave_room(&info.id, &room) {
                state.broadcaster.to_room(
                    &room,
                    &ServerEvent::new(
                        EventName::USER_LEFT_CHAT,
                        serde_json::json!({
                            "roomId": room,
                            "userId": info.user_id,
                            "userName": info.user_name,
                            "timestamp": Utc::now(),
                        }),
                    ),
                );
            }
        }

        ClientEvent::SendMessage(payload) => {
            let temp_id = payload.temp_id.clone();
            if let Err(error) = state.dispatcher.dispatch(info, payload).await {
                state.broadcaster.to_session(
                    &info.id,
                    ServerEvent::message_error(temp_id.as_deref(), &error),
                );
            }
        }

        ClientEvent::MarkRead(payload) => {
            // Best-effort: failures are logged, not surfaced.
            if let Err(error) = state.dispatcher.mark_read(info, payload).await {
                tracing::warn!(%error, session_id = %info.id, "mark_read failed");
            }
        }

        ClientEvent::MessageDelivered(payload) => {
            if let Err(error) = state.dispatcher.mark_delivered(&payload.message_id).await {
                tracing::warn!(%error, session_id = %info.id, "delivery ack failed");
            }
        }

        ClientEvent::TypingStart(payload) => {
            broadcast_typing(state, info, payload.party_id, true);
        }
        ClientEvent::TypingStop(payload) => {
            broadcast_typing(state, info, payload.party_id, false);
        }

        ClientEvent::GetChatHistory(payload) => {
            match state.dispatcher.history(info, payload).await {
                Ok(page) => {
                    state.broadcaster.to_session(
                        &info.id,
                        ServerEvent::new(
                            EventName::CHAT_HISTORY,
                            serde_json::json!({
                                "success": true,
                                "data": {
                                    "messages": page.messages,
                                    "pagination": {
                                        "total": page.total,
                                        "page": page.page,
                                        "limit": page.limit,
                                        "totalPages": page.total_pages,
                                    },
                                },
                            }),
                        ),
                    );
                }
                Err(error) => {
                    state.broadcaster.to_session(
                        &info.id,
                        ServerEvent::new(
                            EventName::CHAT_HISTORY_ERROR,
                            serde_json::json!({
                                "code": error.code(),
                                "error": error.message(),
                            }),
                        ),
                    );
                }
            }
        }

        ClientEvent::Ping => {
            // Activity was already touched on receipt.
            state.broadcaster.to_session(&info.id, ServerEvent::pong());
        }
    }
}

/// Ephemeral typing signal: room-only broadcast, no persistence, no ack.
fn broadcast_typing(
    state: &AppState,
    info: &SessionInfo,
    party: Option<crate::ids::CompanyId>,
    is_typing: bool,
) {
    let Some(target) = party else { return };
    let Some(room) = rooms::chat_room_id(&info.company_id, &target) else {
        return;
    };
    state.broadcaster.to_room_except(
        &room,
        &info.id,
        &ServerEvent::new(
            EventName::USER_TYPING,
            serde_json::json!({
                "userId": info.user_id,
                "userName": info.user_name,
                "isTyping": is_typing,
                "timestamp": Utc::now(),
            }),
        ),
    );
}

fn send_chat_error(state: &AppState, info: &SessionInfo, error: ValidationError) {
    state.broadcaster.to_session(
        &info.id,
        ServerEvent::company_chat_error(&ChatError::Validation(error)),
    );
}

/// Announce a removed session to its peers: `user_left_chat` to every chat
/// room it vacated, and `user_offline` to the company channel when this was
/// the user's last live session. Shared by disconnect and the idle sweep.
pub fn announce_departure(state: &AppState, removed: &RemovedSession) {
    for room in &removed.rooms {
        if rooms::parse_chat_room(room).is_none() {
            continue; // personal/company channels don't hear departures
        }
        state.broadcaster.to_room(
            room,
            &ServerEvent::new(
                EventName::USER_LEFT_CHAT,
                serde_json::json!({
                    "roomId": room,
                    "userId": removed.info.user_id,
                    "userName": removed.info.user_name,
                    "timestamp": Utc::now(),
                }),
            ),
        );
    }

    if removed.last_of_user {
        state.broadcaster.to_company(
            &removed.info.company_id,
            &ServerEvent::new(
                EventName::USER_OFFLINE,
                serde_json::json!({
                    "userId": removed.info.user_id,
                    "userName": removed.info.user_name,
                    "timestamp": Utc::now(),
                }),
            ),
        );
    }
}

/// Serialize and send one event frame.
async fn send_event(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(event).unwrap();
    ws_tx.send(Message::Text(json.into())).await
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    code: u16,
    reason: &str,
) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(axum::extract::ws::CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}
