use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};

use linkup_types::events::{ClientCommand, ConnectionId, ServerEvent};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Who is on the other end of a connection, as proven by its token.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    pub username: String,
}

/// Handle one WebSocket connection until it closes. The token, if any, was
/// checked at the HTTP upgrade; `identity` is `None` for anonymous callers.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, identity: Option<Identity>) {
    let (mut sender, mut receiver) = socket.split();

    let (conn_id, mut conn_rx) = dispatcher.open_connection().await;
    let label = match &identity {
        Some(id) => format!("{} ({})", id.username, conn_id),
        None => format!("anonymous ({})", conn_id),
    };
    info!("{} connected to gateway", label);

    let ready = ServerEvent::Ready {
        connection_id: conn_id,
        user_id: identity.as_ref().map(|id| id.user_id.clone()),
    };
    if send_event(&mut sender, &ready).await.is_err() {
        dispatcher.close_connection(conn_id).await;
        return;
    }

    let mut broadcast_rx = dispatcher.subscribe();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward broadcasts + targeted events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} messages", n);
                            continue;
                        }
                        Err(_) => break,
                    };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                result = conn_rx.recv() => {
                    let Some(event) = result else { break };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::<u8>::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let dispatcher_recv = dispatcher.clone();
    let label_recv = label.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&dispatcher_recv, conn_id, identity.as_ref(), cmd).await;
                    }
                    Err(e) => {
                        warn!(
                            "{} bad command: {} -- raw: {}",
                            label_recv,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.close_connection(conn_id).await;
    info!("{} disconnected from gateway", label);
}

async fn send_event(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<(), ()> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to encode {}: {}", event.kind(), e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}

/// The authenticated user id, if it matches what the client claims.
fn claimed<'a>(identity: Option<&'a Identity>, claimed_id: &str, conn_id: ConnectionId, kind: &str) -> Option<&'a str> {
    match identity {
        Some(id) if id.user_id == claimed_id => Some(id.user_id.as_str()),
        Some(id) => {
            warn!(
                "{} ({}) sent {} claiming to be {}, ignoring",
                id.username, conn_id, kind, claimed_id
            );
            None
        }
        None => {
            warn!("anonymous ({}) sent {} claiming to be {}, ignoring", conn_id, kind, claimed_id);
            None
        }
    }
}

/// Whether the stored message was sent by this connection's user to `receiver_id`.
async fn sent_by(
    dispatcher: &Dispatcher,
    identity: Option<&Identity>,
    message_id: &str,
    receiver_id: &str,
    conn_id: ConnectionId,
    kind: &str,
) -> bool {
    let Some(id) = identity else {
        warn!("anonymous ({}) sent {} for message {}, ignoring", conn_id, kind, message_id);
        return false;
    };
    match dispatcher.get_message(message_id).await {
        Ok(message) if message.sender_id == id.user_id && message.receiver_id == receiver_id => true,
        Ok(_) => {
            warn!(
                "{} ({}) sent {} for message {} they did not send to {}, ignoring",
                id.username, conn_id, kind, message_id, receiver_id
            );
            false
        }
        Err(e) => {
            warn!("{} ({}) sent {} for message {}: {}", id.username, conn_id, kind, message_id, e);
            false
        }
    }
}

/// Route one client command to the component that owns it.
pub async fn handle_command(
    dispatcher: &Dispatcher,
    conn_id: ConnectionId,
    identity: Option<&Identity>,
    cmd: ClientCommand,
) {
    let kind = cmd.kind();
    match cmd {
        ClientCommand::RegisterUser { user_id } => {
            if let Some(uid) = claimed(identity, &user_id, conn_id, kind) {
                dispatcher.register_user(uid, conn_id).await;
            }
        }

        ClientCommand::SendChatMessage {
            sender_id,
            receiver_id,
            message,
        } => {
            if let Some(uid) = claimed(identity, &sender_id, conn_id, kind) {
                dispatcher
                    .notify(
                        &receiver_id,
                        ServerEvent::NewMessage {
                            sender_id: uid.to_string(),
                            message,
                        },
                    )
                    .await;
            }
        }

        ClientCommand::MarkAsRead {
            sender_id,
            receiver_id,
        } => {
            if let Some(reader) = claimed(identity, &receiver_id, conn_id, kind) {
                dispatcher
                    .notify(
                        &sender_id,
                        ServerEvent::MessagesReadUpdate {
                            receiver_id: reader.to_string(),
                        },
                    )
                    .await;
            }
        }

        ClientCommand::EditMessage {
            message_id,
            new_message,
            receiver_id,
        } => {
            if sent_by(dispatcher, identity, &message_id, &receiver_id, conn_id, kind).await {
                dispatcher
                    .notify(
                        &receiver_id,
                        ServerEvent::MessageUpdated {
                            message_id,
                            body: new_message,
                            is_edited: true,
                        },
                    )
                    .await;
            }
        }

        ClientCommand::DeleteMessage {
            message_id,
            receiver_id,
        } => {
            if sent_by(dispatcher, identity, &message_id, &receiver_id, conn_id, kind).await {
                dispatcher
                    .notify(&receiver_id, ServerEvent::MessageDeleted { message_id })
                    .await;
            }
        }

        ClientCommand::JoinCall { room_id, user_id } => {
            // An unverified user id counts as anonymous
            let user = user_id
                .as_deref()
                .and_then(|u| claimed(identity, u, conn_id, kind));
            dispatcher.join_call(conn_id, &room_id, user).await;
        }

        ClientCommand::LeaveCall => {
            dispatcher.leave_call(conn_id).await;
        }

        ClientCommand::Signal {
            to_connection_id,
            payload,
        } => {
            dispatcher.relay_signal(conn_id, to_connection_id, payload).await;
        }

        ClientCommand::VideoChatMessage {
            payload,
            sender_label,
        } => {
            dispatcher.post_room_chat(conn_id, sender_label, payload).await;
        }
    }
}
