//! Dispatch worker: the single consumer of a queue of routing work, so that
//! connection handlers never talk to each other's sockets directly.
//!
//! Grounded on the reference implementation's single background thread
//! draining a blocking queue; here a `tokio::mpsc` channel stands in for the
//! queue and a 1s `timeout` on `recv` stands in for the blocking dequeue's
//! timeout, so the loop can notice a shutdown signal between items.

use std::time::Duration;

use chat_protocol::{ClientMessage, ServerFrame, GERAL};
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::state::{ClientId, SharedRegistry};
use crate::{auth, history, offline};

pub enum DispatchItem {
    BroadcastSystem(String),
    SendUserListAll,
    SendOfflineMessages {
        username: String,
    },
    ProcessMessage {
        client_id: ClientId,
        username: String,
        message: ClientMessage,
    },
}

const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(1);

pub async fn run(
    pool: SqlitePool,
    registry: SharedRegistry,
    mut rx: mpsc::UnboundedReceiver<DispatchItem>,
    shutdown: tokio::sync::watch::Receiver<bool>,
) {
    loop {
        let item = tokio::time::timeout(DEQUEUE_TIMEOUT, rx.recv()).await;
        match item {
            Ok(Some(item)) => process(&pool, &registry, item).await,
            Ok(None) => break,
            Err(_) => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

async fn process(pool: &SqlitePool, registry: &SharedRegistry, item: DispatchItem) {
    match item {
        DispatchItem::BroadcastSystem(message) => broadcast_system(registry, message).await,
        DispatchItem::SendUserListAll => send_user_list_all(pool, registry).await,
        DispatchItem::SendOfflineMessages { username } => {
            send_offline_messages(pool, registry, &username).await;
        }
        DispatchItem::ProcessMessage {
            client_id,
            username,
            message,
        } => process_client_message(pool, registry, client_id, &username, message).await,
    }
}

async fn broadcast_system(registry: &SharedRegistry, message: String) {
    let frame = ServerFrame::System { message };
    for outbox in registry.read().await.all_outboxes() {
        let _ = outbox.send(frame.clone());
    }
}

async fn send_user_list_all(pool: &SqlitePool, registry: &SharedRegistry) {
    let all_users = match auth::all_usernames(pool).await {
        Ok(users) => users,
        Err(e) => {
            error!(error = %e, "failed to load user list");
            return;
        }
    };
    let online = registry.read().await.online_usernames();
    let users = all_users
        .into_iter()
        .map(|u| {
            let status = if online.contains(&u) { "online" } else { "offline" };
            format!("{u}:{status}")
        })
        .collect();

    let frame = ServerFrame::UserList { users };
    for outbox in registry.read().await.all_outboxes() {
        let _ = outbox.send(frame.clone());
    }
}

async fn send_offline_messages(pool: &SqlitePool, registry: &SharedRegistry, username: &str) {
    let Some(outbox) = registry.read().await.outbox_for(username) else {
        return;
    };
    let pending = match offline::pending_for(pool, username).await {
        Ok(pending) => pending,
        Err(e) => {
            error!(error = %e, %username, "failed to load offline messages");
            return;
        }
    };
    for msg in pending {
        let frame = ServerFrame::Private {
            sender: msg.sender,
            recipient: None,
            message: format!("(Offline) {}", msg.message),
            timestamp: msg.timestamp,
        };
        let _ = outbox.send(frame);
        if let Err(e) = offline::mark_delivered(pool, msg.id).await {
            error!(error = %e, id = msg.id, "failed to mark offline message delivered");
        }
    }
}

fn now_hms() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

async fn process_client_message(
    pool: &SqlitePool,
    registry: &SharedRegistry,
    client_id: ClientId,
    username: &str,
    message: ClientMessage,
) {
    match message {
        ClientMessage::Ping => {
            if let Some(outbox) = registry.read().await.outbox_for(username) {
                let _ = outbox.send(ServerFrame::Pong);
            }
        }
        ClientMessage::UserList => {
            info!(%username, "user list requested");
            send_user_list_all(pool, registry).await;
        }
        ClientMessage::Public { message } => {
            let frame = ServerFrame::Public {
                sender: username.to_owned(),
                message: message.clone(),
                timestamp: now_hms(),
            };
            for outbox in registry.read().await.outboxes_for_room(GERAL) {
                let _ = outbox.send(frame.clone());
            }
            if let Err(e) = history::append(pool, GERAL, username, &message, &now_hms()).await {
                error!(error = %e, "failed to save public message history");
            }
        }
        ClientMessage::Private { recipient, message } => {
            let timestamp = now_hms();
            let outbox = registry.read().await.outbox_for(&recipient);
            match outbox {
                Some(outbox) => {
                    let _ = outbox.send(ServerFrame::Private {
                        sender: username.to_owned(),
                        recipient: None,
                        message,
                        timestamp,
                    });
                }
                None => {
                    if let Err(e) =
                        offline::save(pool, username, &recipient, &message, &timestamp).await
                    {
                        error!(error = %e, "failed to save offline message");
                    }
                }
            }
        }
        ClientMessage::RoomMessage { room, message } => {
            if !registry.read().await.is_room_member(client_id, &room) {
                return;
            }
            let frame = ServerFrame::RoomMessage {
                sender: username.to_owned(),
                room: room.clone(),
                message: message.clone(),
                timestamp: now_hms(),
            };
            for outbox in registry.read().await.outboxes_for_room(&room) {
                let _ = outbox.send(frame.clone());
            }
            if let Err(e) = history::append(pool, &room, username, &message, &now_hms()).await {
                error!(error = %e, "failed to save room message history");
            }
        }
        ClientMessage::TypingStart { recipient } => send_typing(registry, username, &recipient, true).await,
        ClientMessage::TypingStop { recipient } => send_typing(registry, username, &recipient, false).await,
        ClientMessage::Unknown => {}
    }
}

async fn send_typing(registry: &SharedRegistry, sender: &str, recipient: &str, status: bool) {
    if let Some(outbox) = registry.read().await.outbox_for(recipient) {
        let _ = outbox.send(ServerFrame::Typing {
            sender: sender.to_owned(),
            status,
        });
    }
}

pub type DispatchSender = mpsc::UnboundedSender<DispatchItem>;

pub fn channel() -> (DispatchSender, mpsc::UnboundedReceiver<DispatchItem>) {
    mpsc::unbounded_channel()
}
