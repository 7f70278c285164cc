//! Connection handler: one task per accepted socket, running the two-phase
//! contract — an authentication loop until login succeeds, then a message
//! loop until the client disconnects or is kicked.
//!
//! Grounded on the donor's `handle_forwarder_socket`/`handle_receiver_socket`
//! shape: a `tokio::select!` combining a timed/untimed recv with a mechanism
//! to be told to stop, generalized from axum's `WebSocket` to a raw
//! `TcpStream` split into owned read/write halves.

use std::net::SocketAddr;
use std::sync::Arc;

use chat_protocol::{AuthRequest, AuthResponse, ClientMessage};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tracing::{info, warn};

use crate::codec::{self, LineReader};
use crate::dispatch::DispatchItem;
use crate::state::{ClientId, Outbox};
use crate::ServerContext;

pub async fn handle_connection(stream: tokio::net::TcpStream, peer: SocketAddr, ctx: Arc<ServerContext>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = codec::line_reader(read_half, ctx.config.read_buffer_size);

    let client_id = ctx.client_ids.next();
    let (outbox_tx, mut outbox_rx) = tokio::sync::mpsc::unbounded_channel();

    let Some((username, kick)) =
        auth_phase(&mut reader, &mut write_half, &ctx, client_id, &outbox_tx).await
    else {
        return;
    };

    let writer_task = tokio::spawn(async move {
        while let Some(frame) = outbox_rx.recv().await {
            if codec::write_frame(&mut write_half, &frame).await.is_err() {
                break;
            }
        }
    });

    info!(%username, %peer, "user entered chat");
    send(&ctx, DispatchItem::BroadcastSystem(format!("{username} entrou no chat.")));
    send(&ctx, DispatchItem::SendUserListAll);
    send(&ctx, DispatchItem::SendOfflineMessages { username: username.clone() });

    message_phase(&mut reader, client_id, &username, &ctx, kick).await;

    if ctx.registry.write().await.remove_client(client_id).is_some() {
        info!(%username, %peer, "user left chat");
        send(&ctx, DispatchItem::BroadcastSystem(format!("{username} saiu do chat.")));
        send(&ctx, DispatchItem::SendUserListAll);
    }

    drop(outbox_tx);
    let _ = writer_task.await;
}

fn send(ctx: &ServerContext, item: DispatchItem) {
    let _ = ctx.dispatch_tx.send(item);
}

async fn write_auth_response(write_half: &mut OwnedWriteHalf, response: &AuthResponse) {
    let mut line = serde_json::to_string(response).expect("AuthResponse always serializes");
    line.push('\n');
    let _ = write_half.write_all(line.as_bytes()).await;
}

/// Runs the authentication loop. Returns `Some((username, kick))` once a
/// client has successfully logged in and been registered, `None` if the
/// connection closed, timed out, or the client never completes login.
async fn auth_phase(
    reader: &mut LineReader,
    write_half: &mut OwnedWriteHalf,
    ctx: &Arc<ServerContext>,
    client_id: ClientId,
    outbox_tx: &Outbox,
) -> Option<(String, Arc<tokio::sync::Notify>)> {
    loop {
        let line = match tokio::time::timeout(ctx.config.auth_timeout, reader.next_line()).await {
            Ok(Ok(Some(line))) => line,
            Ok(Ok(None)) => return None,
            Ok(Err(e)) => {
                warn!(error = %e, "io error during authentication");
                return None;
            }
            Err(_) => {
                warn!("timeout during authentication");
                return None;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let request: AuthRequest = if let Ok(request) = serde_json::from_str(&line) { request } else {
            warn!("malformed data received during authentication");
            continue;
        };

        match request {
            AuthRequest::Register { username, password } => {
                let response = match crate::auth::register_user(&ctx.pool, &username, &password).await {
                    Ok(crate::auth::RegisterOutcome::Registered) => {
                        AuthResponse::success("Usuário registrado com sucesso!")
                    }
                    Ok(crate::auth::RegisterOutcome::InvalidLength) => AuthResponse::error(
                        "Usuário (3-20) e senha (6-50) com tamanhos inválidos.",
                    ),
                    Ok(crate::auth::RegisterOutcome::UsernameTaken) => {
                        AuthResponse::error("Nome de usuário já existe.")
                    }
                    Err(e) => {
                        warn!(error = %e, "registration failed");
                        AuthResponse::error("Erro interno do servidor.")
                    }
                };
                write_auth_response(write_half, &response).await;
            }
            AuthRequest::Login { username, password } => {
                // Advisory only: lets an obviously-taken name fail fast,
                // before paying for an Argon2 verify. The authoritative
                // check happens atomically with the insert below.
                if ctx.registry.read().await.is_username_online(&username) {
                    write_auth_response(write_half, &AuthResponse::error("Usuário já está online.")).await;
                    continue;
                }
                match crate::auth::authenticate_user(&ctx.pool, &username, &password).await {
                    Ok(true) => {
                        let added = ctx.registry.write().await.add_client_if_absent(
                            client_id,
                            username.clone(),
                            outbox_tx.clone(),
                        );
                        match added {
                            Some(kick) => {
                                write_auth_response(write_half, &AuthResponse::success("Login bem-sucedido.")).await;
                                return Some((username, kick));
                            }
                            None => {
                                write_auth_response(write_half, &AuthResponse::error("Usuário já está online.")).await;
                            }
                        }
                    }
                    Ok(false) => {
                        write_auth_response(write_half, &AuthResponse::error("Credenciais inválidas.")).await;
                    }
                    Err(e) => {
                        warn!(error = %e, "authentication failed");
                        write_auth_response(write_half, &AuthResponse::error("Erro interno do servidor.")).await;
                    }
                }
            }
        }
    }
}

/// Runs the message loop until the client disconnects, sends malformed
/// data, or the liveness supervisor asks this connection to close.
async fn message_phase(
    reader: &mut LineReader,
    client_id: ClientId,
    username: &str,
    ctx: &Arc<ServerContext>,
    kick: Arc<tokio::sync::Notify>,
) {
    loop {
        tokio::select! {
            line = reader.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(%username, error = %e, "io error, closing connection");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }

                let message: ClientMessage = match serde_json::from_str(&line) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(%username, error = %e, "malformed message, closing connection");
                        break;
                    }
                };

                ctx.registry.write().await.touch_ping(client_id);
                if matches!(message, ClientMessage::Unknown) {
                    continue;
                }
                send(ctx, DispatchItem::ProcessMessage {
                    client_id,
                    username: username.to_owned(),
                    message,
                });
            }
            () = kick.notified() => {
                info!(%username, "connection closed by liveness supervisor");
                break;
            }
        }
    }
}
