//! Per-connection WebSocket lifecycle: an authenticated client identifies
//! the room it wants with `game:join`, gets a snapshot, and from then on its
//! submissions dispatch into the owning room's critical section while a
//! forwarder task fans bus events back out to the socket.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dto::ws::{ClientMessage, PotionKind, ServerMessage},
    error::ServiceError,
    services::{
        action_service,
        event_bus::{PubSub, player_topic, room_topic},
        room_service, snapshot, vote_service,
    },
    state::{ClientConnection, RoomHandle, SharedState},
};

const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle the full lifecycle of one authenticated game connection.
pub async fn handle_socket(state: SharedState, socket: WebSocket, user_id: Uuid) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we
    // await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    // The first message must attach the connection to a room.
    let (room_id, name) = match wait_for_join(&mut receiver).await {
        Some(join) => join,
        None => {
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    let Some(handle) = state.room(room_id) else {
        send_error(
            &outbound_tx,
            &ServiceError::NotFound("room not found".into()),
        );
        let _ = outbound_tx.send(Message::Close(None));
        finalize(writer_task, outbound_tx).await;
        return;
    };

    let player_id = {
        let mut inner = handle.lock().await;
        match room_service::join_room(&state, &mut inner, user_id, name).await {
            Ok(player_id) => {
                send_message_to_websocket(
                    &outbound_tx,
                    &ServerMessage::GameState(snapshot::build_snapshot(&inner, Some(player_id))),
                );
                player_id
            }
            Err(err) => {
                send_error(&outbound_tx, &err);
                let _ = outbound_tx.send(Message::Close(None));
                finalize(writer_task, outbound_tx).await;
                return;
            }
        }
    };

    state.connections().insert(
        (room_id, player_id),
        ClientConnection {
            user_id,
            player_id,
            tx: outbound_tx.clone(),
        },
    );
    info!(%room_id, %player_id, "client attached");

    let forwarder = spawn_forwarder(&state, room_id, player_id, outbound_tx.clone());

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                dispatch(&state, &handle, user_id, player_id, &text, &outbound_tx).await;
            }
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) => {}
            Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(%room_id, %player_id, error = %err, "websocket error");
                break;
            }
        }
    }

    forwarder.abort();
    // A reconnect may already have replaced this entry; only drop our own.
    state
        .connections()
        .remove_if(&(room_id, player_id), |_, conn| {
            conn.tx.same_channel(&outbound_tx)
        });
    info!(%room_id, %player_id, "client detached");

    // Grace window before the seat is released or the player marked away.
    let grace_state = state.clone();
    let grace = state.config().disconnect_grace;
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        room_service::disconnect_timeout(&grace_state, room_id, player_id).await;
    });

    finalize(writer_task, outbound_tx).await;
}

/// Read frames until the client sends `game:join`, or give up.
async fn wait_for_join(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
) -> Option<(Uuid, Option<String>)> {
    let deadline = tokio::time::Instant::now() + JOIN_TIMEOUT;

    loop {
        let frame = tokio::time::timeout_at(deadline, receiver.next()).await;
        let message = match frame {
            Ok(Some(Ok(Message::Text(text)))) => text,
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => return None,
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(err))) => {
                warn!(error = %err, "websocket receive error before join");
                return None;
            }
            Err(_) => {
                warn!("websocket join timed out");
                return None;
            }
        };

        match ClientMessage::from_json_str(&message) {
            Ok(ClientMessage::GameJoin { room_id, name }) => return Some((room_id, name)),
            Ok(_) => {
                warn!("first message was not game:join");
                return None;
            }
            Err(err) => {
                warn!(error = %err, "failed to parse join message");
                return None;
            }
        }
    }
}

/// Forward bus events for this room and this player onto the socket.
fn spawn_forwarder(
    state: &SharedState,
    room_id: Uuid,
    player_id: Uuid,
    tx: mpsc::UnboundedSender<Message>,
) -> JoinHandle<()> {
    let mut room_sub = state.bus().subscribe(&room_topic(room_id));
    let mut player_sub = state.bus().subscribe(&player_topic(room_id, player_id));

    tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                message = room_sub.recv() => message,
                message = player_sub.recv() => message,
            };
            let Some(message) = message else {
                break;
            };
            let Ok(text) = String::from_utf8(message.payload.to_vec()) else {
                continue;
            };
            if tx.send(Message::Text(text.into())).is_err() {
                break;
            }
        }
    })
}

/// Route one inbound frame into the owning room. Failures are reported to
/// this socket only.
async fn dispatch(
    state: &SharedState,
    handle: &RoomHandle,
    user_id: Uuid,
    player_id: Uuid,
    text: &str,
    tx: &mpsc::UnboundedSender<Message>,
) {
    let message = match ClientMessage::from_json_str(text) {
        Ok(message) => message,
        Err(err) => {
            send_error(tx, &ServiceError::Validation(format!("malformed message: {err}")));
            return;
        }
    };

    let result = handle_message(state, handle, user_id, player_id, message, tx).await;
    if let Err(err) = result {
        send_error(tx, &err);
    }
}

async fn handle_message(
    state: &SharedState,
    handle: &RoomHandle,
    user_id: Uuid,
    player_id: Uuid,
    message: ClientMessage,
    tx: &mpsc::UnboundedSender<Message>,
) -> Result<(), ServiceError> {
    use crate::state::room::ActionType;

    match message {
        ClientMessage::GameJoin { .. } | ClientMessage::GameState => {
            let inner = handle.lock().await;
            send_message_to_websocket(
                tx,
                &ServerMessage::GameState(snapshot::build_snapshot(&inner, Some(player_id))),
            );
            Ok(())
        }
        ClientMessage::GameStart => {
            let mut inner = handle.lock().await;
            room_service::start_game(state, &mut inner, user_id).await
        }
        ClientMessage::VoteCast { target_id } => {
            let mut inner = handle.lock().await;
            vote_service::cast_vote(state, &mut inner, user_id, target_id).await
        }
        ClientMessage::NightAction {
            action,
            target_id,
            metadata,
        } => {
            let mut inner = handle.lock().await;
            action_service::submit_night_action(state, &mut inner, user_id, action, target_id, metadata)
                .await
        }
        ClientMessage::WitchPotion { potion, target_id } => {
            let kind = match potion {
                PotionKind::Heal => ActionType::WitchHeal,
                PotionKind::Poison => ActionType::WitchPoison,
            };
            let mut inner = handle.lock().await;
            action_service::submit_night_action(state, &mut inner, user_id, kind, target_id, None)
                .await
        }
        ClientMessage::CupidLink {
            player1_id,
            player2_id,
        } => {
            let metadata = serde_json::json!({
                "player1_id": player1_id.to_string(),
                "player2_id": player2_id.to_string(),
            });
            let mut inner = handle.lock().await;
            action_service::submit_night_action(
                state,
                &mut inner,
                user_id,
                ActionType::CupidLink,
                None,
                Some(metadata),
            )
            .await
        }
        ClientMessage::HunterRevenge { target_id } => {
            let mut inner = handle.lock().await;
            action_service::hunter_revenge(state, &mut inner, user_id, target_id).await
        }
        ClientMessage::DictatorCoup { target_id } => {
            let mut inner = handle.lock().await;
            action_service::dictator_coup(state, &mut inner, user_id, target_id).await
        }
        ClientMessage::Unknown => Err(ServiceError::Validation("unknown message type".into())),
    }
}

/// Serialize a payload and push it onto the provided WebSocket sender.
pub fn send_message_to_websocket<T>(tx: &mpsc::UnboundedSender<Message>, value: &T)
where
    T: ?Sized + serde::Serialize,
{
    match serde_json::to_string(value) {
        Ok(payload) => {
            let _ = tx.send(Message::Text(payload.into()));
        }
        Err(err) => warn!(error = %err, "failed to serialize outbound message"),
    }
}

fn send_error(tx: &mpsc::UnboundedSender<Message>, err: &ServiceError) {
    send_message_to_websocket(
        tx,
        &ServerMessage::Error {
            code: err.code().to_owned(),
            message: err.to_string(),
        },
    );
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
