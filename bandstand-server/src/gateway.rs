use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    response::Response,
};
use bandstand_core::{clock, now_millis, Config, ConnectionId, Track};
use bandstand_session::{extract_video_id, Room, SessionEvent};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::{
    context::ServerContext,
    schemas::{ClientMessage, ServerMessage},
};

/// The WebSocket side of the server. Tracks live connections and fans
/// messages out to them.
pub struct Gateway {
    config: Config,
    connections: DashMap<ConnectionId, Connection>,
    per_ip: DashMap<String, usize>,
}

struct Connection {
    sender: mpsc::UnboundedSender<ServerMessage>,
    address: String,
}

impl Gateway {
    pub fn new(config: Config) -> Arc<Self> {
        Arc::new(Self {
            config,
            connections: DashMap::new(),
            per_ip: DashMap::new(),
        })
    }

    /// Registers a connection unless its address is over the limit.
    fn admit(
        &self,
        address: &str,
    ) -> Option<(ConnectionId, mpsc::UnboundedReceiver<ServerMessage>)> {
        let mut count = self.per_ip.entry(address.to_string()).or_insert(0);

        if *count >= self.config.max_connections_per_ip {
            return None;
        }

        *count += 1;
        drop(count);

        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = ConnectionId::new();

        self.connections.insert(
            handle,
            Connection {
                sender,
                address: address.to_string(),
            },
        );

        Some((handle, receiver))
    }

    fn release(&self, handle: ConnectionId) {
        let Some((_, connection)) = self.connections.remove(&handle) else {
            return;
        };

        if let Some(mut count) = self.per_ip.get_mut(&connection.address) {
            *count = count.saturating_sub(1);
        }

        self.per_ip.remove_if(&connection.address, |_, c| *c == 0);
    }

    pub fn send_to(&self, handle: ConnectionId, message: ServerMessage) {
        if let Some(connection) = self.connections.get(&handle) {
            connection.sender.send(message).ok();
        }
    }

    /// Sends a message to every member of a room.
    pub fn broadcast_room(&self, room: &Room, message: ServerMessage) {
        for handle in room.connection_ids() {
            self.send_to(handle, message.clone());
        }
    }

    /// Sends a message to every member of a room except one, typically the
    /// actor who already got a direct reply.
    pub fn broadcast_others(&self, room: &Room, except: ConnectionId, message: ServerMessage) {
        for handle in room.connection_ids() {
            if handle != except {
                self.send_to(handle, message.clone());
            }
        }
    }

    pub fn broadcast_all(&self, message: ServerMessage) {
        for connection in self.connections.iter() {
            connection.sender.send(message.clone()).ok();
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

/// Fans a room event out to the right recipients.
pub fn relay_event(context: &ServerContext, event: SessionEvent) {
    let room_of = |id: &str| context.session.rooms.room_by_id(id);

    match event {
        SessionEvent::TrackStarted {
            room_id,
            announcement,
        } => {
            if let Some(room) = room_of(&room_id) {
                context.gateway.broadcast_room(
                    &room,
                    ServerMessage::TrackStarted {
                        now_playing: announcement,
                    },
                );
            }
        }
        SessionEvent::PlaybackIdle { room_id } => {
            if let Some(room) = room_of(&room_id) {
                context
                    .gateway
                    .broadcast_room(&room, ServerMessage::PlaybackIdle);
            }
        }
        SessionEvent::TrackSkipped { room_id, reason } => {
            if let Some(room) = room_of(&room_id) {
                context
                    .gateway
                    .broadcast_room(&room, ServerMessage::TrackSkipped { reason });
            }
        }
        SessionEvent::SchedulerUpdated { room_id, state } => {
            if let Some(room) = room_of(&room_id) {
                context
                    .gateway
                    .broadcast_room(&room, ServerMessage::SchedulerUpdate { state });
            }
        }
        SessionEvent::VotesReset { room_id } => {
            if let Some(room) = room_of(&room_id) {
                context
                    .gateway
                    .broadcast_room(&room, ServerMessage::VotesReset);
            }
        }
        SessionEvent::Snapshot { room_id, snapshot } => {
            if let Some(room) = room_of(&room_id) {
                context
                    .gateway
                    .broadcast_room(&room, ServerMessage::Snapshot { sync: snapshot });
            }
        }
        SessionEvent::RoomListChanged => {
            context.gateway.broadcast_all(ServerMessage::RoomList {
                rooms: context.session.rooms.list(),
            });
        }
    }
}

pub async fn gateway_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(context): State<ServerContext>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, addr, context))
}

async fn handle_socket(socket: WebSocket, addr: SocketAddr, context: ServerContext) {
    let address = addr.ip().to_string();

    let Some((handle, mut outbox)) = context.gateway.admit(&address) else {
        warn!("Refused connection from {address}: address at connection limit");
        let mut socket = socket;
        socket.close().await.ok();
        return;
    };

    debug!("Connection {handle} established from {address}");

    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(message) = outbox.recv().await {
            let Ok(encoded) = serde_json::to_string(&message) else {
                continue;
            };

            if sink.send(Message::Text(encoded)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        let Message::Text(text) = message else {
            continue;
        };

        match serde_json::from_str::<ClientMessage>(&text) {
            Ok(parsed) => dispatch(&context, handle, &address, parsed).await,
            Err(e) => context.gateway.send_to(
                handle,
                ServerMessage::Error {
                    message: format!("Bad message: {e}"),
                },
            ),
        }
    }

    debug!("Connection {handle} closed");

    leave_current_room(&context, handle);
    context.gateway.release(handle);
    writer.abort();
}

async fn dispatch(
    context: &ServerContext,
    handle: ConnectionId,
    address: &str,
    message: ClientMessage,
) {
    let gateway = &context.gateway;

    let reply_error = |text: String| {
        gateway.send_to(handle, ServerMessage::Error { message: text });
    };

    match message {
        ClientMessage::ClockPing { t0 } => {
            let pong = clock::respond(clock::ClockPing { t0 }, now_millis());
            gateway.send_to(
                handle,
                ServerMessage::ClockPong {
                    t0: pong.t0,
                    t1: pong.t1,
                },
            );
        }

        ClientMessage::CreateRoom {
            name,
            theme,
            username,
            avatar_id,
        } => {
            if context.session.rooms.room_of(handle).is_some() {
                return reply_error("Already in a room".to_string());
            }

            if !context.limits.room_create.allow(address) {
                return reply_error("You are creating rooms too quickly".to_string());
            }

            let theme = bandstand_session::sanitize_string(&theme, crate::schemas::MAX_THEME_CHARS);

            let room = match context
                .session
                .rooms
                .create_room(handle, name.into_inner(), theme)
            {
                Ok(room) => room,
                Err(e) => return reply_error(e.to_string()),
            };

            room.join(handle, username.as_str(), avatar_id.value());

            gateway.send_to(
                handle,
                ServerMessage::RoomState {
                    state: room.full_state(handle),
                },
            );
        }

        ClientMessage::JoinRoom {
            room_id,
            username,
            avatar_id,
        } => {
            if context.session.rooms.room_of(handle).is_some() {
                return reply_error("Already in a room".to_string());
            }

            let Some(room) = context.session.rooms.room_by_id(&room_id) else {
                return reply_error("Room not found".to_string());
            };

            let outcome = room.join(handle, username.as_str(), avatar_id.value());

            gateway.send_to(
                handle,
                ServerMessage::RoomState {
                    state: room.full_state(handle),
                },
            );

            let profile = room
                .roster()
                .into_iter()
                .find(|u| u.id == outcome.public_id);

            if let Some(profile) = profile {
                gateway.broadcast_others(&room, handle, ServerMessage::UserJoined { user: profile });
            }

            gateway.broadcast_others(
                &room,
                handle,
                ServerMessage::Notice {
                    text: format!("{} joined the room", username.as_str()),
                },
            );

            // A reclaimed slot changes the rotation for everyone.
            if outcome.restored {
                gateway.broadcast_room(
                    &room,
                    ServerMessage::SchedulerUpdate {
                        state: room.scheduler_state(),
                    },
                );
            }
        }

        ClientMessage::LeaveRoom => leave_current_room(context, handle),

        ClientMessage::StepUp => {
            if !context.limits.action.allow(address) {
                return reply_error("Slow down".to_string());
            }

            let Some(room) = context.session.rooms.room_of(handle) else {
                return;
            };

            match room.step_up(handle) {
                Ok(()) => gateway.broadcast_room(
                    &room,
                    ServerMessage::SchedulerUpdate {
                        state: room.scheduler_state(),
                    },
                ),
                Err(e) => reply_error(e.to_string()),
            }
        }

        ClientMessage::StepDown => {
            let Some(room) = context.session.rooms.room_of(handle) else {
                return;
            };

            match room.step_down(handle) {
                Ok(()) => gateway.broadcast_room(
                    &room,
                    ServerMessage::SchedulerUpdate {
                        state: room.scheduler_state(),
                    },
                ),
                Err(e) => reply_error(e.to_string()),
            }
        }

        ClientMessage::QueueTrack { input } => {
            if !context.limits.action.allow(address) {
                return reply_error("Slow down".to_string());
            }

            let Some(room) = context.session.rooms.room_of(handle) else {
                return;
            };

            let Some(video_id) = extract_video_id(&input) else {
                return reply_error("Not a recognizable video".to_string());
            };

            // Unresolvable metadata falls back to a placeholder; the
            // presenter can correct it once playback starts.
            let track = match context.provider.video_info(&video_id).await {
                Ok(info) => Track::new(info.video_id, info.title, info.thumbnail, info.duration),
                Err(e) => {
                    info!("Metadata lookup failed for {video_id}: {e}");
                    Track::placeholder(video_id, context.config.fallback_duration)
                }
            };

            let title = track.title.clone();

            match room.queue_track(handle, track) {
                Ok(_) => {
                    gateway.broadcast_room(
                        &room,
                        ServerMessage::SchedulerUpdate {
                            state: room.scheduler_state(),
                        },
                    );

                    if let Some(name) = room.username(handle) {
                        gateway.broadcast_room(
                            &room,
                            ServerMessage::Notice {
                                text: format!("{name} queued {title}"),
                            },
                        );
                    }
                }
                Err(e) => reply_error(e.to_string()),
            }
        }

        ClientMessage::RemoveTrack { index } => {
            let Some(room) = context.session.rooms.room_of(handle) else {
                return;
            };

            match room.remove_track(handle, index) {
                Ok(()) => gateway.broadcast_room(
                    &room,
                    ServerMessage::SchedulerUpdate {
                        state: room.scheduler_state(),
                    },
                ),
                Err(e) => reply_error(e.to_string()),
            }
        }

        ClientMessage::SkipTrack => {
            if let Some(room) = context.session.rooms.room_of(handle) {
                room.skip_own_track(handle);
            }
        }

        ClientMessage::Vote { kind } => {
            let Some(room) = context.session.rooms.room_of(handle) else {
                return;
            };

            if let Some(tally) = room.vote(handle, kind) {
                gateway.broadcast_room(
                    &room,
                    ServerMessage::VotesUpdate {
                        votes: bandstand_session::VoteCounts {
                            approve: tally.approve,
                            disapprove: tally.disapprove,
                        },
                    },
                );
            }
        }

        ClientMessage::Chat { text } => {
            if !context.limits.chat.allow(address) {
                return reply_error("You are sending messages too quickly".to_string());
            }

            let Some(room) = context.session.rooms.room_of(handle) else {
                return;
            };

            if let Some(entry) = room.chat_message(handle, text.into_inner()) {
                gateway.broadcast_room(&room, ServerMessage::Chat { entry });
            }
        }

        ClientMessage::TrackEnded { video_id } => {
            if let Some(room) = context.session.rooms.room_of(handle) {
                room.report_track_ended(&video_id);
            }
        }

        ClientMessage::CorrectMetadata {
            video_id,
            title,
            duration,
        } => {
            let Some(room) = context.session.rooms.room_of(handle) else {
                return;
            };

            if let Some((title, duration)) =
                room.correct_metadata(handle, &video_id, title, duration)
            {
                gateway.broadcast_room(
                    &room,
                    ServerMessage::MetadataCorrected {
                        video_id,
                        title,
                        duration,
                    },
                );
                gateway.broadcast_room(
                    &room,
                    ServerMessage::Snapshot {
                        sync: room.playback_state(),
                    },
                );
            }
        }
    }
}

/// Removes a connection from whatever room it is in, notifying the rest.
fn leave_current_room(context: &ServerContext, handle: ConnectionId) {
    let Some(room) = context.session.rooms.room_of(handle) else {
        return;
    };

    let Some(user) = room.leave(handle) else {
        return;
    };

    context.gateway.broadcast_room(
        &room,
        ServerMessage::UserLeft {
            user_id: user.public_id,
        },
    );
    context.gateway.broadcast_room(
        &room,
        ServerMessage::Notice {
            text: format!("{} left the room", user.username),
        },
    );
    context.gateway.broadcast_room(
        &room,
        ServerMessage::SchedulerUpdate {
            state: room.scheduler_state(),
        },
    );
}
