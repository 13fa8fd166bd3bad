use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use warp::ws::{Message, WebSocket};

use super::message::{Egress, Ingress};
use super::Hub;
use crate::actions::Action;
use crate::auth::{Permission, Permissions, Validator};
use crate::models::PixelMode;
use crate::store::{Store, StoreError};

/// Budget for a single write to the peer
const WRITE_WAIT: Duration = Duration::from_secs(10);
/// How long the peer may stay silent before the connection is dead
const PONG_WAIT: Duration = Duration::from_secs(60);
/// Interval between keep-alive pings
const PING_PERIOD: Duration = Duration::from_secs(54);

/// One authenticated-or-not realtime connection.
///
/// A session starts without permissions; a successful login stores the
/// validated permission set, and every non-authentication command is
/// refused until it contains the light control permission.
struct Session {
    id: Uuid,
    hub: Hub,
    store: Store,
    actions: mpsc::Sender<Action>,
    validator: Arc<Validator>,
    outbound: mpsc::Sender<Egress>,
    permissions: Permissions,
}

/// Run a freshly upgraded connection until it closes.
///
/// Teardown from any cause (peer close, read or write error, missed pong,
/// backpressure drop) funnels through the hub's unregister exactly once.
pub async fn handle(
    websocket: WebSocket,
    hub: Hub,
    store: Store,
    actions: mpsc::Sender<Action>,
    validator: Arc<Validator>,
    shutdown: CancellationToken,
) {
    let id = Uuid::new_v4();
    let (outbound, outbound_rx) = mpsc::channel(super::SESSION_BUFFER);
    let (sink, stream) = websocket.split();

    hub.register(id, outbound.clone()).await;
    debug!(session = %id, "registered new session");

    tokio::spawn(write_loop(sink, outbound_rx));

    let mut session = Session {
        id,
        hub: hub.clone(),
        store,
        actions,
        validator,
        outbound,
        permissions: Permissions::default(),
    };

    session.send_snapshot().await;
    session.read_loop(stream, shutdown).await;

    hub.unregister(id).await;
    debug!(session = %id, "unregistered session");
}

impl Session {
    /// Bring the peer up to date with the current strip state
    async fn send_snapshot(&self) {
        self.send(Egress::Length(self.store.length())).await;

        match self.store.brightness().await {
            Ok(brightness) => self.send(Egress::Brightness(brightness)).await,
            Err(error) => error!(%error, "failed to get brightness"),
        }

        match self.store.power().await {
            Ok(on) => self.send(Egress::State(on)).await,
            Err(error) => error!(%error, "failed to get state"),
        }

        match self.store.pixel_mode().await {
            Ok(PixelMode::Fill) => match self.store.color().await {
                Ok(color) => {
                    self.send(Egress::filled_pixels(color, self.store.length()))
                        .await
                }
                Err(error) => error!(%error, "failed to get color"),
            },
            Ok(PixelMode::Individual) => match self.store.pixels().await {
                Ok(pixels) => self.send(Egress::current_pixels(pixels)).await,
                Err(error) => error!(%error, "failed to get pixel colors"),
            },
            Ok(PixelMode::Animation) => match self.store.current_animation().await {
                Ok(id) if !id.is_empty() => self.send(Egress::AnimationStarted(id)).await,
                Ok(_) => self.send(Egress::AnimationStopped).await,
                Err(error) => error!(%error, "failed to get current animation"),
            },
            Err(error) => error!(%error, "failed to get pixel mode"),
        }
    }

    /// Consume frames from the peer until the connection dies or the
    /// service shuts down
    async fn read_loop(&mut self, mut stream: SplitStream<WebSocket>, shutdown: CancellationToken) {
        loop {
            let message = select! {
                _ = shutdown.cancelled() => break,
                message = timeout(PONG_WAIT, stream.next()) => match message {
                    Err(_) => {
                        info!(session = %self.id, "connection timed out");
                        break;
                    }
                    Ok(None) => break,
                    Ok(Some(Err(error))) => {
                        error!(session = %self.id, %error, "failed to read message");
                        break;
                    }
                    Ok(Some(Ok(message))) => message,
                },
            };

            if message.is_close() {
                info!(session = %self.id, "connection closed");
                break;
            }
            if message.is_ping() || message.is_pong() {
                continue;
            }

            let text = match message.to_str() {
                Ok(text) => text,
                Err(_) => continue,
            };

            match serde_json::from_str::<Ingress>(text) {
                Ok(frame) => self.handle_frame(frame).await,
                Err(error) => error!(session = %self.id, %error, "failed to parse message"),
            }
        }
    }

    async fn handle_frame(&mut self, frame: Ingress) {
        // Everything except authentication requires control of the lights
        if !matches!(frame, Ingress::Login(_) | Ingress::Logout)
            && !self.permissions.has(Permission::ControlLights)
        {
            self.send(Egress::PermissionsError(
                Permission::ControlLights.as_str().to_owned(),
            ))
            .await;
            return;
        }

        match frame {
            Ingress::Login(token) => match self.validator.validate(&token).await {
                Ok(permissions) => {
                    self.permissions = permissions;
                    self.send(Egress::Permissions(self.permissions.as_strings()))
                        .await;
                }
                Err(error) => {
                    warn!(session = %self.id, %error, "invalid authentication token");
                    self.send(Egress::Permissions(Vec::new())).await;
                }
            },

            Ingress::Logout => {
                self.permissions.clear();
                self.send(Egress::Permissions(Vec::new())).await;
            }

            Ingress::SetColor(color) => {
                self.enqueue(Action::ChangeColor { color }).await;
                self.hub
                    .broadcast(Egress::filled_pixels(color, self.store.length()))
                    .await;
            }

            Ingress::StateOn => {
                self.enqueue(Action::ChangeState { on: true }).await;
                self.hub.broadcast(Egress::State(true)).await;
            }

            Ingress::StateOff => {
                self.enqueue(Action::ChangeState { on: false }).await;
                self.hub.broadcast(Egress::State(false)).await;
            }

            Ingress::SetBrightness(brightness) => {
                if brightness > 100 {
                    warn!(session = %self.id, brightness, "invalid brightness level");
                    return;
                }

                self.enqueue(Action::ChangeBrightness { brightness }).await;
                self.hub.broadcast(Egress::Brightness(brightness)).await;
            }

            Ingress::SetArbitraryPixels { indexes, color } => {
                if indexes.is_empty() {
                    warn!(session = %self.id, "no indexes to set");
                    return;
                }

                self.enqueue(Action::SetPixels {
                    indexes: indexes.clone(),
                    color,
                })
                .await;
                self.hub
                    .broadcast(Egress::PixelsByIndex { indexes, color })
                    .await;
            }

            Ingress::ApplyPreset(id) => match self.store.get_preset(&id).await {
                Ok(preset) => {
                    let brightness = preset.brightness;
                    let broadcast = Egress::PresetUsed {
                        id: preset.id.clone(),
                        pixels: preset.pixels.clone(),
                    };

                    self.enqueue(Action::ApplyPreset { preset }).await;
                    self.hub.broadcast(broadcast).await;
                    self.hub.broadcast(Egress::Brightness(brightness)).await;
                    self.hub.broadcast(Egress::State(true)).await;
                }
                Err(StoreError::NotFound) => {
                    self.send(Egress::NotFound(format!("preset '{}'", id))).await
                }
                Err(error) => error!(session = %self.id, %error, id = %id, "failed to find preset"),
            },

            Ingress::StartAnimation(id) => match self.store.get_animation(&id).await {
                Ok(animation) => {
                    self.enqueue(Action::StartAnimation {
                        id: animation.id.clone(),
                    })
                    .await;
                    self.hub
                        .broadcast(Egress::AnimationStarted(animation.id))
                        .await;
                }
                Err(StoreError::NotFound) => {
                    self.send(Egress::NotFound(format!("animation '{}'", id)))
                        .await
                }
                Err(error) => {
                    error!(session = %self.id, %error, id = %id, "failed to find animation")
                }
            },

            Ingress::StopAnimation => {
                self.enqueue(Action::StopAnimation).await;
                self.hub.broadcast(Egress::AnimationStopped).await;
            }
        }
    }

    /// Queue a message for this session only
    async fn send(&self, message: Egress) {
        let _ = self.outbound.send(message).await;
    }

    /// Hand an action to the pipeline, blocking while the queue is full
    async fn enqueue(&self, action: Action) {
        if self.actions.send(action).await.is_err() {
            error!(session = %self.id, "action processor is gone");
        }
    }
}

/// Ship queued messages to the peer and keep the connection alive
async fn write_loop(mut sink: SplitSink<WebSocket, Message>, mut outbound: mpsc::Receiver<Egress>) {
    let mut ping = interval_at(Instant::now() + PING_PERIOD, PING_PERIOD);

    loop {
        select! {
            message = outbound.recv() => match message {
                Some(message) => {
                    let encoded = match serde_json::to_string(&message) {
                        Ok(encoded) => encoded,
                        Err(error) => {
                            error!(%error, "failed to encode message");
                            continue;
                        }
                    };

                    match timeout(WRITE_WAIT, sink.send(Message::text(encoded))).await {
                        Ok(Ok(())) => {}
                        Ok(Err(error)) => {
                            error!(%error, "failed to send message");
                            break;
                        }
                        Err(_) => {
                            error!("write timed out");
                            break;
                        }
                    }
                }
                None => {
                    // Queue closed, terminate the connection
                    let _ = sink.send(Message::close()).await;
                    break;
                }
            },

            _ = ping.tick() => {
                match timeout(WRITE_WAIT, sink.send(Message::ping(Vec::new()))).await {
                    Ok(Ok(())) => {}
                    _ => {
                        error!("failed to send ping message");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Color;
    use crate::models::{generate_id, Preset};

    struct Fixture {
        session: Session,
        outbound_rx: mpsc::Receiver<Egress>,
        actions_rx: mpsc::Receiver<Action>,
        observer_rx: mpsc::Receiver<Egress>,
        store: Store,
    }

    /// A session wired to an in-memory store, a captive action queue, and
    /// a second hub member observing broadcasts
    async fn fixture(scopes: &[&str]) -> Fixture {
        let store = Store::open_in_memory(4).await.unwrap();
        let hub = Hub::new(CancellationToken::new());
        let (actions_tx, actions_rx) = mpsc::channel(16);
        let (outbound, outbound_rx) = mpsc::channel(super::super::SESSION_BUFFER);

        let (observer_tx, observer_rx) = mpsc::channel(super::super::SESSION_BUFFER);
        hub.register(Uuid::new_v4(), observer_tx).await;

        let session = Session {
            id: Uuid::new_v4(),
            hub,
            store: store.clone(),
            actions: actions_tx,
            validator: Arc::new(Validator::new("http://127.0.0.1:1").unwrap()),
            outbound,
            permissions: Permissions::from_scopes(scopes),
        };

        Fixture {
            session,
            outbound_rx,
            actions_rx,
            observer_rx,
            store,
        }
    }

    #[tokio::test]
    async fn snapshot_is_sent_in_order() {
        let mut fixture = fixture(&[]).await;
        fixture.store.set_brightness(42).await.unwrap();
        fixture.store.set_power(true).await.unwrap();
        fixture.store.set_color(Color::new(10, 20, 30)).await.unwrap();

        fixture.session.send_snapshot().await;

        assert_eq!(fixture.outbound_rx.recv().await.unwrap(), Egress::Length(4));
        assert_eq!(
            fixture.outbound_rx.recv().await.unwrap(),
            Egress::Brightness(42)
        );
        assert_eq!(fixture.outbound_rx.recv().await.unwrap(), Egress::State(true));
        assert_eq!(
            fixture.outbound_rx.recv().await.unwrap(),
            Egress::filled_pixels(Color::new(10, 20, 30), 4)
        );
    }

    #[tokio::test]
    async fn commands_require_the_control_permission() {
        let mut fixture = fixture(&[]).await;

        fixture.session.handle_frame(Ingress::StateOn).await;

        assert_eq!(
            fixture.outbound_rx.recv().await.unwrap(),
            Egress::PermissionsError("lights-control".to_owned())
        );
        assert!(fixture.actions_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn login_with_unreachable_issuer_grants_nothing() {
        let mut fixture = fixture(&[]).await;

        fixture
            .session
            .handle_frame(Ingress::Login("not-a-token".to_owned()))
            .await;

        assert_eq!(
            fixture.outbound_rx.recv().await.unwrap(),
            Egress::Permissions(Vec::new())
        );
    }

    #[tokio::test]
    async fn set_color_enqueues_and_broadcasts() {
        let mut fixture = fixture(&["lights-control"]).await;
        let color = Color::new(10, 20, 30);

        fixture.session.handle_frame(Ingress::SetColor(color)).await;

        assert!(matches!(
            fixture.actions_rx.recv().await.unwrap(),
            Action::ChangeColor { color: c } if c == color
        ));
        assert_eq!(
            fixture.observer_rx.recv().await.unwrap(),
            Egress::filled_pixels(color, 4)
        );
    }

    #[tokio::test]
    async fn brightness_over_limit_is_rejected() {
        let mut fixture = fixture(&["lights-control"]).await;

        fixture.session.handle_frame(Ingress::SetBrightness(101)).await;

        assert!(fixture.actions_rx.try_recv().is_err());
        assert!(fixture.observer_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn brightness_broadcast_reaches_peers() {
        let mut fixture = fixture(&["lights-control"]).await;

        fixture.session.handle_frame(Ingress::SetBrightness(42)).await;

        assert!(matches!(
            fixture.actions_rx.recv().await.unwrap(),
            Action::ChangeBrightness { brightness: 42 }
        ));
        assert_eq!(
            fixture.observer_rx.recv().await.unwrap(),
            Egress::Brightness(42)
        );
    }

    #[tokio::test]
    async fn empty_pixel_selection_is_a_no_op() {
        let mut fixture = fixture(&["lights-control"]).await;

        fixture
            .session
            .handle_frame(Ingress::SetArbitraryPixels {
                indexes: Vec::new(),
                color: Color::BLACK,
            })
            .await;

        assert!(fixture.actions_rx.try_recv().is_err());
        assert!(fixture.observer_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn apply_preset_broadcasts_in_order() {
        let mut fixture = fixture(&["lights-control"]).await;
        let preset = Preset {
            id: generate_id(),
            name: "evening".to_owned(),
            pixels: vec![Color::new(1, 2, 3); 4],
            brightness: 77,
        };
        fixture.store.add_preset(&preset).await.unwrap();

        fixture
            .session
            .handle_frame(Ingress::ApplyPreset(preset.id.clone()))
            .await;

        assert!(matches!(
            fixture.actions_rx.recv().await.unwrap(),
            Action::ApplyPreset { .. }
        ));
        assert_eq!(
            fixture.observer_rx.recv().await.unwrap(),
            Egress::PresetUsed {
                id: preset.id.clone(),
                pixels: preset.pixels.clone(),
            }
        );
        assert_eq!(
            fixture.observer_rx.recv().await.unwrap(),
            Egress::Brightness(77)
        );
        assert_eq!(fixture.observer_rx.recv().await.unwrap(), Egress::State(true));
    }

    #[tokio::test]
    async fn missing_preset_answers_the_requester_only() {
        let mut fixture = fixture(&["lights-control"]).await;

        fixture
            .session
            .handle_frame(Ingress::ApplyPreset("missing1".to_owned()))
            .await;

        assert_eq!(
            fixture.outbound_rx.recv().await.unwrap(),
            Egress::NotFound("preset 'missing1'".to_owned())
        );
        assert!(fixture.actions_rx.try_recv().is_err());
        assert!(fixture.observer_rx.try_recv().is_err());
    }
}
