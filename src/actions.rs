use std::sync::Arc;

use parse_display::Display;
use tokio::select;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::color::Color;
use crate::controller::{Controller, ControllerError};
use crate::models::{PixelMode, Preset};
use crate::store::{Store, StoreError};

/// Capacity of the action queue; producers block when it fills up
const QUEUE_SIZE: usize = 100;

/// A stateful mutation of the strip, coupling the store to the controller.
///
/// Actions execute strictly in enqueue order on a single worker, so their
/// sub-steps never interleave across actions.
#[derive(Debug, Display)]
pub enum Action {
    /// Change the color of the entire strip at once
    #[display("change-color")]
    ChangeColor { color: Color },
    /// Change the brightness of the entire strip
    #[display("change-brightness")]
    ChangeBrightness { brightness: u8 },
    /// Turn the strip on or off, restoring the stored brightness
    #[display("change-state")]
    ChangeState { on: bool },
    /// Change the color of multiple pixels at the same time
    #[display("set-arbitrary-pixels")]
    SetPixels { indexes: Vec<u16>, color: Color },
    /// Display a preset's pixels and brightness on the strip
    #[display("apply-preset")]
    ApplyPreset { preset: Preset },
    /// Start a registered animation
    #[display("start-animation")]
    StartAnimation { id: String },
    /// Halt the current animation
    #[display("stop-animation")]
    StopAnimation,
    /// Upload an animation to the controller, reporting the result on the
    /// reply channel
    #[display("add-animation")]
    AddAnimation {
        id: String,
        wasm: Vec<u8>,
        response: oneshot::Sender<bool>,
    },
    /// Delete an animation from the controller and the store
    #[display("remove-animation")]
    RemoveAnimation { id: String },
}

impl Action {
    /// Run the mutation against the store and the controller.
    ///
    /// Controller failures are logged and execution carries on so the store
    /// still reflects the intended state; store failures abort the
    /// remaining sub-steps.
    pub async fn execute(
        self,
        store: &Store,
        controller: &Controller,
    ) -> Result<(), StoreError> {
        match self {
            Action::ChangeColor { color } => {
                best_effort(controller.fill(color).await);

                // Save the color, cascading to the pixel buffer
                store.set_color(color).await?;
                store.set_pixel_mode(PixelMode::Fill).await
            }
            Action::ChangeBrightness { brightness } => {
                best_effort(controller.brightness(brightness).await);

                store.set_brightness(brightness).await?;

                // The strip is on exactly when the brightness is non-zero
                store.set_power(brightness != 0).await
            }
            Action::ChangeState { on } => {
                // Restore the last brightness when turning on
                let level = if on { store.brightness().await? } else { 0 };
                best_effort(controller.brightness(level).await);

                store.set_power(on).await
            }
            Action::SetPixels { indexes, color } => {
                // Queue the writes so the change appears all at once
                best_effort(controller.queue().await);
                best_effort(controller.set(&indexes, color).await);

                store.set_arbitrary_pixels(&indexes, color).await?;
                store.set_pixel_mode(PixelMode::Individual).await?;

                best_effort(controller.show().await);
                best_effort(controller.instant().await);

                Ok(())
            }
            Action::ApplyPreset { preset } => {
                best_effort(controller.queue().await);
                best_effort(controller.set_all(&preset.pixels).await);

                store.set_all_pixels(&preset.pixels).await?;
                store.set_pixel_mode(PixelMode::Individual).await?;

                best_effort(controller.brightness(preset.brightness).await);
                store.set_brightness(preset.brightness).await?;

                best_effort(controller.show().await);
                best_effort(controller.instant().await);

                store.set_power(true).await
            }
            Action::StartAnimation { id } => {
                best_effort(controller.animate(&id).await);

                store.set_pixel_mode(PixelMode::Animation).await?;
                store.set_current_animation(&id).await
            }
            Action::StopAnimation => {
                best_effort(controller.stop_animation().await);

                store.set_current_animation("").await
            }
            Action::AddAnimation { id, wasm, response } => {
                let success = match controller.register_animation(&id, &wasm).await {
                    Ok(success) => success,
                    Err(error) => {
                        warn!(%error, id = %id, "failed to register animation");
                        false
                    }
                };

                // The caller decides whether to persist the metadata, so
                // the reply must fire even on failure
                let _ = response.send(success);

                Ok(())
            }
            Action::RemoveAnimation { id } => {
                best_effort(controller.unregister_animation(&id).await);

                store.remove_animation(&id).await
            }
        }
    }
}

/// Log a failed controller call without aborting the action
fn best_effort(result: Result<(), ControllerError>) {
    if let Err(error) = result {
        warn!(%error, "controller call failed");
    }
}

/// Start the single consumer of the action queue.
///
/// The returned sender is shared by every producer; it blocks when the
/// queue is full. Cancelling the token stops the worker after the in-flight
/// action finishes.
pub fn spawn_processor(
    store: Store,
    controller: Arc<Controller>,
    shutdown: CancellationToken,
) -> mpsc::Sender<Action> {
    let (tx, mut rx) = mpsc::channel::<Action>(QUEUE_SIZE);

    tokio::spawn(async move {
        info!("started action processor");

        loop {
            select! {
                _ = shutdown.cancelled() => break,
                action = rx.recv() => match action {
                    Some(action) => {
                        let kind = action.to_string();
                        debug!(kind = %kind, "started processing");

                        if let Err(error) = action.execute(&store, &controller).await {
                            error!(kind = %kind, %error, "action processing failed");
                        }

                        debug!(kind = %kind, "processing finished");
                    }
                    None => break,
                },
            }
        }

        debug!("action processor stopped");
    });

    tx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::message::{DisplayMode, Request};
    use crate::controller::testing::connected_pair;
    use crate::models::generate_id;

    async fn fixture() -> (
        Store,
        Controller,
        tokio::sync::mpsc::UnboundedReceiver<Request>,
    ) {
        let store = Store::open_in_memory(4).await.unwrap();
        let (controller, requests) = connected_pair(true).await;
        (store, controller, requests)
    }

    #[tokio::test]
    async fn change_color_fills_strip_and_store() {
        let (store, controller, mut requests) = fixture().await;
        let color = Color::new(10, 20, 30);

        Action::ChangeColor { color }
            .execute(&store, &controller)
            .await
            .unwrap();

        assert_eq!(requests.recv().await.unwrap(), Request::Fill { color });
        assert_eq!(store.color().await.unwrap(), color);
        assert_eq!(store.pixels().await.unwrap(), vec![color; 4]);
        assert_eq!(store.pixel_mode().await.unwrap(), PixelMode::Fill);
    }

    #[tokio::test]
    async fn change_brightness_tracks_power() {
        let (store, controller, _requests) = fixture().await;

        Action::ChangeBrightness { brightness: 42 }
            .execute(&store, &controller)
            .await
            .unwrap();
        assert_eq!(store.brightness().await.unwrap(), 42);
        assert!(store.power().await.unwrap());

        Action::ChangeBrightness { brightness: 0 }
            .execute(&store, &controller)
            .await
            .unwrap();
        assert_eq!(store.brightness().await.unwrap(), 0);
        assert!(!store.power().await.unwrap());
    }

    #[tokio::test]
    async fn power_cycle_restores_brightness() {
        let (store, controller, mut requests) = fixture().await;

        Action::ChangeBrightness { brightness: 42 }
            .execute(&store, &controller)
            .await
            .unwrap();
        Action::ChangeState { on: false }
            .execute(&store, &controller)
            .await
            .unwrap();
        Action::ChangeState { on: true }
            .execute(&store, &controller)
            .await
            .unwrap();

        assert_eq!(
            requests.recv().await.unwrap(),
            Request::Brightness { level: 42 }
        );
        assert_eq!(
            requests.recv().await.unwrap(),
            Request::Brightness { level: 0 }
        );
        assert_eq!(
            requests.recv().await.unwrap(),
            Request::Brightness { level: 42 }
        );
        assert!(store.power().await.unwrap());
        assert_eq!(store.brightness().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn set_pixels_wraps_writes_in_queue_mode() {
        let (store, controller, mut requests) = fixture().await;
        let color = Color::new(1, 2, 3);

        Action::SetPixels {
            indexes: vec![0, 2],
            color,
        }
        .execute(&store, &controller)
        .await
        .unwrap();

        assert_eq!(
            requests.recv().await.unwrap(),
            Request::Mode {
                mode: DisplayMode::Queue
            }
        );
        assert_eq!(
            requests.recv().await.unwrap(),
            Request::Set {
                indexes: vec![0, 2],
                color
            }
        );
        assert_eq!(requests.recv().await.unwrap(), Request::Show);
        assert_eq!(
            requests.recv().await.unwrap(),
            Request::Mode {
                mode: DisplayMode::Instant
            }
        );

        assert_eq!(store.pixel_mode().await.unwrap(), PixelMode::Individual);
        let pixels = store.pixels().await.unwrap();
        assert_eq!(pixels[0], color);
        assert_eq!(pixels[2], color);
    }

    #[tokio::test]
    async fn apply_preset_sets_everything() {
        let (store, controller, mut requests) = fixture().await;
        let preset = Preset {
            id: generate_id(),
            name: "evening".to_owned(),
            pixels: vec![
                Color::new(1, 0, 0),
                Color::new(0, 1, 0),
                Color::new(0, 0, 1),
                Color::new(1, 1, 1),
            ],
            brightness: 77,
        };

        Action::ApplyPreset {
            preset: preset.clone(),
        }
        .execute(&store, &controller)
        .await
        .unwrap();

        assert_eq!(
            requests.recv().await.unwrap(),
            Request::Mode {
                mode: DisplayMode::Queue
            }
        );
        assert_eq!(
            requests.recv().await.unwrap(),
            Request::SetAll {
                colors: preset.pixels.clone()
            }
        );
        assert_eq!(
            requests.recv().await.unwrap(),
            Request::Brightness { level: 77 }
        );
        assert_eq!(requests.recv().await.unwrap(), Request::Show);
        assert_eq!(
            requests.recv().await.unwrap(),
            Request::Mode {
                mode: DisplayMode::Instant
            }
        );

        assert_eq!(store.pixels().await.unwrap(), preset.pixels);
        assert_eq!(store.brightness().await.unwrap(), 77);
        assert!(store.power().await.unwrap());
        assert_eq!(store.pixel_mode().await.unwrap(), PixelMode::Individual);
    }

    #[tokio::test]
    async fn animation_lifecycle_keeps_mode_consistent() {
        let (store, controller, _requests) = fixture().await;

        Action::StartAnimation {
            id: "abcd1234".to_owned(),
        }
        .execute(&store, &controller)
        .await
        .unwrap();
        assert_eq!(store.pixel_mode().await.unwrap(), PixelMode::Animation);
        assert_eq!(store.current_animation().await.unwrap(), "abcd1234");

        Action::StopAnimation.execute(&store, &controller).await.unwrap();
        assert_eq!(store.current_animation().await.unwrap(), "");
    }

    #[tokio::test]
    async fn add_animation_always_replies() {
        let store = Store::open_in_memory(4).await.unwrap();

        // Controller rejects the payload
        let (controller, _requests) = connected_pair(false).await;
        let (tx, rx) = oneshot::channel();
        Action::AddAnimation {
            id: "a1".to_owned(),
            wasm: vec![0; 200],
            response: tx,
        }
        .execute(&store, &controller)
        .await
        .unwrap();
        assert!(!rx.await.unwrap());

        // Controller accepts the payload; the store is still untouched
        let (controller, _requests) = connected_pair(true).await;
        let (tx, rx) = oneshot::channel();
        Action::AddAnimation {
            id: "a1".to_owned(),
            wasm: vec![0; 200],
            response: tx,
        }
        .execute(&store, &controller)
        .await
        .unwrap();
        assert!(rx.await.unwrap());
        assert!(store.list_animations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn processor_executes_in_enqueue_order() {
        let store = Store::open_in_memory(4).await.unwrap();
        let (controller, mut requests) = connected_pair(true).await;
        let shutdown = CancellationToken::new();

        let actions = spawn_processor(store.clone(), Arc::new(controller), shutdown.clone());

        actions
            .send(Action::ChangeColor {
                color: Color::new(9, 9, 9),
            })
            .await
            .unwrap();
        actions
            .send(Action::ChangeBrightness { brightness: 10 })
            .await
            .unwrap();

        assert_eq!(
            requests.recv().await.unwrap(),
            Request::Fill {
                color: Color::new(9, 9, 9)
            }
        );
        assert_eq!(
            requests.recv().await.unwrap(),
            Request::Brightness { level: 10 }
        );

        shutdown.cancel();
    }
}
