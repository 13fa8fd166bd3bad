use std::sync::atomic::{AtomicBool, Ordering};

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::Framed;

pub mod message;
use message::{DisplayMode, Reply, Request};

mod codec;
use codec::{ControllerCodec, ControllerCodecError};

use crate::color::Color;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("connection closed")]
    Disconnected,
    #[error("codec error: {0}")]
    Codec(#[from] ControllerCodecError),
    #[error("unexpected reply from controller")]
    UnexpectedReply,
}

/// Determines if an error results from a broken connection
fn is_disconnect(error: &ControllerCodecError) -> bool {
    match error {
        ControllerCodecError::Io(io_error) => matches!(
            io_error.kind(),
            std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::UnexpectedEof
        ),
        _ => false,
    }
}

/// Client for the hardware controller owning the strip.
///
/// Calls are strictly sequential: each one sends a request and waits for
/// the matching reply before the connection is released. A connection that
/// turns out to be dead triggers a single reconnect attempt; concurrent
/// failure reports collapse onto it.
pub struct Controller {
    address: String,
    conn: Mutex<Framed<TcpStream, ControllerCodec>>,
    reconnecting: AtomicBool,
}

impl Controller {
    /// Establish the initial connection to the controller
    pub async fn connect(address: String) -> Result<Controller, std::io::Error> {
        let stream = TcpStream::connect(&address).await?;
        info!(address = %address, "connected to controller");

        Ok(Controller {
            address,
            conn: Mutex::new(Framed::new(stream, ControllerCodec::new())),
            reconnecting: AtomicBool::new(false),
        })
    }

    /// Fill the entire strip with a single color
    pub async fn fill(&self, color: Color) -> Result<(), ControllerError> {
        self.call_ack(Request::Fill { color }).await
    }

    /// Set the pixels at the given indexes to one color
    pub async fn set(&self, indexes: &[u16], color: Color) -> Result<(), ControllerError> {
        self.call_ack(Request::Set {
            indexes: indexes.to_vec(),
            color,
        })
        .await
    }

    /// Set every pixel from the given buffer at once
    pub async fn set_all(&self, colors: &[Color]) -> Result<(), ControllerError> {
        self.call_ack(Request::SetAll {
            colors: colors.to_vec(),
        })
        .await
    }

    /// Change the hardware brightness of the strip
    pub async fn brightness(&self, level: u8) -> Result<(), ControllerError> {
        self.call_ack(Request::Brightness { level }).await
    }

    /// Buffer subsequent writes until a call to `show`
    pub async fn queue(&self) -> Result<(), ControllerError> {
        self.call_ack(Request::Mode {
            mode: DisplayMode::Queue,
        })
        .await
    }

    /// Commit writes as they arrive; this is the controller's default
    pub async fn instant(&self) -> Result<(), ControllerError> {
        self.call_ack(Request::Mode {
            mode: DisplayMode::Instant,
        })
        .await
    }

    /// Commit any buffered writes to the strip; a no-op in instant mode
    pub async fn show(&self) -> Result<(), ControllerError> {
        self.call_ack(Request::Show).await
    }

    /// Start the registered animation with the given id
    pub async fn animate(&self, id: &str) -> Result<(), ControllerError> {
        self.call_ack(Request::Animate { id: id.to_owned() }).await
    }

    /// Halt whatever animation is currently running
    pub async fn stop_animation(&self) -> Result<(), ControllerError> {
        self.call_ack(Request::StopAnimation).await
    }

    /// Upload an animation payload, returning whether the controller
    /// accepted it
    pub async fn register_animation(&self, id: &str, wasm: &[u8]) -> Result<bool, ControllerError> {
        match self
            .call(Request::RegisterAnimation {
                id: id.to_owned(),
                wasm: wasm.to_vec(),
            })
            .await?
        {
            Reply::Registered(success) => Ok(success),
            Reply::Ack => Err(ControllerError::UnexpectedReply),
        }
    }

    /// Delete an animation from the controller
    pub async fn unregister_animation(&self, id: &str) -> Result<(), ControllerError> {
        self.call_ack(Request::UnregisterAnimation { id: id.to_owned() })
            .await
    }

    async fn call_ack(&self, request: Request) -> Result<(), ControllerError> {
        match self.call(request).await? {
            Reply::Ack => Ok(()),
            Reply::Registered(_) => Err(ControllerError::UnexpectedReply),
        }
    }

    async fn call(&self, request: Request) -> Result<Reply, ControllerError> {
        let mut conn = self.conn.lock().await;

        if let Err(error) = conn.send(request).await {
            drop(conn);
            return Err(self.report_error(error).await);
        }

        match conn.next().await {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(error)) => {
                drop(conn);
                Err(self.report_error(error).await)
            }
            None => {
                drop(conn);
                self.reconnect().await;
                Err(ControllerError::Disconnected)
            }
        }
    }

    /// Classify a call failure, kicking off a reconnect when the
    /// connection is gone
    async fn report_error(&self, error: ControllerCodecError) -> ControllerError {
        if is_disconnect(&error) {
            self.reconnect().await;
            ControllerError::Disconnected
        } else {
            error!(%error, "an error occurred in the controller connection");
            error.into()
        }
    }

    /// Replace the connection, collapsing concurrent attempts into one
    async fn reconnect(&self) {
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }

        warn!("disconnected from controller");
        match TcpStream::connect(&self.address).await {
            Ok(stream) => {
                *self.conn.lock().await = Framed::new(stream, ControllerCodec::new());
                info!("reconnected to controller");
            }
            Err(error) => error!(%error, "failed to reconnect"),
        }

        self.reconnecting.store(false, Ordering::SeqCst);
    }
}

/// In-process controller stub shared by the client and pipeline tests
#[cfg(test)]
pub(crate) mod testing {
    use bytes::BytesMut;
    use futures::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio_util::codec::{Framed, LengthDelimitedCodec};

    use super::message::{Reply, Request};
    use super::Controller;

    /// Serve connections, recording every request and answering it
    pub(crate) async fn stub_controller(
        listener: TcpListener,
        requests: mpsc::UnboundedSender<Request>,
        register_result: bool,
    ) {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => return,
            };

            let codec = LengthDelimitedCodec::builder()
                .length_field_length(4)
                .new_codec();
            let mut framed = Framed::new(socket, codec);

            while let Some(Ok(frame)) = framed.next().await {
                let request = Request::decode(frame.freeze()).unwrap();
                let reply = match request {
                    Request::RegisterAnimation { .. } => Reply::Registered(register_result),
                    _ => Reply::Ack,
                };
                requests.send(request).unwrap();

                let mut buf = BytesMut::new();
                reply.encode(&mut buf);
                if framed.send(buf.freeze()).await.is_err() {
                    break;
                }
            }
        }
    }

    /// A connected client plus the stream of requests the stub received
    pub(crate) async fn connected_pair(
        register_result: bool,
    ) -> (Controller, mpsc::UnboundedReceiver<Request>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(stub_controller(listener, tx, register_result));

        let controller = Controller::connect(address).await.unwrap();
        (controller, rx)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{connected_pair, stub_controller};
    use super::*;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn calls_are_acknowledged_in_order() {
        let (controller, mut requests) = connected_pair(true).await;

        controller.queue().await.unwrap();
        controller.fill(Color::new(1, 2, 3)).await.unwrap();
        controller.brightness(50).await.unwrap();
        controller.show().await.unwrap();
        controller.instant().await.unwrap();

        assert_eq!(
            requests.recv().await.unwrap(),
            Request::Mode {
                mode: DisplayMode::Queue
            }
        );
        assert_eq!(
            requests.recv().await.unwrap(),
            Request::Fill {
                color: Color::new(1, 2, 3)
            }
        );
        assert_eq!(
            requests.recv().await.unwrap(),
            Request::Brightness { level: 50 }
        );
        assert_eq!(requests.recv().await.unwrap(), Request::Show);
        assert_eq!(
            requests.recv().await.unwrap(),
            Request::Mode {
                mode: DisplayMode::Instant
            }
        );
    }

    #[tokio::test]
    async fn register_animation_reports_the_result() {
        let (controller, _requests) = connected_pair(false).await;
        let accepted = controller.register_animation("abcd1234", &[0, 1, 2]).await;
        assert_eq!(accepted.unwrap(), false);

        let (controller, _requests) = connected_pair(true).await;
        let accepted = controller.register_animation("abcd1234", &[0, 1, 2]).await;
        assert_eq!(accepted.unwrap(), true);
    }

    #[tokio::test]
    async fn reconnects_after_the_peer_goes_away() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        // Accept and immediately drop the first connection, then serve
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
            stub_controller(listener, tx, true).await;
        });

        let controller = Controller::connect(address).await.unwrap();

        // The first call observes the dead connection and fails
        assert!(controller.show().await.is_err());

        // Give the reconnect a chance to land, then calls succeed again
        for _ in 0..50 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            if controller.show().await.is_ok() {
                break;
            }
        }
        assert_eq!(rx.recv().await.unwrap(), Request::Show);
    }
}
