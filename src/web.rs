use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use warp::http::StatusCode;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

use crate::actions::Action;
use crate::auth::{Permission, Validator};
use crate::events::Emitter;
use crate::hub::{session, Hub};
use crate::scheduler::Scheduler;
use crate::store::Store;

mod animations;
mod presets;
mod schedules;

/// Maximum size of an inbound realtime frame
const MAX_FRAME_SIZE: usize = 1 << 11;

/// Everything a request handler may need
#[derive(Clone)]
pub struct Context {
    pub store: Store,
    pub actions: mpsc::Sender<Action>,
    pub scheduler: Scheduler,
    pub emitter: Emitter,
    pub hub: Hub,
    pub validator: Arc<Validator>,
}

/// Bind the HTTP surface, returning the future that serves it until the
/// shutdown signal fires
pub async fn bind(
    address: SocketAddr,
    context: Context,
    shutdown: CancellationToken,
) -> Result<impl Future<Output = ()>, warp::Error> {
    let routes = routes(context, shutdown.clone())
        .recover(handle_rejection)
        .with(warp::trace::request());

    let (bound, serving) = warp::serve(routes)
        .try_bind_with_graceful_shutdown(address, async move { shutdown.cancelled().await })?;
    info!(address = %bound, "listening and ready to handle requests");

    Ok(serving)
}

/// Every route of the service
fn routes(
    context: Context,
    shutdown: CancellationToken,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let ws = warp::path!("ws")
        .and(warp::ws())
        .and(with(context.clone()))
        .and(with(shutdown))
        .map(|ws: warp::ws::Ws, context: Context, shutdown: CancellationToken| {
            ws.max_message_size(MAX_FRAME_SIZE).on_upgrade(move |socket| {
                session::handle(
                    socket,
                    context.hub,
                    context.store,
                    context.actions,
                    context.validator,
                    shutdown,
                )
            })
        });

    let events = warp::path!("events")
        .and(warp::get())
        .and(warp::query::<EventsQuery>())
        .and(with(context.emitter.clone()))
        .and_then(events_handler);

    let ping = warp::path!("ping").and(warp::get()).map(|| warp::reply());

    animations::routes(context.clone())
        .or(presets::routes(context.clone()))
        .or(schedules::routes(context))
        .or(ws)
        .or(events)
        .or(ping)
}

/// Inject a cloneable value into a filter chain
pub(crate) fn with<T: Clone + Send>(
    value: T,
) -> impl Filter<Extract = (T,), Error = Infallible> + Clone {
    warp::any().map(move || value.clone())
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    stream: String,
}

/// Subscribe the peer to one of the entity delta streams
async fn events_handler(query: EventsQuery, emitter: Emitter) -> Result<Response, Rejection> {
    let receiver = match emitter.subscribe(&query.stream) {
        Some(receiver) => receiver,
        None => return Err(warp::reject::not_found()),
    };

    let stream = BroadcastStream::new(receiver)
        .filter_map(|event| async move { event.ok() })
        .map(|event| {
            Ok::<_, Infallible>(
                warp::sse::Event::default()
                    .event(event.name)
                    .data(event.data),
            )
        });

    Ok(warp::sse::reply(warp::sse::keep_alive().stream(stream)).into_response())
}

/// Require a bearer token carrying the given permission
pub(crate) fn authorize(
    validator: Arc<Validator>,
    permission: Permission,
) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization")
        .and_then(move |header: Option<String>| {
            let validator = validator.clone();

            async move {
                let token = header
                    .as_deref()
                    .and_then(|header| header.strip_prefix("Bearer "))
                    .ok_or_else(|| warp::reject::custom(ApiError::Unauthenticated))?;

                let permissions = validator.validate(token).await.map_err(|error| {
                    debug!(%error, "token validation failed");
                    warp::reject::custom(ApiError::Unauthenticated)
                })?;

                if permissions.has(permission) {
                    Ok(())
                } else {
                    Err(warp::reject::custom(ApiError::Forbidden))
                }
            }
        })
        .untuple_one()
}

#[derive(Debug)]
pub(crate) enum ApiError {
    Unauthenticated,
    Forbidden,
}

impl warp::reject::Reject for ApiError {}

// The uniform JSON response envelope follows the `success`/`reason`/`data`
// shape every client already understands.

pub(crate) fn success() -> Response {
    warp::reply::json(&json!({ "success": true })).into_response()
}

pub(crate) fn with_data<T: Serialize>(data: &T) -> Response {
    warp::reply::json(&json!({ "success": true, "data": data })).into_response()
}

pub(crate) fn with_error(status: StatusCode, reason: &str) -> Response {
    warp::reply::with_status(
        warp::reply::json(&json!({ "success": false, "reason": reason })),
        status,
    )
    .into_response()
}

pub(crate) fn bad_request(reason: &str) -> Response {
    with_error(StatusCode::BAD_REQUEST, reason)
}

pub(crate) fn not_found() -> Response {
    with_error(StatusCode::NOT_FOUND, "not found")
}

pub(crate) fn as_fatal() -> Response {
    with_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "an unexpected error occurred",
    )
}

/// Translate rejections into the response envelope
async fn handle_rejection(rejection: Rejection) -> Result<Response, Infallible> {
    let response = if rejection.is_not_found() {
        not_found()
    } else if let Some(error) = rejection.find::<ApiError>() {
        match error {
            ApiError::Unauthenticated => with_error(StatusCode::UNAUTHORIZED, "unauthenticated"),
            ApiError::Forbidden => with_error(StatusCode::FORBIDDEN, "improper permissions"),
        }
    } else if rejection
        .find::<warp::filters::body::BodyDeserializeError>()
        .is_some()
    {
        bad_request("invalid JSON request")
    } else if rejection.find::<warp::reject::PayloadTooLarge>().is_some() {
        bad_request("payload too large")
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        with_error(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
    } else {
        error!(?rejection, "unhandled rejection");
        as_fatal()
    };

    Ok(response)
}
