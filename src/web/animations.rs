use std::collections::HashMap;

use bytes::BufMut;
use futures::TryStreamExt;
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use warp::filters::multipart::FormData;
use warp::reply::Response;
use warp::{Filter, Rejection};

use super::{as_fatal, authorize, bad_request, not_found, success, with, with_data, Context};
use crate::actions::Action;
use crate::auth::Permission;
use crate::models::Animation;
use crate::store::StoreError;

/// Maximum size of an uploaded animation payload
const MAX_UPLOAD_SIZE: u64 = 10 << 20;

pub(crate) fn routes(
    context: Context,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    let edit = authorize(context.validator.clone(), Permission::Edit);
    let collection = warp::path!("animations");
    let item = warp::path!("animations" / String);

    let list = collection
        .and(warp::get())
        .and(with(context.clone()))
        .and_then(list);
    let create = collection
        .and(warp::post())
        .and(edit.clone())
        .and(warp::multipart::form().max_length(MAX_UPLOAD_SIZE))
        .and(with(context.clone()))
        .and_then(create);
    let read = item
        .and(warp::get())
        .and(with(context.clone()))
        .and_then(read);
    let update = item
        .and(warp::patch())
        .and(edit.clone())
        .and(warp::multipart::form().max_length(MAX_UPLOAD_SIZE))
        .and(with(context.clone()))
        .and_then(update);
    let remove = item
        .and(warp::delete())
        .and(edit)
        .and(with(context))
        .and_then(remove);

    list.or(create)
        .unify()
        .or(read)
        .unify()
        .or(update)
        .unify()
        .or(remove)
        .unify()
}

async fn list(context: Context) -> Result<Response, Rejection> {
    match context.store.list_animations().await {
        Ok(animations) => Ok(with_data(&animations)),
        Err(error) => {
            error!(%error, "failed to list animations");
            Ok(as_fatal())
        }
    }
}

async fn read(id: String, context: Context) -> Result<Response, Rejection> {
    match context.store.get_animation(&id).await {
        Ok(animation) => Ok(with_data(&animation)),
        Err(StoreError::NotFound) => Ok(not_found()),
        Err(error) => {
            error!(%error, id = %id, "failed to read animation");
            Ok(as_fatal())
        }
    }
}

async fn create(form: FormData, context: Context) -> Result<Response, Rejection> {
    let mut fields = match read_form(form).await {
        Ok(fields) => fields,
        Err(error) => {
            error!(%error, "failed to read form");
            return Ok(bad_request("invalid form data"));
        }
    };

    let name = match fields
        .get("name")
        .and_then(|raw| std::str::from_utf8(raw).ok())
        .filter(|name| !name.is_empty())
    {
        Some(name) => name.to_owned(),
        None => return Ok(bad_request("name must be present")),
    };
    let wasm = match fields.remove("wasm") {
        Some(wasm) => wasm,
        None => return Ok(bad_request("wasm file must be present")),
    };

    let animation = Animation::new(name);

    // The metadata is only persisted once the controller accepts the payload
    match register_payload(&context, &animation.id, wasm).await {
        Ok(true) => {}
        Ok(false) => return Ok(bad_request("invalid WASM payload")),
        Err(response) => return Ok(response),
    }

    if let Err(error) = context.store.add_animation(&animation).await {
        error!(%error, "failed to insert into database");
        return Ok(as_fatal());
    }

    context.emitter.animation_created(&animation);
    Ok(success())
}

async fn update(id: String, form: FormData, context: Context) -> Result<Response, Rejection> {
    let mut animation = match context.store.get_animation(&id).await {
        Ok(animation) => animation,
        Err(StoreError::NotFound) => return Ok(not_found()),
        Err(error) => {
            error!(%error, id = %id, "failed to find animation");
            return Ok(as_fatal());
        }
    };

    let mut form_fields = match read_form(form).await {
        Ok(fields) => fields,
        Err(error) => {
            error!(%error, "failed to read form");
            return Ok(bad_request("invalid form data"));
        }
    };

    // Track the changed fields for the update event
    let mut fields = Map::new();

    if let Some(name) = form_fields
        .get("name")
        .and_then(|raw| std::str::from_utf8(raw).ok())
        .filter(|name| !name.is_empty())
    {
        animation.name = name.to_owned();
        fields.insert("name".to_owned(), Value::String(name.to_owned()));
    }

    if let Some(wasm) = form_fields.remove("wasm") {
        match register_payload(&context, &id, wasm).await {
            Ok(true) => {}
            Ok(false) => return Ok(bad_request("invalid WASM payload")),
            Err(response) => return Ok(response),
        }
    }

    if let Err(error) = context.store.add_animation(&animation).await {
        error!(%error, id = %id, "failed to update in database");
        return Ok(as_fatal());
    }

    context.emitter.animation_updated(&id, Value::Object(fields));
    Ok(success())
}

async fn remove(id: String, context: Context) -> Result<Response, Rejection> {
    if context
        .actions
        .send(Action::RemoveAnimation { id: id.clone() })
        .await
        .is_err()
    {
        error!("action processor is gone");
        return Ok(as_fatal());
    }

    context.emitter.animation_removed(&id);
    Ok(success())
}

/// Push a payload through the pipeline and wait for the controller's verdict
async fn register_payload(
    context: &Context,
    id: &str,
    wasm: Vec<u8>,
) -> Result<bool, Response> {
    let (response, result) = oneshot::channel();

    if context
        .actions
        .send(Action::AddAnimation {
            id: id.to_owned(),
            wasm,
            response,
        })
        .await
        .is_err()
    {
        error!("action processor is gone");
        return Err(as_fatal());
    }

    result.await.map_err(|_| as_fatal())
}

/// Collect every part of a multipart form into named byte buffers
async fn read_form(form: FormData) -> Result<HashMap<String, Vec<u8>>, warp::Error> {
    form.try_fold(HashMap::new(), |mut fields, part| async move {
        let name = part.name().to_owned();
        let value = part
            .stream()
            .try_fold(Vec::new(), |mut value, content| async move {
                value.put(content);
                Ok(value)
            })
            .await?;

        fields.insert(name, value);
        Ok(fields)
    })
    .await
}
