use serde::Deserialize;
use serde_json::{json, Map, Value};
use warp::reply::Response;
use warp::{Filter, Rejection};

use super::{as_fatal, authorize, bad_request, not_found, success, with, with_data, Context};
use crate::auth::Permission;
use crate::color::Color;
use crate::models::{generate_id, Preset};
use crate::store::StoreError;

pub(crate) fn routes(
    context: Context,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    let edit = authorize(context.validator.clone(), Permission::Edit);
    let collection = warp::path!("presets");
    let item = warp::path!("presets" / String);

    let list = collection
        .and(warp::get())
        .and(with(context.clone()))
        .and_then(list);
    let create = collection
        .and(warp::post())
        .and(edit.clone())
        .and(warp::body::json())
        .and(with(context.clone()))
        .and_then(create);
    let read = item
        .and(warp::get())
        .and(with(context.clone()))
        .and_then(read);
    let update = item
        .and(warp::patch())
        .and(edit.clone())
        .and(warp::body::json())
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

#[derive(Debug, Deserialize)]
struct CreatePreset {
    name: String,
    pixels: Vec<Color>,
    brightness: u8,
}

#[derive(Debug, Deserialize)]
struct UpdatePreset {
    name: Option<String>,
    pixels: Option<Vec<Color>>,
    brightness: Option<u8>,
}

async fn list(context: Context) -> Result<Response, Rejection> {
    match context.store.list_presets().await {
        Ok(presets) => Ok(with_data(&presets)),
        Err(error) => {
            error!(%error, "failed to list presets");
            Ok(as_fatal())
        }
    }
}

async fn read(id: String, context: Context) -> Result<Response, Rejection> {
    match context.store.get_preset(&id).await {
        Ok(preset) => Ok(with_data(&preset)),
        Err(StoreError::NotFound) => Ok(not_found()),
        Err(error) => {
            error!(%error, id = %id, "failed to read preset");
            Ok(as_fatal())
        }
    }
}

async fn create(body: CreatePreset, context: Context) -> Result<Response, Rejection> {
    if body.name.is_empty() {
        return Ok(bad_request("name must be present"));
    }
    if body.pixels.len() != context.store.length() as usize {
        return Ok(bad_request("mismatched pixel length"));
    }
    if body.brightness > 100 {
        return Ok(bad_request("brightness cannot exceed 100"));
    }

    let preset = Preset {
        id: generate_id(),
        name: body.name,
        pixels: body.pixels,
        brightness: body.brightness,
    };

    if let Err(error) = context.store.add_preset(&preset).await {
        error!(%error, name = %preset.name, "failed to insert into database");
        return Ok(as_fatal());
    }

    context.emitter.preset_created(&preset);
    Ok(success())
}

async fn update(id: String, body: UpdatePreset, context: Context) -> Result<Response, Rejection> {
    let mut preset = match context.store.get_preset(&id).await {
        Ok(preset) => preset,
        Err(StoreError::NotFound) => return Ok(not_found()),
        Err(error) => {
            error!(%error, id = %id, "failed to find preset");
            return Ok(as_fatal());
        }
    };

    // Track the changed fields for the update event
    let mut fields = Map::new();

    if let Some(name) = body.name {
        if name.is_empty() {
            return Ok(bad_request("name length must be greater than 0"));
        }

        fields.insert("name".to_owned(), Value::String(name.clone()));
        preset.name = name;
    }
    if let Some(pixels) = body.pixels {
        if pixels.len() != context.store.length() as usize {
            return Ok(bad_request("mismatched pixel length"));
        }

        fields.insert("pixels".to_owned(), json!(&pixels));
        preset.pixels = pixels;
    }
    if let Some(brightness) = body.brightness {
        if brightness > 100 {
            return Ok(bad_request("brightness cannot exceed 100"));
        }

        fields.insert("brightness".to_owned(), json!(brightness));
        preset.brightness = brightness;
    }

    if let Err(error) = context.store.add_preset(&preset).await {
        error!(%error, id = %id, "failed to update preset");
        return Ok(as_fatal());
    }

    context.emitter.preset_updated(&id, Value::Object(fields));
    Ok(success())
}

async fn remove(id: String, context: Context) -> Result<Response, Rejection> {
    if let Err(error) = context.store.remove_preset(&id).await {
        error!(%error, id = %id, "failed to delete preset");
        return Ok(as_fatal());
    }

    context.emitter.preset_removed(&id);
    Ok(success())
}
