use serde::Deserialize;
use serde_json::{json, Map, Value};
use warp::reply::Response;
use warp::{Filter, Rejection};

use super::{as_fatal, authorize, bad_request, not_found, success, with, with_data, Context};
use crate::auth::Permission;
use crate::color::Color;
use crate::models::{generate_id, Schedule, ScheduleRepeats, ScheduleType};
use crate::scheduler::SchedulerError;
use crate::store::StoreError;

pub(crate) fn routes(
    context: Context,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    let edit = authorize(context.validator.clone(), Permission::Edit);
    let collection = warp::path!("schedules");
    let item = warp::path!("schedules" / String);
    let toggle_item = warp::path!("schedules" / String / "toggle");

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
        .and(edit.clone())
        .and(with(context.clone()))
        .and_then(remove);
    let toggle = toggle_item
        .and(warp::put())
        .and(edit)
        .and(with(context))
        .and_then(toggle);

    list.or(create)
        .unify()
        .or(toggle)
        .unify()
        .or(read)
        .unify()
        .or(update)
        .unify()
        .or(remove)
        .unify()
}

#[derive(Debug, Deserialize)]
struct CreateSchedule {
    name: String,
    at: String,
    #[serde(default)]
    repeats: ScheduleRepeats,
    #[serde(rename = "type")]
    ty: ScheduleType,
    color: Option<Color>,
    preset: Option<String>,
    animation: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateSchedule {
    name: Option<String>,
    at: Option<String>,
    enabled: Option<bool>,
    repeats: Option<ScheduleRepeats>,
    #[serde(rename = "type")]
    ty: Option<ScheduleType>,
    color: Option<Color>,
    preset: Option<String>,
    animation: Option<String>,
}

async fn list(context: Context) -> Result<Response, Rejection> {
    match context.store.list_schedules().await {
        Ok(schedules) => Ok(with_data(&schedules)),
        Err(error) => {
            error!(%error, "failed to list schedules");
            Ok(as_fatal())
        }
    }
}

async fn read(id: String, context: Context) -> Result<Response, Rejection> {
    match context.store.get_schedule(&id).await {
        Ok(schedule) => Ok(with_data(&schedule)),
        Err(StoreError::NotFound) => Ok(not_found()),
        Err(error) => {
            error!(%error, id = %id, "failed to read schedule");
            Ok(as_fatal())
        }
    }
}

async fn create(body: CreateSchedule, context: Context) -> Result<Response, Rejection> {
    if body.name.is_empty() {
        return Ok(bad_request("name must be present"));
    }

    // Normalise the payload so only the slot matching the type survives
    let mut schedule = Schedule {
        id: generate_id(),
        name: body.name,
        enabled: true,
        at: body.at,
        repeats: body.repeats,
        ty: body.ty,
        color: body.color,
        preset: body.preset,
        animation: body.animation,
    };

    match schedule.ty {
        ScheduleType::Fill => {
            if schedule.color.is_none() {
                return Ok(bad_request("invalid request fields"));
            }
            schedule.preset = None;
            schedule.animation = None;
        }
        ScheduleType::Preset => {
            schedule.color = None;
            schedule.animation = None;

            let preset = match &schedule.preset {
                Some(preset) => preset,
                None => return Ok(bad_request("invalid request fields")),
            };
            match context.store.get_preset(preset).await {
                Ok(_) => {}
                Err(StoreError::NotFound) => return Ok(bad_request("preset not found")),
                Err(error) => {
                    error!(%error, preset = %preset, "failed to check existence of preset");
                    return Ok(as_fatal());
                }
            }
        }
        ScheduleType::Animation => {
            schedule.color = None;
            schedule.preset = None;

            let animation = match &schedule.animation {
                Some(animation) => animation,
                None => return Ok(bad_request("invalid request fields")),
            };
            match context.store.get_animation(animation).await {
                Ok(_) => {}
                Err(StoreError::NotFound) => return Ok(bad_request("animation not found")),
                Err(error) => {
                    error!(%error, animation = %animation, "failed to check existence of animation");
                    return Ok(as_fatal());
                }
            }
        }
    }

    // Register the job before committing; the time is validated here too
    match context
        .scheduler
        .add(&schedule.id, &schedule.at, schedule.repeats)
    {
        Ok(()) => {}
        Err(SchedulerError::InvalidTime(_)) => {
            return Ok(bad_request("time format must match 'hh:mm'"))
        }
        Err(error) => {
            error!(%error, "failed to register schedule");
            return Ok(as_fatal());
        }
    }

    if let Err(error) = context.store.add_schedule(&schedule).await {
        context.scheduler.remove(&schedule.id);
        error!(%error, "failed to insert into database");
        return Ok(as_fatal());
    }

    context.emitter.schedule_created(&schedule);
    Ok(success())
}

async fn update(id: String, body: UpdateSchedule, context: Context) -> Result<Response, Rejection> {
    let mut schedule = match context.store.get_schedule(&id).await {
        Ok(schedule) => schedule,
        Err(StoreError::NotFound) => return Ok(not_found()),
        Err(error) => {
            error!(%error, id = %id, "failed to get schedule");
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
        schedule.name = name;
    }
    if let Some(enabled) = body.enabled {
        fields.insert("enabled".to_owned(), Value::Bool(enabled));
        schedule.enabled = enabled;
    }
    let at_changed = if let Some(at) = body.at {
        if crate::scheduler::parse_at(&at).is_err() {
            return Ok(bad_request("time format must match 'hh:mm'"));
        }

        fields.insert("at".to_owned(), Value::String(at.clone()));
        schedule.at = at;
        true
    } else {
        false
    };
    let repeats_changed = if let Some(repeats) = body.repeats {
        fields.insert("repeats".to_owned(), json!(repeats));
        schedule.repeats = repeats;
        true
    } else {
        false
    };

    if let Some(ty) = body.ty {
        match ty {
            ScheduleType::Fill => {
                schedule.preset = None;
                schedule.animation = None;
            }
            ScheduleType::Preset => {
                schedule.color = None;
                schedule.animation = None;
            }
            ScheduleType::Animation => {
                schedule.color = None;
                schedule.preset = None;
            }
        }

        fields.insert("type".to_owned(), json!(ty));
        schedule.ty = ty;
    }

    // The slot matching the (possibly new) type must end up populated
    match schedule.ty {
        ScheduleType::Fill => {
            if let Some(color) = body.color {
                fields.insert("color".to_owned(), json!(color));
                schedule.color = Some(color);
            } else if schedule.color.is_none() {
                return Ok(bad_request("missing required field 'color'"));
            }
        }
        ScheduleType::Preset => {
            if let Some(preset) = body.preset {
                match context.store.get_preset(&preset).await {
                    Ok(_) => {}
                    Err(StoreError::NotFound) => return Ok(bad_request("preset not found")),
                    Err(error) => {
                        error!(%error, "failed to check existence of preset");
                        return Ok(as_fatal());
                    }
                }

                fields.insert("preset".to_owned(), Value::String(preset.clone()));
                schedule.preset = Some(preset);
            } else if schedule.preset.is_none() {
                return Ok(bad_request("missing required field 'preset'"));
            }
        }
        ScheduleType::Animation => {
            if let Some(animation) = body.animation {
                match context.store.get_animation(&animation).await {
                    Ok(_) => {}
                    Err(StoreError::NotFound) => return Ok(bad_request("animation not found")),
                    Err(error) => {
                        error!(%error, "failed to check existence of animation");
                        return Ok(as_fatal());
                    }
                }

                fields.insert("animation".to_owned(), Value::String(animation.clone()));
                schedule.animation = Some(animation);
            } else if schedule.animation.is_none() {
                return Ok(bad_request("missing required field 'animation'"));
            }
        }
    }

    // Keep the engine in sync with the stored record
    if schedule.enabled && (at_changed || repeats_changed) {
        context.scheduler.remove(&id);
        if let Err(error) = context.scheduler.add(&id, &schedule.at, schedule.repeats) {
            error!(%error, id = %id, "failed to update job");
            return Ok(as_fatal());
        }
    } else if schedule.enabled {
        if !context.scheduler.is_scheduled(&id) {
            if let Err(error) = context.scheduler.add(&id, &schedule.at, schedule.repeats) {
                error!(%error, id = %id, "failed to schedule job");
                return Ok(as_fatal());
            }
        }
    } else {
        context.scheduler.remove(&id);
    }

    if let Err(error) = context.store.add_schedule(&schedule).await {
        error!(%error, id = %id, "failed to update schedule");
        return Ok(as_fatal());
    }

    context.emitter.schedule_updated(&id, Value::Object(fields));
    Ok(success())
}

/// Flip the enabled state, starting or stopping the job to match
async fn toggle(id: String, context: Context) -> Result<Response, Rejection> {
    let mut schedule = match context.store.get_schedule(&id).await {
        Ok(schedule) => schedule,
        Err(StoreError::NotFound) => return Ok(not_found()),
        Err(error) => {
            error!(%error, id = %id, "failed to get schedule");
            return Ok(as_fatal());
        }
    };

    schedule.enabled = !schedule.enabled;

    if schedule.enabled {
        if let Err(error) = context.scheduler.add(&id, &schedule.at, schedule.repeats) {
            error!(%error, id = %id, "failed to schedule job");
            return Ok(as_fatal());
        }
    } else {
        context.scheduler.remove(&id);
    }

    if let Err(error) = context.store.add_schedule(&schedule).await {
        error!(%error, id = %id, "failed to update schedule");
        return Ok(as_fatal());
    }

    context
        .emitter
        .schedule_updated(&id, json!({ "enabled": schedule.enabled }));
    Ok(success())
}

async fn remove(id: String, context: Context) -> Result<Response, Rejection> {
    context.scheduler.remove(&id);

    if let Err(error) = context.store.remove_schedule(&id).await {
        error!(%error, id = %id, "failed to delete schedule");
        return Ok(as_fatal());
    }

    context.emitter.schedule_removed(&id);
    Ok(success())
}
