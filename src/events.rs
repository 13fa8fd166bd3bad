use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::models::{Animation, Preset, Schedule};

const EVENT_CREATED: &str = "created";
const EVENT_UPDATED: &str = "updated";
const EVENT_REMOVED: &str = "removed";

/// Capacity of each stream; lagging subscribers skip missed events
const STREAM_BUFFER: usize = 16;

/// A single server-sent event ready for the wire
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub name: &'static str,
    pub data: String,
}

/// Push-only delta streams for the CRUD entities.
///
/// Handlers publish after their store commit; delivery is at most once per
/// connected subscriber and nothing is persisted.
#[derive(Clone)]
pub struct Emitter {
    animation: broadcast::Sender<Event>,
    preset: broadcast::Sender<Event>,
    schedule: broadcast::Sender<Event>,
}

impl Emitter {
    pub fn new() -> Emitter {
        let (animation, _) = broadcast::channel(STREAM_BUFFER);
        let (preset, _) = broadcast::channel(STREAM_BUFFER);
        let (schedule, _) = broadcast::channel(STREAM_BUFFER);

        Emitter {
            animation,
            preset,
            schedule,
        }
    }

    /// Subscribe to a stream by its public name
    pub fn subscribe(&self, stream: &str) -> Option<broadcast::Receiver<Event>> {
        match stream {
            "animation" => Some(self.animation.subscribe()),
            "preset" => Some(self.preset.subscribe()),
            "schedule" => Some(self.schedule.subscribe()),
            _ => None,
        }
    }

    pub fn animation_created(&self, animation: &Animation) {
        publish(&self.animation, EVENT_CREATED, animation);
    }

    pub fn animation_updated(&self, id: &str, fields: Value) {
        publish_update(&self.animation, id, fields);
    }

    pub fn animation_removed(&self, id: &str) {
        publish(&self.animation, EVENT_REMOVED, &json!({ "id": id }));
    }

    pub fn preset_created(&self, preset: &Preset) {
        publish(&self.preset, EVENT_CREATED, &preset.as_partial());
    }

    pub fn preset_updated(&self, id: &str, fields: Value) {
        publish_update(&self.preset, id, fields);
    }

    pub fn preset_removed(&self, id: &str) {
        publish(&self.preset, EVENT_REMOVED, &json!({ "id": id }));
    }

    pub fn schedule_created(&self, schedule: &Schedule) {
        publish(&self.schedule, EVENT_CREATED, &schedule.as_partial());
    }

    pub fn schedule_updated(&self, id: &str, fields: Value) {
        publish_update(&self.schedule, id, fields);
    }

    pub fn schedule_removed(&self, id: &str) {
        publish(&self.schedule, EVENT_REMOVED, &json!({ "id": id }));
    }
}

impl Default for Emitter {
    fn default() -> Self {
        Self::new()
    }
}

fn publish<T: Serialize>(stream: &broadcast::Sender<Event>, name: &'static str, data: &T) {
    let data = match serde_json::to_string(data) {
        Ok(data) => data,
        Err(error) => {
            error!(%error, event = name, "failed to encode event data");
            return;
        }
    };

    // Send only fails when nobody is listening
    let _ = stream.send(Event { name, data });
}

/// Update events carry the changed fields plus the entity id
fn publish_update(stream: &broadcast::Sender<Event>, id: &str, mut fields: Value) {
    if let Some(object) = fields.as_object_mut() {
        object.insert("id".to_owned(), Value::String(id.to_owned()));
    }

    publish(stream, EVENT_UPDATED, &fields);
}
