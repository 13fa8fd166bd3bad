use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveTime, TimeZone};
use chrono_tz::Tz;
use thiserror::Error;
use tokio::select;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::actions::Action;
use crate::hub::{Egress, Hub};
use crate::models::{ScheduleRepeats, ScheduleType};
use crate::store::{Store, StoreError};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("unknown timezone: {0}")]
    UnknownTimezone(String),
    #[error("invalid time '{0}', expected 'hh:mm'")]
    InvalidTime(String),
    #[error("schedule '{0}' is already registered")]
    AlreadyScheduled(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Fires stored schedules at wall-clock moments in the configured timezone.
///
/// Jobs feed the same action queue and broadcast channel as everything
/// else; the engine itself owns nothing but the job registry.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    timezone: Tz,
    store: Store,
    actions: mpsc::Sender<Action>,
    hub: Hub,
    jobs: Mutex<HashMap<String, CancellationToken>>,
    shutdown: CancellationToken,
}

impl Scheduler {
    /// Create a new scheduler bound to the given IANA timezone
    pub fn new(
        timezone: &str,
        store: Store,
        actions: mpsc::Sender<Action>,
        hub: Hub,
        shutdown: CancellationToken,
    ) -> Result<Scheduler, SchedulerError> {
        let timezone: Tz = timezone
            .parse()
            .map_err(|_| SchedulerError::UnknownTimezone(timezone.to_owned()))?;

        info!(timezone = %timezone, "started scheduler");

        Ok(Scheduler {
            inner: Arc::new(Inner {
                timezone,
                store,
                actions,
                hub,
                jobs: Mutex::new(HashMap::new()),
                shutdown,
            }),
        })
    }

    /// Register a job for the schedule.
    ///
    /// Registering an id that already has a job is a logic error and is
    /// reported as such.
    pub fn add(&self, id: &str, at: &str, repeats: ScheduleRepeats) -> Result<(), SchedulerError> {
        let at = parse_at(at)?;

        let token = {
            let mut jobs = self.inner.jobs.lock().unwrap();
            if jobs.contains_key(id) {
                return Err(SchedulerError::AlreadyScheduled(id.to_owned()));
            }

            let token = self.inner.shutdown.child_token();
            jobs.insert(id.to_owned(), token.clone());
            token
        };

        debug!(schedule = %id, "registered job");
        tokio::spawn(run_job(self.inner.clone(), id.to_owned(), at, repeats, token));

        Ok(())
    }

    /// Cancel the job for the schedule; a no-op when none is registered
    pub fn remove(&self, id: &str) {
        if let Some(token) = self.inner.jobs.lock().unwrap().remove(id) {
            token.cancel();
            debug!(schedule = %id, "removed job");
        }
    }

    /// Whether a job is currently registered for the schedule
    pub fn is_scheduled(&self, id: &str) -> bool {
        self.inner.jobs.lock().unwrap().contains_key(id)
    }

    /// Register every enabled schedule present in the store
    pub async fn load_from_store(&self) -> Result<(), SchedulerError> {
        let schedules = self.inner.store.list_schedules().await?;
        let count = schedules.len();

        for schedule in schedules {
            if !schedule.enabled {
                continue;
            }

            self.add(&schedule.id, &schedule.at, schedule.repeats)?;
        }

        info!(count, "loaded all schedules");

        Ok(())
    }
}

/// Strictly parse a 24-hour `hh:mm` time of day
pub(crate) fn parse_at(at: &str) -> Result<NaiveTime, SchedulerError> {
    if at.len() != 5 {
        return Err(SchedulerError::InvalidTime(at.to_owned()));
    }

    NaiveTime::parse_from_str(at, "%H:%M").map_err(|_| SchedulerError::InvalidTime(at.to_owned()))
}

/// The next moment the job should fire, strictly after `now`.
///
/// An empty repeats mask matches any day; otherwise only the days whose
/// bits are set. A time that falls into a DST gap resolves to the same
/// wall-clock time shifted an hour past the gap.
fn next_occurrence(
    now: DateTime<Tz>,
    at: NaiveTime,
    repeats: ScheduleRepeats,
) -> Option<DateTime<Tz>> {
    let timezone = now.timezone();

    for day_offset in 0..=7 {
        let date = (now.date_naive() + ChronoDuration::days(day_offset)).and_time(at);

        if !repeats.is_once() && !repeats.contains(date.weekday()) {
            continue;
        }

        let candidate = match timezone.from_local_datetime(&date) {
            chrono::LocalResult::Single(datetime) => datetime,
            chrono::LocalResult::Ambiguous(earliest, _) => earliest,
            chrono::LocalResult::None => {
                match timezone.from_local_datetime(&(date + ChronoDuration::hours(1))) {
                    chrono::LocalResult::Single(datetime) => datetime,
                    chrono::LocalResult::Ambiguous(earliest, _) => earliest,
                    chrono::LocalResult::None => continue,
                }
            }
        };

        if candidate > now {
            return Some(candidate);
        }
    }

    None
}

/// Job loop: sleep until the next occurrence, fire, repeat or retire
async fn run_job(
    inner: Arc<Inner>,
    id: String,
    at: NaiveTime,
    repeats: ScheduleRepeats,
    cancelled: CancellationToken,
) {
    loop {
        let now = chrono::Utc::now().with_timezone(&inner.timezone);
        let next = match next_occurrence(now, at, repeats) {
            Some(next) => next,
            None => {
                warn!(schedule = %id, "no upcoming occurrence");
                break;
            }
        };

        let wait = (next - now).to_std().unwrap_or_default();
        debug!(schedule = %id, next = %next, "job sleeping");

        select! {
            _ = cancelled.cancelled() => return,
            _ = tokio::time::sleep(wait) => {}
        }

        fire(&inner, &id).await;

        if repeats.is_once() {
            // One-shot schedules disable themselves after running
            if let Err(error) = disable_schedule(&inner.store, &id).await {
                error!(schedule = %id, %error, "failed to disable schedule");
            }
            inner.jobs.lock().unwrap().remove(&id);
            break;
        }
    }
}

/// Execute a schedule by re-reading it and dispatching on its type.
///
/// The schedule may have been deleted or changed since the job was
/// registered, so the stored record is authoritative.
async fn fire(inner: &Inner, id: &str) {
    let schedule = match inner.store.get_schedule(id).await {
        Ok(schedule) => schedule,
        Err(StoreError::NotFound) => {
            warn!(schedule = %id, "schedule no longer exists");
            return;
        }
        Err(error) => {
            error!(schedule = %id, %error, "failed to get schedule");
            return;
        }
    };

    match schedule.ty {
        ScheduleType::Fill => {
            let color = match schedule.color {
                Some(color) => color,
                None => {
                    warn!(schedule = %id, "schedule has no color");
                    return;
                }
            };

            let _ = inner.actions.send(Action::ChangeColor { color }).await;
            inner
                .hub
                .broadcast(Egress::filled_pixels(color, inner.store.length()))
                .await;
        }

        ScheduleType::Preset => {
            let preset_id = match &schedule.preset {
                Some(preset_id) => preset_id,
                None => {
                    warn!(schedule = %id, "schedule has no preset");
                    return;
                }
            };

            let preset = match inner.store.get_preset(preset_id).await {
                Ok(preset) => preset,
                Err(StoreError::NotFound) => {
                    warn!(schedule = %id, preset = %preset_id, "preset no longer exists");
                    return;
                }
                Err(error) => {
                    error!(schedule = %id, preset = %preset_id, %error, "failed to get preset");
                    return;
                }
            };

            let brightness = preset.brightness;
            let broadcast = Egress::PresetUsed {
                id: preset.id.clone(),
                pixels: preset.pixels.clone(),
            };

            let _ = inner.actions.send(Action::ApplyPreset { preset }).await;
            inner.hub.broadcast(broadcast).await;
            inner.hub.broadcast(Egress::Brightness(brightness)).await;
        }

        ScheduleType::Animation => {
            let animation = match &schedule.animation {
                Some(animation) => animation.clone(),
                None => {
                    warn!(schedule = %id, "schedule has no animation");
                    return;
                }
            };

            let _ = inner
                .actions
                .send(Action::StartAnimation {
                    id: animation.clone(),
                })
                .await;
            inner.hub.broadcast(Egress::AnimationStarted(animation)).await;
        }
    }

    debug!(schedule = %id, "execution finished");
}

/// Mark a schedule as disabled after its final run
async fn disable_schedule(store: &Store, id: &str) -> Result<(), StoreError> {
    let mut schedule = store.get_schedule(id).await?;
    schedule.enabled = false;
    store.add_schedule(&schedule).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Color;
    use crate::models::{generate_id, Schedule};

    fn los_angeles(
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        minute: u32,
    ) -> DateTime<Tz> {
        chrono_tz::America::Los_Angeles
            .with_ymd_and_hms(year, month, day, hour, minute, 0)
            .unwrap()
    }

    #[test]
    fn at_must_match_the_format() {
        assert!(parse_at("06:30").is_ok());
        assert!(parse_at("23:59").is_ok());
        assert!(parse_at("6:30").is_err());
        assert!(parse_at("24:00").is_err());
        assert!(parse_at("06:60").is_err());
        assert!(parse_at("0630").is_err());
        assert!(parse_at("morning").is_err());
    }

    #[test]
    fn one_shot_fires_at_the_next_occurrence() {
        let at = NaiveTime::from_hms_opt(6, 30, 0).unwrap();

        // Before the time of day: fires the same day
        let now = los_angeles(2022, 3, 5, 5, 0);
        let next = next_occurrence(now, at, ScheduleRepeats::default()).unwrap();
        assert_eq!(next, los_angeles(2022, 3, 5, 6, 30));

        // After the time of day: fires tomorrow
        let now = los_angeles(2022, 3, 5, 10, 0);
        let next = next_occurrence(now, at, ScheduleRepeats::default()).unwrap();
        assert_eq!(next, los_angeles(2022, 3, 6, 6, 30));
    }

    #[test]
    fn weekday_mask_skips_to_the_next_set_day() {
        let at = NaiveTime::from_hms_opt(6, 30, 0).unwrap();
        let weekdays = ScheduleRepeats::MONDAY
            | ScheduleRepeats::TUESDAY
            | ScheduleRepeats::WEDNESDAY
            | ScheduleRepeats::THURSDAY
            | ScheduleRepeats::FRIDAY;

        // Saturday morning rolls over to Monday
        let now = los_angeles(2022, 3, 5, 5, 0);
        let next = next_occurrence(now, at, weekdays).unwrap();
        assert_eq!(next, los_angeles(2022, 3, 7, 6, 30));

        // Monday before the time fires the same day
        let now = los_angeles(2022, 3, 7, 5, 0);
        let next = next_occurrence(now, at, weekdays).unwrap();
        assert_eq!(next, los_angeles(2022, 3, 7, 6, 30));

        // Monday after the time fires on Tuesday
        let now = los_angeles(2022, 3, 7, 10, 0);
        let next = next_occurrence(now, at, weekdays).unwrap();
        assert_eq!(next, los_angeles(2022, 3, 8, 6, 30));
    }

    #[test]
    fn dst_gap_shifts_past_the_missing_hour() {
        // 02:30 on 2022-03-13 does not exist in America/Los_Angeles
        let at = NaiveTime::from_hms_opt(2, 30, 0).unwrap();
        let now = los_angeles(2022, 3, 13, 0, 0);

        let next = next_occurrence(now, at, ScheduleRepeats::default()).unwrap();
        assert_eq!(next, los_angeles(2022, 3, 13, 3, 30));
    }

    async fn scheduler() -> (Scheduler, Store) {
        let store = Store::open_in_memory(4).await.unwrap();
        let shutdown = CancellationToken::new();
        let hub = Hub::new(shutdown.clone());
        let (actions, _actions_rx) = mpsc::channel(16);

        let scheduler = Scheduler::new(
            "America/Los_Angeles",
            store.clone(),
            actions,
            hub,
            shutdown,
        )
        .unwrap();

        (scheduler, store)
    }

    #[tokio::test]
    async fn registry_membership() {
        let (scheduler, _store) = scheduler().await;

        assert!(!scheduler.is_scheduled("s1"));
        scheduler.add("s1", "06:30", ScheduleRepeats::MONDAY).unwrap();
        assert!(scheduler.is_scheduled("s1"));

        scheduler.remove("s1");
        assert!(!scheduler.is_scheduled("s1"));

        // Removing an unknown id is a no-op
        scheduler.remove("missing");
    }

    #[tokio::test]
    async fn duplicate_registration_is_an_error() {
        let (scheduler, _store) = scheduler().await;

        scheduler.add("s1", "06:30", ScheduleRepeats::MONDAY).unwrap();
        assert!(matches!(
            scheduler.add("s1", "06:30", ScheduleRepeats::MONDAY),
            Err(SchedulerError::AlreadyScheduled(_))
        ));
    }

    #[tokio::test]
    async fn unknown_timezone_is_rejected() {
        let store = Store::open_in_memory(4).await.unwrap();
        let shutdown = CancellationToken::new();
        let hub = Hub::new(shutdown.clone());
        let (actions, _actions_rx) = mpsc::channel(16);

        assert!(matches!(
            Scheduler::new("Mars/Olympus_Mons", store, actions, hub, shutdown),
            Err(SchedulerError::UnknownTimezone(_))
        ));
    }

    #[tokio::test]
    async fn load_registers_only_enabled_schedules() {
        let (scheduler, store) = scheduler().await;

        let enabled = Schedule {
            id: generate_id(),
            name: "on".to_owned(),
            enabled: true,
            at: "06:30".to_owned(),
            repeats: ScheduleRepeats::MONDAY,
            ty: ScheduleType::Fill,
            color: Some(Color::new(0, 0, 255)),
            preset: None,
            animation: None,
        };
        let disabled = Schedule {
            id: generate_id(),
            enabled: false,
            ..enabled.clone()
        };

        store.add_schedule(&enabled).await.unwrap();
        store.add_schedule(&disabled).await.unwrap();

        scheduler.load_from_store().await.unwrap();

        assert!(scheduler.is_scheduled(&enabled.id));
        assert!(!scheduler.is_scheduled(&disabled.id));
    }
}
