use super::{keys, Store, StoreError};
use crate::models::{PartialSchedule, Schedule};

impl Store {
    /// All known schedules in their listing form, ordered by id
    pub async fn list_schedules(&self) -> Result<Vec<PartialSchedule>, StoreError> {
        self.list_records(keys::SCHEDULE_PREFIX).await
    }

    /// Insert or replace a schedule
    pub async fn add_schedule(&self, schedule: &Schedule) -> Result<(), StoreError> {
        let key = keys::entity(keys::SCHEDULE_PREFIX, &schedule.id);
        self.put_record(&key, schedule).await
    }

    pub async fn get_schedule(&self, id: &str) -> Result<Schedule, StoreError> {
        let key = keys::entity(keys::SCHEDULE_PREFIX, id);
        self.get_record(&key).await
    }

    pub async fn remove_schedule(&self, id: &str) -> Result<(), StoreError> {
        let key = keys::entity(keys::SCHEDULE_PREFIX, id);
        self.delete_raw(&key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Color;
    use crate::models::{generate_id, ScheduleRepeats, ScheduleType};

    fn schedule(name: &str) -> Schedule {
        Schedule {
            id: generate_id(),
            name: name.to_owned(),
            enabled: true,
            at: "06:30".to_owned(),
            repeats: ScheduleRepeats::MONDAY,
            ty: ScheduleType::Fill,
            color: Some(Color::new(0, 0, 255)),
            preset: None,
            animation: None,
        }
    }

    #[tokio::test]
    async fn crud_round_trip() {
        let store = Store::open_in_memory(4).await.unwrap();
        let schedule = schedule("sunrise");

        store.add_schedule(&schedule).await.unwrap();
        assert_eq!(store.get_schedule(&schedule.id).await.unwrap(), schedule);

        store.remove_schedule(&schedule.id).await.unwrap();
        assert!(matches!(
            store.get_schedule(&schedule.id).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn listing_decodes_partial_records() {
        let store = Store::open_in_memory(4).await.unwrap();
        let schedule = schedule("sunrise");

        store.add_schedule(&schedule).await.unwrap();

        let listed = store.list_schedules().await.unwrap();
        assert_eq!(listed, vec![schedule.as_partial()]);
    }
}
