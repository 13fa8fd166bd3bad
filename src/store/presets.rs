use super::{keys, Store, StoreError};
use crate::models::{PartialPreset, Preset};

impl Store {
    /// All known presets in their listing form, ordered by id
    pub async fn list_presets(&self) -> Result<Vec<PartialPreset>, StoreError> {
        self.list_records(keys::PRESET_PREFIX).await
    }

    /// Insert or replace a preset
    pub async fn add_preset(&self, preset: &Preset) -> Result<(), StoreError> {
        let key = keys::entity(keys::PRESET_PREFIX, &preset.id);
        self.put_record(&key, preset).await
    }

    pub async fn get_preset(&self, id: &str) -> Result<Preset, StoreError> {
        let key = keys::entity(keys::PRESET_PREFIX, id);
        self.get_record(&key).await
    }

    pub async fn remove_preset(&self, id: &str) -> Result<(), StoreError> {
        let key = keys::entity(keys::PRESET_PREFIX, id);
        self.delete_raw(&key).await
    }
}
