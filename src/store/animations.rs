use super::{keys, Store, StoreError};
use crate::models::Animation;

impl Store {
    /// All known animations, ordered by id
    pub async fn list_animations(&self) -> Result<Vec<Animation>, StoreError> {
        self.list_records(keys::ANIMATION_PREFIX).await
    }

    /// Insert or replace an animation's metadata
    pub async fn add_animation(&self, animation: &Animation) -> Result<(), StoreError> {
        let key = keys::entity(keys::ANIMATION_PREFIX, &animation.id);
        self.put_record(&key, animation).await
    }

    pub async fn get_animation(&self, id: &str) -> Result<Animation, StoreError> {
        let key = keys::entity(keys::ANIMATION_PREFIX, id);
        self.get_record(&key).await
    }

    pub async fn remove_animation(&self, id: &str) -> Result<(), StoreError> {
        let key = keys::entity(keys::ANIMATION_PREFIX, id);
        self.delete_raw(&key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn crud_round_trip() {
        let store = Store::open_in_memory(4).await.unwrap();
        let animation = Animation::new("rainbow".to_owned());

        store.add_animation(&animation).await.unwrap();
        assert_eq!(store.get_animation(&animation.id).await.unwrap(), animation);

        store.remove_animation(&animation.id).await.unwrap();
        assert!(matches!(
            store.get_animation(&animation.id).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn listing_only_returns_animations() {
        let store = Store::open_in_memory(4).await.unwrap();
        let first = Animation {
            id: "aaaa1111".to_owned(),
            name: "first".to_owned(),
        };
        let second = Animation {
            id: "bbbb2222".to_owned(),
            name: "second".to_owned(),
        };

        store.add_animation(&second).await.unwrap();
        store.add_animation(&first).await.unwrap();
        store.set_current_animation("aaaa1111").await.unwrap();

        assert_eq!(store.list_animations().await.unwrap(), vec![first, second]);
    }
}
