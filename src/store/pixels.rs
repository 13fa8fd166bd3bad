use super::{keys, Store, StoreError};
use crate::color::Color;

impl Store {
    /// Materialise the full pixel buffer, reading absent pixels as black
    pub async fn pixels(&self) -> Result<Vec<Color>, StoreError> {
        let mut colors = vec![Color::BLACK; self.length as usize];

        for (index, slot) in colors.iter_mut().enumerate() {
            if let Some(raw) = self.get_raw(&keys::pixel(index as u16)).await? {
                *slot = Color::from_bytes(&raw)
                    .ok_or_else(|| StoreError::corrupt("pixel value is not 3 bytes"))?;
            }
        }

        Ok(colors)
    }

    pub async fn set_pixel(&self, index: u16, color: Color) -> Result<(), StoreError> {
        self.put_raw(&keys::pixel(index), &color.to_bytes()).await
    }

    /// Set a scattered set of pixels to the same color in one transaction
    pub async fn set_arbitrary_pixels(
        &self,
        indexes: &[u16],
        color: Color,
    ) -> Result<(), StoreError> {
        let encoded = color.to_bytes();

        let mut tx = self.pool.begin().await?;
        for &index in indexes {
            sqlx::query("INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)")
                .bind(&keys::pixel(index)[..])
                .bind(&encoded[..])
                .execute(&mut tx)
                .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    /// Replace the whole pixel buffer in one transaction
    pub async fn set_all_pixels(&self, colors: &[Color]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for (index, color) in colors.iter().enumerate() {
            sqlx::query("INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)")
                .bind(&keys::pixel(index as u16)[..])
                .bind(&color.to_bytes()[..])
                .execute(&mut tx)
                .await?;
        }
        tx.commit().await?;

        Ok(())
    }
}
