use std::convert::TryFrom;

use super::{keys, Store, StoreError};
use crate::color::Color;
use crate::models::PixelMode;

impl Store {
    /// The last color the whole strip was filled with
    pub async fn color(&self) -> Result<Color, StoreError> {
        match self.get_raw(keys::COLOR).await? {
            Some(raw) => Color::from_bytes(&raw)
                .ok_or_else(|| StoreError::corrupt("color value is not 3 bytes")),
            None => Ok(Color::BLACK),
        }
    }

    /// Store the fill color, cascading it to every pixel so the pixel
    /// buffer stays consistent with fill mode
    pub async fn set_color(&self, color: Color) -> Result<(), StoreError> {
        let encoded = color.to_bytes();

        let mut tx = self.pool.begin().await?;
        for index in 0..self.length {
            sqlx::query("INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)")
                .bind(&keys::pixel(index)[..])
                .bind(&encoded[..])
                .execute(&mut tx)
                .await?;
        }
        sqlx::query("INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)")
            .bind(keys::COLOR)
            .bind(&encoded[..])
            .execute(&mut tx)
            .await?;
        tx.commit().await?;

        Ok(())
    }

    /// The current brightness of the strip, defaulting to full
    pub async fn brightness(&self) -> Result<u8, StoreError> {
        match self.get_raw(keys::BRIGHTNESS).await? {
            Some(raw) if raw.len() == 1 => Ok(raw[0]),
            Some(_) => Err(StoreError::corrupt("brightness value is not 1 byte")),
            None => Ok(100),
        }
    }

    pub async fn set_brightness(&self, brightness: u8) -> Result<(), StoreError> {
        self.put_raw(keys::BRIGHTNESS, &[brightness]).await
    }

    /// Whether the strip is currently on
    pub async fn power(&self) -> Result<bool, StoreError> {
        match self.get_raw(keys::STATE).await? {
            Some(raw) if raw.len() == 1 => Ok(raw[0] == 1),
            Some(_) => Err(StoreError::corrupt("state value is not 1 byte")),
            None => Ok(false),
        }
    }

    pub async fn set_power(&self, on: bool) -> Result<(), StoreError> {
        self.put_raw(keys::STATE, &[on as u8]).await
    }

    /// The current display mode, defaulting to fill
    pub async fn pixel_mode(&self) -> Result<PixelMode, StoreError> {
        match self.get_raw(keys::PIXEL_MODE).await? {
            Some(raw) if raw.len() == 1 => PixelMode::try_from(raw[0])
                .map_err(|value| StoreError::corrupt(format!("unknown pixel mode {}", value))),
            Some(_) => Err(StoreError::corrupt("pixel mode value is not 1 byte")),
            None => Ok(PixelMode::Fill),
        }
    }

    pub async fn set_pixel_mode(&self, mode: PixelMode) -> Result<(), StoreError> {
        self.put_raw(keys::PIXEL_MODE, &[mode as u8]).await
    }

    /// Id of the running animation, empty when none is active
    pub async fn current_animation(&self) -> Result<String, StoreError> {
        match self.get_raw(keys::CURRENT_ANIMATION).await? {
            Some(raw) => {
                String::from_utf8(raw).map_err(|_| StoreError::corrupt("animation id is not UTF-8"))
            }
            None => Ok(String::new()),
        }
    }

    pub async fn set_current_animation(&self, id: &str) -> Result<(), StoreError> {
        self.put_raw(keys::CURRENT_ANIMATION, id.as_bytes()).await
    }
}
