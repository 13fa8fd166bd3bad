use serde::{Deserialize, Serialize};

/// A 24-bit RGB color as it appears on the wire and in the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color {
    #[serde(rename = "r")]
    pub red: u8,
    #[serde(rename = "g")]
    pub green: u8,
    #[serde(rename = "b")]
    pub blue: u8,
}

impl Color {
    pub const BLACK: Color = Color {
        red: 0,
        green: 0,
        blue: 0,
    };

    pub fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }

    /// Encode as the 3-byte `r,g,b` representation used by the store
    pub fn to_bytes(self) -> [u8; 3] {
        [self.red, self.green, self.blue]
    }

    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        if raw.len() != 3 {
            return None;
        }

        Some(Self {
            red: raw[0],
            green: raw[1],
            blue: raw[2],
        })
    }
}

impl std::fmt::Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.red, self.green, self.blue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_round_trip() {
        let color = Color::new(10, 20, 30);
        assert_eq!(color.to_bytes(), [10, 20, 30]);
        assert_eq!(Color::from_bytes(&[10, 20, 30]), Some(color));
    }

    #[test]
    fn rejects_invalid_length() {
        assert_eq!(Color::from_bytes(&[1, 2]), None);
        assert_eq!(Color::from_bytes(&[1, 2, 3, 4]), None);
    }

    #[test]
    fn wire_field_names() {
        let encoded = serde_json::to_string(&Color::new(1, 2, 3)).unwrap();
        assert_eq!(encoded, r#"{"r":1,"g":2,"b":3}"#);
    }
}
