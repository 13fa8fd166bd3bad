//! Wire format of the realtime connection
//!
//! Every frame is a JSON object `{"type": "...", "payload": ...}`. Types
//! prefixed with `server/` flow from clients to the service; everything
//! else is fanned out to clients.

use serde::{Deserialize, Serialize};

use crate::color::Color;

/// Frames received from clients
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Ingress {
    /// Authenticate the session and elevate its permissions
    #[serde(rename = "server/authentication/login")]
    Login(String),
    /// Drop the session's permissions
    #[serde(rename = "server/authentication/logout")]
    Logout,
    /// Fill the entire strip with one color
    #[serde(rename = "server/display/setColor")]
    SetColor(Color),
    /// Turn the strip on at the last brightness
    #[serde(rename = "server/strip/on")]
    StateOn,
    /// Turn the strip off
    #[serde(rename = "server/strip/off")]
    StateOff,
    /// Change the strip brightness
    #[serde(rename = "server/strip/setBrightness")]
    SetBrightness(u8),
    /// Set a scattered set of pixels to one color
    #[serde(rename = "server/display/setArbitraryPixels")]
    SetArbitraryPixels { indexes: Vec<u16>, color: Color },
    /// Display a stored preset
    #[serde(rename = "server/display/applyPreset")]
    ApplyPreset(String),
    /// Start a stored animation
    #[serde(rename = "server/display/startAnimation")]
    StartAnimation(String),
    /// Stop the running animation
    #[serde(rename = "server/display/stopAnimation")]
    StopAnimation,
}

/// Frames sent to clients
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum Egress {
    /// The permissions the session currently holds
    #[serde(rename = "authentication/setPermissions")]
    Permissions(Vec<String>),
    /// The configured pixel count of the strip
    #[serde(rename = "strip/setLength")]
    Length(u16),
    /// Whether the strip is on
    #[serde(rename = "strip/setState")]
    State(bool),
    /// The current brightness
    #[serde(rename = "strip/setBrightness")]
    Brightness(u8),
    /// Individual pixels changed to one color
    #[serde(rename = "display/setPixelsByIndex")]
    PixelsByIndex { indexes: Vec<u16>, color: Color },
    /// The full pixel buffer; `fill` marks a whole-strip color
    #[serde(rename = "display/setAllPixels")]
    AllPixels { fill: bool, pixels: Vec<Color> },
    /// A preset was applied to the strip
    #[serde(rename = "display/setPreset")]
    PresetUsed { id: String, pixels: Vec<Color> },
    /// An animation is now running
    #[serde(rename = "display/startAnimation")]
    AnimationStarted(String),
    /// The running animation was stopped
    #[serde(rename = "display/stopAnimation")]
    AnimationStopped,
    /// The command needs a permission the session does not hold
    #[serde(rename = "error/permissions")]
    PermissionsError(String),
    /// A referenced entity does not exist
    #[serde(rename = "error/notFound")]
    NotFound(String),
}

impl Egress {
    /// The whole strip set to a single color
    pub fn filled_pixels(color: Color, length: u16) -> Egress {
        Egress::AllPixels {
            fill: true,
            pixels: vec![color; length as usize],
        }
    }

    /// The pixel buffer in individual mode
    pub fn current_pixels(pixels: Vec<Color>) -> Egress {
        Egress::AllPixels {
            fill: false,
            pixels,
        }
    }
}
