//! Request and reply definitions for the controller protocol
//!
//! Every request is answered by exactly one reply. Frames are binary: an
//! opcode byte followed by the operands, wrapped in a length-delimited
//! envelope by the codec.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::color::Color;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame ended unexpectedly")]
    UnexpectedEof,
    #[error("unknown opcode: {0}")]
    UnknownOpcode(u8),
    #[error("string field is not UTF-8")]
    InvalidString,
}

/// Write-buffering mode of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    /// Buffer writes until a call to `Show`
    Queue,
    /// Commit every write as it arrives
    Instant,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Fill { color: Color },
    Set { indexes: Vec<u16>, color: Color },
    SetAll { colors: Vec<Color> },
    Brightness { level: u8 },
    Mode { mode: DisplayMode },
    Show,
    Animate { id: String },
    StopAnimation,
    RegisterAnimation { id: String, wasm: Vec<u8> },
    UnregisterAnimation { id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Ack,
    Registered(bool),
}

const OP_FILL: u8 = 1;
const OP_SET: u8 = 2;
const OP_SET_ALL: u8 = 3;
const OP_BRIGHTNESS: u8 = 4;
const OP_MODE: u8 = 5;
const OP_SHOW: u8 = 6;
const OP_ANIMATE: u8 = 7;
const OP_STOP_ANIMATION: u8 = 8;
const OP_REGISTER_ANIMATION: u8 = 9;
const OP_UNREGISTER_ANIMATION: u8 = 10;

const REPLY_ACK: u8 = 1;
const REPLY_REGISTERED: u8 = 2;

const MODE_QUEUE: u8 = 1;
const MODE_INSTANT: u8 = 2;

impl Request {
    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            Request::Fill { color } => {
                dst.put_u8(OP_FILL);
                put_color(dst, *color);
            }
            Request::Set { indexes, color } => {
                dst.put_u8(OP_SET);
                put_color(dst, *color);
                dst.put_u16_le(indexes.len() as u16);
                for index in indexes {
                    dst.put_u16_le(*index);
                }
            }
            Request::SetAll { colors } => {
                dst.put_u8(OP_SET_ALL);
                dst.put_u16_le(colors.len() as u16);
                for color in colors {
                    put_color(dst, *color);
                }
            }
            Request::Brightness { level } => {
                dst.put_u8(OP_BRIGHTNESS);
                dst.put_u8(*level);
            }
            Request::Mode { mode } => {
                dst.put_u8(OP_MODE);
                dst.put_u8(match mode {
                    DisplayMode::Queue => MODE_QUEUE,
                    DisplayMode::Instant => MODE_INSTANT,
                });
            }
            Request::Show => dst.put_u8(OP_SHOW),
            Request::Animate { id } => {
                dst.put_u8(OP_ANIMATE);
                put_str(dst, id);
            }
            Request::StopAnimation => dst.put_u8(OP_STOP_ANIMATION),
            Request::RegisterAnimation { id, wasm } => {
                dst.put_u8(OP_REGISTER_ANIMATION);
                put_str(dst, id);
                dst.put_u32_le(wasm.len() as u32);
                dst.put_slice(wasm);
            }
            Request::UnregisterAnimation { id } => {
                dst.put_u8(OP_UNREGISTER_ANIMATION);
                put_str(dst, id);
            }
        }
    }

    pub fn decode(mut src: Bytes) -> Result<Request, DecodeError> {
        let opcode = get_u8(&mut src)?;
        let request = match opcode {
            OP_FILL => Request::Fill {
                color: get_color(&mut src)?,
            },
            OP_SET => {
                let color = get_color(&mut src)?;
                let count = get_u16(&mut src)?;
                let mut indexes = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    indexes.push(get_u16(&mut src)?);
                }
                Request::Set { indexes, color }
            }
            OP_SET_ALL => {
                let count = get_u16(&mut src)?;
                let mut colors = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    colors.push(get_color(&mut src)?);
                }
                Request::SetAll { colors }
            }
            OP_BRIGHTNESS => Request::Brightness {
                level: get_u8(&mut src)?,
            },
            OP_MODE => Request::Mode {
                mode: match get_u8(&mut src)? {
                    MODE_QUEUE => DisplayMode::Queue,
                    MODE_INSTANT => DisplayMode::Instant,
                    other => return Err(DecodeError::UnknownOpcode(other)),
                },
            },
            OP_SHOW => Request::Show,
            OP_ANIMATE => Request::Animate {
                id: get_str(&mut src)?,
            },
            OP_STOP_ANIMATION => Request::StopAnimation,
            OP_REGISTER_ANIMATION => {
                let id = get_str(&mut src)?;
                let length = get_u32(&mut src)? as usize;
                if src.remaining() < length {
                    return Err(DecodeError::UnexpectedEof);
                }
                let wasm = src.split_to(length).to_vec();
                Request::RegisterAnimation { id, wasm }
            }
            OP_UNREGISTER_ANIMATION => Request::UnregisterAnimation {
                id: get_str(&mut src)?,
            },
            other => return Err(DecodeError::UnknownOpcode(other)),
        };

        Ok(request)
    }
}

impl Reply {
    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            Reply::Ack => dst.put_u8(REPLY_ACK),
            Reply::Registered(success) => {
                dst.put_u8(REPLY_REGISTERED);
                dst.put_u8(*success as u8);
            }
        }
    }

    pub fn decode(mut src: Bytes) -> Result<Reply, DecodeError> {
        match get_u8(&mut src)? {
            REPLY_ACK => Ok(Reply::Ack),
            REPLY_REGISTERED => Ok(Reply::Registered(get_u8(&mut src)? == 1)),
            other => Err(DecodeError::UnknownOpcode(other)),
        }
    }
}

fn put_color(dst: &mut BytesMut, color: Color) {
    dst.put_slice(&color.to_bytes());
}

fn put_str(dst: &mut BytesMut, value: &str) {
    dst.put_u16_le(value.len() as u16);
    dst.put_slice(value.as_bytes());
}

fn get_u8(src: &mut Bytes) -> Result<u8, DecodeError> {
    if src.remaining() < 1 {
        return Err(DecodeError::UnexpectedEof);
    }
    Ok(src.get_u8())
}

fn get_u16(src: &mut Bytes) -> Result<u16, DecodeError> {
    if src.remaining() < 2 {
        return Err(DecodeError::UnexpectedEof);
    }
    Ok(src.get_u16_le())
}

fn get_u32(src: &mut Bytes) -> Result<u32, DecodeError> {
    if src.remaining() < 4 {
        return Err(DecodeError::UnexpectedEof);
    }
    Ok(src.get_u32_le())
}

fn get_color(src: &mut Bytes) -> Result<Color, DecodeError> {
    if src.remaining() < 3 {
        return Err(DecodeError::UnexpectedEof);
    }
    Ok(Color::new(src.get_u8(), src.get_u8(), src.get_u8()))
}

fn get_str(src: &mut Bytes) -> Result<String, DecodeError> {
    let length = get_u16(src)? as usize;
    if src.remaining() < length {
        return Err(DecodeError::UnexpectedEof);
    }
    String::from_utf8(src.split_to(length).to_vec()).map_err(|_| DecodeError::InvalidString)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(request: Request) {
        let mut buf = BytesMut::new();
        request.encode(&mut buf);
        assert_eq!(Request::decode(buf.freeze()).unwrap(), request);
    }

    #[test]
    fn request_round_trips() {
        round_trip(Request::Fill {
            color: Color::new(10, 20, 30),
        });
        round_trip(Request::Set {
            indexes: vec![0, 5, 149],
            color: Color::new(255, 255, 255),
        });
        round_trip(Request::SetAll {
            colors: vec![Color::new(1, 2, 3); 150],
        });
        round_trip(Request::Brightness { level: 42 });
        round_trip(Request::Mode {
            mode: DisplayMode::Queue,
        });
        round_trip(Request::Show);
        round_trip(Request::Animate {
            id: "abcd1234".to_owned(),
        });
        round_trip(Request::StopAnimation);
        round_trip(Request::RegisterAnimation {
            id: "abcd1234".to_owned(),
            wasm: vec![0x00, 0x61, 0x73, 0x6d],
        });
        round_trip(Request::UnregisterAnimation {
            id: "abcd1234".to_owned(),
        });
    }

    #[test]
    fn reply_round_trips() {
        for reply in [Reply::Ack, Reply::Registered(true), Reply::Registered(false)] {
            let mut buf = BytesMut::new();
            reply.encode(&mut buf);
            assert_eq!(Reply::decode(buf.freeze()).unwrap(), reply);
        }
    }

    #[test]
    fn truncated_frame_is_rejected() {
        let mut buf = BytesMut::new();
        Request::Animate {
            id: "abcd1234".to_owned(),
        }
        .encode(&mut buf);
        buf.truncate(4);

        assert!(matches!(
            Request::decode(buf.freeze()),
            Err(DecodeError::UnexpectedEof)
        ));
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        let buf = Bytes::from_static(&[0xff]);
        assert!(matches!(
            Request::decode(buf),
            Err(DecodeError::UnknownOpcode(0xff))
        ));
    }
}
