//! Feed Codec
//!
//! Maps between WebSocket messages and feed frames. Outbound frames are
//! JSON text; inbound text is handed to the hub as-is, and binary frames
//! are accepted only when they hold valid UTF-8.

use tokio_tungstenite::tungstenite::Message;

use crate::domain::frame::ClientFrame;

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// A binary frame did not hold UTF-8 text.
    #[error("binary frame is not valid UTF-8")]
    NonUtf8Binary,
}

/// JSON codec for the price feed.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Encode a client frame as a text message.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(self, frame: &ClientFrame) -> Result<Message, CodecError> {
        let json = serde_json::to_string(frame)?;
        Ok(Message::Text(json.into()))
    }

    /// Extract the text payload of a data message.
    ///
    /// Returns `Ok(None)` for control messages.
    ///
    /// # Errors
    ///
    /// Returns an error for binary frames that are not UTF-8.
    pub fn decode_text(self, message: &Message) -> Result<Option<String>, CodecError> {
        match message {
            Message::Text(text) => Ok(Some(text.as_str().to_owned())),
            Message::Binary(bytes) => std::str::from_utf8(bytes)
                .map(|text| Some(text.to_owned()))
                .map_err(|_| CodecError::NonUtf8Binary),
            _ => Ok(None),
        }
    }
}
