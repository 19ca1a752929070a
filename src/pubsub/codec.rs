//! Payload codec: base64 on the wire, bytes or text for callers.

use super::error::{PubSubError, Result};
use super::models::{Message, OutgoingMessage, Payload, ReceivedMessage, WireMessage};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};

/// How inbound payloads are presented to callers, and how outbound text is turned into bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum PayloadEncoding {
    /// Raw bytes, no text conversion.
    Bytes,
    /// UTF-8 text. Invalid sequences are a decode error.
    #[default]
    TextUtf8,
    /// ISO-8859-1 text, one char per byte.
    TextLatin1,
}

impl std::fmt::Display for PayloadEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PayloadEncoding::Bytes => write!(f, "bytes"),
            PayloadEncoding::TextUtf8 => write!(f, "text-utf8"),
            PayloadEncoding::TextLatin1 => write!(f, "text-latin1"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MessageCodec {
    encoding: PayloadEncoding,
}

impl MessageCodec {
    pub fn new(encoding: PayloadEncoding) -> Self {
        Self { encoding }
    }

    pub fn encoding(&self) -> PayloadEncoding {
        self.encoding
    }

    /// Decode a wire payload into its caller-visible form.
    pub fn decode(&self, data: &str) -> Result<Payload> {
        let bytes = STANDARD
            .decode(data)
            .map_err(|e| PubSubError::Decode(format!("invalid base64: {}", e)))?;

        match self.encoding {
            PayloadEncoding::Bytes => Ok(Payload::Bytes(bytes)),
            PayloadEncoding::TextUtf8 => String::from_utf8(bytes)
                .map(Payload::Text)
                .map_err(|e| PubSubError::Decode(format!("invalid UTF-8: {}", e))),
            PayloadEncoding::TextLatin1 => {
                Ok(Payload::Text(bytes.iter().map(|&b| b as char).collect()))
            }
        }
    }

    /// Bytes a payload stands for under this codec's text encoding.
    ///
    /// Inverse of `decode` before base64: Latin-1 text maps back to one byte
    /// per char, so a decoded payload yields exactly the bytes that were sent.
    pub fn to_bytes(&self, payload: &Payload) -> Result<Vec<u8>> {
        match payload {
            Payload::Bytes(bytes) => Ok(bytes.clone()),
            Payload::Text(text) => match self.encoding {
                PayloadEncoding::TextLatin1 => text
                    .chars()
                    .map(|c| {
                        u8::try_from(u32::from(c)).map_err(|_| {
                            PubSubError::Encode(format!(
                                "character {:?} is not representable in Latin-1",
                                c
                            ))
                        })
                    })
                    .collect(),
                PayloadEncoding::Bytes | PayloadEncoding::TextUtf8 => {
                    Ok(text.as_bytes().to_vec())
                }
            },
        }
    }

    /// Encode a payload for the wire.
    pub fn encode(&self, payload: &Payload) -> Result<String> {
        Ok(STANDARD.encode(self.to_bytes(payload)?))
    }

    /// Consume a received message, decoding its payload.
    pub fn decode_message(&self, received: ReceivedMessage) -> Result<Message> {
        let payload = self.decode(&received.data)?;
        let publish_time = received
            .publish_time
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc));

        Ok(Message {
            ack_handle: received.ack_handle,
            payload,
            attributes: received.attributes,
            message_id: received.message_id,
            publish_time,
        })
    }

    /// Encode every message of a publish batch.
    pub fn encode_batch(&self, messages: &[OutgoingMessage]) -> Result<Vec<WireMessage>> {
        messages
            .iter()
            .map(|m| {
                Ok(WireMessage {
                    data: self.encode(&m.payload)?,
                    attributes: m.attributes.clone(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::models::AckHandle;
    use std::collections::HashMap;

    #[test]
    fn test_decode_text() {
        let codec = MessageCodec::new(PayloadEncoding::TextUtf8);
        assert_eq!(
            codec.decode("aGVsbG8=").unwrap(),
            Payload::Text("hello".to_string())
        );
    }

    #[test]
    fn test_decode_bytes() {
        let codec = MessageCodec::new(PayloadEncoding::Bytes);
        assert_eq!(
            codec.decode("AP8Q").unwrap(),
            Payload::Bytes(vec![0x00, 0xff, 0x10])
        );
    }

    #[test]
    fn test_empty_payload_round_trips() {
        for encoding in [
            PayloadEncoding::Bytes,
            PayloadEncoding::TextUtf8,
            PayloadEncoding::TextLatin1,
        ] {
            let codec = MessageCodec::new(encoding);
            let decoded = codec.decode("").unwrap();
            assert!(decoded.is_empty());
            assert_eq!(codec.encode(&decoded).unwrap(), "");
        }
    }

    #[test]
    fn test_round_trip_preserves_payload() {
        let utf8 = MessageCodec::new(PayloadEncoding::TextUtf8);
        let text = Payload::Text("caffè ☕ job #42".to_string());
        assert_eq!(utf8.decode(&utf8.encode(&text).unwrap()).unwrap(), text);

        let bytes = MessageCodec::new(PayloadEncoding::Bytes);
        let all_bytes = Payload::Bytes((0..=255).collect());
        assert_eq!(
            bytes.decode(&bytes.encode(&all_bytes).unwrap()).unwrap(),
            all_bytes
        );

        let latin1 = MessageCodec::new(PayloadEncoding::TextLatin1);
        let text = Payload::Text("déjà vu ÿ".to_string());
        assert_eq!(latin1.decode(&latin1.encode(&text).unwrap()).unwrap(), text);
    }

    #[test]
    fn test_latin1_is_one_byte_per_char() {
        let codec = MessageCodec::new(PayloadEncoding::TextLatin1);
        // "é" is 0xE9 in Latin-1, "6Q==" in base64
        assert_eq!(codec.encode(&Payload::from("é")).unwrap(), "6Q==");
        assert!(matches!(
            codec.encode(&Payload::from("€")),
            Err(PubSubError::Encode(_))
        ));
    }

    #[test]
    fn test_to_bytes_restores_wire_bytes() {
        let latin1 = MessageCodec::new(PayloadEncoding::TextLatin1);
        let payload = latin1.decode("6Q==").unwrap();
        assert_eq!(payload, Payload::Text("é".to_string()));
        assert_eq!(latin1.to_bytes(&payload).unwrap(), vec![0xE9]);

        let utf8 = MessageCodec::new(PayloadEncoding::TextUtf8);
        assert_eq!(
            utf8.to_bytes(&Payload::from("é")).unwrap(),
            vec![0xC3, 0xA9]
        );

        let bytes = MessageCodec::new(PayloadEncoding::Bytes);
        let raw = bytes.decode("AP8Q").unwrap();
        assert_eq!(bytes.to_bytes(&raw).unwrap(), vec![0x00, 0xff, 0x10]);
    }

    #[test]
    fn test_invalid_base64_is_decode_error() {
        let codec = MessageCodec::default();
        assert!(matches!(codec.decode("not base64!"), Err(PubSubError::Decode(_))));
    }

    #[test]
    fn test_invalid_utf8_is_decode_error() {
        let codec = MessageCodec::new(PayloadEncoding::TextUtf8);
        // 0xff 0xfe is not valid UTF-8
        assert!(matches!(codec.decode("//4="), Err(PubSubError::Decode(_))));
    }

    #[test]
    fn test_decode_message_parses_publish_time() {
        let codec = MessageCodec::default();
        let received = ReceivedMessage {
            ack_handle: AckHandle::from("A1"),
            data: "aGVsbG8=".to_string(),
            attributes: HashMap::from([("k".to_string(), "v".to_string())]),
            message_id: Some("123".to_string()),
            publish_time: Some("2024-05-01T10:00:00.123Z".to_string()),
        };

        let message = codec.decode_message(received).unwrap();
        assert_eq!(message.ack_handle, AckHandle::from("A1"));
        assert_eq!(message.payload.as_text(), Some("hello"));
        assert_eq!(message.attributes.get("k").map(String::as_str), Some("v"));
        assert_eq!(
            message.publish_time.unwrap().to_rfc3339(),
            "2024-05-01T10:00:00.123+00:00"
        );
    }

    #[test]
    fn test_encode_batch_encodes_every_message() {
        let codec = MessageCodec::default();
        let batch = vec![
            OutgoingMessage::new("hello").with_attribute("n", "1"),
            OutgoingMessage::new(Vec::<u8>::new()),
        ];
        let wire = codec.encode_batch(&batch).unwrap();
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[0].data, "aGVsbG8=");
        assert_eq!(wire[0].attributes.get("n").map(String::as_str), Some("1"));
        assert_eq!(wire[1].data, "");
    }

    #[test]
    fn test_payload_encoding_display_matches_value_enum() {
        use clap::ValueEnum;
        for encoding in PayloadEncoding::value_variants() {
            let parsed = PayloadEncoding::from_str(&encoding.to_string(), true).unwrap();
            assert_eq!(&parsed, encoding);
        }
    }
}
