//! Message codec
//!
//! Messages travel as MessagePack maps with named fields, so adding an
//! optional field on one side does not break the other.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Serialize a message body
pub fn encode<M: Serialize>(message: &M) -> Result<Bytes> {
    Ok(Bytes::from(rmp_serde::to_vec_named(message)?))
}

/// Deserialize a message body
pub fn decode<M: DeserializeOwned>(body: &[u8]) -> Result<M> {
    Ok(rmp_serde::from_slice(body)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::message::{DetectedObject, Event, Image, Notify};

    #[test]
    fn test_event_survives_codec() {
        let event = Event {
            fov_id: "1700000000000".into(),
            sdu_id: 7,
            timestamp: 1_700_000_000_000,
            coordinate: "45;12".into(),
            image: Image::new(640, 480, vec![0xFF, 0xD8, 0xFF, 0xE0]),
            objects: vec![DetectedObject {
                x: 10,
                y: 20,
                w: 30,
                h: 40,
                label: "person".into(),
                score: 0.9,
                ..Default::default()
            }],
        };

        let body = encode(&event).unwrap();
        let decoded: Event = decode(&body).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_wrong_type_is_codec_error() {
        let body = encode(&"not a notify").unwrap();
        let result: Result<Notify> = decode(&body);
        assert!(matches!(result, Err(Error::Codec(_))));
    }
}
