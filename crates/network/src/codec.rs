//! Framing for the content protocol.
//!
//! Every message is an unsigned-varint length-prefixed frame. A request is a
//! single frame carrying the identifier's multihash bytes. A response is a
//! JSON [`ObjectHeader`] frame followed by payload frames until the responder
//! closes the stream.

use asynchronous_codec::Framed;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use libp2p::Stream;
use serde::{Deserialize, Serialize};
use unsigned_varint::codec::UviBytes;

use dcmanager_types::ContentId;

use crate::RequestError;

/// Largest frame either side accepts.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Size of the payload frames a responder writes.
pub const PAYLOAD_FRAME_SIZE: usize = 256 * 1024;

pub type ContentFramed = Framed<Stream, UviBytes<Bytes>>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObjectHeader {
    File { size: u64 },
    Directory,
    NotFound,
}

impl ObjectHeader {
    pub fn encode(&self) -> Bytes {
        Bytes::from(serde_json::to_vec(self).unwrap_or_default())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, RequestError> {
        serde_json::from_slice(bytes)
            .map_err(|e| RequestError::Protocol(format!("invalid object header: {e}")))
    }
}

fn codec() -> UviBytes<Bytes> {
    let mut codec = UviBytes::default();
    codec.set_max_len(MAX_FRAME_SIZE);
    codec
}

pub fn framed(stream: Stream) -> ContentFramed {
    Framed::new(stream, codec())
}

pub async fn write_request(framed: &mut ContentFramed, cid: &ContentId) -> Result<(), RequestError> {
    framed
        .send(Bytes::from(cid.to_bytes()))
        .await
        .map_err(RequestError::io)
}

pub async fn read_request(framed: &mut ContentFramed) -> Result<ContentId, RequestError> {
    let frame = read_frame(framed).await?.ok_or(RequestError::UnexpectedEof)?;

    ContentId::from_bytes(&frame)
        .map_err(|e| RequestError::Protocol(format!("invalid content identifier: {e}")))
}

pub async fn write_header(
    framed: &mut ContentFramed,
    header: &ObjectHeader,
) -> Result<(), RequestError> {
    framed.send(header.encode()).await.map_err(RequestError::io)
}

pub async fn read_header(framed: &mut ContentFramed) -> Result<ObjectHeader, RequestError> {
    let frame = read_frame(framed).await?.ok_or(RequestError::UnexpectedEof)?;
    ObjectHeader::decode(&frame)
}

/// Writes the payload in fixed-size frames, then closes the stream.
pub async fn write_payload(framed: &mut ContentFramed, payload: &Bytes) -> Result<(), RequestError> {
    let mut offset = 0;

    while offset < payload.len() {
        let end = usize::min(offset + PAYLOAD_FRAME_SIZE, payload.len());
        framed
            .feed(payload.slice(offset..end))
            .await
            .map_err(RequestError::io)?;
        offset = end;
    }

    framed.close().await.map_err(RequestError::io)
}

/// Reads every remaining frame into one buffer, up to `limit` bytes.
pub async fn read_to_end(framed: &mut ContentFramed, limit: usize) -> Result<Vec<u8>, RequestError> {
    let mut buf = Vec::new();

    while let Some(frame) = read_frame(framed).await? {
        if buf.len() + frame.len() > limit {
            return Err(RequestError::Protocol(format!(
                "payload exceeds {limit} bytes"
            )));
        }
        buf.extend_from_slice(&frame);
    }

    Ok(buf)
}

async fn read_frame(framed: &mut ContentFramed) -> Result<Option<bytes::BytesMut>, RequestError> {
    framed.next().await.transpose().map_err(RequestError::io)
}
