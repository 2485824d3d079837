use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Cursor;

use crate::protocol::error::{BrokerError, Result};
use crate::protocol::messages::{NodeInit, RequestId};
use crate::protocol::schema::PayloadSchema;

/// MessagePack codec for every message exchanged with a node.
///
/// Structs are written as maps keyed by field name (`{"id": 0, "text": ...}`)
/// so that nodes written in other languages can decode them as plain
/// dictionaries.
///
/// Decode failures are classified by message kind: a bad init frame is a
/// [`BrokerError::MalformedInitMessage`] and a bad result frame is a
/// [`BrokerError::MalformedTaskResult`]. Every decoder expects the frame to
/// hold exactly one value; trailing bytes are a decode failure.
pub struct MsgpackCodec;

impl MsgpackCodec {
    /// Encode any serializable value with named fields.
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode any value.
    pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
        Ok(decode_whole(data)?)
    }

    pub fn encode_init(init: &NodeInit) -> Result<Vec<u8>> {
        Self::encode(init)
    }

    pub fn decode_init(data: &[u8]) -> Result<NodeInit> {
        decode_whole(data).map_err(|e| BrokerError::MalformedInitMessage(e.to_string()))
    }

    /// Encode the `{id, payload}` message sent to a node.
    pub fn encode_task<S: PayloadSchema>(id: RequestId, task: S::Task) -> Result<Vec<u8>> {
        Self::encode(&S::task_message(id, task))
    }

    pub fn decode_task<S: PayloadSchema>(data: &[u8]) -> Result<(RequestId, S::Task)> {
        let message: S::TaskMessage = Self::decode(data)?;
        Ok(S::split_task(message))
    }

    /// Encode the `{id, result}` message a node sends back.
    pub fn encode_result<S: PayloadSchema>(id: RequestId, output: S::Output) -> Result<Vec<u8>> {
        Self::encode(&S::result_message(id, output))
    }

    /// Decode and validate a result message.
    pub fn decode_result<S: PayloadSchema>(data: &[u8]) -> Result<(RequestId, S::Output)> {
        let message: S::ResultMessage =
            decode_whole(data).map_err(|e| BrokerError::MalformedTaskResult(e.to_string()))?;
        S::split_result(message)
    }
}

/// Decodes a single MessagePack value that must span all of `data`.
pub(crate) fn decode_whole<T: DeserializeOwned>(
    data: &[u8],
) -> std::result::Result<T, rmp_serde::decode::Error> {
    let mut cursor = Cursor::new(data);
    let value = rmp_serde::from_read(&mut cursor)?;
    let trailing = data.len() - cursor.position() as usize;
    if trailing > 0 {
        return Err(rmp_serde::decode::Error::Syntax(format!(
            "{} trailing bytes after message",
            trailing
        )));
    }
    Ok(value)
}
