//! Payload Schemas
//!
//! The broker core never looks inside a task or a result. Everything that
//! depends on what a node actually computes lives behind [`PayloadSchema`]:
//! the shape of the task and result messages on the node channel, the
//! validation applied to results, and the translation to and from the
//! caller-facing HTTP bodies.
//!
//! Two schemas ship with the crate:
//!
//! - [`EmbedSchema`]: text in, a 1024-dimension `f32` dense embedding plus a
//!   sparse token → weight map out
//! - [`WorkerSchema`]: an arbitrary MessagePack value in, an arbitrary
//!   MessagePack value (or error) out

use rmpv::Value;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::protocol::error::{BrokerError, Result};
use crate::protocol::messages::RequestId;
use crate::transport::codec::{decode_whole, MsgpackCodec};

/// Exact size of `emb_dense`: 1024 little-endian IEEE-754 `f32` values.
pub const EMBEDDING_DENSE_BYTES: usize = 1024 * 4;

/// How the front door should present a node's answer to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    /// The node produced a result.
    Ok,
    /// The node ran the task and reported an error of its own.
    NodeError,
}

/// Encoded HTTP body for one completed call.
#[derive(Debug, Clone, PartialEq)]
pub struct CallerReply {
    pub status: ReplyStatus,
    pub body: Vec<u8>,
}

impl CallerReply {
    pub fn ok(body: Vec<u8>) -> Self {
        Self {
            status: ReplyStatus::Ok,
            body,
        }
    }

    pub fn node_error(body: Vec<u8>) -> Self {
        Self {
            status: ReplyStatus::NodeError,
            body,
        }
    }
}

/// A request/response schema pair the broker is parameterized over.
///
/// Implementations are zero-sized marker types; the broker picks its schema at
/// compile time (`Broker<EmbedSchema>`, `Broker<WorkerSchema>`).
pub trait PayloadSchema: Send + Sync + 'static {
    /// Short name used in logs.
    const NAME: &'static str;

    /// Task payload handed to a node.
    type Task: Send + 'static;
    /// Validated result payload returned by a node.
    type Output: Send + 'static;
    /// On-wire task message, `{id, ...payload}`.
    type TaskMessage: Serialize + DeserializeOwned;
    /// On-wire result message, `{id, ...result}`.
    type ResultMessage: Serialize + DeserializeOwned;

    fn task_message(id: RequestId, task: Self::Task) -> Self::TaskMessage;

    fn split_task(message: Self::TaskMessage) -> (RequestId, Self::Task);

    fn result_message(id: RequestId, output: Self::Output) -> Self::ResultMessage;

    /// Splits a decoded result message, applying schema validation.
    ///
    /// A validation failure is a [`BrokerError::MalformedTaskResult`].
    fn split_result(message: Self::ResultMessage) -> Result<(RequestId, Self::Output)>;

    /// Decodes the raw HTTP body of a caller's request.
    ///
    /// Failures are [`BrokerError::MalformedCallerRequest`].
    fn decode_caller_request(body: &[u8]) -> Result<Self::Task>;

    fn encode_caller_reply(output: Self::Output) -> Result<CallerReply>;

    /// Result a node sends when its handler fails, if the schema can carry one.
    fn error_result(_message: String) -> Option<Self::Output> {
        None
    }
}

// ============================================================================
// Embedding schema
// ============================================================================

/// Text embedding requests (dense + sparse).
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbedSchema;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedTaskMessage {
    pub id: RequestId,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedResultMessage {
    pub id: RequestId,
    #[serde(with = "serde_bytes")]
    pub emb_dense: Vec<u8>,
    pub emb_sparse: HashMap<String, f64>,
}

/// Validated embedding of one text.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbedResult {
    /// Raw dense vector, exactly [`EMBEDDING_DENSE_BYTES`] long.
    pub dense: Vec<u8>,
    pub sparse: HashMap<String, f64>,
}

impl EmbedResult {
    /// Decodes the dense vector into `f32` values.
    pub fn dense_f32(&self) -> Vec<f32> {
        self.dense
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }
}

#[derive(Serialize)]
struct EmbedCallerReply<'a> {
    #[serde(rename = "embeddingDense", with = "serde_bytes")]
    embedding_dense: &'a [u8],
    #[serde(rename = "embeddingSparse")]
    embedding_sparse: &'a HashMap<String, f64>,
}

impl PayloadSchema for EmbedSchema {
    const NAME: &'static str = "embed";

    type Task = String;
    type Output = EmbedResult;
    type TaskMessage = EmbedTaskMessage;
    type ResultMessage = EmbedResultMessage;

    fn task_message(id: RequestId, task: String) -> EmbedTaskMessage {
        EmbedTaskMessage { id, text: task }
    }

    fn split_task(message: EmbedTaskMessage) -> (RequestId, String) {
        (message.id, message.text)
    }

    fn result_message(id: RequestId, output: EmbedResult) -> EmbedResultMessage {
        EmbedResultMessage {
            id,
            emb_dense: output.dense,
            emb_sparse: output.sparse,
        }
    }

    fn split_result(message: EmbedResultMessage) -> Result<(RequestId, EmbedResult)> {
        if message.emb_dense.len() != EMBEDDING_DENSE_BYTES {
            return Err(BrokerError::MalformedTaskResult(format!(
                "emb_dense must be {} bytes, got {}",
                EMBEDDING_DENSE_BYTES,
                message.emb_dense.len()
            )));
        }
        if let Some((token, weight)) = message.emb_sparse.iter().find(|(_, w)| !w.is_finite()) {
            return Err(BrokerError::MalformedTaskResult(format!(
                "emb_sparse weight for {:?} is not finite: {}",
                token, weight
            )));
        }
        Ok((
            message.id,
            EmbedResult {
                dense: message.emb_dense,
                sparse: message.emb_sparse,
            },
        ))
    }

    fn decode_caller_request(body: &[u8]) -> Result<String> {
        std::str::from_utf8(body)
            .map(str::to_owned)
            .map_err(|e| BrokerError::MalformedCallerRequest(e.to_string()))
    }

    fn encode_caller_reply(output: EmbedResult) -> Result<CallerReply> {
        let reply = EmbedCallerReply {
            embedding_dense: &output.dense,
            embedding_sparse: &output.sparse,
        };
        Ok(CallerReply::ok(MsgpackCodec::encode(&reply)?))
    }
}

// ============================================================================
// Generic worker schema
// ============================================================================

/// Arbitrary MessagePack tasks for general-purpose worker nodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerSchema;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerTaskMessage {
    pub id: RequestId,
    pub input: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResultMessage {
    pub id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

/// What a worker node produced for one task.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerResult {
    pub output: Option<Value>,
    pub error: Option<Value>,
}

impl WorkerResult {
    pub fn output(value: impl Into<Value>) -> Self {
        Self {
            output: Some(value.into()),
            error: None,
        }
    }

    pub fn error(value: impl Into<Value>) -> Self {
        Self {
            output: None,
            error: Some(value.into()),
        }
    }
}

impl PayloadSchema for WorkerSchema {
    const NAME: &'static str = "worker";

    type Task = Value;
    type Output = WorkerResult;
    type TaskMessage = WorkerTaskMessage;
    type ResultMessage = WorkerResultMessage;

    fn task_message(id: RequestId, task: Value) -> WorkerTaskMessage {
        WorkerTaskMessage { id, input: task }
    }

    fn split_task(message: WorkerTaskMessage) -> (RequestId, Value) {
        (message.id, message.input)
    }

    fn result_message(id: RequestId, output: WorkerResult) -> WorkerResultMessage {
        WorkerResultMessage {
            id,
            output: output.output,
            error: output.error,
        }
    }

    fn split_result(message: WorkerResultMessage) -> Result<(RequestId, WorkerResult)> {
        Ok((
            message.id,
            WorkerResult {
                output: message.output,
                error: message.error,
            },
        ))
    }

    fn decode_caller_request(body: &[u8]) -> Result<Value> {
        decode_whole(body).map_err(|e| BrokerError::MalformedCallerRequest(e.to_string()))
    }

    fn encode_caller_reply(output: WorkerResult) -> Result<CallerReply> {
        match output.error {
            Some(error) => Ok(CallerReply::node_error(MsgpackCodec::encode(&error)?)),
            None => {
                let value = output.output.unwrap_or(Value::Nil);
                Ok(CallerReply::ok(MsgpackCodec::encode(&value)?))
            }
        }
    }

    fn error_result(message: String) -> Option<WorkerResult> {
        Some(WorkerResult::error(message))
    }
}
