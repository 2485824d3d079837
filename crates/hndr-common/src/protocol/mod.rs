pub mod error;
pub mod messages;
pub mod schema;


pub use error::{BrokerError, Result};
pub use messages::{NodeInit, RequestId};
pub use schema::{
    CallerReply, EmbedResult, EmbedSchema, PayloadSchema, ReplyStatus, WorkerResult, WorkerSchema,
    EMBEDDING_DENSE_BYTES,
};
