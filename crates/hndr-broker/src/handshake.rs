//! Node authentication.
//!
//! A connection proves itself by sending a single binary frame holding a
//! [`NodeInit`] with the shared token. Until then it receives nothing and is
//! not in the node pool.

use futures::{Stream, StreamExt};
use hndr_common::auth::TokenAuth;
use hndr_common::protocol::{BrokerError, NodeInit, Result};
use hndr_common::transport::MsgpackCodec;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

/// Waits for and validates a node's init message.
///
/// Control frames (ping/pong) are skipped. The first data frame decides the
/// outcome.
///
/// # Arguments
/// * `stream` - Inbound half of the node's WebSocket
/// * `auth` - The broker's shared token
/// * `timeout` - Window measured from the call, covering the whole exchange
///
/// # Returns
/// - `Ok(init)` - Token matched; the connection may be verified
/// - `Err(BrokerError::AuthTimeout(_))` - No init message within `timeout`
/// - `Err(BrokerError::MalformedInitMessage(_))` - First frame did not decode
/// - `Err(BrokerError::InvalidToken)` - Token mismatch
/// - `Err(BrokerError::ProtocolViolation(_))` - First frame was text
/// - `Err(BrokerError::Transport(_))` - The socket failed or closed first
pub async fn authenticate<St>(stream: &mut St, auth: &TokenAuth, timeout: Duration) -> Result<NodeInit>
where
    St: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
{
    let deadline = Instant::now() + timeout;
    loop {
        let Ok(next) = timeout_at(deadline, stream.next()).await else {
            return Err(BrokerError::AuthTimeout(timeout.as_millis() as u64));
        };
        match next {
            Some(Ok(Message::Binary(data))) => {
                let init = MsgpackCodec::decode_init(&data)?;
                if !auth.validate(&init.token) {
                    return Err(BrokerError::InvalidToken);
                }
                return Ok(init);
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
            Some(Ok(Message::Text(_))) => {
                return Err(BrokerError::ProtocolViolation(
                    "text frame where init message expected".to_string(),
                ));
            }
            Some(Ok(Message::Close(_))) | None => {
                return Err(BrokerError::Transport(
                    "connection closed before authenticating".to_string(),
                ));
            }
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn init_frame(token: &str) -> Message {
        let init = NodeInit::new("10.0.0.7", token);
        Message::Binary(MsgpackCodec::encode_init(&init).unwrap())
    }

    fn frames(messages: Vec<Message>) -> impl Stream<Item = std::result::Result<Message, WsError>> + Unpin {
        stream::iter(messages.into_iter().map(Ok))
    }

    #[tokio::test]
    async fn test_valid_token() {
        let auth = TokenAuth::new("T");
        let mut stream = frames(vec![init_frame("T")]);
        let init = authenticate(&mut stream, &auth, Duration::from_secs(1)).await.unwrap();
        assert_eq!(init.ip, "10.0.0.7");
    }

    #[tokio::test]
    async fn test_control_frames_are_skipped() {
        let auth = TokenAuth::new("T");
        let mut stream = frames(vec![
            Message::Ping(vec![1]),
            Message::Pong(vec![]),
            init_frame("T"),
        ]);
        assert!(authenticate(&mut stream, &auth, Duration::from_secs(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_wrong_token() {
        let auth = TokenAuth::new("T");
        let mut stream = frames(vec![init_frame("X")]);
        let err = authenticate(&mut stream, &auth, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, BrokerError::InvalidToken));
    }

    #[tokio::test]
    async fn test_undecodable_init() {
        let auth = TokenAuth::new("T");
        let mut stream = frames(vec![Message::Binary(b"garbage".to_vec())]);
        let err = authenticate(&mut stream, &auth, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, BrokerError::MalformedInitMessage(_)));
    }

    #[tokio::test]
    async fn test_text_frame_is_rejected() {
        let auth = TokenAuth::new("T");
        let mut stream = frames(vec![Message::Text("{\"token\":\"T\"}".into())]);
        let err = authenticate(&mut stream, &auth, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, BrokerError::ProtocolViolation(_)));
    }

    #[tokio::test]
    async fn test_closed_before_init() {
        let auth = TokenAuth::new("T");
        let mut stream = frames(vec![]);
        let err = authenticate(&mut stream, &auth, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, BrokerError::Transport(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_node_times_out() {
        let auth = TokenAuth::new("T");
        let mut stream = stream::pending::<std::result::Result<Message, WsError>>();
        let err = authenticate(&mut stream, &auth, Duration::from_millis(15_000))
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::AuthTimeout(15_000)));
        assert_eq!(err.to_string(), "Node did not authenticate within 15000ms");
    }
}
