//! Relay wire format: one JSON object per line
//!
//! ```text
//! {"op":"subscribe","topic":"graph.invalidate"}
//! {"op":"subscribed","topic":"graph.invalidate"}
//! {"op":"publish","event":{"topic":"graph.invalidate","payload":"","ts":"..."}}
//! {"op":"deliver","event":{"topic":"graph.invalidate","payload":"","ts":"..."}}
//! {"op":"unsubscribe","topic":"graph.invalidate"}
//! ```

use crate::error::{BusError, BusResult};
use crate::event::Event;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Longest accepted line, newline excluded
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Frame {
    /// Client → relay: start receiving a topic
    Subscribe { topic: String },
    /// Relay → client: subscription registered
    Subscribed { topic: String },
    /// Client → relay: stop receiving a topic
    Unsubscribe { topic: String },
    /// Client → relay: fan out an event
    Publish { event: Event },
    /// Relay → client: event on a subscribed topic
    Deliver { event: Event },
}

impl Frame {
    /// Encode as a newline-terminated line
    pub fn encode(&self) -> BusResult<String> {
        let mut line = serde_json::to_string(self)?;
        if line.len() > MAX_FRAME_LEN {
            return Err(BusError::FrameTooLarge {
                len: line.len(),
                max: MAX_FRAME_LEN,
            });
        }
        line.push('\n');
        Ok(line)
    }

    pub fn decode(line: &[u8]) -> BusResult<Self> {
        Ok(serde_json::from_slice(line)?)
    }
}

/// Read the next frame; `None` at end of stream
///
/// Blank lines are skipped. An oversized line is an error and leaves the
/// stream unusable.
pub async fn read_frame<R>(reader: &mut R) -> BusResult<Option<Frame>>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let mut buf = Vec::new();
        let n = (&mut *reader)
            .take(MAX_FRAME_LEN as u64 + 1)
            .read_until(b'\n', &mut buf)
            .await?;

        if n == 0 {
            return Ok(None);
        }

        if buf.last() == Some(&b'\n') {
            buf.pop();
        } else if buf.len() > MAX_FRAME_LEN {
            return Err(BusError::FrameTooLarge {
                len: buf.len(),
                max: MAX_FRAME_LEN,
            });
        }

        if buf.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        return Frame::decode(&buf).map(Some);
    }
}
