//! Decoded protocol message streams.

use permatrix_core::protocol::{self, MAX_LINE_BYTES, ProtocolError, ProtocolMessage};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::sync::mpsc;

enum Source {
    /// Newline-delimited bytes (a socket or a pipe).
    Lines(BufReader<Box<dyn AsyncRead + Send + Unpin>>),
    /// One encoded line per channel message.
    Channel(mpsc::UnboundedReceiver<String>),
    Closed,
}

/// A lazy, finite sequence of protocol messages from one run.
///
/// The stream ends when the underlying transport closes. After the first error it yields nothing more: a protocol
/// error is fatal to the run.
pub struct MessageStream {
    source: Source,
}

impl MessageStream {
    /// Decode newline-delimited messages from a byte stream.
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(reader);
        Self {
            source: Source::Lines(BufReader::new(reader)),
        }
    }

    /// Decode one message out of each channel payload.
    pub fn from_channel(rx: mpsc::UnboundedReceiver<String>) -> Self {
        Self {
            source: Source::Channel(rx),
        }
    }

    /// A stream that is already finished.
    pub fn empty() -> Self {
        Self { source: Source::Closed }
    }

    /// Release the underlying connection or channel.
    pub fn close(&mut self) {
        self.source = Source::Closed;
    }

    /// Wait for the next message; `None` once the transport has closed.
    pub async fn next(&mut self) -> Option<Result<ProtocolMessage, ProtocolError>> {
        let item = match &mut self.source {
            Source::Lines(reader) => read_message(reader).await?,
            Source::Channel(rx) => protocol::decode(&rx.recv().await?),
            Source::Closed => return None,
        };
        if item.is_err() {
            self.close();
        }
        Some(item)
    }
}

async fn read_message(
    reader: &mut BufReader<Box<dyn AsyncRead + Send + Unpin>>,
) -> Option<Result<ProtocolMessage, ProtocolError>> {
    let mut line = String::new();
    // One byte past the limit tells an over-long line apart from one that fits exactly.
    let mut limited = reader.take(MAX_LINE_BYTES as u64 + 1);
    let read = match limited.read_line(&mut line).await {
        Ok(0) => return None,
        Ok(read) => read,
        Err(e) => return Some(Err(ProtocolError::Io(e))),
    };

    // The limit includes the terminator.
    if read > MAX_LINE_BYTES {
        return Some(Err(ProtocolError::LineTooLong { limit: MAX_LINE_BYTES }));
    }
    if !line.ends_with('\n') {
        return Some(Err(ProtocolError::Truncated { partial: line }));
    }
    Some(protocol::decode(&line))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn reader(bytes: &str) -> MessageStream {
        MessageStream::from_reader(Cursor::new(bytes.as_bytes().to_vec()))
    }

    #[tokio::test]
    async fn test_reads_lines_in_order() {
        let mut stream = reader("{\"testStart\":{\"name\":\"a\"}}\n{\"testStart\":{\"name\":\"b\"}}\n");
        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            ProtocolMessage::TestStart { name: "a".to_string() }
        );
        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            ProtocolMessage::TestStart { name: "b".to_string() }
        );
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_unterminated_last_line_is_truncated() {
        let mut stream = reader("{\"testStart\":{\"name\":\"a\"}}");
        assert!(matches!(stream.next().await, Some(Err(ProtocolError::Truncated { .. }))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_malformed_line_closes_stream() {
        let mut stream = reader("not json\n{\"testStart\":{\"name\":\"a\"}}\n");
        assert!(matches!(stream.next().await, Some(Err(ProtocolError::Malformed { .. }))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_overlong_line_is_rejected() {
        let huge = format!("{}\n", "x".repeat(MAX_LINE_BYTES + 10));
        let mut stream = reader(&huge);
        assert!(matches!(stream.next().await, Some(Err(ProtocolError::LineTooLong { .. }))));
    }

    #[tokio::test]
    async fn test_line_limit_includes_terminator() {
        let at_limit = format!("{}\n", "x".repeat(MAX_LINE_BYTES - 1));
        let mut stream = reader(&at_limit);
        assert!(matches!(stream.next().await, Some(Err(ProtocolError::Malformed { .. }))));

        let one_over = format!("{}\n", "x".repeat(MAX_LINE_BYTES));
        let mut stream = reader(&one_over);
        assert!(matches!(stream.next().await, Some(Err(ProtocolError::LineTooLong { .. }))));
    }

    #[tokio::test]
    async fn test_channel_payloads_are_decoded() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(protocol::encode(&ProtocolMessage::TestStart { name: "a".to_string() }))
            .unwrap();
        drop(tx);
        let mut stream = MessageStream::from_channel(rx);
        assert!(matches!(stream.next().await, Some(Ok(ProtocolMessage::TestStart { .. }))));
        assert!(stream.next().await.is_none());
    }
}
