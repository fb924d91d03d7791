use std::convert::Infallible;

use axum::body::Body;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::oneshot;

/// Create a connected sink/reader pair for one HTTP response body.
pub fn output_sink() -> (OutputSink, SinkReader) {
    let (tx, rx) = oneshot::channel();
    (
        OutputSink {
            tx: Mutex::new(Some(tx)),
        },
        SinkReader { rx },
    )
}

/// Write-once end of a pending response body.
///
/// Every write after the first is a silent no-op. Dropping the sink
/// unwritten ends the body empty.
pub struct OutputSink {
    tx: Mutex<Option<oneshot::Sender<Bytes>>>,
}

impl OutputSink {
    /// Write `body` and close. Returns false if the sink was already closed.
    pub fn write_and_close(&self, body: impl Into<Bytes>) -> bool {
        let Some(tx) = self.tx.lock().take() else {
            return false;
        };
        // The reader may already be gone (client hung up); that is not an error.
        let _ = tx.send(body.into());
        true
    }
}

/// Read end of an [`OutputSink`], handed to the HTTP layer.
pub struct SinkReader {
    rx: oneshot::Receiver<Bytes>,
}

impl SinkReader {
    /// Wait for the sink to be written or closed.
    pub async fn read_to_end(self) -> Bytes {
        self.rx.await.unwrap_or_default()
    }

    /// Stream the sink as a response body. Headers go out immediately; the
    /// single chunk follows whenever the sink is written.
    pub fn into_body(self) -> Body {
        let chunk = async move { Ok::<_, Infallible>(self.read_to_end().await) };
        Body::from_stream(futures::stream::once(chunk))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_once_then_ignored() {
        let (sink, reader) = output_sink();
        assert!(sink.write_and_close("first"));
        assert!(!sink.write_and_close("second"));

        assert_eq!(reader.read_to_end().await, Bytes::from("first"));
    }

    #[tokio::test]
    async fn dropped_sink_does_not_hang_reader() {
        let (sink, reader) = output_sink();
        drop(sink);
        assert!(reader.read_to_end().await.is_empty());
    }

    #[test]
    fn write_after_reader_dropped_is_harmless() {
        let (sink, reader) = output_sink();
        drop(reader);
        assert!(sink.write_and_close("nobody listening"));
        assert!(!sink.write_and_close("still nobody"));
    }

    #[tokio::test]
    async fn body_streams_after_late_write() {
        let (sink, reader) = output_sink();
        let body = reader.into_body();

        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            sink.write_and_close("done");
        });

        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        assert_eq!(bytes, Bytes::from("done"));
    }
}
