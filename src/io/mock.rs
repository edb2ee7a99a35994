// src/io/mock.rs
//
// Scripted in-memory transport for engine tests.

use async_trait::async_trait;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::mpsc;

use super::{IoError, Transport};

enum MockEvent {
    Chunk(String),
    Eof,
    Fail(String),
}

/// Transport side handed to the session
pub struct MockTransport {
    rx: mpsc::UnboundedReceiver<MockEvent>,
    written_tx: mpsc::UnboundedSender<(String, usize)>,
    chunks_read: usize,
    closed: Arc<AtomicBool>,
}

/// Device side kept by the test
pub struct MockDevice {
    tx: mpsc::UnboundedSender<MockEvent>,
    written_rx: mpsc::UnboundedReceiver<(String, usize)>,
    closed: Arc<AtomicBool>,
}

pub fn pair() -> (MockTransport, MockDevice) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (written_tx, written_rx) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));
    (
        MockTransport {
            rx,
            written_tx,
            chunks_read: 0,
            closed: closed.clone(),
        },
        MockDevice {
            tx,
            written_rx,
            closed,
        },
    )
}

impl MockDevice {
    pub fn send(&self, chunk: &str) {
        let _ = self.tx.send(MockEvent::Chunk(chunk.to_string()));
    }

    pub fn end(&self) {
        let _ = self.tx.send(MockEvent::Eof);
    }

    pub fn fail(&self, message: &str) {
        let _ = self.tx.send(MockEvent::Fail(message.to_string()));
    }

    /// Wait for the next write from the session, decoded as text
    pub async fn next_written(&mut self) -> Option<String> {
        self.next_write_with_reads().await.map(|(text, _)| text)
    }

    /// Next write, with the number of chunks the session had read before it
    pub async fn next_write_with_reads(&mut self) -> Option<(String, usize)> {
        self.written_rx.recv().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn read(&mut self) -> Result<Option<String>, IoError> {
        match self.rx.recv().await {
            Some(MockEvent::Chunk(chunk)) => {
                self.chunks_read += 1;
                Ok(Some(chunk))
            }
            Some(MockEvent::Fail(message)) => Err(IoError::read("mock", message)),
            Some(MockEvent::Eof) | None => Ok(None),
        }
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), IoError> {
        let text = String::from_utf8_lossy(bytes).into_owned();
        self.written_tx
            .send((text, self.chunks_read))
            .map_err(|_| IoError::write("mock", "device side dropped"))
    }

    async fn close(&mut self) -> Result<(), IoError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}
