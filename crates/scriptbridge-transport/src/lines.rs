//! JSON-lines framing over byte streams.
//!
//! Lets the execution context live in a separate process: each message is
//! one JSON record per line on the child's stdin/stdout.

use scriptbridge_core::Message;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    sync::mpsc,
    task::JoinHandle,
};

use crate::channel::{Endpoint, Receiver, Sender, Side};

/// Background tasks pumping messages between a stream pair and an endpoint.
pub struct LinkTasks {
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl LinkTasks {
    /// Wait until every queued outgoing message has been written and flushed.
    ///
    /// Completes once all [`Sender`]s of the endpoint have been dropped.
    pub async fn flush(self) {
        if let Err(e) = self.writer.await {
            tracing::error!("Line writer task failed: {e}");
        }
        self.reader.abort();
    }

    /// Stop both pumps immediately.
    pub fn abort(&self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// Connect `side` to a peer reachable through `reader`/`writer`.
#[must_use]
pub fn connect<R, W>(reader: R, writer: W, side: Side) -> (Endpoint, LinkTasks)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    let reader = tokio::spawn(async move {
        if let Err(e) = read_loop(reader, inbound_tx).await {
            tracing::error!("Line reader loop error: {e}");
        }
    });
    let writer = tokio::spawn(async move {
        if let Err(e) = write_loop(writer, outbound_rx).await {
            tracing::error!("Line writer loop error: {e}");
        }
    });

    let endpoint = Endpoint {
        sender: Sender::new(outbound_tx, side.outgoing()),
        receiver: Receiver::new(inbound_rx, side.incoming()),
    };

    (endpoint, LinkTasks { reader, writer })
}

async fn read_loop<R>(reader: R, tx: mpsc::UnboundedSender<Message>) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buffer = String::new();

    loop {
        buffer.clear();
        if reader.read_line(&mut buffer).await? == 0 {
            break; // EOF
        }
        let line = buffer.trim();
        if line.is_empty() {
            continue;
        }
        match Message::decode(line) {
            Ok(msg) => {
                tracing::trace!(kind = msg.kind(), "Received message");
                if tx.send(msg).is_err() {
                    break;
                }
            }
            Err(e) => tracing::warn!("Ignoring invalid message: {e}"),
        }
    }
    Ok(())
}

async fn write_loop<W>(writer: W, mut rx: mpsc::UnboundedReceiver<Message>) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut writer = writer;
    while let Some(msg) = rx.recv().await {
        let json = match msg.encode() {
            Ok(j) => j,
            Err(e) => {
                tracing::error!("Failed to serialize message: {e}");
                continue;
            }
        };
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    writer.shutdown().await
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, duplex};

    use super::*;

    #[tokio::test]
    async fn test_invalid_lines_are_skipped() {
        let (mut peer, local) = duplex(4096);
        let (reader, writer) = tokio::io::split(local);
        let (mut endpoint, _tasks) = connect(reader, writer, Side::Worker);

        peer.write_all(b"{\"type\":\"resize\",\"cols\":80}\n")
            .await
            .unwrap();
        peer.write_all(b"not json\n\n").await.unwrap();
        peer.write_all(b"{\"type\":\"run\",\"code\":\"print(1);\"}\n")
            .await
            .unwrap();

        let msg = endpoint.receiver.recv().await.unwrap();
        assert_eq!(msg, Message::run("print(1);"));
    }

    #[tokio::test]
    async fn test_outgoing_messages_are_line_delimited() {
        let (mut peer, local) = duplex(4096);
        let (reader, writer) = tokio::io::split(local);
        let (endpoint, tasks) = connect(reader, writer, Side::Worker);

        endpoint.sender.send(Message::output("hi")).unwrap();
        endpoint.sender.send(Message::RunEnd).unwrap();
        drop(endpoint);
        tasks.flush().await;

        let mut raw = String::new();
        peer.read_to_string(&mut raw).await.unwrap();
        assert_eq!(
            raw,
            "{\"type\":\"output\",\"data\":\"hi\"}\n{\"type\":\"run-end\"}\n"
        );
    }

    #[tokio::test]
    async fn test_two_linked_endpoints() {
        let (a, b) = duplex(4096);
        let (a_read, a_write) = tokio::io::split(a);
        let (b_read, b_write) = tokio::io::split(b);
        let (mut host, _host_tasks) = connect(a_read, a_write, Side::Host);
        let (mut worker, _worker_tasks) = connect(b_read, b_write, Side::Worker);

        host.sender.send(Message::input_response("Ada")).unwrap();
        assert_eq!(
            worker.receiver.recv().await,
            Some(Message::input_response("Ada"))
        );

        worker.sender.send(Message::input_request("name?")).unwrap();
        assert_eq!(
            host.receiver.recv().await,
            Some(Message::input_request("name?"))
        );
    }
}
