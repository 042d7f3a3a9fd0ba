//! In-process message channel between host and execution context.
//!
//! Each direction is an unbounded FIFO, so messages arrive in send order.
//! Nothing orders the two directions relative to each other.

use scriptbridge_core::{Direction, Message};
use tokio::sync::mpsc;

/// Side of the bridge an endpoint belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The controlling host.
    Host,
    /// The isolated execution context.
    Worker,
}

impl Side {
    /// Direction of messages this side sends.
    #[must_use]
    pub const fn outgoing(self) -> Direction {
        match self {
            Self::Host => Direction::ToWorker,
            Self::Worker => Direction::ToHost,
        }
    }

    /// Direction of messages this side accepts.
    #[must_use]
    pub const fn incoming(self) -> Direction {
        match self {
            Self::Host => Direction::ToHost,
            Self::Worker => Direction::ToWorker,
        }
    }
}

/// Sending half of an endpoint. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Sender {
    tx: mpsc::UnboundedSender<Message>,
    direction: Direction,
}

impl Sender {
    pub(crate) const fn new(tx: mpsc::UnboundedSender<Message>, direction: Direction) -> Self {
        Self { tx, direction }
    }

    /// Send a message to the other side.
    ///
    /// # Errors
    /// Returns error if the message travels the wrong way or the channel is
    /// closed.
    pub fn send(&self, msg: Message) -> Result<(), SendError> {
        if msg.direction() != self.direction {
            return Err(SendError::WrongDirection(msg.kind()));
        }
        self.tx.send(msg).map_err(|_| SendError::ChannelClosed)
    }

    /// Whether the other side has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half of an endpoint.
///
/// Messages travelling the wrong way are protocol errors: they are logged and
/// dropped, never handed to the caller.
#[derive(Debug)]
pub struct Receiver {
    rx: mpsc::UnboundedReceiver<Message>,
    direction: Direction,
}

impl Receiver {
    pub(crate) const fn new(rx: mpsc::UnboundedReceiver<Message>, direction: Direction) -> Self {
        Self { rx, direction }
    }

    /// Receive the next message. Returns `None` once the other side is gone.
    pub async fn recv(&mut self) -> Option<Message> {
        loop {
            let msg = self.rx.recv().await?;
            if self.accepts(&msg) {
                return Some(msg);
            }
        }
    }

    /// Receive a message if one is already queued.
    pub fn try_recv(&mut self) -> Option<Message> {
        while let Ok(msg) = self.rx.try_recv() {
            if self.accepts(&msg) {
                return Some(msg);
            }
        }
        None
    }

    fn accepts(&self, msg: &Message) -> bool {
        if msg.direction() == self.direction {
            true
        } else {
            tracing::warn!(kind = msg.kind(), "Dropping message sent in the wrong direction");
            false
        }
    }
}

/// One side's view of the bridge.
#[derive(Debug)]
pub struct Endpoint {
    /// Messages to the other side.
    pub sender: Sender,
    /// Messages from the other side.
    pub receiver: Receiver,
}

impl Endpoint {
    /// Split into sending and receiving halves.
    #[must_use]
    pub fn split(self) -> (Sender, Receiver) {
        (self.sender, self.receiver)
    }
}

/// Create a connected pair of endpoints: `(host, worker)`.
#[must_use]
pub fn pair() -> (Endpoint, Endpoint) {
    let (to_worker_tx, to_worker_rx) = mpsc::unbounded_channel();
    let (to_host_tx, to_host_rx) = mpsc::unbounded_channel();

    let host = Endpoint {
        sender: Sender::new(to_worker_tx, Side::Host.outgoing()),
        receiver: Receiver::new(to_host_rx, Side::Host.incoming()),
    };
    let worker = Endpoint {
        sender: Sender::new(to_host_tx, Side::Worker.outgoing()),
        receiver: Receiver::new(to_worker_rx, Side::Worker.incoming()),
    };

    (host, worker)
}

/// Send error.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("Channel closed")]
    ChannelClosed,
    #[error("Message type '{0}' cannot be sent from this side")]
    WrongDirection(&'static str),
}
