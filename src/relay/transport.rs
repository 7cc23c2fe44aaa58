use tokio::sync::mpsc::{self, error::TrySendError};

use crate::error::{CoreError, CoreResult};

/// Outbound link to the companion device. Delivery is best effort: an
/// implementation must never block, and may refuse with `RelayUnreachable`.
pub trait CompanionTransport: Send + Sync {
    fn try_deliver(&self, payload: Vec<u8>) -> CoreResult<()>;
}

/// Bounded in-process queue; whoever drains the receiver plays the companion.
pub struct ChannelTransport {
    sender: mpsc::Sender<Vec<u8>>,
}

impl ChannelTransport {
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

impl CompanionTransport for ChannelTransport {
    fn try_deliver(&self, payload: Vec<u8>) -> CoreResult<()> {
        self.sender.try_send(payload).map_err(|err| match err {
            TrySendError::Full(_) => CoreError::RelayUnreachable("companion queue is full".into()),
            TrySendError::Closed(_) => {
                CoreError::RelayUnreachable("companion is not listening".into())
            }
        })
    }
}
