//! Injector publisher: feeds published messages back into another coupler's
//! write path, the router's loop-back path for cross-coupler forwarding.

use tokio::sync::mpsc;
use tracing::debug;

use nmea2k::MessageEnvelope;

pub struct InjectorBackend {
    target: String,
    sender: mpsc::Sender<MessageEnvelope>,
}

impl InjectorBackend {
    pub fn new(target: String, sender: mpsc::Sender<MessageEnvelope>) -> Self {
        InjectorBackend { target, sender }
    }

    pub async fn process_msg(&mut self, envelope: &MessageEnvelope) {
        if self.sender.send(envelope.clone()).await.is_err() {
            debug!(target = %self.target, "injector target coupler is gone");
        }
    }
}
