//! TCP server publisher: accepts any number of clients and broadcasts every
//! published message to each of them, line-framed the same way the TCP
//! coupler backend frames its own traffic.

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use std::sync::Arc;
use tracing::{info, warn};

use nmea2k::nmea0183::encode_pdgy;
use nmea2k::MessageEnvelope;

pub struct TcpServerBackend {
    clients: Arc<Mutex<Vec<OwnedWriteHalf>>>,
}

impl TcpServerBackend {
    pub async fn bind(name: String, bind: &str) -> std::io::Result<Self> {
        let listener = TcpListener::bind(bind).await?;
        let clients: Arc<Mutex<Vec<OwnedWriteHalf>>> = Arc::new(Mutex::new(Vec::new()));
        let accept_clients = clients.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        info!(publisher = %name, %peer, "client connected");
                        let (_reader, writer) = stream.into_split();
                        accept_clients.lock().await.push(writer);
                    }
                    Err(e) => {
                        warn!(publisher = %name, "accept error: {e}, ending accept loop");
                        break;
                    }
                }
            }
        });
        Ok(TcpServerBackend { clients })
    }

    pub async fn process_msg(&mut self, envelope: &MessageEnvelope) {
        let text = match envelope {
            MessageEnvelope::Nmea0183(sentence) => sentence.raw.clone() + "\r\n",
            MessageEnvelope::Nmea2000Raw(msg) => encode_pdgy(msg),
            MessageEnvelope::Nmea2000Decoded(_) => return,
        };
        let mut clients = self.clients.lock().await;
        let mut i = 0;
        while i < clients.len() {
            if clients[i].write_all(text.as_bytes()).await.is_err() {
                clients.remove(i);
            } else {
                i += 1;
            }
        }
    }
}
