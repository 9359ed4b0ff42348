//! Scripted WebSocket peer standing in for the remote authority

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use marcalink_store::Envelope;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

/// Decides the reply to each inbound envelope; `None` stays silent
pub type Responder = Arc<dyn Fn(&Envelope) -> Option<Envelope> + Send + Sync>;

/// Answer every request with `{status: "ok"}` under the same act
pub fn ok_responder() -> Responder {
    Arc::new(|request: &Envelope| Some(request.reply(json!({ "status": "ok" }))))
}

/// Never answer
pub fn silent_responder() -> Responder {
    Arc::new(|_: &Envelope| None)
}

pub struct ScriptedPeer {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<Envelope>>>,
    connections: Arc<AtomicUsize>,
    kick: broadcast::Sender<()>,
    accept_loop: JoinHandle<()>,
}

impl ScriptedPeer {
    /// Listen on an ephemeral localhost port
    pub async fn start(responder: Responder) -> Self {
        Self::start_on(0, responder).await
    }

    /// Listen on a specific localhost port
    pub async fn start_on(port: u16, responder: Responder) -> Self {
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let (kick, _) = broadcast::channel(4);

        let accept_loop = {
            let received = Arc::clone(&received);
            let connections = Arc::clone(&connections);
            let kick = kick.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let Ok(ws) = accept_async(stream).await else {
                        continue;
                    };
                    connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve_connection(
                        ws,
                        Arc::clone(&responder),
                        Arc::clone(&received),
                        kick.subscribe(),
                    ));
                }
            })
        };

        Self {
            addr,
            received,
            connections,
            kick,
            accept_loop,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Every envelope received so far, across connections
    pub fn received(&self) -> Vec<Envelope> {
        self.received.lock().unwrap().clone()
    }

    pub fn received_acts(&self) -> Vec<String> {
        self.received().into_iter().map(|envelope| envelope.act).collect()
    }

    /// Connections accepted so far
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Close every open connection; the listener keeps accepting
    pub fn kick(&self) {
        let _ = self.kick.send(());
    }

    /// Close every connection and stop listening
    pub fn stop(self) {
        self.kick();
        self.accept_loop.abort();
    }
}

async fn serve_connection(
    ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    responder: Responder,
    received: Arc<Mutex<Vec<Envelope>>>,
    mut kick: broadcast::Receiver<()>,
) {
    let (mut write, mut read) = ws.split();
    loop {
        tokio::select! {
            _ = kick.recv() => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let Ok(envelope) = Envelope::parse(text.as_str()) else {
                        continue;
                    };
                    received.lock().unwrap().push(envelope.clone());
                    if let Some(reply) = responder(&envelope) {
                        let text = reply.to_json().unwrap();
                        if write.send(Message::text(text)).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }
}
