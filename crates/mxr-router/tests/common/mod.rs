use futures_util::{SinkExt, StreamExt};
use mxr_proto::{AgentID, MagicCookie, Message, MessageCodec, RegistrationStatus};
use mxr_router::config::RouterConfig;
use mxr_router::RouterState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

pub fn test_config(listen: SocketAddr) -> RouterConfig {
    RouterConfig {
        listen,
        max_conns: 1000,
        max_frame: 1_048_576,
        registration_timeout: 5,
    }
}

pub struct TestClient {
    pub framed: Framed<TcpStream, MessageCodec>,
    pub agent_id: AgentID,
    pub router_id: u64,
    next_msg_id: u64,
}

impl TestClient {
    /// Connect and register with a router-assigned agent id.
    pub async fn connect(addr: &SocketAddr, cookie: &MagicCookie) -> Self {
        let mut framed = raw_connect(addr).await;
        framed
            .send(Message::registration_request(0, None, 0, *cookie))
            .await
            .unwrap();

        let reply = framed.next().await.unwrap().unwrap();
        let Message::RegistrationReply {
            agent_id,
            router_id,
            status,
            ..
        } = reply
        else {
            panic!("expected RegistrationReply, got {reply:?}");
        };
        assert_eq!(status, RegistrationStatus::Ok, "registration rejected");

        Self {
            framed,
            agent_id,
            router_id,
            next_msg_id: 1,
        }
    }

    pub fn next_msg_id(&mut self) -> u64 {
        let id = self.next_msg_id;
        self.next_msg_id += 1;
        id
    }

    pub async fn send_data(&mut self, dest: AgentID, payload: &[u8]) -> u64 {
        let msg_id = self.next_msg_id();
        self.framed
            .send(Message::data_request(
                msg_id,
                self.agent_id,
                dest,
                Some(payload.to_vec()),
            ))
            .await
            .unwrap();
        msg_id
    }

    pub async fn send_reply(&mut self, dest: AgentID, msg_id: u64, payload: &[u8]) {
        self.framed
            .send(Message::data_reply(
                msg_id,
                self.agent_id,
                dest,
                Some(payload.to_vec()),
            ))
            .await
            .unwrap();
    }

    pub async fn recv(&mut self) -> Message {
        tokio::time::timeout(Duration::from_secs(5), self.framed.next())
            .await
            .expect("timeout waiting for frame")
            .expect("connection closed")
            .expect("codec error")
    }

    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<Message> {
        match tokio::time::timeout(timeout, self.framed.next()).await {
            Ok(Some(Ok(msg))) => Some(msg),
            _ => None,
        }
    }
}

/// Open a framed connection without registering.
pub async fn raw_connect(addr: &SocketAddr) -> Framed<TcpStream, MessageCodec> {
    let stream = TcpStream::connect(addr).await.unwrap();
    Framed::new(stream, MessageCodec::default())
}

/// Send a registration request on a raw connection and return the reply.
pub async fn register_raw(
    framed: &mut Framed<TcpStream, MessageCodec>,
    agent_id: Option<AgentID>,
    router_id: u64,
    cookie: &MagicCookie,
) -> Message {
    framed
        .send(Message::registration_request(0, agent_id, router_id, *cookie))
        .await
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), framed.next())
        .await
        .expect("timeout waiting for registration reply")
        .expect("connection closed")
        .expect("codec error")
}

pub async fn start_server() -> (SocketAddr, MagicCookie, Arc<RouterState>) {
    start_server_with_config(|_| {}).await
}

pub async fn start_server_with_config(
    tweak: impl FnOnce(&mut RouterConfig),
) -> (SocketAddr, MagicCookie, Arc<RouterState>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mut config = test_config(addr);
    tweak(&mut config);

    let cookie = MagicCookie::random();
    let state = Arc::new(RouterState::new(config, cookie));

    let state_clone = state.clone();
    tokio::spawn(async move {
        if let Err(e) = mxr_router::run(listener, state_clone).await {
            eprintln!("router error in test: {e}");
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    (addr, cookie, state)
}
