use futures_util::{SinkExt, StreamExt};
use mxr_agent::{Agent, AgentConfig, AgentError, AgentID, AgentStatus, Dispatcher, TcpConnector};
use mxr_proto::{DeliveryStatus, MagicCookie, Message, MessageCodec, RegistrationStatus};
use mxr_router::config::RouterConfig;
use mxr_router::RouterState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch};
use tokio_util::codec::Framed;

async fn start_router() -> (SocketAddr, MagicCookie) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = RouterConfig {
        listen: addr,
        max_conns: 1000,
        max_frame: 1_048_576,
        registration_timeout: 5,
    };
    let cookie = MagicCookie::random();
    let state = Arc::new(RouterState::new(config, cookie));

    tokio::spawn(async move {
        if let Err(e) = mxr_router::run(listener, state).await {
            eprintln!("router error in test: {e}");
        }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    (addr, cookie)
}

fn agent_config(addr: SocketAddr, cookie: MagicCookie) -> AgentConfig {
    let mut config = AgentConfig::new(addr, cookie);
    config.send_timeout = Duration::from_secs(5);
    config.reconnect.initial_delay_ms = 50;
    config.reconnect.max_delay_ms = 200;
    config
}

fn echo_reversed() -> Arc<dyn Dispatcher> {
    Arc::new(|_from: AgentID, payload: Option<Vec<u8>>| {
        payload.map(|mut bytes| {
            bytes.reverse();
            bytes
        })
    })
}

async fn wait_for_status(rx: &mut watch::Receiver<AgentStatus>, target: AgentStatus) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while *rx.borrow_and_update() != target {
            rx.changed().await.unwrap();
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {target:?}"));
}

/// TCP proxy whose live connections can be severed on demand, leaving the
/// upstream router running for reconnection tests.
struct KillSwitchProxy {
    addr: SocketAddr,
    kill_tx: broadcast::Sender<()>,
    close_tx: broadcast::Sender<()>,
}

impl KillSwitchProxy {
    async fn start(upstream: SocketAddr) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (kill_tx, _) = broadcast::channel(1);
        let (close_tx, mut close_rx) = broadcast::channel(1);

        let accept_kill = kill_tx.clone();
        tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    accepted = listener.accept() => accepted,
                    _ = close_rx.recv() => return,
                };
                let Ok((mut inbound, _)) = accepted else {
                    return;
                };
                let mut kill_rx = accept_kill.subscribe();
                tokio::spawn(async move {
                    let Ok(mut outbound) = TcpStream::connect(upstream).await else {
                        return;
                    };
                    tokio::select! {
                        _ = tokio::io::copy_bidirectional(&mut inbound, &mut outbound) => {}
                        _ = kill_rx.recv() => {}
                    }
                });
            }
        });

        Self {
            addr,
            kill_tx,
            close_tx,
        }
    }

    fn sever(&self) {
        let _ = self.kill_tx.send(());
    }

    /// Sever live connections and stop accepting new ones, simulating a
    /// full outage on the agent's route to the router.
    fn close(&self) {
        let _ = self.close_tx.send(());
        self.sever();
    }
}

#[tokio::test]
async fn request_reply_round_trip() {
    let (addr, cookie) = start_router().await;

    let responder = Agent::connect_with(
        agent_config(addr, cookie),
        TcpConnector::new(addr),
        Some(echo_reversed()),
    )
    .await
    .unwrap();
    let requester = Agent::connect(agent_config(addr, cookie), None).await.unwrap();

    let reply = requester
        .send(responder.agent_id(), Some(b"ping".to_vec()))
        .await
        .unwrap();
    assert_eq!(reply, Some(b"gnip".to_vec()));
}

#[tokio::test]
async fn absent_payload_round_trips_as_absent() {
    let (addr, cookie) = start_router().await;

    let responder = Agent::connect(agent_config(addr, cookie), Some(echo_reversed()))
        .await
        .unwrap();
    let requester = Agent::connect(agent_config(addr, cookie), None).await.unwrap();

    let reply = requester.send(responder.agent_id(), None).await.unwrap();
    assert_eq!(reply, None);
}

#[tokio::test]
async fn agent_without_dispatcher_acknowledges_without_content() {
    let (addr, cookie) = start_router().await;

    let silent = Agent::connect(agent_config(addr, cookie), None).await.unwrap();
    let requester = Agent::connect(agent_config(addr, cookie), None).await.unwrap();

    let reply = requester
        .send(silent.agent_id(), Some(b"anyone home?".to_vec()))
        .await
        .unwrap();
    assert_eq!(reply, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_resolve_to_their_own_replies() {
    let (addr, cookie) = start_router().await;

    let responder = Agent::connect(agent_config(addr, cookie), Some(echo_reversed()))
        .await
        .unwrap();
    let requester = Arc::new(Agent::connect(agent_config(addr, cookie), None).await.unwrap());

    let dest = responder.agent_id();
    let mut handles = Vec::new();
    for i in 0..20u8 {
        let requester = Arc::clone(&requester);
        handles.push(tokio::spawn(async move {
            let payload = vec![i, i + 1, i + 2];
            let reply = requester.send(dest, Some(payload)).await.unwrap();
            assert_eq!(reply, Some(vec![i + 2, i + 1, i]));
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
}

// A raw responder answers a batch of requests in reverse arrival order:
// every caller must still receive the reply carrying its own message id,
// whatever order the replies come back in.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn permuted_replies_reach_their_own_callers() {
    const BATCH: usize = 8;
    let (addr, cookie) = start_router().await;

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut framed = Framed::new(stream, MessageCodec::default());
    framed
        .send(Message::registration_request(1, None, 0, cookie))
        .await
        .unwrap();
    let responder_id = match framed.next().await.unwrap().unwrap() {
        Message::RegistrationReply {
            agent_id,
            status: RegistrationStatus::Ok,
            ..
        } => agent_id,
        other => panic!("expected successful RegistrationReply, got {other:?}"),
    };

    let responder = tokio::spawn(async move {
        let mut requests = Vec::with_capacity(BATCH);
        while requests.len() < BATCH {
            match framed.next().await.unwrap().unwrap() {
                Message::DataRequest {
                    msg_id,
                    sender,
                    payload,
                    ..
                } => requests.push((msg_id, sender, payload)),
                other => panic!("expected DataRequest, got {other:?}"),
            }
        }
        for (msg_id, sender, payload) in requests.into_iter().rev() {
            framed
                .send(Message::data_reply(msg_id, responder_id, sender, payload))
                .await
                .unwrap();
        }
    });

    let requester = Arc::new(Agent::connect(agent_config(addr, cookie), None).await.unwrap());
    let mut handles = Vec::new();
    for i in 0..BATCH as u8 {
        let requester = Arc::clone(&requester);
        handles.push(tokio::spawn(async move {
            let reply = requester.send(responder_id, Some(vec![i; 4])).await.unwrap();
            assert_eq!(reply, Some(vec![i; 4]));
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    responder.await.unwrap();
}

#[tokio::test]
async fn send_to_unknown_agent_is_unroutable() {
    let (addr, cookie) = start_router().await;

    let agent = Agent::connect(agent_config(addr, cookie), None).await.unwrap();

    let err = agent
        .send(AgentID::new(9999), Some(b"hello?".to_vec()))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AgentError::Unroutable(DeliveryStatus::UnknownRecipient)
    ));
}

#[tokio::test]
async fn wrong_cookie_fails_connect() {
    let (addr, _cookie) = start_router().await;

    let config = agent_config(addr, MagicCookie::random());
    let err = Agent::connect(config, None).await.unwrap_err();
    assert!(matches!(
        err,
        AgentError::Registration(RegistrationStatus::WrongCookie)
    ));
}

#[tokio::test]
async fn connect_dials_the_configured_router_addr() {
    // A port with nothing listening on it: connect must fail against the
    // configured address rather than silently dialing anywhere else.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = Agent::connect(agent_config(addr, MagicCookie::random()), None)
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Io(_) | AgentError::Timeout));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn severed_link_fails_inflight_requests() {
    let (router_addr, cookie) = start_router().await;
    let proxy = KillSwitchProxy::start(router_addr).await;

    let slow: Arc<dyn Dispatcher> = Arc::new(|_from: AgentID, _payload: Option<Vec<u8>>| {
        std::thread::sleep(Duration::from_secs(3));
        Some(b"too late".to_vec())
    });
    let responder = Agent::connect(agent_config(router_addr, cookie), Some(slow))
        .await
        .unwrap();

    let requester = Arc::new(
        Agent::connect(agent_config(proxy.addr, cookie), None)
            .await
            .unwrap(),
    );

    let dest = responder.agent_id();
    let inflight = {
        let requester = Arc::clone(&requester);
        tokio::spawn(async move { requester.send(dest, Some(b"ping".to_vec())).await })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    proxy.sever();

    let result = inflight.await.unwrap();
    assert!(matches!(result, Err(AgentError::ConnectionLost)));
}

#[tokio::test]
async fn agent_reconnects_under_the_same_identity() {
    let (router_addr, cookie) = start_router().await;
    let proxy = KillSwitchProxy::start(router_addr).await;

    let responder = Agent::connect(agent_config(router_addr, cookie), Some(echo_reversed()))
        .await
        .unwrap();
    let requester = Agent::connect(agent_config(proxy.addr, cookie), None)
        .await
        .unwrap();
    let identity = requester.agent_id();

    let reply = requester
        .send(responder.agent_id(), Some(b"before".to_vec()))
        .await
        .unwrap();
    assert_eq!(reply, Some(b"erofeb".to_vec()));

    let mut status = requester.subscribe_status();
    proxy.sever();
    wait_for_status(&mut status, AgentStatus::Disconnected).await;
    wait_for_status(&mut status, AgentStatus::Ready).await;

    assert_eq!(requester.agent_id(), identity);
    let reply = requester
        .send(responder.agent_id(), Some(b"after".to_vec()))
        .await
        .unwrap();
    assert_eq!(reply, Some(b"retfa".to_vec()));
}

// During an outage the outbox fills with queued requests; a send that
// cannot even enqueue must still respect its deadline instead of blocking
// until the link comes back.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn send_respects_deadline_with_outbox_full() {
    let (router_addr, cookie) = start_router().await;
    let proxy = KillSwitchProxy::start(router_addr).await;

    let agent = Arc::new(
        Agent::connect(agent_config(proxy.addr, cookie), None)
            .await
            .unwrap(),
    );
    let mut status = agent.subscribe_status();
    proxy.close();
    wait_for_status(&mut status, AgentStatus::Disconnected).await;

    // Saturate the outbox with requests that hold their slots while the
    // link is down.
    let dest = AgentID::new(9999);
    let mut fillers = Vec::new();
    for _ in 0..512 {
        let agent = Arc::clone(&agent);
        fillers.push(tokio::spawn(async move {
            let _ = agent
                .send_with_timeout(dest, None, Duration::from_secs(30))
                .await;
        }));
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = std::time::Instant::now();
    let err = agent
        .send_with_timeout(dest, None, Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Timeout));
    assert!(
        started.elapsed() < Duration::from_secs(2),
        "send overran its deadline by {:?}",
        started.elapsed()
    );

    for filler in fillers {
        filler.abort();
    }
}

#[tokio::test]
async fn shutdown_stops_later_sends() {
    let (addr, cookie) = start_router().await;

    let agent = Agent::connect(agent_config(addr, cookie), None).await.unwrap();
    let mut status = agent.subscribe_status();

    agent.shutdown();
    wait_for_status(&mut status, AgentStatus::Disconnected).await;

    let err = agent
        .send(AgentID::new(0), Some(b"too late".to_vec()))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AgentError::ShutDown | AgentError::ConnectionLost
    ));
}
