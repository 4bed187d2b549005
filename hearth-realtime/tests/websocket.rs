//! End-to-end tests driving a real server over WebSocket.

use futures::{SinkExt, StreamExt};
use hearth_realtime::{
    AuthMiddleware, ConnectionHub, JwtConfig, JwtManager, Middleware, RealtimeConfig,
    RealtimeServer, Reply, UserRole, handler_fn,
};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Notify, broadcast, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    hub: ConnectionHub,
    jwt: Arc<JwtManager>,
    release: Arc<Notify>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    async fn start() -> Self {
        Self::start_with(RealtimeConfig::default()).await
    }

    async fn start_with(config: RealtimeConfig) -> Self {
        let jwt = Arc::new(JwtManager::new(&JwtConfig {
            secret: "integration-secret".to_string(),
            ..Default::default()
        }));
        let hub = ConnectionHub::new(config);
        let release = Arc::new(Notify::new());
        let auth: Arc<dyn Middleware> = Arc::new(AuthMiddleware::new(jwt.clone()));

        hub.router().on(
            "auth",
            vec![Arc::clone(&auth)],
            handler_fn(|ctx| {
                Box::pin(async move {
                    let user = ctx.require_user()?;
                    Ok(Some(Reply::new(json!({ "userId": user.sub }))))
                })
            }),
        );
        let gate = Arc::clone(&release);
        hub.router().on(
            "slow/wait",
            vec![],
            handler_fn(move |_ctx| {
                let gate = Arc::clone(&gate);
                Box::pin(async move {
                    gate.notified().await;
                    Ok(Some(Reply::new(json!({ "released": true }))))
                })
            }),
        );
        hub.router().on(
            "room/join",
            vec![Arc::clone(&auth)],
            handler_fn(|ctx| {
                Box::pin(async move {
                    let room = ctx.str_field("room").unwrap_or_default().to_string();
                    ctx.join(&room);
                    Ok(Some(Reply::new(json!({ "room": room }))))
                })
            }),
        );
        hub.router().on(
            "room/broadcast",
            vec![auth],
            handler_fn(|ctx| {
                Box::pin(async move {
                    let room = ctx.str_field("room").unwrap_or_default().to_string();
                    let text = ctx.data()["text"].clone();
                    let delivered = ctx.broadcast(&room, "room/message", json!({ "text": text }));
                    Ok(Some(Reply::new(json!({ "delivered": delivered }))))
                })
            }),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = RealtimeServer::new(hub.clone());
        tokio::spawn(async move {
            server
                .serve(listener, async {
                    let _ = shutdown_rx.await;
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            hub,
            jwt,
            release,
            shutdown: Some(shutdown_tx),
        }
    }

    async fn client(&self, token: Option<&str>) -> Client {
        let url = match token {
            Some(token) => format!("ws://{}/ws?token={token}", self.addr),
            None => format!("ws://{}/ws", self.addr),
        };
        let (stream, _) = connect_async(url).await.unwrap();
        stream
    }

    fn token(&self, user: &str) -> String {
        self.jwt.generate_token(user, UserRole::Member, None).unwrap()
    }

    async fn wait_for_connections(&self, expected: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.hub.connection_count() != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn send(client: &mut Client, event: &str, data: Value) {
    let frame = json!({ "event": event, "data": data }).to_string();
    client.send(Message::Text(frame)).await.unwrap();
}

async fn recv(client: &mut Client) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match client.next().await.unwrap().unwrap() {
                Message::Text(text) => return serde_json::from_str(&text).unwrap(),
                Message::Ping(_) | Message::Pong(_) => {}
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn test_unknown_event_keeps_socket_open() {
    let server = TestServer::start().await;
    let mut client = server.client(None).await;
    server.wait_for_connections(1).await;

    send(&mut client, "does/not/exist", json!({})).await;
    let reply = recv(&mut client).await;
    assert_eq!(reply["success"], json!(false));
    assert_eq!(reply["error"]["code"], json!("route_not_found"));
    assert_eq!(reply["error"]["statusCode"], json!(404));

    // Still usable
    client
        .send(Message::Text("not json".to_string()))
        .await
        .unwrap();
    let reply = recv(&mut client).await;
    assert_eq!(reply["event"], json!("error"));
    assert_eq!(reply["error"]["code"], json!("parse_error"));
    assert_eq!(server.hub.connection_count(), 1);
}

#[tokio::test]
async fn test_query_token_authenticates() {
    let server = TestServer::start().await;
    let token = server.token("user-1");
    let mut client = server.client(Some(&token)).await;

    send(&mut client, "auth", json!({})).await;
    let reply = recv(&mut client).await;

    assert_eq!(reply["success"], json!(true));
    assert_eq!(reply["event"], json!("auth"));
    assert_eq!(reply["data"]["userId"], json!("user-1"));
    assert!(reply["timestamp"].is_i64());
}

#[tokio::test]
async fn test_missing_token_is_rejected() {
    let server = TestServer::start().await;
    let mut client = server.client(None).await;

    send(&mut client, "room/join", json!({ "room": "family-42" })).await;
    let reply = recv(&mut client).await;

    assert_eq!(reply["error"]["code"], json!("auth_required"));
    assert_eq!(reply["error"]["statusCode"], json!(401));
    assert_eq!(server.hub.rooms().room_count(), 0);

    // Retry with an explicit token on the same socket
    let token = server.token("user-2");
    send(&mut client, "auth", json!({ "token": token })).await;
    let reply = recv(&mut client).await;
    assert_eq!(reply["data"]["userId"], json!("user-2"));
}

#[tokio::test]
async fn test_room_broadcast_reaches_other_members() {
    let server = TestServer::start().await;
    let mut alice = server.client(Some(&server.token("alice"))).await;
    let mut bob = server.client(Some(&server.token("bob"))).await;

    for client in [&mut alice, &mut bob] {
        send(client, "room/join", json!({ "room": "family-42" })).await;
        let reply = recv(client).await;
        assert_eq!(reply["data"]["room"], json!("family-42"));
    }

    send(
        &mut alice,
        "room/broadcast",
        json!({ "room": "family-42", "text": "budget updated" }),
    )
    .await;

    let ack = recv(&mut alice).await;
    assert_eq!(ack["data"]["delivered"], json!(1));

    let message = recv(&mut bob).await;
    assert_eq!(message["event"], json!("room/message"));
    assert_eq!(message["data"]["text"], json!("budget updated"));
}

#[tokio::test]
async fn test_client_close_tears_down() {
    let server = TestServer::start().await;
    let mut client = server.client(Some(&server.token("carol"))).await;
    send(&mut client, "room/join", json!({ "room": "family-7" })).await;
    recv(&mut client).await;
    assert_eq!(server.hub.rooms().room_count(), 1);

    client.close(None).await.unwrap();

    server.wait_for_connections(0).await;
    assert_eq!(server.hub.rooms().room_count(), 0);
}

#[tokio::test]
async fn test_frames_from_one_client_are_answered_in_order() {
    let server = TestServer::start().await;
    let mut client = server.client(Some(&server.token("dave"))).await;

    for i in 0..10 {
        send(&mut client, "room/join", json!({ "room": format!("room-{i}") })).await;
    }
    for i in 0..10 {
        let reply = recv(&mut client).await;
        assert_eq!(reply["data"]["room"], json!(format!("room-{i}")));
    }
}

#[tokio::test]
async fn test_slow_handler_does_not_block_other_connections() {
    let server = TestServer::start().await;
    let mut slow = server.client(None).await;
    let mut fast = server.client(Some(&server.token("erin"))).await;

    send(&mut slow, "slow/wait", json!({})).await;
    send(&mut fast, "room/join", json!({ "room": "family-9" })).await;

    let reply = recv(&mut fast).await;
    assert_eq!(reply["data"]["room"], json!("family-9"));
    assert!(
        tokio::time::timeout(Duration::from_millis(100), slow.next())
            .await
            .is_err()
    );

    server.release.notify_one();
    let reply = recv(&mut slow).await;
    assert_eq!(reply["event"], json!("slow/wait"));
    assert_eq!(reply["data"]["released"], json!(true));
}

#[tokio::test]
async fn test_heartbeat_keeps_responsive_peers_and_reaps_silent_ones() {
    let interval = Duration::from_millis(200);
    let server = TestServer::start().await;
    let (stop_tx, stop_rx) = broadcast::channel(1);
    let heartbeat = server.hub.heartbeat().with_interval(interval).spawn(stop_rx);

    let mut responsive = server.client(Some(&server.token("frank"))).await;
    let mut silent = server.client(Some(&server.token("grace"))).await;
    send(&mut responsive, "room/join", json!({ "room": "alive" })).await;
    recv(&mut responsive).await;
    send(&mut silent, "room/join", json!({ "room": "quiet" })).await;
    recv(&mut silent).await;
    assert_eq!(server.hub.rooms().room_count(), 2);

    // Polling the stream lets tungstenite answer pings; `silent` is never read again
    let reader = tokio::spawn(async move {
        while let Some(Ok(frame)) = responsive.next().await {
            if frame.is_close() {
                break;
            }
        }
    });

    server.wait_for_connections(1).await;
    assert_eq!(server.hub.rooms().rooms(), vec!["alive".to_string()]);

    // Several more ticks: the responsive peer stays
    tokio::time::sleep(interval * 4).await;
    assert_eq!(server.hub.connection_count(), 1);
    assert_eq!(server.hub.rooms().room_count(), 1);

    let _ = stop_tx.send(());
    heartbeat.await.unwrap();
    reader.abort();
    drop(silent);
}
