use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use clap::Parser;
use failure::Error;
use futures_channel::mpsc::unbounded;
use futures_util::{future, pin_mut, stream::TryStreamExt, StreamExt};
use log::info;
use serde::Serialize;
use warp::ws::{Message, WebSocket};
use warp::{Filter, Rejection, Reply};

use crate::args::Args;
use crate::config::Config;
use crate::peer::ConnectionId;
use crate::state::StateType;

mod args;
mod auth;
mod config;
mod error;
mod metrics;
mod peer;
mod relay_message;
mod router;
mod session;
mod state;

type Result<T> = std::result::Result<T, Error>;

const BUNDLED_INDEX: &str = include_str!("../static/index.html");

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    active_sessions: usize,
}

async fn health_handler(state: StateType) -> std::result::Result<impl Reply, Rejection> {
    let active_sessions = state.lock().await.active_sessions();
    Ok(warp::reply::json(&HealthResponse {
        status: "ok",
        active_sessions,
    }))
}

async fn process_message(
    msg: Message,
    state: StateType,
    conn: ConnectionId,
) -> std::result::Result<(), warp::Error> {
    if !msg.is_text() {
        return Ok(());
    }

    if let Ok(s) = msg.to_str() {
        let mut locked_state = state.lock().await;
        if let Err(e) = router::handle_message(&mut locked_state, conn, s) {
            info!(
                "Error occurred when handling message: {}\nMessage: {}",
                e, s
            );
        }
    }
    Ok(())
}

async fn handle_connection(args: Args, state: StateType, websocket: WebSocket, ip: Option<IpAddr>) {
    let ip_label = metrics::ip_label(ip, args.ip_hash_salt.as_deref());

    metrics::NUM_CONNECTED_CLIENTS
        .with_label_values(&[ip_label.as_str()])
        .inc();

    // Insert the write part of this peer to the peer map.
    let (tx, rx) = unbounded();
    let conn = state.lock().await.add_peer(tx, ip);
    info!("WebSocket connection {} established: {:?}", conn, ip);

    let (outgoing, incoming) = websocket.split();

    let handle_incoming = incoming.try_for_each(|msg| process_message(msg, state.clone(), conn));

    let receive_from_others = rx.map(Ok).forward(outgoing);

    pin_mut!(handle_incoming, receive_from_others);
    future::select(handle_incoming, receive_from_others).await;

    metrics::NUM_CONNECTED_CLIENTS
        .with_label_values(&[ip_label.as_str()])
        .dec();
    info!("Connection {} disconnected", conn);
    state.lock().await.on_disconnect(conn);
}

/// The socket peer, unless it is a trusted proxy, in which case the
/// right-most untrusted X-Forwarded-For entry.
fn client_ip(remote: Option<SocketAddr>, forwarded_for: &[IpAddr], trusted: &[IpAddr]) -> Option<IpAddr> {
    let remote = remote.map(|addr| addr.ip());
    match remote {
        Some(ip) if trusted.contains(&ip) => forwarded_for
            .iter()
            .rev()
            .find(|hop| !trusted.contains(hop))
            .copied()
            .or(Some(ip)),
        _ => remote,
    }
}

fn load_index(config: &Config) -> Result<Arc<String>> {
    match &config.index_html {
        Some(path) => Ok(Arc::new(std::fs::read_to_string(path)?)),
        None => Ok(Arc::new(BUNDLED_INDEX.to_owned())),
    }
}

pub(crate) fn routes(
    args: Args,
    state: StateType,
    index: Arc<String>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    use warp::{any, ws};

    let with_state = {
        let state = state.clone();
        any().map(move || state.clone())
    };

    let health_route = warp::path!("health")
        .and(warp::get())
        .and(with_state.clone())
        .and_then(health_handler);
    let metrics_route = warp::path!("metrics").and_then(metrics::metrics_handler);
    let ws_route = warp::path::end()
        .and(ws())
        .and(warp::addr::remote())
        .and(warp_real_ip::get_forwarded_for())
        .and(any().map(move || args.clone()))
        .and(with_state)
        .map(
            |ws: ws::Ws,
             remote: Option<SocketAddr>,
             forwarded_for: Vec<IpAddr>,
             args: Args,
             state: StateType| {
                let ip = client_ip(remote, &forwarded_for, &args.trusted_proxy);
                ws.on_upgrade(move |socket| handle_connection(args, state, socket, ip))
            },
        );
    let index_route = warp::path::end()
        .and(warp::get())
        .map(move || warp::reply::html(index.as_str().to_owned()));

    health_route
        .or(metrics_route)
        .or(ws_route)
        .or(index_route)
}

pub(crate) async fn start_server(addr: SocketAddr, args: Args, state: StateType, index: Arc<String>) {
    metrics::register();

    info!("Server listening on {}", addr);
    warp::serve(routes(args, state, index)).run(addr).await;
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );
    let args = Args::parse();
    let address = SocketAddr::new(args.address, args.port);

    let config = config::load(&args.config)?;
    let index = load_index(&config)?;
    let state = state::State::new(&config);

    start_server(address, args, state, index).await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::Value;
    use warp::test::WsClient;

    use super::*;
    use crate::state::State;

    fn test_args() -> Args {
        Args {
            address: IpAddr::from([127, 0, 0, 1]),
            port: 0,
            config: "relay.toml".into(),
            trusted_proxy: vec![],
            ip_hash_salt: None,
        }
    }

    fn test_routes(
        config: &Config,
    ) -> (
        StateType,
        impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone,
    ) {
        let state = State::new(config);
        let routes = routes(
            test_args(),
            state.clone(),
            Arc::new(BUNDLED_INDEX.to_owned()),
        );
        (state, routes)
    }

    async fn recv_json(client: &mut WsClient) -> Value {
        let msg = tokio::time::timeout(Duration::from_secs(5), client.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed");
        serde_json::from_str(msg.to_str().unwrap()).unwrap()
    }

    async fn assert_silent(client: &mut WsClient) {
        let res = tokio::time::timeout(Duration::from_millis(100), client.recv()).await;
        assert!(res.is_err(), "unexpected frame: {:?}", res);
    }

    #[test]
    fn client_ip_trusts_only_configured_proxies() {
        let proxy: IpAddr = "10.0.0.1".parse().unwrap();
        let client: IpAddr = "198.51.100.4".parse().unwrap();
        let spoofed: IpAddr = "192.0.2.99".parse().unwrap();

        let via_proxy = Some(SocketAddr::new(proxy, 4000));
        assert_eq!(
            client_ip(via_proxy, &[spoofed, client], &[proxy]),
            Some(client)
        );
        assert_eq!(client_ip(via_proxy, &[], &[proxy]), Some(proxy));

        let direct = Some(SocketAddr::new(client, 4000));
        assert_eq!(client_ip(direct, &[spoofed], &[proxy]), Some(client));
        assert_eq!(client_ip(None, &[spoofed], &[proxy]), None);
    }

    #[tokio::test]
    async fn health_counts_sessions() {
        let (state, routes) = test_routes(&Config::default());

        let res = warp::test::request().path("/health").reply(&routes).await;
        assert_eq!(res.status(), 200);
        let body: Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["activeSessions"], 0);

        {
            let mut state = state.lock().await;
            let (tx, _rx) = unbounded();
            let pc = state.add_peer(tx, None);
            state
                .register_owner("N1".into(), Default::default(), pc)
                .unwrap();
        }
        let res = warp::test::request().path("/health").reply(&routes).await;
        let body: Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["activeSessions"], 1);
    }

    #[tokio::test]
    async fn index_is_served_without_upgrade() {
        let (_state, routes) = test_routes(&Config::default());
        let res = warp::test::request().path("/").reply(&routes).await;
        assert_eq!(res.status(), 200);
        assert!(String::from_utf8_lossy(res.body()).contains("<html"));
    }

    #[tokio::test]
    async fn metrics_endpoint_responds() {
        let (_state, routes) = test_routes(&Config::default());
        let res = warp::test::request().path("/metrics").reply(&routes).await;
        assert_eq!(res.status(), 200);
    }

    #[tokio::test]
    async fn relay_over_websockets() {
        let (_state, routes) = test_routes(&Config::default());

        let mut pc = warp::test::ws()
            .path("/")
            .handshake(routes.clone())
            .await
            .expect("pc handshake");
        pc.send_text(r#"{"type":"register_pc","uniqueId":"N172SP","password":"pw","guestPassword":"guest"}"#)
            .await;
        assert_eq!(recv_json(&mut pc).await["type"], "registered");

        let mut mobile = warp::test::ws()
            .path("/")
            .handshake(routes.clone())
            .await
            .expect("mobile handshake");
        mobile
            .send_text(r#"{"type":"connect_mobile","uniqueId":"N000"}"#)
            .await;
        let reply = recv_json(&mut mobile).await;
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["message"], "Invalid ID");

        mobile
            .send_text(r#"{"type":"connect_mobile","uniqueId":"N172SP"}"#)
            .await;
        let reply = recv_json(&mut mobile).await;
        assert_eq!(reply["type"], "connected");
        assert_eq!(reply["pcOnline"], true);

        mobile.send_text(r#"{"type":"toggle_gear"}"#).await;
        assert_eq!(recv_json(&mut mobile).await["type"], "control_required");
        assert_silent(&mut pc).await;

        mobile
            .send_text(r#"{"type":"request_control","password":"pw"}"#)
            .await;
        let reply = recv_json(&mut mobile).await;
        assert_eq!(reply["type"], "control_granted");
        assert_eq!(reply["role"], "pilot");

        let command = r#"{"type":"autopilot_toggle","system":"loc"}"#;
        mobile.send_text(command).await;
        let forwarded = pc.recv().await.unwrap();
        assert_eq!(forwarded.to_str(), Ok(command));

        let data = r#"{"type":"flight_data","altitude":3500,"heading":271,"isPaused":false}"#;
        pc.send_text(data).await;
        let broadcast = mobile.recv().await.unwrap();
        assert_eq!(broadcast.to_str(), Ok(data));

        drop(pc);
        assert_eq!(recv_json(&mut mobile).await["type"], "pc_offline");

        let mut pc = warp::test::ws()
            .path("/")
            .handshake(routes.clone())
            .await
            .expect("pc handshake");
        pc.send_text(r#"{"type":"register_pc","uniqueId":"N172SP","password":"pw"}"#)
            .await;
        assert_eq!(recv_json(&mut pc).await["type"], "registered");
        assert_eq!(recv_json(&mut mobile).await["type"], "pc_online");

        mobile.send_text(r#"{"type":"pause_toggle"}"#).await;
        assert_eq!(recv_json(&mut pc).await["type"], "pause_toggle");
    }

    #[tokio::test]
    async fn malformed_frames_keep_the_socket_open() {
        let (_state, routes) = test_routes(&Config::default());
        let mut pc = warp::test::ws()
            .path("/")
            .handshake(routes.clone())
            .await
            .expect("pc handshake");

        pc.send_text("{{{").await;
        pc.send(Message::binary(vec![1, 2, 3])).await;
        pc.send_text(r#"{"type":"register_pc","uniqueId":"N1","password":"pw"}"#)
            .await;
        assert_eq!(recv_json(&mut pc).await["type"], "registered");
    }

    #[tokio::test]
    async fn replaced_pc_is_disconnected() {
        let (_state, routes) = test_routes(&Config::default());
        let register = r#"{"type":"register_pc","uniqueId":"N1","password":"pw"}"#;

        let mut old = warp::test::ws()
            .path("/")
            .handshake(routes.clone())
            .await
            .expect("handshake");
        old.send_text(register).await;
        assert_eq!(recv_json(&mut old).await["type"], "registered");

        let mut new = warp::test::ws()
            .path("/")
            .handshake(routes.clone())
            .await
            .expect("handshake");
        new.send_text(register).await;
        assert_eq!(recv_json(&mut new).await["type"], "registered");

        assert_eq!(recv_json(&mut old).await["type"], "replaced");
        tokio::time::timeout(Duration::from_secs(5), old.recv_closed())
            .await
            .expect("old pc was not disconnected")
            .unwrap();
    }
}
