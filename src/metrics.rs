use lazy_static::lazy_static;
use log::error;
use prometheus::{
    Histogram, HistogramOpts, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
};
use warp::{Rejection, Reply};

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
    pub static ref NUM_CONNECTED_CLIENTS: IntGaugeVec = IntGaugeVec::new(
        Opts::new("num_connected_clients", "Connected Clients"),
        &["hashed_ip"]
    )
    .expect("metric can be created");
    pub static ref NUM_ONGOING_SESSIONS: IntGauge =
        IntGauge::new("num_ongoing_sessions", "Ongoing Sessions").expect("metric can be created");
    pub static ref SESSION_DURATION_SEC: Histogram = Histogram::with_opts(
        HistogramOpts::new("session_duration_sec", "Session Duration Seconds").buckets(vec![
            1.0, 5.0, 10.0, 15.0, 20.0, 25.0, 30.0, 40.0, 50.0, 60.0, 90.0, 120.0, 180.0, 240.0,
            300.0, 600.0, 900.0, 1800.0, 3600.0, 7200.0, 14400.0, 28800.0, 43200.0, 86400.0,
        ])
    )
    .expect("metric can be created");
    pub static ref RELAYED_FRAMES: IntCounterVec = IntCounterVec::new(
        Opts::new("relayed_frames", "Frames relayed between PC and mobiles"),
        &["direction"]
    )
    .expect("metric can be created");
    pub static ref DENIED_FRAMES: IntCounterVec = IntCounterVec::new(
        Opts::new("denied_frames", "Mobile frames refused by the authorization gate"),
        &["reason"]
    )
    .expect("metric can be created");
}

pub(crate) fn register() {
    REGISTRY
        .register(Box::new(NUM_CONNECTED_CLIENTS.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(NUM_ONGOING_SESSIONS.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(SESSION_DURATION_SEC.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(RELAYED_FRAMES.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(DENIED_FRAMES.clone()))
        .expect("collector can be registered");
}

fn encode(families: &[prometheus::proto::MetricFamily], source: &str) -> String {
    use prometheus::Encoder;

    let mut buffer = Vec::new();
    if let Err(e) = prometheus::TextEncoder::new().encode(families, &mut buffer) {
        error!("could not encode {} metrics: {}", source, e);
    }
    String::from_utf8(buffer).unwrap_or_else(|e| {
        error!("{} metrics are not valid utf-8: {}", source, e);
        String::default()
    })
}

/// Relay metrics followed by the process-wide default registry.
pub(crate) async fn metrics_handler() -> Result<impl Reply, Rejection> {
    let mut res = encode(&REGISTRY.gather(), "relay");
    res.push_str(&encode(&prometheus::gather(), "default"));
    Ok(res)
}

/// Label value for a client address. Without a salt every client shares
/// one label so raw addresses never reach the metrics endpoint.
pub fn ip_label(ip: Option<std::net::IpAddr>, salt: Option<&str>) -> String {
    match (ip, salt) {
        (Some(ip), Some(salt)) => hash_ip(ip, salt).unwrap_or_else(|e| {
            error!("could not hash client ip: {}", e);
            String::from("unhashable")
        }),
        _ => String::from("anonymous"),
    }
}

pub fn hash_ip(ip: std::net::IpAddr, salt: &str) -> Result<String, argon2::password_hash::Error> {
    use argon2::{
        password_hash::{PasswordHasher, SaltString},
        Argon2,
    };
    Argon2::default()
        .hash_password(ip.to_string().as_bytes(), &SaltString::from_b64(salt)?)?
        .hash
        .map(|hash| hash.to_string())
        .ok_or(argon2::password_hash::Error::Password)
}
