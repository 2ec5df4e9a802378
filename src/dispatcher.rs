//! Route table, passkey/IP extraction, and the per-request counting and
//! panic-recovery middleware that wrap every handler.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    panic::AssertUnwindSafe,
    sync::{atomic::Ordering, Arc},
};

use axum::{
    extract::{ConnectInfo, FromRequestParts, Path, State},
    http::{request::Parts, HeaderMap, Request},
    middleware::{self, Next},
    response::Response,
    routing::get,
    Router,
};
use futures_util::FutureExt;

use crate::{error::AnnounceError, query, tracker::Tracker};

pub fn routes(tracker: Arc<Tracker>) -> Router<Arc<Tracker>> {
    let router = Router::new()
        .route("/{passkey}/announce", get(announce_handler))
        .route("/stats", get(stats_handler));

    #[cfg(feature = "scrape")]
    let router = router.route("/{passkey}/scrape", get(scrape_handler));

    let router = router.fallback(unknown_action);

    router.layer(middleware::from_fn_with_state(tracker, instrument))
}

/// Matches any request that none of the routes above claim — an unknown
/// path, or `/{passkey}/scrape` when the `scrape` feature is compiled out.
/// Answers with the same bencoded failure dict every other rejection uses,
/// rather than axum's bare 404.
async fn unknown_action() -> AnnounceError {
    AnnounceError::UnknownAction
}

/// Exactly 32 ASCII characters, checked before any state lookup happens.
/// axum's own `Path` extractor would happily hand a malformed passkey to the
/// handler and let `Passkey::from_str` reject it later; failing here instead
/// matches the literal "missing passkey" wording the error requires.
struct PasskeyParam(String);

impl<S> FromRequestParts<S> for PasskeyParam
where
    S: Send + Sync,
{
    type Rejection = AnnounceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(passkey) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|_| AnnounceError::MissingPasskey)?;

        if passkey.len() != 32 {
            return Err(AnnounceError::MissingPasskey);
        }

        Ok(PasskeyParam(passkey))
    }
}

/// Resolves the client's announce IP. spec.md's order: `ipv4` query param,
/// then `ip` query param (only if it parses as IPv4), then `X-Real-Ip`
/// header, then the connection's remote address. Fails if none of those
/// yield an IPv4 address.
///
/// The source this was distilled from parses `ip` unconditionally rather
/// than only when some "has ip" flag is set, and it's unclear whether `ip`
/// should ever win over `X-Real-Ip` when `ipv4` is absent but `ip` decodes
/// to a valid IPv4 address anyway. Preserved as observed rather than
/// resolved; flagging for review.
struct ClientIp(IpAddr);

impl FromRequestParts<Arc<Tracker>> for ClientIp {
    type Rejection = AnnounceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<Tracker>,
    ) -> Result<Self, Self::Rejection> {
        let query_string = parts.uri.query().unwrap_or("");
        let parsed = query::parse(query_string)?;

        if let Some(ip) = parsed.get("ipv4").and_then(|v| v.parse::<Ipv4Addr>().ok()) {
            return Ok(ClientIp(IpAddr::V4(ip)));
        }

        if let Some(ip) = parsed.get("ip").and_then(|v| v.parse::<Ipv4Addr>().ok()) {
            return Ok(ClientIp(IpAddr::V4(ip)));
        }

        if let Some(ip) = parts
            .headers
            .get("X-Real-Ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<Ipv4Addr>().ok())
        {
            return Ok(ClientIp(IpAddr::V4(ip)));
        }

        let ConnectInfo(addr) = ConnectInfo::<SocketAddr>::from_request_parts(parts, state)
            .await
            .map_err(|_| AnnounceError::InvalidIp)?;

        match addr.ip() {
            IpAddr::V4(ip) => Ok(ClientIp(IpAddr::V4(ip))),
            IpAddr::V6(_) => Err(AnnounceError::InvalidIp),
        }
    }
}

async fn announce_handler(
    State(tracker): State<Arc<Tracker>>,
    PasskeyParam(passkey): PasskeyParam,
    ClientIp(client_ip): ClientIp,
    headers: HeaderMap,
    uri: axum::http::Uri,
) -> Result<Vec<u8>, AnnounceError> {
    let query_string = uri.query().unwrap_or("");
    let user_agent = headers.get(axum::http::header::USER_AGENT).and_then(|v| v.to_str().ok());

    crate::announce::handle(&tracker, &passkey, query_string, client_ip, user_agent).await
}

#[cfg(feature = "scrape")]
async fn scrape_handler(
    State(tracker): State<Arc<Tracker>>,
    PasskeyParam(_passkey): PasskeyParam,
    uri: axum::http::Uri,
) -> Vec<u8> {
    let query_string = uri.query().unwrap_or("");
    let parsed = query::parse(query_string).unwrap_or_default();

    crate::scrape::handle(&tracker, &parsed)
}

async fn stats_handler(State(tracker): State<Arc<Tracker>>) -> String {
    render_stats(&tracker)
}

fn render_stats(tracker: &Tracker) -> String {
    let users = tracker.users.read().len();
    let torrents = tracker.torrents.read().len();
    let peers: usize = tracker.torrents.read().values().map(|t| t.lock().peers.len()).sum();

    format!(
        "Uptime: {}s\nUsers: {}\nTorrents: {}\nPeers: {}\nThroughput: {} rpm\n",
        tracker.stats.uptime_seconds(),
        users,
        torrents,
        peers,
        tracker.stats.throughput_per_minute(),
    )
}

/// Counts in-flight requests and total throughput, and recovers panics that
/// escape a handler. A recovered panic is logged and the panic is then
/// resumed so the connection is dropped rather than answered, per spec.md.
async fn instrument(State(tracker): State<Arc<Tracker>>, request: Request<axum::body::Body>, next: Next) -> Response {
    tracker.stats.record_request();
    tracker.in_flight.fetch_add(1, Ordering::Relaxed);

    let result = AssertUnwindSafe(next.run(request)).catch_unwind().await;

    if tracker.in_flight.fetch_sub(1, Ordering::Relaxed) == 1 {
        tracker.in_flight_drained.notify_waiters();
    }

    match result {
        Ok(response) => response,
        Err(payload) => {
            tracing::error!("panic while handling request, dropping connection");
            std::panic::resume_unwind(payload);
        }
    }
}
