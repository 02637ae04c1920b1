use std::net::{IpAddr, SocketAddr};

use axum::http::HeaderMap;

const FORWARDED_FOR: &str = "x-forwarded-for";

/// Address reported back to a client as "your IP".
///
/// A proxy's `X-Forwarded-For` wins. Otherwise the peer address is used with
/// IPv4-mapped IPv6 unwrapped; a loopback peer is replaced by `advertise` when
/// one is configured.
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr, advertise: Option<IpAddr>) -> String {
    if let Some(forwarded) = headers
        .get(FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        return forwarded.to_string();
    }

    let ip = unmap(peer.ip());
    match advertise {
        Some(advertised) if ip.is_loopback() => advertised.to_string(),
        _ => ip.to_string(),
    }
}

fn unmap(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map(IpAddr::V4)
            .unwrap_or(IpAddr::V6(v6)),
        v4 => v4,
    }
}
