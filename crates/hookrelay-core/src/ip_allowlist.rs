//! CIDR/IP allow-listing for webhook ingress.
//!
//! Operators can restrict which producer addresses may POST webhooks. The
//! allow-list holds exact IPs and CIDR networks (v4 and v6) and is
//! immutable after process start. Subscription endpoints are never
//! restricted; the gate applies to POST requests only, which the server's
//! middleware enforces.

use std::net::{IpAddr, SocketAddr};

use http::HeaderMap;
use ipnet::IpNet;
use thiserror::Error;

/// Errors from parsing allow-list entries.
#[derive(Debug, Error)]
pub enum AllowListError {
    /// An entry containing `/` was not a valid CIDR block.
    #[error("invalid CIDR range {0:?}")]
    InvalidCidr(String),

    /// An entry was not a valid IP address.
    #[error("invalid IP address {0:?}")]
    InvalidIp(String),
}

/// An immutable set of allowed producer addresses.
#[derive(Debug, Clone, Default)]
pub struct IpAllowList {
    ips: Vec<IpAddr>,
    networks: Vec<IpNet>,
}

impl IpAllowList {
    /// Parses allow-list entries; each is a single IP or a CIDR block.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first entry that parses as neither.
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self, AllowListError> {
        let mut list = Self::default();
        for entry in entries {
            let entry = entry.as_ref().trim();
            if entry.contains('/') {
                let network = entry
                    .parse::<IpNet>()
                    .map_err(|_| AllowListError::InvalidCidr(entry.to_string()))?;
                list.networks.push(network);
            } else {
                let ip = entry
                    .parse::<IpAddr>()
                    .map_err(|_| AllowListError::InvalidIp(entry.to_string()))?;
                list.ips.push(ip);
            }
        }
        Ok(list)
    }

    /// Returns whether the list has no entries (gate open).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ips.is_empty() && self.networks.is_empty()
    }

    /// Returns whether `ip` is allowed.
    #[must_use]
    pub fn contains(&self, ip: IpAddr) -> bool {
        self.ips.contains(&ip) || self.networks.iter().any(|net| net.contains(&ip))
    }
}

/// Determines the producer's IP for gating purposes.
///
/// With `trust_proxy`, the first `X-Forwarded-For` element wins, then
/// `X-Real-IP`; otherwise (or when neither parses) the transport remote
/// address is used. Returns `None` when no address can be determined.
#[must_use]
pub fn client_ip(
    headers: &HeaderMap,
    remote: Option<SocketAddr>,
    trust_proxy: bool,
) -> Option<IpAddr> {
    if trust_proxy {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .and_then(|first| first.trim().parse::<IpAddr>().ok());
        if let Some(ip) = forwarded {
            return Some(ip);
        }

        let real_ip = headers
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<IpAddr>().ok());
        if let Some(ip) = real_ip {
            return Some(ip);
        }
    }

    remote.map(|addr| addr.ip())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(entries: &[&str]) -> IpAllowList {
        IpAllowList::parse(entries).unwrap()
    }

    #[test]
    fn test_parse_mixed_entries() {
        let allow = list(&["192.168.1.1", "10.0.0.0/8", "2001:db8::1", "fd00::/8"]);
        assert!(!allow.is_empty());

        assert!(allow.contains("192.168.1.1".parse().unwrap()));
        assert!(allow.contains("10.42.7.1".parse().unwrap()));
        assert!(allow.contains("2001:db8::1".parse().unwrap()));
        assert!(allow.contains("fd00::beef".parse().unwrap()));

        assert!(!allow.contains("192.168.1.2".parse().unwrap()));
        assert!(!allow.contains("11.0.0.1".parse().unwrap()));
        assert!(!allow.contains("2001:db8::2".parse().unwrap()));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            IpAllowList::parse(&["10.0.0.0/33"]),
            Err(AllowListError::InvalidCidr(_))
        ));
        assert!(matches!(
            IpAllowList::parse(&["not-an-ip"]),
            Err(AllowListError::InvalidIp(_))
        ));
    }

    #[test]
    fn test_empty_list_is_open() {
        let allow = IpAllowList::parse::<&str>(&[]).unwrap();
        assert!(allow.is_empty());
    }

    #[test]
    fn test_client_ip_prefers_forwarded_for_when_trusted() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "203.0.113.7, 10.0.0.1".parse().unwrap(),
        );
        headers.insert("x-real-ip", "198.51.100.9".parse().unwrap());
        let remote: SocketAddr = "192.0.2.1:4242".parse().unwrap();

        assert_eq!(
            client_ip(&headers, Some(remote), true),
            Some("203.0.113.7".parse().unwrap())
        );
        // Untrusted: headers are ignored entirely.
        assert_eq!(
            client_ip(&headers, Some(remote), false),
            Some("192.0.2.1".parse().unwrap())
        );
    }

    #[test]
    fn test_client_ip_falls_back_to_real_ip_then_remote() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", " 198.51.100.9 ".parse().unwrap());
        let remote: SocketAddr = "192.0.2.1:4242".parse().unwrap();

        assert_eq!(
            client_ip(&headers, Some(remote), true),
            Some("198.51.100.9".parse().unwrap())
        );

        let unparseable = {
            let mut h = HeaderMap::new();
            h.insert("x-forwarded-for", "not an ip".parse().unwrap());
            h
        };
        assert_eq!(
            client_ip(&unparseable, Some(remote), true),
            Some("192.0.2.1".parse().unwrap())
        );

        assert_eq!(client_ip(&HeaderMap::new(), None, true), None);
    }
}
