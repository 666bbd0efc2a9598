//! Client IP extraction utilities.

use std::net::{IpAddr, SocketAddr};

use axum::{extract::ConnectInfo, http::Request};

/// Where the auth service reads the client IP from.
#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IpExtractor {
    /// Rightmost entry of `X-Forwarded-For` (the one our gateway appended)
    #[default]
    XForwardedFor,
    /// `X-Real-IP`
    XRealIp,
    /// Peer address of the TCP connection (when exposed without the gateway)
    Socket,
}

impl IpExtractor {
    pub fn header_name(&self) -> Option<&'static str> {
        match self {
            IpExtractor::XForwardedFor => Some("x-forwarded-for"),
            IpExtractor::XRealIp => Some("x-real-ip"),
            IpExtractor::Socket => None,
        }
    }

    pub fn extract(&self, header_value: &str) -> Result<String, &'static str> {
        let candidate = match self {
            IpExtractor::XForwardedFor => header_value
                .rsplit(',')
                .next()
                .ok_or("IP header is empty")?,
            IpExtractor::XRealIp | IpExtractor::Socket => header_value,
        };
        candidate
            .trim()
            .parse::<IpAddr>()
            .map(|ip| ip.to_string())
            .map_err(|_| "IP header does not contain an IP address")
    }
}

/// Extract client IP address based on configuration.
///
/// Header modes return an error if the header is missing or invalid
/// (they do NOT fall back to the socket address).
pub fn extract_client_ip<B>(
    request: &Request<B>,
    ip_extractor: IpExtractor,
) -> Result<String, &'static str> {
    match ip_extractor.header_name() {
        Some(name) => {
            let header_value = request
                .headers()
                .get(name)
                .ok_or("IP header not present")?
                .to_str()
                .map_err(|_| "IP header contains invalid characters")?;
            ip_extractor.extract(header_value)
        }
        None => request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip().to_string())
            .ok_or("No client IP available"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;

    #[test]
    fn test_forwarded_for_takes_rightmost() {
        let ip = IpExtractor::XForwardedFor
            .extract("203.0.113.9, 10.0.0.1")
            .unwrap();
        assert_eq!(ip, "10.0.0.1");
    }

    #[test]
    fn test_real_ip() {
        assert_eq!(IpExtractor::XRealIp.extract(" ::1 ").unwrap(), "::1");
        assert!(IpExtractor::XRealIp.extract("not-an-ip").is_err());
    }

    #[test]
    fn test_extract_from_connect_info() {
        let mut request = Request::new(Body::empty());
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))));

        assert_eq!(
            extract_client_ip(&request, IpExtractor::Socket).unwrap(),
            "127.0.0.1"
        );
    }

    #[test]
    fn test_configured_header_does_not_fall_back() {
        let mut request = Request::new(Body::empty());
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))));

        assert!(extract_client_ip(&request, IpExtractor::XRealIp).is_err());
        assert!(extract_client_ip(&request, IpExtractor::default()).is_err());
    }

    #[test]
    fn test_default_reads_gateway_appended_entry() {
        let request = Request::builder()
            .header("x-forwarded-for", "198.51.100.7, 203.0.113.20")
            .body(Body::empty())
            .unwrap();

        assert_eq!(
            extract_client_ip(&request, IpExtractor::default()).unwrap(),
            "203.0.113.20"
        );
    }
}
