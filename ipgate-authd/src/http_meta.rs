//! Translation of HTTP requests into gate requests
//!
//! Metadata follows CGI server-parameter naming: `REMOTE_ADDR`,
//! `REMOTE_PORT`, `REQUEST_METHOD`, `REQUEST_URI` and one `HTTP_<NAME>`
//! field per header.

use hyper::Request;
use ipgate::{AccessRequest, RequestMeta};
use percent_encoding::percent_decode_str;
use std::net::SocketAddr;

/// Header a reverse proxy sets on auth sub-requests to carry the original URI
pub const ORIGINAL_URI_HEADER: &str = "x-original-uri";

/// Build the gate request for an inbound HTTP request from `peer`
pub fn access_request<B>(req: &Request<B>, peer: SocketAddr) -> AccessRequest {
    let target = req
        .headers()
        .get(ORIGINAL_URI_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| {
            req.uri()
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| "/".to_string())
        });

    AccessRequest::new(decoded_path(&target), request_meta(req, peer, &target))
}

/// Path component of a request target, without query or fragment, percent-decoded
pub fn decoded_path(target: &str) -> String {
    let path = target.split(['?', '#']).next().unwrap_or_default();
    percent_decode_str(path).decode_utf8_lossy().into_owned()
}

fn request_meta<B>(req: &Request<B>, peer: SocketAddr, target: &str) -> RequestMeta {
    let mut meta = RequestMeta::new();
    meta.insert("REMOTE_ADDR", peer.ip().to_canonical().to_string());
    meta.insert("REMOTE_PORT", peer.port().to_string());
    meta.insert("REQUEST_METHOD", req.method().as_str());
    meta.insert("REQUEST_URI", target);

    let headers = req.headers();
    for name in headers.keys() {
        let values: Vec<&str> = headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        meta.insert(cgi_name(name.as_str()), values.join(", "));
    }

    meta
}

/// `x-forwarded-for` becomes `HTTP_X_FORWARDED_FOR`. Dots are folded too,
/// since `.` separates segments in address source paths.
fn cgi_name(header: &str) -> String {
    format!("HTTP_{}", header.to_ascii_uppercase().replace(['-', '.'], "_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "192.0.2.10:54321".parse().unwrap()
    }

    #[test]
    fn test_cgi_name() {
        assert_eq!(cgi_name("x-forwarded-for"), "HTTP_X_FORWARDED_FOR");
        assert_eq!(cgi_name("host"), "HTTP_HOST");
        assert_eq!(cgi_name("x.real-ip"), "HTTP_X_REAL_IP");
    }

    #[test]
    fn test_dotted_header_is_reachable_by_lookup() {
        let req = Request::builder()
            .uri("/neos")
            .header("X.Real-IP", "198.51.100.23")
            .body(())
            .unwrap();

        let access = access_request(&req, peer());
        assert_eq!(access.meta.lookup("HTTP_X_REAL_IP"), Some("198.51.100.23"));
    }

    #[test]
    fn test_decoded_path() {
        assert_eq!(decoded_path("/neos/login?x=1"), "/neos/login");
        assert_eq!(decoded_path("/ne%6Fs#frag"), "/neos");
        assert_eq!(decoded_path("?only=query"), "");
    }

    #[test]
    fn test_request_meta_fields() {
        let req = Request::builder()
            .method("POST")
            .uri("/neos/login?redirect=1")
            .header("X-Forwarded-For", "203.0.113.5")
            .header("Accept", "text/html")
            .header("Accept", "application/json")
            .body(())
            .unwrap();

        let access = access_request(&req, peer());
        assert_eq!(access.path, "/neos/login");
        assert_eq!(access.meta.lookup("REMOTE_ADDR"), Some("192.0.2.10"));
        assert_eq!(access.meta.lookup("REMOTE_PORT"), Some("54321"));
        assert_eq!(access.meta.lookup("REQUEST_METHOD"), Some("POST"));
        assert_eq!(access.meta.lookup("REQUEST_URI"), Some("/neos/login?redirect=1"));
        assert_eq!(access.meta.lookup("HTTP_X_FORWARDED_FOR"), Some("203.0.113.5"));
        assert_eq!(
            access.meta.lookup("HTTP_ACCEPT"),
            Some("text/html, application/json")
        );
    }

    #[test]
    fn test_original_uri_header_wins() {
        let req = Request::builder()
            .uri("/auth")
            .header("X-Original-URI", "/neos/administration?foo")
            .body(())
            .unwrap();

        let access = access_request(&req, peer());
        assert_eq!(access.path, "/neos/administration");
        assert_eq!(access.meta.lookup("REQUEST_URI"), Some("/neos/administration?foo"));
    }

    #[test]
    fn test_mapped_ipv4_peer_is_canonical() {
        let req = Request::builder().uri("/").body(()).unwrap();
        let peer: SocketAddr = "[::ffff:198.51.100.4]:80".parse().unwrap();

        let access = access_request(&req, peer);
        assert_eq!(access.meta.lookup("REMOTE_ADDR"), Some("198.51.100.4"));
    }
}
