use clap::Parser;
use http_body_util::Empty;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use ipgate::config::ConfigValidator;
use ipgate::{AccessDecider, AccessGate, ConfigLoader, Decision, Verdict};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

mod http_meta;

#[derive(Parser, Debug)]
#[command(name = "ipgate-authd")]
#[command(about = "HTTP auth-request daemon answering 204 (allow) or 403 (deny) per request")]
struct Args {
    /// Address to listen on
    #[arg(long, short = 'l', default_value = "127.0.0.1:9180")]
    listen: SocketAddr,

    /// Config file path
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short = 'v')]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging - IPGATE_LOG overrides the default level
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = std::env::var("IPGATE_LOG").unwrap_or_else(|_| default_level.to_string());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let config = ConfigLoader::load_or_default(args.config)?;
    for warning in ConfigValidator::lint_rules(&config.gate) {
        tracing::warn!("{}", warning);
    }
    let gate = AccessGate::from_settings(&config.gate)?;
    if gate.config().is_inert() {
        tracing::warn!("No allow-list rules configured, every request will be allowed");
    }

    let listener = TcpListener::bind(args.listen).await?;
    tracing::info!("ipgate-authd listening on {}", listener.local_addr()?);

    tokio::select! {
        result = serve(listener, Arc::new(gate)) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
            Ok(())
        }
    }
}

/// Accept connections forever, answering every request with the gate's verdict
async fn serve(listener: TcpListener, decider: Arc<dyn AccessDecider>) -> anyhow::Result<()> {
    loop {
        let (socket, peer_addr) = listener.accept().await?;
        tracing::debug!("Client connected: {}", peer_addr);

        let decider = Arc::clone(&decider);
        // Spawn a task to handle this connection
        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let response = respond(decider.as_ref(), &req, peer_addr);
                async move { Ok::<_, Infallible>(response) }
            });

            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(socket), service)
                .await
            {
                tracing::warn!("Error serving client {}: {}", peer_addr, e);
            }
        });
    }
}

/// Evaluate one request and build the empty-bodied reply
fn respond<B>(decider: &dyn AccessDecider, req: &Request<B>, peer: SocketAddr) -> Response<Empty<Bytes>> {
    let access = http_meta::access_request(req, peer);
    let decision = decider.decide(&access);

    let verdict = decision.verdict();
    match verdict {
        Verdict::Allow => {
            tracing::debug!("{} {}: {}", req.method(), access.path, decision);
        }
        Verdict::Deny => {
            let client = match &decision {
                Decision::Rejected { address } => address.as_str(),
                _ => "",
            };
            tracing::info!(client, path = %access.path, "Denied: {}", decision);
        }
    }

    let mut response = Response::new(Empty::new());
    *response.status_mut() =
        StatusCode::from_u16(verdict.status_code()).unwrap_or(StatusCode::FORBIDDEN);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipgate::AllowListConfig;
    use regex::Regex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn test_gate() -> AccessGate {
        AccessGate::new(
            AllowListConfig::new(Regex::new("^(neos)?($|/)").unwrap())
                .with_ipv4_rules(["192.168.1.0/24"])
                .with_address_source(0, "HTTP_X_FORWARDED_FOR")
                .with_address_source(1, "REMOTE_ADDR"),
        )
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[test]
    fn test_respond_status() {
        let gate = test_gate();

        let allowed = Request::builder()
            .uri("/neos/login")
            .header("X-Forwarded-For", "192.168.1.200")
            .body(())
            .unwrap();
        assert_eq!(respond(&gate, &allowed, peer()).status(), StatusCode::NO_CONTENT);

        let denied = Request::builder().uri("/neos/login").body(()).unwrap();
        assert_eq!(respond(&gate, &denied, peer()).status(), StatusCode::FORBIDDEN);

        let unprotected = Request::builder().uri("/assets/logo.png").body(()).unwrap();
        assert_eq!(respond(&gate, &unprotected, peer()).status(), StatusCode::NO_CONTENT);
    }

    async fn roundtrip(addr: SocketAddr, request: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_serve_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve(listener, Arc::new(test_gate())));

        let denied = roundtrip(
            addr,
            "GET /neos/login HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(denied.starts_with("HTTP/1.1 403"), "got {denied:?}");

        let allowed = roundtrip(
            addr,
            "GET /auth HTTP/1.1\r\nHost: localhost\r\nX-Original-URI: /neos\r\nX-Forwarded-For: 192.168.1.7\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(allowed.starts_with("HTTP/1.1 204"), "got {allowed:?}");

        server.abort();
    }
}
