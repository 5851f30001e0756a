//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling. Each connection is
//! served on its own task; routing is a plain match on method and path.

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::auth::JwtValidator;
use crate::config::Args;
use crate::db::{MongoConnector, StoreHandle};
use crate::routes::{self, respond, BoxBody, Endpoint};
use crate::types::Result;

/// Shared application state
pub struct AppState {
    pub args: Args,
    /// Lazily connected store; no I/O happens until the first resource request
    pub db: StoreHandle,
    pub jwt: JwtValidator,
    pub started_at: Instant,
}

impl AppState {
    /// Build the state from validated arguments without touching the network
    pub fn new(args: Args) -> Result<Self> {
        let db = StoreHandle::new(args.connection_config(), MongoConnector)?;
        let jwt = JwtValidator::from_args(&args)?;

        Ok(Self {
            args,
            db,
            jwt,
            started_at: Instant::now(),
        })
    }
}

/// Start the HTTP server
pub async fn run(state: Arc<AppState>) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "Spendbook listening on {} as node {}",
        state.args.listen, state.args.node_id
    );

    if state.args.dev_mode {
        warn!("Development mode enabled - using insecure default JWT secret");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .serve_connection(io, service)
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    info!("[{}] {} {}", addr, method, path);

    let response = match (&method, path.as_str()) {
        (&Method::OPTIONS, _) => respond::cors_preflight(),

        // Served without the store
        (&Method::GET, "/ping") => routes::ping(),
        (&Method::GET, "/health") | (&Method::GET, "/healthz") => routes::health_check(&state),

        _ => match Endpoint::resolve(&method, &path) {
            Some(endpoint) => routes::handle_api_request(state, endpoint, req).await,
            None => respond::not_found(),
        },
    };

    Ok(response)
}
