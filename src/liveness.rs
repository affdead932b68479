// src/liveness.rs
//! Liveness endpoint: every request gets `200 {"response": "OK"}`

use crate::error::{RelayError, Result};
use log::{debug, info, warn};
use std::{net::SocketAddr, sync::Arc};
use tiny_http::{Header, Response, Server};

pub const HEALTHY_BODY: &str = r#"{"response": "OK"}"#;

/// Blocking HTTP listener reporting process health
pub struct LivenessService {
    server: Arc<Server>,
    content_type: Header,
}

impl LivenessService {
    pub fn bind(addr: &str) -> Result<Self> {
        let server = Server::http(addr)
            .map_err(|e| RelayError::Liveness(format!("Failed to bind {}: {}", addr, e)))?;
        let content_type = "Content-Type: application/json"
            .parse::<Header>()
            .map_err(|_| RelayError::Liveness("invalid content type header".to_string()))?;

        Ok(Self {
            server: Arc::new(server),
            content_type,
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.server_addr().to_ip()
    }

    /// Handle used to stop [`LivenessService::serve`] from another thread
    pub fn handle(&self) -> LivenessHandle {
        LivenessHandle {
            server: Arc::clone(&self.server),
        }
    }

    /// Answer requests until [`LivenessHandle::shutdown`] is called.
    /// Returns the number of requests answered.
    pub fn serve(self) -> usize {
        match self.local_addr() {
            Some(addr) => info!("Liveness endpoint listening on http://{}", addr),
            None => info!("Liveness endpoint listening"),
        }

        let mut served = 0;
        for request in self.server.incoming_requests() {
            debug!("Liveness probe: {} {}", request.method(), request.url());
            let response = Response::from_data(HEALTHY_BODY.as_bytes())
                .with_status_code(200)
                .with_header(self.content_type.clone());
            if let Err(e) = request.respond(response) {
                warn!("Failed to answer liveness probe: {}", e);
            }
            served += 1;
        }

        info!("Liveness endpoint stopped after {} requests", served);
        served
    }
}

#[derive(Clone)]
pub struct LivenessHandle {
    server: Arc<Server>,
}

impl LivenessHandle {
    pub fn shutdown(&self) {
        self.server.unblock();
    }
}
