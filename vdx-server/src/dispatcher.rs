// VDX Server - Network server for VDX time-series queries
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Command routing
//!
//! A [`Dispatcher`] owns one [`CommandHandler`] per command name. Every
//! line goes through [`Dispatcher::dispatch`], which always yields a
//! complete [`Response`]: parse failures, handler errors and handler
//! panics all become `error:` replies.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error, warn};
use vdx::protocol::Params;
use vdx::{
    Encoder, GetDataRequest, ProtocolError, Request, Response, SourcePool, VdxError,
    PROTOCOL_VERSION, VERSION,
};

use crate::metrics::{self, Outcome};

/// Handler for one protocol command
pub trait CommandHandler: Send + Sync {
    /// Command name, lower case
    fn name(&self) -> &'static str;

    /// Build the complete response for `request`
    fn handle(&self, request: &Request) -> vdx::Result<Response>;
}

/// Routes command lines to their handlers
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<&'static str, Arc<dyn CommandHandler>>,
}

impl Dispatcher {
    /// Create a dispatcher without handlers
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatcher serving `version`, `menu` and `getdata`
    pub fn with_defaults(pool: SourcePool, compression_level: i32) -> Self {
        let mut dispatcher = Self::new();
        dispatcher.register(VersionHandler);
        dispatcher.register(MenuHandler { pool: pool.clone() });
        dispatcher.register(GetDataHandler {
            pool,
            compression_level,
        });
        dispatcher
    }

    /// Register a handler, replacing any handler of the same name
    pub fn register(&mut self, handler: impl CommandHandler + 'static) {
        self.handlers.insert(handler.name(), Arc::new(handler));
    }

    /// Registered command names, sorted
    pub fn commands(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Handle one command line
    pub fn dispatch(&self, line: &str) -> Response {
        let request = match Request::parse(line) {
            Ok(request) => request,
            Err(e) => return self.fail("invalid", &VdxError::from(e)),
        };
        let Some(handler) = self.handlers.get(request.command.as_str()) else {
            let err = VdxError::from(ProtocolError::UnknownCommand(request.command.clone()));
            return self.fail("unknown", &err);
        };

        debug!("dispatching '{}'", request.command);
        match catch_unwind(AssertUnwindSafe(|| handler.handle(&request))) {
            Ok(Ok(response)) => {
                metrics::record_command(handler.name(), Outcome::Ok);
                response
            }
            Ok(Err(e)) => self.fail(handler.name(), &e),
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!("handler '{}' panicked: {}", handler.name(), reason);
                metrics::record_command(handler.name(), Outcome::Error);
                metrics::record_error("panic");
                Response::error(format!("internal error in '{}'", handler.name()))
            }
        }
    }

    fn fail(&self, command: &str, err: &VdxError) -> Response {
        if err.is_client_error() {
            debug!("'{}' rejected: {}", command, err);
        } else {
            warn!("'{}' failed: {}", command, err);
        }
        metrics::record_command(command, Outcome::Error);
        metrics::record_error(err.kind());
        Response::error(err)
    }
}

/// `version` → `ok: version=<semver>;protocol=<n>`
pub struct VersionHandler;

impl CommandHandler for VersionHandler {
    fn name(&self) -> &'static str {
        "version"
    }

    fn handle(&self, _request: &Request) -> vdx::Result<Response> {
        let mut params = Params::new();
        params.insert("version".to_string(), VERSION.to_string());
        params.insert("protocol".to_string(), PROTOCOL_VERSION.to_string());
        Ok(Response::ok(params))
    }
}

/// `menu` → one text line per configured source
pub struct MenuHandler {
    pool: SourcePool,
}

impl CommandHandler for MenuHandler {
    fn name(&self) -> &'static str {
        "menu"
    }

    fn handle(&self, _request: &Request) -> vdx::Result<Response> {
        let lines = self.pool.sources().iter().map(|s| s.menu_line()).collect();
        Ok(Response::text(lines))
    }
}

/// `getdata` → catalogue lines or compressed matrices from a leased source
pub struct GetDataHandler {
    pool: SourcePool,
    compression_level: i32,
}

impl CommandHandler for GetDataHandler {
    fn name(&self) -> &'static str {
        "getdata"
    }

    fn handle(&self, request: &Request) -> vdx::Result<Response> {
        let GetDataRequest { source, action } = GetDataRequest::from_request(request)?;
        let mut lease = self.pool.checkout(&source)?;
        let reply = lease.execute(&action)?;
        drop(lease);

        let mut encoder = Encoder::with_level(self.compression_level);
        let response = reply.into_response(&mut encoder)?;
        metrics::record_compression(encoder.metrics());
        debug!(
            "getdata {} from '{}': {} body bytes",
            action,
            source,
            response.body_len()
        );
        Ok(response)
    }
}
