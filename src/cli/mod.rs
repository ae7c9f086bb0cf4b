//! Command implementations and process-wide shutdown state.

pub mod args;
pub mod build;
pub mod serve;
pub mod watch;

pub use args::{Cli, Commands};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tiny_http::Server;

/// Shutdown has been requested (Ctrl+C received)
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// HTTP server reference for graceful shutdown
static SERVER: OnceLock<Arc<Server>> = OnceLock::new();

/// Setup the global Ctrl+C handler. Call once at program start
///
/// Before a server is registered the process exits right away; afterwards
/// the server is unblocked and loops observe [`is_shutdown`].
pub fn setup_shutdown_handler() -> anyhow::Result<()> {
    ctrlc::set_handler(|| {
        SHUTDOWN.store(true, Ordering::SeqCst);

        match SERVER.get() {
            Some(server) => {
                assetflow::log!("serve"; "shutting down...");
                server.unblock();
            }
            // Watch mode polls the flag itself
            None if watch::is_watching() => {}
            None => std::process::exit(0),
        }
    })
    .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {}", e))
}

/// Register the HTTP server for graceful shutdown
pub fn register_server(server: Arc<Server>) {
    let _ = SERVER.set(server);
}

/// Check if shutdown has been requested
#[inline]
pub fn is_shutdown() -> bool {
    SHUTDOWN.load(Ordering::Relaxed)
}
