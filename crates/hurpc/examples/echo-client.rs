//! Agent side of `echo-server`: dials in, serves `getRemoteIp`, calls
//! `echo` once, and redials whenever the connection drops.
//!
//! Run with:
//!   cargo run -p hurpc --example echo-client --features logging -- 127.0.0.1:7080

use std::time::Duration;

use hurpc::logging;
use hurpc::mux::{connect_tcp, DEFAULT_DIAL_TIMEOUT};
use hurpc::{Bytes, MuxConfig};

const RETRY_DELAY: Duration = Duration::from_secs(5);

fn session(addr: &str, config: MuxConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mux = connect_tcp(addr, DEFAULT_DIAL_TIMEOUT, config)?;
    tracing::info!(server = mux.id(), "connected");

    let seen = mux.peer_addr().unwrap_or_else(|| "unknown".to_string());
    mux.register_json("getRemoteIp", move |(): ()| Ok(seen.clone()));
    let dispatch = mux.spawn()?;

    let reply = mux.call("echo", Bytes::from_static(b"hello"))?;
    tracing::info!(reply = %String::from_utf8_lossy(&reply), "echo answered");

    match dispatch.join() {
        Ok(outcome) => Ok(outcome?),
        Err(_) => Err("dispatch thread panicked".into()),
    }
}

fn main() {
    let (format, level) = logging::from_env();
    logging::init_logging(format, level);

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:7080".to_string());
    let config = MuxConfig::from_seconds(10, 64 * 1024, 64 * 1024).read_timeout(None);

    loop {
        tracing::info!(%addr, "connecting");
        match session(&addr, config.clone()) {
            Ok(()) => tracing::info!("server closed the connection"),
            Err(err) => tracing::warn!(error = %err, "session ended"),
        }
        std::thread::sleep(RETRY_DELAY);
    }
}
