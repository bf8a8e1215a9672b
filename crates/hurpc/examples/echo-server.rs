//! Accepts agents over TCP, tracks them by remote IP, and asks each one
//! where it thinks it is connected from.
//!
//! Run with:
//!   cargo run -p hurpc --example echo-server --features logging -- 127.0.0.1:7080
//!
//! Then start one or more `echo-client` processes against the same address.

use std::net::SocketAddr;

use hurpc::logging;
use hurpc::{MuxConfig, MuxListener, PeerTable};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (format, level) = logging::from_env();
    logging::init_logging(format, level);

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:7080".to_string());

    // Agents idle for long stretches between calls.
    let config = MuxConfig::from_seconds(10, 64 * 1024, 64 * 1024).read_timeout(None);
    let listener = MuxListener::bind_tcp(addr.as_str())?.with_config(config);
    tracing::info!(addr = ?listener.local_addr(), "listening");

    let agents = PeerTable::new();

    loop {
        let agent = match listener.accept() {
            Ok(agent) => agent,
            Err(err) => {
                tracing::warn!(error = %err, "accept failed");
                continue;
            }
        };

        let remote_ip = agent
            .peer_addr()
            .and_then(|addr| addr.parse::<SocketAddr>().ok())
            .map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| agent.id().to_string());
        tracing::info!(agent = %remote_ip, "agent connected");

        agent.register("echo", Ok);
        agent.spawn()?;

        let caller = agent.clone();
        std::thread::spawn(move || {
            match caller.call_json::<_, String>("getRemoteIp", &()) {
                Ok(seen) => tracing::info!(agent = caller.id(), seen = %seen, "getRemoteIp answered"),
                Err(err) => tracing::warn!(agent = caller.id(), error = %err, "getRemoteIp failed"),
            }
        });

        let pruned = agents.prune_closed();
        if pruned > 0 {
            tracing::debug!(pruned, "forgot disconnected agents");
        }
        if let Some(previous) = agents.insert_as(remote_ip, agent) {
            let _ = previous.close();
        }
        tracing::info!(agents = ?agents.ids(), "agent table updated");
    }
}
