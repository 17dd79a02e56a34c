mod clock;
mod config;
mod error;
mod iface;
mod icmpv6;
mod netlink;
mod reactor;
mod scheduler;
mod wire;

use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match config::parse(std::env::args().skip(1)) {
        Ok(Some(config)) => config,
        Ok(None) => std::process::exit(0),
        Err(err) => {
            tracing::error!(%err, "invalid configuration");
            std::process::exit(1);
        }
    };

    let mut reactor = match reactor::Reactor::new(config) {
        Ok(reactor) => reactor,
        Err(err) => {
            tracing::error!(%err, "failed to initialize");
            std::process::exit(1);
        }
    };

    if let Err(err) = reactor.run() {
        tracing::error!(%err, "fatal error");
        std::process::exit(1);
    }
}
