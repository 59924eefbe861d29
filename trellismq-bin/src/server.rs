use structopt::StructOpt;

use trellismq::conf::{Options, Settings};
use trellismq::context::ServerContext;
use trellismq::logger::config_logger;
use trellismq::net::Builder;
use trellismq::server::TmqServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Options::from_args();
    let settings = Settings::init(opts)?.clone();

    let logger = config_logger(
        settings.log.filename(),
        settings.log.to,
        settings.log.level.inner(),
    );
    // Route the `log` facade used by the leaf crates into slog.
    let _scope_guard = slog_scope::set_global_logger(logger.clone());
    slog_stdlog::init()?;
    Settings::logs()?;

    let scx = ServerContext::new(settings.clone(), logger);

    let mut server = TmqServer::new(scx);
    for listener in settings.listeners.tcps.values() {
        let mut builder = Builder::new()
            .name(&listener.name)
            .laddr(listener.addr)
            .backlog(listener.backlog)
            .max_connections(listener.max_connections)
            .max_packet_size(settings.broker.max_packet_size.as_u32())
            .max_clientid_len(settings.broker.max_clientid_len)
            .min_keepalive(settings.broker.min_keepalive)
            .max_keepalive(settings.broker.max_keepalive)
            .allow_zero_keepalive(settings.broker.allow_zero_keepalive)
            .keepalive_backoff(settings.broker.keepalive_backoff)
            .max_inflight(settings.broker.max_inflight)
            .handshake_timeout(settings.broker.handshake_timeout)
            .send_timeout(settings.broker.send_timeout);
        if listener.nodelay {
            builder = builder.nodelay();
        }
        if listener.reuseaddr {
            builder = builder.reuseaddr();
        }
        if listener.reuseport {
            builder = builder.reuseport();
        }
        server = server.listener(builder);
    }
    let server = server.build();

    tokio::select! {
        _ = server.run() => {}
        _ = tokio::signal::ctrl_c() => {
            log::info!("shutdown signal received");
        }
    }
    Ok(())
}
