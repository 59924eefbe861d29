use std::time::Duration;

use slog::{error, info, warn};

use trellismq_codec::ConnectAckReason;
use trellismq_net::Builder;

use crate::context::ServerContext;
use crate::session;

/// Broker front end: binds every configured listener and spawns one
/// session task per accepted connection.
pub struct TmqServer {
    scx: ServerContext,
    listeners: Vec<Builder>,
}

pub struct TmqServerBuilder {
    scx: ServerContext,
    listeners: Vec<Builder>,
}

impl TmqServer {
    pub fn new(scx: ServerContext) -> TmqServerBuilder {
        TmqServerBuilder { scx, listeners: Vec::new() }
    }

    /// Runs until every listener task ends, which normally means never.
    pub async fn run(self) {
        let mut tasks = Vec::with_capacity(self.listeners.len());
        for builder in self.listeners {
            let scx = self.scx.clone();
            tasks.push(tokio::spawn(async move {
                let name = builder.name.clone();
                let laddr = builder.laddr;
                if let Err(e) = listen_tcp(scx.clone(), builder).await {
                    error!(scx.logger, "listener failed";
                        "name" => name, "laddr" => %laddr, "error" => %e);
                }
            }));
        }
        for task in tasks {
            let _ = task.await;
        }
    }
}

impl TmqServerBuilder {
    pub fn listener(mut self, builder: Builder) -> Self {
        self.listeners.push(builder);
        self
    }

    pub fn build(self) -> TmqServer {
        TmqServer { scx: self.scx, listeners: self.listeners }
    }
}

async fn listen_tcp(scx: ServerContext, builder: Builder) -> crate::Result<()> {
    let max_connections = builder.max_connections;
    let listener = builder.bind()?;
    info!(scx.logger, "listener started";
        "name" => %listener.cfg.name, "laddr" => %listener.cfg.laddr);
    loop {
        match listener.accept().await {
            Ok(mut stream) => {
                if scx.connections.count() >= max_connections as isize {
                    warn!(scx.logger, "connection limit reached, refusing";
                        "remote_addr" => %stream.remote_addr, "max_connections" => max_connections);
                    tokio::spawn(async move {
                        let _ = stream
                            .send_connect_ack(ConnectAckReason::ServiceUnavailable, false)
                            .await;
                        let _ = stream.close().await;
                    });
                    continue;
                }
                let scx = scx.clone();
                tokio::spawn(async move {
                    if let Err(e) = session::process(scx.clone(), stream).await {
                        info!(scx.logger, "session ended with error"; "error" => %e);
                    }
                });
            }
            Err(e) => {
                error!(scx.logger, "accept failed"; "error" => %e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
