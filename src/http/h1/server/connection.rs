use super::ServerShared;
use super::exchange::run_exchange;
use crate::error::Result;
use crate::io::{BoxChannel, ByteGeneratorContext, ByteParserContext};
use std::net::SocketAddr;
use std::sync::Arc;

/// Everything exchanges on one connection share.
pub(crate) struct ConnectionContext {
    pub(crate) id: u64,
    pub(crate) server: Arc<ServerShared>,
    pub(crate) channel: BoxChannel,
    pub(crate) parser: Arc<ByteParserContext>,
    pub(crate) generator: Arc<ByteGeneratorContext>,
    pub(crate) local: Option<SocketAddr>,
    pub(crate) remote: Option<SocketAddr>,
}

/// Runs exchanges on one connection, one after another.
pub(crate) struct HttpServerConnection {
    context: Arc<ConnectionContext>,
}

impl HttpServerConnection {
    pub(crate) fn new(
        server: Arc<ServerShared>,
        id: u64,
        channel: BoxChannel,
        local: Option<SocketAddr>,
        remote: Option<SocketAddr>,
    ) -> Self {
        let buffer_size = server.config().buffer_size;
        let parser = Arc::new(ByteParserContext::new(channel.input(), buffer_size));
        let generator = Arc::new(ByteGeneratorContext::new(channel.output(), buffer_size));
        Self {
            context: Arc::new(ConnectionContext {
                id,
                server,
                channel,
                parser,
                generator,
                local,
                remote,
            }),
        }
    }

    /// Serves exchanges while the connection stays reusable, then closes it.
    pub(crate) async fn run(self) -> Result<()> {
        let context = self.context;
        tracing::debug!(
            connection = context.id,
            remote = ?context.remote,
            local = ?context.local,
            "started connection"
        );
        let mut exchanges = 0u64;
        let result = loop {
            match run_exchange(&context, exchanges).await {
                Ok(true) => exchanges += 1,
                Ok(false) => break Ok(()),
                Err(error) => break Err(error),
            }
        };
        match &result {
            Ok(()) => tracing::debug!(connection = context.id, exchanges, "finished connection"),
            Err(error) => tracing::debug!(
                connection = context.id,
                exchanges,
                %error,
                "finished connection with errors"
            ),
        }
        if let Err(error) = context.channel.close().await {
            tracing::debug!(connection = context.id, %error, "failed to close connection");
        }
        result
    }
}
