use std::sync::Arc;

use ocmem_config::MemoryConfig;
use ocmem_server::Gateway;

use super::Transport;

pub(super) async fn cmd_serve(
    config: MemoryConfig,
    transport: Transport,
    port: u16,
) -> ocmem_core::Result<()> {
    let gateway = Arc::new(Gateway::new(config));

    match transport {
        Transport::Stdio => ocmem_server::stdio::run(gateway).await,
        Transport::Sse => ocmem_server::http::run(gateway, port).await,
    }
}
