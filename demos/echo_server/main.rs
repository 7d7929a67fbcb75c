use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use switchyard::config::EngineConfig;
use switchyard::protocol::convention::Inbound;
use switchyard::server::{Engine, EngineBuilder};

/// Declares the demo API and implements its only function
mod echo;

/// Port on which the demo listens
const HOSTPORT: u16 = 11112;

const CONFIG: &str = r#"
[engine]
default_convention = "json-rpc-2.0"

[acl]
api = "allow 127.0.0.1 *"

[properties]
"echo.prefix" = "echo: "
"#;

/// Serves one connection: every line is a JSON document, every answer one line
async fn serve(engine: Arc<Engine>, socket: tokio::net::TcpStream) -> anyhow::Result<()> {
    let peer = socket.peer_addr()?.to_string();
    let (reader, mut writer) = socket.into_split();
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        let body = match serde_json::from_str(&line) {
            Ok(body) => body,
            Err(e) => {
                warn!(%peer, "not JSON: {}", e);
                continue;
            }
        };
        let outbound = engine.handle(Inbound::post_json(body), &peer).await;
        debug!(%peer, status = outbound.status, "answered");
        writer.write_all(outbound.render().as_bytes()).await?;
        writer.write_all(b"\n").await?;
    }
    Ok(())
}

/// Demo server speaking the JSON conventions over newline-delimited TCP.
/// Try: echo '{"jsonrpc":"2.0","method":"Echo","params":{"in":"hi"},"id":1}' | nc 127.0.0.1 11112
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(std::io::stderr)
        .init();

    let engine = EngineBuilder::new(echo::spec())
        .handler("Echo", Arc::new(echo::Echo::default()))
        .config(EngineConfig::from_toml(CONFIG)?)
        .start()
        .await?;

    let listener = TcpListener::bind(("127.0.0.1", HOSTPORT)).await?;
    info!("listening on 127.0.0.1:{HOSTPORT}");
    loop {
        let (socket, _) = listener.accept().await?;
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            if let Err(e) = serve(engine, socket).await {
                warn!("connection failed: {:#}", e);
            }
        });
    }
}
