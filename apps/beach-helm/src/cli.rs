use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use tokio::time::{timeout, Duration, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error};

use crate::protocol::{ClientMessage, ServerEvent};

#[derive(Parser, Debug)]
#[command(name = "beach-helm", version)]
#[command(about = "Beach Helm room control server and watch client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub server: ServerArgs,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Join a room and print every event it pushes
    Watch {
        /// Room server URL (e.g., ws://localhost:8080)
        #[arg(short, long, default_value = "ws://localhost:8080")]
        url: String,

        /// Token presented on connect
        #[arg(short, long, env = "BEACH_HELM_TOKEN", default_value = "")]
        token: String,

        /// Ask for control right after joining
        #[arg(long)]
        request_control: bool,

        /// Stop after this many seconds (runs until the server closes otherwise)
        #[arg(short, long)]
        duration: Option<u64>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Address to bind the HTTP and websocket listener to.
    #[arg(long, env = "BEACH_HELM_LISTEN_ADDR", default_value = "127.0.0.1:8080")]
    pub listen_addr: String,

    /// Token that admits a session as admin.
    #[arg(long, env = "BEACH_HELM_ADMIN_TOKEN")]
    pub admin_token: Option<String>,

    /// Token that admits a session as a regular user.
    #[arg(long, env = "BEACH_HELM_USER_TOKEN")]
    pub user_token: Option<String>,

    /// Token that admits a watch-only session.
    #[arg(long, env = "BEACH_HELM_VIEWER_TOKEN")]
    pub viewer_token: Option<String>,

    /// Start with controls locked to admins.
    #[arg(long, env = "BEACH_HELM_LOCKED_CONTROLS", default_value_t = false)]
    pub locked_controls: bool,

    /// Comma separated screen modes the desktop supports.
    #[arg(
        long,
        env = "BEACH_HELM_SCREEN_MODES",
        default_value = "1280x720@30,1920x1080@30,1920x1080@60"
    )]
    pub screen_modes: String,

    /// Screen size applied at startup.
    #[arg(long, env = "BEACH_HELM_INITIAL_SCREEN", default_value = "1280x720@30")]
    pub initial_screen: String,

    /// Reject screen sizes that are not listed instead of snapping to the nearest.
    #[arg(long, env = "BEACH_HELM_EXACT_SCREEN_MODES", default_value_t = false)]
    pub exact_screen_modes: bool,

    /// Events queued per session before further events are dropped for it.
    #[arg(long, env = "BEACH_HELM_OUTBOUND_BUFFER", default_value_t = 64)]
    pub outbound_buffer: usize,

    /// Log filter used when RUST_LOG is not set.
    #[arg(long, env = "BEACH_HELM_LOG_FILTER", default_value = "info")]
    pub log_filter: String,
}

/// Websocket endpoint for `base` with `token` percent-encoded into the query.
fn room_socket_url(base: &str, token: &str) -> String {
    format!(
        "{}/ws?token={}",
        base.trim_end_matches('/'),
        urlencoding::encode(token)
    )
}

pub async fn run_watch(
    url: String,
    token: String,
    request_control: bool,
    duration: Option<u64>,
) -> Result<()> {
    let ws_url = room_socket_url(&url, &token);
    debug!("Connecting to {}", url);

    let (ws_stream, _) = match timeout(Duration::from_secs(5), connect_async(&ws_url)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            error!("Failed to connect to {}: {}", url, e);
            return Err(anyhow!("Connection failed: {}", e));
        }
        Err(_) => {
            error!("Connection timeout after 5 seconds");
            return Err(anyhow!("Connection timeout - is the room server running?"));
        }
    };
    let (mut write, mut read) = ws_stream.split();

    let deadline = duration.map(|secs| Instant::now() + Duration::from_secs(secs));
    let mut requested = false;

    loop {
        let next = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, read.next()).await {
                Ok(next) => next,
                Err(_) => break,
            },
            None => read.next().await,
        };
        let Some(frame) = next else {
            break;
        };

        match frame? {
            Message::Text(text) => {
                let event: ServerEvent = match serde_json::from_str(text.as_str()) {
                    Ok(event) => event,
                    Err(e) => {
                        debug!("Skipping unrecognised frame: {}", e);
                        continue;
                    }
                };
                println!("{}", text.as_str());

                if request_control && !requested {
                    if let ServerEvent::SystemInit(init) = &event {
                        requested = true;
                        if init.control.host_id.as_deref() != Some(init.session_id.as_str()) {
                            let json = serde_json::to_string(&ClientMessage::ControlRequest)?;
                            write.send(Message::Text(json.into())).await?;
                        }
                    }
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    let _ = write.send(Message::Close(None)).await;
    Ok(())
}
