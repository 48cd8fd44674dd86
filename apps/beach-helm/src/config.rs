use std::net::SocketAddr;

use anyhow::{bail, Context};

use crate::auth::TokenResolver;
use crate::cli::ServerArgs;
use crate::desktop::{parse_modes, DesktopError, ScreenSize, VirtualDesktop};
use crate::protocol::Settings;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub admin_token: Option<String>,
    pub user_token: Option<String>,
    pub viewer_token: Option<String>,
    pub locked_controls: bool,
    pub screen_modes: Vec<ScreenSize>,
    pub initial_screen: ScreenSize,
    pub exact_screen_modes: bool,
    pub outbound_buffer: usize,
    pub log_filter: String,
}

impl Config {
    pub fn settings(&self) -> Settings {
        Settings {
            locked_controls: self.locked_controls,
        }
    }

    pub fn resolver(&self) -> TokenResolver {
        TokenResolver::new(self.admin_token.clone(), self.user_token.clone())
            .with_viewer_token(self.viewer_token.clone())
    }

    pub fn desktop(&self) -> Result<VirtualDesktop, DesktopError> {
        Ok(
            VirtualDesktop::new(self.screen_modes.clone(), self.initial_screen)?
                .with_exact_modes(self.exact_screen_modes),
        )
    }
}

impl TryFrom<ServerArgs> for Config {
    type Error = anyhow::Error;

    fn try_from(args: ServerArgs) -> Result<Self, Self::Error> {
        let listen_addr: SocketAddr = args
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", args.listen_addr))?;
        let screen_modes = parse_modes(&args.screen_modes)
            .with_context(|| format!("invalid screen modes: {}", args.screen_modes))?;
        let initial_screen: ScreenSize = args
            .initial_screen
            .parse()
            .with_context(|| format!("invalid initial screen size: {}", args.initial_screen))?;
        if args.outbound_buffer == 0 {
            bail!("outbound buffer must hold at least one event");
        }

        Ok(Config {
            listen_addr,
            admin_token: args.admin_token,
            user_token: args.user_token,
            viewer_token: args.viewer_token,
            locked_controls: args.locked_controls,
            screen_modes,
            initial_screen,
            exact_screen_modes: args.exact_screen_modes,
            outbound_buffer: args.outbound_buffer,
            log_filter: args.log_filter,
        })
    }
}
