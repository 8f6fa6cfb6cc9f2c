//! PureBoot controller entry point: wires the proxy-DHCP responder, TFTP
//! engine, and HTTP boot dispatch surface to a shared [`AppState`] and runs
//! all three concurrently.

mod config;
mod error;
mod http;
mod state;

use crate::config::Settings;
use crate::state::AppState;
use anyhow::Context;
use async_tftp::server::TftpServerBuilder;
use pureboot_pxe::tftp::PureBootTftpHandler;
use std::net::Ipv4Addr;
use tokio::net::UdpSocket;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let settings = Settings::from_env().context("loading configuration")?;
    tracing::info!(
        tftp_bind = %settings.tftp.bind_addr,
        dhcp_bind = %settings.dhcp.bind_addr,
        http_bind = %settings.boot_menu.server_address,
        "starting PureBoot controller"
    );

    let state = AppState::new(settings.clone());

    let tftp = run_tftp(settings.clone());
    let dhcp = run_dhcp_proxy(settings.clone());
    let http = run_http(settings.clone(), state);

    tokio::try_join!(tftp, dhcp, http)?;
    Ok(())
}

/// Serve the TFTP root and per-node Pi trees (spec.md §4.1).
async fn run_tftp(settings: Settings) -> anyhow::Result<()> {
    let handler = PureBootTftpHandler::new(settings.tftp.root.clone(), settings.pi.nodes_dir.clone());
    let bind_addr = settings
        .tftp
        .bind_addr
        .parse()
        .with_context(|| format!("invalid TFTP bind address {}", settings.tftp.bind_addr))?;

    let server = TftpServerBuilder::with_handler(handler)
        .bind(bind_addr)
        .build()
        .await
        .context("binding TFTP server")?;

    tracing::info!(addr = %settings.tftp.bind_addr, "TFTP engine listening");
    server.serve().await.context("TFTP server")?;
    Ok(())
}

/// Answer proxy-DHCP BOOTREQUESTs (spec.md §4.2). No lease is ever granted;
/// this only steers PXE clients to their next boot artifact.
async fn run_dhcp_proxy(settings: Settings) -> anyhow::Result<()> {
    let socket = UdpSocket::bind(&settings.dhcp.bind_addr)
        .await
        .with_context(|| format!("binding proxy-DHCP socket on {}", settings.dhcp.bind_addr))?;
    socket.set_broadcast(true).context("enabling broadcast on proxy-DHCP socket")?;

    tracing::info!(addr = %settings.dhcp.bind_addr, "proxy-DHCP responder listening");

    let mut buf = [0_u8; 1500];
    loop {
        let (len, client_addr) = match socket.recv_from(&mut buf).await {
            Ok(pair) => pair,
            Err(error) => {
                tracing::warn!(%error, "proxy-DHCP recv_from failed");
                continue;
            }
        };

        let request = match pureboot_pxe::dhcp::decode_request(&buf[..len]) {
            Ok(request) => request,
            Err(error) => {
                tracing::debug!(%error, %client_addr, "dropping malformed BOOTREQUEST");
                continue;
            }
        };

        let class = pureboot_pxe::dhcp::classify(&request);
        let reply = match pureboot_pxe::dhcp::build_reply(&request, class, settings.dhcp.server_ip, &settings.boot_menu.advertised_address) {
            Ok(reply) => reply,
            Err(error) => {
                tracing::warn!(%error, %client_addr, "failed to build proxy-DHCP reply");
                continue;
            }
        };

        let encoded = match pureboot_pxe::dhcp::encode_reply(&reply) {
            Ok(encoded) => encoded,
            Err(error) => {
                tracing::warn!(%error, %client_addr, "failed to encode proxy-DHCP reply");
                continue;
            }
        };

        let reply_addr = (Ipv4Addr::BROADCAST, 68);
        if let Err(error) = socket.send_to(&encoded, reply_addr).await {
            tracing::warn!(%error, %client_addr, ?class, "failed to send proxy-DHCP reply");
        }
    }
}

/// Serve the boot dispatch surface (spec.md §6).
async fn run_http(settings: Settings, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&settings.boot_menu.server_address)
        .await
        .with_context(|| format!("binding HTTP listener on {}", settings.boot_menu.server_address))?;

    tracing::info!(addr = %settings.boot_menu.server_address, "HTTP boot surface listening");
    axum::serve(listener, http::router(state)).await.context("HTTP server")?;
    Ok(())
}
