#![deny(warnings)]
#![warn(unused_extern_crates)]
// Enable some groups of clippy lints.
#![deny(clippy::suspicious)]
#![deny(clippy::perf)]
// Specific lints to enforce.
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::trivially_copy_pass_by_ref)]
#![deny(clippy::disallowed_types)]
#![deny(clippy::manual_let_else)]
#![allow(clippy::unreachable)]

use clap::{Parser, Subcommand};
use futures::{SinkExt, StreamExt};
use kerbex::config::Config;
use kerbex::kdc::Kdc;
use kerbex::KdcTcpCodec;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, instrument, trace};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy)]
enum CoreAction {
    Shutdown,
}

#[instrument(level = "debug", skip_all, fields(peer = %peer))]
async fn kdc_tcp_client_process(socket: TcpStream, peer: SocketAddr, kdc: Arc<Kdc>) {
    let mut kdc_stream = Framed::new(socket, KdcTcpCodec::default());
    trace!("connection opened");

    while let Some(frame) = kdc_stream.next().await {
        let request = match frame {
            Ok(request) => request,
            Err(err) => {
                error!(?err, "unreadable request, disconnecting");
                break;
            }
        };

        let reply = kdc.handle(&request);
        if let Err(err) = kdc_stream.send(reply).await {
            error!(?err, "error writing response, disconnecting");
            break;
        }
    }
    debug!("closing client");
}

async fn kdc_tcp_acceptor(
    listener: TcpListener,
    kdc: Arc<Kdc>,
    mut rx: broadcast::Receiver<CoreAction>,
) {
    info!(realm = kdc.realm(), "kdc tcp acceptor started");

    loop {
        tokio::select! {
            Ok(action) = rx.recv() => {
                match action {
                    CoreAction::Shutdown => break,
                }
            }
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer)) => {
                        let kdc = kdc.clone();
                        tokio::spawn(async move { kdc_tcp_client_process(stream, peer, kdc).await });
                    }
                    Err(err) => {
                        error!(?err, "kdc acceptor error, continuing");
                    }
                }
            }
        }
    }

    info!("kdc tcp acceptor stopped");
}

#[derive(Debug, Parser)]
#[clap(about = "kerbexd - a key distribution centre with FAST and pluggable preauthentication")]
struct OptParser {
    #[clap(subcommand)]
    command: Opt,
}

#[derive(Debug, Subcommand)]
enum Opt {
    /// Serve the realm described by the configuration file.
    Run {
        #[clap(env = "KERBEXD_CONFIG")]
        config: PathBuf,
    },
    /// Parse the configuration and derive every key, then exit.
    Check { config: PathBuf },
}

async fn run(config: &Config) -> Result<(), ()> {
    let kdc = Kdc::try_from(config).map(Arc::new).map_err(|err| {
        error!(?err, "could not build the kdc from the configuration");
    })?;

    let address = SocketAddr::from_str(&config.address).map_err(|err| {
        error!(?err, address = %config.address, "could not parse the kdc address");
    })?;

    let listener = TcpListener::bind(&address).await.map_err(|err| {
        error!(?err, %address, "could not bind the kdc address");
    })?;
    info!(%address, "listening");

    let (tx, _) = broadcast::channel(4);
    let acceptor = tokio::spawn(kdc_tcp_acceptor(listener, kdc, tx.subscribe()));

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(?err, "unable to wait for a shutdown signal");
    }
    info!("signal received, shutting down");

    if tx.send(CoreAction::Shutdown).is_err() {
        error!("acceptor was already gone");
    }
    acceptor.await.map_err(|err| {
        error!(?err, "acceptor failed to finish");
    })
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), ()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let opt = OptParser::parse();

    match opt.command {
        Opt::Run { config } => {
            let cfg = Config::parse(&config).map_err(|err| {
                error!(?err, ?config, "could not parse config file");
            })?;
            run(&cfg).await
        }
        Opt::Check { config } => {
            let cfg = Config::parse(&config).map_err(|err| {
                error!(?err, ?config, "could not parse config file");
            })?;
            Kdc::try_from(&cfg).map_err(|err| {
                error!(?err, "configuration is not usable");
            })?;
            info!(realm = %cfg.realm, "configuration is valid");
            Ok(())
        }
    }
}
