mod cli;
mod port;
mod tx;
mod xsk;

use anyhow::Context;
use blowtorch_common::{FrameError, FrameTemplate, TX_FRAME_LEN};
use log::{debug, info, warn};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;

use crate::port::TxPort;
use crate::tx::{TxContext, TxSummary};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    env_logger::init();

    let config = match cli::config_from(std::env::args_os()) {
        Ok(config) => config,
        Err(exit) => {
            if exit.code == 0 {
                print!("{}", exit.message);
            } else {
                eprint!("{}", exit.message);
            }
            std::process::exit(exit.code);
        }
    };

    println!(
        "Starting Blowtorch on interface {} queue {}",
        config.iface, config.queue
    );

    let mut socket = xsk::XdpSocket::new(&config.iface, config.queue)
        .context("Failed to create AF_XDP socket")?;

    let src_mac = socket.mac_address();
    info!("{} MAC: {}", config.iface, src_mac);

    let template = FrameTemplate::new(
        TX_FRAME_LEN,
        config.dst_mac,
        src_mac,
        config.src_ip,
        config.dst_ip,
    )
    .context("Failed to build packet headers")?;
    info!(
        "Frame: {} bytes, {} payload, IPv4 checksum {:#06x}",
        template.frame_len(),
        template.payload_len(),
        template.ipv4().checksum
    );

    let ctx = Arc::new(TxContext::new());
    let tx_ctx = ctx.clone();
    let tx_template = template.clone();
    let sender =
        tokio::task::spawn_blocking(move || tx::run(&mut socket, &tx_template, &tx_ctx));

    println!(
        "Sending to {} ({} -> {}), press Ctrl+C to stop.",
        config.dst_mac, config.src_ip, config.dst_ip
    );

    let summary = supervise(&ctx, wait_for_shutdown(&ctx), sender).await?;

    if summary.rejected > 0 || summary.pool_empty > 0 {
        warn!(
            "{} sends rejected, {} times the buffer pool was empty",
            summary.rejected, summary.pool_empty
        );
    }

    println!("{}", summary.report(template.frame_len()));

    Ok(())
}

/// Waits for `shutdown` or an early exit of the transmit loop. The loop is
/// always stopped and joined before this returns, errors included.
async fn supervise<F>(
    ctx: &TxContext,
    shutdown: F,
    mut sender: JoinHandle<Result<TxSummary, FrameError>>,
) -> anyhow::Result<TxSummary>
where
    F: Future<Output = anyhow::Result<()>>,
{
    let shutdown_res = tokio::select! {
        res = shutdown => res,
        joined = &mut sender => return Ok(joined.context("Transmit loop panicked")??),
    };

    ctx.stop();
    let summary = sender.await.context("Transmit loop panicked")??;
    shutdown_res?;
    Ok(summary)
}

/// Resolves on SIGINT or SIGTERM, logging progress once a second meanwhile.
async fn wait_for_shutdown(ctx: &TxContext) -> anyhow::Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut last_sent = 0;

    loop {
        tokio::select! {
            _ = sigint.recv() => break,
            _ = sigterm.recv() => break,
            _ = ticker.tick() => {
                let sent = ctx.counters().sent();
                debug!("Sender Speed: {} PPS", sent - last_sent);
                last_sent = sent;
            }
        }
    }

    println!("Stopping...");
    Ok(())
}
