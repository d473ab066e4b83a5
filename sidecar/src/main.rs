use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use browserkube_common::wdproto::WebDriver;
use sidecar::timer::IdleTimer;
use sidecar::{logging, SidecarOpts, SidecarState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = SidecarOpts::parse();
    opts.validate()?;

    logging::init("sidecar=info,browserkube_common=info");

    tracing::info!(
        port = opts.port,
        engine = %opts.engine_base(),
        idle = %humantime::format_duration(opts.idle_timeout),
        session = %humantime::format_duration(opts.session_timeout),
        "starting browserkube sidecar"
    );

    let fired = CancellationToken::new();
    let idle = IdleTimer::spawn(opts.idle_timeout, fired.clone());
    // Never reset, so it fires once the total lifetime is spent.
    let _hard = IdleTimer::spawn(opts.session_timeout, fired.clone());

    let state = Arc::new(SidecarState::new(opts, idle));
    let app = sidecar::app(state.clone());

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", state.opts.port)).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            fired.cancelled().await;
            tracing::warn!("closing session due to timeout");
            if let Some(engine_id) = state.session.get() {
                let driver = WebDriver::new(state.opts.engine_base(), engine_id);
                if let Err(err) = driver.quit().await {
                    tracing::error!(error = %err, "failed to quit engine session");
                }
            }
        })
        .await?;

    Ok(())
}
