use clap::Parser;

use operator::{controller, logging, ControllerOpts};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = ControllerOpts::parse();

    logging::init("operator=info,browserkube_common=info,kube=warn");

    tracing::info!(namespace = %opts.namespace, "starting browserkube operator");

    let client = kube::Client::try_default().await?;
    controller::run(client, opts).await;

    Ok(())
}
