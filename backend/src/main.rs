use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use backend::k8s::{
    K8sProvisioner, K8sResultsRepository, K8sSessionRepository, Provisioner, ResultsRepository,
};
use backend::proxy::HookChain;
use backend::storage::{FsSessionStorage, SessionStorage};
use backend::{logging, plugins, AppState, BackendOpts};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = BackendOpts::parse();

    logging::init("backend=info,browserkube_common=info,kube=warn");
    tracing::info!(namespace = %opts.namespace, port = opts.port, "starting browserkube backend");

    let client = kube::Client::try_default().await?;
    let cancel = CancellationToken::new();

    let repo = K8sSessionRepository::start(client.clone(), &opts.namespace, cancel.clone());
    let provisioner: Arc<dyn Provisioner> = Arc::new(K8sProvisioner::new(
        client.clone(),
        &opts.namespace,
        opts.provision_timeout,
    ));
    let results: Arc<dyn ResultsRepository> =
        Arc::new(K8sResultsRepository::new(client, &opts.namespace));
    let storage: Arc<dyn SessionStorage> =
        Arc::new(FsSessionStorage::from_url(&opts.storage_url)?);

    let chain = HookChain::new(plugins::default_plugins(
        provisioner.clone(),
        results.clone(),
        storage.clone(),
    ));
    let state = Arc::new(AppState {
        repo,
        provisioner,
        results,
        storage,
        chain,
        http: reqwest::Client::new(),
        events_window: opts.events_window,
    });

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", opts.port)).await?;
    axum::serve(listener, backend::app(state)).await?;

    cancel.cancel();
    Ok(())
}
