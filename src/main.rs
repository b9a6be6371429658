//! podpipe - main entry point.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use podpipe::{
    cluster::KubeControlPlane,
    config::Config,
    orchestrator::{PipeApi, PipeState, Pipeline, provisioner},
    template::UnitTemplate,
};

#[derive(Parser, Debug)]
#[command(name = "podpipe")]
#[command(about = "Stream request bodies into the stdin of ephemeral Kubernetes pods")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default)
    Serve {
        /// Port to listen on (overrides PODPIPE_PORT)
        #[arg(long)]
        port: Option<u16>,

        /// Namespace for worker pods (overrides POD_NAMESPACE)
        #[arg(long)]
        namespace: Option<String>,
    },

    /// Print the pod manifest a request would create, without contacting
    /// the cluster
    RenderTemplate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("podpipe=info,tower_http=info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = Config::from_env()?;
    let template = UnitTemplate::load(config.cluster.template_path.as_deref())?;

    match args.command.unwrap_or(Command::Serve {
        port: None,
        namespace: None,
    }) {
        Command::RenderTemplate => {
            let name = provisioner::generate_name(config.cluster.name_prefix.as_deref(), &template);
            let container = template.attach_container(config.cluster.container.as_deref())?;
            let pod = template.instantiate(&name)?;
            tracing::info!(container = %container, namespace = %config.cluster.namespace, "Rendered worker pod");
            println!("{}", serde_json::to_string_pretty(&pod)?);
            Ok(())
        }
        Command::Serve { port, namespace } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(namespace) = namespace {
                config.cluster.namespace = namespace;
            }
            serve(config, template).await
        }
    }
}

async fn serve(config: Config, template: UnitTemplate) -> anyhow::Result<()> {
    tracing::info!("Starting podpipe...");

    // Fail before binding if the template can never be attached to.
    let container = template.attach_container(config.cluster.container.as_deref())?;

    let control_plane = KubeControlPlane::connect(config.cluster.kubeconfig.as_deref()).await?;
    tracing::info!(
        namespace = %config.cluster.namespace,
        container = %container,
        start_timeout_secs = config.provisioner.start_timeout.as_secs(),
        "Cluster client ready"
    );

    let shutdown = CancellationToken::new();
    let pipeline = Pipeline::new(
        Arc::new(control_plane),
        Arc::new(template),
        &config,
        shutdown.clone(),
    );
    let state = PipeState {
        pipeline: Arc::new(pipeline),
    };

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        signal.cancel();
    });

    let addr = config.server.socket_addr()?;
    PipeApi::start(state, addr, shutdown).await?;

    tracing::info!("podpipe stopped");
    Ok(())
}
