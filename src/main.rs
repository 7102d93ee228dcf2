use clap::Parser;
use kube::Client;
use reloader::config;
use reloader::supervisor;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = config::Cli::parse();
    init_tracing(&cli.log_level, &cli.log_format);

    info!("Starting reloader {}", env!("CARGO_PKG_VERSION"));

    let mut app_config = config::load_config_or_default(&cli.config_path)?;
    app_config.apply_cli(&cli);

    let client = create_client().await?;

    supervisor::run(app_config, client).await
}

fn init_tracing(log_level: &str, log_format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if log_format.eq_ignore_ascii_case("json") {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

async fn create_client() -> anyhow::Result<Client> {
    let client = Client::try_default().await?;
    let api_server_info = client.apiserver_version().await?;
    info!(
        "Connected to namespace {}, in-cluster Kubernetes API server with version {}.{}",
        client.default_namespace(),
        api_server_info.major,
        api_server_info.minor
    );
    Ok(client)
}
