use std::sync::Arc;
use styled_image_captioner::{
    captioner::Captioner,
    config::Config,
    models::{self, ModelBundle},
    router,
    state::AppState,
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing() {
    let env_layer =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    tracing_subscriber::registry()
        .with(env_layer)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // before tracing so RUST_LOG from .env applies
    let dotenv = dotenvy::dotenv();
    init_tracing();
    match dotenv {
        Ok(path) => info!(".env read successfully from {}", path.display()),
        Err(e) => warn!("Could not load .env file: {e}"),
    }

    let config = Config::from_env()?;
    tokio::fs::create_dir_all(&config.upload_dir).await?;

    let device = models::select_device();
    let device_label = models::device_label(&device);

    let captioner: Option<Arc<dyn Captioner>> = match ModelBundle::load(&config, device).await {
        Ok(bundle) => {
            info!("✅ All models loaded successfully!");
            Some(Arc::new(bundle) as Arc<dyn Captioner>)
        }
        Err(e) => {
            error!("❌ Error loading models: {e:#}");
            None
        }
    };

    info!("🤖 Models loaded: {}", captioner.is_some());
    info!("🔧 Device: {}", device_label);
    info!("📁 Upload folder: {}", config.upload_dir.display());

    let state = Arc::new(AppState::new(
        captioner,
        device_label,
        config.upload_dir.clone(),
    ));
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;

    info!("🚀 Server running on http://{}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
