use dotenvy::dotenv;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use campus_food_server::config::Config;
use campus_food_server::routes::create_routes;
use campus_food_server::state::AppState;
use campus_food_server::store;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("campus_food_server=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;
    let store = store::connect(&config).await?;
    let state = AppState::from_config(&config, store)?;
    let _catalog = state.track_catalog();

    let app = create_routes(state, &config);

    let listener = TcpListener::bind(config.bind_addr).await?;
    tracing::info!("🚀 Server running at http://{}", config.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
