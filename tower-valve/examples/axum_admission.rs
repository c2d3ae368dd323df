use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::error_handling::HandleErrorLayer;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::routing::post;
use tower::BoxError;
use tower::ServiceBuilder;
use tower::util::MapRequestLayer;
use tracing_subscriber::EnvFilter;

use tower_valve::AdmissionLayer;
use tower_valve::CooldownLayer;
use tower_valve::Owner;
use tower_valve::ValveError;
use valve_limit::RedisStore;
use valve_limit::ValveConfig;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 1. Load valve.toml and VALVE_* overrides
    let config = ValveConfig::load()?;

    // 2. Connect to the shared store
    let store = Arc::new(RedisStore::connect(&config.store).await?);

    // 3. Build the pipeline around a stand-in authentication layer
    let admission =
        AdmissionLayer::from_config(&config, store, MapRequestLayer::new(authenticate))?;
    let cooldown = config
        .cooldown
        .as_ref()
        .map(|cooldown| CooldownLayer::new(Arc::new(cooldown.build())));

    let app = Router::new()
        .route("/v1/make-move", post(|| async { "move accepted" }))
        .route("/v1/get-wallet", get(|| async { "42 coins" }))
        .layer(
            ServiceBuilder::new()
                // Turns ValveError (and anything else) into a response
                .layer(HandleErrorLayer::new(handle_valve_error))
                .option_layer(cooldown)
                .layer(admission)
                // Route is Infallible; the admission stages speak BoxError
                .map_err(BoxError::from),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
    tracing::info!("listening on http://127.0.0.1:3000");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// Treats the bearer token as the owner id. A real service verifies it first.
fn authenticate(mut req: Request) -> Request {
    let owner = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|token| Owner(token.to_string()));
    if let Some(owner) = owner {
        req.extensions_mut().insert(owner);
    }
    req
}

async fn handle_valve_error(err: BoxError) -> impl IntoResponse {
    if let Some(valve_err) = err.downcast_ref::<ValveError>() {
        valve_err.clone().into_response()
    } else {
        tracing::error!(%err, "request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal Service Error").into_response()
    }
}
