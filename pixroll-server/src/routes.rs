use axum::{
    Router,
    http::{HeaderValue, Method},
    routing::get,
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::handlers::{
    health::health_handler,
    images::{directory_image_handler, exact_image_handler, random_image_handler},
    update::update_manifest_handler,
};
use crate::infra::app_state::AppState;

/// Build the full application router. Literal routes are registered
/// alongside the captures; axum gives them priority, so `/update` and
/// `/health` never shadow a directory named anything else.
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_allowed_origins);

    Router::new()
        .route("/health", get(health_handler))
        .route("/update", get(update_manifest_handler))
        .route("/", get(random_image_handler))
        .route("/{directory}", get(directory_image_handler))
        .route("/{directory}/{*filename}", get(exact_image_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods([Method::GET]);

    if origins.iter().any(|origin| origin == "*") {
        layer.allow_origin(Any)
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        layer.allow_origin(AllowOrigin::list(parsed))
    }
}
