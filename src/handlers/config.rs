use crate::{
    error::{AppError, AppResult},
    state::AppState,
};
use actix_web::{web, HttpResponse};
use serde_json::json;
use tracing::info;

/// `GET /api/v1/config`: the configuration currently in effect.
pub async fn get_config(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config
    })))
}

/// `PUT /api/v1/config`: partial update, validated before it is applied.
///
/// A new round duration applies to games started afterwards.
pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> AppResult<HttpResponse> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut current_config = state.get_config();
    current_config
        .update_from_json(&json_str)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    state
        .update_config(current_config.clone())
        .map_err(AppError::ValidationError)?;
    info!(
        round_duration_secs = current_config.game.round_duration_secs,
        "configuration updated"
    );

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": current_config
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use actix_web::{http::StatusCode, test, App};

    fn app_state() -> AppState {
        let mut config = AppConfig::default();
        config.storage.files_dir = std::env::temp_dir()
            .join(format!("relay-config-{}", uuid::Uuid::new_v4()))
            .to_string_lossy()
            .into_owned();
        AppState::new(config)
    }

    #[actix_web::test]
    async fn test_update_then_read_config() {
        let state = web::Data::new(app_state());
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/api/v1/config", web::get().to(get_config))
                .route("/api/v1/config", web::put().to(update_config)),
        )
        .await;

        let request = test::TestRequest::put()
            .uri("/api/v1/config")
            .set_json(json!({"game": {"round_duration_secs": 45}}))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::OK);

        let request = test::TestRequest::get().uri("/api/v1/config").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, request).await;
        assert_eq!(body["config"]["game"]["round_duration_secs"], 45);
        assert_eq!(state.get_config().game.round_duration_secs, 45);
    }

    #[actix_web::test]
    async fn test_invalid_update_is_rejected() {
        let state = web::Data::new(app_state());
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/api/v1/config", web::put().to(update_config)),
        )
        .await;

        let request = test::TestRequest::put()
            .uri("/api/v1/config")
            .set_json(json!({"game": {"round_duration_secs": 0}}))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.get_config().game.round_duration_secs, 30);
    }
}
