//! Runtime configuration endpoints.
//!
//! The Deepgram credential never leaves the process: reads report only
//! whether it is configured, and updates cannot set it (the key comes from
//! the environment at startup, see `config.rs`).

use crate::{error::BridgeError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, BridgeError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "server": {
                "host": config.server.host,
                "port": config.server.port,
                "stream_path": config.server.stream_path
            },
            "deepgram": {
                "endpoint": config.deepgram.endpoint,
                "model": config.deepgram.model,
                "language": config.deepgram.language,
                "utterance_end_ms": config.deepgram.utterance_end_ms,
                "api_key_configured": config.deepgram.has_credentials()
            }
        }
    })))
}

pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, BridgeError> {
    let json_str = serde_json::to_string(&body.into_inner())
        .map_err(|e| BridgeError::Validation(e.to_string()))?;

    let mut current_config = state.get_config();
    current_config
        .update_from_json(&json_str)
        .map_err(|e| BridgeError::Validation(e.to_string()))?;

    state
        .update_config(current_config.clone())
        .map_err(BridgeError::Validation)?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": {
            "server": {
                "host": current_config.server.host,
                "port": current_config.server.port,
                "stream_path": current_config.server.stream_path
            },
            "deepgram": {
                "endpoint": current_config.deepgram.endpoint,
                "model": current_config.deepgram.model,
                "language": current_config.deepgram.language,
                "utterance_end_ms": current_config.deepgram.utterance_end_ms,
                "api_key_configured": current_config.deepgram.has_credentials()
            }
        }
    })))
}
