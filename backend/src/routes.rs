use std::sync::Arc;

use actix_multipart::Multipart;
use actix_web::{http::header::ContentType, web, HttpResponse, Responder};
use log::{error, info, warn};

use crate::config::ServerConfig;
use crate::diseases::DiseaseReport;
use crate::error::{PredictError, MSG_MODEL_NOT_LOADED};
use crate::inference::{classify_image, Classifier};
use crate::models::{ApiResponse, HealthStatus, ModelInfo, PredictionView};
use crate::preprocess::preprocess_bytes;
use crate::render::{render_page, PageView};
use crate::upload::{allowed_file, read_file_field, save_upload, stored_name, Upload};

/// Shared by every worker. Built once in `main` and never mutated.
pub struct AppState {
    pub config: ServerConfig,
    pub classifier: Option<Arc<dyn Classifier>>,
}

impl AppState {
    pub fn new(config: ServerConfig, classifier: Option<Arc<dyn Classifier>>) -> Self {
        Self { config, classifier }
    }

    pub fn model_loaded(&self) -> bool {
        self.classifier.is_some()
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/")
            .route(web::get().to(index))
            .route(web::post().to(predict)),
    )
    .route("/api/health", web::get().to(health_check))
    .route("/api/model-info", web::get().to(model_info));
}

fn page(state: &AppState, view: &PageView) -> HttpResponse {
    HttpResponse::Ok()
        .content_type(ContentType::html())
        .body(render_page(view, &state.config.allowed_extensions))
}

async fn index(state: web::Data<AppState>) -> impl Responder {
    page(&state, &PageView::empty())
}

async fn predict(state: web::Data<AppState>, payload: Multipart) -> impl Responder {
    let view = match handle_upload(state.clone(), payload).await {
        Ok(result) => {
            info!(
                "Predicted {} ({:.2}%) for {}",
                result.prediction.label, result.prediction.confidence, result.image_path
            );
            PageView::result(result)
        }
        Err(e) => {
            if e.is_user_error() {
                warn!("Rejected upload: {}", e);
            } else {
                error!("Error during prediction: {}", e);
            }
            PageView::message(&e.user_message())
        }
    };
    page(&state, &view)
}

async fn handle_upload(
    state: web::Data<AppState>,
    payload: Multipart,
) -> Result<PredictionView, PredictError> {
    let upload = read_file_field(payload, state.config.max_upload_bytes)
        .await?
        .filter(|u| !u.filename.is_empty())
        .ok_or(PredictError::NoFile)?;

    if !allowed_file(&upload.filename, &state.config.allowed_extensions) {
        return Err(PredictError::InvalidFileType {
            filename: upload.filename,
            allowed: state.config.allowed_extensions.clone(),
        });
    }

    web::block(move || process_upload(&state, upload))
        .await
        .map_err(|e| PredictError::Inference(e.to_string()))?
}

/// Store, decode, classify. Runs on the blocking pool.
pub fn process_upload(state: &AppState, upload: Upload) -> Result<PredictionView, PredictError> {
    let name = stored_name(&upload.filename);
    save_upload(&state.config.static_dir, &name, &upload.bytes)?;

    let image = preprocess_bytes(&upload.bytes, state.config.input_size)?;
    let prediction = classify_image(
        state.classifier.as_deref(),
        image,
        &state.config.labels,
    )?;
    let report = DiseaseReport::for_label(&prediction.label);

    Ok(PredictionView {
        image_path: format!("/static/{}", name),
        prediction,
        report,
    })
}

async fn health_check(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(ApiResponse::success(HealthStatus {
        status: if state.model_loaded() { "ok" } else { "degraded" }.to_string(),
        model_loaded: state.model_loaded(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}

async fn model_info(state: web::Data<AppState>) -> impl Responder {
    match &state.classifier {
        Some(classifier) => HttpResponse::Ok().json(ApiResponse::success(ModelInfo {
            model_path: state.config.model_path.display().to_string(),
            input_shape: classifier.input_shape().to_vec(),
            batch_size: classifier.batch_size(),
            labels: state.config.labels.clone(),
        })),
        None => HttpResponse::ServiceUnavailable()
            .json(ApiResponse::<ModelInfo>::error(MSG_MODEL_NOT_LOADED)),
    }
}
