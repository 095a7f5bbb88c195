use axum::extract::{Multipart, Path, State};
use axum::Json;
use garde::Validate;

use crate::app_state::AppState;
use crate::models::api::{FoodHints, SubmitResponse, TaskStatusResponse};
use crate::models::job::JobId;
use crate::models::task::{ImageReference, TaskPayload};
use crate::routes::error::ApiError;

/// Multipart field names accepted by `POST /validate-food`.
const FIELD_IMAGE: &str = "image";
const FIELD_IMAGE_URL: &str = "imageUrl";
const FIELD_IMAGE_BASE64: &str = "imageBase64";
const FIELD_FOOD_NAME: &str = "foodName";
const FIELD_INGREDIENTS: &str = "ingredients";

struct UploadedFile {
    data: Vec<u8>,
    content_type: Option<String>,
}

#[derive(Default)]
struct SubmittedForm {
    file: Option<UploadedFile>,
    image_url: Option<String>,
    image_base64: Option<String>,
    hints: FoodHints,
}

impl SubmittedForm {
    async fn read(multipart: &mut Multipart) -> Result<Self, ApiError> {
        let mut form = Self::default();

        while let Some(field) = multipart.next_field().await.map_err(invalid_multipart)? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                FIELD_IMAGE => {
                    let content_type = field.content_type().map(str::to_string);
                    let data = field.bytes().await.map_err(invalid_multipart)?;
                    if !data.is_empty() {
                        form.file = Some(UploadedFile {
                            data: data.to_vec(),
                            content_type,
                        });
                    }
                }
                FIELD_IMAGE_URL => {
                    form.image_url = non_empty(field.text().await.map_err(invalid_multipart)?)
                }
                FIELD_IMAGE_BASE64 => {
                    form.image_base64 = non_empty(field.text().await.map_err(invalid_multipart)?)
                }
                FIELD_FOOD_NAME => {
                    form.hints.food_name = non_empty(field.text().await.map_err(invalid_multipart)?)
                }
                FIELD_INGREDIENTS => {
                    form.hints.ingredients =
                        non_empty(field.text().await.map_err(invalid_multipart)?)
                }
                other => tracing::debug!(field = other, "Ignoring unknown form field"),
            }
        }
        Ok(form)
    }

    /// Pick one image source (file, then URL, then base64) and attach the hints.
    fn into_payload(self) -> Result<TaskPayload, ApiError> {
        let supplied = [
            self.file.is_some(),
            self.image_url.is_some(),
            self.image_base64.is_some(),
        ]
        .into_iter()
        .filter(|present| *present)
        .count();
        if supplied > 1 {
            tracing::warn!(
                supplied,
                "Several image sources supplied; using the first of file, URL, base64"
            );
        }

        let image = if let Some(file) = self.file {
            let media_type = sniff_media_type(&file)?;
            ImageReference::Bytes {
                data: file.data,
                media_type,
            }
        } else if let Some(url) = self.image_url {
            check_url(&url)?;
            ImageReference::Url { url }
        } else if let Some(data) = self.image_base64 {
            ImageReference::Base64 { data }
        } else {
            return Err(ApiError::NoImageProvided);
        };

        self.hints.validate()?;

        Ok(TaskPayload {
            image,
            food_name: self.hints.food_name,
            ingredients: self.hints.ingredients,
        })
    }
}

fn invalid_multipart(err: axum::extract::multipart::MultipartError) -> ApiError {
    ApiError::InvalidInput(err.body_text())
}

fn non_empty(text: String) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Media type from the file signature, falling back to the declared part type.
fn sniff_media_type(file: &UploadedFile) -> Result<String, ApiError> {
    if let Ok(format) = image::guess_format(&file.data) {
        return Ok(format.to_mime_type().to_string());
    }
    match file.content_type.as_deref() {
        Some(declared) if declared.starts_with("image/") => Ok(declared.to_string()),
        declared => Err(ApiError::UnsupportedImage(format!(
            "could not detect an image format (declared content type: {})",
            declared.unwrap_or("none")
        ))),
    }
}

fn check_url(url: &str) -> Result<(), ApiError> {
    match reqwest::Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
        _ => Err(ApiError::InvalidInput(format!(
            "imageUrl must be an http(s) URL, got {url:?}"
        ))),
    }
}

/// POST /validate-food — Queue a food image for dietary classification.
pub async fn submit_food(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<SubmitResponse>, ApiError> {
    let payload = SubmittedForm::read(&mut multipart).await?.into_payload()?;
    let task_id = state.queue.enqueue(payload, None).await?;

    metrics::counter!("food_validation_jobs_submitted").increment(1);

    Ok(Json(SubmitResponse {
        status_endpoint: format!("/task-status/{task_id}"),
        task_id,
        message: "Food validation task queued".to_string(),
    }))
}

/// GET /task-status/{task_id} — Poll a task's state and result.
pub async fn get_task_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskStatusResponse>, ApiError> {
    let job = state
        .queue
        .get_job(&JobId::new(task_id.as_str()))
        .await?
        .ok_or(ApiError::JobNotFound(task_id))?;

    Ok(Json(job.into()))
}
