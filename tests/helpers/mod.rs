//! Test helper utilities for E2E testing

use reqwest::multipart;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;

use crate::fixtures::FoodFixture;

/// Response from POST /validate-food
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub task_id: String,
    pub status_endpoint: String,
    pub message: String,
}

/// Response from GET /task-status/{task_id}
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusResponse {
    pub task_id: String,
    pub status: String,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub result: Option<Classification>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Classification {
    pub food_name: String,
    #[serde(default)]
    pub ingredients: Vec<String>,
    pub is_vegetarian: String,
    pub is_swaminarayan_compliant: String,
    pub is_jain_compliant: String,
    pub is_vegan_compliant: String,
    pub is_upvas_compliant: String,
    #[serde(default)]
    pub reasons: Vec<String>,
}

/// Image source for a submission.
pub enum ImageInput<'a> {
    File(&'a [u8], &'a str),
    Url(String),
    Base64(String),
}

pub async fn submit_food(
    client: &reqwest::Client,
    base_url: &str,
    image: Option<ImageInput<'_>>,
    food_name: Option<&str>,
    ingredients: Option<&str>,
) -> Result<reqwest::Response, Box<dyn std::error::Error + Send + Sync>> {
    let mut form = multipart::Form::new();

    match image {
        Some(ImageInput::File(bytes, mime)) => {
            form = form.part(
                "image",
                multipart::Part::bytes(bytes.to_vec())
                    .file_name("food.png")
                    .mime_str(mime)?,
            );
        }
        Some(ImageInput::Url(url)) => form = form.text("imageUrl", url),
        Some(ImageInput::Base64(data)) => form = form.text("imageBase64", data),
        None => {}
    }
    if let Some(name) = food_name {
        form = form.text("foodName", name.to_string());
    }
    if let Some(list) = ingredients {
        form = form.text("ingredients", list.to_string());
    }

    Ok(client
        .post(format!("{}/validate-food", base_url))
        .multipart(form)
        .send()
        .await?)
}

/// Submit a fixture by image URL and return the accepted task.
pub async fn submit_fixture(
    client: &reqwest::Client,
    base_url: &str,
    fixture: &FoodFixture,
    image_url: String,
) -> Result<SubmitResponse, Box<dyn std::error::Error + Send + Sync>> {
    let response = submit_food(
        client,
        base_url,
        Some(ImageInput::Url(image_url)),
        Some(fixture.food_name),
        Some(fixture.ingredients),
    )
    .await?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await?;
        return Err(format!("Submit failed with status {}: {}", status, error_text).into());
    }
    Ok(response.json::<SubmitResponse>().await?)
}

/// Poll task status until completed or failed (with timeout)
pub async fn poll_task_status(
    client: &reqwest::Client,
    base_url: &str,
    task_id: &str,
    timeout_secs: u64,
) -> Result<TaskStatusResponse, Box<dyn std::error::Error + Send + Sync>> {
    let max_attempts = timeout_secs * 2; // Poll every 500ms

    for attempt in 0..max_attempts {
        let response = client
            .get(format!("{}/task-status/{}", base_url, task_id))
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(format!("Status check failed: {}", error_text).into());
        }

        let status_response = response.json::<TaskStatusResponse>().await?;

        match status_response.status.as_str() {
            "completed" | "failed" => return Ok(status_response),
            "waiting" | "active" | "delayed" => {
                if attempt % 10 == 0 && attempt > 0 {
                    println!("  ... still waiting (attempt {}/{})", attempt, max_attempts);
                }
                sleep(Duration::from_millis(500)).await;
            }
            _ => {
                return Err(format!("Unknown task status: {}", status_response.status).into());
            }
        }
    }

    Err(format!("Task did not finish within {} seconds", timeout_secs).into())
}

/// Assert the verdicts a fixture pins down.
pub fn assert_classification(result: &Classification, fixture: &FoodFixture) {
    let checks = [
        ("vegetarian", fixture.vegetarian, &result.is_vegetarian),
        ("jain", fixture.jain, &result.is_jain_compliant),
        ("vegan", fixture.vegan, &result.is_vegan_compliant),
    ];

    for (label, expected, actual) in checks {
        if let Some(expected) = expected {
            let expected = if expected { "yes" } else { "no" };
            assert_eq!(
                actual, expected,
                "{} verdict mismatch for {} (reasons: {:?})",
                label, fixture.food_name, result.reasons
            );
        }
    }

    println!(
        "  ✓ {} - vegetarian: {}, jain: {}, vegan: {}",
        result.food_name, result.is_vegetarian, result.is_jain_compliant, result.is_vegan_compliant
    );
}
