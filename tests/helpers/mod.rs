//! Helpers for exercising a running graymill deployment over HTTP.

use reqwest::multipart;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

/// Response from POST /jobs.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    pub job_id: Uuid,
    pub status: String,
}

/// Serialized job record from GET /jobs/{id}.
#[derive(Debug, Deserialize)]
pub struct JobStatusResponse {
    pub id: Uuid,
    pub image_path: String,
    pub result_path: Option<String>,
    pub status: String,
    pub error: Option<String>,
}

/// Upload a file to the submit endpoint.
pub async fn submit_file(
    client: &reqwest::Client,
    base_url: &str,
    bytes: Vec<u8>,
    filename: &str,
) -> Result<SubmitResponse, Box<dyn std::error::Error>> {
    let form = multipart::Form::new().part(
        "file",
        multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str("application/octet-stream")?,
    );

    let response = client
        .post(format!("{base_url}/jobs"))
        .multipart(form)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(format!("submit failed with status {status}").into());
    }

    Ok(response.json::<SubmitResponse>().await?)
}

/// Poll job status until a terminal state (with timeout).
pub async fn poll_until_terminal(
    client: &reqwest::Client,
    base_url: &str,
    job_id: Uuid,
    timeout_secs: u64,
) -> Result<JobStatusResponse, Box<dyn std::error::Error>> {
    let max_attempts = timeout_secs * 2; // poll every 500ms

    for _ in 0..max_attempts {
        let response = client
            .get(format!("{base_url}/jobs/{job_id}"))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(format!("status check failed: {}", response.status()).into());
        }

        let job = response.json::<JobStatusResponse>().await?;
        match job.status.as_str() {
            "DONE" | "FAILED" => return Ok(job),
            "PENDING" | "PROCESSING" => sleep(Duration::from_millis(500)).await,
            other => return Err(format!("unknown job status: {other}").into()),
        }
    }

    Err(format!("job did not reach a terminal state within {timeout_secs} seconds").into())
}

/// Fetch the result bytes for a finished job.
pub async fn fetch_result(
    client: &reqwest::Client,
    base_url: &str,
    job_id: Uuid,
) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let response = client
        .get(format!("{base_url}/jobs/{job_id}/result"))
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(format!("result fetch failed: {}", response.status()).into());
    }

    Ok(response.bytes().await?.to_vec())
}
