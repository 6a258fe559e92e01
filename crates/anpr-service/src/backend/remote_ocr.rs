/// Remote plate recognition through the Roboflow hosted inference API
///
/// The crop is JPEG encoded, base64 encoded and posted as a form body; the
/// response lists one prediction per character.
use super::{CharacterBox, PlateRecognizer, Recognition};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use image::RgbImage;
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;
use tracing::instrument;

pub const DEFAULT_ROBOFLOW_API_URL: &str = "https://detect.roboflow.com";

#[derive(Debug, Clone)]
pub struct RoboflowConfig {
    pub api_url: String,
    pub project: String,
    pub version: String,
    pub api_key: String,
}

#[derive(Debug, Deserialize)]
struct InferenceResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    #[serde(default)]
    x: f32,
    #[serde(default)]
    y: f32,
    #[serde(default)]
    width: f32,
    #[serde(default)]
    height: f32,
    #[serde(default)]
    class: String,
    #[serde(default)]
    confidence: f32,
}

pub struct RoboflowRecognizer {
    endpoint: Url,
    client: reqwest::Client,
}

impl RoboflowRecognizer {
    pub fn new(config: RoboflowConfig) -> Result<Self> {
        let mut endpoint = Url::parse(&config.api_url).context("invalid Roboflow API URL")?;
        endpoint
            .path_segments_mut()
            .map_err(|_| anyhow!("Roboflow API URL {} cannot take a path", config.api_url))?
            .pop_if_empty()
            .push(&config.project)
            .push(&config.version);
        endpoint
            .query_pairs_mut()
            .append_pair("api_key", &config.api_key);

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(15))
            .build()?;

        Ok(Self { endpoint, client })
    }
}

/// JPEG encode a crop and base64 it for the request body.
pub fn encode_plate(plate: &RgbImage) -> Result<String> {
    let mut jpeg = Vec::new();
    plate
        .write_to(&mut std::io::Cursor::new(&mut jpeg), image::ImageFormat::Jpeg)
        .context("failed to encode plate crop as JPEG")?;
    Ok(base64::prelude::BASE64_STANDARD.encode(&jpeg))
}

fn into_recognition(response: InferenceResponse) -> Recognition {
    let characters = response
        .predictions
        .into_iter()
        .map(|p| CharacterBox {
            label: p.class,
            x: p.x,
            y: p.y,
            width: p.width,
            height: p.height,
            confidence: p.confidence,
        })
        .collect();
    Recognition::from_characters(characters)
}

#[async_trait]
impl PlateRecognizer for RoboflowRecognizer {
    fn name(&self) -> &'static str {
        "roboflow"
    }

    fn annotates_characters(&self) -> bool {
        true
    }

    #[instrument(skip_all, fields(width = plate.width(), height = plate.height()))]
    async fn recognize(&self, plate: &RgbImage) -> Result<Recognition> {
        let body = encode_plate(plate)?;

        let resp = self
            .client
            .post(self.endpoint.clone())
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(body)
            .send()
            .await
            .context("Roboflow request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("Roboflow API error: {} {}", status.as_u16(), text);
        }

        let response: InferenceResponse = resp
            .json()
            .await
            .context("failed to parse Roboflow response")?;
        Ok(into_recognition(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Router};

    fn config(api_url: String) -> RoboflowConfig {
        RoboflowConfig {
            api_url,
            project: "plates-ocr".to_string(),
            version: "3".to_string(),
            api_key: "secret".to_string(),
        }
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_endpoint_includes_project_version_and_key() {
        let recognizer = RoboflowRecognizer::new(config(DEFAULT_ROBOFLOW_API_URL.to_string())).unwrap();
        assert_eq!(
            recognizer.endpoint.as_str(),
            "https://detect.roboflow.com/plates-ocr/3?api_key=secret"
        );
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        for base in ["https://proxy.local/rf", "https://proxy.local/rf/"] {
            let recognizer = RoboflowRecognizer::new(config(base.to_string())).unwrap();
            assert_eq!(
                recognizer.endpoint.as_str(),
                "https://proxy.local/rf/plates-ocr/3?api_key=secret"
            );
        }
        assert!(RoboflowRecognizer::new(config("mailto:ops@example.com".to_string())).is_err());
    }

    #[test]
    fn test_predictions_sorted_by_x() {
        let response: InferenceResponse = serde_json::from_value(serde_json::json!({
            "predictions": [
                {"x": 50.0, "y": 10.0, "width": 8.0, "height": 16.0, "class": "3", "confidence": 0.9},
                {"x": 10.0, "y": 10.0, "width": 8.0, "height": 16.0, "class": "M", "confidence": 0.9},
                {"x": 30.0, "y": 10.0, "width": 8.0, "height": 16.0, "class": "H", "confidence": 0.8}
            ]
        }))
        .unwrap();

        assert_eq!(into_recognition(response).text, "MH3");
    }

    #[test]
    fn test_encode_plate_is_base64_jpeg() {
        let plate = RgbImage::from_pixel(40, 12, image::Rgb([200, 200, 200]));
        let encoded = encode_plate(&plate).unwrap();
        let bytes = base64::prelude::BASE64_STANDARD.decode(encoded).unwrap();
        assert_eq!(&bytes[0..3], &[0xFF, 0xD8, 0xFF]);
    }

    #[tokio::test]
    async fn test_recognize_against_stub_server() {
        let app = Router::new().route(
            "/plates-ocr/3",
            post(|body: String| async move {
                assert!(!body.is_empty());
                axum::Json(serde_json::json!({
                    "predictions": [
                        {"x": 20.0, "class": "B"},
                        {"x": 5.0, "class": "A"}
                    ]
                }))
            }),
        );
        let base = serve(app).await;

        let recognizer = RoboflowRecognizer::new(config(base)).unwrap();
        let plate = RgbImage::from_pixel(40, 12, image::Rgb([0, 0, 0]));
        let recognition = recognizer.recognize(&plate).await.unwrap();
        assert_eq!(recognition.text, "AB");
    }

    #[tokio::test]
    async fn test_recognize_surfaces_http_errors() {
        let app = Router::new().route(
            "/plates-ocr/3",
            post(|| async { (StatusCode::FORBIDDEN, "bad key") }),
        );
        let base = serve(app).await;

        let recognizer = RoboflowRecognizer::new(config(base)).unwrap();
        let plate = RgbImage::from_pixel(40, 12, image::Rgb([0, 0, 0]));
        let err = recognizer.recognize(&plate).await.unwrap_err();
        assert!(err.to_string().contains("403"));
        assert!(err.to_string().contains("bad key"));
    }
}
