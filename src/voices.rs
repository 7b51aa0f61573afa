//! Voice list collaborator
//!
//! Fetches the voices offered by the agent so one can be picked before a
//! session is opened.

use crate::{Result, VoxError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceInfo {
    pub id: u64,
    pub name: String,
    pub language: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl VoiceInfo {
    /// Display label, e.g. `Amy (EN)`
    pub fn label(&self) -> String {
        format!("{} ({})", self.name, self.language.to_uppercase())
    }
}

/// `GET <api_base>/voices`
pub async fn fetch_voices(api_base: &str) -> Result<Vec<VoiceInfo>> {
    let url = format!("{}/voices", api_base.trim_end_matches('/'));
    debug!("Fetching voices from {}", url);

    let client = reqwest::Client::new();
    let response = client.get(&url).send().await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(VoxError::HttpError(format!("API error {}: {}", status, body)));
    }

    let voices: Vec<VoiceInfo> = response
        .json()
        .await
        .map_err(|e| VoxError::HttpError(format!("Invalid voice list: {}", e)))?;
    info!("{} voice(s) available", voices.len());
    Ok(voices)
}

/// Pick the requested voice, or the first one listed
pub fn select_voice(voices: &[VoiceInfo], requested: Option<u64>) -> Result<&VoiceInfo> {
    let first = voices
        .first()
        .ok_or_else(|| VoxError::ConfigError("No voices available".into()))?;

    match requested {
        None => Ok(first),
        Some(id) => voices
            .iter()
            .find(|v| v.id == id)
            .ok_or_else(|| VoxError::ConfigError(format!("Voice {} is not available", id))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn voice(id: u64, name: &str, language: &str) -> VoiceInfo {
        VoiceInfo {
            id,
            name: name.into(),
            language: language.into(),
            description: None,
        }
    }

    #[test]
    fn test_label() {
        assert_eq!(voice(1, "Lucia", "es").label(), "Lucia (ES)");
    }

    #[test]
    fn test_select_first_by_default() {
        let voices = vec![voice(4, "Amy", "en"), voice(2, "Lucia", "es")];
        assert_eq!(select_voice(&voices, None).unwrap().id, 4);
        assert_eq!(select_voice(&voices, Some(2)).unwrap().name, "Lucia");
    }

    #[test]
    fn test_select_errors() {
        assert!(matches!(
            select_voice(&[], None),
            Err(VoxError::ConfigError(_))
        ));
        let voices = vec![voice(4, "Amy", "en")];
        assert!(select_voice(&voices, Some(99)).is_err());
    }

    #[test]
    fn test_parse_server_payload() {
        let voices: Vec<VoiceInfo> = serde_json::from_str(
            r#"[{"id":1,"name":"Lucia","language":"es","model_file":"es_ES-lucia.onnx","description":"Warm"},
                {"id":2,"name":"Amy","language":"en","model_file":"en_US-amy.onnx","description":null}]"#,
        )
        .unwrap();
        assert_eq!(voices.len(), 2);
        assert_eq!(voices[0].description.as_deref(), Some("Warm"));
        assert_eq!(voices[1].description, None);
    }

    /// Answer one HTTP request with `status` and `body`
    async fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = vec![0u8; 4096];
            let _ = socket.read(&mut request).await.unwrap();
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });
        format!("http://{}/", addr)
    }

    #[tokio::test]
    async fn test_fetch_voices() {
        let base = serve_once("200 OK", r#"[{"id":7,"name":"Amy","language":"en"}]"#).await;
        let voices = fetch_voices(&base).await.unwrap();
        assert_eq!(voices, vec![voice(7, "Amy", "en")]);
    }

    #[tokio::test]
    async fn test_fetch_voices_http_error() {
        let base = serve_once("503 Service Unavailable", r#"{"detail":"down"}"#).await;
        let err = fetch_voices(&base).await.unwrap_err();
        assert!(matches!(err, VoxError::HttpError(_)));
    }
}
