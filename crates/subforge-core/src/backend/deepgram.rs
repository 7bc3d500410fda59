//! Deepgram pre-recorded `/v1/listen` client.
//!
//! Uses the curl crate (libcurl) for the POST; the blocking transfer runs on
//! tokio's blocking pool.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use super::{BackendError, TranscribeRequest, Transcriber};
use crate::config::StudioConfig;
use crate::frontend::AudioSegment;
use crate::options::{Language, Model};

const ERROR_BODY_LIMIT: usize = 300;

#[derive(Debug, Deserialize)]
struct ListenResponse {
    results: ListenResults,
}

#[derive(Debug, Deserialize)]
struct ListenResults {
    #[serde(default)]
    channels: Vec<ListenChannel>,
}

#[derive(Debug, Deserialize)]
struct ListenChannel {
    #[serde(default)]
    alternatives: Vec<ListenAlternative>,
}

#[derive(Debug, Deserialize)]
struct ListenAlternative {
    #[serde(default)]
    transcript: String,
}

/// Extract `results.channels[0].alternatives[0].transcript`. A response
/// without channels or alternatives is an empty (silent) transcript.
pub fn parse_transcript(body: &[u8]) -> Result<String, BackendError> {
    let resp: ListenResponse =
        serde_json::from_slice(body).map_err(|e| BackendError::Malformed(e.to_string()))?;
    Ok(resp
        .results
        .channels
        .into_iter()
        .next()
        .and_then(|c| c.alternatives.into_iter().next())
        .map(|a| a.transcript.trim().to_string())
        .unwrap_or_default())
}

pub struct DeepgramTranscriber {
    api_key: Option<String>,
    base_url: String,
    timeout: Duration,
}

impl DeepgramTranscriber {
    pub fn new(api_key: Option<String>, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base_url: base_url.into(),
            timeout,
        }
    }

    pub fn from_config(cfg: &StudioConfig) -> Self {
        Self::new(
            cfg.api_key(),
            cfg.backend.base_url.clone(),
            Duration::from_secs(cfg.backend.request_timeout_secs),
        )
    }

    /// Full request URL with recognition flags as query parameters.
    pub fn listen_url(&self, req: &TranscribeRequest) -> Result<Url, BackendError> {
        let base = format!("{}/v1/listen", self.base_url.trim_end_matches('/'));
        let mut url = Url::parse(&base)
            .map_err(|e| BackendError::Rejected(format!("invalid backend url {base}: {e}")))?;
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("model", req.model.as_str());
            match req.language {
                Language::Auto => q.append_pair("detect_language", "true"),
                lang => q.append_pair("language", lang.as_str()),
            };
            q.append_pair("punctuate", bool_str(req.punctuate));
            q.append_pair("smart_format", bool_str(req.smart_format));
            for (name, on) in [
                ("diarize", req.diarize),
                ("numerals", req.numerals),
                ("profanity_filter", req.profanity_filter),
                ("filler_words", req.filler_words),
            ] {
                if on {
                    q.append_pair(name, "true");
                }
            }
            let keyword_param = if req.model == Model::Nova3General {
                "keyterm"
            } else {
                "keywords"
            };
            for kw in &req.keywords {
                q.append_pair(keyword_param, kw);
            }
        }
        Ok(url)
    }
}

fn bool_str(b: bool) -> &'static str {
    if b {
        "true"
    } else {
        "false"
    }
}

/// POST `body` as `audio/wav`. Runs in the current thread.
fn post_audio(url: &str, api_key: &str, body: &[u8], timeout: Duration) -> Result<(u32, Vec<u8>), curl::Error> {
    let mut response = Vec::new();

    let mut easy = curl::easy::Easy::new();
    easy.url(url)?;
    easy.post(true)?;
    easy.post_fields_copy(body)?;
    easy.connect_timeout(Duration::from_secs(15).min(timeout))?;
    easy.timeout(timeout)?;

    let mut list = curl::easy::List::new();
    list.append(&format!("Authorization: Token {api_key}"))?;
    list.append("Content-Type: audio/wav")?;
    list.append("Accept: application/json")?;
    easy.http_headers(list)?;

    {
        let mut transfer = easy.transfer();
        transfer.write_function(|data| {
            response.extend_from_slice(data);
            Ok(data.len())
        })?;
        transfer.perform()?;
    }

    let code = easy.response_code()?;
    Ok((code, response))
}

#[async_trait]
impl Transcriber for DeepgramTranscriber {
    async fn transcribe(
        &self,
        segment: &AudioSegment,
        request: &TranscribeRequest,
    ) -> Result<String, BackendError> {
        let api_key = self.api_key.clone().ok_or(BackendError::NotConfigured)?;
        let url = self.listen_url(request)?.to_string();
        let audio = segment.audio.clone();
        let timeout = self.timeout;

        let (status, body) =
            tokio::task::spawn_blocking(move || post_audio(&url, &api_key, &audio, timeout))
                .await
                .map_err(|e| BackendError::Task(e.to_string()))??;

        if !(200..300).contains(&status) {
            let text = String::from_utf8_lossy(&body);
            let body: String = text.chars().take(ERROR_BODY_LIMIT).collect();
            return Err(BackendError::Http { status, body });
        }
        parse_transcript(&body)
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn name(&self) -> &str {
        "deepgram"
    }
}
