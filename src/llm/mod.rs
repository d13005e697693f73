use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::LlmConfig;
use crate::utils::{AdapterResult, FailureKind};

pub const SOURCE_VISION: &str = "vision";
pub const NO_API_KEY: &str = "ERR: NO API KEY";

const TRANSCRIBE_PROMPT: &str = "You are an expert document reader. Carefully read the provided scanned or \
handwritten document image. Extract all readable text accurately. Preserve paragraph breaks and logical order. \
Do not hallucinate missing content. If text is unclear, mark it as [UNREADABLE]. Return only the extracted text.";

const CAPTION_PROMPT: &str = "Analyze this image extracted from a document. Summarize its context and content \
in 1-2 concise sentences. Identify if it's a chart, diagram, photograph, or logo and what it represents.";

/// Chat completions 请求体（OpenAI 兼容）
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: MessageContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// 视觉转写结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transcription {
    pub text: String,
    pub confidence: f32,
    pub source: String,
}

/// 文本摘要与问答能力
#[async_trait]
pub trait TextModel: Send + Sync {
    /// Two-sentence synopsis of tabular data.
    async fn summarize(&self, text: &str) -> AdapterResult<String>;

    async fn answer(&self, query: &str, context: &str) -> AdapterResult<String>;
}

/// 图像转写与描述能力
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn transcribe(&self, image_path: &Path) -> AdapterResult<Transcription>;

    async fn caption(&self, image_path: &Path) -> AdapterResult<String>;
}

pub struct LlmClient {
    client: reqwest::Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(std::time::Duration::from_secs(config.timeout_secs));

        if !config.proxy.is_empty() {
            match reqwest::Proxy::all(&config.proxy) {
                Ok(proxy) => {
                    info!("Using proxy: {}", config.proxy);
                    builder = builder.proxy(proxy);
                }
                Err(e) => {
                    warn!("Invalid proxy '{}': {}", config.proxy, e);
                }
            }
        }

        let client = builder.build().context("failed to create HTTP client")?;
        if !config.api_key.is_empty() && config.api_key != "your-api-key" {
            info!("LLM endpoint {} (model {})", config.api_url, config.model);
        } else {
            warn!("LLM api_key not set; summaries, captions and vision transcription will degrade");
        }
        Ok(Self { client, config })
    }

    /// 检查 API key 是否已配置
    pub fn is_configured(&self) -> bool {
        !self.config.api_key.is_empty() && self.config.api_key != "your-api-key"
    }

    fn text_request(&self, model: &str, prompt: String) -> ChatRequest {
        ChatRequest {
            model: model.to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: MessageContent::Text(prompt),
            }],
            temperature: 0.2,
        }
    }

    fn image_request(&self, prompt: &str, image_path: &Path) -> Result<ChatRequest> {
        let bytes = std::fs::read(image_path).with_context(|| format!("failed to read {}", image_path.display()))?;
        let url = format!("data:{};base64,{}", mime_for(image_path), BASE64.encode(bytes));

        Ok(ChatRequest {
            model: self.config.vision_model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: MessageContent::Parts(vec![
                    ContentPart::Text { text: prompt.to_string() },
                    ContentPart::ImageUrl { image_url: ImageUrl { url } },
                ]),
            }],
            temperature: 0.0,
        })
    }

    /// 调用接口，失败时按 max_attempts 指数退避重试
    async fn call_api(&self, request: &ChatRequest) -> Result<String> {
        let attempts = self.config.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = std::time::Duration::from_millis(500 * 2u64.pow(attempt));
                info!("Retrying LLM call ({}/{}) in {}ms", attempt + 1, attempts, delay.as_millis());
                tokio::time::sleep(delay).await;
            }

            match self.do_request(request).await {
                Ok(content) => return Ok(content),
                Err(e) => {
                    warn!("LLM call failed (attempt {}/{}): {:#}", attempt + 1, attempts, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("LLM call failed")))
    }

    async fn do_request(&self, request: &ChatRequest) -> Result<String> {
        let response = self
            .client
            .post(&self.config.api_url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .context("failed to send request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API returned {}: {}", status, body);
        }

        let chat_response: ChatResponse = response.json().await.context("failed to decode API response")?;
        first_choice(chat_response)
    }

    /// Runs `request` and maps every failure to a degraded result holding `placeholder(message)`.
    async fn run<F>(&self, request: Result<ChatRequest>, placeholder: F) -> AdapterResult<String>
    where
        F: Fn(&str) -> String + Send,
    {
        if !self.is_configured() {
            return AdapterResult::degraded(placeholder("NO API KEY"), FailureKind::MissingCredentials, "api_key not set");
        }

        let request = match request {
            Ok(r) => r,
            Err(e) => {
                let message = format!("{:#}", e);
                return AdapterResult::degraded(placeholder(&message), FailureKind::UnsupportedInput, message);
            }
        };

        match self.call_api(&request).await {
            Ok(text) if text.trim().is_empty() => {
                AdapterResult::degraded(placeholder("empty response"), FailureKind::InvalidResponse, "empty response")
            }
            Ok(text) => AdapterResult::ok(text.trim().to_string()),
            Err(e) => {
                let message = format!("{:#}", e);
                AdapterResult::degraded(placeholder(&message), FailureKind::CallFailed, message)
            }
        }
    }
}

#[async_trait]
impl TextModel for LlmClient {
    async fn summarize(&self, text: &str) -> AdapterResult<String> {
        let prompt = format!(
            "Summarize the following table data in 2 concise sentences, focusing on key trends and numbers:\n\n{}",
            text
        );
        let request = self.text_request(&self.config.model, prompt);
        let result = self.run(Ok(request), |_| String::new()).await;
        AdapterResult {
            value: result.value.replace('\n', " ").trim().to_string(),
            failure: result.failure,
        }
    }

    async fn answer(&self, query: &str, context: &str) -> AdapterResult<String> {
        let prompt = format!(
            "You are a helpful AI assistant. Use the following document extracts (context) to answer the user's \
             question. Keep your answer concise (2-4 sentences) and professional. If the answer is not in the \
             context, say that you don't have enough information.\n\nContext:\n{}\n\nUser Question: {}\n\nAnswer:",
            context, query
        );
        let request = self.text_request(&self.config.model, prompt);
        self.run(Ok(request), |m| format!("ERR: answer generation failed ({})", m)).await
    }
}

#[async_trait]
impl VisionModel for LlmClient {
    async fn transcribe(&self, image_path: &Path) -> AdapterResult<Transcription> {
        debug!("Transcribing {}", image_path.display());
        if !self.is_configured() {
            return AdapterResult::degraded(
                Transcription {
                    text: NO_API_KEY.to_string(),
                    confidence: 0.0,
                    source: SOURCE_VISION.to_string(),
                },
                FailureKind::MissingCredentials,
                "api_key not set",
            );
        }

        let request = self.image_request(TRANSCRIBE_PROMPT, image_path);
        let result = self.run(request, |m| format!("ERR: VISION FAILED {}", m)).await;
        let confidence = if result.is_ok() { 1.0 } else { 0.0 };
        AdapterResult {
            value: Transcription {
                text: result.value,
                confidence,
                source: SOURCE_VISION.to_string(),
            },
            failure: result.failure,
        }
    }

    async fn caption(&self, image_path: &Path) -> AdapterResult<String> {
        let request = self.image_request(CAPTION_PROMPT, image_path);
        self.run(request, |_| String::new()).await
    }
}

fn first_choice(response: ChatResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| anyhow::anyhow!("response has no message content"))
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("jp2") => "image/jp2",
        Some("webp") => "image/webp",
        _ => "image/png",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn client(api_key: &str) -> LlmClient {
        let mut config = AppConfig::default().llm;
        config.api_key = api_key.to_string();
        LlmClient::new(config).unwrap()
    }

    #[test]
    fn placeholder_key_is_not_configured() {
        assert!(!client("").is_configured());
        assert!(!client("your-api-key").is_configured());
        assert!(client("sk-test").is_configured());
    }

    #[test]
    fn image_request_inlines_base64_data_url() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("page_001.png");
        std::fs::write(&image, [1u8, 2, 3]).unwrap();

        let request = client("sk-test").image_request("read this", &image).unwrap();
        let json = serde_json::to_value(&request).unwrap();
        let parts = &json["messages"][0]["content"];
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[0]["text"], "read this");
        assert_eq!(parts[1]["type"], "image_url");
        assert_eq!(parts[1]["image_url"]["url"], "data:image/png;base64,AQID");
        assert_eq!(json["model"], "gemini-2.5-pro");
    }

    #[test]
    fn text_request_uses_plain_string_content() {
        let request = client("sk-test").text_request("m", "hi".to_string());
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["content"], "hi");
    }

    #[test]
    fn first_choice_requires_content() {
        let ok: ChatResponse = serde_json::from_str(r#"{"choices":[{"message":{"content":"hello"}}]}"#).unwrap();
        assert_eq!(first_choice(ok).unwrap(), "hello");

        let empty: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(first_choice(empty).is_err());
    }

    #[tokio::test]
    async fn transcription_without_key_is_marked() {
        let result = client("").transcribe(Path::new("page_001.png")).await;
        assert_eq!(result.kind(), Some(FailureKind::MissingCredentials));
        assert_eq!(result.value.text, NO_API_KEY);
        assert_eq!(result.value.confidence, 0.0);
    }

    #[tokio::test]
    async fn summary_without_key_degrades_to_empty() {
        let result = client("").summarize("a | b").await;
        assert!(!result.is_ok());
        assert!(result.value.is_empty());
    }

    #[test]
    fn mime_follows_extension() {
        assert_eq!(mime_for(Path::new("a.JPG")), "image/jpeg");
        assert_eq!(mime_for(Path::new("a.png")), "image/png");
    }
}
