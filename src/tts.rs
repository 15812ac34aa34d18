//! SoVITS 语音合成代理。
//!
//! 模型列表缓存在 `sovits_models.json`，接口失败时回退到缓存；
//! 合成结果按 `md5(text + voice + speed)` 缓存为 `tts_cache/<hash>.mp3`。

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::fs;
use tracing::{info, warn};

use crate::error::{ChatError, ChatResult};
use crate::paths::DataPaths;
use crate::store::json_file::{ensure_dir, read_json, write_json};

const MODELS_OK_MSG: &str = "获取成功";

#[derive(Deserialize, Clone, Debug)]
pub struct SpeakOptions {
    pub text: String,
    pub voice: String,
    pub speed: f64,
}

impl SpeakOptions {
    pub fn cache_key(&self) -> String {
        format!(
            "{:x}",
            md5::compute(format!("{}{}{}", self.text, self.voice, self.speed))
        )
    }

    fn payload(&self) -> Value {
        let japanese = self.voice.contains("日语");
        json!({
            "model": "tts-v2ProPlus",
            "input": self.text,
            "voice": self.voice,
            "response_format": "mp3",
            "speed": self.speed,
            "other_params": {
                "text_lang": if japanese { "日语" } else { "中英混合" },
                "prompt_lang": if japanese { "日语" } else { "中文" },
                "emotion": "默认",
                "text_split_method": "按标点符号切",
            }
        })
    }
}

#[derive(Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    msg: String,
    models: Option<Value>,
}

pub struct TtsService {
    paths: DataPaths,
    client: reqwest::Client,
}

fn require_url(server_url: &str) -> ChatResult<&str> {
    let url = server_url.trim().trim_end_matches('/');
    if url.is_empty() {
        return Err(ChatError::Tts("TTS Server URL is not provided.".into()));
    }
    Ok(url)
}

impl TtsService {
    pub fn new(paths: DataPaths, client: reqwest::Client) -> Self {
        Self { paths, client }
    }

    async fn cached_models(&self) -> Option<Value> {
        read_json(&self.paths.models_cache_file).await.ok().flatten()
    }

    /// 模型列表。接口与缓存都不可用时返回 `None`。
    pub async fn get_models(&self, force_refresh: bool, server_url: &str) -> ChatResult<Option<Value>> {
        let base = require_url(server_url)?;
        if !force_refresh {
            if let Some(models) = self.cached_models().await {
                return Ok(Some(models));
            }
        }

        match self.fetch_models(base).await {
            Ok(models) => {
                write_json(&self.paths.models_cache_file, &models).await?;
                Ok(Some(models))
            }
            Err(err) => {
                warn!("获取 TTS 模型列表失败，尝试使用缓存: {err}");
                Ok(self.cached_models().await)
            }
        }
    }

    async fn fetch_models(&self, base: &str) -> ChatResult<Value> {
        let response: ModelsResponse = self
            .client
            .post(format!("{base}/models"))
            .json(&json!({"version": "v2ProPlus"}))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        match response.models {
            Some(models) if response.msg == MODELS_OK_MSG => Ok(models),
            _ => Err(ChatError::Tts(format!("模型接口返回异常: {}", response.msg))),
        }
    }

    /// 合成语音，返回 mp3 字节。接口失败或返回的不是音频时为 `None`。
    pub async fn speak(&self, options: &SpeakOptions, server_url: &str) -> ChatResult<Option<Vec<u8>>> {
        let base = require_url(server_url)?;
        let cache_file = self
            .paths
            .tts_cache_dir
            .join(format!("{}.mp3", options.cache_key()));
        if let Ok(bytes) = fs::read(&cache_file).await {
            return Ok(Some(bytes));
        }

        let response = match self
            .client
            .post(format!("{base}/v1/audio/speech"))
            .json(&options.payload())
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!("语音合成请求失败: {err}");
                return Ok(None);
            }
        };
        let is_audio = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("audio/mpeg"));
        if !response.status().is_success() || !is_audio {
            warn!("语音合成返回非音频响应: {}", response.status());
            return Ok(None);
        }
        let audio = match response.bytes().await {
            Ok(bytes) => bytes.to_vec(),
            Err(err) => {
                warn!("读取合成音频失败: {err}");
                return Ok(None);
            }
        };

        if let Err(err) = self.write_cache(&cache_file, &audio).await {
            warn!("写入语音缓存失败: {err}");
        } else {
            info!("语音已缓存 {}", cache_file.display());
        }
        Ok(Some(audio))
    }

    async fn write_cache(&self, path: &std::path::Path, audio: &[u8]) -> ChatResult<()> {
        ensure_dir(&self.paths.tts_cache_dir).await?;
        fs::write(path, audio)
            .await
            .map_err(|e| ChatError::io(path, e))
    }
}
