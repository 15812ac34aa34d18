//! # 流式中继
//!
//! 向网关发出一次补全请求，把网关返回的 `data: ` 行转换成统一的
//! [`StreamEvent`] 推送给前端。
//!
//! 每个 `messageId` 的事件序列是若干 `data` 之后恰好一个 `end` 或 `error`：
//! - `[DONE]` 与传输结束同时出现时只发一次 `end`；
//! - 读取中途出错只发一次 `error`，之后不再有任何事件；
//! - 请求阶段失败（含非 2xx 状态）同样只发一次 `error`，并返回
//!   [`RelayOutcome::StreamError`]，不向调用方抛错。
//!
//! 中继不做重试，也不支持取消：前端只能忽略后续事件。

pub mod parser;
pub mod sink;

use std::fmt::Display;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{ChatError, ChatResult};
use crate::models::{ModelConfig, OutboundMessage, StreamEvent};
use parser::{SseDecoder, SseFrame};
pub use sink::{EventSink, STREAM_CHANNEL};

/// 启用工具注入时改写到的网关路径。
pub const TOOL_INJECTION_PATH: &str = "/v1/chatvcp/completions";

/// 一次中继调用的全部输入。
#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    pub endpoint_url: String,
    pub api_key: String,
    pub messages: Vec<OutboundMessage>,
    pub model_config: ModelConfig,
    pub message_id: String,
    #[serde(default)]
    pub is_group_call: bool,
    /// 原样附在每个事件上，中继不读取其内容。
    #[serde(default)]
    pub context: Option<Value>,
    #[serde(default)]
    pub enable_tool_injection: bool,
}

/// 返回给调用方的结果。非流式成功时直接透传网关的 JSON。
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum RelayOutcome {
    Completed(Value),
    #[serde(rename_all = "camelCase")]
    StreamingStarted { streaming_started: bool },
    #[serde(rename_all = "camelCase")]
    StreamError { stream_error: bool, error: String },
}

impl RelayOutcome {
    fn streaming_started() -> Self {
        RelayOutcome::StreamingStarted {
            streaming_started: true,
        }
    }

    fn stream_error() -> Self {
        RelayOutcome::StreamError {
            stream_error: true,
            error: "VCP Request Failed".into(),
        }
    }
}

/// 按设置决定最终请求地址：开启工具注入时只替换路径部分。
pub fn resolve_endpoint(endpoint_url: &str, enable_tool_injection: bool) -> ChatResult<String> {
    if !enable_tool_injection {
        return Ok(endpoint_url.to_string());
    }
    let mut url = Url::parse(endpoint_url)
        .map_err(|e| ChatError::InvalidArgument(format!("无效的网关地址 {endpoint_url}: {e}")))?;
    url.set_path(TOOL_INJECTION_PATH);
    Ok(url.to_string())
}

/// 请求体：`{messages, ...modelConfig, stream, requestId}`。
pub fn build_request_body(request: &RelayRequest) -> Value {
    let mut body = Map::new();
    body.insert(
        "messages".into(),
        serde_json::to_value(&request.messages).unwrap_or_else(|_| Value::Array(Vec::new())),
    );
    if let Ok(Value::Object(config)) = serde_json::to_value(&request.model_config) {
        body.extend(config);
    }
    body.insert("stream".into(), Value::Bool(request.model_config.stream));
    body.insert("requestId".into(), Value::String(request.message_id.clone()));
    Value::Object(body)
}

#[derive(Clone, Default)]
pub struct GatewayRelay {
    client: reqwest::Client,
}

impl GatewayRelay {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub async fn send(&self, request: RelayRequest, sink: Arc<dyn EventSink>) -> RelayOutcome {
        let message_id = request.message_id.clone();
        let context = request.context.clone();
        let streaming = request.model_config.stream;

        match self.open(&request).await {
            Ok(response) if streaming => {
                info!("开始中继流式响应 {message_id}");
                tokio::spawn(pump_stream(
                    response.bytes_stream(),
                    sink,
                    message_id,
                    context,
                ));
                RelayOutcome::streaming_started()
            }
            Ok(response) => match response.json::<Value>().await {
                Ok(body) => RelayOutcome::Completed(body),
                Err(err) => fail(&*sink, message_id, context, ChatError::from(err)),
            },
            Err(err) => fail(&*sink, message_id, context, err),
        }
    }

    /// 非流式请求：成功时返回网关的 JSON，失败直接作为错误返回，不发事件。
    pub async fn complete(&self, request: &RelayRequest) -> ChatResult<Value> {
        let response = self.open(request).await?;
        Ok(response.json::<Value>().await?)
    }

    async fn open(&self, request: &RelayRequest) -> ChatResult<reqwest::Response> {
        let url = resolve_endpoint(&request.endpoint_url, request.enable_tool_injection)?;
        debug!(
            "POST {url} messageId={} group={}",
            request.message_id, request.is_group_call
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(&request.api_key)
            .json(&build_request_body(request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Gateway {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

fn fail(
    sink: &dyn EventSink,
    message_id: String,
    context: Option<Value>,
    err: ChatError,
) -> RelayOutcome {
    warn!("中继请求失败 {message_id}: {err}");
    sink.emit(StreamEvent::Error {
        message_id,
        error: err.to_string(),
        context,
    });
    RelayOutcome::stream_error()
}

/// 读取响应体直到 `[DONE]`、传输结束或出错，保证只发出一个终止事件。
pub async fn pump_stream<St, E>(
    body: St,
    sink: Arc<dyn EventSink>,
    message_id: String,
    context: Option<Value>,
) where
    St: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    let mut body = std::pin::pin!(body);
    let mut decoder = SseDecoder::new();
    let data = |chunk: Value| StreamEvent::Data {
        message_id: message_id.clone(),
        chunk,
        context: context.clone(),
    };

    let terminal = loop {
        match body.next().await {
            Some(Ok(bytes)) => {
                for frame in decoder.feed(&bytes) {
                    match frame {
                        SseFrame::Chunk(chunk) => sink.emit(data(chunk)),
                        SseFrame::Done => {}
                    }
                }
                if decoder.is_finished() {
                    break None;
                }
            }
            Some(Err(err)) => break Some(format!("读取流式响应失败: {err}")),
            None => {
                for frame in decoder.finish() {
                    if let SseFrame::Chunk(chunk) = frame {
                        sink.emit(data(chunk));
                    }
                }
                break None;
            }
        }
    };

    match terminal {
        None => {
            debug!("流式响应结束 {message_id}");
            sink.emit(StreamEvent::End {
                message_id,
                context,
            });
        }
        Some(error) => {
            warn!("{message_id}: {error}");
            sink.emit(StreamEvent::Error {
                message_id,
                error,
                context,
            });
        }
    }
}
