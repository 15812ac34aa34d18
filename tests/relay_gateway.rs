use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tempfile::TempDir;
use vcp_chat_lib::models::{AgentConfig, ModelConfig, OutboundMessage, Role, StreamEvent};
use vcp_chat_lib::paths::DataPaths;
use vcp_chat_lib::relay::{EventSink, GatewayRelay, RelayOutcome, RelayRequest};
use vcp_chat_lib::session::{ChatSession, VOICE_MODE_PROMPT};
use vcp_chat_lib::settings::{AppSettings, SettingsService};
use vcp_chat_lib::store::{ConversationStore, JsonFileStore};
use vcp_chat_lib::ChatError;

async fn failing() -> (StatusCode, &'static str) {
    (StatusCode::INTERNAL_SERVER_ERROR, "boom")
}

async fn streaming() -> Body {
    let parts = [
        "data: {\"te",
        "xt\":\"He\"}\n\n: ping\n",
        "data: {\"text\":\"llo\"}\n\ndata: [DONE]\n\n",
    ];
    Body::from_stream(futures_util::stream::iter(
        parts
            .into_iter()
            .map(|p| Ok::<_, std::io::Error>(Bytes::from_static(p.as_bytes()))),
    ))
}

async fn echo(headers: HeaderMap, Json(body): Json<Value>) -> Json<Value> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    Json(json!({"auth": auth, "received": body}))
}

/// 把收到的请求体序列化后放进 `choices[0].message.content` 返回。
async fn voice_reply(Json(body): Json<Value>) -> Json<Value> {
    Json(json!({"choices": [{"message": {"content": body.to_string()}}]}))
}

async fn spawn_gateway() -> String {
    let app = Router::new()
        .route("/fail", post(failing))
        .route("/stream", post(streaming))
        .route("/v1/chat/completions", post(echo))
        .route("/v1/chatvcp/completions", post(streaming))
        .route("/voice/v1/chat/completions", post(voice_reply));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn request(url: String, stream: bool) -> RelayRequest {
    RelayRequest {
        endpoint_url: url,
        api_key: "secret".into(),
        messages: vec![OutboundMessage {
            role: Role::User,
            content: json!("hi"),
        }],
        model_config: ModelConfig {
            model: Some("gemini".into()),
            temperature: Some(0.7),
            stream,
            ..Default::default()
        },
        message_id: "assistant_msg_1".into(),
        is_group_call: false,
        context: Some(json!({"agentId": "A1", "topicId": "T1"})),
        enable_tool_injection: false,
    }
}

/// 收集事件直到终止事件，再多等一会确认之后没有多余事件。
async fn collect(rx: &mut mpsc::UnboundedReceiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for stream event")
            .expect("sink closed");
        let terminal = event.is_terminal();
        events.push(event);
        if terminal {
            break;
        }
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    while let Ok(extra) = rx.try_recv() {
        events.push(extra);
    }
    events
}

fn sink() -> (Arc<dyn EventSink>, mpsc::UnboundedReceiver<StreamEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(tx), rx)
}

#[tokio::test]
async fn http_failure_emits_exactly_one_error() {
    let base = spawn_gateway().await;
    let (sink, mut rx) = sink();

    let outcome = GatewayRelay::default()
        .send(request(format!("{base}/fail"), true), sink)
        .await;
    assert_eq!(
        serde_json::to_value(&outcome).unwrap(),
        json!({"streamError": true, "error": "VCP Request Failed"})
    );

    let events = collect(&mut rx).await;
    assert_eq!(events.len(), 1);
    match &events[0] {
        StreamEvent::Error { error, message_id, context } => {
            assert!(error.contains("500"));
            assert!(error.contains("boom"));
            assert_eq!(message_id, "assistant_msg_1");
            assert_eq!(context, &Some(json!({"agentId": "A1", "topicId": "T1"})));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn streamed_chunks_arrive_in_order_then_end() {
    let base = spawn_gateway().await;
    let (sink, mut rx) = sink();

    let outcome = GatewayRelay::default()
        .send(request(format!("{base}/stream"), true), sink)
        .await;
    assert!(matches!(outcome, RelayOutcome::StreamingStarted { .. }));

    let events = collect(&mut rx).await;
    let texts: Vec<Value> = events
        .iter()
        .map(|e| match e {
            StreamEvent::Data { chunk, .. } => chunk["text"].clone(),
            StreamEvent::End { .. } => json!("<end>"),
            StreamEvent::Error { error, .. } => json!(format!("<error {error}>")),
        })
        .collect();
    assert_eq!(texts, vec![json!("He"), json!("llo"), json!("<end>")]);
}

#[tokio::test]
async fn non_stream_body_passes_through() {
    let base = spawn_gateway().await;
    let (sink, mut rx) = sink();

    let outcome = GatewayRelay::default()
        .send(request(format!("{base}/v1/chat/completions"), false), sink)
        .await;
    let RelayOutcome::Completed(body) = outcome else {
        panic!("expected pass-through body, got {outcome:?}");
    };
    assert_eq!(body["auth"], "Bearer secret");
    assert_eq!(body["received"]["model"], "gemini");
    assert_eq!(body["received"]["stream"], false);
    assert_eq!(body["received"]["requestId"], "assistant_msg_1");
    assert_eq!(body["received"]["messages"][0]["content"], "hi");
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn tool_injection_targets_chatvcp_endpoint() {
    let base = spawn_gateway().await;
    let (sink, mut rx) = sink();

    let mut req = request(format!("{base}/v1/chat/completions"), true);
    req.enable_tool_injection = true;
    let outcome = GatewayRelay::default().send(req, sink).await;
    assert!(matches!(outcome, RelayOutcome::StreamingStarted { .. }));

    let events = collect(&mut rx).await;
    assert_eq!(events.len(), 3);
    assert!(matches!(events.last(), Some(StreamEvent::End { .. })));
}

#[tokio::test]
async fn unreachable_gateway_reports_error_event() {
    let (sink, mut rx) = sink();
    let outcome = GatewayRelay::default()
        .send(request("http://127.0.0.1:9/v1/chat/completions".into(), true), sink)
        .await;
    assert!(matches!(outcome, RelayOutcome::StreamError { .. }));

    let events = collect(&mut rx).await;
    assert_eq!(events.len(), 1);
    assert!(events[0].is_terminal());
}

async fn voice_session(server_url: String) -> (ChatSession, TempDir) {
    let dir = TempDir::new().unwrap();
    let paths = DataPaths::from_root(dir.path());
    let store: Arc<dyn ConversationStore> = Arc::new(JsonFileStore::new(paths.clone()));
    store
        .save_agent_config(&AgentConfig {
            id: "A1".into(),
            name: "Nova".into(),
            system_prompt: "我是{{AgentName}}".into(),
            model: "gemini".into(),
            max_output_tokens: Some(256),
            ..Default::default()
        })
        .await
        .unwrap();
    let settings = Arc::new(SettingsService::new(paths, store.clone()));
    settings
        .save_settings(AppSettings {
            vcp_server_url: Some(server_url),
            vcp_api_key: Some("secret".into()),
            enable_vcp_tool_injection: true,
            ..Default::default()
        })
        .await
        .unwrap();
    (ChatSession::new(store, settings, GatewayRelay::default()), dir)
}

#[tokio::test]
async fn voice_reply_is_a_single_non_stream_request() {
    let base = spawn_gateway().await;
    let (session, _dir) = voice_session(format!("{base}/voice/v1/chat/completions")).await;

    let history = vec![OutboundMessage {
        role: Role::User,
        content: json!("今天天气怎么样"),
    }];
    let reply = session.voice_reply("A1", &history).await.unwrap();
    let received: Value = serde_json::from_str(&reply).unwrap();

    assert_eq!(received["stream"], false);
    assert_eq!(received["model"], "gemini");
    assert_eq!(received["max_tokens"], 256);
    assert_eq!(received["messages"][0]["role"], "system");
    assert_eq!(
        received["messages"][0]["content"],
        json!(format!("我是Nova\n\n{VOICE_MODE_PROMPT}"))
    );
    assert_eq!(received["messages"][1]["content"], "今天天气怎么样");
    assert_eq!(received["messages"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn voice_reply_surfaces_gateway_failure() {
    let base = spawn_gateway().await;
    let (session, _dir) = voice_session(format!("{base}/fail")).await;

    let err = session.voice_reply("A1", &[]).await.unwrap_err();
    assert!(matches!(err, ChatError::Gateway { status: 500, ref body } if body == "boom"));
}
