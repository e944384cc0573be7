//! # HTTP 服务层
//!
//! ## 设计思路
//!
//! 对外接口只是一层很薄的 HTTP/1.1 外壳：解析请求 → 路由到 `commands` → 写回 JSON。
//! 所有业务语义都在 `image_handler` 内，这里只负责协议细节：
//! - 每个连接只处理一个请求（`Connection: close`），不做 keep-alive
//! - 请求体按 `Content-Length` 读取，超过 `max_body_bytes` 直接 413
//! - 所有响应附带 CORS 头，`OPTIONS` 预检统一返回 204
//!
//! ## 实现思路
//!
//! - 每个连接一个 tokio 任务；图片计算属于 CPU 密集型，统一放到 `spawn_blocking`，
//!   避免阻塞异步运行时的工作线程。
//! - `dispatch` 是同步纯函数（请求 → 响应），可以脱离网络直接测试。
//! - 请求日志统一记录 `method path -> status (elapsed)`。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use crate::error::AppError;
use crate::image_handler::commands;
use crate::image_handler::{ImageCommandError, ImageConfig, ImageError, ImageServiceState};
use crate::settings::ServerConfig;

/// 单个请求从建立连接到读完请求体的最长等待时间。
const READ_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_HEADER_LINE_BYTES: u64 = 8 * 1024;
const MAX_HEADERS: usize = 64;

/// 已解析的 HTTP 请求。
///
/// 查询参数不做百分号解码，原样保存。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    /// 头部名称统一转为小写
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// 由方法与请求目标（`/path?query`）构造请求。
    ///
    /// 路径末尾的 `/` 会被去掉，因此 `/upload/` 与 `/upload` 等价。
    pub fn new(method: &str, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, parse_query(query)),
            None => (target, HashMap::new()),
        };

        let path = path.trim_end_matches('/');
        Self {
            method: method.to_ascii_uppercase(),
            path: if path.is_empty() { "/".to_string() } else { path.to_string() },
            query,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    fn json<T: Serialize>(value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self { status: 200, body },
            Err(e) => Self::from_error(&ImageError::Internal(format!("响应序列化失败: {}", e)).into()),
        }
    }

    fn no_content() -> Self {
        Self {
            status: 204,
            body: Vec::new(),
        }
    }

    fn from_error(error: &ImageCommandError) -> Self {
        let body = serde_json::to_vec(error).unwrap_or_else(|_| {
            br#"{"code":"E_INTERNAL","stage":"service","message":"error serialization failed"}"#.to_vec()
        });
        Self {
            status: error.status,
            body,
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ImageCommandError> {
    serde_json::from_slice(body).map_err(|e| ImageCommandError::bad_request(format!("请求体不是合法 JSON: {}", e)))
}

fn level_param(request: &HttpRequest, key: &str) -> Result<f32, ImageCommandError> {
    let raw = request
        .query_param(key)
        .ok_or_else(|| ImageCommandError::bad_request(format!("缺少查询参数 {}", key)))?;

    raw.parse::<f32>().map_err(|_| {
        ImageError::InvalidParameter(format!("{} 不是合法数字：{}", key, raw)).into()
    })
}

/// 同步路由：把请求交给对应命令并生成响应。
pub fn dispatch(state: &ImageServiceState, request: &HttpRequest) -> Result<HttpResponse, ImageCommandError> {
    let session_id = request.query_param("session_id");
    let body = &request.body;

    let response = match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/health") => HttpResponse::json(&HealthResponse { status: "ok" }),
        ("POST", "/upload") => HttpResponse::json(&commands::upload_image(state, session_id, body)?),
        ("POST", "/upload/base64") => {
            HttpResponse::json(&commands::upload_base64_image(state, session_id, parse_body(body)?)?)
        }
        ("POST", "/histogram") => HttpResponse::json(&commands::get_histogram(state, parse_body(body)?)?),
        ("POST", "/detect_edges") => HttpResponse::json(&commands::detect_edges(state, parse_body(body)?)?),
        ("POST", "/filter/grayscale") => {
            HttpResponse::json(&commands::apply_grayscale_filter(state, parse_body(body)?)?)
        }
        ("POST", "/pipeline") => HttpResponse::json(&commands::apply_pipeline(state, parse_body(body)?)?),
        ("GET", "/adjust_contrast") => HttpResponse::json(&commands::adjust_contrast(
            state,
            session_id,
            level_param(request, "contrast_level")?,
        )?),
        ("GET", "/adjust_luminance") => HttpResponse::json(&commands::adjust_luminance(
            state,
            session_id,
            level_param(request, "luminance_level")?,
        )?),
        ("GET", "/session/histogram") => {
            HttpResponse::json(&commands::get_session_histogram(state, session_id)?)
        }
        ("DELETE", "/session") => HttpResponse::json(&commands::end_session(state, session_id)?),
        ("GET", "/config") => HttpResponse::json(&commands::get_image_config(state)?),
        ("PUT", "/config") => {
            let config: ImageConfig = parse_body(body)?;
            HttpResponse::json(&commands::set_image_config(state, config)?)
        }
        (method, path) => {
            return Err(ImageCommandError::not_found(format!("未找到路由：{} {}", method, path)));
        }
    };

    Ok(response)
}

/// 异步路由：预检请求直接返回，其余在阻塞线程池中执行。
pub async fn route(state: Arc<ImageServiceState>, request: HttpRequest) -> HttpResponse {
    if request.method == "OPTIONS" {
        return HttpResponse::no_content();
    }

    match tokio::task::spawn_blocking(move || dispatch(&state, &request)).await {
        Ok(Ok(response)) => response,
        Ok(Err(error)) => HttpResponse::from_error(&error),
        Err(join_error) => HttpResponse::from_error(
            &ImageError::Internal(format!("处理任务异常退出: {}", join_error)).into(),
        ),
    }
}

/// 读取一行（去掉行尾 CRLF）；连接已关闭时返回 `None`。
async fn read_line<R>(reader: &mut R) -> Result<Option<String>, AppError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let read = (&mut *reader)
        .take(MAX_HEADER_LINE_BYTES)
        .read_until(b'\n', &mut buf)
        .await?;

    if read == 0 {
        return Ok(None);
    }
    if !buf.ends_with(b"\n") {
        return Err(AppError::Http("请求行过长或连接提前关闭".to_string()));
    }

    let line = String::from_utf8(buf).map_err(|_| AppError::Http("请求头不是合法 UTF-8".to_string()))?;
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

/// 解析请求行、请求头与请求体。
///
/// 请求体超限时返回 `ImageError::ResourceLimit`，协议错误返回 `AppError::Http`。
async fn read_request<R>(reader: &mut R, max_body_bytes: usize) -> Result<HttpRequest, AppError>
where
    R: AsyncBufRead + Unpin,
{
    let request_line = read_line(reader)
        .await?
        .ok_or_else(|| AppError::Io(std::io::ErrorKind::UnexpectedEof.into()))?;

    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target), Some(version)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(AppError::Http(format!("无法解析请求行：{}", request_line)));
    };
    if !version.starts_with("HTTP/1.") {
        return Err(AppError::Http(format!("不支持的协议版本：{}", version)));
    }

    let mut request = HttpRequest::new(method, target);
    loop {
        let line = read_line(reader)
            .await?
            .ok_or_else(|| AppError::Http("请求头未完整结束".to_string()))?;
        if line.is_empty() {
            break;
        }
        if request.headers.len() >= MAX_HEADERS {
            return Err(AppError::Http("请求头过多".to_string()));
        }

        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| AppError::Http(format!("无法解析请求头：{}", line)))?;
        request
            .headers
            .insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
    }

    let content_length = match request.headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| AppError::Http(format!("Content-Length 非法：{}", value)))?,
        None => 0,
    };
    if content_length > max_body_bytes {
        return Err(ImageError::ResourceLimit(format!(
            "请求体 {} 字节超过上限 {} 字节",
            content_length, max_body_bytes
        ))
        .into());
    }

    let mut body = vec![0; content_length];
    reader.read_exact(&mut body).await?;
    request.body = body;

    Ok(request)
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        413 => "Payload Too Large",
        415 => "Unsupported Media Type",
        422 => "Unprocessable Entity",
        _ => "Internal Server Error",
    }
}

async fn write_response<W>(writer: &mut W, response: &HttpResponse, allowed_origin: &str) -> Result<(), AppError>
where
    W: AsyncWrite + Unpin,
{
    let mut head = format!("HTTP/1.1 {} {}\r\n", response.status, reason_phrase(response.status));
    if !response.body.is_empty() {
        head.push_str("Content-Type: application/json; charset=utf-8\r\n");
    }
    head.push_str(&format!("Content-Length: {}\r\n", response.body.len()));
    head.push_str(&format!("Access-Control-Allow-Origin: {}\r\n", allowed_origin));
    head.push_str("Access-Control-Allow-Methods: GET, POST, PUT, DELETE, OPTIONS\r\n");
    head.push_str("Access-Control-Allow-Headers: Content-Type\r\n");
    head.push_str("Access-Control-Allow-Credentials: true\r\n");
    head.push_str("Connection: close\r\n\r\n");

    writer.write_all(head.as_bytes()).await?;
    writer.write_all(&response.body).await?;
    writer.flush().await?;
    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    config: &ServerConfig,
    state: Arc<ImageServiceState>,
) -> Result<(), AppError> {
    let started = Instant::now();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let read = tokio::time::timeout(READ_TIMEOUT, read_request(&mut reader, config.max_body_bytes))
        .await
        .map_err(|_| AppError::Http("读取请求超时".to_string()))?;

    let (label, response) = match read {
        Ok(request) => {
            let label = format!("{} {}", request.method, request.path);
            (label, route(state, request).await)
        }
        Err(AppError::Image(error)) => ("<rejected>".to_string(), HttpResponse::from_error(&error.into())),
        Err(AppError::Http(message)) => (
            "<malformed>".to_string(),
            HttpResponse::from_error(&ImageCommandError::bad_request(message)),
        ),
        Err(other) => return Err(other),
    };

    write_response(&mut write_half, &response, &config.allowed_origin).await?;
    write_half.shutdown().await?;

    let elapsed = started.elapsed().as_millis();
    match response.status {
        500.. => log::error!("❌ {} -> {} ({}ms)", label, response.status, elapsed),
        400..=499 => log::warn!("⚠️ {} -> {} ({}ms)", label, response.status, elapsed),
        _ => log::info!("🌐 {} -> {} ({}ms)", label, response.status, elapsed),
    }
    Ok(())
}

/// 在已绑定的监听器上持续接受连接。
pub async fn serve(
    listener: TcpListener,
    config: Arc<ServerConfig>,
    state: Arc<ImageServiceState>,
) -> Result<(), AppError> {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                log::warn!("⚠️ 接受连接失败: {}", e);
                continue;
            }
        };

        let config = Arc::clone(&config);
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, &config, state).await {
                log::warn!("⚠️ 连接 {} 处理失败: {}", peer, err);
            }
        });
    }
}

/// 绑定配置中的地址并启动服务。
pub async fn run(config: ServerConfig, state: Arc<ImageServiceState>) -> Result<(), AppError> {
    let listener = TcpListener::bind(&config.bind_addr).await?;
    log::info!(
        "🚀 图片服务已启动：http://{}（允许来源：{}）",
        listener.local_addr()?,
        config.allowed_origin
    );

    serve(listener, Arc::new(config), state).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_handler::{DecodedImage, ImageFormat, codec};

    fn encoded_rgb(pixels: &[[u8; 3]]) -> String {
        let data = pixels.iter().flatten().copied().collect();
        let image = DecodedImage::new(pixels.len() as u32, 1, 3, data).expect("fixture init failed");
        codec::encode(&image, ImageFormat::Png, &ImageConfig::default())
            .expect("fixture encode failed")
            .to_string()
    }

    fn body_json(response: &HttpResponse) -> serde_json::Value {
        serde_json::from_slice(&response.body).expect("response should be json")
    }

    #[test]
    fn target_is_split_into_path_and_query() {
        let request = HttpRequest::new("get", "/adjust_contrast/?contrast_level=75&session_id=a%20b&flag");

        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/adjust_contrast");
        assert_eq!(request.query_param("contrast_level"), Some("75"));
        assert_eq!(request.query_param("session_id"), Some("a%20b"));
        assert_eq!(request.query_param("flag"), Some(""));
    }

    #[test]
    fn root_path_is_kept() {
        assert_eq!(HttpRequest::new("GET", "/").path, "/");
    }

    #[test]
    fn health_reports_ok() {
        let state = ImageServiceState::new().expect("service init failed");
        let response = dispatch(&state, &HttpRequest::new("GET", "/health")).expect("dispatch failed");

        assert_eq!(response.status, 200);
        assert_eq!(body_json(&response)["status"], "ok");
    }

    #[test]
    fn histogram_route_returns_color_shape() {
        let state = ImageServiceState::new().expect("service init failed");
        let body = serde_json::json!({ "base64_image": encoded_rgb(&[[1, 2, 3], [1, 2, 3]]) });
        let request = HttpRequest::new("POST", "/histogram/").with_body(body.to_string());

        let json = body_json(&dispatch(&state, &request).expect("dispatch failed"));
        assert_eq!(json["hist_blue"][1], 2);
        assert_eq!(json["hist_green"][2], 2);
        assert_eq!(json["hist_red"][3], 2);
    }

    #[test]
    fn bad_json_is_bad_request() {
        let state = ImageServiceState::new().expect("service init failed");
        let request = HttpRequest::new("POST", "/histogram/").with_body("not json");

        let error = dispatch(&state, &request).expect_err("should reject body");
        assert_eq!(error.status, 400);
        assert_eq!(error.code, "E_BAD_REQUEST");
    }

    #[test]
    fn unknown_route_is_not_found() {
        let state = ImageServiceState::new().expect("service init failed");
        let error = dispatch(&state, &HttpRequest::new("GET", "/nope")).expect_err("should not route");
        assert_eq!(error.status, 404);
    }

    #[test]
    fn contrast_requires_numeric_level() {
        let state = ImageServiceState::new().expect("service init failed");

        let missing = dispatch(&state, &HttpRequest::new("GET", "/adjust_contrast/")).expect_err("missing level");
        assert_eq!(missing.code, "E_BAD_REQUEST");

        let invalid = dispatch(&state, &HttpRequest::new("GET", "/adjust_contrast/?contrast_level=abc"))
            .expect_err("invalid level");
        assert_eq!(invalid.code, "E_INVALID_PARAMETER");
    }

    #[tokio::test]
    async fn options_preflight_is_no_content() {
        let state = Arc::new(ImageServiceState::new().expect("service init failed"));
        let response = route(state, HttpRequest::new("OPTIONS", "/histogram/")).await;

        assert_eq!(response.status, 204);
        assert!(response.body.is_empty());
    }

    #[tokio::test]
    async fn route_maps_errors_to_status() {
        let state = Arc::new(ImageServiceState::new().expect("service init failed"));
        let body = serde_json::json!({ "base64_image": "data:image/bmp;base64,AAAA" });
        let response = route(state, HttpRequest::new("POST", "/histogram/").with_body(body.to_string())).await;

        assert_eq!(response.status, 415);
        assert_eq!(body_json(&response)["code"], "E_UNSUPPORTED_FORMAT");
    }

    #[tokio::test]
    async fn request_with_body_is_parsed() {
        let raw = b"POST /upload/?session_id=s1 HTTP/1.1\r\nHost: x\r\nContent-Length: 4\r\n\r\nabcd";
        let mut reader: &[u8] = raw;

        let request = read_request(&mut reader, 1024).await.expect("parse failed");
        assert_eq!(request.path, "/upload");
        assert_eq!(request.headers.get("host").map(String::as_str), Some("x"));
        assert_eq!(request.body, b"abcd");
    }

    #[tokio::test]
    async fn oversized_body_is_resource_limit() {
        let raw = b"POST /upload/ HTTP/1.1\r\nContent-Length: 4096\r\n\r\n";
        let mut reader: &[u8] = raw;

        let result = read_request(&mut reader, 1024).await;
        assert!(matches!(result, Err(AppError::Image(ImageError::ResourceLimit(_)))));
    }

    #[tokio::test]
    async fn garbage_request_line_is_http_error() {
        let mut reader: &[u8] = b"HELLO\r\n\r\n";
        assert!(matches!(read_request(&mut reader, 1024).await, Err(AppError::Http(_))));
    }

    #[tokio::test]
    async fn response_carries_cors_headers() {
        let mut out: Vec<u8> = Vec::new();
        let response = HttpResponse::json(&HealthResponse { status: "ok" });

        write_response(&mut out, &response, "http://localhost:5173")
            .await
            .expect("write failed");

        let text = String::from_utf8(out).expect("utf8");
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Access-Control-Allow-Origin: http://localhost:5173\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.ends_with(r#"{"status":"ok"}"#));
    }
}
