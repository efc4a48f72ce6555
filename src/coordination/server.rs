//! 协调 API 服务端（axum）
//!
//! 路由：
//! - `GET /api/heartbeat`：在线检查
//! - `POST /api/state/:key`：仅创建，已存在返回 409
//! - `PUT /api/state/:key`：创建或整体替换（保留 created）；信封 id 与路径不一致返回 400
//! - `GET /api/state/:key`：200 + 信封，或 404
//! - `DELETE /api/state/:key`：204（键不存在同样返回 204）
//!
//! 写操作串行化，读者不会看到半写状态。

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::StateItem;
use crate::core::VcError;
use crate::state::{StateStore, StateStoreExt};

#[derive(Clone)]
struct ApiState {
    store: Arc<dyn StateStore>,
    write_lock: Arc<Mutex<()>>,
    // 请求处理不受运行取消影响
    ct: CancellationToken,
}

/// 构建协调 API 路由
pub fn router(store: Arc<dyn StateStore>) -> Router {
    let state = ApiState {
        store,
        write_lock: Arc::new(Mutex::new(())),
        ct: CancellationToken::new(),
    };
    Router::new()
        .route("/api/heartbeat", get(heartbeat))
        .route(
            "/api/state/:key",
            get(get_state)
                .post(create_state)
                .put(update_state)
                .delete(delete_state),
        )
        .with_state(state)
}

/// 在 `listener` 上提供服务，`shutdown` 取消后优雅退出
pub async fn serve(
    listener: TcpListener,
    store: Arc<dyn StateStore>,
    shutdown: CancellationToken,
) -> Result<(), VcError> {
    let addr = listener.local_addr()?;
    tracing::info!("coordination API listening on http://{}", addr);
    axum::serve(listener, router(store))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    tracing::info!("coordination API on {} stopped", addr);
    Ok(())
}

/// 绑定地址并在后台运行；返回实际监听地址（端口 0 时由系统分配）
pub async fn spawn(
    addr: SocketAddr,
    store: Arc<dyn StateStore>,
    shutdown: CancellationToken,
) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), VcError> {
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        if let Err(e) = serve(listener, store, shutdown).await {
            tracing::error!("coordination API failed: {}", e);
        }
    });
    Ok((local, handle))
}

struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "status": self.0.as_u16(), "detail": self.1 }));
        (self.0, body).into_response()
    }
}

impl From<VcError> for ApiError {
    fn from(e: VcError) -> Self {
        match e {
            VcError::InvalidOperation(msg) => ApiError(StatusCode::BAD_REQUEST, msg),
            other => ApiError(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        }
    }
}

async fn heartbeat() -> StatusCode {
    StatusCode::OK
}

async fn get_state(
    State(state): State<ApiState>,
    Path(key): Path<String>,
) -> Result<Json<StateItem>, ApiError> {
    match state.store.get_state::<StateItem>(&key, &state.ct).await? {
        Some(item) => Ok(Json(item)),
        None => Err(ApiError(
            StatusCode::NOT_FOUND,
            format!("state '{key}' does not exist"),
        )),
    }
}

async fn create_state(
    State(state): State<ApiState>,
    Path(key): Path<String>,
    Json(definition): Json<Value>,
) -> Result<(StatusCode, Json<StateItem>), ApiError> {
    let _guard = state.write_lock.lock().await;
    if state.store.get(&key, &state.ct).await?.is_some() {
        return Err(ApiError(
            StatusCode::CONFLICT,
            format!("state '{key}' already exists"),
        ));
    }
    let item = StateItem::new(key.clone(), definition);
    state.store.save_state(&key, &item, &state.ct).await?;
    tracing::debug!(key = %key, "state created");
    Ok((StatusCode::CREATED, Json(item)))
}

async fn update_state(
    State(state): State<ApiState>,
    Path(key): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<StateItem>, ApiError> {
    let incoming = StateItem::from_value(&key, body);
    if !incoming.id.eq_ignore_ascii_case(&key) {
        return Err(ApiError(
            StatusCode::BAD_REQUEST,
            "the state id does not match the id in the request path".into(),
        ));
    }

    let _guard = state.write_lock.lock().await;
    let item = match state.store.get_state::<StateItem>(&key, &state.ct).await? {
        Some(existing) => existing.replaced(incoming.definition),
        None => StateItem::new(key.clone(), incoming.definition),
    };
    state.store.save_state(&key, &item, &state.ct).await?;
    tracing::debug!(key = %key, "state updated");
    Ok(Json(item))
}

async fn delete_state(
    State(state): State<ApiState>,
    Path(key): Path<String>,
) -> Result<StatusCode, ApiError> {
    let _guard = state.write_lock.lock().await;
    state.store.delete(&key, &state.ct).await?;
    Ok(StatusCode::NO_CONTENT)
}
