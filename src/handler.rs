use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::Json as ResponseJson,
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{error, info, warn};

use crate::config::ExtendedConfig;
use crate::editor::{Direction, EnrichmentKind, SceneEditor, SharedEditor};
use crate::enrichment::{enrich_scene, AnalysisClient};
use crate::error::SceneSyncError;
use crate::frame_source::FrameGate;
use crate::processor::ProcessConfig;
use crate::scene::{Edge, Scene, SceneRecord, SceneView};
use crate::scene_detector::SceneDetector;
use crate::subtitle::{self, Subtitle};
use crate::video_processor::FfmpegFrameSource;

type ApiResult<T> = Result<ResponseJson<T>, (StatusCode, String)>;

/// 一个编辑会话：一个视频、一份场景列表、一份原始字幕
pub struct Session {
    editor: SharedEditor,
    gate: Option<FrameGate>,
    subtitles: Vec<Subtitle>,
    config: ProcessConfig,
}

impl Session {
    pub fn new(gate: Option<FrameGate>, subtitles: Vec<Subtitle>, config: ProcessConfig) -> Self {
        let mut editor = SceneEditor::new(config.frame_rate);
        if let Some(gate) = &gate {
            editor.set_duration(gate.duration());
        }
        Self {
            editor: Arc::new(tokio::sync::Mutex::new(editor)),
            gate,
            subtitles,
            config,
        }
    }

    fn gate(&self) -> Result<&FrameGate, (StatusCode, String)> {
        self.gate
            .as_ref()
            .ok_or_else(|| (StatusCode::CONFLICT, "该会话没有关联视频".to_string()))
    }

    async fn views(&self) -> Vec<SceneView> {
        self.editor.lock().await.scenes().iter().map(SceneView::from).collect()
    }
}

/// 服务共享状态
#[derive(Clone)]
pub struct AppState {
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
    config: Arc<ExtendedConfig>,
    client: Option<AnalysisClient>,
}

impl AppState {
    pub fn new(config: ExtendedConfig) -> Self {
        let client = match AnalysisClient::new(config.analysis.clone()) {
            Ok(client) => Some(client),
            Err(e) => {
                warn!("⚠️  [服务] 分析服务不可用，镜头分析与画面清理接口将返回错误: {}", e);
                None
            }
        };
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            config: Arc::new(config),
            client,
        }
    }

    pub fn insert_session(&self, session: Session) -> Result<String, (StatusCode, String)> {
        let id = uuid::Uuid::new_v4().to_string();
        self.sessions
            .write()
            .map_err(|_| poisoned())?
            .insert(id.clone(), Arc::new(session));
        Ok(id)
    }

    /// 移除会话，返回是否存在
    pub fn remove_session(&self, id: &str) -> Result<bool, (StatusCode, String)> {
        Ok(self.sessions.write().map_err(|_| poisoned())?.remove(id).is_some())
    }

    fn session(&self, id: &str) -> Result<Arc<Session>, (StatusCode, String)> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| poisoned())?;
        sessions
            .get(id)
            .cloned()
            .ok_or_else(|| (StatusCode::NOT_FOUND, format!("会话不存在: {}", id)))
    }
}

/// 错误类型到 HTTP 状态码的映射
pub fn error_status(e: &SceneSyncError) -> StatusCode {
    match e {
        SceneSyncError::Validation(_) => StatusCode::CONFLICT,
        SceneSyncError::Format(_) | SceneSyncError::InvalidInput(_) | SceneSyncError::Json(_) => {
            StatusCode::BAD_REQUEST
        }
        SceneSyncError::Decode(_) => StatusCode::UNPROCESSABLE_ENTITY,
        SceneSyncError::RemoteService(_) => StatusCode::BAD_GATEWAY,
        SceneSyncError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn poisoned() -> (StatusCode, String) {
    error!("会话表锁已损坏");
    (StatusCode::INTERNAL_SERVER_ERROR, "会话表锁已损坏".to_string())
}

fn api_error(e: SceneSyncError) -> (StatusCode, String) {
    (error_status(&e), e.to_string())
}

fn join_error(e: tokio::task::JoinError) -> (StatusCode, String) {
    error!("后台任务异常退出: {}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, format!("后台任务异常退出: {}", e))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .route("/sessions", post(create_session))
        .route("/sessions/:id", delete(delete_session))
        .route("/sessions/:id/scenes", get(get_scenes).put(import_scenes))
        .route("/sessions/:id/scenes/export", get(export_scenes))
        .route("/sessions/:id/detect", post(detect_scenes))
        .route("/sessions/:id/scenes/:scene_id", delete(delete_scene))
        .route("/sessions/:id/scenes/:scene_id/boundary", post(set_boundary))
        .route("/sessions/:id/scenes/:scene_id/adjust", post(adjust_frame))
        .route("/sessions/:id/scenes/:scene_id/lock", post(toggle_lock))
        .route("/sessions/:id/scenes/:scene_id/frames", post(capture_frames))
        .route("/sessions/:id/scenes/:scene_id/analysis", post(analyze_scene))
        .route("/sessions/:id/scenes/:scene_id/clean/:edge", post(clean_frame))
        .route("/sessions/:id/subtitles/adapted", get(adapted_subtitles))
        .with_state(state)
}

/// 健康检查
pub async fn health_check() -> &'static str {
    "OK"
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateSessionRequest {
    /// 服务端本地视频路径
    pub video_path: Option<String>,
    /// SRT 字幕文本
    pub subtitles: Option<String>,
    /// 直接导入的场景列表；提供时不做自动分割
    pub scenes: Option<Vec<SceneRecord>>,
    /// 提供视频时是否立即分割，默认是
    pub detect: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub session_id: String,
    pub duration: f64,
    pub subtitle_count: usize,
    pub scenes: Vec<SceneView>,
}

/// 创建会话
pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> ApiResult<SessionResponse> {
    let process = state.config.process.clone();

    let gate = match request.video_path.clone() {
        Some(path) => {
            info!("🎬 [服务] 打开视频: {}", path);
            let source = tokio::task::spawn_blocking(move || FfmpegFrameSource::open(&path))
                .await
                .map_err(join_error)?
                .map_err(api_error)?;
            Some(FrameGate::new(Box::new(source)))
        }
        None => None,
    };

    let subtitles = request
        .subtitles
        .as_deref()
        .map(subtitle::parse_srt)
        .unwrap_or_default();

    let session = Session::new(gate.clone(), subtitles, process.clone());
    if let Some(records) = request.scenes {
        session.editor.lock().await.load_records(records);
    } else if let (Some(gate), true) = (gate, request.detect.unwrap_or(true)) {
        let scenes = run_detection(gate.clone(), &process).await?;
        session.editor.lock().await.replace_scenes(scenes, gate.duration());
    }

    let duration = session.editor.lock().await.duration();
    let scenes = session.views().await;
    let subtitle_count = session.subtitles.len();
    let session_id = state.insert_session(session)?;
    info!("✅ [服务] 会话已创建: {} ({} 个场景)", session_id, scenes.len());

    Ok(ResponseJson(SessionResponse {
        session_id,
        duration,
        subtitle_count,
        scenes,
    }))
}

/// 在阻塞线程池中分割整段视频，期间独占帧源
async fn run_detection(gate: FrameGate, config: &ProcessConfig) -> Result<Vec<Scene>, (StatusCode, String)> {
    let detector = SceneDetector::new(config.detector_config());
    tokio::task::spawn_blocking(move || {
        let mut source = gate.acquire()?;
        detector.detect_scenes(&mut **source)
    })
    .await
    .map_err(join_error)?
    .map_err(api_error)
}

/// 关闭会话，释放视频与场景数据
pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    if state.remove_session(&id)? {
        info!("🗑️  [服务] 会话已关闭: {}", id);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((StatusCode::NOT_FOUND, format!("会话不存在: {}", id)))
    }
}

pub async fn get_scenes(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Vec<SceneView>> {
    Ok(ResponseJson(state.session(&id)?.views().await))
}

/// 导入场景 JSON（整体替换）
pub async fn import_scenes(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: String,
) -> ApiResult<Vec<SceneView>> {
    let session = state.session(&id)?;
    session.editor.lock().await.load_scenes(&body).map_err(api_error)?;
    Ok(ResponseJson(session.views().await))
}

/// 导出场景 JSON（不含图片）
pub async fn export_scenes(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Vec<SceneRecord>> {
    let session = state.session(&id)?;
    let editor = session.editor.lock().await;
    Ok(ResponseJson(editor.scenes().iter().map(Scene::to_record).collect()))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetectRequest {
    pub threshold: Option<f64>,
    pub sample_rate: Option<f64>,
}

/// 重新分割；原有的手动编辑全部丢弃
pub async fn detect_scenes(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<DetectRequest>,
) -> ApiResult<Vec<SceneView>> {
    let session = state.session(&id)?;
    let gate = session.gate()?.clone();

    let mut config = session.config.clone();
    config.threshold = request.threshold.unwrap_or(config.threshold);
    config.sample_rate = request.sample_rate.unwrap_or(config.sample_rate);
    info!(
        "⏳ [服务] 会话 {} 重新分割（阈值: {:.1}, 采样率: {:.1}）",
        id, config.threshold, config.sample_rate
    );

    let scenes = run_detection(gate.clone(), &config).await?;
    session.editor.lock().await.replace_scenes(scenes, gate.duration());
    Ok(ResponseJson(session.views().await))
}

#[derive(Debug, Deserialize)]
pub struct BoundaryRequest {
    pub edge: Edge,
    pub time: f64,
}

pub async fn set_boundary(
    State(state): State<AppState>,
    Path((id, scene_id)): Path<(String, usize)>,
    Json(request): Json<BoundaryRequest>,
) -> ApiResult<Vec<SceneView>> {
    let session = state.session(&id)?;
    session
        .editor
        .lock()
        .await
        .set_boundary(scene_id, request.edge, request.time)
        .map_err(api_error)?;
    Ok(ResponseJson(session.views().await))
}

#[derive(Debug, Deserialize)]
pub struct AdjustRequest {
    pub edge: Edge,
    pub direction: Direction,
}

#[derive(Debug, Serialize)]
pub struct AdjustResponse {
    pub time: f64,
    pub scenes: Vec<SceneView>,
}

/// 按帧微调边界
///
/// 编辑器锁只在校验和写入时短暂持有，截帧在阻塞线程池中只持有帧源锁，
/// 写入前重新校验截帧期间发生的修改。
pub async fn adjust_frame(
    State(state): State<AppState>,
    Path((id, scene_id)): Path<(String, usize)>,
    Json(request): Json<AdjustRequest>,
) -> ApiResult<AdjustResponse> {
    let session = state.session(&id)?;
    let gate = session.gate()?.clone();

    let adjust = session
        .editor
        .lock()
        .await
        .plan_adjust(scene_id, request.edge, request.direction)
        .map_err(api_error)?;

    let task_adjust = adjust.clone();
    let thumbnail = tokio::task::spawn_blocking(move || task_adjust.capture(&gate))
        .await
        .map_err(join_error)?
        .map_err(api_error)?;

    let time = session
        .editor
        .lock()
        .await
        .apply_adjust(&adjust, thumbnail)
        .map_err(api_error)?;

    Ok(ResponseJson(AdjustResponse {
        time,
        scenes: session.views().await,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockResponse {
    pub is_locked: bool,
}

pub async fn toggle_lock(
    State(state): State<AppState>,
    Path((id, scene_id)): Path<(String, usize)>,
) -> ApiResult<LockResponse> {
    let session = state.session(&id)?;
    let is_locked = session
        .editor
        .lock()
        .await
        .toggle_lock(scene_id)
        .map_err(api_error)?;
    Ok(ResponseJson(LockResponse { is_locked }))
}

pub async fn delete_scene(
    State(state): State<AppState>,
    Path((id, scene_id)): Path<(String, usize)>,
) -> ApiResult<Vec<SceneView>> {
    let session = state.session(&id)?;
    session.editor.lock().await.delete_scene(scene_id).map_err(api_error)?;
    Ok(ResponseJson(session.views().await))
}

/// 截取场景首尾帧，锁的持有方式同按帧微调
pub async fn capture_frames(
    State(state): State<AppState>,
    Path((id, scene_id)): Path<(String, usize)>,
) -> ApiResult<SceneView> {
    let session = state.session(&id)?;
    let gate = session.gate()?.clone();

    let plan = session
        .editor
        .lock()
        .await
        .plan_edge_capture(scene_id)
        .map_err(api_error)?;

    if let Some(capture) = plan {
        let task_capture = capture.clone();
        let (start, end) = tokio::task::spawn_blocking(move || task_capture.capture(&gate))
            .await
            .map_err(join_error)?
            .map_err(api_error)?;
        session.editor.lock().await.store_edge_frames(&capture, start, end);
    }

    let editor = session.editor.lock().await;
    editor
        .scene(scene_id)
        .map(|scene| ResponseJson(SceneView::from(scene)))
        .ok_or_else(|| api_error(SceneSyncError::scene_not_found(scene_id)))
}

async fn enrich(state: &AppState, id: &str, scene_id: usize, kind: EnrichmentKind) -> ApiResult<SceneView> {
    let session = state.session(id)?;
    let client = state.client.clone().ok_or_else(|| {
        api_error(SceneSyncError::RemoteService("未配置分析服务".to_string()))
    })?;

    enrich_scene(session.editor.clone(), client, scene_id, kind)
        .await
        .map_err(api_error)?;

    // 请求期间场景可能被重新编号，这里按当前编号返回
    let editor = session.editor.lock().await;
    editor
        .scene(scene_id)
        .map(|scene| ResponseJson(SceneView::from(scene)))
        .ok_or_else(|| api_error(SceneSyncError::scene_not_found(scene_id)))
}

/// 镜头语言分析（使用场景起始帧）
pub async fn analyze_scene(
    State(state): State<AppState>,
    Path((id, scene_id)): Path<(String, usize)>,
) -> ApiResult<SceneView> {
    enrich(&state, &id, scene_id, EnrichmentKind::Analysis).await
}

/// 清理首帧或尾帧中的主体
pub async fn clean_frame(
    State(state): State<AppState>,
    Path((id, scene_id, edge)): Path<(String, usize, Edge)>,
) -> ApiResult<SceneView> {
    enrich(&state, &id, scene_id, EnrichmentKind::Cleaning(edge)).await
}

/// 按当前场景列表重新切分字幕，返回 SRT 文本
pub async fn adapted_subtitles(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<String, (StatusCode, String)> {
    let session = state.session(&id)?;
    let editor = session.editor.lock().await;
    let adapted = subtitle::retime(&session.subtitles, editor.scenes(), session.config.min_subtitle_overlap);
    Ok(subtitle::to_srt(&adapted))
}
