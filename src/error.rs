use thiserror::Error;

/// 场景同步核心的错误类型
#[derive(Debug, Error)]
pub enum SceneSyncError {
    /// 像素缓冲区为空或格式错误、视频时长为 0 等
    #[error("无效输入: {0}")]
    InvalidInput(String),

    /// 帧源无法在指定时间点解码出帧
    #[error("解码失败: {0}")]
    Decode(String),

    /// 编辑操作会破坏顺序、锁定或连续性约束，操作被拒绝
    #[error("校验失败: {0}")]
    Validation(String),

    /// SRT 块或导入的场景 JSON 格式错误
    #[error("格式错误: {0}")]
    Format(String),

    /// 远程分析/清理服务调用失败
    #[error("远程服务错误: {0}")]
    RemoteService(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),
}

impl SceneSyncError {
    /// 编辑器操作在找不到目标场景时使用的错误
    pub fn scene_not_found(scene_id: usize) -> Self {
        SceneSyncError::Validation(format!("场景 {} 不存在", scene_id))
    }
}

pub type Result<T> = std::result::Result<T, SceneSyncError>;
