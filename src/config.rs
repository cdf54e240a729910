use anyhow::Result;
use std::env;
use std::path::{Path, PathBuf};

use crate::enrichment::AnalysisConfig;
use crate::processor::ProcessConfig;

const SECTION: &str = "scene_sync";
const ANALYSIS_SECTION: &str = "analysis";

/// 扩展配置（包含分析服务、输出路径、日志级别）
#[derive(Debug, Clone)]
pub struct ExtendedConfig {
    /// 场景同步处理配置
    pub process: ProcessConfig,
    /// 远程分析服务配置
    pub analysis: AnalysisConfig,
    /// 输出路径（可选，未设置时由命令行指定）
    pub output_path: Option<PathBuf>,
    /// 日志级别（trace, debug, info, warn, error）
    pub log_level: String,
}

/// 从环境变量或配置文件读到的部分配置
#[derive(Debug, Default, Clone, PartialEq)]
struct PartialConfig {
    threshold: Option<f64>,
    sample_rate: Option<f64>,
    downscale_width: Option<u32>,
    frame_rate: Option<f64>,
    min_subtitle_overlap: Option<f64>,
    luminance_weight: Option<f64>,
    histogram_weight: Option<f64>,
    histogram_scale: Option<f64>,
    webhook_url: Option<String>,
    api_key: Option<String>,
    api_endpoint: Option<String>,
    text_model: Option<String>,
    image_model: Option<String>,
    output_path: Option<PathBuf>,
    log_level: Option<String>,
}

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 从多个源加载配置，优先级：命令行参数 > 环境变量 > 配置文件 > 默认值
    pub fn load_config(
        config_file: Option<&Path>,
        threshold: Option<f64>,
        sample_rate: Option<f64>,
        webhook_url: Option<String>,
    ) -> Result<ProcessConfig> {
        let file_config = Self::load_file_config(config_file)?;
        let env_config = Self::load_from_env(|key| env::var(key).ok());

        let cli = PartialConfig {
            threshold,
            sample_rate,
            webhook_url,
            ..PartialConfig::default()
        };
        let config = Self::merge_process(&[cli, env_config, file_config]);
        Self::validate(&config)?;
        Ok(config)
    }

    /// 按顺序取第一个有值的来源
    fn merge_process(sources: &[PartialConfig]) -> ProcessConfig {
        let defaults = ProcessConfig::default();
        let pick = |f: fn(&PartialConfig) -> Option<f64>, default: f64| {
            sources.iter().find_map(f).unwrap_or(default)
        };

        let mut weights = defaults.weights;
        weights.luminance = pick(|c| c.luminance_weight, weights.luminance);
        weights.histogram = pick(|c| c.histogram_weight, weights.histogram);
        weights.histogram_scale = pick(|c| c.histogram_scale, weights.histogram_scale);

        ProcessConfig {
            threshold: pick(|c| c.threshold, defaults.threshold),
            sample_rate: pick(|c| c.sample_rate, defaults.sample_rate),
            downscale_width: sources
                .iter()
                .find_map(|c| c.downscale_width)
                .unwrap_or(defaults.downscale_width),
            frame_rate: pick(|c| c.frame_rate, defaults.frame_rate),
            min_subtitle_overlap: pick(|c| c.min_subtitle_overlap, defaults.min_subtitle_overlap),
            weights,
            webhook_url: sources.iter().find_map(|c| c.webhook_url.clone()),
        }
    }

    /// 校验配置取值范围
    pub fn validate(config: &ProcessConfig) -> Result<()> {
        if !(config.sample_rate.is_finite() && config.sample_rate > 0.0) {
            anyhow::bail!("采样率必须大于 0: {}", config.sample_rate);
        }
        if !(config.threshold.is_finite() && config.threshold >= 0.0) {
            anyhow::bail!("切点阈值必须是非负数: {}", config.threshold);
        }
        if config.downscale_width == 0 {
            anyhow::bail!("缩放宽度必须大于 0");
        }
        if !(config.frame_rate.is_finite() && config.frame_rate > 0.0) {
            anyhow::bail!("帧率必须大于 0: {}", config.frame_rate);
        }
        if !(config.min_subtitle_overlap.is_finite() && config.min_subtitle_overlap >= 0.0) {
            anyhow::bail!("字幕最小重叠时长必须是非负数: {}", config.min_subtitle_overlap);
        }
        Ok(())
    }

    /// 从环境变量加载配置（返回Option值，表示是否从环境变量中读取到）
    fn load_from_env(get: impl Fn(&str) -> Option<String>) -> PartialConfig {
        let number = |key: &str| get(key).and_then(|v| v.trim().parse::<f64>().ok());
        PartialConfig {
            threshold: number("SCENE_SYNC_THRESHOLD"),
            sample_rate: number("SCENE_SYNC_SAMPLE_RATE"),
            downscale_width: get("SCENE_SYNC_DOWNSCALE_WIDTH").and_then(|v| v.trim().parse().ok()),
            frame_rate: number("SCENE_SYNC_FRAME_RATE"),
            min_subtitle_overlap: number("SCENE_SYNC_MIN_SUBTITLE_OVERLAP"),
            webhook_url: get("SCENE_SYNC_WEBHOOK_URL").filter(|v| !v.is_empty()),
            api_key: get("SCENE_SYNC_API_KEY")
                .or_else(|| get("GEMINI_API_KEY"))
                .filter(|v| !v.is_empty()),
            api_endpoint: get("SCENE_SYNC_API_ENDPOINT").filter(|v| !v.is_empty()),
            output_path: get("OUTPUT_PATH").filter(|v| !v.is_empty()).map(PathBuf::from),
            log_level: get("LOG_LEVEL").filter(|v| !v.is_empty()),
            ..PartialConfig::default()
        }
    }

    /// 指定了配置文件时必须能读取；未指定时从默认位置查找，找不到视为空配置
    fn load_file_config(config_file: Option<&Path>) -> Result<PartialConfig> {
        match config_file {
            Some(path) => Self::load_from_file(path),
            None => Ok(Self::load_from_default_locations().unwrap_or_default()),
        }
    }

    /// 从INI配置文件加载配置
    fn load_from_file(config_path: &Path) -> Result<PartialConfig> {
        if !config_path.exists() {
            return Err(anyhow::anyhow!("配置文件不存在: {}", config_path.display()));
        }

        let mut config_parser = configparser::ini::Ini::new();
        config_parser
            .load(config_path)
            .map_err(|e| anyhow::anyhow!("读取配置文件失败: {}: {}", config_path.display(), e))?;

        // 先读指定节，没有则使用 [DEFAULT] 节
        let get = |section: &str, key: &str| {
            config_parser
                .get(section, key)
                .or_else(|| config_parser.get("DEFAULT", key))
                .filter(|v| !v.is_empty())
        };
        let number = |key: &str| get(SECTION, key).and_then(|v| v.parse::<f64>().ok());

        Ok(PartialConfig {
            threshold: number("threshold"),
            sample_rate: number("sample_rate"),
            downscale_width: get(SECTION, "downscale_width").and_then(|v| v.parse().ok()),
            frame_rate: number("frame_rate"),
            min_subtitle_overlap: number("min_subtitle_overlap"),
            luminance_weight: number("luminance_weight"),
            histogram_weight: number("histogram_weight"),
            histogram_scale: number("histogram_scale"),
            webhook_url: get(SECTION, "webhook_url"),
            api_key: get(ANALYSIS_SECTION, "api_key"),
            api_endpoint: get(ANALYSIS_SECTION, "endpoint"),
            text_model: get(ANALYSIS_SECTION, "text_model"),
            image_model: get(ANALYSIS_SECTION, "image_model"),
            output_path: get(SECTION, "output_path").map(PathBuf::from),
            log_level: config_parser
                .get("logging", "level")
                .or_else(|| config_parser.get("DEFAULT", "log_level"))
                .filter(|v| !v.is_empty()),
        })
    }

    /// 从默认位置加载配置文件
    fn load_from_default_locations() -> Result<PartialConfig> {
        // 1. 当前目录的 scene-sync.ini
        // 2. 当前目录的 .scene-sync.ini
        // 3. 用户主目录的 .scene-sync.ini
        // 4. /etc/scene-sync.ini (Linux/macOS)
        let mut candidates = vec![PathBuf::from("scene-sync.ini"), PathBuf::from(".scene-sync.ini")];
        if let Some(home) = env::var_os("HOME") {
            candidates.push(PathBuf::from(home).join(".scene-sync.ini"));
        }
        candidates.push(PathBuf::from("/etc/scene-sync.ini"));

        for candidate in candidates {
            if candidate.exists() {
                return Self::load_from_file(&candidate);
            }
        }

        Err(anyhow::anyhow!("未找到配置文件"))
    }

    /// 加载扩展配置（包含分析服务、输出路径等）
    pub fn load_extended_config(config_file: Option<&Path>) -> Result<ExtendedConfig> {
        let file_config = Self::load_file_config(config_file)?;
        let env_config = Self::load_from_env(|key| env::var(key).ok());
        Self::merge_extended(env_config, file_config)
    }

    fn merge_extended(env_config: PartialConfig, file_config: PartialConfig) -> Result<ExtendedConfig> {
        let process = Self::merge_process(&[env_config.clone(), file_config.clone()]);
        Self::validate(&process)?;

        let defaults = AnalysisConfig::default();
        let analysis = AnalysisConfig {
            api_key: env_config.api_key.or(file_config.api_key),
            endpoint: env_config
                .api_endpoint
                .or(file_config.api_endpoint)
                .unwrap_or(defaults.endpoint),
            text_model: file_config.text_model.unwrap_or(defaults.text_model),
            image_model: file_config.image_model.unwrap_or(defaults.image_model),
            timeout_secs: defaults.timeout_secs,
        };

        Ok(ExtendedConfig {
            process,
            analysis,
            output_path: env_config.output_path.or(file_config.output_path),
            log_level: env_config
                .log_level
                .or(file_config.log_level)
                .unwrap_or_else(|| "info".to_string()),
        })
    }

    /// 创建默认配置文件
    pub fn create_default_config(config_path: &Path) -> Result<()> {
        let defaults = ProcessConfig::default();
        let analysis = AnalysisConfig::default();
        let mut config_parser = configparser::ini::Ini::new();
        let mut set = |section: &str, key: &str, value: String| {
            config_parser.set(section, key, Some(value));
        };
        set(SECTION, "threshold", defaults.threshold.to_string());
        set(SECTION, "sample_rate", defaults.sample_rate.to_string());
        set(SECTION, "downscale_width", defaults.downscale_width.to_string());
        set(SECTION, "frame_rate", defaults.frame_rate.to_string());
        set(SECTION, "min_subtitle_overlap", defaults.min_subtitle_overlap.to_string());
        set(SECTION, "luminance_weight", defaults.weights.luminance.to_string());
        set(SECTION, "histogram_weight", defaults.weights.histogram.to_string());
        set(SECTION, "histogram_scale", defaults.weights.histogram_scale.to_string());
        set(SECTION, "webhook_url", String::new());
        set(SECTION, "output_path", String::new());
        set(ANALYSIS_SECTION, "api_key", String::new());
        set(ANALYSIS_SECTION, "endpoint", analysis.endpoint);
        set(ANALYSIS_SECTION, "text_model", analysis.text_model);
        set(ANALYSIS_SECTION, "image_model", analysis.image_model);
        set("logging", "level", "info".to_string());

        config_parser
            .write(config_path)
            .map_err(|e| anyhow::anyhow!("写入配置文件失败: {}: {}", config_path.display(), e))?;

        Ok(())
    }
}
