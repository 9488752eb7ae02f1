//! 结构化日志模块
//!
//! 提供基于 tracing 的结构化日志功能。

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    layer::{Layered, SubscriberExt},
    reload::{self, Handle},
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::config::{Config, LoggingConfig};
use crate::error::{ObservabilityError, Result};

/// 日志级别重新加载句柄类型
type ReloadHandle = Handle<EnvFilter, Registry>;

type FilteredRegistry = Layered<reload::Layer<EnvFilter, Registry>, Registry>;
type BoxedLayer = Box<dyn Layer<FilteredRegistry> + Send + Sync>;

/// 日志管理器
#[derive(Debug)]
pub struct LogManager {
    /// 配置
    config: LoggingConfig,

    /// 过滤器重新加载句柄
    reload_handle: Arc<RwLock<ReloadHandle>>,

    /// 文件写入线程的句柄，drop 时刷新缓冲
    _file_guard: Option<WorkerGuard>,
}

impl LogManager {
    /// 安装全局日志订阅者。
    ///
    /// 每个进程只能安装一次，重复调用返回 `Init` 错误。
    pub fn init(config: &Config) -> Result<Self> {
        let logging = config.logging.clone();

        let filter = build_filter(&logging)?;
        let (filter, reload_handle) = reload::Layer::new(filter);

        let mut layers: Vec<BoxedLayer> = Vec::new();
        if logging.stderr {
            layers.push(console_layer(&logging));
        }

        let file_guard = match &logging.file_path {
            Some(path) => {
                let (layer, guard) = file_layer(&logging, path)?;
                layers.push(layer);
                Some(guard)
            }
            None => None,
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(layers)
            .try_init()
            .map_err(|e| ObservabilityError::init(e.to_string()))?;

        tracing::info!(
            target: "lantern_observability",
            "{} logging initialized with level: {}",
            config.app_name,
            logging.level
        );

        Ok(Self {
            config: logging,
            reload_handle: Arc::new(RwLock::new(reload_handle)),
            _file_guard: file_guard,
        })
    }

    /// 动态更新日志级别
    pub fn update_level(&mut self, level: &str) -> Result<()> {
        let new_filter = EnvFilter::try_new(level)
            .map_err(|e| ObservabilityError::logging(format!("Invalid log level: {}", e)))?;

        self.reload_handle
            .write()
            .modify(|filter| *filter = new_filter)
            .map_err(|e| ObservabilityError::logging(format!("Failed to update log level: {}", e)))?;

        self.config.level = level.to_string();
        tracing::info!(target: "lantern_observability", "Log level updated to: {}", level);
        Ok(())
    }

    /// 获取当前配置
    pub fn config(&self) -> &LoggingConfig {
        &self.config
    }
}

/// 构建环境过滤器
fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let mut filter = EnvFilter::try_new(&config.level)
        .map_err(|e| ObservabilityError::logging(format!("Invalid log level: {}", e)))?;

    for (module, level) in &config.module_levels {
        filter = filter.add_directive(
            format!("{}={}", module, level)
                .parse()
                .map_err(|e| ObservabilityError::logging(format!("Invalid directive: {}", e)))?,
        );
    }

    Ok(filter)
}

fn console_layer(config: &LoggingConfig) -> BoxedLayer {
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(config.include_target)
        .with_thread_ids(config.include_thread_id)
        .with_line_number(config.include_line_number)
        .with_ansi(config.ansi_colors);

    if config.json_format {
        layer.json().boxed()
    } else {
        layer.boxed()
    }
}

fn file_layer(config: &LoggingConfig, path: &Path) -> Result<(BoxedLayer, WorkerGuard)> {
    let file_name = path
        .file_name()
        .ok_or_else(|| ObservabilityError::config(format!("Invalid log file path: {:?}", path)))?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let appender = tracing_appender::rolling::never(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_target(config.include_target)
        .with_thread_ids(config.include_thread_id)
        .with_line_number(config.include_line_number)
        .with_ansi(false);

    let layer = if config.json_format {
        layer.json().boxed()
    } else {
        layer.boxed()
    };
    Ok((layer, guard))
}

/// 创建一个聊天会话的 span
pub fn create_session_span(model_id: &str) -> tracing::Span {
    tracing::info_span!("session", model_id = %model_id)
}

/// 创建一轮对话的 span
pub fn create_turn_span(turn_id: &str) -> tracing::Span {
    tracing::info_span!("turn", turn_id = %turn_id)
}
