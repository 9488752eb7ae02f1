//! Lantern Observability
//!
//! 提供统一的日志初始化和 span 辅助函数。

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;

pub use config::{Config, LoggingConfig};
pub use error::{ObservabilityError, Result};
pub use logging::{create_session_span, create_turn_span, LogManager};

/// 便捷导入模块
pub mod prelude {
    //! 常用类型的便捷导入

    pub use crate::{create_session_span, create_turn_span, Config, LogManager, Result};

    pub use tracing::{debug, error, info, instrument, trace, warn, Instrument, Span};
}
