//! 日志初始化：环境变量优先，调试模式下提升本 crate 的日志级别。

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// 初始化 tracing 日志订阅与默认过滤规则。
pub fn init_logging(debug: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(debug)));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn default_directives(debug: bool) -> String {
    if debug {
        format!("info,{}=debug", env!("CARGO_CRATE_NAME"))
    } else {
        "info".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::default_directives;

    #[test]
    fn debug_mode_raises_crate_level() {
        assert_eq!(default_directives(false), "info");
        assert_eq!(default_directives(true), "info,axo_upload=debug");
    }
}
