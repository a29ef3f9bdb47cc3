use std::sync::Arc;
use std::time::Duration;

use agentflow_core::config::AppConfig;
use agentflow_core::executor::{ExecutionEngineBuilder, FixedDelay, RetryStrategy};
use agentflow_core::hooks::{EventHandler, EventRegistry};

use crate::executor::{
    ExponentialBackoffPlugin, JsonlRendererPlugin, LinearRetryPlugin, TextRendererPlugin,
};

pub fn build_retry_strategy(cfg: &AppConfig) -> Arc<dyn RetryStrategy> {
    match cfg.retry.strategy.as_str() {
        "exponential-backoff" | "exponential" => {
            Arc::new(ExponentialBackoffPlugin::new(cfg.retry.clone()))
        }
        "linear" => Arc::new(LinearRetryPlugin::new(cfg.retry.clone())),
        other => {
            if other != "fixed" {
                tracing::warn!(strategy = other, "unknown retry strategy, using fixed delay");
            }
            Arc::new(FixedDelay {
                delay: Duration::from_millis(cfg.retry.base_delay_ms),
                max_attempts: cfg.retry.max_attempts,
            })
        }
    }
}

pub fn build_renderer(cfg: &AppConfig) -> Arc<dyn EventHandler> {
    match cfg.output.format.as_str() {
        "jsonl" => Arc::new(JsonlRendererPlugin::new(cfg.output.pretty_print)),
        // Anything else renders as text.
        _ => Arc::new(TextRendererPlugin::new(cfg.output.ascii_only)),
    }
}

/// Builder seeded from `cfg`, with the configured retry strategy and renderer.
pub fn build_engine(cfg: &AppConfig) -> ExecutionEngineBuilder {
    let events = EventRegistry::new();
    events.register_all(build_renderer(cfg));
    ExecutionEngineBuilder::from_config(cfg)
        .retry_strategy(build_retry_strategy(cfg))
        .events(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_strategy_by_name() {
        let mut cfg = AppConfig::default();
        assert_eq!(build_retry_strategy(&cfg).name(), "fixed");
        cfg.retry.strategy = "linear".into();
        assert_eq!(build_retry_strategy(&cfg).name(), "linear");
        cfg.retry.strategy = "exponential-backoff".into();
        assert_eq!(build_retry_strategy(&cfg).name(), "exponential-backoff");
        cfg.retry.strategy = "bogus".into();
        assert_eq!(build_retry_strategy(&cfg).name(), "fixed");
    }

    #[test]
    fn picks_renderer_by_format() {
        let mut cfg = AppConfig::default();
        assert_eq!(build_renderer(&cfg).name(), "text");
        cfg.output.format = "jsonl".into();
        assert_eq!(build_renderer(&cfg).name(), "jsonl");
    }
}
