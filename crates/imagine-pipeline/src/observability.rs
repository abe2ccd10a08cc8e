use once_cell::sync::OnceCell;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const LISTENER_DEBUG_DIRECTIVE: &str = "imagine_pipeline::listener=debug";

fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key).ok().and_then(|v| parse_bool_env(&v))
}

fn observability_enabled() -> bool {
    env_flag("IMAGINE_OBSERVABILITY_ENABLED").unwrap_or(true)
}

fn base_filter() -> tracing_subscriber::EnvFilter {
    if let Ok(level) = std::env::var("IMAGINE_LOG_LEVEL")
        && let Ok(filter) = tracing_subscriber::EnvFilter::try_new(level)
    {
        return filter;
    }
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

fn resolve_env_filter() -> tracing_subscriber::EnvFilter {
    let filter = base_filter();
    if env_flag("DEBUG_DISCORD").unwrap_or(false)
        && let Ok(directive) = LISTENER_DEBUG_DIRECTIVE.parse::<tracing_subscriber::filter::Directive>()
    {
        return filter.add_directive(directive);
    }
    filter
}

/// Initialize logging once per process.
///
/// Environment variables:
/// - `IMAGINE_OBSERVABILITY_ENABLED`: optional enable/disable flag (default enabled).
/// - `IMAGINE_LOG_LEVEL`: optional level/filter override (`info`, `debug`, etc.).
/// - `RUST_LOG`: optional filter override when `IMAGINE_LOG_LEVEL` is unset.
/// - `DEBUG_DISCORD`: when true, per-event listener decisions are logged at `debug`.
/// - `IMAGINE_JSON_LOG_PATH`: optional log file path. If set, logs are JSONL in that file.
///   If unset, logs are emitted to stderr in a human-readable console format.
pub fn init_observability() {
    INIT.get_or_init(|| {
        if !observability_enabled() {
            return;
        }

        let env_filter = resolve_env_filter();
        if let Ok(path_raw) = std::env::var("IMAGINE_JSON_LOG_PATH") {
            let path = std::path::PathBuf::from(path_raw);
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                let _ = std::fs::create_dir_all(parent);
            }
            let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("imagine.logs.jsonl");
            let writer = tracing_appender::rolling::never(dir, file_name);
            let json_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_target(true)
                .with_writer(writer);
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(json_layer)
                .try_init();
        } else {
            // stdout carries command output (JSON) in the CLI.
            let console_layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stderr);
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .try_init();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bool_env_accepts_enabled_words() {
        assert_eq!(parse_bool_env("Enabled"), Some(true));
        assert_eq!(parse_bool_env("disabled"), Some(false));
        assert_eq!(parse_bool_env(""), None);
    }

    #[test]
    fn init_is_idempotent() {
        init_observability();
        init_observability();
        assert!(INIT.get().is_some());
    }
}
