use std::io::Write;

use log::LevelFilter;
use serde::{Deserialize, Serialize};

/// Minimum level of engine messages to log.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    None,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(&self) -> LevelFilter {
        match self {
            LogLevel::None => LevelFilter::Off,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Error => LevelFilter::Error,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value.trim().to_ascii_lowercase().as_str() {
            "none" | "off" => LogLevel::None,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => return None,
        })
    }
}

/// Install the global logger. `RUST_LOG` wins over `level` when set.
///
/// Returns false when a logger was already installed.
pub fn init_logging(level: LogLevel) -> bool {
    let default_filter = level.as_filter().to_string().to_ascii_lowercase();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {} [{}] - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .try_init()
        .is_ok()
}

/// Prefix used in log lines so concurrent sessions can be told apart.
pub fn session_tag(session_name: &str) -> String {
    if session_name.is_empty() || session_name == crate::config::DEFAULT_SESSION {
        "chatgpt".to_string()
    } else {
        format!("chatgpt[{session_name}]")
    }
}
