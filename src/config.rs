use std::path::PathBuf;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_USER_AGENT: &str = "Barren-River-Lake-Hub/1.0";
const DEFAULT_CWMS_API_URL: &str = "https://cwms-data.usace.army.mil/cwms-data";
const DEFAULT_NWS_API_URL: &str = "https://api.weather.gov";
const DEFAULT_TREND_STEADY_THRESHOLD_FT: f64 = 0.05;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Log output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Application configuration, parsed from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    /// Base URL of this service for same-origin revalidation. When unset the
    /// controller resolves sources in-process.
    pub base_url: Option<String>,
    pub user_agent: String,
    pub cwms_api_url: String,
    pub nws_api_url: String,
    /// Optional JSON file overriding rows of the freshness policy table.
    pub freshness_policy_path: Option<PathBuf>,
    pub trend_steady_threshold_ft: f64,
    pub log_format: LogFormat,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the config from an arbitrary variable lookup, so tests do not
    /// have to mutate the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = match lookup("PORT") {
            Some(raw) => raw.parse().map_err(|e| ConfigError::Invalid {
                name: "PORT",
                reason: format!("{}", e),
            })?,
            None => DEFAULT_PORT,
        };

        let trend_steady_threshold_ft = match lookup("TREND_STEADY_THRESHOLD_FT") {
            Some(raw) => {
                let v: f64 = raw.parse().map_err(|e| ConfigError::Invalid {
                    name: "TREND_STEADY_THRESHOLD_FT",
                    reason: format!("{}", e),
                })?;
                if !v.is_finite() || v < 0.0 {
                    return Err(ConfigError::Invalid {
                        name: "TREND_STEADY_THRESHOLD_FT",
                        reason: "must be a finite, non-negative number".to_string(),
                    });
                }
                v
            }
            None => DEFAULT_TREND_STEADY_THRESHOLD_FT,
        };

        let log_format = match lookup("LOG_FORMAT").as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "LOG_FORMAT",
                    reason: format!("expected 'pretty' or 'json', got '{}'", other),
                })
            }
        };

        Ok(Self {
            port,
            base_url: lookup("API_BASE_URL")
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.trim_end_matches('/').to_string()),
            user_agent: lookup("LAKE_HUB_USER_AGENT")
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            cwms_api_url: lookup("CWMS_API_URL")
                .unwrap_or_else(|| DEFAULT_CWMS_API_URL.to_string()),
            nws_api_url: lookup("NWS_API_URL").unwrap_or_else(|| DEFAULT_NWS_API_URL.to_string()),
            freshness_policy_path: lookup("FRESHNESS_POLICY_PATH").map(PathBuf::from),
            trend_steady_threshold_ft,
            log_format,
        })
    }
}
