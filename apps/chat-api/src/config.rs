/// Chat API configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the HTTP server binds to.
    pub port: u16,
    /// HS256 secret for verifying bearer tokens on `authenticate`.
    pub jwt_secret: String,
    /// How often the idle sweep runs (seconds).
    pub idle_sweep_interval_secs: u64,
    /// Sessions inactive longer than this are evicted (seconds).
    pub idle_timeout_secs: u64,
    /// When true, message fan-out additionally scans all live sessions for
    /// the two companies involved, catching clients that have not joined any
    /// room yet. Can be switched off once clients provably join before
    /// sending.
    pub fallback_company_scan: bool,
    /// Maximum chat message content length in characters.
    pub max_content_length: usize,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4010),
            jwt_secret: required_var("JWT_SECRET"),
            idle_sweep_interval_secs: std::env::var("IDLE_SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(600),
            idle_timeout_secs: std::env::var("IDLE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1800),
            fallback_company_scan: std::env::var("FALLBACK_COMPANY_SCAN")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(true),
            max_content_length: std::env::var("MAX_CONTENT_LENGTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4000),
        }
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}
