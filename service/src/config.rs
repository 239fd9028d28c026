use clap::builder::TypedValueParser as _;
use clap::Parser;
use dotenvy::dotenv;
use log::LevelFilter;
use std::fmt;
use std::str::FromStr;

/// Default TCP port for the local OAuth callback listener.
const DEFAULT_CALLBACK_PORT: u16 = 8975;

#[derive(Clone, Debug, PartialEq)]
pub enum RustEnv {
    Development,
    Production,
    Staging,
}

#[derive(Debug, PartialEq, Eq)]
pub struct RustEnvParseError;

impl FromStr for RustEnv {
    type Err = RustEnvParseError;
    fn from_str(level: &str) -> Result<RustEnv, Self::Err> {
        match level.to_lowercase().as_str() {
            "development" => Ok(RustEnv::Development),
            "production" => Ok(RustEnv::Production),
            "staging" => Ok(RustEnv::Staging),
            _ => Err(RustEnvParseError),
        }
    }
}

impl fmt::Display for RustEnv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RustEnv::Development => write!(f, "development"),
            RustEnv::Production => write!(f, "production"),
            RustEnv::Staging => write!(f, "staging"),
        }
    }
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// A list of full origin URLs whose OAuth callback messages are trusted.
    /// The local callback listener's own origin is added automatically.
    #[arg(
        long,
        env,
        value_delimiter = ',',
        use_value_delimiter = true,
        default_value = "https://app.linkly.io"
    )]
    pub allowed_origins: Vec<String>,

    /// The base URL of the Linkly backend API (e.g. https://api.linkly.io).
    #[arg(short, long, env)]
    api_base_url: Option<String>,

    /// The base URL the per-platform OAuth callback URLs are resolved
    /// against. Defaults to the local callback listener when unset.
    #[arg(long, env)]
    callback_base_url: Option<String>,

    /// The host interface the local OAuth callback listener binds to
    #[arg(short, long, env, default_value = "127.0.0.1")]
    pub interface: Option<String>,

    /// The host TCP port the local OAuth callback listener binds to
    #[arg(short, long, env, default_value_t = DEFAULT_CALLBACK_PORT)]
    pub port: u16,

    /// Deadline in seconds applied to every connection attempt
    #[arg(long, env, default_value_t = 300)]
    pub attempt_deadline_secs: u64,

    /// Lifetime in seconds of a pending OAuth session awaiting its callback
    #[arg(long, env, default_value_t = 600)]
    pub oauth_session_ttl_secs: u64,

    /// Ask the backend to use its own app credentials with the provider
    /// instead of per-user credentials.
    #[arg(long, env, default_value_t = false)]
    pub use_client_credentials: bool,

    /// Path of the token and pending-connection store. When unset, state is
    /// held in memory and lost on exit.
    #[arg(long, env)]
    storage_path: Option<String>,

    /// Hex-encoded 32-byte AES-256 key encrypting the store at rest.
    /// When unset the store is written in the clear.
    #[arg(long, env)]
    storage_encryption_key: Option<String>,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .map(|s| s.parse::<LevelFilter>().unwrap()),
        )]
    pub log_level_filter: LevelFilter,

    /// Set the Rust runtime environment to use.
    #[arg(
    short,
    long,
    env,
    default_value_t = RustEnv::Development,
    value_parser = clap::builder::PossibleValuesParser::new([
        "DEVELOPMENT", "PRODUCTION", "STAGING",
        "development", "production", "staging"
    ])
        .map(|s| s.parse::<RustEnv>().unwrap()),
    )]
    pub runtime_env: RustEnv,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        // Load .env file first
        dotenv().ok();
        // Then parse the command line parameters and flags
        Config::parse()
    }

    pub fn api_base_url(&self) -> Option<String> {
        self.api_base_url.clone()
    }

    pub fn set_api_base_url(mut self, api_base_url: String) -> Self {
        self.api_base_url = Some(api_base_url);
        self
    }

    /// Returns the configured callback base URL, falling back to the local
    /// listener's own address.
    pub fn callback_base_url(&self) -> String {
        self.callback_base_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.interface(), self.port))
    }

    pub fn interface(&self) -> &str {
        self.interface.as_deref().unwrap_or("127.0.0.1")
    }

    pub fn storage_path(&self) -> Option<String> {
        self.storage_path.clone()
    }

    pub fn storage_encryption_key(&self) -> Option<String> {
        self.storage_encryption_key.clone()
    }

    pub fn runtime_env(&self) -> RustEnv {
        self.runtime_env.clone()
    }

    pub fn is_production(&self) -> bool {
        self.runtime_env() == RustEnv::Production
    }
}
