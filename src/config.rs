use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub gmail: GmailConfig,
    pub search: SearchConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GmailConfig {
    /// Client identity downloaded from the Google Cloud console (read only)
    pub credentials_path: PathBuf,
    /// Authorized-user token written after the first successful authorization
    pub token_path: PathBuf,
    pub api_base: String,
    pub http_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    pub max_results: u32,
    /// Upper bound on concurrent message detail fetches
    pub concurrency: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub download_dir: PathBuf,
}

pub const DEFAULT_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let port = std::env::var("SERVER_PORT")
            .or_else(|_| std::env::var("PORT"))
            .unwrap_or_else(|_| "3000".to_string());

        Ok(Self {
            server: ServerConfig {
                host: std::env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
                port: port.parse()?,
            },
            gmail: GmailConfig {
                credentials_path: PathBuf::from(
                    std::env::var("GMAIL_CREDENTIALS_PATH")
                        .unwrap_or_else(|_| "credentials.json".to_string()),
                ),
                token_path: PathBuf::from(
                    std::env::var("GMAIL_TOKEN_PATH").unwrap_or_else(|_| "token.json".to_string()),
                ),
                api_base: std::env::var("GMAIL_API_BASE")
                    .unwrap_or_else(|_| DEFAULT_API_BASE.to_string()),
                http_timeout_secs: std::env::var("HTTP_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()?,
            },
            search: SearchConfig {
                max_results: std::env::var("SEARCH_MAX_RESULTS")
                    .unwrap_or_else(|_| "50".to_string())
                    .parse()?,
                concurrency: std::env::var("SEARCH_CONCURRENCY")
                    .unwrap_or_else(|_| "8".to_string())
                    .parse::<usize>()?
                    .max(1),
            },
            storage: StorageConfig {
                download_dir: PathBuf::from(
                    std::env::var("DOWNLOAD_DIR").unwrap_or_else(|_| "downloads".to_string()),
                ),
            },
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
impl AppConfig {
    /// Config with defaults and no environment lookups
    pub fn for_tests(root: &std::path::Path) -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            gmail: GmailConfig {
                credentials_path: root.join("credentials.json"),
                token_path: root.join("token.json"),
                api_base: DEFAULT_API_BASE.to_string(),
                http_timeout_secs: 5,
            },
            search: SearchConfig {
                max_results: 50,
                concurrency: 4,
            },
            storage: StorageConfig {
                download_dir: root.join("downloads"),
            },
        }
    }
}
