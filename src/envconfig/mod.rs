use serde::Deserialize;
use std::env;
use std::path::PathBuf;

pub struct EnvConfig {
    pub host: Host,
    pub home: PathBuf,
    pub output_dir: PathBuf,
    pub registry_url: String,
    pub timeout: u64,
}

pub struct Host {
    pub host: String,
    pub port: u16,
}

/// Optional `config.yaml` in the home directory; env vars win over it.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    host: Option<String>,
    output_dir: Option<PathBuf>,
    registry_url: Option<String>,
    timeout: Option<u64>,
}

impl EnvConfig {
    pub fn load() -> Self {
        let home = home_dir();
        let file = std::fs::read_to_string(home.join("config.yaml"))
            .ok()
            .and_then(|content| serde_yaml::from_str::<FileConfig>(&content).ok())
            .unwrap_or_default();

        Self {
            host: Host::from_env(file.host),
            output_dir: env::var("DIFFSTUDIO_OUTPUT")
                .map(PathBuf::from)
                .ok()
                .or(file.output_dir)
                .unwrap_or_else(|| PathBuf::from("outputs")),
            registry_url: env::var("DIFFSTUDIO_REGISTRY")
                .ok()
                .or(file.registry_url)
                .unwrap_or_else(|| "https://artifacts.diffstudio.dev".to_string()),
            timeout: env::var("DIFFSTUDIO_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .or(file.timeout)
                .unwrap_or(600),
            home,
        }
    }
}

impl Host {
    fn from_env(fallback: Option<String>) -> Self {
        let host = env::var("DIFFSTUDIO_HOST")
            .ok()
            .or(fallback)
            .unwrap_or_else(|| "127.0.0.1:7860".to_string());

        let (host, port) = if host.contains(':') {
            let parts: Vec<&str> = host.rsplitn(2, ':').collect();
            let port = parts[0].parse().unwrap_or(7860);
            let host = parts[1].to_string();
            (host, port)
        } else {
            (host, 7860)
        };

        Self { host, port }
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self::load()
    }
}

pub fn home_dir() -> PathBuf {
    if let Ok(path) = env::var("DIFFSTUDIO_HOME") {
        return PathBuf::from(path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".diffstudio")
}

/// Artifact store location under the home directory.
pub fn artifacts_dir() -> PathBuf {
    home_dir().join("artifacts")
}
