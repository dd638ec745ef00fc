//! Config schema: gateway, scanner host, exploitation framework, model backend, agent.

use std::path::PathBuf;

use {
    secrecy::SecretString,
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KestrelConfig {
    pub gateway: GatewayConfig,
    pub scanner: ScannerConfig,
    pub msf: MsfConfig,
    pub model: ModelConfig,
    pub agent: AgentConfig,
}

/// HTTP gateway (manifest + invocation endpoint).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub bind: String,
    pub port: u16,
    /// Bearer token required on `/rpc` when set.
    pub token: Option<SecretString>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 18790,
            token: None,
        }
    }
}

/// Remote scanning host reached over SSH.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Private key used for public-key authentication.
    pub key_file: PathBuf,
    /// Scanner binary on the remote host.
    pub binary: String,
    pub timeout_secs: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 22,
            user: "kali".into(),
            key_file: PathBuf::from("~/.ssh/id_ed25519"),
            binary: "nmap".into(),
            timeout_secs: 120,
        }
    }
}

/// Exploitation framework JSON-RPC service.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MsfConfig {
    /// Base URL of the RPC service, e.g. `https://127.0.0.1:8081`.
    pub url: String,
    /// Pre-issued API token. When absent, `username`/`password` are used to log in.
    pub api_token: Option<SecretString>,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    /// Accept self-signed certificates (the RPC daemon generates one by default).
    pub insecure_tls: bool,
    pub timeout_secs: u64,
    /// Upper bound for waiting on console or meterpreter output.
    pub output_timeout_secs: u64,
}

impl Default for MsfConfig {
    fn default() -> Self {
        Self {
            url: "https://127.0.0.1:8081".into(),
            api_token: None,
            username: None,
            password: None,
            insecure_tls: true,
            timeout_secs: 60,
            output_timeout_secs: 120,
        }
    }
}

/// Conversational model backend (Ollama chat API).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub host: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            host: "http://127.0.0.1:11434".into(),
            model: "mistral".into(),
            timeout_secs: 60,
        }
    }
}

/// Orchestration loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Pause between writing to a shell session and reading its output.
    pub settle_ms: u64,
    /// Replaces the generated system prompt when set.
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            settle_ms: 1000,
            system_prompt: None,
        }
    }
}
