//! Metasploit adapter over the framework's JSON-RPC web service.

use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use {
    anyhow::{Context, Result, anyhow, bail},
    async_trait::async_trait,
    kestrel_config::MsfConfig,
    secrecy::{ExposeSecret, Secret, SecretString},
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value, json},
    tokio::sync::Mutex,
    tracing::{debug, warn},
};

/// Module options as written to the console: `KEY -> value`.
pub type ModuleOptions = BTreeMap<String, String>;

/// Open sessions keyed by session id.
pub type SessionMap = BTreeMap<String, SessionInfo>;

/// One hit from a module search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleMatch {
    pub fullname: String,
    #[serde(rename = "type", default)]
    pub module_type: String,
    #[serde(default)]
    pub rank: Value,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disclosuredate: Option<String>,
}

/// Session metadata from the session listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session type tag, e.g. `shell` or `meterpreter`.
    #[serde(rename = "type")]
    pub session_type: String,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// Identifiers of a launched exploit job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExploitLaunch {
    pub job_id: Option<u64>,
    pub uuid: Option<String>,
}

/// Operations the dispatcher needs from the exploitation framework.
#[async_trait]
pub trait ExploitAdapter: Send + Sync {
    async fn search_modules(&self, keyword: &str) -> Result<Vec<ModuleMatch>>;

    /// Run `module_type/module_name` with `options` and capture its console output.
    async fn run_module(
        &self,
        module_type: &str,
        module_name: &str,
        options: &ModuleOptions,
    ) -> Result<String>;

    /// Start an exploit with a payload as a background job.
    async fn execute_exploit(
        &self,
        exploit: &str,
        payload: &str,
        options: &ModuleOptions,
    ) -> Result<ExploitLaunch>;

    async fn list_sessions(&self) -> Result<SessionMap>;

    async fn shell_write(&self, session_id: &str, data: &str) -> Result<()>;

    async fn shell_read(&self, session_id: &str) -> Result<String>;

    /// Run one meterpreter command and wait for its output.
    async fn meterpreter_run(&self, session_id: &str, command: &str) -> Result<String>;
}

// ── JSON-RPC client ──────────────────────────────────────────────────────────

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// The service refused the token sent with a call.
#[derive(Debug, thiserror::Error)]
#[error("{method} failed: {message}")]
struct TokenRejected {
    method: String,
    message: String,
}

fn is_token_rejection(status: reqwest::StatusCode, message: &str) -> bool {
    status == reqwest::StatusCode::UNAUTHORIZED
        || message.contains("Invalid Authentication Token")
}

pub struct MsfRpcClient {
    client: reqwest::Client,
    endpoint: String,
    credentials: Option<(String, SecretString)>,
    token: Mutex<Option<SecretString>>,
    /// The token comes from `auth.login` and may be renewed.
    renewable: bool,
    next_id: AtomicU64,
    output_timeout: Duration,
    poll_interval: Duration,
}

impl MsfRpcClient {
    pub fn from_config(cfg: &MsfConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .danger_accept_invalid_certs(cfg.insecure_tls)
            .build()
            .context("failed to build HTTP client for Metasploit")?;
        let credentials = match (&cfg.username, &cfg.password) {
            (Some(user), Some(password)) => Some((user.clone(), password.clone())),
            _ => None,
        };
        Ok(Self {
            client,
            endpoint: format!("{}/api/v1/json-rpc", cfg.url.trim_end_matches('/')),
            credentials,
            renewable: cfg.api_token.is_none(),
            token: Mutex::new(cfg.api_token.clone()),
            next_id: AtomicU64::new(1),
            output_timeout: Duration::from_secs(cfg.output_timeout_secs),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let token = self.token().await?;
        match self.send(method, params.clone(), Some(&token)).await {
            Err(e) if self.renewable && e.is::<TokenRejected>() => {
                warn!(method, "Metasploit rejected the session token, logging in again");
                self.forget_token(&token).await;
                let token = self.token().await?;
                self.send(method, params, Some(&token)).await
            },
            other => other,
        }
    }

    /// Drop the cached token unless another call already replaced it.
    async fn forget_token(&self, rejected: &SecretString) {
        let mut cached = self.token.lock().await;
        if cached
            .as_ref()
            .is_some_and(|t| t.expose_secret() == rejected.expose_secret())
        {
            *cached = None;
        }
    }

    async fn send(&self, method: &str, params: Value, token: Option<&SecretString>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });
        debug!(method, id, "msf rpc call");

        let mut req = self.client.post(&self.endpoint).json(&body);
        if let Some(token) = token {
            req = req.bearer_auth(token.expose_secret());
        }
        let resp = req
            .send()
            .await
            .with_context(|| format!("failed to reach Metasploit RPC at {}", self.endpoint))?;

        let status = resp.status();
        let body: Value = match resp.json().await {
            Ok(body) => body,
            Err(_) if status == reqwest::StatusCode::UNAUTHORIZED => {
                return Err(TokenRejected {
                    method: method.to_string(),
                    message: "HTTP 401".into(),
                }
                .into());
            },
            Err(e) => {
                return Err(anyhow!(e).context(format!(
                    "Metasploit RPC returned an unreadable response (HTTP {})",
                    status.as_u16()
                )));
            },
        };

        if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
            let message = error["data"]["error_message"]
                .as_str()
                .or_else(|| error["message"].as_str())
                .unwrap_or("unknown error");
            if token.is_some() && is_token_rejection(status, message) {
                return Err(TokenRejected {
                    method: method.to_string(),
                    message: message.to_string(),
                }
                .into());
            }
            bail!("{method} failed: {message}");
        }
        if !status.is_success() {
            bail!("{method} failed: HTTP {}", status.as_u16());
        }
        body.get("result")
            .cloned()
            .ok_or_else(|| anyhow!("{method} returned no result"))
    }

    /// Configured token, or one obtained with `auth.login` and cached.
    async fn token(&self) -> Result<SecretString> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }
        let Some((user, password)) = &self.credentials else {
            bail!("no Metasploit credentials configured (set msf.api_token or msf.username and msf.password)");
        };

        let result = self
            .send("auth.login", json!([user, password.expose_secret()]), None)
            .await
            .context("Metasploit login failed")?;
        let token = result["token"]
            .as_str()
            .ok_or_else(|| anyhow!("auth.login returned no token"))?;
        debug!(user = %user, "logged in to Metasploit RPC");

        let token: SecretString = Secret::new(token.to_string());
        *cached = Some(token.clone());
        Ok(token)
    }

    // ── Console helpers ──────────────────────────────────────────────────────

    async fn console_read(&self, console: &str) -> Result<(String, bool)> {
        let result = self.call("console.read", json!([console])).await?;
        let data = result["data"].as_str().unwrap_or_default().to_string();
        let busy = result["busy"].as_bool().unwrap_or(false);
        Ok((data, busy))
    }

    async fn run_in_console(&self, console: &str, script: &str) -> Result<String> {
        // Discard the banner and prompt.
        self.console_read(console).await?;
        self.call("console.write", json!([console, script])).await?;

        let deadline = Instant::now() + self.output_timeout;
        let mut output = String::new();
        let mut active = false;
        loop {
            tokio::time::sleep(self.poll_interval).await;
            let (data, busy) = self.console_read(console).await?;
            active |= busy || !data.is_empty();
            output.push_str(&data);
            if active && !busy {
                break;
            }
            if Instant::now() >= deadline {
                warn!(console, "console output timed out");
                output.push_str("\n[console timed out]");
                break;
            }
        }
        Ok(output)
    }
}

/// Console script for one module run.
fn module_script(module_type: &str, module_name: &str, options: &ModuleOptions) -> String {
    let mut script = format!("use {module_type}/{module_name}\n");
    for (key, value) in options {
        script.push_str(&format!("set {key} {value}\n"));
    }
    script.push_str(if module_type == "exploit" { "run -z\n" } else { "run\n" });
    script
}

fn string_param(value: &Value, key: &str) -> String {
    match &value[key] {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl ExploitAdapter for MsfRpcClient {
    async fn search_modules(&self, keyword: &str) -> Result<Vec<ModuleMatch>> {
        let result = self.call("module.search", json!([keyword])).await?;
        serde_json::from_value(result).context("unexpected module.search result")
    }

    async fn run_module(
        &self,
        module_type: &str,
        module_name: &str,
        options: &ModuleOptions,
    ) -> Result<String> {
        let created = self.call("console.create", json!([{}])).await?;
        let console = string_param(&created, "id");
        if console.is_empty() {
            bail!("console.create returned no console id");
        }
        debug!(%console, module_type, module_name, "running module in console");

        let script = module_script(module_type, module_name, options);
        let output = self.run_in_console(&console, &script).await;

        if let Err(e) = self.call("console.destroy", json!([console])).await {
            warn!(%console, error = %e, "failed to destroy console");
        }
        output
    }

    async fn execute_exploit(
        &self,
        exploit: &str,
        payload: &str,
        options: &ModuleOptions,
    ) -> Result<ExploitLaunch> {
        let mut opts: Map<String, Value> = options
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        opts.insert("PAYLOAD".into(), Value::String(payload.to_string()));

        let result = self
            .call("module.execute", json!(["exploit", exploit, opts]))
            .await?;
        serde_json::from_value(result).context("unexpected module.execute result")
    }

    async fn list_sessions(&self) -> Result<SessionMap> {
        let result = self.call("session.list", json!([])).await?;
        if result.as_array().is_some_and(Vec::is_empty) {
            return Ok(SessionMap::new());
        }
        serde_json::from_value(result).context("unexpected session.list result")
    }

    async fn shell_write(&self, session_id: &str, data: &str) -> Result<()> {
        self.call("session.shell_write", json!([session_id, data]))
            .await?;
        Ok(())
    }

    async fn shell_read(&self, session_id: &str) -> Result<String> {
        let result = self.call("session.shell_read", json!([session_id])).await?;
        Ok(string_param(&result, "data"))
    }

    async fn meterpreter_run(&self, session_id: &str, command: &str) -> Result<String> {
        self.call(
            "session.meterpreter_run_single",
            json!([session_id, command]),
        )
        .await?;

        let deadline = Instant::now() + self.output_timeout;
        let mut output = String::new();
        loop {
            tokio::time::sleep(self.poll_interval).await;
            let result = self
                .call("session.meterpreter_read", json!([session_id]))
                .await?;
            let data = string_param(&result, "data");
            if data.is_empty() && !output.is_empty() {
                break;
            }
            output.push_str(&data);
            if Instant::now() >= deadline {
                if output.is_empty() {
                    warn!(session_id, "meterpreter command produced no output");
                }
                break;
            }
        }
        Ok(output)
    }
}
