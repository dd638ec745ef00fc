use std::{fmt, sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    kestrel_agents::tool_registry::{CapabilityInvoker, CapabilityRegistry, SchemaViolation},
    kestrel_config::KestrelConfig,
    kestrel_protocol::{InvocationRequest, InvocationResult},
    serde::{Deserialize, de::DeserializeOwned},
    serde_json::{Map, Value, json},
    tracing::{debug, info, warn},
};

use crate::{
    catalog::{Capability, builtin_registry},
    msf::{ExploitAdapter, ModuleOptions, MsfRpcClient},
    sanitize::{
        DEFAULT_SCAN_FLAGS, ValueError, flag_policy, validate_console_value, validate_identifier,
        validate_target,
    },
    scan::{ScanAdapter, SshScanner},
    session::{self, SessionError},
};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Unknown method")]
    UnknownMethod(String),
    #[error("missing required argument: {0}")]
    MissingRequiredArgument(String),
    #[error("invalid argument '{name}': {reason}")]
    InvalidArgument { name: String, reason: String },
    #[error("{context}: {error:#}")]
    AdapterFailure {
        context: &'static str,
        error: anyhow::Error,
    },
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl DispatchError {
    fn invalid(name: &str, reason: impl fmt::Display) -> Self {
        DispatchError::InvalidArgument {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }

    fn adapter(context: &'static str) -> impl FnOnce(anyhow::Error) -> Self {
        move |error| DispatchError::AdapterFailure { context, error }
    }
}

impl From<SchemaViolation> for DispatchError {
    fn from(violation: SchemaViolation) -> Self {
        match violation {
            SchemaViolation::Missing(name) => DispatchError::MissingRequiredArgument(name),
            SchemaViolation::WrongType { name, expected } => {
                DispatchError::invalid(&name, format!("must be {expected}"))
            },
            SchemaViolation::NotAllowed {
                name,
                value,
                allowed,
            } => DispatchError::invalid(
                &name,
                format!("must be one of [{}], got '{value}'", allowed.join(", ")),
            ),
        }
    }
}

// ── Typed arguments ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ScanArgs {
    target: String,
    #[serde(default)]
    flags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    keyword: String,
}

#[derive(Debug, Deserialize)]
struct RunModuleArgs {
    module_type: String,
    module_name: String,
    #[serde(default)]
    options: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ExploitArgs {
    exploit: String,
    payload: String,
    #[serde(default)]
    options: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SessionId {
    Text(String),
    Number(u64),
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionId::Text(s) => f.write_str(s),
            SessionId::Number(n) => write!(f, "{n}"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SessionCommandArgs {
    session_id: SessionId,
    command: String,
}

fn decode<T: DeserializeOwned>(mut args: Map<String, Value>) -> Result<T, DispatchError> {
    // Optional arguments sent as null count as absent.
    args.retain(|_, v| !v.is_null());
    serde_json::from_value(Value::Object(args)).map_err(|e| DispatchError::invalid("params", e))
}

fn check(name: &str, result: Result<(), ValueError>) -> Result<(), DispatchError> {
    result.map_err(|e| DispatchError::invalid(name, e))
}

/// Flatten model-supplied options into console-safe `KEY -> value` pairs.
fn module_options(options: Map<String, Value>) -> Result<ModuleOptions, DispatchError> {
    options
        .into_iter()
        .map(|(key, value)| {
            check("options", validate_identifier(&key))?;
            let value = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => {
                    return Err(DispatchError::invalid(
                        "options",
                        format!("value of {key} must be a string, number or boolean"),
                    ));
                },
            };
            check("options", validate_console_value(&value))?;
            Ok((key, value))
        })
        .collect()
}

// ── Dispatcher ───────────────────────────────────────────────────────────────

/// Validates every invocation and routes it to exactly one adapter call.
pub struct Dispatcher {
    registry: Arc<CapabilityRegistry>,
    scanner: Arc<dyn ScanAdapter>,
    exploits: Arc<dyn ExploitAdapter>,
    settle: Duration,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        scanner: Arc<dyn ScanAdapter>,
        exploits: Arc<dyn ExploitAdapter>,
        settle: Duration,
    ) -> Self {
        Self {
            registry,
            scanner,
            exploits,
            settle,
        }
    }

    /// Built-in capabilities wired to the SSH scanner and the Metasploit RPC service.
    pub fn from_config(config: &KestrelConfig) -> anyhow::Result<Self> {
        let registry = Arc::new(builtin_registry()?);
        let scanner = Arc::new(SshScanner::from_config(&config.scanner));
        let exploits = Arc::new(MsfRpcClient::from_config(&config.msf)?);
        info!(
            capabilities = registry.len(),
            scanner = %config.scanner.host,
            msf = %config.msf.url,
            "dispatcher ready"
        );
        Ok(Self::new(
            registry,
            scanner,
            exploits,
            Duration::from_millis(config.agent.settle_ms),
        ))
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// Handle one request. Every problem becomes a `Failure` with the request id.
    pub async fn dispatch(&self, request: InvocationRequest) -> InvocationResult {
        let InvocationRequest { method, params, id } = request;
        debug!(%method, "dispatching");
        match self.try_dispatch(&method, params).await {
            Ok(payload) => InvocationResult::ok(id, payload),
            Err(e) => {
                warn!(%method, error = %e, "invocation failed");
                InvocationResult::err(id, e.to_string())
            },
        }
    }

    async fn try_dispatch(&self, method: &str, params: Value) -> Result<Value, DispatchError> {
        let descriptor = self
            .registry
            .get(method)
            .ok_or_else(|| DispatchError::UnknownMethod(method.to_string()))?;
        let capability = Capability::from_name(method)
            .ok_or_else(|| DispatchError::UnknownMethod(method.to_string()))?;

        let args = match params {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            _ => return Err(DispatchError::invalid("params", "must be an object")),
        };
        descriptor.validate(&args)?;

        match capability {
            Capability::Scan => self.scan(decode(args)?).await,
            Capability::MsfSearch => self.search(decode(args)?).await,
            Capability::MsfRunModule => self.run_module(decode(args)?).await,
            Capability::MsfExploit => self.exploit(decode(args)?).await,
            Capability::MsfSessions => self.sessions().await,
            Capability::MsfSessionCommand => self.session_command(decode(args)?).await,
        }
    }

    async fn scan(&self, args: ScanArgs) -> Result<Value, DispatchError> {
        check("target", validate_target(&args.target))?;

        let policy = flag_policy(Capability::Scan.name())
            .ok_or_else(|| DispatchError::invalid("flags", "no flag policy for scan"))?;
        let sanitized = policy.sanitize(&args.flags);
        if sanitized.any_rejected() {
            warn!(rejected = ?sanitized.rejected, "dropped scan flags outside the whitelist");
        }
        let flags = if sanitized.kept.is_empty() {
            info!(defaults = ?DEFAULT_SCAN_FLAGS, "no usable scan flags, using defaults");
            DEFAULT_SCAN_FLAGS.iter().map(|f| (*f).to_string()).collect()
        } else {
            sanitized.kept
        };

        let output = self
            .scanner
            .scan(&args.target, &flags)
            .await
            .map_err(DispatchError::adapter("Scan error"))?;
        Ok(json!({
            "target": args.target,
            "flags": flags,
            "output": output,
        }))
    }

    async fn search(&self, args: SearchArgs) -> Result<Value, DispatchError> {
        let matches = self
            .exploits
            .search_modules(&args.keyword)
            .await
            .map_err(DispatchError::adapter("Search error"))?;
        Ok(json!({ "modules": matches }))
    }

    async fn run_module(&self, args: RunModuleArgs) -> Result<Value, DispatchError> {
        check("module_name", validate_identifier(&args.module_name))?;
        let options = module_options(args.options)?;
        let output = self
            .exploits
            .run_module(&args.module_type, &args.module_name, &options)
            .await
            .map_err(DispatchError::adapter("Module run error"))?;
        Ok(json!({ "output": output }))
    }

    async fn exploit(&self, args: ExploitArgs) -> Result<Value, DispatchError> {
        let exploit = args.exploit.strip_prefix("exploit/").unwrap_or(&args.exploit);
        check("exploit", validate_identifier(exploit))?;
        check("payload", validate_identifier(&args.payload))?;
        let options = module_options(args.options)?;
        let launch = self
            .exploits
            .execute_exploit(exploit, &args.payload, &options)
            .await
            .map_err(DispatchError::adapter("Exploit error"))?;
        Ok(json!(launch))
    }

    async fn sessions(&self) -> Result<Value, DispatchError> {
        let sessions = self
            .exploits
            .list_sessions()
            .await
            .map_err(DispatchError::adapter("Session list error"))?;
        Ok(json!({ "sessions": sessions }))
    }

    async fn session_command(&self, args: SessionCommandArgs) -> Result<Value, DispatchError> {
        check("command", validate_console_value(&args.command))?;
        let session_id = args.session_id.to_string();
        let output =
            session::interact(self.exploits.as_ref(), &session_id, &args.command, self.settle)
                .await?;
        Ok(json!({
            "session_id": session_id,
            "output": output,
        }))
    }
}

#[async_trait]
impl CapabilityInvoker for Dispatcher {
    fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    async fn invoke(&self, request: InvocationRequest) -> InvocationResult {
        self.dispatch(request).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use {super::*, crate::session::tests::FakeFramework};

    #[derive(Default)]
    struct FakeScanner {
        calls: Mutex<Vec<(String, Vec<String>)>>,
        fail: bool,
    }

    #[async_trait]
    impl ScanAdapter for FakeScanner {
        async fn scan(&self, target: &str, flags: &[String]) -> anyhow::Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push((target.to_string(), flags.to_vec()));
            if self.fail {
                anyhow::bail!("failed to connect to scanner at 10.0.0.2:22");
            }
            Ok("22/tcp open ssh".into())
        }
    }

    struct Harness {
        dispatcher: Dispatcher,
        scanner: Arc<FakeScanner>,
        framework: Arc<FakeFramework>,
    }

    fn harness_with(scanner: FakeScanner, framework: FakeFramework) -> Harness {
        let scanner = Arc::new(scanner);
        let framework = Arc::new(framework);
        let dispatcher = Dispatcher::new(
            Arc::new(builtin_registry().unwrap()),
            scanner.clone(),
            framework.clone(),
            Duration::ZERO,
        );
        Harness {
            dispatcher,
            scanner,
            framework,
        }
    }

    fn harness() -> Harness {
        harness_with(
            FakeScanner::default(),
            FakeFramework::default().with_session("1", "shell"),
        )
    }

    fn request(method: &str, params: Value) -> InvocationRequest {
        InvocationRequest::new(method, params, json!(42))
    }

    #[tokio::test]
    async fn scan_drops_invalid_flags() {
        let h = harness();
        let result = h
            .dispatcher
            .dispatch(request("scan", json!({ "target": "10.0.0.5", "flags": ["-T9", "-F"] })))
            .await;
        assert!(result.is_success());
        assert_eq!(h.scanner.calls.lock().unwrap()[0], (
            "10.0.0.5".to_string(),
            vec!["-F".to_string()]
        ));
        let envelope = result.to_value();
        assert_eq!(envelope["id"], 42);
        assert_eq!(envelope["result"]["output"], "22/tcp open ssh");
    }

    #[tokio::test]
    async fn scan_keeps_first_port_selector() {
        let h = harness();
        h.dispatcher
            .dispatch(request("scan", json!({ "target": "10.0.0.5", "flags": ["-p22,80", "-p1-1024"] })))
            .await;
        assert_eq!(h.scanner.calls.lock().unwrap()[0].1, vec!["-p22,80".to_string()]);
    }

    #[tokio::test]
    async fn scan_forwards_what_the_scan_policy_keeps() {
        let h = harness();
        let flags = ["-sV", "-oX", "-p80", "-Pn", "--reason", "-p443"];
        h.dispatcher
            .dispatch(request("scan", json!({ "target": "10.0.0.5", "flags": flags })))
            .await;
        let expected = flag_policy("scan").unwrap().sanitize(&flags).kept;
        assert_eq!(expected, vec!["-sV", "-p80", "-Pn"]);
        assert_eq!(h.scanner.calls.lock().unwrap()[0].1, expected);
    }

    #[tokio::test]
    async fn scan_defaults_when_nothing_survives() {
        let h = harness();
        for flags in [json!(["--script=exploit", "-oN", "/tmp/out"]), json!([]), Value::Null] {
            h.dispatcher
                .dispatch(request("scan", json!({ "target": "10.0.0.5", "flags": flags })))
                .await;
        }
        let calls = h.scanner.calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        for (_, flags) in calls.iter() {
            assert_eq!(flags, &vec!["-T4".to_string(), "-F".to_string()]);
        }
    }

    #[tokio::test]
    async fn unknown_method_touches_no_adapter() {
        let h = harness();
        let result = h
            .dispatcher
            .dispatch(request("delete_everything", json!({})))
            .await;
        assert_eq!(
            result.to_value(),
            json!({ "error": "Unknown method", "id": 42 })
        );
        assert!(h.scanner.calls.lock().unwrap().is_empty());
        assert!(h.framework.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_required_argument() {
        let h = harness();
        let result = h.dispatcher.dispatch(request("scan", json!({ "flags": ["-F"] }))).await;
        assert_eq!(
            result.error_message(),
            Some("missing required argument: target")
        );
        assert!(h.scanner.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_arguments_never_reach_adapters() {
        let h = harness();
        let cases = [
            request("scan", json!({ "target": "10.0.0.5; reboot" })),
            request("scan", json!({ "target": "-iL/etc/shadow" })),
            request("scan", json!("10.0.0.5")),
            request("msf_run_module", json!({ "module_type": "payload", "module_name": "x" })),
            request("msf_run_module", json!({
                "module_type": "auxiliary",
                "module_name": "scanner/smb/smb_version",
                "options": { "RHOSTS": "10.0.0.5\nsessions -K" },
            })),
            request("msf_run_module", json!({
                "module_type": "auxiliary",
                "module_name": "scanner/smb/smb_version",
                "options": { "RHOSTS": ["10.0.0.5"] },
            })),
            request("msf_session_command", json!({ "session_id": 1, "command": "id\nreboot" })),
        ];
        for req in cases {
            let result = h.dispatcher.dispatch(req).await;
            assert!(!result.is_success());
            assert!(result.error_message().unwrap().starts_with("invalid argument"));
        }
        assert!(h.scanner.calls.lock().unwrap().is_empty());
        assert!(h.framework.calls().is_empty());
    }

    #[tokio::test]
    async fn adapter_failure_becomes_failure_result() {
        let h = harness_with(
            FakeScanner {
                fail: true,
                ..FakeScanner::default()
            },
            FakeFramework::default(),
        );
        let result = h
            .dispatcher
            .dispatch(request("scan", json!({ "target": "10.0.0.5" })))
            .await;
        assert_eq!(
            result.error_message(),
            Some("Scan error: failed to connect to scanner at 10.0.0.2:22")
        );
        assert_eq!(h.scanner.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn search_returns_modules() {
        let h = harness();
        let result = h
            .dispatcher
            .dispatch(request("msf_search", json!({ "keyword": "vsftpd" })))
            .await;
        assert_eq!(
            result.to_value()["result"]["modules"][0]["fullname"],
            "exploit/unix/vsftpd"
        );
        assert_eq!(h.framework.calls(), vec!["search vsftpd"]);
    }

    #[tokio::test]
    async fn run_module_stringifies_scalar_options() {
        let h = harness();
        let result = h
            .dispatcher
            .dispatch(request("msf_run_module", json!({
                "module_type": "auxiliary",
                "module_name": "scanner/smb/smb_version",
                "options": { "RHOSTS": "10.0.0.5", "RPORT": 445, "VERBOSE": true },
            })))
            .await;
        assert!(result.is_success());
        assert_eq!(h.framework.calls(), vec![
            r#"run auxiliary/scanner/smb/smb_version {"RHOSTS": "10.0.0.5", "RPORT": "445", "VERBOSE": "true"}"#
        ]);
    }

    #[tokio::test]
    async fn exploit_accepts_prefixed_name() {
        let h = harness();
        let result = h
            .dispatcher
            .dispatch(request("msf_exploit", json!({
                "exploit": "exploit/unix/ftp/vsftpd_234_backdoor",
                "payload": "cmd/unix/interact",
            })))
            .await;
        assert_eq!(result.to_value()["result"], json!({ "job_id": 1, "uuid": "u1" }));
        assert_eq!(h.framework.calls(), vec![
            "exploit unix/ftp/vsftpd_234_backdoor cmd/unix/interact"
        ]);
    }

    #[tokio::test]
    async fn unknown_session_is_reported_without_write() {
        let h = harness();
        let result = h
            .dispatcher
            .dispatch(request("msf_session_command", json!({ "session_id": 7, "command": "whoami" })))
            .await;
        assert_eq!(
            result.to_value(),
            json!({ "error": "Session ID (7) not found", "id": 42 })
        );
        assert_eq!(h.framework.calls(), vec!["list"]);
    }

    #[tokio::test]
    async fn session_command_on_shell() {
        let h = harness();
        let result = h
            .dispatcher
            .dispatch(request("msf_session_command", json!({ "session_id": "1", "command": "id" })))
            .await;
        assert_eq!(result.to_value()["result"]["output"], "uid=0(root)\n");
    }

    #[tokio::test]
    async fn sessions_are_listed() {
        let h = harness();
        let result = h.dispatcher.dispatch(request("msf_sessions", Value::Null)).await;
        assert_eq!(result.to_value()["result"]["sessions"]["1"]["type"], "shell");
    }

    #[tokio::test]
    async fn id_is_echoed_verbatim() {
        let h = harness();
        let id = json!({ "trace": ["a", 1] });
        let result = h
            .dispatcher
            .invoke(InvocationRequest::new("msf_sessions", json!({}), id.clone()))
            .await;
        assert_eq!(result.to_value()["id"], id);
    }
}
