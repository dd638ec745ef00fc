use std::{
    io::Read,
    net::{TcpStream, ToSocketAddrs},
    path::{Path, PathBuf},
    time::Duration,
};

use {
    anyhow::{Context, Result, anyhow, bail},
    async_trait::async_trait,
    kestrel_config::ScannerConfig,
    ssh2::Session,
    tracing::{debug, info},
};

const MAX_OUTPUT_BYTES: usize = 200 * 1024;

/// Runs the port scanner. Callers pass flags that already went through the
/// scan flag policy.
#[async_trait]
pub trait ScanAdapter: Send + Sync {
    async fn scan(&self, target: &str, flags: &[String]) -> Result<String>;
}

/// Runs the scanner binary on a remote host over SSH with public-key auth.
#[derive(Debug, Clone)]
pub struct SshScanner {
    host: String,
    port: u16,
    user: String,
    key_file: PathBuf,
    binary: String,
    timeout: Duration,
}

impl SshScanner {
    pub fn from_config(cfg: &ScannerConfig) -> Self {
        Self {
            host: cfg.host.clone(),
            port: cfg.port,
            user: cfg.user.clone(),
            key_file: expand_home(&cfg.key_file),
            binary: cfg.binary.clone(),
            timeout: Duration::from_secs(cfg.timeout_secs),
        }
    }

    /// The remote command line, each word shell-quoted.
    pub fn command_line(&self, target: &str, flags: &[String]) -> String {
        let words = std::iter::once(self.binary.as_str())
            .chain(flags.iter().map(String::as_str))
            .chain(std::iter::once(target));
        shell_words::join(words)
    }

    fn connect(&self) -> Result<Session> {
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .with_context(|| format!("cannot resolve scanner host {}", self.host))?
            .next()
            .ok_or_else(|| anyhow!("scanner host {} has no address", self.host))?;

        let tcp = TcpStream::connect_timeout(&addr, self.timeout)
            .with_context(|| format!("failed to connect to scanner at {addr}"))?;
        tcp.set_read_timeout(Some(self.timeout))?;
        tcp.set_write_timeout(Some(self.timeout))?;

        let mut sess = Session::new().context("failed to create SSH session")?;
        sess.set_tcp_stream(tcp);
        sess.set_timeout(u32::try_from(self.timeout.as_millis()).unwrap_or(u32::MAX));
        sess.handshake().context("SSH handshake failed")?;

        sess.userauth_pubkey_file(&self.user, None, &self.key_file, None)
            .with_context(|| {
                format!(
                    "SSH key authentication failed for {}@{} ({})",
                    self.user,
                    self.host,
                    self.key_file.display()
                )
            })?;
        if !sess.authenticated() {
            bail!("SSH authentication failed for {}@{}", self.user, self.host);
        }
        Ok(sess)
    }

    fn run(&self, command: &str) -> Result<String> {
        let sess = self.connect()?;
        let mut channel = sess.channel_session().context("failed to open SSH channel")?;
        channel.exec(command).context("failed to start scan")?;

        let mut stdout = String::new();
        channel
            .read_to_string(&mut stdout)
            .context("failed to read scan output")?;
        let mut stderr = String::new();
        channel
            .stderr()
            .read_to_string(&mut stderr)
            .context("failed to read scan errors")?;
        channel.wait_close().context("failed to close SSH channel")?;
        let exit_status = channel.exit_status()?;

        debug!(
            exit_status,
            stdout_len = stdout.len(),
            stderr_len = stderr.len(),
            "scan finished"
        );
        if exit_status != 0 || (stdout.trim().is_empty() && !stderr.trim().is_empty()) {
            bail!("scanner exited with status {exit_status}: {}", stderr.trim());
        }
        Ok(truncate_output(stdout, MAX_OUTPUT_BYTES))
    }
}

#[async_trait]
impl ScanAdapter for SshScanner {
    async fn scan(&self, target: &str, flags: &[String]) -> Result<String> {
        let command = self.command_line(target, flags);
        info!(host = %self.host, %command, "running remote scan");
        let scanner = self.clone();
        tokio::task::spawn_blocking(move || scanner.run(&command))
            .await
            .context("scan task panicked")?
    }
}

/// Resolve a leading `~` against the current user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match directories::BaseDirs::new() {
        Some(dirs) => dirs.home_dir().join(rest),
        None => path.to_path_buf(),
    }
}

fn truncate_output(mut text: String, max: usize) -> String {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
    text.push_str("\n... [output truncated]");
    text
}
