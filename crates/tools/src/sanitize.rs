//! Whitelist filtering for model-supplied values that end up on a remote
//! command line or an interactive console.

/// Flags used when filtering leaves nothing to forward.
pub const DEFAULT_SCAN_FLAGS: &[&str] = &["-T4", "-F"];

const MAX_PORT_SELECTOR_LEN: usize = 64;
const MAX_TARGET_LEN: usize = 253;
const MAX_IDENTIFIER_LEN: usize = 256;

/// Exact-match whitelist plus an optional structural port-selector rule.
#[derive(Debug)]
pub struct FlagPolicy {
    allowed: &'static [&'static str],
    port_selectors: bool,
}

pub static SCAN_FLAG_POLICY: FlagPolicy = FlagPolicy {
    allowed: &["-T4", "-F", "-O", "-sV", "-sC", "-sU", "-p-", "-Pn", "-n"],
    port_selectors: true,
};

/// Policy for a capability's free-form flag list, if it has one.
pub fn flag_policy(capability: &str) -> Option<&'static FlagPolicy> {
    match capability {
        "scan" => Some(&SCAN_FLAG_POLICY),
        _ => None,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SanitizedFlags {
    /// Tokens safe to forward, in input order.
    pub kept: Vec<String>,
    /// Dropped tokens, in input order.
    pub rejected: Vec<String>,
}

impl SanitizedFlags {
    pub fn any_rejected(&self) -> bool {
        !self.rejected.is_empty()
    }
}

impl FlagPolicy {
    pub fn allows(&self, token: &str) -> bool {
        self.allowed.contains(&token) || (self.port_selectors && is_port_selector(token))
    }

    /// Order-preserving filter. Only the first port selector survives.
    pub fn sanitize<S: AsRef<str>>(&self, tokens: &[S]) -> SanitizedFlags {
        let mut out = SanitizedFlags::default();
        let mut port_seen = false;
        for token in tokens.iter().map(AsRef::as_ref) {
            let mut keep = self.allows(token);
            if keep && is_port_selector(token) {
                keep = !port_seen;
                port_seen = true;
            }
            if keep {
                out.kept.push(token.to_string());
            } else {
                out.rejected.push(token.to_string());
            }
        }
        out
    }
}

/// `-p-`, or `-p` followed by a comma list of `N` / `N-M` items with every
/// port in `[0, 65535]`.
pub fn is_port_selector(token: &str) -> bool {
    if token == "-p-" {
        return true;
    }
    let Some(list) = token.strip_prefix("-p") else {
        return false;
    };
    if list.is_empty() || token.len() > MAX_PORT_SELECTOR_LEN {
        return false;
    }
    list.split(',').all(|item| match item.split_once('-') {
        Some((lo, hi)) => matches!((parse_port(lo), parse_port(hi)), (Some(lo), Some(hi)) if lo <= hi),
        None => parse_port(item).is_some(),
    })
}

fn parse_port(s: &str) -> Option<u16> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

// ── Scalar values ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
    #[error("must not be empty")]
    Empty,
    #[error("is longer than {0} bytes")]
    TooLong(usize),
    #[error("must not start with '-'")]
    LeadingDash,
    #[error("contains forbidden character {0:?}")]
    ForbiddenChar(char),
    #[error("must be a single line")]
    MultiLine,
}

/// Host, address or CIDR handed to the scanner. It lands on a shell command
/// line, so only a conservative character set passes.
pub fn validate_target(target: &str) -> Result<(), ValueError> {
    check_token(target, MAX_TARGET_LEN, |c| {
        c.is_ascii_alphanumeric() || matches!(c, '.' | ':' | '/' | '_' | '-')
    })
}

/// Module names, module types and option keys.
pub fn validate_identifier(value: &str) -> Result<(), ValueError> {
    check_token(value, MAX_IDENTIFIER_LEN, |c| {
        c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '/' | '-')
    })
}

/// Option values and session commands: anything on one line.
pub fn validate_console_value(value: &str) -> Result<(), ValueError> {
    if value.contains(['\n', '\r', '\0']) {
        return Err(ValueError::MultiLine);
    }
    Ok(())
}

fn check_token(value: &str, max: usize, allowed: impl Fn(char) -> bool) -> Result<(), ValueError> {
    if value.is_empty() {
        return Err(ValueError::Empty);
    }
    if value.len() > max {
        return Err(ValueError::TooLong(max));
    }
    if value.starts_with('-') {
        return Err(ValueError::LeadingDash);
    }
    match value.chars().find(|c| !allowed(*c)) {
        Some(c) => Err(ValueError::ForbiddenChar(c)),
        None => Ok(()),
    }
}
