//! Permission Gate (§4.11): the pre-tool-use decision function. Fails
//! closed. Grounded on `logic/policy/engine.rs`'s top-to-bottom
//! `decide_with_config` ladder and `logic/action_guard.rs`'s
//! whitelist/cooldown checks, with the compiled-once regex list pattern
//! borrowed from `other_examples/…gatekeeper.rs`'s `once_cell::sync::Lazy`.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;

use crate::allowlist::{AllowlistStore, NetworkAllowlistStore};
use crate::config::Config;

const BLOCKED_NETWORK_SET: &[&str] = &["curl", "wget", "nc", "ssh", "scp", "rsync", "ftp", "telnet"];

static SUSPICIOUS_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\|.*curl",
        r"\|.*wget",
        r"\|.*nc\b",
        r"\|.*ssh",
        r"grep.*password",
        r"grep.*secret",
        r"grep.*key",
        r"base64",
        r"xxd",
        r"\$\(",
    ]
    .iter()
    .map(|p| Regex::new(&format!("(?i){}", p)).expect("static suspicious pattern must compile"))
    .collect()
});

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum Decision {
    Allow {
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Deny {
        reason: String,
    },
}

impl Decision {
    pub fn allow(message: impl Into<String>) -> Self {
        Decision::Allow {
            message: Some(message.into()),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Decision::Deny {
            reason: reason.into(),
        }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ToolInput {
    pub command: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
}

/// The caller-supplied approval prompt (external per §1). Returns whether
/// the user approved, and whether to remember the command on the allowlist.
#[async_trait::async_trait]
pub trait ApprovalCallback: Send + Sync {
    async fn ask(&self, description: &str, command: &str) -> (bool, bool);
}

fn is_bash_tool(tool_name: &str) -> bool {
    tool_name.to_lowercase().contains("bash")
}

fn first_token(cmd: &str) -> &str {
    cmd.split_whitespace().next().unwrap_or("")
}

fn is_suspicious(cmd: &str) -> bool {
    SUSPICIOUS_PATTERNS.iter().any(|re| re.is_match(cmd))
}

/// Serializes approval prompts (§5: "a single-slot mutex so that only one
/// user prompt is active at any time") while allowing steps 1-5 to evaluate
/// concurrently across calls.
pub struct PermissionGate {
    config: Arc<Config>,
    allowlist: Arc<AllowlistStore>,
    network_allowlist: Arc<NetworkAllowlistStore>,
    approval: Option<Arc<dyn ApprovalCallback>>,
    approval_lock: AsyncMutex<()>,
}

impl PermissionGate {
    pub fn new(
        config: Arc<Config>,
        allowlist: Arc<AllowlistStore>,
        network_allowlist: Arc<NetworkAllowlistStore>,
        approval: Option<Arc<dyn ApprovalCallback>>,
    ) -> Self {
        PermissionGate {
            config,
            allowlist,
            network_allowlist,
            approval,
            approval_lock: AsyncMutex::new(()),
        }
    }

    /// Decides whether `tool_name(tool_input)` may run. Any internal error
    /// fails closed (deny, "internal error").
    pub async fn decide(&self, tool_name: &str, tool_input: &ToolInput) -> Decision {
        match self.decide_inner(tool_name, tool_input).await {
            Ok(decision) => decision,
            Err(e) => {
                log::error!("permission gate internal error: {}", e);
                Decision::deny("internal error")
            }
        }
    }

    async fn decide_inner(
        &self,
        tool_name: &str,
        tool_input: &ToolInput,
    ) -> Result<Decision, String> {
        // Step 1
        if !is_bash_tool(tool_name) {
            return Ok(Decision::allow("non-shell tool"));
        }

        let command = tool_input
            .command
            .clone()
            .ok_or_else(|| "bash tool call missing 'command'".to_string())?;

        // Step 2
        if self.config.read_only_mode {
            return Ok(Decision::deny("bash disabled by read-only mode"));
        }

        // Step 3
        let base = first_token(&command);
        if BLOCKED_NETWORK_SET.contains(&base) {
            if !self.config.allow_network {
                return Ok(Decision::deny(format!("network command '{}' blocked", base)));
            }
            log::warn!("allowing network command '{}' (ALLOW_NETWORK=true)", base);
        }

        // Step 4
        let suspicious = is_suspicious(&command);

        // Step 5
        if !suspicious && !self.config.require_approval && self.allowlist.is_allowed(&command) {
            return Ok(Decision::allow("auto-allowed (allowlisted)"));
        }

        // Step 6
        let approval = match &self.approval {
            Some(cb) => cb.clone(),
            None => return Ok(Decision::deny("no approval callback")),
        };

        // Step 7 — serialize so only one prompt is visible at a time.
        let _permit = self.approval_lock.lock().await;
        let description = tool_input
            .description
            .clone()
            .unwrap_or_else(|| format!("run command: {}", command));
        let (approved, add_to_allowlist) = approval.ask(&description, &command).await;
        if !approved {
            return Ok(Decision::deny("user declined"));
        }
        if add_to_allowlist {
            match self.allowlist.add(&command, None) {
                Ok(()) => {
                    return Ok(Decision::allow("approved and added to allowlist"));
                }
                Err(e) => {
                    log::warn!("failed to add '{}' to allowlist: {}", command, e);
                    return Ok(Decision::allow("approved (not added to allowlist: invalid pattern)"));
                }
            }
        }
        Ok(Decision::allow("approved"))
    }

    /// Structurally identical decision procedure for network tools, keyed
    /// by hostname instead of command base.
    pub async fn decide_network(&self, tool_name: &str, tool_input: &ToolInput) -> Decision {
        match self.decide_network_inner(tool_name, tool_input).await {
            Ok(decision) => decision,
            Err(e) => {
                log::error!("permission gate internal error: {}", e);
                Decision::deny("internal error")
            }
        }
    }

    async fn decide_network_inner(
        &self,
        tool_name: &str,
        tool_input: &ToolInput,
    ) -> Result<Decision, String> {
        if !tool_name.to_lowercase().contains("fetch") && !tool_name.to_lowercase().contains("http") {
            return Ok(Decision::allow("non-network tool"));
        }
        let url = tool_input
            .url
            .clone()
            .ok_or_else(|| "network tool call missing 'url'".to_string())?;

        if !self.config.allow_network {
            return Ok(Decision::deny("network access disabled"));
        }

        let host = extract_host(&url).ok_or_else(|| format!("could not extract host from '{}'", url))?;

        if !self.config.require_approval && self.network_allowlist.is_allowed(&host) {
            return Ok(Decision::allow("auto-allowed (network allowlisted)"));
        }

        let approval = match &self.approval {
            Some(cb) => cb.clone(),
            None => return Ok(Decision::deny("no approval callback")),
        };

        let _permit = self.approval_lock.lock().await;
        let description = tool_input
            .description
            .clone()
            .unwrap_or_else(|| format!("fetch url: {}", url));
        let (approved, add_to_allowlist) = approval.ask(&description, &url).await;
        if !approved {
            return Ok(Decision::deny("user declined"));
        }
        if add_to_allowlist {
            let _ = self.network_allowlist.add(&host);
        }
        Ok(Decision::allow("approved"))
    }
}

fn extract_host(url: &str) -> Option<String> {
    let without_scheme = url.split("://").nth(1).unwrap_or(url);
    let host_and_port = without_scheme.split('/').next()?;
    let host = host_and_port.split('@').next_back()?.split(':').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct AlwaysApprove {
        add_to_allowlist: bool,
    }

    #[async_trait::async_trait]
    impl ApprovalCallback for AlwaysApprove {
        async fn ask(&self, _description: &str, _command: &str) -> (bool, bool) {
            (true, self.add_to_allowlist)
        }
    }

    struct NeverInvoked;

    #[async_trait::async_trait]
    impl ApprovalCallback for NeverInvoked {
        async fn ask(&self, _description: &str, _command: &str) -> (bool, bool) {
            panic!("approval callback must not be invoked in read-only mode");
        }
    }

    fn gate(config: Config, approval: Option<Arc<dyn ApprovalCallback>>) -> (PermissionGate, TempDir) {
        let dir = TempDir::new().unwrap();
        let allowlist = Arc::new(AllowlistStore::load(dir.path().join("allowlist.json")));
        let network_allowlist = Arc::new(NetworkAllowlistStore::load(dir.path().join("net.json")));
        (
            PermissionGate::new(Arc::new(config), allowlist, network_allowlist, approval),
            dir,
        )
    }

    fn cmd(command: &str) -> ToolInput {
        ToolInput {
            command: Some(command.to_string()),
            description: None,
            url: None,
        }
    }

    #[tokio::test]
    async fn non_bash_tools_are_always_allowed() {
        let (gate, _dir) = gate(Config::default(), None);
        let decision = gate.decide("WebSearch", &cmd("ignored")).await;
        assert!(decision.is_allow());
    }

    #[tokio::test]
    async fn read_only_mode_denies_without_invoking_callback() {
        let mut config = Config::default();
        config.read_only_mode = true;
        let (gate, _dir) = gate(config, Some(Arc::new(NeverInvoked)));
        let decision = gate.decide("Bash", &cmd("ls -la")).await;
        match decision {
            Decision::Deny { reason } => assert!(reason.contains("read-only")),
            other => panic!("expected deny, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn allowlist_auto_allows_when_approval_not_required() {
        let mut config = Config::default();
        config.read_only_mode = false;
        config.require_approval = false;
        let (gate, _dir) = gate(config, None);
        gate.allowlist.add("ps aux", Some(crate::model::AllowlistEntryType::Exact)).unwrap();
        gate.allowlist.add("top", Some(crate::model::AllowlistEntryType::Base)).unwrap();

        let decision = gate.decide("Bash", &cmd("ps aux")).await;
        assert!(decision.is_allow());
        let decision = gate.decide("Bash", &cmd("top -bn1")).await;
        assert!(decision.is_allow());
    }

    #[tokio::test]
    async fn network_command_blocked_without_allow_network() {
        let mut config = Config::default();
        config.read_only_mode = false;
        config.allow_network = false;
        let (gate, _dir) = gate(config, None);
        let decision = gate.decide("Bash", &cmd("curl https://example.com")).await;
        match decision {
            Decision::Deny { reason } => assert!(reason.contains("curl")),
            other => panic!("expected deny, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn suspicious_pattern_forces_approval_even_if_allowlisted() {
        let mut config = Config::default();
        config.read_only_mode = false;
        config.require_approval = false;
        let (gate, _dir) = gate(config, Some(Arc::new(AlwaysApprove { add_to_allowlist: false })));
        gate.allowlist
            .add("echo hi | base64", Some(crate::model::AllowlistEntryType::Exact))
            .unwrap();
        let decision = gate.decide("Bash", &cmd("echo hi | base64")).await;
        assert!(decision.is_allow());
    }

    #[tokio::test]
    async fn no_callback_denies_when_approval_required() {
        let mut config = Config::default();
        config.read_only_mode = false;
        let (gate, _dir) = gate(config, None);
        let decision = gate.decide("Bash", &cmd("rm -rf /tmp/x")).await;
        match decision {
            Decision::Deny { reason } => assert_eq!(reason, "no approval callback"),
            other => panic!("expected deny, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn approval_can_add_to_allowlist() {
        let mut config = Config::default();
        config.read_only_mode = false;
        let (gate, _dir) = gate(config, Some(Arc::new(AlwaysApprove { add_to_allowlist: true })));
        let decision = gate.decide("Bash", &cmd("ls -la /tmp")).await;
        assert!(decision.is_allow());
        assert!(gate.allowlist.is_allowed("ls -la /tmp"));
    }

    #[test]
    fn extract_host_strips_scheme_path_and_port() {
        assert_eq!(extract_host("https://example.com/foo").unwrap(), "example.com");
        assert_eq!(extract_host("http://example.com:8080/").unwrap(), "example.com");
        assert_eq!(extract_host("user@host.com").unwrap(), "host.com");
    }
}
