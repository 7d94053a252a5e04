//! Ambient operability reporting: which chunker families are actually
//! usable given the current environment (credentials present, binaries on
//! `PATH`). Read-only; never gates ingest, only informs `ragweave-cli`'s
//! `init`/`ingest` preflight output.

use std::process::Command;

use crate::config::Config;
use crate::gateway::{CredentialStatus, LlmGateway};

#[derive(Debug, Clone, PartialEq)]
pub struct FamilyStatus {
    pub family: &'static str,
    pub usable: bool,
    pub detail: Option<String>,
}

fn binary_on_path(name: &str) -> bool {
    std::env::var_os("PATH")
        .map(|paths| {
            std::env::split_paths(&paths).any(|dir| dir.join(name).is_file())
        })
        .unwrap_or(false)
}

/// Checks the vcs chunker's `git` dependency and the presence of the
/// private-clone credential variable, without making any network call.
fn vcs_status() -> FamilyStatus {
    if !binary_on_path("git") {
        return FamilyStatus {
            family: "vcs",
            usable: false,
            detail: Some("git binary not found on PATH".to_string()),
        };
    }
    let has_token = std::env::var("RAGWEAVE_VCS_TOKEN").is_ok();
    FamilyStatus {
        family: "vcs",
        usable: true,
        detail: if has_token {
            None
        } else {
            Some("RAGWEAVE_VCS_TOKEN not set; only public repositories are reachable".to_string())
        },
    }
}

fn gateway_backed_status(family: &'static str, gateway: &dyn LlmGateway, model: &str) -> FamilyStatus {
    match gateway.validate_credentials(model) {
        CredentialStatus::Ok => FamilyStatus { family, usable: true, detail: None },
        CredentialStatus::Missing { env_var } => FamilyStatus {
            family,
            usable: false,
            detail: Some(format!("missing credential: {env_var}")),
        },
    }
}

/// Reports usability for every chunker family: structural families (text,
/// markdown, pdf, epub, json) are always usable; network/credentialed
/// families (vcs, web, audio) are checked against the environment and the
/// Gateway's credential validation.
pub fn report(config: &Config, gateway: &dyn LlmGateway) -> Vec<FamilyStatus> {
    let always_usable = ["markdown", "pdf", "epub", "text", "json"];
    let mut statuses: Vec<FamilyStatus> = always_usable
        .iter()
        .map(|family| FamilyStatus { family, usable: true, detail: None })
        .collect();

    statuses.push(vcs_status());
    statuses.push(FamilyStatus { family: "web", usable: true, detail: None });
    statuses.push(gateway_backed_status("audio", gateway, &config.embedding.model));

    statuses
}

/// Invokes `git --version` purely to confirm the binary actually runs (not
/// just present on `PATH`); used by `ragweave-cli init` diagnostics, not by
/// the orchestrator's hot path.
pub fn probe_git_binary() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_on_path_finds_a_real_shell_builtin() {
        assert!(binary_on_path("sh") || binary_on_path("bash"));
    }

    #[test]
    fn binary_on_path_rejects_nonexistent_name() {
        assert!(!binary_on_path("definitely-not-a-real-binary-name"));
    }
}
