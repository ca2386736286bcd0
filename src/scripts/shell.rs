//! Shell script assets and their comment-block header.
//!
//! A script describes itself in its leading `#` comment block:
//!
//! ```text
//! #!/bin/sh
//! # Description: Fill /tmp until the service notices
//! # Dependencies: dd, rm
//! # Experiment type: Resource
//! # Health check: test -z "$(ls /tmp/chaos-fill-* 2>/dev/null)"
//! # Self healing: rm -f /tmp/chaos-fill-*
//! # Finalize command: rm -f /tmp/chaos-fill-*
//! dd if=/dev/zero of=/tmp/chaos-fill-1 bs=1M count=512
//! ```
//!
//! A script with neither a health check nor a self-healing command can only
//! run against disposable containers, where recycling replaces both. Declaring
//! exactly one of the two is a formatting error.

#![allow(missing_docs)]

use std::collections::BTreeSet;

use regex::Regex;
use serde::Serialize;

use crate::core::errors::{ChaosError, Result};
use crate::experiment::state::ExperimentType;

const NO_DESCRIPTION: &str = "No description provided";

/// A parsed shell script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShellScript {
    pub name: String,
    pub description: String,
    pub experiment_type: ExperimentType,
    pub dependencies: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shebang: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check_command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub self_healing_command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finalize_command: Option<String>,
    pub requires_cattle: bool,
    #[serde(skip)]
    pub contents: String,
}

impl ShellScript {
    /// Parse a script's header from its full contents.
    pub fn parse(name: &str, contents: &str) -> Result<Self> {
        let field = Regex::new(r"^#\s*([A-Za-z ]+?)\s*:\s*(.*?)\s*$").map_err(|err| {
            ChaosError::ScriptParse {
                script: name.to_string(),
                details: format!("header pattern: {err}"),
            }
        })?;

        let comment_block: Vec<&str> = contents
            .lines()
            .take_while(|line| is_commented_line(line))
            .collect();

        let header = |key: &str| -> Option<String> {
            comment_block.iter().find_map(|line| {
                let caps = field.captures(line)?;
                let found = caps.get(1)?.as_str();
                if found.eq_ignore_ascii_case(key) {
                    Some(caps.get(2)?.as_str().to_string()).filter(|v| !v.is_empty())
                } else {
                    None
                }
            })
        };

        let shebang = contents
            .lines()
            .next()
            .and_then(|first| first.strip_prefix("#!"))
            .map(|rest| rest.trim().to_string())
            .filter(|rest| !rest.is_empty());

        let mut dependencies: BTreeSet<String> = match header("Dependencies") {
            Some(list) => list
                .split(',')
                .map(strip_non_alphanumeric_ends)
                .filter(|dep| !dep.is_empty())
                .map(str::to_string)
                .collect(),
            None => contents
                .lines()
                .filter(|line| !is_commented_line(line))
                .map(strip_non_alphanumeric_ends)
                .filter(|line| !line.is_empty())
                .filter_map(|line| line.split_whitespace().next())
                .map(strip_non_alphanumeric_ends)
                .filter(|dep| !dep.is_empty())
                .map(str::to_string)
                .collect(),
        };
        if let Some(interpreter) = shebang.as_deref().and_then(interpreter_name) {
            dependencies.insert(interpreter);
        }

        let health_check_command = header("Health check");
        let self_healing_command = header("Self healing");
        let requires_cattle = match (&health_check_command, &self_healing_command) {
            (None, None) => true,
            (Some(_), Some(_)) => false,
            _ => {
                return Err(ChaosError::ScriptParse {
                    script: name.to_string(),
                    details: "health check and self healing must be declared together"
                        .to_string(),
                });
            }
        };

        let experiment_type = match header("Experiment type") {
            Some(raw) => raw.parse::<ExperimentType>().unwrap_or_else(|_| {
                eprintln!(
                    "[CHX-SCRIPT] {name}: unknown experiment type {raw:?}, defaulting to STATE"
                );
                ExperimentType::State
            }),
            None => ExperimentType::State,
        };

        Ok(Self {
            name: name.to_string(),
            description: header("Description").unwrap_or_else(|| NO_DESCRIPTION.to_string()),
            experiment_type,
            dependencies,
            shebang,
            health_check_command,
            self_healing_command,
            finalize_command: header("Finalize command"),
            requires_cattle,
            contents: contents.to_string(),
        })
    }

    /// True when none of this script's dependencies are in `missing`.
    #[must_use]
    pub fn does_not_use_missing_dependencies(&self, missing: &BTreeSet<String>) -> bool {
        self.dependencies.is_disjoint(missing)
    }

    /// Program used to execute the script body.
    #[must_use]
    pub fn interpreter(&self) -> &str {
        self.shebang.as_deref().unwrap_or("/bin/sh")
    }
}

fn is_commented_line(line: &str) -> bool {
    line.trim_start().starts_with('#')
}

fn strip_non_alphanumeric_ends(raw: &str) -> &str {
    raw.trim_matches(|c: char| !c.is_ascii_alphanumeric())
}

/// `/usr/bin/env bash` -> `bash`, `/bin/sh -e` -> `sh`.
fn interpreter_name(shebang: &str) -> Option<String> {
    let mut words = shebang.split_whitespace();
    let program = words.next()?;
    let program = if program.ends_with("/env") {
        words.next()?
    } else {
        program
    };
    program
        .rsplit('/')
        .next()
        .map(str::to_string)
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PET_SCRIPT: &str = "#!/bin/bash\n\
        # Description: Stop the web service\n\
        # Dependencies: systemctl, pgrep\n\
        # Experiment type: State\n\
        # Health check: systemctl is-active web\n\
        # Self healing: systemctl start web\n\
        # Finalize command: systemctl reset-failed web\n\
        systemctl stop web\n";

    #[test]
    fn parses_full_header() {
        let script = ShellScript::parse("stop-web.sh", PET_SCRIPT).unwrap();
        assert_eq!(script.description, "Stop the web service");
        assert_eq!(script.experiment_type, ExperimentType::State);
        assert_eq!(
            script.health_check_command.as_deref(),
            Some("systemctl is-active web")
        );
        assert_eq!(
            script.self_healing_command.as_deref(),
            Some("systemctl start web")
        );
        assert_eq!(
            script.finalize_command.as_deref(),
            Some("systemctl reset-failed web")
        );
        assert!(!script.requires_cattle);
        let deps: Vec<&str> = script.dependencies.iter().map(String::as_str).collect();
        assert_eq!(deps, vec!["bash", "pgrep", "systemctl"]);
    }

    #[test]
    fn dependencies_default_to_first_word_of_each_command() {
        let contents = "#!/usr/bin/env sh\n# Description: burn cpu\n\nyes > /dev/null &\nsleep 60\n";
        let script = ShellScript::parse("burn.sh", contents).unwrap();
        let deps: Vec<&str> = script.dependencies.iter().map(String::as_str).collect();
        assert_eq!(deps, vec!["sh", "sleep", "yes"]);
        assert!(script.requires_cattle);
    }

    #[test]
    fn lone_health_check_is_rejected() {
        let contents = "# Health check: true\nreboot\n";
        let err = ShellScript::parse("bad.sh", contents).unwrap_err();
        assert_eq!(err.code(), "CHX-1101");
        assert!(err.to_string().contains("bad.sh"));
    }

    #[test]
    fn unknown_experiment_type_defaults_to_state() {
        let contents = "# Experiment type: Cosmic\nreboot\n";
        let script = ShellScript::parse("cosmic.sh", contents).unwrap();
        assert_eq!(script.experiment_type, ExperimentType::State);
        assert_eq!(script.description, NO_DESCRIPTION);
    }

    #[test]
    fn missing_dependency_filter() {
        let script = ShellScript::parse("stop-web.sh", PET_SCRIPT).unwrap();
        let mut missing = BTreeSet::new();
        missing.insert("tc".to_string());
        assert!(script.does_not_use_missing_dependencies(&missing));
        missing.insert("pgrep".to_string());
        assert!(!script.does_not_use_missing_dependencies(&missing));
    }

    #[test]
    fn interpreter_falls_back_to_sh() {
        let script = ShellScript::parse("plain.sh", "reboot\n").unwrap();
        assert_eq!(script.interpreter(), "/bin/sh");
        assert!(script.shebang.is_none());
    }
}
