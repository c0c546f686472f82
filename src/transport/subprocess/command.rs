//! CLI command building logic for subprocess transport

use std::collections::HashMap;
use std::env;

use tokio::process::Command;

use super::config::{AgentLaunch, DANGEROUS_ENV_VARS, ENTRYPOINT};

/// Command builder for the agent CLI
pub struct CommandBuilder<'a> {
    launch: &'a AgentLaunch,
}

impl<'a> CommandBuilder<'a> {
    /// Create a new command builder
    pub fn new(launch: &'a AgentLaunch) -> Self {
        Self { launch }
    }

    /// Argument vector after the executable
    pub fn args(&self) -> Vec<String> {
        let mut args = self.launch.prefix_args.clone();

        // Base arguments
        args.extend(
            [
                "--print",
                "--output-format",
                "stream-json",
                "--input-format",
                "stream-json",
                "--verbose",
            ]
            .map(str::to_string),
        );

        self.add_session_args(&mut args);

        if self.launch.skip_permissions {
            args.push("--dangerously-skip-permissions".to_string());
        }

        args
    }

    /// Environment for the child: inherited minus the dangerous list
    pub fn env(&self) -> HashMap<String, String> {
        let mut process_env: HashMap<String, String> = env::vars()
            .filter(|(key, _)| !DANGEROUS_ENV_VARS.contains(&key.as_str()))
            .collect();
        process_env.insert("CLAUDE_CODE_ENTRYPOINT".to_string(), ENTRYPOINT.to_string());
        process_env.insert(
            "PWD".to_string(),
            self.launch.working_directory.to_string_lossy().to_string(),
        );
        process_env
    }

    /// Build the complete CLI command
    pub fn build(&self) -> Command {
        let mut cmd = Command::new(&self.launch.cli_path);
        cmd.args(self.args())
            .env_clear()
            .envs(self.env())
            .current_dir(&self.launch.working_directory);
        cmd
    }

    /// Add session-related arguments
    fn add_session_args(&self, args: &mut Vec<String>) {
        if let Some(ref agent_session_id) = self.launch.resume {
            args.push("--resume".to_string());
            args.push(agent_session_id.clone());
        }
    }
}
