use pulse_common::types::{CommandStatus, DeviceCommand};
use serde::Serialize;
use std::collections::HashMap;

/// Snapshot of agent state handed to command handlers.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub version: String,
    pub uptime_secs: u64,
    pub collectors: Vec<String>,
    pub cycles: u64,
}

type Handler = Box<dyn Fn(&AgentStatus) -> anyhow::Result<String> + Send + Sync>;

/// Maps command names to handlers.
pub struct CommandRegistry {
    handlers: HashMap<String, Handler>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl CommandRegistry {
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry with `ping` and `status`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("ping", |_| Ok("pong".to_string()));
        registry.register("status", |status| Ok(serde_json::to_string(status)?));
        registry
    }

    pub fn register<F>(&mut self, name: &str, handler: F)
    where
        F: Fn(&AgentStatus) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        self.handlers.insert(name.to_string(), Box::new(handler));
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Runs the handler for `command` and returns the terminal status and
    /// response to report.
    pub fn dispatch(&self, command: &DeviceCommand, status: &AgentStatus) -> (CommandStatus, String) {
        let name = command.command.trim();
        let Some(handler) = self.handlers.get(name) else {
            return (CommandStatus::Failed, format!("Unknown command: {name}"));
        };
        match handler(status) {
            Ok(response) => (CommandStatus::Completed, response),
            Err(e) => (CommandStatus::Failed, e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn command(name: &str) -> DeviceCommand {
        DeviceCommand {
            id: "1".to_string(),
            source_id: "device_1".to_string(),
            command: name.to_string(),
            status: CommandStatus::Pending,
            created_at: Utc::now(),
            executed_at: None,
            response: None,
        }
    }

    fn status() -> AgentStatus {
        AgentStatus {
            version: "0.1.0".to_string(),
            uptime_secs: 12,
            collectors: vec!["device_1/system_metrics".to_string()],
            cycles: 3,
        }
    }

    #[test]
    fn builtins_answer() {
        let registry = CommandRegistry::with_builtins();
        assert_eq!(registry.names(), vec!["ping", "status"]);

        let (s, resp) = registry.dispatch(&command("ping"), &status());
        assert_eq!(s, CommandStatus::Completed);
        assert_eq!(resp, "pong");

        let (s, resp) = registry.dispatch(&command("status"), &status());
        assert_eq!(s, CommandStatus::Completed);
        let json: serde_json::Value = serde_json::from_str(&resp).unwrap();
        assert_eq!(json["cycles"], 3);
        assert_eq!(json["collectors"][0], "device_1/system_metrics");
    }

    #[test]
    fn unknown_command_fails_with_name() {
        let registry = CommandRegistry::with_builtins();
        let (s, resp) = registry.dispatch(&command("reboot"), &status());
        assert_eq!(s, CommandStatus::Failed);
        assert_eq!(resp, "Unknown command: reboot");
    }

    #[test]
    fn handler_error_fails_with_message() {
        let mut registry = CommandRegistry::empty();
        registry.register("flush", |_| anyhow::bail!("disk not mounted"));
        let (s, resp) = registry.dispatch(&command("flush"), &status());
        assert_eq!(s, CommandStatus::Failed);
        assert_eq!(resp, "disk not mounted");
    }
}
