//! Device command vocabulary and argument validation.
//!
//! A generated reply may carry one command for the client device to execute.
//! The registry is the allowlist: unknown commands, disabled commands, and
//! malformed arguments all degrade the turn to text-only rather than failing
//! it.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArgKind {
    String,
    /// Integer restricted to an inclusive range.
    IntRange(i64, i64),
}

#[derive(Debug, Clone)]
struct CommandSpec {
    name: &'static str,
    args: &'static [(&'static str, ArgKind)],
}

const COMMAND_SPECS: &[CommandSpec] = &[
    CommandSpec {
        name: "open_app",
        args: &[("app", ArgKind::String)],
    },
    CommandSpec {
        name: "send_message",
        args: &[("recipient", ArgKind::String), ("body", ArgKind::String)],
    },
    CommandSpec {
        name: "set_volume",
        args: &[("level", ArgKind::IntRange(0, 100))],
    },
    CommandSpec {
        name: "stop_listening",
        args: &[],
    },
];

/// A validated command ready to be forwarded to the device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceCommand {
    pub command: String,
    pub args: Value,
}

/// Allowlist of device commands, filtered by configuration.
pub struct CommandRegistry {
    enabled: Vec<String>,
}

impl CommandRegistry {
    /// `enabled` names the permitted subset; an empty list permits all
    /// known commands.
    pub fn new(enabled: &[String]) -> Self {
        for name in enabled {
            if !COMMAND_SPECS.iter().any(|s| s.name == name) {
                warn!(command = %name, "Enabled command is not in the known vocabulary");
            }
        }
        Self {
            enabled: enabled.to_vec(),
        }
    }

    pub fn known_commands(&self) -> Vec<&'static str> {
        COMMAND_SPECS.iter().map(|s| s.name).collect()
    }

    fn is_enabled(&self, name: &str) -> bool {
        self.enabled.is_empty() || self.enabled.iter().any(|e| e == name)
    }

    /// Validate a raw `command`/`args` pair from a parsed reply. Returns
    /// `None` (with a log line) for anything the device must not receive.
    pub fn validate(&self, command: &str, args: &Value) -> Option<DeviceCommand> {
        let spec = match COMMAND_SPECS.iter().find(|s| s.name == command) {
            Some(spec) => spec,
            None => {
                warn!(command, "Dropping unknown command from generated reply");
                return None;
            }
        };
        if !self.is_enabled(command) {
            warn!(command, "Dropping command disabled by configuration");
            return None;
        }

        let supplied = match args {
            Value::Object(map) => map.clone(),
            Value::Null if spec.args.is_empty() => Default::default(),
            _ => {
                warn!(command, "Dropping command with non-object arguments");
                return None;
            }
        };

        let mut validated = BTreeMap::new();
        for (arg_name, kind) in spec.args {
            let value = match supplied.get(*arg_name) {
                Some(v) => v,
                None => {
                    warn!(command, arg = arg_name, "Dropping command missing required argument");
                    return None;
                }
            };
            match kind {
                ArgKind::String => match value.as_str() {
                    Some(s) if !s.trim().is_empty() => {
                        validated.insert(arg_name.to_string(), Value::String(s.to_string()));
                    }
                    _ => {
                        warn!(command, arg = arg_name, "Dropping command with invalid string argument");
                        return None;
                    }
                },
                ArgKind::IntRange(min, max) => match value.as_i64() {
                    Some(n) if n >= *min && n <= *max => {
                        validated.insert(arg_name.to_string(), Value::from(n));
                    }
                    _ => {
                        warn!(command, arg = arg_name, "Dropping command with out-of-range argument");
                        return None;
                    }
                },
            }
        }

        Some(DeviceCommand {
            command: command.to_string(),
            args: Value::Object(validated.into_iter().collect()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn all_enabled() -> CommandRegistry {
        CommandRegistry::new(&[])
    }

    #[test]
    fn test_valid_open_app() {
        let cmd = all_enabled()
            .validate("open_app", &json!({"app": "calendar"}))
            .unwrap();
        assert_eq!(cmd.command, "open_app");
        assert_eq!(cmd.args, json!({"app": "calendar"}));
    }

    #[test]
    fn test_unknown_command_dropped() {
        assert!(all_enabled().validate("reboot", &json!({})).is_none());
    }

    #[test]
    fn test_disabled_command_dropped() {
        let registry = CommandRegistry::new(&["open_app".to_string()]);
        assert!(registry.validate("set_volume", &json!({"level": 5})).is_none());
        assert!(registry.validate("open_app", &json!({"app": "mail"})).is_some());
    }

    #[test]
    fn test_missing_argument_dropped() {
        assert!(all_enabled().validate("send_message", &json!({"recipient": "sam"})).is_none());
    }

    #[test]
    fn test_volume_range_enforced() {
        let registry = all_enabled();
        assert!(registry.validate("set_volume", &json!({"level": 101})).is_none());
        assert!(registry.validate("set_volume", &json!({"level": -1})).is_none());
        assert!(registry.validate("set_volume", &json!({"level": "loud"})).is_none());
        assert!(registry.validate("set_volume", &json!({"level": 100})).is_some());
    }

    #[test]
    fn test_no_arg_command_accepts_null_args() {
        let cmd = all_enabled().validate("stop_listening", &Value::Null).unwrap();
        assert_eq!(cmd.args, json!({}));
    }

    #[test]
    fn test_extra_arguments_are_stripped() {
        let cmd = all_enabled()
            .validate("open_app", &json!({"app": "mail", "mode": "dark"}))
            .unwrap();
        assert_eq!(cmd.args, json!({"app": "mail"}));
    }

    #[test]
    fn test_blank_string_argument_dropped() {
        assert!(all_enabled().validate("open_app", &json!({"app": "  "})).is_none());
    }
}
