//! Activation tool invocations.

use std::fmt;

/// One invocation of the activation tool: `<tool> connection up|down <name>`.
///
/// Runners execute `program` with `args` directly; the command line is only
/// rendered (with shell quoting) for logs and error messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolCommand {
    /// `<tool> connection up <name>`
    pub fn up(tool: &str, name: &str) -> Self {
        Self::connection(tool, "up", name)
    }

    /// `<tool> connection down <name>`
    pub fn down(tool: &str, name: &str) -> Self {
        Self::connection(tool, "down", name)
    }

    fn connection(tool: &str, verb: &str, name: &str) -> Self {
        Self {
            program: tool.to_string(),
            args: vec!["connection".to_string(), verb.to_string(), name.to_string()],
        }
    }

    /// Program followed by its arguments.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&shell_quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", shell_quote(arg))?;
        }
        Ok(())
    }
}

/// Quote `arg` as a single POSIX shell word.
///
/// Plain words are left alone; anything else is wrapped in single quotes
/// with embedded quotes written as `'\''`.
pub fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:@%+=,".contains(c));
    if plain {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}
