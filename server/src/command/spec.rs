//! Whitelist of commands remote callers may run by name

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WhitelistError {
    #[error("cannot read {}: {}", .path.display(), .source)]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse whitelist: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("no commands parsed")]
    EmptyWhitelist,

    #[error("duplicate command name found: {0}")]
    DuplicateName(String),

    #[error("command {name} uses relative path {path}")]
    RelativePath { name: String, path: String },

    #[error("command {0} has an empty exec list")]
    EmptyExec(String),

    #[error("command not found: {0}")]
    NotFound(String),
}

/// A command the agent can run
///
/// `name` is only an alias, for example `lxc-ls`. `exec` is the argv prefix:
/// the absolute executable path followed by fixed leading arguments, for
/// example `["/usr/bin/lxc-ls", "--active"]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub name: String,
    pub exec: Vec<String>,
}

impl CommandSpec {
    pub fn new(name: impl Into<String>, exec: Vec<String>) -> Self {
        Self {
            name: name.into(),
            exec,
        }
    }

    /// The executable path, `exec[0]`
    pub fn path(&self) -> &str {
        self.exec.first().map(String::as_str).unwrap_or_default()
    }

    /// The fixed arguments, `exec[1..]`
    pub fn args(&self) -> &[String] {
        self.exec.get(1..).unwrap_or_default()
    }

    fn validate(&self) -> Result<(), WhitelistError> {
        if self.exec.is_empty() {
            return Err(WhitelistError::EmptyExec(self.name.clone()));
        }
        if !Path::new(self.path()).is_absolute() {
            return Err(WhitelistError::RelativePath {
                name: self.name.clone(),
                path: self.path().to_string(),
            });
        }
        Ok(())
    }
}

/// YAML layout of a whitelist file:
///
/// ```yaml
/// commands:
///   - name: exit.zero
///     exec: [/bin/true]
///   - name: ls-tmp
///     exec:
///       - /bin/ls
///       - /tmp
/// ```
#[derive(Deserialize)]
struct SpecFile {
    #[serde(default)]
    commands: Option<Vec<CommandSpec>>,
}

/// Ordered, validated, immutable list of command specs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Whitelist {
    commands: Vec<CommandSpec>,
}

impl Whitelist {
    /// Validate and wrap a list of specs
    ///
    /// Fails on an empty list, on a name used twice and on any entry whose
    /// executable is not an absolute path.
    pub fn new(commands: Vec<CommandSpec>) -> Result<Self, WhitelistError> {
        if commands.is_empty() {
            return Err(WhitelistError::EmptyWhitelist);
        }

        let mut names = HashSet::new();
        for spec in &commands {
            if !names.insert(spec.name.as_str()) {
                return Err(WhitelistError::DuplicateName(spec.name.clone()));
            }
        }

        for spec in &commands {
            spec.validate()?;
        }

        Ok(Self { commands })
    }

    pub fn from_yaml(source: &str) -> Result<Self, WhitelistError> {
        let file: SpecFile = serde_yaml::from_str(source)?;
        Self::new(file.commands.unwrap_or_default())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, WhitelistError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| WhitelistError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&source)
    }

    pub fn find_by_name(&self, name: &str) -> Result<&CommandSpec, WhitelistError> {
        self.commands
            .iter()
            .find(|spec| spec.name == name)
            .ok_or_else(|| WhitelistError::NotFound(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &CommandSpec> {
        self.commands.iter()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Load a whitelist file from disk
pub fn load_whitelist(path: impl AsRef<Path>) -> Result<Whitelist, WhitelistError> {
    Whitelist::load(path)
}
