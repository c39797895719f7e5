//! Configuration sources.
//!
//! Every source answers the same question: given the declared options, which
//! values do you define? The answer is a partial object mirroring the
//! namespace tree, containing only the keys the source recognizes.

use super::error::ConfigError;
use super::option::OptionType;
use async_trait::async_trait;
use clap::error::{ContextKind, ContextValue, ErrorKind};
use clap::parser::ValueSource as ArgValueSource;
use clap::{Arg, ArgAction, ArgMatches, Command};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Description of a declared option handed to sources.
#[derive(Debug, Clone)]
pub struct OptionSpec {
    /// Dotted path, e.g. `mock.routes.delay`.
    pub path: String,
    pub segments: Vec<String>,
    pub kind: OptionType,
    pub description: String,
    /// Environment variable holding a value for this option.
    pub env_var: String,
}

/// A provider of partial option values.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Name used in logs and error messages.
    fn name(&self) -> &str;

    /// Read the values this source defines. `allow_unknown` tells sources
    /// that validate their own input (command-line parsing) to skip keys
    /// they do not recognize instead of failing.
    async fn read(&self, specs: &[OptionSpec], allow_unknown: bool) -> Result<Value, ConfigError>;
}

/// Build the environment variable name for an option path:
/// `MOCKS` + `mock.routes.delay` → `MOCKS_MOCK_ROUTES_DELAY`.
pub fn env_var_name(prefix: &str, segments: &[String]) -> String {
    let mut name = prefix.to_ascii_uppercase();
    for segment in segments {
        name.push('_');
        let mut previous_lower = false;
        for ch in segment.chars() {
            if ch.is_ascii_uppercase() && previous_lower {
                name.push('_');
            }
            previous_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
            match ch {
                '-' => name.push('_'),
                other => name.push(other.to_ascii_uppercase()),
            }
        }
    }
    name
}

pub(crate) fn insert_path(root: &mut Map<String, Value>, segments: &[String], value: Value) {
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    let mut current = root;
    for segment in parents {
        let entry = current
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Value::Object(next) = entry else {
            return;
        };
        current = next;
    }
    current.insert(last.clone(), value);
}

pub(crate) fn lookup_path<'a>(root: &'a Value, segments: &[String]) -> Option<&'a Value> {
    segments
        .iter()
        .try_fold(root, |current, segment| current.as_object()?.get(segment))
}

fn coerce(spec: &OptionSpec, raw: &str, origin: &str) -> Result<Value, ConfigError> {
    spec.kind
        .coerce_str(raw)
        .map_err(|reason| ConfigError::OptionType {
            path: spec.path.clone(),
            expected: format!("a value of type {} from {origin}", spec.kind),
            received: reason,
        })
}

/// Values passed programmatically (`init`/`start` calls).
#[derive(Debug, Clone)]
pub struct ValueSource {
    name: String,
    value: Value,
}

impl ValueSource {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

#[async_trait]
impl ConfigSource for ValueSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self, _specs: &[OptionSpec], _allow_unknown: bool) -> Result<Value, ConfigError> {
        Ok(self.value.clone())
    }
}

/// YAML or JSON configuration file. A missing file defines nothing.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    name: String,
}

impl FileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            name: format!("file:{}", path.display()),
            path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ConfigSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self, _specs: &[OptionSpec], _allow_unknown: bool) -> Result<Value, ConfigError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Config file {} not found, skipping", self.path.display());
                return Ok(Value::Null);
            }
            Err(e) => return Err(ConfigError::source(self.name.clone(), e)),
        };

        if contents.trim().is_empty() {
            return Ok(Value::Null);
        }

        let value: Value = serde_yaml::from_str(&contents)
            .map_err(|e| ConfigError::source(self.name.clone(), e))?;
        if !(value.is_object() || value.is_null()) {
            return Err(ConfigError::source(
                self.name.clone(),
                "top-level value must be a mapping of options",
            ));
        }
        Ok(value)
    }
}

type Factory = Box<dyn Fn() -> BoxFuture<'static, Result<Value, ConfigError>> + Send + Sync>;

/// Asynchronous config factory. The engine awaits it before merging; a
/// rejection aborts the whole load.
pub struct FactorySource {
    name: String,
    factory: Factory,
}

impl FactorySource {
    pub fn new<F, Fut>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ConfigError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            factory: Box::new(move || factory().boxed()),
        }
    }
}

#[async_trait]
impl ConfigSource for FactorySource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self, _specs: &[OptionSpec], _allow_unknown: bool) -> Result<Value, ConfigError> {
        (self.factory)()
            .await
            .map_err(|e| ConfigError::source(self.name.clone(), e))
    }
}

/// Process environment, or an explicit set of variables.
#[derive(Debug, Clone, Default)]
pub struct EnvSource {
    vars: HashMap<String, String>,
}

impl EnvSource {
    pub fn from_process() -> Self {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: vars
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[async_trait]
impl ConfigSource for EnvSource {
    fn name(&self) -> &str {
        "environment"
    }

    async fn read(&self, specs: &[OptionSpec], _allow_unknown: bool) -> Result<Value, ConfigError> {
        let mut root = Map::new();
        for spec in specs {
            if let Some(raw) = self.vars.get(&spec.env_var) {
                let value = coerce(spec, raw, &spec.env_var)?;
                insert_path(&mut root, &spec.segments, value);
            }
        }
        Ok(Value::Object(root))
    }
}

/// Command-line arguments: `--mock.routes.delay 500`, `--server.port=3200`,
/// boolean flags `--files.enabled` / `--no-files.enabled`.
#[derive(Debug, Clone)]
pub struct ArgsSource {
    bin_name: String,
    args: Vec<String>,
}

impl ArgsSource {
    /// Arguments without the binary name.
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            bin_name: "mocks-server".to_string(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_process() -> Self {
        let mut args = std::env::args();
        let bin_name = args.next().unwrap_or_else(|| "mocks-server".to_string());
        Self {
            bin_name,
            args: args.collect(),
        }
    }

    fn command(&self, specs: &[OptionSpec], allow_unknown: bool) -> Command {
        let mut command = Command::new(self.bin_name.clone())
            .about("Programmable HTTP mock server")
            .ignore_errors(allow_unknown);

        for spec in specs {
            match spec.kind {
                OptionType::Boolean => {
                    let negated = negated_id(&spec.path);
                    command = command
                        .arg(
                            Arg::new(spec.path.clone())
                                .long(spec.path.clone())
                                .help(spec.description.clone())
                                .action(ArgAction::SetTrue),
                        )
                        .arg(
                            Arg::new(negated.clone())
                                .long(negated)
                                .hide(true)
                                .action(ArgAction::SetTrue),
                        );
                }
                _ => {
                    command = command.arg(
                        Arg::new(spec.path.clone())
                            .long(spec.path.clone())
                            .help(spec.description.clone())
                            .value_name(spec.kind.as_str().to_ascii_uppercase())
                            .num_args(1)
                            .allow_hyphen_values(true)
                            .action(ArgAction::Set),
                    );
                }
            }
        }
        command
    }
}

fn negated_id(path: &str) -> String {
    format!("no-{path}")
}

fn given_on_command_line(matches: &ArgMatches, id: &str) -> bool {
    matches.value_source(id) == Some(ArgValueSource::CommandLine)
}

fn map_clap_error(err: clap::Error) -> ConfigError {
    match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
            ConfigError::DisplayHelp(err.render().to_string())
        }
        ErrorKind::UnknownArgument => {
            let arg = match err.get(ContextKind::InvalidArg) {
                Some(ContextValue::String(arg)) => arg.clone(),
                _ => "<unknown>".to_string(),
            };
            let name = arg.trim_start_matches('-');
            let name = name.split('=').next().unwrap_or(name);
            ConfigError::UnknownOption(name.to_string())
        }
        _ => ConfigError::source("arguments", err.render()),
    }
}

#[async_trait]
impl ConfigSource for ArgsSource {
    fn name(&self) -> &str {
        "arguments"
    }

    async fn read(&self, specs: &[OptionSpec], allow_unknown: bool) -> Result<Value, ConfigError> {
        let argv = std::iter::once(self.bin_name.clone()).chain(self.args.iter().cloned());
        let matches = self
            .command(specs, allow_unknown)
            .try_get_matches_from(argv)
            .map_err(map_clap_error)?;

        let mut root = Map::new();
        for spec in specs {
            match spec.kind {
                OptionType::Boolean => {
                    if given_on_command_line(&matches, &negated_id(&spec.path)) {
                        insert_path(&mut root, &spec.segments, Value::Bool(false));
                    } else if given_on_command_line(&matches, &spec.path) {
                        insert_path(&mut root, &spec.segments, Value::Bool(true));
                    }
                }
                _ => {
                    if let Some(raw) = matches.get_one::<String>(&spec.path) {
                        let value = coerce(spec, raw, "command line")?;
                        insert_path(&mut root, &spec.segments, value);
                    }
                }
            }
        }
        Ok(Value::Object(root))
    }
}
