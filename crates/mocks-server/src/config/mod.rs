//! Layered configuration engine.
//!
//! Options are declared in a namespace tree before the engine is loaded.
//! Loading reads every source, then merges values with fixed precedence:
//!
//! 1. declared defaults
//! 2. configuration file (or an async factory standing in for it)
//! 3. environment variables (`MOCKS_<UPPER_SNAKE_PATH>`)
//! 4. command-line arguments (`--<dotted.path>`)
//! 5. programmatic values passed to `init`/`start`
//!
//! After a successful load the structure is locked; values stay mutable
//! through [`ConfigEngine::set`] or the option handles.

mod error;
mod namespace;
mod option;
mod sources;

use parking_lot::RwLock;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

pub use error::ConfigError;
pub use namespace::NamespaceId;
pub use option::{ConfigOption, Listener, ListenerRemover, OptionDef, OptionType, ValueParser};
pub use sources::{
    env_var_name, ArgsSource, ConfigSource, EnvSource, FactorySource, FileSource, OptionSpec,
    ValueSource,
};

use namespace::NamespaceTree;
use sources::lookup_path;

/// Default prefix of environment variables.
pub const DEFAULT_ENV_PREFIX: &str = "MOCKS";

/// Sources consumed by [`ConfigEngine::load`], one slot per precedence level.
#[derive(Default)]
pub struct ConfigSources {
    file: Option<Box<dyn ConfigSource>>,
    env: Option<Box<dyn ConfigSource>>,
    args: Option<Box<dyn ConfigSource>>,
    programmatic: Vec<Box<dyn ConfigSource>>,
}

impl ConfigSources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Environment and command line of the current process.
    pub fn from_process() -> Self {
        Self::new()
            .with_env(EnvSource::from_process())
            .with_args(ArgsSource::from_process())
    }

    /// The file level. Any source fits here, including a [`FactorySource`].
    pub fn with_file(mut self, source: impl ConfigSource + 'static) -> Self {
        self.file = Some(Box::new(source));
        self
    }

    pub fn with_env(mut self, source: impl ConfigSource + 'static) -> Self {
        self.env = Some(Box::new(source));
        self
    }

    pub fn with_args(mut self, source: impl ConfigSource + 'static) -> Self {
        self.args = Some(Box::new(source));
        self
    }

    /// Programmatic values. Later calls take precedence over earlier ones.
    pub fn with_values(mut self, values: Value) -> Self {
        if !values.is_null() {
            self.programmatic
                .push(Box::new(ValueSource::new("programmatic", values)));
        }
        self
    }
}

/// Options of the `config` namespace, declared by the engine itself. They
/// decide which other sources are read, so each source may only set the ones
/// governing sources of lower precedence.
struct MetaOptions {
    read_file: ConfigOption,
    read_environment: ConfigOption,
    read_arguments: ConfigOption,
    allow_unknown_arguments: ConfigOption,
}

/// Owner of the namespace tree and every option value.
pub struct ConfigEngine {
    tree: RwLock<NamespaceTree>,
    loading: AtomicBool,
    locked: AtomicBool,
    env_prefix: String,
    meta: MetaOptions,
}

impl ConfigEngine {
    pub fn new() -> Result<Self, ConfigError> {
        Self::with_env_prefix(DEFAULT_ENV_PREFIX)
    }

    pub fn with_env_prefix(prefix: impl Into<String>) -> Result<Self, ConfigError> {
        let mut tree = NamespaceTree::new();
        let config = tree.add_namespace(NamespaceId::ROOT, "config")?;
        let meta = MetaOptions {
            read_file: tree.add_option(
                config,
                OptionDef::boolean("readFile")
                    .describe("Read configuration file or not")
                    .default_value(true),
            )?,
            read_environment: tree.add_option(
                config,
                OptionDef::boolean("readEnvironment")
                    .describe("Read environment variables or not")
                    .default_value(true),
            )?,
            read_arguments: tree.add_option(
                config,
                OptionDef::boolean("readArguments")
                    .describe("Read command line arguments or not")
                    .default_value(true),
            )?,
            allow_unknown_arguments: tree.add_option(
                config,
                OptionDef::boolean("allowUnknownArguments")
                    .describe("Ignore unknown options instead of failing")
                    .default_value(false),
            )?,
        };

        Ok(Self {
            tree: RwLock::new(tree),
            loading: AtomicBool::new(false),
            locked: AtomicBool::new(false),
            env_prefix: prefix.into(),
            meta,
        })
    }

    /// Whether load has completed. Structural changes are rejected afterwards.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    fn ensure_mutable(&self, action: &str) -> Result<(), ConfigError> {
        if self.is_locked() || self.loading.load(Ordering::Acquire) {
            return Err(ConfigError::Structure(format!(
                "cannot {action} once configuration has been loaded"
            )));
        }
        Ok(())
    }

    pub fn root(&self) -> NamespaceId {
        NamespaceId::ROOT
    }

    /// Add (or get) a namespace under the root.
    pub fn add_namespace(&self, name: &str) -> Result<NamespaceId, ConfigError> {
        self.add_child_namespace(NamespaceId::ROOT, name)
    }

    pub fn add_child_namespace(
        &self,
        parent: NamespaceId,
        name: &str,
    ) -> Result<NamespaceId, ConfigError> {
        self.ensure_mutable(&format!("add namespace '{name}'"))?;
        self.tree.write().add_namespace(parent, name)
    }

    /// Move a namespace under another one.
    pub fn attach_namespace(
        &self,
        namespace: NamespaceId,
        parent: NamespaceId,
    ) -> Result<(), ConfigError> {
        self.ensure_mutable("move a namespace")?;
        self.tree.write().attach(namespace, parent)
    }

    pub fn add_option(&self, namespace: NamespaceId, def: OptionDef) -> Result<ConfigOption, ConfigError> {
        self.ensure_mutable(&format!("add option '{}'", def.name))?;
        self.tree.write().add_option(namespace, def)
    }

    /// Dotted path of a namespace.
    pub fn namespace_path(&self, namespace: NamespaceId) -> String {
        self.tree.read().path_of(namespace)
    }

    pub fn option(&self, path: &str) -> Result<ConfigOption, ConfigError> {
        self.tree
            .read()
            .find_option(path)
            .ok_or_else(|| ConfigError::UnknownOption(path.to_string()))
    }

    pub fn get(&self, path: &str) -> Result<Value, ConfigError> {
        Ok(self.option(path)?.value())
    }

    /// Validate and store a value. Returns whether it changed.
    pub fn set(&self, path: &str, value: Value) -> Result<bool, ConfigError> {
        let option = self.option(path)?;
        let changed = option.set(value)?;
        if changed {
            debug!("Option '{}' changed", path);
        }
        Ok(changed)
    }

    pub fn on_change<F>(&self, path: &str, listener: F) -> Result<ListenerRemover, ConfigError>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        Ok(self.option(path)?.on_change(listener))
    }

    /// Set every option present in a nested object. All values are validated
    /// before any is stored.
    pub fn set_values(&self, values: &Value) -> Result<(), ConfigError> {
        if values.is_null() {
            return Ok(());
        }
        let options = {
            let tree = self.tree.read();
            tree.check_unknown(values)?;
            tree.options()
        };

        let mut resolved = Vec::new();
        for (segments, option) in options {
            if let Some(value) = lookup_path(values, &segments) {
                resolved.push((option.prepare(value.clone())?, option));
            }
        }
        for (value, option) in resolved {
            if option.assign(value) {
                debug!("Option '{}' changed", option.path());
            }
        }
        Ok(())
    }

    /// Snapshot of every value, mirroring the namespace tree.
    pub fn read(&self) -> Value {
        self.tree.read().snapshot(NamespaceId::ROOT)
    }

    /// Declared options, in declaration order.
    pub fn specs(&self) -> Vec<OptionSpec> {
        self.tree
            .read()
            .options()
            .into_iter()
            .map(|(segments, option)| OptionSpec {
                path: segments.join("."),
                env_var: env_var_name(&self.env_prefix, &segments),
                kind: option.kind(),
                description: option.description().to_string(),
                segments,
            })
            .collect()
    }

    /// Resolve a `config.*` option from `layers`, highest precedence first,
    /// falling back to its current value.
    fn meta_flag(&self, option: &ConfigOption, layers: &[&Value]) -> Result<bool, ConfigError> {
        let segments = path_segments(option);
        match layers.iter().find_map(|values| lookup_path(values, &segments)) {
            Some(value) => Ok(option.prepare(value.clone())?.as_bool().unwrap_or(false)),
            None => Ok(option.as_bool().unwrap_or(false)),
        }
    }

    /// Read every source, merge by precedence, validate, and lock the structure.
    /// Nothing is stored unless every source succeeds and every value is valid.
    pub async fn load(&self, sources: ConfigSources) -> Result<(), ConfigError> {
        if self.is_locked() {
            return Err(ConfigError::Structure(
                "configuration has already been loaded".to_string(),
            ));
        }
        if self
            .loading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ConfigError::Structure(
                "configuration is already being loaded".to_string(),
            ));
        }

        let result = self.load_sources(sources).await;
        if result.is_ok() {
            self.locked.store(true, Ordering::Release);
        }
        self.loading.store(false, Ordering::Release);
        result
    }

    async fn load_sources(&self, sources: ConfigSources) -> Result<(), ConfigError> {
        let specs = self.specs();
        let meta = &self.meta;

        let mut programmatic = Vec::with_capacity(sources.programmatic.len());
        for source in &sources.programmatic {
            programmatic.push(source.read(&specs, true).await?);
        }

        // Meta options are resolved top-down. A source only sets the ones
        // governing sources below it; anything else it holds for `config` is
        // dropped so the stored values match what was read.
        let mut layers: Vec<&Value> = programmatic.iter().rev().collect();

        let read_arguments = self.meta_flag(&meta.read_arguments, &layers)?;
        let args = match sources.args.as_ref().filter(|_| read_arguments) {
            Some(source) => {
                debug!("Reading config source '{}'", source.name());
                let values = source.read(&specs, true).await?;
                Some(strip_meta(source.name(), values, &[&meta.read_arguments]))
            }
            None => None,
        };
        layers.extend(args.iter());

        let read_environment = self.meta_flag(&meta.read_environment, &layers)?;
        let env = match sources.env.as_ref().filter(|_| read_environment) {
            Some(source) => {
                debug!("Reading config source '{}'", source.name());
                let values = source.read(&specs, true).await?;
                Some(strip_meta(
                    source.name(),
                    values,
                    &[&meta.read_arguments, &meta.read_environment],
                ))
            }
            None => None,
        };
        layers.extend(env.iter());

        let read_file = self.meta_flag(&meta.read_file, &layers)?;
        let allow_unknown = self.meta_flag(&meta.allow_unknown_arguments, &layers)?;

        // Arguments were parsed leniently to find the meta options; parse
        // them again strictly so unknown ones are reported.
        let args = match (args, sources.args.as_ref()) {
            (Some(_), Some(source)) if !allow_unknown => Some(strip_meta(
                source.name(),
                source.read(&specs, false).await?,
                &[&meta.read_arguments],
            )),
            (args, _) => args,
        };

        let file = match sources.file.as_ref().filter(|_| read_file) {
            Some(source) => {
                debug!("Reading config source '{}'", source.name());
                let values = source.read(&specs, allow_unknown).await?;
                Some(strip_meta(
                    source.name(),
                    values,
                    &[
                        &meta.read_arguments,
                        &meta.read_environment,
                        &meta.read_file,
                        &meta.allow_unknown_arguments,
                    ],
                ))
            }
            None => None,
        };

        let mut partials: Vec<(String, Value)> = Vec::new();
        let levels = [(&sources.file, file), (&sources.env, env), (&sources.args, args)];
        for (source, values) in levels {
            if let (Some(source), Some(values)) = (source, values) {
                partials.push((source.name().to_string(), values));
            }
        }
        for (source, values) in sources.programmatic.iter().zip(programmatic) {
            partials.push((source.name().to_string(), values));
        }

        let options = {
            let tree = self.tree.read();
            if !allow_unknown {
                for (_, values) in &partials {
                    tree.check_unknown(values)?;
                }
            }
            tree.options()
        };

        let mut resolved = Vec::new();
        for (segments, option) in options {
            let winner = partials
                .iter()
                .rev()
                .find_map(|(name, values)| lookup_path(values, &segments).map(|v| (name, v)));
            if let Some((name, value)) = winner {
                debug!("Option '{}' set from '{}'", option.path(), name);
                let prepared = option.prepare(value.clone())?;
                resolved.push((option, prepared));
            }
        }

        for (option, value) in resolved {
            option.assign(value);
        }
        info!("Configuration loaded from {} source(s)", partials.len());
        Ok(())
    }
}

fn path_segments(option: &ConfigOption) -> Vec<String> {
    option.path().split('.').map(str::to_string).collect()
}

/// Remove `options` from a partial read from `source`.
fn strip_meta(source: &str, mut values: Value, options: &[&ConfigOption]) -> Value {
    let Some(root) = values.as_object_mut() else {
        return values;
    };
    let Some(config) = root.get_mut("config").and_then(Value::as_object_mut) else {
        return values;
    };
    for option in options {
        if config.remove(option.name()).is_some() {
            warn!(
                "Option '{}' cannot be set from '{}', ignoring it",
                option.path(),
                source
            );
        }
    }
    if config.is_empty() {
        root.remove("config");
    }
    values
}
