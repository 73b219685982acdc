//! `invx config`: inspect and edit the pipeline settings file.
//!
//! Keys are dotted paths into the JSON file (`ocr.table_psm`,
//! `preprocess.deskew.max_angle`). Every write is checked against
//! [`InvxConfig::problems`] so a saved file always builds a pipeline.

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Args, Subcommand};
use console::style;
use serde_json::Value;

use invx_core::InvxConfig;

use super::default_config_path;

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommand,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the effective settings
    Show,

    /// Write a settings file holding the defaults
    Init {
        /// Where to write instead of the -c / default location
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print one setting
    Get {
        /// Dotted key, e.g. "quality.sharpness_min" or "ocr"
        key: String,
    },

    /// Change one setting
    Set {
        /// Dotted key of an existing setting
        key: String,
        /// JSON value; anything that is not JSON is taken as a string
        value: String,
    },

    /// Restore one setting to its default
    Reset {
        /// Dotted key of an existing setting
        key: String,
    },

    /// Report settings the pipeline cannot run with
    Check,

    /// Print where the settings file lives
    Path,
}

pub async fn run(args: ConfigArgs, config_path: Option<&str>) -> anyhow::Result<()> {
    let file = SettingsFile::new(config_path.map(PathBuf::from).unwrap_or_else(default_config_path));
    match args.command {
        ConfigCommand::Show => show(&file),
        ConfigCommand::Init { output, force } => init(output.as_deref().unwrap_or(file.path.as_path()), force),
        ConfigCommand::Get { key } => get(&file, &key),
        ConfigCommand::Set { key, value } => set(&file, &key, parse_value(&value)),
        ConfigCommand::Reset { key } => {
            let default = serde_json::to_value(InvxConfig::default())?;
            let value = lookup(&default, &key)?.clone();
            set(&file, &key, value)
        }
        ConfigCommand::Check => check(&file),
        ConfigCommand::Path => show_path(&file),
    }
}

/// The settings file; absent files read as defaults.
struct SettingsFile {
    path: PathBuf,
}

impl SettingsFile {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn exists(&self) -> bool {
        self.path.exists()
    }

    fn load(&self) -> anyhow::Result<InvxConfig> {
        if !self.exists() {
            return Ok(InvxConfig::default());
        }
        InvxConfig::from_file(&self.path)
            .map_err(|e| anyhow::anyhow!("Failed to read config {}: {}", self.path.display(), e))
    }

    fn store(&self, config: &InvxConfig) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        config.save(&self.path)?;
        Ok(())
    }
}

/// JSON if it parses, else a bare string (`eng+deu`, `embedded`).
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn lookup<'a>(json: &'a Value, key: &str) -> anyhow::Result<&'a Value> {
    key.split('.').try_fold(json, |node, part| {
        node.get(part).ok_or_else(|| unknown_key(json, key))
    })
}

fn unknown_key(json: &Value, key: &str) -> anyhow::Error {
    let section = key.split('.').next().unwrap_or_default();
    match json.get(section).and_then(Value::as_object) {
        Some(fields) => anyhow::anyhow!(
            "Configuration key not found: {} (keys under {}: {})",
            key,
            section,
            fields.keys().cloned().collect::<Vec<_>>().join(", ")
        ),
        None => anyhow::anyhow!("Configuration key not found: {}", key),
    }
}

/// Replace the value at `key`, which must already exist.
fn replace(json: &mut Value, key: &str, value: Value) -> anyhow::Result<()> {
    let (parents, last) = match key.rsplit_once('.') {
        Some((parents, last)) => (Some(parents), last),
        None => (None, key),
    };
    let known = lookup(json, key).is_ok();

    let mut node = &mut *json;
    for part in parents.into_iter().flat_map(|p| p.split('.')) {
        node = node
            .get_mut(part)
            .ok_or_else(|| anyhow::anyhow!("Configuration key not found: {}", key))?;
    }
    match node.as_object_mut() {
        Some(fields) if known => {
            fields.insert(last.to_string(), value);
            Ok(())
        }
        Some(_) => Err(anyhow::anyhow!("Configuration key not found: {}", key)),
        None => Err(anyhow::anyhow!("{} is not a section; cannot set {}", parents.unwrap_or(""), key)),
    }
}

fn report_problems(problems: &[String]) {
    for problem in problems {
        eprintln!("{} {}", style("⚠").yellow(), problem);
    }
}

fn show(file: &SettingsFile) -> anyhow::Result<()> {
    if !file.exists() {
        eprintln!("{} No config file at {}, showing defaults.", style("ℹ").blue(), file.path.display());
    }
    let config = file.load()?;
    report_problems(&config.problems());
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn init(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("Config file already exists at {}. Use --force to overwrite.", path.display());
    }
    SettingsFile::new(path.to_path_buf()).store(&InvxConfig::default())?;
    println!("{} Created configuration file at {}", style("✓").green(), path.display());
    Ok(())
}

fn get(file: &SettingsFile, key: &str) -> anyhow::Result<()> {
    let json = serde_json::to_value(file.load()?)?;
    println!("{}", serde_json::to_string_pretty(lookup(&json, key)?)?);
    Ok(())
}

fn set(file: &SettingsFile, key: &str, value: Value) -> anyhow::Result<()> {
    let current = file.load()?;
    let mut json = serde_json::to_value(&current)?;
    replace(&mut json, key, value.clone())?;

    // Deserializing rejects values of the wrong type; problems() rejects
    // values the pipeline cannot run with. Problems already in the file do
    // not block an edit.
    let config: InvxConfig =
        serde_json::from_value(json).map_err(|e| anyhow::anyhow!("Invalid value for {}: {}", key, e))?;
    let before = current.problems();
    let introduced: Vec<String> = config.problems().into_iter().filter(|p| !before.contains(p)).collect();
    if !introduced.is_empty() {
        anyhow::bail!("Invalid value for {}: {}", key, introduced.join("; "));
    }

    file.store(&config)?;
    println!("{} Set {} = {}", style("✓").green(), key, serde_json::to_string(&value)?);
    Ok(())
}

fn check(file: &SettingsFile) -> anyhow::Result<()> {
    let problems = file.load()?.problems();
    if problems.is_empty() {
        println!("{} {} is valid", style("✓").green(), file.path.display());
        return Ok(());
    }
    report_problems(&problems);
    anyhow::bail!("{} problem(s) in {}", problems.len(), file.path.display())
}

fn show_path(file: &SettingsFile) -> anyhow::Result<()> {
    println!("Configuration file: {}", file.path.display());
    if file.exists() {
        println!("Status: {}", style("exists").green());
    } else {
        println!("Status: {}", style("not created").yellow());
        println!();
        println!("Run 'invx config init' to create a configuration file.");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn defaults() -> Value {
        serde_json::to_value(InvxConfig::default()).unwrap()
    }

    #[test]
    fn test_bare_words_are_strings() {
        assert_eq!(parse_value("8"), Value::from(8));
        assert_eq!(parse_value("eng+deu"), Value::from("eng+deu"));
        assert_eq!(parse_value("true"), Value::from(true));
    }

    #[test]
    fn test_lookup_nested_key() {
        let json = defaults();
        assert_eq!(lookup(&json, "preprocess.deskew.max_angle").unwrap(), &Value::from(15.0));
        assert!(lookup(&json, "ocr").unwrap().is_object());
    }

    #[test]
    fn test_unknown_key_lists_section_keys() {
        let err = lookup(&defaults(), "ocr.psm").unwrap_err().to_string();
        assert!(err.contains("Configuration key not found: ocr.psm"));
        assert!(err.contains("table_psm"));
    }

    #[test]
    fn test_replace_only_existing_keys() {
        let mut json = defaults();
        replace(&mut json, "batch.concurrency", Value::from(2)).unwrap();
        assert_eq!(json["batch"]["concurrency"], Value::from(2));

        assert!(replace(&mut json, "batch.workers", Value::from(2)).is_err());
        assert!(replace(&mut json, "batch.concurrency.limit", Value::from(2)).is_err());
    }
}
