//! ChRIS plugin descriptor
//!
//! ChRIS registers a plugin from a JSON document describing its resource
//! limits and every command-line parameter. The parameter list is derived
//! from the clap definition so the two cannot drift apart.

use clap::{Arg, ArgAction, Command};
use serde::Serialize;
use serde_json::Value;

pub const TITLE: &str = "A ChRIS plugin to verify PACS file registration in CUBE";

/// Argument ids that are not plugin parameters.
const INTERNAL_ARGS: &[&str] = &["help", "version", "json", "config", "verbose"];

/// Value names that mark integer options.
const INT_VALUE_NAMES: &[&str] = &["N", "SECONDS"];

#[derive(Debug, Clone, Serialize)]
pub struct PluginDescriptor {
    pub name: String,
    pub version: String,
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub plugin_type: String,
    pub category: String,
    pub icon: String,
    pub authors: String,
    pub license: String,
    pub documentation: String,
    pub public_repo: String,
    pub selfpath: String,
    pub selfexec: String,
    pub execshell: String,
    pub min_number_of_workers: u32,
    pub max_number_of_workers: u32,
    pub min_memory_limit: String,
    pub max_memory_limit: String,
    pub min_cpu_limit: String,
    pub max_cpu_limit: String,
    pub min_gpu_limit: u32,
    pub max_gpu_limit: u32,
    pub parameters: Vec<Parameter>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
    pub optional: bool,
    pub flag: String,
    pub short_flag: String,
    pub action: String,
    pub help: String,
    pub default: Value,
    pub ui_exposed: bool,
}

/// Build the descriptor for `command` (normally `Cli::command()`).
pub fn build(command: &Command) -> PluginDescriptor {
    let mut command = command.clone();
    command.build();

    PluginDescriptor {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        title: TITLE.to_string(),
        description: env!("CARGO_PKG_DESCRIPTION").to_string(),
        plugin_type: "ds".to_string(),
        category: String::new(),
        icon: String::new(),
        authors: env!("CARGO_PKG_AUTHORS").replace(':', ", "),
        license: env!("CARGO_PKG_LICENSE").to_string(),
        documentation: env!("CARGO_PKG_REPOSITORY").to_string(),
        public_repo: env!("CARGO_PKG_REPOSITORY").to_string(),
        selfpath: String::new(),
        selfexec: command.get_name().to_string(),
        execshell: String::new(),
        min_number_of_workers: 1,
        max_number_of_workers: 1,
        min_memory_limit: "100Mi".to_string(),
        max_memory_limit: String::new(),
        min_cpu_limit: "1000m".to_string(),
        max_cpu_limit: String::new(),
        min_gpu_limit: 0,
        max_gpu_limit: 0,
        parameters: command.get_arguments().filter_map(parameter).collect(),
    }
}

fn parameter(arg: &Arg) -> Option<Parameter> {
    if arg.is_positional() || INTERNAL_ARGS.contains(&arg.get_id().as_str()) {
        return None;
    }
    let long = arg.get_long()?;
    let is_switch = matches!(arg.get_action(), ArgAction::SetTrue);
    let is_int = arg
        .get_value_names()
        .is_some_and(|names| names.iter().any(|n| INT_VALUE_NAMES.contains(&n.as_str())));

    let raw_default = arg
        .get_default_values()
        .first()
        .map(|v| v.to_string_lossy().to_string());
    let (param_type, default) = if is_switch {
        ("bool", Value::Bool(false))
    } else if is_int {
        let n = raw_default.as_deref().and_then(|d| d.parse::<u64>().ok());
        ("int", n.map_or(Value::Null, Value::from))
    } else {
        ("str", raw_default.map_or(Value::Null, Value::from))
    };

    Some(Parameter {
        name: long.to_string(),
        param_type: param_type.to_string(),
        optional: !arg.is_required_set(),
        flag: format!("--{long}"),
        short_flag: arg
            .get_short()
            .map(|c| format!("-{c}"))
            .unwrap_or_default(),
        action: if is_switch { "store_true" } else { "store" }.to_string(),
        help: arg.get_help().map(ToString::to_string).unwrap_or_default(),
        default,
        ui_exposed: true,
    })
}
