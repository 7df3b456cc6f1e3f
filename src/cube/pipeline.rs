//! Pipeline default parameters and workflow node construction

use serde::Serialize;
use serde_json::Value;

use super::collection::Item;
use crate::domain::SendParams;

/// One node of a workflow as CUBE expects it in `nodes_info`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowNode {
    pub piping_id: u64,
    pub previous_piping_id: Option<u64>,
    pub title: String,
    pub plugin_parameter_defaults: Vec<ParameterDefault>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterDefault {
    pub name: String,
    pub default: Value,
}

/// Parameter overrides keyed by a fragment of the plugin piping title.
pub type PluginOverrides = Vec<(String, Vec<(String, Value)>)>;

/// Group pipeline default parameters by piping, in order of first appearance.
///
/// Compute resource names are never carried over.
pub fn nodes_from_defaults(defaults: &[Item]) -> Vec<WorkflowNode> {
    let mut nodes: Vec<WorkflowNode> = Vec::new();
    for item in defaults {
        let Some(piping_id) = item.get_u64("plugin_piping_id") else {
            continue;
        };
        let Some(name) = item.get_str("param_name") else {
            continue;
        };
        let default = ParameterDefault {
            name: name.to_string(),
            default: item.get("value").cloned().unwrap_or(Value::Null),
        };

        if let Some(node) = nodes.iter_mut().find(|n| n.piping_id == piping_id) {
            node.plugin_parameter_defaults.push(default);
        } else {
            nodes.push(WorkflowNode {
                piping_id,
                previous_piping_id: item.get_u64("previous_plugin_piping_id"),
                title: item
                    .get_str("plugin_piping_title")
                    .unwrap_or_default()
                    .to_string(),
                plugin_parameter_defaults: vec![default],
            });
        }
    }
    nodes
}

/// Override defaults: a node matches when its title contains the plugin
/// fragment, a parameter when its name contains the key fragment.
pub fn apply_overrides(nodes: &mut [WorkflowNode], overrides: &PluginOverrides) {
    for (plugin_fragment, params) in overrides {
        for node in nodes
            .iter_mut()
            .filter(|n| n.title.contains(plugin_fragment.as_str()))
        {
            for (key, value) in params {
                for default in node
                    .plugin_parameter_defaults
                    .iter_mut()
                    .filter(|d| d.name.contains(key.as_str()))
                {
                    default.default = value.clone();
                }
            }
        }
    }
}

/// Overrides for the anonymize-and-push pipeline.
pub fn anonymize_and_push_overrides(tag_struct: &str, send: &SendParams) -> PluginOverrides {
    vec![
        (
            "dicom-anonymization".to_string(),
            vec![
                ("tagStruct".to_string(), Value::from(tag_struct)),
                ("fileFilter".to_string(), Value::from(".dcm")),
            ],
        ),
        (
            "push-to-orthanc".to_string(),
            vec![
                ("inputFileFilter".to_string(), Value::from("**/*dcm")),
                ("orthancUrl".to_string(), Value::from(send.url.as_str())),
                ("username".to_string(), Value::from(send.username.as_str())),
                ("password".to_string(), Value::from(send.password.as_str())),
                ("pushToRemote".to_string(), Value::from(send.aec.as_str())),
            ],
        ),
    ]
}
