//! CLI argument merging with config

use crate::domain::Config;

#[derive(Debug, Default, Clone)]
pub struct CliOverrides {
    pub cube_url: Option<String>,
    pub cube_user: Option<String>,
    pub cube_password: Option<String>,
    pub plugin_instance_id: Option<String>,
    pub input_glob: Option<String>,
    pub tag_struct: Option<String>,
    pub orthanc_url: Option<String>,
    pub orthanc_username: Option<String>,
    pub orthanc_password: Option<String>,
    pub push_to_remote: Option<String>,
    pub poll_count: Option<u32>,
    pub poll_interval_secs: Option<u64>,
    pub schedule_workflow: Option<bool>,
}

pub fn merge_cli_with_config(mut base_config: Config, cli: CliOverrides) -> Config {
    if let Some(cube_url) = cli.cube_url {
        base_config.cube_url = cube_url;
    }
    if let Some(cube_user) = cli.cube_user {
        base_config.cube_user = cube_user;
    }
    if let Some(cube_password) = cli.cube_password {
        base_config.cube_password = cube_password;
    }
    // An empty --pluginInstanceID means "not given" so the environment fallback still applies.
    if let Some(id) = cli.plugin_instance_id.filter(|id| !id.trim().is_empty()) {
        base_config.plugin_instance_id = Some(id);
    }

    if let Some(input_glob) = cli.input_glob.filter(|g| !g.trim().is_empty()) {
        base_config.input_glob = input_glob;
    }

    if let Some(tag_struct) = cli.tag_struct {
        base_config.tag_struct = tag_struct;
    }
    if let Some(orthanc_url) = cli.orthanc_url {
        base_config.orthanc_url = orthanc_url;
    }
    if let Some(orthanc_username) = cli.orthanc_username {
        base_config.orthanc_username = orthanc_username;
    }
    if let Some(orthanc_password) = cli.orthanc_password {
        base_config.orthanc_password = orthanc_password;
    }
    if let Some(push_to_remote) = cli.push_to_remote {
        base_config.push_to_remote = push_to_remote;
    }

    if let Some(poll_count) = cli.poll_count {
        base_config.poll_count = poll_count;
    }
    if let Some(poll_interval_secs) = cli.poll_interval_secs {
        base_config.poll_interval_secs = poll_interval_secs;
    }
    if let Some(schedule_workflow) = cli.schedule_workflow {
        base_config.schedule_workflow = schedule_workflow;
    }

    base_config
}

#[cfg(test)]
mod tests {
    use super::{merge_cli_with_config, CliOverrides};
    use crate::domain::Config;

    #[test]
    fn cli_overrides_replace_base_values() {
        let base = Config {
            cube_url: "http://cube.local/api/v1/".to_string(),
            poll_count: 3,
            ..Config::default()
        };

        let cli = CliOverrides {
            cube_url: Some("http://other/api/v1/".to_string()),
            poll_count: Some(0),
            schedule_workflow: Some(false),
            tag_struct: Some(r#"{"PatientName": "anon"}"#.to_string()),
            ..CliOverrides::default()
        };

        let merged = merge_cli_with_config(base, cli);
        assert_eq!(merged.cube_url, "http://other/api/v1/");
        assert_eq!(merged.poll_count, 0);
        assert!(!merged.schedule_workflow);
        assert_eq!(merged.tag_struct, r#"{"PatientName": "anon"}"#);
        assert_eq!(merged.cube_user, "chris");
    }

    #[test]
    fn blank_cli_values_do_not_clobber_config() {
        let base = Config {
            plugin_instance_id: Some("12".to_string()),
            input_glob: "**/*.pacs.json".to_string(),
            ..Config::default()
        };
        let cli = CliOverrides {
            plugin_instance_id: Some(String::new()),
            input_glob: Some("  ".to_string()),
            ..CliOverrides::default()
        };

        let merged = merge_cli_with_config(base, cli);
        assert_eq!(merged.plugin_instance_id.as_deref(), Some("12"));
        assert_eq!(merged.input_glob, "**/*.pacs.json");
    }
}
