//! Launch-configuration loader (component H): parses a VS Code-style
//! `launch.json` and selects one configuration by name.
//!
//! This is deliberately schema-free beyond the handful of fields the engine
//! inspects (see SPEC_FULL.md section 6) -- `pathMappings` and any other
//! adapter-specific field are forwarded verbatim as opaque JSON.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::error::DapError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchKind {
    Launch,
    Attach,
}

#[derive(Debug, Clone)]
pub struct ConnectEndpoint {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub name: String,
    pub kind: LaunchKind,
    pub program: Option<String>,
    pub connect: Option<ConnectEndpoint>,
    pub just_my_code: Option<bool>,
    pub path_mappings: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawFile {
    configurations: Vec<RawConfig>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    name: String,
    #[serde(default)]
    request: Option<String>,
    #[serde(default)]
    program: Option<String>,
    #[serde(default)]
    connect: Option<RawConnect>,
    #[serde(default, rename = "justMyCode")]
    just_my_code: Option<bool>,
    #[serde(default, rename = "pathMappings")]
    path_mappings: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawConnect {
    host: String,
    port: u16,
}

/// Loads `config_path`, selects the configuration named `config_name` (or
/// the first one if `config_name` is `None`), and lowers it into a
/// [`LaunchConfig`]. `program` overrides whatever the configuration names.
pub fn load(
    config_path: &Path,
    config_name: Option<&str>,
    program_override: Option<String>,
) -> Result<LaunchConfig, DapError> {
    let text = fs::read_to_string(config_path).map_err(|e| {
        DapError::ConfigInvalid(format!("could not read {}: {e}", config_path.display()))
    })?;

    let raw: RawFile = serde_json::from_str(&text)
        .map_err(|e| DapError::ConfigInvalid(format!("malformed launch configuration: {e}")))?;

    if raw.configurations.is_empty() {
        return Err(DapError::ConfigInvalid(
            "launch configuration has no configurations".to_string(),
        ));
    }

    let selected = match config_name {
        Some(name) => raw
            .configurations
            .into_iter()
            .find(|c| c.name == name)
            .ok_or_else(|| {
                DapError::ConfigInvalid(format!("no configuration named {name:?}"))
            })?,
        None => raw.configurations.into_iter().next().unwrap(),
    };

    let kind = match selected.request.as_deref() {
        Some("attach") => LaunchKind::Attach,
        Some("launch") | None => LaunchKind::Launch,
        Some(other) => {
            return Err(DapError::ConfigInvalid(format!(
                "unrecognized request kind {other:?}"
            )))
        }
    };

    Ok(LaunchConfig {
        name: selected.name,
        kind,
        program: program_override.or(selected.program),
        connect: selected.connect.map(|c| ConnectEndpoint {
            host: c.host,
            port: c.port,
        }),
        just_my_code: selected.just_my_code,
        path_mappings: selected.path_mappings,
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    fn write_fixture(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("create temp config file");
        file.write_all(contents.as_bytes()).expect("write fixture");
        file
    }

    #[test]
    fn selects_named_configuration() {
        let fixture = write_fixture(
            r#"{
                "configurations": [
                    {"name": "a", "request": "launch", "program": "a.py"},
                    {"name": "b", "request": "attach", "connect": {"host": "127.0.0.1", "port": 5678}}
                ]
            }"#,
        );
        let cfg = load(fixture.path(), Some("b"), None).unwrap();
        assert_eq!(cfg.name, "b");
        assert_eq!(cfg.kind, LaunchKind::Attach);
        assert_eq!(cfg.connect.unwrap().port, 5678);
    }

    #[test]
    fn defaults_to_first_configuration() {
        let fixture = write_fixture(
            r#"{"configurations": [{"name": "only", "request": "launch", "program": "x.py"}]}"#,
        );
        let cfg = load(fixture.path(), None, None).unwrap();
        assert_eq!(cfg.name, "only");
    }

    #[test]
    fn program_override_wins_over_configuration() {
        let fixture = write_fixture(
            r#"{"configurations": [{"name": "only", "request": "launch", "program": "x.py"}]}"#,
        );
        let cfg = load(fixture.path(), None, Some("override.py".to_string())).unwrap();
        assert_eq!(cfg.program.as_deref(), Some("override.py"));
    }

    #[test]
    fn unknown_name_is_config_invalid() {
        let fixture = write_fixture(
            r#"{"configurations": [{"name": "only", "request": "launch"}]}"#,
        );
        let err = load(fixture.path(), Some("missing"), None).unwrap_err();
        assert!(matches!(err, DapError::ConfigInvalid(_)));
    }
}
