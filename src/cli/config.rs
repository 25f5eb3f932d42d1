// FILE: src/cli/config.rs

use crate::error::{GeneratorError, Result};
use crate::types::RpcFormat;
use crate::GeneratorOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub format: Option<RpcFormat>,
    pub include_dirs: Option<Vec<String>>,
    pub cpp_include_dirs: Option<Vec<String>>,
    pub extra_headers: Option<Vec<String>>,
    pub verify: Option<bool>,
    pub all_interfaces: Option<bool>,
    pub root_interface: Option<String>,
    pub error_code_types: Option<Vec<String>>,
}

impl ConfigFile {
    /// Options with every configured value applied over the defaults.
    pub fn options(&self) -> GeneratorOptions {
        let paths = |list: &Option<Vec<String>>| -> Vec<PathBuf> {
            list.iter().flatten().map(PathBuf::from).collect()
        };
        let mut options = GeneratorOptions::default();
        if let Some(format) = self.format {
            options.format = format;
        }
        options.include_dirs = paths(&self.include_dirs);
        options.cpp_include_dirs = paths(&self.cpp_include_dirs);
        options.extra_headers = paths(&self.extra_headers);
        if let Some(verify) = self.verify {
            options.verify = verify;
        }
        if let Some(all) = self.all_interfaces {
            options.all_interfaces = all;
        }
        if let Some(root) = &self.root_interface {
            options.root_interface = root.clone();
        }
        if let Some(types) = &self.error_code_types {
            options.error_code_types = types.clone();
        }
        options
    }
}

pub fn load(config_path: &str) -> Result<ConfigFile> {
    log::info!("Loaded configuration from {}", config_path);
    let config_content = fs::read_to_string(config_path)
        .map_err(|e| GeneratorError::loader(config_path, format!("config file: {}", e)))?;

    if config_path.ends_with(".json") {
        serde_json::from_str(&config_content).map_err(|e| GeneratorError::InvalidFormat {
            message: format!("Invalid JSON config: {}", e),
        })
    } else if config_path.ends_with(".toml") {
        toml::from_str(&config_content).map_err(|e| GeneratorError::InvalidFormat {
            message: format!("Invalid TOML config: {}", e),
        })
    } else {
        Err(GeneratorError::InvalidFormat {
            message: "Config file must be .json or .toml format".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> String {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path.to_string_lossy().to_string()
    }

    #[test]
    fn test_toml_config() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "jsongen.toml",
            r#"
format = "collapsed"
cpp_include_dirs = ["interfaces"]
extra_headers = ["interfaces/Ids.h"]
verify = false
"#,
        );
        let options = load(&path).unwrap().options();
        assert_eq!(options.format, RpcFormat::Collapsed);
        assert_eq!(options.cpp_include_dirs, vec![PathBuf::from("interfaces")]);
        assert_eq!(options.extra_headers, vec![PathBuf::from("interfaces/Ids.h")]);
        assert!(!options.verify);
        assert_eq!(options.root_interface, "Core::IUnknown");
    }

    #[test]
    fn test_json_config() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "jsongen.json",
            r#"{ "all_interfaces": true, "error_code_types": ["uint32_t"] }"#,
        );
        let options = load(&path).unwrap().options();
        assert!(options.all_interfaces);
        assert!(options.verify);
        assert_eq!(options.error_code_types, vec!["uint32_t".to_string()]);
    }

    #[test]
    fn test_rejected_configs() {
        let dir = TempDir::new().unwrap();
        let yaml = write(&dir, "jsongen.yaml", "format: compliant");
        assert!(matches!(load(&yaml), Err(GeneratorError::InvalidFormat { .. })));
        let bad = write(&dir, "bad.toml", "format = 3");
        assert!(matches!(load(&bad), Err(GeneratorError::InvalidFormat { .. })));
        assert!(load("/nonexistent/jsongen.toml").is_err());
    }
}
