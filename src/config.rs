//! Configuration for the gRPC mock server.
//!
//! Declares services, their methods and the matcher tables serving them.

use crate::handler::MatchingHandler;
use crate::registry::{DispatchLogging, ServiceRegistry};
use crate::table::MatcherTable;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Main configuration for the mock server.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct MockServerConfig {
    /// Compiled descriptor set (`protoc --descriptor_set_out`) describing
    /// the mocked services
    #[serde(default)]
    pub descriptor_set: Option<PathBuf>,

    /// Mocked services
    #[serde(default)]
    pub services: Vec<ServiceDefinition>,

    /// Global settings
    #[serde(default)]
    pub settings: GlobalSettings,
}

impl MockServerConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut seen = HashSet::new();
        for service in &self.services {
            if !seen.insert(service.name.as_str()) {
                anyhow::bail!("Duplicate service: {}", service.name);
            }
            service
                .validate()
                .map_err(|e| anyhow::anyhow!("Service {}: {}", service.name, e))?;
        }
        Ok(())
    }

    /// Names of all configured services, in declaration order.
    pub fn service_names(&self) -> Vec<String> {
        self.services.iter().map(|s| s.name.clone()).collect()
    }

    /// Build a registry serving every configured method.
    ///
    /// All tables are built before the first handler is registered, so an
    /// invalid table leaves nothing half-wired.
    pub fn build_registry(&self) -> anyhow::Result<ServiceRegistry> {
        let mut tables = Vec::new();
        for service in &self.services {
            for method in &service.methods {
                let table = MatcherTable::from_value(&method.matchers).map_err(|e| {
                    anyhow::anyhow!("Service {} method {}: {}", service.name, method.name, e)
                })?;
                tables.push((service.name.as_str(), method.name.as_str(), table));
            }
        }

        let mut registry = ServiceRegistry::new().with_logging(self.settings.logging());
        for (service, method, table) in tables {
            registry.add_handler(service, method, MatchingHandler::new(table));
        }
        Ok(registry)
    }
}

/// A mocked service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceDefinition {
    /// Fully qualified service name (e.g. `demo.PlateService`)
    pub name: String,

    /// Methods served from matcher tables
    #[serde(default)]
    pub methods: Vec<MethodDefinition>,
}

impl ServiceDefinition {
    /// Validate the service definition.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.is_empty() {
            anyhow::bail!("Service name cannot be empty");
        }
        let mut seen = HashSet::new();
        for method in &self.methods {
            if !seen.insert(method.name.as_str()) {
                anyhow::bail!("Duplicate method: {}", method.name);
            }
            method
                .validate()
                .map_err(|e| anyhow::anyhow!("Method {}: {}", method.name, e))?;
        }
        Ok(())
    }
}

/// A method answered from a matcher table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MethodDefinition {
    /// Method name within the service
    pub name: String,

    /// Sequence of `match`/`reply` entries, checked when the table is built
    #[serde(default = "empty_matchers")]
    pub matchers: serde_json::Value,
}

fn empty_matchers() -> serde_json::Value {
    serde_json::Value::Array(Vec::new())
}

impl MethodDefinition {
    /// Validate the method definition.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.is_empty() {
            anyhow::bail!("Method name cannot be empty");
        }
        MatcherTable::from_value(&self.matchers)?;
        Ok(())
    }
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalSettings {
    /// Log calls answered with a reply
    #[serde(default = "default_true")]
    pub log_matches: bool,

    /// Log calls answered with an error status
    #[serde(default = "default_true")]
    pub log_unmatched: bool,
}

fn default_true() -> bool {
    true
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            log_matches: true,
            log_unmatched: true,
        }
    }
}

impl GlobalSettings {
    pub fn logging(&self) -> DispatchLogging {
        DispatchLogging {
            log_matches: self.log_matches,
            log_unmatched: self.log_unmatched,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::RpcCall;
    use serde_json::json;
    use std::io::Write;
    use tonic::Code;

    const PLATES: &str = r#"
services:
  - name: demo.PlateService
    methods:
      - name: Lookup
        matchers:
          - match:
              plate: ABC1234
            reply:
              plate: ABC1234
              sum: 200
          - match: {}
            reply:
              sum: 0
      - name: Tags
        matchers:
          - match: {}
            reply:
              tags:
                - id: aaa
                  name: bbb
                  usageCount: 3
settings:
  log_matches: false
"#;

    #[test]
    fn test_parse_services() {
        let config = MockServerConfig::from_yaml(PLATES).unwrap();
        assert_eq!(config.services.len(), 1);
        assert_eq!(config.services[0].methods.len(), 2);
        assert_eq!(config.service_names(), vec!["demo.PlateService".to_string()]);
        assert!(!config.settings.log_matches);
        assert!(config.settings.log_unmatched);
        assert!(config.descriptor_set.is_none());
    }

    #[tokio::test]
    async fn test_build_registry() {
        let config = MockServerConfig::from_yaml(PLATES).unwrap();
        let registry = config.build_registry().unwrap();

        let reply = registry
            .dispatch(&RpcCall::new(
                "demo.PlateService",
                "Lookup",
                json!({"plate": "ABC1234", "extra": "x"}),
            ))
            .await
            .unwrap();
        assert_eq!(reply, json!({"plate": "ABC1234", "sum": 200}));

        let reply = registry
            .dispatch(&RpcCall::new("demo.PlateService", "Lookup", json!({"plate": "other"})))
            .await
            .unwrap();
        assert_eq!(reply, json!({"sum": 0}));

        let reply = registry
            .dispatch(&RpcCall::new("demo.PlateService", "Tags", json!({})))
            .await
            .unwrap();
        assert_eq!(reply["tags"][0]["usageCount"], json!(3));

        let status = registry
            .dispatch(&RpcCall::new("demo.PlateService", "Delete", json!({})))
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::Unimplemented);
    }

    #[test]
    fn test_missing_reply_fails_validation() {
        let yaml = r#"
services:
  - name: demo.PlateService
    methods:
      - name: Lookup
        matchers:
          - match: {}
"#;
        let err = MockServerConfig::from_yaml(yaml).unwrap_err().to_string();
        assert!(err.contains("demo.PlateService"));
        assert!(err.contains("Lookup"));
        assert!(err.contains("\"reply\" is required"));
    }

    #[test]
    fn test_matchers_must_be_a_sequence() {
        let yaml = r#"
services:
  - name: demo.PlateService
    methods:
      - name: Lookup
        matchers:
          match: {}
          reply: {}
"#;
        let err = MockServerConfig::from_yaml(yaml).unwrap_err().to_string();
        assert!(err.contains("must be a sequence"));
    }

    #[test]
    fn test_bad_table_builds_nothing() {
        let config = MockServerConfig {
            descriptor_set: None,
            services: vec![ServiceDefinition {
                name: "demo.PlateService".to_string(),
                methods: vec![
                    MethodDefinition {
                        name: "Good".to_string(),
                        matchers: json!([{"match": {}, "reply": {}}]),
                    },
                    MethodDefinition {
                        name: "Bad".to_string(),
                        matchers: json!([{"reply": {}}]),
                    },
                ],
            }],
            settings: GlobalSettings::default(),
        };

        assert!(config.build_registry().is_err());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let yaml = r#"
services:
  - name: demo.PlateService
    methods:
      - name: Lookup
      - name: Lookup
"#;
        let err = MockServerConfig::from_yaml(yaml).unwrap_err().to_string();
        assert!(err.contains("Duplicate method: Lookup"));

        let yaml = r#"
services:
  - name: demo.A
  - name: demo.A
"#;
        let err = MockServerConfig::from_yaml(yaml).unwrap_err().to_string();
        assert!(err.contains("Duplicate service: demo.A"));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let yaml = r#"
services:
  - name: demo.A
    port: 50051
"#;
        assert!(MockServerConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(PLATES.as_bytes()).unwrap();

        let config = MockServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.services[0].methods[0].name, "Lookup");
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = MockServerConfig::from_yaml(include_str!("../demos/default-config.yaml"))
            .unwrap();
        assert!(!config.services.is_empty());

        let registry = config.build_registry().unwrap();
        let reply = tokio_test::block_on(registry.dispatch(&RpcCall::new(
            "demo.PlateService",
            "GetAllTags",
            json!({"anything": true}),
        )))
        .unwrap();
        assert_eq!(reply["tags"][1]["usage_count"], json!(8));
    }
}
