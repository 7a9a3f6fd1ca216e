//! Text endpoint over a plugin registry
//!
//! Without a `plugin` parameter the endpoint lists every plugin; with one,
//! it runs the plugin on `input` and echoes the result.

use http::StatusCode;
use serde::Deserialize;
use strand_plugin_host::{PluginRegistry, RegistryError};

/// Content type of every endpoint response
pub const CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Query parameters accepted by the endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PluginQuery {
    pub plugin: Option<String>,
    pub input: Option<String>,
}

impl PluginQuery {
    /// Parse a URL query string (without the leading `?`)
    pub fn parse(query: Option<&str>) -> Result<Self, serde_urlencoded::de::Error> {
        match query {
            Some(query) => serde_urlencoded::from_str(query),
            None => Ok(Self::default()),
        }
    }
}

/// Plain-text response produced by [`PluginEndpoint::handle`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextResponse {
    pub status: StatusCode,
    pub body: String,
}

impl TextResponse {
    fn ok(body: String) -> Self {
        Self {
            status: StatusCode::OK,
            body,
        }
    }

    pub fn bad_request(message: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: format!("Invalid request: {}", message),
        }
    }

    pub fn internal_error() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: "internal error".to_string(),
        }
    }
}

/// Request handler backed by an injected registry
#[derive(Clone)]
pub struct PluginEndpoint {
    registry: PluginRegistry,
}

impl PluginEndpoint {
    pub fn new(registry: PluginRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Handle one request; may block on artifact reloads
    pub fn handle(&self, query: &PluginQuery) -> TextResponse {
        match query.plugin.as_deref().filter(|p| !p.is_empty()) {
            None => TextResponse::ok(self.plugin_list()),
            Some(plugin) => self.process(plugin, query.input.as_deref().unwrap_or_default()),
        }
    }

    /// Listing of every plugin with a usage hint
    pub fn plugin_list(&self) -> String {
        let mut output = String::from("Available plugins:\n\n");
        for info in self.registry.list() {
            output.push_str(&format!("- {} ({})\n", info.name, info.description));
        }
        output.push_str("\nUsage: ?plugin=<name>&input=<text>\n");
        output
    }

    fn process(&self, plugin: &str, input: &str) -> TextResponse {
        match self.registry.invoke(plugin, input) {
            Ok(output) => TextResponse::ok(format!("PLUGIN {}: {} -> {}", plugin, input, output)),
            Err(RegistryError::PluginNotFound(_)) => {
                tracing::debug!(plugin, "Plugin not loaded");
                TextResponse::ok(format!("PLUGIN NOT LOADED {}: {}", plugin, input))
            }
            Err(RegistryError::Processing { source, .. }) => {
                tracing::warn!(plugin, error = %source, "Plugin failed");
                TextResponse {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    body: format!("PLUGIN FAILED {}: {}: {}", plugin, input, source),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::Arc;
    use strand_plugin_host::{ArtifactLoader, LoaderError, PluginHandle, ProcessError, StringPlugin};

    struct Upper;

    impl StringPlugin for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn description(&self) -> &str {
            "Convert input to uppercase"
        }

        fn process(&self, input: &str) -> Result<String, ProcessError> {
            Ok(input.to_uppercase())
        }
    }

    struct Broken;

    impl StringPlugin for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn description(&self) -> &str {
            "Always fails"
        }

        fn process(&self, _input: &str) -> Result<String, ProcessError> {
            Err(ProcessError::Failed("out of order".to_string()))
        }
    }

    struct StaticLoader;

    impl ArtifactLoader for StaticLoader {
        fn load(&self, _path: &Path) -> Result<Vec<PluginHandle>, LoaderError> {
            Ok(vec![Arc::new(Upper), Arc::new(Broken)])
        }
    }

    fn endpoint() -> (tempfile::TempDir, PluginEndpoint) {
        let temp = tempfile::TempDir::new().unwrap();
        let artifact = temp.path().join("builtin.wasm");
        std::fs::write(&artifact, "").unwrap();
        let registry = PluginRegistry::builder()
            .loader(Arc::new(StaticLoader))
            .register_artifact(artifact)
            .build()
            .unwrap();
        (temp, PluginEndpoint::new(registry))
    }

    #[test]
    fn test_parse_query() {
        let query = PluginQuery::parse(Some("plugin=upper&input=hello+world%21")).unwrap();
        assert_eq!(query.plugin.as_deref(), Some("upper"));
        assert_eq!(query.input.as_deref(), Some("hello world!"));

        assert_eq!(PluginQuery::parse(None).unwrap(), PluginQuery::default());
    }

    #[test]
    fn test_list_plugins() {
        let (_temp, endpoint) = endpoint();
        let response = endpoint.handle(&PluginQuery::default());

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(
            response.body,
            "Available plugins:\n\n\
             - broken (Always fails)\n\
             - upper (Convert input to uppercase)\n\
             \nUsage: ?plugin=<name>&input=<text>\n"
        );
    }

    #[test]
    fn test_invoke_plugin() {
        let (_temp, endpoint) = endpoint();
        let response = endpoint.handle(&PluginQuery {
            plugin: Some("upper".to_string()),
            input: Some("abc".to_string()),
        });

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, "PLUGIN upper: abc -> ABC");
    }

    #[test]
    fn test_unknown_plugin() {
        let (_temp, endpoint) = endpoint();
        let response = endpoint.handle(&PluginQuery {
            plugin: Some("missing".to_string()),
            input: Some("abc".to_string()),
        });

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, "PLUGIN NOT LOADED missing: abc");
    }

    #[test]
    fn test_missing_input_is_empty() {
        let (_temp, endpoint) = endpoint();
        let query = PluginQuery::parse(Some("plugin=upper")).unwrap();

        assert_eq!(endpoint.handle(&query).body, "PLUGIN upper:  -> ");
    }

    #[test]
    fn test_empty_plugin_lists() {
        let (_temp, endpoint) = endpoint();
        let query = PluginQuery::parse(Some("plugin=&input=abc")).unwrap();

        assert!(endpoint.handle(&query).body.starts_with("Available plugins:"));
    }

    #[test]
    fn test_processing_failure() {
        let (_temp, endpoint) = endpoint();
        let response = endpoint.handle(&PluginQuery {
            plugin: Some("broken".to_string()),
            input: Some("abc".to_string()),
        });

        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.body,
            "PLUGIN FAILED broken: abc: Plugin reported failure: out of order"
        );
    }
}
