//! Provider type registry.
//!
//! The registry maps a type name to a constructor producing an empty,
//! uninitialized provider. It is built once at the composition root
//! ([`Registry::with_builtin`]) and shared read-only afterwards.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use credctl_core::Metadata;
use tracing::debug;

use crate::command::CommandProvider;
use crate::error::ProviderError;
use crate::oauth2::OAuth2Provider;
use crate::oauth2_proxy::OAuth2ProxyProvider;
use crate::provider::Provider;
use crate::schema::Schema;

type Constructor = Arc<dyn Fn() -> Box<dyn Provider> + Send + Sync>;

/// Type name to constructor mapping.
#[derive(Clone, Default)]
pub struct Registry {
    constructors: HashMap<String, Constructor>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with `command`, `oauth2` and `oauth2-proxy`.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(CommandProvider::TYPE_NAME, || {
            Box::new(CommandProvider::default())
        });
        registry.register(OAuth2Provider::TYPE_NAME, || {
            Box::new(OAuth2Provider::default())
        });
        registry.register(OAuth2ProxyProvider::TYPE_NAME, || {
            Box::new(OAuth2ProxyProvider::default())
        });
        registry
    }

    /// Register a constructor. A later registration under the same name
    /// replaces the earlier one.
    pub fn register<F>(&mut self, type_name: impl Into<String>, constructor: F)
    where
        F: Fn() -> Box<dyn Provider> + Send + Sync + 'static,
    {
        let type_name = type_name.into();
        debug!(provider_type = %type_name, "Registered provider type");
        self.constructors.insert(type_name, Arc::new(constructor));
    }

    /// A fresh, uninitialized provider of the given type.
    pub fn create(&self, type_name: &str) -> Result<Box<dyn Provider>, ProviderError> {
        self.constructors
            .get(type_name)
            .map(|constructor| constructor())
            .ok_or_else(|| ProviderError::UnknownProviderType(type_name.to_string()))
    }

    /// Create a provider, check `config` against its schema and initialize it.
    pub async fn build(
        &self,
        type_name: &str,
        config: &Metadata,
    ) -> Result<Box<dyn Provider>, ProviderError> {
        let mut provider = self.create(type_name)?;
        provider.schema().validate(config)?;
        provider.init(config).await?;
        Ok(provider)
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        self.constructors.contains_key(type_name)
    }

    /// Registered type names, sorted.
    pub fn list_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.constructors.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn schema(&self, type_name: &str) -> Result<Schema, ProviderError> {
        Ok(self.create(type_name)?.schema())
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("types", &self.list_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, FieldType, SchemaError};
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct Fixed {
        value: &'static str,
        config: Metadata,
    }

    #[async_trait]
    impl Provider for Fixed {
        fn type_name(&self) -> &'static str {
            "fixed"
        }

        fn schema(&self) -> Schema {
            Schema::new(vec![FieldDef::new("label", FieldType::String).required()])
        }

        async fn init(&mut self, config: &Metadata) -> Result<(), ProviderError> {
            self.config = config.clone();
            Ok(())
        }

        async fn get(&mut self) -> Result<Vec<u8>, ProviderError> {
            Ok(self.value.as_bytes().to_vec())
        }

        fn metadata(&self) -> Metadata {
            self.config.clone()
        }
    }

    fn fixed(value: &'static str) -> Box<dyn Provider> {
        Box::new(Fixed {
            value,
            config: Metadata::new(),
        })
    }

    fn config(value: Value) -> Metadata {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn builtin_types_are_registered() {
        let registry = Registry::with_builtin();
        assert_eq!(
            registry.list_types(),
            vec!["command", "oauth2", "oauth2-proxy"]
        );
        assert!(registry.is_registered("oauth2"));
        assert!(!registry.is_registered("vault"));
    }

    #[test]
    fn create_unknown_type_fails() {
        let registry = Registry::new();
        let err = registry.create("vault").err().unwrap();
        assert!(matches!(err, ProviderError::UnknownProviderType(ref t) if t == "vault"));
        assert_eq!(err.to_string(), "unknown provider type: vault");
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let mut registry = Registry::new();
        registry.register("fixed", || fixed("first"));
        registry.register("fixed", || fixed("second"));

        let mut provider = registry.create("fixed").unwrap();
        assert_eq!(provider.get().await.unwrap(), b"second");
        assert_eq!(registry.list_types(), vec!["fixed"]);
    }

    #[tokio::test]
    async fn build_validates_before_init() {
        let mut registry = Registry::new();
        registry.register("fixed", || fixed("v"));

        let err = registry.build("fixed", &Metadata::new()).await.err().unwrap();
        assert!(matches!(
            err,
            ProviderError::Schema(SchemaError::MissingField(ref f)) if f == "label"
        ));

        let provider = registry
            .build("fixed", &config(json!({"label": "x"})))
            .await
            .unwrap();
        assert_eq!(provider.metadata()["label"], json!("x"));
    }

    #[test]
    fn schema_lookup() {
        let registry = Registry::with_builtin();
        let schema = registry.schema("command").unwrap();
        assert!(schema.field("command").is_some_and(|f| f.required));
        assert!(registry.schema("nope").is_err());
    }
}
