//! Service catalog: transports, request templates and baseline settings.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use stepweave_core::{Document, ExecutionSettings, StepweaveError, Transport, TransportRegistry};
use tracing::debug;

/// One service as declared in a services document.
///
/// ```json
/// {
///   "client": "REST",
///   "defaults": { "baseUri": "https://shop.test", "headers": { "x-api-key": "k" } },
///   "apis": [
///     { "name": "createOrder", "method": "POST", "path": "/orders" }
///   ],
///   "settings": { "maxRetries": 1 }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    /// Client tag selecting the transport constructor.
    pub client: String,
    /// Request values shared by every method of the service.
    #[serde(default)]
    pub defaults: Document,
    /// Per-method request templates.
    #[serde(default)]
    pub apis: Vec<ApiDefinition>,
    /// Baseline settings for the service's calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<ExecutionSettings>,
}

impl ServiceDefinition {
    /// Reads a definition from an already-parsed document.
    pub fn from_document(document: &Document) -> Result<Self, StepweaveError> {
        Self::deserialize(document).map_err(|e| {
            StepweaveError::Configuration(format!("invalid service definition: {e}"))
        })
    }
}

/// A method name plus its request template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiDefinition {
    /// Method name referenced by steps.
    pub name: String,
    /// Every other key of the entry forms the template.
    #[serde(flatten)]
    pub request: Map<String, Value>,
}

type TransportConstructor =
    Box<dyn Fn(&ServiceDefinition) -> Result<Arc<dyn Transport>, StepweaveError> + Send + Sync>;

/// Builds transports for service definitions, keyed by client tag.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use async_trait::async_trait;
/// use stepweave::{Document, StepweaveError, Transport, TransportFactory};
///
/// #[derive(Debug)]
/// struct RestTransport {
///     base_uri: Document,
/// }
///
/// #[async_trait]
/// impl Transport for RestTransport {
///     async fn execute(&self, request: Document) -> Result<Document, StepweaveError> {
///         Ok(request)
///     }
/// }
///
/// let factory = TransportFactory::new().register("REST", |definition| {
///     Ok(Arc::new(RestTransport {
///         base_uri: definition.defaults["baseUri"].clone(),
///     }))
/// });
/// assert!(factory.supports("REST"));
/// ```
#[derive(Default)]
pub struct TransportFactory {
    constructors: HashMap<String, TransportConstructor>,
}

impl fmt::Debug for TransportFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportFactory")
            .field("clients", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TransportFactory {
    /// Creates a factory with no registered clients.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the constructor for a client tag, replacing any earlier one.
    pub fn register<F>(mut self, client: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(&ServiceDefinition) -> Result<Arc<dyn Transport>, StepweaveError>
            + Send
            + Sync
            + 'static,
    {
        self.constructors
            .insert(client.into(), Box::new(constructor));
        self
    }

    /// Returns `true` if `client` has a constructor.
    pub fn supports(&self, client: &str) -> bool {
        self.constructors.contains_key(client)
    }

    /// Builds the transport for `definition`.
    pub fn create(&self, definition: &ServiceDefinition) -> Result<Arc<dyn Transport>, StepweaveError> {
        let constructor = self.constructors.get(&definition.client).ok_or_else(|| {
            StepweaveError::Configuration(format!(
                "no transport registered for client '{}'",
                definition.client
            ))
        })?;
        constructor(definition)
    }
}

struct ServiceEntry {
    transport: Arc<dyn Transport>,
    templates: HashMap<String, Document>,
    defaults: Option<Document>,
    settings: Option<ExecutionSettings>,
}

/// Read-only registry of services.
///
/// A service that declares request templates rejects steps naming any other
/// method with [`StepweaveError::Composition`]. A service with no templates
/// accepts every method and composes the step fragment over its defaults
/// only.
pub struct ServiceCatalog {
    services: HashMap<String, ServiceEntry>,
}

impl fmt::Debug for ServiceCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceCatalog")
            .field("services", &self.services.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ServiceCatalog {
    /// Creates a new catalog builder.
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::new()
    }

    /// Builds a catalog from a services document mapping name to
    /// [`ServiceDefinition`].
    pub fn from_definitions(
        services: &Document,
        factory: &TransportFactory,
    ) -> Result<Self, StepweaveError> {
        let entries = services.as_object().ok_or_else(|| {
            StepweaveError::Configuration("services document must be an object".to_string())
        })?;
        entries
            .iter()
            .try_fold(CatalogBuilder::new(), |builder, (name, definition)| {
                builder.add_definition(name.as_str(), definition, factory)
            })?
            .build()
    }

    /// Returns an iterator over all service names.
    pub fn service_names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    /// Returns `true` if a service with the given name exists.
    pub fn has_service(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// Returns the number of registered services.
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Returns `true` if no services are registered.
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    fn entry(&self, service: &str) -> Result<&ServiceEntry, StepweaveError> {
        self.services
            .get(service)
            .ok_or_else(|| StepweaveError::ServiceNotFound(service.to_string()))
    }
}

impl TransportRegistry for ServiceCatalog {
    fn resolve(&self, service: &str) -> Result<Arc<dyn Transport>, StepweaveError> {
        self.entry(service).map(|entry| Arc::clone(&entry.transport))
    }

    fn request_template(
        &self,
        service: &str,
        method: &str,
    ) -> Result<Option<&Document>, StepweaveError> {
        let entry = self.entry(service)?;
        if entry.templates.is_empty() {
            return Ok(None);
        }
        entry.templates.get(method).map(Some).ok_or_else(|| {
            StepweaveError::Composition(format!(
                "service '{service}' has no request template for method '{method}'"
            ))
        })
    }

    fn request_defaults(&self, service: &str) -> Option<&Document> {
        self.services.get(service)?.defaults.as_ref()
    }

    fn baseline_settings(&self, service: &str) -> Option<&ExecutionSettings> {
        self.services.get(service)?.settings.as_ref()
    }
}

/// Builder for constructing [`ServiceCatalog`] instances.
#[derive(Default)]
pub struct CatalogBuilder {
    transports: HashMap<String, Arc<dyn Transport>>,
    templates: HashMap<String, HashMap<String, Document>>,
    defaults: HashMap<String, Document>,
    settings: HashMap<String, ExecutionSettings>,
}

impl CatalogBuilder {
    /// Creates a new empty catalog builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a service served by `transport`.
    pub fn add_service<T: Transport + 'static>(self, name: impl Into<String>, transport: T) -> Self {
        self.add_shared_service(name, Arc::new(transport))
    }

    /// Adds a service served by an already shared transport.
    pub fn add_shared_service(
        mut self,
        name: impl Into<String>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        self.transports.insert(name.into(), transport);
        self
    }

    /// Adds the request template for `method` on `service`.
    pub fn add_template(
        mut self,
        service: impl Into<String>,
        method: impl Into<String>,
        template: Document,
    ) -> Self {
        self.templates
            .entry(service.into())
            .or_default()
            .insert(method.into(), template);
        self
    }

    /// Sets the service-wide request defaults.
    pub fn with_defaults(mut self, service: impl Into<String>, defaults: Document) -> Self {
        self.defaults.insert(service.into(), defaults);
        self
    }

    /// Sets the service's baseline settings.
    pub fn with_settings(mut self, service: impl Into<String>, settings: ExecutionSettings) -> Self {
        self.settings.insert(service.into(), settings);
        self
    }

    /// Adds a service from its definition document, building the transport
    /// through `factory`.
    pub fn add_definition(
        mut self,
        name: &str,
        definition: &Document,
        factory: &TransportFactory,
    ) -> Result<Self, StepweaveError> {
        let definition = ServiceDefinition::from_document(definition)?;
        let transport = factory.create(&definition)?;
        debug!(
            service = name,
            client = %definition.client,
            apis = definition.apis.len(),
            "Service registered"
        );

        self = self.add_shared_service(name, transport);
        for api in definition.apis {
            self = self.add_template(name, api.name, Value::Object(api.request));
        }
        if !definition.defaults.is_null() {
            self = self.with_defaults(name, definition.defaults);
        }
        if let Some(settings) = definition.settings {
            self = self.with_settings(name, settings);
        }
        Ok(self)
    }

    /// Builds the catalog.
    ///
    /// Fails if a template, defaults or settings entry names a service
    /// without a transport, or if a template or defaults document is not an
    /// object.
    pub fn build(self) -> Result<ServiceCatalog, StepweaveError> {
        let known = |service: &String| {
            if self.transports.contains_key(service) {
                Ok(())
            } else {
                Err(StepweaveError::Configuration(format!(
                    "service '{service}' is configured but has no transport"
                )))
            }
        };
        self.templates.keys().try_for_each(known)?;
        self.defaults.keys().try_for_each(known)?;
        self.settings.keys().try_for_each(known)?;

        for (service, methods) in &self.templates {
            for (method, template) in methods {
                if !template.is_object() {
                    return Err(StepweaveError::Composition(format!(
                        "request template '{service}.{method}' must be an object"
                    )));
                }
            }
        }
        for (service, defaults) in &self.defaults {
            if !defaults.is_object() {
                return Err(StepweaveError::Composition(format!(
                    "request defaults for '{service}' must be an object"
                )));
            }
        }

        let CatalogBuilder {
            transports,
            mut templates,
            mut defaults,
            mut settings,
        } = self;
        let services = transports
            .into_iter()
            .map(|(name, transport)| {
                let entry = ServiceEntry {
                    transport,
                    templates: templates.remove(&name).unwrap_or_default(),
                    defaults: defaults.remove(&name),
                    settings: settings.remove(&name),
                };
                (name, entry)
            })
            .collect();

        Ok(ServiceCatalog { services })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    #[derive(Debug)]
    struct EchoTransport;

    #[async_trait]
    impl Transport for EchoTransport {
        async fn execute(&self, request: Document) -> Result<Document, StepweaveError> {
            Ok(request)
        }
    }

    fn factory() -> TransportFactory {
        TransportFactory::new().register("REST", |_| Ok(Arc::new(EchoTransport)))
    }

    #[test]
    fn test_builder_lookup() {
        let catalog = ServiceCatalog::builder()
            .add_service("orders", EchoTransport)
            .add_template("orders", "create", json!({"method": "POST"}))
            .with_settings("orders", ExecutionSettings::no_retry())
            .build()
            .expect("valid catalog");

        assert!(catalog.has_service("orders"));
        assert_eq!(catalog.len(), 1);
        assert!(catalog.resolve("orders").is_ok());
        assert_eq!(
            catalog.request_template("orders", "create").expect("known method"),
            Some(&json!({"method": "POST"}))
        );
        assert_eq!(
            catalog.baseline_settings("orders"),
            Some(&ExecutionSettings::no_retry())
        );
        assert!(catalog.request_defaults("orders").is_none());
    }

    #[test]
    fn test_unknown_service_and_method() {
        let catalog = ServiceCatalog::builder()
            .add_service("orders", EchoTransport)
            .add_template("orders", "create", json!({}))
            .build()
            .expect("valid catalog");

        assert!(matches!(
            catalog.resolve("billing"),
            Err(StepweaveError::ServiceNotFound(name)) if name == "billing"
        ));
        assert!(matches!(
            catalog.request_template("orders", "cancel"),
            Err(StepweaveError::Composition(_))
        ));
    }

    #[test]
    fn test_service_without_templates_accepts_any_method() {
        let catalog = ServiceCatalog::builder()
            .add_service("cache", EchoTransport)
            .build()
            .expect("valid catalog");
        assert_eq!(catalog.request_template("cache", "get").expect("no templates"), None);
    }

    #[test]
    fn test_builder_validation() {
        let result = ServiceCatalog::builder()
            .add_template("orders", "create", json!({}))
            .build();
        assert!(matches!(result, Err(StepweaveError::Configuration(_))));

        let result = ServiceCatalog::builder()
            .add_service("orders", EchoTransport)
            .add_template("orders", "create", json!("POST /orders"))
            .build();
        assert!(matches!(result, Err(StepweaveError::Composition(_))));
    }

    #[test]
    fn test_from_definitions() {
        let services = json!({
            "orders": {
                "client": "REST",
                "defaults": {"baseUri": "https://shop.test"},
                "apis": [
                    {"name": "createOrder", "method": "POST", "path": "/orders"},
                    {"name": "getOrder", "method": "GET", "path": "/orders/{id}"}
                ],
                "settings": {"maxRetries": 0}
            }
        });

        let catalog = ServiceCatalog::from_definitions(&services, &factory()).expect("valid catalog");
        assert_eq!(catalog.service_names().collect::<Vec<_>>(), vec!["orders"]);
        assert_eq!(
            catalog.request_template("orders", "getOrder").expect("known method"),
            Some(&json!({"method": "GET", "path": "/orders/{id}"}))
        );
        assert_eq!(
            catalog.request_defaults("orders"),
            Some(&json!({"baseUri": "https://shop.test"}))
        );
        assert_eq!(
            catalog.baseline_settings("orders").map(|s| s.max_retries),
            Some(0)
        );
    }

    #[test]
    fn test_unknown_client_tag() {
        let services = json!({"queue": {"client": "QUEUE_KAFKA"}});
        let result = ServiceCatalog::from_definitions(&services, &factory());
        assert!(matches!(result, Err(StepweaveError::Configuration(message)) if message.contains("QUEUE_KAFKA")));
    }

    #[test]
    fn test_malformed_definition() {
        let services = json!({"orders": {"apis": []}});
        assert!(ServiceCatalog::from_definitions(&services, &factory()).is_err());
        assert!(ServiceCatalog::from_definitions(&json!([]), &factory()).is_err());
    }
}
