use crate::transport::Transport;
use std::collections::HashMap;
use voxlive_core::SessionError;

pub struct TransportRegistry {
    factories: HashMap<String, fn() -> Box<dyn Transport>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register("gemini", || Box::new(crate::gemini::GeminiTransport::new()));
        registry.register("null", || Box::new(crate::null_transport::NullTransport::new()));
        registry
    }

    pub fn register(&mut self, name: &str, factory: fn() -> Box<dyn Transport>) {
        self.factories.insert(name.to_string(), factory);
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn Transport>, SessionError> {
        self.factories
            .get(name)
            .map(|f| f())
            .ok_or_else(|| SessionError::TransportNotFound(name.to_string()))
    }

    pub fn list_transports(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for TransportRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NullTransport;

    #[test]
    fn test_registry_has_builtin_transports() {
        let registry = TransportRegistry::new();
        assert_eq!(registry.list_transports(), vec!["gemini", "null"]);
    }

    #[test]
    fn test_registry_create_returns_named_transport() {
        let registry = TransportRegistry::new();
        assert_eq!(registry.create("gemini").unwrap().name(), "gemini");
        assert_eq!(registry.create("null").unwrap().name(), "null");
    }

    #[test]
    fn test_registry_create_unknown_returns_error() {
        let registry = TransportRegistry::new();
        match registry.create("carrier-pigeon") {
            Err(SessionError::TransportNotFound(name)) => assert_eq!(name, "carrier-pigeon"),
            _ => panic!("expected TransportNotFound"),
        }
    }

    #[test]
    fn test_registry_register_custom_transport() {
        let mut registry = TransportRegistry::new();
        registry.register("offline", || Box::new(NullTransport::new()));
        assert!(registry.create("offline").is_ok());
        assert!(registry.list_transports().contains(&"offline"));
    }
}
