//! Code this node runs on behalf of remote callers.

use cloudmesh_common::protocol::{RemoteFailure, Value};
use dashmap::DashMap;
use futures::future::BoxFuture;
use std::sync::Arc;

/// A service implementation published as a layer or method.
///
/// `parameter_types` are the caller's declared types, so one method name
/// can carry several overloads.
pub trait LayerService: Send + Sync + 'static {
    fn invoke(
        &self,
        method: &str,
        parameter_types: &[String],
        arguments: Vec<Value>,
    ) -> BoxFuture<'static, Result<Value, RemoteFailure>>;
}

/// Adapts a synchronous closure into a [`LayerService`].
pub struct FnService<F>(pub F);

impl<F> LayerService for FnService<F>
where
    F: Fn(&str, &[String], Vec<Value>) -> Result<Value, RemoteFailure> + Send + Sync + 'static,
{
    fn invoke(
        &self,
        method: &str,
        parameter_types: &[String],
        arguments: Vec<Value>,
    ) -> BoxFuture<'static, Result<Value, RemoteFailure>> {
        let result = (self.0)(method, parameter_types, arguments);
        Box::pin(async move { result })
    }
}

pub type Trigger = Arc<dyn Fn() + Send + Sync>;

/// Local layers, methods and triggers.
#[derive(Default)]
pub struct ServiceTable {
    layers: DashMap<String, Arc<dyn LayerService>>,
    methods: DashMap<String, Arc<dyn LayerService>>,
    triggers: DashMap<Vec<String>, Trigger>,
}

impl ServiceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_layer(&self, path: impl Into<String>, service: Arc<dyn LayerService>) {
        self.layers.insert(path.into(), service);
    }

    pub fn remove_layer(&self, path: &str) -> bool {
        self.layers.remove(path).is_some()
    }

    pub fn layer(&self, path: &str) -> Option<Arc<dyn LayerService>> {
        self.layers.get(path).map(|s| s.clone())
    }

    pub fn layer_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.layers.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        paths
    }

    pub fn add_method(&self, name: impl Into<String>, service: Arc<dyn LayerService>) {
        self.methods.insert(name.into(), service);
    }

    pub fn method(&self, name: &str) -> Option<Arc<dyn LayerService>> {
        self.methods.get(name).map(|s| s.clone())
    }

    pub fn add_trigger(&self, path: Vec<String>, trigger: Trigger) {
        self.triggers.insert(path, trigger);
    }

    pub fn trigger(&self, path: &[String]) -> Option<Trigger> {
        self.triggers.get(path).map(|t| t.clone())
    }
}

/// Failure returned when a call names a layer or method this node lacks.
pub fn no_such_service(what: &str) -> RemoteFailure {
    RemoteFailure::new("NoSuchService", format!("{} is not served here", what))
}

/// Failure returned by services for a method they do not implement.
pub fn no_such_method(method: &str) -> RemoteFailure {
    RemoteFailure::new("NoSuchMethod", format!("Unknown method: {}", method))
}

/// Built-in layer answering `echo` with its arguments and `node` with the
/// serving node's id.
pub fn echo_service(node_id: String) -> Arc<dyn LayerService> {
    Arc::new(FnService(move |method: &str, _types: &[String], arguments: Vec<Value>| {
        match method {
            "echo" => Ok(Value::Array(arguments)),
            "node" => Ok(Value::String(node_id.clone())),
            other => Err(no_such_method(other)),
        }
    }))
}
