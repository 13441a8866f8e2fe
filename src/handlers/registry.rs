use std::sync::Arc;

use super::traits::{
    ConsumerProvider, ErrorHandlerProvider, ErrorMappingProvider, FilterPredicateProvider,
    MappingProvider, MethodInvocationProvider, RunnableProvider,
};

/// Registry of constraint handler providers.
///
/// Populated once at process start, then shared read-only (via `Arc`)
/// across every enforcement subscription. Registration order is preserved
/// per capability; the compiler relies on it as the stable tie-break for
/// priority ordering.
#[derive(Default)]
pub struct HandlerRegistry {
    runnable: Vec<Arc<dyn RunnableProvider>>,
    consumer: Vec<Arc<dyn ConsumerProvider>>,
    mapping: Vec<Arc<dyn MappingProvider>>,
    error_handler: Vec<Arc<dyn ErrorHandlerProvider>>,
    error_mapping: Vec<Arc<dyn ErrorMappingProvider>>,
    filter: Vec<Arc<dyn FilterPredicateProvider>>,
    invocation: Vec<Arc<dyn MethodInvocationProvider>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_runnable(mut self, provider: Arc<dyn RunnableProvider>) -> Self {
        self.runnable.push(provider);
        self
    }

    pub fn with_consumer(mut self, provider: Arc<dyn ConsumerProvider>) -> Self {
        self.consumer.push(provider);
        self
    }

    pub fn with_mapping(mut self, provider: Arc<dyn MappingProvider>) -> Self {
        self.mapping.push(provider);
        self
    }

    pub fn with_error_handler(mut self, provider: Arc<dyn ErrorHandlerProvider>) -> Self {
        self.error_handler.push(provider);
        self
    }

    pub fn with_error_mapping(mut self, provider: Arc<dyn ErrorMappingProvider>) -> Self {
        self.error_mapping.push(provider);
        self
    }

    pub fn with_filter(mut self, provider: Arc<dyn FilterPredicateProvider>) -> Self {
        self.filter.push(provider);
        self
    }

    pub fn with_invocation(mut self, provider: Arc<dyn MethodInvocationProvider>) -> Self {
        self.invocation.push(provider);
        self
    }

    pub fn runnable(&self) -> &[Arc<dyn RunnableProvider>] {
        &self.runnable
    }

    pub fn consumer(&self) -> &[Arc<dyn ConsumerProvider>] {
        &self.consumer
    }

    pub fn mapping(&self) -> &[Arc<dyn MappingProvider>] {
        &self.mapping
    }

    pub fn error_handler(&self) -> &[Arc<dyn ErrorHandlerProvider>] {
        &self.error_handler
    }

    pub fn error_mapping(&self) -> &[Arc<dyn ErrorMappingProvider>] {
        &self.error_mapping
    }

    pub fn filter(&self) -> &[Arc<dyn FilterPredicateProvider>] {
        &self.filter
    }

    pub fn invocation(&self) -> &[Arc<dyn MethodInvocationProvider>] {
        &self.invocation
    }

    /// Total provider count, across all capabilities.
    pub fn len(&self) -> usize {
        self.runnable.len()
            + self.consumer.len()
            + self.mapping.len()
            + self.error_handler.len()
            + self.error_mapping.len()
            + self.filter.len()
            + self.invocation.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
