pub mod registry;
pub mod traits;

pub use registry::HandlerRegistry;
pub use traits::{
    ConsumerHandler, ConsumerProvider, ErrorHandler, ErrorHandlerProvider, ErrorMappingHandler,
    ErrorMappingProvider, FilterHandler, FilterPredicateProvider, InvocationHandler,
    MappingHandler, MappingProvider, MethodInvocationProvider, Responsible, RunnableHandler,
    RunnableProvider, Signal,
};
