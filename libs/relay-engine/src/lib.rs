pub mod backend;
pub mod coordinator;
pub mod languages;
pub mod scorer;
pub mod workspace;

pub use backend::{Backend, ExecutionBackend, LocalBackend, RemoteClient};
pub use coordinator::{validate_question, Coordinator, ProbeSelection};
pub use languages::{LanguageProfile, LanguageRegistry};
