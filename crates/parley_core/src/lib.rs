pub mod domain;
pub mod ports;

pub use domain::{AuthSession, ChatMessage, Role, User, UserCredentials};
pub use ports::{DatabaseService, PortError, PortResult, TextGenerationService};
