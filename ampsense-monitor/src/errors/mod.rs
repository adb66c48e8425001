pub mod bind;
pub mod registry;
pub mod transport;

pub use bind::BindError;
pub use registry::RegistryError;
pub use transport::TransportError;
