//! Capability providers and the per-capability session cache.

pub mod capability;
pub mod ollama;
pub mod on_device;
pub mod session_manager;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use capability::{CapabilityProvider, CapabilitySession, ContentPart, ProviderInput};
pub use on_device::OnDeviceProvider;
pub use session_manager::SessionManager;
