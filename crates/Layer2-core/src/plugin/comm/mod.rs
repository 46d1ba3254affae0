//! Communication - 플러그인 간 메시징, capability 요청, 공유 메모리

mod bus;
mod message;
mod shared_memory;

pub use bus::{CapabilityMatch, CommunicationBus, DeliveryReport, PluginMessageBus};
pub use message::{
    capability_handler_fn, message_handler_fn, CapabilityHandler, CapabilityRegistration,
    CapabilityRequest, CapabilityResponse, FilterOperator, MessageFilter, MessageHandler,
    MessageType, PluginMessage,
};
pub use shared_memory::{SharedMemoryRegistry, SharedMemorySpace, SpaceAccess, SpaceGrant};
