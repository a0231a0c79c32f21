//! The story engine's kernel: a dependency-injection container, a
//! priority-ordered event bus, a dotted-name module registry, and a
//! capability set, wired together so a host process builds exactly one
//! kernel and every other crate resolves its collaborators through it
//! (`spec.md` §4.1, §9).

pub mod capability;
pub mod container;
pub mod event_bus;
pub mod registry;

pub use capability::CapabilitySet;
pub use container::{
    Container, DestroyHook, Factory, InitHook, Instance, InterfaceValidator, RegistrationOptions,
};
pub use event_bus::{EventBus, Subscription};
pub use registry::Registry;
