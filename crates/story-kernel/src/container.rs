//! A capability-gated dependency-injection container.
//!
//! Components register a factory under a dotted name; callers resolve by
//! name or by the interface the component claims to implement. See
//! `spec.md` §4.1 for the full contract this module implements.

use crate::capability::CapabilitySet;
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use story_base::{ErrorKind, Result, StoryError};

/// A type-erased, reference-counted component instance.
pub type Instance = Rc<dyn Any>;

/// Builds one instance of a component, given the container (for resolving
/// its own dependencies) and any caller-supplied arguments.
pub type Factory = Box<dyn Fn(&Container, &[Instance]) -> Result<Instance>>;

/// Runs after construction, before the instance is handed to the caller.
pub type InitHook = Box<dyn Fn(&Instance, &Container) -> Result<()>>;

/// Runs at container teardown for singleton instances, in reverse
/// registration order.
pub type DestroyHook = Box<dyn Fn(&Instance)>;

/// Checks whether an instance satisfies an interface's contract, returning
/// the interface's own rejection reason as a [`StoryError`] on failure.
pub type InterfaceValidator = Box<dyn Fn(&Instance) -> Result<()>>;

/// Options accompanying a [`Container::register`] call.
#[derive(Default)]
pub struct RegistrationOptions {
    pub singleton: bool,
    pub depends: Vec<String>,
    pub implements: Option<String>,
    pub capability: Option<String>,
    pub init: Option<InitHook>,
    pub destroy: Option<DestroyHook>,
}

struct Registration {
    factory: Factory,
    opts: RegistrationOptions,
}

/// The DI container itself.
///
/// Registration (`register`, `register_interface_validator`) takes `&mut
/// self`; resolution (`resolve`, `resolve_interface`, `resolve_all`) takes
/// `&self` and uses interior mutability for singleton caching, the
/// in-progress resolution stack, and capability declarations, so factories
/// may themselves call back into `resolve` for their own dependencies.
pub struct Container {
    registrations: HashMap<String, Registration>,
    registration_order: Vec<String>,
    singletons: RefCell<HashMap<String, Instance>>,
    resolving: RefCell<Vec<String>>,
    interface_validators: HashMap<String, InterfaceValidator>,
    capabilities: RefCell<CapabilitySet>,
}

impl Container {
    pub fn new() -> Self {
        Self {
            registrations: HashMap::new(),
            registration_order: Vec::new(),
            singletons: RefCell::new(HashMap::new()),
            resolving: RefCell::new(Vec::new()),
            interface_validators: HashMap::new(),
            capabilities: RefCell::new(CapabilitySet::new()),
        }
    }

    /// Registers a component factory under `name`.
    ///
    /// Fails with [`ErrorKind::Duplicate`] if `name` is already registered.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: Factory,
        opts: RegistrationOptions,
    ) -> Result<()> {
        let name = name.into();
        if self.registrations.contains_key(&name) {
            return Err(StoryError::without_span(
                ErrorKind::Duplicate,
                format!("component already registered: '{name}'"),
            ));
        }
        self.registration_order.push(name.clone());
        self.registrations.insert(name, Registration { factory, opts });
        Ok(())
    }

    /// Registers a validator run whenever a component claiming to implement
    /// `iface` is resolved.
    pub fn register_interface_validator(&mut self, iface: impl Into<String>, validator: InterfaceValidator) {
        self.interface_validators.insert(iface.into(), validator);
    }

    /// A read-only view of the capabilities declared by resolved components.
    pub fn capabilities(&self) -> std::cell::Ref<'_, CapabilitySet> {
        self.capabilities.borrow()
    }

    /// Resolves `name`, constructing it (and any declared dependencies not
    /// yet resolved) on demand.
    ///
    /// Singletons are constructed at most once; every other component is
    /// constructed fresh on each call. Fails with
    /// [`ErrorKind::DependencyCycle`] if resolution of `name` is already
    /// in progress higher up the call stack, or [`ErrorKind::NotFound`] if
    /// `name` was never registered.
    pub fn resolve(&self, name: &str, args: &[Instance]) -> Result<Instance> {
        if self.resolving.borrow().iter().any(|n| n == name) {
            let chain = self.resolving.borrow().join(" -> ");
            return Err(StoryError::without_span(
                ErrorKind::DependencyCycle,
                format!("dependency cycle detected: {chain} -> {name}"),
            ));
        }

        let reg = self.registrations.get(name).ok_or_else(|| {
            StoryError::without_span(ErrorKind::NotFound, format!("no component registered: '{name}'"))
        })?;

        if reg.opts.singleton {
            if let Some(existing) = self.singletons.borrow().get(name) {
                return Ok(existing.clone());
            }
        }

        self.resolving.borrow_mut().push(name.to_string());
        let built = self.build(reg, args);
        self.resolving.borrow_mut().pop();
        let instance = built?;

        if reg.opts.singleton {
            self.singletons.borrow_mut().insert(name.to_string(), instance.clone());
        }
        Ok(instance)
    }

    fn build(&self, reg: &Registration, args: &[Instance]) -> Result<Instance> {
        for dep in &reg.opts.depends {
            self.resolve(dep, &[])?;
        }

        let instance = (reg.factory)(self, args)?;

        if let Some(capability) = &reg.opts.capability {
            let mut caps = self.capabilities.borrow_mut();
            if !caps.is_known(capability) {
                caps.declare(capability.clone(), true);
            }
        }

        if let Some(iface) = &reg.opts.implements {
            if let Some(validator) = self.interface_validators.get(iface) {
                validator(&instance)?;
            }
        }

        if let Some(init) = &reg.opts.init {
            init(&instance, self)?;
        }

        Ok(instance)
    }

    /// Resolves the first registered component (in registration order)
    /// claiming to implement `iface`.
    pub fn resolve_interface(&self, iface: &str) -> Result<Instance> {
        let name = self
            .registration_order
            .iter()
            .find(|name| {
                self.registrations
                    .get(name.as_str())
                    .map(|r| r.opts.implements.as_deref() == Some(iface))
                    .unwrap_or(false)
            })
            .ok_or_else(|| {
                StoryError::without_span(ErrorKind::NotFound, format!("no component implements '{iface}'"))
            })?;
        self.resolve(name, &[])
    }

    /// Resolves every registered component (in registration order) claiming
    /// to implement `iface`.
    pub fn resolve_all(&self, iface: &str) -> Result<Vec<Instance>> {
        self.registration_order
            .iter()
            .filter(|name| {
                self.registrations
                    .get(name.as_str())
                    .map(|r| r.opts.implements.as_deref() == Some(iface))
                    .unwrap_or(false)
            })
            .map(|name| self.resolve(name, &[]))
            .collect()
    }

    /// Runs `destroy` hooks for every constructed singleton, in reverse
    /// registration order, then clears cached instances.
    pub fn teardown(&mut self) {
        for name in self.registration_order.iter().rev() {
            let instance = self.singletons.borrow_mut().remove(name);
            if let Some(instance) = instance {
                if let Some(reg) = self.registrations.get(name) {
                    if let Some(destroy) = &reg.opts.destroy {
                        destroy(&instance);
                    }
                }
            }
        }
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc as StdRc;

    fn counter_factory(value: i32) -> Factory {
        Box::new(move |_container, _args| Ok(StdRc::new(value) as Instance))
    }

    #[test]
    fn resolve_returns_constructed_instance() {
        let mut container = Container::new();
        container
            .register("story.counter", counter_factory(42), RegistrationOptions::default())
            .unwrap();
        let instance = container.resolve("story.counter", &[]).unwrap();
        assert_eq!(*instance.downcast_ref::<i32>().unwrap(), 42);
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut container = Container::new();
        container
            .register("a", counter_factory(1), RegistrationOptions::default())
            .unwrap();
        let err = container
            .register("a", counter_factory(2), RegistrationOptions::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Duplicate);
    }

    #[test]
    fn unknown_component_resolve_fails_not_found() {
        let container = Container::new();
        let err = container.resolve("missing", &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn singleton_is_constructed_once() {
        let call_count = StdRc::new(Cell::new(0));
        let counted = call_count.clone();
        let factory: Factory = Box::new(move |_container, _args| {
            counted.set(counted.get() + 1);
            Ok(StdRc::new(counted.get()) as Instance)
        });
        let mut container = Container::new();
        container
            .register(
                "singleton",
                factory,
                RegistrationOptions {
                    singleton: true,
                    ..Default::default()
                },
            )
            .unwrap();
        container.resolve("singleton", &[]).unwrap();
        container.resolve("singleton", &[]).unwrap();
        assert_eq!(call_count.get(), 1);
    }

    #[test]
    fn non_singleton_is_constructed_every_resolve() {
        let call_count = StdRc::new(Cell::new(0));
        let counted = call_count.clone();
        let factory: Factory = Box::new(move |_container, _args| {
            counted.set(counted.get() + 1);
            Ok(StdRc::new(()) as Instance)
        });
        let mut container = Container::new();
        container.register("transient", factory, RegistrationOptions::default()).unwrap();
        container.resolve("transient", &[]).unwrap();
        container.resolve("transient", &[]).unwrap();
        assert_eq!(call_count.get(), 2);
    }

    #[test]
    fn dependency_cycle_is_detected() {
        let mut container = Container::new();
        container
            .register(
                "a",
                Box::new(|c: &Container, _| c.resolve("b", &[])),
                RegistrationOptions::default(),
            )
            .unwrap();
        container
            .register(
                "b",
                Box::new(|c: &Container, _| c.resolve("a", &[])),
                RegistrationOptions::default(),
            )
            .unwrap();
        let err = container.resolve("a", &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DependencyCycle);
    }

    #[test]
    fn capability_is_declared_on_first_resolve() {
        let mut container = Container::new();
        container
            .register(
                "gated",
                counter_factory(1),
                RegistrationOptions {
                    capability: Some("state:read".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(!container.capabilities().is_known("state:read"));
        container.resolve("gated", &[]).unwrap();
        assert!(container.capabilities().has("state:read"));
    }

    #[test]
    fn interface_validation_runs_after_construction() {
        let mut container = Container::new();
        container.register_interface_validator(
            "IPositive",
            Box::new(|instance| {
                let value = *instance.downcast_ref::<i32>().unwrap();
                if value > 0 {
                    Ok(())
                } else {
                    Err(StoryError::without_span(ErrorKind::Validation, "must be positive"))
                }
            }),
        );
        container
            .register(
                "bad",
                counter_factory(-1),
                RegistrationOptions {
                    implements: Some("IPositive".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        let err = container.resolve("bad", &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn resolve_interface_finds_first_implementor() {
        let mut container = Container::new();
        container
            .register(
                "first",
                counter_factory(1),
                RegistrationOptions {
                    implements: Some("INumber".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        container
            .register(
                "second",
                counter_factory(2),
                RegistrationOptions {
                    implements: Some("INumber".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        let resolved = container.resolve_interface("INumber").unwrap();
        assert_eq!(*resolved.downcast_ref::<i32>().unwrap(), 1);
        let all = container.resolve_all("INumber").unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn destroy_runs_in_reverse_registration_order_at_teardown() {
        let order = StdRc::new(RefCell::new(Vec::new()));
        let mut container = Container::new();
        for name in ["first", "second"] {
            let order = order.clone();
            let name_owned = name.to_string();
            container
                .register(
                    name,
                    counter_factory(1),
                    RegistrationOptions {
                        singleton: true,
                        destroy: Some(Box::new(move |_instance| order.borrow_mut().push(name_owned.clone()))),
                        ..Default::default()
                    },
                )
                .unwrap();
        }
        container.resolve("first", &[]).unwrap();
        container.resolve("second", &[]).unwrap();
        container.teardown();
        assert_eq!(*order.borrow(), vec!["second".to_string(), "first".to_string()]);
    }
}
