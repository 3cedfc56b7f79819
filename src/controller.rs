//! Controller registration.
//!
//! A controller is a named group of methods. At registration the method
//! names are sorted into roles by convention:
//!
//! | Name | Role |
//! |---|---|
//! | `Before` | runs before every action of the controller |
//! | `After` | runs after every action of the controller |
//! | `Before<Action>` | runs before `<Action>` only |
//! | `After<Action>` | runs after `<Action>` only |
//! | anything else | an action |
//!
//! `Before<X>` / `After<X>` only count as interceptors when `X` is itself a
//! registered method; otherwise they are plain actions. The result is a
//! read-only table the dispatcher queries by name.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::handler::{BoxedHandler, Handler};

/// A declared action parameter.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParameterInfo {
    pub name: String,
}

/// One controller method: its name, declared parameters and the callable.
pub struct MethodInfo {
    pub name: String,
    pub parameters: Vec<ParameterInfo>,
    handler: BoxedHandler,
}

impl MethodInfo {
    pub fn new(name: impl Into<String>, handler: impl Handler) -> Self {
        Self { name: name.into(), parameters: Vec::new(), handler: handler.into_boxed_handler() }
    }

    pub fn parameter(mut self, name: impl Into<String>) -> Self {
        self.parameters.push(ParameterInfo { name: name.into() });
        self
    }
}

/// Builder for a controller's methods.
///
/// ```rust,ignore
/// Controller::new("Site")
///     .method("GetInvolved", get_involved)
///     .method("Before", log_entry)
///     .method("BeforeGetInvolved", check_session);
/// ```
pub struct Controller {
    name: String,
    methods: Vec<MethodInfo>,
}

impl Controller {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), methods: Vec::new() }
    }

    pub fn method(mut self, name: impl Into<String>, handler: impl Handler) -> Self {
        self.methods.push(MethodInfo::new(name, handler));
        self
    }

    pub fn method_info(mut self, info: MethodInfo) -> Self {
        self.methods.push(info);
        self
    }
}

/// A registered action and its method-specific interceptors.
pub struct ActionEntry {
    name: String,
    parameters: Vec<ParameterInfo>,
    handler: BoxedHandler,
    before: Option<BoxedHandler>,
    after: Option<BoxedHandler>,
}

impl ActionEntry {
    pub fn name(&self) -> &str { &self.name }
    pub fn parameters(&self) -> &[ParameterInfo] { &self.parameters }
}

/// A registered controller.
pub struct ControllerEntry {
    before: Option<BoxedHandler>,
    after: Option<BoxedHandler>,
    actions: HashMap<String, ActionEntry>,
}

impl ControllerEntry {
    pub fn action(&self, name: &str) -> Option<&ActionEntry> {
        self.actions.get(name)
    }

    pub fn has_before(&self) -> bool { self.before.is_some() }
    pub fn has_after(&self) -> bool { self.after.is_some() }
}

/// The position of a step in an action's invocation order.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Step {
    Before,
    BeforeAction,
    Action,
    AfterAction,
    After,
}

/// The ordered steps for one action, borrowed from the registry.
pub struct ActionChain<'a> {
    controller: &'a ControllerEntry,
    action: &'a ActionEntry,
}

impl<'a> ActionChain<'a> {
    /// `Before` → `Before<Action>` → action → `After<Action>` → `After`,
    /// skipping interceptors that were not declared.
    pub fn steps(&self) -> impl Iterator<Item = (Step, &'a BoxedHandler)> + use<'a> {
        [
            (Step::Before, self.controller.before.as_ref()),
            (Step::BeforeAction, self.action.before.as_ref()),
            (Step::Action, Some(&self.action.handler)),
            (Step::AfterAction, self.action.after.as_ref()),
            (Step::After, self.controller.after.as_ref()),
        ]
        .into_iter()
        .filter_map(|(step, h)| h.map(|h| (step, h)))
    }

    pub fn action(&self) -> &'a ActionEntry { self.action }
}

/// All registered controllers. Built once at startup; read-only afterwards.
#[derive(Default)]
pub struct ControllerRegistry {
    controllers: HashMap<String, ControllerEntry>,
}

impl ControllerRegistry {
    pub fn new() -> Self { Self::default() }

    pub fn add(&mut self, controller: Controller) {
        self.register(&controller.name, controller.methods);
    }

    /// Registers `type_name`'s methods, classifying interceptors by name.
    pub fn register(&mut self, type_name: &str, methods: Vec<MethodInfo>) {
        let names: Vec<String> = methods.iter().map(|m| m.name.clone()).collect();
        let interceptor_of = |prefix: &str, name: &str| -> Option<String> {
            name.strip_prefix(prefix)
                .filter(|rest| !rest.is_empty() && names.iter().any(|n| n == rest))
                .map(str::to_owned)
        };

        let mut entry = ControllerEntry { before: None, after: None, actions: HashMap::new() };
        let mut before_action = HashMap::new();
        let mut after_action = HashMap::new();

        for m in methods {
            if m.name == "Before" {
                entry.before = Some(m.handler);
            } else if m.name == "After" {
                entry.after = Some(m.handler);
            } else if let Some(action) = interceptor_of("Before", &m.name) {
                before_action.insert(action, m.handler);
            } else if let Some(action) = interceptor_of("After", &m.name) {
                after_action.insert(action, m.handler);
            } else {
                entry.actions.insert(m.name.clone(), ActionEntry {
                    name: m.name,
                    parameters: m.parameters,
                    handler: m.handler,
                    before: None,
                    after: None,
                });
            }
        }

        for (name, action) in &mut entry.actions {
            action.before = before_action.remove(name);
            action.after = after_action.remove(name);
            debug!(
                controller = type_name,
                action = %name,
                before = action.before.is_some(),
                after = action.after.is_some(),
                "registered action"
            );
        }

        if self.controllers.insert(type_name.to_owned(), entry).is_some() {
            warn!(controller = type_name, "controller registered twice; keeping the last registration");
        }
    }

    pub fn controller(&self, name: &str) -> Option<&ControllerEntry> {
        self.controllers.get(name)
    }

    pub fn lookup(&self, controller: &str, action: &str) -> Option<ActionChain<'_>> {
        let controller = self.controllers.get(controller)?;
        let action = controller.actions.get(action)?;
        Some(ActionChain { controller, action })
    }
}
