//! Command dispatcher: routes property bundles to module instances.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::{ProcError, Result};
use crate::module::SharedCmd;
use crate::properties::Properties;

/// Maps unique instance names to module command interfaces.
///
/// Registration and unregistration happen during setup and teardown only;
/// `dispatch` may be called from any thread. Calls addressed to the same
/// module are serialized by the per-module lock; there is no ordering
/// guarantee across dispatches to different modules.
#[derive(Default)]
pub struct CmdDispatcher {
    interfaces: Mutex<BTreeMap<String, SharedCmd>>,
}

impl CmdDispatcher {
    /// Creates an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `instance_name` to a command interface.
    ///
    /// # Errors
    ///
    /// [`ProcError::InvalidArg`] for an empty name,
    /// [`ProcError::AlreadyRegistered`] if the name is already bound.
    pub fn register(&self, instance_name: &str, interface: SharedCmd) -> Result<()> {
        if instance_name.is_empty() {
            tracing::error!("instance name may not be empty");
            return Err(ProcError::InvalidArg("instance name may not be empty".into()));
        }
        let mut map = self.lock();
        if map.contains_key(instance_name) {
            tracing::error!(instance = instance_name, "cmd interface already registered");
            return Err(ProcError::AlreadyRegistered(instance_name.into()));
        }
        map.insert(instance_name.to_string(), interface);
        tracing::info!(instance = instance_name, "cmd interface registered");
        Ok(())
    }

    /// Removes the binding for `instance_name`, warning if none exists.
    pub fn unregister(&self, instance_name: &str) {
        if instance_name.is_empty() {
            tracing::warn!("instance name may not be empty");
            return;
        }
        if self.lock().remove(instance_name).is_some() {
            tracing::info!(instance = instance_name, "cmd interface unregistered");
        } else {
            tracing::warn!(instance = instance_name, "no cmd interface to unregister");
        }
    }

    /// True if `instance_name` is bound.
    pub fn is_registered(&self, instance_name: &str) -> bool {
        self.lock().contains_key(instance_name)
    }

    /// Delivers one command to the named instance.
    ///
    /// `return_properties` is cleared before delegation, so it only ever
    /// holds results of this dispatch.
    ///
    /// # Errors
    ///
    /// [`ProcError::NotRegistered`] for unknown names; otherwise whatever
    /// the module's command interface returns.
    pub fn dispatch(
        &self,
        instance_name: &str,
        cmd_properties: &Properties,
        return_properties: &mut Properties,
    ) -> Result<()> {
        let interface = self
            .lock()
            .get(instance_name)
            .cloned()
            .ok_or_else(|| ProcError::NotRegistered(instance_name.into()))?;

        tracing::debug!(instance = instance_name, "dispatching cmd");
        cmd_properties.dump("cmdProperties");
        return_properties.clear_all();
        let result = interface
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .process_cmd(cmd_properties, return_properties);
        return_properties.dump("returnProperties");
        result
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, SharedCmd>> {
        self.interfaces
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::CmdInterface;
    use std::sync::Arc;

    struct EchoCmd;

    impl CmdInterface for EchoCmd {
        fn init(&mut self) -> Result<()> {
            Ok(())
        }

        fn process_cmd(&mut self, cmd: &Properties, ret: &mut Properties) -> Result<()> {
            ret.set("echo", cmd.get::<i32>("cmd")?);
            Ok(())
        }
    }

    fn echo() -> SharedCmd {
        Arc::new(Mutex::new(EchoCmd))
    }

    #[test]
    fn register_and_dispatch() {
        let dispatcher = CmdDispatcher::new();
        dispatcher.register("vol", echo()).unwrap();

        let mut cmd = Properties::new();
        cmd.set("cmd", 3i32);
        let mut ret = Properties::new();
        ret.set("stale", 1i32);

        dispatcher.dispatch("vol", &cmd, &mut ret).unwrap();
        assert_eq!(ret.get::<i32>("echo").unwrap(), 3);
        // Return properties are cleared before delegation.
        assert!(!ret.has_key("stale"));
    }

    #[test]
    fn empty_name_is_rejected() {
        let dispatcher = CmdDispatcher::new();
        assert!(matches!(
            dispatcher.register("", echo()),
            Err(ProcError::InvalidArg(_))
        ));
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let dispatcher = CmdDispatcher::new();
        dispatcher.register("eq", echo()).unwrap();
        assert!(matches!(
            dispatcher.register("eq", echo()),
            Err(ProcError::AlreadyRegistered(_))
        ));
    }

    #[test]
    fn unknown_target_is_not_registered() {
        let dispatcher = CmdDispatcher::new();
        let mut ret = Properties::new();
        assert!(matches!(
            dispatcher.dispatch("ghost", &Properties::new(), &mut ret),
            Err(ProcError::NotRegistered(_))
        ));
    }

    #[test]
    fn unregister_frees_the_name() {
        let dispatcher = CmdDispatcher::new();
        dispatcher.register("mix", echo()).unwrap();
        dispatcher.unregister("mix");
        assert!(!dispatcher.is_registered("mix"));
        dispatcher.register("mix", echo()).unwrap();
    }
}
