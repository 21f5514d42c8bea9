//! Module libraries and the plugin engine.
//!
//! A module library advertises a set of module types, each with a factory
//! that builds the core/command pair for a new instance. The plugin engine
//! collects libraries, gates them on the expected info string and creates
//! modules by type name, registering each new instance's command interface
//! with the dispatcher.
//!
//! Libraries are plain values registered at startup; the discovery
//! contract (info-string gate, factory by type name, destruction through
//! the engine) matches the loadable-library design it replaces.

use std::sync::Arc;

use crate::dispatcher::CmdDispatcher;
use crate::error::{ProcError, Result};
use crate::module::{ModuleConfig, ProcessingModule, SharedCmd, SharedCore};

/// Info string a library must report to be retained by the engine.
pub const MODULE_LIBRARY_INFO: &str = "strada-audio-modules";

/// Factory building the core and command interface of one module instance.
pub type ModuleFactory = fn(&ModuleConfig) -> Result<(SharedCore, SharedCmd)>;

/// One module type advertised by a library.
pub struct ModuleTypeEntry {
    /// Factory key, e.g. `"volume"`.
    pub type_name: &'static str,
    /// Instance factory.
    pub factory: ModuleFactory,
}

/// A collection of module types under a library name.
pub struct ModuleLibrary {
    /// Library name, for diagnostics.
    pub name: &'static str,
    /// Info string; must equal [`MODULE_LIBRARY_INFO`] to be retained.
    pub info: &'static str,
    /// Advertised module types.
    pub entries: Vec<ModuleTypeEntry>,
}

impl ModuleLibrary {
    /// Type names advertised by this library.
    pub fn module_type_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|e| e.type_name)
    }
}

/// Creates processing modules by type name and wires them into the
/// command dispatcher.
pub struct PluginEngine {
    libraries: Vec<ModuleLibrary>,
    dispatcher: Arc<CmdDispatcher>,
}

impl PluginEngine {
    /// Creates an engine with no libraries registered yet.
    pub fn new(dispatcher: Arc<CmdDispatcher>) -> Self {
        Self {
            libraries: Vec::new(),
            dispatcher,
        }
    }

    /// Offers a library to the engine.
    ///
    /// Libraries with the wrong info string or without any module types
    /// are ignored with a warning, mirroring how foreign or empty shared
    /// objects are skipped during directory discovery.
    pub fn register_library(&mut self, library: ModuleLibrary) {
        if library.info != MODULE_LIBRARY_INFO {
            tracing::warn!(
                library = library.name,
                info = library.info,
                "ignoring module library with unexpected info string"
            );
            return;
        }
        if library.entries.is_empty() {
            tracing::warn!(
                library = library.name,
                "ignoring module library without module types"
            );
            return;
        }
        for type_name in library.module_type_names() {
            tracing::info!(library = library.name, type_name, "module type available");
        }
        self.libraries.push(library);
    }

    /// All module type names across the retained libraries.
    pub fn module_types(&self) -> Vec<&'static str> {
        self.libraries
            .iter()
            .flat_map(ModuleLibrary::module_type_names)
            .collect()
    }

    /// The dispatcher new modules are registered with.
    pub fn dispatcher(&self) -> &Arc<CmdDispatcher> {
        &self.dispatcher
    }

    /// Creates a module of `type_name` under `instance_name`.
    ///
    /// The engine injects `typeName` and `instanceName` into the config's
    /// properties, instantiates through the first library advertising the
    /// type, and registers the new module's command interface with the
    /// dispatcher. On a name collision the module is dropped again.
    ///
    /// # Errors
    ///
    /// [`ProcError::PluginLoadFailed`] when no libraries are registered,
    /// [`ProcError::InvalidArg`] for unknown type names, and any error of
    /// the factory or the dispatcher registration.
    pub fn create_module(
        &self,
        config: ModuleConfig,
        type_name: &str,
        instance_name: &str,
    ) -> Result<ProcessingModule> {
        if self.libraries.is_empty() {
            return Err(ProcError::PluginLoadFailed(
                "no module libraries registered".into(),
            ));
        }

        config.set_property("typeName", type_name.to_string());
        config.set_property("instanceName", instance_name.to_string());

        let entry = self
            .libraries
            .iter()
            .flat_map(|lib| lib.entries.iter())
            .find(|entry| entry.type_name == type_name)
            .ok_or_else(|| ProcError::InvalidArg(format!("unknown module type '{type_name}'")))?;

        let (core, cmd) = (entry.factory)(&config)?;
        self.dispatcher.register(instance_name, Arc::clone(&cmd))?;

        tracing::info!(type_name, instance = instance_name, "module created");
        Ok(ProcessingModule::new(
            type_name,
            instance_name,
            config,
            core,
            cmd,
        ))
    }

    /// Destroys a module, releasing its dispatch registration.
    pub fn destroy_module(&self, module: ProcessingModule) {
        self.dispatcher.unregister(module.instance_name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{ChainEnvironment, CmdInterface, ProcessingCore};
    use crate::properties::Properties;
    use std::sync::Mutex;
    use strada_core::BundleSequencer;

    struct NullCore {
        enabled: bool,
    }

    impl ProcessingCore for NullCore {
        fn init(&mut self, _env: &ChainEnvironment) -> Result<()> {
            Ok(())
        }
        fn reset(&mut self) -> Result<()> {
            Ok(())
        }
        fn process(&mut self, _sequencer: &mut BundleSequencer) -> Result<()> {
            Ok(())
        }
        fn enable_processing(&mut self) {
            self.enabled = true;
        }
        fn disable_processing(&mut self) {
            self.enabled = false;
        }
        fn is_processing_enabled(&self) -> bool {
            self.enabled
        }
    }

    struct NullCmd;

    impl CmdInterface for NullCmd {
        fn init(&mut self) -> Result<()> {
            Ok(())
        }
        fn process_cmd(&mut self, _cmd: &Properties, _ret: &mut Properties) -> Result<()> {
            Ok(())
        }
    }

    fn null_factory(_config: &ModuleConfig) -> Result<(SharedCore, SharedCmd)> {
        Ok((
            Arc::new(Mutex::new(NullCore { enabled: true })),
            Arc::new(Mutex::new(NullCmd)),
        ))
    }

    fn test_library() -> ModuleLibrary {
        ModuleLibrary {
            name: "test-library",
            info: MODULE_LIBRARY_INFO,
            entries: vec![ModuleTypeEntry {
                type_name: "null",
                factory: null_factory,
            }],
        }
    }

    #[test]
    fn create_registers_with_dispatcher() {
        let dispatcher = Arc::new(CmdDispatcher::new());
        let mut engine = PluginEngine::new(Arc::clone(&dispatcher));
        engine.register_library(test_library());

        let module = engine
            .create_module(ModuleConfig::default(), "null", "null0")
            .unwrap();
        assert!(dispatcher.is_registered("null0"));

        // The engine injected type and instance names into the config.
        let props = module.config().properties();
        assert_eq!(props.get::<String>("typeName").unwrap(), "null");
        assert_eq!(props.get::<String>("instanceName").unwrap(), "null0");

        engine.destroy_module(module);
        assert!(!dispatcher.is_registered("null0"));
    }

    #[test]
    fn wrong_info_string_is_ignored() {
        let mut engine = PluginEngine::new(Arc::new(CmdDispatcher::new()));
        engine.register_library(ModuleLibrary {
            info: "other-modules",
            ..test_library()
        });
        assert!(engine.module_types().is_empty());
        assert!(matches!(
            engine.create_module(ModuleConfig::default(), "null", "n"),
            Err(ProcError::PluginLoadFailed(_))
        ));
    }

    #[test]
    fn empty_library_is_ignored() {
        let mut engine = PluginEngine::new(Arc::new(CmdDispatcher::new()));
        engine.register_library(ModuleLibrary {
            entries: Vec::new(),
            ..test_library()
        });
        assert!(engine.module_types().is_empty());
    }

    #[test]
    fn unknown_type_is_invalid_arg() {
        let mut engine = PluginEngine::new(Arc::new(CmdDispatcher::new()));
        engine.register_library(test_library());
        assert!(matches!(
            engine.create_module(ModuleConfig::default(), "reverb", "r0"),
            Err(ProcError::InvalidArg(_))
        ));
    }

    #[test]
    fn duplicate_instance_name_fails() {
        let dispatcher = Arc::new(CmdDispatcher::new());
        let mut engine = PluginEngine::new(Arc::clone(&dispatcher));
        engine.register_library(test_library());
        let _first = engine
            .create_module(ModuleConfig::default(), "null", "dup")
            .unwrap();
        assert!(matches!(
            engine.create_module(ModuleConfig::default(), "null", "dup"),
            Err(ProcError::AlreadyRegistered(_))
        ));
    }
}
