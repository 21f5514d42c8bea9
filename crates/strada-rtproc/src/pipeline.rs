//! The pipeline: graph construction, dependency analysis, static
//! scheduling and per-period execution.
//!
//! Construction happens before `init_audio_chain`: pins are created in an
//! arena, added as pipeline boundary pins or module pins, and connected
//! with immediate or delayed links. `init_audio_chain` freezes the graph:
//! it derives the module scheduling order from signal availability,
//! collapses linked pins into audio streams, lays the streams out in the
//! bundle pool and wires the stream information into every module's
//! configuration. After that only the per-period calls remain:
//! `provide_input_data`, `process`, `retrieve_output_data`.

use std::sync::Arc;

use strada_core::{AudioStream, BundleSequencer, CHANNELS_PER_BUNDLE};

use crate::error::{ProcError, Result};
use crate::module::{ChainEnvironment, ProcessingModule, StreamInfo};
use crate::pin::{LinkType, ModuleId, PinDirection, PinId, PinParams};
use crate::port::AudioPortPtr;

/// Creation parameters of a pipeline.
#[derive(Debug, Clone)]
pub struct PipelineParams {
    /// Pipeline name, for diagnostics.
    pub name: String,
    /// Frames per period.
    pub period_size: u32,
    /// Sample rate in Hz.
    pub sample_rate: u32,
}

#[derive(Debug)]
struct PinEntry {
    params: PinParams,
    direction: PinDirection,
    owner: Option<ModuleId>,
    alive: bool,
}

#[derive(Debug, Clone, Copy)]
struct LinkEntry {
    source: PinId,
    dest: PinId,
    kind: LinkType,
}

struct ModuleEntry {
    module: ProcessingModule,
    alive: bool,
}

struct PortLink {
    port: AudioPortPtr,
    pin: PinId,
}

struct StreamState {
    stream: AudioStream,
    /// Zeroed at the start of every `process()` call. False for streams
    /// holding pipeline input data or one-period delay memory.
    clear_each_period: bool,
    /// Modules writing into this stream. A stream is only cleared while
    /// at least one of its writers is enabled (or it has none), so a
    /// disabled module's output retains the previous run's data.
    writers: Vec<ModuleId>,
}

#[derive(Default)]
struct PinRuntime {
    /// Index into `streams`.
    stream: Option<usize>,
    /// Per-channel staging buffers, boundary pins only.
    channel_buffers: Vec<Vec<f32>>,
    /// Frames accumulated towards the current period, input pins only.
    buffered_frames: u32,
}

/// A pipeline hosting a cascade of processing modules.
pub struct Pipeline {
    params: PipelineParams,
    pins: Vec<PinEntry>,
    modules: Vec<ModuleEntry>,
    links: Vec<LinkEntry>,
    /// `(module, input pin, output pin)` triples.
    mappings: Vec<(ModuleId, PinId, PinId)>,
    port_links: Vec<PortLink>,
    initialized: bool,

    // Populated by `init_audio_chain`.
    schedule: Vec<ModuleId>,
    sequencer: BundleSequencer,
    streams: Vec<StreamState>,
    pin_runtime: Vec<PinRuntime>,
    /// Stream-index pairs copied source-to-destination after each period.
    delayed_copies: Vec<(usize, usize)>,
    /// Scratch channel buffers for delayed copies.
    scratch: Vec<Vec<f32>>,
}

impl Pipeline {
    /// Creates an empty pipeline.
    pub fn new(params: PipelineParams) -> Self {
        let period = params.period_size as usize;
        Self {
            params,
            pins: Vec::new(),
            modules: Vec::new(),
            links: Vec::new(),
            mappings: Vec::new(),
            port_links: Vec::new(),
            initialized: false,
            schedule: Vec::new(),
            sequencer: BundleSequencer::new(period, 0),
            streams: Vec::new(),
            pin_runtime: Vec::new(),
            delayed_copies: Vec::new(),
            scratch: Vec::new(),
        }
    }

    /// The pipeline parameters.
    pub fn params(&self) -> &PipelineParams {
        &self.params
    }

    /// The fixed processing environment.
    pub fn environment(&self) -> ChainEnvironment {
        ChainEnvironment {
            period_size: self.params.period_size,
            sample_rate: self.params.sample_rate,
        }
    }

    /// True once `init_audio_chain` has run.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn ensure_mutable(&self) -> Result<()> {
        if self.initialized {
            Err(ProcError::AlreadyInitialized)
        } else {
            Ok(())
        }
    }

    fn pin_entry(&self, pin: PinId) -> Result<&PinEntry> {
        self.pins
            .get(pin.index())
            .filter(|entry| entry.alive)
            .ok_or_else(|| ProcError::InvalidArg(format!("unknown pin id {}", pin.0)))
    }

    fn pin_entry_mut(&mut self, pin: PinId) -> Result<&mut PinEntry> {
        self.pins
            .get_mut(pin.index())
            .filter(|entry| entry.alive)
            .ok_or_else(|| ProcError::InvalidArg(format!("unknown pin id {}", pin.0)))
    }

    fn module_entry(&self, module: ModuleId) -> Result<&ModuleEntry> {
        self.modules
            .get(module.index())
            .filter(|entry| entry.alive)
            .ok_or_else(|| ProcError::InvalidArg(format!("unknown module id {}", module.0)))
    }

    // --- Graph construction -------------------------------------------------

    /// Creates a pin in the arena. The pin has no direction until it is
    /// added to the pipeline or to a module.
    pub fn create_pin(&mut self, params: PinParams) -> Result<PinId> {
        self.ensure_mutable()?;
        if params.num_channels == 0 {
            return Err(ProcError::InvalidArg("pin needs at least one channel".into()));
        }
        if self
            .pins
            .iter()
            .any(|entry| entry.alive && entry.params.name == params.name)
        {
            return Err(ProcError::InvalidArg(format!(
                "pin name '{}' already in use",
                params.name
            )));
        }
        let id = PinId(self.pins.len() as u32);
        self.pins.push(PinEntry {
            params,
            direction: PinDirection::Undefined,
            owner: None,
            alive: true,
        });
        Ok(id)
    }

    /// Adds a pin as a pipeline input.
    pub fn add_audio_input_pin(&mut self, pin: PinId) -> Result<()> {
        self.attach_pin(pin, PinDirection::PipelineInput, None)
    }

    /// Adds a pin as a pipeline output.
    pub fn add_audio_output_pin(&mut self, pin: PinId) -> Result<()> {
        self.attach_pin(pin, PinDirection::PipelineOutput, None)
    }

    /// Adds a combined input/output pin to an in-place processing module.
    pub fn add_audio_in_out_pin(&mut self, module: ModuleId, pin: PinId) -> Result<()> {
        self.module_entry(module)?;
        self.attach_pin(pin, PinDirection::ModuleInOut, Some(module))
    }

    fn attach_pin(
        &mut self,
        pin: PinId,
        direction: PinDirection,
        owner: Option<ModuleId>,
    ) -> Result<()> {
        self.ensure_mutable()?;
        let entry = self.pin_entry_mut(pin)?;
        if entry.direction != PinDirection::Undefined {
            return Err(ProcError::InvalidArg(format!(
                "pin '{}' is already in use as {:?}",
                entry.params.name, entry.direction
            )));
        }
        entry.direction = direction;
        entry.owner = owner;
        Ok(())
    }

    /// Removes a pipeline boundary pin, along with any links and port
    /// bindings touching it.
    pub fn delete_audio_pin(&mut self, pin: PinId) -> Result<()> {
        self.ensure_mutable()?;
        let entry = self.pin_entry(pin)?;
        if !matches!(
            entry.direction,
            PinDirection::PipelineInput | PinDirection::PipelineOutput
        ) {
            return Err(ProcError::InvalidArg(format!(
                "pin '{}' is not a pipeline boundary pin",
                entry.params.name
            )));
        }
        self.detach_pin(pin);
        Ok(())
    }

    /// Removes an in/out pin from a module.
    pub fn delete_audio_in_out_pin(&mut self, module: ModuleId, pin: PinId) -> Result<()> {
        self.ensure_mutable()?;
        let entry = self.pin_entry(pin)?;
        if entry.direction != PinDirection::ModuleInOut || entry.owner != Some(module) {
            return Err(ProcError::InvalidArg(format!(
                "pin '{}' is not an in/out pin of this module",
                entry.params.name
            )));
        }
        self.detach_pin(pin);
        Ok(())
    }

    fn detach_pin(&mut self, pin: PinId) {
        self.links.retain(|l| l.source != pin && l.dest != pin);
        self.mappings.retain(|(_, i, o)| *i != pin && *o != pin);
        self.port_links.retain(|pl| pl.pin != pin);
        let entry = &mut self.pins[pin.index()];
        entry.direction = PinDirection::Undefined;
        entry.owner = None;
    }

    /// Adds a processing module to the pipeline.
    pub fn add_processing_module(&mut self, module: ProcessingModule) -> Result<ModuleId> {
        self.ensure_mutable()?;
        if self.modules.iter().any(|entry| {
            entry.alive && entry.module.instance_name() == module.instance_name()
        }) {
            return Err(ProcError::InvalidArg(format!(
                "module instance '{}' already added",
                module.instance_name()
            )));
        }
        let id = ModuleId(self.modules.len() as u32);
        tracing::info!(
            pipeline = %self.params.name,
            instance = module.instance_name(),
            type_name = module.type_name(),
            "module added"
        );
        self.modules.push(ModuleEntry { module, alive: true });
        Ok(id)
    }

    /// Removes a module together with its pins, links and mappings.
    pub fn delete_processing_module(&mut self, module: ModuleId) -> Result<ProcessingModule> {
        self.ensure_mutable()?;
        self.module_entry(module)?;
        let owned: Vec<PinId> = self
            .pins
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.alive && entry.owner == Some(module))
            .map(|(idx, _)| PinId(idx as u32))
            .collect();
        for pin in owned {
            self.detach_pin(pin);
        }
        self.mappings.retain(|(m, _, _)| *m != module);
        let entry = &mut self.modules[module.index()];
        entry.alive = false;
        // The arena slot stays occupied so module ids remain stable; the
        // caller gets a module built from the same shared handles.
        Ok(ProcessingModule::new(
            entry.module.type_name().to_string(),
            entry.module.instance_name().to_string(),
            entry.module.config().clone(),
            Arc::clone(entry.module.core()),
            Arc::clone(entry.module.cmd()),
        ))
    }

    /// Adds a pin mapping to a module that cannot process in place.
    ///
    /// For an N:1 merge (mixer), call once per input pin with the same
    /// output pin.
    pub fn add_audio_pin_mapping(
        &mut self,
        module: ModuleId,
        input_pin: PinId,
        output_pin: PinId,
    ) -> Result<()> {
        self.ensure_mutable()?;
        self.module_entry(module)?;
        if input_pin == output_pin {
            return Err(ProcError::InvalidArg(
                "pin mapping requires distinct input and output pins".into(),
            ));
        }

        if self
            .mappings
            .iter()
            .any(|&(m, i, o)| m == module && i == input_pin && o == output_pin)
        {
            return Err(ProcError::InvalidArg("pin mapping already exists".into()));
        }

        // Both sides may be shared across mappings of the same module:
        // several inputs feeding one output (merge) or one input feeding
        // several outputs (split).
        let in_entry = self.pin_entry(input_pin)?;
        let input_was_fresh = in_entry.direction == PinDirection::Undefined;
        match (in_entry.direction, in_entry.owner) {
            (PinDirection::Undefined, _) => {
                self.attach_pin(input_pin, PinDirection::ModuleInput, Some(module))?;
            }
            (PinDirection::ModuleInput, Some(owner)) if owner == module => {}
            _ => {
                return Err(ProcError::InvalidArg(format!(
                    "pin '{}' cannot be the input of this mapping",
                    self.pins[input_pin.index()].params.name
                )));
            }
        }

        let out_entry = self.pin_entry(output_pin)?;
        match (out_entry.direction, out_entry.owner) {
            (PinDirection::Undefined, _) => {
                self.attach_pin(output_pin, PinDirection::ModuleOutput, Some(module))?;
            }
            (PinDirection::ModuleOutput, Some(owner)) if owner == module => {}
            _ => {
                if input_was_fresh {
                    self.detach_pin(input_pin);
                }
                return Err(ProcError::InvalidArg(format!(
                    "pin '{}' cannot be the output of this mapping",
                    self.pins[output_pin.index()].params.name
                )));
            }
        }

        self.mappings.push((module, input_pin, output_pin));
        Ok(())
    }

    /// Removes a pin mapping and its pins from a module.
    pub fn delete_audio_pin_mapping(
        &mut self,
        module: ModuleId,
        input_pin: PinId,
        output_pin: PinId,
    ) -> Result<()> {
        self.ensure_mutable()?;
        let before = self.mappings.len();
        self.mappings
            .retain(|&(m, i, o)| !(m == module && i == input_pin && o == output_pin));
        if self.mappings.len() == before {
            return Err(ProcError::InvalidArg("no such pin mapping".into()));
        }
        // Either side may still serve other mappings of this module.
        if !self.mappings.iter().any(|&(_, i, _)| i == input_pin) {
            self.detach_pin(input_pin);
        }
        if !self.mappings.iter().any(|&(_, _, o)| o == output_pin) {
            self.detach_pin(output_pin);
        }
        Ok(())
    }

    /// Links an output pin to an input pin.
    ///
    /// Links are biunique: one incoming link per input pin, one outgoing
    /// link per output pin. Channel counts of both pins must match. A
    /// delayed link carries a one-period delay and is what makes feedback
    /// loops schedulable.
    pub fn link(&mut self, output_pin: PinId, input_pin: PinId, kind: LinkType) -> Result<()> {
        self.ensure_mutable()?;
        if output_pin == input_pin {
            return Err(ProcError::InvalidArg("cannot link a pin to itself".into()));
        }
        let source = self.pin_entry(output_pin)?;
        let dest = self.pin_entry(input_pin)?;
        if !source.direction.can_source() {
            return Err(ProcError::InvalidArg(format!(
                "pin '{}' ({:?}) cannot source a link",
                source.params.name, source.direction
            )));
        }
        if !dest.direction.can_sink() {
            return Err(ProcError::InvalidArg(format!(
                "pin '{}' ({:?}) cannot receive a link",
                dest.params.name, dest.direction
            )));
        }
        if source.params.num_channels != dest.params.num_channels {
            return Err(ProcError::InvalidArg(format!(
                "channel count mismatch on link '{}' ({}) to '{}' ({})",
                source.params.name,
                source.params.num_channels,
                dest.params.name,
                dest.params.num_channels
            )));
        }
        if self.links.iter().any(|l| l.dest == input_pin) {
            return Err(ProcError::InvalidArg(format!(
                "pin '{}' already has an incoming link",
                dest.params.name
            )));
        }
        if self.links.iter().any(|l| l.source == output_pin) {
            return Err(ProcError::InvalidArg(format!(
                "pin '{}' already has an outgoing link",
                source.params.name
            )));
        }
        self.links.push(LinkEntry {
            source: output_pin,
            dest: input_pin,
            kind,
        });
        Ok(())
    }

    /// Removes the link between two pins.
    pub fn unlink(&mut self, output_pin: PinId, input_pin: PinId) -> Result<()> {
        self.ensure_mutable()?;
        let before = self.links.len();
        self.links
            .retain(|l| !(l.source == output_pin && l.dest == input_pin));
        if self.links.len() == before {
            return Err(ProcError::InvalidArg("no such link".into()));
        }
        Ok(())
    }

    /// Links a device port to a pipeline boundary pin: a routing-zone
    /// source port to a pipeline input pin, or a sink-device port to a
    /// pipeline output pin.
    pub fn link_port(&mut self, port: AudioPortPtr, pin: PinId) -> Result<()> {
        self.ensure_mutable()?;
        let entry = self.pin_entry(pin)?;
        if !matches!(
            entry.direction,
            PinDirection::PipelineInput | PinDirection::PipelineOutput
        ) {
            return Err(ProcError::InvalidArg(format!(
                "pin '{}' is not a pipeline boundary pin",
                entry.params.name
            )));
        }
        if entry.params.num_channels != port.num_channels() {
            return Err(ProcError::InvalidArg(format!(
                "port '{}' has {} channels, pin '{}' has {}",
                port.name(),
                port.num_channels(),
                entry.params.name,
                entry.params.num_channels
            )));
        }
        if self.port_links.iter().any(|pl| pl.pin == pin) {
            return Err(ProcError::InvalidArg(format!(
                "pin '{}' is already linked to a port",
                entry.params.name
            )));
        }
        if self.port_links.iter().any(|pl| Arc::ptr_eq(&pl.port, &port)) {
            return Err(ProcError::InvalidArg(format!(
                "port '{}' is already linked to a pin",
                port.name()
            )));
        }
        self.port_links.push(PortLink { port, pin });
        Ok(())
    }

    /// Removes a port binding.
    pub fn unlink_port(&mut self, port: &AudioPortPtr, pin: PinId) -> Result<()> {
        self.ensure_mutable()?;
        let before = self.port_links.len();
        self.port_links
            .retain(|pl| !(Arc::ptr_eq(&pl.port, port) && pl.pin == pin));
        if self.port_links.len() == before {
            return Err(ProcError::InvalidArg("no such port link".into()));
        }
        Ok(())
    }

    // --- Introspection ------------------------------------------------------

    /// Ids of all live modules, in insertion order.
    pub fn processing_modules(&self) -> Vec<ModuleId> {
        self.modules
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.alive)
            .map(|(idx, _)| ModuleId(idx as u32))
            .collect()
    }

    /// Access to one module.
    pub fn module(&self, module: ModuleId) -> Result<&ProcessingModule> {
        Ok(&self.module_entry(module)?.module)
    }

    /// Ids of all live pins with a direction.
    pub fn audio_pins(&self) -> Vec<PinId> {
        self.pins
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.alive && entry.direction != PinDirection::Undefined)
            .map(|(idx, _)| PinId(idx as u32))
            .collect()
    }

    /// Pipeline input pins, in creation order.
    pub fn pipeline_input_pins(&self) -> Vec<PinId> {
        self.pins_with_direction(PinDirection::PipelineInput)
    }

    /// Pipeline output pins, in creation order.
    pub fn pipeline_output_pins(&self) -> Vec<PinId> {
        self.pins_with_direction(PinDirection::PipelineOutput)
    }

    fn pins_with_direction(&self, direction: PinDirection) -> Vec<PinId> {
        self.pins
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.alive && entry.direction == direction)
            .map(|(idx, _)| PinId(idx as u32))
            .collect()
    }

    /// Name of a pin.
    pub fn pin_name(&self, pin: PinId) -> Result<&str> {
        Ok(self.pin_entry(pin)?.params.name.as_str())
    }

    /// Channel count of a pin.
    pub fn pin_num_channels(&self, pin: PinId) -> Result<u32> {
        Ok(self.pin_entry(pin)?.params.num_channels)
    }

    /// Direction of a pin.
    pub fn pin_direction(&self, pin: PinId) -> Result<PinDirection> {
        Ok(self.pin_entry(pin)?.direction)
    }

    /// The port linked to a boundary pin, if any.
    pub fn pin_port(&self, pin: PinId) -> Option<&AudioPortPtr> {
        self.port_links
            .iter()
            .find(|pl| pl.pin == pin)
            .map(|pl| &pl.port)
    }

    /// Instance names in scheduling order. Empty before initialization.
    pub fn processing_sequence(&self) -> Vec<&str> {
        self.schedule
            .iter()
            .map(|&mid| self.modules[mid.index()].module.instance_name())
            .collect()
    }

    /// Logs the connection parameters of all pins.
    pub fn dump_connection_parameters(&self) {
        for (idx, entry) in self.pins.iter().enumerate() {
            if !entry.alive || entry.direction == PinDirection::Undefined {
                continue;
            }
            let stream = self
                .pin_runtime
                .get(idx)
                .and_then(|rt| rt.stream)
                .map(|s| self.streams[s].stream.id());
            tracing::info!(
                pipeline = %self.params.name,
                pin = %entry.params.name,
                direction = ?entry.direction,
                channels = entry.params.num_channels,
                stream,
                "pin connection"
            );
        }
        for link in &self.links {
            tracing::info!(
                source = %self.pins[link.source.index()].params.name,
                dest = %self.pins[link.dest.index()].params.name,
                kind = ?link.kind,
                "link"
            );
        }
    }

    /// Logs the scheduling order.
    pub fn dump_processing_sequence(&self) {
        for (position, name) in self.processing_sequence().iter().enumerate() {
            tracing::info!(position, instance = name, "scheduled module");
        }
    }

    // --- Initialization -----------------------------------------------------

    /// Freezes the graph: derives the scheduling order, allocates the
    /// audio streams and initializes all modules.
    ///
    /// # Errors
    ///
    /// [`ProcError::CyclicDependency`] if the immediate-link subgraph is
    /// cyclic; [`ProcError::InvalidArg`] for inconsistent channel counts;
    /// initialization errors of the modules.
    pub fn init_audio_chain(&mut self) -> Result<()> {
        self.ensure_mutable()?;
        self.identify_processing_sequence()?;
        self.init_audio_streams()?;
        self.wire_module_configs()?;

        let env = self.environment();
        for &mid in &self.schedule {
            let entry = &self.modules[mid.index()];
            entry
                .module
                .core()
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .init(&env)?;
            entry
                .module
                .cmd()
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .init()?;
        }

        self.initialized = true;
        tracing::info!(
            pipeline = %self.params.name,
            modules = self.schedule.len(),
            streams = self.streams.len(),
            bundles = self.sequencer.num_bundles(),
            "audio chain initialized"
        );
        self.dump_processing_sequence();
        Ok(())
    }

    /// Scheduling: repeatedly pick any module whose every input pin has
    /// data available, then mark the pins fed by its outputs available.
    fn identify_processing_sequence(&mut self) -> Result<()> {
        let mut available = vec![false; self.pins.len()];
        let incoming: Vec<Option<&LinkEntry>> = (0..self.pins.len())
            .map(|idx| self.links.iter().find(|l| l.dest.index() == idx))
            .collect();

        for (idx, entry) in self.pins.iter().enumerate() {
            if !entry.alive {
                continue;
            }
            let is_consumer = matches!(
                entry.direction,
                PinDirection::ModuleInput | PinDirection::ModuleInOut
            );
            if !is_consumer {
                continue;
            }
            available[idx] = match incoming[idx] {
                None => true,
                Some(link) => {
                    link.kind == LinkType::Delayed
                        || self.pins[link.source.index()].direction == PinDirection::PipelineInput
                }
            };
        }

        let module_ids = self.processing_modules();
        let mut processed = vec![false; self.modules.len()];
        self.schedule.clear();

        loop {
            let mut progress = false;
            for &mid in &module_ids {
                if processed[mid.index()] {
                    continue;
                }
                let inputs_ready = self
                    .module_input_pins(mid)
                    .iter()
                    .all(|pin| available[pin.index()]);
                if !inputs_ready {
                    continue;
                }
                processed[mid.index()] = true;
                self.schedule.push(mid);
                progress = true;
                for pin in self.module_output_pins(mid) {
                    available[pin.index()] = true;
                    for link in &self.links {
                        if link.source == pin && link.kind == LinkType::Immediate {
                            available[link.dest.index()] = true;
                        }
                    }
                }
            }
            if !progress {
                break;
            }
        }

        if self.schedule.len() != module_ids.len() {
            tracing::error!(
                pipeline = %self.params.name,
                scheduled = self.schedule.len(),
                total = module_ids.len(),
                "cyclic dependency: cannot schedule all modules"
            );
            return Err(ProcError::CyclicDependency);
        }
        Ok(())
    }

    fn module_input_pins(&self, module: ModuleId) -> Vec<PinId> {
        self.pins
            .iter()
            .enumerate()
            .filter(|(_, entry)| {
                entry.alive
                    && entry.owner == Some(module)
                    && matches!(
                        entry.direction,
                        PinDirection::ModuleInput | PinDirection::ModuleInOut
                    )
            })
            .map(|(idx, _)| PinId(idx as u32))
            .collect()
    }

    fn module_output_pins(&self, module: ModuleId) -> Vec<PinId> {
        self.pins
            .iter()
            .enumerate()
            .filter(|(_, entry)| {
                entry.alive
                    && entry.owner == Some(module)
                    && matches!(
                        entry.direction,
                        PinDirection::ModuleOutput | PinDirection::ModuleInOut
                    )
            })
            .map(|(idx, _)| PinId(idx as u32))
            .collect()
    }

    /// Stream identification: pins joined by immediate links share one
    /// stream; a 1:1 pin mapping with matching channel counts collapses to
    /// one stream; everything else gets its own stream. Destinations of
    /// delayed links keep distinct streams that serve as the one-period
    /// delay memory.
    fn init_audio_streams(&mut self) -> Result<()> {
        let num_pins = self.pins.len();
        let mut parent: Vec<usize> = (0..num_pins).collect();

        fn find(parent: &mut [usize], mut x: usize) -> usize {
            while parent[x] != x {
                parent[x] = parent[parent[x]];
                x = parent[x];
            }
            x
        }
        fn union(parent: &mut [usize], a: usize, b: usize) {
            let ra = find(parent, a);
            let rb = find(parent, b);
            if ra != rb {
                // Lower root wins, keeping group identity deterministic.
                if ra < rb {
                    parent[rb] = ra;
                } else {
                    parent[ra] = rb;
                }
            }
        }

        for link in &self.links {
            if link.kind == LinkType::Immediate {
                union(&mut parent, link.source.index(), link.dest.index());
            }
        }

        // 1:1 mappings with matching channel counts are in-place bridges.
        for &(_, input, output) in &self.mappings {
            let input_count = self.mappings.iter().filter(|&&(_, i, _)| i == input).count();
            let output_count = self
                .mappings
                .iter()
                .filter(|&&(_, _, o)| o == output)
                .count();
            let in_ch = self.pins[input.index()].params.num_channels;
            let out_ch = self.pins[output.index()].params.num_channels;
            if input_count == 1 && output_count == 1 && in_ch == out_ch {
                union(&mut parent, input.index(), output.index());
            }
        }

        // Deterministic stream creation, one per group, in arena order.
        self.streams.clear();
        self.pin_runtime = (0..num_pins).map(|_| PinRuntime::default()).collect();
        let mut group_stream: Vec<Option<usize>> = vec![None; num_pins];

        let participating: Vec<usize> = (0..num_pins)
            .filter(|&idx| {
                self.pins[idx].alive && self.pins[idx].direction != PinDirection::Undefined
            })
            .collect();

        let needed_channels: usize = participating
            .iter()
            .map(|&idx| self.pins[idx].params.num_channels as usize)
            .sum();
        let max_bundles = needed_channels.div_ceil(CHANNELS_PER_BUNDLE) + participating.len();
        self.sequencer = BundleSequencer::new(self.params.period_size as usize, max_bundles);

        for &idx in &participating {
            let root = find(&mut parent, idx);
            if group_stream[root].is_some() {
                continue;
            }
            let members: Vec<usize> = participating
                .iter()
                .copied()
                .filter(|&m| find(&mut parent, m) == root)
                .collect();

            let channels = self.pins[members[0]].params.num_channels;
            if members
                .iter()
                .any(|&m| self.pins[m].params.num_channels != channels)
            {
                return Err(ProcError::InvalidArg(format!(
                    "channel count mismatch within the stream of pin '{}'",
                    self.pins[members[0]].params.name
                )));
            }

            // Boundary pins name the stream; any member works otherwise.
            let name_pin = members
                .iter()
                .copied()
                .find(|&m| {
                    matches!(
                        self.pins[m].direction,
                        PinDirection::PipelineInput | PinDirection::PipelineOutput
                    )
                })
                .unwrap_or(members[0]);

            let stream_index = self.streams.len();
            let stream = AudioStream::allocate(
                stream_index as u32,
                self.pins[name_pin].params.name.clone(),
                channels as usize,
                &mut self.sequencer,
            )?;

            let holds_input_data = members
                .iter()
                .any(|&m| self.pins[m].direction == PinDirection::PipelineInput);
            let mut writers: Vec<ModuleId> = members
                .iter()
                .filter(|&&m| {
                    matches!(
                        self.pins[m].direction,
                        PinDirection::ModuleOutput | PinDirection::ModuleInOut
                    )
                })
                .filter_map(|&m| self.pins[m].owner)
                .collect();
            writers.sort_unstable();
            writers.dedup();
            self.streams.push(StreamState {
                stream,
                clear_each_period: !holds_input_data,
                writers,
            });
            group_stream[root] = Some(stream_index);
        }

        for &idx in &participating {
            let root = find(&mut parent, idx);
            self.pin_runtime[idx].stream = group_stream[root];
        }

        // Delay memory: destination streams of delayed links are excluded
        // from per-period clearing and copied to at period end.
        self.delayed_copies.clear();
        for link in &self.links {
            if link.kind != LinkType::Delayed {
                continue;
            }
            let src = self.pin_runtime[link.source.index()]
                .stream
                .ok_or_else(|| ProcError::InvalidArg("delayed link source has no stream".into()))?;
            let dst = self.pin_runtime[link.dest.index()]
                .stream
                .ok_or_else(|| ProcError::InvalidArg("delayed link dest has no stream".into()))?;
            self.streams[dst].clear_each_period = false;
            if src != dst {
                self.delayed_copies.push((src, dst));
            }
        }

        // Staging buffers for boundary pins and the delayed-copy scratch.
        let period = self.params.period_size as usize;
        let mut max_channels = 0;
        for &idx in &participating {
            let entry = &self.pins[idx];
            if matches!(
                entry.direction,
                PinDirection::PipelineInput | PinDirection::PipelineOutput
            ) {
                self.pin_runtime[idx].channel_buffers =
                    vec![vec![0.0; period]; entry.params.num_channels as usize];
            }
            max_channels = max_channels.max(entry.params.num_channels as usize);
        }
        self.scratch = vec![vec![0.0; period]; max_channels];

        Ok(())
    }

    /// Injects the stream wiring into every module configuration.
    fn wire_module_configs(&mut self) -> Result<()> {
        for &mid in &self.schedule {
            let config = self.modules[mid.index()].module.config().clone();
            config.clear_streams();

            for pin in self.module_input_pins(mid) {
                if self.pins[pin.index()].direction == PinDirection::ModuleInOut {
                    let info = self.stream_info_for_pin(pin)?;
                    config.set_pin_stream(&self.pins[pin.index()].params.name, info.id);
                    config.add_inplace_stream(info);
                }
            }

            let mappings: Vec<(PinId, PinId)> = self
                .mappings
                .iter()
                .filter(|&&(m, _, _)| m == mid)
                .map(|&(_, i, o)| (i, o))
                .collect();
            for (input, output) in mappings {
                let in_info = self.stream_info_for_pin(input)?;
                let out_info = self.stream_info_for_pin(output)?;
                config.set_pin_stream(&self.pins[input.index()].params.name, in_info.id);
                config.set_pin_stream(&self.pins[output.index()].params.name, out_info.id);
                if in_info.id == out_info.id {
                    config.add_inplace_stream(in_info);
                } else {
                    config.add_stream_mapping(in_info, out_info);
                }
            }
        }
        Ok(())
    }

    fn stream_info_for_pin(&self, pin: PinId) -> Result<StreamInfo> {
        let stream_idx = self.pin_runtime[pin.index()]
            .stream
            .ok_or_else(|| ProcError::InvalidArg(format!("pin {} has no stream", pin.0)))?;
        let stream = &self.streams[stream_idx].stream;
        Ok(StreamInfo {
            id: stream.id(),
            name: stream.name().to_string(),
            num_channels: stream.num_channels() as u32,
            slices: stream.slices().to_vec(),
        })
    }

    // --- Per-period execution -----------------------------------------------

    /// Transfers PCM frames from a source port's ring buffer into the
    /// linked pipeline input pin.
    ///
    /// Reads `frames_to_read` frames starting at the absolute ring offset
    /// `input_offset` and pads with zeros up to `frames_to_write`. Returns
    /// the number of frames still missing before the period is complete;
    /// once it reaches zero the pin's stream holds a full period.
    pub fn provide_input_data(
        &mut self,
        port: &AudioPortPtr,
        input_offset: usize,
        frames_to_read: usize,
        frames_to_write: usize,
    ) -> Result<u32> {
        if !self.initialized {
            return Err(ProcError::NotInitialized);
        }
        if frames_to_write < frames_to_read {
            return Err(ProcError::InvalidArg(
                "frames_to_write must not be smaller than frames_to_read".into(),
            ));
        }
        let pin = self
            .port_links
            .iter()
            .find(|pl| Arc::ptr_eq(&pl.port, port))
            .map(|pl| pl.pin)
            .ok_or_else(|| {
                ProcError::InvalidArg(format!("port '{}' is not linked to this pipeline", port.name()))
            })?;
        if self.pins[pin.index()].direction != PinDirection::PipelineInput {
            return Err(ProcError::InvalidArg(format!(
                "port '{}' is not linked to a pipeline input pin",
                port.name()
            )));
        }

        let period = self.params.period_size;
        let rt = &mut self.pin_runtime[pin.index()];
        let buffered = rt.buffered_frames as usize;
        if buffered + frames_to_write > period as usize {
            return Err(ProcError::InvalidArg(format!(
                "{frames_to_write} frames overflow the period ({buffered} already buffered)"
            )));
        }

        let ring = port.ring();
        for (channel, buffer) in rt.channel_buffers.iter_mut().enumerate() {
            let ring_channel = port.channel_index() as usize + channel;
            ring.read_channel_f32(
                ring_channel,
                input_offset,
                &mut buffer[buffered..buffered + frames_to_read],
            )?;
            buffer[buffered + frames_to_read..buffered + frames_to_write].fill(0.0);
        }
        rt.buffered_frames += frames_to_write as u32;

        let remaining = period - rt.buffered_frames;
        if remaining == 0 {
            let stream_idx = rt.stream.ok_or_else(|| {
                ProcError::InvalidArg(format!("input pin of port '{}' has no stream", port.name()))
            })?;
            let rt = &self.pin_runtime[pin.index()];
            self.streams[stream_idx]
                .stream
                .write_from_non_interleaved(&mut self.sequencer, &rt.channel_buffers)?;
        }
        Ok(remaining)
    }

    /// Executes one period: clears the accumulation streams, invokes every
    /// enabled module in scheduling order, then services the one-period
    /// delay links.
    ///
    /// A failing module is logged and skipped; the period continues with
    /// the remaining modules.
    pub fn process(&mut self) -> Result<()> {
        if !self.initialized {
            return Err(ProcError::NotInitialized);
        }

        for idx in 0..self.streams.len() {
            let state = &self.streams[idx];
            if !state.clear_each_period {
                continue;
            }
            let any_writer_enabled = state.writers.is_empty()
                || state.writers.iter().any(|&mid| {
                    self.modules[mid.index()]
                        .module
                        .core()
                        .lock()
                        .unwrap_or_else(std::sync::PoisonError::into_inner)
                        .is_processing_enabled()
                });
            if any_writer_enabled {
                self.streams[idx].stream.clear(&mut self.sequencer);
            }
        }

        for idx in 0..self.schedule.len() {
            let mid = self.schedule[idx];
            let core = Arc::clone(self.modules[mid.index()].module.core());
            let mut core = core.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if !core.is_processing_enabled() {
                continue;
            }
            if let Err(error) = core.process(&mut self.sequencer) {
                tracing::error!(
                    instance = self.modules[mid.index()].module.instance_name(),
                    %error,
                    "module processing failed; period skipped for this module"
                );
            }
        }

        // Delay service: copy this period's source data into the delay
        // streams so consumers see period n-1 data next time around.
        for idx in 0..self.delayed_copies.len() {
            let (src, dst) = self.delayed_copies[idx];
            let channels = self.streams[src].stream.num_channels();
            let scratch = &mut self.scratch[..channels];
            self.streams[src]
                .stream
                .read_non_interleaved(&self.sequencer, scratch)?;
            self.streams[dst]
                .stream
                .write_from_non_interleaved(&mut self.sequencer, scratch)?;
        }

        for rt in &mut self.pin_runtime {
            rt.buffered_frames = 0;
        }
        Ok(())
    }

    /// Copies processed PCM frames from the pipeline output pins of one
    /// sink device into that device's port rings, converting to the ring
    /// format.
    ///
    /// `num_frames` frames are written starting at the absolute ring
    /// offset `output_offset` of each port.
    pub fn retrieve_output_data(
        &mut self,
        sink_device: &str,
        num_frames: usize,
        output_offset: usize,
    ) -> Result<()> {
        if !self.initialized {
            return Err(ProcError::NotInitialized);
        }
        if num_frames > self.params.period_size as usize {
            return Err(ProcError::InvalidArg(format!(
                "{num_frames} frames exceed the period size"
            )));
        }

        let mut served = false;
        for idx in 0..self.port_links.len() {
            let pin = self.port_links[idx].pin;
            if self.pins[pin.index()].direction != PinDirection::PipelineOutput
                || self.port_links[idx].port.owner_device() != sink_device
            {
                continue;
            }
            served = true;

            let stream_idx = self.pin_runtime[pin.index()].stream.ok_or_else(|| {
                ProcError::InvalidArg(format!("output pin {} has no stream", pin.0))
            })?;
            {
                let rt = &mut self.pin_runtime[pin.index()];
                self.streams[stream_idx]
                    .stream
                    .read_non_interleaved(&self.sequencer, &mut rt.channel_buffers)?;
            }
            let port = &self.port_links[idx].port;
            let rt = &self.pin_runtime[pin.index()];
            for (channel, buffer) in rt.channel_buffers.iter().enumerate() {
                let ring_channel = port.channel_index() as usize + channel;
                if let Err(error) =
                    port.ring()
                        .write_channel_f32(ring_channel, output_offset, &buffer[..num_frames])
                {
                    tracing::error!(port = port.name(), %error, "ring write failed");
                    return Err(error);
                }
            }
        }

        if !served {
            return Err(ProcError::InvalidArg(format!(
                "no output pins linked to sink device '{sink_device}'"
            )));
        }
        Ok(())
    }
}
