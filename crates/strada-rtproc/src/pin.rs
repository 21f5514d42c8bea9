//! Audio pins: the named directional endpoints of the dependency graph.

/// Identifier of a pin within one pipeline's pin arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PinId(pub(crate) u32);

impl PinId {
    /// Arena index.
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Identifier of a processing module within one pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub(crate) u32);

impl ModuleId {
    /// Arena index.
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Direction of a pin, assigned when the pin is added to the pipeline or to
/// a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinDirection {
    /// Created but not yet added anywhere.
    Undefined,
    /// Boundary pin receiving PCM data from a routing-zone input port.
    PipelineInput,
    /// Boundary pin delivering PCM data to a sink-device port.
    PipelineOutput,
    /// Module input of a pin-mapping pair.
    ModuleInput,
    /// Module output of a pin-mapping pair.
    ModuleOutput,
    /// Combined input/output pin of an in-place processing module.
    ModuleInOut,
}

impl PinDirection {
    /// True for directions that can act as the source side of a link.
    pub(crate) fn can_source(self) -> bool {
        matches!(
            self,
            PinDirection::PipelineInput | PinDirection::ModuleOutput | PinDirection::ModuleInOut
        )
    }

    /// True for directions that can act as the destination side of a link.
    pub(crate) fn can_sink(self) -> bool {
        matches!(
            self,
            PinDirection::PipelineOutput | PinDirection::ModuleInput | PinDirection::ModuleInOut
        )
    }
}

/// Creation parameters of a pin.
#[derive(Debug, Clone)]
pub struct PinParams {
    /// Pin name, unique within the pipeline.
    pub name: String,
    /// Number of channels carried through this pin.
    pub num_channels: u32,
}

impl PinParams {
    /// Convenience constructor.
    pub fn new(name: impl Into<String>, num_channels: u32) -> Self {
        Self {
            name: name.into(),
            num_channels,
        }
    }
}

/// Type of a link between an output pin and an input pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    /// Normal link: data produced in the current period.
    Immediate,
    /// Link with a delay of one period; required to break feedback loops.
    Delayed,
}
