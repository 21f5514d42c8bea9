//! `strada run`: build a pipeline from a topology file and process WAV
//! files through it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};

use strada_config::{PinRole, TopologyConfig};
use strada_harness::{TestFrameworkBuilder, TestRoutingZone, ZoneState};
use strada_modules::builtin_library;
use strada_rtproc::{
    CmdDispatcher, LinkType, ModuleConfig, ModuleId, PinId, PinParams, Pipeline, PipelineParams,
    PluginEngine,
};

/// Arguments of the `run` subcommand.
#[derive(Args)]
pub struct RunArgs {
    /// Topology file (TOML)
    #[arg(short, long)]
    pub config: PathBuf,

    /// Stop after this many periods, even if input remains
    #[arg(long)]
    pub periods: Option<u64>,
}

/// Runs a topology to completion.
pub fn run(args: RunArgs) -> anyhow::Result<()> {
    let topology = TopologyConfig::from_path(&args.config)
        .with_context(|| format!("loading topology '{}'", args.config.display()))?;
    let base_dir = args
        .config
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    let dispatcher = Arc::new(CmdDispatcher::new());
    let mut zone = build_zone(&topology, &base_dir, &dispatcher)?;

    let progress = ProgressBar::new_spinner();
    progress.set_style(
        ProgressStyle::with_template("{spinner} {pos} periods processed")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );

    let budget = args.periods.unwrap_or(u64::MAX);
    let mut processed = 0u64;
    while processed < budget {
        let chunk = 64.min(budget - processed) as u32;
        let state = zone.process(chunk)?;
        processed += u64::from(chunk);
        progress.set_position(processed);
        if state == ZoneState::Finished {
            break;
        }
    }
    zone.finish()?;
    progress.finish_with_message("done");
    Ok(())
}

/// Lists the module types of the built-in library.
pub fn list_modules() -> anyhow::Result<()> {
    let dispatcher = Arc::new(CmdDispatcher::new());
    let mut engine = PluginEngine::new(dispatcher);
    engine.register_library(builtin_library());
    for type_name in engine.module_types() {
        println!("{type_name}");
    }
    Ok(())
}

/// Turns a validated topology into a runnable test zone.
pub fn build_zone(
    topology: &TopologyConfig,
    base_dir: &Path,
    dispatcher: &Arc<CmdDispatcher>,
) -> anyhow::Result<TestRoutingZone> {
    let mut engine = PluginEngine::new(Arc::clone(dispatcher));
    engine.register_library(builtin_library());

    let mut pipeline = Pipeline::new(PipelineParams {
        name: topology.pipeline.name.clone(),
        period_size: topology.pipeline.period_size,
        sample_rate: topology.pipeline.sample_rate,
    });

    let mut modules: BTreeMap<&str, ModuleId> = BTreeMap::new();
    for entry in &topology.modules {
        let props = entry.runtime_properties()?;
        let module = engine
            .create_module(ModuleConfig::new(props), &entry.type_name, &entry.instance)
            .with_context(|| format!("creating module '{}'", entry.instance))?;
        let id = pipeline.add_processing_module(module)?;
        modules.insert(entry.instance.as_str(), id);
    }

    let mut pins: BTreeMap<&str, PinId> = BTreeMap::new();
    for pin in &topology.pins {
        let id = pipeline.create_pin(PinParams::new(pin.name.clone(), pin.channels))?;
        pins.insert(pin.name.as_str(), id);
        match pin.role {
            PinRole::Input => pipeline.add_audio_input_pin(id)?,
            PinRole::Output => pipeline.add_audio_output_pin(id)?,
            PinRole::Inout => {
                let Some(instance) = pin.module.as_deref() else {
                    bail!("inout pin '{}' names no module", pin.name);
                };
                let Some(&module) = modules.get(instance) else {
                    bail!("pin '{}' references unknown module '{instance}'", pin.name);
                };
                pipeline.add_audio_in_out_pin(module, id)?;
            }
            PinRole::Free => {}
        }
    }

    for mapping in &topology.mappings {
        let Some(&module) = modules.get(mapping.module.as_str()) else {
            bail!("mapping references unknown module '{}'", mapping.module);
        };
        let input = pins[mapping.input.as_str()];
        let output = pins[mapping.output.as_str()];
        pipeline.add_audio_pin_mapping(module, input, output)?;
    }

    for link in &topology.links {
        let kind = if link.delayed {
            LinkType::Delayed
        } else {
            LinkType::Immediate
        };
        pipeline.link(pins[link.from.as_str()], pins[link.to.as_str()], kind)?;
    }

    let mut builder = TestFrameworkBuilder::new(pipeline);
    for binding in &topology.inputs {
        builder = builder
            .link_input_wave_file(pins[binding.pin.as_str()], base_dir.join(&binding.file))
            .with_context(|| format!("binding input '{}'", binding.file.display()))?;
    }
    for binding in &topology.outputs {
        builder = builder
            .link_output_wave_file(pins[binding.pin.as_str()], base_dir.join(&binding.file))
            .with_context(|| format!("binding output '{}'", binding.file.display()))?;
    }

    Ok(builder.build()?)
}
