//! Configuration conversion utilities for CLI arguments

use crate::cli::main_impl::Cli;
use crate::{
    config::{WorkflowConfig, WorkflowConfigBuilder, MAX_GROUP_SIZE},
    types::{Dimensions, Placement},
};
use anyhow::{Context, Result};
use std::path::Path;

/// Layers CLI flags over the workflow config file
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Build the effective `WorkflowConfig`
    ///
    /// `--config` must load if given; otherwise the platform default file is
    /// used when it exists. Flags only ever switch features on or override
    /// values, so a config file can enable effects the command line omits.
    pub(crate) fn from_cli(cli: &Cli) -> Result<WorkflowConfig> {
        let base = Self::load_base(cli.config.as_deref())?;

        let mut services = base.services.clone();
        if let Some(url) = &cli.removal_url {
            services.removal_url = Some(url.clone());
        }
        if cli.mask_dir.is_some() {
            services.removal_url = None;
        }
        if let Some(url) = &cli.compositing_url {
            services.compositing_url = Some(url.clone());
        }
        if let Some(url) = &cli.library_url {
            services.library_url = Some(url.clone());
        }

        let mut builder = WorkflowConfigBuilder::from_config(base.clone())
            .reflection((base.enable_reflection || cli.reflection) && !cli.no_reflection)
            .depth_of_field(base.depth_of_field || cli.depth_of_field)
            .contact_shadow(base.contact_shadow || cli.shadow)
            .enhance(base.enhance || cli.enhance)
            .persist_results(base.persist_results || cli.persist)
            .services(services);

        if let Some(group_size) = cli.group_size {
            builder = builder.group_size(group_size);
        }
        if let Some(format) = cli.format {
            builder = builder.output_format(format.into());
        }

        builder.build().context("Invalid configuration")
    }

    fn load_base(explicit: Option<&Path>) -> Result<WorkflowConfig> {
        if let Some(path) = explicit {
            return WorkflowConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()));
        }
        match WorkflowConfig::default_path() {
            Some(path) if path.is_file() => {
                log::debug!("Using config file {}", path.display());
                WorkflowConfig::from_json_file(&path)
                    .with_context(|| format!("Failed to load config {}", path.display()))
            },
            _ => Ok(WorkflowConfig::default()),
        }
    }

    /// Placement from `--x`, `--y` and `--scale`
    pub(crate) fn placement(cli: &Cli) -> Result<Placement> {
        Placement::new(cli.x, cli.y, cli.scale).context("Invalid placement")
    }

    /// Parse `--canvas WIDTHxHEIGHT`
    pub(crate) fn canvas(cli: &Cli) -> Result<Option<Dimensions>> {
        let Some(raw) = cli.canvas.as_deref() else {
            return Ok(None);
        };
        let (width, height) = raw
            .split_once(['x', 'X'])
            .with_context(|| format!("Canvas '{}' is not WIDTHxHEIGHT", raw))?;
        let width: u32 = width
            .trim()
            .parse()
            .with_context(|| format!("Invalid canvas width in '{}'", raw))?;
        let height: u32 = height
            .trim()
            .parse()
            .with_context(|| format!("Invalid canvas height in '{}'", raw))?;
        if width == 0 || height == 0 {
            anyhow::bail!("Canvas '{}' must not be empty", raw);
        }
        Ok(Some(Dimensions::new(width, height)))
    }

    /// Validate CLI arguments for consistency
    pub(crate) fn validate_cli(cli: &Cli) -> Result<()> {
        if let Some(group_size) = cli.group_size {
            if !(1..=MAX_GROUP_SIZE).contains(&group_size) {
                anyhow::bail!(
                    "Group size {} is out of range (1-{})",
                    group_size,
                    MAX_GROUP_SIZE
                );
            }
        }

        Self::placement(cli)?;
        Self::canvas(cli)?;

        Ok(())
    }
}
