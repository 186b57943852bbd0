//! terraseg CLI
//!
//! Operator tooling around the model factory: build a network from a
//! configuration and report what came out, write a configuration
//! template, and inspect or edit checkpoint files.

use std::path::PathBuf;

use anyhow::Result;
use burn::module::Module;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use terraseg::backend::{backend_name, default_device, DefaultBackend};
use terraseg::utils::logging::{init_logging, LogConfig};
use terraseg::{
    build_network, chop_layer, load_checkpoint, rename_layer, save_checkpoint, NetConfig,
};

/// Remote-sensing semantic segmentation model tooling
#[derive(Parser, Debug)]
#[command(name = "terraseg")]
#[command(version)]
#[command(about = "Model selection and checkpoint tooling for semantic segmentation", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build the configured network and report what was constructed
    Build {
        /// Path to the configuration JSON
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,

        /// Resolve the inference checkpoint instead of the training one
        #[arg(long, default_value = "false")]
        inference: bool,
    },

    /// Write a configuration template
    Config {
        /// Model name to put in the template
        #[arg(short, long, default_value = "unetsmall")]
        model_name: String,

        /// Number of output classes
        #[arg(short, long, default_value = "2")]
        num_classes: usize,

        /// Number of input bands
        #[arg(short, long, default_value = "3")]
        bands: usize,

        /// Output path
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,
    },

    /// Inspect or edit checkpoint files
    #[command(subcommand)]
    Checkpoint(CheckpointCommands),
}

#[derive(Subcommand, Debug)]
enum CheckpointCommands {
    /// Show a checkpoint's entries and shapes
    Info {
        /// Path to the checkpoint JSON
        path: PathBuf,
    },

    /// Remove the named layers from a checkpoint's state dict
    Chop {
        /// Path to the checkpoint JSON
        path: PathBuf,

        /// Layer names to remove (comma separated)
        #[arg(short, long, value_delimiter = ',')]
        layers: Vec<String>,

        /// Where to write the edited checkpoint
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Re-prefix parameter names in a checkpoint's state dict
    Rename {
        /// Path to the checkpoint JSON
        path: PathBuf,

        /// Layer prefix to rename
        #[arg(long)]
        from: String,

        /// New prefix
        #[arg(long)]
        to: String,

        /// Where to write the edited checkpoint
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };
    let _ = init_logging(&log_config);

    match cli.command {
        Commands::Build { config, inference } => cmd_build(&config, inference)?,
        Commands::Config {
            model_name,
            num_classes,
            bands,
            output,
        } => cmd_config(&model_name, num_classes, bands, &output)?,
        Commands::Checkpoint(command) => match command {
            CheckpointCommands::Info { path } => cmd_checkpoint_info(&path)?,
            CheckpointCommands::Chop {
                path,
                layers,
                output,
            } => cmd_checkpoint_chop(&path, &layers, &output)?,
            CheckpointCommands::Rename {
                path,
                from,
                to,
                output,
            } => cmd_checkpoint_rename(&path, &from, &to, &output)?,
        },
    }

    Ok(())
}

fn cmd_build(config_path: &PathBuf, inference: bool) -> Result<()> {
    info!("Loading configuration from {:?}", config_path);

    let config = NetConfig::load(config_path)?;
    let device = default_device();

    println!("{}", "Build Configuration:".cyan().bold());
    println!("  Config:    {}", config_path.display());
    println!("  Model:     {}", config.global.model_name);
    println!("  Classes:   {}", config.global.num_classes);
    println!("  Bands:     {}", config.global.number_of_bands);
    println!("  Inference: {}", inference);
    println!("  Backend:   {}", backend_name());
    println!();

    let (model, checkpoint, kind) = build_network::<DefaultBackend>(&config, inference, &device)?;

    println!("{}", "Constructed:".green().bold());
    println!("  Variant:    {}", kind);
    println!("  Classes:    {}", model.num_classes());
    println!("  Parameters: {}", model.num_params());
    println!(
        "  CoordConv:  {}",
        if model.is_coordconv() { "yes" } else { "no" }
    );

    match checkpoint {
        Some(checkpoint) => {
            println!();
            println!("{}", "Resolved checkpoint (not yet applied):".yellow());
            println!("  Entries:    {}", checkpoint.model.len());
            println!("  Parameters: {}", checkpoint.num_parameters());
            println!(
                "  Optimizer:  {}",
                if checkpoint.optimizer.is_some() {
                    "present"
                } else {
                    "absent"
                }
            );
        }
        None => {
            println!();
            println!("{}", "No checkpoint resolved.".yellow());
        }
    }

    Ok(())
}

fn cmd_config(model_name: &str, num_classes: usize, bands: usize, output: &PathBuf) -> Result<()> {
    let config = NetConfig::new(model_name, num_classes, bands);
    config.validate()?;
    config.save(output)?;

    println!(
        "{} Wrote configuration template to {}",
        "OK".green().bold(),
        output.display()
    );
    Ok(())
}

fn cmd_checkpoint_info(path: &PathBuf) -> Result<()> {
    let checkpoint = load_checkpoint(path)?;

    println!("{}", "Checkpoint:".cyan().bold());
    println!("  Path:       {}", path.display());
    println!("  Entries:    {}", checkpoint.model.len());
    println!("  Parameters: {}", checkpoint.num_parameters());
    println!(
        "  Optimizer:  {}",
        if checkpoint.optimizer.is_some() {
            "present"
        } else {
            "absent"
        }
    );

    if !checkpoint.metadata.is_empty() {
        println!("  Metadata:");
        for (key, value) in &checkpoint.metadata {
            println!("    {}: {}", key, value);
        }
    }

    println!();
    println!("{}", "State dict:".cyan().bold());
    for (name, tensor) in &checkpoint.model {
        println!("  {:50} {:?}", name, tensor.shape);
    }

    Ok(())
}

fn cmd_checkpoint_chop(path: &PathBuf, layers: &[String], output: &PathBuf) -> Result<()> {
    let mut checkpoint = load_checkpoint(path)?;
    let before = checkpoint.model.len();

    let layer_refs: Vec<&str> = layers.iter().map(String::as_str).collect();
    checkpoint.model = chop_layer(checkpoint.model, &layer_refs);

    save_checkpoint(output, &checkpoint)?;
    println!(
        "{} Removed {} entries, wrote {}",
        "OK".green().bold(),
        before - checkpoint.model.len(),
        output.display()
    );
    Ok(())
}

fn cmd_checkpoint_rename(path: &PathBuf, from: &str, to: &str, output: &PathBuf) -> Result<()> {
    let mut checkpoint = load_checkpoint(path)?;
    checkpoint.model = rename_layer(checkpoint.model, from, to);

    save_checkpoint(output, &checkpoint)?;
    println!(
        "{} Renamed '{}' to '{}', wrote {}",
        "OK".green().bold(),
        from,
        to,
        output.display()
    );
    Ok(())
}
