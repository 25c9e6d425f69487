mod panel;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use geminigen_contracts::events::EventWriter;
use geminigen_contracts::presets::PresetStore;
use geminigen_contracts::resolution::{parse_base_size, AspectPreset, ResolutionSpec};
use geminigen_contracts::settings::{non_empty_env, Settings};
use geminigen_engine::{GenerationReport, Generator, DEFAULT_PROMPT};
use tracing_subscriber::EnvFilter;

use crate::panel::Panel;

const CONFIG_HOME_ENV: &str = "GEMINIGEN_HOME";

#[derive(Debug, Parser)]
#[command(name = "geminigen", version, about = "Gemini image generation client")]
struct Cli {
    /// Directory holding settings.json, presets.json and events.jsonl.
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,
    /// Activity log path (defaults to events.jsonl in the config dir).
    #[arg(long, global = true)]
    events: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate images from a text prompt.
    Generate(GenerateArgs),
    /// Edit an existing image with a text prompt.
    Edit(EditArgs),
    #[command(subcommand)]
    Config(ConfigCommand),
    #[command(subcommand)]
    Preset(PresetCommand),
    /// Interactive generator panel.
    Panel(PanelArgs),
}

#[derive(Debug, Args)]
struct PromptArgs {
    #[arg(long, conflicts_with = "preset")]
    prompt: Option<String>,
    /// Use the text of a saved prompt preset.
    #[arg(long)]
    preset: Option<String>,
}

#[derive(Debug, Args, Default)]
struct ResolutionArgs {
    /// 1x1, 16x9, 4x3, 9x16 or custom.
    #[arg(long)]
    aspect: Option<String>,
    /// Shorter edge for ratio presets: 512, 1024, 1536 or 2048.
    #[arg(long)]
    size: Option<String>,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    /// Keep downloaded images at the size the API returned.
    #[arg(long)]
    no_resize: bool,
}

#[derive(Debug, Args)]
struct SessionArgs {
    /// Output directory for this run (not persisted).
    #[arg(long)]
    out: Option<PathBuf>,
    /// Model for this run (not persisted).
    #[arg(long)]
    model: Option<String>,
}

#[derive(Debug, Args)]
struct GenerateArgs {
    #[command(flatten)]
    prompt: PromptArgs,
    #[command(flatten)]
    resolution: ResolutionArgs,
    #[command(flatten)]
    session: SessionArgs,
}

#[derive(Debug, Args)]
struct EditArgs {
    #[arg(long)]
    image: PathBuf,
    #[command(flatten)]
    prompt: PromptArgs,
    #[command(flatten)]
    resolution: ResolutionArgs,
    #[command(flatten)]
    session: SessionArgs,
}

#[derive(Debug, Args)]
struct PanelArgs {
    /// Source image for /edit.
    #[arg(long)]
    image: Option<PathBuf>,
    #[command(flatten)]
    resolution: ResolutionArgs,
    #[command(flatten)]
    session: SessionArgs,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    Show,
    SetKey { key: String },
    ClearKey,
    SetModel { model: String },
    SetOutput { dir: PathBuf },
}

#[derive(Debug, Subcommand)]
enum PresetCommand {
    List,
    /// Save TEXT (or the default prompt) under NAME, replacing a preset of the same name.
    Save {
        name: String,
        #[arg(long)]
        text: Option<String>,
    },
    Show { name: String },
    Delete { name: String },
}

/// Files under the config directory.
#[derive(Debug, Clone)]
struct ConfigPaths {
    root: PathBuf,
    events_override: Option<PathBuf>,
}

impl ConfigPaths {
    fn settings(&self) -> PathBuf {
        self.root.join("settings.json")
    }

    fn presets(&self) -> PathBuf {
        self.root.join("presets.json")
    }

    fn events(&self) -> PathBuf {
        self.events_override
            .clone()
            .unwrap_or_else(|| self.root.join("events.jsonl"))
    }
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("geminigen error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let paths = ConfigPaths {
        root: resolve_config_dir(cli.config_dir.as_deref(), non_empty_env)?,
        events_override: cli.events.clone(),
    };
    match cli.command {
        Command::Generate(args) => run_generate(&paths, args),
        Command::Edit(args) => run_edit(&paths, args),
        Command::Config(command) => run_config(&paths, command),
        Command::Preset(command) => run_preset(&paths, command),
        Command::Panel(args) => run_panel(&paths, args),
    }
}

/// `--config-dir`, then `GEMINIGEN_HOME`, then the platform config directory.
fn resolve_config_dir(
    flag: Option<&Path>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<PathBuf> {
    if let Some(dir) = flag {
        return Ok(dir.to_path_buf());
    }
    if let Some(home) = lookup(CONFIG_HOME_ENV) {
        return Ok(PathBuf::from(home));
    }
    match directories::ProjectDirs::from("dev", "geminigen", "geminigen") {
        Some(dirs) => Ok(dirs.config_dir().to_path_buf()),
        None => bail!("could not determine a config directory; pass --config-dir or set {CONFIG_HOME_ENV}"),
    }
}

fn run_generate(paths: &ConfigPaths, args: GenerateArgs) -> Result<i32> {
    let generator = open_generator(paths, &args.resolution, &args.session)?;
    let prompt = resolve_prompt(&args.prompt, generator.presets())?;
    let report = generator.generate_from_prompt(&prompt)?;
    print_report(&report);
    Ok(0)
}

fn run_edit(paths: &ConfigPaths, args: EditArgs) -> Result<i32> {
    let generator = open_generator(paths, &args.resolution, &args.session)?;
    let prompt = resolve_prompt(&args.prompt, generator.presets())?;
    let report = generator.edit_image(&prompt, &args.image)?;
    print_report(&report);
    Ok(0)
}

fn run_panel(paths: &ConfigPaths, args: PanelArgs) -> Result<i32> {
    let generator = open_generator(paths, &args.resolution, &args.session)?;
    let mut panel = Panel::new(generator, paths.settings(), args.image);
    panel.run()?;
    Ok(0)
}

fn open_generator(
    paths: &ConfigPaths,
    resolution_args: &ResolutionArgs,
    session: &SessionArgs,
) -> Result<Generator> {
    let mut settings = Settings::load(&paths.settings());
    if let Some(out) = &session.out {
        settings.set_output_dir(out.clone());
    }
    if let Some(model) = &session.model {
        settings.set_model(model);
    }
    let mut resolution = ResolutionSpec::default();
    apply_resolution_args(&mut resolution, resolution_args)?;

    let events = EventWriter::new(paths.events(), uuid::Uuid::new_v4().to_string());
    tracing::debug!(
        "config dir {}, events {}",
        paths.root.display(),
        events.path().display()
    );
    Ok(Generator::new(
        settings,
        resolution,
        PresetStore::load(paths.presets()),
        events,
    ))
}

/// Width or height alone switches to custom dimensions unless an aspect was given.
fn apply_resolution_args(spec: &mut ResolutionSpec, args: &ResolutionArgs) -> Result<()> {
    if let Some(aspect) = &args.aspect {
        spec.aspect = aspect.parse::<AspectPreset>()?;
    }
    if let Some(size) = &args.size {
        spec.base_size = parse_base_size(size)?;
    }
    if args.width.is_some() || args.height.is_some() {
        if let Some(width) = args.width {
            spec.custom_width = width;
        }
        if let Some(height) = args.height {
            spec.custom_height = height;
        }
        if args.aspect.is_none() {
            spec.aspect = AspectPreset::Custom;
        }
    }
    if args.no_resize {
        spec.resize_after_download = false;
    }
    Ok(())
}

fn resolve_prompt(args: &PromptArgs, presets: &PresetStore) -> Result<String> {
    if let Some(name) = &args.preset {
        let Some(preset) = presets.find(name.trim()) else {
            bail!("no preset named '{}' in {}", name.trim(), presets.path().display());
        };
        return Ok(preset.text.clone());
    }
    Ok(args
        .prompt
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_PROMPT)
        .to_string())
}

fn print_report(report: &GenerationReport) {
    for image in &report.saved {
        match (image.width, image.height) {
            (Some(width), Some(height)) => {
                println!("{} ({width}x{height})", image.path.display())
            }
            _ => println!("{}", image.path.display()),
        }
    }
    for warning in &report.warnings {
        eprintln!("warning: {warning}");
    }
    println!("{}", report.status);
}

fn run_config(paths: &ConfigPaths, command: ConfigCommand) -> Result<i32> {
    let settings_path = paths.settings();
    let mut settings = Settings::load(&settings_path);
    match command {
        ConfigCommand::Show => {
            println!("config dir: {}", paths.root.display());
            println!("settings:   {}", settings_path.display());
            println!("presets:    {}", paths.presets().display());
            println!("events:     {}", paths.events().display());
            let key = match settings.masked_api_key() {
                Some(masked) => masked,
                None if settings.resolve_api_key().is_some() => "(from environment)".to_string(),
                None => "(not set)".to_string(),
            };
            println!("api key:    {key}");
            println!("model:      {}", settings.model);
            println!("output dir: {}", settings.effective_output_dir().display());
            println!("api base:   {}", settings.resolve_api_base());
            println!("timeout:    {}s", settings.timeout_secs);
            return Ok(0);
        }
        ConfigCommand::SetKey { key } => {
            if key.trim().is_empty() {
                bail!("API key must not be empty");
            }
            settings.set_api_key(&key);
            println!("API key saved.");
        }
        ConfigCommand::ClearKey => {
            settings.clear_api_key();
            println!("API key cleared.");
        }
        ConfigCommand::SetModel { model } => {
            settings.set_model(&model);
            println!("Model set to {}", settings.model);
        }
        ConfigCommand::SetOutput { dir } => {
            settings.set_output_dir(dir);
            println!(
                "Output directory set to {}",
                settings.effective_output_dir().display()
            );
        }
    }
    settings
        .save(&settings_path)
        .with_context(|| format!("failed to write {}", settings_path.display()))?;
    Ok(0)
}

fn run_preset(paths: &ConfigPaths, command: PresetCommand) -> Result<i32> {
    let mut presets = PresetStore::load(paths.presets());
    match command {
        PresetCommand::List => {
            if presets.list().is_empty() {
                println!("No presets saved.");
            }
            for (index, preset) in presets.list().iter().enumerate() {
                println!("{index}: {}", preset.name);
            }
        }
        PresetCommand::Save { name, text } => {
            let text = text.unwrap_or_else(|| DEFAULT_PROMPT.to_string());
            presets.save_current(name.trim(), &text)?;
            println!("Preset '{}' saved.", name.trim());
        }
        PresetCommand::Show { name } => {
            let Some(preset) = presets.find(&name) else {
                bail!("no preset named '{name}'");
            };
            println!("{}", preset.text);
        }
        PresetCommand::Delete { name } => {
            let Some(index) = presets.position(&name) else {
                bail!("no preset named '{name}'");
            };
            if let Some(removed) = presets.delete(index)? {
                println!("Preset '{}' deleted.", removed.name);
            }
        }
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use clap::Parser;
    use geminigen_contracts::presets::PresetStore;
    use geminigen_contracts::resolution::{AspectPreset, ResolutionSpec};

    use super::{
        apply_resolution_args, resolve_config_dir, resolve_prompt, Cli, Command, PromptArgs,
        ResolutionArgs, DEFAULT_PROMPT,
    };

    #[test]
    fn config_dir_prefers_flag_then_env() -> anyhow::Result<()> {
        let from_flag = resolve_config_dir(Some(Path::new("/tmp/flag")), |_| {
            Some("/tmp/env".to_string())
        })?;
        assert_eq!(from_flag, PathBuf::from("/tmp/flag"));

        let from_env = resolve_config_dir(None, |key| {
            (key == "GEMINIGEN_HOME").then(|| "/tmp/env".to_string())
        })?;
        assert_eq!(from_env, PathBuf::from("/tmp/env"));
        Ok(())
    }

    #[test]
    fn width_and_height_switch_to_custom() -> anyhow::Result<()> {
        let mut spec = ResolutionSpec::default();
        apply_resolution_args(
            &mut spec,
            &ResolutionArgs {
                width: Some(640),
                height: Some(4),
                no_resize: true,
                ..ResolutionArgs::default()
            },
        )?;
        assert_eq!(spec.aspect, AspectPreset::Custom);
        assert_eq!(spec.target(), (640, 8));
        assert!(!spec.resize_after_download);
        Ok(())
    }

    #[test]
    fn aspect_and_size_flags_are_validated() -> anyhow::Result<()> {
        let mut spec = ResolutionSpec::default();
        apply_resolution_args(
            &mut spec,
            &ResolutionArgs {
                aspect: Some("9:16".to_string()),
                size: Some("512".to_string()),
                ..ResolutionArgs::default()
            },
        )?;
        assert_eq!(spec.target(), (512, 910));

        let bad = apply_resolution_args(
            &mut spec,
            &ResolutionArgs {
                aspect: Some("3x2".to_string()),
                ..ResolutionArgs::default()
            },
        );
        assert!(bad.is_err());
        Ok(())
    }

    #[test]
    fn prompt_comes_from_preset_flag_or_default() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut presets = PresetStore::load(temp.path().join("presets.json"));
        presets.save_current("noir", "a rainy street in black and white")?;

        let from_preset = resolve_prompt(
            &PromptArgs {
                prompt: None,
                preset: Some("noir".to_string()),
            },
            &presets,
        )?;
        assert_eq!(from_preset, "a rainy street in black and white");

        let fallback = resolve_prompt(
            &PromptArgs {
                prompt: Some("  ".to_string()),
                preset: None,
            },
            &presets,
        )?;
        assert_eq!(fallback, DEFAULT_PROMPT);

        let missing = resolve_prompt(
            &PromptArgs {
                prompt: None,
                preset: Some("absent".to_string()),
            },
            &presets,
        );
        assert!(missing.is_err());
        Ok(())
    }

    #[test]
    fn cli_parses_generate_with_resolution_flags() -> anyhow::Result<()> {
        let cli = Cli::try_parse_from([
            "geminigen",
            "--config-dir",
            "/tmp/cfg",
            "generate",
            "--prompt",
            "a fox",
            "--aspect",
            "16x9",
            "--size",
            "1536",
            "--no-resize",
        ])?;
        assert_eq!(cli.config_dir, Some(PathBuf::from("/tmp/cfg")));
        let Command::Generate(args) = cli.command else {
            anyhow::bail!("expected generate");
        };
        assert_eq!(args.prompt.prompt.as_deref(), Some("a fox"));
        assert_eq!(args.resolution.aspect.as_deref(), Some("16x9"));
        assert!(args.resolution.no_resize);
        Ok(())
    }

    #[test]
    fn prompt_and_preset_flags_conflict() {
        let parsed = Cli::try_parse_from([
            "geminigen", "generate", "--prompt", "a", "--preset", "b",
        ]);
        assert!(parsed.is_err());
    }
}
