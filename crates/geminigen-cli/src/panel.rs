use std::io::{self, BufRead, ErrorKind, Write};
use std::path::PathBuf;

use anyhow::Result;
use geminigen_contracts::panel::{parse_intent, Intent, PANEL_HELP_COMMANDS};
use geminigen_contracts::resolution::{parse_base_size, AspectPreset};
use geminigen_engine::{GenerationReport, Generator};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PanelFlow {
    Continue,
    Quit,
}

/// Line-oriented generator panel. Settings changes are written back to
/// `settings_path` as they are made.
pub(crate) struct Panel {
    generator: Generator,
    settings_path: PathBuf,
    source_image: Option<PathBuf>,
}

impl Panel {
    pub(crate) fn new(
        generator: Generator,
        settings_path: PathBuf,
        source_image: Option<PathBuf>,
    ) -> Self {
        Self {
            generator,
            settings_path,
            source_image,
        }
    }

    pub(crate) fn run(&mut self) -> Result<()> {
        let stdin = io::stdin();
        let mut input = stdin.lock();
        let mut stdout = io::stdout();
        let mut line = String::new();

        println!("Gemini image panel. Type a prompt to generate, or /help for commands.");
        loop {
            print!("> ");
            stdout.flush()?;

            line.clear();
            let read = match input.read_line(&mut line) {
                Ok(read) => read,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            };
            if read == 0 {
                break;
            }

            let text = line.trim_end_matches(['\n', '\r']);
            if self.handle_line(text, &mut stdout)? == PanelFlow::Quit {
                break;
            }
        }
        Ok(())
    }

    /// Applies one line of input. Generation errors are reported, not returned.
    pub(crate) fn handle_line(&mut self, text: &str, out: &mut impl Write) -> Result<PanelFlow> {
        let intent = parse_intent(text);
        match intent.action.as_str() {
            "noop" => {}
            "quit" => return Ok(PanelFlow::Quit),
            "help" => writeln!(out, "Commands: {}", PANEL_HELP_COMMANDS.join(" "))?,
            "set_prompt" => match intent.arg_str("text") {
                Some(prompt) => {
                    self.generator.set_prompt(prompt);
                    writeln!(out, "Prompt set.")?;
                }
                None => writeln!(out, "Prompt: {}", self.generator.prompt())?,
            },
            "generate" => {
                if let Some(prompt) = intent.prompt.as_deref() {
                    self.generator.set_prompt(prompt);
                }
                let prompt = self.generator.prompt().to_string();
                let outcome = self.generator.generate_from_prompt(&prompt);
                self.report_outcome(outcome, out)?;
            }
            "set_source_image" => match intent.arg_str("path") {
                Some(path) => {
                    self.source_image = Some(PathBuf::from(path));
                    writeln!(out, "Source image set to {path}")?;
                }
                None => writeln!(out, "/image requires a path")?,
            },
            "edit" => self.handle_edit(&intent, out)?,
            "set_aspect" => match intent.arg_str("aspect").map(str::parse::<AspectPreset>) {
                Some(Ok(aspect)) => {
                    self.generator.resolution_mut().aspect = aspect;
                    self.write_resolution(out)?;
                }
                Some(Err(err)) => writeln!(out, "{err}")?,
                None => writeln!(out, "Aspect: {}", self.generator.resolution().aspect)?,
            },
            "set_base_size" => match intent.arg_str("size").map(parse_base_size) {
                Some(Ok(size)) => {
                    self.generator.resolution_mut().base_size = size;
                    self.write_resolution(out)?;
                }
                Some(Err(err)) => writeln!(out, "{err}")?,
                None => writeln!(out, "Base size: {}", self.generator.resolution().base_size)?,
            },
            "set_custom_size" => match custom_dims(&intent) {
                Some((width, height)) => {
                    let resolution = self.generator.resolution_mut();
                    resolution.custom_width = width;
                    resolution.custom_height = height;
                    resolution.aspect = AspectPreset::Custom;
                    self.write_resolution(out)?;
                }
                None => writeln!(out, "usage: /custom <width> <height>")?,
            },
            "set_resize" => match intent.arg_str("value").and_then(parse_toggle) {
                Some(enabled) => {
                    self.generator.resolution_mut().resize_after_download = enabled;
                    self.write_resolution(out)?;
                }
                None => writeln!(out, "usage: /resize <on|off>")?,
            },
            "set_model" => match intent.arg_str("model") {
                Some(model) => {
                    self.generator.settings_mut().set_model(model);
                    self.save_settings()?;
                    writeln!(out, "Model set to {}", self.generator.settings().model)?;
                }
                None => writeln!(out, "Model: {}", self.generator.settings().model)?,
            },
            "set_output_dir" => match intent.arg_str("path") {
                Some(path) => {
                    self.generator.settings_mut().set_output_dir(path);
                    self.save_settings()?;
                    writeln!(
                        out,
                        "Output directory set to {}",
                        self.generator.settings().effective_output_dir().display()
                    )?;
                }
                None => writeln!(
                    out,
                    "Output directory: {}",
                    self.generator.settings().effective_output_dir().display()
                )?,
            },
            "set_api_key" => match intent.arg_str("key") {
                Some(key) => {
                    self.generator.settings_mut().set_api_key(key);
                    self.save_settings()?;
                    writeln!(out, "API key saved.")?;
                }
                None => writeln!(out, "/key requires a value")?,
            },
            "clear_api_key" => {
                self.generator.settings_mut().clear_api_key();
                self.save_settings()?;
                writeln!(out, "API key cleared.")?;
            }
            "list_presets" => {
                let presets = self.generator.presets().list();
                if presets.is_empty() {
                    writeln!(out, "No presets saved.")?;
                }
                for (index, preset) in presets.iter().enumerate() {
                    writeln!(out, "{index}: {}", preset.name)?;
                }
            }
            "save_preset" => match intent.arg_str("name") {
                Some(name) => {
                    let text = self.generator.prompt().to_string();
                    match self.generator.presets_mut().save_current(name, &text) {
                        Ok(()) => writeln!(out, "Preset '{name}' saved.")?,
                        Err(err) => writeln!(out, "error: {err:#}")?,
                    }
                }
                None => writeln!(out, "Preset name required.")?,
            },
            "load_preset" => {
                let found = intent
                    .arg_str("name")
                    .and_then(|name| self.generator.presets().find(name))
                    .map(|preset| (preset.name.clone(), preset.text.clone()));
                match found {
                    Some((name, text)) => {
                        self.generator.set_prompt(text);
                        writeln!(out, "Loaded preset '{name}'.")?;
                    }
                    None => writeln!(out, "No such preset.")?,
                }
            }
            "delete_preset" => {
                let position = intent
                    .arg_str("name")
                    .and_then(|name| self.generator.presets().position(name));
                match position {
                    Some(index) => match self.generator.presets_mut().delete(index) {
                        Ok(Some(removed)) => writeln!(out, "Deleted preset '{}'.", removed.name)?,
                        Ok(None) => writeln!(out, "No such preset.")?,
                        Err(err) => writeln!(out, "error: {err:#}")?,
                    },
                    None => writeln!(out, "No such preset.")?,
                }
            }
            "status" => self.write_status(out)?,
            "unknown" => {
                let command = intent.arg_str("command").unwrap_or_default();
                writeln!(out, "Unknown command: /{command}. Type /help for commands.")?;
            }
            other => writeln!(out, "Unhandled action: {other}")?,
        }
        Ok(PanelFlow::Continue)
    }

    fn handle_edit(&mut self, intent: &Intent, out: &mut impl Write) -> Result<()> {
        if let Some(path) = intent.arg_str("path") {
            self.source_image = Some(PathBuf::from(path));
        }
        let Some(source) = self.source_image.clone() else {
            writeln!(out, "No source image. Use /image <path> or /edit <path>.")?;
            return Ok(());
        };
        let prompt = self.generator.prompt().to_string();
        let outcome = self.generator.edit_image(&prompt, &source);
        self.report_outcome(outcome, out)
    }

    fn report_outcome(
        &self,
        outcome: Result<GenerationReport>,
        out: &mut impl Write,
    ) -> Result<()> {
        match outcome {
            Ok(report) => {
                for image in &report.saved {
                    writeln!(out, "Saved {}", image.path.display())?;
                }
                for warning in &report.warnings {
                    writeln!(out, "warning: {warning}")?;
                }
                writeln!(out, "{}", report.status)?;
            }
            Err(err) => writeln!(out, "error: {err:#}")?,
        }
        Ok(())
    }

    fn write_resolution(&self, out: &mut impl Write) -> Result<()> {
        writeln!(out, "Resolution: {}", self.generator.resolution().describe())?;
        Ok(())
    }

    fn write_status(&self, out: &mut impl Write) -> Result<()> {
        let settings = self.generator.settings();
        let status = self.generator.status();
        writeln!(
            out,
            "Status: {}",
            if status.is_empty() { "idle" } else { status.as_str() }
        )?;
        writeln!(out, "Prompt: {}", self.generator.prompt())?;
        writeln!(out, "Model: {}", settings.model)?;
        writeln!(
            out,
            "API key: {}",
            settings
                .masked_api_key()
                .unwrap_or_else(|| "(not stored)".to_string())
        )?;
        writeln!(
            out,
            "Output directory: {}",
            settings.effective_output_dir().display()
        )?;
        writeln!(out, "Resolution: {}", self.generator.resolution().describe())?;
        if let Some(source) = &self.source_image {
            writeln!(out, "Source image: {}", source.display())?;
        }
        if let Some(last) = self.generator.last_saved_path() {
            writeln!(out, "Last image: {}", last.display())?;
        }
        Ok(())
    }

    fn save_settings(&self) -> Result<()> {
        self.generator.settings().save(&self.settings_path)
    }
}

fn custom_dims(intent: &Intent) -> Option<(u32, u32)> {
    let dims = intent.command_args.get("dims")?.as_array()?;
    let width = dims.first().and_then(Value::as_u64)?;
    let height = dims.get(1).and_then(Value::as_u64)?;
    Some((u32::try_from(width).ok()?, u32::try_from(height).ok()?))
}

fn parse_toggle(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Some(true),
        "off" | "false" | "no" | "0" => Some(false),
        _ => None,
    }
}
