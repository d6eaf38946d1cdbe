use anyhow::{Context, Result};
use kestrel_stage::cli::CliArgs;
use kestrel_stage::config::{StageConfig, DEFAULT_CONFIG_PATH};
use kestrel_stage::Stage;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use std::process;
use tracing_subscriber::EnvFilter;

/// One script step. Every field is optional so a line can just advance time or switch tool.
#[derive(Debug, Deserialize)]
struct ScriptStep {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    tool: Option<String>,
    /// Seconds to advance after the action runs.
    #[serde(default)]
    tick: Option<f32>,
}

fn main() {
    let args = match CliArgs::parse_from_env() {
        Ok(parsed) => parsed,
        Err(err) => {
            eprintln!("[cli] {err}");
            process::exit(2);
        }
    };
    init_tracing(args.log.as_deref());
    if let Err(err) = run(&args) {
        tracing::error!(target: "stage", "{err:?}");
        process::exit(1);
    }
}

fn init_tracing(directive: Option<&str>) {
    let filter = match directive {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(io::stderr).compact().init();
}

fn load_config(args: &CliArgs) -> Result<StageConfig> {
    let mut config = match &args.config {
        Some(path) => StageConfig::load(path)?,
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => StageConfig::load_or_default(DEFAULT_CONFIG_PATH),
        None => StageConfig::default(),
    };
    let overrides = args.config_overrides();
    if !overrides.is_empty() {
        tracing::info!(target: "config", fields = ?overrides.applied_fields(), "applying command line overrides");
        config.apply_overrides(&overrides);
    }
    Ok(config)
}

fn run(args: &CliArgs) -> Result<()> {
    let config = load_config(args)?;
    let mut stage = Stage::from_config(config)?;
    let reader: Box<dyn BufRead> = match &args.script {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("Failed to open script {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    };
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for (index, line) in reader.lines().enumerate() {
        let line = line.context("reading script")?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("//") {
            continue;
        }
        let step: ScriptStep =
            serde_json::from_str(trimmed).with_context(|| format!("script line {} is not a valid step", index + 1))?;
        if let Some(tool) = &step.tool {
            stage.use_tool(tool).with_context(|| format!("script line {}", index + 1))?;
        }
        if let Some(action) = &step.action {
            let mut payload = step.payload;
            let ok = stage.perform(action, &mut payload);
            writeln!(out, "{}", json!({ "line": index + 1, "action": action, "ok": ok, "payload": payload }))?;
        }
        if let Some(dt) = step.tick {
            for id in stage.tick(dt) {
                writeln!(out, "{}", json!({ "line": index + 1, "loaded": id }))?;
            }
        }
    }
    out.flush()?;
    Ok(())
}
