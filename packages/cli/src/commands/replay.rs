use anyhow::{Context, Result};
use blocksync_engine::{ExternalNotification, HistoryStep, SyncConfig, SyncEngine};
use blocksync_model::{serialize, BlockSchema, EditorChange, Operation, Patch};
use clap::Args;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Script of editor and persistence events (JSON)
    pub script: PathBuf,

    /// Engine config file (defaults to blocksync.config.json next to the script)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    pub format: String,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// A recorded editing session
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Script {
    #[serde(default)]
    pub initial: Value,
    #[serde(default)]
    pub schema: BlockSchema,
    pub events: Vec<ScriptEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ScriptEvent {
    /// Editor operations applied as one change
    Edit { operations: Vec<Operation> },
    /// Advance the virtual clock
    Wait { ms: u64 },
    External(ExternalNotification),
    FormPatches { patches: Vec<Patch> },
    Undo,
    Redo,
    Flush,
}

/// One outward patch batch
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmittedBatch {
    pub at_ms: u64,
    pub patches: Vec<Patch>,
}

#[derive(Debug)]
pub struct ReplayReport {
    pub batches: Vec<EmittedBatch>,
    pub document: Value,
    pub undo_levels: usize,
    pub redo_levels: usize,
    pub disabled: bool,
}

pub fn replay(args: ReplayArgs, cwd: &str) -> Result<()> {
    let cwd = Path::new(cwd);
    let script_path = cwd.join(&args.script);
    let source = fs::read_to_string(&script_path)
        .with_context(|| format!("Cannot read script {}", script_path.display()))?;
    let script: Script =
        serde_json::from_str(&source).with_context(|| format!("Invalid script {}", script_path.display()))?;

    let config = match &args.config {
        Some(path) => SyncConfig::load(cwd.join(path))?,
        None => match script_path.parent() {
            Some(dir) => SyncConfig::load_from_dir(dir)?,
            None => SyncConfig::load_from_dir(cwd)?,
        },
    };

    let report = run_script(script, config)?;

    match args.format.as_str() {
        "json" => print_json(&report)?,
        "text" => print_text(&args, &report)?,
        other => return Err(anyhow::anyhow!("Unknown format: {}. Use: text or json", other)),
    }

    Ok(())
}

/// Drive an engine through the script on a virtual clock
pub fn run_script(script: Script, config: SyncConfig) -> Result<ReplayReport> {
    let mut engine: SyncEngine<Vec<Vec<Patch>>> =
        SyncEngine::new(script.initial, config, script.schema.clone(), Vec::new());

    let start = Instant::now();
    let mut elapsed = Duration::ZERO;
    let mut batches = Vec::new();

    for (index, event) in script.events.into_iter().enumerate() {
        let now = start + elapsed;
        debug!(index, at_ms = elapsed.as_millis() as u64, "Replaying event");

        match event {
            ScriptEvent::Edit { operations } => {
                let change = EditorChange::from_operations(engine.snapshot(), engine.selection().cloned(), operations)
                    .with_context(|| format!("Event {}: operations do not apply", index))?;
                engine
                    .handle_editor_change(change, now)
                    .with_context(|| format!("Event {}: edit rejected", index))?;
            }
            ScriptEvent::Wait { ms } => {
                let until = elapsed + Duration::from_millis(ms);
                // Flush at the deadline itself so the batch is stamped when it went out
                while let Some(deadline) = engine.deadline() {
                    if deadline > start + until {
                        break;
                    }
                    elapsed = deadline - start;
                    engine.poll(deadline);
                    collect(&mut engine, &mut batches, elapsed);
                }
                elapsed = until;
            }
            ScriptEvent::External(notification) => {
                let outcome = engine.on_external_patches(notification);
                if let Some(err) = &outcome.selection_error {
                    debug!(error = %err, "Selection lost");
                }
                if let Some(err) = &outcome.replay_error {
                    eprintln!("{} {}", "⚠".yellow(), err);
                }
            }
            ScriptEvent::FormPatches { patches } => {
                engine
                    .apply_form_patches(patches)
                    .with_context(|| format!("Event {}: form patches rejected", index))?;
            }
            ScriptEvent::Undo => {
                if let HistoryStep::EmptyStack = engine.undo(now)? {
                    debug!(index, "Nothing to undo");
                }
            }
            ScriptEvent::Redo => {
                if let HistoryStep::EmptyStack = engine.redo(now)? {
                    debug!(index, "Nothing to redo");
                }
            }
            ScriptEvent::Flush => {
                engine.flush_now();
            }
        }

        collect(&mut engine, &mut batches, elapsed);
    }

    // Whatever is still buffered goes out when the session ends
    engine.flush_now();
    collect(&mut engine, &mut batches, elapsed);

    Ok(ReplayReport {
        batches,
        document: serialize(engine.snapshot(), &script.schema),
        undo_levels: engine.undo_levels(),
        redo_levels: engine.redo_levels(),
        disabled: engine.is_disabled(),
    })
}

fn collect(engine: &mut SyncEngine<Vec<Vec<Patch>>>, batches: &mut Vec<EmittedBatch>, elapsed: Duration) {
    let at_ms = elapsed.as_millis() as u64;
    batches.extend(
        engine
            .sink_mut()
            .drain(..)
            .map(|patches| EmittedBatch { at_ms, patches }),
    );
}

fn print_json(report: &ReplayReport) -> Result<()> {
    for batch in &report.batches {
        println!("{}", serde_json::to_string(batch)?);
    }
    println!("{}", serde_json::to_string(&serde_json::json!({ "document": report.document }))?);
    Ok(())
}

fn print_text(args: &ReplayArgs, report: &ReplayReport) -> Result<()> {
    println!("🔁 {} {}", "Replaying".green().bold(), args.script.display());
    println!();

    for batch in &report.batches {
        println!(
            "   {} t={}ms {} patch(es)",
            "→".cyan(),
            batch.at_ms,
            batch.patches.len()
        );
        for patch in &batch.patches {
            println!("     {}", serde_json::to_string(patch)?);
        }
    }

    println!();
    if report.disabled {
        println!("   {} Document value cannot be edited", "✗".red());
    }
    println!("✨ {} Replay complete!", "Done".green().bold());
    println!("   Batches emitted: {}", report.batches.len());
    println!("   Undo levels: {}", report.undo_levels);
    println!("   Redo levels: {}", report.redo_levels);

    Ok(())
}
