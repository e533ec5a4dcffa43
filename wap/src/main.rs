use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::EnvFilter;
use wap::projectors::layout_projector::Layout;
use wap::{
    Diagnostics, PageSetup, Plan, PlanOptions, Severity, build_plan, layout_plan, read_plan_document, render_pdf,
};

#[derive(Debug, Parser)]
#[command(name = "wap", about = "Lay out and print weekly schedules", version)]
struct Cli {
    /// Show informational diagnostics and debug logging.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Render plan files to PDF, one page per week.
    Render(RenderArgs),

    /// Print the computed placements of a plan.
    Layout(LayoutArgs),

    /// Validate plan files; fails when any error is found.
    Check(CheckArgs),
}

#[derive(Debug, Args)]
struct PlanArgs {
    /// Plan files (YAML) or directories containing them.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Warn about events shorter than this many minutes.
    #[arg(long, value_name = "MINUTES")]
    min_duration: Option<i64>,
}

#[derive(Debug, Args)]
struct RenderArgs {
    #[command(flatten)]
    plan: PlanArgs,
    /// Output file; only valid with a single input. Defaults to the input with `.pdf`.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct LayoutArgs {
    #[command(flatten)]
    plan: PlanArgs,
    /// Emit JSON instead of a table.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct CheckArgs {
    #[command(flatten)]
    plan: PlanArgs,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Commands::Render(args) => handle_render(args),
        Commands::Layout(args) => handle_layout(args),
        Commands::Check(args) => handle_check(args),
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_plan(path: &Path, min_duration: Option<i64>) -> Result<(Plan, Diagnostics)> {
    tracing::info!("reading plan {:?}", path);
    let doc = read_plan_document(path)?;
    let mut options = PlanOptions::default();
    if let Some(minutes) = min_duration {
        options.min_event_minutes = minutes;
    }
    let mut diags = Diagnostics::new();
    let plan = build_plan(&doc, &options, &mut diags).with_context(|| format!("building plan from {:?}", path))?;
    Ok((plan, diags))
}

fn handle_render(args: RenderArgs) -> Result<()> {
    let RenderArgs { plan, output } = args;
    let inputs = expand_inputs(&plan.inputs)?;
    if inputs.is_empty() {
        anyhow::bail!("no plan files found in the provided inputs");
    }
    if output.is_some() && inputs.len() > 1 {
        anyhow::bail!("--output needs exactly one input, got {}", inputs.len());
    }

    let setup = PageSetup::default();
    for input in inputs {
        let (model, mut diags) = load_plan(&input, plan.min_duration)?;
        let (_, bytes) = render_pdf(&model, &setup, &mut diags).with_context(|| format!("rendering {:?}", input))?;
        diags.emit();

        let target = output.clone().unwrap_or_else(|| default_output_path(&input));
        fs::write(&target, bytes).with_context(|| format!("writing {:?}", target))?;
        tracing::info!("wrote {}", target.display());
    }
    Ok(())
}

fn handle_layout(args: LayoutArgs) -> Result<()> {
    let LayoutArgs { plan, json } = args;
    let inputs = expand_inputs(&plan.inputs)?;
    if inputs.is_empty() {
        anyhow::bail!("no plan files found in the provided inputs");
    }

    let setup = PageSetup::default();
    let mut computed = Vec::new();
    for input in inputs {
        let (model, mut diags) = load_plan(&input, plan.min_duration)?;
        let layout = layout_plan(&model, &setup.grid_geometry(&model), &mut diags);
        diags.emit();
        computed.push((input, layout, diags));
    }

    if json {
        #[derive(serde::Serialize)]
        struct JsonOutput<'a> {
            path: String,
            layout: &'a Layout,
            diagnostics: &'a Diagnostics,
        }

        let payload: Vec<JsonOutput<'_>> = computed
            .iter()
            .map(|(path, layout, diagnostics)| JsonOutput {
                path: path.display().to_string(),
                layout,
                diagnostics,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    for (idx, (path, layout, _)) in computed.iter().enumerate() {
        if computed.len() > 1 {
            println!("== {} ==", path.display());
        }
        for line in layout_table(layout) {
            println!("{line}");
        }
        if computed.len() > 1 && idx + 1 < computed.len() {
            println!();
        }
    }
    Ok(())
}

fn layout_table(layout: &Layout) -> Vec<String> {
    layout
        .placements
        .iter()
        .map(|p| {
            let r = p.rect;
            format!(
                "day {:>3} {}-{} {:>7.1} {:>7.1} {:>6.1} {:>6.1} {}{}",
                p.day_offset + 1,
                p.event.start.format("%H:%M"),
                p.event.end.format("%H:%M"),
                r.x,
                r.y,
                r.w,
                r.h,
                p.event.title,
                if p.event.repeats { " (repeats)" } else { "" },
            )
        })
        .collect()
}

fn handle_check(args: CheckArgs) -> Result<()> {
    let inputs = expand_inputs(&args.plan.inputs)?;
    if inputs.is_empty() {
        anyhow::bail!("no plan files found in the provided inputs");
    }

    let mut failed = 0;
    for input in &inputs {
        let (plan, mut diags) = load_plan(input, args.plan.min_duration)?;
        layout_plan(&plan, &PageSetup::default().grid_geometry(&plan), &mut diags);
        for d in diags.iter().filter(|d| d.severity > Severity::Info) {
            println!("{}: {d}", input.display());
        }
        eprintln!(
            "{}: {} events, {} diagnostics",
            input.display(),
            plan.events.len(),
            diags.len()
        );
        if diags.has_errors() {
            failed += 1;
        }
    }
    if failed > 0 {
        anyhow::bail!("{failed} of {} plan files have errors", inputs.len());
    }
    Ok(())
}

fn default_output_path(input: &Path) -> PathBuf {
    input.with_extension("pdf")
}

fn is_plan_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml") | Some("yml")
    )
}

fn expand_inputs(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        let metadata = fs::metadata(path).with_context(|| format!("reading metadata for {:?}", path))?;
        if metadata.is_dir() {
            let mut found = Vec::new();
            for entry in fs::read_dir(path).with_context(|| format!("reading directory {:?}", path))? {
                let entry = entry.with_context(|| format!("reading entry in {:?}", path))?;
                let candidate = entry.path();
                if candidate.is_file() && is_plan_file(&candidate) {
                    found.push(candidate);
                }
            }
            found.sort();
            tracing::debug!("found {} plan files in {:?}", found.len(), path);
            files.extend(found);
        } else {
            files.push(path.clone());
        }
    }
    Ok(files)
}
