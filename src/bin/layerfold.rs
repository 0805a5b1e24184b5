use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "layerfold", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Optimize a recorded scene and write the rewritten scene.
    Optimize(OptimizeArgs),
    /// Render a scene to a PNG.
    Render(RenderArgs),
    /// Build an HTML report from optimizer report data.
    Report(ReportArgs),
}

#[derive(Parser, Debug)]
struct OptimizeArgs {
    /// Input scene JSON.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Output scene JSON path.
    #[arg(long, default_value = "optimized.json")]
    out: PathBuf,

    /// Transform to run.
    #[arg(long, value_enum, default_value_t = TransformChoice::Collapse)]
    transform: TransformChoice,

    /// Also write sectioned report data for `layerfold report`.
    #[arg(long)]
    report_data: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// Input scene JSON.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,
}

#[derive(Parser, Debug)]
struct ReportArgs {
    /// Report data written by `layerfold optimize --report-data`.
    #[arg(long)]
    data: PathBuf,

    /// Optional before-snapshot PNG, referenced from the HTML as given.
    #[arg(long)]
    before: Option<String>,

    /// Optional after-snapshot PNG, referenced from the HTML as given.
    #[arg(long)]
    after: Option<String>,

    /// Output HTML path.
    #[arg(long)]
    out: PathBuf,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TransformChoice {
    /// Collapse redundant save layers into plain saves.
    Collapse,
    /// Generic peephole cleanup (dead scopes, invisible draws).
    Peephole,
    /// Pass the scene through unchanged.
    None,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Command::Optimize(args) => cmd_optimize(args),
        Command::Render(args) => cmd_render(args),
        Command::Report(args) => cmd_report(args),
    }
}

fn ensure_parent_dir(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create output dir '{}'", parent.display()))?;
        }
    }
    Ok(())
}

fn cmd_optimize(args: OptimizeArgs) -> anyhow::Result<()> {
    let mut scene = layerfold::read_scene_json(&args.in_path)?;
    scene.validate()?;

    let before_commands = layerfold::command_listing(&scene.commands);
    let mut save_layer_log = Vec::new();

    match args.transform {
        TransformChoice::Collapse => {
            let log = layerfold::collapse_layers(&mut scene.commands);
            eprintln!("collapsed {} save layers", log.len());
            save_layer_log = log.lines();
        }
        TransformChoice::Peephole => {
            let stats = layerfold::strip_noops(&mut scene.commands);
            eprintln!(
                "removed {} of {} commands",
                stats.removed(),
                stats.original_count
            );
        }
        TransformChoice::None => {}
    }

    let after_commands = layerfold::command_listing(&scene.commands);

    ensure_parent_dir(&args.out)?;
    layerfold::write_scene_json(&scene, &args.out)?;

    if let Some(path) = &args.report_data {
        let data = layerfold::ReportData {
            before_count: before_commands.len(),
            after_count: after_commands.len(),
            before_commands,
            after_commands,
            save_layer_log,
        };
        ensure_parent_dir(path)?;
        std::fs::write(path, data.to_data_text())
            .with_context(|| format!("write report data '{}'", path.display()))?;
        eprintln!("wrote {}", path.display());
    }

    eprintln!("wrote {}", args.out.display());
    Ok(())
}

fn cmd_render(args: RenderArgs) -> anyhow::Result<()> {
    let scene = layerfold::read_scene_json(&args.in_path)?;
    scene.validate()?;

    let frame = layerfold::render_scene(&scene)?;

    ensure_parent_dir(&args.out)?;
    layerfold::write_frame_png(&frame, &args.out)?;

    eprintln!("wrote {}", args.out.display());
    Ok(())
}

fn cmd_report(args: ReportArgs) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(&args.data)
        .with_context(|| format!("read report data '{}'", args.data.display()))?;
    let data = layerfold::ReportData::parse(&text)?;

    let html = data.to_html(args.before.as_deref(), args.after.as_deref());

    ensure_parent_dir(&args.out)?;
    std::fs::write(&args.out, html)
        .with_context(|| format!("write report '{}'", args.out.display()))?;

    eprintln!("wrote {}", args.out.display());
    Ok(())
}
