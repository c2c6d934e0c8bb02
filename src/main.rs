use std::{
    path::{Path, PathBuf},
    thread,
    time::{Duration, SystemTime},
};

use anyhow::{Result, anyhow};
use crossbeam_channel::{Receiver, Sender};
use node_forge_field_compiler::{
    compiler::{CompilerOptions, FieldCompiler, TemplateKind, TickOutcome},
    dsl::{self, GraphDSL},
    graph,
};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Default, Clone)]
struct Cli {
    graph_json: Option<PathBuf>,
    out_dir: Option<PathBuf>,
    template: TemplateKind,
    no_validate: bool,
    watch: bool,
}

fn parse_cli(args: &[String]) -> Result<Cli> {
    let mut cli = Cli::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--graph-json" => {
                let Some(v) = args.get(i + 1) else {
                    return Err(anyhow!("missing value for --graph-json"));
                };
                cli.graph_json = Some(PathBuf::from(v));
                i += 2;
            }
            "--out-dir" | "--outputdir" => {
                let Some(v) = args.get(i + 1) else {
                    return Err(anyhow!("missing value for --out-dir"));
                };
                cli.out_dir = Some(PathBuf::from(v));
                i += 2;
            }
            "--template" => {
                let Some(v) = args.get(i + 1) else {
                    return Err(anyhow!("missing value for --template"));
                };
                cli.template = v.parse()?;
                i += 2;
            }
            "--no-validate" => {
                cli.no_validate = true;
                i += 1;
            }
            "--watch" => {
                cli.watch = true;
                i += 1;
            }
            other => {
                return Err(anyhow!(
                    "unknown argument: {other} (supported: --graph-json <graph.json>, --out-dir <dir>, --template raymarch|compute, --no-validate, --watch)"
                ));
            }
        }
    }
    Ok(cli)
}

#[derive(Debug, Clone)]
enum GraphUpdate {
    Parsed(GraphDSL),
    ParseError(String),
}

fn warn_unreachable(graph: &GraphDSL) {
    let unreachable = graph::unreachable_from_output(graph);
    if !unreachable.is_empty() {
        eprintln!(
            "[compile] warning: nodes not reachable from the field output: {}",
            unreachable.join(", ")
        );
    }
}

fn report_outcome(compiler: &FieldCompiler, outcome: &TickOutcome, out_dir: &Path) -> Result<()> {
    match outcome {
        TickOutcome::Unchanged => println!("[compile] unchanged"),
        TickOutcome::ParametersUpdated { changed_fields } => {
            if let Some(artifact) = compiler.artifact() {
                artifact.write_params_to_dir(out_dir)?;
            }
            println!("[compile] parameters updated ({changed_fields} fields)");
        }
        TickOutcome::Rebuilt { change } => {
            let artifact = compiler
                .artifact()
                .ok_or_else(|| anyhow!("rebuild reported without an artifact"))?;
            artifact.write_to_dir(out_dir)?;
            println!(
                "[compile] rebuilt ({}): {} -> {}",
                change.label(),
                compiler.options().template.name(),
                out_dir.join("field.wgsl").display()
            );
        }
        TickOutcome::Failed { error, .. } => {
            eprintln!("[compile] failed: {error}");
            for d in outcome.diagnostics() {
                eprintln!("[compile]   {d}");
            }
            if compiler.artifact().is_some() {
                eprintln!("[compile] keeping previous outputs");
            }
        }
    }
    Ok(())
}

fn run_once(cli: &Cli, graph_path: &Path, out_dir: &Path) -> Result<()> {
    let graph = dsl::load_graph_from_path(graph_path)?;
    warn_unreachable(&graph);

    let mut compiler = FieldCompiler::new(compiler_options(cli))?;
    let outcome = compiler.tick(&graph);
    report_outcome(&compiler, &outcome, out_dir)?;
    if outcome.is_failure() {
        return Err(anyhow!("compilation of {} failed", graph_path.display()));
    }
    Ok(())
}

fn send_graph_update(tx: &Sender<GraphUpdate>, drop_rx: &Receiver<GraphUpdate>, update: GraphUpdate) {
    if tx.try_send(update.clone()).is_err() {
        while drop_rx.try_recv().is_ok() {}
        let _ = tx.try_send(update);
    }
}

fn spawn_graph_poller(
    path: PathBuf,
    tx: Sender<GraphUpdate>,
    drop_rx: Receiver<GraphUpdate>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut last_modified: Option<SystemTime> = None;
        loop {
            let modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
            if modified.is_some() && modified != last_modified {
                last_modified = modified;
                let update = match dsl::load_graph_from_path(&path) {
                    Ok(graph) => GraphUpdate::Parsed(graph),
                    Err(e) => GraphUpdate::ParseError(format!("{e:#}")),
                };
                send_graph_update(&tx, &drop_rx, update);
            }
            thread::sleep(POLL_INTERVAL);
        }
    })
}

fn run_watch(cli: &Cli, graph_path: &Path, out_dir: &Path) -> Result<()> {
    // Graph snapshots (keep latest only).
    let (tx, rx) = crossbeam_channel::bounded::<GraphUpdate>(1);
    let drop_rx = rx.clone();
    let _poller = spawn_graph_poller(graph_path.to_path_buf(), tx, drop_rx);

    let mut compiler = FieldCompiler::new(compiler_options(cli))?;
    println!("[watch] watching {}", graph_path.display());
    loop {
        let update = rx
            .recv()
            .map_err(|e| anyhow!("graph update channel closed: {e}"))?;
        match update {
            GraphUpdate::Parsed(graph) => {
                warn_unreachable(&graph);
                let outcome = compiler.tick(&graph);
                if let Err(e) = report_outcome(&compiler, &outcome, out_dir) {
                    eprintln!("[watch] failed to write outputs: {e:#}");
                }
            }
            GraphUpdate::ParseError(message) => {
                eprintln!("[watch] graph parse error: {message}");
            }
        }
    }
}

fn compiler_options(cli: &Cli) -> CompilerOptions {
    CompilerOptions {
        template: cli.template,
        validate: !cli.no_validate,
        ..Default::default()
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let argv: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_cli(&argv)?;

    let graph_path = cli
        .graph_json
        .clone()
        .ok_or_else(|| anyhow!("--graph-json <graph.json> is required"))?;
    let out_dir = cli.out_dir.clone().unwrap_or_else(|| {
        graph_path
            .parent()
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| PathBuf::from("."))
    });

    if cli.watch {
        run_watch(&cli, &graph_path, &out_dir)
    } else {
        run_once(&cli, &graph_path, &out_dir)
    }
}
