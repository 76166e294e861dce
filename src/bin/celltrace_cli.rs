use anyhow::{Context, Result, anyhow, bail};
use celltrace::{
    about,
    engine::{CelltraceEngine, Engine, OpResult, Operation, Workflow},
};
use flexi_logger::{Logger, LoggerHandle};
use serde::Serialize;
use serde_json::Value;
use std::{env, fs};

fn usage() {
    eprintln!(
        "Usage:\n  \
  celltrace_cli --version\n  \
  celltrace_cli capabilities\n  \
  celltrace_cli op '<operation-json>'\n  \
  celltrace_cli workflow '<workflow-json>'\n  \
  celltrace_cli analyze --cells PATH --out PATH [--foci PATH --foci-out PATH]\n  \
                [--pixel-conversion X] [--interval-min M] [--snapshot]\n  \
                [--overlay-dir DIR] [--area-plot PATH] [--columns a,b,c] [--verbose]\n\n  \
  Tip: pass @file.json instead of inline JSON; RUST_LOG overrides the log level"
    );
}

fn load_json_arg(value: &str) -> Result<String> {
    if let Some(path) = value.strip_prefix('@') {
        fs::read_to_string(path).with_context(|| format!("Could not read JSON file '{path}'"))
    } else {
        Ok(value.to_string())
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Could not serialize JSON output")?;
    println!("{text}");
    Ok(())
}

fn start_logging(verbose: bool) -> Result<LoggerHandle> {
    let level = if verbose { "debug" } else { "info" };
    Logger::try_with_env_or_str(level)
        .and_then(|logger| logger.log_to_stderr().start())
        .context("Logger initialization failed")
}

#[derive(Debug, Default, PartialEq)]
struct AnalyzeArgs {
    cells: String,
    out: String,
    foci: Option<String>,
    foci_out: Option<String>,
    pixel_conversion: Option<String>,
    interval_min: Option<String>,
    snapshot: bool,
    overlay_dir: Option<String>,
    area_plot: Option<String>,
    columns: Option<Vec<String>>,
    verbose: bool,
}

fn parse_analyze_args(args: &[String]) -> Result<AnalyzeArgs> {
    let mut parsed = AnalyzeArgs::default();
    let mut cells = None;
    let mut out = None;
    let mut iter = args.iter();
    while let Some(flag) = iter.next() {
        let mut value = || {
            iter.next()
                .cloned()
                .ok_or_else(|| anyhow!("Missing value for {flag}"))
        };
        match flag.as_str() {
            "--cells" => cells = Some(value()?),
            "--out" => out = Some(value()?),
            "--foci" => parsed.foci = Some(value()?),
            "--foci-out" => parsed.foci_out = Some(value()?),
            "--pixel-conversion" => parsed.pixel_conversion = Some(value()?),
            "--interval-min" => parsed.interval_min = Some(value()?),
            "--overlay-dir" => parsed.overlay_dir = Some(value()?),
            "--area-plot" => parsed.area_plot = Some(value()?),
            "--columns" => {
                parsed.columns = Some(
                    value()?
                        .split(',')
                        .map(|c| c.trim().to_string())
                        .filter(|c| !c.is_empty())
                        .collect(),
                )
            }
            "--snapshot" => parsed.snapshot = true,
            "--verbose" | "-v" => parsed.verbose = true,
            other => bail!("Unknown analyze option '{other}'"),
        }
    }
    parsed.cells = cells.ok_or_else(|| anyhow!("analyze requires --cells PATH"))?;
    parsed.out = out.ok_or_else(|| anyhow!("analyze requires --out PATH"))?;
    if parsed.foci.is_some() != parsed.foci_out.is_some() {
        bail!("--foci and --foci-out must be given together");
    }
    Ok(parsed)
}

/// Parameters first, so malformed numbers fail before any table is read.
fn analyze_workflow(args: &AnalyzeArgs) -> Workflow {
    let set = |name: &str, value: Value| Operation::SetParameter {
        name: name.to_string(),
        value,
    };
    let mut ops = vec![];
    if let Some(px) = &args.pixel_conversion {
        ops.push(set("pixel_to_micron", Value::String(px.clone())));
    }
    if let Some(minutes) = &args.interval_min {
        ops.push(set("time_interval_minutes", Value::String(minutes.clone())));
    }
    if args.snapshot {
        ops.push(set("timelapse", Value::Bool(false)));
    }
    ops.push(Operation::LoadCells {
        path: args.cells.clone(),
    });
    if let Some(foci) = &args.foci {
        ops.push(Operation::LoadFoci { path: foci.clone() });
    }
    ops.push(Operation::Reconstruct);
    // An ambiguous focus must abort the run before anything is written.
    if args.foci.is_some() {
        ops.push(Operation::AssignFoci);
    }
    ops.push(Operation::ExportCells {
        path: args.out.clone(),
        columns: args.columns.clone(),
    });
    if let Some(foci_out) = &args.foci_out {
        ops.push(Operation::ExportFoci {
            path: foci_out.clone(),
            columns: None,
        });
    }
    if let Some(dir) = &args.overlay_dir {
        ops.push(Operation::RenderOverlay {
            output_dir: dir.clone(),
            background: None,
            from_frame: None,
            to_frame: None,
        });
    }
    if let Some(path) = &args.area_plot {
        ops.push(Operation::RenderAreaPlot { path: path.clone() });
    }
    Workflow {
        run_id: "analyze".to_string(),
        ops,
    }
}

fn report(results: &[OpResult]) {
    for result in results {
        for message in &result.messages {
            println!("{message}");
        }
        for warning in &result.warnings {
            eprintln!("warning: {warning}");
        }
    }
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() <= 1 {
        usage();
        bail!("Missing command");
    }
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("{}", about::version_cli_text());
        return Ok(());
    }

    let command = &args[1];
    match command.as_str() {
        "capabilities" => print_json(&CelltraceEngine::capabilities()),
        "op" => {
            if args.len() <= 2 {
                usage();
                bail!("Missing operation JSON");
            }
            let _logger = start_logging(false)?;
            let json = load_json_arg(&args[2])?;
            let op: Operation = serde_json::from_str(&json).context("Invalid operation JSON")?;
            let result = CelltraceEngine::new().apply(op)?;
            print_json(&result)
        }
        "workflow" => {
            if args.len() <= 2 {
                usage();
                bail!("Missing workflow JSON");
            }
            let _logger = start_logging(false)?;
            let json = load_json_arg(&args[2])?;
            let workflow: Workflow =
                serde_json::from_str(&json).context("Invalid workflow JSON")?;
            let results = CelltraceEngine::new().apply_workflow(workflow)?;
            print_json(&results)
        }
        "analyze" => {
            let parsed = parse_analyze_args(&args[2..]).inspect_err(|_| usage())?;
            let _logger = start_logging(parsed.verbose)?;
            let results = CelltraceEngine::new().apply_workflow(analyze_workflow(&parsed))?;
            report(&results);
            Ok(())
        }
        _ => {
            usage();
            bail!("Unknown command '{command}'")
        }
    }
}
