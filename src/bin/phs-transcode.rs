use phs::{transcode_batch, transcode_file, MetadataSchema, TranscodeConfig};
use std::env;
use std::process;

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  phs-transcode inout <inpath> <outpath> --runinfo <table.jsonl> [OPTIONS]");
    eprintln!("  phs-transcode glob_base <glob_expr> <out_base> --runinfo <table.jsonl> [OPTIONS]");
    eprintln!();
    eprintln!("Transcode JSON-Lines photon-stream runs (plain or gzipped) to .phs.bin files.");
    eprintln!("Night and run are taken from the input file name (NNNNNNNN_RRR...).");
    eprintln!("glob_base writes <out_base>/<YYYY>/<MM>/<DD>/<night>_<run>.phs.bin");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --runinfo <path>   Run-info table, one JSON object per run (required)");
    eprintln!("  --schema <path>    JSON metadata schema declaring the fields to keep");
    eprintln!("                     Without it every field with a numeric reading is kept,");
    eprintln!("                     the permissive behaviour of the legacy transcoder; field");
    eprintln!("                     sets can then drift between runs and abort a batch");
    eprintln!("  --night-key <col>  Run-info column holding the night (default: fNight)");
    eprintln!("  --run-key <col>    Run-info column holding the run (default: fRunID)");
}

struct Args {
    mode: String,
    first: String,
    second: String,
    runinfo: String,
    schema: Option<String>,
    night_key: Option<String>,
    run_key: Option<String>,
}

fn parse_args() -> Option<Args> {
    let args: Vec<String> = env::args().skip(1).collect();
    let mut positional = Vec::new();
    let mut runinfo = None;
    let mut schema = None;
    let mut night_key = None;
    let mut run_key = None;

    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--runinfo" => runinfo = Some(iter.next()?),
            "--schema" => schema = Some(iter.next()?),
            "--night-key" => night_key = Some(iter.next()?),
            "--run-key" => run_key = Some(iter.next()?),
            "-h" | "--help" => return None,
            s if s.starts_with("--") => {
                eprintln!("Unknown option: {}", s);
                return None;
            }
            _ => positional.push(arg),
        }
    }

    let [mode, first, second]: [String; 3] = positional.try_into().ok()?;
    Some(Args {
        mode,
        first,
        second,
        runinfo: runinfo?,
        schema,
        night_key,
        run_key,
    })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let Some(args) = parse_args() else {
        print_usage();
        process::exit(1);
    };

    let mut config = TranscodeConfig::new();
    if let Some(path) = &args.schema {
        config = config.schema(MetadataSchema::from_json_file(path)?);
    }
    let mut keys = config.run_info_keys.clone();
    if let Some(key) = args.night_key {
        keys.night = key;
    }
    if let Some(key) = args.run_key {
        keys.run = key;
    }
    config = config.run_info_keys(keys);

    let mut provider = config.load_run_info(&args.runinfo)?;
    let mut ctx = config.context();

    match args.mode.as_str() {
        "inout" => {
            let summary = transcode_file(&args.first, &args.second, &mut provider, &mut ctx)?;
            eprintln!(
                "Wrote {} events ({} bytes) to {}",
                summary.num_events, summary.bytes_written, args.second
            );
        }
        "glob_base" => {
            let summary = transcode_batch(
                &args.first,
                &args.second,
                &mut provider,
                &mut ctx,
                &config.extension,
            )?;
            eprintln!(
                "Converted {} files ({} events), {} failed",
                summary.converted,
                summary.num_events,
                summary.failed.len()
            );
            for path in &summary.failed {
                eprintln!("  failed: {}", path.display());
            }
            if !summary.failed.is_empty() {
                process::exit(1);
            }
        }
        other => {
            eprintln!("Unknown mode: {}", other);
            print_usage();
            process::exit(1);
        }
    }

    Ok(())
}
