use std::env;
use std::io::{self, Write};
use std::process;
use phs::PhsReader;

fn print_usage() {
    eprintln!("Usage: phs-view [OPTIONS] <file.phs.bin>");
    eprintln!();
    eprintln!("Display photon-stream file contents:");
    eprintln!("  - Metadata block values");
    eprintln!("  - One line per event: night run event trigger az zd time pixels photons saturated");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --fields <F>   Number of metadata fields the file was written with (required)");
    eprintln!("  --limit <N>    Stop after N events");
    eprintln!("  --photons      Also print per-pixel arrival slices");
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    let mut num_fields = None;
    let mut limit = None;
    let mut show_photons = false;
    let mut phs_path = None;

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--fields" => num_fields = iter.next().and_then(|v| v.parse::<usize>().ok()),
            "--limit" => limit = iter.next().and_then(|v| v.parse::<usize>().ok()),
            "--photons" => show_photons = true,
            s if !s.starts_with("--") => phs_path = Some(s),
            _ => {}
        }
    }

    let (Some(phs_path), Some(num_fields)) = (phs_path, num_fields) else {
        print_usage();
        process::exit(1);
    };

    let mut reader = PhsReader::open(phs_path, num_fields)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();

    writeln!(out, "# metadata ({} fields)", reader.metadata().len())?;
    for (i, value) in reader.metadata().iter().enumerate() {
        writeln!(out, "#  [{}] {}", i, value)?;
    }

    for (n, event) in reader.events().enumerate() {
        if limit.is_some_and(|l| n >= l) {
            break;
        }
        let event = event?;
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{:.4}\t{:.4}\t{:.6}\t{}\t{}\t{}",
            event.night,
            event.run,
            event.event,
            event.trigger,
            event.az_deg,
            event.zd_deg,
            event.unix_time,
            event.photon_arrivals.len(),
            event.num_photons(),
            event.saturated_pixels.len()
        )?;
        if show_photons {
            for (pixel, slices) in event.photon_arrivals.iter().enumerate() {
                if !slices.is_empty() {
                    writeln!(out, "  {}: {:?}", pixel, slices)?;
                }
            }
        }
    }

    Ok(())
}
