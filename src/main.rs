//! Gridfill - fill annotated grid templates with JSON data

use anyhow::{Context as _, Result, bail};
use gridfill_core::{fill_to_bytes, fill_to_path};
use gridfill_engine::engine::{FillOptions, FillReport, Notation};
use std::env;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;

fn print_usage() {
    eprintln!("Usage: gridfill [OPTIONS] TEMPLATE --data <FILE> --output <FILE>");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  TEMPLATE                     Annotated template workbook (.grd)");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -d, --data <FILE>            JSON data to fill the template with");
    eprintln!("  -o, --output <FILE>          Output workbook (.grd), or - for stdout");
    eprintln!("  --notation <START> <END>     Placeholder markers (default: ${{ }})");
    eprintln!("  --keep-template              Keep template sheets of multisheet loops");
    eprintln!("  --fail-fast                  Abort on the first evaluation error");
    eprintln!("  -h, --help                   Print help");
}

struct Args {
    template: PathBuf,
    data: PathBuf,
    output: PathBuf,
    options: FillOptions,
}

/// Parse arguments; `Ok(None)` means help was printed.
fn parse_args(args: &[String]) -> Result<Option<Args>> {
    let mut template: Option<PathBuf> = None;
    let mut data: Option<PathBuf> = None;
    let mut output: Option<PathBuf> = None;
    let mut options = FillOptions::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                return Ok(None);
            }
            "-d" | "--data" => {
                i += 1;
                let Some(path) = args.get(i) else {
                    bail!("--data requires a file path");
                };
                data = Some(PathBuf::from(path));
            }
            "-o" | "--output" => {
                i += 1;
                let Some(path) = args.get(i) else {
                    bail!("--output requires a file path");
                };
                output = Some(PathBuf::from(path));
            }
            "--notation" => {
                let (Some(start), Some(end)) = (args.get(i + 1), args.get(i + 2)) else {
                    bail!("--notation requires a start and an end marker");
                };
                i += 2;
                options = options.with_notation(Notation::new(start, end)?);
            }
            "--keep-template" => options = options.with_keep_template_sheet(true),
            "--fail-fast" => options = options.with_fail_fast(true),
            arg if arg.starts_with('-') && arg != "-" => {
                bail!("Unknown option: {}", arg);
            }
            arg => {
                if template.is_some() {
                    bail!("Unexpected argument: {}", arg);
                }
                template = Some(PathBuf::from(arg));
            }
        }
        i += 1;
    }

    let (Some(template), Some(data), Some(output)) = (template, data, output) else {
        bail!("TEMPLATE, --data and --output are all required");
    };
    Ok(Some(Args {
        template,
        data,
        output,
        options,
    }))
}

fn report_diagnostics(report: &FillReport) {
    for diagnostic in &report.diagnostics {
        eprintln!("Warning: {}", diagnostic);
    }
}

fn run(args: Args) -> Result<()> {
    let file = File::open(&args.data)
        .with_context(|| format!("Cannot open data file {}", args.data.display()))?;
    let data = gridfill_core::read_data(io::BufReader::new(file))
        .with_context(|| format!("Cannot read data file {}", args.data.display()))?;
    log::debug!("filling {} with {:?}", args.template.display(), args.options);

    let result = if args.output.as_os_str() == "-" {
        fill_to_bytes(&args.template, &data, &args.options).and_then(|(bytes, report)| {
            let mut stdout = io::stdout().lock();
            stdout.write_all(&bytes)?;
            stdout.flush()?;
            Ok(report)
        })
    } else {
        fill_to_path(&args.template, &args.output, &data, &args.options)
    };

    match result {
        Ok(report) => {
            report_diagnostics(&report);
            if args.output.as_os_str() != "-" {
                eprintln!(
                    "Filled {} cell(s) into {}",
                    report.cells_written,
                    args.output.display()
                );
            }
            Ok(())
        }
        Err(err) => {
            for diagnostic in err.diagnostics() {
                eprintln!("Warning: {}", diagnostic);
            }
            Err(anyhow::Error::new(err)
                .context(format!("Cannot fill {}", args.template.display())))
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("error")).init();

    let args: Vec<String> = env::args().collect();
    let parsed = match parse_args(&args) {
        Ok(Some(parsed)) => parsed,
        Ok(None) => return,
        Err(e) => {
            eprintln!("Error: {}", e);
            print_usage();
            std::process::exit(2);
        }
    };

    if let Err(e) = run(parsed) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("gridfill")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_full_command_line() {
        let parsed = parse_args(&args(&[
            "t.grd",
            "--data",
            "d.json",
            "-o",
            "out.grd",
            "--notation",
            "{{",
            "}}",
            "--keep-template",
            "--fail-fast",
        ]))
        .unwrap()
        .unwrap();
        assert_eq!(parsed.template, PathBuf::from("t.grd"));
        assert_eq!(parsed.data, PathBuf::from("d.json"));
        assert_eq!(parsed.output, PathBuf::from("out.grd"));
        assert_eq!(parsed.options.notation.start(), "{{");
        assert!(parsed.options.keep_template_sheet);
        assert!(parsed.options.fail_fast);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_args(&args(&["t.grd", "--data"])).is_err());
        assert!(parse_args(&args(&["t.grd", "--data", "d.json"])).is_err());
        assert!(parse_args(&args(&["t.grd", "--bogus"])).is_err());
        assert!(parse_args(&args(&["a.grd", "b.grd"])).is_err());
        assert!(parse_args(&args(&["t.grd", "-d", "x", "-o", "y", "--notation", "", "}"])).is_err());
        assert!(parse_args(&args(&["--help"])).unwrap().is_none());
    }
}
