//! docpress – command-line component tree → PDF renderer.
//!
//! Usage:
//!   docpress <input.html|input.json> [output] [--landscape] [--size A4]
//!            [--title "My Report"] [--preview] [--config render.json]
//!            [--remote URL] [--modules DIR] [--debug]
//!   docpress --sample <name> [output] ...
//!
//! If `output` is omitted it is written next to the input file with the same
//! stem (`report.html` → `report.pdf`, or `report.preview.html` with
//! `--preview`).

use std::{env, fs, path::PathBuf, process, sync::Arc};

use docpress::client::{FsModuleResolver, ModuleResolver};
use docpress::config::BackendKind;
use docpress::templates;
use docpress::{
    CancelToken, DocumentSpec, Orientation, OutputMode, PageSize, Pipeline, RenderConfig,
};

#[tokio::main]
async fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    let mut sample: Option<String> = None;
    let mut landscape = false;
    let mut size: Option<String> = None;
    let mut title: Option<String> = None;
    let mut preview = false;
    let mut config_path: Option<PathBuf> = None;
    let mut remote: Option<String> = None;
    let mut modules_dir: Option<PathBuf> = None;
    let mut debug = false;
    let mut positionals: Vec<PathBuf> = Vec::new();

    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--landscape" | "-l" => landscape = true,
            "--preview" | "-p" => preview = true,
            "--debug" => debug = true,
            "--size" | "-s" => size = Some(value(&mut iter, arg, &args[0])),
            "--title" | "-t" => title = Some(value(&mut iter, arg, &args[0])),
            "--config" | "-c" => config_path = Some(PathBuf::from(value(&mut iter, arg, &args[0]))),
            "--remote" => remote = Some(value(&mut iter, arg, &args[0])),
            "--modules" | "-m" => modules_dir = Some(PathBuf::from(value(&mut iter, arg, &args[0]))),
            "--sample" => sample = Some(value(&mut iter, arg, &args[0])),
            "--help" | "-h" => {
                print_usage(&args[0]);
                process::exit(0);
            }
            other if other.starts_with('-') => {
                eprintln!("Unknown flag: {other}");
                print_usage(&args[0]);
                process::exit(1);
            }
            path => positionals.push(PathBuf::from(path)),
        }
    }

    let (input_path, output_path) = match split_positionals(positionals, sample.is_some()) {
        Ok(paths) => paths,
        Err(extra) => {
            eprintln!("Unexpected argument: {}", extra.display());
            print_usage(&args[0]);
            process::exit(1);
        }
    };

    // Configuration: file, then environment, then flags.
    let mut config = match &config_path {
        Some(path) => match RenderConfig::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Error: {e}");
                process::exit(1);
            }
        },
        None => RenderConfig::default(),
    }
    .apply_env();
    if let Some(url) = remote {
        config.conversion.remote_url = Some(url);
        config.conversion.backend = BackendKind::Remote;
    }

    let (mut doc, stem_source) = match (&sample, &input_path) {
        (Some(name), _) => match templates::sample(name) {
            Some(html) => (
                DocumentSpec::from_html(&html).with_title(name.clone()),
                PathBuf::from(name),
            ),
            None => {
                eprintln!("Error: unknown sample '{name}' (invoice, chart-report, long-report, minimal)");
                process::exit(1);
            }
        },
        (None, Some(input)) => match DocumentSpec::load(input) {
            Ok(doc) => (doc, input.clone()),
            Err(e) => {
                eprintln!("Error: {e}");
                process::exit(1);
            }
        },
        (None, None) => {
            eprintln!("Error: no input file specified.");
            print_usage(&args[0]);
            process::exit(1);
        }
    };

    if let Some(t) = title {
        doc.title = t;
    }
    if let Some(s) = size {
        doc.page_size = PageSize::parse(&s);
    }
    if landscape {
        doc.orientation = Orientation::Landscape;
    }
    doc.debug |= debug;

    // Default output: same directory + same stem as input.
    let output = output_path.unwrap_or_else(|| {
        let mut o = stem_source.clone();
        o.set_extension(if preview { "preview.html" } else { "pdf" });
        o
    });

    let modules: Arc<dyn ModuleResolver> = match modules_dir {
        Some(dir) => Arc::new(FsModuleResolver::new(dir)),
        None if sample.is_some() => Arc::new(templates::sample_modules()),
        None => {
            let base = input_path
                .as_ref()
                .and_then(|p| p.parent())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            Arc::new(FsModuleResolver::new(base))
        }
    };

    let pipeline = match Pipeline::launch(config, modules).await {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Interrupted, cancelling...");
                cancel.cancel();
            }
        });
    }

    let mode = if preview {
        OutputMode::Preview
    } else {
        OutputMode::Pdf
    };

    match pipeline.render(&doc, mode, &cancel).await {
        Ok(outcome) => {
            for warning in &outcome.warnings {
                eprintln!("Warning: {warning}");
            }
            // Create output directory if necessary.
            if let Some(parent) = output.parent() {
                if !parent.as_os_str().is_empty() {
                    if let Err(e) = fs::create_dir_all(parent) {
                        eprintln!("Error creating output directory: {e}");
                        process::exit(1);
                    }
                }
            }
            let bytes = outcome.output.as_bytes();
            if let Err(e) = fs::write(&output, bytes) {
                eprintln!("Error writing '{}': {e}", output.display());
                process::exit(1);
            }
            let pages = outcome.page_count;
            eprintln!(
                "Wrote '{}' ({} bytes, {} page{})",
                output.display(),
                bytes.len(),
                pages,
                if pages == 1 { "" } else { "s" }
            );
        }
        Err(e) => {
            eprintln!("Error rendering document: {e}");
            process::exit(1);
        }
    }
}

/// Split positionals into `(input, output)`. With `--sample` the only
/// positional is the output, wherever it appears. Returns the first surplus
/// argument as the error.
fn split_positionals(
    positionals: Vec<PathBuf>,
    sample: bool,
) -> Result<(Option<PathBuf>, Option<PathBuf>), PathBuf> {
    let mut positionals = positionals.into_iter();
    let input = if sample { None } else { positionals.next() };
    let output = positionals.next();
    if let Some(extra) = positionals.next() {
        return Err(extra);
    }
    Ok((input, output))
}

fn value<'a>(iter: &mut impl Iterator<Item = &'a String>, flag: &str, prog: &str) -> String {
    match iter.next() {
        Some(v) => v.clone(),
        None => {
            eprintln!("Missing value for {flag}");
            print_usage(prog);
            process::exit(1);
        }
    }
}

fn print_usage(prog: &str) {
    eprintln!("docpress – component tree to PDF renderer");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  {prog} <input.html|input.json> [output] [flags]");
    eprintln!("  {prog} --sample <name> [output] [flags]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  <input>        HTML template or JSON document manifest");
    eprintln!("  [output]       Output path  (default: same stem as input with .pdf)");
    eprintln!();
    eprintln!("Flags:");
    eprintln!("  --size, -s     Page size: A3, A4, A5, B5, Letter, Legal, Tabloid, Executive or \"W H\" (e.g. \"8.5in 11in\")");
    eprintln!("  --landscape    Use landscape page orientation");
    eprintln!("  --title, -t    Document title (default: input filename stem)");
    eprintln!("  --preview, -p  Write the paginated HTML instead of a PDF");
    eprintln!("  --config, -c   JSON render configuration file");
    eprintln!("  --remote URL   Convert through the remote conversion service at URL");
    eprintln!("  --modules, -m  Directory client component modules are loaded from");
    eprintln!("  --sample NAME  Render a built-in sample: invoice, chart-report, long-report, minimal");
    eprintln!("  --debug        Outline client placeholders and page boxes");
    eprintln!("  --help         Print this message");
    eprintln!();
    eprintln!("Environment: DOCPRESS_REMOTE_URL, DOCPRESS_BACKEND, DOCPRESS_CHROME, RUST_LOG");
}
