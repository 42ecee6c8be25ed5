use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant, SystemTime},
};

use litho::{BasicGeom, CompileOptions, Library, Script};

const USAGE: &str = "\
usage: litho <layout.pls> [options]
  -n, --no-output        do not write results to a file
  -v, --view             print a library summary after compiling
  -w, --watch            watch the source and recompile on change (implies -v)
  -p, --pdf              write PDF plots instead of a GDS file
  -f, --force-rerender   ignore all .plb result caches
";

#[derive(Default)]
struct Args {
    input: Option<PathBuf>,
    no_output: bool,
    view: bool,
    watch: bool,
    pdf: bool,
    force_rerender: bool,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args::default();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "-n" | "--no-output" => args.no_output = true,
            "-v" | "--view" => args.view = true,
            "-w" | "--watch" => {
                args.watch = true;
                args.view = true;
            }
            "-p" | "--pdf" => args.pdf = true,
            "-f" | "--force-rerender" => args.force_rerender = true,
            "-h" | "--help" => return Err(String::new()),
            _ if arg.starts_with('-') => return Err(format!("unknown option '{arg}'")),
            _ => {
                if args.input.is_some() {
                    return Err("more than one input file given".to_owned());
                }
                args.input = Some(PathBuf::from(arg));
            }
        }
    }
    if args.input.is_none() {
        return Err("missing input file".to_owned());
    }
    Ok(args)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("error: {msg}");
            }
            eprint!("{USAGE}");
            return ExitCode::FAILURE;
        }
    };
    let input = args.input.clone().expect("parse_args requires an input");

    if input.extension().and_then(|e| e.to_str()) == Some("gds") {
        // pre-built libraries are a viewer concern; the binary reader lives
        // with the external viewer
        eprintln!("error: .gds input is not supported by this build; pass a .pls script");
        return ExitCode::FAILURE;
    }

    let opts = CompileOptions {
        force_rerender: args.force_rerender,
        timestamp: None,
    };

    if args.watch {
        return watch_loop(&input, &args, &opts);
    }

    match compile_once(&input, &args, &opts) {
        Ok(library) => {
            if args.view {
                print_summary(&library);
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn compile_once(input: &Path, args: &Args, opts: &CompileOptions) -> Result<Library, litho::Error> {
    let started = Instant::now();
    let script = Script::compile_file(input, &BasicGeom, opts)?;
    let elapsed = started.elapsed();
    eprintln!(
        " > {} in {:.3}s (hash {})",
        if script.loaded_from_cache { "restored" } else { "rendered" },
        elapsed.as_secs_f64(),
        script.hash
    );

    if !args.no_output {
        let out = if args.pdf {
            let path = input.with_extension("");
            litho::emit::pdf::write(&script.library, &path)?;
            path.with_extension("pdf")
        } else {
            let path = input.with_extension("gds");
            litho::emit::gds::write(&script.library, &path, opts.timestamp)?;
            path
        };
        eprintln!(" > wrote {}", out.display());
    }
    Ok(script.library)
}

fn print_summary(library: &Library) {
    println!("library: {} cell(s)", library.cells.len());
    for name in library.sorted_names() {
        let cell = library.get(name).expect("sorted names exist");
        let bbox = library
            .cell_bounding_box(name)
            .map_or("empty".to_owned(), |bb| {
                format!(
                    "[{:.3}, {:.3}] .. [{:.3}, {:.3}]",
                    bb.min.x, bb.min.y, bb.max.x, bb.max.y
                )
            });
        println!(
            "  {name}: {} polygon(s), {} reference(s), bbox {bbox}",
            cell.polygons.len(),
            cell.references.len()
        );
    }
}

fn mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).ok()?.modified().ok()
}

/// Recompiles whenever the source file's mtime changes. A viewer thread
/// shares a `(current library, shutdown flag)` cell with this loop and
/// reprints the summary when the library is replaced.
fn watch_loop(input: &Path, args: &Args, opts: &CompileOptions) -> ExitCode {
    // the viewer thread observes (generation, library); it reprints when the
    // library pointer is replaced and exits when the shutdown flag is set
    let shared: Arc<(Mutex<(u64, Option<Library>)>, AtomicBool)> =
        Arc::new((Mutex::new((0, None)), AtomicBool::new(false)));

    let viewer = {
        let shared = Arc::clone(&shared);
        thread::spawn(move || {
            let mut seen = 0u64;
            while !shared.1.load(Ordering::SeqCst) {
                {
                    let guard = shared.0.lock().expect("viewer lock");
                    if guard.0 != seen {
                        seen = guard.0;
                        if let Some(library) = guard.1.as_ref() {
                            print_summary(library);
                        }
                    }
                }
                thread::sleep(Duration::from_millis(500));
            }
        })
    };

    let mut last_change = mtime(input);
    let mut first = true;
    while !shared.1.load(Ordering::SeqCst) {
        if first || mtime(input) != last_change {
            last_change = mtime(input);
            first = false;
            println!("------------------------------------------------------");
            println!(" > started rendering...");
            match compile_once(input, args, opts) {
                Ok(library) => {
                    let mut guard = shared.0.lock().expect("watch lock");
                    guard.0 += 1;
                    guard.1 = Some(library);
                    println!(" > successful");
                }
                Err(err) => eprintln!(" > error: {err}"),
            }
        }
        thread::sleep(Duration::from_millis(500));
    }

    shared.1.store(true, Ordering::SeqCst);
    let _ = viewer.join();
    ExitCode::SUCCESS
}
