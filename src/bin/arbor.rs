// The Arbor CLI.
// You can evaluate source files or dump their parse trees as JSON.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::rc::Rc;

use arbor::session::Session;
use arbor::syntax::parser::ParserOptions;
use arbor::syntax::table::{read_syntax_source, SyntaxResolver};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[clap(
    name = "arbor",
    about = "A homoiconic language whose semantics is tree rewrites",
    version = env!("CARGO_PKG_VERSION")
)]
struct Args {
    /// Load an extra syntax description before reading any source
    #[clap(long, global = true, value_name = "FILE")]
    syntax: Option<String>,

    /// Fold unary minus on literals into signed constants at parse time
    #[clap(long, global = true)]
    signed_constants: bool,

    /// Abort evaluation after this many dispatches
    #[clap(long, global = true, value_name = "N")]
    fuel: Option<u64>,

    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Evaluate source files (the default)
    Run {
        #[clap(value_name = "FILE", required = true)]
        files: Vec<String>,
    },

    /// Parse source files and print their trees as JSON
    Parse {
        #[clap(value_name = "FILE", required = true)]
        files: Vec<String>,
    },
}

/// Child-syntax names resolve to `<name>.syntax` next to the sources.
struct FileResolver {
    directory: PathBuf,
}

impl SyntaxResolver for FileResolver {
    fn resolve(&self, name: &str) -> Option<String> {
        let path = self.directory.join(format!("{}.syntax", name));
        std::fs::read_to_string(path).ok()
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("arbor: {}", message);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), String> {
    let options = ParserOptions {
        signed_constants: args.signed_constants,
    };
    let mut session = Session::with_options(options).map_err(|error| error.to_string())?;
    session.interpreter.set_fuel(args.fuel);

    if let Some(path) = &args.syntax {
        let text = std::fs::read_to_string(path)
            .map_err(|error| format!("cannot read '{}': {}", path, error))?;
        let directory = parent_of(path);
        read_syntax_source(
            &text,
            &session.syntax,
            &FileResolver { directory },
        )
        .map_err(|error| error.to_string())?;
    }

    match args.command.unwrap_or(Command::Run { files: Vec::new() }) {
        Command::Run { files } => {
            for file in files {
                let text = std::fs::read_to_string(&file)
                    .map_err(|error| format!("cannot read '{}': {}", file, error))?;
                session.set_resolver(Rc::new(FileResolver {
                    directory: parent_of(&file),
                }));
                match session.eval_source(&file, &text) {
                    Ok(Some(result)) => println!("{}", session.render(&result)),
                    Ok(None) => {}
                    Err(error) => return Err(session.explain(&error)),
                }
            }
            Ok(())
        }
        Command::Parse { files } => {
            for file in files {
                let text = std::fs::read_to_string(&file)
                    .map_err(|error| format!("cannot read '{}': {}", file, error))?;
                session.set_resolver(Rc::new(FileResolver {
                    directory: parent_of(&file),
                }));
                match session.parse_source(&file, &text) {
                    Ok(Some(tree)) => {
                        let json = serde_json::to_string_pretty(&tree)
                            .map_err(|error| error.to_string())?;
                        println!("{}", json);
                    }
                    Ok(None) => println!("null"),
                    Err(error) => return Err(session.explain(&error)),
                }
            }
            Ok(())
        }
    }
}

fn parent_of(path: &str) -> PathBuf {
    Path::new(path)
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}
