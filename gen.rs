use anyhow::{anyhow, Context};
use clap::{Parser, ValueEnum};
use gdbus_bindgen::{Collision, GenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

const EXIT_USAGE: u8 = 1;
const EXIT_READ: u8 = 2;
const EXIT_PARSE: u8 = 3;
const EXIT_GENERATE: u8 = 4;
const EXIT_WRITE: u8 = 5;

/// Turn a D-Bus introspection document into static GDBus info declarations.
#[derive(Parser)]
#[command(name = "gen", version)]
struct Cli {
    /// Introspection XML document
    file: PathBuf,
    /// Write the generated C here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Prefix of every generated identifier [default: _]
    #[arg(long)]
    prefix: Option<String>,
    /// One level of indentation [default: tab]
    #[arg(long)]
    indent: Option<String>,
    /// Leave out annotations; every annotation reference becomes NULL
    #[arg(long)]
    no_annotations: bool,
    /// Deepest annotation nesting accepted [default: 64]
    #[arg(long, value_name = "N")]
    max_annotation_depth: Option<usize>,
    /// What to do when two nodes map to the same identifier
    #[arg(long, value_enum, default_value_t = OnCollision::Error)]
    on_collision: OnCollision,
}

#[derive(Clone, Copy, ValueEnum)]
enum OnCollision {
    Error,
    Suffix,
}

impl Cli {
    fn options(&self) -> GenOptions {
        let defaults = GenOptions::default();
        GenOptions {
            prefix: self.prefix.clone().unwrap_or(defaults.prefix),
            indent: self.indent.clone().unwrap_or(defaults.indent),
            emit_annotations: !self.no_annotations,
            max_annotation_depth: self.max_annotation_depth.unwrap_or(defaults.max_annotation_depth),
            on_collision: match self.on_collision {
                OnCollision::Error => Collision::Error,
                OnCollision::Suffix => Collision::Suffix,
            },
            ..defaults
        }
    }
}

struct Failure {
    code: u8,
    err: anyhow::Error,
}

fn fail(code: u8) -> impl FnOnce(anyhow::Error) -> Failure {
    move |err| Failure { code, err }
}

fn run(cli: &Cli) -> Result<(), Failure> {
    let xml = std::fs::read(&cli.file)
        .with_context(|| format!("read error: {}", cli.file.display()))
        .map_err(fail(EXIT_READ))?;
    if xml.is_empty() {
        return Err(fail(EXIT_READ)(anyhow!("empty file: {}", cli.file.display())));
    }

    let output = gdbus_bindgen::gen_bindings(&xml, &cli.options()).map_err(|err| {
        let (code, what) = match err {
            gdbus_bindgen::Error::Parse(_) => (EXIT_PARSE, "parsing error"),
            gdbus_bindgen::Error::Generate(_) => (EXIT_GENERATE, "generation error"),
        };
        Failure {
            code,
            err: anyhow::Error::new(err).context(format!("{what}: {}", cli.file.display())),
        }
    })?;
    tracing::info!(
        interfaces = output.interfaces.len(),
        declarations = output.declarations().count(),
        "generated"
    );

    let mut dst: Box<dyn Write> = match &cli.output {
        Some(path) => {
            let f = std::fs::File::create(path)
                .with_context(|| format!("create {}", path.display()))
                .map_err(fail(EXIT_WRITE))?;
            Box::new(std::io::BufWriter::new(f))
        }
        None => Box::new(std::io::stdout().lock()),
    };
    write!(dst, "{output}")
        .and_then(|()| dst.flush())
        .context("write output")
        .map_err(fail(EXIT_WRITE))
}

fn main() -> ExitCode {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .try_init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version are not errors
            let code = if e.use_stderr() { EXIT_USAGE } else { 0 };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(Failure { code, err }) => {
            eprintln!("{err:#}");
            ExitCode::from(code)
        }
    }
}
