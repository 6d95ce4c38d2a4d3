use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use corvid_core::TypeRegistry;
use corvid_ir::Ir;

#[derive(Parser)]
#[command(name = "corvid", about = "Inspect corvid type descriptors and layouts")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the builtin types with size, alignment and flags
    Types,
    /// Print the field layout of a type
    Layout {
        /// Type name, e.g. Module
        name: String,

        /// Register the IR node kinds first
        #[arg(long)]
        ir: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let reg = TypeRegistry::global();

    let result = match cli.command {
        Command::Types => corvid::describe_types(&reg),
        Command::Layout { name, ir } => {
            let registered = if ir { Ir::new(&reg).map(|_| ()) } else { Ok(()) };
            registered.and_then(|()| corvid::describe_layout(&reg, &name))
        }
    };

    match result {
        Ok(text) => print!("{text}"),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
