use anyhow::Result;
use clap::{Parser, Subcommand};
use hyperstore_arrow::tid::{MAX_TUPLES_PER_PAGE, RowId};

mod commands;

#[derive(Parser)]
#[command(name = "hyperstore-cmd")]
#[command(about = "Command-line utility for Hyperstore diagnostics")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode, decode and classify row identifiers
    Tid {
        /// Page capacity used by the compressed row identifier encoding
        #[arg(long, default_value_t = MAX_TUPLES_PER_PAGE, value_parser = clap::value_parser!(u16).range(1..))]
        tuples_per_page: u16,

        #[command(subcommand)]
        command: TidCommands,
    },
}

#[derive(Subcommand)]
enum TidCommands {
    /// Encode a compressed record's row identifier and a tuple index
    Encode {
        /// Row identifier of the compressed record, as `(page,slot)` or `page,slot`
        row_id: RowId,

        /// 1-based index of the row inside the compressed record
        tuple_index: u16,
    },

    /// Decode a compressed row identifier
    Decode {
        /// Compressed row identifier, as `(page,slot)` or `page,slot`
        row_id: RowId,
    },

    /// Tell whether a row identifier addresses a row inside a compressed record
    IsCompressed { row_id: RowId },

    /// Move a row identifier forward by a number of slots
    Advance {
        row_id: RowId,

        /// Number of slots to move forward
        #[arg(default_value_t = 1)]
        increment: u32,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Tid {
            tuples_per_page,
            command,
        } => commands::tid::run(tuples_per_page, command),
    }
}
