//! Row identifier commands

use anyhow::{Context, Result};
use hyperstore_arrow::tid::TidCodec;

use crate::TidCommands;

pub fn run(tuples_per_page: u16, command: TidCommands) -> Result<()> {
    let codec = TidCodec::new(tuples_per_page);
    log::debug!(
        "tuples per page: {}, max encodable page: {}",
        codec.tuples_per_page(),
        codec.max_encodable_page()
    );
    println!("{}", execute(&codec, command)?);
    Ok(())
}

fn execute(codec: &TidCodec, command: TidCommands) -> Result<String> {
    let output = match command {
        TidCommands::Encode {
            row_id,
            tuple_index,
        } => {
            let ctid = codec.encode(row_id, tuple_index).with_context(|| {
                format!("Failed to encode {row_id} with tuple index {tuple_index}")
            })?;
            ctid.to_string()
        }
        TidCommands::Decode { row_id } => {
            let (real, tuple_index) = codec
                .decode(row_id)
                .with_context(|| format!("Failed to decode {row_id}"))?;
            format!("{real} {tuple_index}")
        }
        TidCommands::IsCompressed { row_id } => row_id.is_compressed().to_string(),
        TidCommands::Advance { row_id, increment } => codec
            .advance_by(row_id, increment)
            .with_context(|| format!("Failed to advance {row_id} by {increment}"))?
            .to_string(),
    };
    Ok(output)
}
