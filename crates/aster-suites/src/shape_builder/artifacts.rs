use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use nalgebra::DVector;

/// Writes a state history as row-major ASCII, one state per row: 12 columns
/// for an augmented trajectory state, 144 for a stacked state+STM record.
///
/// # Arguments
/// * `path`: Destination file.
/// * `states`: The history; rows may be any (consistent) width.
pub fn write_state_history(
    path: impl AsRef<Path>,
    states: &[DVector<f64>],
) -> std::io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);

    for state in states {
        let row = state
            .iter()
            .map(|value| format!("{value:+.12e}"))
            .collect::<Vec<_>>()
            .join(" ");
        writeln!(writer, "{row}")?;
    }

    Ok(())
}
