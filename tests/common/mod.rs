use std::fs::File;
use std::io::Error;
use std::path::Path;

/// Writes an operations file that opens `wallets` wallets and deposits
/// 1.0 into each, one confirmed gateway deposit per wallet.
pub fn generate_deposit_csv(path: &Path, wallets: usize) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);

    wtr.write_record(["op", "wallet", "to", "amount", "code"])?;

    for i in 1..=wallets {
        let wallet = format!("w{i}");
        wtr.write_record(["open", &wallet, "", "", ""])?;
        wtr.write_record(["deposit", &wallet, "", "1.0", &format!("dep-{i}")])?;
    }

    wtr.flush()?;
    Ok(())
}
