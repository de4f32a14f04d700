//! HEX image summary command.

use {
    anyhow::{Context, Result},
    console::style,
    model2450::FlashImage,
    model2450::protocol::bootloader::BLOCK_SIZE,
    std::path::Path,
};

/// Number of bootloader blocks the image occupies.
fn block_count(image: &FlashImage) -> usize {
    match (image.min_address(), image.max_address()) {
        (Some(min), Some(max)) => usize::from(max - min) / BLOCK_SIZE + 1,
        _ => 0,
    }
}

/// Hex info command implementation.
pub(crate) fn cmd_hex_info(hex: &Path, json: bool) -> Result<()> {
    let image = FlashImage::from_file(hex)
        .with_context(|| format!("Failed to load {}", hex.display()))?;
    let stats = image.stats();
    let blocks = block_count(&image);

    if json {
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "file": hex.display().to_string(),
                "bytes": image.len(),
                "min_address": image.min_address(),
                "max_address": image.max_address(),
                "blocks": blocks,
                "records": stats,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("{}", style(hex.display()).bold());
    println!("  Data bytes:       {}", image.len());
    if let (Some(min), Some(max)) = (image.min_address(), image.max_address()) {
        println!("  Address range:    0x{min:04X}..=0x{max:04X}");
    }
    println!("  Blocks ({BLOCK_SIZE} B):   {blocks}");
    println!("  Data records:     {}", stats.data_records);
    println!("  Other records:    {}", stats.other_records);
    if stats.extended_records > 0 {
        println!(
            "  {} {} extended address records ignored",
            style("!").yellow().bold(),
            stats.extended_records
        );
    }
    if stats.skipped_lines > 0 {
        println!("  Skipped lines:    {}", stats.skipped_lines);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_count() {
        assert_eq!(block_count(&FlashImage::default()), 0);
        assert_eq!(block_count(&FlashImage::parse(":0100000000FF\n")), 1);
        assert_eq!(
            block_count(&FlashImage::parse(":0100000000FF\n:01008000007F\n")),
            2
        );
    }
}
