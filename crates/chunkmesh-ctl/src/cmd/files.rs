//! Tracker file listing.

use anyhow::Result;

use chunkmesh_services::TrackerClient;

pub async fn cmd_files(tracker: &TrackerClient) -> Result<()> {
    let files = tracker.files().await?;

    if files.is_empty() {
        println!("No files published.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Published Files ({})", files.len());
    println!("═══════════════════════════════════════");
    for f in &files {
        println!("  ┌─ [{}] {}", f.file_id, f.file_name);
        println!("  │  size : {} bytes", f.file_size);
        if f.file_enc {
            println!("  │  enc  : yes");
        }
        println!("  └─ hash : {}", f.file_hash);
    }

    Ok(())
}
