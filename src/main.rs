#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = ocr_batch::run().await {
        eprintln!("ocr-batch fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
