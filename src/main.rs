use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    aide_cli::run().await
}
