use rask_source_bridge::app;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    app::main().await
}
