#[tokio::main]
async fn main() {
    beacon_indexer_service_lib::service_main().await;
}
