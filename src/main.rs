#[tokio::main]
async fn main() {
    if let Err(e) = sshdeck_lib::run().await {
        eprintln!("sshdeck: {}", e);
        std::process::exit(1);
    }
}
