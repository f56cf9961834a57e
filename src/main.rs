use social_gateway::{config::GatewayConfig, init_tracing, run};
use std::process;

#[tokio::main]
async fn main() {
    init_tracing();

    let config = match GatewayConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = run(config).await {
        eprintln!("Gateway error: {}", e);
        process::exit(1);
    }
}
