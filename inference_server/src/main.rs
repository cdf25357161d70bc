use inference_server::{config, start_server, telemetry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::get_configuration().expect("failed to load config");
    telemetry::init_tracing(config.log_level, config.environment);

    start_server(config).await
}
