// Copyright Valkey GLIDE Project Contributors - SPDX Identifier: Apache-2.0

// Example: keep reading and writing through a sentinel-managed group while
// failing it over by hand (`SENTINEL failover mymaster` on any sentinel).
//
//   cargo run --example sentinel-failover -- router.toml
//
// Without a config file the example expects sentinels on 127.0.0.1:26379-26381
// monitoring `mymaster`.

use sentinel_router::{RouterConfig, RouterContext, RouterError};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = r#"
max_attempts = 3

[sentinel]
nodes = ["127.0.0.1:26379", "127.0.0.1:26380", "127.0.0.1:26381"]
subscribe_retry_wait = "5s"

[[groups]]
name = "mymaster"
"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => RouterConfig::from_file(path)?,
        None => RouterConfig::from_toml_str(DEFAULT_CONFIG)?,
    };
    let context = RouterContext::start(config).await?;
    let router = context.router();

    for i in 0..120u32 {
        let key = format!("failover-demo:{}", i % 10);
        match router.set(key.as_str(), i).await {
            Ok(()) => {}
            Err(RouterError::RetryExhausted { attempts, source, .. }) => {
                eprintln!("write {i} failed after {attempts} attempts: {source}");
            }
            Err(err) => return Err(err.into()),
        }

        let value: Option<u32> = router.get(key.as_str()).await?;
        println!(
            "{key} = {value:?} (master {}, replicas: {})",
            context
                .store()
                .get_master("mymaster")?
                .endpoint(),
            router.has_replica("mymaster")
        );
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    context.shutdown().await;
    Ok(())
}
