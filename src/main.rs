use anyhow::Context;
use metrics_hub_lib::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env();
    let args = std::env::args().skip(1).collect::<Vec<_>>();

    match args.as_slice() {
        [] => metrics_hub_lib::run(config).await.context("metrics hub exited with an error"),
        [method, target] => {
            let response = metrics_hub_lib::request(config, method, target)
                .await
                .with_context(|| format!("{} {} failed", method, target))?;
            let body = response.body.unwrap_or(serde_json::Value::Null);
            println!("{}", serde_json::to_string_pretty(&body)?);
            if response.status >= 400 {
                anyhow::bail!("request returned status {}", response.status);
            }
            Ok(())
        }
        _ => anyhow::bail!("usage: metrics-hub [METHOD TARGET]"),
    }
}
