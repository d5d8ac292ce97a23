use anyhow::Context as _;
use serde::de::DeserializeOwned;

/// Loads layered config for `app_name`:
/// `config/{run_mode}/base`, `config/{run_mode}/{app_name}`,
/// `config/{run_mode}/{app_name}.local` and finally `APP_*` env overrides.
pub fn load_config<T: DeserializeOwned>(app_name: &str) -> anyhow::Result<T> {
    let run_mode = std::env::var("APP_RUN_MODE").unwrap_or_else(|_| "dev".into());
    let base_path = format!("config/{}", run_mode);

    config::Config::builder()
        .add_source(config::File::with_name(&format!("{base_path}/base")).required(false))
        .add_source(config::File::with_name(&format!("{base_path}/{app_name}")).required(true))
        .add_source(
            config::File::with_name(&format!("{base_path}/{app_name}.local")).required(false),
        )
        .add_source(
            config::Environment::default()
                .prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()
        .with_context(|| format!("build config for {app_name} ({run_mode})"))?
        .try_deserialize::<T>()
        .with_context(|| format!("deserialize config for {app_name}"))
}
