//! `forgeloop config`: configuration management commands.

use forgeloop_config::AppConfig;

pub async fn init(force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let dir = AppConfig::config_dir();
    let path = dir.join("config.toml");
    if path.exists() && !force {
        return Err(format!("{} already exists (use --force to overwrite)", path.display()).into());
    }
    std::fs::create_dir_all(&dir)?;
    std::fs::write(&path, AppConfig::default_toml())?;
    println!("  Wrote {}", path.display());
    Ok(())
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    for entry in &mut config.llm.providers {
        if entry.api_key.is_some() {
            entry.api_key = Some("[REDACTED]".into());
        }
    }
    println!("{}", toml::to_string_pretty(&config)?);

    let missing = config.providers_missing_keys();
    if !missing.is_empty() {
        println!("# Providers without an API key:");
        for entry in missing {
            println!("#   {} ({:?})", entry.model, entry.kind);
        }
    }
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", AppConfig::config_dir().join("config.toml").display());
    Ok(())
}
