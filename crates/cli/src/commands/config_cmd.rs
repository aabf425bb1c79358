//! `vertexcare config`: Configuration management commands.

use vertexcare_config::{AppConfig, CollaboratorBackend, ReasoningEngineKind};

/// Print the built-in defaults, ready to save as `config.toml`.
pub fn print_default() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", AppConfig::default_toml());
    Ok(())
}

/// Warnings for settings that load fine but will likely misbehave.
pub fn warnings(config: &AppConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.reasoning.engine == ReasoningEngineKind::Llm && !config.has_api_key() {
        warnings.push(
            "LLM engine selected without an API key (set VERTEXCARE_API_KEY or OPENAI_API_KEY)"
                .to_string(),
        );
    }

    if config.collaborators.backend == CollaboratorBackend::Fixture
        && let Some(path) = &config.collaborators.fixtures_path
        && !path.exists()
    {
        warnings.push(format!("Fixture file {} does not exist", path.display()));
    }

    let worst_tool_ms = config
        .agent
        .tool_timeouts
        .values()
        .copied()
        .chain(std::iter::once(config.agent.tool_timeout_ms))
        .max()
        .unwrap_or(config.agent.tool_timeout_ms);
    let worst_step_ms = config.agent.reasoning_timeout_ms
        + worst_tool_ms * u64::from(config.agent.retry.max_attempts());
    if config.gateway.run_deadline_ms < worst_step_ms {
        warnings.push(format!(
            "gateway.run_deadline_ms ({}) is shorter than one worst-case step ({worst_step_ms}ms)",
            config.gateway.run_deadline_ms
        ));
    }

    if config.gateway.host == "0.0.0.0" {
        warnings.push("Gateway bound to 0.0.0.0 (reachable from other hosts)".to_string());
    }

    warnings
}

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   ✅ Config parsed successfully");

            let warnings = warnings(&config);
            if warnings.is_empty() {
                println!("   ✅ All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   ⚠️  {w}");
                }
            }

            println!();
            println!("   Engine:     {:?}", config.reasoning.engine);
            println!("   Model:      {}", config.reasoning.model);
            println!("   Backend:    {:?}", config.collaborators.backend);
            println!("   Max steps:  {}", config.agent.max_steps);
            println!(
                "   Gateway:    {}:{}",
                config.gateway.host, config.gateway.port
            );
        }
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if config.reasoning.api_key.is_some() {
        config.reasoning.api_key = Some("***".into());
    }
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}
