//! `vertexcare tools`: List the tools the agent can call.

use vertexcare_config::AppConfig;
use vertexcare_core::ToolSpec;
use vertexcare_gateway::runtime::build_registry;

/// One block per tool: name, description, parameters.
pub fn render(specs: &[ToolSpec]) -> String {
    let mut out = String::new();
    for spec in specs {
        out.push_str(&format!("  {}\n    {}\n", spec.name, spec.description));
        for param in &spec.parameters {
            let marker = if param.required { "*" } else { " " };
            out.push_str(&format!(
                "      {marker} {:<12} {:<8} {}\n",
                param.name,
                param.ty.as_str(),
                param.description
            ));
        }
    }
    out
}

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let registry = build_registry(&config.collaborators)?;

    println!("🧰 Registered tools ({})", registry.len());
    println!("==================");
    print!("{}", render(&registry.specs()));
    println!();
    println!("  * required argument");

    Ok(())
}
