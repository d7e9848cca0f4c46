//! `concierge briefing`: Generate a morning briefing script.

use std::path::Path;

pub async fn run(config_path: Option<&Path>, user_id: &str, material_only: bool) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = super::build_runtime(config_path).await?;
    let user = super::local_user(&runtime, user_id).await?;
    let generator = runtime.briefing_generator();

    let material = generator.gather(&runtime.tool_context(&user.id), &user).await;
    if material_only {
        println!("{}", serde_json::to_string_pretty(&material)?);
        return Ok(());
    }

    if !user.preferences.communication.briefing_enabled {
        eprintln!("  Note: scheduled briefings are off for {}.", user.display_name());
    }

    let briefing = generator.generate(&user, &material).await?;
    println!("{}", briefing.script);
    Ok(())
}
