use anyhow::Result;

use ferry_engine::rules::catalog::builtin_registry;

/// Execute the `models` command: list registered transform models.
pub fn execute() -> Result<()> {
    let registry = builtin_registry()?;
    for model in registry.models() {
        let predicate = model
            .predicate()
            .map_or_else(|| "-".to_string(), ToString::to_string);
        println!("{}", model.name());
        if let Some(base) = model.base_name() {
            println!("  Extends:   {base}");
        }
        println!("  Matches:   {predicate}");
        println!("  Handlers:  {}", model.handler_count());
        println!("  Ignored:   {}", model.ignored_count());
        if !model.defaults().is_empty() {
            println!("  Defaults:  {}", serde_json::Value::Object(model.defaults().clone()));
        }
    }
    Ok(())
}
